// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 演示服务器
//!
//! 读取 `config/development.toml`，注册几个示例上下文并启动服务器：
//! - `/hello`：返回一段固定文本
//! - `/echo`：把请求体原样写回
//! - `/status`：以 JSON 返回请求信息，需要 Basic 认证（demo/demo）
//!
//! 服务器运行在后台线程上，主线程读取控制台指令。

use std::{
    io::{self, BufRead, Read, Write},
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use embedded_httpd::{
    handler_fn, BasicAuthenticator, Exception, HttpContext, HttpServer, ResponseLength, ServerConfig,
    TlsConfigurator, WorkerPool,
};
use log::{error, info, warn};
use serde_json::json;

const STOP_GRACE: Duration = Duration::from_secs(5);

fn main() {
    if let Err(e) = log4rs::init_file("config/log4rs.yaml", Default::default()) {
        eprintln!("无法初始化日志系统：{}", e);
    }

    let config = match ServerConfig::from_toml("config/development.toml") {
        Ok(config) => {
            info!("配置文件已载入");
            config
        }
        Err(e) => {
            error!("无法读取配置文件，使用默认配置：{}", e);
            ServerConfig::default()
        }
    };

    if let Err(e) = run(config) {
        error!("服务器异常退出：{}", e);
        std::process::exit(1);
    }
}

fn run(config: ServerConfig) -> Result<(), Exception> {
    let address = match config.local() {
        true => IpAddr::V4(Ipv4Addr::LOCALHOST),
        false => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
    };
    let addr = SocketAddr::new(address, config.port());
    let tls = match (config.tls_cert(), config.tls_key()) {
        (Some(cert), Some(key)) => Some(TlsConfigurator::from_pem_files(cert, key)?),
        (None, None) => None,
        _ => {
            warn!("tls_cert与tls_key必须同时配置，HTTPS未启用");
            None
        }
    };
    let pool = WorkerPool::from_config(&config)?;
    info!("工作线程数：{}", pool.threads());

    let mut server = HttpServer::create(addr, 0, config)?;
    server.set_executor(Arc::new(pool))?;
    if let Some(tls) = tls {
        server.set_tls_configurator(tls)?;
    }
    register_contexts(&server)?;
    server.start()?;

    console(&server);
    server.stop(STOP_GRACE);
    Ok(())
}

fn register_contexts(server: &HttpServer) -> Result<(), Exception> {
    server.create_context(
        "/hello",
        handler_fn(|exchange| {
            let body = format!("Hello from {}!\n", embedded_httpd::param::SERVER_NAME);
            exchange
                .response_headers()?
                .set("Content-Type", "text/plain; charset=utf-8")?;
            exchange.send_response_headers(200, ResponseLength::Fixed(body.len() as u64))?;
            exchange.response_body()?.write_all(body.as_bytes())?;
            Ok(())
        }),
    )?;

    server.create_context(
        "/echo",
        handler_fn(|exchange| {
            let mut body = Vec::new();
            exchange.request_body().read_to_end(&mut body)?;
            let content_type = exchange
                .request_headers()
                .get_first("Content-Type")
                .unwrap_or("application/octet-stream")
                .to_string();
            exchange.response_headers()?.set("Content-Type", &content_type)?;
            exchange.send_response_headers(200, ResponseLength::Fixed(body.len() as u64))?;
            exchange.response_body()?.write_all(&body)?;
            Ok(())
        }),
    )?;

    let started = Instant::now();
    let served = Arc::new(AtomicU64::new(0));
    server.add_context(
        HttpContext::new("/status")
            .with_handler(handler_fn(move |exchange| {
                let count = served.fetch_add(1, Ordering::Relaxed) + 1;
                let status = json!({
                    "server": embedded_httpd::param::SERVER_NAME,
                    "uptime_secs": started.elapsed().as_secs(),
                    "served": count,
                    "user": exchange.principal().map(|p| p.username().to_string()),
                    "scheme": exchange.scheme(),
                    "remote": exchange.remote_address().to_string(),
                    "protocol": exchange.protocol().to_string(),
                });
                let body = status.to_string();
                exchange
                    .response_headers()?
                    .set("Content-Type", "application/json")?;
                exchange.send_response_headers(200, ResponseLength::Fixed(body.len() as u64))?;
                exchange.response_body()?.write_all(body.as_bytes())?;
                Ok(())
            }))
            .with_authenticator(BasicAuthenticator::new("status", |user: &str, pass: &str| {
                user == "demo" && pass == "demo"
            })),
    )?;
    Ok(())
}

/// 后台管理控制台，读到 `stop` 或标准输入关闭时返回
fn console(server: &HttpServer) {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let input = match line {
            Ok(input) => input,
            Err(e) => {
                error!("读取控制台输入失败：{}", e);
                break;
            }
        };
        match input.trim() {
            "stop" => {
                println!("停机指令已激活，等待进行中的请求完成...");
                return;
            }
            "status" => {
                let stats = server.stats();
                println!("== Webserver 状态 ===");
                match serde_json::to_string_pretty(&stats) {
                    Ok(text) => println!("{}", text),
                    Err(e) => println!("无法序列化状态：{}", e),
                }
                println!("====================");
            }
            "help" => {
                println!("== Webserver Help ==");
                println!("stop   - 停止服务器");
                println!("status - 查看当前服务器运行状态");
                println!("help   - 显示此帮助信息");
                println!("====================");
            }
            "" => {}
            cmd => println!("无效的命令：{}", cmd),
        }
    }
    info!("标准输入已关闭，服务器即将停止");
}
