// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use log::warn;
use serde_derive::Deserialize;
use serde_derive::Serialize;

use std::fs::File;
use std::io::prelude::*;
use std::time::Duration;

use crate::exception::Exception;

/// 服务器的全部可调参数。
///
/// 由 TOML 文件构建，每一项都有默认值；构建完成后以 `Arc<ServerConfig>` 的形式
/// 在调度线程、计时线程与交换任务之间共享，运行期间不再修改。
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_local")]
    local: bool,
    #[serde(default)]
    worker_threads: usize,
    #[serde(default = "default_backlog")]
    backlog: u32,
    #[serde(default = "default_idle_interval_secs")]
    idle_interval_secs: u64,
    #[serde(default = "default_max_idle_connections")]
    max_idle_connections: usize,
    #[serde(default)]
    max_request_time_secs: Option<u64>,
    #[serde(default)]
    max_response_time_secs: Option<u64>,
    #[serde(default = "default_poll_interval_millis")]
    poll_interval_millis: u64,
    #[serde(default = "default_timer_millis")]
    timer_millis: u64,
    #[serde(default = "default_drain_amount")]
    drain_amount: u64,
    #[serde(default = "default_max_request_headers")]
    max_request_headers: usize,
    #[serde(default = "default_selector_cache_timeout_secs")]
    selector_cache_timeout_secs: u64,
    #[serde(default = "default_chunk_size")]
    chunk_size: usize,
    #[serde(default)]
    no_delay: bool,
    #[serde(default)]
    tls_cert: Option<String>,
    #[serde(default)]
    tls_key: Option<String>,
}

fn default_port() -> u16 {
    7878
}

fn default_local() -> bool {
    true
}

fn default_backlog() -> u32 {
    crate::param::DEFAULT_BACKLOG
}

fn default_idle_interval_secs() -> u64 {
    30
}

fn default_max_idle_connections() -> usize {
    200
}

fn default_poll_interval_millis() -> u64 {
    1000
}

fn default_timer_millis() -> u64 {
    1000
}

fn default_drain_amount() -> u64 {
    65536 // 64KB
}

fn default_max_request_headers() -> usize {
    200
}

fn default_selector_cache_timeout_secs() -> u64 {
    120
}

fn default_chunk_size() -> usize {
    4096
}

impl ServerConfig {
    pub fn new() -> Self {
        Self {
            port: default_port(),
            local: default_local(),
            worker_threads: num_cpus::get(),
            backlog: default_backlog(),
            idle_interval_secs: default_idle_interval_secs(),
            max_idle_connections: default_max_idle_connections(),
            max_request_time_secs: None,
            max_response_time_secs: None,
            poll_interval_millis: default_poll_interval_millis(),
            timer_millis: default_timer_millis(),
            drain_amount: default_drain_amount(),
            max_request_headers: default_max_request_headers(),
            selector_cache_timeout_secs: default_selector_cache_timeout_secs(),
            chunk_size: default_chunk_size(),
            no_delay: false,
            tls_cert: None,
            tls_key: None,
        }
    }

    pub fn from_toml(filename: &str) -> Result<Self, Exception> {
        let mut file = File::open(filename)?;
        let mut str_val = String::new();
        file.read_to_string(&mut str_val)?;
        Self::from_toml_str(&str_val)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, Exception> {
        let raw_config: ServerConfig =
            toml::from_str(content).map_err(|e| Exception::InvalidConfig(e.to_string()))?;
        Ok(raw_config.normalize())
    }

    fn normalize(mut self) -> Self {
        if self.worker_threads == 0 {
            self.worker_threads = num_cpus::get();
        }
        if self.poll_interval_millis == 0 {
            warn!("poll_interval_millis被设置为0，将被改为默认值{}。", default_poll_interval_millis());
            self.poll_interval_millis = default_poll_interval_millis();
        }
        if self.timer_millis == 0 {
            warn!("timer_millis被设置为0，将被改为默认值{}。", default_timer_millis());
            self.timer_millis = default_timer_millis();
        }
        if self.chunk_size == 0 {
            warn!("chunk_size被设置为0，将被改为默认值{}。", default_chunk_size());
            self.chunk_size = default_chunk_size();
        }
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerConfig {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn backlog(&self) -> u32 {
        self.backlog
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_interval_secs)
    }

    pub fn max_idle_connections(&self) -> usize {
        self.max_idle_connections
    }

    /// 读取一个完整请求的时限，`None` 表示不限
    pub fn max_request_time(&self) -> Option<Duration> {
        self.max_request_time_secs.map(Duration::from_secs)
    }

    /// 自发送响应头起写完响应的时限，`None` 表示不限
    pub fn max_response_time(&self) -> Option<Duration> {
        self.max_response_time_secs.map(Duration::from_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis)
    }

    pub fn timer_interval(&self) -> Duration {
        Duration::from_millis(self.timer_millis)
    }

    pub fn drain_amount(&self) -> u64 {
        self.drain_amount
    }

    pub fn max_request_headers(&self) -> usize {
        self.max_request_headers
    }

    pub fn selector_cache_timeout(&self) -> Duration {
        Duration::from_secs(self.selector_cache_timeout_secs)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn no_delay(&self) -> bool {
        self.no_delay
    }

    pub fn tls_cert(&self) -> Option<&str> {
        self.tls_cert.as_deref()
    }

    pub fn tls_key(&self) -> Option<&str> {
        self.tls_key.as_deref()
    }
}
