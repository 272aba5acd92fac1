// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

#[cfg(test)]
mod integration_tests {
    //! # 端到端集成测试
    //!
    //! 每个测试在 `127.0.0.1:0` 上启动一个独立的服务器，用阻塞式 TCP 客户端发送原始报文，
    //! 覆盖上下文路由、请求与响应分帧、100-continue、连接复用与空闲回收、认证和停机。

    use std::{
        io::{self, BufRead, BufReader, Read, Write},
        net::{SocketAddr, TcpStream},
        sync::{Arc, Mutex},
        thread,
        time::{Duration, Instant},
    };

    use embedded_httpd::{
        handler_fn, BasicAuthenticator, HttpContext, HttpServer, ResponseLength, ServerConfig, WorkerPool,
    };

    /// 套接字读超时，防止服务器异常时测试永久阻塞
    const READ_TIMEOUT: Duration = Duration::from_secs(5);

    struct Reply {
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    }

    impl Reply {
        fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        }

        fn text(&self) -> String {
            String::from_utf8_lossy(&self.body).into_owned()
        }
    }

    struct Client {
        reader: BufReader<TcpStream>,
    }

    impl Client {
        fn connect(addr: SocketAddr) -> Self {
            let stream = TcpStream::connect(addr).unwrap();
            stream.set_read_timeout(Some(READ_TIMEOUT)).unwrap();
            Self {
                reader: BufReader::new(stream),
            }
        }

        fn send(&mut self, raw: &[u8]) {
            self.reader.get_mut().write_all(raw).unwrap();
        }

        fn read_line(&mut self) -> String {
            let mut line = String::new();
            self.reader.read_line(&mut line).unwrap();
            line.trim_end_matches(&['\r', '\n'][..]).to_string()
        }

        fn read_reply(&mut self) -> Reply {
            self.read_reply_inner(false)
        }

        fn read_head_reply(&mut self) -> Reply {
            self.read_reply_inner(true)
        }

        fn read_reply_inner(&mut self, head_only: bool) -> Reply {
            let status_line = self.read_line();
            let status = status_line
                .split_whitespace()
                .nth(1)
                .and_then(|code| code.parse().ok())
                .unwrap_or(0);
            let mut headers = Vec::new();
            loop {
                let line = self.read_line();
                if line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    headers.push((name.to_string(), value.trim().to_string()));
                }
            }
            let mut reply = Reply {
                status,
                headers,
                body: Vec::new(),
            };
            if head_only || status == 0 || status == 100 || status == 204 || status == 304 {
                return reply;
            }
            let chunked = reply
                .header("Transfer-Encoding")
                .map(|v| v.eq_ignore_ascii_case("chunked"))
                .unwrap_or(false);
            if chunked {
                reply.body = self.read_chunked();
            } else if let Some(length) = reply.header("Content-Length") {
                let mut body = vec![0u8; length.parse().unwrap()];
                self.reader.read_exact(&mut body).unwrap();
                reply.body = body;
            } else {
                self.reader.read_to_end(&mut reply.body).unwrap();
            }
            reply
        }

        fn read_chunked(&mut self) -> Vec<u8> {
            let mut body = Vec::new();
            loop {
                let size = usize::from_str_radix(self.read_line().trim(), 16).unwrap();
                if size == 0 {
                    while !self.read_line().is_empty() {}
                    return body;
                }
                let mut chunk = vec![0u8; size];
                self.reader.read_exact(&mut chunk).unwrap();
                body.extend_from_slice(&chunk);
                assert_eq!(self.read_line(), "");
            }
        }

        /// 对端是否已经关闭连接（读到 EOF 或连接被重置）
        fn is_closed(&mut self) -> bool {
            let mut byte = [0u8; 1];
            match self.reader.read(&mut byte) {
                Ok(0) => true,
                Ok(_) => false,
                Err(e) => !matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut),
            }
        }
    }

    fn config(extra: &str) -> ServerConfig {
        let text = format!("poll_interval_millis = 50\ntimer_millis = 50\n{}", extra);
        ServerConfig::from_toml_str(&text).unwrap()
    }

    fn register(server: &HttpServer) {
        server
            .create_context(
                "/echo",
                handler_fn(|exchange| {
                    let mut body = Vec::new();
                    exchange.request_body().read_to_end(&mut body)?;
                    exchange.send_response_headers(200, ResponseLength::Fixed(body.len() as u64))?;
                    exchange.response_body()?.write_all(&body)?;
                    Ok(())
                }),
            )
            .unwrap();
        server
            .create_context(
                "/hello",
                handler_fn(|exchange| {
                    exchange
                        .response_headers()?
                        .set("Content-Type", "text/plain")?;
                    exchange.send_response_headers(200, ResponseLength::Fixed(5))?;
                    exchange.response_body()?.write_all(b"hello")?;
                    Ok(())
                }),
            )
            .unwrap();
        server
            .create_context(
                "/stream",
                handler_fn(|exchange| {
                    exchange.send_response_headers(200, ResponseLength::Unknown)?;
                    let mut body = exchange.response_body()?;
                    for part in ["alpha ", "beta ", "gamma"] {
                        body.write_all(part.as_bytes())?;
                        body.flush()?;
                    }
                    body.finish()
                }),
            )
            .unwrap();
        server
            .create_context(
                "/panic",
                handler_fn(|_exchange| panic!("处理器内部错误")),
            )
            .unwrap();
        server
            .create_context(
                "/bye",
                handler_fn(|exchange| {
                    exchange.response_headers()?.set("Connection", "close")?;
                    exchange.send_response_headers(200, ResponseLength::Fixed(3))?;
                    exchange.response_body()?.write_all(b"bye")?;
                    Ok(())
                }),
            )
            .unwrap();
        server.add_context(HttpContext::new("/empty")).unwrap();
        server
            .add_context(
                HttpContext::new("/secure")
                    .with_handler(handler_fn(|exchange| {
                        let user = exchange
                            .principal()
                            .map(|p| p.username().to_string())
                            .unwrap_or_default();
                        exchange.send_response_headers(200, ResponseLength::Fixed(user.len() as u64))?;
                        exchange.response_body()?.write_all(user.as_bytes())?;
                        Ok(())
                    }))
                    .with_authenticator(BasicAuthenticator::new("test", |user: &str, pass: &str| {
                        user == "alice" && pass == "secret"
                    })),
            )
            .unwrap();
    }

    fn start(extra: &str) -> HttpServer {
        let mut server = HttpServer::create("127.0.0.1:0".parse().unwrap(), 0, config(extra)).unwrap();
        register(&server);
        server.start().unwrap();
        server
    }

    fn addr(server: &HttpServer) -> SocketAddr {
        server.local_addr().unwrap()
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn test_unknown_context_returns_404_and_keeps_alive() {
        let server = start("");
        let mut client = Client::connect(addr(&server));
        client.send(b"GET /foo HTTP/1.1\r\nHost: x\r\n\r\n");
        let reply = client.read_reply();
        assert_eq!(reply.status, 404);
        assert!(reply.text().contains("No context found"));
        assert_eq!(reply.header("Connection"), None);

        client.send(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n");
        let reply = client.read_reply();
        assert_eq!(reply.status, 200);
        assert_eq!(reply.text(), "hello");
    }

    #[test]
    fn test_404_with_connection_close() {
        let server = start("");
        let mut client = Client::connect(addr(&server));
        client.send(b"GET /foo HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n");
        let reply = client.read_reply();
        assert_eq!(reply.status, 404);
        assert_eq!(reply.header("Connection"), Some("close"));
        assert!(client.is_closed());
    }

    #[test]
    fn test_echo_fixed_length() {
        let server = start("");
        let mut client = Client::connect(addr(&server));
        client.send(b"POST /echo HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhello");
        let reply = client.read_reply();
        assert_eq!(reply.status, 200);
        assert_eq!(reply.header("Content-Length"), Some("5"));
        assert_eq!(reply.header("Transfer-Encoding"), None);
        assert_eq!(reply.text(), "hello");
    }

    #[test]
    fn test_echo_chunked_request_body() {
        let server = start("");
        let mut client = Client::connect(addr(&server));
        client.send(
            b"POST /echo HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n\
              5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
        );
        let reply = client.read_reply();
        assert_eq!(reply.status, 200);
        assert_eq!(reply.text(), "hello world");
    }

    #[test]
    fn test_expect_continue_before_body() {
        let server = start("");
        let mut client = Client::connect(addr(&server));
        client.send(b"POST /echo HTTP/1.1\r\nHost: x\r\nContent-Length: 4\r\nExpect: 100-continue\r\n\r\n");
        // 服务器先发送中间响应，客户端收到后才发送请求体
        assert_eq!(client.read_line(), "HTTP/1.1 100 Continue");
        assert_eq!(client.read_line(), "");
        client.send(b"ping");
        let reply = client.read_reply();
        assert_eq!(reply.status, 200);
        assert_eq!(reply.text(), "ping");
    }

    #[test]
    fn test_http10_closes_after_response() {
        let server = start("");
        let mut client = Client::connect(addr(&server));
        client.send(b"GET /hello HTTP/1.0\r\n\r\n");
        let reply = client.read_reply();
        assert_eq!(reply.status, 200);
        assert_eq!(reply.header("Connection"), Some("close"));
        assert_eq!(reply.text(), "hello");
        assert!(client.is_closed());
    }

    #[test]
    fn test_http10_keep_alive() {
        let server = start("");
        let mut client = Client::connect(addr(&server));
        client.send(b"GET /hello HTTP/1.0\r\nConnection: keep-alive\r\n\r\n");
        let reply = client.read_reply();
        assert_eq!(reply.status, 200);
        assert_eq!(reply.header("Connection"), Some("keep-alive"));
        assert!(reply.header("Keep-Alive").is_some());

        client.send(b"GET /hello HTTP/1.0\r\nConnection: keep-alive\r\n\r\n");
        assert_eq!(client.read_reply().text(), "hello");
    }

    #[test]
    fn test_http10_keep_alive_survives_404() {
        let server = start("");
        let mut client = Client::connect(addr(&server));
        client.send(b"GET /missing HTTP/1.0\r\nConnection: keep-alive\r\n\r\n");
        let reply = client.read_reply();
        assert_eq!(reply.status, 404);
        assert_eq!(reply.header("Connection"), Some("keep-alive"));
        assert!(reply.header("Keep-Alive").is_some());

        client.send(b"GET /hello HTTP/1.0\r\nConnection: keep-alive\r\n\r\n");
        let reply = client.read_reply();
        assert_eq!(reply.status, 200);
        assert_eq!(reply.text(), "hello");
    }

    #[test]
    fn test_handler_connection_close_ends_keep_alive() {
        let server = start("");
        let mut client = Client::connect(addr(&server));
        client.send(b"GET /bye HTTP/1.1\r\nHost: x\r\n\r\n");
        let reply = client.read_reply();
        assert_eq!(reply.status, 200);
        assert_eq!(reply.header("Connection"), Some("close"));
        assert_eq!(reply.text(), "bye");
        assert!(client.is_closed());
        assert!(wait_for(|| server.stats().connections == 0));
    }

    #[test]
    fn test_unknown_length_is_chunked_on_http11() {
        let server = start("");
        let mut client = Client::connect(addr(&server));
        client.send(b"GET /stream HTTP/1.1\r\nHost: x\r\n\r\n");
        let reply = client.read_reply();
        assert_eq!(reply.status, 200);
        assert_eq!(reply.header("Transfer-Encoding"), Some("chunked"));
        assert_eq!(reply.header("Content-Length"), None);
        assert_eq!(reply.text(), "alpha beta gamma");

        // 分块响应结束后连接仍可复用
        client.send(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(client.read_reply().text(), "hello");
    }

    #[test]
    fn test_unknown_length_is_close_delimited_on_http10() {
        let server = start("");
        let mut client = Client::connect(addr(&server));
        client.send(b"GET /stream HTTP/1.0\r\nConnection: keep-alive\r\n\r\n");
        let reply = client.read_reply();
        assert_eq!(reply.status, 200);
        assert_eq!(reply.header("Transfer-Encoding"), None);
        assert_eq!(reply.header("Connection"), Some("close"));
        assert_eq!(reply.text(), "alpha beta gamma");
    }

    #[test]
    fn test_head_request_has_no_body() {
        let server = start("");
        let mut client = Client::connect(addr(&server));
        client.send(b"HEAD /hello HTTP/1.1\r\nHost: x\r\n\r\n");
        let reply = client.read_head_reply();
        assert_eq!(reply.status, 200);
        assert_eq!(reply.header("Content-Length"), Some("5"));

        client.send(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n");
        let reply = client.read_reply();
        assert_eq!(reply.status, 200);
        assert_eq!(reply.text(), "hello");
    }

    #[test]
    fn test_pipelined_requests_answered_in_order() {
        let server = start("");
        let mut client = Client::connect(addr(&server));
        client.send(
            b"POST /echo HTTP/1.1\r\nHost: x\r\nContent-Length: 3\r\n\r\none\
              GET /hello HTTP/1.1\r\nHost: x\r\n\r\n\
              POST /echo HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nthree",
        );
        assert_eq!(client.read_reply().text(), "one");
        assert_eq!(client.read_reply().text(), "hello");
        assert_eq!(client.read_reply().text(), "three");
    }

    #[test]
    fn test_unread_body_is_drained_for_reuse() {
        let server = start("");
        let mut client = Client::connect(addr(&server));
        // /hello 不读取请求体，交换结束时由服务器排空
        client.send(b"POST /hello HTTP/1.1\r\nHost: x\r\nContent-Length: 10\r\n\r\n0123456789");
        assert_eq!(client.read_reply().status, 200);
        client.send(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(client.read_reply().text(), "hello");
    }

    #[test]
    fn test_body_beyond_drain_amount_forces_close() {
        let server = start("drain_amount = 4");
        let mut client = Client::connect(addr(&server));
        client.send(b"POST /hello HTTP/1.1\r\nHost: x\r\nContent-Length: 100\r\n\r\n0123456789");
        assert_eq!(client.read_reply().status, 200);
        assert!(client.is_closed());
    }

    #[test]
    fn test_idle_cap_closes_extra_connection() {
        let server = start("max_idle_connections = 1");
        let mut first = Client::connect(addr(&server));
        first.send(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(first.read_reply().status, 200);
        assert!(wait_for(|| server.stats().idle == 1));

        let mut second = Client::connect(addr(&server));
        second.send(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(second.read_reply().status, 200);
        assert!(second.is_closed());

        // 第一个连接仍然可以复用
        first.send(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(first.read_reply().text(), "hello");
    }

    #[test]
    fn test_idle_connection_evicted() {
        let server = start("idle_interval_secs = 1");
        let mut client = Client::connect(addr(&server));
        client.send(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(client.read_reply().status, 200);
        assert!(wait_for(|| server.stats().idle == 1));

        let idle_since = Instant::now();
        assert!(client.is_closed());
        assert!(idle_since.elapsed() >= Duration::from_millis(500));
        assert!(wait_for(|| server.stats().connections == 0));
    }

    #[test]
    fn test_silent_connection_evicted() {
        let server = start("idle_interval_secs = 1");
        let mut client = Client::connect(addr(&server));
        assert!(client.is_closed());
        assert!(wait_for(|| server.stats().connections == 0));
    }

    #[test]
    fn test_malformed_request_line_returns_400() {
        let server = start("");
        let mut client = Client::connect(addr(&server));
        client.send(b"BROKEN\r\n\r\n");
        let reply = client.read_reply();
        assert_eq!(reply.status, 400);
        assert_eq!(reply.header("Connection"), Some("close"));
        assert!(client.is_closed());
    }

    #[test]
    fn test_invalid_content_length_returns_400() {
        let server = start("");
        let mut client = Client::connect(addr(&server));
        client.send(b"POST /echo HTTP/1.1\r\nHost: x\r\nContent-Length: abc\r\n\r\n");
        assert_eq!(client.read_reply().status, 400);
        assert!(client.is_closed());
    }

    #[test]
    fn test_context_without_handler_returns_500() {
        let server = start("");
        let mut client = Client::connect(addr(&server));
        client.send(b"GET /empty HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(client.read_reply().status, 500);
    }

    #[test]
    fn test_handler_panic_closes_only_that_connection() {
        let server = start("");
        let mut client = Client::connect(addr(&server));
        client.send(b"GET /panic HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(client.is_closed());

        let mut other = Client::connect(addr(&server));
        other.send(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(other.read_reply().text(), "hello");
    }

    #[test]
    fn test_basic_authentication() {
        let server = start("");
        let mut client = Client::connect(addr(&server));
        client.send(b"GET /secure HTTP/1.1\r\nHost: x\r\n\r\n");
        let reply = client.read_reply();
        assert_eq!(reply.status, 401);
        assert_eq!(reply.header("WWW-Authenticate"), Some("Basic realm=\"test\""));

        // alice:secret
        client.send(b"GET /secure HTTP/1.1\r\nHost: x\r\nAuthorization: Basic YWxpY2U6c2VjcmV0\r\n\r\n");
        let reply = client.read_reply();
        assert_eq!(reply.status, 200);
        assert_eq!(reply.text(), "alice");
    }

    #[test]
    fn test_remove_context() {
        let server = start("");
        server.remove_context("/hello").unwrap();
        let mut client = Client::connect(addr(&server));
        client.send(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(client.read_reply().status, 404);
    }

    #[test]
    fn test_worker_pool_serves_concurrent_clients() {
        let mut server = HttpServer::create("127.0.0.1:0".parse().unwrap(), 0, config("")).unwrap();
        server.set_executor(Arc::new(WorkerPool::new(4).unwrap())).unwrap();
        register(&server);
        server.start().unwrap();
        let addr = addr(&server);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                thread::spawn(move || {
                    let mut client = Client::connect(addr);
                    for round in 0..3 {
                        let body = format!("client-{}-round-{}", i, round);
                        let request = format!(
                            "POST /echo HTTP/1.1\r\nHost: x\r\nContent-Length: {}\r\n\r\n{}",
                            body.len(),
                            body
                        );
                        client.send(request.as_bytes());
                        assert_eq!(client.read_reply().text(), body);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_response_deadline_closes_stalled_reader() {
        let server = start("max_response_time_secs = 1");
        let failure = Arc::new(Mutex::new(None));
        let recorded = Arc::clone(&failure);
        server
            .create_context(
                "/flood",
                handler_fn(move |exchange| {
                    exchange.send_response_headers(200, ResponseLength::Unknown)?;
                    let mut body = exchange.response_body()?;
                    let block = vec![b'x'; 64 * 1024];
                    // 对端不读取，套接字缓冲写满后应在响应时限处失败
                    for _ in 0..16 * 1024 {
                        if let Err(e) = body.write_all(&block) {
                            *recorded.lock().unwrap() = Some(e.kind());
                            return Err(e);
                        }
                    }
                    body.finish()
                }),
            )
            .unwrap();

        let started = Instant::now();
        let mut client = Client::connect(addr(&server));
        client.send(b"GET /flood HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(wait_for(|| failure.lock().unwrap().is_some()));
        assert!(started.elapsed() >= Duration::from_millis(900));
        assert_eq!(*failure.lock().unwrap(), Some(io::ErrorKind::TimedOut));
        assert!(wait_for(|| server.stats().connections == 0));
    }

    #[test]
    fn test_stop_refuses_new_connections() {
        let mut server = start("");
        let addr = addr(&server);
        let mut client = Client::connect(addr);
        client.send(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(client.read_reply().status, 200);

        server.stop(Duration::from_secs(1));
        assert!(client.is_closed());
        assert!(TcpStream::connect(addr).is_err());
        assert_eq!(server.stats().connections, 0);
    }
}
