// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use std::{
    fmt,
    io,
    net::{Shutdown, SocketAddr},
    time::Instant,
};

use bytes::BytesMut;
use log::debug;
use mio::{net::TcpStream, Interest, Registry, Token};
use socket2::{SockRef, Socket};

use crate::{param::READ_CHUNK, stream::Transport};

/// 连接在调度器中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// 刚被接受，还没有开始过交换
    Accepted,
    /// 至少完成过一次交换，等待下一个请求
    Idle,
    /// 正在执行交换，不在调度器的 Poll 中
    InFlight,
}

/// 一个已接受的 TCP 连接及其跨交换保留的状态
pub struct Connection {
    id: usize,
    stream: TcpStream,
    remote: SocketAddr,
    transport: Box<dyn Transport>,
    inbound: BytesMut,
    state: ConnectionState,
    deadline: Option<Instant>,
    close_requested: bool,
    fresh: bool,
    registered: bool,
}

impl Connection {
    pub fn new(id: usize, stream: TcpStream, remote: SocketAddr, transport: Box<dyn Transport>) -> Self {
        Self {
            id,
            stream,
            remote,
            transport,
            inbound: BytesMut::with_capacity(READ_CHUNK),
            state: ConnectionState::Accepted,
            deadline: None,
            close_requested: false,
            fresh: true,
            registered: false,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn token(&self) -> Token {
        Token(self.id)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr()
    }

    #[cfg(test)]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(deadline) if deadline <= now)
    }

    pub fn request_close(&mut self) {
        self.close_requested = true;
    }

    pub fn close_requested(&self) -> bool {
        self.close_requested
    }

    /// 第一次调用返回 true，之后都返回 false
    pub fn take_fresh(&mut self) -> bool {
        std::mem::replace(&mut self.fresh, false)
    }

    pub fn scheme(&self) -> &'static str {
        self.transport.scheme()
    }

    /// 是否已有下一个请求的字节（流水线）
    pub fn has_buffered_input(&mut self) -> bool {
        !self.inbound.is_empty() || self.transport.has_buffered_input()
    }

    /// 交换任务使用的三个部分：套接字、传输层与入站缓冲
    pub fn split_io(&mut self) -> (&mut TcpStream, &mut dyn Transport, &mut BytesMut) {
        (&mut self.stream, self.transport.as_mut(), &mut self.inbound)
    }

    pub fn register(&mut self, registry: &Registry, interest: Interest) -> io::Result<()> {
        let token = self.token();
        registry.register(&mut self.stream, token, interest)?;
        self.registered = true;
        Ok(())
    }

    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        if self.registered {
            self.registered = false;
            registry.deregister(&mut self.stream)?;
        }
        Ok(())
    }

    /// 复制一份套接字句柄。交换进行中连接归交换任务所有，停止服务器时通过这份句柄关闭它。
    pub fn shutdown_handle(&self) -> io::Result<Socket> {
        SockRef::from(&self.stream).try_clone()
    }

    /// 注销并关闭套接字
    pub fn close(mut self, registry: &Registry) {
        if let Err(e) = self.deregister(registry) {
            debug!("[ID{}]注销连接失败：{}", self.id, e);
        }
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!("[ID{}]关闭连接失败：{}", self.id, e);
        }
        debug!("[ID{}]连接已关闭", self.id);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("scheme", &self.transport.scheme())
            .field("state", &self.state)
            .field("buffered", &self.inbound.len())
            .field("close_requested", &self.close_requested)
            .finish()
    }
}

/// 测试用：返回服务端连接与对端的阻塞式客户端套接字
#[cfg(test)]
pub(crate) fn test_connection(id: usize) -> (Connection, std::net::TcpStream) {
    use crate::stream::PlainTransport;

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (server, remote) = listener.accept().unwrap();
    server.set_nonblocking(true).unwrap();
    let conn = Connection::new(id, TcpStream::from_std(server), remote, Box::new(PlainTransport));
    (conn, client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::Poll;
    use std::time::Duration;

    #[test]
    fn test_new_connection_state() {
        let (mut conn, _client) = test_connection(7);
        assert_eq!(conn.id(), 7);
        assert_eq!(conn.token(), Token(7));
        assert_eq!(conn.state(), ConnectionState::Accepted);
        assert_eq!(conn.scheme(), "http");
        assert!(!conn.has_buffered_input());
        assert!(conn.take_fresh());
        assert!(!conn.take_fresh());
    }

    #[test]
    fn test_expiry() {
        let (mut conn, _client) = test_connection(2);
        let now = Instant::now();
        assert!(!conn.is_expired(now));
        conn.set_deadline(Some(now + Duration::from_secs(1)));
        assert!(!conn.is_expired(now));
        assert!(conn.is_expired(now + Duration::from_secs(1)));
    }

    #[test]
    fn test_register_and_close() {
        let poll = Poll::new().unwrap();
        let (mut conn, client) = test_connection(3);
        conn.register(poll.registry(), Interest::READABLE).unwrap();
        conn.deregister(poll.registry()).unwrap();
        // 重复注销是无害的
        conn.deregister(poll.registry()).unwrap();
        conn.register(poll.registry(), Interest::READABLE).unwrap();
        conn.close(poll.registry());
        let mut buf = [0u8; 1];
        let n = std::io::Read::read(&mut &client, &mut buf).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_shutdown_handle_closes_owned_socket() {
        let (conn, client) = test_connection(4);
        let handle = conn.shutdown_handle().unwrap();
        handle.shutdown(Shutdown::Both).unwrap();
        // 连接本身仍然存在，但对端已经读到 EOF
        let mut buf = [0u8; 1];
        let n = std::io::Read::read(&mut &client, &mut buf).unwrap();
        assert_eq!(n, 0);
        assert_eq!(conn.id(), 4);
    }
}
