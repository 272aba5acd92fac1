// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 交换期间的套接字 I/O
//!
//! 连接在调度器中始终是非阻塞的。交换任务借出一个私有 Poll，把套接字包装成
//! [`TimedStream`]：遇到 `WouldBlock` 时在该 Poll 上等待，直到就绪、超过截止时间
//! 或服务器进入终止状态。
//!
//! [`Transport`] 是明文与 TLS 之间的接缝，每个连接在 accept 时选定一种实现。
//! [`Wire`] 把传输层与连接自带的入站缓冲组合起来，对上层提供 `BufRead + Write`；
//! 解析器没有消费的字节（流水线请求）会留在缓冲中，随连接一起保留到下一次交换。

use std::{
    io::{self, BufRead, Read, Write},
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use bytes::{Buf, BytesMut};
use log::debug;
use mio::{net::TcpStream, Events, Interest, Token};

use crate::{param::READ_CHUNK, selector::PollLease};

const STREAM: Token = Token(0);

pub struct TimedStream<'c> {
    sock: &'c mut TcpStream,
    lease: PollLease<'c>,
    events: Events,
    read_deadline: Option<Instant>,
    write_deadline: Option<Instant>,
    slice: Duration,
    abort: &'c AtomicBool,
}

impl<'c> TimedStream<'c> {
    /// 在借出的 Poll 上注册套接字。`slice` 是单次等待的上限，
    /// 每次醒来都会检查 `abort`，服务器终止后最迟一个 `slice` 内返回 `ConnectionAborted`。
    pub fn new(
        sock: &'c mut TcpStream,
        lease: PollLease<'c>,
        slice: Duration,
        abort: &'c AtomicBool,
    ) -> io::Result<Self> {
        lease
            .registry()
            .register(sock, STREAM, Interest::READABLE | Interest::WRITABLE)?;
        Ok(Self {
            sock,
            lease,
            events: Events::with_capacity(4),
            read_deadline: None,
            write_deadline: None,
            slice,
            abort,
        })
    }

    pub fn set_read_deadline(&mut self, deadline: Option<Instant>) {
        self.read_deadline = deadline;
    }

    pub fn set_write_deadline(&mut self, deadline: Option<Instant>) {
        self.write_deadline = deadline;
    }

    fn wait(&mut self, deadline: Option<Instant>) -> io::Result<()> {
        if self.abort.load(Ordering::Acquire) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "服务器正在停止",
            ));
        }
        let timeout = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "读写超时"));
                }
                (deadline - now).min(self.slice)
            }
            None => self.slice,
        };
        match self.lease.poll(&mut self.events, Some(timeout)) {
            Err(e) if e.kind() != io::ErrorKind::Interrupted => Err(e),
            _ => Ok(()),
        }
    }
}

impl Read for TimedStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.sock.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => self.wait(self.read_deadline)?,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }
}

impl Write for TimedStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match self.sock.write(buf) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.wait(self.write_deadline)?
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sock.flush()
    }
}

impl Drop for TimedStream<'_> {
    fn drop(&mut self) {
        // 交还调度器之前必须从临时 Poll 中注销
        if let Err(e) = self.lease.registry().deregister(self.sock) {
            debug!("从临时Poll注销套接字失败：{}", e);
        }
    }
}

/// 明文与加密传输之间的接缝
pub trait Transport: Send {
    /// `http` 或 `https`
    fn scheme(&self) -> &'static str;

    /// 在第一次交换开始时调用；明文传输什么也不做
    fn handshake(&mut self, sock: &mut TimedStream<'_>) -> io::Result<()>;

    fn read(&mut self, sock: &mut TimedStream<'_>, buf: &mut [u8]) -> io::Result<usize>;

    fn write(&mut self, sock: &mut TimedStream<'_>, buf: &[u8]) -> io::Result<usize>;

    fn flush(&mut self, sock: &mut TimedStream<'_>) -> io::Result<()>;

    /// 传输层内部是否还有已解密、尚未交给上层的数据
    fn has_buffered_input(&mut self) -> bool;
}

pub struct PlainTransport;

impl Transport for PlainTransport {
    fn scheme(&self) -> &'static str {
        "http"
    }

    fn handshake(&mut self, _sock: &mut TimedStream<'_>) -> io::Result<()> {
        Ok(())
    }

    fn read(&mut self, sock: &mut TimedStream<'_>, buf: &mut [u8]) -> io::Result<usize> {
        sock.read(buf)
    }

    fn write(&mut self, sock: &mut TimedStream<'_>, buf: &[u8]) -> io::Result<usize> {
        sock.write(buf)
    }

    fn flush(&mut self, sock: &mut TimedStream<'_>) -> io::Result<()> {
        sock.flush()
    }

    fn has_buffered_input(&mut self) -> bool {
        false
    }
}

/// 一次交换看到的字节流
pub struct Wire<'c> {
    sock: TimedStream<'c>,
    transport: &'c mut dyn Transport,
    inbound: &'c mut BytesMut,
}

impl<'c> Wire<'c> {
    pub fn new(
        sock: TimedStream<'c>,
        transport: &'c mut dyn Transport,
        inbound: &'c mut BytesMut,
    ) -> Self {
        Self {
            sock,
            transport,
            inbound,
        }
    }

    pub fn handshake(&mut self) -> io::Result<()> {
        self.transport.handshake(&mut self.sock)
    }

    pub fn scheme(&self) -> &'static str {
        self.transport.scheme()
    }

    pub fn set_read_deadline(&mut self, deadline: Option<Instant>) {
        self.sock.set_read_deadline(deadline);
    }

    pub fn set_write_deadline(&mut self, deadline: Option<Instant>) {
        self.sock.set_write_deadline(deadline);
    }
}

impl Read for Wire<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.inbound.is_empty() && buf.len() >= READ_CHUNK {
            return self.transport.read(&mut self.sock, buf);
        }
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl BufRead for Wire<'_> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.inbound.is_empty() {
            let mut chunk = [0u8; READ_CHUNK];
            let n = self.transport.read(&mut self.sock, &mut chunk)?;
            self.inbound.extend_from_slice(&chunk[..n]);
        }
        Ok(&self.inbound[..])
    }

    fn consume(&mut self, amt: usize) {
        self.inbound.advance(amt);
    }
}

impl Write for Wire<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.transport.write(&mut self.sock, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.transport.flush(&mut self.sock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::SelectorPool;
    use std::net::{TcpListener, TcpStream as StdTcpStream};

    fn socket_pair() -> (TcpStream, StdTcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = StdTcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (TcpStream::from_std(server), client)
    }

    #[test]
    fn test_read_waits_for_data() {
        let (mut server, mut client) = socket_pair();
        let pool = SelectorPool::new();
        let abort = AtomicBool::new(false);
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            client.write_all(b"ping").unwrap();
            client
        });
        let mut stream = TimedStream::new(
            &mut server,
            pool.take().unwrap(),
            Duration::from_millis(20),
            &abort,
        )
        .unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
        drop(writer.join().unwrap());
    }

    #[test]
    fn test_read_deadline_times_out() {
        let (mut server, _client) = socket_pair();
        let pool = SelectorPool::new();
        let abort = AtomicBool::new(false);
        let mut stream = TimedStream::new(
            &mut server,
            pool.take().unwrap(),
            Duration::from_millis(20),
            &abort,
        )
        .unwrap();
        stream.set_read_deadline(Some(Instant::now() + Duration::from_millis(100)));
        let mut buf = [0u8; 1];
        let err = stream.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_abort_flag_interrupts_wait() {
        let (mut server, _client) = socket_pair();
        let pool = SelectorPool::new();
        let abort = AtomicBool::new(true);
        let mut stream = TimedStream::new(
            &mut server,
            pool.take().unwrap(),
            Duration::from_millis(20),
            &abort,
        )
        .unwrap();
        let mut buf = [0u8; 1];
        let err = stream.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
    }

    #[test]
    fn test_wire_keeps_unconsumed_bytes() {
        let (mut server, mut client) = socket_pair();
        client.write_all(b"line one\r\nrest").unwrap();
        let pool = SelectorPool::new();
        let abort = AtomicBool::new(false);
        let mut transport = PlainTransport;
        let mut inbound = BytesMut::new();
        {
            let stream = TimedStream::new(
                &mut server,
                pool.take().unwrap(),
                Duration::from_millis(20),
                &abort,
            )
            .unwrap();
            let mut wire = Wire::new(stream, &mut transport, &mut inbound);
            wire.set_read_deadline(Some(Instant::now() + Duration::from_secs(5)));
            let mut line = String::new();
            wire.read_line(&mut line).unwrap();
            assert_eq!(line, "line one\r\n");
            assert_eq!(wire.scheme(), "http");
        }
        // 后续字节可能尚未到达，至少已读入的部分必须留在缓冲中
        assert!(b"rest".starts_with(&inbound[..]));
        assert_eq!(pool.idle_count(), 1);
    }
}
