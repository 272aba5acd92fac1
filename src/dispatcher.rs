// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 调度线程
//!
//! 调度线程独占服务器的 `mio::Poll`，循环执行：
//! 1. 处理交换任务投递回来的完成事件，决定连接是关闭、立即再次调度还是转为空闲；
//! 2. 在 Poll 上等待最多一个轮询间隔；
//! 3. 接受新连接，把收到可读事件的空闲连接从 Poll 中注销并交给执行器。
//!
//! 任何一个连接上的错误只影响该连接，调度循环本身不会因此退出。

use std::{
    io,
    net::SocketAddr,
    sync::{atomic::Ordering, Arc},
    time::Instant,
};

use log::{debug, error, info, warn};
use mio::{
    net::{TcpListener, TcpStream},
    Events, Interest, Poll, Token,
};

use crate::{
    connection::{Connection, ConnectionState},
    exchange::{self, CompletionEvent},
    executor::Executor,
    server::ServerShared,
    stream::{PlainTransport, Transport},
};

pub(crate) const LISTENER: Token = Token(0);
pub(crate) const WAKER: Token = Token(1);
const FIRST_CONNECTION_ID: usize = 2;
/// 单次 poll 最多返回的事件数
pub(crate) const EVENTS_CAPACITY: usize = 256;

pub(crate) struct Dispatcher {
    poll: Poll,
    events: Events,
    listener: Option<TcpListener>,
    server: Arc<ServerShared>,
    executor: Arc<dyn Executor>,
    next_id: usize,
}

impl Dispatcher {
    pub(crate) fn new(
        poll: Poll,
        listener: TcpListener,
        server: Arc<ServerShared>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        Self {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            listener: Some(listener),
            server,
            executor,
            next_id: FIRST_CONNECTION_ID,
        }
    }

    pub(crate) fn run(mut self) {
        info!("调度线程已启动");
        let poll_interval = self.server.config().poll_interval();
        loop {
            if self.server.is_finished() {
                break;
            }
            if self.server.is_terminating() && self.listener.is_some() {
                self.close_listener();
            }
            self.drain_completions();

            if let Err(e) = self.poll.poll(&mut self.events, Some(poll_interval)) {
                if e.kind() != io::ErrorKind::Interrupted {
                    error!("等待就绪事件失败：{}", e);
                }
                continue;
            }
            let ready: Vec<Token> = self.events.iter().map(|event| event.token()).collect();
            for token in ready {
                match token {
                    LISTENER => self.accept(),
                    WAKER => {}
                    token => self.dispatch(token),
                }
            }
        }
        self.shutdown();
    }

    fn close_listener(&mut self) {
        if let Some(mut listener) = self.listener.take() {
            if let Err(e) = self.poll.registry().deregister(&mut listener) {
                error!("注销监听套接字失败：{}", e);
            }
            info!("服务器停止接受新连接");
        }
    }

    fn accept(&mut self) {
        loop {
            let listener = match self.listener.as_ref() {
                Some(listener) => listener,
                None => return,
            };
            match listener.accept() {
                Ok((stream, remote)) => self.register(stream, remote),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("接受连接失败：{}", e);
                    return;
                }
            }
        }
    }

    fn register(&mut self, stream: TcpStream, remote: SocketAddr) {
        let id = self.next_id;
        self.next_id += 1;
        let config = self.server.config();
        if config.no_delay() {
            if let Err(e) = stream.set_nodelay(true) {
                debug!("[ID{}]设置TCP_NODELAY失败：{}", id, e);
            }
        }
        let transport: Box<dyn Transport> = match self.server.tls() {
            Some(tls) => match tls.transport() {
                Ok(transport) => Box::new(transport),
                Err(e) => {
                    debug!("[ID{}]无法创建TLS会话：{}", id, e);
                    return;
                }
            },
            None => Box::new(PlainTransport),
        };
        let mut conn = Connection::new(id, stream, remote, transport);
        if let Err(e) = conn.register(self.poll.registry(), Interest::READABLE) {
            error!("[ID{}]注册连接失败：{}", id, e);
            return;
        }
        conn.set_deadline(Some(Instant::now() + config.idle_interval()));
        debug!("[ID{}]接受来自{}的连接", id, remote);
        self.server.table().add_accepted(conn);
    }

    fn dispatch(&mut self, token: Token) {
        let conn = self.server.table().take_ready(token);
        let mut conn = match conn {
            Some(conn) => conn,
            // 已被计时线程回收
            None => return,
        };
        if let Err(e) = conn.deregister(self.poll.registry()) {
            debug!("[ID{}]注销连接失败：{}", conn.id(), e);
            self.close(conn);
            return;
        }
        self.submit(conn);
    }

    fn submit(&mut self, mut conn: Connection) {
        conn.set_state(ConnectionState::InFlight);
        conn.set_deadline(None);
        self.server.table().track_in_flight(&conn);
        self.server.in_flight.fetch_add(1, Ordering::AcqRel);
        let server = Arc::clone(&self.server);
        self.executor.execute(Box::new(move || {
            let event = exchange::run(conn, &server);
            server.post(event);
        }));
    }

    fn drain_completions(&mut self) {
        while let Some(event) = self.server.events.pop() {
            self.on_completion(event);
        }
    }

    fn on_completion(&mut self, event: CompletionEvent) {
        let CompletionEvent::WriteFinished {
            mut connection,
            drained,
        } = event;
        self.server.in_flight.fetch_sub(1, Ordering::AcqRel);
        let id = connection.id();

        let idle_full = self.server.table().idle_len() >= self.server.config().max_idle_connections();
        if connection.close_requested() || self.server.is_terminating() || idle_full {
            debug!("[ID{}]交换结束，关闭连接", id);
            self.close(connection);
            return;
        }
        if !drained {
            debug!("[ID{}]请求体没有读完，关闭连接", id);
            self.close(connection);
            return;
        }
        if connection.has_buffered_input() {
            debug!("[ID{}]缓冲中已有下一个请求，立即处理", id);
            self.submit(connection);
            return;
        }
        if let Err(e) = connection.register(self.poll.registry(), Interest::READABLE) {
            error!("[ID{}]重新注册连接失败：{}", id, e);
            self.close(connection);
            return;
        }
        let deadline = Instant::now() + self.server.config().idle_interval();
        self.server.table().add_idle(connection, deadline);
    }

    fn close(&mut self, conn: Connection) {
        self.server.table().remove(conn.token());
        conn.close(self.poll.registry());
    }

    fn shutdown(&mut self) {
        self.close_listener();
        // 已经投递但尚未处理的完成事件
        while let Some(CompletionEvent::WriteFinished { connection, .. }) = self.server.events.pop() {
            self.server.in_flight.fetch_sub(1, Ordering::AcqRel);
            self.close(connection);
        }
        let aborted = self.server.table().abort_in_flight();
        if aborted > 0 {
            warn!("强制关闭了{}个仍在执行交换的连接", aborted);
        }
        let remaining = self.server.table().drain_all();
        let count = remaining.len();
        for conn in remaining {
            conn.close(self.poll.registry());
        }
        info!("调度线程已退出，关闭了{}个连接", count);
    }
}
