// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 服务器
//!
//! [`HttpServer`] 负责绑定监听地址、管理上下文，并在 `start` 时启动两个后台线程：
//! 调度线程（事件循环）与计时线程（回收空闲连接、清理缓存的 Poll）。
//! 两个线程与交换任务通过 [`ServerShared`] 共享状态。

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, RwLock,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_queue::ArrayQueue;
use log::{debug, error, info, warn};
use mio::{net::TcpListener, Interest, Poll, Registry, Waker};
use serde_derive::Serialize;
use socket2::{Domain, Protocol, Socket, Type};

use crate::{
    config::ServerConfig,
    context::{ContextList, HttpContext},
    dispatcher::{Dispatcher, EVENTS_CAPACITY, LISTENER, WAKER},
    exception::Exception,
    exchange::CompletionEvent,
    executor::{DirectExecutor, Executor},
    filter::HttpHandler,
    selector::SelectorPool,
    table::ConnectionTable,
    timer::ServerTimer,
    tls::TlsConfigurator,
    util,
};

const STOP_WAIT_STEP: Duration = Duration::from_millis(10);
const POST_RETRY_STEP: Duration = Duration::from_millis(1);
/// 完成事件队列的容量。调度线程每轮先清空队列，直接执行器在一轮里最多投递
/// `EVENTS_CAPACITY` 个事件，所以它永远不会在满队列上等待自己。
const COMPLETION_QUEUE_CAPACITY: usize = EVENTS_CAPACITY * 4;

/// 调度线程、计时线程与交换任务共享的状态
pub(crate) struct ServerShared {
    config: Arc<ServerConfig>,
    contexts: Arc<RwLock<ContextList>>,
    table: Mutex<ConnectionTable>,
    pub(crate) events: ArrayQueue<CompletionEvent>,
    pub(crate) in_flight: AtomicUsize,
    waker: Waker,
    registry: Registry,
    selectors: SelectorPool,
    terminating: AtomicBool,
    finished: AtomicBool,
    tls: Option<TlsConfigurator>,
}

impl ServerShared {
    pub(crate) fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub(crate) fn selectors(&self) -> &SelectorPool {
        &self.selectors
    }

    pub(crate) fn tls(&self) -> Option<&TlsConfigurator> {
        self.tls.as_ref()
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn table(&self) -> MutexGuard<'_, ConnectionTable> {
        util::lock(&self.table, "连接表")
    }

    pub(crate) fn find_context(&self, path: &str) -> Option<Arc<HttpContext>> {
        util::read_lock(&self.contexts, "上下文列表").find(path)
    }

    /// 交换任务中阻塞的读写通过这个标志得知服务器已终止
    pub(crate) fn finished_flag(&self) -> &AtomicBool {
        &self.finished
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub(crate) fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::Acquire)
    }

    /// 投递完成事件并唤醒调度线程。队列满时等待调度线程腾出空间；
    /// 服务器已终止时直接关闭连接。
    pub(crate) fn post(&self, event: CompletionEvent) {
        let mut event = event;
        loop {
            if self.is_finished() {
                self.discard(event);
                return;
            }
            match self.events.push(event) {
                Ok(()) => break,
                Err(rejected) => {
                    event = rejected;
                    self.wake();
                    thread::sleep(POST_RETRY_STEP);
                }
            }
        }
        self.wake();
    }

    fn discard(&self, event: CompletionEvent) {
        let CompletionEvent::WriteFinished { connection, .. } = event;
        debug!("[ID{}]服务器已停止，关闭连接", connection.id());
        self.table().remove(connection.token());
        connection.close(&self.registry);
    }

    fn wake(&self) {
        if let Err(e) = self.waker.wake() {
            error!("唤醒调度线程失败：{}", e);
        }
    }
}

/// 服务器运行状态的快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    /// 存活连接数，包括正在执行交换的连接
    pub connections: usize,
    /// 已接受但还没有发来第一个请求的连接
    pub accepted: usize,
    pub idle: usize,
    pub in_flight: usize,
}

struct Running {
    shared: Arc<ServerShared>,
    dispatcher: JoinHandle<()>,
    timer: ServerTimer,
}

pub struct HttpServer {
    config: Arc<ServerConfig>,
    contexts: Arc<RwLock<ContextList>>,
    executor: Arc<dyn Executor>,
    tls: Option<TlsConfigurator>,
    listener: Option<TcpListener>,
    local_addr: Option<SocketAddr>,
    running: Option<Running>,
    stopped: bool,
}

impl HttpServer {
    /// 创建一个尚未绑定地址的服务器
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            contexts: Arc::new(RwLock::new(ContextList::new())),
            executor: Arc::new(DirectExecutor),
            tls: None,
            listener: None,
            local_addr: None,
            running: None,
            stopped: false,
        }
    }

    /// 创建服务器并立即绑定地址
    pub fn create(addr: SocketAddr, backlog: u32, config: ServerConfig) -> Result<Self, Exception> {
        let mut server = Self::new(config);
        server.bind(addr, backlog)?;
        Ok(server)
    }

    /// 绑定监听地址。`backlog` 为 0 时使用配置中的值。
    pub fn bind(&mut self, addr: SocketAddr, backlog: u32) -> Result<(), Exception> {
        if self.listener.is_some() || self.running.is_some() {
            return Err(Exception::AlreadyBound);
        }
        let backlog = if backlog > 0 {
            backlog
        } else {
            self.config.backlog()
        };
        let backlog = i32::try_from(backlog).unwrap_or(i32::MAX);
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(backlog)?;
        socket.set_nonblocking(true)?;
        let listener = TcpListener::from_std(socket.into());
        let local_addr = listener.local_addr()?;
        info!("服务器已绑定到{}，backlog为{}", local_addr, backlog);
        self.local_addr = Some(local_addr);
        self.listener = Some(listener);
        Ok(())
    }

    /// 设置执行交换任务的执行器，只能在启动前调用
    pub fn set_executor(&mut self, executor: Arc<dyn Executor>) -> Result<(), Exception> {
        if self.running.is_some() || self.stopped {
            return Err(Exception::ServerAlreadyStarted);
        }
        self.executor = executor;
        Ok(())
    }

    /// 启用 HTTPS，只能在启动前调用
    pub fn set_tls_configurator(&mut self, tls: TlsConfigurator) -> Result<(), Exception> {
        if self.running.is_some() || self.stopped {
            return Err(Exception::ServerAlreadyStarted);
        }
        self.tls = Some(tls);
        Ok(())
    }

    pub fn tls_configurator(&self) -> Option<&TlsConfigurator> {
        self.tls.as_ref()
    }

    pub fn create_context<H: HttpHandler + 'static>(
        &self,
        path: &str,
        handler: H,
    ) -> Result<Arc<HttpContext>, Exception> {
        self.add_context(HttpContext::new(path).with_handler(handler))
    }

    pub fn add_context(&self, context: HttpContext) -> Result<Arc<HttpContext>, Exception> {
        let context = util::write_lock(&self.contexts, "上下文列表").add(context)?;
        info!("已注册上下文{}", context.path());
        Ok(context)
    }

    pub fn remove_context(&self, path: &str) -> Result<Arc<HttpContext>, Exception> {
        let context = util::write_lock(&self.contexts, "上下文列表").remove(path)?;
        info!("已移除上下文{}", path);
        Ok(context)
    }

    pub fn remove_http_context(&self, context: &Arc<HttpContext>) -> Result<(), Exception> {
        util::write_lock(&self.contexts, "上下文列表").remove_context(context)?;
        info!("已移除上下文{}", context.path());
        Ok(())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// 启动调度线程与计时线程
    pub fn start(&mut self) -> Result<(), Exception> {
        if self.running.is_some() || self.stopped {
            return Err(Exception::ServerAlreadyStarted);
        }
        let mut listener = self.listener.take().ok_or(Exception::ServerNotBound)?;

        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKER)?;
        let registry = poll.registry().try_clone()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;

        let shared = Arc::new(ServerShared {
            config: Arc::clone(&self.config),
            contexts: Arc::clone(&self.contexts),
            table: Mutex::new(ConnectionTable::new()),
            events: ArrayQueue::new(COMPLETION_QUEUE_CAPACITY),
            in_flight: AtomicUsize::new(0),
            waker,
            registry,
            selectors: SelectorPool::new(),
            terminating: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            tls: self.tls.clone(),
        });

        let dispatcher = Dispatcher::new(
            poll,
            listener,
            Arc::clone(&shared),
            Arc::clone(&self.executor),
        );
        let dispatcher = thread::Builder::new()
            .name("http-dispatcher".to_string())
            .spawn(move || dispatcher.run())?;
        let timer = ServerTimer::start(Arc::clone(&shared))?;

        info!(
            "服务器已启动：{}://{}",
            if self.tls.is_some() { "https" } else { "http" },
            self.local_addr
                .map(|a| a.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
        self.running = Some(Running {
            shared,
            dispatcher,
            timer,
        });
        Ok(())
    }

    /// 停止服务器：立即停止接受新连接，最多等待 `grace` 让进行中的交换完成，
    /// 然后关闭所有连接并结束后台线程。
    pub fn stop(&mut self, grace: Duration) {
        let running = match self.running.take() {
            Some(running) => running,
            None => return,
        };
        self.stopped = true;
        let shared = running.shared;
        info!("服务器正在停止，宽限期{:?}", grace);

        shared.terminating.store(true, Ordering::Release);
        shared.wake();

        let deadline = Instant::now() + grace;
        while shared.in_flight.load(Ordering::Acquire) > 0 && Instant::now() < deadline {
            thread::sleep(STOP_WAIT_STEP.min(deadline.saturating_duration_since(Instant::now())));
        }
        let remaining = shared.in_flight.load(Ordering::Acquire);
        if remaining > 0 {
            warn!("宽限期结束时仍有{}个交换在进行", remaining);
        }

        shared.finished.store(true, Ordering::Release);
        shared.wake();
        if running.dispatcher.join().is_err() {
            error!("调度线程异常退出");
        }
        // 调度线程退出之后才投递的事件
        while let Some(event) = shared.events.pop() {
            shared.discard(event);
        }
        running.timer.stop();
        info!("服务器已停止");
    }

    pub fn stats(&self) -> ServerStats {
        match &self.running {
            Some(running) => {
                let table = running.shared.table();
                ServerStats {
                    connections: table.len(),
                    accepted: table.accepted_len(),
                    idle: table.idle_len(),
                    in_flight: running.shared.in_flight.load(Ordering::Acquire),
                }
            }
            None => ServerStats {
                connections: 0,
                accepted: 0,
                idle: 0,
                in_flight: 0,
            },
        }
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        if self.running.is_some() {
            self.stop(Duration::ZERO);
        }
    }
}
