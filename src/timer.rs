// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use std::{
    io,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Instant,
};

use log::{debug, error, info};

use crate::server::ServerShared;

/// 定时回收超时的空闲连接，并定期清理 [`SelectorPool`](crate::selector::SelectorPool) 中缓存的 Poll
pub(crate) struct ServerTimer {
    handle: JoinHandle<()>,
}

impl ServerTimer {
    pub(crate) fn start(shared: Arc<ServerShared>) -> io::Result<Self> {
        let handle = thread::Builder::new()
            .name("http-timer".to_string())
            .spawn(move || run(shared))?;
        Ok(Self { handle })
    }

    pub(crate) fn stop(self) {
        self.handle.thread().unpark();
        if self.handle.join().is_err() {
            error!("计时线程异常退出");
        }
    }
}

fn run(shared: Arc<ServerShared>) {
    let tick = shared.config().timer_interval();
    let sweep_every = shared.config().selector_cache_timeout();
    let mut last_sweep = Instant::now();
    debug!("计时线程已启动，间隔{:?}", tick);
    loop {
        thread::park_timeout(tick);
        if shared.is_finished() {
            break;
        }
        let now = Instant::now();
        let expired = shared.table().reap(now);
        for conn in expired {
            debug!("[ID{}]空闲超时，关闭连接", conn.id());
            conn.close(shared.registry());
        }
        if now.duration_since(last_sweep) >= sweep_every {
            shared.selectors().sweep();
            last_sweep = now;
        }
    }
    info!("计时线程已退出");
}
