// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 交换执行器
//!
//! 调度器把每个就绪连接的交换打包成一个任务交给 [`Executor`]。
//! - [`DirectExecutor`]：在调度线程上直接运行，交换期间调度线程不处理其他事件。
//! - [`WorkerPool`]：交给 tokio 运行时的阻塞线程池，线程数取自配置的 `worker_threads`。

use std::{io, time::Duration};

use log::{debug, warn};
use tokio::runtime::{Builder, Runtime};

use crate::config::ServerConfig;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait Executor: Send + Sync {
    fn execute(&self, task: Task);
}

/// 在调用线程上立即执行
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectExecutor;

impl Executor for DirectExecutor {
    fn execute(&self, task: Task) {
        task()
    }
}

/// 基于 tokio 阻塞线程池的执行器
pub struct WorkerPool {
    runtime: Option<Runtime>,
    threads: usize,
}

impl WorkerPool {
    pub fn new(threads: usize) -> io::Result<Self> {
        let threads = threads.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(threads)
            .thread_name("http-worker")
            .build()?;
        debug!("工作线程池已创建，最多{}个线程", threads);
        Ok(Self {
            runtime: Some(runtime),
            threads,
        })
    }

    pub fn from_config(config: &ServerConfig) -> io::Result<Self> {
        Self::new(config.worker_threads())
    }

    pub fn threads(&self) -> usize {
        self.threads
    }
}

impl Executor for WorkerPool {
    fn execute(&self, task: Task) {
        match &self.runtime {
            Some(runtime) => {
                runtime.spawn_blocking(task);
            }
            None => warn!("工作线程池已关闭，任务被丢弃"),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(Duration::from_secs(1));
        }
    }
}
