// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 临时 Poll 缓存
//!
//! 交换任务在阻塞式读写套接字时，需要一个私有的 `mio::Poll` 来等待就绪事件。
//! 每次都新建一个 Poll 需要一次系统调用（epoll_create / kqueue），因此用完的实例
//! 放回池中复用。计时线程定期调用 [`SelectorPool::sweep`]：
//! 两次清扫之间未被借出过的实例会被关闭，所以一个空闲实例最少存活一个周期、最多两个周期。

use std::{
    io,
    ops::{Deref, DerefMut},
    sync::Mutex,
};

use log::debug;
use mio::Poll;

use crate::util::lock;

struct CachedPoll {
    poll: Poll,
    marked: bool,
}

#[derive(Default)]
pub struct SelectorPool {
    free: Mutex<Vec<CachedPoll>>,
}

impl SelectorPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// 借出一个 Poll；池为空时新建
    pub fn take(&self) -> io::Result<PollLease<'_>> {
        let cached = lock(&self.free, "Poll缓存").pop();
        let poll = match cached {
            Some(entry) => entry.poll,
            None => Poll::new()?,
        };
        Ok(PollLease {
            poll: Some(poll),
            pool: self,
        })
    }

    fn give_back(&self, poll: Poll) {
        lock(&self.free, "Poll缓存").push(CachedPoll {
            poll,
            marked: false,
        });
    }

    /// 关闭上一次清扫后一直闲置的实例，并标记其余实例。返回关闭的数量。
    pub fn sweep(&self) -> usize {
        let mut free = lock(&self.free, "Poll缓存");
        let before = free.len();
        free.retain(|entry| !entry.marked);
        for entry in free.iter_mut() {
            entry.marked = true;
        }
        let closed = before - free.len();
        if closed > 0 {
            debug!("关闭了{}个闲置的Poll实例", closed);
        }
        closed
    }

    /// 池中闲置的实例数
    pub fn idle_count(&self) -> usize {
        lock(&self.free, "Poll缓存").len()
    }
}

/// 借出的 Poll，离开作用域时自动归还
pub struct PollLease<'p> {
    poll: Option<Poll>,
    pool: &'p SelectorPool,
}

impl Deref for PollLease<'_> {
    type Target = Poll;

    fn deref(&self) -> &Poll {
        // poll 只在 drop 中被取走
        self.poll.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PollLease<'_> {
    fn deref_mut(&mut self) -> &mut Poll {
        self.poll.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PollLease<'_> {
    fn drop(&mut self) {
        if let Some(poll) = self.poll.take() {
            self.pool.give_back(poll);
        }
    }
}
