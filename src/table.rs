// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 连接表
//!
//! 记录服务器当前持有的全部连接。调度线程与计时线程通过同一把互斥锁访问它：
//! - `all`：所有存活连接的令牌，包括正在执行交换的连接；
//! - `accepted`：已接受但尚未开始第一次交换的连接；
//! - `idle`：完成过交换、等待下一个请求的连接。
//!
//! 在 `accepted` 与 `idle` 中的连接已注册到调度器的 Poll 上，正在执行交换的连接
//! 由交换任务持有，表中只留下令牌和一份套接字句柄（`in_flight`），
//! 停止服务器时用它强制关闭仍在进行的交换。

use std::{
    collections::{HashMap, HashSet},
    net::Shutdown,
    time::Instant,
};

use log::debug;
use mio::Token;
use socket2::Socket;

use crate::connection::{Connection, ConnectionState};

#[derive(Debug, Default)]
pub struct ConnectionTable {
    all: HashSet<Token>,
    accepted: HashMap<Token, Connection>,
    idle: HashMap<Token, Connection>,
    in_flight: HashMap<Token, Socket>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_accepted(&mut self, mut conn: Connection) {
        conn.set_state(ConnectionState::Accepted);
        self.all.insert(conn.token());
        self.accepted.insert(conn.token(), conn);
    }

    pub fn add_idle(&mut self, mut conn: Connection, deadline: Instant) {
        conn.set_state(ConnectionState::Idle);
        conn.set_deadline(Some(deadline));
        self.all.insert(conn.token());
        self.in_flight.remove(&conn.token());
        self.idle.insert(conn.token(), conn);
    }

    /// 记录一个即将交给执行器的连接
    pub fn track_in_flight(&mut self, conn: &Connection) {
        let token = conn.token();
        self.all.insert(token);
        if self.in_flight.contains_key(&token) {
            return;
        }
        match conn.shutdown_handle() {
            Ok(handle) => {
                self.in_flight.insert(token, handle);
            }
            Err(e) => debug!("[ID{}]无法复制套接字句柄：{}", conn.id(), e),
        }
    }

    /// 取出一个收到就绪事件的连接。连接已被计时线程回收时返回 `None`。
    pub fn take_ready(&mut self, token: Token) -> Option<Connection> {
        let mut conn = self
            .idle
            .remove(&token)
            .or_else(|| self.accepted.remove(&token))?;
        conn.set_state(ConnectionState::InFlight);
        conn.set_deadline(None);
        Some(conn)
    }

    /// 连接被关闭，删除它的令牌
    pub fn remove(&mut self, token: Token) -> bool {
        self.idle.remove(&token);
        self.accepted.remove(&token);
        self.in_flight.remove(&token);
        self.all.remove(&token)
    }

    /// 取出所有截止时间不晚于 `now` 的空闲连接与已接受连接
    pub fn reap(&mut self, now: Instant) -> Vec<Connection> {
        let expired: Vec<Token> = self
            .idle
            .iter()
            .chain(self.accepted.iter())
            .filter(|(_, conn)| conn.is_expired(now))
            .map(|(token, _)| *token)
            .collect();
        let mut reaped = Vec::with_capacity(expired.len());
        for token in expired {
            if let Some(conn) = self.idle.remove(&token).or_else(|| self.accepted.remove(&token)) {
                self.all.remove(&token);
                reaped.push(conn);
            }
        }
        reaped
    }

    /// 关闭所有仍在执行交换的连接的套接字，返回关闭的数量。
    /// 交换任务随后的读写会失败，连接在它交还时被丢弃。
    pub fn abort_in_flight(&mut self) -> usize {
        let count = self.in_flight.len();
        for (token, handle) in self.in_flight.drain() {
            if let Err(e) = handle.shutdown(Shutdown::Both) {
                debug!("[ID{}]强制关闭连接失败：{}", token.0, e);
            }
            self.all.remove(&token);
        }
        count
    }

    /// 取出所有仍在表中的连接，清空表
    pub fn drain_all(&mut self) -> Vec<Connection> {
        self.all.clear();
        self.idle
            .drain()
            .chain(self.accepted.drain())
            .map(|(_, conn)| conn)
            .collect()
    }

    /// 存活连接数（包括正在执行交换的）
    pub fn len(&self) -> usize {
        self.all.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    pub fn idle_len(&self) -> usize {
        self.idle.len()
    }

    pub fn accepted_len(&self) -> usize {
        self.accepted.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    #[cfg(test)]
    pub fn contains(&self, token: Token) -> bool {
        self.all.contains(&token)
    }
}
