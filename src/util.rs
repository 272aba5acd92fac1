// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::warn;

use crate::param::reason_phrase;

/// 服务器自行生成的错误页面（400/404/500/505 等）
pub struct HtmlBuilder {
    title: String,
    css: String,
    body: String,
}

impl HtmlBuilder {
    pub fn from_status_code(code: u16, note: Option<&str>) -> Self {
        let title = format!("{}", code);
        let css = r"
            body {
                width: 35em;
                margin: 0 auto;
                font-family: Tahoma, Verdana, Arial, sans-serif;
            }
            "
        .to_string();
        let description = match note {
            Some(n) => n,
            None => reason_phrase(code),
        };
        let body = format!(
            r"
            <h1>{} {}</h1>
            <p>{}</p>
            ",
            code,
            reason_phrase(code),
            escape_html(description)
        );
        Self { title, css, body }
    }

    pub fn build(&self) -> String {
        format!(
            r##"<!DOCTYPE html>
            <html>
                <head>
                    <meta charset="utf-8">
                    <title>{}</title>
                    <style>{}</style>
                </head>
                <body>
                {}
                </body>
            </html>"##,
            self.title, self.css, self.body
        )
    }
}

/// 错误说明中可能回显请求内容，输出前转义
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// 获取互斥锁；锁被污染时恢复并继续
pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("{}的锁被污染，恢复并继续", what);
            poisoned.into_inner()
        }
    }
}

pub(crate) fn read_lock<'a, T>(lock: &'a RwLock<T>, what: &str) -> RwLockReadGuard<'a, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("{}的读锁被污染，恢复并继续", what);
            poisoned.into_inner()
        }
    }
}

pub(crate) fn write_lock<'a, T>(lock: &'a RwLock<T>, what: &str) -> RwLockWriteGuard<'a, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("{}的写锁被污染，恢复并继续", what);
            poisoned.into_inner()
        }
    }
}
