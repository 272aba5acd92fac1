// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 响应序列化
//!
//! - [`encode_head`]：把状态码与响应标头编码为状态行 + 标头块，交换对象发送响应头时使用。
//! - [`Response`]：服务器在调用处理器之前自行生成的完整响应（400/404/500/505），
//!   正文由 [`HtmlBuilder`] 生成。

use bytes::Bytes;
use chrono::prelude::*;

use crate::{
    param::{reason_phrase, CRLF, SERVER_NAME},
    util::HtmlBuilder,
};

use crate::headers::Headers;

/// 按 IMF-fixdate 格式化时间，例如 `Sun, 06 Nov 1994 08:49:37 GMT`
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// 编码状态行与标头块。状态行总是使用 HTTP/1.1。
pub fn encode_head(code: u16, headers: &Headers) -> Vec<u8> {
    let mut head = String::with_capacity(256);
    head.push_str(&format!("HTTP/1.1 {} {}{}", code, reason_phrase(code), CRLF));
    for (name, values) in headers.iter() {
        for value in values {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str(CRLF);
        }
    }
    head.push_str(CRLF);
    head.into_bytes()
}

/// 服务器直接生成的响应
#[derive(Debug, Clone)]
pub struct Response {
    status_code: u16,
    information: String,
    date: DateTime<Utc>,
    close: bool,
    keep_alive: Option<u64>,
    content: Bytes,
}

impl Response {
    pub fn from_status_code(code: u16, note: &str) -> Self {
        let html = HtmlBuilder::from_status_code(code, Some(note)).build();
        Self {
            status_code: code,
            information: reason_phrase(code).to_string(),
            date: Utc::now(),
            close: false,
            keep_alive: None,
            content: Bytes::from(html),
        }
    }

    pub fn response_400(note: &str) -> Self {
        Self::from_status_code(400, note)
    }

    pub fn response_404(note: &str) -> Self {
        Self::from_status_code(404, note)
    }

    pub fn response_500(note: &str) -> Self {
        Self::from_status_code(500, note)
    }

    /// 发送后关闭连接
    pub fn set_close(&mut self, close: bool) -> &mut Self {
        self.close = close;
        self
    }

    /// HTTP/1.0 客户端请求了 keep-alive：不关闭时发送 `Connection: keep-alive`
    /// 与 `Keep-Alive: timeout=<秒>`
    pub fn set_keep_alive(&mut self, timeout_secs: Option<u64>) -> &mut Self {
        self.keep_alive = timeout_secs;
        self
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn information(&self) -> &str {
        &self.information
    }

    pub fn is_close(&self) -> bool {
        self.close
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let mut head = String::with_capacity(256);
        head.push_str(&format!(
            "HTTP/1.1 {} {}{}",
            self.status_code, self.information, CRLF
        ));
        head.push_str(&format!("Date: {}{}", format_date(&self.date), CRLF));
        head.push_str(&format!("Server: {}{}", SERVER_NAME, CRLF));
        head.push_str(&format!("Content-Type: text/html;charset=utf-8{}", CRLF));
        head.push_str(&format!("Content-Length: {}{}", self.content.len(), CRLF));
        if self.close {
            head.push_str(&format!("Connection: close{}", CRLF));
        } else if let Some(timeout) = self.keep_alive {
            head.push_str(&format!("Connection: keep-alive{}", CRLF));
            head.push_str(&format!("Keep-Alive: timeout={}{}", timeout, CRLF));
        }
        head.push_str(CRLF);

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.content);
        bytes
    }
}
