// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求头解析模块
//!
//! 该模块负责把连接上的字节流解析为强类型的 [`RequestHead`]，它涵盖了：
//! 1. 请求行（Request-Line）的解析（方法、请求目标、版本）。
//! 2. 标头的解析，包括续行折叠与数量、长度上限。
//! 3. 连接保持（keep-alive）与 `Expect: 100-continue` 的判定。
//!
//! 请求体不在这里读取，由 [`crate::body::BodyReader`] 按帧从同一个缓冲中继续读取。

use std::io::{BufRead, Cursor};

use log::debug;

use crate::{
    body::read_line,
    exception::Exception,
    headers::Headers,
    param::{HttpRequestMethod, HttpVersion, MAX_LINE_LENGTH},
};

/// 一个 HTTP 请求的元数据：请求行与标头。标头在解析完成后被冻结。
#[derive(Debug, Clone)]
pub struct RequestHead {
    /// HTTP 请求方法
    method: HttpRequestMethod,
    /// 原始请求目标（包含查询字符串）
    target: String,
    /// HTTP 协议版本
    version: HttpVersion,
    headers: Headers,
}

impl RequestHead {
    /// 从缓冲输入中读取一个请求头。
    ///
    /// # 逻辑步骤
    /// 1. 跳过请求行之前的空行。
    /// 2. 解析请求行：提取方法、请求目标和协议版本。
    /// 3. 逐行解析标头直到空行，以空白开头的行并入上一个标头的值。
    ///
    /// # 返回
    /// 连接在任何字节到达之前被对端关闭时返回 `Ok(None)`。
    pub fn read_from<R: BufRead + ?Sized>(
        src: &mut R,
        id: usize,
        max_headers: usize,
    ) -> Result<Option<Self>, Exception> {
        // 1. 跳过前导空行
        let request_line = loop {
            match read_line(src, MAX_LINE_LENGTH)? {
                None => return Ok(None),
                Some(line) if line.is_empty() => continue,
                Some(line) => break latin1(&line),
            }
        };

        // 2. 请求行
        let (method, target, version) = parse_request_line(&request_line)?;

        // 3. 标头
        let mut headers = Headers::new();
        let mut last_name: Option<String> = None;
        let mut count = 0usize;
        loop {
            let line = read_line(src, MAX_LINE_LENGTH)?.ok_or_else(|| {
                Exception::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "标头未结束时连接被关闭",
                ))
            })?;
            if line.is_empty() {
                break;
            }
            let text = latin1(&line);
            if text.starts_with(' ') || text.starts_with('\t') {
                match &last_name {
                    Some(name) => headers.fold_into_last(name, text.trim())?,
                    None => return Err(Exception::MalformedHeader(text)),
                }
                continue;
            }
            count += 1;
            if count > max_headers {
                return Err(Exception::TooManyHeaders(max_headers));
            }
            let (name, value) = match text.split_once(':') {
                Some(pair) => pair,
                None => return Err(Exception::MalformedHeader(text)),
            };
            if headers.add(name, value.trim()).is_err() {
                return Err(Exception::MalformedHeader(text));
            }
            last_name = Some(name.to_string());
        }
        headers.freeze();

        debug!("[ID{}]请求：{} {} {}", id, method, target, version);
        Ok(Some(Self {
            method,
            target,
            version,
            headers,
        }))
    }

    /// 从完整的字节缓冲区构建请求头，缓冲区中不含请求时返回 `MalformedRequestLine`。
    pub fn try_from(buffer: &[u8], id: usize) -> Result<Self, Exception> {
        let mut cursor = Cursor::new(buffer);
        Self::read_from(&mut cursor, id, usize::MAX)?
            .ok_or_else(|| Exception::MalformedRequestLine(String::new()))
    }
}

impl RequestHead {
    pub fn method(&self) -> &HttpRequestMethod {
        &self.method
    }

    /// 原始请求目标
    pub fn uri(&self) -> &str {
        &self.target
    }

    /// 用于匹配上下文的路径：绝对形式只保留路径部分，不含查询字符串与片段
    pub fn path(&self) -> &str {
        let target = self.target.as_str();
        let origin = match strip_scheme(target) {
            Some(rest) => match rest.find('/') {
                Some(i) => &rest[i..],
                None => "/",
            },
            None => target,
        };
        match origin.find(|c: char| c == '?' || c == '#') {
            Some(i) => &origin[..i],
            None => origin,
        }
    }

    pub fn query(&self) -> Option<&str> {
        let start = self.target.find('?')? + 1;
        let rest = &self.target[start..];
        Some(match rest.find('#') {
            Some(i) => &rest[..i],
            None => rest,
        })
    }

    pub fn version(&self) -> HttpVersion {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// 响应之后是否必须关闭连接：`Connection: close`，或 HTTP/1.0 未请求 keep-alive
    pub fn wants_close(&self) -> bool {
        let has_token = |token: &str| self.headers.has_token("Connection", token);
        if has_token("close") {
            return true;
        }
        match self.version {
            HttpVersion::V1_0 => !has_token("keep-alive"),
            HttpVersion::V1_1 => false,
        }
    }

    /// HTTP/1.1 请求携带 `Expect: 100-continue`
    pub fn expects_continue(&self) -> bool {
        self.version == HttpVersion::V1_1
            && self
                .headers
                .get_first("Expect")
                .map(|v| v.trim().eq_ignore_ascii_case("100-continue"))
                .unwrap_or(false)
    }
}

// 标头按 ISO-8859-1 解码，任何字节都能保留
fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn strip_scheme(target: &str) -> Option<&str> {
    let lower = target.chars().take(8).collect::<String>().to_ascii_lowercase();
    if lower.starts_with("http://") {
        Some(&target[7..])
    } else if lower.starts_with("https://") {
        Some(&target[8..])
    } else {
        None
    }
}

fn parse_request_line(line: &str) -> Result<(HttpRequestMethod, String, HttpVersion), Exception> {
    let mut parts = line.split_ascii_whitespace();
    let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(v), None) => (m, t, v),
        _ => return Err(Exception::MalformedRequestLine(line.to_string())),
    };
    let version = match version.to_ascii_uppercase().as_str() {
        "HTTP/1.1" => HttpVersion::V1_1,
        "HTTP/1.0" => HttpVersion::V1_0,
        other if other.starts_with("HTTP/") => {
            return Err(Exception::UnsupportedHttpVersion(version.to_string()))
        }
        _ => return Err(Exception::MalformedRequestLine(line.to_string())),
    };
    Ok((HttpRequestMethod::from_token(method), target.to_string(), version))
}
