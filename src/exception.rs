// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了服务器在连接管理与请求处理生命周期中可能出现的各类异常情况。
//!
//! - **协议错误**：请求行、标头、帧长度等解析失败，通过 [`Exception::status_code`] 映射为 400/505。
//! - **使用错误**：处理器违反了响应状态机的约束（重复发送响应头、先写正文等）。
//! - **生命周期错误**：上下文注册冲突、服务器未绑定或重复启动、配置非法等。
//!
//! `Exception` 与 `std::io::Error` 可以互相转换，处理器内部可以直接用 `?` 传播。

use std::{error::Error, fmt, io};

/// 服务器处理请求过程中发生的异常类型。
#[derive(Debug)]
pub enum Exception {
    /// 请求行缺少字段或格式非法。对应 `400 Bad Request`。
    MalformedRequestLine(String),
    /// 标头行缺少冒号、名称非法或折叠行出现在首行。对应 `400 Bad Request`。
    MalformedHeader(String),
    /// 请求标头数量超过配置上限。
    TooManyHeaders(usize),
    /// 请求行或标头行超过长度上限。
    LineTooLong,
    /// `Content-Length` 无法解析或多个值互相矛盾。
    InvalidContentLength(String),
    /// 客户端使用了服务器不支持的 HTTP 协议版本。对应 `505 HTTP Version Not Supported`。
    UnsupportedHttpVersion(String),
    /// 标头名称包含非法字符
    InvalidHeaderName(String),
    /// 标头值包含未被续行空白跟随的 CR 或 LF
    InvalidHeaderValue(String),
    /// 标头集合已冻结（请求标头，或已发送的响应标头）
    HeadersReadOnly,
    /// 同一个交换中第二次发送响应头
    HeadersAlreadySent,
    /// 在发送响应头之前试图获取响应体
    HeadersNotSent,
    /// 状态码不在 100..=999 范围内
    InvalidStatusCode(u16),
    /// 上下文路径为空或不以 `/` 开头
    InvalidContextPath(String),
    /// 已存在相同路径的上下文
    ContextExists(String),
    /// 没有找到指定的上下文
    ContextNotFound(String),
    /// 启动前未调用 bind
    ServerNotBound,
    /// 重复绑定监听地址
    AlreadyBound,
    /// 服务器已经启动（或已经停止），不能再次启动或修改执行器
    ServerAlreadyStarted,
    /// 配置文件无法解析
    InvalidConfig(String),
    /// 证书、私钥或 TLS 会话初始化失败
    Tls(String),
    /// 处理器或过滤器返回的错误
    Handler(io::Error),
    /// 底层 I/O 错误，包括超时与连接被重置
    Io(io::Error),
}

use Exception::*;

impl Exception {
    /// 协议错误对应的响应状态码；其余错误不向客户端发送响应，返回 `None`。
    pub fn status_code(&self) -> Option<u16> {
        match self {
            MalformedRequestLine(_) | MalformedHeader(_) | TooManyHeaders(_) | LineTooLong
            | InvalidContentLength(_) => Some(400),
            UnsupportedHttpVersion(_) => Some(505),
            _ => None,
        }
    }

    fn io_kind(&self) -> io::ErrorKind {
        match self {
            Io(e) | Handler(e) => e.kind(),
            MalformedRequestLine(_) | MalformedHeader(_) | TooManyHeaders(_) | LineTooLong
            | InvalidContentLength(_) | UnsupportedHttpVersion(_) | Tls(_) => {
                io::ErrorKind::InvalidData
            }
            _ => io::ErrorKind::InvalidInput,
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedRequestLine(line) => write!(f, "Malformed request line: {:?}", line),
            MalformedHeader(line) => write!(f, "Malformed header line: {:?}", line),
            TooManyHeaders(max) => write!(f, "Too many request headers (limit {})", max),
            LineTooLong => write!(f, "Request line or header line too long"),
            InvalidContentLength(value) => write!(f, "Invalid Content-Length: {:?}", value),
            UnsupportedHttpVersion(v) => write!(f, "Unsupported HTTP version: {}", v),
            InvalidHeaderName(name) => write!(f, "Illegal header name: {:?}", name),
            InvalidHeaderValue(value) => write!(f, "Illegal header value: {:?}", value),
            HeadersReadOnly => write!(f, "Headers are read-only"),
            HeadersAlreadySent => write!(f, "Response headers already sent"),
            HeadersNotSent => write!(f, "Response headers not sent yet"),
            InvalidStatusCode(code) => write!(f, "Invalid status code: {}", code),
            InvalidContextPath(path) => write!(f, "Illegal context path: {:?}", path),
            ContextExists(path) => write!(f, "Context already exists: {}", path),
            ContextNotFound(path) => write!(f, "Context not found: {}", path),
            ServerNotBound => write!(f, "Server is not bound"),
            AlreadyBound => write!(f, "Server is already bound"),
            ServerAlreadyStarted => write!(f, "Server already started"),
            InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            Tls(msg) => write!(f, "TLS error: {}", msg),
            Handler(e) => write!(f, "Handler failed: {}", e),
            Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl Error for Exception {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Io(e) | Handler(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Exception {
    fn from(e: io::Error) -> Self {
        Io(e)
    }
}

impl From<Exception> for io::Error {
    fn from(e: Exception) -> Self {
        match e {
            Io(inner) => inner,
            other => io::Error::new(other.io_kind(), other),
        }
    }
}
