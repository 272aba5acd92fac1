// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 处理器、过滤器与认证
//!
//! 每个请求依次经过：内部认证过滤器（上下文配置了 [`Authenticator`] 时）、
//! 用户过滤器，最后到达上下文的 [`HttpHandler`]。过滤器通过
//! [`Chain::do_filter`] 把请求交给链上的下一个环节，也可以直接生成响应而不继续。

use std::{fmt, io, sync::Arc};

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::{body::ResponseLength, exchange::Exchange, request::RequestHead};

/// 请求处理器
pub trait HttpHandler: Send + Sync {
    fn handle(&self, exchange: &mut Exchange<'_>) -> io::Result<()>;
}

/// 由闭包构成的处理器，见 [`handler_fn`]
pub struct FnHandler<F> {
    f: F,
}

impl<F> HttpHandler for FnHandler<F>
where
    F: Fn(&mut Exchange<'_>) -> io::Result<()> + Send + Sync,
{
    fn handle(&self, exchange: &mut Exchange<'_>) -> io::Result<()> {
        (self.f)(exchange)
    }
}

/// 把闭包包装成处理器
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&mut Exchange<'_>) -> io::Result<()> + Send + Sync,
{
    FnHandler { f }
}

/// 请求过滤器
pub trait Filter: Send + Sync {
    /// 用于日志的简短描述
    fn description(&self) -> &str;

    fn do_filter(&self, exchange: &mut Exchange<'_>, chain: Chain<'_>) -> io::Result<()>;
}

/// 剩余的过滤器与最终的处理器
pub struct Chain<'a> {
    filters: &'a [Arc<dyn Filter>],
    handler: &'a dyn HttpHandler,
}

impl<'a> Chain<'a> {
    pub fn new(filters: &'a [Arc<dyn Filter>], handler: &'a dyn HttpHandler) -> Self {
        Self { filters, handler }
    }

    /// 调用下一个过滤器；没有剩余过滤器时调用处理器
    pub fn do_filter(self, exchange: &mut Exchange<'_>) -> io::Result<()> {
        match self.filters.split_first() {
            Some((first, rest)) => first.do_filter(
                exchange,
                Chain {
                    filters: rest,
                    handler: self.handler,
                },
            ),
            None => self.handler.handle(exchange),
        }
    }
}

/// 认证通过的用户
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    username: String,
    realm: String,
}

impl Principal {
    pub fn new(username: &str, realm: &str) -> Self {
        Self {
            username: username.to_string(),
            realm: realm.to_string(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.realm, self.username)
    }
}

/// 认证结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    /// 认证通过，请求继续交给后续过滤器与处理器
    Success(Principal),
    /// 认证失败，以该状态码结束请求
    Failure(u16),
    /// 需要客户端重试（通常是 401），可附带 `WWW-Authenticate` 质询
    Retry {
        status: u16,
        challenge: Option<String>,
    },
}

#[cfg_attr(test, mockall::automock)]
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, request: &RequestHead) -> Authentication;
}

/// HTTP Basic 认证（RFC 7617），凭据由调用方提供的闭包校验
pub struct BasicAuthenticator<F> {
    realm: String,
    check: F,
}

impl<F> BasicAuthenticator<F>
where
    F: Fn(&str, &str) -> bool + Send + Sync,
{
    pub fn new(realm: &str, check: F) -> Self {
        Self {
            realm: realm.to_string(),
            check,
        }
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    fn challenge(&self) -> Authentication {
        Authentication::Retry {
            status: 401,
            challenge: Some(format!("Basic realm=\"{}\"", self.realm)),
        }
    }
}

impl<F> Authenticator for BasicAuthenticator<F>
where
    F: Fn(&str, &str) -> bool + Send + Sync,
{
    fn authenticate(&self, request: &RequestHead) -> Authentication {
        let header = match request.headers().get_first("Authorization") {
            Some(h) => h.trim(),
            None => return self.challenge(),
        };
        let (scheme, encoded) = match header.split_once(' ') {
            Some(pair) => pair,
            None => return self.challenge(),
        };
        if !scheme.eq_ignore_ascii_case("Basic") {
            return self.challenge();
        }
        let decoded = match STANDARD.decode(encoded.trim()) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => return self.challenge(),
        };
        let (username, password) = match decoded.split_once(':') {
            Some(pair) => pair,
            None => return self.challenge(),
        };
        if (self.check)(username, password) {
            Authentication::Success(Principal::new(username, &self.realm))
        } else {
            self.challenge()
        }
    }
}

/// 把上下文的认证器接入过滤器链
pub(crate) struct AuthFilter {
    authenticator: Arc<dyn Authenticator>,
}

impl AuthFilter {
    pub(crate) fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self { authenticator }
    }
}

impl Filter for AuthFilter {
    fn description(&self) -> &str {
        "Authentication filter"
    }

    fn do_filter(&self, exchange: &mut Exchange<'_>, chain: Chain<'_>) -> io::Result<()> {
        match self.authenticator.authenticate(exchange.request_head()) {
            Authentication::Success(principal) => {
                exchange.set_principal(principal);
                chain.do_filter(exchange)
            }
            Authentication::Failure(status) => {
                exchange.send_response_headers(status, ResponseLength::NoBody)?;
                Ok(())
            }
            Authentication::Retry { status, challenge } => {
                if let Some(challenge) = challenge {
                    exchange
                        .response_headers()?
                        .set("WWW-Authenticate", &challenge)?;
                }
                exchange.send_response_headers(status, ResponseLength::NoBody)?;
                Ok(())
            }
        }
    }
}
