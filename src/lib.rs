// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

pub mod body;
pub mod config;
pub mod context;
pub mod exception;
pub mod exchange;
pub mod executor;
pub mod filter;
pub mod headers;
pub mod param;
pub mod request;
pub mod response;
pub mod selector;
pub mod server;
pub mod stream;
pub mod tls;
pub mod util;

mod connection;
mod dispatcher;
mod table;
mod timer;

pub use body::ResponseLength;
pub use config::ServerConfig;
pub use context::HttpContext;
pub use exception::Exception;
pub use exchange::Exchange;
pub use executor::{DirectExecutor, Executor, WorkerPool};
pub use filter::{
    handler_fn, Authentication, Authenticator, BasicAuthenticator, Chain, Filter, HttpHandler, Principal,
};
pub use headers::Headers;
pub use param::{HttpRequestMethod, HttpVersion};
pub use request::RequestHead;
pub use server::{HttpServer, ServerStats};
pub use tls::TlsConfigurator;
pub use util::HtmlBuilder;
