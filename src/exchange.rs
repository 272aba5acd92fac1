// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 请求/响应交换
//!
//! 一次交换对应连接上的一个请求及其响应。交换任务 [`run`] 在执行器上运行：
//! 解析请求头、选择上下文、依次调用过滤器与处理器，最后结束响应体、排空未读的请求体，
//! 并把连接连同结果交还给调度器。
//!
//! 响应遵循两阶段状态：发送响应头之前只能修改响应标头；发送之后只能写响应体。

use std::{
    collections::HashMap,
    io::{self, Read, Write},
    net::SocketAddr,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Instant,
};

use chrono::Utc;
use log::{debug, error, info, warn};

use crate::{
    body::{BodyReader, BodyWriter, ResponseLength},
    config::ServerConfig,
    connection::Connection,
    context::HttpContext,
    exception::Exception,
    filter::{Chain, Principal},
    headers::Headers,
    param::{is_bodyless_status, HttpRequestMethod, HttpVersion, CONTINUE_RESPONSE, SERVER_NAME},
    request::RequestHead,
    response::{encode_head, format_date, Response},
    server::ServerShared,
    stream::{TimedStream, Wire},
};

/// 交换任务交还给调度器的事件
#[derive(Debug)]
pub(crate) enum CompletionEvent {
    /// 交换结束（无论成功与否），`drained` 表示请求体已经完整读完
    WriteFinished { connection: Connection, drained: bool },
}

enum ResponseState {
    Pending,
    Sent(BodyWriter),
}

pub struct Exchange<'c> {
    id: usize,
    head: RequestHead,
    context: Arc<HttpContext>,
    wire: Wire<'c>,
    request_body: BodyReader,
    response_headers: Headers,
    response: ResponseState,
    response_code: Option<u16>,
    close: bool,
    principal: Option<Principal>,
    attributes: HashMap<String, String>,
    remote: SocketAddr,
    local: SocketAddr,
    config: &'c ServerConfig,
}

/// 请求体输入流
pub struct RequestBody<'e, 'c> {
    reader: &'e mut BodyReader,
    wire: &'e mut Wire<'c>,
}

impl Read for RequestBody<'_, '_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(self.wire, buf)
    }
}

/// 响应体输出流
pub struct ResponseBody<'e, 'c> {
    writer: &'e mut BodyWriter,
    wire: &'e mut Wire<'c>,
}

impl ResponseBody<'_, '_> {
    /// 结束响应体：分块响应写出结束块，定长响应检查是否写足了声明的长度
    pub fn finish(self) -> io::Result<()> {
        self.writer.finish(self.wire)
    }
}

impl Write for ResponseBody<'_, '_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(self.wire, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush(self.wire)
    }
}

struct Outcome {
    close: bool,
    drained: bool,
}

impl Outcome {
    fn closed() -> Self {
        Self {
            close: true,
            drained: false,
        }
    }
}

impl<'c> Exchange<'c> {
    #[allow(clippy::too_many_arguments)]
    fn new(
        id: usize,
        head: RequestHead,
        context: Arc<HttpContext>,
        wire: Wire<'c>,
        request_body: BodyReader,
        remote: SocketAddr,
        local: SocketAddr,
        config: &'c ServerConfig,
    ) -> Self {
        let close = head.wants_close();
        Self {
            id,
            head,
            context,
            wire,
            request_body,
            response_headers: Headers::new(),
            response: ResponseState::Pending,
            response_code: None,
            close,
            principal: None,
            attributes: HashMap::new(),
            remote,
            local,
            config,
        }
    }

    pub fn request_method(&self) -> &HttpRequestMethod {
        self.head.method()
    }

    pub fn request_uri(&self) -> &str {
        self.head.uri()
    }

    /// 不含查询字符串的请求路径
    pub fn request_path(&self) -> &str {
        self.head.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.head.query()
    }

    pub fn protocol(&self) -> HttpVersion {
        self.head.version()
    }

    /// `http` 或 `https`
    pub fn scheme(&self) -> &'static str {
        self.wire.scheme()
    }

    pub fn request_head(&self) -> &RequestHead {
        &self.head
    }

    pub fn request_headers(&self) -> &Headers {
        self.head.headers()
    }

    pub fn request_body(&mut self) -> RequestBody<'_, 'c> {
        RequestBody {
            reader: &mut self.request_body,
            wire: &mut self.wire,
        }
    }

    /// 可修改的响应标头，响应头发送之后返回 `HeadersAlreadySent`
    pub fn response_headers(&mut self) -> Result<&mut Headers, Exception> {
        match self.response {
            ResponseState::Pending => Ok(&mut self.response_headers),
            ResponseState::Sent(_) => Err(Exception::HeadersAlreadySent),
        }
    }

    /// 发送状态行与响应标头。每个交换只能调用一次。
    pub fn send_response_headers(&mut self, code: u16, length: ResponseLength) -> Result<(), Exception> {
        if let ResponseState::Sent(_) = self.response {
            return Err(Exception::HeadersAlreadySent);
        }
        if !(100..=999).contains(&code) {
            return Err(Exception::InvalidStatusCode(code));
        }
        let version = self.head.version();
        let headers = &mut self.response_headers;

        if !headers.contains("Date") {
            headers.set("Date", &format_date(&Utc::now()))?;
        }
        if !headers.contains("Server") {
            headers.set("Server", SERVER_NAME)?;
        }

        let writer = if is_bodyless_status(code) {
            if length != ResponseLength::NoBody {
                warn!("[ID{}]状态码{}的响应不能携带响应体，忽略声明的长度", self.id, code);
            }
            headers.remove("Content-Length")?;
            headers.remove("Transfer-Encoding")?;
            BodyWriter::Closed
        } else if self.head.method() == &HttpRequestMethod::Head {
            match length {
                ResponseLength::Fixed(n) => headers.set("Content-Length", &n.to_string())?,
                ResponseLength::NoBody => headers.set("Content-Length", "0")?,
                ResponseLength::Unknown => {}
            }
            BodyWriter::Discard
        } else {
            match length {
                ResponseLength::Fixed(n) => {
                    headers.remove("Transfer-Encoding")?;
                    if !headers.contains("Content-Length") {
                        headers.set("Content-Length", &n.to_string())?;
                    }
                    BodyWriter::fixed(n)
                }
                ResponseLength::NoBody => {
                    headers.remove("Transfer-Encoding")?;
                    headers.set("Content-Length", "0")?;
                    BodyWriter::Closed
                }
                ResponseLength::Unknown if version == HttpVersion::V1_1 => {
                    headers.remove("Content-Length")?;
                    headers.set("Transfer-Encoding", "chunked")?;
                    BodyWriter::chunked(self.config.chunk_size())
                }
                ResponseLength::Unknown => {
                    headers.remove("Content-Length")?;
                    self.close = true;
                    BodyWriter::Undelimited
                }
            }
        };

        if headers.has_token("Connection", "close") {
            self.close = true;
        }
        if self.close {
            headers.set("Connection", "close")?;
        } else if version == HttpVersion::V1_0 {
            headers.set("Connection", "keep-alive")?;
            headers.set(
                "Keep-Alive",
                &format!("timeout={}", self.config.idle_interval().as_secs()),
            )?;
        }

        let head = encode_head(code, headers);
        headers.freeze();
        self.response = ResponseState::Sent(writer);
        self.response_code = Some(code);

        self.wire
            .set_write_deadline(self.config.max_response_time().map(|d| Instant::now() + d));
        self.wire.write_all(&head)?;
        self.wire.flush()?;
        debug!("[ID{}]已发送响应头，状态码{}", self.id, code);
        Ok(())
    }

    /// 响应体输出流。必须先发送响应头。
    pub fn response_body(&mut self) -> Result<ResponseBody<'_, 'c>, Exception> {
        match &mut self.response {
            ResponseState::Pending => Err(Exception::HeadersNotSent),
            ResponseState::Sent(writer) => Ok(ResponseBody {
                writer,
                wire: &mut self.wire,
            }),
        }
    }

    /// 已发送的状态码
    pub fn response_code(&self) -> Option<u16> {
        self.response_code
    }

    pub fn remote_address(&self) -> SocketAddr {
        self.remote
    }

    pub fn local_address(&self) -> SocketAddr {
        self.local
    }

    pub fn http_context(&self) -> &Arc<HttpContext> {
        &self.context
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub(crate) fn set_principal(&mut self, principal: Principal) {
        self.principal = Some(principal);
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|v| v.as_str())
    }

    pub fn set_attribute(&mut self, key: &str, value: &str) {
        self.attributes.insert(key.to_string(), value.to_string());
    }

    /// 提前结束交换。尚未发送响应头时，连接会在交换结束后直接关闭。
    pub fn close(&mut self) -> io::Result<()> {
        match &mut self.response {
            ResponseState::Pending => {
                self.close = true;
                Ok(())
            }
            ResponseState::Sent(writer) => {
                let result = writer.finish(&mut self.wire);
                if result.is_err() {
                    self.close = true;
                }
                result
            }
        }
    }

    /// 处理器返回之后调用：结束响应体并排空未读的请求体
    fn complete(mut self) -> Result<Outcome, Exception> {
        match &mut self.response {
            ResponseState::Pending => {
                warn!("[ID{}]处理器没有发送响应头，关闭连接", self.id);
                return Ok(Outcome::closed());
            }
            ResponseState::Sent(writer) => {
                if let Err(e) = writer.finish(&mut self.wire) {
                    debug!("[ID{}]结束响应体失败：{}", self.id, e);
                    return Ok(Outcome::closed());
                }
            }
        }
        if self.close {
            return Ok(Outcome::closed());
        }
        let drained = self
            .request_body
            .drain(&mut self.wire, self.config.drain_amount())?;
        Ok(Outcome {
            close: false,
            drained,
        })
    }
}

/// 在执行器上运行一次交换，返回交给调度器的完成事件。处理器的 panic 在这里被捕获。
pub(crate) fn run(mut connection: Connection, server: &ServerShared) -> CompletionEvent {
    let id = connection.id();
    let result = panic::catch_unwind(AssertUnwindSafe(|| serve(&mut connection, server)));
    let outcome = match result {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(Exception::Handler(e))) => {
            warn!("[ID{}]处理器返回错误：{}", id, e);
            Outcome::closed()
        }
        Ok(Err(e)) => {
            debug!("[ID{}]交换失败：{}", id, e);
            Outcome::closed()
        }
        Err(_) => {
            error!("[ID{}]处理器发生panic，关闭连接", id);
            Outcome::closed()
        }
    };
    if outcome.close {
        connection.request_close();
    }
    CompletionEvent::WriteFinished {
        connection,
        drained: outcome.drained,
    }
}

fn serve(connection: &mut Connection, server: &ServerShared) -> Result<Outcome, Exception> {
    let config = server.config();
    let id = connection.id();
    let remote = connection.remote_addr();
    let local = connection.local_addr()?;
    let fresh = connection.take_fresh();
    let request_deadline = config.max_request_time().map(|d| Instant::now() + d);

    let lease = server.selectors().take()?;
    let (sock, transport, inbound) = connection.split_io();
    let mut stream = TimedStream::new(sock, lease, config.poll_interval(), server.finished_flag())?;
    stream.set_read_deadline(request_deadline);
    stream.set_write_deadline(request_deadline);
    let mut wire = Wire::new(stream, transport, inbound);

    if fresh {
        wire.handshake()?;
    }

    let head = match RequestHead::read_from(&mut wire, id, config.max_request_headers()) {
        Ok(Some(head)) => head,
        Ok(None) => {
            debug!("[ID{}]对端关闭了连接", id);
            return Ok(Outcome::closed());
        }
        Err(Exception::Io(e)) => return Err(Exception::Io(e)),
        Err(e) => {
            let code = e.status_code().unwrap_or(400);
            info!("[ID{}]无法解析请求，返回{}：{}", id, code, e);
            reject(&mut wire, Response::from_status_code(code, &e.to_string()), true, None)?;
            return Ok(Outcome::closed());
        }
    };

    let request_body = match BodyReader::for_request(head.headers()) {
        Ok(body) => body,
        Err(e) => {
            info!("[ID{}]请求体长度非法，返回400：{}", id, e);
            reject(&mut wire, Response::response_400(&e.to_string()), true, None)?;
            return Ok(Outcome::closed());
        }
    };
    // 拒绝请求时不读取请求体，只有没有请求体时连接才能继续复用
    let close_on_reject = head.wants_close() || !request_body.is_finished();
    let keep_alive_hint =
        (head.version() == HttpVersion::V1_0).then(|| config.idle_interval().as_secs());

    let context = match server.find_context(head.path()) {
        Some(context) => context,
        None => {
            info!("[ID{}]没有与{}匹配的上下文，返回404", id, head.path());
            reject(
                &mut wire,
                Response::response_404("No context found for request"),
                close_on_reject,
                keep_alive_hint,
            )?;
            return Ok(Outcome {
                close: close_on_reject,
                drained: true,
            });
        }
    };
    let handler = match context.handler() {
        Some(handler) => Arc::clone(handler),
        None => {
            info!("[ID{}]上下文{}没有处理器，返回500", id, context.path());
            reject(
                &mut wire,
                Response::response_500("No handler for context"),
                close_on_reject,
                keep_alive_hint,
            )?;
            return Ok(Outcome {
                close: close_on_reject,
                drained: true,
            });
        }
    };

    if head.expects_continue() {
        wire.write_all(CONTINUE_RESPONSE)?;
        wire.flush()?;
    }

    let filters = context.chain_filters();
    let method = head.method().clone();
    let uri = head.uri().to_string();
    let version = head.version();
    let mut exchange = Exchange::new(id, head, context, wire, request_body, remote, local, config);
    Chain::new(&filters, &*handler)
        .do_filter(&mut exchange)
        .map_err(Exception::Handler)?;
    info!(
        "[ID{}]{} {} {} {} -> {}",
        id,
        remote,
        method,
        uri,
        version,
        exchange
            .response_code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    exchange.complete()
}

fn reject(
    wire: &mut Wire<'_>,
    mut response: Response,
    close: bool,
    keep_alive: Option<u64>,
) -> io::Result<()> {
    response.set_close(close).set_keep_alive(keep_alive);
    wire.write_all(&response.as_bytes())?;
    wire.flush()
}
