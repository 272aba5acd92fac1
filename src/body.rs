// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 消息体分帧
//!
//! 请求体读取器与响应体写入器都是与 I/O 无关的状态机：读取器驱动任意 `BufRead`，
//! 写入器驱动任意 `Write`。读取器从不消费属于下一条消息的字节。

use std::io::{self, BufRead, Write};

use crate::{exception::Exception, headers::Headers, param::MAX_LINE_LENGTH};

/// 调用 `send_response_headers` 时声明的响应体长度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseLength {
    /// 恰好 n 个字节，使用 `Content-Length`
    Fixed(u64),
    /// 长度未知：HTTP/1.1 使用分块编码，HTTP/1.0 写完后关闭连接
    Unknown,
    /// 没有响应体
    NoBody,
}

/// 读取一行（不含行尾的 CRLF 或 LF）。
///
/// 在读到任何字节之前遇到 EOF 返回 `Ok(None)`；行内遇到 EOF 返回 `UnexpectedEof`。
pub(crate) fn read_line<R: BufRead + ?Sized>(
    src: &mut R,
    limit: usize,
) -> Result<Option<Vec<u8>>, Exception> {
    let mut line = Vec::new();
    loop {
        let available = src.fill_buf()?;
        if available.is_empty() {
            if line.is_empty() {
                return Ok(None);
            }
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "行未结束时连接被关闭").into());
        }
        let (done, used) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => {
                line.extend_from_slice(&available[..i]);
                (true, i + 1)
            }
            None => {
                line.extend_from_slice(available);
                (false, available.len())
            }
        };
        src.consume(used);
        if line.len() > limit {
            return Err(Exception::LineTooLong);
        }
        if done {
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            return Ok(Some(line));
        }
    }
}

fn invalid_data(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

fn premature_eof() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "请求体未读完时连接被关闭")
}

/// 分块解码器的当前位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Size,
    Data(u64),
    DataEnd,
    Trailer,
    Done,
}

/// 请求体读取器
#[derive(Debug)]
pub enum BodyReader {
    Empty,
    Fixed { remaining: u64 },
    Chunked(ChunkState),
}

impl BodyReader {
    /// 根据请求标头选择分帧方式：`Transfer-Encoding: chunked` 优先于 `Content-Length`，
    /// 两者都没有时请求没有正文。
    pub fn for_request(headers: &Headers) -> Result<Self, Exception> {
        let chunked = headers
            .get_all("Transfer-Encoding")
            .iter()
            .flat_map(|v| v.split(','))
            .last()
            .map(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
            .unwrap_or(false);
        if chunked {
            return Ok(Self::chunked());
        }

        let values = headers.get_all("Content-Length");
        let mut length: Option<u64> = None;
        for value in values {
            let parsed = value
                .trim()
                .parse::<u64>()
                .map_err(|_| Exception::InvalidContentLength(value.clone()))?;
            match length {
                Some(previous) if previous != parsed => {
                    return Err(Exception::InvalidContentLength(value.clone()))
                }
                _ => length = Some(parsed),
            }
        }
        Ok(match length {
            Some(n) => Self::fixed(n),
            None => Self::Empty,
        })
    }

    pub fn fixed(length: u64) -> Self {
        if length == 0 {
            Self::Empty
        } else {
            Self::Fixed { remaining: length }
        }
    }

    pub fn chunked() -> Self {
        Self::Chunked(ChunkState::Size)
    }

    /// 正文是否已经完整读完
    pub fn is_finished(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Fixed { remaining } => *remaining == 0,
            Self::Chunked(state) => *state == ChunkState::Done,
        }
    }

    pub fn read<R: BufRead + ?Sized>(&mut self, src: &mut R, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Empty => Ok(0),
            Self::Fixed { remaining } => {
                if *remaining == 0 || buf.is_empty() {
                    return Ok(0);
                }
                let available = src.fill_buf()?;
                if available.is_empty() {
                    return Err(premature_eof());
                }
                let n = available.len().min(buf.len()).min(*remaining as usize);
                buf[..n].copy_from_slice(&available[..n]);
                src.consume(n);
                *remaining -= n as u64;
                Ok(n)
            }
            Self::Chunked(state) => read_chunked(state, src, buf),
        }
    }

    /// 丢弃剩余正文，最多丢弃 `limit` 字节。返回正文是否已经完整读完。
    pub fn drain<R: BufRead + ?Sized>(&mut self, src: &mut R, limit: u64) -> io::Result<bool> {
        let mut scratch = [0u8; 4096];
        let mut drained = 0u64;
        while !self.is_finished() && drained < limit {
            let want = (limit - drained).min(scratch.len() as u64) as usize;
            let n = self.read(src, &mut scratch[..want])?;
            if n == 0 {
                break;
            }
            drained += n as u64;
        }
        Ok(self.is_finished())
    }
}

fn read_chunked<R: BufRead + ?Sized>(
    state: &mut ChunkState,
    src: &mut R,
    buf: &mut [u8],
) -> io::Result<usize> {
    loop {
        match *state {
            ChunkState::Done => return Ok(0),
            ChunkState::Size => {
                let line = read_line(src, MAX_LINE_LENGTH)?.ok_or_else(premature_eof)?;
                let text = String::from_utf8_lossy(&line);
                let size_text = text.split(';').next().unwrap_or("").trim();
                let size = u64::from_str_radix(size_text, 16)
                    .map_err(|_| invalid_data("非法的分块长度"))?;
                *state = if size == 0 {
                    ChunkState::Trailer
                } else {
                    ChunkState::Data(size)
                };
            }
            ChunkState::Data(remaining) => {
                if buf.is_empty() {
                    return Ok(0);
                }
                let available = src.fill_buf()?;
                if available.is_empty() {
                    return Err(premature_eof());
                }
                let n = available.len().min(buf.len()).min(remaining as usize);
                buf[..n].copy_from_slice(&available[..n]);
                src.consume(n);
                let left = remaining - n as u64;
                *state = if left == 0 {
                    ChunkState::DataEnd
                } else {
                    ChunkState::Data(left)
                };
                return Ok(n);
            }
            ChunkState::DataEnd => {
                let line = read_line(src, MAX_LINE_LENGTH)?.ok_or_else(premature_eof)?;
                if !line.is_empty() {
                    return Err(invalid_data("分块数据之后缺少CRLF"));
                }
                *state = ChunkState::Size;
            }
            ChunkState::Trailer => {
                let line = read_line(src, MAX_LINE_LENGTH)?.ok_or_else(premature_eof)?;
                if line.is_empty() {
                    *state = ChunkState::Done;
                }
            }
        }
    }
}

/// 响应体写入器
#[derive(Debug)]
pub enum BodyWriter {
    Fixed { remaining: u64 },
    Chunked { buffer: Vec<u8>, chunk_size: usize },
    /// HTTP/1.0 且长度未知：原样写出，以关闭连接作为结束
    Undelimited,
    /// HEAD 请求：接受写入但不发送
    Discard,
    /// 没有响应体，或已经结束
    Closed,
}

impl BodyWriter {
    pub fn fixed(length: u64) -> Self {
        Self::Fixed { remaining: length }
    }

    pub fn chunked(chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self::Chunked {
            buffer: Vec::with_capacity(chunk_size),
            chunk_size,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    pub fn write<W: Write + ?Sized>(&mut self, dst: &mut W, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Fixed { remaining } => {
                if buf.len() as u64 > *remaining {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!(
                            "写入{}字节将超过声明的响应长度（剩余{}字节）",
                            buf.len(),
                            remaining
                        ),
                    ));
                }
                dst.write_all(buf)?;
                *remaining -= buf.len() as u64;
                Ok(buf.len())
            }
            Self::Chunked { buffer, chunk_size } => {
                let mut written = 0;
                while written < buf.len() {
                    let room = *chunk_size - buffer.len();
                    let take = room.min(buf.len() - written);
                    buffer.extend_from_slice(&buf[written..written + take]);
                    written += take;
                    if buffer.len() == *chunk_size {
                        emit_chunk(dst, buffer)?;
                    }
                }
                Ok(buf.len())
            }
            Self::Undelimited => {
                dst.write_all(buf)?;
                Ok(buf.len())
            }
            Self::Discard => Ok(buf.len()),
            Self::Closed => Err(io::Error::new(
                io::ErrorKind::Other,
                "响应体已经关闭",
            )),
        }
    }

    pub fn flush<W: Write + ?Sized>(&mut self, dst: &mut W) -> io::Result<()> {
        if let Self::Chunked { buffer, .. } = self {
            if !buffer.is_empty() {
                emit_chunk(dst, buffer)?;
            }
        }
        dst.flush()
    }

    /// 结束响应体。定长响应少写了字节时返回错误，调用方必须关闭连接。
    pub fn finish<W: Write + ?Sized>(&mut self, dst: &mut W) -> io::Result<()> {
        let previous = std::mem::replace(self, Self::Closed);
        match previous {
            Self::Fixed { remaining } if remaining > 0 => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("响应体不足，尚缺{}字节", remaining),
            )),
            Self::Chunked { mut buffer, .. } => {
                if !buffer.is_empty() {
                    emit_chunk(dst, &mut buffer)?;
                }
                dst.write_all(b"0\r\n\r\n")?;
                dst.flush()
            }
            Self::Fixed { .. } | Self::Undelimited => dst.flush(),
            Self::Discard | Self::Closed => Ok(()),
        }
    }
}

fn emit_chunk<W: Write + ?Sized>(dst: &mut W, buffer: &mut Vec<u8>) -> io::Result<()> {
    let mut frame = Vec::with_capacity(buffer.len() + 12);
    frame.extend_from_slice(format!("{:x}\r\n", buffer.len()).as_bytes());
    frame.extend_from_slice(buffer);
    frame.extend_from_slice(b"\r\n");
    dst.write_all(&frame)?;
    buffer.clear();
    Ok(())
}
