// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTPS 支持
//!
//! [`TlsConfigurator`] 持有共享的 `rustls::ServerConfig`。服务器设置了它之后，
//! 每个新接受的连接都会得到一个 [`TlsTransport`]，握手在该连接的第一次交换中完成。

use std::{
    fmt,
    fs::File,
    io::{self, BufReader, Read, Write},
    sync::Arc,
};

use rustls::{ServerConfig, ServerConnection};

use crate::{
    exception::Exception,
    stream::{TimedStream, Transport},
};

#[derive(Clone)]
pub struct TlsConfigurator {
    config: Arc<ServerConfig>,
}

impl TlsConfigurator {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self { config }
    }

    /// 从 PEM 格式的证书链与私钥文件构建
    pub fn from_pem_files(cert_path: &str, key_path: &str) -> Result<Self, Exception> {
        let cert_file = File::open(cert_path)?;
        let mut cert_reader = BufReader::new(cert_file);
        let certs = rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;
        if certs.is_empty() {
            return Err(Exception::Tls(format!("{}中没有证书", cert_path)));
        }

        let key_file = File::open(key_path)?;
        let mut key_reader = BufReader::new(key_file);
        let key = rustls_pemfile::private_key(&mut key_reader)?
            .ok_or_else(|| Exception::Tls(format!("{}中没有私钥", key_path)))?;

        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| Exception::Tls(e.to_string()))?;
        Ok(Self::new(Arc::new(config)))
    }

    pub fn server_config(&self) -> Arc<ServerConfig> {
        Arc::clone(&self.config)
    }

    /// 为新连接创建一个 TLS 会话
    pub(crate) fn transport(&self) -> Result<TlsTransport, Exception> {
        let conn =
            ServerConnection::new(self.server_config()).map_err(|e| Exception::Tls(e.to_string()))?;
        Ok(TlsTransport { conn })
    }
}

impl fmt::Debug for TlsConfigurator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfigurator")
            .field("alpn_protocols", &self.config.alpn_protocols)
            .finish()
    }
}

pub struct TlsTransport {
    conn: ServerConnection,
}

impl Transport for TlsTransport {
    fn scheme(&self) -> &'static str {
        "https"
    }

    fn handshake(&mut self, sock: &mut TimedStream<'_>) -> io::Result<()> {
        while self.conn.is_handshaking() {
            let (read, written) = self.conn.complete_io(sock)?;
            if read == 0 && written == 0 && self.conn.is_handshaking() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "TLS握手期间连接被关闭",
                ));
            }
        }
        Ok(())
    }

    fn read(&mut self, sock: &mut TimedStream<'_>, buf: &mut [u8]) -> io::Result<usize> {
        rustls::Stream::new(&mut self.conn, sock).read(buf)
    }

    fn write(&mut self, sock: &mut TimedStream<'_>, buf: &[u8]) -> io::Result<usize> {
        rustls::Stream::new(&mut self.conn, sock).write(buf)
    }

    fn flush(&mut self, sock: &mut TimedStream<'_>) -> io::Result<()> {
        rustls::Stream::new(&mut self.conn, sock).flush()?;
        while self.conn.wants_write() {
            self.conn.write_tls(sock)?;
        }
        Ok(())
    }

    fn has_buffered_input(&mut self) -> bool {
        match self.conn.process_new_packets() {
            Ok(state) => state.plaintext_bytes_to_read() > 0,
            Err(_) => false,
        }
    }
}
