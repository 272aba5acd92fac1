// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! 请求/响应体分帧的性质测试

use std::io::{BufRead, Cursor, Read};

use embedded_httpd::body::{BodyReader, BodyWriter};
use proptest::prelude::*;

fn read_all<R: BufRead>(reader: &mut BodyReader, src: &mut R, step: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; step];
    loop {
        let n = reader.read(src, &mut buf).unwrap();
        if n == 0 {
            return out;
        }
        out.extend_from_slice(&buf[..n]);
    }
}

fn encode_chunked(data: &[u8], chunk_size: usize, write_step: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut writer = BodyWriter::chunked(chunk_size);
    for piece in data.chunks(write_step) {
        writer.write(&mut out, piece).unwrap();
    }
    writer.finish(&mut out).unwrap();
    out
}

proptest! {
    #[test]
    fn fixed_writer_emits_exactly_declared_length(
        data in proptest::collection::vec(any::<u8>(), 0..2048),
        step in 1usize..256,
    ) {
        let mut out = Vec::new();
        let mut writer = BodyWriter::fixed(data.len() as u64);
        for piece in data.chunks(step) {
            writer.write(&mut out, piece).unwrap();
        }
        writer.finish(&mut out).unwrap();
        prop_assert_eq!(out, data);
    }

    #[test]
    fn fixed_writer_rejects_overrun(
        declared in 0u64..64,
        extra in 1usize..64,
    ) {
        let mut out = Vec::new();
        let mut writer = BodyWriter::fixed(declared);
        let payload = vec![b'x'; declared as usize + extra];
        prop_assert!(writer.write(&mut out, &payload).is_err());
        prop_assert!(out.is_empty());
    }

    #[test]
    fn chunked_body_is_reconstructible(
        data in proptest::collection::vec(any::<u8>(), 0..4096),
        chunk_size in 1usize..512,
        write_step in 1usize..300,
        read_step in 1usize..300,
    ) {
        let encoded = encode_chunked(&data, chunk_size, write_step);
        prop_assert!(encoded.ends_with(b"0\r\n\r\n"));

        let mut src = Cursor::new(encoded.clone());
        let mut reader = BodyReader::chunked();
        let decoded = read_all(&mut reader, &mut src, read_step);
        prop_assert!(reader.is_finished());
        prop_assert_eq!(&decoded, &data);
        prop_assert_eq!(src.position() as usize, encoded.len());
    }

    #[test]
    fn chunked_reencoding_is_stable(
        data in proptest::collection::vec(any::<u8>(), 0..2048),
        chunk_size in 1usize..256,
    ) {
        let first = encode_chunked(&data, chunk_size, data.len().max(1));
        let mut reader = BodyReader::chunked();
        let decoded = read_all(&mut reader, &mut Cursor::new(first.clone()), 97);
        let second = encode_chunked(&decoded, chunk_size, decoded.len().max(1));
        prop_assert_eq!(first, second);
    }

    #[test]
    fn fixed_reader_leaves_pipelined_bytes(
        body in proptest::collection::vec(any::<u8>(), 0..1024),
        next in proptest::collection::vec(any::<u8>(), 0..256),
        read_step in 1usize..128,
    ) {
        let mut stream = body.clone();
        stream.extend_from_slice(&next);
        let mut src = Cursor::new(stream);
        let mut reader = BodyReader::fixed(body.len() as u64);

        let decoded = read_all(&mut reader, &mut src, read_step);
        prop_assert_eq!(&decoded, &body);
        prop_assert!(reader.is_finished());

        let mut rest = Vec::new();
        src.read_to_end(&mut rest).unwrap();
        prop_assert_eq!(rest, next);
    }
}
