//! Primitive encode/decode for the ensemble's fixed binary protocol.
//!
//! Every value on the wire is big-endian. Variable-length fields (buffers,
//! strings, lists) carry an `i32` length prefix; a negative length encodes an
//! absent buffer. Whole packets are framed by an `i32` length prefix as well.

use bytes::Buf;
use bytes::BufMut;
use bytes::Bytes;
use bytes::BytesMut;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

use crate::constants::MAX_FRAME_BYTES;
use crate::errors::Error;
use crate::errors::Result;

/// A record that can be appended to an outbound buffer.
pub trait WriteRecord {
    fn write(
        &self,
        buf: &mut BytesMut,
    );
}

/// A record that can be decoded from an inbound buffer.
pub trait ReadRecord: Sized {
    fn read(buf: &mut Bytes) -> Result<Self>;
}

/// Encode a record into a standalone buffer.
pub fn to_bytes<R: WriteRecord>(record: &R) -> BytesMut {
    let mut buf = BytesMut::new();
    record.write(&mut buf);
    buf
}

fn short_frame(what: &str) -> Error {
    Error::Protocol(format!("frame truncated reading {what}"))
}

pub fn put_bool(
    buf: &mut BytesMut,
    v: bool,
) {
    buf.put_u8(v as u8);
}

pub fn put_i32(
    buf: &mut BytesMut,
    v: i32,
) {
    buf.put_i32(v);
}

pub fn put_i64(
    buf: &mut BytesMut,
    v: i64,
) {
    buf.put_i64(v);
}

pub fn put_buffer(
    buf: &mut BytesMut,
    v: &[u8],
) {
    buf.put_i32(v.len() as i32);
    buf.put_slice(v);
}

pub fn put_string(
    buf: &mut BytesMut,
    v: &str,
) {
    put_buffer(buf, v.as_bytes());
}

pub fn get_bool(buf: &mut Bytes) -> Result<bool> {
    if buf.remaining() < 1 {
        return Err(short_frame("bool"));
    }
    Ok(buf.get_u8() != 0)
}

pub fn get_i32(buf: &mut Bytes) -> Result<i32> {
    if buf.remaining() < 4 {
        return Err(short_frame("i32"));
    }
    Ok(buf.get_i32())
}

pub fn get_i64(buf: &mut Bytes) -> Result<i64> {
    if buf.remaining() < 8 {
        return Err(short_frame("i64"));
    }
    Ok(buf.get_i64())
}

/// A negative length on the wire means "no buffer"; it decodes to empty.
pub fn get_buffer(buf: &mut Bytes) -> Result<Bytes> {
    let len = get_i32(buf)?;
    if len < 0 {
        return Ok(Bytes::new());
    }
    let len = len as usize;
    if buf.remaining() < len {
        return Err(short_frame("buffer body"));
    }
    Ok(buf.split_to(len))
}

pub fn get_string(buf: &mut Bytes) -> Result<String> {
    let raw = get_buffer(buf)?;
    String::from_utf8(raw.to_vec())
        .map_err(|e| Error::Protocol(format!("non-utf8 string on wire: {e}")))
}

pub fn get_string_list(buf: &mut Bytes) -> Result<Vec<String>> {
    let count = get_i32(buf)?;
    if count < 0 {
        return Ok(Vec::new());
    }
    let mut out = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        out.push(get_string(buf)?);
    }
    Ok(out)
}

/// Write one length-prefixed frame and flush it.
pub async fn write_frame<W>(
    writer: &mut W,
    payload: &[u8],
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_i32(payload.len() as i32).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

/// Read one length-prefixed frame. Oversized or negative lengths are treated
/// as a protocol violation so a desynced stream cannot trigger an unbounded
/// allocation.
pub async fn read_frame<R>(reader: &mut R) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let len = reader
        .read_i32()
        .await
        .map_err(|e| Error::Protocol(format!("frame length read failed: {e}")))?;
    if len < 0 || len as usize > MAX_FRAME_BYTES {
        return Err(Error::Protocol(format!("invalid frame length {len}")));
    }
    let mut body = vec![0u8; len as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| Error::Protocol(format!("frame body read failed: {e}")))?;
    Ok(Bytes::from(body))
}
