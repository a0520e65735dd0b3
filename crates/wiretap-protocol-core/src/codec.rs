use bytes::{Buf, BufMut};
use thiserror::Error;
use uuid::Uuid;

/// Maximum characters in a protocol string unless a field says otherwise.
pub const MAX_STRING_LEN: usize = 32767;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("VarInt too big")]
    VarIntTooBig,
    #[error("Not enough data")]
    NotEnoughData,
    #[error("String too long: {0} > {1}")]
    StringTooLong(usize, usize),
    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Read a VarInt from the buffer.
pub fn read_varint<B: Buf>(buf: &mut B) -> CodecResult<i32> {
    let mut result: i32 = 0;
    let mut shift: u32 = 0;
    loop {
        if !buf.has_remaining() {
            return Err(CodecError::NotEnoughData);
        }
        let byte = buf.get_u8();
        result |= ((byte & 0x7F) as i32) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= 32 {
            return Err(CodecError::VarIntTooBig);
        }
    }
}

/// Write a VarInt to the buffer.
pub fn write_varint<B: BufMut>(buf: &mut B, mut value: i32) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value = ((value as u32) >> 7) as i32;
        if value != 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            break;
        }
    }
}

/// Calculate the byte length of a VarInt.
pub fn varint_len(value: i32) -> usize {
    let mut val = value as u32;
    let mut len = 0;
    loop {
        len += 1;
        val >>= 7;
        if val == 0 {
            break;
        }
    }
    len
}

/// Read a protocol string (varint-prefixed UTF-8).
pub fn read_string<B: Buf>(buf: &mut B, max_len: usize) -> CodecResult<String> {
    let len = read_varint(buf)?;
    if len < 0 {
        return Err(CodecError::NotEnoughData);
    }
    let len = len as usize;
    if len > max_len * 4 {
        return Err(CodecError::StringTooLong(len, max_len));
    }
    if buf.remaining() < len {
        return Err(CodecError::NotEnoughData);
    }
    let bytes = buf.copy_to_bytes(len);
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Write a protocol string.
pub fn write_string<B: BufMut>(buf: &mut B, s: &str) {
    write_varint(buf, s.len() as i32);
    buf.put_slice(s.as_bytes());
}

/// Read a UUID (128 bits, big endian).
pub fn read_uuid<B: Buf>(buf: &mut B) -> CodecResult<Uuid> {
    if buf.remaining() < 16 {
        return Err(CodecError::NotEnoughData);
    }
    let mut bytes = [0u8; 16];
    buf.copy_to_slice(&mut bytes);
    Ok(Uuid::from_bytes(bytes))
}

/// Write a UUID.
pub fn write_uuid<B: BufMut>(buf: &mut B, uuid: &Uuid) {
    buf.put_slice(uuid.as_bytes());
}

/// Fail with `NotEnoughData` unless `len` bytes remain.
pub fn ensure_remaining<B: Buf>(buf: &B, len: usize) -> CodecResult<()> {
    if buf.remaining() < len {
        Err(CodecError::NotEnoughData)
    } else {
        Ok(())
    }
}
