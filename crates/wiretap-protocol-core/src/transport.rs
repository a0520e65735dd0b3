use crate::codec::{read_varint, varint_len, write_varint, CodecError};
use crate::pipeline::Frame;
use bytes::{Buf, BytesMut};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read as _, Write as _};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::trace;

/// Largest frame (and largest decompressed packet) the protocol allows.
pub const MAX_FRAME_LEN: usize = 2_097_151;

/// A length-prefixed protocol stream with optional zlib compression.
pub struct Transport {
    stream: TcpStream,
    read_buf: BytesMut,
    compression_threshold: Option<i32>,
}

impl Transport {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(4096),
            compression_threshold: None,
        }
    }

    /// Enable zlib compression with the given threshold.
    pub fn enable_compression(&mut self, threshold: i32) {
        self.compression_threshold = Some(threshold);
    }

    pub fn compression_threshold(&self) -> Option<i32> {
        self.compression_threshold
    }

    /// Read a single frame.
    pub async fn read_frame(&mut self) -> anyhow::Result<Frame> {
        loop {
            if let Some(frame) = try_parse_frame(&mut self.read_buf, self.compression_threshold)? {
                return Ok(frame);
            }
            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(anyhow::anyhow!("Connection closed"));
            }
        }
    }

    /// Write a frame.
    pub async fn write_frame(&mut self, frame: &Frame) -> anyhow::Result<()> {
        let bytes = build_frame(frame, self.compression_threshold);
        self.stream.write_all(&bytes).await?;
        Ok(())
    }

    pub fn peer_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.stream.peer_addr()
    }

    /// Split the transport into read and write halves for concurrent I/O.
    /// Compression state is copied to each half.
    pub fn into_split(self) -> (TransportReader, TransportWriter) {
        let (read_half, write_half) = self.stream.into_split();
        (
            TransportReader {
                stream: read_half,
                read_buf: self.read_buf,
                compression_threshold: self.compression_threshold,
            },
            TransportWriter {
                stream: write_half,
                compression_threshold: self.compression_threshold,
            },
        )
    }
}

/// Read half of a split transport.
pub struct TransportReader {
    stream: OwnedReadHalf,
    read_buf: BytesMut,
    compression_threshold: Option<i32>,
}

impl TransportReader {
    pub async fn read_frame(&mut self) -> anyhow::Result<Frame> {
        loop {
            if let Some(frame) = try_parse_frame(&mut self.read_buf, self.compression_threshold)? {
                return Ok(frame);
            }
            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(anyhow::anyhow!("Connection closed"));
            }
        }
    }
}

/// Write half of a split transport.
pub struct TransportWriter {
    stream: OwnedWriteHalf,
    compression_threshold: Option<i32>,
}

impl TransportWriter {
    pub async fn write_frame(&mut self, frame: &Frame) -> anyhow::Result<()> {
        let bytes = build_frame(frame, self.compression_threshold);
        self.stream.write_all(&bytes).await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

// === Shared helpers ===

/// Try to cut one complete frame off the front of `read_buf`.
/// Returns `Ok(None)` when more bytes are needed.
pub fn try_parse_frame(
    read_buf: &mut BytesMut,
    compression_threshold: Option<i32>,
) -> Result<Option<Frame>, CodecError> {
    if read_buf.is_empty() {
        return Ok(None);
    }

    let mut peek = &read_buf[..];
    let length = match read_varint(&mut peek) {
        Ok(len) if len < 0 => return Err(CodecError::NotEnoughData),
        Ok(len) => len as usize,
        Err(CodecError::NotEnoughData) => return Ok(None),
        Err(e) => return Err(e),
    };
    if length > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(length));
    }

    let varint_bytes = read_buf.len() - peek.len();
    if peek.remaining() < length {
        return Ok(None);
    }

    read_buf.advance(varint_bytes);
    let mut packet_data = read_buf.split_to(length);

    if compression_threshold.is_some() {
        let data_length = read_varint(&mut packet_data)?;
        if data_length < 0 || data_length as usize > MAX_FRAME_LEN {
            return Err(CodecError::FrameTooLarge(data_length as usize));
        }
        if data_length > 0 {
            let mut decompressed = vec![0u8; data_length as usize];
            let mut decoder = ZlibDecoder::new(&packet_data[..]);
            decoder.read_exact(&mut decompressed)?;
            packet_data = BytesMut::from(&decompressed[..]);
        }
    }

    let id = read_varint(&mut packet_data)?;
    trace!("Read frame id=0x{:02X} len={}", id, packet_data.len());

    Ok(Some(Frame::new(id, packet_data)))
}

/// Encode a frame with its length prefix, compressing when over the threshold.
pub fn build_frame(frame: &Frame, compression_threshold: Option<i32>) -> BytesMut {
    let mut packet_buf = BytesMut::with_capacity(frame.payload.len() + 5);
    write_varint(&mut packet_buf, frame.id);
    packet_buf.extend_from_slice(&frame.payload);

    let mut out = BytesMut::new();

    if let Some(threshold) = compression_threshold {
        let uncompressed_len = packet_buf.len() as i32;
        if uncompressed_len >= threshold {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            let _ = encoder.write_all(&packet_buf);
            let compressed = encoder.finish().unwrap_or_default();

            let data_length_size = varint_len(uncompressed_len);
            let total_length = data_length_size + compressed.len();
            write_varint(&mut out, total_length as i32);
            write_varint(&mut out, uncompressed_len);
            out.extend_from_slice(&compressed);
        } else {
            let total_length = 1 + packet_buf.len();
            write_varint(&mut out, total_length as i32);
            write_varint(&mut out, 0);
            out.extend_from_slice(&packet_buf);
        }
    } else {
        write_varint(&mut out, packet_buf.len() as i32);
        out.extend_from_slice(&packet_buf);
    }

    out
}
