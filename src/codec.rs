//! Length-prefixed zlib frame codec used on every bridge connection.
//!
//! Each frame is `u32_be(compressed_len)` followed by the zlib-compressed
//! packet payload. The very first 4 bytes a peer sends are an opaque probe
//! tag; they are consumed once and kept only for diagnostic logging.
//! The codec deals in opaque UTF-8 strings and knows nothing about packet
//! schemas.

use std::io::{Read, Write};

use bytes::{Buf, BufMut, BytesMut};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Frames whose declared compressed size exceeds this are rejected before
/// any decompression is attempted.
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

const LEN_PREFIX_BYTES: usize = 4;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Frame of {size} bytes exceeds the {MAX_FRAME_BYTES} byte cap")]
    FrameTooLarge { size: usize },

    #[error("Corrupt compressed stream: {0}")]
    Corrupt(std::io::Error),

    #[error("Frame payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Codec state for one connection.
#[derive(Debug)]
pub struct PacketCodec {
    expect_tag: bool,
    initial_tag: Option<[u8; 4]>,
    got_packet: bool,
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketCodec {
    /// Server-side codec: expects the one-shot probe tag ahead of the
    /// first inbound frame.
    pub fn new() -> Self {
        Self {
            expect_tag: true,
            initial_tag: None,
            got_packet: false,
        }
    }

    /// Client-side codec: the bridge never sends a probe tag, so peers
    /// decoding its stream must not skip one.
    pub fn client() -> Self {
        Self {
            expect_tag: false,
            initial_tag: None,
            got_packet: false,
        }
    }

    /// The probe tag sent ahead of the first frame, once observed.
    /// Never interpreted; logged when a connection turns out to speak
    /// the wrong protocol.
    pub fn initial_tag(&self) -> Option<[u8; 4]> {
        self.initial_tag
    }

    /// Whether at least one frame has decoded successfully. Distinguishes
    /// "wrong protocol entirely" from mid-session corruption when logging
    /// a fatal decode error.
    pub fn saw_packet(&self) -> bool {
        self.got_packet
    }

    fn compress(payload: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload)?;
        encoder.finish()
    }

    fn decompress(compressed: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut decoder = ZlibDecoder::new(compressed);
        let mut payload = Vec::new();
        decoder
            .read_to_end(&mut payload)
            .map_err(CodecError::Corrupt)?;
        Ok(payload)
    }
}

impl Decoder for PacketCodec {
    type Item = String;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, CodecError> {
        if self.expect_tag && self.initial_tag.is_none() {
            if src.len() < 4 {
                return Ok(None);
            }
            let mut tag = [0u8; 4];
            tag.copy_from_slice(&src[..4]);
            src.advance(4);
            self.initial_tag = Some(tag);
        }

        if src.len() < LEN_PREFIX_BYTES {
            return Ok(None);
        }

        let mut len_bytes = [0u8; LEN_PREFIX_BYTES];
        len_bytes.copy_from_slice(&src[..LEN_PREFIX_BYTES]);
        let size = u32::from_be_bytes(len_bytes) as usize;

        if size > MAX_FRAME_BYTES {
            return Err(CodecError::FrameTooLarge { size });
        }

        if src.len() < LEN_PREFIX_BYTES + size {
            src.reserve(LEN_PREFIX_BYTES + size - src.len());
            return Ok(None);
        }

        src.advance(LEN_PREFIX_BYTES);
        let compressed = src.split_to(size);
        let payload = Self::decompress(&compressed)?;
        let text = String::from_utf8(payload)?;
        self.got_packet = true;
        Ok(Some(text))
    }
}

impl Encoder<String> for PacketCodec {
    type Error = CodecError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), CodecError> {
        let compressed = Self::compress(item.as_bytes())?;
        // Same cap as the decode path; also keeps the length prefix from
        // wrapping past u32.
        if compressed.len() > MAX_FRAME_BYTES {
            return Err(CodecError::FrameTooLarge {
                size: compressed.len(),
            });
        }
        dst.reserve(LEN_PREFIX_BYTES + compressed.len());
        dst.put_u32(compressed.len() as u32);
        dst.put_slice(&compressed);
        Ok(())
    }
}
