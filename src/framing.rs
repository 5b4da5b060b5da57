//! Message framing and zlib decompression.
//!
//! The framer is a two-state machine, `AwaitHeader(5) -> AwaitPayload(N)`,
//! returning to `AwaitHeader(5)` after each message, implemented as a
//! [`tokio_util::codec::Decoder`] (a `loop` over an internal state enum,
//! returning `Ok(None)` whenever more bytes are needed).

use bytes::{Buf, BytesMut};
use flate2::{Decompress, FlushDecompress, Status};
use tokio_util::codec::Decoder;

use crate::error::RelayError;

const HEADER_LEN: usize = 5;
const COMPRESSION_FLAG_OFFSET: usize = 4;

/// Caps how many times the inflate output buffer is doubled before giving
/// up; 24 doublings starting from a buffer at least as large as the
/// compressed input is far beyond any payload this protocol carries.
const MAX_INFLATE_DOUBLINGS: u32 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FramingState {
    AwaitHeader,
    AwaitPayload { len: usize, compressed: bool },
}

/// A `tokio_util::codec::Decoder` that turns a byte stream into a sequence
/// of decompressed payload buffers, one per frame.
#[derive(Debug)]
pub struct WeechatCodec {
    state: FramingState,
    max_frame_len: usize,
}

impl WeechatCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            state: FramingState::AwaitHeader,
            max_frame_len,
        }
    }
}

impl Decoder for WeechatCodec {
    type Item = Vec<u8>;
    type Error = RelayError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                FramingState::AwaitHeader => {
                    if src.len() < HEADER_LEN {
                        return Ok(None);
                    }

                    let total_len =
                        i32::from_be_bytes([src[0], src[1], src[2], src[3]]);
                    let compressed = src[COMPRESSION_FLAG_OFFSET] != 0;

                    if total_len < HEADER_LEN as i32 {
                        return Err(RelayError::InvalidData(format!(
                            "declared frame length {total_len} is smaller than the header"
                        )));
                    }

                    let payload_len = total_len as usize - HEADER_LEN;
                    if payload_len > self.max_frame_len {
                        return Err(RelayError::InvalidData(format!(
                            "declared payload length {payload_len} exceeds configured maximum {}",
                            self.max_frame_len
                        )));
                    }

                    src.advance(HEADER_LEN);
                    self.state = FramingState::AwaitPayload {
                        len: payload_len,
                        compressed,
                    };
                }
                FramingState::AwaitPayload { len, compressed } => {
                    if src.len() < len {
                        return Ok(None);
                    }

                    let payload = src.split_to(len);
                    self.state = FramingState::AwaitHeader;

                    return if compressed {
                        inflate(&payload).map(Some)
                    } else {
                        Ok(Some(payload.to_vec()))
                    };
                }
            }
        }
    }
}

/// Inflate a zlib-wrapped payload, doubling the output buffer until the
/// decompressor reports it is finished, matching the doubling-buffer
/// growth policy. A fresh `Decompress` is used per payload (the
/// decompressor is conceptually reset after each message).
fn inflate(compressed: &[u8]) -> Result<Vec<u8>, RelayError> {
    let mut out_size = compressed.len().max(64);

    for _ in 0..MAX_INFLATE_DOUBLINGS {
        let mut decompress = Decompress::new(true);
        let mut out = vec![0u8; out_size];

        let status = decompress
            .decompress(compressed, &mut out, FlushDecompress::Finish)
            .map_err(|e| RelayError::Decompression(e.to_string()))?;

        let produced = decompress.total_out() as usize;

        match status {
            Status::StreamEnd => {
                let consumed = decompress.total_in() as usize;
                if consumed != compressed.len() {
                    return Err(RelayError::InvalidData(format!(
                        "compressed payload has {} trailing byte(s) after the zlib stream ended",
                        compressed.len() - consumed
                    )));
                }
                out.truncate(produced);
                return Ok(out);
            }
            Status::Ok | Status::BufError => {
                out_size *= 2;
            }
        }
    }

    Err(RelayError::Decompression(
        "inflater never reached a finished state".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zlib_compress(data: &[u8]) -> Vec<u8> {
        let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn frame(payload: &[u8], compressed: bool) -> BytesMut {
        let total_len = (HEADER_LEN + payload.len()) as i32;
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&total_len.to_be_bytes());
        buf.extend_from_slice(&[compressed as u8]);
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn test_decode_raw_frame() {
        let mut codec = WeechatCodec::new(1024 * 1024);
        let mut src = frame(b"hello", false);

        let got = codec.decode(&mut src).unwrap();
        assert_eq!(got, Some(b"hello".to_vec()));
        assert!(src.is_empty());
    }

    #[test]
    fn test_decode_waits_for_more_bytes() {
        let mut codec = WeechatCodec::new(1024 * 1024);
        let full = frame(b"hello", false);
        let mut src = BytesMut::from(&full[..3]);

        assert_eq!(codec.decode(&mut src).unwrap(), None);
    }

    #[test]
    fn test_decode_compressed_frame() {
        let payload = b"a payload that compresses reasonably well well well well well";
        let compressed = zlib_compress(payload);

        let mut codec = WeechatCodec::new(1024 * 1024);
        let mut src = frame(&compressed, true);

        let got = codec.decode(&mut src).unwrap();
        assert_eq!(got, Some(payload.to_vec()));
    }

    #[test]
    fn test_decode_rejects_compressed_frame_with_trailing_bytes() {
        let payload = b"a payload that compresses reasonably well well well well well";
        let mut compressed = zlib_compress(payload);
        compressed.extend_from_slice(b"junk");

        let mut codec = WeechatCodec::new(1024 * 1024);
        let mut src = frame(&compressed, true);

        let err = codec.decode(&mut src).unwrap_err();
        assert!(matches!(err, RelayError::InvalidData(_)));
    }

    #[test]
    fn test_decode_rejects_oversized_frame() {
        let mut codec = WeechatCodec::new(4);
        let mut src = frame(b"hello", false);

        let err = codec.decode(&mut src).unwrap_err();
        assert!(matches!(err, RelayError::InvalidData(_)));
    }

    #[test]
    fn test_decode_two_frames_in_sequence() {
        let mut codec = WeechatCodec::new(1024 * 1024);
        let mut src = frame(b"one", false);
        src.extend_from_slice(&frame(b"two", false));

        assert_eq!(codec.decode(&mut src).unwrap(), Some(b"one".to_vec()));
        assert_eq!(codec.decode(&mut src).unwrap(), Some(b"two".to_vec()));
        assert_eq!(codec.decode(&mut src).unwrap(), None);
    }
}
