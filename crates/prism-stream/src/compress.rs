//! Built-in compression filter (LZ4 / Zstd).
//!
//! Each input chunk is compressed independently and emitted as a
//! length-prefixed frame so the reverse direction can find chunk boundaries
//! regardless of how the transport re-chunks the stream. Frame layout:
//! 4-byte big-endian payload length, then the compressed payload.

use prism_plan::FilterInvocation;

use crate::error::StreamError;
use crate::native::NativeFilter;

const FRAME_HEADER: usize = 4;

/// Compression codec selection; `algo` param, `lz4` by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// LZ4 block format with a length prefix — hot path.
    Lz4,
    /// Zstandard — higher ratio, `level` param (default 3).
    Zstd {
        /// Compression level (1=fastest, 19=best ratio).
        level: i32,
    },
}

/// Framed chunk-wise compressor/decompressor.
pub struct CompressFilter {
    codec: Codec,
    reverse: bool,
    /// Reverse direction only: bytes of a frame not yet fully arrived.
    pending: Vec<u8>,
}

impl CompressFilter {
    /// Build from an invocation's params and direction.
    pub fn from_invocation(invocation: &FilterInvocation) -> Result<Self, StreamError> {
        let bad = |reason: String| StreamError::BadParams {
            name: invocation.name.clone(),
            reason,
        };
        let codec = match invocation.params.get("algo").map(String::as_str) {
            None | Some("lz4") => Codec::Lz4,
            Some("zstd") => {
                let level = match invocation.params.get("level") {
                    Some(s) => s
                        .parse::<i32>()
                        .map_err(|_| bad(format!("level {s:?} is not an integer")))?,
                    None => 3,
                };
                Codec::Zstd { level }
            }
            Some(other) => return Err(bad(format!("unknown algo {other:?}"))),
        };
        Ok(Self {
            codec,
            reverse: invocation.reverse,
            pending: Vec::new(),
        })
    }

    /// Forward compressor with an explicit codec.
    pub fn new(codec: Codec, reverse: bool) -> Self {
        Self {
            codec,
            reverse,
            pending: Vec::new(),
        }
    }

    fn compress_chunk(&self, chunk: &[u8]) -> Result<Vec<u8>, StreamError> {
        let payload = match self.codec {
            Codec::Lz4 => lz4_flex::compress_prepend_size(chunk),
            Codec::Zstd { level } => zstd::encode_all(chunk, level)
                .map_err(|e| self.failed(format!("zstd encode: {e}")))?,
        };
        let mut framed = Vec::with_capacity(FRAME_HEADER + payload.len());
        framed.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        framed.extend_from_slice(&payload);
        Ok(framed)
    }

    fn decompress_frames(&mut self) -> Result<Vec<u8>, StreamError> {
        let mut out = Vec::new();
        loop {
            if self.pending.len() < FRAME_HEADER {
                break;
            }
            let len = u32::from_be_bytes([
                self.pending[0],
                self.pending[1],
                self.pending[2],
                self.pending[3],
            ]) as usize;
            if self.pending.len() < FRAME_HEADER + len {
                break;
            }
            let payload: Vec<u8> = self.pending.drain(..FRAME_HEADER + len).skip(FRAME_HEADER).collect();
            let chunk = match self.codec {
                Codec::Lz4 => lz4_flex::decompress_size_prepended(&payload)
                    .map_err(|e| self.failed(format!("lz4 decode: {e}")))?,
                Codec::Zstd { .. } => zstd::decode_all(payload.as_slice())
                    .map_err(|e| self.failed(format!("zstd decode: {e}")))?,
            };
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    fn failed(&self, reason: String) -> StreamError {
        StreamError::Filter {
            name: "compress".to_string(),
            reason,
        }
    }
}

impl NativeFilter for CompressFilter {
    fn transform(&mut self, chunk: &[u8]) -> Result<Vec<u8>, StreamError> {
        if self.reverse {
            self.pending.extend_from_slice(chunk);
            self.decompress_frames()
        } else {
            self.compress_chunk(chunk)
        }
    }

    fn finish(&mut self) -> Result<Vec<u8>, StreamError> {
        if self.reverse && !self.pending.is_empty() {
            return Err(self.failed(format!(
                "stream ended inside a frame ({} bytes pending)",
                self.pending.len()
            )));
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn roundtrip(codec: Codec, data: &[u8], chunk: usize, rechunk: usize) -> Vec<u8> {
        let mut fwd = CompressFilter::new(codec, false);
        let mut framed = Vec::new();
        for piece in data.chunks(chunk.max(1)) {
            framed.extend(fwd.transform(piece).unwrap());
        }
        framed.extend(fwd.finish().unwrap());

        let mut rev = CompressFilter::new(codec, true);
        let mut out = Vec::new();
        for piece in framed.chunks(rechunk.max(1)) {
            out.extend(rev.transform(piece).unwrap());
        }
        out.extend(rev.finish().unwrap());
        out
    }

    #[test]
    fn lz4_roundtrip_across_rechunking() {
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(roundtrip(Codec::Lz4, &data, 4096, 7), data);
    }

    #[test]
    fn zstd_roundtrip() {
        let data = b"the quick brown fox ".repeat(1000);
        assert_eq!(roundtrip(Codec::Zstd { level: 3 }, &data, 1024, 333), data);
    }

    #[test]
    fn truncated_frame_is_an_error_at_finish() {
        let mut fwd = CompressFilter::new(Codec::Lz4, false);
        let framed = fwd.transform(b"hello world").unwrap();

        let mut rev = CompressFilter::new(Codec::Lz4, true);
        rev.transform(&framed[..framed.len() - 1]).unwrap();
        assert!(rev.finish().is_err());
    }

    #[test]
    fn corrupt_payload_is_an_error() {
        let mut rev = CompressFilter::new(Codec::Lz4, true);
        let mut bogus = (4u32).to_be_bytes().to_vec();
        bogus.extend_from_slice(&[0xff, 0xff, 0xff, 0xff]);
        assert!(rev.transform(&bogus).is_err());
    }

    #[test]
    fn unknown_algo_param_is_rejected() {
        use prism_policy::{ExecutionNode, FilterKind, Phase};
        let invocation = FilterInvocation {
            id: "c".to_string(),
            name: "compress".to_string(),
            kind: FilterKind::Native,
            main: "compress".to_string(),
            dependencies: Vec::new(),
            node: ExecutionNode::Edge,
            reverse_node: None,
            phase: Phase::Pre,
            order: 0,
            params: std::collections::BTreeMap::from([(
                "algo".to_string(),
                "snappy".to_string(),
            )]),
            reverse: false,
        };
        assert!(matches!(
            CompressFilter::from_invocation(&invocation),
            Err(StreamError::BadParams { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_lz4_roundtrip(data in prop::collection::vec(0u8..=255, 0..20_000), chunk in 1usize..4096, rechunk in 1usize..512) {
            prop_assert_eq!(roundtrip(Codec::Lz4, &data, chunk, rechunk), data);
        }
    }
}
