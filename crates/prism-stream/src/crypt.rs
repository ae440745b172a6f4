//! Built-in AEAD encryption filter (AES-256-GCM / ChaCha20-Poly1305).
//!
//! Each input chunk is sealed independently with a fresh random nonce and
//! emitted as a frame: 4-byte big-endian ciphertext length, 12-byte nonce,
//! ciphertext (16-byte auth tag appended by the cipher). The reverse
//! direction reassembles frames across re-chunking and authenticates every
//! one; a tag mismatch is fatal. The data key is derived from the rule's
//! `secret` param via HKDF-SHA256.

use aes_gcm::{aead::Aead, Aes256Gcm, KeyInit};
use chacha20poly1305::ChaCha20Poly1305;
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use prism_plan::FilterInvocation;

use crate::error::StreamError;
use crate::native::NativeFilter;

const FRAME_HEADER: usize = 4;
const NONCE_LEN: usize = 12;

/// 256-bit data key derived from the rule secret.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
struct DataKey([u8; 32]);

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DataKey([REDACTED])")
    }
}

/// AEAD cipher selection; `cipher` param, AES-GCM by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherKind {
    /// AES-256-GCM — hardware accelerated where AES-NI is available.
    AesGcm256,
    /// ChaCha20-Poly1305 — constant-time on non-AES hardware.
    ChaCha20Poly1305,
}

/// Framed chunk-wise AEAD filter.
pub struct CryptFilter {
    cipher: CipherKind,
    key: DataKey,
    reverse: bool,
    pending: Vec<u8>,
}

impl CryptFilter {
    /// Build from an invocation's params and direction. `secret` is required.
    pub fn from_invocation(invocation: &FilterInvocation) -> Result<Self, StreamError> {
        let bad = |reason: String| StreamError::BadParams {
            name: invocation.name.clone(),
            reason,
        };
        let secret = invocation
            .params
            .get("secret")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| bad("missing secret param".to_string()))?;
        let cipher = match invocation.params.get("cipher").map(String::as_str) {
            None | Some("aes-gcm") => CipherKind::AesGcm256,
            Some("chacha20") => CipherKind::ChaCha20Poly1305,
            Some(other) => return Err(bad(format!("unknown cipher {other:?}"))),
        };
        Ok(Self {
            cipher,
            key: derive_key(secret.as_bytes()),
            reverse: invocation.reverse,
            pending: Vec::new(),
        })
    }

    fn seal(&self, chunk: &[u8]) -> Result<Vec<u8>, StreamError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = match self.cipher {
            CipherKind::AesGcm256 => {
                let cipher = Aes256Gcm::new_from_slice(&self.key.0)
                    .map_err(|e| self.failed(format!("key setup: {e}")))?;
                cipher
                    .encrypt(aes_gcm::Nonce::from_slice(&nonce), chunk)
                    .map_err(|e| self.failed(format!("encrypt: {e}")))?
            }
            CipherKind::ChaCha20Poly1305 => {
                use chacha20poly1305::aead::Aead as _;
                use chacha20poly1305::KeyInit as _;
                let cipher = ChaCha20Poly1305::new_from_slice(&self.key.0)
                    .map_err(|e| self.failed(format!("key setup: {e}")))?;
                cipher
                    .encrypt(chacha20poly1305::Nonce::from_slice(&nonce), chunk)
                    .map_err(|e| self.failed(format!("encrypt: {e}")))?
            }
        };
        let mut framed = Vec::with_capacity(FRAME_HEADER + NONCE_LEN + ciphertext.len());
        framed.extend_from_slice(&(ciphertext.len() as u32).to_be_bytes());
        framed.extend_from_slice(&nonce);
        framed.extend_from_slice(&ciphertext);
        Ok(framed)
    }

    fn open_frames(&mut self) -> Result<Vec<u8>, StreamError> {
        let mut out = Vec::new();
        loop {
            if self.pending.len() < FRAME_HEADER + NONCE_LEN {
                break;
            }
            let len = u32::from_be_bytes([
                self.pending[0],
                self.pending[1],
                self.pending[2],
                self.pending[3],
            ]) as usize;
            let frame_len = FRAME_HEADER + NONCE_LEN + len;
            if self.pending.len() < frame_len {
                break;
            }
            let frame: Vec<u8> = self.pending.drain(..frame_len).collect();
            let nonce = &frame[FRAME_HEADER..FRAME_HEADER + NONCE_LEN];
            let ciphertext = &frame[FRAME_HEADER + NONCE_LEN..];
            let chunk = match self.cipher {
                CipherKind::AesGcm256 => {
                    let cipher = Aes256Gcm::new_from_slice(&self.key.0)
                        .map_err(|e| self.failed(format!("key setup: {e}")))?;
                    cipher
                        .decrypt(aes_gcm::Nonce::from_slice(nonce), ciphertext)
                        .map_err(|_| self.failed("authentication tag mismatch".to_string()))?
                }
                CipherKind::ChaCha20Poly1305 => {
                    use chacha20poly1305::aead::Aead as _;
                    use chacha20poly1305::KeyInit as _;
                    let cipher = ChaCha20Poly1305::new_from_slice(&self.key.0)
                        .map_err(|e| self.failed(format!("key setup: {e}")))?;
                    cipher
                        .decrypt(chacha20poly1305::Nonce::from_slice(nonce), ciphertext)
                        .map_err(|_| self.failed("authentication tag mismatch".to_string()))?
                }
            };
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    fn failed(&self, reason: String) -> StreamError {
        StreamError::Filter {
            name: "crypt".to_string(),
            reason,
        }
    }
}

impl NativeFilter for CryptFilter {
    fn transform(&mut self, chunk: &[u8]) -> Result<Vec<u8>, StreamError> {
        if self.reverse {
            self.pending.extend_from_slice(chunk);
            self.open_frames()
        } else {
            self.seal(chunk)
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

fn derive_key(secret: &[u8]) -> DataKey {
    let hk = Hkdf::<Sha256>::new(None, secret);
    let mut okm = [0u8; 32];
    // Expand cannot fail for a 32-byte OKM.
    if hk.expand(b"prism-filter-key", &mut okm).is_err() {
        okm = [0u8; 32];
    }
    DataKey(okm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_policy::{ExecutionNode, FilterKind, Phase};
    use std::collections::BTreeMap;

    fn invocation(reverse: bool, params: &[(&str, &str)]) -> FilterInvocation {
        FilterInvocation {
            id: "crypt".to_string(),
            name: "crypt".to_string(),
            kind: FilterKind::Native,
            main: "crypt".to_string(),
            dependencies: Vec::new(),
            node: ExecutionNode::Edge,
            reverse_node: None,
            phase: Phase::Pre,
            order: 0,
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            reverse,
        }
    }

    fn roundtrip(params: &[(&str, &str)], data: &[u8], rechunk: usize) -> Vec<u8> {
        let mut fwd = CryptFilter::from_invocation(&invocation(false, params)).unwrap();
        let mut sealed = Vec::new();
        for piece in data.chunks(4096) {
            sealed.extend(fwd.transform(piece).unwrap());
        }
        sealed.extend(fwd.finish().unwrap());
        assert_ne!(sealed, data);

        let mut rev = CryptFilter::from_invocation(&invocation(true, params)).unwrap();
        let mut out = Vec::new();
        for piece in sealed.chunks(rechunk.max(1)) {
            out.extend(rev.transform(piece).unwrap());
        }
        out.extend(rev.finish().unwrap());
        out
    }

    #[test]
    fn aes_gcm_roundtrip_across_rechunking() {
        let data: Vec<u8> = (0..30_000u32).map(|i| (i % 251) as u8).collect();
        let params = [("secret", "s3kr1t")];
        assert_eq!(roundtrip(&params, &data, 97), data);
    }

    #[test]
    fn chacha20_roundtrip() {
        let data = b"attack at dawn".repeat(500);
        let params = [("secret", "s3kr1t"), ("cipher", "chacha20")];
        assert_eq!(roundtrip(&params, &data, 1024), data);
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let params = [("secret", "s3kr1t")];
        let mut fwd = CryptFilter::from_invocation(&invocation(false, &params)).unwrap();
        let mut sealed = fwd.transform(b"sensitive payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;

        let mut rev = CryptFilter::from_invocation(&invocation(true, &params)).unwrap();
        assert!(matches!(
            rev.transform(&sealed),
            Err(StreamError::Filter { .. })
        ));
    }

    #[test]
    fn wrong_secret_fails_authentication() {
        let mut fwd =
            CryptFilter::from_invocation(&invocation(false, &[("secret", "right")])).unwrap();
        let sealed = fwd.transform(b"payload").unwrap();
        let mut rev =
            CryptFilter::from_invocation(&invocation(true, &[("secret", "wrong")])).unwrap();
        assert!(rev.transform(&sealed).is_err());
    }

    #[test]
    fn missing_secret_is_rejected() {
        assert!(matches!(
            CryptFilter::from_invocation(&invocation(false, &[])),
            Err(StreamError::BadParams { .. })
        ));
    }

    #[test]
    fn truncated_frame_is_an_error_at_finish() {
        let params = [("secret", "s3kr1t")];
        let mut fwd = CryptFilter::from_invocation(&invocation(false, &params)).unwrap();
        let sealed = fwd.transform(b"payload").unwrap();

        let mut rev = CryptFilter::from_invocation(&invocation(true, &params)).unwrap();
        rev.transform(&sealed[..sealed.len() - 2]).unwrap();
        assert!(rev.finish().is_err());
    }
}
