//! Agent → collector batch protocol.
//!
//! A batch is a JSON array of [`MetricEnvelope`]s, gzip-compressed on the
//! way out. When a shared key is configured the uncompressed JSON is signed
//! with HMAC-SHA256 and the hex digest travels in the [`HASH_HEADER`]
//! header. The collector decompresses before verifying, so signatures are
//! always over the plain JSON bytes.

use std::io::{self, Read, Write};

use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::types::MetricEnvelope;

/// Request/response header carrying the hex HMAC-SHA256 digest.
pub const HASH_HEADER: &str = "HashSHA256";

/// Collector path for batched updates.
pub const BATCH_PATH: &str = "/updates/";

type HmacSha256 = Hmac<Sha256>;

/// A batch ready to be POSTed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBatch {
    /// Gzip-compressed JSON array.
    pub body: Vec<u8>,
    /// Hex digest of the uncompressed JSON, when signing is enabled.
    pub signature: Option<String>,
}

pub fn encode_batch(batch: &[MetricEnvelope]) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(batch)
}

pub fn decode_batch(bytes: &[u8]) -> serde_json::Result<Vec<MetricEnvelope>> {
    serde_json::from_slice(bytes)
}

pub fn gzip(bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 2), Compression::fast());
    encoder.write_all(bytes)?;
    encoder.finish()
}

/// Decompress a gzip payload. Concatenated members are accepted.
pub fn gunzip(bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoded = Vec::new();
    MultiGzDecoder::new(bytes).read_to_end(&mut decoded)?;
    Ok(decoded)
}

/// Like [`gunzip`], but stops once the output passes `limit` bytes and
/// fails with [`io::ErrorKind::FileTooLarge`].
pub fn gunzip_bounded(bytes: &[u8], limit: usize) -> io::Result<Vec<u8>> {
    let mut decoded = Vec::new();
    MultiGzDecoder::new(bytes)
        .take(limit as u64 + 1)
        .read_to_end(&mut decoded)?;
    if decoded.len() > limit {
        return Err(io::Error::new(
            io::ErrorKind::FileTooLarge,
            format!("decompressed body exceeds {limit} bytes"),
        ));
    }
    Ok(decoded)
}

/// Hex-encoded HMAC-SHA256 of `body` under `key`.
pub fn sign(key: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex digest against `body`.
pub fn verify(key: &[u8], body: &[u8], digest_hex: &str) -> bool {
    let Ok(expected) = hex::decode(digest_hex.trim()) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Build the request payload for a batch: JSON, optional signature, gzip.
pub fn encode_request(batch: &[MetricEnvelope], key: Option<&[u8]>) -> anyhow::Result<EncodedBatch> {
    let json = encode_batch(batch)?;
    let signature = key.map(|k| sign(k, &json));
    let body = gzip(&json)?;
    Ok(EncodedBatch { body, signature })
}
