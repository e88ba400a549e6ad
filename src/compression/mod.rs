/// Reversible payload compression for oversized cache entries
///
/// Payloads below the threshold are stored as plain JSON bytes; anything
/// larger is gzip-compressed. Decompression is the exact inverse, and corrupt
/// data surfaces as an error instead of a silently wrong value.

use crate::errors::{GatewayError, GatewayResult};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;
use std::io::{Read, Write};

/// Compress payloads larger than this many serialized bytes.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 1024;

/// Result of running a payload through the codec
#[derive(Debug, Clone)]
pub struct CompressedPayload {
    pub data: Vec<u8>,
    pub is_compressed: bool,
    pub original_size: usize,
    pub compressed_size: usize,
}

#[derive(Debug, Clone)]
pub struct CompressionCodec {
    threshold_bytes: usize,
}

impl Default for CompressionCodec {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_THRESHOLD)
    }
}

impl CompressionCodec {
    pub fn new(threshold_bytes: usize) -> Self {
        Self { threshold_bytes }
    }

    pub fn threshold_bytes(&self) -> usize {
        self.threshold_bytes
    }

    /// Serialize a JSON value, compressing it only when the serialized form
    /// exceeds the configured threshold.
    pub fn compress(&self, value: &Value) -> GatewayResult<CompressedPayload> {
        let raw = serde_json::to_vec(value)?;
        let original_size = raw.len();

        if original_size <= self.threshold_bytes {
            return Ok(CompressedPayload {
                compressed_size: original_size,
                data: raw,
                is_compressed: false,
                original_size,
            });
        }

        let data = gzip_bytes(&raw).map_err(GatewayError::Serialization)?;
        log::debug!(
            "Compressed payload {} -> {} bytes",
            original_size,
            data.len()
        );

        Ok(CompressedPayload {
            compressed_size: data.len(),
            data,
            is_compressed: true,
            original_size,
        })
    }

    /// Exact inverse of [`compress`](Self::compress). Uncompressed payloads
    /// are deserialized as-is; corrupt gzip or JSON yields a
    /// `Decompression` error tagged with the offending key.
    pub fn decompress(&self, payload: &CompressedPayload, key: &str) -> GatewayResult<Value> {
        let raw = if payload.is_compressed {
            gunzip_bytes(&payload.data).map_err(|reason| GatewayError::Decompression {
                key: key.to_string(),
                reason,
            })?
        } else {
            payload.data.clone()
        };

        serde_json::from_slice(&raw).map_err(|e| GatewayError::Decompression {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    /// Compress an already-serialized raw payload (used by cache maintenance
    /// when recompressing stored entries without a JSON round trip).
    pub fn compress_raw(&self, raw: &[u8]) -> GatewayResult<Vec<u8>> {
        gzip_bytes(raw).map_err(GatewayError::Serialization)
    }
}

fn gzip_bytes(raw: &[u8]) -> Result<Vec<u8>, String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(raw)
        .map_err(|e| format!("gzip write failed: {}", e))?;
    encoder
        .finish()
        .map_err(|e| format!("gzip finish failed: {}", e))
}

fn gunzip_bytes(data: &[u8]) -> Result<Vec<u8>, String> {
    let mut decoder = GzDecoder::new(data);
    let mut raw = Vec::new();
    decoder
        .read_to_end(&mut raw)
        .map_err(|e| format!("gzip read failed: {}", e))?;
    Ok(raw)
}
