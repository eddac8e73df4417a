//! Chunk encoding for array payloads.
//!
//! On-disk format:
//! ```text
//! [4 bytes: magic "GHGC"]
//! [4 bytes: body length (little-endian u32)]
//! [4 bytes: CRC32 of body (little-endian u32)]
//! [N bytes: body (bincode-serialized ChunkBody)]
//! ```
//!
//! Timestamps are stored as nanoseconds since the UNIX epoch so the chunk
//! keeps the full resolution of the interval algebra.

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use ghg_types::{ContentHash, ContentHasher};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::payload::ArrayPayload;

const MAGIC: &[u8; 4] = b"GHGC";

/// Header size: magic + length + CRC.
const HEADER_SIZE: usize = 12;

#[derive(Serialize, Deserialize)]
struct ChunkBody {
    times_ns: Vec<i64>,
    variables: BTreeMap<String, Vec<f64>>,
}

/// An encoded chunk and the hash of its body.
pub struct EncodedChunk {
    pub bytes: Vec<u8>,
    pub hash: ContentHash,
}

/// Encode a payload block into framed chunk bytes.
pub fn encode(payload: &ArrayPayload) -> StoreResult<EncodedChunk> {
    let times_ns = payload
        .times
        .iter()
        .map(|t| {
            t.timestamp_nanos_opt().ok_or_else(|| {
                StoreError::InvalidPayload(format!("timestamp {t} outside nanosecond range"))
            })
        })
        .collect::<StoreResult<Vec<i64>>>()?;
    let body = ChunkBody {
        times_ns,
        variables: payload.variables.clone(),
    };
    let body = bincode::serialize(&body).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let length = u32::try_from(body.len())
        .map_err(|_| StoreError::InvalidPayload("chunk body exceeds 4 GiB".to_string()))?;

    let mut bytes = Vec::with_capacity(HEADER_SIZE + body.len());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&length.to_le_bytes());
    bytes.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    bytes.extend_from_slice(&body);
    Ok(EncodedChunk {
        hash: ContentHasher::CHUNK.hash(&body),
        bytes,
    })
}

/// Decode framed chunk bytes. `origin` names the chunk in error messages.
pub fn decode(bytes: &[u8], origin: &std::path::Path) -> StoreResult<(ArrayPayload, ContentHash)> {
    let corrupt = |reason: String| StoreError::CorruptChunk {
        path: origin.to_path_buf(),
        reason,
    };
    if bytes.len() < HEADER_SIZE || &bytes[..4] != MAGIC {
        return Err(corrupt("bad magic or truncated header".to_string()));
    }
    let length = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let expected_crc = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    let body = bytes
        .get(HEADER_SIZE..HEADER_SIZE + length)
        .ok_or_else(|| corrupt(format!("truncated body: want {length} bytes")))?;
    let actual_crc = crc32fast::hash(body);
    if actual_crc != expected_crc {
        return Err(corrupt(format!(
            "CRC mismatch: expected {expected_crc:#010x}, got {actual_crc:#010x}"
        )));
    }
    let decoded: ChunkBody =
        bincode::deserialize(body).map_err(|e| corrupt(format!("undecodable body: {e}")))?;
    let times = decoded
        .times_ns
        .into_iter()
        .map(|ns| Utc.timestamp_nanos(ns))
        .collect();
    let payload = ArrayPayload::from_parts(times, decoded.variables);
    Ok((payload, ContentHasher::CHUNK.hash(body)))
}
