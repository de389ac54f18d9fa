//! Object serialization
//!
//! Any serde type is stored as a bincode payload inside a small envelope
//! carrying magic bytes, a format version and an FNV-1a checksum, so that a
//! truncated or foreign file is rejected instead of decoded into garbage.

use crate::error::{Result, TrainerError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::debug;

const MAGIC: [u8; 4] = *b"MTRB";
const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Envelope {
    magic: [u8; 4],
    format_version: u32,
    checksum: u64,
    payload: Vec<u8>,
}

/// FNV-1a over the payload
fn checksum(data: &[u8]) -> u64 {
    const FNV_OFFSET: u64 = 14695981039346656037;
    const FNV_PRIME: u64 = 1099511628211;

    data.iter().fold(FNV_OFFSET, |hash, &byte| {
        (hash ^ byte as u64).wrapping_mul(FNV_PRIME)
    })
}

/// Encode `value` into enveloped bytes
pub fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let payload = bincode::serialize(value)?;
    let envelope = Envelope {
        magic: MAGIC,
        format_version: FORMAT_VERSION,
        checksum: checksum(&payload),
        payload,
    };
    Ok(bincode::serialize(&envelope)?)
}

/// Decode bytes produced by [`to_bytes`]
pub fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    if bytes.len() < MAGIC.len() || bytes[..MAGIC.len()] != MAGIC {
        return Err(TrainerError::Serialization(
            "not a model-trainer object file (bad magic)".to_string(),
        ));
    }
    let envelope: Envelope = bincode::deserialize(bytes)?;
    if envelope.format_version != FORMAT_VERSION {
        return Err(TrainerError::Serialization(format!(
            "unsupported format version {} (expected {})",
            envelope.format_version, FORMAT_VERSION
        )));
    }
    if checksum(&envelope.payload) != envelope.checksum {
        return Err(TrainerError::Serialization("checksum mismatch".to_string()));
    }
    Ok(bincode::deserialize(&envelope.payload)?)
}

/// Persist `value` at `path`, creating parent directories
pub fn save_object<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let bytes = to_bytes(value)?;
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&bytes)?;
    writer.flush()?;
    debug!(path = %path.display(), bytes = bytes.len(), "object saved");
    Ok(())
}

/// Load an object written by [`save_object`]
pub fn load_object<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let mut bytes = Vec::new();
    BufReader::new(File::open(path)?).read_to_end(&mut bytes)?;
    from_bytes(&bytes)
}
