//! Framed on-disk encoding shared by the branch directory and document
//! collections.
//!
//! Layout: magic (4) | version (1) | payload length (8, LE) | CRC32 (4, LE) |
//! MessagePack payload. Writes go to a sibling temp file that is renamed
//! over the target, so a reader sees either the old or the new frame.

use crate::error::{Result, StoreError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Refuse frames larger than this (1 GiB).
const MAX_PAYLOAD: u64 = 1 << 30;

/// Encode `value` and atomically replace the file at `path`.
pub fn write_framed<T: Serialize>(
    path: &Path,
    magic: &[u8; 4],
    version: u8,
    value: &T,
) -> Result<()> {
    let encoded = rmp_serde::to_vec_named(value)?;
    let checksum = crc32fast::hash(&encoded);

    let tmp = temp_path(path);
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;

        file.write_all(magic)?;
        file.write_all(&[version])?;
        file.write_all(&(encoded.len() as u64).to_le_bytes())?;
        file.write_all(&checksum.to_le_bytes())?;
        file.write_all(&encoded)?;
        file.sync_all()?;
    }

    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read and verify a frame written by [`write_framed`].
pub fn read_framed<T: DeserializeOwned>(path: &Path, magic: &[u8; 4], version: u8) -> Result<T> {
    let mut file = File::open(path)?;

    let mut found_magic = [0u8; 4];
    file.read_exact(&mut found_magic)?;
    if &found_magic != magic {
        return Err(StoreError::InvalidFormat(format!(
            "Invalid magic in {}",
            path.display()
        )));
    }

    let mut found_version = [0u8; 1];
    file.read_exact(&mut found_version)?;
    if found_version[0] != version {
        return Err(StoreError::InvalidFormat(format!(
            "Unsupported format version {} in {}",
            found_version[0],
            path.display()
        )));
    }

    let mut len_bytes = [0u8; 8];
    file.read_exact(&mut len_bytes)?;
    let len = u64::from_le_bytes(len_bytes);
    if len > MAX_PAYLOAD {
        return Err(StoreError::Corruption(format!(
            "Frame in {} claims {} bytes",
            path.display(),
            len
        )));
    }

    let mut checksum_bytes = [0u8; 4];
    file.read_exact(&mut checksum_bytes)?;
    let expected = u32::from_le_bytes(checksum_bytes);

    let mut encoded = vec![0u8; len as usize];
    file.read_exact(&mut encoded)?;

    let got = crc32fast::hash(&encoded);
    if got != expected {
        return Err(StoreError::ChecksumMismatch { expected, got });
    }

    Ok(rmp_serde::from_slice(&encoded)?)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
