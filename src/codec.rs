//! Compression codec used to demote and promote file content.
//!
//! The default [`ZipCodec`] stores a single deflated entry per artifact. The
//! format is an implementation detail; callers only rely on
//! `unpack(pack(x)) == x`.

use std::io::{Cursor, Read, Write};

use thiserror::Error;

const ENTRY_NAME: &str = "content";

/// Errors produced while packing or unpacking content.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Archive error: {0}")]
    Archive(String),
    #[error("IO error while transcoding: {0}")]
    Io(#[from] std::io::Error),
    #[error("Archive must hold exactly one entry, found {0}")]
    EntryCount(usize),
    #[error("Unpacked content is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },
}

impl From<zip::result::ZipError> for CodecError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Archive(err.to_string())
    }
}

/// Byte-array compression used by demotion and promotion jobs.
pub trait Codec: Send + Sync {
    fn pack(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;

    fn unpack(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
}

/// Single-entry deflate archive.
#[derive(Debug, Clone)]
pub struct ZipCodec {
    max_unpacked_bytes: u64,
}

impl ZipCodec {
    pub fn new(max_unpacked_bytes: u64) -> Self {
        Self { max_unpacked_bytes }
    }
}

impl Default for ZipCodec {
    fn default() -> Self {
        Self::new(u64::MAX)
    }
}

impl Codec for ZipCodec {
    fn pack(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::with_capacity(data.len() / 2 + 64)));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .large_file(data.len() as u64 >= u32::MAX as u64);
        zip.start_file(ENTRY_NAME, options)?;
        zip.write_all(data)?;
        Ok(zip.finish()?.into_inner())
    }

    fn unpack(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(data))?;
        if archive.len() != 1 {
            return Err(CodecError::EntryCount(archive.len()));
        }
        let entry = archive.by_index(0)?;
        let size = entry.size();
        if size > self.max_unpacked_bytes {
            return Err(CodecError::TooLarge {
                size,
                limit: self.max_unpacked_bytes,
            });
        }
        let mut out = Vec::with_capacity(size.min(64 * 1024 * 1024) as usize);
        // Guard against headers that understate the real payload.
        entry
            .take(self.max_unpacked_bytes.saturating_add(1))
            .read_to_end(&mut out)?;
        if out.len() as u64 > self.max_unpacked_bytes {
            return Err(CodecError::TooLarge {
                size: out.len() as u64,
                limit: self.max_unpacked_bytes,
            });
        }
        Ok(out)
    }
}
