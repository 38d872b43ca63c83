use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use md5::{Digest, Md5};

use crate::error::TransferError;

/// Read buffer shared by all hashing and copy loops.
pub(crate) const IO_BUF_SIZE: usize = 8 * 1024;

/// Computes MD5 of `data` and returns the lowercase hex digest.
///
/// MD5 is used for accidental-corruption detection and compatibility with
/// existing on-disk records; it is not a security property.
pub fn bytes_md5(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes MD5 of an entire file and returns the lowercase hex digest.
pub fn file_md5(path: &Path) -> Result<String, TransferError> {
    let mut file = File::open(path).map_err(|source| TransferError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; IO_BUF_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(|source| TransferError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Computes MD5 of the `len` bytes starting at `offset`.
///
/// Partial reads are tolerated; hitting EOF before `len` bytes is an error.
pub fn range_md5(path: &Path, offset: u64, len: u64) -> Result<String, TransferError> {
    let mut file = File::open(path).map_err(|source| TransferError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    file.seek(SeekFrom::Start(offset))
        .map_err(|source| TransferError::Seek {
            path: path.to_path_buf(),
            source,
        })?;

    let mut hasher = Md5::new();
    let mut buf = [0u8; IO_BUF_SIZE];
    let mut remaining = len;
    while remaining > 0 {
        let want = remaining.min(IO_BUF_SIZE as u64) as usize;
        let n = file
            .read(&mut buf[..want])
            .map_err(|source| TransferError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        if n == 0 {
            return Err(TransferError::ShortRead {
                path: path.to_path_buf(),
                expected: len,
                actual: len - remaining,
            });
        }
        hasher.update(&buf[..n]);
        remaining -= n as u64;
    }
    Ok(hex::encode(hasher.finalize()))
}
