use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::checksum::{IO_BUF_SIZE, file_md5};
use crate::error::TransferError;

/// Temp artifact path for one chunk: `<dest>.chunk.<index>`.
pub fn chunk_artifact_path(dest: &Path, index: u32) -> PathBuf {
    let mut p = dest.as_os_str().to_os_string();
    p.push(format!(".chunk.{index}"));
    PathBuf::from(p)
}

/// Copies exactly `size` bytes from `source` at `offset` into the chunk's
/// temp artifact.
///
/// Partial reads are tolerated; EOF before `size` bytes is a short read. The
/// artifact is removed on any failure so a retry starts clean.
pub fn copy_chunk(
    source: &Path,
    artifact: &Path,
    offset: u64,
    size: u64,
) -> Result<(), TransferError> {
    let result = copy_chunk_inner(source, artifact, offset, size);
    if result.is_err() {
        let _ = std::fs::remove_file(artifact);
    }
    result
}

fn copy_chunk_inner(
    source: &Path,
    artifact: &Path,
    offset: u64,
    size: u64,
) -> Result<(), TransferError> {
    let mut src = File::open(source).map_err(|source_err| TransferError::Open {
        path: source.to_path_buf(),
        source: source_err,
    })?;
    src.seek(SeekFrom::Start(offset))
        .map_err(|source_err| TransferError::Seek {
            path: source.to_path_buf(),
            source: source_err,
        })?;

    let mut out = File::create(artifact).map_err(|source_err| TransferError::Open {
        path: artifact.to_path_buf(),
        source: source_err,
    })?;

    let mut buf = [0u8; IO_BUF_SIZE];
    let mut remaining = size;
    while remaining > 0 {
        let want = remaining.min(IO_BUF_SIZE as u64) as usize;
        let n = src
            .read(&mut buf[..want])
            .map_err(|source_err| TransferError::Read {
                path: source.to_path_buf(),
                source: source_err,
            })?;
        if n == 0 {
            return Err(TransferError::ShortRead {
                path: source.to_path_buf(),
                expected: size,
                actual: size - remaining,
            });
        }
        out.write_all(&buf[..n])
            .map_err(|source_err| TransferError::Write {
                path: artifact.to_path_buf(),
                source: source_err,
            })?;
        remaining -= n as u64;
    }

    Ok(())
}

/// Verifies a chunk's temp artifact: it must exist, hold exactly `size`
/// bytes, and (when `check_digest` is set) hash to `md5_hash`.
pub fn verify_artifact(
    artifact: &Path,
    size: u64,
    md5_hash: &str,
    check_digest: bool,
) -> Result<(), TransferError> {
    let meta = std::fs::metadata(artifact).map_err(|source| TransferError::Open {
        path: artifact.to_path_buf(),
        source,
    })?;
    if meta.len() != size {
        return Err(TransferError::SizeMismatch {
            path: artifact.to_path_buf(),
            expected: size,
            actual: meta.len(),
        });
    }

    if check_digest {
        let actual = file_md5(artifact)?;
        if actual != md5_hash {
            return Err(TransferError::ChecksumMismatch {
                path: artifact.to_path_buf(),
                expected: md5_hash.to_string(),
                actual,
            });
        }
    }

    Ok(())
}
