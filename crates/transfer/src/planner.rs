use std::path::Path;

use crate::checksum::range_md5;
use crate::error::TransferError;

/// One planned chunk: a contiguous byte range of the source plus the digest
/// it must hash to after the copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpec {
    pub index: u32,
    pub offset: u64,
    /// Actual byte count; the final chunk holds the remainder.
    pub size: u64,
    /// Hex MD5 of the source byte range.
    pub md5_hash: String,
}

/// Splits a source file into an ordered chunk list.
///
/// Offsets increase monotonically from 0 and cover the file contiguously; all
/// chunks have the nominal `chunk_size` except the last, which holds the
/// remainder. Each chunk's MD5 is computed over its range in the source, so
/// planning is deterministic for a given `(content, chunk_size)`. A zero-size
/// file plans to zero chunks.
pub fn plan_chunks(
    source: &Path,
    file_size: u64,
    chunk_size: u64,
) -> Result<Vec<ChunkSpec>, TransferError> {
    let mut chunks = Vec::with_capacity(file_size.div_ceil(chunk_size.max(1)) as usize);
    let mut offset = 0u64;
    let mut index = 0u32;

    while offset < file_size {
        let size = chunk_size.min(file_size - offset);
        let md5_hash = range_md5(source, offset, size)?;
        chunks.push(ChunkSpec {
            index,
            offset,
            size,
            md5_hash,
        });
        offset += size;
        index += 1;
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::bytes_md5;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, data: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join("src.bin");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    #[test]
    fn chunks_cover_the_file_contiguously() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let path = write_file(&dir, &data);

        let chunks = plan_chunks(&path, 10_000, 4_096).unwrap();
        assert_eq!(chunks.len(), 3);

        let mut expected_offset = 0;
        for chunk in &chunks {
            assert_eq!(chunk.offset, expected_offset);
            expected_offset += chunk.size;
        }
        assert_eq!(expected_offset, 10_000);
        assert_eq!(chunks[2].size, 10_000 - 2 * 4_096);
    }

    #[test]
    fn digests_match_the_source_ranges() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let path = write_file(&dir, &data);

        let chunks = plan_chunks(&path, 10_000, 4_096).unwrap();
        for chunk in &chunks {
            let range = &data[chunk.offset as usize..(chunk.offset + chunk.size) as usize];
            assert_eq!(chunk.md5_hash, bytes_md5(range));
        }
    }

    #[test]
    fn exact_multiple_keeps_full_final_chunk() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, &[7u8; 8_192]);
        let chunks = plan_chunks(&path, 8_192, 4_096).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].size, 4_096);
    }

    #[test]
    fn small_file_is_a_single_chunk() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, b"tiny");
        let chunks = plan_chunks(&path, 4, 4_096).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].offset, 0);
        assert_eq!(chunks[0].size, 4);
    }

    #[test]
    fn zero_size_file_plans_no_chunks() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, b"");
        assert!(plan_chunks(&path, 0, 4_096).unwrap().is_empty());
    }

    #[test]
    fn planning_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let data = vec![0x41u8; 9_000];
        let path = write_file(&dir, &data);
        let a = plan_chunks(&path, 9_000, 1_024).unwrap();
        let b = plan_chunks(&path, 9_000, 1_024).unwrap();
        assert_eq!(a, b);
    }
}
