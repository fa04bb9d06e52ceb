//! 分片规划：纯函数，不持有状态

use std::collections::BTreeSet;
use std::ops::Range;
use super::errors::{Result, UploadError};

/// ceil(file_size / chunk_size)
pub fn total_chunks(file_size: u64, chunk_size: u64) -> Result<u64> {
    if chunk_size == 0 {
        return Err(UploadError::invalid_config("chunk_size must be greater than 0"));
    }

    Ok(file_size.div_ceil(chunk_size))
}

/// 第 index 个分片的字节范围，范围为空表示没有更多分片
pub fn chunk_range(index: u64, file_size: u64, chunk_size: u64) -> Option<Range<u64>> {
    let start = index.checked_mul(chunk_size)?;
    let end = start.saturating_add(chunk_size).min(file_size);

    if end <= start {
        return None;
    }

    Some(start..end)
}

/// [0, total) 中最小的未上传分片
pub fn next_pending_index(uploaded: &BTreeSet<u64>, total: u64) -> Option<u64> {
    (0..total).find(|index| !uploaded.contains(index))
}

/// 升序取最多 limit 个未上传分片
pub fn pending_window(uploaded: &BTreeSet<u64>, total: u64, limit: usize) -> Vec<u64> {
    (0..total)
        .filter(|index| !uploaded.contains(index))
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_chunks() {
        assert_eq!(total_chunks(10_000_000, 1_000_000).unwrap(), 10);
        assert_eq!(total_chunks(10_000_001, 1_000_000).unwrap(), 11);
        assert_eq!(total_chunks(1, 1_000_000).unwrap(), 1);
        assert_eq!(total_chunks(0, 1_000_000).unwrap(), 0);
        assert!(matches!(total_chunks(100, 0), Err(UploadError::InvalidConfig(_))));
    }

    #[test]
    fn test_ranges_cover_file_without_gaps() {
        for file_size in [0u64, 1, 7, 999, 1000, 1001, 4096, 65_537] {
            for chunk_size in [1u64, 3, 512, 1000, 4096, 100_000] {
                let total = total_chunks(file_size, chunk_size).unwrap();
                let mut cursor = 0;

                for index in 0..total {
                    let range = chunk_range(index, file_size, chunk_size).unwrap();
                    assert_eq!(range.start, cursor, "gap at {} ({}/{})", index, file_size, chunk_size);
                    assert!(range.end > range.start);
                    cursor = range.end;
                }

                assert_eq!(cursor, file_size);
                assert!(chunk_range(total, file_size, chunk_size).is_none());
            }
        }
    }

    #[test]
    fn test_last_chunk_is_partial() {
        let range = chunk_range(9, 9_500_000, 1_000_000).unwrap();
        assert_eq!(range, 9_000_000..9_500_000);
    }

    #[test]
    fn test_next_pending_index() {
        let uploaded: BTreeSet<u64> = [0, 1, 2].into_iter().collect();
        assert_eq!(next_pending_index(&uploaded, 5), Some(3));

        let gaps: BTreeSet<u64> = [0, 2, 3].into_iter().collect();
        assert_eq!(next_pending_index(&gaps, 5), Some(1));

        let all: BTreeSet<u64> = (0..5).collect();
        assert_eq!(next_pending_index(&all, 5), None);
        assert_eq!(next_pending_index(&BTreeSet::new(), 0), None);
    }

    #[test]
    fn test_pending_window_is_ascending() {
        let uploaded: BTreeSet<u64> = [1, 3].into_iter().collect();
        assert_eq!(pending_window(&uploaded, 8, 3), vec![0, 2, 4]);
        assert_eq!(pending_window(&uploaded, 3, 10), vec![0, 2]);
    }
}
