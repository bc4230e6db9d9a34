// src/utils.rs
// Utility functions for the Terra balance SDK

/// Splits an ordered slice into consecutive chunks of at most `size` items.
/// Order is preserved and only the last chunk may be shorter.
///
/// `size` must be positive; callers validate it through `Settings::validate`.
pub fn chunk_items<T: Clone>(items: &[T], size: usize) -> Vec<Vec<T>> {
    assert!(size > 0, "chunk size must be positive");
    let mut chunks = Vec::with_capacity(items.len().div_ceil(size));
    let mut start = 0;
    while start < items.len() {
        let end = std::cmp::min(start + size, items.len());
        chunks.push(items[start..end].to_vec());
        start = end;
    }
    chunks
}

/// Milliseconds since the unix epoch, the timestamp convention used by cache entries.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_sizes() {
        let items: Vec<u32> = (0..120).collect();
        let chunks = chunk_items(&items, 49);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![49, 49, 22]);
    }

    #[test]
    fn test_chunk_flatten_round_trip() {
        for len in [0usize, 1, 48, 49, 50, 98, 99, 131] {
            let items: Vec<String> = (0..len).map(|i| format!("terra1token{i}")).collect();
            for size in [1usize, 3, 49] {
                let flattened: Vec<String> =
                    chunk_items(&items, size).into_iter().flatten().collect();
                assert_eq!(flattened, items, "len={len} size={size}");
            }
        }
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        let items: Vec<u8> = Vec::new();
        assert!(chunk_items(&items, 49).is_empty());
    }

    #[test]
    #[should_panic]
    fn test_zero_size_panics() {
        chunk_items(&[1, 2, 3], 0);
    }
}
