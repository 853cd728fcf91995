// src/utils.rs
// Utility functions for the route engine

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Milliseconds elapsed since `timestamp_ms`, saturating at zero for future timestamps.
pub fn age_millis(timestamp_ms: u64, now_ms: u64) -> u64 {
    now_ms.saturating_sub(timestamp_ms)
}

/// Builds ordered (a, b) seed pairs in both directions from a ranked token list.
pub fn directed_pairs<T: Copy + PartialEq>(tokens: &[T], cap: usize) -> Vec<(T, T)> {
    let mut pairs = Vec::new();
    'outer: for (i, a) in tokens.iter().enumerate() {
        for (j, b) in tokens.iter().enumerate() {
            if i == j {
                continue;
            }
            if pairs.len() >= cap {
                break 'outer;
            }
            pairs.push((*a, *b));
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directed_pairs_cover_both_directions() {
        let pairs = directed_pairs(&[1, 2, 3], 100);
        assert_eq!(pairs.len(), 6);
        assert!(pairs.contains(&(1, 2)));
        assert!(pairs.contains(&(2, 1)));
    }

    #[test]
    fn test_directed_pairs_respect_cap() {
        let tokens: Vec<u32> = (0..20).collect();
        assert_eq!(directed_pairs(&tokens, 200).len(), 200);
    }

    #[test]
    fn test_age_saturates() {
        assert_eq!(age_millis(2_000, 1_000), 0);
        assert_eq!(age_millis(1_000, 2_500), 1_500);
    }
}
