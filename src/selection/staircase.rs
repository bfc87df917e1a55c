//! Candidate sizes for channel counts and component counts

/// Up to this many channels every size is a candidate.
pub const MAX_ONE_BY_ONE_CHANNELS: usize = 30;
/// Up to this many channels candidates advance in steps of five.
pub const MAX_FIVE_BY_FIVE_CHANNELS: usize = 50;

/// Candidate sizes for `n_channels` channels.
///
/// `1..=C` when `C <= 30`, `1, 6, 11, ...` when `C <= 50`, `1, 11, 21, ...`
/// above that. In the stepped cases `C` is appended when it is not a multiple
/// of the step. Shared by hyperparameter grids and the feature selector.
pub fn staircase(n_channels: usize) -> Vec<usize> {
    if n_channels == 0 {
        return Vec::new();
    }
    if n_channels <= MAX_ONE_BY_ONE_CHANNELS {
        return (1..=n_channels).collect();
    }

    let step = if n_channels <= MAX_FIVE_BY_FIVE_CHANNELS { 5 } else { 10 };
    let mut candidates: Vec<usize> = (1..n_channels).step_by(step).collect();
    if n_channels % step != 0 {
        candidates.push(n_channels);
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_counts_are_exhaustive() {
        assert_eq!(staircase(20), (1..=20).collect::<Vec<_>>());
        assert_eq!(staircase(30).len(), 30);
        assert!(staircase(0).is_empty());
    }

    #[test]
    fn test_step_five() {
        assert_eq!(staircase(40), vec![1, 6, 11, 16, 21, 26, 31, 36]);
        assert_eq!(staircase(32), vec![1, 6, 11, 16, 21, 26, 31, 32]);
    }

    #[test]
    fn test_step_ten() {
        assert_eq!(staircase(100), vec![1, 11, 21, 31, 41, 51, 61, 71, 81, 91]);
        assert_eq!(staircase(64), vec![1, 11, 21, 31, 41, 51, 61, 64]);
    }
}
