use super::HashAlgorithm;

/// Interleave `private` and `public` byte by byte; once the shorter input
/// runs out the longer one continues alone.
#[must_use]
pub fn cross_combined(private: &[u8], public: &[u8]) -> Vec<u8> {
    let mut combined = Vec::with_capacity(private.len() + public.len());
    for i in 0..private.len().max(public.len()) {
        if let Some(byte) = private.get(i) {
            combined.push(*byte);
        }
        if let Some(byte) = public.get(i) {
            combined.push(*byte);
        }
    }
    combined
}

/// Pick the hash algorithm and iteration count for a merged salt.
///
/// `index = (crc32(salt) % n) & (n - 1)`; iterations are
/// `(i32::MAX % (index + 1)) + 1`. Stored signatures depend on this exact
/// arithmetic, so it must not be simplified.
///
/// Returns `None` for an empty algorithm list.
#[must_use]
pub fn select_algorithm(salt: &[u8], algorithms: &[HashAlgorithm]) -> Option<(HashAlgorithm, u32)> {
    let size = u64::try_from(algorithms.len()).ok().filter(|n| *n > 0)?;
    let crc = u64::from(crc32fast::hash(salt));
    let index = (crc % size) & (size - 1);
    let iterations = (u64::from(i32::MAX.unsigned_abs()) % (index + 1)) + 1;
    let algorithm = *algorithms.get(usize::try_from(index).ok()?)?;
    Some((algorithm, u32::try_from(iterations).ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_interleaves_with_tail_continuation() {
        assert_eq!(
            cross_combined(&[1, 2, 3, 4], &[9, 8, 7, 6, 5, 4]),
            vec![1, 9, 2, 8, 3, 7, 4, 6, 5, 4]
        );
        assert_eq!(cross_combined(&[1, 2, 3], &[9]), vec![1, 9, 2, 3]);
        assert!(cross_combined(&[], &[]).is_empty());
    }

    #[test]
    fn selection_is_deterministic_and_in_range() {
        let algorithms = HashAlgorithm::defaults();
        let salt = cross_combined(b"iam-webfat", &[0xa3, 0xe0, 0xb3, 0x20]);
        let first = select_algorithm(&salt, &algorithms);
        assert_eq!(first, select_algorithm(&salt, &algorithms));
        assert!(first.is_some_and(|(algorithm, _)| algorithms.contains(&algorithm)));
        assert!(select_algorithm(&salt, &[]).is_none());
    }

    #[test]
    fn iterations_follow_selected_index() {
        // Any non-empty salt over a single algorithm lands on index 0.
        assert_eq!(
            select_algorithm(b"salt", &[HashAlgorithm::Sha256]),
            Some((HashAlgorithm::Sha256, 1))
        );

        // With four algorithms the iteration count is fixed per index:
        // MAX % 1 = 0, MAX % 2 = 1, MAX % 3 = 1, MAX % 4 = 3.
        let algorithms = HashAlgorithm::defaults();
        let expected = [1, 2, 2, 4];
        for seed in 0u8..64 {
            let salt = [seed, seed.wrapping_mul(7), 3];
            if let Some((algorithm, iterations)) = select_algorithm(&salt, &algorithms) {
                let index = algorithms
                    .iter()
                    .position(|a| *a == algorithm)
                    .unwrap_or_default();
                assert_eq!(iterations, expected[index]);
            }
        }
    }

    #[test]
    fn index_uses_crc_modulo_then_mask() {
        let algorithms = [
            HashAlgorithm::Md5,
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha384,
        ];
        let salt = b"fastcas";
        let crc = u64::from(crc32fast::hash(salt));
        let index = usize::try_from((crc % 3) & 2).unwrap_or_default();
        assert_eq!(
            select_algorithm(salt, &algorithms).map(|(a, _)| a),
            Some(algorithms[index])
        );
    }
}
