//! # Result Validation
//!
//! Recomputes the sum sequentially and compares it with what the host pool
//! and the device produced. Stops at the first mismatch.

use crate::error::{CoprocError, Result};

/// Recompute `expected[i] = a[i] + b[i]` and check `actual` against it.
///
/// Returns `CoprocError::Validation` carrying the first offending index.
pub fn validate(a: &[i32], b: &[i32], expected: &mut [i32], actual: &[i32]) -> Result<()> {
    let n = actual.len();
    if a.len() != n || b.len() != n || expected.len() != n {
        return Err(CoprocError::Configuration(format!(
            "validation buffers differ in length: a={} b={} expected={} actual={}",
            a.len(),
            b.len(),
            expected.len(),
            n
        )));
    }

    for ((e, &a), &b) in expected.iter_mut().zip(a).zip(b) {
        *e = a.wrapping_add(b);
    }

    match expected.iter().zip(actual).position(|(e, a)| e != a) {
        Some(index) => {
            tracing::error!(
                "Vector add failed at index {}: expected {}, got {}",
                index,
                expected[index],
                actual[index]
            );
            Err(CoprocError::Validation {
                index,
                expected: expected[index],
                actual: actual[index],
            })
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Vec<i32> {
        (0..n as i32).collect()
    }

    #[test]
    fn test_accepts_correct_sum() {
        let a = ramp(64);
        let b = ramp(64);
        let actual: Vec<i32> = a.iter().map(|v| v * 2).collect();
        let mut expected = vec![0; 64];
        assert!(validate(&a, &b, &mut expected, &actual).is_ok());
        assert_eq!(expected, actual);
    }

    #[test]
    fn test_reports_tampered_index() {
        let a = ramp(64);
        let b = ramp(64);
        let mut actual: Vec<i32> = a.iter().map(|v| v * 2).collect();
        actual[7] += 1;
        actual[20] += 1;

        let mut expected = vec![0; 64];
        match validate(&a, &b, &mut expected, &actual) {
            Err(CoprocError::Validation {
                index,
                expected,
                actual,
            }) => {
                assert_eq!(index, 7);
                assert_eq!(expected, 14);
                assert_eq!(actual, 15);
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_stale_baseline_is_recomputed() {
        let a = ramp(4);
        let b = ramp(4);
        let actual = vec![0, 2, 4, 6];
        let mut expected = vec![99; 4];
        assert!(validate(&a, &b, &mut expected, &actual).is_ok());
    }

    #[test]
    fn test_length_mismatch() {
        let mut expected = vec![0; 3];
        assert!(matches!(
            validate(&[1, 2, 3], &[1, 2, 3], &mut expected, &[2, 4]),
            Err(CoprocError::Configuration(_))
        ));
    }
}
