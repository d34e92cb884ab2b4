//! Successive-difference contrast matrices.
//!
//! A cumulative-sum contrast maps n-1 free innovations to n level effects
//! whose increments are exactly those innovations and whose first value is
//! zero. The separate global baseline parameter absorbs the mean level,
//! which keeps both the weekday effects and the latent trend identifiable.

use crate::error::{DemandError, Result};

/// Build the n_levels x (n_levels - 1) successive-difference contrast matrix.
///
/// Row `i` selects the first `i` innovations, so multiplying by an
/// innovation vector yields its cumulative sum prefixed with zero.
pub fn successive_difference_contrasts(n_levels: usize) -> Result<Vec<Vec<f64>>> {
    if n_levels < 2 {
        return Err(DemandError::InvalidParameter(format!(
            "contrast basis requires at least 2 levels, got {n_levels}"
        )));
    }
    Ok((0..n_levels)
        .map(|i| {
            (0..n_levels - 1)
                .map(|j| if j < i { 1.0 } else { 0.0 })
                .collect()
        })
        .collect())
}

/// Multiply the successive-difference contrast by an innovation vector
/// without materializing the matrix.
///
/// Returns the length n+1 trajectory `[0, v0, v0+v1, ...]`.
pub fn cumulative_trajectory(innovations: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(innovations.len() + 1);
    out.push(0.0);
    let mut acc = 0.0;
    for &v in innovations {
        acc += v;
        out.push(acc);
    }
    out
}

/// Adjoint of [`cumulative_trajectory`]: scatter a gradient with respect to
/// the trajectory back onto the innovations.
///
/// Innovation `j` feeds every trajectory value after index `j`, so its
/// gradient is the suffix sum of the trajectory gradient.
pub fn cumulative_trajectory_adjoint(trajectory_grad: &[f64]) -> Vec<f64> {
    let n = trajectory_grad.len();
    if n <= 1 {
        return Vec::new();
    }
    let mut out = vec![0.0; n - 1];
    let mut acc = 0.0;
    for j in (0..n - 1).rev() {
        acc += trajectory_grad[j + 1];
        out[j] = acc;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn matvec(m: &[Vec<f64>], v: &[f64]) -> Vec<f64> {
        m.iter()
            .map(|row| row.iter().zip(v).map(|(a, b)| a * b).sum())
            .collect()
    }

    #[test]
    fn contrast_has_expected_shape() {
        let m = successive_difference_contrasts(7).unwrap();
        assert_eq!(m.len(), 7);
        assert!(m.iter().all(|row| row.len() == 6));
    }

    #[test]
    fn contrast_first_row_is_zero() {
        let m = successive_difference_contrasts(5).unwrap();
        assert!(m[0].iter().all(|&x| x == 0.0));
    }

    #[test]
    fn trajectory_increments_reconstruct_innovations() {
        let m = successive_difference_contrasts(6).unwrap();
        let v = [0.5, -1.2, 3.0, 0.0, -0.7];
        let traj = matvec(&m, &v);
        assert_relative_eq!(traj[0], 0.0, epsilon = 1e-15);
        for i in 1..traj.len() {
            assert_relative_eq!(traj[i] - traj[i - 1], v[i - 1], epsilon = 1e-12);
        }
    }

    #[test]
    fn cumulative_trajectory_matches_matrix_product() {
        let v = [1.0, 2.0, -0.5];
        let m = successive_difference_contrasts(4).unwrap();
        assert_eq!(cumulative_trajectory(&v), matvec(&m, &v));
    }

    #[test]
    fn contrast_rejects_degenerate_level_count() {
        assert!(successive_difference_contrasts(0).is_err());
        assert!(successive_difference_contrasts(1).is_err());
    }

    #[test]
    fn adjoint_matches_transpose_product() {
        let g = [0.3, -1.0, 2.0, 0.5];
        let m = successive_difference_contrasts(4).unwrap();
        // M^T g computed explicitly.
        let expected: Vec<f64> = (0..3)
            .map(|j| (0..4).map(|i| m[i][j] * g[i]).sum())
            .collect();
        let got = cumulative_trajectory_adjoint(&g);
        for (a, b) in got.iter().zip(&expected) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn adjoint_of_single_value_is_empty() {
        assert!(cumulative_trajectory_adjoint(&[1.0]).is_empty());
    }
}
