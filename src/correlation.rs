// correlation.rs - Spatial correlation <a[0] a*[x]> with jackknife error bars

use num_complex::Complex64;

use crate::error::{Result, SqmError};
use crate::fortran_io::Sample;

/// Correlation function and its jackknife error, one entry per lattice offset.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationSeries {
    pub mean: Vec<f64>,
    pub err: Vec<f64>,
}

impl CorrelationSeries {
    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    /// Value and error at the lattice midpoint `nx / 2`.
    pub fn midpoint(&self) -> (f64, f64) {
        let mid = self.len() / 2;
        (self.mean[mid], self.err[mid])
    }
}

/// Jackknife mean and standard error of the sample mean, O(N).
///
/// Leave-one-out means are `(total - v_i) / (N - 1)`; the error is
/// `sqrt((N - 1) * mean_i (jk_i - total/N)^2)`. Needs at least two values.
pub fn jackknife(values: &[f64]) -> Result<(f64, f64)> {
    let n = values.len();
    if n < 2 {
        return Err(SqmError::Statistical(format!(
            "jackknife needs at least 2 samples, got {n}"
        )));
    }
    let nf = n as f64;
    let total: f64 = values.iter().sum();
    let grand = total / nf;
    let var = values
        .iter()
        .map(|&v| {
            let jk = (total - v) / (nf - 1.0);
            (jk - grand).powi(2)
        })
        .sum::<f64>()
        / nf;
    Ok((grand, ((nf - 1.0) * var).sqrt()))
}

/// `Re(a[0] * a_ast[x])` for every sample, i.e. the time series at offset `x`.
pub fn offset_series(a_list: &[&[Complex64]], a_ast_list: &[&[Complex64]], x: usize) -> Vec<f64> {
    a_list
        .iter()
        .zip(a_ast_list)
        .map(|(a, a_ast)| (a[0] * a_ast[x]).re)
        .collect()
}

/// Correlation function over all offsets `0..nx`.
pub fn compute_correlation(
    a_list: &[&[Complex64]],
    a_ast_list: &[&[Complex64]],
    nx: usize,
) -> Result<CorrelationSeries> {
    if a_list.len() != a_ast_list.len() {
        return Err(SqmError::Format(format!(
            "a and a_ast sample counts differ ({} vs {})",
            a_list.len(),
            a_ast_list.len()
        )));
    }
    if let Some(short) = a_list.iter().chain(a_ast_list).find(|v| v.len() < nx) {
        return Err(SqmError::Format(format!(
            "sample vector of length {} shorter than Nx={nx}",
            short.len()
        )));
    }

    let mut mean = Vec::with_capacity(nx);
    let mut err = Vec::with_capacity(nx);
    for x in 0..nx {
        let (m, e) = jackknife(&offset_series(a_list, a_ast_list, x))?;
        mean.push(m);
        err.push(e);
    }
    Ok(CorrelationSeries { mean, err })
}

/// Convenience wrapper over decoded samples.
pub fn correlation_from_samples(samples: &[Sample], nx: usize) -> Result<CorrelationSeries> {
    let (a, a_ast) = split_fields(samples);
    compute_correlation(&a, &a_ast, nx)
}

/// Midpoint correlation `Re(a[0] * a_ast[nx/2])` across all samples.
pub fn midpoint_series(samples: &[Sample], nx: usize) -> Vec<f64> {
    let (a, a_ast) = split_fields(samples);
    offset_series(&a, &a_ast, nx / 2)
}

fn split_fields(samples: &[Sample]) -> (Vec<&[Complex64]>, Vec<&[Complex64]>) {
    samples
        .iter()
        .map(|s| (s.a.as_slice(), s.a_ast.as_slice()))
        .unzip()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jackknife_single_value_is_an_error() {
        assert!(matches!(jackknife(&[1.0]), Err(SqmError::Statistical(_))));
        assert!(jackknife(&[]).is_err());
    }

    #[test]
    fn correlation_of_real_fields() {
        // a[0] = 2, a_ast[x] = x + 1 for every sample: corr(x) = 2(x+1), err = 0
        let samples: Vec<Sample> = (0..3)
            .map(|_| Sample {
                a: vec![Complex64::new(2.0, 0.0); 4],
                a_ast: (0..4).map(|x| Complex64::new(x as f64 + 1.0, 0.0)).collect(),
            })
            .collect();
        let c = correlation_from_samples(&samples, 4).unwrap();
        assert_eq!(c.mean, vec![2.0, 4.0, 6.0, 8.0]);
        assert!(c.err.iter().all(|&e| e == 0.0));
        assert_eq!(c.midpoint(), (6.0, 0.0));
    }

    #[test]
    fn imaginary_parts_contribute_through_the_product() {
        // (i) * (i) = -1
        let samples = vec![
            Sample { a: vec![Complex64::new(0.0, 1.0)], a_ast: vec![Complex64::new(0.0, 1.0)] };
            2
        ];
        let c = correlation_from_samples(&samples, 1).unwrap();
        assert_eq!(c.mean, vec![-1.0]);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let a = [Complex64::new(1.0, 0.0)];
        let a_list: Vec<&[Complex64]> = vec![&a, &a];
        let a_ast_list: Vec<&[Complex64]> = vec![&a];
        assert!(compute_correlation(&a_list, &a_ast_list, 1).is_err());
        assert!(compute_correlation(&a_list, &a_list, 2).is_err());
    }
}
