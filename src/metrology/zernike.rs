use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use super::{MetrologyError, Result};

/// Zernike polynomial basis
///
/// The polynomials follow Noll ordering, starting at `j=1` (piston), and are orthonormal
/// over the unit disk: the radial coordinate is normalized by the pupil radius.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZernikeBasis {
    n_terms: usize,
}

/// Zernike least-squares fit
#[derive(Debug, Clone, Serialize)]
pub struct ZernikeFit {
    /// Zernike coefficients in the units of the fitted data
    pub coefficients: DVector<f64>,
    /// Data minus the Zernike reconstruction
    pub residual: Vec<f64>,
}
impl ZernikeFit {
    pub fn residual_rms(&self) -> f64 {
        let n = self.residual.len() as f64;
        (self.residual.iter().map(|x| x * x).sum::<f64>() / n).sqrt()
    }
}

/// Radial and azimuthal orders `(n,m)` of the Zernike polynomial with Noll index `j`
pub fn noll(j: usize) -> (usize, i32) {
    assert!(j > 0, "Noll index starts at 1");
    let mut n = 0;
    let mut j1 = j - 1;
    while j1 > n {
        n += 1;
        j1 -= n;
    }
    let m = (n % 2 + 2 * ((j1 + (n + 1) % 2) / 2)) as i32;
    if j % 2 == 0 {
        (n, m)
    } else {
        (n, -m)
    }
}

fn factorial(n: usize) -> f64 {
    (1..=n).fold(1f64, |a, k| a * k as f64)
}

fn radial(n: usize, m: usize, r: f64) -> f64 {
    (0..=(n - m) / 2)
        .map(|k| {
            let sign = if k % 2 == 0 { 1f64 } else { -1f64 };
            sign * factorial(n - k)
                / (factorial(k) * factorial((n + m) / 2 - k) * factorial((n - m) / 2 - k))
                * r.powi((n - 2 * k) as i32)
        })
        .sum()
}

/// Value of the Zernike polynomial `j` at polar coordinates `(r,o)`
pub fn zernike(j: usize, r: f64, o: f64) -> f64 {
    let (n, m) = noll(j);
    let am = m.unsigned_abs() as usize;
    let rnm = radial(n, am, r);
    match m {
        0 => ((n + 1) as f64).sqrt() * rnm,
        m if m > 0 => (2. * (n + 1) as f64).sqrt() * rnm * (am as f64 * o).cos(),
        _ => (2. * (n + 1) as f64).sqrt() * rnm * (am as f64 * o).sin(),
    }
}

impl ZernikeBasis {
    /// Basis with the first `n_terms` Noll polynomials
    pub fn new(n_terms: usize) -> Self {
        Self { n_terms }
    }
    pub fn n_terms(&self) -> usize {
        self.n_terms
    }
    /// Matrix of the polynomials (one column per term) evaluated at the normalized coordinates
    pub fn matrix(&self, x: &[f64], y: &[f64]) -> DMatrix<f64> {
        DMatrix::from_fn(x.len(), self.n_terms, |i, j| {
            let (r, o) = (x[i].hypot(y[i]), y[i].atan2(x[i]));
            zernike(j + 1, r, o)
        })
    }
    /// Zernike surface with coefficients `c` at the normalized coordinates `(x,y)`
    pub fn evaluate(&self, c: &[f64], x: f64, y: f64) -> f64 {
        let (r, o) = (x.hypot(y), y.atan2(x));
        c.iter()
            .take(self.n_terms)
            .enumerate()
            .map(|(j, c)| c * zernike(j + 1, r, o))
            .sum()
    }
    /// Zernike surface with coefficients `c` at the normalized coordinates
    pub fn reconstruct(&self, c: &[f64], x: &[f64], y: &[f64]) -> Vec<f64> {
        x.iter().zip(y).map(|(x, y)| self.evaluate(c, *x, *y)).collect()
    }
    /// Least-squares fit of the basis to the data `z` sampled at the normalized coordinates `(x,y)`
    pub fn fit(&self, x: &[f64], y: &[f64], z: &[f64]) -> Result<ZernikeFit> {
        if self.n_terms == 0 {
            return Err(MetrologyError::EmptyBasis);
        }
        if x.len() != z.len() || y.len() != z.len() {
            return Err(MetrologyError::Shape(x.len(), y.len(), z.len()));
        }
        if z.len() < self.n_terms {
            return Err(MetrologyError::InsufficientSampling {
                valid: z.len(),
                required: self.n_terms,
            });
        }
        let a = self.matrix(x, y);
        let b = DVector::from_column_slice(z);
        let coefficients = a
            .clone()
            .svd(true, true)
            .solve(&b, 1e-12)
            .map_err(|e| MetrologyError::Singular(e.to_string()))?;
        let residual = (b - a * &coefficients).as_slice().to_vec();
        Ok(ZernikeFit {
            coefficients,
            residual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(n: usize) -> (Vec<f64>, Vec<f64>) {
        let mut x = vec![];
        let mut y = vec![];
        for i in 0..n {
            for j in 0..n {
                let u = -1. + 2. * i as f64 / (n - 1) as f64;
                let v = -1. + 2. * j as f64 / (n - 1) as f64;
                if u.hypot(v) <= 1. {
                    x.push(u);
                    y.push(v);
                }
            }
        }
        (x, y)
    }

    #[test]
    fn noll_ordering() {
        let nm: Vec<_> = (1..=11).map(noll).collect();
        assert_eq!(
            nm,
            vec![
                (0, 0),
                (1, 1),
                (1, -1),
                (2, 0),
                (2, -2),
                (2, 2),
                (3, -1),
                (3, 1),
                (3, -3),
                (3, 3),
                (4, 0)
            ]
        );
    }

    #[test]
    fn focus() {
        // Z4 = sqrt(3)(2r^2-1)
        assert!((zernike(4, 1., 0.3) - 3f64.sqrt()).abs() < 1e-12);
        assert!((zernike(4, 0., 0.) + 3f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn orthonormality() {
        let (x, y) = samples(401);
        let basis = ZernikeBasis::new(6);
        let a = basis.matrix(&x, &y);
        let g = a.transpose() * &a / x.len() as f64;
        for i in 0..6 {
            for j in 0..6 {
                let e = if i == j { 1. } else { 0. };
                assert!((g[(i, j)] - e).abs() < 2e-2, "({i},{j}): {}", g[(i, j)]);
            }
        }
    }

    #[test]
    fn fit_is_idempotent() {
        let (x, y) = samples(41);
        let basis = ZernikeBasis::new(15);
        let c: Vec<f64> = (0..15).map(|i| (i as f64 * 0.37).sin()).collect();
        let z = basis.reconstruct(&c, &x, &y);
        let fit = basis.fit(&x, &y, &z).unwrap();
        let z2 = basis.reconstruct(fit.coefficients.as_slice(), &x, &y);
        let refit = basis.fit(&x, &y, &z2).unwrap();
        assert!((&fit.coefficients - &refit.coefficients).norm() < 1e-9);
        assert!(fit.residual_rms() < 1e-9);
        assert!((fit.coefficients - DVector::from_vec(c)).norm() < 1e-9);
    }

    #[test]
    fn insufficient_sampling() {
        let basis = ZernikeBasis::new(10);
        let z = vec![0.; 5];
        assert!(matches!(
            basis.fit(&z, &z, &z),
            Err(MetrologyError::InsufficientSampling {
                valid: 5,
                required: 10
            })
        ));
    }

    #[test]
    fn empty_basis() {
        let (x, y) = samples(11);
        let z = vec![0.; x.len()];
        assert!(matches!(
            ZernikeBasis::new(0).fit(&x, &y, &z),
            Err(MetrologyError::EmptyBasis)
        ));
    }
}
