use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

use super::{PhaseScreen, PupilGrid, ZernikeBasis};

/// Field point in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldPoint {
    pub x: f64,
    pub y: f64,
}
impl FieldPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
    /// Radial field angle in degrees
    pub fn radius(&self) -> f64 {
        self.x.hypot(self.y)
    }
}
impl Display for FieldPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:+.3},{:+.3})deg", self.x, self.y)
    }
}

/// A system that provides the optical path difference across the pupil for a field point
pub trait OpdSource {
    /// OPD in microns at pupil coordinates `(x,y)` in meters, `None` if the ray is vignetted
    fn opd(&self, field: &FieldPoint, x: f64, y: f64) -> Option<f64>;
}
impl<F> OpdSource for F
where
    F: Fn(&FieldPoint, f64, f64) -> Option<f64>,
{
    fn opd(&self, field: &FieldPoint, x: f64, y: f64) -> Option<f64> {
        self(field, x, y)
    }
}

/// Wavefront described by Zernike coefficients (in microns) over a pupil of radius `radius`
#[derive(Debug, Clone, PartialEq)]
pub struct ZernikeWavefront {
    pub coefficients: Vec<f64>,
    pub radius: f64,
}
impl ZernikeWavefront {
    pub fn new(coefficients: Vec<f64>, radius: f64) -> Self {
        Self {
            coefficients,
            radius,
        }
    }
}
impl OpdSource for ZernikeWavefront {
    fn opd(&self, _field: &FieldPoint, x: f64, y: f64) -> Option<f64> {
        let basis = ZernikeBasis::new(self.coefficients.len());
        Some(basis.evaluate(&self.coefficients, x / self.radius, y / self.radius))
    }
}

/// Optical path difference map of a field point
#[derive(Debug, Clone, Serialize)]
pub struct OpdMap {
    pub field: FieldPoint,
    /// Wavelength in microns
    pub wavelength: f64,
    pub grid: PupilGrid,
    /// OPD in microns, 0 where `mask` is false
    pub values: DMatrix<f64>,
    pub mask: DMatrix<bool>,
}
impl OpdMap {
    /// Samples the OPD of `source` over the pupil `grid`
    pub fn sample<S: OpdSource + ?Sized>(
        source: &S,
        field: FieldPoint,
        wavelength: f64,
        grid: PupilGrid,
    ) -> Self {
        let n = grid.resolution;
        let mut mask = grid.mask();
        let values = DMatrix::from_fn(n, n, |i, j| {
            if !mask[(i, j)] {
                return 0f64;
            }
            let (x, y) = grid.xy(i, j);
            match source.opd(&field, x, y) {
                Some(v) if v.is_finite() => v,
                _ => {
                    mask[(i, j)] = false;
                    0f64
                }
            }
        });
        Self {
            field,
            wavelength,
            grid,
            values,
            mask,
        }
    }
    /// Creates a map from OPD values, non finite values are masked
    pub fn from_values(
        field: FieldPoint,
        wavelength: f64,
        grid: PupilGrid,
        values: DMatrix<f64>,
    ) -> Self {
        let mut mask = grid.mask();
        mask.iter_mut()
            .zip(values.iter())
            .for_each(|(m, v)| *m &= v.is_finite());
        let values = values.zip_map(&mask, |v, m| if m { v } else { 0f64 });
        Self {
            field,
            wavelength,
            grid,
            values,
            mask,
        }
    }
    pub fn n_valid(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }
    /// Normalized coordinates and values of the valid samples
    pub fn valid_samples(&self) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let n = self.grid.resolution;
        let mut xyz = (vec![], vec![], vec![]);
        for j in 0..n {
            for i in 0..n {
                if self.mask[(i, j)] {
                    let (x, y) = self.grid.normalized(i, j);
                    xyz.0.push(x);
                    xyz.1.push(y);
                    xyz.2.push(self.values[(i, j)]);
                }
            }
        }
        xyz
    }
    /// Adds the phase screen OPD to the valid samples
    pub fn perturb(&mut self, screen: &PhaseScreen) {
        let n = self.grid.resolution;
        for j in 0..n {
            for i in 0..n {
                if self.mask[(i, j)] {
                    let (x, y) = self.grid.xy(i, j);
                    self.values[(i, j)] += screen.opd(x, y);
                }
            }
        }
    }
    /// Mean and standard deviation of the OPD over the valid samples
    pub fn stats(&self) -> (f64, f64) {
        let (_, _, z) = self.valid_samples();
        if z.is_empty() {
            return (0f64, 0f64);
        }
        let n = z.len() as f64;
        let mean = z.iter().sum::<f64>() / n;
        let std = (z.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt();
        (mean, std)
    }
    /// Wavefront error RMS in microns (piston removed)
    pub fn rms(&self) -> f64 {
        self.stats().1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vignetting() {
        let grid = PupilGrid::new(21, 2.).obscuration(0.);
        let source = |_: &FieldPoint, x: f64, _y: f64| if x > 0. { Some(1.) } else { None };
        let map = OpdMap::sample(&source, FieldPoint::default(), 0.5, grid);
        assert!(map.n_valid() < grid.n_valid());
        assert_eq!(map.stats(), (1., 0.));
    }

    #[test]
    fn tilt_rms() {
        let grid = PupilGrid::new(101, 2.).obscuration(0.);
        let source = ZernikeWavefront::new(vec![0., 0.1], 1.);
        let map = OpdMap::sample(&source, FieldPoint::default(), 0.5, grid);
        assert!((map.rms() - 0.1).abs() < 5e-3);
    }
}
