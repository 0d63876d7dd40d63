use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Square sampling grid of the telescope entrance pupil
///
/// The grid has `resolution` samples across the `diameter` (in meters) and a sample is
/// valid when it lies in the annulus `[obscuration * R, R]`, with `R` the pupil radius.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PupilGrid {
    pub resolution: usize,
    pub diameter: f64,
    pub obscuration: f64,
}
/// Default properties:
///  * resolution  : 255
///  * diameter    : 8.36m
///  * obscuration : 0.61
impl Default for PupilGrid {
    fn default() -> Self {
        Self {
            resolution: 255,
            diameter: 8.36,
            obscuration: 0.61,
        }
    }
}
impl PupilGrid {
    pub fn new(resolution: usize, diameter: f64) -> Self {
        Self {
            resolution,
            diameter,
            ..Default::default()
        }
    }
    pub fn obscuration(self, obscuration: f64) -> Self {
        Self {
            obscuration,
            ..self
        }
    }
    pub fn radius(&self) -> f64 {
        0.5 * self.diameter
    }
    /// Sampling step in meters
    pub fn step(&self) -> f64 {
        self.diameter / (self.resolution.max(2) - 1) as f64
    }
    /// Coordinates in meters of the sample `(i,j)`, `i` along x and `j` along y
    pub fn xy(&self, i: usize, j: usize) -> (f64, f64) {
        let d = self.step();
        (-self.radius() + i as f64 * d, -self.radius() + j as f64 * d)
    }
    /// Coordinates normalized to the pupil radius of the sample `(i,j)`
    pub fn normalized(&self, i: usize, j: usize) -> (f64, f64) {
        let (x, y) = self.xy(i, j);
        (x / self.radius(), y / self.radius())
    }
    pub fn is_valid(&self, i: usize, j: usize) -> bool {
        let (x, y) = self.normalized(i, j);
        let r = x.hypot(y);
        r <= 1. + 1e-12 && r >= self.obscuration - 1e-12
    }
    /// Pupil mask
    pub fn mask(&self) -> DMatrix<bool> {
        DMatrix::from_fn(self.resolution, self.resolution, |i, j| self.is_valid(i, j))
    }
    pub fn n_valid(&self) -> usize {
        self.mask().iter().filter(|&&m| m).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges() {
        let grid = PupilGrid::new(11, 2.);
        assert_eq!(grid.xy(0, 0), (-1., -1.));
        assert_eq!(grid.xy(10, 5), (1., 0.));
        assert!(grid.is_valid(10, 5));
        assert!(!grid.is_valid(0, 0));
        assert!(!grid.is_valid(5, 5));
        assert!(grid.obscuration(0.).is_valid(5, 5));
    }

    #[test]
    fn valid_fraction() {
        let grid = PupilGrid::new(201, 8.36);
        let f = grid.n_valid() as f64 / (201 * 201) as f64;
        let e = std::f64::consts::FRAC_PI_4 * (1. - 0.61 * 0.61);
        assert!((f - e).abs() < 1e-2, "{f} vs {e}");
    }
}
