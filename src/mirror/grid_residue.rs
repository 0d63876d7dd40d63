use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use std::{fmt::Display, fs::File, io::Write, path::Path};

use super::{MirrorError, Result};

/// Multiquadric radial basis function interpolant
#[derive(Debug, Clone)]
struct Multiquadric {
    x: Vec<f64>,
    y: Vec<f64>,
    weights: DVector<f64>,
    epsilon: f64,
}
impl Multiquadric {
    fn new(x: &[f64], y: &[f64], z: &[f64]) -> Result<Self> {
        let n = x.len();
        let extent = |v: &[f64]| {
            v.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
                - v.iter().cloned().fold(f64::INFINITY, f64::min)
        };
        // average node spacing of the bounding box
        let epsilon = (extent(x) * extent(y) / n as f64).sqrt();
        let epsilon = if epsilon > 0f64 { epsilon } else { 1f64 };
        let phi = |r: f64| ((r / epsilon).powi(2) + 1.).sqrt();
        let a = DMatrix::from_fn(n, n, |i, j| phi((x[i] - x[j]).hypot(y[i] - y[j])));
        let weights = a
            .lu()
            .solve(&DVector::from_column_slice(z))
            .ok_or(MirrorError::SingularInterpolation)?;
        Ok(Self {
            x: x.to_vec(),
            y: y.to_vec(),
            weights,
            epsilon,
        })
    }
    fn eval(&self, x: f64, y: f64) -> f64 {
        self.x
            .iter()
            .zip(&self.y)
            .zip(self.weights.iter())
            .map(|((xi, yi), w)| w * (((x - xi).hypot(y - yi) / self.epsilon).powi(2) + 1.).sqrt())
            .sum()
    }
}

/// Surface value and derivatives at a pixel of a [GridResidueMap]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GridSample {
    pub z: f64,
    pub dx: f64,
    pub dy: f64,
    pub dxdy: f64,
}

/**
Mirror residue sampled on a regular grid

The map covers the mirror outer diameter plus 2 pixels on each side: `n+4` pixels along
each axis with a pixel size of `2R/(n-1)`. The surface is interpolated with multiquadric
radial basis functions and the derivatives are computed with central finite differences.
Pixels outside the annulus (inner and outer radii scaled by the grid extension factor) are
set to 0.

Rows are written from the top (largest y) to the bottom of the grid.
*/
#[derive(Debug, Clone)]
pub struct GridResidueMap {
    pub n_pixel: usize,
    /// Pixel size in mm
    pub pixel_size: f64,
    /// Samples ordered by rows, `n_pixel x n_pixel`
    pub samples: Vec<GridSample>,
}
impl GridResidueMap {
    /// Samples the surface `z` at positions `(x,y)` (all in mm) on a `(n+4)x(n+4)` grid
    pub fn new(
        x: &[f64],
        y: &[f64],
        z: &[f64],
        inner_radius: f64,
        outer_radius: f64,
        n: usize,
    ) -> Result<Self> {
        if n < 2 {
            return Err(MirrorError::Shape {
                expected: "at least 2 grid pixels".into(),
                found: n.to_string(),
            });
        }
        let rbf = Multiquadric::new(x, y, z)?;
        let n_pixel = n + 4;
        let extension = (n_pixel - 1) as f64 / (n - 1) as f64;
        let pixel_size = 2. * outer_radius * extension / (n_pixel - 1) as f64;
        let min = -0.5 * (n_pixel - 1) as f64 * pixel_size;
        let eps = 1e-4 * pixel_size;
        let (r_min, r_max) = (inner_radius / extension, outer_radius * extension);
        log::info!(
            "sampling residue map on {n_pixel}x{n_pixel} pixels of {pixel_size:.3}mm from {} nodes",
            x.len()
        );
        let samples: Vec<GridSample> = (0..n_pixel * n_pixel)
            .into_par_iter()
            .map(|k| {
                let (j, i) = (k / n_pixel, k % n_pixel);
                let x = min + i as f64 * pixel_size;
                let y = -(min + j as f64 * pixel_size);
                let r = x.hypot(y);
                if r < r_min || r > r_max {
                    return GridSample::default();
                }
                let f = |x: f64, y: f64| rbf.eval(x, y);
                let d = 2. * eps;
                GridSample {
                    z: f(x, y),
                    dx: (f(x + eps, y) - f(x - eps, y)) / d,
                    dy: (f(x, y + eps) - f(x, y - eps)) / d,
                    dxdy: ((f(x + eps, y + eps) - f(x - eps, y + eps)) / d
                        - (f(x + eps, y - eps) - f(x - eps, y - eps)) / d)
                        / d,
                }
            })
            .collect();
        Ok(Self {
            n_pixel,
            pixel_size,
            samples,
        })
    }
    /// Writes the map to a file in the ray tracer surface map format
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let mut file = File::create(path)?;
        write!(file, "{self}")
    }
}

/// Formats a float as C `%.9E`: 2 digits exponent at least
pub(crate) fn sci(value: f64) -> String {
    let s = format!("{:.9E}", value);
    match s.split_once('E') {
        Some((mantissa, exponent)) => {
            let e: i32 = exponent.parse().unwrap_or(0);
            format!(
                "{}E{}{:02}",
                mantissa,
                if e < 0 { '-' } else { '+' },
                e.unsigned_abs()
            )
        }
        None => s,
    }
}

impl Display for GridResidueMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} {} {} {}",
            self.n_pixel,
            self.n_pixel,
            sci(self.pixel_size),
            sci(self.pixel_size)
        )?;
        for s in &self.samples {
            writeln!(
                f,
                "{} {} {} {}",
                sci(s.z),
                sci(s.dx),
                sci(s.dy),
                sci(s.dxdy)
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c_format() {
        assert_eq!(sci(1234.5), "1.234500000E+03");
        assert_eq!(sci(-2.5e-7), "-2.500000000E-07");
        assert_eq!(sci(0.), "0.000000000E+00");
    }

    fn plane() -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let mut xyz = (vec![], vec![], vec![]);
        for i in 0..15 {
            for j in 0..15 {
                let (x, y) = (-100. + i as f64 * 200. / 14., -100. + j as f64 * 200. / 14.);
                if x.hypot(y) <= 100. {
                    xyz.0.push(x);
                    xyz.1.push(y);
                    xyz.2.push(1e-3 * x + 2e-3 * y);
                }
            }
        }
        xyz
    }

    #[test]
    fn sampling() {
        let (x, y, z) = plane();
        let map = GridResidueMap::new(&x, &y, &z, 0., 100., 9).unwrap();
        assert_eq!(map.n_pixel, 13);
        assert_eq!(map.samples.len(), 169);
        assert!((map.pixel_size - 25.).abs() < 1e-12);
        // center pixel of the grid
        let c = map.samples[6 * 13 + 6];
        assert!(c.z.abs() < 1e-4);
        assert!((c.dx - 1e-3).abs() < 2e-4);
        assert!((c.dy - 2e-3).abs() < 2e-4);
        // corners are outside the annulus
        assert_eq!(map.samples[0], GridSample::default());
        // first rows are the top of the grid
        let top = map.samples[3 * 13 + 6];
        assert!((top.z - 0.15).abs() < 1e-2);
    }

    #[test]
    fn file_format() {
        let (x, y, z) = plane();
        let map = GridResidueMap::new(&x, &y, &z, 0., 100., 5).unwrap();
        let content = map.to_string();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("9 9 5.000000000E+01 5.000000000E+01"));
        assert_eq!(lines.count(), 81);
    }
}
