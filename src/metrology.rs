//!
//! # Wavefront metrology
//!
//! Samples the optical path difference (OPD) of a set of field points over the pupil and
//! decomposes each OPD map on a Zernike basis.
//!
//! ```
//! use telesim::{Builder, FromBuilder, OpdMetrology, PupilGrid};
//! use telesim::metrology::ZernikeWavefront;
//!
//! let metrology = OpdMetrology::builder()
//!     .pupil(PupilGrid::new(65, 8.36))
//!     .n_zernike(11)
//!     .build()
//!     .unwrap();
//! let wavefront = ZernikeWavefront::new(vec![0., 0., 0., 0.2], 4.18);
//! for field in metrology.measure(&wavefront) {
//!     let field = field.unwrap();
//!     assert!((field.zernike[3] - 0.2).abs() < 1e-9);
//! }
//! ```

use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use std::{fs::File, path::Path};

mod atmosphere;
mod opd;
mod pupil;
pub mod zernike;

pub use atmosphere::{AtmosphereBuilder, AtmosphereBuilderError, PhaseScreen};
pub use opd::{FieldPoint, OpdMap, OpdSource, ZernikeWavefront};
pub use pupil::PupilGrid;
pub use zernike::{ZernikeBasis, ZernikeFit};

use crate::{Builder, FromBuilder};

#[derive(Debug, thiserror::Error)]
pub enum MetrologyError {
    #[error("{valid} valid pupil samples for {required} Zernike terms")]
    InsufficientSampling { valid: usize, required: usize },
    #[error("the Zernike basis must have at least 1 term")]
    EmptyBasis,
    #[error("mismatched sample lengths (x: {0}, y: {1}, z: {2})")]
    Shape(usize, usize, usize),
    #[error("Zernike least-squares fit failed: {0}")]
    Singular(String),
    #[error("{0} field points for {1} weights")]
    Weights(usize, usize),
    #[error("failed to create a new file")]
    File(#[from] std::io::Error),
    #[error("failed to serialize metrology to Pickle")]
    Pickle(#[from] serde_pickle::Error),
}
pub type Result<T> = std::result::Result<T, MetrologyError>;

/// Radius in degrees of the LSST Gaussian quadrature rings
pub const LSST_GQ_RINGS: [f64; 5] = [0.379, 0.841, 1.237, 1.535, 1.708];
/// Weights of the LSST Gaussian quadrature rings
pub const LSST_GQ_WEIGHTS: [f64; 5] = [0.2369, 0.4786, 0.5689, 0.4786, 0.2369];
/// Field angle in degrees of the wavefront sensor corners along x and y
pub const LSST_WFS_CORNER: f64 = 1.176;

/// LSST Gaussian quadrature field points and their normalized weights
///
/// The 31 points are the field center (zero weight) followed by 5 rings of 6 points.
pub fn lsst_gq_field() -> (Vec<FieldPoint>, Vec<f64>) {
    let n_arm = 6;
    let mut fields = vec![FieldPoint::default()];
    let mut weights = vec![0f64];
    for (r, w) in LSST_GQ_RINGS.iter().zip(LSST_GQ_WEIGHTS) {
        for k in 0..n_arm {
            let o = (k as f64 * 360. / n_arm as f64).to_radians();
            fields.push(FieldPoint::new(r * o.cos(), r * o.sin()));
            weights.push(w);
        }
    }
    let s: f64 = weights.iter().sum();
    weights.iter_mut().for_each(|w| *w /= s);
    (fields, weights)
}
/// LSST wavefront sensor corner field points
pub fn lsst_wfs_field() -> Vec<FieldPoint> {
    let c = LSST_WFS_CORNER;
    vec![
        FieldPoint::new(c, c),
        FieldPoint::new(-c, c),
        FieldPoint::new(-c, -c),
        FieldPoint::new(c, -c),
    ]
}

/// [OpdMetrology] builder
#[derive(Debug, Clone, PartialEq)]
pub struct OpdMetrologyBuilder {
    pub fields: Vec<FieldPoint>,
    pub weights: Vec<f64>,
    pub wavelength: f64,
    pub pupil: PupilGrid,
    pub n_zernike: usize,
    pub atmosphere: Option<AtmosphereBuilder>,
}
/// Default properties:
///  * field points : LSST Gaussian quadrature (31 points)
///  * wavelength   : 0.5 micron
///  * pupil        : 255px across 8.36m with a 0.61 obscuration
///  * # Zernike    : 22
///  * atmosphere   : none
impl Default for OpdMetrologyBuilder {
    fn default() -> Self {
        let (fields, weights) = lsst_gq_field();
        Self {
            fields,
            weights,
            wavelength: 0.5,
            pupil: PupilGrid::default(),
            n_zernike: 22,
            atmosphere: None,
        }
    }
}
impl OpdMetrologyBuilder {
    /// Sets the field points with uniform weights
    pub fn fields(self, fields: Vec<FieldPoint>) -> Self {
        let weights = vec![1f64 / fields.len().max(1) as f64; fields.len()];
        Self {
            fields,
            weights,
            ..self
        }
    }
    /// Sets the field points and their weights
    pub fn weighted_fields(self, fields: Vec<FieldPoint>, weights: Vec<f64>) -> Self {
        Self {
            fields,
            weights,
            ..self
        }
    }
    /// Uses the 4 wavefront sensor corners as field points
    pub fn wfs_corners(self) -> Self {
        self.fields(lsst_wfs_field())
    }
    /// Sets the wavelength in microns
    pub fn wavelength(self, wavelength: f64) -> Self {
        Self { wavelength, ..self }
    }
    /// Sets the pupil sampling grid
    pub fn pupil(self, pupil: PupilGrid) -> Self {
        Self { pupil, ..self }
    }
    /// Sets the number of Zernike terms
    pub fn n_zernike(self, n_zernike: usize) -> Self {
        Self { n_zernike, ..self }
    }
    /// Adds an atmosphere phase screen to the OPD maps
    pub fn atmosphere(self, atmosphere: AtmosphereBuilder) -> Self {
        Self {
            atmosphere: Some(atmosphere),
            ..self
        }
    }
}
impl Builder for OpdMetrologyBuilder {
    type Component = OpdMetrology;
    fn build(self) -> crate::Result<OpdMetrology> {
        if self.n_zernike == 0 {
            return Err(MetrologyError::EmptyBasis.into());
        }
        if self.fields.len() != self.weights.len() {
            return Err(MetrologyError::Weights(self.fields.len(), self.weights.len()).into());
        }
        let atmosphere = match self.atmosphere {
            Some(atm) => Some(atm.build()?),
            None => None,
        };
        log::info!(
            "OPD metrology: {} field points, {}px pupil, {} Zernikes",
            self.fields.len(),
            self.pupil.resolution,
            self.n_zernike
        );
        Ok(OpdMetrology {
            fields: self.fields,
            weights: self.weights,
            wavelength: self.wavelength,
            pupil: self.pupil,
            basis: ZernikeBasis::new(self.n_zernike),
            atmosphere,
        })
    }
}

/// OPD metrology of a field point
#[derive(Debug, Clone, Serialize)]
pub struct FieldMetrology {
    pub opd: OpdMap,
    /// Zernike coefficients in microns
    pub zernike: DVector<f64>,
    /// OPD minus the Zernike reconstruction in microns
    pub residual: DMatrix<f64>,
}
impl FieldMetrology {
    pub fn residual_rms(&self) -> f64 {
        let n = self.opd.n_valid().max(1) as f64;
        (self.residual.iter().map(|x| x * x).sum::<f64>() / n).sqrt()
    }
}

/// Field wavefront metrology
#[derive(Debug, Clone)]
pub struct OpdMetrology {
    fields: Vec<FieldPoint>,
    weights: Vec<f64>,
    wavelength: f64,
    pupil: PupilGrid,
    basis: ZernikeBasis,
    atmosphere: Option<PhaseScreen>,
}
impl FromBuilder for OpdMetrology {
    type ComponentBuilder = OpdMetrologyBuilder;
}
impl OpdMetrology {
    pub fn fields(&self) -> &[FieldPoint] {
        &self.fields
    }
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
    pub fn wavelength(&self) -> f64 {
        self.wavelength
    }
    pub fn pupil(&self) -> &PupilGrid {
        &self.pupil
    }
    pub fn basis(&self) -> &ZernikeBasis {
        &self.basis
    }
    /// Zernike decomposition of an OPD map
    pub fn analyze(&self, opd: OpdMap) -> Result<FieldMetrology> {
        let (x, y, z) = opd.valid_samples();
        let fit = self.basis.fit(&x, &y, &z)?;
        let mut residual = DMatrix::<f64>::zeros(opd.grid.resolution, opd.grid.resolution);
        let mut values = fit.residual.into_iter();
        for j in 0..opd.grid.resolution {
            for i in 0..opd.grid.resolution {
                if opd.mask[(i, j)] {
                    residual[(i, j)] = values.next().unwrap_or_default();
                }
            }
        }
        Ok(FieldMetrology {
            opd,
            zernike: fit.coefficients,
            residual,
        })
    }
    /// Samples the OPD of a single field point and decomposes it on the Zernike basis
    pub fn measure_field<S: OpdSource + ?Sized>(
        &self,
        source: &S,
        field: FieldPoint,
    ) -> Result<FieldMetrology> {
        let mut opd = OpdMap::sample(source, field, self.wavelength, self.pupil);
        if let Some(screen) = &self.atmosphere {
            opd.perturb(screen);
        }
        self.analyze(opd)
    }
    /// Metrology of all the field points
    ///
    /// A failure for one field point does not prevent the others from being measured
    pub fn measure<S: OpdSource + ?Sized>(&self, source: &S) -> Vec<Result<FieldMetrology>> {
        self.fields
            .iter()
            .map(|field| {
                let m = self.measure_field(source, *field);
                if let Err(e) = &m {
                    log::warn!("OPD metrology failed at field {field}: {e}");
                }
                m
            })
            .collect()
    }
    /// Gaussian quadrature weighted RMS wavefront error in microns
    ///
    /// Failed field points are left out and the weights are renormalized
    pub fn gq_rms_wfe(&self, metrology: &[Result<FieldMetrology>]) -> Option<f64> {
        let (s, w) = metrology
            .iter()
            .zip(&self.weights)
            .filter_map(|(m, w)| m.as_ref().ok().map(|m| (m.opd.rms(), *w)))
            .fold((0f64, 0f64), |(s, sw), (rms, w)| (s + w * rms * rms, sw + w));
        (w > 0f64).then(|| (s / w).sqrt())
    }
    /// Writes the Zernike coefficients of each field point to a Pickle file
    pub fn to_pickle<P: AsRef<Path>>(
        &self,
        metrology: &[Result<FieldMetrology>],
        path: P,
    ) -> Result<()> {
        #[derive(Serialize)]
        struct Record<'a> {
            field: &'a FieldPoint,
            weight: f64,
            zernike: Option<Vec<f64>>,
            wfe_rms: Option<f64>,
        }
        let records: Vec<_> = self
            .fields
            .iter()
            .zip(&self.weights)
            .zip(metrology)
            .map(|((field, weight), m)| Record {
                field,
                weight: *weight,
                zernike: m.as_ref().ok().map(|m| m.zernike.as_slice().to_vec()),
                wfe_rms: m.as_ref().ok().map(|m| m.opd.rms()),
            })
            .collect();
        serde_pickle::to_writer(&mut File::create(path.as_ref())?, &records, Default::default())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gq_fields() {
        let (fields, weights) = lsst_gq_field();
        assert_eq!(fields.len(), 31);
        assert_eq!(weights[0], 0.);
        assert!((weights.iter().sum::<f64>() - 1.).abs() < 1e-12);
        assert!(fields.iter().all(|f| f.radius() < 1.75));
    }

    #[test]
    fn flat_wavefront() {
        let metrology = OpdMetrology::builder()
            .pupil(PupilGrid::new(33, 8.36))
            .n_zernike(15)
            .wfs_corners()
            .build()
            .unwrap();
        let flat = |_: &FieldPoint, _: f64, _: f64| Some(0f64);
        for m in metrology.measure(&flat) {
            let m = m.unwrap();
            assert!(m.zernike.iter().skip(1).all(|c| c.abs() < 1e-12));
            assert!(m.residual.iter().all(|r| r.abs() < 1e-12));
        }
    }

    #[test]
    fn insufficient_sampling_is_local() {
        let metrology = OpdMetrology::builder()
            .pupil(PupilGrid::new(33, 8.36))
            .n_zernike(11)
            .fields(vec![FieldPoint::new(0., 0.), FieldPoint::new(1., 0.)])
            .build()
            .unwrap();
        // the off-axis field is almost entirely vignetted
        let source = |f: &FieldPoint, x: f64, y: f64| {
            if f.x > 0.5 && x.hypot(y) > 0.1 {
                None
            } else {
                Some(0.1 * x)
            }
        };
        let results = metrology.measure(&source);
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(MetrologyError::InsufficientSampling { .. })
        ));
        let wfe = metrology.gq_rms_wfe(&results).unwrap();
        assert!((wfe - results[0].as_ref().unwrap().opd.rms()).abs() < 1e-12);
    }

    #[test]
    fn atmosphere_perturbation() {
        let metrology = OpdMetrology::builder()
            .pupil(PupilGrid::new(33, 8.36))
            .n_zernike(6)
            .fields(vec![FieldPoint::default()])
            .atmosphere(AtmosphereBuilder::default().n_component(64))
            .build()
            .unwrap();
        let flat = |_: &FieldPoint, _: f64, _: f64| Some(0f64);
        let m = metrology.measure_field(&flat, FieldPoint::default()).unwrap();
        assert!(m.opd.rms() > 0.);
    }

    #[test]
    fn pickle() {
        let dir = tempfile::tempdir().unwrap();
        let metrology = OpdMetrology::builder()
            .pupil(PupilGrid::new(17, 8.36))
            .n_zernike(4)
            .wfs_corners()
            .build()
            .unwrap();
        let results = metrology.measure(&ZernikeWavefront::new(vec![0., 0.1], 4.18));
        let path = dir.path().join("metrology.pkl");
        metrology.to_pickle(&results, &path).unwrap();
        assert!(path.metadata().unwrap().len() > 0);
    }
}
