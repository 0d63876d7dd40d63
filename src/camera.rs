//!
//! # Camera distortion
//!
//! Gravity and thermal distortion of the camera lens train.
//!
//! The pose of each [LensElement] is the linear superposition
//! `pose = S_grav . [cos(z), sin(z)cos(r), sin(z)sin(r)] + S_temp . temperature`
//! where `z` is the zenith angle and `r` the camera rotation angle.
//!
//! ```
//! use telesim::{Builder, CamSim, FromBuilder, PoseBounds};
//! let camera = CamSim::builder().build().unwrap();
//! let state = camera.state(30f64.to_radians(), 0., &[0.5]).unwrap();
//! assert!(state.validate(&PoseBounds::default()).is_ok());
//! ```

use nalgebra::{DMatrix, DVector, Vector3};
use serde::{Deserialize, Serialize};
use skyangle::Conversion;
use std::{collections::BTreeMap, fmt::Display, ops::Add, sync::Arc};

use crate::{
    cotransform::{CoTransform, Coordinates, FrameError, OpticalFrame},
    mirror::OutOfRangeWarning,
    FromBuilder,
};

mod builder;
pub use builder::CameraBuilder;

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("{element} {quantity} of {value:.3} is outside the bounds of +/-{bound:.3}")]
    PoseOutOfBounds {
        element: LensElement,
        quantity: &'static str,
        value: f64,
        bound: f64,
    },
    #[error("expected {expected} camera temperature drivers, found {found}")]
    Temperature { expected: usize, found: usize },
    #[error("camera sensitivity matrix shape mismatch: expected {expected}, found {found}")]
    Shape { expected: String, found: String },
    #[error("cannot load camera sensitivities")]
    Load(#[from] crate::mirror::MirrorError),
    #[error("camera coordinate transform failed")]
    Frame(#[from] FrameError),
}
pub type Result<T> = std::result::Result<T, CameraError>;

/// Camera optical elements
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LensElement {
    L1,
    L2,
    Filter,
    L3,
}
impl LensElement {
    pub const ALL: [LensElement; 4] = [
        LensElement::L1,
        LensElement::L2,
        LensElement::Filter,
        LensElement::L3,
    ];
    /// Surface index in the ray tracer of the element front surface
    pub fn surface_id(&self) -> usize {
        match self {
            LensElement::L1 => 3,
            LensElement::L2 => 5,
            LensElement::Filter => 7,
            LensElement::L3 => 9,
        }
    }
}
impl Display for LensElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LensElement::L1 => write!(f, "L1"),
            LensElement::L2 => write!(f, "L2"),
            LensElement::Filter => write!(f, "filter"),
            LensElement::L3 => write!(f, "L3"),
        }
    }
}

/// Rigid body pose of a lens element
///
/// Decenters `dx`, `dy` and despace `dz` in micron, tilts `rx`, `ry` in arcsecond
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ElementPose {
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
    pub rx: f64,
    pub ry: f64,
}
impl ElementPose {
    pub fn from_slice(v: &[f64]) -> Self {
        let get = |i: usize| v.get(i).cloned().unwrap_or_default();
        Self {
            dx: get(0),
            dy: get(1),
            dz: get(2),
            rx: get(3),
            ry: get(4),
        }
    }
    pub fn to_vec(&self) -> Vec<f64> {
        vec![self.dx, self.dy, self.dz, self.rx, self.ry]
    }
    /// Decenters and despace in meters
    pub fn translation(&self) -> Vector3<f64> {
        Vector3::new(self.dx, self.dy, self.dz) * 1e-6
    }
    /// Tilts in radians
    pub fn tilt(&self) -> Vector3<f64> {
        Vector3::new(self.rx.from_arcsec(), self.ry.from_arcsec(), 0.)
    }
}
impl Add for ElementPose {
    type Output = ElementPose;
    fn add(self, rhs: Self) -> Self::Output {
        Self {
            dx: self.dx + rhs.dx,
            dy: self.dy + rhs.dy,
            dz: self.dz + rhs.dz,
            rx: self.rx + rhs.rx,
            ry: self.ry + rhs.ry,
        }
    }
}

/// Physical range of the lens element poses
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseBounds {
    /// Largest decenter in micron
    pub decenter: f64,
    /// Largest despace in micron
    pub despace: f64,
    /// Largest tilt in arcsecond
    pub tilt: f64,
}
/// Default properties:
///  * decenter : 5000 micron
///  * despace  : 1000 micron
///  * tilt     : 360 arcsec
impl Default for PoseBounds {
    fn default() -> Self {
        Self {
            decenter: 5e3,
            despace: 1e3,
            tilt: 360.,
        }
    }
}

/// Lens element pose in another frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramePose {
    pub element: LensElement,
    /// Decenters and despace in the frame length unit
    pub translation: Vector3<f64>,
    /// Tilts in radians
    pub tilt: Vector3<f64>,
}

/// Poses of the camera lens elements in the camera frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CameraState {
    pub poses: BTreeMap<LensElement, ElementPose>,
    pub warnings: Vec<OutOfRangeWarning>,
}
impl CameraState {
    pub fn pose(&self, element: LensElement) -> ElementPose {
        self.poses.get(&element).cloned().unwrap_or_default()
    }
    /// Sets the pose of a lens element
    pub fn set_pose(&mut self, element: LensElement, pose: ElementPose) -> &mut Self {
        self.poses.insert(element, pose);
        self
    }
    /// Checks that all the poses are within `bounds`
    pub fn validate(&self, bounds: &PoseBounds) -> Result<()> {
        for (&element, pose) in &self.poses {
            let checks = [
                ("x decenter", pose.dx, bounds.decenter),
                ("y decenter", pose.dy, bounds.decenter),
                ("despace", pose.dz, bounds.despace),
                ("x tilt", pose.rx, bounds.tilt),
                ("y tilt", pose.ry, bounds.tilt),
            ];
            if let Some((quantity, value, bound)) = checks
                .into_iter()
                .find(|(_, v, b)| !v.is_finite() || v.abs() > *b)
            {
                return Err(CameraError::PoseOutOfBounds {
                    element,
                    quantity,
                    value,
                    bound,
                });
            }
        }
        Ok(())
    }
    /// Poses transformed from the camera frame into `frame`
    pub fn poses_in(&self, frame: OpticalFrame, cotransform: &CoTransform) -> Result<Vec<FramePose>> {
        let t = cotransform.chain(OpticalFrame::Camera, frame)?;
        Ok(self
            .poses
            .iter()
            .map(|(&element, pose)| FramePose {
                element,
                translation: t.apply(Coordinates::Vector(pose.translation())).value(),
                tilt: t.apply(Coordinates::Orientation(pose.tilt())).value(),
            })
            .collect())
    }
}
impl Add for &CameraState {
    type Output = CameraState;
    fn add(self, rhs: Self) -> Self::Output {
        let mut poses = self.poses.clone();
        for (element, pose) in &rhs.poses {
            let p = poses.entry(*element).or_default();
            *p = *p + *pose;
        }
        let mut warnings = self.warnings.clone();
        warnings.extend(rhs.warnings.iter().cloned());
        CameraState { poses, warnings }
    }
}

/// Sensitivities of a lens element pose
#[derive(Debug, Clone, PartialEq)]
pub struct ElementSensitivity {
    /// `[5x3]` pose per unit gravity component
    pub gravity: DMatrix<f64>,
    /// `[5xn]` pose per unit temperature driver
    pub temperature: DMatrix<f64>,
}

/// Camera lens train distortion model
#[derive(Debug, Clone)]
pub struct CamSim {
    sensitivities: Arc<BTreeMap<LensElement, ElementSensitivity>>,
    n_temperature: usize,
    temperature_limit: f64,
    bounds: PoseBounds,
}
impl FromBuilder for CamSim {
    type ComponentBuilder = CameraBuilder;
}
impl CamSim {
    pub fn n_temperature(&self) -> usize {
        self.n_temperature
    }
    pub fn bounds(&self) -> &PoseBounds {
        &self.bounds
    }
    /// Gravity vector in the camera frame for a zenith angle and a camera rotation angle (radians)
    pub fn gravity(zenith_angle: f64, rotation: f64) -> Vector3<f64> {
        Vector3::new(
            zenith_angle.cos(),
            zenith_angle.sin() * rotation.cos(),
            zenith_angle.sin() * rotation.sin(),
        )
    }
    fn warning(&self, input: String, requested: f64, clamped: f64) -> OutOfRangeWarning {
        let warning = OutOfRangeWarning {
            component: "camera".into(),
            input,
            requested,
            clamped,
        };
        log::warn!("{warning}");
        warning
    }
    /// Lens element poses for the zenith angle, the camera rotation angle (radians) and the
    /// temperature drivers
    ///
    /// The zenith angle is clamped to `[0,pi/2]` and each temperature driver to the
    /// calibration range
    pub fn state(&self, zenith_angle: f64, rotation: f64, temperature: &[f64]) -> Result<CameraState> {
        if temperature.len() != self.n_temperature {
            return Err(CameraError::Temperature {
                expected: self.n_temperature,
                found: temperature.len(),
            });
        }
        let mut warnings = vec![];
        let z = zenith_angle.clamp(0., std::f64::consts::FRAC_PI_2);
        if z != zenith_angle {
            warnings.push(self.warning(
                "zenith angle".into(),
                zenith_angle.to_degrees(),
                z.to_degrees(),
            ));
        }
        let limit = self.temperature_limit;
        let t = DVector::from_iterator(
            temperature.len(),
            temperature.iter().enumerate().map(|(i, &t)| {
                let c = t.clamp(-limit, limit);
                if c != t {
                    warnings.push(self.warning(format!("temperature #{i}"), t, c));
                }
                c
            }),
        );
        let g = DVector::from_column_slice(Self::gravity(z, rotation).as_slice());
        let poses = self
            .sensitivities
            .iter()
            .map(|(&element, s)| {
                let p = &s.gravity * &g + &s.temperature * &t;
                (element, ElementPose::from_slice(p.as_slice()))
            })
            .collect();
        Ok(CameraState { poses, warnings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Builder;

    fn camsim() -> CamSim {
        let mut s = BTreeMap::new();
        s.insert(
            LensElement::L1,
            ElementSensitivity {
                gravity: DMatrix::from_fn(5, 3, |i, j| if j == 0 { 10. * (i + 1) as f64 } else { 0. }),
                temperature: DMatrix::from_element(5, 1, 1.),
            },
        );
        CamSim::builder().sensitivities(s).build().unwrap()
    }

    #[test]
    fn superposition() {
        let cam = camsim();
        let s = cam.state(0., 0., &[2.]).unwrap();
        let p = s.pose(LensElement::L1);
        assert_eq!(p.to_vec(), vec![12., 22., 32., 42., 52.]);
        assert_eq!(s.pose(LensElement::L3), ElementPose::default());
        assert!(s.warnings.is_empty());
    }

    #[test]
    fn clamping() {
        let cam = camsim();
        let s = cam.state(-0.1, 0., &[100.]).unwrap();
        assert_eq!(s.warnings.len(), 2);
        assert!(cam.state(0., 0., &[]).is_err());
    }

    #[test]
    fn bounds() {
        let mut s = CameraState::default();
        s.set_pose(
            LensElement::L2,
            ElementPose {
                dz: 2e3,
                ..Default::default()
            },
        );
        assert!(matches!(
            s.validate(&PoseBounds::default()),
            Err(CameraError::PoseOutOfBounds {
                element: LensElement::L2,
                quantity: "despace",
                ..
            })
        ));
    }

    #[test]
    fn phosim_frame() {
        let mut s = CameraState::default();
        s.set_pose(
            LensElement::L1,
            ElementPose {
                dx: 100.,
                dy: 50.,
                rx: 1.,
                ..Default::default()
            },
        );
        let p = s.poses_in(OpticalFrame::PhoSim, &CoTransform::lsst()).unwrap();
        assert!((p[0].translation.x + 0.1).abs() < 1e-12);
        assert!((p[0].translation.y - 0.05).abs() < 1e-12);
        assert!((p[0].tilt.x - 1f64.from_arcsec()).abs() < 1e-15);
    }
}
