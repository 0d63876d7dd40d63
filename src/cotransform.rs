//!
//! # Coordinate frames
//!
//! Rigid body transforms between the reference frames of the telescope optical components.
//!
//! Every frame is registered with its transform to the canonical [Global](OpticalFrame::Global)
//! frame (the optical design frame) and transforms between any two registered frames go
//! through the global frame.
//!
//! ```
//! use telesim::{CoTransform, Coordinates, OpticalFrame};
//! let cot = CoTransform::lsst();
//! let p = Coordinates::Point([1., 2., 3.].into());
//! let q = cot.transform(p, OpticalFrame::M2, OpticalFrame::PhoSim).unwrap();
//! let r = cot.transform(q, OpticalFrame::PhoSim, OpticalFrame::M2).unwrap();
//! assert!((p.value() - r.value()).norm() < 1e-9);
//! ```

use nalgebra::{Matrix3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt::Display};

/// Distance in meters between the M1 and M2 vertices
pub const M2_VERTEX_OFFSET: f64 = 6.1563;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("the frame {0} has not been registered")]
    Unregistered(OpticalFrame),
    #[error("the transform of frame {0} is not invertible (|det|={1})")]
    NotInvertible(OpticalFrame, f64),
    #[error("the global frame transform cannot be overwritten")]
    Global,
}
pub type Result<T> = std::result::Result<T, FrameError>;

/// Reference frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpticalFrame {
    /// Canonical frame of the optical design
    Global,
    /// M1M3 mirror local frame
    M1M3,
    /// M2 mirror local frame
    M2,
    /// Camera local frame
    Camera,
    /// Ray tracer frame
    PhoSim,
}
impl Display for OpticalFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use OpticalFrame::*;
        match self {
            Global => write!(f, "global"),
            M1M3 => write!(f, "M1M3"),
            M2 => write!(f, "M2"),
            Camera => write!(f, "camera"),
            PhoSim => write!(f, "PhoSim"),
        }
    }
}

/// Coordinates to transform
///
/// Each kind of coordinates follows its own transformation rule
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Coordinates {
    /// Position: rotation, scaling and translation
    Point(Vector3<f64>),
    /// Free vector (displacement): rotation and scaling
    Vector(Vector3<f64>),
    /// Rotation vector: rotation only, mirrored by a handedness flip
    Orientation(Vector3<f64>),
}
impl Coordinates {
    pub fn value(&self) -> Vector3<f64> {
        match self {
            Coordinates::Point(v) | Coordinates::Vector(v) | Coordinates::Orientation(v) => *v,
        }
    }
}

/**
Rigid body transform from a local frame to the global frame

`p_global = scale * R * p_local + t` where `R` is orthonormal with a determinant of ±1,
a determinant of -1 being a handedness flip.
*/
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigidTransform {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
    pub scale: f64,
}
impl Default for RigidTransform {
    fn default() -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
            scale: 1f64,
        }
    }
}
impl RigidTransform {
    pub fn identity() -> Self {
        Default::default()
    }
    /// Rotation from Euler angles in radians, applied in the x, y, z order
    pub fn from_euler_xyz(rx: f64, ry: f64, rz: f64) -> Self {
        Self {
            rotation: *Rotation3::from_euler_angles(rx, ry, rz).matrix(),
            ..Default::default()
        }
    }
    /// Sign change of the axes set to `true`
    pub fn flip(axes: [bool; 3]) -> Self {
        let d: Vec<f64> = axes.iter().map(|&a| if a { -1f64 } else { 1f64 }).collect();
        Self {
            rotation: Matrix3::from_diagonal(&Vector3::from_column_slice(&d)),
            ..Default::default()
        }
    }
    /// Sets the translation in meters
    pub fn translation(self, translation: [f64; 3]) -> Self {
        Self {
            translation: translation.into(),
            ..self
        }
    }
    /// Sets the scaling from local to global units
    pub fn scale(self, scale: f64) -> Self {
        Self { scale, ..self }
    }
    /// Composition: applies `self` and then `other`
    pub fn then(&self, other: &RigidTransform) -> Self {
        Self {
            rotation: other.rotation * self.rotation,
            translation: other.scale * other.rotation * self.translation + other.translation,
            scale: other.scale * self.scale,
        }
    }
    pub fn determinant(&self) -> f64 {
        self.rotation.determinant()
    }
    fn is_invertible(&self) -> bool {
        let d = self.determinant();
        (d.abs() - 1f64).abs() < 1e-9
            && (self.rotation.transpose() * self.rotation - Matrix3::identity()).norm() < 1e-9
            && self.scale.abs() > f64::EPSILON
    }
    pub fn inverse(&self) -> Self {
        let rt = self.rotation.transpose();
        Self {
            rotation: rt,
            translation: -(rt * self.translation) / self.scale,
            scale: self.scale.recip(),
        }
    }
    /// Applies the transform to the coordinates
    pub fn apply(&self, coordinates: Coordinates) -> Coordinates {
        use Coordinates::*;
        match coordinates {
            Point(p) => Point(self.scale * self.rotation * p + self.translation),
            Vector(v) => Vector(self.scale * self.rotation * v),
            Orientation(o) => Orientation(self.determinant().signum() * self.rotation * o),
        }
    }
}

/// Registry of the frame transforms
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoTransform {
    frames: HashMap<OpticalFrame, RigidTransform>,
}
impl CoTransform {
    /// Creates a registry with only the global frame
    pub fn new() -> Self {
        Default::default()
    }
    /// LSST frames
    ///
    ///  * M1M3 and M2: `(x,y,z) -> (-x,y,-z)` with the M2 vertex above M1
    ///  * camera: same axes as the global frame
    ///  * PhoSim: x axis flipped, coordinates in mm
    pub fn lsst() -> Self {
        let mut cot = Self::new();
        let m1m3 = RigidTransform::flip([true, false, true]);
        let m2 = m1m3.translation([0., 0., M2_VERTEX_OFFSET]);
        let phosim = RigidTransform::flip([true, false, false]).scale(1e-3);
        cot.frames.insert(OpticalFrame::M1M3, m1m3);
        cot.frames.insert(OpticalFrame::M2, m2);
        cot.frames.insert(OpticalFrame::Camera, RigidTransform::identity());
        cot.frames.insert(OpticalFrame::PhoSim, phosim);
        cot
    }
    /// Registers the transform from `frame` to the global frame
    pub fn register(&mut self, frame: OpticalFrame, transform: RigidTransform) -> Result<&mut Self> {
        if frame == OpticalFrame::Global {
            return Err(FrameError::Global);
        }
        if !transform.is_invertible() {
            return Err(FrameError::NotInvertible(frame, transform.determinant().abs()));
        }
        log::debug!("registering frame {frame}");
        self.frames.insert(frame, transform);
        Ok(self)
    }
    pub fn is_registered(&self, frame: OpticalFrame) -> bool {
        frame == OpticalFrame::Global || self.frames.contains_key(&frame)
    }
    /// Registered frames, global frame included
    pub fn frames(&self) -> Vec<OpticalFrame> {
        let mut frames = vec![OpticalFrame::Global];
        frames.extend(self.frames.keys().cloned());
        frames
    }
    fn to_global(&self, frame: OpticalFrame) -> Result<RigidTransform> {
        match frame {
            OpticalFrame::Global => Ok(RigidTransform::identity()),
            _ => self
                .frames
                .get(&frame)
                .cloned()
                .ok_or(FrameError::Unregistered(frame)),
        }
    }
    /// Transform from frame `from` to frame `to`
    pub fn chain(&self, from: OpticalFrame, to: OpticalFrame) -> Result<RigidTransform> {
        let a = self.to_global(from)?;
        let b = self.to_global(to)?;
        Ok(a.then(&b.inverse()))
    }
    /// Transforms the coordinates from frame `from` to frame `to`
    pub fn transform(
        &self,
        coordinates: Coordinates,
        from: OpticalFrame,
        to: OpticalFrame,
    ) -> Result<Coordinates> {
        Ok(self.chain(from, to)?.apply(coordinates))
    }
    /// Transforms a set of points from frame `from` to frame `to`
    pub fn transform_points(
        &self,
        points: &[Vector3<f64>],
        from: OpticalFrame,
        to: OpticalFrame,
    ) -> Result<Vec<Vector3<f64>>> {
        let t = self.chain(from, to)?;
        Ok(points
            .iter()
            .map(|p| t.apply(Coordinates::Point(*p)).value())
            .collect())
    }
    /// Transforms a surface sag map (`x`,`y` positions and `z` heights) from frame `from` to frame `to`
    ///
    /// Positions are transformed as points and heights as displacements along the local z axis
    pub fn transform_surface(
        &self,
        x: &[f64],
        y: &[f64],
        z: &[f64],
        from: OpticalFrame,
        to: OpticalFrame,
    ) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>)> {
        let t = self.chain(from, to)?;
        let mut xyz = (
            Vec::with_capacity(x.len()),
            Vec::with_capacity(x.len()),
            Vec::with_capacity(x.len()),
        );
        for ((x, y), z) in x.iter().zip(y).zip(z) {
            let p = t.apply(Coordinates::Point([*x, *y, 0.].into())).value();
            let d = t.apply(Coordinates::Vector([0., 0., *z].into())).value();
            xyz.0.push(p.x);
            xyz.1.push(p.y);
            xyz.2.push(d.z);
        }
        Ok(xyz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OpticalFrame::*;

    fn samples() -> Vec<Coordinates> {
        let v: Vector3<f64> = [0.3, -1.2, 2.5].into();
        vec![
            Coordinates::Point(v),
            Coordinates::Vector(v),
            Coordinates::Orientation(v),
        ]
    }

    #[test]
    fn round_trip() {
        let mut cot = CoTransform::lsst();
        cot.register(
            Camera,
            RigidTransform::from_euler_xyz(1e-3, -2e-3, 0.5).translation([1e-3, 0., -2.]),
        )
        .unwrap();
        let frames = cot.frames();
        for &a in &frames {
            for &b in &frames {
                for x in samples() {
                    let y = cot.transform(x, a, b).unwrap();
                    let z = cot.transform(y, b, a).unwrap();
                    assert!(
                        (x.value() - z.value()).norm() < 1e-9,
                        "{a} -> {b}: {:?} != {:?}",
                        x,
                        z
                    );
                }
            }
        }
    }

    #[test]
    fn unregistered_frame() {
        let cot = CoTransform::new();
        let p = Coordinates::Point(Vector3::zeros());
        assert!(matches!(
            cot.transform(p, M2, Global),
            Err(FrameError::Unregistered(M2))
        ));
    }

    #[test]
    fn not_invertible() {
        let mut cot = CoTransform::new();
        let t = RigidTransform {
            rotation: Matrix3::new(1., 0., 0., 0., 2., 0., 0., 0., 1.),
            ..Default::default()
        };
        assert!(cot.register(M2, t).is_err());
        assert!(cot.register(Global, RigidTransform::identity()).is_err());
    }

    #[test]
    fn vectors_ignore_translation() {
        let cot = CoTransform::lsst();
        let v = cot
            .transform(Coordinates::Vector([0., 0., 1.].into()), M2, Global)
            .unwrap();
        assert_eq!(v.value(), Vector3::new(0., 0., -1.));
        let p = cot
            .transform(Coordinates::Point([0., 0., 0.].into()), M2, Global)
            .unwrap();
        assert_eq!(p.value(), Vector3::new(0., 0., M2_VERTEX_OFFSET));
    }

    #[test]
    fn handedness_flip() {
        let cot = CoTransform::lsst();
        let o = cot
            .transform(Coordinates::Orientation([0., 0., 1.].into()), PhoSim, Global)
            .unwrap();
        // x axis flip is a reflection: the z rotation changes sign
        assert_eq!(o.value(), Vector3::new(0., 0., -1.));
        let p = cot
            .transform(Coordinates::Point([1e3, 0., 0.].into()), PhoSim, Global)
            .unwrap();
        assert!((p.value() - Vector3::new(-1., 0., 0.)).norm() < 1e-12);
    }

    #[test]
    fn surface_to_global() {
        let cot = CoTransform::lsst();
        let (x, y, z) = cot
            .transform_surface(&[1.], &[0.5], &[2e-6], M2, Global)
            .unwrap();
        assert_eq!((x[0], y[0], z[0]), (-1., 0.5, -2e-6));
    }
}
