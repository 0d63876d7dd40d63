use serde::{Deserialize, Serialize};
use std::{
    fmt::Display,
    fs::File,
    io::Write,
    ops::Range,
    path::{Path, PathBuf},
};

use super::TelescopeError;
use crate::camera::ElementPose;

/// Number of telescope degrees of freedom
pub const N_DOF: usize = 50;

/// Groups of the telescope degrees of freedom
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DofGroup {
    /// M2 hexapod: piston, x and y decenters (micron), x and y tilts (arcsec)
    M2Hexapod,
    /// Camera hexapod: piston, x and y decenters (micron), x and y tilts (arcsec)
    CameraHexapod,
    /// 20 M1M3 bending modes (micron)
    M1M3Bending,
    /// 20 M2 bending modes (micron)
    M2Bending,
}
impl DofGroup {
    pub fn range(&self) -> Range<usize> {
        match self {
            DofGroup::M2Hexapod => 0..5,
            DofGroup::CameraHexapod => 5..10,
            DofGroup::M1M3Bending => 10..30,
            DofGroup::M2Bending => 30..50,
        }
    }
}

/**
Telescope degrees of freedom

The 50 degrees of freedom are ordered as
`[M2 hexapod (5), camera hexapod (5), M1M3 bending modes (20), M2 bending modes (20)]`
in micron and arcsec.
*/
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegreesOfFreedom {
    dof: Vec<f64>,
}
impl Default for DegreesOfFreedom {
    fn default() -> Self {
        Self {
            dof: vec![0f64; N_DOF],
        }
    }
}
impl TryFrom<Vec<f64>> for DegreesOfFreedom {
    type Error = TelescopeError;
    fn try_from(dof: Vec<f64>) -> Result<Self, Self::Error> {
        if dof.len() != N_DOF {
            return Err(TelescopeError::DofLength {
                expected: N_DOF,
                found: dof.len(),
            });
        }
        Ok(Self { dof })
    }
}
impl DegreesOfFreedom {
    pub fn as_slice(&self) -> &[f64] {
        &self.dof
    }
    pub fn group(&self, group: DofGroup) -> &[f64] {
        &self.dof[group.range()]
    }
    /// Sets all the degrees of freedom
    pub fn set(&mut self, dof: &[f64]) -> Result<&mut Self, TelescopeError> {
        *self = Self::try_from(dof.to_vec())?;
        Ok(self)
    }
    /// Sets the degrees of freedom of a group
    pub fn set_group(&mut self, group: DofGroup, values: &[f64]) -> Result<&mut Self, TelescopeError> {
        let range = group.range();
        if values.len() != range.len() {
            return Err(TelescopeError::DofLength {
                expected: range.len(),
                found: values.len(),
            });
        }
        self.dof[range].copy_from_slice(values);
        Ok(self)
    }
    /// Adds `delta` to the degrees of freedom
    pub fn accumulate(&mut self, delta: &[f64]) -> Result<&mut Self, TelescopeError> {
        if delta.len() != N_DOF {
            return Err(TelescopeError::DofLength {
                expected: N_DOF,
                found: delta.len(),
            });
        }
        self.dof.iter_mut().zip(delta).for_each(|(d, dd)| *d += dd);
        Ok(self)
    }
    /// Camera hexapod degrees of freedom as a pose
    pub fn camera_hexapod(&self) -> ElementPose {
        let h = self.group(DofGroup::CameraHexapod);
        ElementPose {
            dz: h[0],
            dx: h[1],
            dy: h[2],
            rx: h[3],
            ry: h[4],
        }
    }
    /// Writes the degrees of freedom to `path`, one per line
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), TelescopeError> {
        let path = path.as_ref();
        let content: String = self.dof.iter().map(|x| format!("{:.6}\n", x)).collect();
        File::create(path)
            .and_then(|mut f| f.write_all(content.as_bytes()))
            .map_err(|e| TelescopeError::Write(e, PathBuf::from(path)))
    }
}
impl Display for DegreesOfFreedom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Telescope DOF (micron, arcsec):")?;
        let fmt = |v: &[f64]| {
            v.iter()
                .map(|x| format!("{:>+10.3}", x))
                .collect::<Vec<String>>()
                .join(",")
        };
        writeln!(f, " - M2 hexapod    : [{}]", fmt(self.group(DofGroup::M2Hexapod)))?;
        writeln!(f, " - camera hexapod: [{}]", fmt(self.group(DofGroup::CameraHexapod)))?;
        writeln!(f, " - M1M3 bending  : [{}, ...]", fmt(&self.group(DofGroup::M1M3Bending)[..5]))?;
        writeln!(f, " - M2 bending    : [{}, ...]", fmt(&self.group(DofGroup::M2Bending)[..5]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulate() {
        let mut dof = DegreesOfFreedom::default();
        let mut delta = vec![0f64; N_DOF];
        delta[5] = 1000.;
        delta[6] = 500.;
        dof.accumulate(&delta).unwrap().accumulate(&delta).unwrap();
        let pose = dof.camera_hexapod();
        assert_eq!((pose.dz, pose.dx), (2000., 1000.));
        assert!(dof.accumulate(&[0.; 3]).is_err());
    }

    #[test]
    fn groups() {
        let mut dof = DegreesOfFreedom::default();
        dof.set_group(DofGroup::M2Bending, &[1.; 20]).unwrap();
        assert_eq!(dof.as_slice()[30..].iter().sum::<f64>(), 20.);
        assert_eq!(dof.as_slice()[..30].iter().sum::<f64>(), 0.);
        assert!(dof.set_group(DofGroup::M2Hexapod, &[1.; 20]).is_err());
    }

    #[test]
    fn file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dof.txt");
        let mut dof = DegreesOfFreedom::default();
        dof.set(&[0.5; N_DOF]).unwrap();
        dof.to_file(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), N_DOF);
        assert_eq!(content.lines().next(), Some("0.500000"));
    }
}
