use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use super::{CamSim, CameraError, ElementSensitivity, LensElement, PoseBounds};
use crate::{mirror::read_table, Builder};

/// Camera sensitivity file in the data directory
pub const CAMERA_SENSITIVITY_FILE: &str = "camera_sensitivity.txt";

/// `CamSim` builder
///
/// The sensitivities are either loaded from the data directory or given explicitly with
/// [sensitivities](CameraBuilder::sensitivities).
/// The sensitivity file has a header row and then 5 rows (`dx`, `dy`, `dz`, `rx`, `ry`) per
/// lens element in the order L1, L2, filter, L3; the first 3 columns are the gravity
/// sensitivities and the other columns the temperature sensitivities.
///
/// Default properties:
///  - data directory : none (zero sensitivities)
///  - \# temperature driver : 1
///  - temperature limit : 5C
///  - pose bounds : [PoseBounds::default]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraBuilder {
    pub data_dir: Option<PathBuf>,
    pub n_temperature: usize,
    pub temperature_limit: f64,
    pub bounds: PoseBounds,
    #[serde(skip)]
    sensitivities: Option<BTreeMap<LensElement, ElementSensitivity>>,
}
impl Default for CameraBuilder {
    fn default() -> Self {
        Self {
            data_dir: None,
            n_temperature: 1,
            temperature_limit: 5.,
            bounds: Default::default(),
            sensitivities: None,
        }
    }
}
impl CameraBuilder {
    /// Sets the directory with the camera sensitivity file
    pub fn data_dir<P: Into<PathBuf>>(self, data_dir: P) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
            ..self
        }
    }
    /// Sets the number of temperature drivers
    pub fn n_temperature(self, n_temperature: usize) -> Self {
        Self {
            n_temperature,
            ..self
        }
    }
    /// Sets the largest absolute value of the temperature drivers
    pub fn temperature_limit(self, temperature_limit: f64) -> Self {
        Self {
            temperature_limit,
            ..self
        }
    }
    /// Sets the lens element pose bounds
    pub fn bounds(self, bounds: PoseBounds) -> Self {
        Self { bounds, ..self }
    }
    /// Sets the lens element sensitivities
    ///
    /// The number of temperature drivers is given by the temperature sensitivity matrices
    pub fn sensitivities(self, sensitivities: BTreeMap<LensElement, ElementSensitivity>) -> Self {
        let n_temperature = sensitivities
            .values()
            .next()
            .map_or(self.n_temperature, |s| s.temperature.ncols());
        Self {
            n_temperature,
            sensitivities: Some(sensitivities),
            ..self
        }
    }
    fn load(&self) -> super::Result<BTreeMap<LensElement, ElementSensitivity>> {
        let data = match &self.data_dir {
            Some(data_dir) => read_table(data_dir.join(CAMERA_SENSITIVITY_FILE), 1)?,
            None => {
                return Ok(LensElement::ALL
                    .into_iter()
                    .map(|e| {
                        (
                            e,
                            ElementSensitivity {
                                gravity: DMatrix::zeros(5, 3),
                                temperature: DMatrix::zeros(5, self.n_temperature),
                            },
                        )
                    })
                    .collect())
            }
        };
        let n = LensElement::ALL.len() * 5;
        if data.nrows() != n || data.ncols() != 3 + self.n_temperature {
            return Err(CameraError::Shape {
                expected: format!("[{n}x{}]", 3 + self.n_temperature),
                found: format!("[{}x{}]", data.nrows(), data.ncols()),
            });
        }
        log::info!("camera sensitivities loaded from {:?}", self.data_dir);
        Ok(LensElement::ALL
            .into_iter()
            .enumerate()
            .map(|(k, e)| {
                let rows = data.rows(5 * k, 5);
                (
                    e,
                    ElementSensitivity {
                        gravity: rows.columns(0, 3).into_owned(),
                        temperature: rows.columns(3, self.n_temperature).into_owned(),
                    },
                )
            })
            .collect())
    }
}

impl Builder for CameraBuilder {
    type Component = CamSim;
    fn build(self) -> crate::Result<CamSim> {
        let sensitivities = match self.sensitivities.clone() {
            Some(s) => s,
            None => self.load()?,
        };
        for s in sensitivities.values() {
            if s.gravity.shape() != (5, 3) || s.temperature.shape() != (5, self.n_temperature) {
                return Err(CameraError::Shape {
                    expected: format!("[5x3] and [5x{}]", self.n_temperature),
                    found: format!("{:?} and {:?}", s.gravity.shape(), s.temperature.shape()),
                }
                .into());
            }
        }
        Ok(CamSim {
            sensitivities: Arc::new(sensitivities),
            n_temperature: self.n_temperature,
            temperature_limit: self.temperature_limit,
            bounds: self.bounds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FromBuilder;
    use std::{fs::File, io::Write};

    #[test]
    fn load() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = File::create(dir.path().join(CAMERA_SENSITIVITY_FILE)).unwrap();
        writeln!(file, "gx gy gz t0 t1").unwrap();
        for i in 0..20 {
            writeln!(file, "{} 0 0 {} 0", i, 0.5).unwrap();
        }
        let cam = CamSim::builder()
            .data_dir(dir.path())
            .n_temperature(2)
            .build()
            .unwrap();
        let s = cam.state(0., 0., &[1., 0.]).unwrap();
        let p = s.pose(LensElement::Filter);
        assert_eq!(p.dx, 10.5);
        assert_eq!(p.ry, 14.5);
    }

    #[test]
    fn wrong_shape() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = File::create(dir.path().join(CAMERA_SENSITIVITY_FILE)).unwrap();
        writeln!(file, "header\n1 2 3 4").unwrap();
        assert!(CamSim::builder().data_dir(dir.path()).build().is_err());
    }
}
