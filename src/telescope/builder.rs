use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{Read, Write},
    path::{Path, PathBuf},
};

use super::{DegreesOfFreedom, Environment, OpdFields, TeleFacade, TelescopeError};
use crate::{
    camera::CameraBuilder,
    cotransform::CoTransform,
    metrology::{AtmosphereBuilder, MetrologyError},
    mirror::AnyMirrorSim,
    phosim::{Observation, PhosimBuilder},
    Builder, CamSim, MirrorKind,
};

/// Simulation configuration
///
/// Default properties:
///  * data directory : none
///  * mirrors : M1M3 and M2
///  * \# Zernike : 22
///  * surface map grid : none
///  * pupil resolution : 255
///  * pupil diameter : 8.36m
///  * pupil obscuration : 0.61
///  * field radius : 1.75deg
///  * OPD field points : Gaussian quadrature
///  * atmosphere : [AtmosphereBuilder::default], used when the observation atmosphere is on
///
/// ```
/// use telesim::telescope::SimulationConfig;
/// let config: SimulationConfig = toml::from_str(
///     r#"
///     mirrors = ["M2"]
///     n_zernike = 11
///     [environment]
///     zenith_angle = 30.0
///     [phosim]
///     timeout = 600
///     "#,
/// )
/// .unwrap();
/// assert_eq!(config.phosim.timeout, 600);
/// assert_eq!(config.observation.obs_id, 9006000);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Directory of the mirror FEA data files
    pub data_dir: Option<PathBuf>,
    pub mirrors: Vec<MirrorKind>,
    /// Number of Zernike terms fitted to the mirror figures and the OPD maps
    pub n_zernike: usize,
    /// Size of the mirror residue maps, no residue map if not set
    pub surface_map_grid: Option<usize>,
    pub pupil_resolution: usize,
    /// Pupil diameter in meters
    pub pupil_diameter: f64,
    /// Central obscuration as a fraction of the pupil diameter
    pub pupil_obscuration: f64,
    /// Radius of the field of view in degrees
    pub field_radius: f64,
    pub opd_fields: OpdFields,
    pub observation: Observation,
    pub environment: Environment,
    /// Phase screen of the OPD metrology, its zenith angle and seed are set by the
    /// environment and the observation
    pub atmosphere: AtmosphereBuilder,
    pub camera: CameraBuilder,
    pub phosim: PhosimBuilder,
}
impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            mirrors: vec![MirrorKind::M1M3, MirrorKind::M2],
            n_zernike: 22,
            surface_map_grid: None,
            pupil_resolution: 255,
            pupil_diameter: 8.36,
            pupil_obscuration: 0.61,
            field_radius: 1.75,
            opd_fields: OpdFields::default(),
            observation: Observation::default(),
            environment: Environment::default(),
            atmosphere: AtmosphereBuilder::default(),
            camera: CameraBuilder::default(),
            phosim: PhosimBuilder::default(),
        }
    }
}
impl SimulationConfig {
    /// Loads the configuration from a toml file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TelescopeError> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| TelescopeError::Open(e, path.to_path_buf()))?;
        let mut toml = String::new();
        file.read_to_string(&mut toml)
            .map_err(|e| TelescopeError::Read(e, path.to_path_buf()))?;
        Ok(toml::from_str(&toml)?)
    }
    /// Saves the configuration to a toml file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), TelescopeError> {
        let path = path.as_ref();
        let toml = toml::to_string_pretty(self)?;
        let mut file =
            File::create(path).map_err(|e| TelescopeError::Create(e, path.to_path_buf()))?;
        write!(file, "# ::telesim::SimulationConfig\n\n{}", toml)
            .map_err(|e| TelescopeError::Write(e, path.to_path_buf()))
    }
}

/// [TeleFacade] builder
///
/// The mirrors of the configuration that are not given explicitly are loaded from the
/// configuration data directory; mirrors given explicitly but missing from the
/// configuration are discarded
#[derive(Default)]
pub struct TeleFacadeBuilder {
    config: SimulationConfig,
    mirrors: Vec<AnyMirrorSim>,
    camera: Option<CamSim>,
    cotransform: Option<CoTransform>,
}
impl TeleFacadeBuilder {
    pub fn config(self, config: SimulationConfig) -> Self {
        Self { config, ..self }
    }
    /// Adds a mirror distortion model
    pub fn mirror<M: Into<AnyMirrorSim>>(mut self, mirror: M) -> Self {
        self.mirrors.push(mirror.into());
        self
    }
    pub fn camera(self, camera: CamSim) -> Self {
        Self {
            camera: Some(camera),
            ..self
        }
    }
    /// Sets the frame transforms, LSST frames by default
    pub fn cotransform(self, cotransform: CoTransform) -> Self {
        Self {
            cotransform: Some(cotransform),
            ..self
        }
    }
}
impl Builder for TeleFacadeBuilder {
    type Component = TeleFacade;
    fn build(self) -> crate::Result<TeleFacade> {
        let Self {
            config,
            mut mirrors,
            camera,
            cotransform,
        } = self;
        if config.n_zernike == 0 {
            return Err(MetrologyError::EmptyBasis.into());
        }
        mirrors.retain(|m| {
            let selected = config.mirrors.contains(&m.kind());
            if !selected {
                log::warn!("{} mirror discarded: not in the configuration", m.kind());
            }
            selected
        });
        for &kind in &config.mirrors {
            if mirrors.iter().any(|m| m.kind() == kind) {
                continue;
            }
            let data_dir = config
                .data_dir
                .as_ref()
                .ok_or(TelescopeError::MissingDataDir(kind))?;
            mirrors.push(AnyMirrorSim::load(kind, data_dir)?);
        }
        let camera = match camera {
            Some(camera) => camera,
            None => config.camera.clone().build()?,
        };
        log::info!(
            "telescope with {} mirror(s): {:?}",
            mirrors.len(),
            mirrors.iter().map(|m| m.kind()).collect::<Vec<_>>()
        );
        Ok(TeleFacade {
            config,
            mirrors,
            camera,
            cotransform: cotransform.unwrap_or_else(CoTransform::lsst),
            dof: DegreesOfFreedom::default(),
            n_run: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{phosim::Filter, FromBuilder};

    #[test]
    fn toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telesim.toml");
        let mut config = SimulationConfig {
            mirrors: vec![MirrorKind::M2],
            surface_map_grid: Some(200),
            opd_fields: OpdFields::Wfs,
            ..Default::default()
        };
        config.observation.filter = Filter::R;
        config.environment.m2_temperature = vec![0.5, -0.5];
        config.save(&path).unwrap();
        let other = SimulationConfig::load(&path).unwrap();
        assert_eq!(config, other);
    }

    #[test]
    fn zero_zernike() {
        let config = SimulationConfig {
            mirrors: vec![],
            n_zernike: 0,
            ..Default::default()
        };
        assert!(matches!(
            TeleFacade::builder().config(config).build(),
            Err(crate::TeleSimError::Metrology(MetrologyError::EmptyBasis))
        ));
    }

    #[test]
    fn unselected_mirror() {
        let m2 = crate::M2Sim::builder()
            .grid(vec![1.2, 0., -1.5], vec![0., 1.1, 0.])
            .model(crate::mirror::DistortionModel::from_print_through(
                &[0.1, 0.2, 0.3],
                &[0.; 3],
                nalgebra::DMatrix::zeros(3, 2),
            ))
            .build()
            .unwrap();
        let config = SimulationConfig {
            mirrors: vec![],
            ..Default::default()
        };
        let telescope = TeleFacade::builder().config(config).mirror(m2).build().unwrap();
        assert!(telescope.mirrors().is_empty());
    }

    #[test]
    fn missing_data_dir() {
        let err = TeleFacade::builder().build();
        assert!(matches!(
            err,
            Err(crate::TeleSimError::Telescope(TelescopeError::MissingDataDir(
                MirrorKind::M1M3
            )))
        ));
    }
}
