//!
//! # Telescope simulation sequencing
//!
//! [TeleFacade] owns the mirror and camera distortion models and sequences a
//! [SimulationRun] through its states:
//! ```text
//! Configured -> MirrorCorrected -> CameraCorrected -> SkyPopulated -> Submitted -> Completed | Failed
//! ```
//! A call made out of order returns [TeleSimError::InvalidTransition] and leaves the run
//! untouched; any other error moves the run to [RunState::Failed] with the error message
//! kept as diagnostic.
//!
//! ```no_run
//! use telesim::{prelude::*, sky::Pointing, telescope::SimulationConfig};
//!
//! let config = SimulationConfig::load("telesim.toml")?;
//! let mut phosim = config.phosim.clone().build()?;
//! let mut telescope = TeleFacade::builder().config(config).build()?;
//! let mut run = telescope.new_run();
//! telescope.apply_mirror_distortion(&mut run)?;
//! telescope.apply_camera_distortion(&mut run)?;
//! let mut sky = SkySim::new(Pointing::default());
//! sky.add_star_by_field_angle(0, 1.176, 1.176, 15.)?;
//! telescope.add_sky(&mut run, sky)?;
//! let output = telescope.submit(&mut run, &mut phosim)?;
//! # Ok::<(), telesim::TeleSimError>(())
//! ```

use nalgebra::{DVector, Vector3};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, path::Path};

use crate::{
    camera::{CameraState, PoseBounds},
    cotransform::CoTransform,
    metrology::{lsst_gq_field, lsst_wfs_field, FieldPoint, OpdMetrology, PupilGrid},
    mirror::{gravity_at_zenith, AnyMirrorSim, MirrorFigure},
    phosim::{Observation, PhosimError, SimulationOutput, Simulator, SurfacePerturbation},
    sky::SkySim,
    Builder, CamSim, FromBuilder, MirrorKind, TeleSimError,
};

mod builder;
mod dof;
pub use builder::{SimulationConfig, TeleFacadeBuilder};
pub use dof::{DegreesOfFreedom, DofGroup, N_DOF};

#[derive(Debug, thiserror::Error)]
pub enum TelescopeError {
    #[error("cannot open `::telesim::SimulationConfig` toml file: {1}")]
    Open(#[source] std::io::Error, std::path::PathBuf),
    #[error("cannot create `::telesim::SimulationConfig` toml file: {1}")]
    Create(#[source] std::io::Error, std::path::PathBuf),
    #[error("cannot read `::telesim::SimulationConfig` toml file: {1}")]
    Read(#[source] std::io::Error, std::path::PathBuf),
    #[error("cannot write {1}")]
    Write(#[source] std::io::Error, std::path::PathBuf),
    #[error("cannot deserialize `::telesim::SimulationConfig` from toml")]
    Load(#[from] toml::de::Error),
    #[error("cannot serialize `::telesim::SimulationConfig` into toml")]
    Save(#[from] toml::ser::Error),
    #[error("expected {expected} degrees of freedom, found {found}")]
    DofLength { expected: usize, found: usize },
    #[error("{0} mirror selected without a data directory")]
    MissingDataDir(MirrorKind),
}

/// States of a [SimulationRun]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Configured,
    MirrorCorrected,
    CameraCorrected,
    SkyPopulated,
    Submitted,
    Completed,
    Failed,
}
impl Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Configured => "configured",
            RunState::MirrorCorrected => "mirror corrected",
            RunState::CameraCorrected => "camera corrected",
            RunState::SkyPopulated => "sky populated",
            RunState::Submitted => "submitted",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Field points of the OPD metrology
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpdFields {
    /// Gaussian quadrature field points
    #[default]
    Gq,
    /// Wavefront sensor corners
    Wfs,
    /// No OPD
    Off,
    Custom(Vec<FieldPoint>),
}
impl OpdFields {
    /// Field points and their weights
    pub fn fields(&self) -> (Vec<FieldPoint>, Vec<f64>) {
        match self {
            OpdFields::Gq => lsst_gq_field(),
            OpdFields::Wfs => {
                let f = lsst_wfs_field();
                let w = vec![1f64 / f.len() as f64; f.len()];
                (f, w)
            }
            OpdFields::Off => (vec![], vec![]),
            OpdFields::Custom(f) => {
                let w = vec![1f64 / f.len().max(1) as f64; f.len()];
                (f.clone(), w)
            }
        }
    }
}

/// Telescope environment
///
/// Empty temperature vectors stand for zero temperature drivers
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Environment {
    /// Zenith angle in degrees
    pub zenith_angle: f64,
    /// Camera rotation angle in degrees
    pub rotation: f64,
    /// Gravity vector in the mirror frames, derived from the zenith angle if not set
    pub gravity: Option<[f64; 3]>,
    pub m1m3_temperature: Vec<f64>,
    pub m2_temperature: Vec<f64>,
    pub camera_temperature: Vec<f64>,
}
impl Environment {
    pub fn gravity(&self) -> Vector3<f64> {
        self.gravity
            .map(Vector3::from)
            .unwrap_or_else(|| gravity_at_zenith(self.zenith_angle.to_radians()))
    }
    fn temperature(values: &[f64], n: usize) -> Vec<f64> {
        if values.is_empty() {
            vec![0f64; n]
        } else {
            values.to_vec()
        }
    }
    pub fn mirror_temperature(&self, kind: MirrorKind, n: usize) -> DVector<f64> {
        let values = match kind {
            MirrorKind::M1M3 => &self.m1m3_temperature,
            MirrorKind::M2 => &self.m2_temperature,
        };
        DVector::from_vec(Self::temperature(values, n))
    }
}

/// A single invocation of the ray tracer
#[derive(Debug, Clone)]
pub struct SimulationRun {
    id: usize,
    state: RunState,
    pub observation: Observation,
    pub dof: DegreesOfFreedom,
    mirrors: Vec<SurfacePerturbation>,
    figures: Vec<MirrorFigure>,
    camera: Option<CameraState>,
    camera_bounds: PoseBounds,
    sky: Option<SkySim>,
    opd_fields: Vec<FieldPoint>,
    diagnostic: Option<String>,
    output: Option<SimulationOutput>,
}
impl SimulationRun {
    pub fn id(&self) -> usize {
        self.id
    }
    pub fn state(&self) -> RunState {
        self.state
    }
    /// Mirror surface perturbations for the ray tracer
    pub fn mirrors(&self) -> &[SurfacePerturbation] {
        &self.mirrors
    }
    /// Mirror figures in the mirror frames
    pub fn figures(&self) -> &[MirrorFigure] {
        &self.figures
    }
    pub fn camera(&self) -> Option<&CameraState> {
        self.camera.as_ref()
    }
    pub fn camera_mut(&mut self) -> Option<&mut CameraState> {
        self.camera.as_mut()
    }
    pub fn sky(&self) -> Option<&SkySim> {
        self.sky.as_ref()
    }
    pub fn opd_fields(&self) -> &[FieldPoint] {
        &self.opd_fields
    }
    /// Error message of a failed run
    pub fn diagnostic(&self) -> Option<&str> {
        self.diagnostic.as_deref()
    }
    /// Ray tracer files of a completed run
    pub fn output(&self) -> Option<&SimulationOutput> {
        self.output.as_ref()
    }
    /// Checks that the run can be handed to the ray tracer
    pub fn validate(&self) -> Result<(), PhosimError> {
        let configuration = |msg: String| PhosimError::Configuration(msg);
        if let Some(i) = self.dof.as_slice().iter().position(|x| !x.is_finite()) {
            return Err(configuration(format!("degree of freedom #{i} is not finite")));
        }
        let hexapod = self.dof.camera_hexapod();
        let b = &self.camera_bounds;
        for (quantity, value, bound) in [
            ("despace", hexapod.dz, b.despace),
            ("x decenter", hexapod.dx, b.decenter),
            ("y decenter", hexapod.dy, b.decenter),
            ("x tilt", hexapod.rx, b.tilt),
            ("y tilt", hexapod.ry, b.tilt),
        ] {
            if value.abs() > bound {
                return Err(configuration(format!(
                    "camera hexapod {quantity} {value} is beyond {bound}"
                )));
            }
        }
        if let Some(camera) = &self.camera {
            camera
                .validate(b)
                .map_err(|e| configuration(e.to_string()))?;
        }
        if let Some(s) = self
            .mirrors
            .iter()
            .find(|s| s.zernike.iter().any(|c| !c.is_finite()))
        {
            return Err(configuration(format!("{} Zernike coefficients are not finite", s.name)));
        }
        if self.observation.wavelength.is_nan() || self.observation.wavelength <= 0f64 {
            return Err(configuration(format!(
                "invalid wavelength: {}nm",
                self.observation.wavelength
            )));
        }
        Ok(())
    }
    fn fail(&mut self, error: TeleSimError) -> TeleSimError {
        log::warn!("run #{} failed: {}", self.id, error.report());
        self.state = RunState::Failed;
        self.diagnostic = Some(error.report());
        error
    }
}

/// Telescope simulation facade
pub struct TeleFacade {
    config: SimulationConfig,
    mirrors: Vec<AnyMirrorSim>,
    camera: CamSim,
    cotransform: CoTransform,
    dof: DegreesOfFreedom,
    n_run: usize,
}
impl FromBuilder for TeleFacade {
    type ComponentBuilder = TeleFacadeBuilder;
}
impl TeleFacade {
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }
    pub fn mirrors(&self) -> &[AnyMirrorSim] {
        &self.mirrors
    }
    pub fn cotransform(&self) -> &CoTransform {
        &self.cotransform
    }
    /// Accumulated degrees of freedom
    pub fn dof(&self) -> &DegreesOfFreedom {
        &self.dof
    }
    /// Sets the degrees of freedom of the next runs
    pub fn set_dof(&mut self, dof: &[f64]) -> crate::Result<&mut Self> {
        self.dof.set(dof)?;
        Ok(self)
    }
    /// Adds `delta` to the degrees of freedom of the next runs
    pub fn accumulate_dof(&mut self, delta: &[f64]) -> crate::Result<&mut Self> {
        self.dof.accumulate(delta)?;
        log::debug!("{}", self.dof);
        Ok(self)
    }
    /// Writes the accumulated degrees of freedom to a file
    pub fn write_acc_dof_file<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        Ok(self.dof.to_file(path)?)
    }
    /// New run with the current observation, degrees of freedom and OPD field points
    pub fn new_run(&mut self) -> SimulationRun {
        self.n_run += 1;
        log::info!("new simulation run #{}", self.n_run);
        SimulationRun {
            id: self.n_run,
            state: RunState::Configured,
            observation: self.config.observation.clone(),
            dof: self.dof.clone(),
            mirrors: vec![],
            figures: vec![],
            camera: None,
            camera_bounds: *self.camera.bounds(),
            sky: None,
            opd_fields: self.config.opd_fields.fields().0,
            diagnostic: None,
            output: None,
        }
    }
    /// OPD metrology of the configured field points
    ///
    /// With the observation atmosphere on, the OPD maps include the configured phase screen
    /// seen at the environment zenith angle
    pub fn metrology(&self) -> crate::Result<OpdMetrology> {
        let config = &self.config;
        let (fields, weights) = config.opd_fields.fields();
        let builder = OpdMetrology::builder()
            .weighted_fields(fields, weights)
            .wavelength(config.observation.wavelength * 1e-3)
            .pupil(
                PupilGrid::new(config.pupil_resolution, config.pupil_diameter)
                    .obscuration(config.pupil_obscuration),
            )
            .n_zernike(config.n_zernike);
        if config.observation.atmosphere {
            builder
                .atmosphere(
                    config
                        .atmosphere
                        .clone()
                        .zenith_angle(config.environment.zenith_angle.to_radians())
                        .seed(config.observation.seed as u64),
                )
                .build()
        } else {
            builder.build()
        }
    }
    fn transition(run: &SimulationRun, from: RunState, call: &'static str) -> crate::Result<()> {
        if run.state == from {
            Ok(())
        } else {
            Err(TeleSimError::InvalidTransition {
                state: run.state,
                call,
            })
        }
    }
    fn surfaces(&self, mirror: &AnyMirrorSim, figure: &MirrorFigure) -> crate::Result<Vec<SurfacePerturbation>> {
        let n_zernike = self.config.n_zernike;
        let residue = mirror.residue_in_global(figure, &self.cotransform, n_zernike)?;
        let map = match self.config.surface_map_grid {
            Some(n) => Some(mirror.grid_residue_map(figure, &self.cotransform, n_zernike, n)?),
            None => None,
        };
        let mut apertures = mirror.apertures().into_iter();
        let mut surfaces = vec![];
        if let Some(primary) = apertures.next() {
            surfaces.push(SurfacePerturbation {
                mirror: mirror.kind(),
                name: primary.name,
                surface_id: primary.surface_id,
                zernike: residue.zernike,
                residue: map,
                linked_to: None,
            });
            surfaces.extend(apertures.map(|ap| SurfacePerturbation {
                mirror: mirror.kind(),
                name: ap.name,
                surface_id: ap.surface_id,
                zernike: DVector::zeros(0),
                residue: None,
                linked_to: Some(primary.surface_id),
            }));
        }
        Ok(surfaces)
    }
    /// Computes the mirror figures for the configured environment
    pub fn apply_mirror_distortion(&self, run: &mut SimulationRun) -> crate::Result<()> {
        Self::transition(run, RunState::Configured, "apply_mirror_distortion")?;
        let env = &self.config.environment;
        let gravity = env.gravity();
        let mut figures = vec![];
        let mut surfaces = vec![];
        for mirror in &self.mirrors {
            let temperature = env.mirror_temperature(mirror.kind(), mirror.n_temperature());
            let figure = match mirror
                .figure(&gravity, &temperature)
                .map_err(TeleSimError::from)
                .and_then(|figure| Ok((self.surfaces(mirror, &figure)?, figure)))
            {
                Ok((s, figure)) => {
                    surfaces.extend(s);
                    figure
                }
                Err(e) => return Err(run.fail(e)),
            };
            log::info!(
                "run #{}: {} figure peak {:.3e}micron",
                run.id,
                mirror.kind(),
                figure.peak()
            );
            figures.push(figure);
        }
        run.figures = figures;
        run.mirrors = surfaces;
        run.state = RunState::MirrorCorrected;
        Ok(())
    }
    /// Computes the camera lens element poses for the configured environment
    ///
    /// The camera hexapod degrees of freedom are checked against the pose bounds when the
    /// run is submitted
    pub fn apply_camera_distortion(&self, run: &mut SimulationRun) -> crate::Result<()> {
        Self::transition(run, RunState::MirrorCorrected, "apply_camera_distortion")?;
        let env = &self.config.environment;
        let temperature = Environment::temperature(&env.camera_temperature, self.camera.n_temperature());
        match self.camera.state(
            env.zenith_angle.to_radians(),
            env.rotation.to_radians(),
            &temperature,
        ) {
            Ok(state) => {
                run.camera = Some(state);
                run.state = RunState::CameraCorrected;
                Ok(())
            }
            Err(e) => Err(run.fail(e.into())),
        }
    }
    /// Adds the stars of the run
    pub fn add_sky(&self, run: &mut SimulationRun, sky: SkySim) -> crate::Result<()> {
        Self::transition(run, RunState::CameraCorrected, "add_sky")?;
        if let Err(e) = sky.validate(self.config.field_radius) {
            return Err(run.fail(e.into()));
        }
        log::info!("run #{}: {} star(s)", run.id, sky.len());
        run.sky = Some(sky);
        run.state = RunState::SkyPopulated;
        Ok(())
    }
    /// Submits the run to the ray tracer
    ///
    /// The run is validated first and the simulator is not invoked if the validation fails
    pub fn submit<S: Simulator>(
        &self,
        run: &mut SimulationRun,
        simulator: &mut S,
    ) -> crate::Result<SimulationOutput> {
        Self::transition(run, RunState::SkyPopulated, "submit")?;
        if let Err(e) = run.validate() {
            return Err(run.fail(e.into()));
        }
        run.state = RunState::Submitted;
        match simulator.submit(run) {
            Ok(output) => {
                run.output = Some(output.clone());
                run.state = RunState::Completed;
                Ok(output)
            }
            Err(e) => Err(run.fail(e.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        camera::{ElementPose, LensElement},
        mirror::DistortionModel,
        M2Sim,
    };
    use nalgebra::DMatrix;

    fn facade() -> TeleFacade {
        let (x, y) = (vec![1.2, 0., -1.5, 0.], vec![0., 1.1, 0., -1.6]);
        let model = DistortionModel::from_print_through(&[0.1, 0.2, 0.3, 0.4], &[0.; 4], DMatrix::zeros(4, 2));
        let m2 = M2Sim::builder().grid(x, y).model(model).build().unwrap();
        let config = SimulationConfig {
            mirrors: vec![MirrorKind::M2],
            n_zernike: 3,
            ..Default::default()
        };
        TeleFacade::builder().config(config).mirror(m2).build().unwrap()
    }

    #[test]
    fn sequence() {
        let mut telescope = facade();
        let mut run = telescope.new_run();
        telescope.apply_mirror_distortion(&mut run).unwrap();
        assert_eq!(run.state(), RunState::MirrorCorrected);
        assert_eq!(run.mirrors().len(), 1);
        assert_eq!(run.mirrors()[0].surface_id, 1);
        assert_eq!(run.mirrors()[0].zernike.len(), 3);
        telescope.apply_camera_distortion(&mut run).unwrap();
        telescope
            .add_sky(&mut run, SkySim::new(Default::default()))
            .unwrap();
        assert_eq!(run.state(), RunState::SkyPopulated);
    }

    #[test]
    fn invalid_transition() {
        let mut telescope = facade();
        let mut run = telescope.new_run();
        let err = telescope.add_sky(&mut run, SkySim::new(Default::default()));
        assert!(matches!(
            err,
            Err(TeleSimError::InvalidTransition {
                state: RunState::Configured,
                call: "add_sky"
            })
        ));
        assert_eq!(run.state(), RunState::Configured);
        assert!(run.diagnostic().is_none());
    }

    #[test]
    fn validation() {
        let mut telescope = facade();
        let mut run = telescope.new_run();
        assert!(run.validate().is_ok());
        run.dof.set_group(DofGroup::CameraHexapod, &[0., 1e4, 0., 0., 0.]).unwrap();
        assert!(matches!(run.validate(), Err(PhosimError::Configuration(_))));
        run.dof.set_group(DofGroup::CameraHexapod, &[0.; 5]).unwrap();
        run.camera = Some(CameraState::default());
        run.camera_mut().unwrap().set_pose(
            LensElement::L3,
            ElementPose {
                rx: 1e3,
                ..Default::default()
            },
        );
        assert!(run.validate().is_err());
    }

    #[test]
    fn dof() {
        let mut telescope = facade();
        let mut delta = vec![0f64; N_DOF];
        delta[0] = 10.;
        telescope.accumulate_dof(&delta).unwrap().accumulate_dof(&delta).unwrap();
        let run = telescope.new_run();
        assert_eq!(run.dof.as_slice()[0], 20.);
        assert_eq!(run.id(), 1);
        assert!(telescope.set_dof(&delta[..10]).is_err());
    }

    #[test]
    fn opd_fields() {
        assert_eq!(OpdFields::Gq.fields().0.len(), 31);
        assert_eq!(OpdFields::Wfs.fields().1, vec![0.25; 4]);
        assert!(OpdFields::Off.fields().0.is_empty());
    }

    #[test]
    fn metrology_atmosphere() {
        let flat = |_: &FieldPoint, _: f64, _: f64| Some(0f64);
        let mut telescope = facade();
        telescope.config.pupil_resolution = 33;
        telescope.config.pupil_diameter = 4.;
        telescope.config.atmosphere = crate::metrology::AtmosphereBuilder::default().n_component(64);
        let metrology = telescope.metrology().unwrap();
        assert_eq!(metrology.pupil().diameter, 4.);
        assert_eq!(metrology.pupil().obscuration, 0.61);
        let m = metrology.measure_field(&flat, FieldPoint::default()).unwrap();
        assert_eq!(m.opd.rms(), 0.);

        telescope.config.observation.atmosphere = true;
        let m = telescope
            .metrology()
            .unwrap()
            .measure_field(&flat, FieldPoint::default())
            .unwrap();
        assert!(m.opd.rms() > 0.);
    }
}
