//!
//! # PhoSim
//!
//! Protocol adapter to the [PhoSim](https://bitbucket.org/phosim/phosim_release) ray tracer.
//!
//! [PhosimCommu] writes the physical command file and the instance file of a
//! [SimulationRun], runs PhoSim and collects the OPD and image files PhoSim writes in the
//! output directory.
//! Errors detected before PhoSim is started are [PhosimError::Configuration] errors;
//! PhoSim failures are [PhosimError::Simulation] errors and the run may be tried again.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::{
    fmt::Display,
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    str::FromStr,
    thread,
    time::{Duration, Instant},
};

use crate::{
    camera::FramePose,
    cotransform::{CoTransform, OpticalFrame},
    mirror::{GridResidueMap, MirrorKind},
    sky::Pointing,
    telescope::SimulationRun,
    FromBuilder,
};

mod builder;
pub mod command;
pub use builder::PhosimBuilder;

#[derive(Debug, thiserror::Error)]
pub enum PhosimError {
    #[error("invalid simulation run: {0}")]
    Configuration(String),
    #[error("PhoSim simulation failed: {reason} (see {log:?})")]
    Simulation { reason: String, log: PathBuf },
}
impl PhosimError {
    /// Simulation failures may succeed when the run is submitted again
    pub fn is_retryable(&self) -> bool {
        matches!(self, PhosimError::Simulation { .. })
    }
}
pub type Result<T> = std::result::Result<T, PhosimError>;

/// Synchronous interface to a ray tracer
pub trait Simulator {
    /// Runs the simulation of `run` and returns the files written by the ray tracer
    fn submit(&mut self, run: &SimulationRun) -> Result<SimulationOutput>;
}

/// LSST filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    U,
    #[default]
    G,
    R,
    I,
    Z,
    Y,
}
impl Filter {
    /// PhoSim filter index
    pub fn index(&self) -> usize {
        match self {
            Filter::U => 0,
            Filter::G => 1,
            Filter::R => 2,
            Filter::I => 3,
            Filter::Z => 4,
            Filter::Y => 5,
        }
    }
}
impl Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let c = ["u", "g", "r", "i", "z", "y"][self.index()];
        write!(f, "{c}")
    }
}
impl FromStr for Filter {
    type Err = PhosimError;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "u" => Ok(Filter::U),
            "g" => Ok(Filter::G),
            "r" => Ok(Filter::R),
            "i" => Ok(Filter::I),
            "z" => Ok(Filter::Z),
            "y" => Ok(Filter::Y),
            _ => Err(PhosimError::Configuration(format!("unknown filter {s}"))),
        }
    }
}

/// Observation parameters of the instance file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Observation {
    pub obs_id: u32,
    pub filter: Filter,
    /// Modified Julian date
    pub mjd: f64,
    pub seed: u32,
    /// Wavelength in nm of the OPD field points
    pub wavelength: f64,
    /// Atmosphere turbulence and opacity
    pub atmosphere: bool,
    /// Spectral energy distribution file of the stars
    pub sed: String,
    pub pointing: Pointing,
}
/// Default properties:
///  * observation id : 9006000
///  * filter : g
///  * MJD : 59580
///  * seed : 1000
///  * pointing : (0,0)deg with no rotation
///  * wavelength : 500nm
///  * atmosphere : off
///  * SED : sed_500.txt
impl Default for Observation {
    fn default() -> Self {
        Self {
            obs_id: 9006000,
            filter: Filter::G,
            mjd: 59580.,
            seed: 1000,
            wavelength: 500.,
            atmosphere: false,
            sed: "sed_500.txt".into(),
            pointing: Pointing::default(),
        }
    }
}

/// Mirror surface perturbation sent to the ray tracer
#[derive(Debug, Clone)]
pub struct SurfacePerturbation {
    pub mirror: MirrorKind,
    pub name: &'static str,
    /// Ray tracer surface index
    pub surface_id: usize,
    /// Zernike coefficients in microns in the global frame
    pub zernike: DVector<f64>,
    /// Residue map after removing the Zernikes
    pub residue: Option<GridResidueMap>,
    /// Surface sharing the residue map of this one
    pub linked_to: Option<usize>,
}

/// Files written by the ray tracer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationOutput {
    pub output_dir: PathBuf,
    pub opd: Vec<PathBuf>,
    pub images: Vec<PathBuf>,
    pub log: Option<PathBuf>,
}
impl SimulationOutput {
    pub fn is_empty(&self) -> bool {
        self.opd.is_empty() && self.images.is_empty()
    }
}

/// PhoSim driver
#[derive(Debug, Clone)]
pub struct PhosimCommu {
    phosim_dir: PathBuf,
    python: String,
    output_dir: PathBuf,
    work_dir: PathBuf,
    instrument: String,
    n_proc: usize,
    e2adc: bool,
    camconfig: usize,
    timeout: Duration,
    poll_interval: Duration,
    cmd_template: Option<PathBuf>,
    inst_template: Option<PathBuf>,
    cotransform: CoTransform,
}
impl FromBuilder for PhosimCommu {
    type ComponentBuilder = PhosimBuilder;
}
impl PhosimCommu {
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }
    fn phosim_script(&self) -> PathBuf {
        self.phosim_dir.join("phosim.py")
    }
    fn template(path: &Option<PathBuf>) -> Result<String> {
        match path {
            Some(path) => fs::read_to_string(path).map_err(|e| {
                PhosimError::Configuration(format!("cannot read template {path:?}: {e}"))
            }),
            None => Ok(String::new()),
        }
    }
    fn write(path: &Path, content: &str) -> Result<()> {
        File::create(path)
            .and_then(|mut f| f.write_all(content.as_bytes()))
            .map_err(|e| PhosimError::Configuration(format!("cannot write {path:?}: {e}")))
    }
    /// Physical command file content of the run
    ///
    /// The surface residue maps are written in the working directory
    pub fn command_file(&self, run: &SimulationRun) -> Result<String> {
        let mut content = Self::template(&self.cmd_template)?;
        content.push_str(&command::dof_commands(run.dof.as_slice()));
        for surface in run.mirrors() {
            content.push_str(&command::zernike_commands(surface));
            if let Some(map) = &surface.residue {
                let path = self.work_dir.join(format!("{}res.txt", surface.name));
                map.to_file(&path).map_err(|e| {
                    PhosimError::Configuration(format!("cannot write {path:?}: {e}"))
                })?;
                content.push_str(&command::surface_map(surface.surface_id, &path));
            }
            if let Some(link) = surface.linked_to {
                content.push_str(&command::surface_link(surface.surface_id, link));
            }
        }
        if let Some(camera) = run.camera() {
            let poses: Vec<FramePose> = camera
                .poses_in(OpticalFrame::PhoSim, &self.cotransform)
                .map_err(|e| PhosimError::Configuration(e.to_string()))?;
            content.push_str(&command::body_commands(&poses));
        }
        if !run.observation.atmosphere {
            content.push_str(&command::clear_atmosphere());
        }
        content.push_str(&format!("camconfig {}\n", self.camconfig));
        Ok(content)
    }
    /// Instance file content of the run
    pub fn instance_file(&self, run: &SimulationRun) -> Result<String> {
        let mut content = Self::template(&self.inst_template)?;
        content.push_str(&command::observation(&run.observation));
        if let Some(sky) = run.sky() {
            for star in sky.stars() {
                content.push_str(&command::object(star, &run.observation.sed));
            }
        }
        for (id, field) in run.opd_fields().iter().enumerate() {
            content.push_str(&command::opd(id, field, run.observation.wavelength));
        }
        Ok(content)
    }
    /// PhoSim command line arguments
    pub fn args(&self, inst_file: &Path, cmd_file: &Path) -> Vec<String> {
        vec![
            self.phosim_script().display().to_string(),
            inst_file.display().to_string(),
            "-c".into(),
            cmd_file.display().to_string(),
            "-i".into(),
            self.instrument.clone(),
            "-e".into(),
            (self.e2adc as usize).to_string(),
            "-p".into(),
            self.n_proc.to_string(),
            "-o".into(),
            self.output_dir.display().to_string(),
        ]
    }
    /// Runs PhoSim until it exits or the timeout expires
    fn run(&self, args: &[String], log_path: &Path) -> Result<()> {
        let simulation_error = |reason: String| PhosimError::Simulation {
            reason,
            log: log_path.to_path_buf(),
        };
        let log = File::create(log_path)
            .map_err(|e| PhosimError::Configuration(format!("cannot create {log_path:?}: {e}")))?;
        let err_log = log
            .try_clone()
            .map_err(|e| PhosimError::Configuration(e.to_string()))?;
        log::info!("running: {} {}", self.python, args.join(" "));
        let mut child = Command::new(&self.python)
            .args(args)
            .current_dir(&self.phosim_dir)
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(err_log)
            .spawn()
            .map_err(|e| {
                PhosimError::Configuration(format!("cannot start {}: {e}", self.python))
            })?;
        let now = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if now.elapsed() > self.timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(simulation_error(format!(
                        "timed out after {:.0}s",
                        self.timeout.as_secs_f64()
                    )));
                }
                Ok(None) => thread::sleep(self.poll_interval),
                Err(e) => return Err(simulation_error(e.to_string())),
            }
        };
        log::info!("PhoSim exited after {:.1}s", now.elapsed().as_secs_f64());
        if status.success() {
            Ok(())
        } else {
            Err(simulation_error(format!("exit status: {status}")))
        }
    }
    /// Lists the OPD and image files of the observation in the output directory
    pub fn collect_artifacts(&self, obs_id: u32) -> std::io::Result<SimulationOutput> {
        let mut output = SimulationOutput {
            output_dir: self.output_dir.clone(),
            ..Default::default()
        };
        let obs_id = obs_id.to_string();
        for entry in fs::read_dir(&self.output_dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.contains(&obs_id) || !name.contains(".fits") {
                continue;
            }
            if name.starts_with("opd_") {
                output.opd.push(path);
            } else if name.starts_with(&self.instrument) {
                output.images.push(path);
            }
        }
        output.opd.sort();
        output.images.sort();
        Ok(output)
    }
    /// Removes the OPD and image files left in the output directory by a previous run of
    /// the observation
    pub fn clear_artifacts(&self, obs_id: u32) -> std::io::Result<usize> {
        let stale = self.collect_artifacts(obs_id)?;
        let n = stale.opd.len() + stale.images.len();
        for path in stale.opd.iter().chain(&stale.images) {
            fs::remove_file(path)?;
        }
        if n > 0 {
            log::info!(
                "{n} stale file(s) of observation {obs_id} removed from {:?}",
                self.output_dir
            );
        }
        Ok(n)
    }
}

impl Simulator for PhosimCommu {
    fn submit(&mut self, run: &SimulationRun) -> Result<SimulationOutput> {
        run.validate()?;
        if !self.phosim_script().is_file() {
            return Err(PhosimError::Configuration(format!(
                "{:?} not found",
                self.phosim_script()
            )));
        }
        for dir in [&self.output_dir, &self.work_dir] {
            fs::create_dir_all(dir)
                .map_err(|e| PhosimError::Configuration(format!("cannot create {dir:?}: {e}")))?;
        }
        let stem = format!("run{}_{}", run.id(), run.observation.obs_id);
        let cmd_file = self.work_dir.join(format!("{stem}.cmd"));
        let inst_file = self.work_dir.join(format!("{stem}.inst"));
        let log_path = self.work_dir.join(format!("{stem}.log"));
        self.clear_artifacts(run.observation.obs_id).map_err(|e| {
            PhosimError::Configuration(format!("cannot clear {:?}: {e}", self.output_dir))
        })?;
        Self::write(&cmd_file, &self.command_file(run)?)?;
        Self::write(&inst_file, &self.instance_file(run)?)?;

        self.run(&self.args(&inst_file, &cmd_file), &log_path)?;

        let simulation_error = |reason: String| PhosimError::Simulation {
            reason,
            log: log_path.clone(),
        };
        let mut output = self
            .collect_artifacts(run.observation.obs_id)
            .map_err(|e| simulation_error(e.to_string()))?;
        if !run.opd_fields().is_empty() && output.opd.is_empty() {
            return Err(simulation_error("no OPD file found".into()));
        }
        if run.sky().is_some_and(|sky| !sky.is_empty()) && output.images.is_empty() {
            return Err(simulation_error("no image found".into()));
        }
        if let Some(empty) = output
            .opd
            .iter()
            .chain(&output.images)
            .find(|p| fs::metadata(p).map_or(true, |m| m.len() == 0))
        {
            return Err(simulation_error(format!("{empty:?} is empty")));
        }
        output.log = Some(log_path);
        log::info!(
            "PhoSim run #{}: {} OPD and {} image files",
            run.id(),
            output.opd.len(),
            output.images.len()
        );
        Ok(output)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::{telescope::SimulationConfig, Builder, TeleFacade};

    fn phosim(dir: &Path, script: &str, timeout: u64) -> PhosimCommu {
        let phosim_dir = dir.join("phosim");
        fs::create_dir_all(&phosim_dir).unwrap();
        fs::write(phosim_dir.join("phosim.py"), script).unwrap();
        PhosimCommu::builder()
            .phosim_dir(phosim_dir)
            .python("sh")
            .output_dir(dir.join("output"))
            .timeout(timeout)
            .build()
            .unwrap()
    }

    fn run() -> SimulationRun {
        let config = SimulationConfig {
            mirrors: vec![],
            ..Default::default()
        };
        TeleFacade::builder()
            .config(config)
            .build()
            .unwrap()
            .new_run()
    }

    #[test]
    fn success() {
        let dir = tempfile::tempdir().unwrap();
        let mut phosim = phosim(
            dir.path(),
            r#"echo "PhoSim $@"
echo opd > "${11}/opd_9006000_0.fits.gz"
echo image > "${11}/lsst_e_9006000_f1_R22_S11_E000.fits.gz"
echo other > "${11}/lsst_e_1234_f1_R22_S11_E000.fits.gz"
"#,
            60,
        );
        let run = run();
        let output = phosim.submit(&run).unwrap();
        assert_eq!(output.opd.len(), 1);
        assert_eq!(output.images.len(), 1);
        let log = fs::read_to_string(output.log.unwrap()).unwrap();
        assert!(log.contains("-i lsst -e 0 -p 1"));
        let cmd = fs::read_to_string(phosim.work_dir().join("run1_9006000.cmd")).unwrap();
        assert!(cmd.starts_with("move 0 0.0000\n"));
        assert!(cmd.ends_with("clearclouds 1\ncamconfig 1\n"));
        let inst = fs::read_to_string(phosim.work_dir().join("run1_9006000.inst")).unwrap();
        assert_eq!(inst.lines().filter(|l| l.starts_with("opd")).count(), 31);
    }

    #[test]
    fn stale_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let mut phosim = phosim(
            dir.path(),
            r#"echo opd > "${11}/opd_9006000_0.fits.gz""#,
            60,
        );
        let run = run();
        let opd = phosim.submit(&run).unwrap().opd;
        assert_eq!(opd.len(), 1);
        fs::write(dir.path().join("phosim").join("phosim.py"), "exit 0\n").unwrap();
        let err = phosim.submit(&run).unwrap_err();
        assert!(matches!(err, PhosimError::Simulation { reason, .. } if reason == "no OPD file found"));
        assert!(!opd[0].exists());
    }

    #[test]
    fn exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut phosim = phosim(dir.path(), "echo failed >&2\nexit 3\n", 60);
        let err = phosim.submit(&run()).unwrap_err();
        assert!(err.is_retryable());
        let PhosimError::Simulation { log, .. } = err else {
            panic!("expected a simulation error")
        };
        assert!(fs::read_to_string(log).unwrap().contains("failed"));
    }

    #[test]
    fn missing_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let mut phosim = phosim(dir.path(), "exit 0\n", 60);
        let err = phosim.submit(&run()).unwrap_err();
        assert!(matches!(err, PhosimError::Simulation { reason, .. } if reason == "no OPD file found"));
    }

    #[test]
    fn timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mut phosim = phosim(dir.path(), "sleep 30\n", 1);
        let now = Instant::now();
        let err = phosim.submit(&run()).unwrap_err();
        assert!(now.elapsed() < Duration::from_secs(10));
        assert!(matches!(err, PhosimError::Simulation { reason, .. } if reason.starts_with("timed out")));
    }

    #[test]
    fn missing_script() {
        let dir = tempfile::tempdir().unwrap();
        let mut phosim = PhosimCommu::builder()
            .phosim_dir(dir.path())
            .output_dir(dir.path().join("output"))
            .build()
            .unwrap();
        let err = phosim.submit(&run()).unwrap_err();
        assert!(matches!(err, PhosimError::Configuration(_)));
        assert!(!err.is_retryable());
    }
}
