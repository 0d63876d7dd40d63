use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use super::PhosimCommu;
use crate::{cotransform::CoTransform, Builder};

/// `PhosimCommu` builder
///
/// Default properties:
///  - PhoSim directory : `$PHOSIM_DIR` or `phosim`
///  - python : "python"
///  - output directory : "output"
///  - working directory : "output/work"
///  - instrument : "lsst"
///  - \# processes : 1
///  - e2adc : false
///  - camconfig : 1
///  - timeout : 3600s
///
/// # Examples
///
/// ```
/// use telesim::{Builder, FromBuilder, PhosimCommu};
/// let phosim = PhosimCommu::builder()
///     .phosim_dir("/opt/phosim")
///     .n_proc(8)
///     .timeout(600)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhosimBuilder {
    pub phosim_dir: PathBuf,
    pub python: String,
    pub output_dir: PathBuf,
    pub work_dir: Option<PathBuf>,
    pub instrument: String,
    pub n_proc: usize,
    pub e2adc: bool,
    pub camconfig: usize,
    /// Timeout in seconds
    pub timeout: u64,
    pub cmd_template: Option<PathBuf>,
    pub inst_template: Option<PathBuf>,
}
impl Default for PhosimBuilder {
    fn default() -> Self {
        Self {
            phosim_dir: std::env::var("PHOSIM_DIR")
                .unwrap_or_else(|_| "phosim".into())
                .into(),
            python: "python".into(),
            output_dir: "output".into(),
            work_dir: None,
            instrument: "lsst".into(),
            n_proc: 1,
            e2adc: false,
            camconfig: 1,
            timeout: 3600,
            cmd_template: None,
            inst_template: None,
        }
    }
}
impl PhosimBuilder {
    /// Sets the PhoSim installation directory
    pub fn phosim_dir<P: Into<PathBuf>>(self, phosim_dir: P) -> Self {
        Self {
            phosim_dir: phosim_dir.into(),
            ..self
        }
    }
    /// Sets the python interpreter
    pub fn python<S: Into<String>>(self, python: S) -> Self {
        Self {
            python: python.into(),
            ..self
        }
    }
    /// Sets the directory where PhoSim writes the images and OPD files
    pub fn output_dir<P: Into<PathBuf>>(self, output_dir: P) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..self
        }
    }
    /// Sets the directory of the command, instance, surface map and log files
    pub fn work_dir<P: Into<PathBuf>>(self, work_dir: P) -> Self {
        Self {
            work_dir: Some(work_dir.into()),
            ..self
        }
    }
    /// Sets the number of PhoSim processes
    pub fn n_proc(self, n_proc: usize) -> Self {
        Self { n_proc, ..self }
    }
    /// Enables the electron to ADC conversion
    pub fn e2adc(self, e2adc: bool) -> Self {
        Self { e2adc, ..self }
    }
    /// Sets the camera configuration
    pub fn camconfig(self, camconfig: usize) -> Self {
        Self { camconfig, ..self }
    }
    /// Sets the timeout in seconds
    pub fn timeout(self, timeout: u64) -> Self {
        Self { timeout, ..self }
    }
    /// Sets the file prepended to the physical command files
    pub fn cmd_template<P: Into<PathBuf>>(self, cmd_template: P) -> Self {
        Self {
            cmd_template: Some(cmd_template.into()),
            ..self
        }
    }
    /// Sets the file prepended to the instance files
    pub fn inst_template<P: Into<PathBuf>>(self, inst_template: P) -> Self {
        Self {
            inst_template: Some(inst_template.into()),
            ..self
        }
    }
}
impl Builder for PhosimBuilder {
    type Component = PhosimCommu;
    fn build(self) -> crate::Result<PhosimCommu> {
        let work_dir = self
            .work_dir
            .unwrap_or_else(|| self.output_dir.join("work"));
        log::info!(
            "PhoSim in {:?} with {} process(es), output in {:?}",
            self.phosim_dir,
            self.n_proc,
            self.output_dir
        );
        Ok(PhosimCommu {
            phosim_dir: self.phosim_dir,
            python: self.python,
            output_dir: self.output_dir,
            work_dir,
            instrument: self.instrument,
            n_proc: self.n_proc.max(1),
            e2adc: self.e2adc,
            camconfig: self.camconfig,
            timeout: Duration::from_secs(self.timeout),
            poll_interval: Duration::from_millis(100),
            cmd_template: self.cmd_template,
            inst_template: self.inst_template,
            cotransform: CoTransform::lsst(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FromBuilder;
    use std::path::Path;

    #[test]
    fn args() {
        let phosim = PhosimCommu::builder()
            .phosim_dir("/opt/phosim")
            .output_dir("/tmp/out")
            .n_proc(8)
            .build()
            .unwrap();
        let args = phosim.args(Path::new("star.inst"), Path::new("star.cmd"));
        assert_eq!(
            args.join(" "),
            "/opt/phosim/phosim.py star.inst -c star.cmd -i lsst -e 0 -p 8 -o /tmp/out"
        );
        assert_eq!(phosim.work_dir(), Path::new("/tmp/out/work"));
    }

    #[test]
    fn toml() {
        let builder = PhosimBuilder::default().timeout(10).e2adc(true);
        let s = toml::to_string(&builder).unwrap();
        let other: PhosimBuilder = toml::from_str(&s).unwrap();
        assert_eq!(builder, other);
    }
}
