use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    f64::consts::PI,
    fs::File,
    io::{Read, Write},
    path::{Path, PathBuf},
};

use crate::{Builder, FromBuilder};

/// Wavelength in microns at which `r0` is given
pub const R0_WAVELENGTH: f64 = 0.5;

/// Atmosphere phase screen builder
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AtmosphereBuilder {
    pub r0_at_zenith: f64,
    pub oscale: f64,
    pub zenith_angle: f64,
    pub n_component: usize,
    pub max_frequency: f64,
    pub seed: u64,
}
/// Default properties:
///  * r0           : 16cm
///  * L0           : 25m
///  * zenith angle : 30 degrees
///  * # of Fourier components : 1024
///  * highest spatial frequency : 20 cycles/m
///  * seed : 7
impl Default for AtmosphereBuilder {
    fn default() -> Self {
        AtmosphereBuilder {
            r0_at_zenith: 0.16,
            oscale: 25.,
            zenith_angle: 30_f64.to_radians(),
            n_component: 1024,
            max_frequency: 20.,
            seed: 7,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AtmosphereBuilderError {
    #[error("cannot open `::telesim::AtmosphereBuilder` toml file: {1}")]
    Open(#[source] std::io::Error, PathBuf),
    #[error("cannot create `::telesim::AtmosphereBuilder` toml file: {1}")]
    Create(#[source] std::io::Error, PathBuf),
    #[error("cannot read `::telesim::AtmosphereBuilder` toml file: {1}")]
    Read(#[source] std::io::Error, PathBuf),
    #[error("cannot write `::telesim::AtmosphereBuilder` toml file: {1}")]
    Write(#[source] std::io::Error, PathBuf),
    #[error("cannot deserialize `::telesim::AtmosphereBuilder` from toml")]
    Load(#[from] toml::de::Error),
    #[error("cannot serialize `::telesim::AtmosphereBuilder` into toml")]
    Save(#[from] toml::ser::Error),
}

impl AtmosphereBuilder {
    /// Load the atmospheric builder from a toml
    pub fn load<P: AsRef<Path>>(path: P) -> std::result::Result<Self, AtmosphereBuilderError> {
        let mut file = File::open(&path)
            .map_err(|e| AtmosphereBuilderError::Open(e, path.as_ref().to_path_buf()))?;
        let mut toml = String::new();
        file.read_to_string(&mut toml)
            .map_err(|e| AtmosphereBuilderError::Read(e, path.as_ref().to_path_buf()))?;
        let builder: AtmosphereBuilder = toml::from_str(&toml)?;
        Ok(builder)
    }
    /// Save the atmospheric builder to a toml
    pub fn save<P: AsRef<Path>>(&self, path: P) -> std::result::Result<(), AtmosphereBuilderError> {
        let toml = toml::to_string_pretty(self)?;
        let mut file = File::create(&path)
            .map_err(|e| AtmosphereBuilderError::Create(e, path.as_ref().to_path_buf()))?;
        write!(file, "# ::telesim::AtmosphereBuilder\n\n{}", toml)
            .map_err(|e| AtmosphereBuilderError::Write(e, path.as_ref().to_path_buf()))?;
        Ok(())
    }
    /// Set r0 value taken at pointing the zenith in meters
    pub fn r0_at_zenith(self, r0_at_zenith: f64) -> Self {
        Self {
            r0_at_zenith,
            ..self
        }
    }
    /// Set outer scale value in meters
    pub fn oscale(self, oscale: f64) -> Self {
        Self { oscale, ..self }
    }
    /// Set zenith angle value in radians
    pub fn zenith_angle(self, zenith_angle: f64) -> Self {
        Self {
            zenith_angle,
            ..self
        }
    }
    /// Set the number of Fourier components of the phase screen
    pub fn n_component(self, n_component: usize) -> Self {
        Self {
            n_component,
            ..self
        }
    }
    /// Set the random generator seed
    pub fn seed(self, seed: u64) -> Self {
        Self { seed, ..self }
    }
}

/// Fourier component of a phase screen
#[derive(Debug, Clone, Copy, PartialEq)]
struct Component {
    kx: f64,
    ky: f64,
    amplitude: f64,
    phase: f64,
}

/**
Von Karman phase screen

The screen is a sum of Fourier components with random orientations and phases whose
amplitudes follow the von Karman power spectrum
`0.023 r0^(-5/3) (f^2 + 1/L0^2)^(-11/6)` integrated over log-spaced frequency bins.
The screen is returned as optical path difference in microns.
*/
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseScreen {
    pub r0: f64,
    pub oscale: f64,
    components: Vec<Component>,
}
impl FromBuilder for PhaseScreen {
    type ComponentBuilder = AtmosphereBuilder;
}
impl Builder for AtmosphereBuilder {
    type Component = PhaseScreen;
    fn build(self) -> crate::Result<PhaseScreen> {
        let secz = 1f64 / self.zenith_angle.cos();
        let r0 = (self.r0_at_zenith.powf(-5.0 / 3.0) * secz).powf(-3.0 / 5.0);
        log::info!(
            "Atmosphere r0 at {:.1}degree from zenith: {:.3}m",
            self.zenith_angle.to_degrees(),
            r0
        );
        let mut rng = StdRng::seed_from_u64(self.seed);
        let f_min = 0.1 / self.oscale;
        let f_max = self.max_frequency;
        let n = self.n_component.max(1);
        let log_step = (f_max / f_min).ln() / n as f64;
        let components = (0..n)
            .map(|k| {
                let f_lo = f_min * (k as f64 * log_step).exp();
                let f_hi = f_min * ((k + 1) as f64 * log_step).exp();
                let f = (f_lo * f_hi).sqrt();
                let psd = 0.023
                    * r0.powf(-5. / 3.)
                    * (f * f + self.oscale.powi(-2)).powf(-11. / 6.);
                let area = PI * (f_hi * f_hi - f_lo * f_lo);
                let o = rng.gen_range(0f64..2. * PI);
                Component {
                    kx: 2. * PI * f * o.cos(),
                    ky: 2. * PI * f * o.sin(),
                    amplitude: (2. * psd * area).sqrt(),
                    phase: rng.gen_range(0f64..2. * PI),
                }
            })
            .collect();
        Ok(PhaseScreen {
            r0,
            oscale: self.oscale,
            components,
        })
    }
}
impl PhaseScreen {
    /// Phase in radians at the r0 wavelength at the pupil coordinates `(x,y)` in meters
    pub fn phase(&self, x: f64, y: f64) -> f64 {
        self.components
            .iter()
            .map(|c| c.amplitude * (c.kx * x + c.ky * y + c.phase).cos())
            .sum()
    }
    /// Optical path difference in microns at the pupil coordinates `(x,y)` in meters
    pub fn opd(&self, x: f64, y: f64) -> f64 {
        self.phase(x, y) * R0_WAVELENGTH / (2. * PI)
    }
}
