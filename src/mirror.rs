//!
//! # Mirror distortion
//!
//! Gravity and thermal print-through of the telescope mirrors.
//!
//! A mirror surface correction is the linear superposition of the FEA sensitivities:
//! `figure = G . gravity + T . temperature + lut`, where `G` and `T` are the gravity and
//! temperature sensitivity matrices of the [DistortionModel] and `lut` the optional
//! zenith angle look-up table correction.
//! The mirror geometry comes from a [MirrorDescriptor]: [M1M3] or [M2].
//!
//! ```
//! use telesim::{Builder, FromBuilder, M2Sim, mirror::DistortionModel};
//! use nalgebra::{DMatrix, DVector, Vector3};
//!
//! let (x, y) = (vec![1.2, 0., -1.5], vec![0., 1.1, 0.]);
//! let model = DistortionModel::new(DMatrix::from_element(3, 3, 1e-2), DMatrix::zeros(3, 2));
//! let m2 = M2Sim::builder().grid(x, y).model(model).build().unwrap();
//! let figure = m2.figure(&Vector3::new(0., 0., -1.), &DVector::zeros(2)).unwrap();
//! assert_eq!(figure.values().len(), 3);
//! ```

use nalgebra::{DMatrix, DVector, Vector3};
use serde::{Deserialize, Serialize};
use std::{
    fmt::Display,
    marker::PhantomData,
    ops::Mul,
    path::PathBuf,
    sync::Arc,
};

use crate::{
    cotransform::{CoTransform, FrameError, OpticalFrame},
    metrology::{MetrologyError, ZernikeBasis},
    FromBuilder,
};

mod builder;
mod grid_residue;
mod m1m3;
mod m2;
pub use builder::{read_table, MirrorSimBuilder};
pub(crate) use grid_residue::sci;
pub use grid_residue::{GridResidueMap, GridSample};
pub use m1m3::M1M3;
pub use m2::M2;

#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("cannot open mirror data file {1}")]
    Open(#[source] std::io::Error, PathBuf),
    #[error("cannot parse line {line} of {path}: {msg}")]
    Parse {
        path: PathBuf,
        line: usize,
        msg: String,
    },
    #[error("mirror data shape mismatch: expected {expected} found {found}")]
    Shape { expected: String, found: String },
    #[error("the zenith angles of the look-up table are not increasing")]
    LutOrder,
    #[error("no mirror data: set either the data directory or the grid and distortion model")]
    MissingData,
    #[error("no bending modes in the {0} distortion model")]
    NoBendingModes(MirrorKind),
    #[error("no actuator forces in the {0} distortion model")]
    NoActuatorForces(MirrorKind),
    #[error("cannot combine a {0} figure with a {1} figure")]
    FigureMismatch(MirrorKind, MirrorKind),
    #[error("the grid residue map radial basis interpolation is singular")]
    SingularInterpolation,
    #[error("mirror coordinate transform failed")]
    Frame(#[from] FrameError),
    #[error("mirror Zernike fit failed")]
    Metrology(#[from] MetrologyError),
}
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Mirror selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MirrorKind {
    M1M3,
    M2,
}
impl Display for MirrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MirrorKind::M1M3 => write!(f, "M1M3"),
            MirrorKind::M2 => write!(f, "M2"),
        }
    }
}

/// Clear annulus of a mirror surface
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aperture {
    pub name: &'static str,
    /// Inner radius in meters
    pub inner: f64,
    /// Outer radius in meters
    pub outer: f64,
    /// Surface index in the ray tracer
    pub surface_id: usize,
}
impl Aperture {
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let r = x.hypot(y);
        r >= self.inner && r <= self.outer
    }
}

/// Range of the inputs the FEA model has been calibrated for
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationEnvelope {
    /// Largest gravity vector norm (1 is the Earth gravity)
    pub gravity_norm: f64,
    /// Largest absolute value of each temperature driver
    pub temperature_limit: f64,
}

/// Mirror geometry and FEA data layout
pub trait MirrorDescriptor: Default + Clone + std::fmt::Debug + Send + Sync + 'static {
    fn kind() -> MirrorKind;
    /// Mirror local frame
    fn frame() -> OpticalFrame;
    fn apertures() -> Vec<Aperture>;
    /// Names of the temperature drivers, ordered as the columns of the temperature matrix
    fn temperature_drivers() -> &'static [&'static str];
    fn envelope() -> CalibrationEnvelope;
    /// FEA data file: `x y zdz hdz` followed by one column per temperature driver
    fn fea_file() -> &'static str;
    /// Zenith angle look-up table file
    fn lut_file() -> &'static str;
    /// Bending modes file: one column per mode
    fn bending_modes_file() -> &'static str;
    /// Actuator forces file: one row per actuator, in N
    fn actuator_force_file() -> Option<&'static str> {
        None
    }
    fn outer_radius() -> f64 {
        Self::apertures()
            .iter()
            .fold(f64::NEG_INFINITY, |a, ap| a.max(ap.outer))
    }
    fn inner_radius() -> f64 {
        Self::apertures()
            .iter()
            .fold(f64::INFINITY, |a, ap| a.min(ap.inner))
    }
    fn contains(x: f64, y: f64) -> bool {
        Self::apertures().iter().any(|ap| ap.contains(x, y))
    }
}

/// Gravity vector in the mirror frame for a telescope pointing at `zenith_angle` radians
///
/// The vector is `(0, sin(z), -cos(z))`: `(0,0,-1)` at zenith
pub fn gravity_at_zenith(zenith_angle: f64) -> Vector3<f64> {
    Vector3::new(0., zenith_angle.sin(), -zenith_angle.cos())
}

/// Zenith angle look-up table
///
/// The first row of the table holds the zenith angles in degrees and the other rows the
/// surface corrections in microns at each grid point.
#[derive(Debug, Clone, PartialEq)]
pub struct LookUpTable {
    zenith_angles: Vec<f64>,
    table: DMatrix<f64>,
}
impl LookUpTable {
    /// Creates a table from the zenith angles and the corrections (one column per angle)
    pub fn new(zenith_angles: Vec<f64>, table: DMatrix<f64>) -> Result<Self> {
        if zenith_angles.windows(2).any(|w| w[1] - w[0] <= 0f64) {
            return Err(MirrorError::LutOrder);
        }
        if zenith_angles.len() != table.ncols() || zenith_angles.is_empty() {
            return Err(MirrorError::Shape {
                expected: format!("{} columns", zenith_angles.len()),
                found: format!("{} columns", table.ncols()),
            });
        }
        Ok(Self {
            zenith_angles,
            table,
        })
    }
    /// Creates a table from the raw data file layout
    pub fn from_rows(data: DMatrix<f64>) -> Result<Self> {
        if data.nrows() < 2 {
            return Err(MirrorError::Shape {
                expected: "a zenith angle row and correction rows".into(),
                found: format!("{} rows", data.nrows()),
            });
        }
        let zenith_angles = data.row(0).iter().cloned().collect();
        let table = data.rows(1, data.nrows() - 1).into_owned();
        Self::new(zenith_angles, table)
    }
    pub fn len(&self) -> usize {
        self.table.nrows()
    }
    pub fn is_empty(&self) -> bool {
        self.table.nrows() == 0
    }
    /// Linear interpolation of the table at `zenith_angle` degrees
    ///
    /// Zenith angles outside the table use the first or last column
    pub fn interpolate(&self, zenith_angle: f64) -> DVector<f64> {
        let ruler = &self.zenith_angles;
        let n = ruler.len();
        if zenith_angle >= ruler[n - 1] {
            return self.table.column(n - 1).into_owned();
        }
        if zenith_angle <= ruler[0] {
            return self.table.column(0).into_owned();
        }
        let p1 = ruler.iter().rposition(|&z| z <= zenith_angle).unwrap_or(0);
        let p2 = p1 + 1;
        let w2 = (zenith_angle - ruler[p1]) / (ruler[p2] - ruler[p1]);
        let w1 = 1. - w2;
        self.table.column(p1) * w1 + self.table.column(p2) * w2
    }
}

/// Mirror FEA sensitivities
#[derive(Debug, Clone, PartialEq)]
pub struct DistortionModel {
    /// Gravity sensitivity matrix `[n_grid x 3]` in microns per unit gravity component
    pub gravity: DMatrix<f64>,
    /// Temperature sensitivity matrix `[n_grid x n_driver]` in microns per unit driver
    pub temperature: DMatrix<f64>,
    pub lut: Option<LookUpTable>,
    /// Bending modes `[n_grid x n_mode]` in microns
    pub bending_modes: Option<DMatrix<f64>>,
    /// Actuator forces in N, one row per actuator
    pub actuator_forces: Option<DMatrix<f64>>,
}
impl DistortionModel {
    pub fn new(gravity: DMatrix<f64>, temperature: DMatrix<f64>) -> Self {
        Self {
            gravity,
            temperature,
            lut: None,
            bending_modes: None,
            actuator_forces: None,
        }
    }
    /// Model from the zenith (`zdz`) and horizon (`hdz`) FEA print-through
    ///
    /// With the gravity vector `(0, sin(z), -cos(z))`, the print-through is
    /// `zdz cos(z) + hdz sin(z)`
    pub fn from_print_through(zdz: &[f64], hdz: &[f64], temperature: DMatrix<f64>) -> Self {
        let n = zdz.len();
        let gravity = DMatrix::from_fn(n, 3, |i, j| match j {
            1 => hdz[i],
            2 => -zdz[i],
            _ => 0f64,
        });
        Self::new(gravity, temperature)
    }
    pub fn lut(self, lut: LookUpTable) -> Self {
        Self {
            lut: Some(lut),
            ..self
        }
    }
    pub fn bending_modes(self, bending_modes: DMatrix<f64>) -> Self {
        Self {
            bending_modes: Some(bending_modes),
            ..self
        }
    }
    pub fn actuator_forces(self, actuator_forces: DMatrix<f64>) -> Self {
        Self {
            actuator_forces: Some(actuator_forces),
            ..self
        }
    }
    pub fn n_grid(&self) -> usize {
        self.gravity.nrows()
    }
    pub fn n_temperature(&self) -> usize {
        self.temperature.ncols()
    }
    fn check(&self, n_grid: usize, n_driver: usize) -> Result<()> {
        let shape = |m: &DMatrix<f64>| format!("[{}x{}]", m.nrows(), m.ncols());
        if self.gravity.shape() != (n_grid, 3) {
            return Err(MirrorError::Shape {
                expected: format!("gravity [{n_grid}x3]"),
                found: shape(&self.gravity),
            });
        }
        if self.temperature.shape() != (n_grid, n_driver) {
            return Err(MirrorError::Shape {
                expected: format!("temperature [{n_grid}x{n_driver}]"),
                found: shape(&self.temperature),
            });
        }
        if let Some(lut) = &self.lut {
            if lut.len() != n_grid {
                return Err(MirrorError::Shape {
                    expected: format!("look-up table with {n_grid} rows"),
                    found: format!("{} rows", lut.len()),
                });
            }
        }
        if let Some(modes) = &self.bending_modes {
            if modes.nrows() != n_grid {
                return Err(MirrorError::Shape {
                    expected: format!("bending modes with {n_grid} rows"),
                    found: shape(modes),
                });
            }
        }
        Ok(())
    }
}

/// Positions in meters of the FEA nodes in the mirror frame
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MirrorGrid {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}
impl MirrorGrid {
    pub fn len(&self) -> usize {
        self.x.len()
    }
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// Input clamped to the calibration envelope
#[derive(Debug, Clone, PartialEq)]
pub struct OutOfRangeWarning {
    pub component: String,
    pub input: String,
    pub requested: f64,
    pub clamped: f64,
}
impl Display for OutOfRangeWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} out of the calibration range: {:.4} clamped to {:.4}",
            self.component, self.input, self.requested, self.clamped
        )
    }
}

/// Mirror surface correction in microns along the local z axis
#[derive(Debug, Clone)]
pub struct MirrorFigure {
    pub kind: MirrorKind,
    grid: Arc<MirrorGrid>,
    values: DVector<f64>,
    valid: Arc<Vec<bool>>,
    pub warnings: Vec<OutOfRangeWarning>,
}
impl MirrorFigure {
    pub fn values(&self) -> &[f64] {
        self.values.as_slice()
    }
    pub fn grid(&self) -> &MirrorGrid {
        &self.grid
    }
    /// Aperture mask
    pub fn valid(&self) -> &[bool] {
        &self.valid
    }
    /// Coordinates and values of the grid points inside the aperture
    pub fn valid_samples(&self) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let mut xyz = (vec![], vec![], vec![]);
        for (((x, y), z), v) in self
            .grid
            .x
            .iter()
            .zip(&self.grid.y)
            .zip(self.values.iter())
            .zip(self.valid.iter())
        {
            if *v {
                xyz.0.push(*x);
                xyz.1.push(*y);
                xyz.2.push(*z);
            }
        }
        xyz
    }
    pub fn is_clamped(&self) -> bool {
        !self.warnings.is_empty()
    }
    /// Largest absolute correction in microns
    pub fn peak(&self) -> f64 {
        self.values.amax()
    }
}
impl MirrorFigure {
    /// Sum of 2 figures of the same mirror sampled on the same grid
    pub fn try_add(&self, rhs: &MirrorFigure) -> Result<MirrorFigure> {
        if self.kind != rhs.kind {
            return Err(MirrorError::FigureMismatch(self.kind, rhs.kind));
        }
        if self.values.len() != rhs.values.len() {
            return Err(MirrorError::Shape {
                expected: format!("{} grid points", self.values.len()),
                found: rhs.values.len().to_string(),
            });
        }
        let mut warnings = self.warnings.clone();
        warnings.extend(rhs.warnings.iter().cloned());
        Ok(MirrorFigure {
            kind: self.kind,
            grid: self.grid.clone(),
            values: &self.values + &rhs.values,
            valid: self.valid.clone(),
            warnings,
        })
    }
}
impl Mul<f64> for &MirrorFigure {
    type Output = MirrorFigure;
    fn mul(self, rhs: f64) -> Self::Output {
        MirrorFigure {
            values: &self.values * rhs,
            ..self.clone()
        }
    }
}

/// Mirror residue after removing the best fitting Zernike polynomials in the global frame
#[derive(Debug, Clone)]
pub struct MirrorResidue {
    /// Grid positions in meters in the global frame
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// Residue in microns
    pub residue: Vec<f64>,
    /// Zernike coefficients in microns
    pub zernike: DVector<f64>,
}

/// Mirror distortion model
#[derive(Debug, Clone)]
pub struct MirrorSim<D: MirrorDescriptor> {
    grid: Arc<MirrorGrid>,
    model: Arc<DistortionModel>,
    valid: Arc<Vec<bool>>,
    envelope: CalibrationEnvelope,
    descriptor: PhantomData<D>,
}
pub type M1M3Sim = MirrorSim<M1M3>;
pub type M2Sim = MirrorSim<M2>;

impl<D: MirrorDescriptor> FromBuilder for MirrorSim<D> {
    type ComponentBuilder = MirrorSimBuilder<D>;
}

impl<D: MirrorDescriptor> MirrorSim<D> {
    pub(crate) fn new(
        grid: MirrorGrid,
        model: Arc<DistortionModel>,
        envelope: CalibrationEnvelope,
    ) -> Result<Self> {
        if grid.x.len() != grid.y.len() {
            return Err(MirrorError::Shape {
                expected: format!("{} y coordinates", grid.x.len()),
                found: format!("{}", grid.y.len()),
            });
        }
        model.check(grid.len(), D::temperature_drivers().len())?;
        let valid: Vec<bool> = grid
            .x
            .iter()
            .zip(&grid.y)
            .map(|(x, y)| D::contains(*x, *y))
            .collect();
        log::info!(
            "{} mirror: {} grid points ({} in the clear aperture)",
            D::kind(),
            grid.len(),
            valid.iter().filter(|&&v| v).count()
        );
        Ok(Self {
            grid: Arc::new(grid),
            model,
            valid: Arc::new(valid),
            envelope,
            descriptor: PhantomData,
        })
    }
    pub fn kind(&self) -> MirrorKind {
        D::kind()
    }
    pub fn grid(&self) -> &MirrorGrid {
        &self.grid
    }
    /// Shared distortion model
    pub fn model(&self) -> Arc<DistortionModel> {
        self.model.clone()
    }
    pub fn envelope(&self) -> &CalibrationEnvelope {
        &self.envelope
    }
    fn warning(&self, input: String, requested: f64, clamped: f64) -> OutOfRangeWarning {
        let warning = OutOfRangeWarning {
            component: D::kind().to_string(),
            input,
            requested,
            clamped,
        };
        log::warn!("{warning}");
        warning
    }
    /// Clamps the gravity vector to the calibration envelope
    ///
    /// Vectors longer than the envelope are scaled back onto it, keeping their direction
    pub fn clamp_gravity(&self, gravity: &Vector3<f64>) -> (Vector3<f64>, Option<OutOfRangeWarning>) {
        let norm = gravity.norm();
        if norm > self.envelope.gravity_norm * (1. + f64::EPSILON.sqrt()) {
            let clamped = gravity * (self.envelope.gravity_norm / norm);
            let w = self.warning("gravity norm".into(), norm, self.envelope.gravity_norm);
            (clamped, Some(w))
        } else {
            (*gravity, None)
        }
    }
    /// Clamps each temperature driver to the calibration envelope
    pub fn clamp_temperature(
        &self,
        temperature: &DVector<f64>,
    ) -> (DVector<f64>, Vec<OutOfRangeWarning>) {
        let limit = self.envelope.temperature_limit;
        let mut warnings = vec![];
        let clamped = DVector::from_iterator(
            temperature.len(),
            temperature.iter().enumerate().map(|(i, &t)| {
                let c = t.clamp(-limit, limit);
                if c != t {
                    let name = D::temperature_drivers().get(i).unwrap_or(&"driver");
                    warnings.push(self.warning(format!("temperature {name}"), t, c));
                }
                c
            }),
        );
        (clamped, warnings)
    }
    fn check_temperature(&self, temperature: &DVector<f64>) -> Result<()> {
        if temperature.len() != self.model.n_temperature() {
            Err(MirrorError::Shape {
                expected: format!(
                    "{} temperature drivers {:?}",
                    self.model.n_temperature(),
                    D::temperature_drivers()
                ),
                found: format!("{}", temperature.len()),
            })
        } else {
            Ok(())
        }
    }
    fn masked(&self, values: DVector<f64>, warnings: Vec<OutOfRangeWarning>) -> MirrorFigure {
        let values = values.zip_map(
            &DVector::from_iterator(self.valid.len(), self.valid.iter().cloned()),
            |v, m| if m { v } else { 0f64 },
        );
        MirrorFigure {
            kind: D::kind(),
            grid: self.grid.clone(),
            values,
            valid: self.valid.clone(),
            warnings,
        }
    }
    /// Surface correction for the gravity vector and temperature drivers
    ///
    /// `figure = G . gravity + T . temperature + lut(zenith angle)` where the zenith angle
    /// is derived from the gravity direction
    pub fn figure(
        &self,
        gravity: &Vector3<f64>,
        temperature: &DVector<f64>,
    ) -> Result<MirrorFigure> {
        self.check_temperature(temperature)?;
        let (g, gw) = self.clamp_gravity(gravity);
        let (t, mut warnings) = self.clamp_temperature(temperature);
        warnings.extend(gw);
        let mut values =
            &self.model.gravity * DVector::from_column_slice(g.as_slice()) + &self.model.temperature * t;
        if let Some(lut) = &self.model.lut {
            let zenith = if g.norm() > 0f64 {
                (-g.z / g.norm()).clamp(-1., 1.).acos().to_degrees()
            } else {
                0f64
            };
            values += lut.interpolate(zenith);
        }
        Ok(self.masked(values, warnings))
    }
    /// Gravity print-through at `zenith_angle` minus the print-through at the
    /// pre-compensation zenith angle (both in radians)
    pub fn print_through(&self, zenith_angle: f64, precomp_zenith_angle: f64) -> MirrorFigure {
        let g = gravity_at_zenith(zenith_angle) - gravity_at_zenith(precomp_zenith_angle);
        let values = &self.model.gravity * DVector::from_column_slice(g.as_slice());
        self.masked(values, vec![])
    }
    /// Thermal print-through for the temperature drivers
    pub fn temperature_correction(&self, temperature: &DVector<f64>) -> Result<MirrorFigure> {
        self.check_temperature(temperature)?;
        let (t, warnings) = self.clamp_temperature(temperature);
        Ok(self.masked(&self.model.temperature * t, warnings))
    }
    /// Least-squares projection of a figure on the bending modes
    pub fn bending_mode_projection(&self, figure: &MirrorFigure) -> Result<DVector<f64>> {
        let modes = self
            .model
            .bending_modes
            .as_ref()
            .ok_or(MirrorError::NoBendingModes(D::kind()))?;
        let idx: Vec<usize> = (0..self.valid.len()).filter(|&i| self.valid[i]).collect();
        let a = modes.select_rows(&idx);
        let b = DVector::from_iterator(idx.len(), idx.iter().map(|&i| figure.values[i]));
        a.svd(true, true)
            .solve(&b, 1e-12)
            .map_err(|e| MetrologyError::Singular(e.to_string()).into())
    }
    /// Actuator forces in N of the mirror support
    pub fn actuator_forces(&self) -> Result<&DMatrix<f64>> {
        self.model
            .actuator_forces
            .as_ref()
            .ok_or(MirrorError::NoActuatorForces(D::kind()))
    }
    /// Residue of the figure after removing `n_terms` Zernike polynomials in the global frame
    ///
    /// The coordinates are normalized by the outer radius of the mirror for the fit
    pub fn residue_in_global(
        &self,
        figure: &MirrorFigure,
        cotransform: &CoTransform,
        n_terms: usize,
    ) -> Result<MirrorResidue> {
        let (x, y, z) = figure.valid_samples();
        let (x, y, z) = cotransform.transform_surface(&x, &y, &z, D::frame(), OpticalFrame::Global)?;
        let r = D::outer_radius();
        let xn: Vec<f64> = x.iter().map(|x| x / r).collect();
        let yn: Vec<f64> = y.iter().map(|y| y / r).collect();
        let fit = ZernikeBasis::new(n_terms).fit(&xn, &yn, &z)?;
        Ok(MirrorResidue {
            x,
            y,
            residue: fit.residual,
            zernike: fit.coefficients,
        })
    }
    /// Grid residue map of the figure for the ray tracer surface map input
    ///
    /// The residue (after removing `n_terms` Zernikes) is interpolated on a `(n+4)x(n+4)` grid
    pub fn grid_residue_map(
        &self,
        figure: &MirrorFigure,
        cotransform: &CoTransform,
        n_terms: usize,
        n: usize,
    ) -> Result<GridResidueMap> {
        let residue = self.residue_in_global(figure, cotransform, n_terms)?;
        let mm = |v: &[f64], s: f64| v.iter().map(|x| x * s).collect::<Vec<f64>>();
        GridResidueMap::new(
            &mm(&residue.x, 1e3),
            &mm(&residue.y, 1e3),
            &mm(&residue.residue, 1e-3),
            D::inner_radius() * 1e3,
            D::outer_radius() * 1e3,
            n,
        )
    }
}

/// Mirror distortion model selected at runtime
#[derive(Debug, Clone)]
pub enum AnyMirrorSim {
    M1M3(M1M3Sim),
    M2(M2Sim),
}
impl From<M1M3Sim> for AnyMirrorSim {
    fn from(value: M1M3Sim) -> Self {
        AnyMirrorSim::M1M3(value)
    }
}
impl From<M2Sim> for AnyMirrorSim {
    fn from(value: M2Sim) -> Self {
        AnyMirrorSim::M2(value)
    }
}
impl AnyMirrorSim {
    /// Loads the mirror FEA data from `data_dir`
    pub fn load<P: Into<PathBuf>>(kind: MirrorKind, data_dir: P) -> crate::Result<Self> {
        use crate::Builder;
        Ok(match kind {
            MirrorKind::M1M3 => M1M3Sim::builder().data_dir(data_dir).build()?.into(),
            MirrorKind::M2 => M2Sim::builder().data_dir(data_dir).build()?.into(),
        })
    }
    pub fn kind(&self) -> MirrorKind {
        match self {
            AnyMirrorSim::M1M3(_) => MirrorKind::M1M3,
            AnyMirrorSim::M2(_) => MirrorKind::M2,
        }
    }
    pub fn frame(&self) -> OpticalFrame {
        match self {
            AnyMirrorSim::M1M3(_) => M1M3::frame(),
            AnyMirrorSim::M2(_) => M2::frame(),
        }
    }
    pub fn apertures(&self) -> Vec<Aperture> {
        match self {
            AnyMirrorSim::M1M3(_) => M1M3::apertures(),
            AnyMirrorSim::M2(_) => M2::apertures(),
        }
    }
    pub fn n_temperature(&self) -> usize {
        match self {
            AnyMirrorSim::M1M3(m) => m.model.n_temperature(),
            AnyMirrorSim::M2(m) => m.model.n_temperature(),
        }
    }
    pub fn figure(
        &self,
        gravity: &Vector3<f64>,
        temperature: &DVector<f64>,
    ) -> Result<MirrorFigure> {
        match self {
            AnyMirrorSim::M1M3(m) => m.figure(gravity, temperature),
            AnyMirrorSim::M2(m) => m.figure(gravity, temperature),
        }
    }
    /// See [MirrorSim::residue_in_global]
    pub fn residue_in_global(
        &self,
        figure: &MirrorFigure,
        cotransform: &CoTransform,
        n_terms: usize,
    ) -> Result<MirrorResidue> {
        match self {
            AnyMirrorSim::M1M3(m) => m.residue_in_global(figure, cotransform, n_terms),
            AnyMirrorSim::M2(m) => m.residue_in_global(figure, cotransform, n_terms),
        }
    }
    /// See [MirrorSim::grid_residue_map]
    pub fn grid_residue_map(
        &self,
        figure: &MirrorFigure,
        cotransform: &CoTransform,
        n_terms: usize,
        n: usize,
    ) -> Result<GridResidueMap> {
        match self {
            AnyMirrorSim::M1M3(m) => m.grid_residue_map(figure, cotransform, n_terms, n),
            AnyMirrorSim::M2(m) => m.grid_residue_map(figure, cotransform, n_terms, n),
        }
    }
}
