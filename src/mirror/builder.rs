use nalgebra::DMatrix;
use std::{
    fs::File,
    io::{BufRead, BufReader},
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::Arc,
};

use super::{
    CalibrationEnvelope, DistortionModel, LookUpTable, MirrorDescriptor, MirrorError, MirrorGrid,
    MirrorSim, Result,
};
use crate::Builder;

/// Reads a table of numbers separated by white spaces or commas, skipping the first `skiprows` rows
///
/// Empty lines and lines starting with `#` are ignored
pub fn read_table<P: AsRef<Path>>(path: P, skiprows: usize) -> Result<DMatrix<f64>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| MirrorError::Open(e, path.to_path_buf()))?;
    let parse_error = |line: usize, msg: String| MirrorError::Parse {
        path: path.to_path_buf(),
        line,
        msg,
    };
    let mut rows: Vec<Vec<f64>> = vec![];
    for (i, line) in BufReader::new(file).lines().enumerate().skip(skiprows) {
        let line = line.map_err(|e| parse_error(i + 1, e.to_string()))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let row = line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<f64>())
            .collect::<std::result::Result<Vec<f64>, _>>()
            .map_err(|e| parse_error(i + 1, e.to_string()))?;
        if let Some(first) = rows.first() {
            if first.len() != row.len() {
                return Err(parse_error(
                    i + 1,
                    format!("expected {} columns, found {}", first.len(), row.len()),
                ));
            }
        }
        rows.push(row);
    }
    let ncols = rows.first().map_or(0, |r| r.len());
    Ok(DMatrix::from_row_iterator(
        rows.len(),
        ncols,
        rows.into_iter().flatten(),
    ))
}

/// Mirror distortion model builder
///
/// The model is either loaded from the FEA files in the data directory or given explicitly
/// with [grid](MirrorSimBuilder::grid) and [model](MirrorSimBuilder::model).
///
/// Default properties:
///  - data directory : none
///  - calibration envelope : mirror default
///
/// # Examples
///
/// ```no_run
/// use telesim::{Builder, FromBuilder, M1M3Sim};
/// let m1m3 = M1M3Sim::builder().data_dir("data/M1M3").build()?;
/// # Ok::<(), telesim::TeleSimError>(())
/// ```
#[derive(Debug, Clone)]
pub struct MirrorSimBuilder<D: MirrorDescriptor> {
    data_dir: Option<PathBuf>,
    grid: Option<MirrorGrid>,
    model: Option<Arc<DistortionModel>>,
    envelope: CalibrationEnvelope,
    descriptor: PhantomData<D>,
}
impl<D: MirrorDescriptor> Default for MirrorSimBuilder<D> {
    fn default() -> Self {
        Self {
            data_dir: None,
            grid: None,
            model: None,
            envelope: D::envelope(),
            descriptor: PhantomData,
        }
    }
}
impl<D: MirrorDescriptor> MirrorSimBuilder<D> {
    /// Sets the directory with the mirror FEA data files
    pub fn data_dir<P: Into<PathBuf>>(self, data_dir: P) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
            ..self
        }
    }
    /// Sets the FEA node positions in meters
    pub fn grid(self, x: Vec<f64>, y: Vec<f64>) -> Self {
        Self {
            grid: Some(MirrorGrid { x, y }),
            ..self
        }
    }
    /// Sets the FEA sensitivities
    pub fn model(self, model: DistortionModel) -> Self {
        Self {
            model: Some(Arc::new(model)),
            ..self
        }
    }
    /// Shares the FEA sensitivities with another mirror model
    pub fn shared_model(self, model: Arc<DistortionModel>) -> Self {
        Self {
            model: Some(model),
            ..self
        }
    }
    /// Sets the calibration envelope
    pub fn envelope(self, envelope: CalibrationEnvelope) -> Self {
        Self { envelope, ..self }
    }
    fn load(data_dir: &Path) -> Result<(MirrorGrid, DistortionModel)> {
        let n_driver = D::temperature_drivers().len();
        let path = data_dir.join(D::fea_file());
        let fea = read_table(&path, 1)?;
        if fea.ncols() != 4 + n_driver {
            return Err(MirrorError::Shape {
                expected: format!("{} columns in {}", 4 + n_driver, path.display()),
                found: fea.ncols().to_string(),
            });
        }
        let column = |j: usize| fea.column(j).iter().cloned().collect::<Vec<f64>>();
        let grid = MirrorGrid {
            x: column(0),
            y: column(1),
        };
        let temperature = fea.columns(4, n_driver).into_owned();
        let mut model = DistortionModel::from_print_through(&column(2), &column(3), temperature);
        let lut = data_dir.join(D::lut_file());
        if lut.is_file() {
            model = model.lut(LookUpTable::from_rows(read_table(&lut, 0)?)?);
        }
        let modes = data_dir.join(D::bending_modes_file());
        if modes.is_file() {
            model = model.bending_modes(read_table(&modes, 0)?);
        }
        if let Some(forces) = D::actuator_force_file()
            .map(|file| data_dir.join(file))
            .filter(|path| path.is_file())
        {
            model = model.actuator_forces(read_table(&forces, 0)?);
        }
        log::info!(
            "{} FEA data loaded from {:?} (look-up table: {}, bending modes: {}, actuators: {})",
            D::kind(),
            data_dir,
            model.lut.is_some(),
            model.bending_modes.as_ref().map_or(0, |m| m.ncols()),
            model.actuator_forces.as_ref().map_or(0, |f| f.nrows())
        );
        Ok((grid, model))
    }
}

impl<D: MirrorDescriptor> Builder for MirrorSimBuilder<D> {
    type Component = MirrorSim<D>;
    fn build(self) -> crate::Result<MirrorSim<D>> {
        let (grid, model) = match (self.grid, self.model, self.data_dir) {
            (Some(grid), Some(model), _) => (grid, model),
            (_, _, Some(data_dir)) => {
                let (grid, model) = Self::load(&data_dir)?;
                (grid, Arc::new(model))
            }
            _ => return Err(MirrorError::MissingData.into()),
        };
        Ok(MirrorSim::new(grid, model, self.envelope)?)
    }
}
