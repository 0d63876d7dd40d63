//!
//! # Sky
//!
//! Star fields for the ray tracer.
//!
//! Stars are added by sky coordinates, by field angles with respect to the telescope
//! boresight, by pixel position on a detector chip of a [FocalPlane] or from the results of
//! a catalog query.
//!
//! ```
//! use telesim::{SkySim, sky::Pointing};
//! let mut sky = SkySim::new(Pointing::new(10., -30., 0.));
//! sky.add_star_by_field_angle(0, 1.176, 1.176, 15.).unwrap();
//! assert!(sky.validate(1.75).is_ok());
//! ```

use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

#[derive(Debug, thiserror::Error)]
pub enum SkyError {
    #[error("star #{0} is already in the sky")]
    DuplicateId(usize),
    #[error("star #{id} at ({ra},{dec})deg is not a valid sky position")]
    InvalidPosition { id: usize, ra: f64, dec: f64 },
    #[error("star #{id} is {distance:.3}deg away from the boresight, beyond the {radius:.3}deg field")]
    OutOfField { id: usize, distance: f64, radius: f64 },
    #[error("sensor {0} is not in the focal plane layout")]
    UnknownSensor(String),
    #[error("pixel ({x},{y}) is outside sensor {sensor}")]
    OffChip { sensor: String, x: f64, y: f64 },
    #[error("cannot open sky file {1}")]
    Open(#[source] std::io::Error, PathBuf),
    #[error("cannot create sky file {1}")]
    Create(#[source] std::io::Error, PathBuf),
    #[error("cannot write sky file {1}")]
    Write(#[source] std::io::Error, PathBuf),
    #[error("cannot parse line {line} of sky file {path}: {msg}")]
    Parse {
        path: PathBuf,
        line: usize,
        msg: String,
    },
}
pub type Result<T> = std::result::Result<T, SkyError>;

/// Telescope boresight and camera rotation, all in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pointing {
    pub ra: f64,
    pub dec: f64,
    pub rotation: f64,
}
impl Pointing {
    pub fn new(ra: f64, dec: f64, rotation: f64) -> Self {
        Self { ra, dec, rotation }
    }
    /// Field angles in degrees of the sky coordinates `(ra,dec)` in degrees
    ///
    /// Gnomonic projection on the plane tangent at the boresight, rotated by the camera rotation
    pub fn field_angle(&self, ra: f64, dec: f64) -> (f64, f64) {
        let (a0, d0) = (self.ra.to_radians(), self.dec.to_radians());
        let (a, d) = (ra.to_radians(), dec.to_radians());
        let da = a - a0;
        let cosc = d0.sin() * d.sin() + d0.cos() * d.cos() * da.cos();
        let xi = d.cos() * da.sin() / cosc;
        let eta = (d0.cos() * d.sin() - d0.sin() * d.cos() * da.cos()) / cosc;
        let (s, c) = self.rotation.to_radians().sin_cos();
        (
            (xi * c + eta * s).atan().to_degrees(),
            (-xi * s + eta * c).atan().to_degrees(),
        )
    }
    /// Sky coordinates in degrees of the field angles `(x,y)` in degrees
    pub fn sky_position(&self, x: f64, y: f64) -> (f64, f64) {
        let (u, v) = (x.to_radians().tan(), y.to_radians().tan());
        let (s, c) = self.rotation.to_radians().sin_cos();
        let (xi, eta) = (u * c - v * s, u * s + v * c);
        let (a0, d0) = (self.ra.to_radians(), self.dec.to_radians());
        let rho = xi.hypot(eta);
        if rho == 0f64 {
            return (self.ra, self.dec);
        }
        let cc = rho.atan();
        let dec = (cc.cos() * d0.sin() + eta * cc.sin() * d0.cos() / rho).asin();
        let ra = a0
            + (xi * cc.sin()).atan2(rho * d0.cos() * cc.cos() - eta * d0.sin() * cc.sin());
        (ra.to_degrees().rem_euclid(360.), dec.to_degrees())
    }
    /// Angular distance in degrees between the boresight and `(ra,dec)` in degrees
    pub fn distance(&self, ra: f64, dec: f64) -> f64 {
        let (a0, d0) = (self.ra.to_radians(), self.dec.to_radians());
        let (a, d) = (ra.to_radians(), dec.to_radians());
        let h = ((d - d0) / 2.).sin().powi(2)
            + d0.cos() * d.cos() * ((a - a0) / 2.).sin().powi(2);
        (2. * h.sqrt().min(1.).asin()).to_degrees()
    }
}

/// Star position on a detector chip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChipPosition {
    pub sensor: String,
    pub x_px: f64,
    pub y_px: f64,
}

/// Star of the simulated sky
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkyStar {
    pub id: usize,
    /// Right ascension in degrees
    pub ra: f64,
    /// Declination in degrees
    pub dec: f64,
    pub magnitude: f64,
    pub chip: Option<ChipPosition>,
}
impl SkyStar {
    pub fn new(id: usize, ra: f64, dec: f64, magnitude: f64) -> Self {
        Self {
            id,
            ra,
            dec,
            magnitude,
            chip: None,
        }
    }
}

/// Detector layout of the focal plane
pub trait FocalPlane {
    /// Field angles in degrees of the pixel `(x_px,y_px)` of `sensor`
    fn field_angle(&self, sensor: &str, x_px: f64, y_px: f64) -> Result<(f64, f64)>;
}

/// Detector chip
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    /// Chip center in the focal plane in micron
    pub center: (f64, f64),
    /// Pixel size in micron
    pub pixel_size: f64,
    pub n_px: (usize, usize),
}

/// Focal plane made of flat chips with a constant plate scale
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorLayout {
    /// Micron per arcsecond
    pub plate_scale: f64,
    pub sensors: HashMap<String, Sensor>,
}
impl SensorLayout {
    pub fn new(plate_scale: f64) -> Self {
        Self {
            plate_scale,
            sensors: HashMap::new(),
        }
    }
    pub fn sensor<S: Into<String>>(mut self, name: S, sensor: Sensor) -> Self {
        self.sensors.insert(name.into(), sensor);
        self
    }
    /// Reads the ray tracer focal plane layout file
    ///
    /// Each line starts with: `name x y pixel_size nx ny` with positions and pixel size in micron
    pub fn from_phosim_layout<P: AsRef<Path>>(path: P, plate_scale: f64) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| SkyError::Open(e, path.to_path_buf()))?;
        let mut layout = Self::new(plate_scale);
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let parse_error = |msg: String| SkyError::Parse {
                path: path.to_path_buf(),
                line: i + 1,
                msg,
            };
            let line = line.map_err(|e| parse_error(e.to_string()))?;
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 6 {
                return Err(parse_error(format!("expected 6 fields, found {}", fields.len())));
            }
            let num = |k: usize| {
                fields[k]
                    .parse::<f64>()
                    .map_err(|e| parse_error(e.to_string()))
            };
            let sensor = Sensor {
                center: (num(1)?, num(2)?),
                pixel_size: num(3)?,
                n_px: (num(4)? as usize, num(5)? as usize),
            };
            layout.sensors.insert(fields[0].to_string(), sensor);
        }
        log::info!("{} sensors read from {:?}", layout.sensors.len(), path);
        Ok(layout)
    }
}
impl FocalPlane for SensorLayout {
    fn field_angle(&self, sensor: &str, x_px: f64, y_px: f64) -> Result<(f64, f64)> {
        let s = self
            .sensors
            .get(sensor)
            .ok_or_else(|| SkyError::UnknownSensor(sensor.to_string()))?;
        let (nx, ny) = (s.n_px.0 as f64, s.n_px.1 as f64);
        if !(0f64..nx).contains(&x_px) || !(0f64..ny).contains(&y_px) {
            return Err(SkyError::OffChip {
                sensor: sensor.to_string(),
                x: x_px,
                y: y_px,
            });
        }
        let x = s.center.0 + (x_px - 0.5 * nx) * s.pixel_size;
        let y = s.center.1 + (y_px - 0.5 * ny) * s.pixel_size;
        let to_deg = |u: f64| u / self.plate_scale / 3600.;
        Ok((to_deg(x), to_deg(y)))
    }
}

/// Star field
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkySim {
    pub pointing: Pointing,
    stars: Vec<SkyStar>,
}
impl SkySim {
    pub fn new(pointing: Pointing) -> Self {
        Self {
            pointing,
            stars: vec![],
        }
    }
    pub fn stars(&self) -> &[SkyStar] {
        &self.stars
    }
    pub fn len(&self) -> usize {
        self.stars.len()
    }
    pub fn is_empty(&self) -> bool {
        self.stars.is_empty()
    }
    /// Adds a star, rejecting duplicated ids and invalid sky coordinates
    pub fn add_star(&mut self, star: SkyStar) -> Result<&mut Self> {
        if self.stars.iter().any(|s| s.id == star.id) {
            return Err(SkyError::DuplicateId(star.id));
        }
        if !star.ra.is_finite() || !star.dec.is_finite() || star.dec.abs() > 90. {
            return Err(SkyError::InvalidPosition {
                id: star.id,
                ra: star.ra,
                dec: star.dec,
            });
        }
        let ra = star.ra.rem_euclid(360.);
        self.stars.push(SkyStar { ra, ..star });
        Ok(self)
    }
    /// Adds a star at sky coordinates `(ra,dec)` in degrees
    pub fn add_star_by_ra_dec(
        &mut self,
        id: usize,
        ra: f64,
        dec: f64,
        magnitude: f64,
    ) -> Result<&mut Self> {
        self.add_star(SkyStar::new(id, ra, dec, magnitude))
    }
    /// Adds a star at field angles `(x,y)` in degrees
    pub fn add_star_by_field_angle(
        &mut self,
        id: usize,
        x: f64,
        y: f64,
        magnitude: f64,
    ) -> Result<&mut Self> {
        let (ra, dec) = self.pointing.sky_position(x, y);
        self.add_star(SkyStar::new(id, ra, dec, magnitude))
    }
    /// Adds a star at pixel `(x_px,y_px)` of a focal plane chip
    pub fn add_star_by_chip_pos<F: FocalPlane + ?Sized>(
        &mut self,
        focal_plane: &F,
        sensor: &str,
        id: usize,
        x_px: f64,
        y_px: f64,
        magnitude: f64,
    ) -> Result<&mut Self> {
        let (x, y) = focal_plane.field_angle(sensor, x_px, y_px)?;
        let (ra, dec) = self.pointing.sky_position(x, y);
        self.add_star(SkyStar {
            chip: Some(ChipPosition {
                sensor: sensor.to_string(),
                x_px,
                y_px,
            }),
            ..SkyStar::new(id, ra, dec, magnitude)
        })
    }
    /// Adds the stars returned by a catalog query
    pub fn add_stars_from_catalog<I>(&mut self, stars: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = SkyStar>,
    {
        for star in stars {
            self.add_star(star)?;
        }
        Ok(self)
    }
    /// Field angles in degrees of a star
    pub fn field_angle(&self, star: &SkyStar) -> (f64, f64) {
        self.pointing.field_angle(star.ra, star.dec)
    }
    /// Checks that all the stars are within `field_radius` degrees from the boresight
    pub fn validate(&self, field_radius: f64) -> Result<()> {
        for star in &self.stars {
            let distance = self.pointing.distance(star.ra, star.dec);
            if distance > field_radius {
                return Err(SkyError::OutOfField {
                    id: star.id,
                    distance,
                    radius: field_radius,
                });
            }
        }
        Ok(())
    }
    /// Writes the stars to a file: `Id Ra Dec Mag` tab separated
    pub fn export_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut file = File::create(path).map_err(|e| SkyError::Create(e, path.to_path_buf()))?;
        let mut content = String::from("Id\t Ra\t\t Dec\t\t Mag\n");
        for s in &self.stars {
            content.push_str(&format!(
                "{}\t {:3.6}\t {:3.6}\t {:3.6}\n",
                s.id, s.ra, s.dec, s.magnitude
            ));
        }
        file.write_all(content.as_bytes())
            .map_err(|e| SkyError::Write(e, path.to_path_buf()))?;
        log::info!("{} stars written to {:?}", self.stars.len(), path);
        Ok(())
    }
    /// Adds the stars of a file written with [export_to_file](SkySim::export_to_file)
    pub fn import_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<&mut Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| SkyError::Open(e, path.to_path_buf()))?;
        for (i, line) in BufReader::new(file).lines().enumerate().skip(1) {
            let parse_error = |msg: String| SkyError::Parse {
                path: path.to_path_buf(),
                line: i + 1,
                msg,
            };
            let line = line.map_err(|e| parse_error(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 4 {
                return Err(parse_error(format!("expected 4 fields, found {}", fields.len())));
            }
            let id = fields[0]
                .parse::<usize>()
                .map_err(|e| parse_error(e.to_string()))?;
            let num = |k: usize| {
                fields[k]
                    .parse::<f64>()
                    .map_err(|e| parse_error(e.to_string()))
            };
            self.add_star_by_ra_dec(id, num(1)?, num(2)?, num(3)?)?;
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gnomonic_round_trip() {
        let p = Pointing::new(120., 45., 30.);
        let (ra, dec) = p.sky_position(1.2, -0.7);
        let (x, y) = p.field_angle(ra, dec);
        assert!((x - 1.2).abs() < 1e-9 && (y + 0.7).abs() < 1e-9);
        assert!((p.distance(ra, dec) - 1.2f64.hypot(0.7)).abs() < 1e-2);
    }

    #[test]
    fn duplicate_id() {
        let mut sky = SkySim::default();
        sky.add_star_by_ra_dec(1, 0., 0., 15.).unwrap();
        assert!(matches!(
            sky.add_star_by_ra_dec(1, 0.1, 0., 15.),
            Err(SkyError::DuplicateId(1))
        ));
        assert!(sky.add_star_by_ra_dec(2, 0., 95., 15.).is_err());
        assert_eq!(sky.len(), 1);
    }

    #[test]
    fn out_of_field() {
        let mut sky = SkySim::default();
        sky.add_star_by_ra_dec(0, 359.5, 0., 15.)
            .unwrap()
            .add_star_by_ra_dec(1, 2., 0., 15.)
            .unwrap();
        assert!(matches!(
            sky.validate(1.75),
            Err(SkyError::OutOfField { id: 1, .. })
        ));
    }

    #[test]
    fn chip_position() {
        let layout = SensorLayout::new(50.).sensor(
            "R00_S22_C0",
            Sensor {
                center: (-3.6e4, 3.6e4),
                pixel_size: 10.,
                n_px: (2000, 4072),
            },
        );
        let mut sky = SkySim::default();
        sky.add_star_by_chip_pos(&layout, "R00_S22_C0", 0, 1000., 2036., 15.)
            .unwrap();
        let (x, y) = sky.field_angle(&sky.stars()[0]);
        assert!((x + 0.2).abs() < 1e-9 && (y - 0.2).abs() < 1e-9);
        assert!(sky
            .add_star_by_chip_pos(&layout, "R00_S22_C0", 1, 3000., 0., 15.)
            .is_err());
        assert!(sky
            .add_star_by_chip_pos(&layout, "R44_S00_C0", 2, 0., 0., 15.)
            .is_err());
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sky.txt");
        let mut sky = SkySim::default();
        sky.add_stars_from_catalog(vec![
            SkyStar::new(0, 1.5, -0.25, 15.),
            SkyStar::new(7, 359.25, 0.5, 16.5),
        ])
        .unwrap();
        sky.export_to_file(&path).unwrap();
        let mut other = SkySim::default();
        other.import_from_file(&path).unwrap();
        assert_eq!(other.stars(), sky.stars());
        assert!(other.import_from_file(&path).is_err());
    }
}
