use nalgebra::DVector;

use super::{Aperture, CalibrationEnvelope, MirrorDescriptor, MirrorFigure, MirrorKind, MirrorSim};
use crate::cotransform::OpticalFrame;

/// LSST primary and tertiary mirrors
///
/// M1 and M3 are cast in a single substrate: they share the FEA grid and the distortion model
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct M1M3;
impl MirrorDescriptor for M1M3 {
    fn kind() -> MirrorKind {
        MirrorKind::M1M3
    }
    fn frame() -> OpticalFrame {
        OpticalFrame::M1M3
    }
    fn apertures() -> Vec<Aperture> {
        vec![
            Aperture {
                name: "M1",
                inner: 2.558,
                outer: 4.18,
                surface_id: 0,
            },
            Aperture {
                name: "M3",
                inner: 0.55,
                outer: 2.508,
                surface_id: 2,
            },
        ]
    }
    fn temperature_drivers() -> &'static [&'static str] {
        &[
            "bulk",
            "x gradient",
            "y gradient",
            "z gradient",
            "radial gradient",
        ]
    }
    fn envelope() -> CalibrationEnvelope {
        CalibrationEnvelope {
            gravity_norm: 1.,
            temperature_limit: 2.,
        }
    }
    fn fea_file() -> &'static str {
        "M1M3_GT_FEA.txt"
    }
    fn lut_file() -> &'static str {
        "M1M3_LUT.txt"
    }
    fn bending_modes_file() -> &'static str {
        "M1M3_bending_modes.txt"
    }
}

impl MirrorSim<M1M3> {
    /// Temperature drivers vector: bulk, x, y, z and radial gradients
    pub fn temperature(bulk: f64, x: f64, y: f64, z: f64, radial: f64) -> DVector<f64> {
        DVector::from_vec(vec![bulk, x, y, z, radial])
    }
    /// Splits a figure into its M1 and M3 parts
    pub fn split(&self, figure: &MirrorFigure) -> (MirrorFigure, MirrorFigure) {
        let apertures = M1M3::apertures();
        let part = |aperture: &Aperture| {
            let valid: Vec<bool> = figure
                .grid()
                .x
                .iter()
                .zip(&figure.grid().y)
                .zip(figure.valid())
                .map(|((x, y), v)| *v && aperture.contains(*x, *y))
                .collect();
            let values = DVector::from_iterator(
                valid.len(),
                figure
                    .values()
                    .iter()
                    .zip(&valid)
                    .map(|(z, v)| if *v { *z } else { 0f64 }),
            );
            MirrorFigure {
                values,
                valid: std::sync::Arc::new(valid),
                ..figure.clone()
            }
        };
        (part(&apertures[0]), part(&apertures[1]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{mirror::DistortionModel, Builder, FromBuilder, M1M3Sim};
    use nalgebra::{DMatrix, Vector3};

    #[test]
    fn split() {
        let x = vec![3.0, 1.0, 0.1];
        let y = vec![0.0, 0.0, 0.0];
        let model = DistortionModel::from_print_through(
            &[1., 2., 3.],
            &[0., 0., 0.],
            DMatrix::zeros(3, 5),
        );
        let m1m3 = M1M3Sim::builder().grid(x, y).model(model).build().unwrap();
        let f = m1m3
            .figure(&Vector3::new(0., 0., -1.), &M1M3Sim::temperature(0., 0., 0., 0., 0.))
            .unwrap();
        assert_eq!(f.values(), &[1., 2., 0.]);
        let (m1, m3) = m1m3.split(&f);
        assert_eq!(m1.values(), &[1., 0., 0.]);
        assert_eq!(m3.values(), &[0., 2., 0.]);
    }
}
