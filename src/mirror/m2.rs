use nalgebra::DVector;

use super::{Aperture, CalibrationEnvelope, MirrorDescriptor, MirrorKind, MirrorSim};
use crate::cotransform::OpticalFrame;

/// LSST secondary mirror
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct M2;
impl MirrorDescriptor for M2 {
    fn kind() -> MirrorKind {
        MirrorKind::M2
    }
    fn frame() -> OpticalFrame {
        OpticalFrame::M2
    }
    fn apertures() -> Vec<Aperture> {
        vec![Aperture {
            name: "M2",
            inner: 0.9,
            outer: 1.71,
            surface_id: 1,
        }]
    }
    fn temperature_drivers() -> &'static [&'static str] {
        &["z gradient", "radial gradient"]
    }
    fn envelope() -> CalibrationEnvelope {
        CalibrationEnvelope {
            gravity_norm: 1.,
            temperature_limit: 1.,
        }
    }
    fn fea_file() -> &'static str {
        "M2_GT_FEA.txt"
    }
    fn lut_file() -> &'static str {
        "M2_LUT.txt"
    }
    fn bending_modes_file() -> &'static str {
        "M2_bending_modes.txt"
    }
    fn actuator_force_file() -> Option<&'static str> {
        Some("M2_1um_force.DAT")
    }
}

impl MirrorSim<M2> {
    /// Temperature drivers vector from the z and radial gradients
    ///
    /// The gradients are normalized such as +/-2 sigma spans 1C
    pub fn temperature(z_gradient: f64, radial_gradient: f64) -> DVector<f64> {
        DVector::from_vec(vec![z_gradient, radial_gradient])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{mirror::DistortionModel, Builder, FromBuilder, M2Sim};
    use nalgebra::DMatrix;

    #[test]
    fn temperature_correction() {
        let x = vec![1., -1.];
        let y = vec![0., 0.5];
        let t = DMatrix::from_row_slice(2, 2, &[0.1, 0.2, 0.3, 0.4]);
        let m2 = M2Sim::builder()
            .grid(x, y)
            .model(DistortionModel::from_print_through(&[0., 0.], &[0., 0.], t))
            .build()
            .unwrap();
        let c = m2
            .temperature_correction(&M2Sim::temperature(0.5, -0.5))
            .unwrap();
        assert!((c.values()[0] + 0.05).abs() < 1e-12);
        assert!((c.values()[1] + 0.05).abs() < 1e-12);
    }

    #[test]
    fn aperture() {
        assert!(M2::contains(1.2, 0.));
        assert!(!M2::contains(0.5, 0.));
        assert!(!M2::contains(1.8, 0.));
        assert_eq!(M2::outer_radius(), 1.71);
    }
}
