//! PhoSim command and instance file lines

use std::path::Path;

use super::{Observation, SurfacePerturbation};
use crate::{camera::FramePose, metrology::FieldPoint, mirror::sci, sky::SkyStar};

/// `move` commands of the telescope degrees of freedom (micron and arcsec)
pub fn dof_commands(dof: &[f64]) -> String {
    dof.iter()
        .enumerate()
        .map(|(i, v)| format!("move {} {:.4}\n", i, v))
        .collect()
}

/// `izernike` commands of a mirror surface, the coefficients are written in mm
pub fn zernike_commands(surface: &SurfacePerturbation) -> String {
    surface
        .zernike
        .iter()
        .enumerate()
        .map(|(j, c)| format!("izernike {} {} {}\n", surface.surface_id, j, sci(c * 1e-3)))
        .collect()
}

pub fn surface_map(surface_id: usize, path: &Path) -> String {
    format!("surfacemap {} {} 1\n", surface_id, path.display())
}

pub fn surface_link(surface_id: usize, linked_to: usize) -> String {
    format!("surfacelink {} {}\n", surface_id, linked_to)
}

/// `body` commands of the camera lens elements
///
/// Axes 0 and 1 are the x and y tilts (radians), axes 3 to 5 the translations (mm)
pub fn body_commands(poses: &[FramePose]) -> String {
    poses
        .iter()
        .flat_map(|p| {
            let id = p.element.surface_id();
            [
                (0, p.tilt.x),
                (1, p.tilt.y),
                (3, p.translation.x),
                (4, p.translation.y),
                (5, p.translation.z),
            ]
            .into_iter()
            .map(move |(axis, v)| format!("body {} {} {:.9}\n", id, axis, v))
        })
        .collect()
}

/// Switches off the atmosphere turbulence, opacity and clouds
pub fn clear_atmosphere() -> String {
    "clearturbulence 1\nclearopacity 1\nclearclouds 1\n".into()
}

/// Observation parameters of the instance file
pub fn observation(obs: &Observation) -> String {
    format!(
        "Opsim_obshistid {}\nOpsim_filter {}\nmjd {:.10}\nSIM_SEED {}\nrightascension {:.6}\ndeclination {:.6}\nrotskypos {:.6}\n",
        obs.obs_id,
        obs.filter.index(),
        obs.mjd,
        obs.seed,
        obs.pointing.ra,
        obs.pointing.dec,
        obs.pointing.rotation
    )
}

/// Star of the instance file
pub fn object(star: &SkyStar, sed: &str) -> String {
    format!(
        "object {:2}\t{:9.6}\t{:9.6} {:9.6} ../sky/{} 0.0 0.0 0.0 0.0 0.0 0.0 star 0.0 none none\n",
        star.id, star.ra, star.dec, star.magnitude, sed
    )
}

/// OPD field point of the instance file, field in degrees and wavelength in nm
pub fn opd(id: usize, field: &FieldPoint, wavelength: f64) -> String {
    format!(
        "opd {:2}\t{:9.6}\t{:9.6} {:5.1}\n",
        id, field.x, field.y, wavelength
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{camera::LensElement, mirror::MirrorKind};
    use nalgebra::{DVector, Vector3};

    #[test]
    fn dof() {
        let c = dof_commands(&[0., 1000., -0.5]);
        assert_eq!(c, "move 0 0.0000\nmove 1 1000.0000\nmove 2 -0.5000\n");
    }

    #[test]
    fn zernike() {
        let s = SurfacePerturbation {
            mirror: MirrorKind::M2,
            name: "M2",
            surface_id: 1,
            zernike: DVector::from_vec(vec![0., 2.5]),
            residue: None,
            linked_to: None,
        };
        assert_eq!(
            zernike_commands(&s),
            "izernike 1 0 0.000000000E+00\nizernike 1 1 2.500000000E-03\n"
        );
    }

    #[test]
    fn body() {
        let p = FramePose {
            element: LensElement::L2,
            translation: Vector3::new(0.1, 0., 0.),
            tilt: Vector3::zeros(),
        };
        let c = body_commands(&[p]);
        assert_eq!(c.lines().count(), 5);
        assert!(c.contains("body 5 3 0.100000000\n"));
    }

    #[test]
    fn instance_lines() {
        let star = SkyStar::new(3, 1.5, -0.25, 15.);
        assert_eq!(
            object(&star, "sed_500.txt"),
            "object  3\t 1.500000\t-0.250000 15.000000 ../sky/sed_500.txt 0.0 0.0 0.0 0.0 0.0 0.0 star 0.0 none none\n"
        );
        assert_eq!(
            opd(12, &FieldPoint::new(1.176, -1.176), 500.),
            "opd 12\t 1.176000\t-1.176000 500.0\n"
        );
        let obs = observation(&Observation::default());
        assert!(obs.starts_with("Opsim_obshistid 9006000\nOpsim_filter 1\n"));
    }
}
