use std::{f64::consts::PI, fs, path::Path};

use telesim::{
    phosim::{PhosimError, SimulationOutput, Simulator},
    prelude::*,
    sky::Pointing,
    telescope::{DofGroup, SimulationConfig, N_DOF},
    RunState, SimulationRun, TeleSimError,
};

/// Simulator test double counting the submissions
#[derive(Default)]
struct Stub {
    calls: usize,
    exit_status: i32,
}
impl Simulator for Stub {
    fn submit(&mut self, run: &SimulationRun) -> Result<SimulationOutput, PhosimError> {
        self.calls += 1;
        if self.exit_status == 0 {
            Ok(SimulationOutput {
                output_dir: "output".into(),
                opd: vec![format!("output/opd_{}_0.fits.gz", run.observation.obs_id).into()],
                ..Default::default()
            })
        } else {
            Err(PhosimError::Simulation {
                reason: format!("exit status: {}", self.exit_status),
                log: "output/work/run.log".into(),
            })
        }
    }
}

const ZDZ: [f64; 9] = [0.11, 0.12, 0.13, 0.14, 0.21, 0.22, 0.23, 0.24, 0.5];

/// M1M3 FEA file with 4 points on M1, 4 points on M3 and 1 point in the central hole
fn m1m3_data(dir: &Path) {
    let mut fea = String::from("x y zdz hdz bulk tx ty tz tr\n");
    let points = (0..4)
        .map(|k| (3.5, k))
        .chain((0..4).map(|k| (1.5, k)))
        .map(|(r, k)| {
            let o = k as f64 * PI / 2. + 0.3;
            (r * o.cos(), r * o.sin())
        })
        .chain(std::iter::once((0.3, 0.)));
    for ((x, y), zdz) in points.zip(ZDZ) {
        fea.push_str(&format!("{x} {y} {zdz} {} 0 0 0 0 0.01\n", -zdz));
    }
    fs::write(dir.join("M1M3_GT_FEA.txt"), fea).unwrap();
}

fn telescope(dir: &Path) -> TeleFacade {
    let _ = env_logger::builder().is_test(true).try_init();
    m1m3_data(dir);
    let config = SimulationConfig {
        data_dir: Some(dir.to_path_buf()),
        mirrors: vec![MirrorKind::M1M3],
        n_zernike: 3,
        ..Default::default()
    };
    TeleFacade::builder().config(config).build().unwrap()
}

fn sky() -> SkySim {
    let mut sky = SkySim::new(Pointing::default());
    sky.add_star_by_field_angle(0, 1.176, 1.176, 15.)
        .unwrap()
        .add_star_by_field_angle(1, -1.176, 1.176, 15.)
        .unwrap();
    sky
}

fn populated(telescope: &mut TeleFacade) -> SimulationRun {
    let mut run = telescope.new_run();
    telescope.apply_mirror_distortion(&mut run).unwrap();
    telescope.apply_camera_distortion(&mut run).unwrap();
    telescope.add_sky(&mut run, sky()).unwrap();
    run
}

#[test]
fn m1m3_at_zenith() {
    let dir = tempfile::tempdir().unwrap();
    let mut telescope = telescope(dir.path());
    let mut run = telescope.new_run();
    telescope.apply_mirror_distortion(&mut run).unwrap();
    assert_eq!(run.state(), RunState::MirrorCorrected);

    let figure = &run.figures()[0];
    assert!(!figure.is_clamped());
    for (i, (f, zdz)) in figure.values().iter().zip(ZDZ).enumerate() {
        if figure.valid()[i] {
            assert!((f - zdz).abs() < 1e-12, "{f} != {zdz}");
        } else {
            assert_eq!(*f, 0.);
        }
    }

    let surfaces = run.mirrors();
    assert_eq!(surfaces.len(), 2);
    assert_eq!((surfaces[0].name, surfaces[0].surface_id), ("M1", 0));
    assert_eq!(surfaces[0].zernike.len(), 3);
    assert_eq!((surfaces[1].name, surfaces[1].linked_to), ("M3", Some(0)));
}

#[test]
fn completed() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut telescope = telescope(dir.path());
    let mut run = populated(&mut telescope);
    let mut stub = Stub::default();
    let output = telescope.submit(&mut run, &mut stub)?;
    assert_eq!(stub.calls, 1);
    assert_eq!(run.state(), RunState::Completed);
    assert_eq!(output.opd.len(), 1);
    assert_eq!(run.output(), Some(&output));
    Ok(())
}

#[test]
fn simulation_failure() {
    let dir = tempfile::tempdir().unwrap();
    let mut telescope = telescope(dir.path());
    let mut run = populated(&mut telescope);
    let mut stub = Stub {
        exit_status: 1,
        ..Default::default()
    };
    let err = telescope.submit(&mut run, &mut stub).unwrap_err();
    assert!(matches!(
        err,
        TeleSimError::Phosim(PhosimError::Simulation { .. })
    ));
    assert!(err.is_retryable());
    assert_eq!(run.state(), RunState::Failed);
    assert!(run.output().is_none());
    assert!(run.diagnostic().is_some_and(|d| d.contains("exit status: 1")));
}

#[test]
fn camera_out_of_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let mut telescope = telescope(dir.path());
    let mut delta = vec![0f64; N_DOF];
    // camera hexapod x decenter in micron
    delta[DofGroup::CameraHexapod.range().start + 1] = 1e4;
    telescope.accumulate_dof(&delta).unwrap();
    let mut run = populated(&mut telescope);
    let mut stub = Stub::default();
    let err = telescope.submit(&mut run, &mut stub).unwrap_err();
    assert!(matches!(
        err,
        TeleSimError::Phosim(PhosimError::Configuration(_))
    ));
    assert!(!err.is_retryable());
    assert_eq!(stub.calls, 0);
    assert_eq!(run.state(), RunState::Failed);
}

#[test]
fn invalid_transition() {
    let dir = tempfile::tempdir().unwrap();
    let mut telescope = telescope(dir.path());
    let mut run = telescope.new_run();
    let mut stub = Stub::default();
    let err = telescope.submit(&mut run, &mut stub).unwrap_err();
    assert!(matches!(
        err,
        TeleSimError::InvalidTransition {
            state: RunState::Configured,
            call: "submit"
        }
    ));
    assert_eq!(run.state(), RunState::Configured);
    assert_eq!(stub.calls, 0);

    telescope.apply_mirror_distortion(&mut run).unwrap();
    assert!(telescope.apply_mirror_distortion(&mut run).is_err());
    assert_eq!(run.state(), RunState::MirrorCorrected);
}

#[test]
fn fresh_runs() {
    let dir = tempfile::tempdir().unwrap();
    let mut telescope = telescope(dir.path());
    let run = populated(&mut telescope);
    let other = telescope.new_run();
    assert_ne!(run.id(), other.id());
    assert_eq!(other.state(), RunState::Configured);
    assert!(other.mirrors().is_empty() && other.sky().is_none());
}

#[test]
fn configuration_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    m1m3_data(dir.path());
    let path = dir.path().join("telesim.toml");
    fs::write(
        &path,
        format!(
            r#"
data_dir = "{}"
mirrors = ["M1M3"]
n_zernike = 3
opd_fields = "wfs"

[observation]
obs_id = 9006001
filter = "r"

[environment]
zenith_angle = 30.0
"#,
            dir.path().display()
        ),
    )?;
    let config = SimulationConfig::load(&path)?;
    let mut telescope = TeleFacade::builder().config(config).build()?;
    let mut run = telescope.new_run();
    assert_eq!(run.opd_fields().len(), 4);
    assert_eq!(run.observation.obs_id, 9006001);
    telescope.apply_mirror_distortion(&mut run)?;
    let figure = &run.figures()[0];
    let z = 30f64.to_radians();
    let expected = ZDZ[0] * (z.cos() - z.sin());
    assert!((figure.values()[0] - expected).abs() < 1e-12);
    Ok(())
}
