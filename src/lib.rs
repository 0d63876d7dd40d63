//!
//! # Telescope distortion and wavefront metrology
//!
//! `telesim` models the gravity and thermal distortions of the mirrors and of the camera
//! lens train of a telescope, computes the wavefront (OPD) metrology over the field and
//! drives the [PhoSim](https://bitbucket.org/phosim/phosim_release) ray tracer with the
//! corrected optical geometry.
//!
//! Components are created with the builder associated to each of them:
//! ```no_run
//! use telesim::{Builder, FromBuilder, M2Sim};
//! use nalgebra::{DVector, Vector3};
//! let m2 = M2Sim::builder().data_dir("data").build()?;
//! let figure = m2.figure(&Vector3::new(0., 0., -1.), &DVector::zeros(2))?;
//! println!("M2 figure peak: {:.3}micron", figure.peak());
//! # Ok::<(), telesim::TeleSimError>(())
//! ```
//! and a simulation is sequenced by [TeleFacade](telescope::TeleFacade) through the
//! states of a [SimulationRun](telescope::SimulationRun).

pub mod camera;
pub mod cotransform;
pub mod error;
pub mod metrology;
pub mod mirror;
pub mod phosim;
pub mod sky;
pub mod telescope;

#[doc(inline)]
pub use self::camera::{CamSim, CameraState, ElementPose, LensElement, PoseBounds};
#[doc(inline)]
pub use self::cotransform::{CoTransform, Coordinates, FrameError, OpticalFrame, RigidTransform};
#[doc(inline)]
pub use self::error::TeleSimError;
#[doc(inline)]
pub use self::metrology::{
    FieldPoint, MetrologyError, OpdMap, OpdMetrology, OpdSource, PupilGrid, ZernikeBasis,
};
#[doc(inline)]
pub use self::mirror::{
    AnyMirrorSim, DistortionModel, M1M3Sim, M2Sim, MirrorFigure, MirrorKind, MirrorSim,
    OutOfRangeWarning, M1M3, M2,
};
#[doc(inline)]
pub use self::phosim::{PhosimCommu, PhosimError, SimulationOutput, Simulator};
#[doc(inline)]
pub use self::sky::{SkySim, SkyStar};
#[doc(inline)]
pub use self::telescope::{RunState, SimulationConfig, SimulationRun, TeleFacade};

pub type Result<T> = std::result::Result<T, TeleSimError>;

/// Component builder trait
pub trait Builder: Default {
    type Component;
    fn new() -> Self {
        Default::default()
    }
    fn build(self) -> Result<Self::Component>;
}

/// Gives access to the builder of a component
///
/// ```
/// use telesim::{Builder, CamSim, FromBuilder};
/// let camera = CamSim::builder().build().unwrap();
/// ```
pub trait FromBuilder {
    type ComponentBuilder: Builder;
    fn builder() -> Self::ComponentBuilder {
        Default::default()
    }
}

pub mod prelude {
    pub use super::{
        camera::CameraBuilder,
        metrology::{AtmosphereBuilder, OpdMetrologyBuilder},
        mirror::MirrorSimBuilder,
        phosim::PhosimBuilder,
        telescope::TeleFacadeBuilder,
        Builder, CamSim, CoTransform, FieldPoint, FromBuilder, M1M3Sim, M2Sim, MirrorKind,
        OpdMetrology, OpticalFrame, PhosimCommu, SkySim, SkyStar, TeleFacade,
    };
}
