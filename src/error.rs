use crate::telescope::RunState;

#[derive(Debug, thiserror::Error)]
pub enum TeleSimError {
    #[error("coordinate frame transform failed")]
    Frame(#[from] crate::FrameError),
    #[error("mirror distortion failed")]
    Mirror(#[from] crate::mirror::MirrorError),
    #[error("camera distortion failed")]
    Camera(#[from] crate::camera::CameraError),
    #[error("wavefront metrology failed")]
    Metrology(#[from] crate::MetrologyError),
    #[error("cannot build `::telesim::PhaseScreen`")]
    Atmosphere(#[from] crate::metrology::AtmosphereBuilderError),
    #[error("PhoSim run failed")]
    Phosim(#[from] crate::PhosimError),
    #[error("invalid sky")]
    Sky(#[from] crate::sky::SkyError),
    #[error("telescope configuration failed")]
    Telescope(#[from] crate::telescope::TelescopeError),
    #[error("`{call}` is not allowed for a run in the {state} state")]
    InvalidTransition {
        state: RunState,
        call: &'static str,
    },
}
impl TeleSimError {
    /// Only ray tracer failures may succeed when a new run is submitted
    pub fn is_retryable(&self) -> bool {
        matches!(self, TeleSimError::Phosim(e) if e.is_retryable())
    }
    /// Error message followed by the messages of all the error sources
    pub fn report(&self) -> String {
        let mut report = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(e) = source {
            report.push_str(&format!(": {e}"));
            source = e.source();
        }
        report
    }
}
