use crate::config::{ProcessingParams, RadarGeometry};
use crate::processing::{FrameContext, SpectralProcessor};

/// Common error type for stage execution.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum StageError {
    #[error("frame shape mismatch: expected {expected} bytes, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
    #[error("numeric degeneracy: {0}")]
    NumericDegeneracy(String),
    #[error("buffer exhaustion: {0}")]
    BufferExhaustion(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("internal failure: {0}")]
    Internal(String),
}

pub type StageResult<T> = Result<T, StageError>;

/// Trait describing the composable signal-processing stages of one frame pass.
///
/// Stages are initialised once with the radar geometry, then executed once per
/// frame in chain order. Every stage reads and writes the shared
/// [`FrameContext`]; FFT plans and windows come from the chain-owned
/// [`SpectralProcessor`].
pub trait ProcessingStage: Send {
    fn name(&self) -> &'static str;
    fn initialize(&mut self, radar: &RadarGeometry) -> StageResult<()>;
    fn execute(
        &mut self,
        frame: &mut FrameContext,
        params: &ProcessingParams,
        dsp: &mut SpectralProcessor,
    ) -> StageResult<()>;
    fn cleanup(&mut self);
}
