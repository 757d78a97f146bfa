//! Acquisition and signal-processing core for real-time FMCW radar streaming.
//!
//! Raw ADC samples arrive from the capture card as UDP datagrams, are
//! reassembled into frames, organised into a virtual-array sample cube and
//! turned into range, range-Doppler and range-angle maps with CFAR
//! detections. A [`Session`] owns the sockets, threads and result channels
//! of one acquisition run.

pub mod capture;
pub mod config;
pub mod math;
pub mod output;
pub mod pipeline;
pub mod prelude;
pub mod processing;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;

pub use capture::{CaptureError, RawFrame};
pub use config::{
    ChannelSelection, ConfigError, NetworkConfig, PipelineConfig, ProcessingParams,
    RadarGeometry, StageSelection,
};
pub use output::{MapKind, ResultSnapshot, ResultSubscriber, SessionStatus};
pub use pipeline::{Session, SessionError, SessionHandle, SessionState};
pub use prelude::{ProcessingStage, StageError, StageResult};
pub use processing::ProcessingChain;
