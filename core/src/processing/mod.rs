pub mod angle;
pub mod buffer_pool;
pub mod cfar;
pub mod clutter;
pub mod doppler;
pub mod organizer;
pub mod range;
pub mod spectral;

pub use angle::AngleStage;
pub use buffer_pool::BufferPool;
pub use cfar::{CfarDetector, CfarParams};
pub use clutter::ClutterStage;
pub use doppler::DopplerStage;
pub use organizer::{ComplexCube, SampleOrganizer};
pub use range::{RangeProfileStage, RangeStage};
pub use spectral::{RangeSpectrum, SpectralProcessor};

use crate::capture::RawFrame;
use crate::config::{PipelineConfig, ProcessingParams};
use crate::output::ResultSnapshot;
use crate::prelude::{ProcessingStage, StageResult};
use crate::telemetry::log::LogManager;

/// Working state of one frame as it moves through the chain.
pub struct FrameContext {
    pub index: u64,
    pub cube: ComplexCube,
    pub range: Option<RangeSpectrum>,
    pub results: Vec<ResultSnapshot>,
}

impl FrameContext {
    pub fn new(index: u64, cube: ComplexCube) -> Self {
        Self {
            index,
            cube,
            range: None,
            results: Vec::new(),
        }
    }
}

/// Range, clutter and range-profile stages, optionally followed by Doppler
/// and angle, sharing one set of FFT plans and windows.
pub struct ProcessingChain {
    organizer: SampleOrganizer,
    stages: Vec<Box<dyn ProcessingStage>>,
    dsp: SpectralProcessor,
    logger: LogManager,
}

impl ProcessingChain {
    pub fn new(config: &PipelineConfig) -> StageResult<Self> {
        let mut stages: Vec<Box<dyn ProcessingStage>> = vec![
            Box::new(RangeStage),
            Box::new(ClutterStage::new()),
            Box::new(RangeProfileStage::new()),
        ];
        if config.stages().doppler {
            stages.push(Box::new(DopplerStage::new()));
        }
        if config.stages().angle {
            stages.push(Box::new(AngleStage::new()));
        }
        for stage in stages.iter_mut() {
            stage.initialize(config.radar())?;
        }

        let chain = Self {
            organizer: SampleOrganizer::new(config.radar()),
            stages,
            dsp: SpectralProcessor::new(),
            logger: LogManager::new("chain"),
        };
        chain
            .logger
            .record(&format!("stages: {}", chain.stage_names().join(" -> ")));
        Ok(chain)
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Runs one raw frame through every stage and returns its snapshots.
    pub fn process(
        &mut self,
        frame: &RawFrame,
        params: &ProcessingParams,
    ) -> StageResult<Vec<ResultSnapshot>> {
        let cube = self.organizer.organize(&frame.bytes)?;
        let mut context = FrameContext::new(frame.index, cube);
        for stage in self.stages.iter_mut() {
            stage.execute(&mut context, params, &mut self.dsp)?;
        }
        Ok(context.results)
    }

    pub fn cleanup(&mut self) {
        for stage in self.stages.iter_mut() {
            stage.cleanup();
        }
        self.dsp.clear();
    }
}
