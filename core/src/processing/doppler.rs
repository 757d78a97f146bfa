use crate::config::{ProcessingParams, RadarGeometry};
use crate::output::{AxisInfo, AxisUnit, Detection, DetectionSet, MapKind, ResultSnapshot, SpectralFrame};
use crate::prelude::{ProcessingStage, StageError, StageResult};
use crate::processing::cfar::CfarDetector;
use crate::processing::spectral::SpectralProcessor;
use crate::processing::FrameContext;
use crate::telemetry::log::LogManager;

/// Range-Doppler map with 2D CFAR detections.
pub struct DopplerStage {
    radar: Option<RadarGeometry>,
    logger: LogManager,
}

impl DopplerStage {
    pub fn new() -> Self {
        Self {
            radar: None,
            logger: LogManager::new("doppler"),
        }
    }
}

impl Default for DopplerStage {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingStage for DopplerStage {
    fn name(&self) -> &'static str {
        "doppler"
    }

    fn initialize(&mut self, radar: &RadarGeometry) -> StageResult<()> {
        if radar.doppler_chirps() == 0 {
            return Err(StageError::InvalidInput(
                "Doppler processing needs at least one chirp per channel".into(),
            ));
        }
        self.radar = Some(radar.clone());
        Ok(())
    }

    fn execute(
        &mut self,
        frame: &mut FrameContext,
        params: &ProcessingParams,
        dsp: &mut SpectralProcessor,
    ) -> StageResult<()> {
        let radar = self
            .radar
            .as_ref()
            .ok_or_else(|| StageError::Internal("stage not initialized".into()))?;
        let range = frame
            .range
            .as_ref()
            .ok_or_else(|| StageError::Internal("Doppler stage before range stage".into()))?;

        let map = dsp.doppler_process(range, params.window)?;
        let range_step = radar.range_per_bin_m(range.fft_size) as f32;
        let velocity_step = radar.velocity_per_bin_mps(map.fft_size) as f32;
        let centre = (map.fft_size / 2) as f32;

        let power = map.magnitude.mapv(|v| v * v);
        let cells = match CfarDetector::new(params.cfar).detect_2d(power.view()) {
            Ok(cells) => cells,
            Err(StageError::NumericDegeneracy(reason)) => {
                self.logger.warn(&format!("no Doppler detections: {}", reason));
                Vec::new()
            }
            Err(err) => return Err(err),
        };
        let detections = cells
            .into_iter()
            .map(|(bin, doppler)| Detection {
                range_bin: bin,
                range_m: bin as f32 * range_step,
                secondary_bin: Some(doppler),
                secondary: Some((doppler as f32 - centre) * velocity_step),
                magnitude: map.magnitude[[bin, doppler]],
                position: None,
            })
            .collect();

        let (bins, doppler_bins) = map.magnitude.dim();
        frame.results.push(ResultSnapshot {
            kind: MapKind::RangeDoppler,
            frame_index: frame.index,
            spectrum: SpectralFrame::map(
                &map.magnitude,
                AxisInfo::linear(AxisUnit::Meters, bins, range_step, 0.0),
                AxisInfo::linear(AxisUnit::MetersPerSecond, doppler_bins, velocity_step, centre),
            ),
            detections: DetectionSet::new(MapKind::RangeDoppler, detections),
        });
        Ok(())
    }

    fn cleanup(&mut self) {
        self.radar = None;
    }
}
