use crate::config::{ProcessingParams, RadarGeometry};
use crate::math::stats::StatsHelper;
use crate::output::{AxisInfo, AxisUnit, Detection, DetectionSet, MapKind, ResultSnapshot, SpectralFrame};
use crate::prelude::{ProcessingStage, StageError, StageResult};
use crate::processing::cfar::CfarDetector;
use crate::processing::spectral::SpectralProcessor;
use crate::processing::FrameContext;
use crate::telemetry::log::LogManager;

/// Fast-time FFT of the organised cube.
pub struct RangeStage;

impl ProcessingStage for RangeStage {
    fn name(&self) -> &'static str {
        "range"
    }

    fn initialize(&mut self, _radar: &RadarGeometry) -> StageResult<()> {
        Ok(())
    }

    fn execute(
        &mut self,
        frame: &mut FrameContext,
        params: &ProcessingParams,
        dsp: &mut SpectralProcessor,
    ) -> StageResult<()> {
        let spectrum = dsp.range_process(&frame.cube, params.window, params.pad_factor)?;
        frame.range = Some(spectrum);
        Ok(())
    }

    fn cleanup(&mut self) {}
}

/// Range profile of the selected channel with 1D CFAR detections.
pub struct RangeProfileStage {
    radar: Option<RadarGeometry>,
    logger: LogManager,
}

impl RangeProfileStage {
    pub fn new() -> Self {
        Self {
            radar: None,
            logger: LogManager::new("range"),
        }
    }
}

impl Default for RangeProfileStage {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingStage for RangeProfileStage {
    fn name(&self) -> &'static str {
        "range_profile"
    }

    fn initialize(&mut self, radar: &RadarGeometry) -> StageResult<()> {
        self.radar = Some(radar.clone());
        Ok(())
    }

    fn execute(
        &mut self,
        frame: &mut FrameContext,
        params: &ProcessingParams,
        _dsp: &mut SpectralProcessor,
    ) -> StageResult<()> {
        let radar = self
            .radar
            .as_ref()
            .ok_or_else(|| StageError::Internal("stage not initialized".into()))?;
        let range = frame
            .range
            .as_ref()
            .ok_or_else(|| StageError::Internal("range profile before range stage".into()))?;

        let profile = range.profile(params.channel)?;
        let per_bin = radar.range_per_bin_m(range.fft_size) as f32;
        let cells = match CfarDetector::new(params.cfar).detect(profile.as_slice().unwrap_or(&[])) {
            Ok(cells) => cells,
            Err(StageError::NumericDegeneracy(reason)) => {
                self.logger.warn(&format!("no range detections: {}", reason));
                Vec::new()
            }
            Err(err) => return Err(err),
        };
        let detections: Vec<Detection> = cells
            .into_iter()
            .map(|bin| Detection {
                range_bin: bin,
                range_m: bin as f32 * per_bin,
                secondary_bin: None,
                secondary: None,
                magnitude: profile[bin],
                position: None,
            })
            .collect();

        self.logger.periodic(frame.index, || {
            let values = profile.as_slice().unwrap_or(&[]);
            let peak = StatsHelper::peak(values).map_or(0.0, |(_, power)| power);
            format!(
                "frame {} profile peak {:.1} dB ({:.1} dB over mean), {} detections",
                frame.index,
                StatsHelper::power_db(peak),
                StatsHelper::peak_to_mean_db(values),
                detections.len()
            )
        });

        frame.results.push(ResultSnapshot {
            kind: MapKind::Range,
            frame_index: frame.index,
            spectrum: SpectralFrame::profile(
                &profile,
                AxisInfo::linear(AxisUnit::Meters, profile.len(), per_bin, 0.0),
            ),
            detections: DetectionSet::new(MapKind::Range, detections),
        });
        Ok(())
    }

    fn cleanup(&mut self) {
        self.radar = None;
    }
}
