use crate::config::{ProcessingParams, RadarGeometry};
use crate::output::{
    to_cartesian, AxisInfo, AxisUnit, Detection, DetectionSet, MapKind, ResultSnapshot,
    SpectralFrame,
};
use crate::prelude::{ProcessingStage, StageError, StageResult};
use crate::processing::cfar::CfarDetector;
use crate::processing::spectral::{LineOptions, SpectralProcessor};
use crate::processing::FrameContext;
use crate::telemetry::log::LogManager;
use ndarray::Axis;

/// Angle from broadside (degrees) of each bin of an `size`-point shifted
/// FFT over a half-wavelength uniform array.
pub fn angle_axis_degrees(size: usize) -> Vec<f32> {
    let half = (size / 2) as f32;
    (0..size)
        .map(|k| {
            let sine = (2.0 * (k as f32 - half) / size as f32).clamp(-1.0, 1.0);
            sine.asin().to_degrees()
        })
        .collect()
}

/// Range-angle map from an FFT across the virtual array.
pub struct AngleStage {
    radar: Option<RadarGeometry>,
    logger: LogManager,
}

impl AngleStage {
    pub fn new() -> Self {
        Self {
            radar: None,
            logger: LogManager::new("angle"),
        }
    }
}

impl Default for AngleStage {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingStage for AngleStage {
    fn name(&self) -> &'static str {
        "angle"
    }

    fn initialize(&mut self, radar: &RadarGeometry) -> StageResult<()> {
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
            .ok_or_else(|| StageError::Internal("angle stage before range stage".into()))?;

        let fft_size = params.angle_fft_size.max(range.num_channels());
        let spectrum = dsp.transform_axis(
            range.data.view(),
            Axis(0),
            params.window,
            fft_size,
            LineOptions {
                remove_dc: false,
                shift: true,
            },
        )?;
        let magnitude = spectrum
            .mapv(|v| v.norm())
            .mean_axis(Axis(1))
            .ok_or_else(|| StageError::InvalidInput("range spectrum has no chirps".into()))?
            .reversed_axes();

        let angles = angle_axis_degrees(fft_size);
        let range_step = radar.range_per_bin_m(range.fft_size) as f32;
        let power = magnitude.mapv(|v| v * v);
        let cells = match CfarDetector::new(params.cfar).detect_2d(power.view()) {
            Ok(cells) => cells,
            Err(StageError::NumericDegeneracy(reason)) => {
                self.logger.warn(&format!("no angle detections: {}", reason));
                Vec::new()
            }
            Err(err) => return Err(err),
        };
        let detections = cells
            .into_iter()
            .map(|(bin, angle_bin)| {
                let range_m = bin as f32 * range_step;
                Detection {
                    range_bin: bin,
                    range_m,
                    secondary_bin: Some(angle_bin),
                    secondary: Some(angles[angle_bin]),
                    magnitude: magnitude[[bin, angle_bin]],
                    position: Some(to_cartesian(range_m, angles[angle_bin])),
                }
            })
            .collect();

        let bins = magnitude.nrows();
        frame.results.push(ResultSnapshot {
            kind: MapKind::RangeAngle,
            frame_index: frame.index,
            spectrum: SpectralFrame::map(
                &magnitude,
                AxisInfo::linear(AxisUnit::Meters, bins, range_step, 0.0),
                AxisInfo::new(AxisUnit::Degrees, angles),
            ),
            detections: DetectionSet::new(MapKind::RangeAngle, detections),
        });
        Ok(())
    }

    fn cleanup(&mut self) {
        self.radar = None;
    }
}
