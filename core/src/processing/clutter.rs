use crate::config::{ProcessingParams, RadarGeometry};
use crate::math::matrix::MatrixHelper;
use crate::prelude::{ProcessingStage, StageError, StageResult};
use crate::processing::spectral::{RangeSpectrum, SpectralProcessor};
use crate::processing::FrameContext;
use crate::telemetry::log::LogManager;
use nalgebra::DMatrix;
use ndarray::{Array2, ArrayView2, Axis};
use num_complex::Complex32;

fn check_finite(data: &ArrayView2<Complex32>) -> StageResult<()> {
    if data.iter().any(|v| !v.re.is_finite() || !v.im.is_finite()) {
        return Err(StageError::NumericDegeneracy(
            "non-finite samples in clutter input".into(),
        ));
    }
    Ok(())
}

fn centered(data: ArrayView2<Complex32>) -> StageResult<DMatrix<Complex32>> {
    let mean = data
        .mean_axis(Axis(0))
        .ok_or_else(|| StageError::InvalidInput("clutter input has no observations".into()))?;
    let centred = &data - &mean;
    Ok(MatrixHelper::to_dmatrix(centred.view()))
}

fn project_out(data: &DMatrix<Complex32>, basis: &DMatrix<Complex32>) -> DMatrix<Complex32> {
    if basis.ncols() == 0 {
        return data.clone();
    }
    data - (data * basis) * basis.adjoint()
}

/// Removes the static background from chirp by range-bin data.
///
/// Columns are centred on their mean over chirps, then the centred data is
/// projected off the `components` dominant principal directions of its
/// covariance. The column mean is discarded along with the subspace.
pub fn remove_static_clutter(
    data: ArrayView2<Complex32>,
    components: usize,
) -> StageResult<Array2<Complex32>> {
    check_finite(&data)?;
    let observations = data.nrows();
    let centred = centered(data)?;
    let scale = observations.saturating_sub(1).max(1) as f32;
    let covariance = MatrixHelper::gram(&centred).map(|v| v / scale);
    let basis = MatrixHelper::dominant_subspace(covariance, components);
    Ok(MatrixHelper::to_array(&project_out(&centred, &basis)))
}

/// Applies [`remove_static_clutter`] to every virtual channel with one
/// subspace estimated from the covariance pooled over channels.
pub fn suppress_spectrum(range: &mut RangeSpectrum, components: usize) -> StageResult<()> {
    let chirps = range.num_chirps();
    let bins = range.num_bins();
    if chirps == 0 || bins == 0 {
        return Err(StageError::InvalidInput("empty range spectrum".into()));
    }

    let mut channels = Vec::with_capacity(range.num_channels());
    let mut pooled = DMatrix::<Complex32>::zeros(bins, bins);
    for channel in range.data.axis_iter(Axis(0)) {
        check_finite(&channel)?;
        let centred = centered(channel)?;
        pooled += MatrixHelper::gram(&centred);
        channels.push(centred);
    }
    let scale = (channels.len() * chirps.saturating_sub(1).max(1)) as f32;
    let basis = MatrixHelper::dominant_subspace(pooled.map(|v| v / scale), components);

    for (mut target, centred) in range.data.axis_iter_mut(Axis(0)).zip(channels.iter()) {
        let cleaned = project_out(centred, &basis);
        target.assign(&MatrixHelper::to_array(&cleaned));
    }
    Ok(())
}

/// Optional static clutter removal on the range spectrum of a frame.
pub struct ClutterStage {
    logger: LogManager,
    frames: u64,
}

impl ClutterStage {
    pub fn new() -> Self {
        Self {
            logger: LogManager::new("clutter"),
            frames: 0,
        }
    }
}

impl Default for ClutterStage {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingStage for ClutterStage {
    fn name(&self) -> &'static str {
        "clutter"
    }

    fn initialize(&mut self, _radar: &RadarGeometry) -> StageResult<()> {
        self.frames = 0;
        Ok(())
    }

    fn execute(
        &mut self,
        frame: &mut FrameContext,
        params: &ProcessingParams,
        _dsp: &mut SpectralProcessor,
    ) -> StageResult<()> {
        if !params.clutter_removal {
            return Ok(());
        }
        let range = frame
            .range
            .as_mut()
            .ok_or_else(|| StageError::Internal("clutter stage ran before range stage".into()))?;
        suppress_spectrum(range, params.clutter_components)?;
        self.frames += 1;
        self.logger.periodic(self.frames, || {
            format!(
                "{} frames cleaned with {} components",
                self.frames, params.clutter_components
            )
        });
        Ok(())
    }

    fn cleanup(&mut self) {
        self.frames = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use std::f32::consts::PI;

    fn column_energy(data: &Array2<Complex32>, column: usize) -> f32 {
        data.column(column).iter().map(|v| v.norm_sqr()).sum()
    }

    #[test]
    fn constant_observations_leave_no_variance() {
        let data = Array2::from_shape_fn((16, 8), |(_, c)| Complex32::new(c as f32 * 3.0, -1.0));
        let cleaned = remove_static_clutter(data.view(), 2).unwrap();
        for column in 0..8 {
            assert!(column_energy(&cleaned, column) < 1e-8);
        }
    }

    #[test]
    fn strongest_moving_components_are_removed_first() {
        let movers = [(1, 1.0, 10.0), (3, 2.0, 5.0), (6, 3.0, 1.0)];
        let data = Array2::from_shape_fn((16, 8), |(m, c)| {
            movers
                .iter()
                .filter(|(bin, _, _)| *bin == c)
                .map(|(_, cycles, amp)| Complex32::from_polar(*amp, 2.0 * PI * cycles * m as f32 / 16.0))
                .sum()
        });
        let cleaned = remove_static_clutter(data.view(), 2).unwrap();
        assert!(column_energy(&cleaned, 1) < 1e-3);
        assert!(column_energy(&cleaned, 3) < 1e-3);
        let kept = column_energy(&cleaned, 6);
        assert!((kept - 16.0).abs() < 1e-2, "kept {}", kept);
    }

    #[test]
    fn zero_components_only_removes_the_mean() {
        let data = Array2::from_shape_fn((8, 4), |(m, c)| {
            Complex32::from_polar(2.0, PI * m as f32 * (c + 1) as f32 / 4.0)
        });
        let cleaned = remove_static_clutter(data.view(), 0).unwrap();
        let mean = data.mean_axis(Axis(0)).unwrap();
        let expected = &data - &mean;
        for (a, b) in cleaned.iter().zip(expected.iter()) {
            assert!((a - b).norm() < 1e-5);
        }
    }

    #[test]
    fn pooled_suppression_cleans_every_channel() {
        let data = Array3::from_shape_fn((3, 8, 16), |(ch, m, bin)| {
            let stat = if bin == 5 { 50.0 } else { 0.0 };
            let moving = if bin == 9 {
                Complex32::from_polar(1.0, 2.0 * PI * 2.0 * m as f32 / 8.0)
            } else {
                Complex32::new(0.0, 0.0)
            };
            Complex32::new(stat * (ch + 1) as f32, 0.0) + moving
        });
        let mut range = RangeSpectrum {
            data,
            fft_size: 16,
            num_samples: 16,
        };
        suppress_spectrum(&mut range, 0).unwrap();
        for ch in 0..3 {
            let channel = range.data.index_axis(Axis(0), ch);
            let stat: f32 = channel.column(5).iter().map(|v| v.norm_sqr()).sum();
            let moving: f32 = channel.column(9).iter().map(|v| v.norm_sqr()).sum();
            assert!(stat < 1e-6);
            assert!((moving - 8.0).abs() < 1e-3);
        }
    }

    #[test]
    fn non_finite_input_is_degenerate() {
        let mut data = Array2::<Complex32>::zeros((4, 4));
        data[[1, 1]] = Complex32::new(f32::NAN, 0.0);
        assert!(matches!(
            remove_static_clutter(data.view(), 1),
            Err(StageError::NumericDegeneracy(_))
        ));
    }
}
