use crate::config::{ChannelSelection, MAX_FFT_SIZE};
use crate::math::fft::{fft_shift, suggest_fft_size, FftCache, PaddingPolicy};
use crate::math::window::{WindowCache, WindowType};
use crate::prelude::{StageError, StageResult};
use crate::processing::buffer_pool::BufferPool;
use crate::processing::organizer::ComplexCube;
use ndarray::{Array, Array1, Array2, Array3, ArrayView, Axis, Dimension, Zip};
use num_complex::Complex32;
use rustfft::num_traits::Zero;

/// Scratch lines that may be checked out at once.
const SCRATCH_LINES: usize = 4;

/// Per-line treatment applied around each transform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineOptions {
    /// Subtract the line mean before windowing.
    pub remove_dc: bool,
    /// Centre the zero-frequency bin after the transform.
    pub shift: bool,
}

/// Range FFT output indexed `(virtual channel, chirp, range bin)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeSpectrum {
    pub data: Array3<Complex32>,
    pub fft_size: usize,
    pub num_samples: usize,
}

impl RangeSpectrum {
    pub fn num_channels(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn num_chirps(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn num_bins(&self) -> usize {
        self.data.shape()[2]
    }

    /// Chirp by range-bin series of one virtual channel, or the coherent
    /// sum over all of them.
    pub fn select(&self, selection: ChannelSelection) -> StageResult<Array2<Complex32>> {
        match selection {
            ChannelSelection::Individual(index) if index < self.num_channels() => {
                Ok(self.data.index_axis(Axis(0), index).to_owned())
            }
            ChannelSelection::Individual(index) => Err(StageError::InvalidInput(format!(
                "channel {} out of range for {} virtual channels",
                index,
                self.num_channels()
            ))),
            ChannelSelection::Combined => Ok(self.data.sum_axis(Axis(0))),
        }
    }

    /// Mean power over chirps of the selected series.
    pub fn profile(&self, selection: ChannelSelection) -> StageResult<Array1<f32>> {
        let series = self.select(selection)?;
        let power = series.mapv(|v| v.norm_sqr());
        power
            .mean_axis(Axis(0))
            .ok_or_else(|| StageError::InvalidInput("range spectrum has no chirps".into()))
    }
}

/// Range-Doppler magnitudes indexed `(range bin, Doppler bin)`, zero
/// velocity at bin `fft_size / 2`.
#[derive(Debug, Clone, PartialEq)]
pub struct DopplerMap {
    pub magnitude: Array2<f32>,
    pub fft_size: usize,
}

/// Windowed FFTs along any cube axis with cached plans and windows.
pub struct SpectralProcessor {
    fft: FftCache,
    windows: WindowCache,
    pool: BufferPool<Complex32>,
}

impl SpectralProcessor {
    pub fn new() -> Self {
        Self {
            fft: FftCache::new(),
            windows: WindowCache::new(),
            pool: BufferPool::with_capacity(SCRATCH_LINES),
        }
    }

    /// Windows, zero-pads to `fft_size` and transforms every lane of `input`
    /// along `axis`.
    pub fn transform_axis<D: Dimension>(
        &mut self,
        input: ArrayView<Complex32, D>,
        axis: Axis,
        window: WindowType,
        fft_size: usize,
        options: LineOptions,
    ) -> StageResult<Array<Complex32, D>> {
        let length = input.len_of(axis);
        if length == 0 {
            return Err(StageError::InvalidInput(format!(
                "empty axis {} in transform input",
                axis.index()
            )));
        }
        if fft_size < length {
            return Err(StageError::InvalidInput(format!(
                "FFT size {} shorter than {} input points",
                fft_size, length
            )));
        }

        let mut shape = input.raw_dim();
        shape[axis.index()] = fft_size;
        let mut output = Array::<Complex32, D>::zeros(shape);
        let coefficients = self.windows.get(window, length);
        let mut line = self.pool.checkout(fft_size)?;
        let fft = &mut self.fft;

        Zip::from(input.lanes(axis))
            .and(output.lanes_mut(axis))
            .for_each(|source, mut target| {
                let mean = if options.remove_dc {
                    source.sum() / length as f32
                } else {
                    Complex32::zero()
                };
                line.iter_mut().for_each(|v| *v = Complex32::zero());
                for ((slot, &sample), &weight) in
                    line.iter_mut().zip(source.iter()).zip(coefficients.iter())
                {
                    *slot = (sample - mean) * weight;
                }
                fft.forward_in_place(&mut line);
                if options.shift {
                    fft_shift(&mut line);
                }
                target
                    .iter_mut()
                    .zip(line.iter())
                    .for_each(|(out, &v)| *out = v);
            });

        self.pool.release(line);
        Ok(output)
    }

    /// Fast-time FFT of every chirp of every channel, DC removed, padded to
    /// the size suggested for `pad_factor` times the sample count.
    pub fn range_process(
        &mut self,
        cube: &ComplexCube,
        window: WindowType,
        pad_factor: usize,
    ) -> StageResult<RangeSpectrum> {
        let num_samples = cube.shape()[2];
        let padded = pad_factor
            .max(1)
            .checked_mul(num_samples)
            .filter(|&len| len <= MAX_FFT_SIZE)
            .ok_or_else(|| {
                StageError::InvalidInput(format!(
                    "pad factor {} over {} samples exceeds the {} point FFT limit",
                    pad_factor, num_samples, MAX_FFT_SIZE
                ))
            })?;
        let fft_size = suggest_fft_size(padded, PaddingPolicy::AlignToSimd);
        let data = self.transform_axis(
            cube.view(),
            Axis(2),
            window,
            fft_size,
            LineOptions {
                remove_dc: true,
                shift: false,
            },
        )?;
        Ok(RangeSpectrum {
            data,
            fft_size,
            num_samples,
        })
    }

    /// Slow-time FFT per range bin and channel, zero velocity centred,
    /// magnitudes summed over channels.
    pub fn doppler_process(
        &mut self,
        range: &RangeSpectrum,
        window: WindowType,
    ) -> StageResult<DopplerMap> {
        let fft_size = suggest_fft_size(range.num_chirps(), PaddingPolicy::KeepLength);
        let spectrum = self.transform_axis(
            range.data.view(),
            Axis(1),
            window,
            fft_size,
            LineOptions {
                remove_dc: false,
                shift: true,
            },
        )?;
        let magnitude = spectrum
            .mapv(|v| v.norm())
            .sum_axis(Axis(0))
            .reversed_axes();
        Ok(DopplerMap {
            magnitude,
            fft_size,
        })
    }

    pub fn cached_plans(&self) -> usize {
        self.fft.cached_plans()
    }

    pub fn clear(&mut self) {
        self.fft.clear();
        self.windows.clear();
        self.pool.reset();
    }
}

impl Default for SpectralProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use std::f32::consts::PI;

    fn tone_cube(channels: usize, chirps: usize, samples: usize, bin: f32, doppler: f32) -> ComplexCube {
        Array3::from_shape_fn((channels, chirps, samples), |(_, m, n)| {
            let phase = 2.0 * PI * (bin * n as f32 / samples as f32 + doppler * m as f32 / chirps as f32);
            Complex32::from_polar(100.0, phase)
        })
    }

    #[test]
    fn zero_cube_gives_zero_spectrum_for_every_window_and_padding() {
        let mut dsp = SpectralProcessor::new();
        let cube = ComplexCube::zeros((2, 4, 60));
        for window in [
            WindowType::BlackmanHarris,
            WindowType::Hamming,
            WindowType::Hann,
            WindowType::Rectangular,
        ] {
            for pad in 1..4 {
                let spectrum = dsp.range_process(&cube, window, pad).unwrap();
                assert!(spectrum.fft_size >= pad * 60);
                assert!(spectrum.data.iter().all(|v| v.norm() == 0.0));
            }
        }
    }

    #[test]
    fn oversized_padding_is_an_error_not_a_panic() {
        let mut dsp = SpectralProcessor::new();
        let cube = ComplexCube::zeros((1, 2, 64));
        for pad in [usize::MAX / 4, MAX_FFT_SIZE] {
            assert!(matches!(
                dsp.range_process(&cube, WindowType::Hann, pad),
                Err(StageError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn range_peak_lands_on_tone_bin_with_padding() {
        let mut dsp = SpectralProcessor::new();
        let cube = tone_cube(1, 2, 64, 10.0, 0.0);
        let spectrum = dsp.range_process(&cube, WindowType::Hann, 2).unwrap();
        assert_eq!(spectrum.fft_size, 128);
        let profile = spectrum.profile(ChannelSelection::Individual(0)).unwrap();
        let peak = profile
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 20);
    }

    #[test]
    fn doppler_map_centres_zero_velocity() {
        let mut dsp = SpectralProcessor::new();
        let still = tone_cube(2, 16, 32, 4.0, 0.0);
        let moving = tone_cube(2, 16, 32, 4.0, 3.0);
        for (cube, expected) in [(still, 8), (moving, 11)] {
            let range = dsp.range_process(&cube, WindowType::Rectangular, 1).unwrap();
            let map = dsp.doppler_process(&range, WindowType::Rectangular).unwrap();
            assert_eq!(map.magnitude.dim(), (32, 16));
            let row = map.magnitude.row(4);
            let peak = row
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .unwrap();
            assert_eq!(peak, expected);
        }
        assert_eq!(dsp.cached_plans(), 2);
    }

    #[test]
    fn combined_selection_sums_channels_coherently() {
        let spectrum = RangeSpectrum {
            data: Array3::from_elem((3, 2, 4), Complex32::new(1.0, 0.0)),
            fft_size: 4,
            num_samples: 4,
        };
        let combined = spectrum.select(ChannelSelection::Combined).unwrap();
        assert!(combined.iter().all(|v| (v.re - 3.0).abs() < 1e-6));
        assert!(spectrum.select(ChannelSelection::Individual(3)).is_err());
        let profile = spectrum.profile(ChannelSelection::Combined).unwrap();
        assert!((profile[0] - 9.0).abs() < 1e-5);
    }
}
