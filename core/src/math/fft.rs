use num_complex::Complex32;
use rustfft::{num_traits::Zero, Fft, FftPlanner};
use std::collections::HashMap;
use std::sync::Arc;

/// How a transform length is rounded when no explicit size is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingPolicy {
    /// Fall back to the next multiple of 8 when a power of two is too far.
    AlignToSimd,
    /// Fall back to the unmodified length.
    KeepLength,
}

/// Suggests an FFT length for `length` input points: powers of two are kept,
/// lengths within 10% of the next power of two are rounded up to it.
pub fn suggest_fft_size(length: usize, policy: PaddingPolicy) -> usize {
    if length <= 1 {
        return length.max(1);
    }
    if length.is_power_of_two() {
        return length;
    }
    let next = length.next_power_of_two();
    if (next - length) as f64 <= length as f64 * 0.1 {
        return next;
    }
    match policy {
        PaddingPolicy::AlignToSimd => (length + 7) / 8 * 8,
        PaddingPolicy::KeepLength => length,
    }
}

/// Moves the zero-frequency bin to the centre of the spectrum.
pub fn fft_shift<T>(buffer: &mut [T]) {
    let half = buffer.len() / 2;
    buffer.rotate_right(half);
}

/// Forward-FFT plan cache wrapping the `rustfft` planner.
///
/// Plans are created once per size and reused for every later frame.
pub struct FftCache {
    planner: FftPlanner<f32>,
    plans: HashMap<usize, Arc<dyn Fft<f32>>>,
    scratch: Vec<Complex32>,
}

impl FftCache {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
            plans: HashMap::new(),
            scratch: Vec::new(),
        }
    }

    pub fn plan(&mut self, size: usize) -> Arc<dyn Fft<f32>> {
        let planner = &mut self.planner;
        self.plans
            .entry(size)
            .or_insert_with(|| planner.plan_fft_forward(size))
            .clone()
    }

    /// Transforms `buffer` in place using the cached plan for its length.
    pub fn forward_in_place(&mut self, buffer: &mut [Complex32]) {
        if buffer.is_empty() {
            return;
        }
        let fft = self.plan(buffer.len());
        let scratch_len = fft.get_inplace_scratch_len();
        if self.scratch.len() < scratch_len {
            self.scratch.resize(scratch_len, Complex32::zero());
        }
        fft.process_with_scratch(buffer, &mut self.scratch[..scratch_len]);
    }

    pub fn cached_plans(&self) -> usize {
        self.plans.len()
    }

    pub fn clear(&mut self) {
        self.plans.clear();
        self.scratch.clear();
    }
}

impl Default for FftCache {
    fn default() -> Self {
        Self::new()
    }
}
