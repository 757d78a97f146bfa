//! Cell-averaging CFAR detection on 1D profiles and 2D maps.
//!
//! The threshold multiplier is the classic `N (pfa^(-1/N) - 1)` scaled by an
//! empirical correction, with `N` the training cells available to the cell
//! under test after clipping at the map edges. Detections can be reduced to
//! local maxima of the cell-to-noise ratio so one target footprint yields one
//! report. The ratio does not depend on `pfa`, so grouping only ever removes
//! cells and a lower `pfa` never adds detections. A weak cell beside a
//! stronger one whose training window holds a second target still survives
//! grouping, since the ratio, not the raw power, decides the peak.

use crate::prelude::{StageError, StageResult};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Empirical scale applied to the textbook threshold multiplier.
pub const THRESHOLD_CORRECTION: f32 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CfarParams {
    pub guard_cells: usize,
    pub training_cells: usize,
    pub pfa: f32,
    /// Report only detected cells that are local maxima of the
    /// cell-to-noise ratio.
    pub group_peaks: bool,
}

impl Default for CfarParams {
    fn default() -> Self {
        Self {
            guard_cells: 2,
            training_cells: 8,
            pfa: 0.01,
            group_peaks: true,
        }
    }
}

/// `None` when no training cell is available or `pfa` is outside `(0, 1)`.
pub fn threshold_multiplier(training: usize, pfa: f32) -> Option<f32> {
    if training == 0 || !(pfa > 0.0 && pfa < 1.0) {
        return None;
    }
    let n = training as f32;
    Some(n * (pfa.powf(-1.0 / n) - 1.0) * THRESHOLD_CORRECTION)
}

pub struct CfarDetector {
    params: CfarParams,
}

impl CfarDetector {
    pub fn new(params: CfarParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &CfarParams {
        &self.params
    }

    fn check(&self) -> StageResult<()> {
        if threshold_multiplier(self.params.training_cells, self.params.pfa).is_none() {
            return Err(StageError::NumericDegeneracy(format!(
                "CFAR needs training cells and pfa in (0, 1), got {} cells at pfa {}",
                self.params.training_cells, self.params.pfa
            )));
        }
        Ok(())
    }

    /// Indices of detected cells of a power profile, ascending.
    pub fn detect(&self, power: &[f32]) -> StageResult<Vec<usize>> {
        self.check()?;
        let len = power.len();
        let guard = self.params.guard_cells;
        let reach = guard + self.params.training_cells;

        let mut prefix = vec![0.0f64; len + 1];
        for (i, &p) in power.iter().enumerate() {
            prefix[i + 1] = prefix[i] + p as f64;
        }
        let window_sum = |start: usize, end: usize| -> (f64, usize) {
            if end > start {
                (prefix[end] - prefix[start], end - start)
            } else {
                (0.0, 0)
            }
        };

        let mut hits = Vec::new();
        let mut scores = vec![0.0f64; len];
        for cut in 0..len {
            let (left_sum, left_n) = window_sum(cut.saturating_sub(reach), cut.saturating_sub(guard));
            let (right_sum, right_n) =
                window_sum((cut + guard + 1).min(len), (cut + reach + 1).min(len));
            let count = left_n + right_n;
            let alpha = match threshold_multiplier(count, self.params.pfa) {
                Some(alpha) => alpha,
                None => continue,
            };
            let noise = (left_sum + right_sum) / count as f64;
            scores[cut] = noise_ratio(power[cut], noise);
            if power[cut] as f64 > alpha as f64 * noise {
                hits.push(cut);
            }
        }

        if self.params.group_peaks {
            hits.retain(|&i| is_local_max_1d(&scores, i));
        }
        Ok(hits)
    }

    /// `(row, column)` of detected cells of a power map, in raster order.
    pub fn detect_2d(&self, power: ArrayView2<f32>) -> StageResult<Vec<(usize, usize)>> {
        self.check()?;
        let (rows, cols) = power.dim();
        let guard = self.params.guard_cells;
        let reach = guard + self.params.training_cells;
        let table = SummedArea::new(power);

        let mut hits = Vec::new();
        let mut scores = Array2::<f64>::zeros((rows, cols));
        for r in 0..rows {
            for c in 0..cols {
                let (outer_sum, outer_n) = table.around(r, c, reach);
                let (inner_sum, inner_n) = table.around(r, c, guard);
                let count = outer_n - inner_n;
                let alpha = match threshold_multiplier(count, self.params.pfa) {
                    Some(alpha) => alpha,
                    None => continue,
                };
                let noise = (outer_sum - inner_sum) / count as f64;
                scores[[r, c]] = noise_ratio(power[[r, c]], noise);
                if power[[r, c]] as f64 > alpha as f64 * noise {
                    hits.push((r, c));
                }
            }
        }

        if self.params.group_peaks {
            hits.retain(|&(r, c)| is_local_max_2d(&scores, r, c));
        }
        Ok(hits)
    }
}

/// Cell power over the training mean; a silent neighbourhood makes any
/// power infinitely strong.
fn noise_ratio(power: f32, noise: f64) -> f64 {
    if noise > 0.0 {
        power as f64 / noise
    } else if power > 0.0 {
        f64::INFINITY
    } else {
        0.0
    }
}

/// Strictly above the preceding neighbour and not below the following one.
fn is_local_max_1d(scores: &[f64], i: usize) -> bool {
    let value = scores[i];
    let before = i == 0 || value > scores[i - 1];
    let after = i + 1 >= scores.len() || value >= scores[i + 1];
    before && after
}

/// Same tie rule over the 8-neighbourhood in raster order.
fn is_local_max_2d(scores: &Array2<f64>, r: usize, c: usize) -> bool {
    let (rows, cols) = scores.dim();
    let value = scores[[r, c]];
    for nr in r.saturating_sub(1)..=(r + 1).min(rows - 1) {
        for nc in c.saturating_sub(1)..=(c + 1).min(cols - 1) {
            if (nr, nc) == (r, c) {
                continue;
            }
            let neighbour = scores[[nr, nc]];
            let earlier = (nr, nc) < (r, c);
            if (earlier && neighbour >= value) || (!earlier && neighbour > value) {
                return false;
            }
        }
    }
    true
}

/// Summed-area table with one row and column of zero padding.
struct SummedArea {
    table: Array2<f64>,
    rows: usize,
    cols: usize,
}

impl SummedArea {
    fn new(power: ArrayView2<f32>) -> Self {
        let (rows, cols) = power.dim();
        let mut table = Array2::<f64>::zeros((rows + 1, cols + 1));
        for r in 0..rows {
            for c in 0..cols {
                table[[r + 1, c + 1]] = power[[r, c]] as f64 + table[[r, c + 1]] + table[[r + 1, c]]
                    - table[[r, c]];
            }
        }
        Self { table, rows, cols }
    }

    /// Sum and cell count of the square of half-size `half` around `(r, c)`,
    /// clipped to the map.
    fn around(&self, r: usize, c: usize, half: usize) -> (f64, usize) {
        let r0 = r.saturating_sub(half);
        let c0 = c.saturating_sub(half);
        let r1 = (r + half + 1).min(self.rows);
        let c1 = (c + half + 1).min(self.cols);
        let sum = self.table[[r1, c1]] - self.table[[r0, c1]] - self.table[[r1, c0]]
            + self.table[[r0, c0]];
        (sum, (r1 - r0) * (c1 - c0))
    }
}
