use crate::output::detection::{DetectionSet, MapKind};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisUnit {
    Meters,
    MetersPerSecond,
    Degrees,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisInfo {
    pub unit: AxisUnit,
    pub values: Vec<f32>,
}

impl AxisInfo {
    pub fn new(unit: AxisUnit, values: Vec<f32>) -> Self {
        Self { unit, values }
    }

    /// `len` evenly spaced values `(k - offset) * step`.
    pub fn linear(unit: AxisUnit, len: usize, step: f32, offset: f32) -> Self {
        Self::new(unit, (0..len).map(|k| (k as f32 - offset) * step).collect())
    }
}

/// Magnitude profile or map with its axes; 2D values are row-major over
/// `(range bin, secondary bin)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralFrame {
    pub dims: Vec<usize>,
    pub values: Vec<f32>,
    pub range_axis: AxisInfo,
    pub secondary_axis: Option<AxisInfo>,
}

impl SpectralFrame {
    pub fn profile(values: &Array1<f32>, range_axis: AxisInfo) -> Self {
        Self {
            dims: vec![values.len()],
            values: values.to_vec(),
            range_axis,
            secondary_axis: None,
        }
    }

    pub fn map(values: &Array2<f32>, range_axis: AxisInfo, secondary_axis: AxisInfo) -> Self {
        let (rows, cols) = values.dim();
        Self {
            dims: vec![rows, cols],
            values: values.iter().copied().collect(),
            range_axis,
            secondary_axis: Some(secondary_axis),
        }
    }

    pub fn value(&self, row: usize, col: usize) -> Option<f32> {
        let cols = self.dims.get(1).copied().unwrap_or(1);
        if col >= cols {
            return None;
        }
        self.values.get(row * cols + col).copied()
    }
}

/// Published result of one map for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSnapshot {
    pub kind: MapKind,
    pub frame_index: u64,
    pub spectrum: SpectralFrame,
    pub detections: DetectionSet,
}
