use serde::{Deserialize, Serialize};

/// The three published result maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapKind {
    Range,
    RangeDoppler,
    RangeAngle,
}

impl MapKind {
    pub const ALL: [MapKind; 3] = [MapKind::Range, MapKind::RangeDoppler, MapKind::RangeAngle];
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CartesianPoint {
    pub x: f32,
    pub y: f32,
}

/// Converts a range and an angle from broadside (degrees) to the plane.
pub fn to_cartesian(range_m: f32, angle_deg: f32) -> CartesianPoint {
    let theta = angle_deg.to_radians();
    CartesianPoint {
        x: range_m * theta.cos(),
        y: range_m * theta.sin(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub range_bin: usize,
    pub range_m: f32,
    /// Doppler or angle bin on 2D maps.
    pub secondary_bin: Option<usize>,
    /// Velocity (m/s) or angle (degrees) on 2D maps.
    pub secondary: Option<f32>,
    pub magnitude: f32,
    pub position: Option<CartesianPoint>,
}

/// Detections of one map of one frame, in detector order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSet {
    pub kind: MapKind,
    detections: Vec<Detection>,
}

impl DetectionSet {
    pub fn new(kind: MapKind, detections: Vec<Detection>) -> Self {
        Self { kind, detections }
    }

    pub fn empty(kind: MapKind) -> Self {
        Self::new(kind, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.detections.iter()
    }

    pub fn as_slice(&self) -> &[Detection] {
        &self.detections
    }

    /// Detection with the largest magnitude.
    pub fn strongest(&self) -> Option<&Detection> {
        self.detections
            .iter()
            .max_by(|a, b| a.magnitude.total_cmp(&b.magnitude))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadside_target_lies_on_x_axis() {
        let point = to_cartesian(10.0, 0.0);
        assert!((point.x - 10.0).abs() < 1e-6);
        assert!(point.y.abs() < 1e-6);
        let side = to_cartesian(2.0, 30.0);
        assert!((side.y - 1.0).abs() < 1e-5);
    }
}
