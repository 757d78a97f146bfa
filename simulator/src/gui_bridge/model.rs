use mmwcore::math::WindowType;
use mmwcore::processing::CfarParams;
use mmwcore::telemetry::MetricsSnapshot;
use mmwcore::{ChannelSelection, ProcessingParams, RadarGeometry, SessionState, SessionStatus};
use serde::{Deserialize, Serialize};

/// Derived figures of the configured chirp, shown next to the maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadarSummary {
    pub virtual_channels: usize,
    pub range_resolution_m: f64,
    pub max_range_m: f64,
    pub velocity_resolution_mps: f64,
    pub max_velocity_mps: f64,
    pub frame_bytes: usize,
}

impl From<&RadarGeometry> for RadarSummary {
    fn from(radar: &RadarGeometry) -> Self {
        Self {
            virtual_channels: radar.num_virtual_channels(),
            range_resolution_m: radar.range_resolution_m(),
            max_range_m: radar.max_range_m(),
            velocity_resolution_mps: radar.velocity_resolution_mps(),
            max_velocity_mps: radar.max_velocity_mps(),
            frame_bytes: radar.frame_bytes(),
        }
    }
}

/// Body of `GET /status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusView {
    pub state: SessionState,
    pub last_frame: Option<u64>,
    pub failure: Option<String>,
    pub metrics: MetricsSnapshot,
    pub params: ProcessingParams,
    pub radar: RadarSummary,
}

impl StatusView {
    pub fn new(status: SessionStatus, params: ProcessingParams, radar: &RadarGeometry) -> Self {
        Self {
            state: status.state,
            last_frame: status.last_frame,
            failure: status.failure,
            metrics: status.metrics,
            params,
            radar: RadarSummary::from(radar),
        }
    }
}

/// Body of `POST /params`: fields left out keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParamsUpdate {
    pub window: Option<WindowType>,
    pub pad_factor: Option<usize>,
    pub channel: Option<ChannelSelection>,
    pub clutter_removal: Option<bool>,
    pub clutter_components: Option<usize>,
    pub guard_cells: Option<usize>,
    pub training_cells: Option<usize>,
    pub pfa: Option<f32>,
    pub group_peaks: Option<bool>,
    pub angle_fft_size: Option<usize>,
}

impl ParamsUpdate {
    pub fn apply(&self, current: ProcessingParams) -> ProcessingParams {
        let cfar = CfarParams {
            guard_cells: self.guard_cells.unwrap_or(current.cfar.guard_cells),
            training_cells: self.training_cells.unwrap_or(current.cfar.training_cells),
            pfa: self.pfa.unwrap_or(current.cfar.pfa),
            group_peaks: self.group_peaks.unwrap_or(current.cfar.group_peaks),
        };
        ProcessingParams {
            window: self.window.unwrap_or(current.window),
            pad_factor: self.pad_factor.unwrap_or(current.pad_factor),
            channel: self.channel.unwrap_or(current.channel),
            clutter_removal: self.clutter_removal.unwrap_or(current.clutter_removal),
            clutter_components: self
                .clutter_components
                .unwrap_or(current.clutter_components),
            cfar,
            angle_fft_size: self.angle_fft_size.unwrap_or(current.angle_fft_size),
        }
    }
}
