//! Strongly typed configuration for one acquisition run.
//!
//! [`RadarGeometry`] mirrors the chirp/frame profile pushed to the front-end,
//! [`ProcessingParams`] holds the knobs that can change between frames, and
//! [`PipelineConfig`] bundles both with the stage composition after
//! validating them together. [`NetworkConfig`] carries endpoints and timing of
//! the capture card links.

use crate::capture::protocol::{CaptureParameters, PacketFormat};
use crate::math::window::WindowType;
use crate::processing::cfar::CfarParams;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Speed of light used by all derived metrics (m/s).
pub const SPEED_OF_LIGHT: f64 = 3e8;

/// One complex sample on the wire: 16-bit I followed by 16-bit Q.
pub const BYTES_PER_SAMPLE: usize = 4;

/// Upper bound on range zero padding.
pub const MAX_PAD_FACTOR: usize = 16;

/// Largest transform any stage may request.
pub const MAX_FFT_SIZE: usize = 1 << 16;

/// Largest angle transform; the virtual array rarely exceeds a few dozen
/// elements.
pub const MAX_ANGLE_FFT_SIZE: usize = 1024;

/// Fraction of the IF bandwidth usable for range after the anti-alias filter.
const IF_BANDWIDTH_FRACTION: f64 = 0.8;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid radar geometry: {0}")]
    Geometry(String),
    #[error("invalid processing parameter: {0}")]
    Processing(String),
}

/// Chirp and frame profile of the front-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarGeometry {
    /// Enabled transmit antennas, one bit per antenna.
    pub tx_mask: u8,
    /// Enabled receive antennas, one bit per antenna.
    pub rx_mask: u8,
    pub num_adc_samples: usize,
    /// Chirps in one loop of the chirp sequence (chirp end - chirp start + 1).
    pub chirps_per_loop: usize,
    pub num_loops: usize,
    pub sample_rate_ksps: f64,
    pub start_freq_ghz: f64,
    pub freq_slope_mhz_us: f64,
    pub idle_time_us: f64,
    pub ramp_end_time_us: f64,
    pub frame_periodicity_ms: f64,
}

impl Default for RadarGeometry {
    fn default() -> Self {
        Self {
            tx_mask: 0b111,
            rx_mask: 0b1111,
            num_adc_samples: 256,
            chirps_per_loop: 3,
            num_loops: 16,
            sample_rate_ksps: 5_000.0,
            start_freq_ghz: 77.0,
            freq_slope_mhz_us: 70.0,
            idle_time_us: 7.0,
            ramp_end_time_us: 60.0,
            frame_periodicity_ms: 100.0,
        }
    }
}

impl RadarGeometry {
    pub fn num_tx(&self) -> usize {
        self.tx_mask.count_ones() as usize
    }

    pub fn num_rx(&self) -> usize {
        self.rx_mask.count_ones() as usize
    }

    /// Size of the TDM-MIMO virtual array.
    pub fn num_virtual_channels(&self) -> usize {
        self.num_tx() * self.num_rx()
    }

    pub fn chirps_per_frame(&self) -> usize {
        self.chirps_per_loop * self.num_loops
    }

    /// Chirps seen by each virtual channel in one frame (slow-time length).
    pub fn doppler_chirps(&self) -> usize {
        match self.num_tx() {
            0 => 0,
            tx => self.chirps_per_frame() / tx,
        }
    }

    /// Byte size of one raw frame as delivered by the capture card.
    pub fn frame_bytes(&self) -> usize {
        self.chirps_per_frame() * self.num_rx() * self.num_adc_samples * BYTES_PER_SAMPLE
    }

    pub fn adc_sampling_time_us(&self) -> f64 {
        if self.sample_rate_ksps <= 0.0 {
            return 0.0;
        }
        self.num_adc_samples as f64 / self.sample_rate_ksps * 1_000.0
    }

    pub fn chirp_time_us(&self) -> f64 {
        self.idle_time_us + self.ramp_end_time_us
    }

    pub fn inter_chirp_time_us(&self) -> f64 {
        self.idle_time_us + (self.ramp_end_time_us - self.adc_sampling_time_us())
    }

    pub fn total_bandwidth_mhz(&self) -> f64 {
        self.ramp_end_time_us * self.freq_slope_mhz_us
    }

    pub fn valid_bandwidth_mhz(&self) -> f64 {
        self.adc_sampling_time_us() * self.freq_slope_mhz_us
    }

    pub fn range_resolution_m(&self) -> f64 {
        let bandwidth = self.valid_bandwidth_mhz();
        if bandwidth <= 0.0 {
            return 0.0;
        }
        SPEED_OF_LIGHT / (2.0 * bandwidth * 1e6)
    }

    pub fn max_range_m(&self) -> f64 {
        if self.freq_slope_mhz_us <= 0.0 {
            return 0.0;
        }
        let slope_hz_per_s = self.freq_slope_mhz_us * 1e12;
        IF_BANDWIDTH_FRACTION * self.sample_rate_ksps * 1e3 * SPEED_OF_LIGHT
            / (2.0 * slope_hz_per_s)
    }

    pub fn wavelength_m(&self) -> f64 {
        if self.start_freq_ghz <= 0.0 {
            return 0.0;
        }
        SPEED_OF_LIGHT / (self.start_freq_ghz * 1e9)
    }

    pub fn velocity_resolution_mps(&self) -> f64 {
        self.velocity_per_bin_mps(self.doppler_chirps())
    }

    pub fn max_velocity_mps(&self) -> f64 {
        let denom = 4.0 * self.num_tx() as f64 * self.chirp_time_us() * 1e-6;
        if denom <= 0.0 {
            return 0.0;
        }
        self.wavelength_m() / denom
    }

    pub fn active_frame_time_ms(&self) -> f64 {
        self.chirps_per_frame() as f64 * self.chirp_time_us() / 1_000.0
    }

    pub fn duty_cycle_percent(&self) -> f64 {
        if self.frame_periodicity_ms <= 0.0 {
            return 0.0;
        }
        self.active_frame_time_ms() / self.frame_periodicity_ms * 100.0
    }

    pub fn num_range_bins(&self) -> usize {
        if self.num_adc_samples == 0 {
            return 0;
        }
        self.num_adc_samples.next_power_of_two()
    }

    pub fn num_doppler_bins(&self) -> usize {
        match self.doppler_chirps() {
            0 => 0,
            chirps => chirps.next_power_of_two(),
        }
    }

    pub fn radar_cube_size_kb(&self) -> f64 {
        self.frame_bytes() as f64 / 1024.0
    }

    /// Meters covered by one bin of a range FFT of `fft_size` points.
    pub fn range_per_bin_m(&self, fft_size: usize) -> f64 {
        if fft_size == 0 {
            return 0.0;
        }
        self.range_resolution_m() * self.num_adc_samples as f64 / fft_size as f64
    }

    /// Radial velocity covered by one bin of a Doppler FFT of `fft_size` points.
    pub fn velocity_per_bin_mps(&self, fft_size: usize) -> f64 {
        let denom =
            2.0 * fft_size as f64 * self.num_tx() as f64 * self.chirp_time_us() * 1e-6;
        if denom <= 0.0 {
            return 0.0;
        }
        self.wavelength_m() / denom
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: String| Err(ConfigError::Geometry(msg));
        if self.num_tx() == 0 {
            return fail("tx_mask enables no transmit antenna".into());
        }
        if self.num_rx() == 0 {
            return fail("rx_mask enables no receive antenna".into());
        }
        if self.num_adc_samples < 2 {
            return fail(format!(
                "num_adc_samples must be at least 2, got {}",
                self.num_adc_samples
            ));
        }
        if self.chirps_per_loop == 0 || self.num_loops == 0 {
            return fail("chirps_per_loop and num_loops must be positive".into());
        }
        if self.chirps_per_frame() % self.num_tx() != 0 {
            return fail(format!(
                "{} chirps per frame cannot be interleaved over {} transmitters",
                self.chirps_per_frame(),
                self.num_tx()
            ));
        }
        if self.sample_rate_ksps <= 0.0 {
            return fail("sample_rate_ksps must be positive".into());
        }
        if self.freq_slope_mhz_us <= 0.0 {
            return fail("freq_slope_mhz_us must be positive (zero bandwidth)".into());
        }
        if self.start_freq_ghz <= 0.0 {
            return fail("start_freq_ghz must be positive".into());
        }
        if self.chirp_time_us() <= 0.0 {
            return fail("idle_time_us + ramp_end_time_us must be positive".into());
        }
        Ok(())
    }
}

/// Which part of the virtual array feeds the range profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelSelection {
    /// A single virtual channel by index.
    Individual(usize),
    /// Coherent sum over all virtual channels.
    Combined,
}

impl Default for ChannelSelection {
    fn default() -> Self {
        ChannelSelection::Individual(0)
    }
}

/// Parameters that may be swapped between frames without restarting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingParams {
    pub window: WindowType,
    pub pad_factor: usize,
    pub channel: ChannelSelection,
    pub clutter_removal: bool,
    pub clutter_components: usize,
    pub cfar: CfarParams,
    pub angle_fft_size: usize,
}

impl Default for ProcessingParams {
    fn default() -> Self {
        Self {
            window: WindowType::BlackmanHarris,
            pad_factor: 1,
            channel: ChannelSelection::default(),
            clutter_removal: false,
            clutter_components: 2,
            cfar: CfarParams::default(),
            angle_fft_size: 64,
        }
    }
}

impl ProcessingParams {
    pub fn validate(&self, radar: &RadarGeometry) -> Result<(), ConfigError> {
        let fail = |msg: String| Err(ConfigError::Processing(msg));
        if self.pad_factor == 0 {
            return fail("pad_factor must be a positive integer".into());
        }
        if self.pad_factor > MAX_PAD_FACTOR {
            return fail(format!(
                "pad_factor {} exceeds the maximum of {}",
                self.pad_factor, MAX_PAD_FACTOR
            ));
        }
        let padded = self.pad_factor.checked_mul(radar.num_adc_samples);
        if padded.map_or(true, |len| len > MAX_FFT_SIZE) {
            return fail(format!(
                "pad_factor {} over {} samples exceeds the {} point range FFT limit",
                self.pad_factor, radar.num_adc_samples, MAX_FFT_SIZE
            ));
        }
        if !(self.cfar.pfa > 0.0 && self.cfar.pfa < 1.0) {
            return fail(format!(
                "false-alarm probability must lie in (0, 1), got {}",
                self.cfar.pfa
            ));
        }
        if let ChannelSelection::Individual(index) = self.channel {
            if index >= radar.num_virtual_channels() {
                return fail(format!(
                    "channel {} out of range for {} virtual channels",
                    index,
                    radar.num_virtual_channels()
                ));
            }
        }
        if self.angle_fft_size == 0 || self.angle_fft_size > MAX_ANGLE_FFT_SIZE {
            return fail(format!(
                "angle_fft_size must lie in 1..={}, got {}",
                MAX_ANGLE_FFT_SIZE, self.angle_fft_size
            ));
        }
        Ok(())
    }
}

/// Optional stages appended after range processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageSelection {
    pub doppler: bool,
    pub angle: bool,
}

impl Default for StageSelection {
    fn default() -> Self {
        Self {
            doppler: true,
            angle: true,
        }
    }
}

/// Validated snapshot of geometry, processing parameters and stage layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "UncheckedPipelineConfig")]
pub struct PipelineConfig {
    radar: RadarGeometry,
    processing: ProcessingParams,
    stages: StageSelection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct UncheckedPipelineConfig {
    radar: RadarGeometry,
    processing: ProcessingParams,
    stages: StageSelection,
}

impl TryFrom<UncheckedPipelineConfig> for PipelineConfig {
    type Error = ConfigError;

    fn try_from(raw: UncheckedPipelineConfig) -> Result<Self, Self::Error> {
        PipelineConfig::new(raw.radar, raw.processing, raw.stages)
    }
}

impl PipelineConfig {
    pub fn new(
        radar: RadarGeometry,
        processing: ProcessingParams,
        stages: StageSelection,
    ) -> Result<Self, ConfigError> {
        radar.validate()?;
        processing.validate(&radar)?;
        Ok(Self {
            radar,
            processing,
            stages,
        })
    }

    pub fn radar(&self) -> &RadarGeometry {
        &self.radar
    }

    pub fn processing(&self) -> &ProcessingParams {
        &self.processing
    }

    pub fn stages(&self) -> StageSelection {
        self.stages
    }

    /// Returns a copy carrying new processing parameters, validated against
    /// the unchanged geometry.
    pub fn with_processing(&self, processing: ProcessingParams) -> Result<Self, ConfigError> {
        processing.validate(&self.radar)?;
        Ok(Self {
            radar: self.radar.clone(),
            processing,
            stages: self.stages,
        })
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            radar: RadarGeometry::default(),
            processing: ProcessingParams::default(),
            stages: StageSelection::default(),
        }
    }
}

fn default_data_bind() -> SocketAddr {
    SocketAddr::from(([192, 168, 33, 30], 4098))
}

fn default_control_bind() -> SocketAddr {
    SocketAddr::from(([192, 168, 33, 30], 4096))
}

fn default_fpga_address() -> SocketAddr {
    SocketAddr::from(([192, 168, 33, 180], 4096))
}

fn default_reply_timeout_ms() -> u64 {
    1_000
}

fn default_command_interval_ms() -> u64 {
    100
}

fn default_receive_timeout_ms() -> u64 {
    100
}

fn default_queue_capacity() -> usize {
    8
}

fn default_queue_put_timeout_ms() -> u64 {
    500
}

fn default_process_poll_ms() -> u64 {
    100
}

fn default_max_restarts() -> u32 {
    3
}

fn default_restart_backoff_ms() -> u64 {
    500
}

fn default_join_timeout_ms() -> u64 {
    2_000
}

/// Endpoints and timing of the capture card control and data links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_data_bind")]
    pub data_bind: SocketAddr,
    #[serde(default = "default_control_bind")]
    pub control_bind: SocketAddr,
    #[serde(default = "default_fpga_address")]
    pub fpga_address: SocketAddr,
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
    #[serde(default = "default_command_interval_ms")]
    pub command_interval_ms: u64,
    /// Reject the handshake when any command goes unanswered.
    #[serde(default)]
    pub require_acknowledgement: bool,
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_queue_put_timeout_ms")]
    pub queue_put_timeout_ms: u64,
    #[serde(default = "default_process_poll_ms")]
    pub process_poll_ms: u64,
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_restart_backoff_ms")]
    pub restart_backoff_ms: u64,
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
    #[serde(default)]
    pub capture: CaptureParameters,
    #[serde(default)]
    pub packet_format: PacketFormat,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            data_bind: default_data_bind(),
            control_bind: default_control_bind(),
            fpga_address: default_fpga_address(),
            reply_timeout_ms: default_reply_timeout_ms(),
            command_interval_ms: default_command_interval_ms(),
            require_acknowledgement: false,
            receive_timeout_ms: default_receive_timeout_ms(),
            queue_capacity: default_queue_capacity(),
            queue_put_timeout_ms: default_queue_put_timeout_ms(),
            process_poll_ms: default_process_poll_ms(),
            max_restarts: default_max_restarts(),
            restart_backoff_ms: default_restart_backoff_ms(),
            join_timeout_ms: default_join_timeout_ms(),
            capture: CaptureParameters::default(),
            packet_format: PacketFormat::default(),
        }
    }
}

impl NetworkConfig {
    /// Loopback endpoints with ephemeral ports and short timeouts.
    pub fn loopback() -> Self {
        let local = SocketAddr::from(([127, 0, 0, 1], 0));
        Self {
            data_bind: local,
            control_bind: local,
            fpga_address: local,
            reply_timeout_ms: 200,
            command_interval_ms: 0,
            restart_backoff_ms: 50,
            ..Default::default()
        }
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms.max(1))
    }

    pub fn command_interval(&self) -> Duration {
        Duration::from_millis(self.command_interval_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms.max(1))
    }

    pub fn queue_put_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_put_timeout_ms)
    }

    pub fn process_poll(&self) -> Duration {
        Duration::from_millis(self.process_poll_ms.max(1))
    }

    pub fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_geometry_derives_iwr_metrics() {
        let radar = RadarGeometry::default();
        assert_eq!(radar.num_tx(), 3);
        assert_eq!(radar.num_rx(), 4);
        assert_eq!(radar.num_virtual_channels(), 12);
        assert_eq!(radar.doppler_chirps(), 16);
        assert_eq!(radar.frame_bytes(), 48 * 4 * 256 * 4);
        assert!((radar.adc_sampling_time_us() - 51.2).abs() < 1e-9);
        assert!((radar.range_resolution_m() - 3e8 / (2.0 * 51.2 * 70.0 * 1e6)).abs() < 1e-9);
        assert!(radar.velocity_resolution_mps() > 0.0);
        assert_eq!(radar.num_range_bins(), 256);
    }

    #[test]
    fn degenerate_geometry_yields_zero_metrics() {
        let radar = RadarGeometry {
            freq_slope_mhz_us: 0.0,
            tx_mask: 0,
            ..Default::default()
        };
        assert_eq!(radar.range_resolution_m(), 0.0);
        assert_eq!(radar.max_range_m(), 0.0);
        assert_eq!(radar.velocity_resolution_mps(), 0.0);
        assert_eq!(radar.doppler_chirps(), 0);
        assert!(radar.validate().is_err());
    }

    #[test]
    fn geometry_rejects_uneven_tdm_interleave() {
        let radar = RadarGeometry {
            chirps_per_loop: 2,
            num_loops: 1,
            ..Default::default()
        };
        assert!(matches!(radar.validate(), Err(ConfigError::Geometry(_))));
    }

    #[test]
    fn processing_rejects_out_of_range_channel() {
        let radar = RadarGeometry::default();
        let params = ProcessingParams {
            channel: ChannelSelection::Individual(12),
            ..Default::default()
        };
        assert!(params.validate(&radar).is_err());
        let params = ProcessingParams {
            channel: ChannelSelection::Individual(11),
            ..Default::default()
        };
        assert!(params.validate(&radar).is_ok());
    }

    #[test]
    fn processing_rejects_oversized_padding() {
        let radar = RadarGeometry::default();
        for pad_factor in [MAX_PAD_FACTOR + 1, 1 << 20, usize::MAX / 4] {
            let params = ProcessingParams {
                pad_factor,
                ..Default::default()
            };
            assert!(
                matches!(params.validate(&radar), Err(ConfigError::Processing(_))),
                "pad_factor {}",
                pad_factor
            );
        }
        let params = ProcessingParams {
            pad_factor: MAX_PAD_FACTOR,
            ..Default::default()
        };
        assert!(params.validate(&radar).is_ok());

        let long_chirp = RadarGeometry {
            num_adc_samples: MAX_FFT_SIZE / 2,
            ..Default::default()
        };
        let params = ProcessingParams {
            pad_factor: 4,
            ..Default::default()
        };
        assert!(params.validate(&long_chirp).is_err());
    }

    #[test]
    fn processing_rejects_oversized_angle_fft() {
        let radar = RadarGeometry::default();
        for angle_fft_size in [0, MAX_ANGLE_FFT_SIZE + 1, usize::MAX] {
            let params = ProcessingParams {
                angle_fft_size,
                ..Default::default()
            };
            assert!(params.validate(&radar).is_err(), "angle_fft_size {}", angle_fft_size);
        }
        let params = ProcessingParams {
            angle_fft_size: MAX_ANGLE_FFT_SIZE,
            ..Default::default()
        };
        assert!(params.validate(&radar).is_ok());
    }

    #[test]
    fn pipeline_config_deserializes_through_validation() {
        let json = r#"{"radar": {"tx_mask": 1, "rx_mask": 15}, "processing": {"pad_factor": 2}}"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.radar().num_virtual_channels(), 4);
        assert_eq!(config.processing().pad_factor, 2);

        let bad = r#"{"processing": {"pad_factor": 0}}"#;
        assert!(serde_json::from_str::<PipelineConfig>(bad).is_err());
    }

    #[test]
    fn hot_swap_keeps_geometry_and_validates() {
        let config = PipelineConfig::default();
        let swapped = config
            .with_processing(ProcessingParams {
                clutter_removal: true,
                ..Default::default()
            })
            .unwrap();
        assert!(swapped.processing().clutter_removal);
        assert_eq!(swapped.radar(), config.radar());

        let mut broken = ProcessingParams::default();
        broken.cfar.pfa = 1.5;
        assert!(config.with_processing(broken).is_err());
    }
}
