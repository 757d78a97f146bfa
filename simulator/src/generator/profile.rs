use mmwcore::capture::RawFrame;
use mmwcore::processing::organizer::virtual_channel;
use mmwcore::RadarGeometry;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// A point reflector in front of the array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub range_m: f32,
    /// Radial velocity, positive when receding.
    pub velocity_mps: f32,
    /// Azimuth from broadside, positive towards higher virtual channels.
    pub angle_deg: f32,
    /// Peak ADC counts on I and Q.
    pub amplitude: f32,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            range_m: 2.0,
            velocity_mps: 0.0,
            angle_deg: 0.0,
            amplitude: 1_200.0,
        }
    }
}

/// Scene rendered into synthetic ADC frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub targets: Vec<TargetConfig>,
    /// Uniform noise bound in ADC counts.
    pub noise: f32,
    pub seed: u64,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            targets: vec![
                TargetConfig::default(),
                TargetConfig {
                    range_m: 3.5,
                    velocity_mps: 1.2,
                    angle_deg: 20.0,
                    amplitude: 800.0,
                },
            ],
            noise: 20.0,
            seed: 0,
        }
    }
}

/// Target position expressed in FFT cycles for one geometry.
#[derive(Debug, Clone, Copy)]
struct GridTarget {
    range_cycles: f32,
    doppler_cycles: f32,
    spatial: f32,
    amplitude: f32,
}

/// Renders a [`SceneConfig`] as raw capture-order frames for one geometry.
#[derive(Debug, Clone)]
pub struct FrameSynthesizer {
    radar: RadarGeometry,
    noise: f32,
    seed: u64,
    targets: Vec<GridTarget>,
}

impl FrameSynthesizer {
    pub fn new(radar: RadarGeometry, scene: &SceneConfig) -> Self {
        let range_step = radar.range_per_bin_m(radar.num_adc_samples) as f32;
        let velocity_step = radar.velocity_per_bin_mps(radar.doppler_chirps()) as f32;
        let targets = scene
            .targets
            .iter()
            .map(|target| GridTarget {
                range_cycles: cycles(target.range_m, range_step),
                doppler_cycles: cycles(target.velocity_mps, velocity_step),
                spatial: PI * target.angle_deg.to_radians().sin(),
                amplitude: target.amplitude,
            })
            .collect();
        Self {
            radar,
            noise: scene.noise.max(0.0),
            seed: scene.seed,
            targets,
        }
    }

    pub fn radar(&self) -> &RadarGeometry {
        &self.radar
    }

    pub fn frame_bytes(&self) -> usize {
        self.radar.frame_bytes()
    }

    /// Frame `index` of the stream; the noise is reproducible per index.
    pub fn frame(&self, index: u64) -> RawFrame {
        let radar = &self.radar;
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(index));
        let (num_tx, num_rx) = (radar.num_tx(), radar.num_rx());
        let samples = radar.num_adc_samples;
        let slow_len = radar.doppler_chirps().max(1) as f32;
        let mut bytes = Vec::with_capacity(radar.frame_bytes());

        for chirp in 0..radar.chirps_per_frame() {
            let slow = (chirp / num_tx) as f32;
            for rx in 0..num_rx {
                let element = virtual_channel(rx, chirp, num_tx, num_rx) as f32;
                for n in 0..samples {
                    let (mut i, mut q) = (0.0f32, 0.0f32);
                    for target in &self.targets {
                        let phase = 2.0
                            * PI
                            * (target.range_cycles * n as f32 / samples as f32
                                + target.doppler_cycles * slow / slow_len)
                            + target.spatial * element;
                        i += target.amplitude * phase.cos();
                        q += target.amplitude * phase.sin();
                    }
                    if self.noise > 0.0 {
                        i += rng.gen_range(-self.noise..self.noise);
                        q += rng.gen_range(-self.noise..self.noise);
                    }
                    bytes.extend_from_slice(&to_adc(i).to_le_bytes());
                    bytes.extend_from_slice(&to_adc(q).to_le_bytes());
                }
            }
        }
        RawFrame { index, bytes }
    }
}

fn cycles(value: f32, per_bin: f32) -> f32 {
    if per_bin > 0.0 {
        value / per_bin
    } else {
        0.0
    }
}

fn to_adc(value: f32) -> i16 {
    value.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}
