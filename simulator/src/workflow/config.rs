use crate::generator::profile::SceneConfig;
use anyhow::Context;
use mmwcore::{NetworkConfig, PipelineConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

fn default_bridge_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9000))
}

fn default_emulator_control() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 4096))
}

fn default_frame_period_ms() -> u64 {
    100
}

/// Settings of the built-in capture-card emulator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmulatorConfig {
    #[serde(default = "default_emulator_control")]
    pub control_bind: SocketAddr,
    #[serde(default = "default_frame_period_ms")]
    pub frame_period_ms: u64,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            control_bind: default_emulator_control(),
            frame_period_ms: default_frame_period_ms(),
        }
    }
}

impl EmulatorConfig {
    pub fn frame_period(&self) -> Duration {
        Duration::from_millis(self.frame_period_ms)
    }
}

/// Everything one driver run needs, loadable from a single YAML file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub pipeline: PipelineConfig,
    pub network: NetworkConfig,
    pub scene: SceneConfig,
    pub emulator: EmulatorConfig,
    pub bridge_bind: SocketAddr,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            network: NetworkConfig::default(),
            scene: SceneConfig::default(),
            emulator: EmulatorConfig::default(),
            bridge_bind: default_bridge_bind(),
        }
    }
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading workflow config {}", path_ref.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing workflow config {}", path_ref.display()))?;
        Ok(config)
    }

    /// Network settings for a run against the local emulator: data on
    /// loopback at the configured port, control pointed at the emulator.
    pub fn emulated_network(&self, emulator_control: SocketAddr) -> NetworkConfig {
        let loopback = |port| SocketAddr::from(([127, 0, 0, 1], port));
        NetworkConfig {
            data_bind: loopback(self.network.data_bind.port()),
            control_bind: loopback(0),
            fpga_address: emulator_control,
            ..self.network.clone()
        }
    }
}
