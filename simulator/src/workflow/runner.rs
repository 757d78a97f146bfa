use anyhow::Context;
use log::info;
use mmwcore::capture::RawFrame;
use mmwcore::{MapKind, PipelineConfig, ProcessingChain, ResultSnapshot, Session, SessionState};
use std::time::Duration;
use tokio::signal;
use tokio::time;

pub struct WorkflowResult {
    pub frame_index: u64,
    pub stages: Vec<&'static str>,
    pub snapshots: Vec<ResultSnapshot>,
}

impl WorkflowResult {
    pub fn snapshot(&self, kind: MapKind) -> Option<&ResultSnapshot> {
        self.snapshots.iter().find(|snapshot| snapshot.kind == kind)
    }

    pub fn detection_count(&self, kind: MapKind) -> usize {
        self.snapshot(kind).map_or(0, |snapshot| snapshot.detections.len())
    }

    /// One line per published map.
    pub fn summary(&self) -> Vec<String> {
        self.snapshots
            .iter()
            .map(|snapshot| {
                let strongest = match snapshot.detections.strongest() {
                    Some(hit) => match hit.secondary {
                        Some(secondary) => format!(
                            ", strongest at {:.2} m / {:.2}, magnitude {:.1}",
                            hit.range_m, secondary, hit.magnitude
                        ),
                        None => format!(
                            ", strongest at {:.2} m, magnitude {:.1}",
                            hit.range_m, hit.magnitude
                        ),
                    },
                    None => String::new(),
                };
                format!(
                    "frame {} {:?}: dims {:?}, detections {}{}",
                    self.frame_index,
                    snapshot.kind,
                    snapshot.spectrum.dims,
                    snapshot.detections.len(),
                    strongest
                )
            })
            .collect()
    }
}

/// Runs frames through a processing chain without sockets or threads.
#[derive(Clone)]
pub struct Runner {
    config: PipelineConfig,
}

impl Runner {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self, frame: &RawFrame) -> anyhow::Result<WorkflowResult> {
        let mut chain = ProcessingChain::new(&self.config).context("initializing stages")?;
        let snapshots = chain
            .process(frame, self.config.processing())
            .with_context(|| format!("processing frame {}", frame.index))?;
        let stages = chain.stage_names();
        chain.cleanup();
        Ok(WorkflowResult {
            frame_index: frame.index,
            stages,
            snapshots,
        })
    }
}

/// Supervises a started session until Ctrl+C or until it falls back to
/// idle on its own.
pub async fn supervise_until_shutdown(
    session: &mut Session,
    tick: Duration,
) -> anyhow::Result<SessionState> {
    let mut interval = time::interval(tick);
    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("awaiting Ctrl+C to exit")?;
                info!("[driver] Ctrl+C received, stopping");
                return Ok(session.state());
            }
            _ = interval.tick() => {
                let state = session.supervise();
                if state == SessionState::Idle {
                    return Ok(state);
                }
            }
        }
    }
}
