use anyhow::{bail, Context};
use clap::Parser;
use generator::emulator::{CaptureCardEmulator, EmulatorSettings};
use generator::profile::FrameSynthesizer;
use gui_bridge::bridge::GuiBridge;
use log::{info, warn};
use mmwcore::{MapKind, Session, SessionState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::runtime::Builder as TokioBuilder;
use workflow::config::WorkflowConfig;
use workflow::runner::{supervise_until_shutdown, Runner};

mod generator;
mod gui_bridge;
mod workflow;

const SUPERVISE_TICK: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(author, version, about = "Real-time FMCW radar capture and detection driver")]
struct Args {
    /// Process one synthetic frame through the chain and print a summary
    #[arg(long, default_value_t = false)]
    offline: bool,
    /// Stream from the capture card at the configured endpoints
    #[arg(long, default_value_t = false)]
    live: bool,
    /// Stream from a local capture-card emulator instead of hardware
    #[arg(long, default_value_t = false, conflicts_with = "live")]
    emulate: bool,
    /// Expose the latest maps and parameter updates over HTTP
    #[arg(long, default_value_t = false)]
    serve: bool,
    /// Load a workflow config from YAML
    #[arg(long)]
    workflow: Option<PathBuf>,
    /// Override the HTTP bridge address
    #[arg(long)]
    bridge: Option<SocketAddr>,
    /// Override the data port the session listens on
    #[arg(long)]
    data_port: Option<u16>,
    /// Fail the start when the capture card leaves a command unanswered
    #[arg(long, default_value_t = false)]
    strict: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut workflow_config = if let Some(path) = args.workflow.as_ref() {
        WorkflowConfig::load(path)?
    } else {
        WorkflowConfig::default()
    };
    if let Some(bridge) = args.bridge {
        workflow_config.bridge_bind = bridge;
    }
    if let Some(port) = args.data_port {
        workflow_config.network.data_bind.set_port(port);
    }
    if args.strict {
        workflow_config.network.require_acknowledgement = true;
    }

    if args.serve && !(args.live || args.emulate) {
        bail!("--serve needs a streaming session, add --live or --emulate");
    }
    if !(args.offline || args.live || args.emulate) {
        bail!("nothing to do, pass --offline, --live or --emulate");
    }

    if args.offline {
        run_offline(&workflow_config)?;
    }
    if args.live || args.emulate {
        run_session(&workflow_config, args.emulate, args.serve)?;
    }
    Ok(())
}

fn run_offline(config: &WorkflowConfig) -> anyhow::Result<()> {
    let synthesizer = FrameSynthesizer::new(config.pipeline.radar().clone(), &config.scene);
    let result = Runner::new(config.pipeline.clone()).execute(&synthesizer.frame(0))?;
    println!(
        "Offline run -> stages [{}], range detections {}",
        result.stages.join(" -> "),
        result.detection_count(MapKind::Range)
    );
    for line in result.summary() {
        println!("  {}", line);
    }
    Ok(())
}

fn run_session(config: &WorkflowConfig, emulate: bool, serve: bool) -> anyhow::Result<()> {
    let (network, _emulator) = if emulate {
        let target = SocketAddr::from(([127, 0, 0, 1], config.network.data_bind.port()));
        let emulator = CaptureCardEmulator::spawn(
            config.emulator.control_bind,
            target,
            FrameSynthesizer::new(config.pipeline.radar().clone(), &config.scene),
            EmulatorSettings {
                frame_period: config.emulator.frame_period(),
                packet_size: config.network.packet_format.packet_size as usize,
            },
        )?;
        (config.emulated_network(emulator.control_addr()), Some(emulator))
    } else {
        (config.network.clone(), None)
    };

    let mut session = Session::new(config.pipeline.clone(), network);
    let report = session.start().context("starting acquisition session")?;
    if report.fully_acknowledged() {
        info!("[driver] handshake acknowledged by the capture card");
    } else {
        warn!(
            "[driver] handshake incomplete: unanswered {:?}, rejected {:?}",
            report.unanswered, report.rejected
        );
    }

    let _bridge = if serve {
        Some(
            GuiBridge::spawn(session.handle(), config.bridge_bind)
                .context("starting HTTP bridge")?,
        )
    } else {
        None
    };

    let runtime = TokioBuilder::new_current_thread()
        .enable_all()
        .build()
        .context("creating runtime for signal handling")?;
    let state = runtime.block_on(supervise_until_shutdown(&mut session, SUPERVISE_TICK))?;
    session.stop().context("stopping acquisition session")?;
    let status = session.status();

    if let Some(reason) = status.failure {
        bail!("session ended in state {:?}: {}", state, reason);
    }
    if state == SessionState::Idle {
        info!("[driver] session went idle");
    }
    println!(
        "Session stopped -> frames processed {}, dropped {}, discarded {}",
        status.metrics.frames_processed,
        status.metrics.frames_dropped,
        status.metrics.frames_discarded
    );
    Ok(())
}
