//! Acquisition session: control handshake, reception and processing threads,
//! result channels and the start/stop state machine.

use crate::capture::{
    CaptureError, ControlClient, ControlSettings, FrameReceiver, HandshakeReport, RawFrame,
    ReceiverSettings,
};
use crate::config::{ConfigError, NetworkConfig, PipelineConfig, ProcessingParams, RadarGeometry};
use crate::output::{ResultPublisher, ResultSubscriber, SessionStatus, StatusBoard};
use crate::prelude::StageError;
use crate::processing::ProcessingChain;
use crate::telemetry::log::LogManager;
use crate::telemetry::metrics::{MetricsRecorder, MetricsSnapshot};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::watch;

pub use crate::output::SessionState;

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error("cannot {action} while {state:?}")]
    InvalidState {
        action: &'static str,
        state: SessionState,
    },
    #[error("failed to spawn {0} thread: {1}")]
    Spawn(&'static str, #[source] io::Error),
}

/// Cloneable access to a running session for other threads and tasks:
/// parameter hot-swap, result subscription and status.
#[derive(Clone)]
pub struct SessionHandle {
    radar: RadarGeometry,
    params: Arc<watch::Sender<ProcessingParams>>,
    publisher: ResultPublisher,
    status: StatusBoard,
}

impl SessionHandle {
    /// Validates and installs new processing parameters; the processing
    /// thread picks them up at its next frame.
    pub fn update_params(&self, params: ProcessingParams) -> Result<(), ConfigError> {
        params.validate(&self.radar)?;
        self.params.send_replace(params);
        Ok(())
    }

    pub fn params(&self) -> ProcessingParams {
        self.params.borrow().clone()
    }

    pub fn radar(&self) -> &RadarGeometry {
        &self.radar
    }

    pub fn subscribe(&self) -> ResultSubscriber {
        self.publisher.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        self.status.current()
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }
}

struct ActiveRun {
    stop: Arc<AtomicBool>,
    control: ControlClient,
    reception: JoinHandle<()>,
    processing: JoinHandle<()>,
    queue: Receiver<RawFrame>,
    data_addr: SocketAddr,
}

/// Owns everything one acquisition needs. Dropping a streaming session
/// stops it.
pub struct Session {
    config: PipelineConfig,
    network: NetworkConfig,
    handle: SessionHandle,
    metrics: Arc<MetricsRecorder>,
    logger: LogManager,
    run: Option<ActiveRun>,
}

impl Session {
    pub fn new(config: PipelineConfig, network: NetworkConfig) -> Self {
        let (params, _) = watch::channel(config.processing().clone());
        let handle = SessionHandle {
            radar: config.radar().clone(),
            params: Arc::new(params),
            publisher: ResultPublisher::new(),
            status: StatusBoard::new(),
        };
        Self {
            config,
            network,
            handle,
            metrics: Arc::new(MetricsRecorder::new()),
            logger: LogManager::new("session"),
            run: None,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn subscribe(&self) -> ResultSubscriber {
        self.handle.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.handle.status.state()
    }

    pub fn status(&self) -> SessionStatus {
        self.handle.status.current()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Bound address of the data socket while streaming.
    pub fn data_addr(&self) -> Option<SocketAddr> {
        self.run.as_ref().map(|run| run.data_addr)
    }

    pub fn update_params(&self, params: ProcessingParams) -> Result<(), ConfigError> {
        self.handle.update_params(params)
    }

    /// Binds the data socket, runs the control handshake and starts the
    /// reception and processing threads.
    pub fn start(&mut self) -> Result<HandshakeReport, SessionError> {
        let state = self.state();
        if self.run.is_some() || state != SessionState::Idle {
            return Err(SessionError::InvalidState {
                action: "start",
                state,
            });
        }
        self.metrics.reset();
        self.handle.publisher.clear();
        self.handle.status.begin(SessionState::Connecting);

        match self.launch() {
            Ok((run, report)) => {
                self.logger.record(&format!(
                    "streaming from {} into {}",
                    self.network.fpga_address, run.data_addr
                ));
                self.run = Some(run);
                self.handle.status.set_state(SessionState::Streaming);
                Ok(report)
            }
            Err(err) => {
                self.logger.warn(&format!("start failed: {}", err));
                self.handle.status.fail(err.to_string());
                self.handle.status.set_state(SessionState::Idle);
                Err(err)
            }
        }
    }

    fn launch(&self) -> Result<(ActiveRun, HandshakeReport), SessionError> {
        let radar = self.config.radar();
        let chain = ProcessingChain::new(&self.config)?;
        let (sender, queue) = bounded(self.network.queue_capacity.max(1));
        let receiver = FrameReceiver::bind(
            self.network.data_bind,
            radar.frame_bytes(),
            sender.clone(),
            ReceiverSettings::from(&self.network),
            self.metrics.clone(),
        )?;
        let data_addr = receiver.local_addr()?;

        let control = ControlClient::bind(
            self.network.control_bind,
            self.network.fpga_address,
            ControlSettings::from(&self.network),
        )?;
        let report = control.connect()?;

        let stop = Arc::new(AtomicBool::new(false));
        let reception = Reception {
            initial: Some(receiver),
            addr: data_addr,
            frame_bytes: radar.frame_bytes(),
            sender,
            settings: ReceiverSettings::from(&self.network),
            max_restarts: self.network.max_restarts,
            backoff: self.network.restart_backoff(),
            stop: stop.clone(),
            status: self.handle.status.clone(),
            metrics: self.metrics.clone(),
        };
        let reception = thread::Builder::new()
            .name("mmw-reception".into())
            .spawn(move || reception.run())
            .map_err(|err| SessionError::Spawn("reception", err))?;

        let processing = Processing {
            chain,
            queue: queue.clone(),
            params: self.handle.params.subscribe(),
            publisher: self.handle.publisher.clone(),
            status: self.handle.status.clone(),
            metrics: self.metrics.clone(),
            stop: stop.clone(),
            poll: self.network.process_poll(),
        };
        let processing = match thread::Builder::new()
            .name("mmw-processing".into())
            .spawn(move || processing.run())
        {
            Ok(handle) => handle,
            Err(err) => {
                stop.store(true, Ordering::Release);
                join_with_timeout(reception, self.network.join_timeout(), "reception");
                let _ = control.stop();
                return Err(SessionError::Spawn("processing", err));
            }
        };

        let run = ActiveRun {
            stop,
            control,
            reception,
            processing,
            queue,
            data_addr,
        };
        Ok((run, report))
    }

    /// Signals stop, joins both threads, sends Stop to the card, closes the
    /// sockets and drains the queue. Every step runs even when an earlier
    /// one timed out; calling it while idle does nothing.
    pub fn stop(&mut self) -> Result<(), SessionError> {
        let run = match self.run.take() {
            Some(run) => run,
            None => return Ok(()),
        };
        self.handle.status.set_state(SessionState::Stopping);
        run.stop.store(true, Ordering::Release);

        let timeout = self.network.join_timeout();
        join_with_timeout(run.reception, timeout, "reception");
        join_with_timeout(run.processing, timeout, "processing");

        match run.control.stop() {
            Ok(true) => {}
            Ok(false) => self.logger.warn("capture card did not acknowledge Stop"),
            Err(err) => self.logger.warn(&format!("Stop command failed: {}", err)),
        }
        drop(run.control);

        let drained = run.queue.try_iter().count();
        self.handle.publisher.clear();
        let metrics = self.metrics.snapshot();
        self.handle.status.publish_metrics(metrics);
        self.handle.status.set_state(SessionState::Idle);
        self.logger.record(&format!(
            "stopped after {} frames ({} dropped, {} discarded, {} left in queue)",
            metrics.frames_processed, metrics.frames_dropped, metrics.frames_discarded, drained
        ));
        Ok(())
    }

    /// Cleans up after a reception failure or a worker thread that exited on
    /// its own, and refreshes the published metrics. Returns the state after
    /// the check.
    pub fn supervise(&mut self) -> SessionState {
        let exited = self.run.as_ref().and_then(|run| {
            if run.stop.load(Ordering::Acquire) {
                Some("reception gave up")
            } else if run.processing.is_finished() {
                Some("processing thread exited")
            } else if run.reception.is_finished() {
                Some("reception thread exited")
            } else {
                None
            }
        });
        match exited {
            Some(reason) => {
                self.handle.status.fail(reason.to_string());
                self.logger
                    .warn(&format!("{}, shutting the session down", reason));
                let _ = self.stop();
            }
            None if self.run.is_some() => {
                self.handle.status.publish_metrics(self.metrics.snapshot());
            }
            None => {}
        }
        self.state()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Waits up to `timeout` for a thread; a thread still running afterwards is
/// left detached.
fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration, name: &str) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            log::warn!("[session] {} thread did not finish within {:?}", name, timeout);
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
    if handle.join().is_err() {
        log::warn!("[session] {} thread panicked", name);
        return false;
    }
    true
}

/// Calls `attempt` until it succeeds, `stop` is raised, or `max_restarts`
/// restarts have failed. Returns the number of restarts used.
fn run_with_restarts<F>(
    mut attempt: F,
    max_restarts: u32,
    backoff: Duration,
    stop: &AtomicBool,
    logger: &LogManager,
) -> Result<u32, CaptureError>
where
    F: FnMut(u32) -> Result<(), CaptureError>,
{
    let mut restarts = 0;
    loop {
        match attempt(restarts) {
            Ok(()) => return Ok(restarts),
            Err(_) if stop.load(Ordering::Acquire) => return Ok(restarts),
            Err(err) if restarts >= max_restarts => return Err(err),
            Err(err) => {
                restarts += 1;
                logger.warn(&format!(
                    "reception failed ({}), restart {} of {}",
                    err, restarts, max_restarts
                ));
                thread::sleep(backoff);
            }
        }
    }
}

struct Reception {
    initial: Option<FrameReceiver>,
    addr: SocketAddr,
    frame_bytes: usize,
    sender: Sender<RawFrame>,
    settings: ReceiverSettings,
    max_restarts: u32,
    backoff: Duration,
    stop: Arc<AtomicBool>,
    status: StatusBoard,
    metrics: Arc<MetricsRecorder>,
}

impl Reception {
    fn run(mut self) {
        let logger = LogManager::new("reception");
        let stop = self.stop.clone();
        let attempt = |_restart: u32| -> Result<(), CaptureError> {
            let result = match self.initial.take() {
                Some(mut receiver) => receiver.run(&stop),
                None => FrameReceiver::bind(
                    self.addr,
                    self.frame_bytes,
                    self.sender.clone(),
                    self.settings,
                    self.metrics.clone(),
                )
                .and_then(|mut receiver| receiver.run(&stop)),
            };
            if result.is_err() {
                self.metrics.record_error();
            }
            result
        };

        let outcome = run_with_restarts(attempt, self.max_restarts, self.backoff, &stop, &logger);
        if let Err(err) = outcome {
            logger.warn(&format!("giving up on the data link: {}", err));
            self.status.fail(format!("data link failed: {}", err));
            stop.store(true, Ordering::Release);
        }
    }
}

struct Processing {
    chain: ProcessingChain,
    queue: Receiver<RawFrame>,
    params: watch::Receiver<ProcessingParams>,
    publisher: ResultPublisher,
    status: StatusBoard,
    metrics: Arc<MetricsRecorder>,
    stop: Arc<AtomicBool>,
    poll: Duration,
}

impl Processing {
    fn run(mut self) {
        let logger = LogManager::new("processing");
        while !self.stop.load(Ordering::Acquire) {
            let frame = match self.queue.recv_timeout(self.poll) {
                Ok(frame) => frame,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            let params = self.params.borrow().clone();
            match self.chain.process(&frame, &params) {
                Ok(results) => {
                    for result in results {
                        self.publisher.publish(result);
                    }
                    let count = self.metrics.record_processed();
                    self.status.record_frame(frame.index, self.metrics.snapshot());
                    logger.periodic(count, || format!("{} frames processed", count));
                }
                Err(StageError::ShapeMismatch { expected, actual }) => {
                    self.metrics.record_error();
                    logger.warn(&format!(
                        "dropping frame {}: {} bytes, expected {}",
                        frame.index, actual, expected
                    ));
                }
                Err(err) => {
                    self.metrics.record_error();
                    logger.warn(&format!("frame {} failed: {}", frame.index, err));
                }
            }
        }
        self.chain.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::protocol::{encode_data_packets, CommandCode};
    use crate::config::StageSelection;
    use crate::output::MapKind;
    use crate::testing::{synthesize_frame, test_geometry, FakeCaptureCard, SyntheticTarget};
    use std::mem;
    use std::net::UdpSocket;
    use std::sync::atomic::AtomicU32;

    fn session_against(card: &FakeCaptureCard) -> Session {
        let config = PipelineConfig::new(
            test_geometry(),
            ProcessingParams::default(),
            StageSelection::default(),
        )
        .unwrap();
        let network = NetworkConfig {
            fpga_address: card.addr,
            ..NetworkConfig::loopback()
        };
        Session::new(config, network)
    }

    fn stream_frames(target: SocketAddr, frames: std::ops::Range<u64>, bytes: &[u8]) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        for index in frames {
            let offset = index * bytes.len() as u64;
            for packet in encode_data_packets(offset, bytes, 1456, 0) {
                socket.send_to(&packet, target).unwrap();
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn wait_for<F: FnMut() -> bool>(mut condition: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn session_streams_processes_and_stops() {
        let card = FakeCaptureCard::spawn(true);
        let mut session = session_against(&card);
        let results = session.subscribe();

        let report = session.start().unwrap();
        assert!(report.fully_acknowledged());
        assert_eq!(session.state(), SessionState::Streaming);
        assert!(matches!(
            session.start(),
            Err(SessionError::InvalidState { .. })
        ));

        let radar = test_geometry();
        let bytes = synthesize_frame(&radar, &[SyntheticTarget::still(20.0, 2000.0)], 0.0, 0);
        let data_addr = session.data_addr().unwrap();
        stream_frames(data_addr, 0..3, &bytes);
        assert!(wait_for(|| results
            .latest(MapKind::Range)
            .map_or(false, |r| r.frame_index == 2)));
        assert!(results.latest(MapKind::RangeDoppler).is_some());
        assert!(results.latest(MapKind::RangeAngle).is_some());
        let static_energy: f32 = results
            .latest(MapKind::Range)
            .unwrap()
            .spectrum
            .values
            .iter()
            .sum();
        assert!(static_energy > 0.0);

        let handle = session.handle();
        let mut params = handle.params();
        params.clutter_removal = true;
        handle.update_params(params.clone()).unwrap();
        stream_frames(data_addr, 3..5, &bytes);
        assert!(wait_for(|| results
            .latest(MapKind::Range)
            .map_or(false, |r| r.frame_index == 4)));
        let cleaned: f32 = results
            .latest(MapKind::Range)
            .unwrap()
            .spectrum
            .values
            .iter()
            .sum();
        assert!(cleaned < static_energy * 1e-6);

        params.pad_factor = 0;
        assert!(handle.update_params(params).is_err());

        session.stop().unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(results.latest(MapKind::Range).is_none());
        assert_eq!(session.metrics().frames_processed, 5);
        assert!(wait_for(|| card.seen().contains(&CommandCode::Stop)));
        session.stop().unwrap();
    }

    #[test]
    fn strict_handshake_without_replies_fails_start() {
        let card = FakeCaptureCard::spawn(false);
        let mut session = session_against(&card);
        session.network.require_acknowledgement = true;
        let result = session.start();
        assert!(matches!(
            result,
            Err(SessionError::Capture(CaptureError::ProtocolTimeout(
                CommandCode::Connect
            )))
        ));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.status().is_failed());
        assert!(session.data_addr().is_none());
    }

    #[test]
    fn lenient_handshake_streams_despite_silence() {
        let card = FakeCaptureCard::spawn(false);
        let mut session = session_against(&card);
        let report = session.start().unwrap();
        assert_eq!(report.unanswered.len(), 5);
        assert_eq!(session.state(), SessionState::Streaming);
        assert_eq!(session.supervise(), SessionState::Streaming);
        drop(session);
    }

    #[test]
    fn restarts_are_bounded() {
        let logger = LogManager::new("test");
        let stop = AtomicBool::new(false);
        let calls = AtomicU32::new(0);
        let failing = |_: u32| -> Result<(), CaptureError> {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CaptureError::Socket(io::Error::new(io::ErrorKind::Other, "boom")))
        };
        assert!(run_with_restarts(failing, 3, Duration::ZERO, &stop, &logger).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        let mut remaining_failures = 2;
        let flaky = |_: u32| -> Result<(), CaptureError> {
            if remaining_failures > 0 {
                remaining_failures -= 1;
                Err(CaptureError::Socket(io::Error::new(io::ErrorKind::Other, "boom")))
            } else {
                Ok(())
            }
        };
        assert_eq!(run_with_restarts(flaky, 3, Duration::ZERO, &stop, &logger).unwrap(), 2);
    }

    #[test]
    fn failed_reception_is_cleaned_up_by_supervise() {
        let card = FakeCaptureCard::spawn(true);
        let mut session = session_against(&card);
        session.start().unwrap();
        let stop = session.run.as_ref().unwrap().stop.clone();
        session.handle.status.fail("data link failed: test".into());
        stop.store(true, Ordering::Release);

        assert_eq!(session.supervise(), SessionState::Idle);
        assert!(session.status().is_failed());
        assert!(session.data_addr().is_none());
    }

    #[test]
    fn dead_processing_thread_fails_the_session() {
        let card = FakeCaptureCard::spawn(true);
        let mut session = session_against(&card);
        session.start().unwrap();
        assert_eq!(session.supervise(), SessionState::Streaming);

        let dead = thread::Builder::new()
            .name("mmw-processing".into())
            .spawn(|| panic!("stage blew up"))
            .unwrap();
        assert!(wait_for(|| dead.is_finished()));
        let run = session.run.as_mut().unwrap();
        let live = mem::replace(&mut run.processing, dead);

        assert_eq!(session.supervise(), SessionState::Idle);
        let status = session.status();
        assert_eq!(status.failure.as_deref(), Some("processing thread exited"));
        assert!(session.data_addr().is_none());
        assert!(wait_for(|| live.is_finished()));
    }
}
