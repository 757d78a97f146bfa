use crate::capture::reassembler::{FrameReassembler, RawFrame};
use crate::capture::{is_timeout, CaptureError};
use crate::config::NetworkConfig;
use crate::telemetry::log::LogManager;
use crate::telemetry::metrics::MetricsRecorder;
use crossbeam_channel::{SendTimeoutError, Sender};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Largest datagram the data socket accepts.
const MAX_DATAGRAM: usize = 65_536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverSettings {
    pub receive_timeout: Duration,
    pub queue_put_timeout: Duration,
}

impl From<&NetworkConfig> for ReceiverSettings {
    fn from(network: &NetworkConfig) -> Self {
        Self {
            receive_timeout: network.receive_timeout(),
            queue_put_timeout: network.queue_put_timeout(),
        }
    }
}

/// Reception loop of the data link: datagrams in, complete frames onto the
/// bounded raw-frame queue.
pub struct FrameReceiver {
    socket: UdpSocket,
    reassembler: FrameReassembler,
    queue: Sender<RawFrame>,
    settings: ReceiverSettings,
    metrics: Arc<MetricsRecorder>,
    logger: LogManager,
}

impl FrameReceiver {
    pub fn bind(
        addr: SocketAddr,
        frame_bytes: usize,
        queue: Sender<RawFrame>,
        settings: ReceiverSettings,
        metrics: Arc<MetricsRecorder>,
    ) -> Result<Self, CaptureError> {
        let socket = UdpSocket::bind(addr).map_err(CaptureError::Socket)?;
        socket
            .set_read_timeout(Some(settings.receive_timeout))
            .map_err(CaptureError::Socket)?;
        Ok(Self {
            socket,
            reassembler: FrameReassembler::new(frame_bytes),
            queue,
            settings,
            metrics,
            logger: LogManager::new("receiver"),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, CaptureError> {
        self.socket.local_addr().map_err(CaptureError::Socket)
    }

    /// Receives until `stop` is raised or the socket fails. The flag is
    /// checked after every read timeout.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<(), CaptureError> {
        let mut buffer = vec![0u8; MAX_DATAGRAM];
        while !stop.load(Ordering::Acquire) {
            let len = match self.socket.recv(&mut buffer) {
                Ok(len) => len,
                Err(err) if is_timeout(&err) => continue,
                Err(err) => return Err(CaptureError::Socket(err)),
            };
            self.metrics.record_packet();

            let discarded_before = self.reassembler.stats().discarded_frames;
            let frames = self.reassembler.push_packet(&buffer[..len]);
            let discarded = self.reassembler.stats().discarded_frames - discarded_before;
            if discarded > 0 {
                self.metrics.record_frames_discarded(discarded);
            }

            for frame in frames {
                if !self.forward(frame) {
                    self.logger
                        .record("processing side closed the frame queue, stopping reception");
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Returns `false` once the queue has no receiver left.
    fn forward(&self, frame: RawFrame) -> bool {
        let index = frame.index;
        match self.queue.send_timeout(frame, self.settings.queue_put_timeout) {
            Ok(()) => {
                let count = self.metrics.record_frame_received();
                self.logger.periodic(count, || {
                    let stats = self.reassembler.stats();
                    format!(
                        "{} frames queued, {} packets, {} discarded, {} duplicates",
                        count, stats.packets, stats.discarded_frames, stats.duplicates
                    )
                });
                true
            }
            Err(SendTimeoutError::Timeout(_)) => {
                self.metrics.record_frame_dropped();
                self.logger
                    .warn(&format!("frame queue full, dropping frame {}", index));
                true
            }
            Err(SendTimeoutError::Disconnected(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::protocol::encode_data_packets;
    use crossbeam_channel::bounded;
    use std::thread;
    use std::time::Instant;

    const FRAME: usize = 2048;

    fn settings() -> ReceiverSettings {
        ReceiverSettings {
            receive_timeout: Duration::from_millis(20),
            queue_put_timeout: Duration::from_millis(20),
        }
    }

    fn send_frames(target: SocketAddr, frames: std::ops::Range<u64>) {
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        for index in frames {
            let bytes = vec![index as u8; FRAME];
            for packet in encode_data_packets(index * FRAME as u64, &bytes, 1000, 0) {
                sender.send_to(&packet, target).unwrap();
            }
        }
    }

    fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn frames_reach_the_queue_and_stop_flag_ends_the_loop() {
        let (tx, rx) = bounded(4);
        let metrics = Arc::new(MetricsRecorder::new());
        let mut receiver = FrameReceiver::bind(
            "127.0.0.1:0".parse().unwrap(),
            FRAME,
            tx,
            settings(),
            metrics.clone(),
        )
        .unwrap();
        let addr = receiver.local_addr().unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::spawn(move || receiver.run(&flag));

        send_frames(addr, 0..2);
        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!((first.index, second.index), (0, 1));
        assert!(second.bytes.iter().all(|&b| b == 1));

        stop.store(true, Ordering::Release);
        assert!(handle.join().unwrap().is_ok());
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.frames_received, 2);
        assert_eq!(snapshot.packets_received, 6);
    }

    #[test]
    fn full_queue_drops_frames_instead_of_blocking() {
        let (tx, rx) = bounded(1);
        let metrics = Arc::new(MetricsRecorder::new());
        let mut receiver = FrameReceiver::bind(
            "127.0.0.1:0".parse().unwrap(),
            FRAME,
            tx,
            settings(),
            metrics.clone(),
        )
        .unwrap();
        let addr = receiver.local_addr().unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::spawn(move || receiver.run(&flag));

        send_frames(addr, 0..3);
        assert!(wait_for(|| metrics.snapshot().frames_dropped == 2));
        stop.store(true, Ordering::Release);
        handle.join().unwrap().unwrap();

        assert_eq!(rx.try_recv().unwrap().index, 0);
        assert_eq!(metrics.snapshot().frames_received, 1);
    }
}
