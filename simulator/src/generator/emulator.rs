use crate::generator::profile::FrameSynthesizer;
use anyhow::Context;
use log::{debug, info, warn};
use mmwcore::capture::protocol::{
    encode_data_packets, CommandCode, CommandPacket, CommandReply, DATA_HEADER_LEN,
};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Timing of the emulated data stream.
#[derive(Debug, Clone, Copy)]
pub struct EmulatorSettings {
    pub frame_period: Duration,
    /// Datagram size including the data header.
    pub packet_size: usize,
}

impl Default for EmulatorSettings {
    fn default() -> Self {
        Self {
            frame_period: Duration::from_millis(100),
            packet_size: 1472,
        }
    }
}

/// Stand-in for the capture card: acknowledges every control command and,
/// between Start and Stop, streams synthetic frames to the data endpoint.
pub struct CaptureCardEmulator {
    control_addr: SocketAddr,
    streaming: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    frames_sent: Arc<AtomicU64>,
    threads: Vec<JoinHandle<()>>,
}

impl CaptureCardEmulator {
    pub fn spawn(
        control_bind: SocketAddr,
        data_target: SocketAddr,
        synthesizer: FrameSynthesizer,
        settings: EmulatorSettings,
    ) -> anyhow::Result<Self> {
        let control = UdpSocket::bind(control_bind)
            .with_context(|| format!("binding emulator control port {}", control_bind))?;
        control
            .set_read_timeout(Some(POLL_INTERVAL))
            .context("setting emulator control timeout")?;
        let control_addr = control.local_addr()?;

        let unspecified = if data_target.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let data = UdpSocket::bind(unspecified).context("binding emulator data socket")?;

        let streaming = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));
        let frames_sent = Arc::new(AtomicU64::new(0));

        let responder = {
            let (streaming, shutdown) = (streaming.clone(), shutdown.clone());
            thread::Builder::new()
                .name("emu-control".into())
                .spawn(move || answer_commands(control, &streaming, &shutdown))
                .context("spawning emulator control thread")?
        };
        let streamer = {
            let (streaming, shutdown) = (streaming.clone(), shutdown.clone());
            let sent = frames_sent.clone();
            let payload_len = settings.packet_size.saturating_sub(DATA_HEADER_LEN).max(1);
            let period = settings.frame_period;
            thread::Builder::new()
                .name("emu-stream".into())
                .spawn(move || {
                    let mut stream = DataStream {
                        socket: data,
                        target: data_target,
                        synthesizer,
                        payload_len,
                        next_frame: 0,
                        next_sequence: 1,
                    };
                    while !shutdown.load(Ordering::Acquire) {
                        if streaming.load(Ordering::Acquire) {
                            stream.send_frame();
                            sent.fetch_add(1, Ordering::Relaxed);
                            thread::sleep(period);
                        } else {
                            thread::sleep(POLL_INTERVAL);
                        }
                    }
                })
                .context("spawning emulator stream thread")?
        };

        info!(
            "[emulator] control on {}, streaming to {}",
            control_addr, data_target
        );
        Ok(Self {
            control_addr,
            streaming,
            shutdown,
            frames_sent,
            threads: vec![responder, streamer],
        })
    }

    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }
}

impl Drop for CaptureCardEmulator {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

fn answer_commands(socket: UdpSocket, streaming: &AtomicBool, shutdown: &AtomicBool) {
    let mut buffer = [0u8; 2048];
    while !shutdown.load(Ordering::Acquire) {
        let (len, from) = match socket.recv_from(&mut buffer) {
            Ok(received) => received,
            Err(_) => continue,
        };
        let packet = match CommandPacket::decode(&buffer[..len]) {
            Ok(packet) => packet,
            Err(err) => {
                debug!("[emulator] ignoring datagram from {}: {}", from, err);
                continue;
            }
        };
        match packet.code {
            CommandCode::Start => streaming.store(true, Ordering::Release),
            CommandCode::Stop => streaming.store(false, Ordering::Release),
            _ => {}
        }
        debug!("[emulator] {:?} from {}", packet.code, from);
        let reply = CommandReply {
            code: packet.code,
            status: 0,
        };
        if let Err(err) = socket.send_to(&reply.encode(), from) {
            warn!("[emulator] reply to {} failed: {}", from, err);
        }
    }
}

struct DataStream {
    socket: UdpSocket,
    target: SocketAddr,
    synthesizer: FrameSynthesizer,
    payload_len: usize,
    next_frame: u64,
    next_sequence: u32,
}

impl DataStream {
    fn send_frame(&mut self) {
        let frame = self.synthesizer.frame(self.next_frame);
        let offset = self.next_frame * frame.bytes.len() as u64;
        let packets = encode_data_packets(offset, &frame.bytes, self.payload_len, self.next_sequence);
        for packet in &packets {
            if let Err(err) = self.socket.send_to(packet, self.target) {
                warn!("[emulator] send to {} failed: {}", self.target, err);
                break;
            }
        }
        self.next_sequence = self.next_sequence.wrapping_add(packets.len() as u32);
        self.next_frame += 1;
    }
}
