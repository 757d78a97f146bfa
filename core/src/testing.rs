//! Synthetic frames and a fake capture card for unit tests.

use crate::capture::protocol::{CommandCode, CommandPacket, CommandReply};
use crate::config::RadarGeometry;
use crate::processing::organizer::virtual_channel;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::PI;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// 2 TX by 4 RX, 64 samples, 16 chirps per virtual channel.
pub(crate) fn test_geometry() -> RadarGeometry {
    RadarGeometry {
        tx_mask: 0b011,
        rx_mask: 0b1111,
        num_adc_samples: 64,
        chirps_per_loop: 2,
        num_loops: 16,
        ..Default::default()
    }
}

/// Point reflector placed on the FFT grid: `range_bin` cycles per chirp,
/// `doppler_bin` cycles per frame, `angle_deg` from broadside.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SyntheticTarget {
    pub range_bin: f32,
    pub doppler_bin: f32,
    pub angle_deg: f32,
    pub amplitude: f32,
}

impl SyntheticTarget {
    pub(crate) fn still(range_bin: f32, amplitude: f32) -> Self {
        Self {
            range_bin,
            doppler_bin: 0.0,
            angle_deg: 0.0,
            amplitude,
        }
    }
}

/// Raw frame bytes in capture order with uniform noise of `noise` counts on
/// I and Q.
pub(crate) fn synthesize_frame(
    radar: &RadarGeometry,
    targets: &[SyntheticTarget],
    noise: f32,
    seed: u64,
) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let (num_tx, num_rx) = (radar.num_tx(), radar.num_rx());
    let samples = radar.num_adc_samples;
    let slow_len = radar.doppler_chirps() as f32;
    let mut bytes = Vec::with_capacity(radar.frame_bytes());

    for chirp in 0..radar.chirps_per_frame() {
        let slow = (chirp / num_tx) as f32;
        for rx in 0..num_rx {
            let element = virtual_channel(rx, chirp, num_tx, num_rx) as f32;
            for n in 0..samples {
                let mut i = 0.0f32;
                let mut q = 0.0f32;
                for target in targets {
                    let phase = 2.0
                        * PI
                        * (target.range_bin * n as f32 / samples as f32
                            + target.doppler_bin * slow / slow_len)
                        + PI * element * target.angle_deg.to_radians().sin();
                    i += target.amplitude * phase.cos();
                    q += target.amplitude * phase.sin();
                }
                if noise > 0.0 {
                    i += rng.gen_range(-noise..noise);
                    q += rng.gen_range(-noise..noise);
                }
                let clamp = |v: f32| v.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                bytes.extend_from_slice(&clamp(i).to_le_bytes());
                bytes.extend_from_slice(&clamp(q).to_le_bytes());
            }
        }
    }
    bytes
}

/// Control-port responder standing in for the capture card. Answers every
/// command with status 0 when `answer` is set, otherwise stays silent.
pub(crate) struct FakeCaptureCard {
    pub addr: SocketAddr,
    seen: Arc<Mutex<Vec<CommandCode>>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FakeCaptureCard {
    pub(crate) fn spawn(answer: bool) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        let addr = socket.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let (log, flag) = (seen.clone(), stop.clone());
        let handle = thread::spawn(move || {
            let mut buffer = [0u8; 512];
            while !flag.load(Ordering::Acquire) {
                let (len, from) = match socket.recv_from(&mut buffer) {
                    Ok(received) => received,
                    Err(_) => continue,
                };
                let packet = match CommandPacket::decode(&buffer[..len]) {
                    Ok(packet) => packet,
                    Err(_) => continue,
                };
                log.lock().unwrap().push(packet.code);
                if answer {
                    let reply = CommandReply {
                        code: packet.code,
                        status: 0,
                    };
                    let _ = socket.send_to(&reply.encode(), from);
                }
            }
        });
        Self {
            addr,
            seen,
            stop,
            handle: Some(handle),
        }
    }

    pub(crate) fn seen(&self) -> Vec<CommandCode> {
        self.seen.lock().unwrap().clone()
    }
}

impl Drop for FakeCaptureCard {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
