use crate::capture::protocol::{
    CaptureParameters, CommandCode, CommandPacket, CommandReply, PacketFormat, REPLY_LEN,
};
use crate::capture::{is_timeout, CaptureError};
use crate::config::NetworkConfig;
use crate::telemetry::log::LogManager;
use log::debug;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

/// Timing and payloads of the control handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlSettings {
    pub reply_timeout: Duration,
    pub command_interval: Duration,
    pub require_acknowledgement: bool,
    pub capture: CaptureParameters,
    pub packet_format: PacketFormat,
}

impl From<&NetworkConfig> for ControlSettings {
    fn from(network: &NetworkConfig) -> Self {
        Self {
            reply_timeout: network.reply_timeout(),
            command_interval: network.command_interval(),
            require_acknowledgement: network.require_acknowledgement,
            capture: network.capture,
            packet_format: network.packet_format,
        }
    }
}

/// Outcome of the connect sequence, per command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeReport {
    pub acknowledged: Vec<CommandCode>,
    pub unanswered: Vec<CommandCode>,
    /// Commands answered with a non-zero status.
    pub rejected: Vec<(CommandCode, u16)>,
}

impl HandshakeReport {
    pub fn fully_acknowledged(&self) -> bool {
        self.unanswered.is_empty() && self.rejected.is_empty()
    }
}

/// UDP client for the capture card control port.
pub struct ControlClient {
    socket: UdpSocket,
    remote: SocketAddr,
    settings: ControlSettings,
    logger: LogManager,
}

impl ControlClient {
    pub fn bind(
        local: SocketAddr,
        remote: SocketAddr,
        settings: ControlSettings,
    ) -> Result<Self, CaptureError> {
        let socket = UdpSocket::bind(local).map_err(CaptureError::Protocol)?;
        Ok(Self {
            socket,
            remote,
            settings,
            logger: LogManager::new("control"),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, CaptureError> {
        self.socket.local_addr().map_err(CaptureError::Protocol)
    }

    fn handshake_sequence(&self) -> Vec<CommandPacket> {
        vec![
            CommandPacket::bare(CommandCode::Connect),
            CommandPacket::bare(CommandCode::GetVersion),
            CommandPacket::new(
                CommandCode::SetCaptureParameters,
                self.settings.capture.to_payload(),
            ),
            CommandPacket::new(
                CommandCode::SetPacketFormat,
                self.settings.packet_format.to_payload(),
            ),
            CommandPacket::bare(CommandCode::Start),
        ]
    }

    /// Runs Connect, GetVersion, SetCaptureParameters, SetPacketFormat and
    /// Start. Unanswered commands are skipped unless acknowledgement is
    /// required.
    pub fn connect(&self) -> Result<HandshakeReport, CaptureError> {
        let mut report = HandshakeReport::default();
        for (step, packet) in self.handshake_sequence().iter().enumerate() {
            if step > 0 && !self.settings.command_interval.is_zero() {
                thread::sleep(self.settings.command_interval);
            }
            match self.exchange(packet)? {
                Some(reply) if reply.is_success() => report.acknowledged.push(packet.code),
                Some(reply) => {
                    self.logger.warn(&format!(
                        "{:?} rejected with status {}",
                        packet.code, reply.status
                    ));
                    report.rejected.push((packet.code, reply.status));
                }
                None => {
                    if self.settings.require_acknowledgement {
                        return Err(CaptureError::ProtocolTimeout(packet.code));
                    }
                    self.logger
                        .warn(&format!("no reply to {:?}, continuing", packet.code));
                    report.unanswered.push(packet.code);
                }
            }
        }
        self.logger.record(&format!(
            "handshake done: {} acknowledged, {} unanswered",
            report.acknowledged.len(),
            report.unanswered.len()
        ));
        Ok(report)
    }

    /// Sends Stop. Returns whether the card acknowledged it.
    pub fn stop(&self) -> Result<bool, CaptureError> {
        let reply = self.exchange(&CommandPacket::bare(CommandCode::Stop))?;
        if reply.is_none() {
            self.logger.warn("no reply to Stop");
        }
        Ok(reply.map_or(false, |r| r.is_success()))
    }

    /// Sends one command and waits up to the reply timeout for the matching
    /// reply. `Ok(None)` means no valid reply arrived in time.
    pub fn exchange(&self, packet: &CommandPacket) -> Result<Option<CommandReply>, CaptureError> {
        self.socket
            .send_to(&packet.encode(), self.remote)
            .map_err(CaptureError::Protocol)?;

        let deadline = Instant::now() + self.settings.reply_timeout;
        let mut buffer = [0u8; 64];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            self.socket
                .set_read_timeout(Some(remaining))
                .map_err(CaptureError::Protocol)?;

            let len = match self.socket.recv_from(&mut buffer) {
                Ok((len, _)) => len,
                Err(err) if is_timeout(&err) => return Ok(None),
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    return Ok(None)
                }
                Err(err) => return Err(CaptureError::Protocol(err)),
            };

            if len != REPLY_LEN {
                debug!("[control] ignoring {} byte reply", len);
                continue;
            }
            match CommandReply::decode(&buffer[..len]) {
                Ok(reply) if reply.code == packet.code => return Ok(Some(reply)),
                Ok(reply) => debug!(
                    "[control] ignoring reply to {:?} while waiting for {:?}",
                    reply.code, packet.code
                ),
                Err(err) => debug!("[control] ignoring malformed reply: {}", err),
            }
        }
    }
}
