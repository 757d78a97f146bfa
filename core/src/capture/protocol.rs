//! Wire format of the capture card control and data links.
//!
//! Control packets are `header | code | payload length | payload | footer`,
//! replies are `header | code | status | footer`, every field a little-endian
//! `u16`. Data packets carry a 10-byte header (sequence number and the
//! cumulative stream byte offset of the first payload byte).

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

pub const PACKET_HEADER: u16 = 0xA55A;
pub const PACKET_FOOTER: u16 = 0xEEAA;
/// Bytes of a control packet that are not payload.
pub const COMMAND_OVERHEAD: usize = 8;
pub const REPLY_LEN: usize = 8;
pub const DATA_HEADER_LEN: usize = 10;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("packet of {0} bytes is too short")]
    Truncated(usize),
    #[error("unexpected header 0x{0:04x}")]
    BadHeader(u16),
    #[error("unexpected footer 0x{0:04x}")]
    BadFooter(u16),
    #[error("unknown command code 0x{0:04x}")]
    UnknownCommand(u16),
    #[error("payload length {declared} does not match {actual} bytes on the wire")]
    LengthMismatch { declared: usize, actual: usize },
}

/// Closed set of control command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum CommandCode {
    Init = 0x01,
    Configure = 0x02,
    SetCaptureParameters = 0x03,
    GetStatus = 0x04,
    Start = 0x05,
    Stop = 0x06,
    Reset = 0x07,
    Debug = 0x08,
    Connect = 0x09,
    SetMode = 0x0A,
    SetPacketFormat = 0x0B,
    GetConfig = 0x0C,
    SetParams = 0x0D,
    GetVersion = 0x0E,
}

impl CommandCode {
    pub fn value(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for CommandCode {
    type Error = DecodeError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        let code = match value {
            0x01 => CommandCode::Init,
            0x02 => CommandCode::Configure,
            0x03 => CommandCode::SetCaptureParameters,
            0x04 => CommandCode::GetStatus,
            0x05 => CommandCode::Start,
            0x06 => CommandCode::Stop,
            0x07 => CommandCode::Reset,
            0x08 => CommandCode::Debug,
            0x09 => CommandCode::Connect,
            0x0A => CommandCode::SetMode,
            0x0B => CommandCode::SetPacketFormat,
            0x0C => CommandCode::GetConfig,
            0x0D => CommandCode::SetParams,
            0x0E => CommandCode::GetVersion,
            other => return Err(DecodeError::UnknownCommand(other)),
        };
        Ok(code)
    }
}

fn check_frame(bytes: &[u8], min_len: usize) -> Result<(), DecodeError> {
    if bytes.len() < min_len {
        return Err(DecodeError::Truncated(bytes.len()));
    }
    let header = LittleEndian::read_u16(&bytes[0..2]);
    if header != PACKET_HEADER {
        return Err(DecodeError::BadHeader(header));
    }
    let footer = LittleEndian::read_u16(&bytes[bytes.len() - 2..]);
    if footer != PACKET_FOOTER {
        return Err(DecodeError::BadFooter(footer));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPacket {
    pub code: CommandCode,
    pub payload: Vec<u8>,
}

impl CommandPacket {
    pub fn new(code: CommandCode, payload: Vec<u8>) -> Self {
        Self { code, payload }
    }

    pub fn bare(code: CommandCode) -> Self {
        Self::new(code, Vec::new())
    }

    pub fn encode(&self) -> Vec<u8> {
        let len = self.payload.len();
        let mut bytes = vec![0u8; COMMAND_OVERHEAD + len];
        LittleEndian::write_u16(&mut bytes[0..2], PACKET_HEADER);
        LittleEndian::write_u16(&mut bytes[2..4], self.code.value());
        LittleEndian::write_u16(&mut bytes[4..6], len as u16);
        bytes[6..6 + len].copy_from_slice(&self.payload);
        LittleEndian::write_u16(&mut bytes[6 + len..], PACKET_FOOTER);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        check_frame(bytes, COMMAND_OVERHEAD)?;
        let code = CommandCode::try_from(LittleEndian::read_u16(&bytes[2..4]))?;
        let declared = LittleEndian::read_u16(&bytes[4..6]) as usize;
        let actual = bytes.len() - COMMAND_OVERHEAD;
        if declared != actual {
            return Err(DecodeError::LengthMismatch { declared, actual });
        }
        Ok(Self::new(code, bytes[6..6 + actual].to_vec()))
    }
}

/// Acknowledgement returned by the capture card for one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandReply {
    pub code: CommandCode,
    pub status: u16,
}

impl CommandReply {
    pub fn is_success(&self) -> bool {
        self.status == 0
    }

    pub fn encode(&self) -> [u8; REPLY_LEN] {
        let mut bytes = [0u8; REPLY_LEN];
        LittleEndian::write_u16(&mut bytes[0..2], PACKET_HEADER);
        LittleEndian::write_u16(&mut bytes[2..4], self.code.value());
        LittleEndian::write_u16(&mut bytes[4..6], self.status);
        LittleEndian::write_u16(&mut bytes[6..8], PACKET_FOOTER);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != REPLY_LEN {
            return Err(DecodeError::Truncated(bytes.len()));
        }
        check_frame(bytes, REPLY_LEN)?;
        Ok(Self {
            code: CommandCode::try_from(LittleEndian::read_u16(&bytes[2..4]))?,
            status: LittleEndian::read_u16(&bytes[4..6]),
        })
    }
}

/// Capture card operating mode sent with `SetCaptureParameters`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureParameters {
    /// 1 = raw data logging.
    pub logging_mode: u8,
    /// 1 = 4-lane, 2 = 2-lane LVDS.
    pub lvds_mode: u8,
    /// 1 = LVDS capture.
    pub transfer_mode: u8,
    /// 2 = ethernet streaming.
    pub capture_mode: u8,
    /// 1 = 12-bit, 2 = 14-bit, 3 = 16-bit samples.
    pub sample_format: u8,
    pub timer_s: u8,
}

impl Default for CaptureParameters {
    fn default() -> Self {
        Self {
            logging_mode: 1,
            lvds_mode: 2,
            transfer_mode: 1,
            capture_mode: 2,
            sample_format: 3,
            timer_s: 30,
        }
    }
}

impl CaptureParameters {
    pub fn to_payload(&self) -> Vec<u8> {
        vec![
            self.logging_mode,
            self.lvds_mode,
            self.transfer_mode,
            self.capture_mode,
            self.sample_format,
            self.timer_s,
        ]
    }
}

/// Data packet sizing sent with `SetPacketFormat`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacketFormat {
    pub packet_size: u16,
    pub packet_delay_us: f32,
}

impl Default for PacketFormat {
    fn default() -> Self {
        Self {
            packet_size: 1472,
            packet_delay_us: 25.0,
        }
    }
}

impl PacketFormat {
    /// The card counts inter-packet delay in 8 ns ticks.
    pub fn delay_ticks(&self) -> u16 {
        (self.packet_delay_us * 1_000.0 / 8.0).round().clamp(0.0, u16::MAX as f32) as u16
    }

    pub fn to_payload(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; 6];
        LittleEndian::write_u16(&mut bytes[0..2], self.packet_size);
        LittleEndian::write_u16(&mut bytes[2..4], self.delay_ticks());
        bytes
    }
}

/// Header preceding every data packet payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataPacketHeader {
    pub sequence: u32,
    /// Stream bytes sent before this packet's payload.
    pub byte_offset: u64,
}

impl DataPacketHeader {
    /// Splits a datagram into header and payload; `None` when no payload follows.
    pub fn parse(datagram: &[u8]) -> Option<(Self, &[u8])> {
        if datagram.len() <= DATA_HEADER_LEN {
            return None;
        }
        let header = Self {
            sequence: LittleEndian::read_u32(&datagram[0..4]),
            byte_offset: LittleEndian::read_u48(&datagram[4..10]),
        };
        Some((header, &datagram[DATA_HEADER_LEN..]))
    }

    pub fn encode(&self) -> [u8; DATA_HEADER_LEN] {
        let mut bytes = [0u8; DATA_HEADER_LEN];
        LittleEndian::write_u32(&mut bytes[0..4], self.sequence);
        LittleEndian::write_u48(&mut bytes[4..10], self.byte_offset);
        bytes
    }
}

/// Cuts a contiguous stretch of stream bytes into data packets of at most
/// `payload_len` payload bytes, starting at `stream_offset`.
pub fn encode_data_packets(
    stream_offset: u64,
    bytes: &[u8],
    payload_len: usize,
    first_sequence: u32,
) -> Vec<Vec<u8>> {
    let payload_len = payload_len.max(1);
    bytes
        .chunks(payload_len)
        .enumerate()
        .map(|(i, chunk)| {
            let header = DataPacketHeader {
                sequence: first_sequence.wrapping_add(i as u32),
                byte_offset: stream_offset + (i * payload_len) as u64,
            };
            let mut packet = Vec::with_capacity(DATA_HEADER_LEN + chunk.len());
            packet.extend_from_slice(&header.encode());
            packet.extend_from_slice(chunk);
            packet
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_packet_matches_reference_bytes() {
        let bytes = CommandPacket::bare(CommandCode::Connect).encode();
        assert_eq!(bytes, vec![0x5A, 0xA5, 0x09, 0x00, 0x00, 0x00, 0xAA, 0xEE]);
    }

    #[test]
    fn capture_and_packet_payloads_match_reference_bytes() {
        let capture = CommandPacket::new(
            CommandCode::SetCaptureParameters,
            CaptureParameters::default().to_payload(),
        )
        .encode();
        assert_eq!(
            capture,
            vec![0x5A, 0xA5, 0x03, 0x00, 0x06, 0x00, 0x01, 0x02, 0x01, 0x02, 0x03, 0x1E, 0xAA, 0xEE]
        );
        assert_eq!(
            PacketFormat::default().to_payload(),
            vec![0xC0, 0x05, 0x35, 0x0C, 0x00, 0x00]
        );
    }

    #[test]
    fn decode_rejects_corrupted_packets() {
        let mut bytes = CommandPacket::bare(CommandCode::Start).encode();
        assert_eq!(
            CommandPacket::decode(&bytes).unwrap().code,
            CommandCode::Start
        );
        bytes[0] = 0;
        assert!(matches!(
            CommandPacket::decode(&bytes),
            Err(DecodeError::BadHeader(_))
        ));
        assert_eq!(
            CommandPacket::decode(&[0x5A, 0xA5]),
            Err(DecodeError::Truncated(2))
        );

        let mut lying = CommandPacket::new(CommandCode::SetParams, vec![1, 2]).encode();
        lying[4] = 5;
        assert!(matches!(
            CommandPacket::decode(&lying),
            Err(DecodeError::LengthMismatch { declared: 5, actual: 2 })
        ));
    }

    #[test]
    fn reply_decoding_checks_code_and_framing() {
        let reply = CommandReply {
            code: CommandCode::GetVersion,
            status: 0,
        };
        let decoded = CommandReply::decode(&reply.encode()).unwrap();
        assert_eq!(decoded, reply);
        assert!(decoded.is_success());

        let mut unknown = reply.encode();
        unknown[2] = 0x7F;
        assert_eq!(
            CommandReply::decode(&unknown),
            Err(DecodeError::UnknownCommand(0x7F))
        );
        assert!(CommandReply::decode(&reply.encode()[..6]).is_err());
    }

    #[test]
    fn data_header_splits_payload() {
        let header = DataPacketHeader {
            sequence: 7,
            byte_offset: 0x0102_0304_0506,
        };
        let mut datagram = header.encode().to_vec();
        datagram.extend_from_slice(&[9, 9, 9]);
        let (parsed, payload) = DataPacketHeader::parse(&datagram).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(payload, &[9, 9, 9]);
        assert!(DataPacketHeader::parse(&header.encode()).is_none());
    }

    #[test]
    fn stream_is_cut_into_offset_tagged_packets() {
        let bytes: Vec<u8> = (0..25).collect();
        let packets = encode_data_packets(100, &bytes, 10, 3);
        assert_eq!(packets.len(), 3);
        let (last, payload) = DataPacketHeader::parse(&packets[2]).unwrap();
        assert_eq!(last.sequence, 5);
        assert_eq!(last.byte_offset, 120);
        assert_eq!(payload, &[20, 21, 22, 23, 24]);
    }
}
