//! Capture card links: the binary control protocol, datagram reassembly
//! and the data reception loop.

pub mod control;
pub mod protocol;
pub mod reassembler;
pub mod receiver;

use crate::capture::protocol::CommandCode;
use std::io;

pub use control::{ControlClient, ControlSettings, HandshakeReport};
pub use protocol::{CaptureParameters, CommandPacket, CommandReply, DataPacketHeader, PacketFormat};
pub use reassembler::{FrameReassembler, RawFrame, ReassemblyStats};
pub use receiver::{FrameReceiver, ReceiverSettings};

#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    #[error("control link failure: {0}")]
    Protocol(#[source] io::Error),
    #[error("no reply to {0:?} within the reply timeout")]
    ProtocolTimeout(CommandCode),
    #[error("data socket failure: {0}")]
    Socket(#[source] io::Error),
}

/// Read timeouts surface as `WouldBlock` on Unix and `TimedOut` on Windows.
pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
