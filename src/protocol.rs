//! LocoNet accessory frames.
//!
//! Every command ends up as a sequence of 4-byte `OPC_SW_REQ` frames:
//!
//! ```text
//! byte 0: 0xB0                       opcode
//! byte 1: (addr - 1) & 0x7F          low address bits
//! byte 2: ((addr - 1) >> 7) & 0x0F   high address bits
//!         | 0x10                     output on
//!         | 0x20 if closed           direction
//! byte 3: !(b0 ^ b1 ^ b2)            checksum
//! ```
//!
//! XOR over a complete frame is always `0xFF`.
//!
//! # Example
//!
//! ```rust
//! use yard_dispatch::protocol::{Frame, WirePosition};
//!
//! let frame = Frame::switch_request(1, WirePosition::Closed).unwrap();
//! assert_eq!(frame.as_bytes(), &[0xB0, 0x00, 0x30, 0x7F]);
//! assert!(frame.checksum_ok());
//! ```

use core::fmt;

use crate::commands::{PointCommand, PointPosition, SignalCommand, SignalState, TurntableCommand};
use crate::error::ProtocolError;
use crate::topology::TurntableTrack;

/// Opcode of a switch (accessory) request.
pub const OPC_SW_REQ: u8 = 0xB0;

/// Highest accessory address on the bus.
pub const MAX_ACCESSORY_ADDRESS: u16 = 2048;

/// Direction bit: set = closed.
const DIR_CLOSED: u8 = 0x20;
/// Output bit: set = on.
const OUTPUT_ON: u8 = 0x10;

/// Length of an encoded frame.
pub const FRAME_LEN: usize = 4;

/// Accessory output state on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WirePosition {
    /// Closed (straight, green, lock engaged).
    Closed,
    /// Thrown (diverging, red, lock released).
    Thrown,
}

impl WirePosition {
    /// Wire state for a logical point position. `Undefined` has none.
    pub const fn from_point(position: PointPosition) -> Option<Self> {
        match position {
            PointPosition::Straight => Some(Self::Closed),
            PointPosition::Diverging => Some(Self::Thrown),
            PointPosition::Undefined => None,
        }
    }

    /// Wire state for a signal aspect.
    pub const fn from_signal(state: SignalState) -> Self {
        match state {
            SignalState::Go => Self::Closed,
            SignalState::Stop => Self::Thrown,
        }
    }
}

/// Kind of frame, kept for logging and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// Moves a point, signal or turntable.
    Set,
    /// Engages a point lock.
    Lock,
    /// Releases a point lock.
    Unlock,
}

/// One checksummed switch request.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    bytes: [u8; FRAME_LEN],
    kind: FrameKind,
}

impl Frame {
    /// Builds a set frame for a 1-based accessory address.
    pub fn switch_request(address: u16, position: WirePosition) -> Result<Self, ProtocolError> {
        Self::build(address, position, FrameKind::Set)
    }

    fn build(address: u16, position: WirePosition, kind: FrameKind) -> Result<Self, ProtocolError> {
        if address == 0 || address > MAX_ACCESSORY_ADDRESS {
            return Err(ProtocolError::AddressOutOfRange(i64::from(address)));
        }
        let wire = address - 1;
        let low = (wire & 0x7F) as u8;
        let mut high = ((wire >> 7) & 0x0F) as u8 | OUTPUT_ON;
        if position == WirePosition::Closed {
            high |= DIR_CLOSED;
        }
        let head = [OPC_SW_REQ, low, high];
        Ok(Self {
            bytes: [head[0], head[1], head[2], checksum(&head)],
            kind,
        })
    }

    fn from_signed(address: i32, position: WirePosition, kind: FrameKind) -> Result<Self, ProtocolError> {
        let magnitude = u16::try_from(address.unsigned_abs())
            .map_err(|_| ProtocolError::AddressOutOfRange(i64::from(address)))?;
        Self::build(magnitude, position, kind)
            .map_err(|_| ProtocolError::AddressOutOfRange(i64::from(address)))
    }

    /// Raw bytes including the checksum.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// What this frame does.
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Decoded 1-based accessory address.
    pub fn address(&self) -> u16 {
        let wire = u16::from(self.bytes[1] & 0x7F) | (u16::from(self.bytes[2] & 0x0F) << 7);
        wire + 1
    }

    /// Decoded direction.
    pub fn position(&self) -> WirePosition {
        if self.bytes[2] & DIR_CLOSED != 0 {
            WirePosition::Closed
        } else {
            WirePosition::Thrown
        }
    }

    /// True if the XOR over all bytes is `0xFF`.
    pub fn checksum_ok(&self) -> bool {
        self.bytes.iter().fold(0u8, |acc, b| acc ^ b) == 0xFF
    }

    /// Parses a frame read back from the bus.
    ///
    /// Lock and unlock frames look like set frames on the wire, so the kind
    /// is always [`FrameKind::Set`].
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; FRAME_LEN] = bytes.try_into().ok()?;
        (bytes[0] == OPC_SW_REQ && verify(&bytes)).then_some(Self {
            bytes,
            kind: FrameKind::Set,
        })
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}({} {:?}) [{:02X} {:02X} {:02X} {:02X}]",
            self.kind,
            self.address(),
            self.position(),
            self.bytes[0],
            self.bytes[1],
            self.bytes[2],
            self.bytes[3]
        )
    }
}

/// One's complement of the XOR over `bytes`.
pub fn checksum(bytes: &[u8]) -> u8 {
    !bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Checks a received frame of any length.
pub fn verify(frame: &[u8]) -> bool {
    !frame.is_empty() && frame.iter().fold(0u8, |acc, b| acc ^ b) == 0xFF
}

// ============================================================================
// Encoding domain commands
// ============================================================================

/// Set frames for a point: one per address, none if undefined.
///
/// Negative addresses are reverse-wired and receive the opposite position.
pub fn point_set_frames(point: &PointCommand) -> Result<Vec<Frame>, ProtocolError> {
    if point.is_undefined() {
        return Ok(Vec::new());
    }
    point
        .addresses()
        .iter()
        .map(|&address| {
            let effective = point.position().for_address(address);
            let wire = WirePosition::from_point(effective).unwrap_or(WirePosition::Closed);
            Frame::from_signed(address, wire, FrameKind::Set)
        })
        .collect()
}

/// Lock frames for a point: every lock address closed.
pub fn point_lock_frames(point: &PointCommand) -> Result<Vec<Frame>, ProtocolError> {
    point
        .lock_addresses()
        .into_iter()
        .map(|address| Frame::from_signed(address, WirePosition::Closed, FrameKind::Lock))
        .collect()
}

/// Unlock frames for a point: every lock address thrown.
pub fn point_unlock_frames(point: &PointCommand) -> Result<Vec<Frame>, ProtocolError> {
    point
        .lock_addresses()
        .into_iter()
        .map(|address| Frame::from_signed(address, WirePosition::Thrown, FrameKind::Unlock))
        .collect()
}

/// The frame for a signal, if it is wired to the bus.
pub fn signal_frame(signal: &SignalCommand) -> Result<Option<Frame>, ProtocolError> {
    if !signal.has_address() {
        return Ok(None);
    }
    Frame::switch_request(signal.address, WirePosition::from_signal(signal.state)).map(Some)
}

/// The frame turning the turntable to `track`.
pub fn turntable_frame(
    command: &TurntableCommand,
    track: &TurntableTrack,
) -> Result<Frame, ProtocolError> {
    let wire = WirePosition::from_point(command.direction).unwrap_or(WirePosition::Closed);
    Frame::switch_request(track.address, wire)
}

// ============================================================================
// Frame sequences
// ============================================================================

/// Ordered frames for one command.
///
/// Frames of one command must reach the bus in order; the dispatcher sends a
/// sequence strictly front to back.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameSequence {
    frames: Vec<Frame>,
}

impl FrameSequence {
    /// Creates an empty sequence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends frames.
    pub fn extend(&mut self, frames: impl IntoIterator<Item = Frame>) {
        self.frames.extend(frames);
    }

    /// The frames in send order.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True if nothing would be sent.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
