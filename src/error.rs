//! Error types.
//!
//! Parse misses never produce errors (the interpreter simply yields no
//! command). The types here cover the three failure families that do:
//!
//! - [`ValidationError`]: a route does not fit the topology
//! - [`ProtocolError`]: a command cannot be expressed as bus frames
//! - [`DispatchError`]: delivery failed or was cancelled

use thiserror::Error;

/// Why a train route failed topology validation.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ValidationError {
    /// The signal name is not in the topology.
    #[error("signal {0} does not exist")]
    UnknownSignal(u32),
    /// The point number is not in the topology.
    #[error("point {0} does not exist")]
    UnknownPoint(u32),
    /// No definition of the point links its switch end to its diverging end.
    #[error("point {0} is not connected in the track graph")]
    NotConnected(u32),
}

/// A command that cannot be encoded for the accessory bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Accessory addresses are 1-based and limited to the bus range.
    #[error("accessory address {0} is outside 1..=2048")]
    AddressOutOfRange(i64),
}

/// Terminal outcome of a failed dispatch.
///
/// Frames already on the bus are not retracted; `Cancelled` and
/// `Transport` report how far delivery got.
#[derive(Debug, Error)]
pub enum DispatchError<E>
where
    E: std::error::Error + 'static,
{
    /// The cancel signal fired during pacing or a write.
    #[error("dispatch cancelled after {frames_sent} frame(s)")]
    Cancelled {
        /// Frames written before cancellation.
        frames_sent: usize,
    },
    /// The transport failed; the error is passed through untouched.
    #[error("transport write failed after {frames_sent} frame(s)")]
    Transport {
        /// Frames written before the failure.
        frames_sent: usize,
        /// Error reported by the transport.
        #[source]
        source: E,
    },
    /// The command could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl<E: std::error::Error + 'static> DispatchError<E> {
    /// Number of frames that reached the transport before the failure.
    pub fn frames_sent(&self) -> usize {
        match self {
            Self::Cancelled { frames_sent } | Self::Transport { frames_sent, .. } => *frames_sent,
            Self::Protocol(_) => 0,
        }
    }

    /// True if the dispatch was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
