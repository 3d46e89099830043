//! Outbound result messages.
//!
//! Every dispatched command ends in exactly one [`Notification`] (a
//! `Stop all signals` ends in one per signal). Observers subscribe to a
//! [`Notifier`] and receive every message published after they subscribed.
//! Publishing never waits for observers. A slow observer that falls more than
//! the channel capacity behind loses the oldest messages.
//!
//! ```rust
//! use yard_dispatch::notify::{Notification, Notifier};
//! use yard_dispatch::PointOutcome;
//!
//! let notifier = Notifier::new(8);
//! let mut rx = notifier.subscribe();
//! notifier.publish(Notification::Point { number: 27, outcome: PointOutcome::Set });
//! assert!(matches!(rx.try_recv(), Ok(Notification::Point { number: 27, .. })));
//! ```

use core::fmt;

use log::debug;
use tokio::sync::broadcast;

use crate::commands::{PointOutcome, RouteOutcome, SignalState, TurntableOutcome};

/// One result message.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "snake_case"))]
pub enum Notification {
    /// A point command finished.
    Point {
        /// Point number.
        number: u32,
        /// What happened.
        outcome: PointOutcome,
    },
    /// A train route command finished.
    Route {
        /// Start signal (0 for "any" or "all").
        from_signal: u32,
        /// Destination signal (0 for "all").
        to_signal: u32,
        /// What happened.
        outcome: RouteOutcome,
    },
    /// A signal changed aspect.
    SignalStateChanged {
        /// Signal number.
        signal: u32,
        /// New aspect.
        state: SignalState,
        /// False if the signal has no bus address and nothing was sent.
        confirmed_by_bus: bool,
    },
    /// A turntable command finished.
    Turntable {
        /// Track selector.
        track: u32,
        /// What happened.
        outcome: TurntableOutcome,
    },
    /// The console asked for topology and configuration to be reloaded.
    ReloadRequested,
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Point { number, outcome } => match outcome {
                PointOutcome::Set => write!(f, "point {number} set"),
                PointOutcome::Rejected { reason } => write!(f, "point {number} rejected: {reason}"),
                PointOutcome::Locked => write!(f, "point {number} is locked"),
                PointOutcome::AlreadyInPosition => write!(f, "point {number} already in position"),
            },
            Self::Route {
                from_signal,
                to_signal,
                outcome,
            } => match outcome {
                RouteOutcome::Set => write!(f, "route {from_signal}.{to_signal} set"),
                RouteOutcome::Rejected { reason } => {
                    write!(f, "route {from_signal}.{to_signal} rejected: {reason}")
                }
                RouteOutcome::Cleared => write!(f, "route {from_signal}.{to_signal} cleared"),
                RouteOutcome::AllCleared => f.write_str("all routes cleared"),
            },
            Self::SignalStateChanged { signal, state, .. } => {
                write!(f, "signal {signal} shows {state:?}")
            }
            Self::Turntable { track, outcome } => match outcome {
                TurntableOutcome::Turned => write!(f, "turntable at track {track}"),
                TurntableOutcome::Rejected { reason } => {
                    write!(f, "turntable to track {track} rejected: {reason}")
                }
            },
            Self::ReloadRequested => f.write_str("reload requested"),
        }
    }
}

/// Broadcast sender for [`Notification`]s. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Notifier {
    /// Creates a channel keeping up to `capacity` unread messages per
    /// observer. A capacity of 0 is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// A receiver for every message published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// Sends a message to all observers. Having none is not an error.
    pub fn publish(&self, notification: Notification) {
        debug!("notify: {notification}");
        // Err only means nobody is listening
        let _ = self.tx.send(notification);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(64)
    }
}
