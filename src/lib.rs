//! # yard-dispatch
//!
//! Dispatcher console core for a model-railway yard: single keystrokes in,
//! paced and checksummed accessory-bus frames out.
//!
//! ## Features
//!
//! - **Keystroke grammar**: points, train routes, turntable and control
//!   commands typed one key at a time
//! - **Route checks**: signal chains expanded from the topology's route
//!   definitions, then checked for conflicts and validity before anything
//!   is sent
//! - **Point locks**: lock actuators engaged after a route is set and
//!   released when it is cleared
//! - **Paced delivery**: frames sent in order with a configurable delay,
//!   cancellable between and during writes
//! - **Notifications**: every result broadcast to subscribed observers
//!
//! ## Architecture
//!
//! - `commands` - Domain model and outcome types
//! - `topology` - Yard facts and point address resolution
//! - `interpreter` - Keystroke-to-command state machine
//! - `validator` / `conflict` - Route checks
//! - `protocol` - LocoNet switch request frames
//! - `dispatcher` - Async execution over an [`AccessoryTransport`](traits::AccessoryTransport)
//! - `console` - Key source to dispatcher glue
//! - `hal` - Mock implementations for testing
//!
//! ## Example
//!
//! ```rust
//! use yard_dispatch::{Command, CommandInterpreter, TrainRouteState};
//!
//! let commands = CommandInterpreter::new().push_str("x27+64.72#");
//!
//! let Command::TrainRoute(route) = &commands[1] else { panic!() };
//! assert_eq!((route.from_signal, route.to_signal), (64, 72));
//! assert_eq!(route.state, TrainRouteState::SetMain);
//! ```

#![warn(missing_docs)]

/// Domain model: points, routes, signals, turntable and outcomes.
pub mod commands;
/// Console, dispatch and station configuration.
pub mod config;
/// Active route registry and conflict detection.
pub mod conflict;
/// Error types.
pub mod error;
/// Test doubles for the external seams.
pub mod hal;
/// Keystroke-to-command state machine.
pub mod interpreter;
/// LocoNet accessory frames.
pub mod protocol;
/// Yard topology and point address resolution.
pub mod topology;
/// Traits for the external seams.
pub mod traits;
/// Topology-aware route validation.
pub mod validator;

/// Keyboard console tying key input to the dispatcher.
#[cfg(feature = "dispatch")]
pub mod console;
/// Async command execution over the accessory bus.
#[cfg(feature = "dispatch")]
pub mod dispatcher;
/// Outbound result messages.
#[cfg(feature = "dispatch")]
pub mod notify;

// Re-exports for convenience
pub use commands::{
    Command, ControlCommand, PointCommand, PointKey, PointOutcome, PointPosition, RejectReason,
    RouteOutcome, SignalCommand, SignalState, TrainRouteCommand, TrainRouteState,
    TurntableCommand, TurntableOutcome,
};
pub use config::{Config, ConsoleConfig, DispatchConfig, StationConfig};
pub use conflict::{ActiveRoutes, RouteConflict};
pub use error::{DispatchError, ProtocolError, ValidationError};
pub use interpreter::CommandInterpreter;
pub use protocol::{Frame, FrameSequence, WirePosition};
pub use topology::{
    GridCoordinate, Point, RouteDefinition, RoutePoint, SignalDefinition, Topology, TrackGraph,
    TrackLink, TrackNode, TurntableTrack,
};
pub use validator::{IndexDiagnostics, RouteValidator, ValidationReport};

#[cfg(feature = "dispatch")]
pub use console::ConsoleInputHandler;
#[cfg(feature = "dispatch")]
pub use dispatcher::{DispatchOutcome, Dispatcher};
#[cfg(feature = "dispatch")]
pub use notify::{Notification, Notifier};
