//! Trait definitions for the external seams of the dispatcher.
//!
//! Everything outside the core (the bus, the keyboard) is reached through
//! the traits here, so the whole command path can be tested on desktop with
//! the doubles from [`crate::hal::mock`].
//!
//! # Submodules
//!
//! - `transport`: [`AccessoryTransport`] and the cancel signal (requires the
//!   `dispatch` feature)
//! - `input`: [`KeySource`] and [`KeyEvent`]

pub mod input;
#[cfg(feature = "dispatch")]
pub mod transport;

pub use input::*;
#[cfg(feature = "dispatch")]
pub use transport::*;
