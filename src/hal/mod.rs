//! Implementations of the traits in [`crate::traits`].
//!
//! # Available Implementations
//!
//! - `mock`: test doubles for desktop development and the test suite

pub mod mock;

pub use mock::*;
