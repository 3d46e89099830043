//! Console and dispatcher configuration.
//!
//! Every section has sensible defaults and `with_*` builders:
//!
//! ```rust
//! use yard_dispatch::config::{Config, ConsoleConfig, DispatchConfig};
//!
//! let config = Config::default()
//!     .with_console(ConsoleConfig::default().with_divider(','))
//!     .with_dispatch(DispatchConfig::default().with_frame_delay_ms(50));
//!
//! assert_eq!(config.console.divider, ',');
//! assert_eq!(config.dispatch.frame_delay().as_millis(), 50);
//! ```
//!
//! With the `serde` feature every section deserialises with missing fields
//! taken from the defaults.

use core::time::Duration;

use heapless::String as HString;

/// Maximum length for names.
pub const MAX_SHORT_STRING: usize = 64;

/// Fixed-capacity string for names.
pub type ShortString = HString<MAX_SHORT_STRING>;

/// Copies `s` into a fixed-capacity string, truncated at a char boundary.
pub fn bounded_string<const N: usize>(s: &str) -> HString<N> {
    let mut out = HString::new();
    for ch in s.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
    out
}

/// [`bounded_string`] for names.
pub fn short_string(s: &str) -> ShortString {
    bounded_string(s)
}

// ============================================================================
// Main Config
// ============================================================================

/// Complete application configuration
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// Keystroke grammar
    pub console: ConsoleConfig,
    /// Frame delivery
    pub dispatch: DispatchConfig,
    /// Station identity
    pub station: StationConfig,
}

impl Config {
    /// Set console configuration
    pub fn with_console(mut self, console: ConsoleConfig) -> Self {
        self.console = console;
        self
    }

    /// Set dispatch configuration
    pub fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Set station configuration
    pub fn with_station(mut self, station: StationConfig) -> Self {
        self.station = station;
        self
    }

    /// Parses a configuration from JSON.
    #[cfg(feature = "json")]
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

// ============================================================================
// Console Config
// ============================================================================

/// Keystroke grammar settings
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ConsoleConfig {
    /// Separates signal numbers in a route entry
    pub divider: char,
    /// Marks a point entry as flank protection (case-insensitive)
    pub off_route_prefix: char,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            divider: '.',
            off_route_prefix: 'x',
        }
    }
}

impl ConsoleConfig {
    /// Set the divider
    pub fn with_divider(mut self, divider: char) -> Self {
        self.divider = divider;
        self
    }

    /// Set the off-route prefix
    pub fn with_off_route_prefix(mut self, prefix: char) -> Self {
        self.off_route_prefix = prefix;
        self
    }
}

// ============================================================================
// Dispatch Config
// ============================================================================

/// Frame delivery settings
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DispatchConfig {
    /// Pause before every frame, in milliseconds
    pub frame_delay_ms: u32,
    /// Unread notifications kept per observer
    pub notification_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            frame_delay_ms: 100,
            notification_capacity: 64,
        }
    }
}

impl DispatchConfig {
    /// Set the inter-frame delay
    pub fn with_frame_delay_ms(mut self, ms: u32) -> Self {
        self.frame_delay_ms = ms;
        self
    }

    /// The inter-frame delay as a duration
    pub fn frame_delay(&self) -> Duration {
        Duration::from_millis(u64::from(self.frame_delay_ms))
    }
}

// ============================================================================
// Station Config
// ============================================================================

/// Station identity
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct StationConfig {
    /// Name shown in logs
    pub name: ShortString,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            name: short_string("yard"),
        }
    }
}

impl StationConfig {
    /// Set the station name
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = short_string(name);
        self
    }
}
