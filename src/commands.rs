//! Command types for the yard dispatcher.
//!
//! Points, train routes, signals, turntable moves and the two-character
//! control commands, together with the outcomes reported back to observers.
//!
//! Commands pass three stages before reaching the bus:
//!
//! 1. The [`CommandInterpreter`] turns keystrokes into a [`Command`]
//! 2. The [`Topology`] fills in accessory addresses and, for a typed signal
//!    chain, the route's points
//! 3. The dispatcher checks validity and conflicts, encodes frames and sends them
//!
//! [`CommandInterpreter`]: crate::CommandInterpreter
//! [`Topology`]: crate::Topology

use core::fmt;

use crate::error::ValidationError;

/// Smallest lock address offset that is accepted; anything below means "no lock".
pub const MIN_LOCK_ADDRESS_OFFSET: u32 = 100;

// ============================================================================
// Point Position
// ============================================================================

/// Logical position of a point (switch).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PointPosition {
    /// No position requested.
    #[default]
    Undefined,
    /// Straight through (closed).
    Straight,
    /// Diverging route (thrown).
    Diverging,
}

impl PointPosition {
    /// Swaps `Straight` and `Diverging`; `Undefined` stays undefined.
    ///
    /// ```
    /// use yard_dispatch::PointPosition;
    ///
    /// assert_eq!(PointPosition::Straight.opposite(), PointPosition::Diverging);
    /// assert_eq!(PointPosition::Undefined.opposite(), PointPosition::Undefined);
    /// ```
    pub const fn opposite(self) -> Self {
        match self {
            Self::Straight => Self::Diverging,
            Self::Diverging => Self::Straight,
            Self::Undefined => Self::Undefined,
        }
    }

    /// The position an actuator at `address` has to take.
    ///
    /// A negative address marks a reverse-wired actuator, so it receives the
    /// opposite of the logical position.
    pub const fn for_address(self, address: i32) -> Self {
        if address < 0 {
            self.opposite()
        } else {
            self
        }
    }

    /// Position selected by a terminator or sign character (`+` / `-`).
    pub const fn from_sign(sign: char) -> Self {
        match sign {
            '+' => Self::Straight,
            '-' => Self::Diverging,
            _ => Self::Undefined,
        }
    }
}

// ============================================================================
// Point Command
// ============================================================================

/// Command to move one logical point.
///
/// Built in two phases: the interpreter (or any other caller) creates the
/// command from number and position, then the [`Topology`](crate::Topology)
/// attaches the accessory addresses. After that the value is never changed;
/// all fields are read through accessors.
///
/// Equality compares number, position and the address sequence. For lookup
/// by point identity use [`key`](Self::key).
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PointCommand {
    number: u32,
    sub_point: Option<char>,
    position: PointPosition,
    lock_address_offset: Option<u32>,
    is_on_route: bool,
    addresses: Vec<i32>,
}

impl PointCommand {
    /// Creates an on-route point command without addresses.
    pub fn new(number: u32, position: PointPosition) -> Self {
        Self {
            number,
            sub_point: None,
            position,
            lock_address_offset: None,
            is_on_route: true,
            addresses: Vec::new(),
        }
    }

    /// Creates an off-route (flank protection) point command.
    pub fn off_route(number: u32, position: PointPosition) -> Self {
        Self {
            is_on_route: false,
            ..Self::new(number, position)
        }
    }

    /// Selects a specific sub-point; the letter is stored lowercase.
    pub fn with_sub_point(mut self, sub_point: char) -> Self {
        self.sub_point = Some(sub_point.to_ascii_lowercase());
        self
    }

    /// Configures the lock address offset.
    ///
    /// Offsets below [`MIN_LOCK_ADDRESS_OFFSET`] mean the point has no lock.
    pub fn with_lock_address_offset(mut self, offset: u32) -> Self {
        self.lock_address_offset = (offset >= MIN_LOCK_ADDRESS_OFFSET).then_some(offset);
        self
    }

    /// Merges addresses into the command, keeping first-seen order and
    /// discarding duplicates.
    pub fn with_addresses(mut self, addresses: impl IntoIterator<Item = i32>) -> Self {
        for address in addresses {
            if !self.addresses.contains(&address) {
                self.addresses.push(address);
            }
        }
        self
    }

    /// Logical point number.
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Identity used for sets and lookups (the point number).
    pub fn key(&self) -> PointKey {
        PointKey(self.number)
    }

    /// Sub-point letter, if one was given.
    pub fn sub_point(&self) -> Option<char> {
        self.sub_point
    }

    /// Requested logical position.
    pub fn position(&self) -> PointPosition {
        self.position
    }

    /// False for flank protection points that are not on the route itself.
    pub fn is_on_route(&self) -> bool {
        self.is_on_route
    }

    /// Configured lock address offset, if any.
    pub fn lock_address_offset(&self) -> Option<u32> {
        self.lock_address_offset
    }

    /// Resolved accessory addresses in insertion order.
    pub fn addresses(&self) -> &[i32] {
        &self.addresses
    }

    /// Addresses of the lock actuators: each address magnitude plus the offset.
    ///
    /// Empty when no offset is configured.
    pub fn lock_addresses(&self) -> Vec<i32> {
        match self.lock_address_offset {
            Some(offset) => self
                .addresses
                .iter()
                .map(|address| address.unsigned_abs().saturating_add(offset))
                .map(|address| i32::try_from(address).unwrap_or(i32::MAX))
                .collect(),
            None => Vec::new(),
        }
    }

    /// True if lock frames are issued after setting the point.
    pub fn also_lock(&self) -> bool {
        self.lock_address_offset.is_some()
    }

    /// True if unlock frames are issued when releasing the point.
    pub fn also_unlock(&self) -> bool {
        self.lock_address_offset.is_some()
    }

    /// True if no position was requested.
    pub fn is_undefined(&self) -> bool {
        self.position == PointPosition::Undefined
    }
}

impl PartialEq for PointCommand {
    fn eq(&self, other: &Self) -> bool {
        self.number == other.number
            && self.position == other.position
            && self.addresses == other.addresses
    }
}

impl Eq for PointCommand {}

impl fmt::Display for PointCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_on_route {
            f.write_str("x")?;
        }
        write!(f, "{}", self.number)?;
        if let Some(sub_point) = self.sub_point {
            write!(f, "{sub_point}")?;
        }
        match self.position {
            PointPosition::Straight => f.write_str("+"),
            PointPosition::Diverging => f.write_str("-"),
            PointPosition::Undefined => f.write_str("?"),
        }
    }
}

/// Point identity: the point number, ignoring position and addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PointKey(pub u32);

// ============================================================================
// Train Routes
// ============================================================================

/// State requested for a train route.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TrainRouteState {
    /// Nothing requested.
    #[default]
    Undefined,
    /// Route is known but not set.
    Unset,
    /// Set as a main (train) route.
    SetMain,
    /// Set as a shunting route.
    SetShunting,
    /// Release after the train has passed.
    Clear,
    /// Revoke before the train has passed.
    Cancel,
}

impl TrainRouteState {
    /// `SetMain` or `SetShunting`.
    pub const fn is_set(self) -> bool {
        matches!(self, Self::SetMain | Self::SetShunting)
    }

    /// `Clear`.
    pub const fn is_clear(self) -> bool {
        matches!(self, Self::Clear)
    }

    /// `Cancel`.
    pub const fn is_cancel(self) -> bool {
        matches!(self, Self::Cancel)
    }

    /// `Clear` or `Cancel`.
    pub const fn is_teardown(self) -> bool {
        matches!(self, Self::Clear | Self::Cancel)
    }

    /// State selected by a route terminator (`#`, `*`, `/`).
    pub const fn from_terminator(terminator: char) -> Self {
        match terminator {
            '#' => Self::SetMain,
            '*' => Self::SetShunting,
            '/' => Self::Clear,
            _ => Self::Undefined,
        }
    }
}

/// Command to set or release a train route between two signals.
///
/// A `from_signal` of 0 means "any" and is only meaningful for teardown.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrainRouteCommand {
    /// Start signal (0 = unspecified).
    pub from_signal: u32,
    /// Destination signal (must be nonzero).
    pub to_signal: u32,
    /// Requested state.
    pub state: TrainRouteState,
    /// Points to set, on-route and flank protection.
    pub point_commands: Vec<PointCommand>,
    /// Interior signals of a composite route, in travel order.
    pub intermediate_signals: Vec<u32>,
}

impl TrainRouteCommand {
    /// Creates a route without points.
    pub fn new(from_signal: u32, to_signal: u32, state: TrainRouteState) -> Self {
        Self {
            from_signal,
            to_signal,
            state,
            point_commands: Vec::new(),
            intermediate_signals: Vec::new(),
        }
    }

    /// Adds a point command.
    pub fn with_point(mut self, point: PointCommand) -> Self {
        self.point_commands.push(point);
        self
    }

    /// Adds several point commands.
    pub fn with_points(mut self, points: impl IntoIterator<Item = PointCommand>) -> Self {
        self.point_commands.extend(points);
        self
    }

    /// Sets the interior signals of a composite route.
    pub fn with_intermediate_signals(mut self, signals: impl IntoIterator<Item = u32>) -> Self {
        self.intermediate_signals = signals.into_iter().collect();
        self
    }

    /// Points the train actually runs over.
    pub fn on_route_points(&self) -> impl Iterator<Item = &PointCommand> {
        self.point_commands.iter().filter(|p| p.is_on_route())
    }

    /// True if the command cannot be acted upon.
    ///
    /// That is the case when a set route has no start signal, when the
    /// destination is missing, or when a set route has no defined point.
    pub fn is_undefined(&self) -> bool {
        let set = self.state.is_set();
        (set && self.from_signal == 0)
            || self.to_signal == 0
            || (set && self.point_commands.iter().all(PointCommand::is_undefined))
    }

    /// True if both routes share a point number with differing positions.
    ///
    /// Addresses and the on/off-route flag do not matter. The relation is
    /// symmetric.
    pub fn is_in_conflict_with(&self, other: &TrainRouteCommand) -> bool {
        self.conflicting_point(other).is_some()
    }

    /// The first own point that `other` wants in a different position.
    pub fn conflicting_point(&self, other: &TrainRouteCommand) -> Option<&PointCommand> {
        self.point_commands.iter().find(|own| {
            other
                .point_commands
                .iter()
                .any(|theirs| theirs.number() == own.number() && theirs.position() != own.position())
        })
    }

    /// True if `self` and `other` describe the same route (same end signals).
    pub fn same_route(&self, other: &TrainRouteCommand) -> bool {
        self.from_signal == other.from_signal && self.to_signal == other.to_signal
    }

    /// True if this teardown request addresses `active`.
    ///
    /// The destination must match; a start signal of 0 matches any start.
    pub fn matches_active(&self, active: &TrainRouteCommand) -> bool {
        self.to_signal == active.to_signal
            && (self.from_signal == 0 || self.from_signal == active.from_signal)
    }

    /// The full signal chain: start, interior signals, destination.
    pub fn signal_chain(&self) -> Vec<u32> {
        let mut chain = Vec::with_capacity(self.intermediate_signals.len() + 2);
        chain.push(self.from_signal);
        chain.extend_from_slice(&self.intermediate_signals);
        chain.push(self.to_signal);
        chain
    }
}

impl fmt::Display for TrainRouteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.from_signal)?;
        for signal in &self.intermediate_signals {
            write!(f, ".{signal}")?;
        }
        write!(f, ".{} ({:?})", self.to_signal, self.state)
    }
}

// ============================================================================
// Signals
// ============================================================================

/// Aspect shown by a signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SignalState {
    /// Danger.
    #[default]
    Stop,
    /// Proceed.
    Go,
}

/// Command to change a signal aspect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SignalCommand {
    /// Signal number.
    pub signal_number: u32,
    /// Accessory address (0 = not wired to the bus).
    pub address: u16,
    /// Requested aspect.
    pub state: SignalState,
    /// Address reporting the actual aspect, if the signal has one.
    pub feedback_address: Option<u16>,
}

impl SignalCommand {
    /// Creates a signal command.
    pub fn new(signal_number: u32, address: u16, state: SignalState) -> Self {
        Self {
            signal_number,
            address,
            state,
            feedback_address: None,
        }
    }

    /// True if the signal is driven over the bus.
    pub fn has_address(&self) -> bool {
        self.address > 0
    }
}

// ============================================================================
// Turntable
// ============================================================================

/// Command to turn the turntable to a track.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TurntableCommand {
    /// Destination track selector.
    pub track: u32,
    /// Turning direction.
    pub direction: PointPosition,
}

impl TurntableCommand {
    /// Parses turntable text such as `"+12#"`, `"-3#"` or `"7#"`.
    ///
    /// A missing sign or `+` turns `Straight`, `-` turns `Diverging`. The
    /// trailing `#` is optional. Returns `None` if no track digits remain.
    ///
    /// ```
    /// use yard_dispatch::{PointPosition, TurntableCommand};
    ///
    /// let cmd = TurntableCommand::from_text("-12#").unwrap();
    /// assert_eq!(cmd.track, 12);
    /// assert_eq!(cmd.direction, PointPosition::Diverging);
    /// ```
    pub fn from_text(text: &str) -> Option<Self> {
        let body = text.strip_suffix('#').unwrap_or(text);
        let (direction, digits) = match body.chars().next()? {
            sign @ ('+' | '-') => (PointPosition::from_sign(sign), &body[1..]),
            _ => (PointPosition::Straight, body),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self {
            track: digits.parse().unwrap_or(0),
            direction,
        })
    }
}

// ============================================================================
// Control Commands and the closed Command set
// ============================================================================

/// Two-character control commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ControlCommand {
    /// `+-`: reload topology and configuration.
    ReloadConfiguration,
    /// `//`: release every active train route.
    ClearAllTrainRoutes,
    /// `**`: set every signal to stop.
    StopAllSignals,
}

/// A completed console entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Move a single point.
    Point(PointCommand),
    /// Set or release a train route.
    TrainRoute(TrainRouteCommand),
    /// Turn the turntable.
    Turntable(TurntableCommand),
    /// Global control command.
    Control(ControlCommand),
}

// ============================================================================
// Outcomes
// ============================================================================

/// Result of a point command, as broadcast to observers.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PointOutcome {
    /// Frames were sent.
    Set,
    /// Command not executed.
    Rejected {
        /// Why the command was rejected.
        reason: RejectReason,
    },
    /// The point is held by an active route.
    Locked,
    /// The point already was in the requested position; nothing was sent.
    AlreadyInPosition,
}

/// Result of a train route command, as broadcast to observers.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RouteOutcome {
    /// Route set and registered as active.
    Set,
    /// Command not executed.
    Rejected {
        /// Why the command was rejected.
        reason: RejectReason,
    },
    /// Route released.
    Cleared,
    /// Every active route released.
    AllCleared,
}

/// Result of a turntable command, as broadcast to observers.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TurntableOutcome {
    /// The frame was sent.
    Turned,
    /// Command not executed.
    Rejected {
        /// Why the command was rejected.
        reason: RejectReason,
    },
}

/// Reason a command was rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RejectReason {
    /// The command is structurally undefined.
    Undefined,
    /// No point with this number in the topology.
    UnknownPoint(u32),
    /// No turntable track with this number.
    UnknownTurntableTrack(u32),
    /// No route is defined between two adjacent signals of the request.
    UnknownRoute {
        /// Start of the missing leg.
        from_signal: u32,
        /// End of the missing leg.
        to_signal: u32,
    },
    /// A route between the same signals is already active.
    AlreadyActive,
    /// No active route matches the teardown request.
    NotActive,
    /// The route wants a point that an active route holds in another position.
    ConflictsWith {
        /// Start signal of the active route.
        from_signal: u32,
        /// Destination signal of the active route.
        to_signal: u32,
        /// The contested point.
        point: u32,
    },
    /// Topology validation failed.
    Invalid(ValidationError),
    /// An address cannot be expressed on the bus.
    Protocol(String),
    /// Delivery was cancelled after some frames.
    Cancelled {
        /// Frames already on the bus.
        frames_sent: usize,
    },
    /// The transport reported an error.
    TransportFailed(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("command is incomplete"),
            Self::UnknownPoint(number) => write!(f, "point {number} does not exist"),
            Self::UnknownTurntableTrack(track) => write!(f, "turntable track {track} does not exist"),
            Self::UnknownRoute {
                from_signal,
                to_signal,
            } => write!(f, "no route from {from_signal} to {to_signal}"),
            Self::AlreadyActive => f.write_str("route is already set"),
            Self::NotActive => f.write_str("no such route is set"),
            Self::ConflictsWith {
                from_signal,
                to_signal,
                point,
            } => write!(
                f,
                "point {point} is held by route {from_signal}.{to_signal}"
            ),
            Self::Invalid(err) => write!(f, "{err}"),
            Self::Protocol(msg) => f.write_str(msg),
            Self::Cancelled { frames_sent } => {
                write!(f, "cancelled after {frames_sent} frame(s)")
            }
            Self::TransportFailed(msg) => write!(f, "bus write failed: {msg}"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
