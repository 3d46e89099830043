//! Yard topology facts.
//!
//! The topology is loaded (and hot-reloaded) by an external provider; this
//! crate only reads it. It contains:
//!
//! - [`Point`] definitions with their accessory addresses and track-graph ends
//! - [`SignalDefinition`]s addressed by their textual name
//! - [`TurntableTrack`]s
//! - [`RouteDefinition`]s: the points between two adjacent signals
//! - the [`TrackGraph`] of grid nodes and links
//!
//! It also owns the second construction phase of a
//! [`PointCommand`](crate::PointCommand): [`Topology::resolve_point`], and
//! fills in the points of a route typed as a bare signal chain:
//! [`Topology::expand_route`].

use core::cmp::Ordering;
use core::fmt;
use core::str::FromStr;
use std::collections::{HashMap, HashSet};

use log::debug;

use crate::commands::{PointCommand, PointPosition, TrainRouteCommand};

// ============================================================================
// Grid Coordinates
// ============================================================================

/// Position of a node in the yard diagram.
///
/// Ordered column first, then row. Text form is `"row.column"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GridCoordinate {
    /// Row in the diagram.
    pub row: i32,
    /// Column in the diagram.
    pub column: i32,
}

impl GridCoordinate {
    /// Creates a coordinate.
    pub const fn new(row: i32, column: i32) -> Self {
        Self { row, column }
    }
}

impl Ord for GridCoordinate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.column
            .cmp(&other.column)
            .then_with(|| self.row.cmp(&other.row))
    }
}

impl PartialOrd for GridCoordinate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for GridCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.row, self.column)
    }
}

/// Error parsing a [`GridCoordinate`] from text.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid grid coordinate {0:?}, expected \"row.column\"")]
pub struct ParseCoordinateError(pub String);

impl FromStr for GridCoordinate {
    type Err = ParseCoordinateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseCoordinateError(s.to_owned());
        let (row, column) = s.trim().split_once('.').ok_or_else(err)?;
        Ok(Self {
            row: row.parse().map_err(|_| err())?,
            column: column.parse().map_err(|_| err())?,
        })
    }
}

// ============================================================================
// Topology Facts
// ============================================================================

/// Definition of one physical point (or sub-point).
///
/// The label is the number optionally followed by a sub-point letter, for
/// example `"27"` or `"27a"`.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Point {
    /// Textual label.
    pub label: String,
    /// Addresses to command for the straight position.
    pub straight_addresses: Vec<i32>,
    /// Addresses to command for the diverging position.
    pub diverging_addresses: Vec<i32>,
    /// Offset of the lock actuators (0 = no lock).
    pub lock_address_offset: u32,
    /// Graph node at the switch (toe) end.
    pub switch_end: Option<GridCoordinate>,
    /// Graph node at the diverging end.
    pub diverging_end: Option<GridCoordinate>,
}

impl Point {
    /// Creates a point with the same addresses for both positions.
    pub fn new(label: &str, addresses: &[i32]) -> Self {
        Self {
            label: label.to_owned(),
            straight_addresses: addresses.to_vec(),
            diverging_addresses: addresses.to_vec(),
            ..Self::default()
        }
    }

    /// Sets the addresses used for the diverging position.
    pub fn with_diverging_addresses(mut self, addresses: &[i32]) -> Self {
        self.diverging_addresses = addresses.to_vec();
        self
    }

    /// Sets the lock address offset.
    pub fn with_lock_address_offset(mut self, offset: u32) -> Self {
        self.lock_address_offset = offset;
        self
    }

    /// Places the point in the track graph.
    pub fn with_ends(mut self, switch_end: GridCoordinate, diverging_end: GridCoordinate) -> Self {
        self.switch_end = Some(switch_end);
        self.diverging_end = Some(diverging_end);
        self
    }

    /// Numeric prefix of the label (`"27a"` → 27), 0 if there is none.
    pub fn number(&self) -> u32 {
        label_number(&self.label)
    }

    /// Sub-point letter of the label, lowercase.
    pub fn sub_point(&self) -> Option<char> {
        label_sub_point(&self.label)
    }

    /// Addresses for a logical position.
    pub fn addresses_for(&self, position: PointPosition) -> &[i32] {
        match position {
            PointPosition::Straight => &self.straight_addresses,
            PointPosition::Diverging => &self.diverging_addresses,
            PointPosition::Undefined => &[],
        }
    }
}

/// Leading digits of a label as a number; 0 if absent or out of range.
pub(crate) fn label_number(label: &str) -> u32 {
    let end = label
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(label.len());
    label[..end].parse().unwrap_or(0)
}

fn label_sub_point(label: &str) -> Option<char> {
    label
        .trim_start_matches(|c: char| c.is_ascii_digit())
        .chars()
        .next()
        .filter(char::is_ascii_alphabetic)
        .map(|c| c.to_ascii_lowercase())
}

/// Definition of a signal.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SignalDefinition {
    /// Textual form of the signal number, e.g. `"64"`.
    pub name: String,
    /// Position in the diagram.
    pub coordinate: GridCoordinate,
    /// Accessory address (0 = not on the bus).
    pub address: u16,
    /// Feedback address, if the signal reports its aspect.
    pub feedback_address: Option<u16>,
    /// True if routes may start at this signal.
    pub is_route_start: bool,
    /// True if routes may end at this signal.
    pub is_route_end: bool,
}

impl SignalDefinition {
    /// Creates a signal that may start and end routes.
    pub fn new(name: &str, coordinate: GridCoordinate, address: u16) -> Self {
        Self {
            name: name.to_owned(),
            coordinate,
            address,
            feedback_address: None,
            is_route_start: true,
            is_route_end: true,
        }
    }

    /// Signal number parsed from the name, 0 if not numeric.
    pub fn number(&self) -> u32 {
        label_number(&self.name)
    }
}

/// One track position of the turntable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TurntableTrack {
    /// Track selector typed at the console.
    pub number: u32,
    /// Accessory address selecting this track.
    pub address: u16,
}

// ============================================================================
// Train Routes
// ============================================================================

/// A point a route definition needs in a given position.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoutePoint {
    /// Point label, `"27"` for every sub-point or `"27a"` for one.
    pub label: String,
    /// Required position.
    pub position: PointPosition,
    /// Flank protection: held in position but not on the path.
    #[cfg_attr(feature = "serde", serde(default))]
    pub off_route: bool,
}

impl RoutePoint {
    /// The unresolved command for this point.
    pub fn command(&self) -> PointCommand {
        let number = label_number(&self.label);
        let command = if self.off_route {
            PointCommand::off_route(number, self.position)
        } else {
            PointCommand::new(number, self.position)
        };
        match label_sub_point(&self.label) {
            Some(letter) => command.with_sub_point(letter),
            None => command,
        }
    }
}

/// The points of the route between two adjacent signals.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RouteDefinition {
    /// Start signal.
    pub from_signal: u32,
    /// Destination signal.
    pub to_signal: u32,
    /// Points in setting order.
    pub points: Vec<RoutePoint>,
}

impl RouteDefinition {
    /// An empty definition between two signals.
    pub fn new(from_signal: u32, to_signal: u32) -> Self {
        Self {
            from_signal,
            to_signal,
            points: Vec::new(),
        }
    }

    /// Adds an on-route point.
    pub fn with_point(mut self, label: &str, position: PointPosition) -> Self {
        self.points.push(RoutePoint {
            label: label.to_owned(),
            position,
            off_route: false,
        });
        self
    }

    /// Adds a flank-protection point.
    pub fn with_flank_point(mut self, label: &str, position: PointPosition) -> Self {
        self.points.push(RoutePoint {
            label: label.to_owned(),
            position,
            off_route: true,
        });
        self
    }
}

// ============================================================================
// Track Graph
// ============================================================================

/// A node of the track graph.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackNode {
    /// Where the node sits.
    pub coordinate: GridCoordinate,
}

/// An undirected link between two nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackLink {
    /// Smaller end (by coordinate ordering).
    pub a: GridCoordinate,
    /// Larger end.
    pub b: GridCoordinate,
}

impl TrackLink {
    /// Creates a link with normalised end order.
    pub fn new(a: GridCoordinate, b: GridCoordinate) -> Self {
        if a <= b {
            Self { a, b }
        } else {
            Self { a: b, b: a }
        }
    }
}

/// Nodes and links of the yard diagram.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "GraphData", into = "GraphData"))]
pub struct TrackGraph {
    nodes: HashMap<GridCoordinate, TrackNode>,
    links: HashSet<TrackLink>,
}

impl TrackGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node.
    pub fn add_node(&mut self, coordinate: GridCoordinate) {
        self.nodes.insert(coordinate, TrackNode { coordinate });
    }

    /// Adds a link, creating missing end nodes.
    pub fn add_link(&mut self, a: GridCoordinate, b: GridCoordinate) {
        self.add_node(a);
        self.add_node(b);
        self.links.insert(TrackLink::new(a, b));
    }

    /// Builder form of [`add_link`](Self::add_link).
    pub fn with_link(mut self, a: GridCoordinate, b: GridCoordinate) -> Self {
        self.add_link(a, b);
        self
    }

    /// Node at a coordinate.
    pub fn node(&self, at: GridCoordinate) -> Option<&TrackNode> {
        self.nodes.get(&at)
    }

    /// Direct link between two coordinates, in either direction.
    pub fn link(&self, a: GridCoordinate, b: GridCoordinate) -> Option<&TrackLink> {
        self.links.get(&TrackLink::new(a, b))
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Serialized form of a [`TrackGraph`]: plain lists.
#[cfg(feature = "serde")]
#[derive(serde::Serialize, serde::Deserialize, Default)]
#[serde(default)]
struct GraphData {
    nodes: Vec<GridCoordinate>,
    links: Vec<(GridCoordinate, GridCoordinate)>,
}

#[cfg(feature = "serde")]
impl From<GraphData> for TrackGraph {
    fn from(data: GraphData) -> Self {
        let mut graph = TrackGraph::new();
        for node in data.nodes {
            graph.add_node(node);
        }
        for (a, b) in data.links {
            graph.add_link(a, b);
        }
        graph
    }
}

#[cfg(feature = "serde")]
impl From<TrackGraph> for GraphData {
    fn from(graph: TrackGraph) -> Self {
        let mut nodes: Vec<_> = graph.nodes.into_keys().collect();
        nodes.sort();
        let mut links: Vec<_> = graph.links.into_iter().map(|l| (l.a, l.b)).collect();
        links.sort();
        Self { nodes, links }
    }
}

// ============================================================================
// Topology
// ============================================================================

/// Everything the core reads about the yard.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Topology {
    /// Point definitions; sub-points share a number.
    pub points: Vec<Point>,
    /// Signal definitions in registration order.
    pub signals: Vec<SignalDefinition>,
    /// Turntable track positions.
    pub turntable_tracks: Vec<TurntableTrack>,
    /// Train routes between adjacent signals.
    pub routes: Vec<RouteDefinition>,
    /// Track graph.
    pub graph: TrackGraph,
}

impl Topology {
    /// Creates an empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a point definition.
    pub fn with_point(mut self, point: Point) -> Self {
        self.points.push(point);
        self
    }

    /// Adds a signal definition.
    pub fn with_signal(mut self, signal: SignalDefinition) -> Self {
        self.signals.push(signal);
        self
    }

    /// Adds a turntable track.
    pub fn with_turntable_track(mut self, number: u32, address: u16) -> Self {
        self.turntable_tracks.push(TurntableTrack { number, address });
        self
    }

    /// Adds a train route definition.
    pub fn with_route(mut self, route: RouteDefinition) -> Self {
        self.routes.push(route);
        self
    }

    /// Replaces the track graph.
    pub fn with_graph(mut self, graph: TrackGraph) -> Self {
        self.graph = graph;
        self
    }

    /// Parses a topology from JSON.
    #[cfg(feature = "json")]
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// All definitions for a point number (sub-points included).
    pub fn points_numbered(&self, number: u32) -> impl Iterator<Item = &Point> {
        self.points.iter().filter(move |p| p.number() == number)
    }

    /// First signal definition with the given name.
    pub fn signal(&self, name: &str) -> Option<&SignalDefinition> {
        self.signals.iter().find(|s| s.name == name)
    }

    /// Turntable track by selector.
    pub fn turntable_track(&self, number: u32) -> Option<&TurntableTrack> {
        self.turntable_tracks.iter().find(|t| t.number == number)
    }

    /// Route definition between two adjacent signals.
    pub fn route(&self, from_signal: u32, to_signal: u32) -> Option<&RouteDefinition> {
        self.routes
            .iter()
            .find(|r| r.from_signal == from_signal && r.to_signal == to_signal)
    }

    /// Fills in the points of a route given only as a signal chain.
    ///
    /// Each leg between consecutive signals (start, interior signals,
    /// destination) must be defined; the legs' points are joined in order,
    /// repeats dropped. Fails with the first leg that has no definition.
    pub fn expand_route(&self, route: &TrainRouteCommand) -> Result<TrainRouteCommand, (u32, u32)> {
        let mut points: Vec<PointCommand> = Vec::new();
        for leg in route.signal_chain().windows(2) {
            let definition = self.route(leg[0], leg[1]).ok_or((leg[0], leg[1]))?;
            for point in definition.points.iter().map(RoutePoint::command) {
                let repeated = points.iter().any(|p| {
                    p == &point
                        && p.sub_point() == point.sub_point()
                        && p.is_on_route() == point.is_on_route()
                });
                if !repeated {
                    points.push(point);
                }
            }
        }
        debug!("route {route} expanded to {} point(s)", points.len());
        let mut expanded = route.clone();
        expanded.point_commands = points;
        Ok(expanded)
    }

    /// Sub-points a command covers: its own, or every defined sub-point of
    /// the number when it names none.
    pub fn sub_points(&self, command: &PointCommand) -> Vec<Option<char>> {
        if command.sub_point().is_some() {
            return vec![command.sub_point()];
        }
        let mut found: Vec<Option<char>> = Vec::new();
        for point in self.points_numbered(command.number()) {
            if !found.contains(&point.sub_point()) {
                found.push(point.sub_point());
            }
        }
        found
    }

    /// Attaches addresses and lock offset to a point command.
    ///
    /// Addresses come from every definition with the command's number, or only
    /// from the matching sub-point if the command names one. Returns `None` if
    /// nothing matches.
    pub fn resolve_point(&self, command: PointCommand) -> Option<PointCommand> {
        let wanted = command.sub_point();
        let mut matching = self
            .points_numbered(command.number())
            .filter(|p| wanted.is_none() || p.sub_point() == wanted)
            .peekable();
        matching.peek()?;

        let mut resolved = command;
        for point in matching {
            if point.lock_address_offset > 0 && resolved.lock_address_offset().is_none() {
                resolved = resolved.with_lock_address_offset(point.lock_address_offset);
            }
            let addresses = point.addresses_for(resolved.position()).to_vec();
            resolved = resolved.with_addresses(addresses);
        }
        debug!(
            "resolved point {} to addresses {:?}",
            resolved,
            resolved.addresses()
        );
        Some(resolved)
    }
}
