//! Topology-aware route validation.
//!
//! [`RouteValidator`] checks that the signals of a route exist and that every
//! on-route point exists and is wired into the track graph. It does **not**
//! search for a continuous path from the start to the destination signal;
//! each point is checked on its own.
//!
//! # Indices
//!
//! Two multimaps are built once per topology:
//!
//! - point number → definitions (sub-points `27a`, `27b` share key 27)
//! - signal name → definitions
//!
//! For signals the first definition wins. Further definitions under the same
//! name are kept but reported as [`IndexConflict`]s and logged.
//!
//! # Example
//!
//! ```rust
//! use yard_dispatch::{
//!     GridCoordinate, Point, PointCommand, PointPosition, RouteValidator, SignalDefinition,
//!     Topology, TrackGraph, TrainRouteCommand, TrainRouteState,
//! };
//!
//! let toe = GridCoordinate::new(1, 1);
//! let branch = GridCoordinate::new(2, 2);
//! let topology = Topology::new()
//!     .with_point(Point::new("27", &[12]).with_ends(toe, branch))
//!     .with_signal(SignalDefinition::new("64", GridCoordinate::new(1, 0), 64))
//!     .with_signal(SignalDefinition::new("72", GridCoordinate::new(1, 5), 72))
//!     .with_graph(TrackGraph::new().with_link(toe, branch));
//!
//! let validator = RouteValidator::new(&topology);
//! let route = TrainRouteCommand::new(64, 72, TrainRouteState::SetMain)
//!     .with_point(PointCommand::new(27, PointPosition::Straight));
//! assert!(validator.is_valid(&route));
//! ```

use std::collections::HashMap;

use log::{debug, warn};

use crate::commands::TrainRouteCommand;
use crate::error::ValidationError;
use crate::topology::{GridCoordinate, Point, SignalDefinition, Topology, TrackGraph};

// ============================================================================
// Index diagnostics
// ============================================================================

/// A name registered more than once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexConflict {
    /// The colliding key.
    pub key: String,
    /// Where the authoritative (first) definition sits.
    pub kept: GridCoordinate,
    /// Where the ignored definition sits.
    pub ignored: GridCoordinate,
}

/// Problems found while building the indices. None of them are fatal.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexDiagnostics {
    /// Signals sharing a name.
    pub signal_conflicts: Vec<IndexConflict>,
    /// Point labels registered more than once.
    pub duplicate_point_labels: Vec<String>,
    /// Point labels without a numeric prefix.
    pub unnumbered_points: Vec<String>,
}

impl IndexDiagnostics {
    /// True if nothing was reported.
    pub fn is_clean(&self) -> bool {
        self.signal_conflicts.is_empty()
            && self.duplicate_point_labels.is_empty()
            && self.unnumbered_points.is_empty()
    }
}

// ============================================================================
// Validation report
// ============================================================================

/// Result of validating many routes at once.
#[derive(Clone, Debug, Default)]
pub struct ValidationReport {
    /// Routes that passed.
    pub valid: Vec<TrainRouteCommand>,
    /// Routes that failed, with the first reason found.
    pub invalid: Vec<(TrainRouteCommand, ValidationError)>,
}

impl ValidationReport {
    /// Number of valid routes.
    pub fn valid_count(&self) -> usize {
        self.valid.len()
    }

    /// Number of invalid routes.
    pub fn invalid_count(&self) -> usize {
        self.invalid.len()
    }

    /// Number of routes checked.
    pub fn total(&self) -> usize {
        self.valid.len() + self.invalid.len()
    }
}

// ============================================================================
// Validator
// ============================================================================

/// Checks routes against one topology snapshot.
#[derive(Clone, Debug)]
pub struct RouteValidator {
    points: HashMap<u32, Vec<Point>>,
    signals: HashMap<String, Vec<SignalDefinition>>,
    graph: TrackGraph,
    diagnostics: IndexDiagnostics,
}

impl RouteValidator {
    /// Builds the indices for `topology`.
    pub fn new(topology: &Topology) -> Self {
        let mut diagnostics = IndexDiagnostics::default();

        let mut points: HashMap<u32, Vec<Point>> = HashMap::new();
        for point in &topology.points {
            let number = point.number();
            if number == 0 {
                warn!("point label {:?} has no number, ignored", point.label);
                diagnostics.unnumbered_points.push(point.label.clone());
                continue;
            }
            let entry = points.entry(number).or_default();
            if entry.iter().any(|p| p.label.eq_ignore_ascii_case(&point.label)) {
                warn!("point {} defined more than once", point.label);
                diagnostics.duplicate_point_labels.push(point.label.clone());
            }
            entry.push(point.clone());
        }

        let mut signals: HashMap<String, Vec<SignalDefinition>> = HashMap::new();
        for signal in &topology.signals {
            let entry = signals.entry(signal.name.clone()).or_default();
            if let Some(first) = entry.first() {
                warn!(
                    "signal {} at {} collides with {} at {}, keeping the first",
                    signal.name, signal.coordinate, first.name, first.coordinate
                );
                diagnostics.signal_conflicts.push(IndexConflict {
                    key: signal.name.clone(),
                    kept: first.coordinate,
                    ignored: signal.coordinate,
                });
            }
            entry.push(signal.clone());
        }

        debug!(
            "indexed {} point numbers and {} signal names",
            points.len(),
            signals.len()
        );

        Self {
            points,
            signals,
            graph: topology.graph.clone(),
            diagnostics,
        }
    }

    /// Diagnostics collected while indexing.
    pub fn diagnostics(&self) -> &IndexDiagnostics {
        &self.diagnostics
    }

    /// The authoritative definition for a signal name.
    pub fn signal(&self, name: &str) -> Option<&SignalDefinition> {
        self.signals.get(name).and_then(|defs| defs.first())
    }

    /// Every definition registered under a signal name.
    pub fn signal_definitions(&self, name: &str) -> &[SignalDefinition] {
        self.signals.get(name).map_or(&[], Vec::as_slice)
    }

    /// Every definition of a point number.
    pub fn point_definitions(&self, number: u32) -> &[Point] {
        self.points.get(&number).map_or(&[], Vec::as_slice)
    }

    /// Checks one route.
    ///
    /// Both end signals must exist. Each on-route point must exist and at
    /// least one of its definitions must have switch and diverging ends that
    /// are graph nodes joined by a direct link. Flank protection points are
    /// not checked.
    pub fn validate_route(&self, route: &TrainRouteCommand) -> Result<(), ValidationError> {
        for signal in route.signal_chain() {
            if self.signal(&signal.to_string()).is_none() {
                return Err(ValidationError::UnknownSignal(signal));
            }
        }

        for point in route.on_route_points() {
            let definitions = self.point_definitions(point.number());
            if definitions.is_empty() {
                return Err(ValidationError::UnknownPoint(point.number()));
            }
            if !definitions.iter().any(|def| self.is_connected(def)) {
                return Err(ValidationError::NotConnected(point.number()));
            }
        }
        Ok(())
    }

    /// Boolean form of [`validate_route`](Self::validate_route).
    pub fn is_valid(&self, route: &TrainRouteCommand) -> bool {
        self.validate_route(route).is_ok()
    }

    /// Splits routes into valid and invalid ones. Never fails as a whole.
    pub fn validate_routes<'a>(
        &self,
        routes: impl IntoIterator<Item = &'a TrainRouteCommand>,
    ) -> ValidationReport {
        let mut report = ValidationReport::default();
        for route in routes {
            match self.validate_route(route) {
                Ok(()) => report.valid.push(route.clone()),
                Err(err) => {
                    warn!("route {route} is invalid: {err}");
                    report.invalid.push((route.clone(), err));
                }
            }
        }
        debug!(
            "validated {} routes: {} valid, {} invalid",
            report.total(),
            report.valid_count(),
            report.invalid_count()
        );
        report
    }

    fn is_connected(&self, point: &Point) -> bool {
        match (point.switch_end, point.diverging_end) {
            (Some(toe), Some(branch)) => {
                self.graph.node(toe).is_some()
                    && self.graph.node(branch).is_some()
                    && self.graph.link(toe, branch).is_some()
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{PointCommand, PointPosition, TrainRouteState};

    const TOE: GridCoordinate = GridCoordinate::new(1, 1);
    const BRANCH: GridCoordinate = GridCoordinate::new(2, 2);

    fn topology() -> Topology {
        Topology::new()
            .with_point(Point::new("27a", &[12]).with_ends(TOE, BRANCH))
            .with_point(Point::new("27b", &[13]))
            .with_point(Point::new("30", &[30]).with_ends(GridCoordinate::new(5, 5), GridCoordinate::new(6, 6)))
            .with_signal(SignalDefinition::new("64", GridCoordinate::new(1, 0), 64))
            .with_signal(SignalDefinition::new("72", GridCoordinate::new(1, 9), 72))
            .with_graph(TrackGraph::new().with_link(TOE, BRANCH))
    }

    fn route(points: &[u32]) -> TrainRouteCommand {
        TrainRouteCommand::new(64, 72, TrainRouteState::SetMain)
            .with_points(points.iter().map(|&n| PointCommand::new(n, PointPosition::Straight)))
    }

    // =========================================================================
    // Signals
    // =========================================================================

    #[test]
    fn unknown_from_signal() {
        let v = RouteValidator::new(&topology());
        let mut r = route(&[27]);
        r.from_signal = 65;
        assert_eq!(v.validate_route(&r), Err(ValidationError::UnknownSignal(65)));
    }

    #[test]
    fn unknown_to_signal_fails_even_with_good_points() {
        let v = RouteValidator::new(&topology());
        let mut r = route(&[27]);
        r.to_signal = 99;
        assert!(!v.is_valid(&r));
    }

    #[test]
    fn unknown_interior_signal_fails() {
        let v = RouteValidator::new(&topology());
        let r = route(&[27]).with_intermediate_signals([71]);
        assert_eq!(v.validate_route(&r), Err(ValidationError::UnknownSignal(71)));
    }

    #[test]
    fn route_without_points_valid_once_signals_resolve() {
        let v = RouteValidator::new(&topology());
        assert!(v.is_valid(&route(&[])));
    }

    // =========================================================================
    // Points
    // =========================================================================

    #[test]
    fn sub_points_share_a_number() {
        let v = RouteValidator::new(&topology());
        assert_eq!(v.point_definitions(27).len(), 2);
        // 27b has no graph ends, 27a does: one connected definition suffices
        assert!(v.is_valid(&route(&[27])));
    }

    #[test]
    fn unknown_point() {
        let v = RouteValidator::new(&topology());
        assert_eq!(
            v.validate_route(&route(&[27, 99])),
            Err(ValidationError::UnknownPoint(99))
        );
    }

    #[test]
    fn point_without_link_is_not_connected() {
        let v = RouteValidator::new(&topology());
        assert_eq!(
            v.validate_route(&route(&[30])),
            Err(ValidationError::NotConnected(30))
        );
    }

    #[test]
    fn off_route_points_are_not_checked() {
        let v = RouteValidator::new(&topology());
        let r = route(&[27]).with_point(PointCommand::off_route(99, PointPosition::Diverging));
        assert!(v.is_valid(&r));
    }

    // =========================================================================
    // Index diagnostics
    // =========================================================================

    #[test]
    fn duplicate_signal_first_wins() {
        let topo = topology().with_signal(SignalDefinition::new("64", GridCoordinate::new(8, 8), 99));
        let v = RouteValidator::new(&topo);
        assert_eq!(v.signal("64").map(|s| s.address), Some(64));
        assert_eq!(v.signal_definitions("64").len(), 2);
        assert_eq!(
            v.diagnostics().signal_conflicts,
            vec![IndexConflict {
                key: "64".into(),
                kept: GridCoordinate::new(1, 0),
                ignored: GridCoordinate::new(8, 8),
            }]
        );
        assert!(!v.diagnostics().is_clean());
    }

    #[test]
    fn clean_topology_has_no_diagnostics() {
        let v = RouteValidator::new(&topology());
        assert!(v.diagnostics().is_clean());
    }

    #[test]
    fn unnumbered_and_duplicate_points_reported() {
        let topo = topology()
            .with_point(Point::new("w", &[1]))
            .with_point(Point::new("27A", &[1]));
        let v = RouteValidator::new(&topo);
        assert_eq!(v.diagnostics().unnumbered_points, vec!["w".to_string()]);
        assert_eq!(v.diagnostics().duplicate_point_labels, vec!["27A".to_string()]);
    }

    // =========================================================================
    // Batch validation
    // =========================================================================

    #[test]
    fn validate_routes_partitions() {
        let v = RouteValidator::new(&topology());
        let routes = vec![route(&[27]), route(&[99]), route(&[]), route(&[30])];
        let report = v.validate_routes(&routes);
        assert_eq!(report.valid_count(), 2);
        assert_eq!(report.invalid_count(), 2);
        assert_eq!(report.total(), 4);
        assert_eq!(report.invalid[0].1, ValidationError::UnknownPoint(99));
    }
}
