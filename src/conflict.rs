//! Bookkeeping of active train routes.
//!
//! Two routes conflict when they want the same point number in different
//! positions ([`TrainRouteCommand::is_in_conflict_with`]). [`ActiveRoutes`]
//! applies that rule against every route currently set and answers which
//! points are held.

use log::{debug, info};

use crate::commands::{PointKey, TrainRouteCommand};

/// A conflict between a requested route and an active one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteConflict {
    /// Start signal of the active route.
    pub from_signal: u32,
    /// Destination signal of the active route.
    pub to_signal: u32,
    /// Point number both routes want in different positions.
    pub point: u32,
}

/// Routes currently set, in the order they were set.
#[derive(Clone, Debug, Default)]
pub struct ActiveRoutes {
    routes: Vec<TrainRouteCommand>,
}

impl ActiveRoutes {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// True if no route is set.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Active routes in the order they were set.
    pub fn iter(&self) -> impl Iterator<Item = &TrainRouteCommand> {
        self.routes.iter()
    }

    /// True if a route with the same end signals is active.
    pub fn contains(&self, route: &TrainRouteCommand) -> bool {
        self.routes.iter().any(|active| active.same_route(route))
    }

    /// The first active route `route` conflicts with.
    pub fn find_conflict(&self, route: &TrainRouteCommand) -> Option<RouteConflict> {
        self.routes.iter().find_map(|active| {
            route.conflicting_point(active).map(|point| RouteConflict {
                from_signal: active.from_signal,
                to_signal: active.to_signal,
                point: point.number(),
            })
        })
    }

    /// Registers a route as set.
    pub fn insert(&mut self, route: TrainRouteCommand) {
        info!("route {route} active");
        self.routes.push(route);
    }

    /// Removes and returns every active route matched by a teardown request.
    pub fn remove_matching(&mut self, request: &TrainRouteCommand) -> Vec<TrainRouteCommand> {
        let (removed, kept) = self
            .routes
            .drain(..)
            .partition(|active| request.matches_active(active));
        self.routes = kept;
        for route in &removed {
            info!("route {route} released");
        }
        removed
    }

    /// Removes and returns every route.
    pub fn clear(&mut self) -> Vec<TrainRouteCommand> {
        debug!("releasing {} route(s)", self.routes.len());
        core::mem::take(&mut self.routes)
    }

    /// True if any active route includes this point number.
    pub fn holds_point(&self, point: PointKey) -> bool {
        self.holder_of(point).is_some()
    }

    /// The first active route that includes this point number.
    pub fn holder_of(&self, point: PointKey) -> Option<&TrainRouteCommand> {
        self.routes
            .iter()
            .find(|route| route.point_commands.iter().any(|p| p.key() == point))
    }
}
