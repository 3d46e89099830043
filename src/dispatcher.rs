//! Command execution against the accessory bus.
//!
//! [`Dispatcher`] takes completed [`Command`]s, checks them against the
//! topology and the active routes, encodes them into frames and writes the
//! frames to an [`AccessoryTransport`]. A route typed as a bare signal chain
//! takes its points from the topology's route definitions first.
//!
//! - Frames of one command go out strictly in order, each preceded by the
//!   configured frame delay.
//! - The delay and every transport write are cancellation points. After
//!   cancellation the remaining frames of that command are dropped; frames
//!   already sent stay sent.
//! - No internal lock is held across a suspension point.
//! - Every command publishes its result as a [`Notification`]. Failures are
//!   published as rejections and also returned as [`DispatchError`].
//!
//! # Example
//!
//! ```rust
//! use yard_dispatch::dispatcher::Dispatcher;
//! use yard_dispatch::hal::MockTransport;
//! use yard_dispatch::traits::CancelToken;
//! use yard_dispatch::{Point, PointCommand, PointOutcome, PointPosition, Topology};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let topology = Topology::new().with_point(Point::new("27", &[12]));
//! let dispatcher = Dispatcher::new(MockTransport::new(), topology);
//!
//! let outcome = dispatcher
//!     .dispatch_point(PointCommand::new(27, PointPosition::Straight), &CancelToken::never())
//!     .await
//!     .unwrap();
//! assert_eq!(outcome, PointOutcome::Set);
//! assert_eq!(dispatcher.transport().frame_count(), 1);
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use log::{debug, error, info, warn};

use crate::commands::{
    Command, ControlCommand, PointCommand, PointOutcome, PointPosition, RejectReason,
    RouteOutcome, SignalCommand, SignalState, TrainRouteCommand, TrainRouteState, TurntableCommand,
    TurntableOutcome,
};
use crate::config::DispatchConfig;
use crate::conflict::ActiveRoutes;
use crate::error::{DispatchError, ProtocolError};
use crate::notify::{Notification, Notifier};
use crate::protocol::{self, Frame, FrameSequence};
use crate::topology::Topology;
use crate::traits::{AccessoryTransport, CancelToken};
use crate::validator::RouteValidator;

/// Result type of every dispatch operation.
pub type DispatchResult<T, E> = Result<T, DispatchError<E>>;

/// What [`Dispatcher::execute`] did with a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Result of a point command.
    Point(PointOutcome),
    /// Result of a route command or of clearing all routes.
    Route(RouteOutcome),
    /// Result of a turntable command.
    Turntable(TurntableOutcome),
    /// Number of signals set to stop.
    SignalsStopped(usize),
    /// A reload was requested from the topology provider.
    ReloadRequested,
}

/// Topology snapshot together with the indices built from it.
#[derive(Debug)]
struct Layout {
    topology: Arc<Topology>,
    validator: RouteValidator,
}

impl Layout {
    fn new(topology: Topology) -> Self {
        let validator = RouteValidator::new(&topology);
        let diagnostics = validator.diagnostics();
        if !diagnostics.is_clean() {
            warn!(
                "topology loaded with {} signal conflict(s), {} duplicate point(s), {} unnumbered point(s)",
                diagnostics.signal_conflicts.len(),
                diagnostics.duplicate_point_labels.len(),
                diagnostics.unnumbered_points.len()
            );
        }
        Self {
            topology: Arc::new(topology),
            validator,
        }
    }
}

/// Last commanded position per point and sub-point.
type PositionKey = (u32, Option<char>);

/// Outcome of checking a route against the active ones.
enum Reservation {
    Rejected(RejectReason),
    Unencodable(ProtocolError),
    Reserved(TrainRouteCommand, FrameSequence),
}

/// Executes commands over a transport.
pub struct Dispatcher<T: AccessoryTransport> {
    transport: T,
    layout: RwLock<Arc<Layout>>,
    routes: Mutex<ActiveRoutes>,
    positions: Mutex<HashMap<PositionKey, PointPosition>>,
    notifier: Notifier,
    config: DispatchConfig,
}

impl<T: AccessoryTransport> Dispatcher<T> {
    /// Dispatcher with default configuration.
    pub fn new(transport: T, topology: Topology) -> Self {
        let config = DispatchConfig::default();
        Self {
            transport,
            layout: RwLock::new(Arc::new(Layout::new(topology))),
            routes: Mutex::new(ActiveRoutes::new()),
            positions: Mutex::new(HashMap::new()),
            notifier: Notifier::new(config.notification_capacity),
            config,
        }
    }

    /// Replaces the configuration. Creates a fresh notification channel, so
    /// call this before subscribing.
    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.notifier = Notifier::new(config.notification_capacity);
        self.config = config;
        self
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The active configuration.
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// The notification channel.
    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Shorthand for `notifier().subscribe()`.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    /// The current topology snapshot.
    pub fn topology(&self) -> Arc<Topology> {
        Arc::clone(&self.layout().topology)
    }

    /// Installs a new topology and rebuilds the validation indices.
    ///
    /// Commands already running finish against the snapshot they started
    /// with. Active routes and known point positions are kept.
    pub fn replace_topology(&self, topology: Topology) {
        let layout = Arc::new(Layout::new(topology));
        info!(
            "topology replaced: {} point(s), {} signal(s)",
            layout.topology.points.len(),
            layout.topology.signals.len()
        );
        *self.layout.write().unwrap_or_else(PoisonError::into_inner) = layout;
    }

    /// Copies of the active routes, in the order they were set.
    pub fn active_routes(&self) -> Vec<TrainRouteCommand> {
        self.with_routes(|routes| routes.iter().cloned().collect())
    }

    /// Last position commanded for a point, if any.
    pub fn point_position(&self, number: u32, sub_point: Option<char>) -> Option<PointPosition> {
        self.with_positions(|positions| positions.get(&(number, sub_point)).copied())
    }

    // ========================================================================
    // Command entry point
    // ========================================================================

    /// Executes any command.
    pub async fn execute(
        &self,
        command: Command,
        cancel: &CancelToken,
    ) -> DispatchResult<DispatchOutcome, T::Error> {
        info!("executing {command:?}");
        match command {
            Command::Point(point) => self
                .dispatch_point(point, cancel)
                .await
                .map(DispatchOutcome::Point),
            Command::TrainRoute(route) => self
                .dispatch_route(route, cancel)
                .await
                .map(DispatchOutcome::Route),
            Command::Turntable(turntable) => self
                .dispatch_turntable(turntable, cancel)
                .await
                .map(DispatchOutcome::Turntable),
            Command::Control(ControlCommand::ReloadConfiguration) => {
                self.request_reload();
                Ok(DispatchOutcome::ReloadRequested)
            }
            Command::Control(ControlCommand::ClearAllTrainRoutes) => self
                .clear_all_routes(cancel)
                .await
                .map(DispatchOutcome::Route),
            Command::Control(ControlCommand::StopAllSignals) => self
                .stop_all_signals(cancel)
                .await
                .map(DispatchOutcome::SignalsStopped),
        }
    }

    // ========================================================================
    // Points
    // ========================================================================

    /// Moves a single point.
    ///
    /// Nothing is sent if the point is held by an active route or was
    /// already commanded into the requested position.
    pub async fn dispatch_point(
        &self,
        command: PointCommand,
        cancel: &CancelToken,
    ) -> DispatchResult<PointOutcome, T::Error> {
        let number = command.number();
        if command.is_undefined() {
            return Ok(self.publish_point(number, rejected_point(RejectReason::Undefined)));
        }

        let layout = self.layout();
        let keys: Vec<PositionKey> = layout
            .topology
            .sub_points(&command)
            .into_iter()
            .map(|sub_point| (number, sub_point))
            .collect();
        let Some(point) = layout.topology.resolve_point(command) else {
            return Ok(self.publish_point(number, rejected_point(RejectReason::UnknownPoint(number))));
        };

        if self.with_routes(|routes| routes.holds_point(point.key())) {
            return Ok(self.publish_point(number, PointOutcome::Locked));
        }
        let in_position = self.with_positions(|positions| {
            keys.iter()
                .all(|key| positions.get(key) == Some(&point.position()))
        });
        if in_position {
            return Ok(self.publish_point(number, PointOutcome::AlreadyInPosition));
        }

        let frames = protocol::point_set_frames(&point).map_err(|err| self.fail_point(number, err.into()))?;
        self.send_frames(&frames, cancel)
            .await
            .map_err(|err| self.fail_point(number, err))?;

        self.with_positions(|positions| {
            for key in keys {
                positions.insert(key, point.position());
            }
        });
        info!("point {point} set");
        Ok(self.publish_point(number, PointOutcome::Set))
    }

    // ========================================================================
    // Train routes
    // ========================================================================

    /// Sets or releases a train route, depending on its state.
    pub async fn dispatch_route(
        &self,
        route: TrainRouteCommand,
        cancel: &CancelToken,
    ) -> DispatchResult<RouteOutcome, T::Error> {
        if route.state.is_set() {
            self.set_route(route, cancel).await
        } else if route.state.is_teardown() {
            self.release_route(route, cancel).await
        } else {
            Ok(self.publish_route(&route, rejected_route(RejectReason::Undefined)))
        }
    }

    async fn set_route(
        &self,
        route: TrainRouteCommand,
        cancel: &CancelToken,
    ) -> DispatchResult<RouteOutcome, T::Error> {
        let layout = self.layout();
        let route = if route.point_commands.is_empty() && route.from_signal != 0 {
            match layout.topology.expand_route(&route) {
                Ok(expanded) => expanded,
                Err((from_signal, to_signal)) => {
                    let reason = RejectReason::UnknownRoute {
                        from_signal,
                        to_signal,
                    };
                    return Ok(self.publish_route(&route, rejected_route(reason)));
                }
            }
        } else {
            route
        };
        if route.is_undefined() {
            return Ok(self.publish_route(&route, rejected_route(RejectReason::Undefined)));
        }

        let validation = layout.validator.validate_route(&route);
        let prepared = resolve_route(&layout.topology, &route)
            .map_err(RejectReason::UnknownPoint)
            .map(|resolved| {
                let frames = route_set_frames(&resolved);
                (resolved, frames)
            });

        // Checks and reservation happen under one lock so that two concurrent
        // requests cannot both claim the same point.
        let reservation = self.with_routes(|routes| {
            if routes.contains(&route) {
                return Reservation::Rejected(RejectReason::AlreadyActive);
            }
            if let Some(conflict) = routes.find_conflict(&route) {
                return Reservation::Rejected(RejectReason::ConflictsWith {
                    from_signal: conflict.from_signal,
                    to_signal: conflict.to_signal,
                    point: conflict.point,
                });
            }
            if let Err(err) = validation {
                return Reservation::Rejected(RejectReason::Invalid(err));
            }
            match prepared {
                Err(reason) => Reservation::Rejected(reason),
                Ok((_, Err(err))) => Reservation::Unencodable(err),
                Ok((resolved, Ok(frames))) => {
                    routes.insert(resolved.clone());
                    Reservation::Reserved(resolved, frames)
                }
            }
        });

        let (resolved, frames) = match reservation {
            Reservation::Rejected(reason) => {
                return Ok(self.publish_route(&route, rejected_route(reason)))
            }
            Reservation::Unencodable(err) => return Err(self.fail_route(&route, err.into())),
            Reservation::Reserved(resolved, frames) => (resolved, frames),
        };

        if let Err(err) = self.send_frames(frames.frames(), cancel).await {
            self.with_routes(|routes| routes.remove_matching(&route));
            return Err(self.fail_route(&route, err));
        }

        self.with_positions(|positions| {
            for point in resolved.point_commands.iter().filter(|p| !p.is_undefined()) {
                for sub_point in layout.topology.sub_points(point) {
                    positions.insert((point.number(), sub_point), point.position());
                }
            }
        });
        info!("route {resolved} set with {} frame(s)", frames.len());
        Ok(self.publish_route(&route, RouteOutcome::Set))
    }

    async fn release_route(
        &self,
        request: TrainRouteCommand,
        cancel: &CancelToken,
    ) -> DispatchResult<RouteOutcome, T::Error> {
        let (removed, unlock) = self.with_routes(|routes| {
            let removed = routes.remove_matching(&request);
            let unlock = points_to_unlock(&removed, routes);
            (removed, unlock)
        });
        if removed.is_empty() {
            return Ok(self.publish_route(&request, rejected_route(RejectReason::NotActive)));
        }

        let frames = unlock_frames(&unlock).map_err(|err| self.fail_route(&request, err.into()))?;
        self.send_frames(frames.frames(), cancel)
            .await
            .map_err(|err| self.fail_route(&request, err))?;

        for route in &removed {
            self.publish_route(route, RouteOutcome::Cleared);
        }
        Ok(RouteOutcome::Cleared)
    }

    /// Releases every active route and unlocks their points.
    pub async fn clear_all_routes(
        &self,
        cancel: &CancelToken,
    ) -> DispatchResult<RouteOutcome, T::Error> {
        let removed = self.with_routes(ActiveRoutes::clear);
        let unlock = points_to_unlock(&removed, &ActiveRoutes::new());
        let all = TrainRouteCommand::new(0, 0, TrainRouteState::Clear);

        let frames = unlock_frames(&unlock).map_err(|err| self.fail_route(&all, err.into()))?;
        self.send_frames(frames.frames(), cancel)
            .await
            .map_err(|err| self.fail_route(&all, err))?;

        info!("{} route(s) cleared", removed.len());
        Ok(self.publish_route(&all, RouteOutcome::AllCleared))
    }

    // ========================================================================
    // Signals
    // ========================================================================

    /// Sets one signal. Signals without a bus address are only announced.
    pub async fn dispatch_signal(
        &self,
        signal: SignalCommand,
        cancel: &CancelToken,
    ) -> DispatchResult<(), T::Error> {
        let frame = protocol::signal_frame(&signal).map_err(|err| {
            warn!("signal {} not sent: {err}", signal.signal_number);
            DispatchError::Protocol(err)
        })?;
        let confirmed_by_bus = match frame {
            Some(frame) => {
                self.send_frames(&[frame], cancel).await?;
                true
            }
            None => {
                debug!("signal {} has no address", signal.signal_number);
                false
            }
        };
        self.notifier.publish(Notification::SignalStateChanged {
            signal: signal.signal_number,
            state: signal.state,
            confirmed_by_bus,
        });
        Ok(())
    }

    /// Sets every signal of the topology to stop. Returns how many were set.
    ///
    /// Each signal name is handled once, using its first definition.
    pub async fn stop_all_signals(&self, cancel: &CancelToken) -> DispatchResult<usize, T::Error> {
        let layout = self.layout();
        let mut seen = HashSet::new();
        let commands: Vec<SignalCommand> = layout
            .topology
            .signals
            .iter()
            .filter(|def| seen.insert(def.name.as_str()))
            .map(|def| SignalCommand {
                feedback_address: def.feedback_address,
                ..SignalCommand::new(def.number(), def.address, SignalState::Stop)
            })
            .collect();

        for command in &commands {
            self.dispatch_signal(*command, cancel).await?;
        }
        info!("{} signal(s) set to stop", commands.len());
        Ok(commands.len())
    }

    // ========================================================================
    // Turntable and control
    // ========================================================================

    /// Turns the turntable to a track.
    pub async fn dispatch_turntable(
        &self,
        command: TurntableCommand,
        cancel: &CancelToken,
    ) -> DispatchResult<TurntableOutcome, T::Error> {
        let track = command.track;
        let layout = self.layout();
        let Some(target) = layout.topology.turntable_track(track) else {
            let reason = RejectReason::UnknownTurntableTrack(track);
            return Ok(self.publish_turntable(track, TurntableOutcome::Rejected { reason }));
        };

        let frame = protocol::turntable_frame(&command, target)
            .map_err(|err| self.fail_turntable(track, err.into()))?;
        self.send_frames(&[frame], cancel)
            .await
            .map_err(|err| self.fail_turntable(track, err))?;
        Ok(self.publish_turntable(track, TurntableOutcome::Turned))
    }

    /// Asks the topology provider for a reload.
    pub fn request_reload(&self) {
        info!("reload requested");
        self.notifier.publish(Notification::ReloadRequested);
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    /// Sends frames in order, pausing before each one.
    async fn send_frames(
        &self,
        frames: &[Frame],
        cancel: &CancelToken,
    ) -> DispatchResult<(), T::Error> {
        let delay = self.config.frame_delay();
        for (sent, frame) in frames.iter().enumerate() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(sent)),
                _ = tokio::time::sleep(delay) => {}
            }
            if cancel.is_cancelled() {
                return Err(cancelled(sent));
            }

            debug!("frame {}/{}: {frame:?}", sent + 1, frames.len());
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(sent)),
                result = self.transport.send(frame.as_bytes(), cancel) => result,
            };
            if let Err(source) = result {
                error!("bus write failed after {sent} frame(s): {source}");
                return Err(DispatchError::Transport {
                    frames_sent: sent,
                    source,
                });
            }
        }
        Ok(())
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    fn layout(&self) -> Arc<Layout> {
        Arc::clone(&self.layout.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn with_routes<R>(&self, f: impl FnOnce(&mut ActiveRoutes) -> R) -> R {
        let mut guard = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    fn with_positions<R>(&self, f: impl FnOnce(&mut HashMap<PositionKey, PointPosition>) -> R) -> R {
        let mut guard = self.positions.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    fn publish_point(&self, number: u32, outcome: PointOutcome) -> PointOutcome {
        if let PointOutcome::Rejected { reason } = &outcome {
            warn!("point {number} rejected: {reason}");
        }
        self.notifier.publish(Notification::Point {
            number,
            outcome: outcome.clone(),
        });
        outcome
    }

    fn publish_route(&self, route: &TrainRouteCommand, outcome: RouteOutcome) -> RouteOutcome {
        if let RouteOutcome::Rejected { reason } = &outcome {
            warn!("route {route} rejected: {reason}");
        }
        self.notifier.publish(Notification::Route {
            from_signal: route.from_signal,
            to_signal: route.to_signal,
            outcome: outcome.clone(),
        });
        outcome
    }

    fn publish_turntable(&self, track: u32, outcome: TurntableOutcome) -> TurntableOutcome {
        if let TurntableOutcome::Rejected { reason } = &outcome {
            warn!("turntable to track {track} rejected: {reason}");
        }
        self.notifier.publish(Notification::Turntable {
            track,
            outcome: outcome.clone(),
        });
        outcome
    }

    fn fail_point(&self, number: u32, err: DispatchError<T::Error>) -> DispatchError<T::Error> {
        self.publish_point(number, rejected_point(reject_reason(&err)));
        err
    }

    fn fail_route(
        &self,
        route: &TrainRouteCommand,
        err: DispatchError<T::Error>,
    ) -> DispatchError<T::Error> {
        self.publish_route(route, rejected_route(reject_reason(&err)));
        err
    }

    fn fail_turntable(&self, track: u32, err: DispatchError<T::Error>) -> DispatchError<T::Error> {
        let reason = reject_reason(&err);
        self.publish_turntable(track, TurntableOutcome::Rejected { reason });
        err
    }
}

fn cancelled<E: std::error::Error + 'static>(frames_sent: usize) -> DispatchError<E> {
    info!("dispatch cancelled after {frames_sent} frame(s)");
    DispatchError::Cancelled { frames_sent }
}

fn rejected_point(reason: RejectReason) -> PointOutcome {
    PointOutcome::Rejected { reason }
}

fn rejected_route(reason: RejectReason) -> RouteOutcome {
    RouteOutcome::Rejected { reason }
}

/// Human-readable reject reason for a failed delivery.
pub fn reject_reason<E: std::error::Error + 'static>(err: &DispatchError<E>) -> RejectReason {
    match err {
        DispatchError::Cancelled { frames_sent } => RejectReason::Cancelled {
            frames_sent: *frames_sent,
        },
        DispatchError::Transport { source, .. } => RejectReason::TransportFailed(source.to_string()),
        DispatchError::Protocol(err) => RejectReason::Protocol(err.to_string()),
    }
}

/// Attaches addresses to every defined point of a route.
///
/// Fails with the number of the first point the topology does not know.
fn resolve_route(topology: &Topology, route: &TrainRouteCommand) -> Result<TrainRouteCommand, u32> {
    let points = route
        .point_commands
        .iter()
        .map(|point| {
            if point.is_undefined() {
                return Ok(point.clone());
            }
            topology
                .resolve_point(point.clone())
                .ok_or(point.number())
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(TrainRouteCommand {
        point_commands: points,
        ..route.clone()
    })
}

/// Set frames for every point, then lock frames for every point.
fn route_set_frames(route: &TrainRouteCommand) -> Result<FrameSequence, ProtocolError> {
    let mut frames = FrameSequence::new();
    for point in &route.point_commands {
        frames.extend(protocol::point_set_frames(point)?);
    }
    for point in &route.point_commands {
        frames.extend(protocol::point_lock_frames(point)?);
    }
    Ok(frames)
}

/// Points of released routes that no remaining route holds, once each.
fn points_to_unlock(released: &[TrainRouteCommand], remaining: &ActiveRoutes) -> Vec<PointCommand> {
    let mut seen = HashSet::new();
    released
        .iter()
        .flat_map(|route| route.point_commands.iter())
        .filter(|point| point.also_unlock() && !remaining.holds_point(point.key()))
        .filter(|point| seen.insert((point.number(), point.sub_point())))
        .cloned()
        .collect()
}

fn unlock_frames(points: &[PointCommand]) -> Result<FrameSequence, ProtocolError> {
    let mut frames = FrameSequence::new();
    for point in points {
        frames.extend(protocol::point_unlock_frames(point)?);
    }
    Ok(frames)
}
