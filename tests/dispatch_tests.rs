//! Dispatcher tests against the mock bus.
//!
//! Time is paused, so frame pacing can be checked exactly and the tests
//! still finish instantly.

#![cfg(feature = "dispatch")]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;

use yard_dispatch::hal::{MockKeySource, MockTransport, MockTransportError};
use yard_dispatch::protocol::WirePosition::{Closed, Thrown};
use yard_dispatch::traits::{cancellation, CancelToken};
use yard_dispatch::{
    Command, ConsoleInputHandler, ControlCommand, DispatchError, DispatchOutcome, Dispatcher,
    GridCoordinate, Notification, Point, PointCommand, PointOutcome, PointPosition, ProtocolError,
    RejectReason, RouteDefinition, RouteOutcome, SignalDefinition, SignalState, Topology, TrackGraph,
    TrainRouteCommand, TrainRouteState, TurntableCommand, TurntableOutcome,
};

const FRAME_DELAY: Duration = Duration::from_millis(100);

fn at(row: i32, column: i32) -> GridCoordinate {
    GridCoordinate::new(row, column)
}

fn yard() -> Topology {
    Topology::new()
        .with_point(
            Point::new("27", &[12])
                .with_diverging_addresses(&[13])
                .with_ends(at(1, 1), at(2, 2)),
        )
        .with_point(
            Point::new("30", &[30])
                .with_diverging_addresses(&[31])
                .with_lock_address_offset(100)
                .with_ends(at(1, 3), at(2, 4)),
        )
        .with_point(Point::new("40", &[12, -34]))
        .with_point(Point::new("50", &[5000]))
        .with_signal(SignalDefinition::new("64", at(1, 0), 64))
        .with_signal(SignalDefinition::new("72", at(1, 9), 72))
        .with_signal(SignalDefinition::new("60", at(2, 0), 60))
        .with_signal(SignalDefinition::new("80", at(2, 9), 80))
        .with_signal(SignalDefinition::new("90", at(3, 9), 0))
        .with_turntable_track(3, 203)
        .with_route(
            RouteDefinition::new(64, 72)
                .with_point("27", PointPosition::Straight)
                .with_point("30", PointPosition::Straight),
        )
        .with_graph(
            TrackGraph::new()
                .with_link(at(1, 1), at(2, 2))
                .with_link(at(1, 3), at(2, 4)),
        )
}

fn dispatcher(bus: MockTransport) -> Dispatcher<MockTransport> {
    Dispatcher::new(bus, yard())
}

fn straight(number: u32) -> PointCommand {
    PointCommand::new(number, PointPosition::Straight)
}

fn diverging(number: u32) -> PointCommand {
    PointCommand::new(number, PointPosition::Diverging)
}

/// 64 → 72 over 27 and the locked point 30, both straight.
fn main_route() -> TrainRouteCommand {
    TrainRouteCommand::new(64, 72, TrainRouteState::SetMain)
        .with_point(straight(27))
        .with_point(straight(30))
}

fn drain(rx: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
    let mut received = Vec::new();
    while let Ok(notification) = rx.try_recv() {
        received.push(notification);
    }
    received
}

// ============================================================================
// Pacing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn frames_are_paced_by_the_frame_delay() {
    let d = dispatcher(MockTransport::new());
    let start = Instant::now();

    let outcome = d.dispatch_route(main_route(), &CancelToken::never()).await;
    assert_eq!(outcome.unwrap(), RouteOutcome::Set);

    let frames = d.transport().frames();
    assert_eq!(frames.len(), 3);
    assert!(frames[0].at.duration_since(start) >= FRAME_DELAY);
    for pair in frames.windows(2) {
        assert!(pair[1].at.duration_since(pair[0].at) >= FRAME_DELAY);
    }
}

#[tokio::test(start_paused = true)]
async fn configured_delay_is_used() {
    let d = Dispatcher::new(MockTransport::new(), yard())
        .with_config(yard_dispatch::DispatchConfig::default().with_frame_delay_ms(250));
    let start = Instant::now();
    d.dispatch_point(straight(40), &CancelToken::never()).await.unwrap();

    let frames = d.transport().frames();
    assert_eq!(frames.len(), 2);
    assert!(frames[0].at.duration_since(start) >= Duration::from_millis(250));
    assert!(frames[1].at.duration_since(start) >= Duration::from_millis(500));
}

// ============================================================================
// Encoding
// ============================================================================

#[tokio::test(start_paused = true)]
async fn negative_address_inverts_the_position() {
    let d = dispatcher(MockTransport::new());
    let outcome = d.dispatch_point(straight(40), &CancelToken::never()).await;
    assert_eq!(outcome.unwrap(), PointOutcome::Set);
    assert_eq!(d.transport().decoded(), vec![(12, Closed), (34, Thrown)]);
}

#[tokio::test(start_paused = true)]
async fn route_sets_points_then_locks() {
    let d = dispatcher(MockTransport::new());
    d.dispatch_route(main_route(), &CancelToken::never()).await.unwrap();
    assert_eq!(
        d.transport().decoded(),
        vec![(12, Closed), (30, Closed), (130, Closed)]
    );
    assert_eq!(d.active_routes().len(), 1);
    assert_eq!(d.point_position(30, None), Some(PointPosition::Straight));
}

#[tokio::test(start_paused = true)]
async fn signal_chain_uses_the_defined_route() {
    let d = dispatcher(MockTransport::new());
    let typed = TrainRouteCommand::new(64, 72, TrainRouteState::SetMain);
    assert_eq!(d.dispatch_route(typed, &CancelToken::never()).await.unwrap(), RouteOutcome::Set);
    assert_eq!(
        d.transport().decoded(),
        vec![(12, Closed), (30, Closed), (130, Closed)]
    );
    assert_eq!(d.active_routes()[0].point_commands.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn composite_route_joins_its_legs() {
    let topology = yard()
        .with_signal(SignalDefinition::new("70", at(2, 5), 70))
        .with_route(RouteDefinition::new(60, 70).with_point("27", PointPosition::Diverging))
        .with_route(RouteDefinition::new(70, 80).with_point("30", PointPosition::Diverging));
    let d = Dispatcher::new(MockTransport::new(), topology);
    let typed = TrainRouteCommand::new(60, 80, TrainRouteState::SetShunting).with_intermediate_signals([70]);

    assert_eq!(d.dispatch_route(typed, &CancelToken::never()).await.unwrap(), RouteOutcome::Set);
    assert_eq!(
        d.transport().decoded(),
        vec![(13, Thrown), (31, Thrown), (131, Closed)]
    );
    assert_eq!(d.point_position(27, None), Some(PointPosition::Diverging));
}

#[tokio::test(start_paused = true)]
async fn undefined_leg_is_rejected() {
    let d = dispatcher(MockTransport::new());
    let typed = TrainRouteCommand::new(64, 80, TrainRouteState::SetMain);
    assert_eq!(
        d.dispatch_route(typed, &CancelToken::never()).await.unwrap(),
        RouteOutcome::Rejected {
            reason: RejectReason::UnknownRoute {
                from_signal: 64,
                to_signal: 80
            }
        }
    );
    assert_eq!(d.transport().frame_count(), 0);
    assert!(d.active_routes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unencodable_address_sends_nothing() {
    let d = dispatcher(MockTransport::new());
    let mut rx = d.subscribe();

    let err = d.dispatch_point(straight(50), &CancelToken::never()).await.unwrap_err();
    assert!(matches!(err, DispatchError::Protocol(ProtocolError::AddressOutOfRange(5000))));
    assert_eq!(d.transport().frame_count(), 0);
    assert!(matches!(
        drain(&mut rx).as_slice(),
        [Notification::Point {
            number: 50,
            outcome: PointOutcome::Rejected {
                reason: RejectReason::Protocol(_)
            }
        }]
    ));
}

// ============================================================================
// Conflicts
// ============================================================================

#[tokio::test(start_paused = true)]
async fn conflicting_route_is_rejected_before_transmission() {
    let d = dispatcher(MockTransport::new());
    let never = CancelToken::never();
    let active = TrainRouteCommand::new(60, 80, TrainRouteState::SetMain).with_point(diverging(27));
    d.dispatch_route(active, &never).await.unwrap();
    d.transport().reset();

    let wanted = TrainRouteCommand::new(64, 72, TrainRouteState::SetMain).with_point(straight(27));
    let outcome = d.dispatch_route(wanted, &never).await.unwrap();

    assert_eq!(
        outcome,
        RouteOutcome::Rejected {
            reason: RejectReason::ConflictsWith {
                from_signal: 60,
                to_signal: 80,
                point: 27,
            }
        }
    );
    assert_eq!(d.transport().frame_count(), 0);
    assert_eq!(d.active_routes().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn same_route_twice_is_already_active() {
    let d = dispatcher(MockTransport::new());
    let never = CancelToken::never();
    d.dispatch_route(main_route(), &never).await.unwrap();
    let again = d.dispatch_route(main_route(), &never).await.unwrap();
    assert_eq!(
        again,
        RouteOutcome::Rejected {
            reason: RejectReason::AlreadyActive
        }
    );
    assert_eq!(d.transport().frame_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn point_held_by_route_is_locked() {
    let d = dispatcher(MockTransport::new());
    let never = CancelToken::never();
    d.dispatch_route(main_route(), &never).await.unwrap();
    d.transport().reset();

    let outcome = d.dispatch_point(diverging(27), &never).await.unwrap();
    assert_eq!(outcome, PointOutcome::Locked);
    assert_eq!(d.transport().frame_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_conflicting_routes_admit_one() {
    let d = dispatcher(MockTransport::new());
    let never = CancelToken::never();
    let a = TrainRouteCommand::new(64, 72, TrainRouteState::SetMain).with_point(straight(27));
    let b = TrainRouteCommand::new(60, 80, TrainRouteState::SetMain).with_point(diverging(27));

    let (first, second) = tokio::join!(d.dispatch_route(a, &never), d.dispatch_route(b, &never));
    let outcomes = [first.unwrap(), second.unwrap()];

    assert_eq!(outcomes.iter().filter(|o| **o == RouteOutcome::Set).count(), 1);
    assert_eq!(d.active_routes().len(), 1);
    assert_eq!(d.transport().frame_count(), 1);
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn clearing_a_route_unlocks_its_points() {
    let d = dispatcher(MockTransport::new());
    let never = CancelToken::never();
    let mut rx = d.subscribe();
    d.dispatch_route(main_route(), &never).await.unwrap();
    d.transport().reset();

    let clear = TrainRouteCommand::new(0, 72, TrainRouteState::Clear);
    assert_eq!(d.dispatch_route(clear, &never).await.unwrap(), RouteOutcome::Cleared);
    assert_eq!(d.transport().decoded(), vec![(130, Thrown)]);
    assert!(d.active_routes().is_empty());

    let received = drain(&mut rx);
    assert_eq!(
        received.last(),
        Some(&Notification::Route {
            from_signal: 64,
            to_signal: 72,
            outcome: RouteOutcome::Cleared,
        })
    );
}

#[tokio::test(start_paused = true)]
async fn shared_point_stays_locked_until_last_route_goes() {
    let d = dispatcher(MockTransport::new());
    let never = CancelToken::never();
    let other = TrainRouteCommand::new(60, 80, TrainRouteState::SetMain).with_point(straight(30));
    d.dispatch_route(main_route(), &never).await.unwrap();
    d.dispatch_route(other, &never).await.unwrap();
    d.transport().reset();

    let clear = TrainRouteCommand::new(64, 72, TrainRouteState::Cancel);
    d.dispatch_route(clear, &never).await.unwrap();
    assert_eq!(d.transport().frame_count(), 0);

    let outcome = d
        .execute(Command::Control(ControlCommand::ClearAllTrainRoutes), &never)
        .await
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::Route(RouteOutcome::AllCleared));
    assert_eq!(d.transport().decoded(), vec![(130, Thrown)]);
    assert!(d.active_routes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn clearing_an_unknown_route_is_rejected() {
    let d = dispatcher(MockTransport::new());
    let clear = TrainRouteCommand::new(0, 72, TrainRouteState::Clear);
    let outcome = d.dispatch_route(clear, &CancelToken::never()).await.unwrap();
    assert_eq!(
        outcome,
        RouteOutcome::Rejected {
            reason: RejectReason::NotActive
        }
    );
}

// ============================================================================
// Cancellation and transport failure
// ============================================================================

#[tokio::test(start_paused = true)]
async fn cancel_after_two_frames_stops_the_route() {
    let (handle, token) = cancellation();
    let d = dispatcher(MockTransport::new().cancel_after(2, handle));
    let mut rx = d.subscribe();

    let err = d.dispatch_route(main_route(), &token).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.frames_sent(), 2);
    assert_eq!(d.transport().frame_count(), 2);
    assert!(d.active_routes().is_empty());

    assert_eq!(
        drain(&mut rx),
        vec![Notification::Route {
            from_signal: 64,
            to_signal: 72,
            outcome: RouteOutcome::Rejected {
                reason: RejectReason::Cancelled { frames_sent: 2 }
            },
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn cancel_during_the_pause_between_frames() {
    let (handle, token) = cancellation();
    let d = dispatcher(MockTransport::new());

    let (result, ()) = tokio::join!(d.dispatch_route(main_route(), &token), async {
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.cancel();
    });

    let err = result.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.frames_sent(), 1);
    assert_eq!(d.transport().addresses(), vec![12]);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_a_slow_write() {
    let (handle, token) = cancellation();
    let bus = MockTransport::new().with_write_latency(Duration::from_millis(50));
    let d = dispatcher(bus);

    let (result, ()) = tokio::join!(d.dispatch_point(straight(27), &token), async {
        tokio::time::sleep(Duration::from_millis(120)).await;
        handle.cancel();
    });

    assert_eq!(result.unwrap_err().frames_sent(), 0);
    assert_eq!(d.transport().frame_count(), 0);
    assert_eq!(d.point_position(27, None), None);
}

#[tokio::test(start_paused = true)]
async fn transport_failure_is_passed_through() {
    let d = dispatcher(MockTransport::new().fail_at(1));
    let mut rx = d.subscribe();

    let err = d
        .dispatch_route(main_route(), &CancelToken::never())
        .await
        .unwrap_err();
    match err {
        DispatchError::Transport {
            frames_sent,
            source,
        } => {
            assert_eq!(frames_sent, 1);
            assert_eq!(source, MockTransportError::Refused { index: 1 });
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(d.active_routes().is_empty());
    assert_eq!(
        drain(&mut rx),
        vec![Notification::Route {
            from_signal: 64,
            to_signal: 72,
            outcome: RouteOutcome::Rejected {
                reason: RejectReason::TransportFailed("bus refused frame 1".into())
            },
        }]
    );
}

// ============================================================================
// Points, signals, turntable, control
// ============================================================================

#[tokio::test(start_paused = true)]
async fn repeated_point_command_is_already_in_position() {
    let d = dispatcher(MockTransport::new());
    let never = CancelToken::never();
    assert_eq!(d.dispatch_point(straight(27), &never).await.unwrap(), PointOutcome::Set);
    assert_eq!(
        d.dispatch_point(straight(27), &never).await.unwrap(),
        PointOutcome::AlreadyInPosition
    );
    assert_eq!(d.dispatch_point(diverging(27), &never).await.unwrap(), PointOutcome::Set);
    assert_eq!(d.transport().decoded(), vec![(12, Closed), (13, Thrown)]);
}

#[tokio::test(start_paused = true)]
async fn whole_point_is_resent_after_a_sub_point_moves() {
    let topology = Topology::new()
        .with_point(Point::new("27a", &[12]).with_diverging_addresses(&[13]))
        .with_point(Point::new("27b", &[14]).with_diverging_addresses(&[15]));
    let d = Dispatcher::new(MockTransport::new(), topology);
    let never = CancelToken::never();

    assert_eq!(d.dispatch_point(straight(27), &never).await.unwrap(), PointOutcome::Set);
    assert_eq!(d.point_position(27, Some('b')), Some(PointPosition::Straight));
    assert_eq!(
        d.dispatch_point(diverging(27).with_sub_point('a'), &never).await.unwrap(),
        PointOutcome::Set
    );
    assert_eq!(d.dispatch_point(straight(27), &never).await.unwrap(), PointOutcome::Set);
    assert_eq!(
        d.dispatch_point(straight(27), &never).await.unwrap(),
        PointOutcome::AlreadyInPosition
    );
    assert_eq!(
        d.transport().decoded(),
        vec![(12, Closed), (14, Closed), (13, Thrown), (12, Closed), (14, Closed)]
    );
}

#[tokio::test(start_paused = true)]
async fn stop_all_signals_skips_unwired_signals() {
    let d = dispatcher(MockTransport::new());
    let mut rx = d.subscribe();

    let stopped = d.stop_all_signals(&CancelToken::never()).await.unwrap();
    assert_eq!(stopped, 5);
    assert_eq!(
        d.transport().decoded(),
        vec![(64, Thrown), (72, Thrown), (60, Thrown), (80, Thrown)]
    );

    let received = drain(&mut rx);
    assert_eq!(received.len(), 5);
    assert_eq!(
        received[4],
        Notification::SignalStateChanged {
            signal: 90,
            state: SignalState::Stop,
            confirmed_by_bus: false,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn turntable_turns_to_known_tracks_only() {
    let d = dispatcher(MockTransport::new());
    let never = CancelToken::never();
    let to = |track| TurntableCommand {
        track,
        direction: PointPosition::Straight,
    };

    assert_eq!(d.dispatch_turntable(to(3), &never).await.unwrap(), TurntableOutcome::Turned);
    assert_eq!(d.transport().decoded(), vec![(203, Closed)]);

    assert_eq!(
        d.dispatch_turntable(to(9), &never).await.unwrap(),
        TurntableOutcome::Rejected {
            reason: RejectReason::UnknownTurntableTrack(9)
        }
    );
    assert_eq!(d.transport().frame_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn reload_request_and_topology_swap() {
    let d = dispatcher(MockTransport::new());
    let never = CancelToken::never();
    let mut rx = d.subscribe();

    let outcome = d
        .execute(Command::Control(ControlCommand::ReloadConfiguration), &never)
        .await
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::ReloadRequested);
    assert_eq!(drain(&mut rx), vec![Notification::ReloadRequested]);

    d.replace_topology(Topology::new().with_point(Point::new("27", &[99])));
    d.dispatch_point(straight(27), &never).await.unwrap();
    assert_eq!(d.transport().addresses(), vec![99]);
}

// ============================================================================
// Console end to end
// ============================================================================

#[tokio::test(start_paused = true)]
async fn typed_keys_reach_the_bus() {
    let d = Arc::new(dispatcher(MockTransport::new()));
    let mut console = ConsoleInputHandler::new(Arc::clone(&d), MockKeySource::from_text("x27-+3#9"));

    let results = console.poll(&CancelToken::never()).await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(d.transport().decoded(), vec![(13, Thrown), (203, Closed)]);
    assert_eq!(console.pending_entry(), "9");
}

#[tokio::test(start_paused = true)]
async fn typed_route_is_set_and_locked() {
    let d = Arc::new(dispatcher(MockTransport::new()));
    let mut console = ConsoleInputHandler::new(Arc::clone(&d), MockKeySource::from_text("64.72#"));

    let results = console.poll(&CancelToken::never()).await;
    assert!(matches!(
        results.as_slice(),
        [Ok(DispatchOutcome::Route(RouteOutcome::Set))]
    ));
    assert_eq!(
        d.transport().decoded(),
        vec![(12, Closed), (30, Closed), (130, Closed)]
    );

    let mut console = ConsoleInputHandler::new(Arc::clone(&d), MockKeySource::from_text("72/"));
    console.poll(&CancelToken::never()).await;
    assert!(d.active_routes().is_empty());
    assert_eq!(d.transport().decoded().last(), Some(&(130, Thrown)));
}
