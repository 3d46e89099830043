//! Keystroke grammar tests.
//!
//! Drives [`CommandInterpreter`] one key at a time, the way the console does.

use yard_dispatch::{
    Command, CommandInterpreter, ConsoleConfig, ControlCommand, PointCommand, PointPosition,
    TrainRouteCommand, TrainRouteState, TurntableCommand,
};

fn type_keys(keys: &[char]) -> Vec<Command> {
    let mut interpreter = CommandInterpreter::new();
    keys.iter().filter_map(|&key| interpreter.push(key)).collect()
}

fn only(text: &str) -> Command {
    let mut commands = CommandInterpreter::new().push_str(text);
    assert_eq!(commands.len(), 1, "{text:?} produced {commands:?}");
    commands.remove(0)
}

fn point(text: &str) -> PointCommand {
    match only(text) {
        Command::Point(point) => point,
        other => panic!("{text:?} gave {other:?}"),
    }
}

fn route(text: &str) -> TrainRouteCommand {
    match only(text) {
        Command::TrainRoute(route) => route,
        other => panic!("{text:?} gave {other:?}"),
    }
}

// ============================================================================
// Typed scenarios
// ============================================================================

#[test]
fn keys_2_7_plus_give_on_route_straight_point() {
    let commands = type_keys(&['2', '7', '+']);
    assert_eq!(commands.len(), 1);
    let Command::Point(point) = &commands[0] else {
        panic!("expected a point, got {commands:?}");
    };
    assert_eq!(point.number(), 27);
    assert_eq!(point.position(), PointPosition::Straight);
    assert!(point.is_on_route());
    assert!(point.addresses().is_empty());
}

#[test]
fn keys_64_divider_72_hash_give_main_route() {
    let commands = type_keys(&['6', '4', '.', '7', '2', '#']);
    assert_eq!(commands.len(), 1);
    let Command::TrainRoute(route) = &commands[0] else {
        panic!("expected a route, got {commands:?}");
    };
    assert_eq!(route.from_signal, 64);
    assert_eq!(route.to_signal, 72);
    assert_eq!(route.state, TrainRouteState::SetMain);
    assert!(route.point_commands.is_empty());
}

#[test]
fn nothing_is_emitted_before_the_terminator() {
    let mut interpreter = CommandInterpreter::new();
    for key in ['6', '4', '.', '7', '2'] {
        assert!(interpreter.push(key).is_none());
    }
    assert_eq!(interpreter.buffer(), "64.72");
}

#[test]
fn route_terminators_select_state() {
    assert_eq!(route("64.72*").state, TrainRouteState::SetShunting);
    assert_eq!(route("64.72/").state, TrainRouteState::Clear);
    let clear = route("72/");
    assert_eq!((clear.from_signal, clear.to_signal), (0, 72));
}

#[test]
fn interior_signals_are_kept_in_order() {
    let route = route("64.70.71.72#");
    assert_eq!(route.signal_chain(), vec![64, 70, 71, 72]);
}

#[test]
fn turntable_entries() {
    assert_eq!(
        only("+3#"),
        Command::Turntable(TurntableCommand {
            track: 3,
            direction: PointPosition::Straight,
        })
    );
    assert_eq!(
        only("-12#"),
        Command::Turntable(TurntableCommand {
            track: 12,
            direction: PointPosition::Diverging,
        })
    );
}

#[test]
fn a_session_of_entries() {
    let commands = CommandInterpreter::new().push_str("x27a-64.72#//+3#");
    assert_eq!(commands.len(), 4);
    assert!(matches!(&commands[0], Command::Point(p) if !p.is_on_route() && p.sub_point() == Some('a')));
    assert!(matches!(&commands[1], Command::TrainRoute(r) if r.to_signal == 72));
    assert_eq!(commands[2], Command::Control(ControlCommand::ClearAllTrainRoutes));
    assert!(matches!(&commands[3], Command::Turntable(t) if t.track == 3));
}

// ============================================================================
// Control pairs
// ============================================================================

#[test]
fn control_pairs_emit_exactly_their_command() {
    let cases = [
        ("//", ControlCommand::ClearAllTrainRoutes),
        ("**", ControlCommand::StopAllSignals),
        ("+-", ControlCommand::ReloadConfiguration),
    ];
    for (text, expected) in cases {
        let commands = CommandInterpreter::new().push_str(text);
        assert_eq!(commands, vec![Command::Control(expected)], "{text:?}");
    }
}

#[test]
fn control_pair_leaves_buffer_empty() {
    let mut interpreter = CommandInterpreter::new();
    interpreter.push_str("**");
    assert!(interpreter.buffer().is_empty());
    assert_eq!(point("27-").number(), 27);
}

// ============================================================================
// Point grammar for every number and terminator
// ============================================================================

#[test]
fn point_number_and_position_follow_the_text() {
    for number in [1u32, 7, 27, 130, 2048] {
        for (terminator, position) in [('+', PointPosition::Straight), ('-', PointPosition::Diverging)] {
            for sub_point in [None, Some('a'), Some('b')] {
                let mut text = number.to_string();
                if let Some(letter) = sub_point {
                    text.push(letter);
                }
                text.push(terminator);

                let parsed = point(&text);
                assert_eq!(parsed.number(), number, "{text}");
                assert_eq!(parsed.position(), position, "{text}");
                assert_eq!(parsed.sub_point(), sub_point, "{text}");
                assert!(parsed.is_on_route(), "{text}");
            }
        }
    }
}

#[test]
fn off_route_prefix_in_either_case() {
    for prefix in ['x', 'X'] {
        for terminator in ['+', '-'] {
            let text = format!("{prefix}27{terminator}");
            let parsed = point(&text);
            assert!(!parsed.is_on_route(), "{text}");
            assert_eq!(parsed.number(), 27, "{text}");
        }
    }
}

// ============================================================================
// Configured grammar
// ============================================================================

#[test]
fn configured_divider_and_prefix() {
    let config = ConsoleConfig::default()
        .with_divider(',')
        .with_off_route_prefix('f');
    let mut interpreter = CommandInterpreter::from_config(&config);

    let commands = interpreter.push_str("64,72#f27+");
    assert_eq!(commands.len(), 2);
    assert!(matches!(&commands[0], Command::TrainRoute(r) if (r.from_signal, r.to_signal) == (64, 72)));
    assert!(matches!(&commands[1], Command::Point(p) if !p.is_on_route()));
}
