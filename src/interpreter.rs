//! Character-by-character command grammar.
//!
//! The console sends one key at a time. [`CommandInterpreter`] buffers keys
//! until a terminator completes an entry, then classifies the buffer:
//!
//! | Entry | Command |
//! |-------|---------|
//! | `+-` | reload configuration |
//! | `//` | clear all train routes |
//! | `**` | stop all signals |
//! | `[x]27[a]+` / `-` | point, straight / diverging (`x` = flank protection) |
//! | `64.72#` / `*` / `/` | route set main / set shunting / clear |
//! | `+3#` / `-3#` | turntable to track 3 |
//! | `<` | discard the current entry |
//!
//! Malformed entries never produce errors. A terminator on a buffer that
//! fits no shape yields no command and clears the buffer; numbers that do
//! not parse become 0 and are left for validation to reject.
//!
//! # Example
//!
//! ```rust
//! use yard_dispatch::{Command, CommandInterpreter, PointPosition};
//!
//! let mut interpreter = CommandInterpreter::new();
//! assert!(interpreter.push('2').is_none());
//! assert!(interpreter.push('7').is_none());
//! match interpreter.push('+') {
//!     Some(Command::Point(point)) => {
//!         assert_eq!(point.number(), 27);
//!         assert_eq!(point.position(), PointPosition::Straight);
//!     }
//!     other => panic!("unexpected {other:?}"),
//! }
//! assert!(interpreter.buffer().is_empty());
//! ```

use heapless::String as HString;
use log::{debug, warn};

use crate::commands::{
    Command, ControlCommand, PointCommand, PointPosition, TrainRouteCommand, TrainRouteState,
    TurntableCommand,
};
use crate::config::ConsoleConfig;

/// Maximum characters in one entry. Further keys are dropped.
pub const MAX_ENTRY_LEN: usize = 32;

/// Key that discards the current entry.
pub const CLEAR_KEY: char = '<';

/// Keystroke-to-command state machine.
///
/// One instance serves one input stream; it is not meant to be fed from
/// several sources at once.
#[derive(Clone, Debug)]
pub struct CommandInterpreter {
    buffer: HString<MAX_ENTRY_LEN>,
    divider: char,
    off_route_prefix: char,
}

impl Default for CommandInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandInterpreter {
    /// Interpreter with `.` as divider and `x` as flank-protection prefix.
    pub fn new() -> Self {
        Self::from_config(&ConsoleConfig::default())
    }

    /// Interpreter using the console settings.
    pub fn from_config(config: &ConsoleConfig) -> Self {
        Self {
            buffer: HString::new(),
            divider: config.divider,
            off_route_prefix: config.off_route_prefix.to_ascii_lowercase(),
        }
    }

    /// Replaces the signal divider.
    pub fn with_divider(mut self, divider: char) -> Self {
        self.divider = divider;
        self
    }

    /// The current, uncommitted entry.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Discards the current entry.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Feeds one key. Returns a command when the key completes an entry.
    pub fn push(&mut self, ch: char) -> Option<Command> {
        if ch == CLEAR_KEY {
            debug!("entry {:?} cleared", self.buffer.as_str());
            self.buffer.clear();
            return None;
        }
        if !self.accepts(ch) {
            debug!("key {ch:?} ignored");
            return None;
        }
        if self.buffer.push(ch).is_err() {
            if is_terminator(ch) {
                warn!("entry {:?} too long, discarded", self.buffer.as_str());
                self.buffer.clear();
            } else {
                debug!("entry full, key {ch:?} dropped");
            }
            return None;
        }
        self.classify()
    }

    /// Feeds several keys; returns every command completed on the way.
    pub fn push_str(&mut self, keys: &str) -> Vec<Command> {
        keys.chars().filter_map(|ch| self.push(ch)).collect()
    }

    fn accepts(&self, ch: char) -> bool {
        ch.is_ascii_alphanumeric() || ch == self.divider || is_terminator(ch)
    }

    fn classify(&mut self) -> Option<Command> {
        let control = match self.buffer.as_str() {
            "+-" => Some(ControlCommand::ReloadConfiguration),
            "//" => Some(ControlCommand::ClearAllTrainRoutes),
            "**" => Some(ControlCommand::StopAllSignals),
            _ => None,
        };
        if let Some(control) = control {
            return self.commit(|_| Some(Command::Control(control)));
        }

        let first = self.buffer.chars().next()?;
        let last = self.buffer.chars().last()?;
        if !is_terminator(last) {
            return None;
        }

        if self.buffer.len() < 2 {
            // A lone sign or route terminator may start a control or
            // turntable entry; a lone `#` cannot.
            if last == '#' {
                self.buffer.clear();
            }
            return None;
        }

        if matches!(first, '+' | '-') && last == '#' {
            return self.commit(|text| TurntableCommand::from_text(text).map(Command::Turntable));
        }

        let off_route_prefix = self.off_route_prefix;
        let divider = self.divider;
        match last {
            '+' | '-' => self.commit(|text| parse_point(text, off_route_prefix).map(Command::Point)),
            '#' | '*' | '/' => self.commit(|text| parse_route(text, divider).map(Command::TrainRoute)),
            _ => None,
        }
    }

    /// Reads then resets the buffer.
    fn commit(&mut self, parse: impl FnOnce(&str) -> Option<Command>) -> Option<Command> {
        let command = parse(self.buffer.as_str());
        match &command {
            Some(cmd) => debug!("entry {:?} -> {cmd:?}", self.buffer.as_str()),
            None => debug!("entry {:?} not recognised", self.buffer.as_str()),
        }
        self.buffer.clear();
        command
    }
}

fn is_terminator(ch: char) -> bool {
    matches!(ch, '+' | '-' | '#' | '*' | '/')
}

/// `[x]digits[letter]` followed by `+` or `-`.
fn parse_point(text: &str, off_route_prefix: char) -> Option<PointCommand> {
    let (body, terminator) = split_terminator(text)?;
    let (on_route, body) = match body.strip_prefix(|c: char| c.to_ascii_lowercase() == off_route_prefix) {
        Some(rest) => (false, rest),
        None => (true, body),
    };

    let digits_end = body
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(body.len());
    let (digits, suffix) = body.split_at(digits_end);
    if digits.is_empty() {
        return None;
    }

    let mut suffix_chars = suffix.chars();
    let sub_point = match (suffix_chars.next(), suffix_chars.next()) {
        (None, _) => None,
        (Some(letter), None) if letter.is_ascii_alphabetic() => Some(letter),
        _ => return None,
    };

    let number = digits.parse().unwrap_or(0);
    let position = PointPosition::from_sign(terminator);
    let command = if on_route {
        PointCommand::new(number, position)
    } else {
        PointCommand::off_route(number, position)
    };
    Some(match sub_point {
        Some(letter) => command.with_sub_point(letter),
        None => command,
    })
}

/// `signal(.signal)*` followed by `#`, `*` or `/`.
fn parse_route(text: &str, divider: char) -> Option<TrainRouteCommand> {
    let (body, terminator) = split_terminator(text)?;
    let well_formed = body.chars().all(|c| c.is_ascii_digit() || c == divider)
        && body.chars().any(|c| c.is_ascii_digit());
    if !well_formed {
        return None;
    }

    let signals: Vec<u32> = body
        .split(divider)
        .map(|part| part.parse().unwrap_or(0))
        .collect();
    let state = TrainRouteState::from_terminator(terminator);
    let route = match signals.as_slice() {
        [to] => TrainRouteCommand::new(0, *to, state),
        [from, middle @ .., to] => TrainRouteCommand::new(*from, *to, state)
            .with_intermediate_signals(middle.iter().copied()),
        [] => return None,
    };
    Some(route)
}

fn split_terminator(text: &str) -> Option<(&str, char)> {
    let terminator = text.chars().last()?;
    Some((&text[..text.len() - terminator.len_utf8()], terminator))
}
