//! Keyboard console tying key input to the dispatcher.
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use yard_dispatch::console::ConsoleInputHandler;
//! use yard_dispatch::dispatcher::Dispatcher;
//! use yard_dispatch::hal::{MockKeySource, MockTransport};
//! use yard_dispatch::traits::CancelToken;
//! use yard_dispatch::{Point, Topology};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let topology = Topology::new().with_point(Point::new("27", &[12]));
//! let dispatcher = Arc::new(Dispatcher::new(MockTransport::new(), topology));
//! let mut console = ConsoleInputHandler::new(Arc::clone(&dispatcher), MockKeySource::from_text("27+"));
//!
//! let results = console.poll(&CancelToken::never()).await;
//! assert_eq!(results.len(), 1);
//! assert_eq!(dispatcher.transport().addresses(), vec![12]);
//! # }
//! ```

use std::sync::Arc;

use log::{debug, warn};

use crate::commands::Command;
use crate::config::ConsoleConfig;
use crate::dispatcher::{DispatchOutcome, DispatchResult, Dispatcher};
use crate::interpreter::{CommandInterpreter, CLEAR_KEY};
use crate::traits::{AccessoryTransport, CancelToken, KeyCode, KeyEvent, KeySource};

/// Polls a [`KeySource`], interprets the keys and dispatches every
/// completed command.
pub struct ConsoleInputHandler<K: KeySource, T: AccessoryTransport> {
    dispatcher: Arc<Dispatcher<T>>,
    keys: K,
    interpreter: CommandInterpreter,
}

impl<K: KeySource, T: AccessoryTransport> ConsoleInputHandler<K, T> {
    /// Creates a handler with the default grammar settings.
    pub fn new(dispatcher: Arc<Dispatcher<T>>, keys: K) -> Self {
        Self {
            dispatcher,
            keys,
            interpreter: CommandInterpreter::new(),
        }
    }

    /// Uses the given grammar settings. Discards any half-typed entry.
    pub fn with_config(mut self, config: &ConsoleConfig) -> Self {
        self.interpreter = CommandInterpreter::from_config(config);
        self
    }

    /// Reads every pending key and returns the commands they complete.
    ///
    /// Nothing is dispatched.
    pub fn poll_commands(&mut self) -> Vec<Command> {
        let mut commands = Vec::new();
        while let Some(event) = self.keys.next_key() {
            let Some(ch) = key_char(&event) else {
                debug!("key {event:?} not part of the grammar");
                continue;
            };
            if let Some(command) = self.interpreter.push(ch) {
                commands.push(command);
            }
        }
        commands
    }

    /// Reads every pending key and dispatches the completed commands in
    /// order.
    ///
    /// A failed command does not stop the ones after it; each result is
    /// returned. Once `cancel` has fired, every command that needs frames
    /// fails as cancelled without sending anything.
    pub async fn poll(
        &mut self,
        cancel: &CancelToken,
    ) -> Vec<DispatchResult<DispatchOutcome, T::Error>> {
        let mut results = Vec::new();
        for command in self.poll_commands() {
            let result = self.dispatcher.execute(command, cancel).await;
            if let Err(err) = &result {
                warn!("command failed: {err}");
            }
            results.push(result);
        }
        results
    }

    /// The dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher<T>> {
        &self.dispatcher
    }

    /// The uncommitted entry.
    pub fn pending_entry(&self) -> &str {
        self.interpreter.buffer()
    }

    /// Get a reference to the key source.
    pub fn keys(&self) -> &K {
        &self.keys
    }

    /// Get a mutable reference to the key source.
    pub fn keys_mut(&mut self) -> &mut K {
        &mut self.keys
    }
}

/// Grammar character for a key event, if it has one.
///
/// Control and alt chords are shortcuts and never reach the grammar.
/// Backspace and escape act as the clear key.
pub fn key_char(event: &KeyEvent) -> Option<char> {
    if event.modifiers.is_chord() {
        return None;
    }
    match event.code {
        KeyCode::Char(ch) => Some(ch),
        KeyCode::Backspace | KeyCode::Escape => Some(CLEAR_KEY),
        KeyCode::Enter | KeyCode::Other(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{PointOutcome, PointPosition, RejectReason, RouteOutcome};
    use crate::config::DispatchConfig;
    use crate::hal::{MockKeySource, MockTransport};
    use crate::topology::{Point, Topology};
    use crate::traits::{cancellation, Modifiers};

    fn console(text: &str) -> ConsoleInputHandler<MockKeySource, MockTransport> {
        let topology = Topology::new()
            .with_point(Point::new("27", &[12]).with_diverging_addresses(&[13]))
            .with_turntable_track(3, 203);
        let dispatcher = Dispatcher::new(MockTransport::new(), topology)
            .with_config(DispatchConfig::default().with_frame_delay_ms(0));
        ConsoleInputHandler::new(Arc::new(dispatcher), MockKeySource::from_text(text))
    }

    // =========================================================================
    // Key mapping
    // =========================================================================

    #[test]
    fn chords_and_enter_are_ignored() {
        assert_eq!(key_char(&KeyEvent::char('c').with_modifiers(Modifiers::CONTROL)), None);
        assert_eq!(key_char(&KeyEvent::key(KeyCode::Enter)), None);
        assert_eq!(key_char(&KeyEvent::key(KeyCode::Escape)), Some(CLEAR_KEY));
        assert_eq!(key_char(&KeyEvent::char('7')), Some('7'));
    }

    #[test]
    fn backspace_clears_entry() {
        let mut c = console("64");
        c.keys_mut().queue_key(KeyEvent::key(KeyCode::Backspace));
        c.keys_mut().type_text("27-");
        let commands = c.poll_commands();
        assert_eq!(commands.len(), 1);
        assert!(matches!(&commands[0], Command::Point(p) if p.number() == 27 && p.position() == PointPosition::Diverging));
    }

    #[test]
    fn partial_entry_survives_polls() {
        let mut c = console("2");
        assert!(c.poll_commands().is_empty());
        assert_eq!(c.pending_entry(), "2");
        c.keys_mut().type_text("7+");
        assert_eq!(c.poll_commands().len(), 1);
        assert_eq!(c.pending_entry(), "");
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    #[tokio::test]
    async fn dispatches_in_typing_order() {
        let mut c = console("27-27+");
        let results = c.poll(&CancelToken::never()).await;
        assert_eq!(results.len(), 2);
        assert_eq!(c.dispatcher().transport().addresses(), vec![13, 12]);
    }

    #[tokio::test]
    async fn rejection_is_a_result_not_an_error() {
        let mut c = console("99+");
        let results = c.poll(&CancelToken::never()).await;
        assert!(matches!(
            results.as_slice(),
            [Ok(DispatchOutcome::Point(PointOutcome::Rejected {
                reason: RejectReason::UnknownPoint(99)
            }))]
        ));
    }

    #[tokio::test]
    async fn cancelled_console_sends_nothing() {
        let (handle, token) = cancellation();
        handle.cancel();
        let mut c = console("27+//");
        let results = c.poll(&token).await;
        assert_eq!(results.len(), 2);
        assert!(results[0].as_ref().is_err_and(|e| e.is_cancelled()));
        // clearing with nothing active sends no frame, so it still succeeds
        assert!(matches!(results[1], Ok(DispatchOutcome::Route(RouteOutcome::AllCleared))));
        assert_eq!(c.dispatcher().transport().frame_count(), 0);
    }
}
