//! Key input seam.
//!
//! The console reads keys through [`KeySource`], a polling interface in the
//! same spirit as a rotary encoder: ask for the next event, get `None` when
//! nothing is waiting.

/// Abstract key identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum KeyCode {
    /// A printable key.
    Char(char),
    /// Backspace; treated like the clear key.
    Backspace,
    /// Escape; treated like the clear key.
    Escape,
    /// Enter / return.
    Enter,
    /// Anything else, identified by a platform scan code.
    Other(u16),
}

/// Modifier keys held while the key was pressed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Modifiers {
    /// Shift.
    pub shift: bool,
    /// Control.
    pub control: bool,
    /// Alt / option.
    pub alt: bool,
}

impl Modifiers {
    /// No modifier held.
    pub const NONE: Self = Self {
        shift: false,
        control: false,
        alt: false,
    };

    /// Control held.
    pub const CONTROL: Self = Self {
        shift: false,
        control: true,
        alt: false,
    };

    /// True if control or alt is held. Such chords are shortcuts, not input.
    pub const fn is_chord(self) -> bool {
        self.control || self.alt
    }
}

/// One key press.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KeyEvent {
    /// Character produced by the key (`'\0'` if none).
    pub ch: char,
    /// Key identifier.
    pub code: KeyCode,
    /// Held modifiers.
    pub modifiers: Modifiers,
}

impl KeyEvent {
    /// A plain character key.
    pub const fn char(ch: char) -> Self {
        Self {
            ch,
            code: KeyCode::Char(ch),
            modifiers: Modifiers::NONE,
        }
    }

    /// A non-character key.
    pub const fn key(code: KeyCode) -> Self {
        Self {
            ch: '\0',
            code,
            modifiers: Modifiers::NONE,
        }
    }

    /// Replaces the modifiers.
    pub const fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }
}

/// Pollable source of key events. `next_key` must not block.
pub trait KeySource {
    /// The next pending key, or `None` if no key is available.
    fn next_key(&mut self) -> Option<KeyEvent>;
}
