use log::trace;

use crate::event::{RawInput, TimestampMs};

/// The two signals the rest of the engine consumes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Signal {
    /// A committed string, possibly several characters confirmed at once.
    Confirm { text: String, is_composed: bool },
    Backspace,
}

/// Result of feeding one raw event to the normalizer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Handled {
    pub signal: Option<Signal>,
    /// The platform must not apply its native text-field mutation.
    pub prevent_default: bool,
}

impl Handled {
    fn ignored() -> Self {
        Self::default()
    }

    fn emit(signal: Signal) -> Self {
        Self {
            signal: Some(signal),
            prevent_default: true,
        }
    }
}

/// One committed character, fanned out from a `Confirm` signal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfirmedChar {
    pub ch: char,
    pub is_composed: bool,
    pub at: TimestampMs,
}

/// Fan a confirmed string out into per-character events, left to right.
pub fn confirmed_chars(
    text: &str,
    is_composed: bool,
    at: TimestampMs,
) -> impl Iterator<Item = ConfirmedChar> + '_ {
    text.chars().map(move |ch| ConfirmedChar {
        ch,
        is_composed,
        at,
    })
}

/// Collapses composition/commit/deletion events into `Confirm` and
/// `Backspace` signals. The only state is whether a composition is open.
#[derive(Clone, Debug, Default)]
pub struct ImeNormalizer {
    composing: bool,
}

impl ImeNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_composing(&self) -> bool {
        self.composing
    }

    pub fn handle(&mut self, input: &RawInput) -> Handled {
        match input {
            RawInput::CompositionStart => {
                self.composing = true;
                Handled::ignored()
            }
            RawInput::CompositionEnd => {
                // The commit arrives around composition end; only the flag flips here.
                self.composing = false;
                Handled::ignored()
            }
            RawInput::CompositionText { .. } => {
                trace!("ignoring uncommitted composition text");
                Handled::ignored()
            }
            RawInput::CommitText { data, composing } => match data.as_deref() {
                Some(text) if !text.is_empty() => Handled::emit(Signal::Confirm {
                    text: text.to_string(),
                    is_composed: self.composing || *composing,
                }),
                _ => Handled::ignored(),
            },
            RawInput::DeleteBackward => Handled::emit(Signal::Backspace),
            RawInput::KeyDown { key } => {
                // Inside a composition Backspace edits the candidate, not the session.
                if key == "Backspace" && !self.composing {
                    Handled::emit(Signal::Backspace)
                } else {
                    Handled::ignored()
                }
            }
            RawInput::Unknown => {
                trace!("ignoring unknown input event");
                Handled::ignored()
            }
        }
    }
}
