use std::collections::VecDeque;
use std::io::BufRead;

use anyhow::Result;
use log::warn;
use serde::{Deserialize, Serialize};

/// Wall-clock time in epoch milliseconds.
pub type TimestampMs = i64;

/// Raw platform input, before IME normalization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawInput {
    CompositionStart,
    CompositionEnd,
    /// In-progress composition text. Never counted.
    CompositionText {
        #[serde(default)]
        data: String,
    },
    CommitText {
        #[serde(default)]
        data: Option<String>,
        /// Platform-reported "this commit came out of a composition".
        #[serde(default)]
        composing: bool,
    },
    DeleteBackward,
    KeyDown {
        #[serde(default)]
        key: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEvent {
    pub at: TimestampMs,
    pub event: RawInput,
}

impl InputEvent {
    pub fn new(at: TimestampMs, event: RawInput) -> Self {
        Self { at, event }
    }
}

pub enum SessionCommand {
    Input(InputEvent),
    Tick(TimestampMs),
}

/// Single-consumer command queue driving a sprint. Input events are delivered
/// in arrival order with animation-frame ticks interleaved between them.
pub struct CommandQueue {
    pending: VecDeque<SessionCommand>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }

    /// Build a replay queue: ticks every `tick_interval_ms` from the first
    /// event until `tail_ms` after the last one, so trailing timers can fire.
    pub fn replay(events: Vec<InputEvent>, tick_interval_ms: i64, tail_ms: i64) -> Self {
        let mut queue = Self::new();
        let tick_interval_ms = tick_interval_ms.max(1);
        let Some(first) = events.first().map(|e| e.at) else {
            return queue;
        };
        let mut next_tick = first + tick_interval_ms;
        let mut last_at = first;

        for event in events {
            while next_tick < event.at {
                queue.push(SessionCommand::Tick(next_tick));
                next_tick += tick_interval_ms;
            }
            last_at = last_at.max(event.at);
            queue.push(SessionCommand::Input(event));
        }

        let end = last_at + tail_ms.max(0);
        while next_tick <= end {
            queue.push(SessionCommand::Tick(next_tick));
            next_tick += tick_interval_ms;
        }
        queue
    }

    pub fn push(&mut self, command: SessionCommand) {
        self.pending.push_back(command);
    }

    pub fn next(&mut self) -> Option<SessionCommand> {
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a JSON-lines input log. Blank lines are skipped, and so are lines
/// that do not decode as an input event. Only read failures are errors.
pub fn read_input_log<R: BufRead>(reader: R) -> Result<Vec<InputEvent>> {
    let mut events = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<InputEvent>(trimmed) {
            Ok(event) => events.push(event),
            Err(e) => warn!("skipping malformed input event on line {}: {e}", index + 1),
        }
    }
    Ok(events)
}
