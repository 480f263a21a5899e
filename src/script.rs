//! Scripted input for headless calibration sessions
//!
//! A script is a plain text file with one event per line:
//!
//! ```text
//! # arm the overlay and drag the top-left corner
//! key F2
//! down 0 0
//! move 12 8
//! up 15 10
//! key s
//! ```
//!
//! Pointer positions are in pixels of the configured viewport. `cancel`
//! aborts the current gesture. Blank lines and `#` comments are ignored.

use thiserror::Error;
use tracing::debug;

use crate::session::{CalibrationSession, Command, Viewport};

#[derive(Debug, Error, PartialEq)]
pub enum ScriptError {
    #[error("line {line}: unknown event {event:?}")]
    UnknownEvent { line: usize, event: String },
    #[error("line {line}: unknown key {key:?}")]
    UnknownKey { line: usize, key: String },
    #[error("line {line}: expected two coordinates")]
    BadPosition { line: usize },
}

/// One input event, as the windowing layer would deliver it
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    Key(Command),
    PointerDown([f32; 2]),
    PointerMove([f32; 2]),
    PointerUp([f32; 2]),
    Cancel,
}

pub fn parse(text: &str) -> Result<Vec<InputEvent>, ScriptError> {
    let mut events = Vec::new();

    for (i, raw) in text.lines().enumerate() {
        let line = i + 1;
        let content = raw.split('#').next().unwrap_or("").trim();
        let mut words = content.split_whitespace();
        let Some(event) = words.next() else {
            continue;
        };

        let parsed = match event {
            "key" => {
                let key = words.next().unwrap_or("");
                let command = Command::from_key(key).ok_or_else(|| ScriptError::UnknownKey {
                    line,
                    key: key.to_string(),
                })?;
                InputEvent::Key(command)
            }
            "down" => InputEvent::PointerDown(position(&mut words, line)?),
            "move" => InputEvent::PointerMove(position(&mut words, line)?),
            "up" => InputEvent::PointerUp(position(&mut words, line)?),
            "cancel" => InputEvent::Cancel,
            other => {
                return Err(ScriptError::UnknownEvent {
                    line,
                    event: other.to_string(),
                })
            }
        };
        events.push(parsed);
    }

    Ok(events)
}

fn position<'a>(
    words: &mut impl Iterator<Item = &'a str>,
    line: usize,
) -> Result<[f32; 2], ScriptError> {
    let mut coord = || {
        words
            .next()
            .and_then(|w| w.parse::<f32>().ok())
            .ok_or(ScriptError::BadPosition { line })
    };
    Ok([coord()?, coord()?])
}

/// Feed events to a session. Pointer positions are converted through `viewport`.
pub fn replay(session: &mut CalibrationSession, events: &[InputEvent], viewport: &Viewport) {
    for event in events {
        let handled = match *event {
            InputEvent::Key(command) => session.on_key_down(command),
            InputEvent::PointerDown([x, y]) => session.on_pointer_down(viewport.to_local(x, y)),
            InputEvent::PointerMove([x, y]) => session.on_pointer_move(viewport.to_local(x, y)),
            InputEvent::PointerUp([x, y]) => session.on_pointer_up(viewport.to_local(x, y)),
            InputEvent::Cancel => {
                session.on_cancel();
                true
            }
        };
        debug!("{:?} handled: {}", event, handled);
    }
}
