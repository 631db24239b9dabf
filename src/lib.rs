//! practicelib: step-by-step score practice engine.
//!
//! Loads MusicXML (.musicxml) or compressed MXL (.mxl) scores, flattens them
//! into a timeline of performable steps, checks a player's keys against each
//! step, resolves repeats and D.C./D.S. navigation, loops single measures and
//! auto-advances in tempo.
//!
//! # Example
//! ```no_run
//! use practicelib::{parse_file, EngineConfig, PracticeSession, SystemClock};
//!
//! let score = parse_file("path/to/score.musicxml").unwrap();
//! let mut session = PracticeSession::new(score, EngineConfig::default(), SystemClock::new(), None);
//! session.start();
//! session.note_on(60);
//! for event in session.drain_events() {
//!     println!("{:?} at step {:?}", event.status, event.step);
//! }
//! ```

pub mod clock;
pub mod config;
pub mod context;
pub mod cursor;
pub mod error;
pub mod form;
pub mod looping;
pub mod matcher;
pub mod model;
pub mod mxl;
pub mod parser;
pub mod scheduler;
pub mod seek;
pub mod session;
pub mod tempo;
pub mod timeline;

#[cfg(test)]
mod testutil;

use std::path::Path;

pub use clock::{AudioClock, AudioClockState, Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use context::{MusicalContext, MusicalContextMap};
pub use cursor::{ScoreCursor, StepCursor};
pub use error::{PracticeError, SeekError};
pub use form::{FormResolver, JumpTarget, NextMeasure, RepeatMarking};
pub use looping::{LoopController, MeasureNavigator, RepeatLoopPhase, RepeatLoopSnapshot};
pub use matcher::{compare_notes, MatchResult, NoteMatcher, PracticeEvent, PracticeStatus};
pub use model::*;
pub use mxl::parse_mxl;
pub use parser::parse_musicxml;
pub use scheduler::{TempoScheduler, TimerId};
pub use seek::{SeekGate, SeekTicket};
pub use session::PracticeSession;
pub use tempo::{extract_tempo, TempoInfo};
pub use timeline::{MeasureDescriptor, Step, Timeline};

/// Parse a MusicXML file from a file path.
/// Automatically detects format based on file extension:
/// - `.musicxml` or `.xml` → uncompressed MusicXML
/// - `.mxl` → compressed MXL (ZIP archive)
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Score, PracticeError> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|source| PracticeError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    parse_bytes(&data, path.extension().and_then(|e| e.to_str()))
}

/// Parse MusicXML from raw bytes with an optional format hint.
/// If `extension` is None, tries to auto-detect the format.
pub fn parse_bytes(data: &[u8], extension: Option<&str>) -> Result<Score, PracticeError> {
    match extension {
        Some("mxl") => parse_mxl(data),
        Some("musicxml") | Some("xml") => parse_musicxml(std::str::from_utf8(data)?),
        _ => {
            // Auto-detect: XML text first, then MXL (ZIP)
            if let Ok(xml) = std::str::from_utf8(data) {
                if xml.trim_start().starts_with('<') {
                    return parse_musicxml(xml);
                }
            }
            parse_mxl(data)
        }
    }
}

/// Convert a parsed score to a JSON string.
pub fn score_to_json(score: &Score) -> Result<String, PracticeError> {
    Ok(serde_json::to_string_pretty(score)?)
}
