//! Data model for a parsed score.
//!
//! This is the hierarchical representation the practice engine consumes:
//! parts → measures → notes, barlines and directions.  It carries only what
//! the timeline, form resolver, musical context and tempo extraction need.

use serde::{Deserialize, Serialize};

/// A complete musical score.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Score {
    /// Title of the piece
    pub title: Option<String>,
    /// Composer name
    pub composer: Option<String>,
    /// MusicXML version (e.g., "3.1", "4.0")
    pub version: Option<String>,
    /// Musical parts (instruments)
    pub parts: Vec<Part>,
}

/// A musical part (one instrument or voice).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Part {
    /// Part identifier (e.g., "P1")
    pub id: String,
    /// Part name (e.g., "Piano")
    pub name: String,
    /// Ordered list of measures
    pub measures: Vec<Measure>,
}

/// A single measure (bar) of music.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Measure {
    /// Measure number as printed
    pub number: i32,
    /// Whether this is an implicit measure (e.g., pickup/anacrusis)
    pub implicit: bool,
    /// Attributes (divisions, time); only present when they change
    pub attributes: Option<Attributes>,
    /// Notes and rests in document order
    pub notes: Vec<Note>,
    /// Barlines (repeat signs, endings, double bars)
    pub barlines: Vec<Barline>,
    /// Directions (tempo, navigation signs, words)
    pub directions: Vec<Direction>,
}

/// Musical attributes that may change at the start of a measure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Attributes {
    /// Divisions per quarter note
    pub divisions: Option<i32>,
    /// Time signature
    pub time: Option<TimeSignature>,
}

/// Time signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    /// Numerator (e.g., 3 in 3/4)
    pub beats: i32,
    /// Denominator (e.g., 4 in 3/4)
    pub beat_type: i32,
}

impl TimeSignature {
    /// Length of a full measure in quarter-note beats.
    pub fn quarter_beats(&self) -> f64 {
        if self.beat_type <= 0 {
            return 4.0;
        }
        self.beats as f64 / self.beat_type as f64 * 4.0
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            beats: 4,
            beat_type: 4,
        }
    }
}

/// A single note or rest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Note {
    /// Pitch (None if this is a rest)
    pub pitch: Option<Pitch>,
    /// Duration in divisions
    pub duration: i32,
    /// Voice number (for multi-voice writing)
    pub voice: Option<i32>,
    /// Staff number (1-based; for multi-staff parts like piano)
    pub staff: Option<i32>,
    /// Whether this is a rest
    pub rest: bool,
    /// Whether this note sounds together with the previous note
    pub chord: bool,
    /// Grace notes take no time and are never expected from the player
    pub grace: bool,
    /// Starts a tie to a later note of the same pitch
    pub tie_start: bool,
    /// Ends a tie started by an earlier note
    pub tie_stop: bool,
    /// Notated fermata
    pub fermata: bool,
    /// Breath mark or caesura after the note
    pub breath_mark: bool,
    /// A slur ends on this note
    pub slur_stop: bool,
}

impl Note {
    /// A pitched note of the given duration.
    pub fn pitched(pitch: Pitch, duration: i32) -> Self {
        Self {
            pitch: Some(pitch),
            duration,
            ..Self::default()
        }
    }

    /// A rest of the given duration.
    pub fn rest(duration: i32) -> Self {
        Self {
            rest: true,
            duration,
            ..Self::default()
        }
    }

    /// MIDI value of this note, or None for rests and unpitched notes.
    pub fn midi_value(&self) -> Option<u8> {
        if self.rest {
            return None;
        }
        self.pitch.as_ref().map(Pitch::midi_value)
    }
}

/// Pitch of a note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pitch {
    /// Note name: A, B, C, D, E, F, G
    pub step: String,
    /// Octave number (middle C = C4)
    pub octave: i32,
    /// Chromatic alteration: -1.0 = flat, 1.0 = sharp, 0.0 = natural
    pub alter: Option<f64>,
}

impl Pitch {
    pub fn new(step: &str, octave: i32, alter: Option<f64>) -> Self {
        Self {
            step: step.to_string(),
            octave,
            alter,
        }
    }

    /// Convert pitch to MIDI note number.
    /// Middle C (C4) = 60.
    pub fn to_midi(&self) -> i32 {
        let step_semitone = match self.step.as_str() {
            "C" => 0,
            "D" => 2,
            "E" => 4,
            "F" => 5,
            "G" => 7,
            "A" => 9,
            "B" => 11,
            _ => 0,
        };
        // Octave and alter come straight from the document; keep the sum in i64
        let alter = self.alter.unwrap_or(0.0).round() as i64;
        let midi = (i64::from(self.octave) + 1) * 12 + step_semitone + alter;
        midi.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
    }

    /// MIDI note number clamped into the 7-bit range.
    pub fn midi_value(&self) -> u8 {
        self.to_midi().clamp(0, 127) as u8
    }
}

/// A barline (may include repeat signs and volta brackets).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Barline {
    /// Location: "left", "right", "middle"
    pub location: String,
    /// Visual style: "regular", "light-light", "light-heavy", etc.
    pub bar_style: Option<String>,
    /// Repeat sign
    pub repeat: Option<Repeat>,
    /// Volta bracket (1st/2nd ending)
    pub ending: Option<Ending>,
}

impl Barline {
    pub fn is_forward_repeat(&self) -> bool {
        self.location == "left"
            && self
                .repeat
                .as_ref()
                .map_or(false, |r| r.direction == "forward")
    }

    pub fn is_backward_repeat(&self) -> bool {
        self.location == "right"
            && self
                .repeat
                .as_ref()
                .map_or(false, |r| r.direction == "backward")
    }

    /// Double or final barline at the end of the measure.
    pub fn is_sectional(&self) -> bool {
        self.location == "right"
            && matches!(
                self.bar_style.as_deref(),
                Some("light-light") | Some("light-heavy") | Some("heavy-heavy")
            )
    }
}

/// A repeat sign on a barline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repeat {
    /// "forward" or "backward"
    pub direction: String,
}

/// A volta bracket (1st/2nd ending).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ending {
    /// Ending number(s), e.g., "1", "2", "1, 2"
    pub number: String,
    /// "start", "stop", or "discontinue"
    pub ending_type: String,
}

/// A direction: tempo, navigation sign or free text attached to a measure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Direction {
    /// Words text (e.g., "D.S. al Coda", "Allegro")
    pub words: Option<String>,
    /// Segno sign
    pub segno: bool,
    /// Coda sign
    pub coda: bool,
    /// Metronome marking
    pub metronome: Option<MetronomeMark>,
    /// `<sound tempo="...">` in quarter notes per minute
    pub sound_tempo: Option<f64>,
    pub sound_dacapo: bool,
    pub sound_dalsegno: bool,
    pub sound_fine: bool,
    pub sound_tocoda: bool,
}

/// A metronome marking such as "♩ = 96".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetronomeMark {
    /// Beat unit: "quarter", "half", "eighth", ...
    pub beat_unit: String,
    /// Beats per minute in the beat unit
    pub per_minute: f64,
    /// Dotted beat unit
    pub dotted: bool,
}

impl MetronomeMark {
    /// Tempo expressed in quarter notes per minute.
    pub fn quarter_bpm(&self) -> f64 {
        let unit = match self.beat_unit.as_str() {
            "whole" => 4.0,
            "half" => 2.0,
            "eighth" => 0.5,
            "16th" => 0.25,
            _ => 1.0,
        };
        let unit = if self.dotted { unit * 1.5 } else { unit };
        self.per_minute * unit
    }
}

impl Score {
    /// Create a new empty score.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of measures (taken from the first part).
    pub fn measure_count(&self) -> usize {
        self.parts.first().map_or(0, |p| p.measures.len())
    }
}

impl Measure {
    pub fn new(number: i32) -> Self {
        Self {
            number,
            ..Self::default()
        }
    }
}
