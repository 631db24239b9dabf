//! Tempo extraction.
//!
//! Walks the first part in score order, tracking the tempo in effect at
//! each measure. `<sound tempo>` wins over a `<metronome>` mark in the same
//! direction. Tempo words ("Allegro") are only consulted when the score has
//! no numeric tempo at all.

use log::debug;
use serde::Serialize;

use crate::model::{Direction, Score, TimeSignature};

/// A tempo taking effect at the start of a measure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TempoChange {
    /// Index into `Part.measures`
    pub source_index: usize,
    /// Quarter notes per minute
    pub bpm: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TempoInfo {
    /// First tempo in the score
    pub default_bpm: Option<f64>,
    /// Average over all measures from the first tempo on, weighted by
    /// measure length
    pub average_bpm: Option<f64>,
    pub changes: Vec<TempoChange>,
}

impl TempoInfo {
    /// Tempo in effect at a source measure, if any has been set by then.
    pub fn bpm_at(&self, source_index: usize) -> Option<f64> {
        self.changes
            .iter()
            .take_while(|c| c.source_index <= source_index)
            .last()
            .map(|c| c.bpm)
    }
}

/// Typical tempos for common Italian markings, in quarter BPM.
const TEMPO_WORDS: &[(&str, f64)] = &[
    ("prestissimo", 200.0),
    ("presto", 180.0),
    ("vivace", 160.0),
    ("allegretto", 112.0),
    ("allegro", 132.0),
    ("moderato", 108.0),
    ("andantino", 96.0),
    ("andante", 84.0),
    ("adagio", 70.0),
    ("larghetto", 63.0),
    ("lento", 56.0),
    ("largo", 50.0),
    ("grave", 40.0),
];

pub fn extract_tempo(score: &Score) -> TempoInfo {
    let Some(part) = score.parts.first() else {
        return TempoInfo::default();
    };

    let numeric = |d: &Direction| {
        d.sound_tempo
            .or_else(|| d.metronome.as_ref().map(|m| m.quarter_bpm()))
            .filter(|bpm| *bpm > 0.0)
    };
    let has_numeric = part
        .measures
        .iter()
        .flat_map(|m| &m.directions)
        .any(|d| numeric(d).is_some());

    let mut changes = Vec::new();
    let mut time = TimeSignature::default();
    let mut tempo: Option<f64> = None;
    let mut weighted = 0.0;
    let mut beats = 0.0;

    for (source_index, measure) in part.measures.iter().enumerate() {
        if let Some(ts) = measure.attributes.as_ref().and_then(|a| a.time) {
            time = ts;
        }

        let found = measure.directions.iter().rev().find_map(|d| {
            if has_numeric {
                numeric(d)
            } else {
                d.words.as_deref().and_then(tempo_from_words)
            }
        });
        if let Some(bpm) = found {
            if tempo != Some(bpm) {
                debug!("tempo {bpm} at measure {}", measure.number);
                changes.push(TempoChange { source_index, bpm });
            }
            tempo = Some(bpm);
        }

        if let Some(bpm) = tempo {
            let length = time.quarter_beats();
            weighted += bpm * length;
            beats += length;
        }
    }

    TempoInfo {
        default_bpm: changes.first().map(|c| c.bpm),
        average_bpm: (beats > 0.0).then(|| weighted / beats),
        changes,
    }
}

fn tempo_from_words(words: &str) -> Option<f64> {
    let lower = words.to_lowercase();
    TEMPO_WORDS
        .iter()
        .find(|(word, _)| lower.contains(word))
        .map(|&(_, bpm)| bpm)
}
