//! Musical context of each step, used to give the player breathing room
//! before the next step arrives.

use serde::Serialize;

use crate::config::BreathingRoom;
use crate::model::Score;
use crate::timeline::Timeline;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MusicalContext {
    pub phrase_end: bool,
    pub fermata: bool,
    /// Last step of its measure
    pub barline_end: bool,
    /// Quarter beats of rest directly after this step
    pub trailing_rest_beats: f64,
}

impl MusicalContext {
    /// Extra delay for this step; the strongest context wins.
    pub fn breathing_room_ms(&self, room: &BreathingRoom) -> f64 {
        if self.fermata {
            room.fermata_ms
        } else if self.phrase_end {
            room.phrase_end_ms
        } else if self.barline_end {
            room.barline_end_ms
        } else {
            room.default_ms
        }
    }
}

/// Contexts keyed by timeline step index. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct MusicalContextMap {
    contexts: Vec<MusicalContext>,
}

impl MusicalContextMap {
    pub fn build(score: &Score, timeline: &Timeline) -> Self {
        let steps = timeline.steps();
        let mut contexts = Vec::with_capacity(steps.len());

        // Rest beats directly following each step, accumulated back to front
        let mut trailing = vec![0.0; steps.len()];
        for i in (0..steps.len().saturating_sub(1)).rev() {
            let next = &steps[i + 1];
            if next.is_rest() {
                trailing[i] = next.duration_beats + trailing[i + 1];
            }
        }

        for (i, step) in steps.iter().enumerate() {
            let next = steps.get(i + 1);
            let barline_end = next.map_or(true, |n| n.measure_index != step.measure_index);
            let sectional_end = barline_end && ends_sectionally(score, timeline, step.measure_index);

            let phrase_end = step.marks.breath_mark
                || step.marks.slur_stop
                || next.map_or(true, |n| n.is_rest())
                || sectional_end;

            contexts.push(MusicalContext {
                phrase_end,
                fermata: step.marks.fermata,
                barline_end,
                trailing_rest_beats: trailing[i],
            });
        }

        Self { contexts }
    }

    pub fn get(&self, step: usize) -> Option<&MusicalContext> {
        self.contexts.get(step)
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

/// Whether the measure closes with a double or final barline in any part.
fn ends_sectionally(score: &Score, timeline: &Timeline, measure: usize) -> bool {
    let Some(info) = timeline.measure_info(measure) else {
        return false;
    };
    score
        .parts
        .iter()
        .filter_map(|p| p.measures.get(info.source_index))
        .flat_map(|m| &m.barlines)
        .any(|b| b.is_sectional())
}
