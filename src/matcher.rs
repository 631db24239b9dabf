//! Note matching: compares what the player freshly pressed against the
//! notes a step expects, and tracks the practice status for that step.
//!
//! Keys that are merely still held from an earlier step never count toward
//! the current one. Only note-on events received since the last step
//! transition are "fresh".

use std::collections::{BTreeSet, VecDeque};

use log::{debug, warn};
use serde::Serialize;

use crate::timeline::Step;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PracticeStatus {
    #[default]
    Idle,
    Listening,
    Evaluating,
    FeedbackCorrect,
    FeedbackIncorrect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchResult {
    Correct,
    /// Nothing wrong was played, but these expected notes were not.
    MissingNotes { missing: BTreeSet<u8> },
    /// At least one unexpected note was played.
    WrongNotes {
        wrong: BTreeSet<u8>,
        expected: BTreeSet<u8>,
    },
}

impl MatchResult {
    pub fn is_correct(&self) -> bool {
        matches!(self, MatchResult::Correct)
    }
}

/// Compare freshly pressed keys against a step's expected notes.
///
/// Rests always match. An empty `fresh` set against a non-empty step is
/// `MissingNotes` with every expected note, never `Correct`.
pub fn compare_notes(fresh: &BTreeSet<u8>, step: &Step) -> MatchResult {
    if step.is_rest() {
        return MatchResult::Correct;
    }
    let expected = &step.notes;

    let wrong: BTreeSet<u8> = fresh.difference(expected).copied().collect();
    if !wrong.is_empty() {
        return MatchResult::WrongNotes {
            wrong,
            expected: expected.clone(),
        };
    }

    let missing: BTreeSet<u8> = expected.difference(fresh).copied().collect();
    if missing.is_empty() {
        MatchResult::Correct
    } else {
        MatchResult::MissingNotes { missing }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PracticeState {
    pub status: PracticeStatus,
    pub current_step: Option<usize>,
    pub fresh_keys: BTreeSet<u8>,
    pub last_result: Option<MatchResult>,
    /// Evaluations on the current step; reset on every step change
    pub attempts: u32,
}

/// Published on every status transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PracticeEvent {
    pub status: PracticeStatus,
    pub step: Option<usize>,
    pub result: Option<MatchResult>,
    pub attempts: u32,
}

/// The only mutator of `PracticeState`.
#[derive(Debug, Default)]
pub struct NoteMatcher {
    state: PracticeState,
    held: BTreeSet<u8>,
    events: VecDeque<PracticeEvent>,
}

impl NoteMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &PracticeState {
        &self.state
    }

    pub fn status(&self) -> PracticeStatus {
        self.state.status
    }

    /// Keys physically down right now, fresh or not.
    pub fn held_keys(&self) -> &BTreeSet<u8> {
        &self.held
    }

    pub fn fresh_keys(&self) -> &BTreeSet<u8> {
        &self.state.fresh_keys
    }

    /// Start listening for `step`. Always clears the fresh keys, the last
    /// result and the attempt counter.
    pub fn assign_step(&mut self, step: &Step) {
        self.state.current_step = Some(step.index);
        self.state.fresh_keys.clear();
        self.state.last_result = None;
        self.state.attempts = 0;
        self.transition(PracticeStatus::Listening);
    }

    pub fn note_on(&mut self, key: u8) {
        self.held.insert(key);
        if self.state.status != PracticeStatus::Idle {
            self.state.fresh_keys.insert(key);
        }
    }

    pub fn note_off(&mut self, key: u8) {
        self.held.remove(&key);
    }

    /// Whether the fresh keys are worth judging yet: a wrong key has been
    /// pressed, or as many keys as the step expects.
    pub fn evaluation_ready(&self, step: &Step) -> bool {
        let fresh = &self.state.fresh_keys;
        !fresh.is_subset(&step.notes) || fresh.len() >= step.notes.len()
    }

    /// Judge the fresh keys against `step`, which must be the assigned step.
    pub fn evaluate(&mut self, step: &Step) -> Option<MatchResult> {
        if self.state.status == PracticeStatus::Idle {
            debug!("evaluate ignored: matcher is idle");
            return None;
        }
        if self.state.current_step != Some(step.index) {
            warn!(
                "evaluate for step {} ignored; current step is {:?}",
                step.index, self.state.current_step
            );
            return None;
        }

        self.transition(PracticeStatus::Evaluating);
        let result = compare_notes(&self.state.fresh_keys, step);
        self.state.attempts += 1;
        self.state.last_result = Some(result.clone());
        let status = if result.is_correct() {
            PracticeStatus::FeedbackCorrect
        } else {
            PracticeStatus::FeedbackIncorrect
        };
        self.transition(status);
        Some(result)
    }

    /// After incorrect feedback, listen again on the same step with a clean
    /// slate of fresh keys. The attempt counter is kept.
    pub fn retry(&mut self) -> bool {
        if self.state.status != PracticeStatus::FeedbackIncorrect {
            return false;
        }
        self.state.fresh_keys.clear();
        self.transition(PracticeStatus::Listening);
        true
    }

    /// End the session: back to idle with no step.
    pub fn stop(&mut self) {
        self.state = PracticeState::default();
        self.transition(PracticeStatus::Idle);
    }

    pub fn drain_events(&mut self) -> Vec<PracticeEvent> {
        self.events.drain(..).collect()
    }

    fn transition(&mut self, status: PracticeStatus) {
        self.state.status = status;
        self.events.push_back(PracticeEvent {
            status,
            step: self.state.current_step,
            result: self.state.last_result.clone(),
            attempts: self.state.attempts,
        });
    }
}
