//! A practice session: one score, one player, one position.
//!
//! The session builds every component once from a score and a config and
//! passes them to each other by reference. It owns the playback position
//! (a [`StepCursor`]) and is the only caller of the note matcher, the loop
//! controller and the scheduler.
//!
//! Without auto-advance, a correct answer moves to the next step. With
//! auto-advance, the scheduler moves on in tempo whatever the player does.

use std::path::Path;

use log::{debug, info, warn};

use crate::clock::{AudioClock, Clock};
use crate::config::EngineConfig;
use crate::context::MusicalContextMap;
use crate::cursor::{ScoreCursor, StepCursor};
use crate::error::PracticeError;
use crate::form::{FormResolver, NextMeasure};
use crate::looping::{LoopController, MeasureNavigator, RepeatLoopSnapshot};
use crate::matcher::{MatchResult, NoteMatcher, PracticeEvent, PracticeState, PracticeStatus};
use crate::model::Score;
use crate::scheduler::TempoScheduler;
use crate::seek::{SeekGate, SeekTicket};
use crate::tempo::{extract_tempo, TempoInfo};
use crate::timeline::{Step, Timeline};

/// Timer payload; stale once the session has moved since scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AdvanceTimer {
    generation: u64,
}

/// Lets the loop controller move the session's cursor.
struct CursorNavigator<'a> {
    timeline: &'a Timeline,
    cursor: &'a mut StepCursor,
}

impl MeasureNavigator for CursorNavigator<'_> {
    fn jump_to_measure(&mut self, index: usize) -> Result<bool, PracticeError> {
        self.timeline.seek_to_measure(index, Some(&mut *self.cursor))?;
        Ok(true)
    }

    fn current_measure(&self) -> usize {
        self.cursor.current_measure()
    }
}

pub struct PracticeSession<C: Clock + Clone> {
    score: Score,
    timeline: Timeline,
    form: FormResolver,
    matcher: NoteMatcher,
    looper: LoopController<C>,
    scheduler: TempoScheduler<C, AdvanceTimer>,
    seeks: SeekGate,
    cursor: StepCursor,
    running: bool,
    auto_advance: bool,
    follow_form: bool,
    advance_generation: u64,
}

impl<C: Clock + Clone> PracticeSession<C> {
    pub fn new(
        score: Score,
        config: EngineConfig,
        clock: C,
        audio_clock: Option<Box<dyn AudioClock>>,
    ) -> Self {
        let timeline = Timeline::from_score(&score, config.timeline.clone());
        let form = FormResolver::from_score(&score, &timeline, config.form.clone());
        let mut scheduler = TempoScheduler::new(config.scheduler.clone(), clock.clone(), audio_clock);
        scheduler.set_tempo(extract_tempo(&score));
        scheduler.set_context(MusicalContextMap::build(&score, &timeline));
        let cursor = StepCursor::new(&timeline);

        info!(
            "session ready: {} measures, {} steps, {} form markings",
            timeline.measure_count(),
            timeline.step_count(),
            form.markings().len()
        );

        Self {
            score,
            looper: LoopController::new(clock, &config.looping),
            timeline,
            form,
            matcher: NoteMatcher::new(),
            scheduler,
            seeks: SeekGate::new(),
            cursor,
            running: false,
            auto_advance: false,
            follow_form: false,
            advance_generation: 0,
        }
    }

    /// Read a .musicxml or .mxl file and build a session from it.
    pub fn open(
        path: &Path,
        config: EngineConfig,
        clock: C,
        audio_clock: Option<Box<dyn AudioClock>>,
    ) -> Result<Self, PracticeError> {
        let score = crate::parse_file(path)?;
        Ok(Self::new(score, config, clock, audio_clock))
    }

    // ─── Lifecycle ───────────────────────────────────────────────────

    /// Begin at the first step. Returns false if the score has nothing to
    /// practice.
    pub fn start(&mut self) -> bool {
        if !self.timeline.can_handle_score() {
            warn!("cannot start: the score produced no playable measures");
            return false;
        }
        self.cursor.reset();
        self.form.reset_traversal();
        self.running = true;
        self.enter_step();
        true
    }

    pub fn stop(&mut self) {
        self.looper.deactivate("session stopped");
        self.seeks.invalidate();
        self.finish();
    }

    fn finish(&mut self) {
        if self.running {
            info!("practice finished");
        }
        self.running = false;
        self.matcher.stop();
        self.scheduler.cancel_all();
        self.advance_generation += 1;
    }

    // ─── Input ───────────────────────────────────────────────────────

    /// A key went down. Evaluates as soon as the fresh keys are enough to
    /// judge the current step.
    pub fn note_on(&mut self, key: u8) -> Option<MatchResult> {
        let wrong_before = self.matcher.status() == PracticeStatus::FeedbackIncorrect
            && matches!(
                self.matcher.state().last_result,
                Some(MatchResult::WrongNotes { .. })
            );
        if wrong_before {
            // A new attempt after wrong notes starts from a clean slate
            self.matcher.retry();
        }
        self.matcher.note_on(key);

        if !self.running {
            return None;
        }
        let step = self.timeline.step(self.cursor.position())?;
        if !self.matcher.evaluation_ready(step) {
            return None;
        }
        self.evaluate()
    }

    pub fn note_off(&mut self, key: u8) {
        self.matcher.note_off(key);
    }

    /// Judge the current step with the keys pressed so far.
    pub fn evaluate(&mut self) -> Option<MatchResult> {
        if !self.running {
            return None;
        }
        let step = self.timeline.step(self.cursor.position())?;
        let result = self.matcher.evaluate(step)?;
        if result.is_correct() && !self.auto_advance {
            self.advance();
        }
        Some(result)
    }

    /// Try the current step again after a wrong answer.
    pub fn retry(&mut self) -> bool {
        self.matcher.retry()
    }

    // ─── Movement ────────────────────────────────────────────────────

    /// Move to the next step, following the form when enabled. Returns the
    /// new step index, or None when the piece is over.
    pub fn advance(&mut self) -> Option<usize> {
        if !self.running {
            return None;
        }
        let before = self.current_measure();

        let Some(next) = self.next_step_index() else {
            return self.reach_end();
        };
        if next == self.cursor.position() + 1 {
            self.cursor.next();
        } else if let Some(measure) = self.timeline.step(next).map(|s| s.measure_index) {
            if let Err(err) = self.timeline.seek_to_measure(measure, Some(&mut self.cursor)) {
                warn!("form jump to measure {} failed: {err}", measure + 1);
                self.finish();
                return None;
            }
        }

        self.after_move(before);
        self.running.then(|| self.cursor.position())
    }

    fn next_step_index(&mut self) -> Option<usize> {
        let position = self.cursor.position();
        let step = self.timeline.step(position)?;
        let next = position + 1;
        let same_measure = self
            .timeline
            .step(next)
            .map_or(false, |s| s.measure_index == step.measure_index);
        if same_measure || !self.follow_form {
            return self.timeline.step(next).map(|_| next);
        }
        match self.form.next_measure(step.measure_index) {
            NextMeasure::Measure(m) => self.timeline.first_step_of_measure(m),
            NextMeasure::End => None,
        }
    }

    /// Out of steps. An active loop may still send playback back.
    fn reach_end(&mut self) -> Option<usize> {
        if self.looper.is_active() {
            let position = self.cursor.position();
            let end = self.timeline.measure_count();
            let mut nav = CursorNavigator {
                timeline: &self.timeline,
                cursor: &mut self.cursor,
            };
            self.looper.on_measure_changed(&self.timeline, &mut nav, end);
            if self.looper.is_active() && self.cursor.position() != position {
                self.enter_step();
                return Some(self.cursor.position());
            }
        }
        self.finish();
        None
    }

    /// Jump to the first step of a measure right away.
    pub fn seek_to_measure(&mut self, index: usize) -> Result<(), PracticeError> {
        self.seeks.invalidate();
        self.apply_seek(index)
    }

    /// Start a seek whose completion the host reports later.
    pub fn request_seek(&mut self, index: usize) -> SeekTicket {
        self.seeks.issue(index)
    }

    /// Apply a requested seek if no newer one was requested since. Returns
    /// false for a stale ticket, which is discarded.
    pub fn complete_seek(&mut self, ticket: SeekTicket) -> Result<bool, PracticeError> {
        if !self.seeks.is_current(&ticket) {
            debug!(
                "discarding stale seek to measure {} (generation {})",
                ticket.target + 1,
                ticket.generation
            );
            return Ok(false);
        }
        self.apply_seek(ticket.target)?;
        Ok(true)
    }

    fn apply_seek(&mut self, index: usize) -> Result<(), PracticeError> {
        let before = self.current_measure();
        self.timeline.seek_to_measure(index, Some(&mut self.cursor))?;
        if self.running {
            self.after_move(before);
        }
        Ok(())
    }

    fn after_move(&mut self, before: Option<usize>) {
        let measure = self.cursor.current_measure();
        if before != Some(measure) && self.looper.is_active() {
            let mut nav = CursorNavigator {
                timeline: &self.timeline,
                cursor: &mut self.cursor,
            };
            self.looper.on_measure_changed(&self.timeline, &mut nav, measure);
        }
        self.enter_step();
    }

    fn enter_step(&mut self) {
        match self.timeline.step(self.cursor.position()) {
            Some(step) => self.matcher.assign_step(step),
            None => {
                self.finish();
                return;
            }
        }
        self.reschedule();
    }

    fn reschedule(&mut self) {
        self.advance_generation += 1;
        self.scheduler.cancel_all();
        if !self.running || !self.auto_advance {
            return;
        }
        if let Some(step) = self.timeline.step(self.cursor.position()) {
            let delay = self.scheduler.compute_delay(step.duration_beats, Some(step.index));
            let generation = self.advance_generation;
            self.scheduler.schedule(delay, AdvanceTimer { generation });
        }
    }

    /// Fire due timers. Returns how many steps playback moved.
    pub fn poll(&mut self) -> usize {
        let mut moved = 0;
        for timer in self.scheduler.poll() {
            if timer.generation != self.advance_generation {
                debug!("ignoring stale advance timer");
                continue;
            }
            if self.advance().is_some() {
                moved += 1;
            }
        }
        moved
    }

    // ─── Settings ────────────────────────────────────────────────────

    pub fn toggle_repeat(&mut self) -> bool {
        let nav = CursorNavigator {
            timeline: &self.timeline,
            cursor: &mut self.cursor,
        };
        self.looper.toggle_repeat(&self.timeline, &nav)
    }

    pub fn set_manual_bpm(&mut self, bpm: Option<f64>) {
        self.scheduler.set_manual_bpm(bpm);
        self.reschedule();
    }

    pub fn set_auto_advance(&mut self, enabled: bool) {
        self.auto_advance = enabled;
        self.reschedule();
    }

    /// Play repeats, D.C./D.S. and codas instead of the written order.
    pub fn set_follow_form(&mut self, enabled: bool) {
        self.follow_form = enabled;
    }

    pub fn set_coda_jump_enabled(&mut self, enabled: bool) {
        self.form.set_coda_jump_enabled(enabled);
    }

    // ─── Queries ─────────────────────────────────────────────────────

    pub fn drain_events(&mut self) -> Vec<PracticeEvent> {
        self.matcher.drain_events()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn state(&self) -> &PracticeState {
        self.matcher.state()
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.timeline.step(self.cursor.position())
    }

    /// Timeline index of the current measure.
    pub fn current_measure(&self) -> Option<usize> {
        self.current_step().map(|s| s.measure_index)
    }

    pub fn loop_snapshot(&self) -> RepeatLoopSnapshot {
        self.looper.snapshot()
    }

    pub fn current_bpm(&self) -> f64 {
        self.scheduler.current_bpm()
    }

    pub fn tempo(&self) -> &TempoInfo {
        self.scheduler.tempo()
    }

    pub fn context(&self) -> Option<&MusicalContextMap> {
        self.scheduler.context()
    }

    pub fn score(&self) -> &Score {
        &self.score
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn form(&self) -> &FormResolver {
        &self.form
    }
}
