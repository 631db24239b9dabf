//! Flatten a score into an indexable sequence of performable steps.
//!
//! A step is everything that starts sounding at one point in the score,
//! across all parts: a single note, a chord, or a rest. The timeline is
//! built once per score load and is read-only afterwards. Repeats are NOT
//! expanded here: the step sequence is always in written order and the
//! form resolver decides play order separately.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use log::{debug, warn};
use serde::Serialize;

use crate::config::TimelineLimits;
use crate::cursor::ScoreCursor;
use crate::error::SeekError;
use crate::model::{Measure, Score, TimeSignature};

/// Onsets are quantized to 1/10080 of a quarter note, which is exact for
/// every common tuplet up to septuplets nested inside triplets.
const ONSET_GRID: f64 = 10_080.0;

/// Notation attached to a step's onsets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StepMarks {
    pub fermata: bool,
    pub breath_mark: bool,
    pub slur_stop: bool,
}

/// One performable unit: the set of MIDI values that start together.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    pub index: usize,
    /// Timeline measure index (not the printed measure number)
    pub measure_index: usize,
    /// Expected MIDI values; empty for a rest
    pub notes: BTreeSet<u8>,
    pub chord: bool,
    /// Start position in quarter beats from the beginning of the score
    pub timestamp: Option<f64>,
    /// Time until the next step (or the end of the measure), in quarter beats
    pub duration_beats: f64,
    pub marks: StepMarks,
}

impl Step {
    pub fn new(index: usize, measure_index: usize, notes: impl IntoIterator<Item = u8>) -> Self {
        let notes: BTreeSet<u8> = notes.into_iter().collect();
        Self {
            index,
            measure_index,
            chord: notes.len() > 1,
            notes,
            timestamp: None,
            duration_beats: 1.0,
            marks: StepMarks::default(),
        }
    }

    pub fn is_rest(&self) -> bool {
        self.notes.is_empty()
    }
}

/// A non-empty measure of the score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasureDescriptor {
    /// Dense timeline index
    pub index: usize,
    /// Index of the measure in `Part.measures`
    pub source_index: usize,
    /// First part that contributes notes to this measure
    pub part_index: usize,
    /// Printed measure number
    pub number: i32,
    pub duration_beats: f64,
    pub first_step: usize,
    pub step_count: usize,
}

#[derive(Debug, Clone)]
pub struct Timeline {
    limits: TimelineLimits,
    built: bool,
    truncated: bool,
    has_musical_repeats: bool,
    steps: Vec<Step>,
    measures: Vec<MeasureDescriptor>,
    source_to_index: HashMap<usize, usize>,
}

impl Timeline {
    /// An empty, not-built timeline.
    pub fn new(limits: TimelineLimits) -> Self {
        Self {
            limits,
            built: false,
            truncated: false,
            has_musical_repeats: false,
            steps: Vec::new(),
            measures: Vec::new(),
            source_to_index: HashMap::new(),
        }
    }

    pub fn from_score(score: &Score, limits: TimelineLimits) -> Self {
        let mut timeline = Self::new(limits);
        timeline.build(score);
        timeline
    }

    /// Build from a score. A second call on a built timeline is a no-op;
    /// load a new score with `clear` followed by `build`, or `from_score`.
    pub fn build(&mut self, score: &Score) {
        if self.built {
            debug!("timeline already built; ignoring rebuild");
            return;
        }
        self.clear();

        let mut builder = Builder::new(score, &self.limits);
        builder.run();
        let Builder {
            steps,
            measures,
            truncated,
            ..
        } = builder;

        self.truncated = truncated;
        self.has_musical_repeats = detect_musical_repeats(score);
        self.source_to_index = measures.iter().map(|m| (m.source_index, m.index)).collect();
        self.steps = steps;
        self.measures = measures;
        self.built = !self.measures.is_empty();

        if self.built {
            debug!(
                "timeline built: {} measures, {} steps{}",
                self.measures.len(),
                self.steps.len(),
                if self.has_musical_repeats { ", has repeats" } else { "" }
            );
        } else {
            warn!("score has no usable measures; timeline not built");
        }
    }

    /// Drop everything and return to the not-built state.
    pub fn clear(&mut self) {
        self.built = false;
        self.truncated = false;
        self.has_musical_repeats = false;
        self.steps.clear();
        self.measures.clear();
        self.source_to_index.clear();
    }

    pub fn can_handle_score(&self) -> bool {
        self.built
    }

    /// Whether a step or notes-per-step cap cut the score short.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Repeat barlines, endings or D.C./D.S.-style directions were found.
    /// The step sequence is still linear.
    pub fn has_musical_repeats(&self) -> bool {
        self.has_musical_repeats
    }

    pub fn measure_count(&self) -> usize {
        self.measures.len()
    }

    pub fn measure_info(&self, index: usize) -> Option<&MeasureDescriptor> {
        self.measures.get(index)
    }

    pub fn measures(&self) -> &[MeasureDescriptor] {
        &self.measures
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn steps_in_measure(&self, index: usize) -> &[Step] {
        match self.measures.get(index) {
            Some(m) => &self.steps[m.first_step..m.first_step + m.step_count],
            None => &[],
        }
    }

    pub fn first_step_of_measure(&self, index: usize) -> Option<usize> {
        self.measures.get(index).map(|m| m.first_step)
    }

    pub fn index_of_source_measure(&self, source_index: usize) -> Option<usize> {
        self.source_to_index.get(&source_index).copied()
    }

    /// Move `cursor` to the first step of measure `index`.
    ///
    /// Refuses without touching the cursor when the timeline is not built,
    /// no cursor is given, or the index is out of range. Otherwise the
    /// cursor is reset and stepped forward, since cursors cannot step backward.
    pub fn seek_to_measure(
        &self,
        index: usize,
        cursor: Option<&mut dyn ScoreCursor>,
    ) -> Result<(), SeekError> {
        let cursor = match (self.validate_seek(index, cursor.is_some()), cursor) {
            (Ok(()), Some(cursor)) => cursor,
            (result, _) => {
                let e = result.err().unwrap_or(SeekError::NoCursor);
                warn!("seek to measure {index} refused: {e}");
                return Err(e);
            }
        };

        cursor.reset();
        while !cursor.is_end() && cursor.current_measure() < index {
            cursor.next();
        }
        debug!("cursor seeked to measure {index}");
        Ok(())
    }

    fn validate_seek(&self, index: usize, has_cursor: bool) -> Result<(), SeekError> {
        if !self.built {
            return Err(SeekError::NotBuilt);
        }
        if !has_cursor {
            return Err(SeekError::NoCursor);
        }
        if index >= self.measures.len() {
            return Err(SeekError::OutOfRange {
                index,
                count: self.measures.len(),
            });
        }
        Ok(())
    }
}

// ─── Builder ─────────────────────────────────────────────────────────

/// Running per-part state carried across measures.
#[derive(Default)]
struct PartState {
    divisions: i32,
    time: TimeSignature,
    /// Pitches with a tie started and not yet continued
    open_ties: HashSet<u8>,
}

#[derive(Default)]
struct Slot {
    notes: BTreeSet<u8>,
    rest: bool,
    marks: StepMarks,
}

/// Everything collected from one source measure across all parts.
struct MeasureScan {
    slots: BTreeMap<i64, Slot>,
    /// (start, end) in quarter beats of every pitched note, held or struck
    sounding: Vec<(f64, f64)>,
    has_content: bool,
    part_index: Option<usize>,
    nominal_beats: f64,
    content_beats: f64,
}

struct Builder<'a> {
    score: &'a Score,
    limits: &'a TimelineLimits,
    parts: Vec<PartState>,
    steps: Vec<Step>,
    measures: Vec<MeasureDescriptor>,
    truncated: bool,
    beat_position: f64,
}

impl<'a> Builder<'a> {
    fn new(score: &'a Score, limits: &'a TimelineLimits) -> Self {
        let parts = score
            .parts
            .iter()
            .map(|_| PartState {
                divisions: 1,
                ..PartState::default()
            })
            .collect();
        Self {
            score,
            limits,
            parts,
            steps: Vec::new(),
            measures: Vec::new(),
            truncated: false,
            beat_position: 0.0,
        }
    }

    fn run(&mut self) {
        let source_count = self
            .score
            .parts
            .iter()
            .map(|p| p.measures.len())
            .max()
            .unwrap_or(0);

        for source_index in 0..source_count {
            let scan = self.scan_measure(source_index);
            if !scan.has_content {
                debug!("skipping empty measure {source_index}");
                continue;
            }
            if !self.emit_measure(source_index, scan) {
                break;
            }
        }
    }

    fn scan_measure(&mut self, source_index: usize) -> MeasureScan {
        let mut scan = MeasureScan {
            slots: BTreeMap::new(),
            sounding: Vec::new(),
            has_content: false,
            part_index: None,
            nominal_beats: 0.0,
            content_beats: 0.0,
        };

        let score = self.score;
        for (part_index, part) in score.parts.iter().enumerate() {
            let Some(measure) = part.measures.get(source_index) else {
                continue;
            };
            let state = &mut self.parts[part_index];
            apply_attributes(measure, state);
            if scan.nominal_beats == 0.0 {
                scan.nominal_beats = state.time.quarter_beats();
            }
            scan_part_measure(measure, part_index, state, &mut scan);
        }

        scan
    }

    /// Turn a scanned measure into steps. Returns false once the step cap
    /// has been reached and building must stop.
    fn emit_measure(&mut self, source_index: usize, scan: MeasureScan) -> bool {
        let measure_index = self.measures.len();
        let first_step = self.steps.len();
        let number = self
            .score
            .parts
            .iter()
            .find_map(|p| p.measures.get(source_index))
            .map_or(source_index as i32 + 1, |m| m.number);

        let implicit = self
            .score
            .parts
            .iter()
            .filter_map(|p| p.measures.get(source_index))
            .any(|m| m.implicit);
        let duration_beats = if implicit
            && scan.content_beats > 0.0
            && scan.content_beats < scan.nominal_beats
        {
            scan.content_beats
        } else {
            scan.nominal_beats.max(scan.content_beats)
        };

        // (onset, notes, marks) of the steps this measure will produce
        let mut onsets: Vec<(f64, BTreeSet<u8>, StepMarks)> = Vec::new();
        for (key, slot) in scan.slots {
            let onset = key as f64 / ONSET_GRID;
            if !slot.notes.is_empty() {
                onsets.push((onset, self.cap_notes(slot.notes, number), slot.marks));
            } else if slot.rest && !is_covered(&scan.sounding, onset) {
                onsets.push((onset, BTreeSet::new(), slot.marks));
            }
        }
        if onsets.is_empty() {
            // Only tie continuations: keep the measure reachable with one
            // empty step that auto-advances.
            onsets.push((0.0, BTreeSet::new(), StepMarks::default()));
        }

        let mut stop = false;
        for i in 0..onsets.len() {
            if self.steps.len() >= self.limits.max_steps {
                warn!(
                    "step cap of {} reached at measure {number}; truncating score",
                    self.limits.max_steps
                );
                self.truncated = true;
                stop = true;
                break;
            }
            let onset = onsets[i].0;
            let next = onsets.get(i + 1).map_or(duration_beats, |o| o.0);
            let notes = std::mem::take(&mut onsets[i].1);
            self.steps.push(Step {
                index: self.steps.len(),
                measure_index,
                chord: notes.len() > 1,
                notes,
                timestamp: Some(self.beat_position + onset),
                duration_beats: (next - onset).max(0.0),
                marks: onsets[i].2,
            });
        }

        let step_count = self.steps.len() - first_step;
        if step_count > 0 {
            self.measures.push(MeasureDescriptor {
                index: measure_index,
                source_index,
                part_index: scan.part_index.unwrap_or(0),
                number,
                duration_beats,
                first_step,
                step_count,
            });
            self.beat_position += duration_beats;
        }
        !stop
    }

    fn cap_notes(&mut self, notes: BTreeSet<u8>, measure_number: i32) -> BTreeSet<u8> {
        let max = self.limits.max_notes_per_step;
        if notes.len() <= max {
            return notes;
        }
        warn!(
            "{} simultaneous notes in measure {measure_number} exceed the cap of {max}; truncating",
            notes.len()
        );
        self.truncated = true;
        notes.into_iter().take(max).collect()
    }
}

fn apply_attributes(measure: &Measure, state: &mut PartState) {
    if let Some(ref attrs) = measure.attributes {
        if let Some(d) = attrs.divisions.filter(|d| *d > 0) {
            state.divisions = d;
        }
        if let Some(ts) = attrs.time {
            state.time = ts;
        }
    }
}

/// Per-(staff, voice) position tracking: MusicXML lists voices one after
/// another, so each voice keeps its own time cursor within the measure.
fn scan_part_measure(
    measure: &Measure,
    part_index: usize,
    state: &mut PartState,
    scan: &mut MeasureScan,
) {
    type VoiceKey = (i32, i32); // (staff, voice)
    let mut positions: HashMap<VoiceKey, i64> = HashMap::new();
    let mut last_onset: HashMap<VoiceKey, i64> = HashMap::new();
    let divisions = state.divisions.max(1) as f64;

    for note in &measure.notes {
        if note.grace {
            continue;
        }
        scan.has_content = true;

        let vk: VoiceKey = (note.staff.unwrap_or(1), note.voice.unwrap_or(1));
        let pos = positions.entry(vk).or_insert(0);
        let duration = note.duration.max(0) as i64;
        let onset_div = if note.chord {
            last_onset.get(&vk).copied().unwrap_or(*pos)
        } else {
            let onset = *pos;
            last_onset.insert(vk, onset);
            *pos += duration;
            onset
        };

        let start = onset_div as f64 / divisions;
        let end = (onset_div + duration) as f64 / divisions;
        scan.content_beats = scan.content_beats.max(end);
        let key = (start * ONSET_GRID).round() as i64;

        let Some(midi) = note.midi_value() else {
            if note.rest {
                scan.slots.entry(key).or_default().rest = true;
            }
            continue;
        };
        scan.sounding.push((start, end));

        // A tie-stop whose start was opened by an earlier note is a
        // continuation: it sustains, it does not sound again.
        if note.tie_stop && state.open_ties.contains(&midi) {
            if !note.tie_start {
                state.open_ties.remove(&midi);
            }
            continue;
        }
        if note.tie_start {
            state.open_ties.insert(midi);
        }

        let slot = scan.slots.entry(key).or_default();
        slot.notes.insert(midi);
        slot.marks.fermata |= note.fermata;
        slot.marks.breath_mark |= note.breath_mark;
        slot.marks.slur_stop |= note.slur_stop;
        scan.part_index.get_or_insert(part_index);
    }
}

/// A rest is only a step of its own when nothing written earlier is still
/// sounding over it.
fn is_covered(sounding: &[(f64, f64)], at: f64) -> bool {
    let eps = 0.5 / ONSET_GRID;
    sounding
        .iter()
        .any(|&(start, end)| start < at - eps && end > at + eps)
}

/// Best-effort scan for repeat structure anywhere in the score.
pub fn detect_musical_repeats(score: &Score) -> bool {
    score.parts.iter().flat_map(|p| &p.measures).any(|m| {
        m.barlines
            .iter()
            .any(|b| b.repeat.is_some() || b.ending.is_some())
            || m.directions.iter().any(|d| {
                d.segno
                    || d.coda
                    || d.sound_dacapo
                    || d.sound_dalsegno
                    || d.sound_fine
                    || d.sound_tocoda
                    || d.words.as_deref().map_or(false, is_navigation_text)
            })
    })
}

fn is_navigation_text(words: &str) -> bool {
    let lower = words.to_lowercase();
    ["d.c.", "d.s.", "da capo", "dal segno", "fine", "coda"]
        .iter()
        .any(|needle| lower.contains(needle))
}
