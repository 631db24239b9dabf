//! Resolve a score's repeat and navigation markings into play order.
//!
//! Markings are collected first and resolved in a second pass, since a
//! D.S. or To Coda can name a sign that only appears later. Targets are
//! integer measure indices into the timeline, never references.
//!
//! Traversal rules:
//! - each marking jumps at most once per traversal, so repeats cannot loop
//!   forever and repeats are not retaken after a D.C./D.S. jump;
//! - Fine only ends the piece after a D.C./D.S. jump;
//! - To Coda is only honored once coda jumps are enabled;
//! - an unresolved marking is inert and playback continues linearly.

use std::collections::{BTreeSet, HashSet};

use log::{debug, error, warn};
use serde::Serialize;

use crate::config::FormConfig;
use crate::model::{Direction, Score};
use crate::timeline::Timeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "state", content = "measure", rename_all = "snake_case")]
pub enum JumpTarget {
    Resolved(usize),
    /// No sign to jump to; the marking is inert.
    Unresolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkingKind {
    RepeatStart,
    RepeatEnd,
    DaCapo,
    DalSegno,
    Coda,
    ToCoda,
    Fine,
    Segno,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RepeatMarking {
    RepeatStart { measure: usize },
    RepeatEnd { measure: usize, target: JumpTarget },
    DaCapo { measure: usize, target: JumpTarget },
    DalSegno { measure: usize, target: JumpTarget },
    Coda { measure: usize },
    ToCoda { measure: usize, target: JumpTarget },
    Fine { measure: usize },
    Segno { measure: usize },
}

impl RepeatMarking {
    /// An unresolved marking of `kind` at `measure`.
    pub fn new(kind: MarkingKind, measure: usize) -> Self {
        let target = JumpTarget::Unresolved;
        match kind {
            MarkingKind::RepeatStart => RepeatMarking::RepeatStart { measure },
            MarkingKind::RepeatEnd => RepeatMarking::RepeatEnd { measure, target },
            MarkingKind::DaCapo => RepeatMarking::DaCapo { measure, target },
            MarkingKind::DalSegno => RepeatMarking::DalSegno { measure, target },
            MarkingKind::Coda => RepeatMarking::Coda { measure },
            MarkingKind::ToCoda => RepeatMarking::ToCoda { measure, target },
            MarkingKind::Fine => RepeatMarking::Fine { measure },
            MarkingKind::Segno => RepeatMarking::Segno { measure },
        }
    }

    pub fn kind(&self) -> MarkingKind {
        match self {
            RepeatMarking::RepeatStart { .. } => MarkingKind::RepeatStart,
            RepeatMarking::RepeatEnd { .. } => MarkingKind::RepeatEnd,
            RepeatMarking::DaCapo { .. } => MarkingKind::DaCapo,
            RepeatMarking::DalSegno { .. } => MarkingKind::DalSegno,
            RepeatMarking::Coda { .. } => MarkingKind::Coda,
            RepeatMarking::ToCoda { .. } => MarkingKind::ToCoda,
            RepeatMarking::Fine { .. } => MarkingKind::Fine,
            RepeatMarking::Segno { .. } => MarkingKind::Segno,
        }
    }

    pub fn measure(&self) -> usize {
        match *self {
            RepeatMarking::RepeatStart { measure }
            | RepeatMarking::RepeatEnd { measure, .. }
            | RepeatMarking::DaCapo { measure, .. }
            | RepeatMarking::DalSegno { measure, .. }
            | RepeatMarking::Coda { measure }
            | RepeatMarking::ToCoda { measure, .. }
            | RepeatMarking::Fine { measure }
            | RepeatMarking::Segno { measure } => measure,
        }
    }

    /// Jump target for jumping markings; None for signs and Fine.
    pub fn target(&self) -> Option<JumpTarget> {
        match *self {
            RepeatMarking::RepeatEnd { target, .. }
            | RepeatMarking::DaCapo { target, .. }
            | RepeatMarking::DalSegno { target, .. }
            | RepeatMarking::ToCoda { target, .. } => Some(target),
            _ => None,
        }
    }

    fn with_target(self, target: JumpTarget) -> Self {
        match self {
            RepeatMarking::RepeatEnd { measure, .. } => RepeatMarking::RepeatEnd { measure, target },
            RepeatMarking::DaCapo { measure, .. } => RepeatMarking::DaCapo { measure, target },
            RepeatMarking::DalSegno { measure, .. } => RepeatMarking::DalSegno { measure, target },
            RepeatMarking::ToCoda { measure, .. } => RepeatMarking::ToCoda { measure, target },
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextMeasure {
    Measure(usize),
    End,
}

/// Per-traversal memory. Grows monotonically until reset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
struct Traversal {
    /// Indices into `FormResolver::markings` that already jumped
    visited: BTreeSet<usize>,
    /// A D.C. or D.S. jump has been taken
    jump_taken: bool,
}

#[derive(Debug, Clone)]
pub struct FormResolver {
    config: FormConfig,
    total_measures: usize,
    /// Resolved, ordered by measure
    markings: Vec<RepeatMarking>,
    coda_jump_enabled: bool,
    traversal: Traversal,
}

impl FormResolver {
    /// Resolve a set of collected markings for a piece of `total_measures`.
    pub fn new(markings: Vec<RepeatMarking>, total_measures: usize, config: FormConfig) -> Self {
        let markings = resolve_markings(markings);
        for m in &markings {
            if m.target() == Some(JumpTarget::Unresolved) {
                warn!(
                    "{:?} at measure {} has no target; playback continues linearly",
                    m.kind(),
                    m.measure()
                );
            }
        }
        Self {
            config,
            total_measures,
            markings,
            coda_jump_enabled: false,
            traversal: Traversal::default(),
        }
    }

    /// Collect markings from the score and resolve them against the
    /// timeline's measure indices.
    pub fn from_score(score: &Score, timeline: &Timeline, config: FormConfig) -> Self {
        Self::new(
            collect_markings(score, timeline),
            timeline.measure_count(),
            config,
        )
    }

    pub fn markings(&self) -> &[RepeatMarking] {
        &self.markings
    }

    pub fn total_measures(&self) -> usize {
        self.total_measures
    }

    /// Honor To Coda from now on (the "second time through" convention).
    pub fn set_coda_jump_enabled(&mut self, enabled: bool) {
        self.coda_jump_enabled = enabled;
    }

    pub fn coda_jump_enabled(&self) -> bool {
        self.coda_jump_enabled
    }

    /// Whether a D.C./D.S. jump was taken in the live traversal.
    pub fn jump_taken(&self) -> bool {
        self.traversal.jump_taken
    }

    /// Forget which markings have jumped; start a fresh traversal.
    pub fn reset_traversal(&mut self) {
        self.traversal = Traversal::default();
    }

    /// Where playback goes after `current`, in the live traversal.
    pub fn next_measure(&mut self, current: usize) -> NextMeasure {
        let mut traversal = std::mem::take(&mut self.traversal);
        let next = self.step(&mut traversal, current, self.total_measures);
        self.traversal = traversal;
        next
    }

    /// The full play order from measure 0, computed on a private traversal
    /// so the live one is untouched.
    ///
    /// Always terminates: it stops at the iteration ceiling, on a repeated
    /// traversal state (when strict detection is on), or on a measure pair
    /// alternating at the end of the piece. The last two log an error and
    /// return the order so far.
    pub fn generate_play_order(&self, total_measures: usize) -> Vec<usize> {
        if total_measures == 0 {
            return Vec::new();
        }

        let mut traversal = Traversal::default();
        let mut seen: HashSet<(usize, Traversal)> = HashSet::new();
        let mut order = vec![0];
        let mut current = 0;

        for _ in 0..self.config.max_iterations {
            let next = match self.step(&mut traversal, current, total_measures) {
                NextMeasure::End => return order,
                NextMeasure::Measure(next) => next,
            };

            if self.config.strict_cycle_detection && !seen.insert((next, traversal.clone())) {
                error!(
                    "play order revisits measure {next} in an identical state; \
                     stopping after {} measures",
                    order.len()
                );
                return order;
            }

            order.push(next);
            current = next;

            if alternates_at_end(&order, total_measures) {
                error!(
                    "play order alternates between the last two measures; \
                     stopping after {} measures",
                    order.len()
                );
                return order;
            }
        }

        error!(
            "play order hit the ceiling of {} iterations; output truncated at {} measures",
            self.config.max_iterations,
            order.len()
        );
        order
    }

    fn coda_active(&self, traversal: &Traversal) -> bool {
        self.coda_jump_enabled || (self.config.coda_after_jump && traversal.jump_taken)
    }

    fn step(&self, traversal: &mut Traversal, current: usize, total: usize) -> NextMeasure {
        if current >= total {
            return NextMeasure::End;
        }

        let here: Vec<(usize, RepeatMarking)> = self
            .markings
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, m)| m.measure() == current)
            .collect();

        if traversal.jump_taken && here.iter().any(|(_, m)| m.kind() == MarkingKind::Fine) {
            debug!("Fine at measure {current}");
            return NextMeasure::End;
        }

        let coda_active = self.coda_active(traversal);
        let precedence = [
            MarkingKind::ToCoda,
            MarkingKind::RepeatEnd,
            MarkingKind::DaCapo,
            MarkingKind::DalSegno,
        ];
        for kind in precedence {
            if kind == MarkingKind::ToCoda && !coda_active {
                continue;
            }
            for (id, marking) in here.iter().filter(|(_, m)| m.kind() == kind) {
                let Some(JumpTarget::Resolved(target)) = marking.target() else {
                    continue;
                };
                if target >= total || !traversal.visited.insert(*id) {
                    continue;
                }
                if matches!(kind, MarkingKind::DaCapo | MarkingKind::DalSegno) {
                    traversal.jump_taken = true;
                }
                debug!("{kind:?} at measure {current} jumps to {target}");
                return NextMeasure::Measure(target);
            }
        }

        if current + 1 < total {
            NextMeasure::Measure(current + 1)
        } else {
            NextMeasure::End
        }
    }
}

/// Heuristic runaway signature: the same two measures, one of them the
/// last, three times in a row at the tail of the order.
fn alternates_at_end(order: &[usize], total: usize) -> bool {
    let n = order.len();
    if n < 6 {
        return false;
    }
    let (a, b) = (order[n - 2], order[n - 1]);
    a != b
        && (a == total - 1 || b == total - 1)
        && order[n - 6..].chunks(2).all(|pair| pair == [a, b])
}

/// Second pass: point every jumping marking at its destination.
pub fn resolve_markings(mut markings: Vec<RepeatMarking>) -> Vec<RepeatMarking> {
    markings.sort_by_key(|m| (m.measure(), m.kind()));
    markings.dedup();

    let measures_of = |kind: MarkingKind| -> Vec<usize> {
        markings
            .iter()
            .filter(|m| m.kind() == kind)
            .map(|m| m.measure())
            .collect()
    };
    let starts = measures_of(MarkingKind::RepeatStart);
    let segnos = measures_of(MarkingKind::Segno);
    let codas = measures_of(MarkingKind::Coda);

    markings
        .iter()
        .map(|m| {
            let at = m.measure();
            let target = match m.kind() {
                MarkingKind::RepeatEnd => nearest_at_or_before(&starts, at),
                MarkingKind::DaCapo => Some(0),
                MarkingKind::DalSegno => nearest_at_or_before(&segnos, at)
                    .or_else(|| nearest_after(&segnos, at))
                    .or(Some(0)),
                MarkingKind::ToCoda => {
                    nearest_after(&codas, at).or_else(|| nearest_at_or_before(&codas, at))
                }
                _ => return *m,
            };
            m.with_target(target.map_or(JumpTarget::Unresolved, JumpTarget::Resolved))
        })
        .collect()
}

fn nearest_at_or_before(sorted: &[usize], at: usize) -> Option<usize> {
    sorted.iter().rev().find(|&&m| m <= at).copied()
}

fn nearest_after(sorted: &[usize], at: usize) -> Option<usize> {
    sorted.iter().find(|&&m| m > at).copied()
}

// ─── Collection ──────────────────────────────────────────────────────

/// First pass: read markings from every part, in timeline measure indices.
/// Markings on measures the timeline skipped are dropped.
pub fn collect_markings(score: &Score, timeline: &Timeline) -> Vec<RepeatMarking> {
    let mut found: BTreeSet<(usize, MarkingKind)> = BTreeSet::new();

    for part in &score.parts {
        for (source_index, measure) in part.measures.iter().enumerate() {
            let kinds = measure_marking_kinds(measure);
            if kinds.is_empty() {
                continue;
            }
            match timeline.index_of_source_measure(source_index) {
                Some(index) => found.extend(kinds.into_iter().map(|k| (index, k))),
                None => debug!("dropping markings on skipped measure {source_index}"),
            }
        }
    }

    found
        .into_iter()
        .map(|(measure, kind)| RepeatMarking::new(kind, measure))
        .collect()
}

fn measure_marking_kinds(measure: &crate::model::Measure) -> Vec<MarkingKind> {
    let mut kinds = Vec::new();
    for bl in &measure.barlines {
        if bl.is_forward_repeat() {
            kinds.push(MarkingKind::RepeatStart);
        }
        if bl.is_backward_repeat() {
            kinds.push(MarkingKind::RepeatEnd);
        }
    }
    for dir in &measure.directions {
        kinds.extend(direction_marking_kinds(dir));
    }
    kinds
}

fn direction_marking_kinds(dir: &Direction) -> Vec<MarkingKind> {
    let words = dir.words.as_deref().map(str::to_lowercase).unwrap_or_default();
    let says_dc = words.contains("d.c.") || words.contains("da capo");
    let says_ds = words.contains("d.s.") || words.contains("dal segno");
    let says_to_coda = words.contains("to coda");
    // "D.S. al Fine" is the jump, not the Fine itself
    let says_fine = words.contains("fine") && !says_dc && !says_ds;

    let mut kinds = Vec::new();
    if dir.segno {
        kinds.push(MarkingKind::Segno);
    }
    if dir.sound_tocoda || says_to_coda {
        kinds.push(MarkingKind::ToCoda);
    } else if dir.coda {
        kinds.push(MarkingKind::Coda);
    }
    if dir.sound_dacapo || says_dc {
        kinds.push(MarkingKind::DaCapo);
    }
    if dir.sound_dalsegno || says_ds {
        kinds.push(MarkingKind::DalSegno);
    }
    if dir.sound_fine || says_fine {
        kinds.push(MarkingKind::Fine);
    }
    kinds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimelineLimits;
    use crate::model::{Barline, Repeat};
    use crate::testutil::scale_score;
    use pretty_assertions::assert_eq;

    fn resolver(markings: &[(MarkingKind, usize)], total: usize) -> FormResolver {
        let markings = markings
            .iter()
            .map(|&(kind, measure)| RepeatMarking::new(kind, measure))
            .collect();
        FormResolver::new(markings, total, FormConfig::default())
    }

    use MarkingKind::*;

    #[test]
    fn linear_without_markings() {
        let r = resolver(&[], 4);
        assert_eq!(r.generate_play_order(4), vec![0, 1, 2, 3]);
        assert_eq!(r.generate_play_order(0), Vec::<usize>::new());
    }

    #[test]
    fn simple_repeat_plays_twice() {
        let r = resolver(&[(RepeatStart, 1), (RepeatEnd, 2)], 4);
        assert_eq!(r.generate_play_order(4), vec![0, 1, 2, 1, 2, 3]);
    }

    #[test]
    fn unresolved_repeat_end_continues_linearly() {
        let mut r = resolver(&[(RepeatEnd, 8)], 10);
        assert_eq!(
            r.markings(),
            &[RepeatMarking::RepeatEnd {
                measure: 8,
                target: JumpTarget::Unresolved
            }]
        );
        assert_eq!(r.next_measure(8), NextMeasure::Measure(9));
        assert_eq!(r.next_measure(9), NextMeasure::End);
    }

    #[test]
    fn repeat_end_uses_nearest_preceding_start() {
        let r = resolver(&[(RepeatStart, 0), (RepeatStart, 3), (RepeatEnd, 5)], 6);
        assert_eq!(
            r.markings()[2],
            RepeatMarking::RepeatEnd {
                measure: 5,
                target: JumpTarget::Resolved(3)
            }
        );
    }

    #[test]
    fn da_capo_al_fine() {
        let r = resolver(&[(Fine, 1), (DaCapo, 3)], 4);
        assert_eq!(r.generate_play_order(4), vec![0, 1, 2, 3, 0, 1]);
    }

    #[test]
    fn fine_is_inert_before_a_jump() {
        let r = resolver(&[(Fine, 1)], 3);
        assert_eq!(r.generate_play_order(3), vec![0, 1, 2]);
    }

    #[test]
    fn dal_segno_resolves_to_segno_even_if_later() {
        let r = resolver(&[(DalSegno, 1), (Segno, 3)], 5);
        assert_eq!(r.markings()[0].target(), Some(JumpTarget::Resolved(3)));

        let no_segno = resolver(&[(DalSegno, 2)], 3);
        assert_eq!(no_segno.markings()[0].target(), Some(JumpTarget::Resolved(0)));
    }

    #[test]
    fn dal_segno_al_coda() {
        // 0 1[segno] 2[to coda] 3[D.S.] 4[coda] 5
        let markings = vec![
            RepeatMarking::new(Segno, 1),
            RepeatMarking::new(ToCoda, 2),
            RepeatMarking::new(DalSegno, 3),
            RepeatMarking::new(Coda, 4),
        ];
        let config = FormConfig {
            coda_after_jump: true,
            ..FormConfig::default()
        };
        let r = FormResolver::new(markings, 6, config);
        assert_eq!(r.generate_play_order(6), vec![0, 1, 2, 3, 1, 2, 4, 5]);
    }

    #[test]
    fn to_coda_is_inert_by_default_even_after_da_capo() {
        let r = resolver(&[(ToCoda, 0), (DaCapo, 2), (Coda, 3)], 4);
        assert!(!r.coda_jump_enabled());
        assert_eq!(r.generate_play_order(4), vec![0, 1, 2, 0, 1, 2, 3]);
    }

    #[test]
    fn to_coda_needs_explicit_enable() {
        let markings = vec![
            RepeatMarking::new(ToCoda, 1),
            RepeatMarking::new(Coda, 3),
        ];
        let mut r = FormResolver::new(markings, 4, FormConfig::default());
        assert_eq!(r.next_measure(1), NextMeasure::Measure(2));

        r.set_coda_jump_enabled(true);
        assert_eq!(r.next_measure(1), NextMeasure::Measure(3));
        // Each marking jumps once per traversal
        assert_eq!(r.next_measure(1), NextMeasure::Measure(2));
        r.reset_traversal();
        assert_eq!(r.next_measure(1), NextMeasure::Measure(3));
    }

    #[test]
    fn repeats_are_not_retaken_after_da_capo() {
        let r = resolver(&[(RepeatStart, 0), (RepeatEnd, 1), (DaCapo, 2)], 3);
        assert_eq!(r.generate_play_order(3), vec![0, 1, 0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn live_traversal_is_independent_of_play_order() {
        let mut r = resolver(&[(RepeatStart, 0), (RepeatEnd, 1)], 3);
        assert_eq!(r.next_measure(1), NextMeasure::Measure(0));
        assert_eq!(r.generate_play_order(3), vec![0, 1, 0, 1, 2]);
        assert_eq!(r.next_measure(1), NextMeasure::Measure(2));
        assert!(!r.jump_taken());
    }

    #[test]
    fn cyclic_constructions_terminate() {
        let r = resolver(
            &[
                (DaCapo, 0),
                (DaCapo, 1),
                (RepeatStart, 1),
                (RepeatEnd, 1),
                (DalSegno, 2),
                (Segno, 2),
                (ToCoda, 2),
                (Coda, 0),
                (RepeatEnd, 2),
            ],
            3,
        );
        let order = r.generate_play_order(3);
        assert!(order.len() <= FormConfig::default().max_iterations + 1);
        assert_eq!(order[0], 0);
    }

    #[test]
    fn iteration_ceiling_truncates() {
        let config = FormConfig {
            max_iterations: 3,
            ..FormConfig::default()
        };
        let r = FormResolver::new(Vec::new(), 100, config);
        assert_eq!(r.generate_play_order(100), vec![0, 1, 2, 3]);
    }

    #[test]
    fn alternation_at_last_measure_aborts() {
        // Repeat, D.C. and D.S. all bounce between the last two measures
        let r = resolver(&[(RepeatStart, 0), (RepeatEnd, 1), (DaCapo, 1), (DalSegno, 1)], 2);
        assert_eq!(r.generate_play_order(2), vec![0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn collects_markings_from_score() {
        let mut score = scale_score(4);
        let measures = &mut score.parts[0].measures;
        measures[1].barlines.push(Barline {
            location: "left".to_string(),
            repeat: Some(Repeat {
                direction: "forward".to_string(),
            }),
            ..Barline::default()
        });
        measures[2].barlines.push(Barline {
            location: "right".to_string(),
            repeat: Some(Repeat {
                direction: "backward".to_string(),
            }),
            ..Barline::default()
        });
        measures[0].directions.push(Direction {
            segno: true,
            ..Direction::default()
        });
        measures[1].directions.push(Direction {
            words: Some("Fine".to_string()),
            ..Direction::default()
        });
        measures[3].directions.push(Direction {
            words: Some("D.S. al Fine".to_string()),
            ..Direction::default()
        });

        let timeline = Timeline::from_score(&score, TimelineLimits::default());
        let r = FormResolver::from_score(&score, &timeline, FormConfig::default());
        let kinds: Vec<(MarkingKind, usize)> =
            r.markings().iter().map(|m| (m.kind(), m.measure())).collect();
        assert_eq!(
            kinds,
            vec![
                (Segno, 0),
                (RepeatStart, 1),
                (Fine, 1),
                (RepeatEnd, 2),
                (DalSegno, 3),
            ]
        );
        assert_eq!(
            r.generate_play_order(4),
            vec![0, 1, 2, 1, 2, 3, 0, 1]
        );
    }

    #[test]
    fn to_coda_words_are_not_a_coda_sign() {
        let dir = Direction {
            words: Some("To Coda".to_string()),
            coda: true,
            ..Direction::default()
        };
        assert_eq!(direction_marking_kinds(&dir), vec![ToCoda]);

        let sign = Direction {
            coda: true,
            ..Direction::default()
        };
        assert_eq!(direction_marking_kinds(&sign), vec![Coda]);
    }
}
