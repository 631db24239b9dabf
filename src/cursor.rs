//! Cursor boundary.
//!
//! Renderers expose a forward-only cursor: it can be reset to the start and
//! stepped forward, and it reports which measure it is in. Seeking is always
//! "reset, then step forward until the measure matches".

use crate::timeline::Timeline;

pub trait ScoreCursor {
    /// Move back to the first step of the score.
    fn reset(&mut self);

    /// Advance one step. Has no effect at the end of the score.
    fn next(&mut self);

    /// Timeline measure index the cursor is currently in.
    fn current_measure(&self) -> usize;

    fn is_end(&self) -> bool;
}

/// A cursor over a built timeline's steps, for hosts without a renderer
/// cursor of their own.
#[derive(Debug, Clone)]
pub struct StepCursor {
    step_measures: Vec<usize>,
    position: usize,
}

impl StepCursor {
    pub fn new(timeline: &Timeline) -> Self {
        Self {
            step_measures: timeline.steps().iter().map(|s| s.measure_index).collect(),
            position: 0,
        }
    }

    /// Index of the step under the cursor.
    pub fn position(&self) -> usize {
        self.position
    }
}

impl ScoreCursor for StepCursor {
    fn reset(&mut self) {
        self.position = 0;
    }

    fn next(&mut self) {
        if self.position < self.step_measures.len() {
            self.position += 1;
        }
    }

    fn current_measure(&self) -> usize {
        match self.step_measures.get(self.position) {
            Some(&m) => m,
            // Past the end: one beyond the last measure
            None => self.step_measures.last().map_or(0, |m| m + 1),
        }
    }

    fn is_end(&self) -> bool {
        self.position >= self.step_measures.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimelineLimits;
    use crate::testutil::scale_score;

    #[test]
    fn walks_steps_and_reports_measures() {
        let timeline = Timeline::from_score(&scale_score(2), TimelineLimits::default());
        let mut cursor = StepCursor::new(&timeline);
        assert_eq!(cursor.current_measure(), 0);
        for _ in 0..4 {
            cursor.next();
        }
        assert_eq!(cursor.position(), 4);
        assert_eq!(cursor.current_measure(), 1);
        for _ in 0..10 {
            cursor.next();
        }
        assert!(cursor.is_end());
        assert_eq!(cursor.position(), 8);
        assert_eq!(cursor.current_measure(), 2);
        cursor.reset();
        assert_eq!(cursor.position(), 0);
    }
}
