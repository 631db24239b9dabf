//! Loop practice: repeat one measure until the player turns the loop off.
//!
//! The controller owns no playback position. It reads the current measure
//! and requests jumps through a [`MeasureNavigator`] supplied on each call,
//! and it learns about movement through [`LoopController::on_measure_changed`].

use log::{debug, info, warn};
use serde::Serialize;

use crate::clock::Clock;
use crate::config::LoopConfig;
use crate::error::PracticeError;
use crate::timeline::Timeline;

/// The host's move primitives.
pub trait MeasureNavigator {
    /// Ask the host to move to `index`. `Ok(false)` means the host refused.
    fn jump_to_measure(&mut self, index: usize) -> Result<bool, PracticeError>;

    fn current_measure(&self) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatLoopPhase {
    #[default]
    Idle,
    Active,
}

/// Live loop state. Exists only while the loop is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepeatLoopState {
    pub target: usize,
    pub cycles: u32,
    /// Last measure reported by the host, for spotting external seeks
    pub last_observed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RepeatLoopSnapshot {
    pub phase: RepeatLoopPhase,
    pub target: Option<usize>,
    pub cycles: u32,
}

#[derive(Debug)]
pub struct LoopController<C: Clock> {
    clock: C,
    debounce_ms: f64,
    last_toggle_ms: Option<f64>,
    state: Option<RepeatLoopState>,
}

impl<C: Clock> LoopController<C> {
    pub fn new(clock: C, config: &LoopConfig) -> Self {
        Self {
            clock,
            debounce_ms: config.toggle_debounce_ms,
            last_toggle_ms: None,
            state: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    pub fn state(&self) -> Option<&RepeatLoopState> {
        self.state.as_ref()
    }

    pub fn snapshot(&self) -> RepeatLoopSnapshot {
        match &self.state {
            Some(s) => RepeatLoopSnapshot {
                phase: RepeatLoopPhase::Active,
                target: Some(s.target),
                cycles: s.cycles,
            },
            None => RepeatLoopSnapshot::default(),
        }
    }

    /// Turn the loop on (at the current measure) or off. Returns whether the
    /// loop is active afterwards.
    ///
    /// Toggles arriving within the debounce window of the last accepted
    /// toggle are ignored.
    pub fn toggle_repeat<N>(&mut self, timeline: &Timeline, nav: &N) -> bool
    where
        N: MeasureNavigator + ?Sized,
    {
        let now = self.clock.now_ms();
        if let Some(last) = self.last_toggle_ms {
            if now - last < self.debounce_ms {
                debug!("ignoring loop toggle {:.1} ms after the last one", now - last);
                return self.is_active();
            }
        }

        if self.state.is_some() {
            self.deactivate("turned off");
        } else {
            if !timeline.can_handle_score() {
                warn!("cannot loop: timeline is not built");
                return false;
            }
            let current = nav.current_measure();
            if current >= timeline.measure_count() {
                warn!("cannot loop: measure {current} is outside the score");
                return false;
            }
            info!("looping measure {}", current + 1);
            self.state = Some(RepeatLoopState {
                target: current,
                cycles: 0,
                last_observed: current,
            });
        }

        self.last_toggle_ms = Some(now);
        self.is_active()
    }

    /// Drop the loop without touching the debounce window.
    pub fn deactivate(&mut self, reason: &str) {
        if let Some(state) = self.state.take() {
            info!(
                "loop on measure {} off after {} cycles: {reason}",
                state.target + 1,
                state.cycles
            );
        }
    }

    /// Host notification: playback is now in measure `current`.
    pub fn on_measure_changed<N>(&mut self, timeline: &Timeline, nav: &mut N, current: usize)
    where
        N: MeasureNavigator + ?Sized,
    {
        let Some(state) = self.state else {
            return;
        };
        if !timeline.can_handle_score() {
            self.deactivate("timeline is no longer available");
            return;
        }

        let RepeatLoopState {
            target,
            last_observed: last,
            ..
        } = state;
        let external = current != last + 1 && current != target && current != last;
        if external {
            if current < target {
                debug!("backward seek to measure {current} while looping");
                self.observe(current);
                return;
            }
            let crosses_target = last < target && target < current;
            if !crosses_target {
                self.deactivate("external seek");
                return;
            }
        }

        if current <= target {
            self.observe(current);
            return;
        }

        if target + 1 >= timeline.measure_count() {
            // Nothing after the target to jump back from
            self.complete_cycle(target);
            return;
        }

        match nav.jump_to_measure(target) {
            Ok(true) => self.complete_cycle(target),
            Ok(false) => {
                warn!("host refused jump to measure {}", target + 1);
                self.deactivate("jump rejected");
            }
            Err(err) => {
                warn!("jump to measure {} failed: {err}", target + 1);
                self.deactivate("jump failed");
            }
        }
    }

    fn observe(&mut self, current: usize) {
        if let Some(state) = self.state.as_mut() {
            state.last_observed = current;
        }
    }

    fn complete_cycle(&mut self, target: usize) {
        if let Some(state) = self.state.as_mut() {
            *state = RepeatLoopState {
                cycles: state.cycles + 1,
                last_observed: target,
                ..*state
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::TimelineLimits;
    use crate::testutil::scale_score;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct FakeNavigator {
        current: usize,
        jumps: Vec<usize>,
        refuse: bool,
        fail: bool,
    }

    impl MeasureNavigator for FakeNavigator {
        fn jump_to_measure(&mut self, index: usize) -> Result<bool, PracticeError> {
            if self.fail {
                return Err(PracticeError::Navigation {
                    measure: index,
                    message: "renderer busy".to_string(),
                });
            }
            if self.refuse {
                return Ok(false);
            }
            self.jumps.push(index);
            self.current = index;
            Ok(true)
        }

        fn current_measure(&self) -> usize {
            self.current
        }
    }

    fn setup(measures: usize) -> (Timeline, ManualClock, LoopController<ManualClock>) {
        let timeline = Timeline::from_score(&scale_score(measures), TimelineLimits::default());
        let clock = ManualClock::new(1000.0);
        let controller = LoopController::new(clock.clone(), &LoopConfig::default());
        (timeline, clock, controller)
    }

    #[test]
    fn loops_back_when_playback_leaves_target() {
        let (timeline, _clock, mut looper) = setup(10);
        let mut nav = FakeNavigator {
            current: 4,
            ..FakeNavigator::default()
        };
        assert!(looper.toggle_repeat(&timeline, &nav));
        looper.on_measure_changed(&timeline, &mut nav, 5);

        assert_eq!(nav.jumps, vec![4]);
        assert_eq!(
            looper.snapshot(),
            RepeatLoopSnapshot {
                phase: RepeatLoopPhase::Active,
                target: Some(4),
                cycles: 1,
            }
        );
        assert_eq!(looper.state().map(|s| s.last_observed), Some(4));
    }

    #[test]
    fn toggles_inside_debounce_window_collapse() {
        let (timeline, clock, mut looper) = setup(4);
        let nav = FakeNavigator::default();
        assert!(looper.toggle_repeat(&timeline, &nav));
        clock.advance(20.0);
        assert!(looper.toggle_repeat(&timeline, &nav));
        assert!(looper.is_active());

        clock.advance(50.0);
        assert!(!looper.toggle_repeat(&timeline, &nav));
    }

    #[test]
    fn refuses_unbuilt_timeline() {
        let timeline = Timeline::new(TimelineLimits::default());
        let mut looper = LoopController::new(ManualClock::new(0.0), &LoopConfig::default());
        assert!(!looper.toggle_repeat(&timeline, &FakeNavigator::default()));
        assert_eq!(looper.snapshot(), RepeatLoopSnapshot::default());
    }

    #[test]
    fn backward_seek_keeps_loop() {
        let (timeline, _clock, mut looper) = setup(10);
        let mut nav = FakeNavigator {
            current: 6,
            ..FakeNavigator::default()
        };
        looper.toggle_repeat(&timeline, &nav);
        looper.on_measure_changed(&timeline, &mut nav, 2);
        assert!(looper.is_active());
        assert_eq!(looper.state().map(|s| s.last_observed), Some(2));

        // Playing on from the earlier measure crosses the target normally
        looper.on_measure_changed(&timeline, &mut nav, 3);
        assert!(looper.is_active());
        assert!(nav.jumps.is_empty());
    }

    #[test]
    fn forward_step_over_target_loops_back() {
        let (timeline, _clock, mut looper) = setup(10);
        let mut nav = FakeNavigator {
            current: 5,
            ..FakeNavigator::default()
        };
        looper.toggle_repeat(&timeline, &nav);
        looper.on_measure_changed(&timeline, &mut nav, 3);
        looper.on_measure_changed(&timeline, &mut nav, 7);
        assert_eq!(nav.jumps, vec![5]);
        assert_eq!(looper.snapshot().cycles, 1);
    }

    #[test]
    fn forward_external_seek_deactivates() {
        let (timeline, _clock, mut looper) = setup(10);
        let mut nav = FakeNavigator {
            current: 2,
            ..FakeNavigator::default()
        };
        looper.toggle_repeat(&timeline, &nav);
        looper.on_measure_changed(&timeline, &mut nav, 7);
        assert!(!looper.is_active());
        assert!(nav.jumps.is_empty());
    }

    #[test]
    fn rejected_or_failed_jump_deactivates() {
        for (refuse, fail) in [(true, false), (false, true)] {
            let (timeline, _clock, mut looper) = setup(10);
            let mut nav = FakeNavigator {
                current: 1,
                refuse,
                fail,
                ..FakeNavigator::default()
            };
            looper.toggle_repeat(&timeline, &nav);
            looper.on_measure_changed(&timeline, &mut nav, 2);
            assert!(!looper.is_active());
        }
    }

    #[test]
    fn last_measure_target_counts_cycles_without_jumping() {
        let (timeline, _clock, mut looper) = setup(3);
        let mut nav = FakeNavigator {
            current: 2,
            ..FakeNavigator::default()
        };
        looper.toggle_repeat(&timeline, &nav);
        looper.on_measure_changed(&timeline, &mut nav, 3);
        assert!(nav.jumps.is_empty());
        assert_eq!(looper.snapshot().cycles, 1);
        assert!(looper.is_active());
    }

    #[test]
    fn staying_on_target_is_not_a_seek() {
        let (timeline, _clock, mut looper) = setup(10);
        let mut nav = FakeNavigator {
            current: 4,
            ..FakeNavigator::default()
        };
        looper.toggle_repeat(&timeline, &nav);
        looper.on_measure_changed(&timeline, &mut nav, 4);
        looper.on_measure_changed(&timeline, &mut nav, 5);
        looper.on_measure_changed(&timeline, &mut nav, 4);
        looper.on_measure_changed(&timeline, &mut nav, 5);
        assert_eq!(nav.jumps, vec![4, 4]);
        assert_eq!(looper.snapshot().cycles, 2);
    }
}
