//! Tempo-driven timers for auto-advance.
//!
//! Delays come from the tempo and each step's musical context. Timers are
//! polled: the host calls [`TempoScheduler::poll`] from its event loop and
//! receives the payloads of every timer that came due.
//!
//! When the host has a running audio clock, deadlines are kept on it and a
//! timer switches to a short wall-clock timer once it is inside the
//! look-ahead window. A suspended audio clock is resumed if possible;
//! otherwise every timer falls back to the wall clock.

use log::{debug, warn};

use crate::clock::{AudioClock, AudioClockState, Clock};
use crate::config::SchedulerConfig;
use crate::context::MusicalContextMap;
use crate::tempo::TempoInfo;

pub type TimerId = u64;

/// Used when the configured fallback is not a usable tempo.
const DEFAULT_BPM: f64 = 120.0;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Deadline {
    Audio(f64),
    Wall(f64),
}

#[derive(Debug)]
struct Timer<P> {
    id: TimerId,
    deadline: Deadline,
    payload: P,
}

pub struct TempoScheduler<C: Clock, P> {
    config: SchedulerConfig,
    clock: C,
    audio: Option<Box<dyn AudioClock>>,
    tempo: TempoInfo,
    manual_bpm: Option<f64>,
    context: Option<MusicalContextMap>,
    timers: Vec<Timer<P>>,
    next_id: TimerId,
    /// Set while a suspended audio clock could not be resumed
    audio_lost: bool,
}

impl<C: Clock, P> TempoScheduler<C, P> {
    pub fn new(config: SchedulerConfig, clock: C, audio: Option<Box<dyn AudioClock>>) -> Self {
        Self {
            config,
            clock,
            audio,
            tempo: TempoInfo::default(),
            manual_bpm: None,
            context: None,
            timers: Vec::new(),
            next_id: 1,
            audio_lost: false,
        }
    }

    pub fn set_tempo(&mut self, tempo: TempoInfo) {
        self.tempo = tempo;
    }

    pub fn tempo(&self) -> &TempoInfo {
        &self.tempo
    }

    pub fn set_context(&mut self, context: MusicalContextMap) {
        self.context = Some(context);
    }

    pub fn context(&self) -> Option<&MusicalContextMap> {
        self.context.as_ref()
    }

    /// Override the score's tempo. `None` or a non-positive value clears it.
    pub fn set_manual_bpm(&mut self, bpm: Option<f64>) {
        self.manual_bpm = bpm.filter(|b| *b > 0.0);
    }

    pub fn manual_bpm(&self) -> Option<f64> {
        self.manual_bpm
    }

    /// Manual override, then the score's first tempo, then its average,
    /// then the configured fallback. Non-positive or non-finite values are
    /// skipped at every level.
    pub fn current_bpm(&self) -> f64 {
        [
            self.manual_bpm,
            self.tempo.default_bpm,
            self.tempo.average_bpm,
            Some(self.config.fallback_bpm),
        ]
        .into_iter()
        .flatten()
        .find(|bpm| bpm.is_finite() && *bpm > 0.0)
        .unwrap_or(DEFAULT_BPM)
    }

    /// Milliseconds to wait after a step lasting `beats` quarter beats.
    pub fn compute_delay(&self, beats: f64, step: Option<usize>) -> f64 {
        let base = 60_000.0 / self.current_bpm() * beats.max(0.0);
        let room = &self.config.breathing;
        let breathing = match (&self.context, step) {
            (Some(map), Some(step)) => map
                .get(step)
                .map_or(room.default_ms, |c| c.breathing_room_ms(room)),
            _ => room.default_ms,
        };
        (base + breathing).max(self.config.minimum_delay_ms)
    }

    /// Fire `payload` after `delay_ms`.
    pub fn schedule(&mut self, delay_ms: f64, payload: P) -> TimerId {
        let delay_ms = delay_ms.max(0.0);
        let deadline = match self.audio_now() {
            Some(audio_now) => Deadline::Audio(audio_now + delay_ms),
            None => Deadline::Wall(self.clock.now_ms() + delay_ms),
        };
        let id = self.next_id;
        self.next_id += 1;
        self.timers.push(Timer {
            id,
            deadline,
            payload,
        });
        id
    }

    /// Returns whether the timer was still pending.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        let before = self.timers.len();
        self.timers.retain(|t| t.id != id);
        self.timers.len() != before
    }

    pub fn cancel_all(&mut self) {
        self.timers.clear();
    }

    pub fn pending(&self) -> usize {
        self.timers.len()
    }

    /// Payloads of every timer that is due, earliest first.
    pub fn poll(&mut self) -> Vec<P> {
        let audio_now = self.audio_now();
        let wall_now = self.clock.now_ms();
        let lookahead = self.config.lookahead_ms;

        for timer in &mut self.timers {
            if let Deadline::Audio(at) = timer.deadline {
                match audio_now {
                    Some(now) if at - now > lookahead => {}
                    Some(now) => timer.deadline = Deadline::Wall(wall_now + (at - now).max(0.0)),
                    None => {
                        let remaining = self
                            .audio
                            .as_ref()
                            .map_or(0.0, |a| (at - a.current_time_ms()).max(0.0));
                        timer.deadline = Deadline::Wall(wall_now + remaining);
                    }
                }
            }
        }

        let (mut due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.timers)
            .into_iter()
            .partition(|t| matches!(t.deadline, Deadline::Wall(at) if at <= wall_now));
        self.timers = pending;

        due.sort_by(|a, b| {
            let key = |t: &Timer<P>| match t.deadline {
                Deadline::Wall(at) | Deadline::Audio(at) => at,
            };
            key(a).total_cmp(&key(b)).then(a.id.cmp(&b.id))
        });
        if !due.is_empty() {
            debug!("{} timer(s) fired", due.len());
        }
        due.into_iter().map(|t| t.payload).collect()
    }

    /// Audio time if the audio clock is usable, resuming it if needed.
    fn audio_now(&mut self) -> Option<f64> {
        let audio = self.audio.as_mut()?;
        match audio.state() {
            AudioClockState::Running => {
                self.audio_lost = false;
                Some(audio.current_time_ms())
            }
            AudioClockState::Suspended => {
                if audio.resume() {
                    debug!("audio clock resumed");
                    self.audio_lost = false;
                    Some(audio.current_time_ms())
                } else {
                    if !self.audio_lost {
                        warn!("audio clock suspended; timers use the wall clock");
                        self.audio_lost = true;
                    }
                    None
                }
            }
            AudioClockState::Closed => {
                warn!("audio clock closed; timers use the wall clock");
                self.audio = None;
                None
            }
        }
    }
}
