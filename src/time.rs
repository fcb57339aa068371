//! Converts wall-clock frame deltas into a bounded number of fixed size
//! simulation substeps.

use crate::config::ThrottlePolicy;

const DEFAULT_RENDER_STEP_MS: f64 = 1000.0 / 60.0;
const THROTTLE_FRAME_COUNT: u32 = 10;
const RATIO_SMOOTHING: f64 = 0.99;

/// What the host loop tells the regulator each frame.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TimeInputs {
    /// Frame timestamp in milliseconds, monotonic.
    pub now_ms: f64,
    /// Substeps per simulated second.
    pub sim_rate: u32,
    pub do_pause: bool,
    pub do_reset: bool,
}

#[derive(Debug, Clone)]
pub struct TimeRegulator {
    prev_time_ms: f64,
    accumulator_ms: f64,
    estimated_render_step_ms: f64,
    throttling_ratio: f64,
    frames_above_target: u32,
    substep_cap: u32,
    default_cap: u32,
    policy: ThrottlePolicy,
    throttle_events: u64,
}

impl TimeRegulator {
    pub fn new(substep_cap: u32, policy: ThrottlePolicy) -> Self {
        let cap = substep_cap.max(1);
        Self {
            prev_time_ms: 0.0,
            accumulator_ms: 0.0,
            estimated_render_step_ms: DEFAULT_RENDER_STEP_MS,
            throttling_ratio: 1.0,
            frames_above_target: 0,
            substep_cap: cap,
            default_cap: cap,
            policy,
            throttle_events: 0,
        }
    }

    fn reset(&mut self, now_ms: f64) {
        self.estimated_render_step_ms = DEFAULT_RENDER_STEP_MS;
        self.prev_time_ms = now_ms - self.estimated_render_step_ms;
        self.substep_cap = self.default_cap;
        self.frames_above_target = 0;
        self.throttling_ratio = 1.0;
        self.accumulator_ms = 0.0;
    }

    /// Advances the regulator by one displayed frame and returns how many
    /// substeps to simulate.
    pub fn regulate(&mut self, inputs: &TimeInputs) -> u32 {
        if inputs.do_pause || inputs.do_reset {
            self.reset(inputs.now_ms);
        }

        let delta_ms = inputs.now_ms - self.prev_time_ms;

        if delta_ms < self.estimated_render_step_ms {
            self.estimated_render_step_ms = delta_ms;
        } else if delta_ms > 2.0 * self.estimated_render_step_ms {
            self.frames_above_target += 1;
        } else {
            self.frames_above_target = 0;
        }

        if self.frames_above_target >= THROTTLE_FRAME_COUNT {
            self.on_throttle();
        }

        self.prev_time_ms = inputs.now_ms;
        self.accumulator_ms += delta_ms;

        let sim_rate = f64::from(inputs.sim_rate.max(1));
        let mut substep_count = (self.accumulator_ms * sim_rate / 1000.0).floor().max(0.0) as u32;

        if inputs.do_pause {
            substep_count = 0;
            self.accumulator_ms = 0.0;
        } else {
            self.accumulator_ms -= 1000.0 * f64::from(substep_count) / sim_rate;
        }

        let sample = if substep_count == 0 {
            1.0
        } else {
            (f64::from(self.substep_cap) / f64::from(substep_count)).min(1.0)
        };
        self.throttling_ratio = self.throttling_ratio * RATIO_SMOOTHING + (1.0 - RATIO_SMOOTHING) * sample;

        substep_count.min(self.substep_cap)
    }

    fn on_throttle(&mut self) {
        self.throttle_events += 1;
        match self.policy {
            ThrottlePolicy::WarnOnly => {
                log::warn!("throttling sim because rendering time has been above target for several frames in a row");
            }
            ThrottlePolicy::HalveCap => {
                self.substep_cap = (self.substep_cap / 2).max(1);
                log::warn!(
                    "throttling sim because rendering time has been above target for several frames in a row, substep cap now {}",
                    self.substep_cap
                );
            }
        }
        self.frames_above_target = 0;
    }

    /// Smoothed render frame time in seconds.
    pub fn last_render_time_step(&self) -> f32 {
        (self.estimated_render_step_ms / 1000.0) as f32
    }

    /// Fraction of wall-clock time the simulation keeps up with, smoothed.
    pub fn throttling_ratio(&self) -> f32 {
        self.throttling_ratio as f32
    }

    pub fn throttle_events(&self) -> u64 {
        self.throttle_events
    }

    pub fn accumulator_ms(&self) -> f64 {
        self.accumulator_ms
    }

    pub fn substep_cap(&self) -> u32 {
        self.substep_cap
    }

    pub fn frames_above_target(&self) -> u32 {
        self.frames_above_target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(now_ms: f64) -> TimeInputs {
        TimeInputs {
            now_ms,
            sim_rate: 60,
            do_pause: false,
            do_reset: false,
        }
    }

    #[test]
    fn steady_frames_converge_to_one_substep() {
        let mut regulator = TimeRegulator::new(100, ThrottlePolicy::WarnOnly);
        let mut now = 1000.0;
        regulator.regulate(&TimeInputs {
            do_reset: true,
            ..frame(now)
        });

        let mut total = 0;
        for _ in 0..600 {
            now += 16.6;
            let substeps = regulator.regulate(&frame(now));
            assert!(substeps <= 1);
            total += substeps;
            let accumulator = regulator.accumulator_ms();
            assert!((0.0..1000.0 / 60.0).contains(&accumulator), "{accumulator}");
        }

        // 600 frames of 16.6ms at 60Hz is 597.6 substeps
        assert!((596..=599).contains(&total), "{total}");
    }

    #[test]
    fn pause_yields_no_substeps_and_empties_accumulator() {
        let mut regulator = TimeRegulator::new(100, ThrottlePolicy::WarnOnly);
        let mut now = 0.0;
        for _ in 0..50 {
            now += 33.0;
            let substeps = regulator.regulate(&TimeInputs {
                do_pause: true,
                ..frame(now)
            });
            assert_eq!(substeps, 0);
            assert_eq!(regulator.accumulator_ms(), 0.0);
        }
    }

    #[test]
    fn ten_slow_frames_trigger_one_throttle_event() {
        let mut regulator = TimeRegulator::new(100, ThrottlePolicy::WarnOnly);
        let mut now = 0.0;
        regulator.regulate(&TimeInputs {
            do_reset: true,
            ..frame(now)
        });
        // Establish a 10ms estimate
        now += 10.0;
        regulator.regulate(&frame(now));

        for index in 1..=10 {
            now += 50.0;
            regulator.regulate(&frame(now));
            if index < 10 {
                assert_eq!(regulator.frames_above_target(), index);
                assert_eq!(regulator.throttle_events(), 0);
            }
        }
        assert_eq!(regulator.throttle_events(), 1);
        assert_eq!(regulator.frames_above_target(), 0);
        assert_eq!(regulator.substep_cap(), 100);
    }

    #[test]
    fn on_target_frame_resets_over_budget_counter() {
        let mut regulator = TimeRegulator::new(100, ThrottlePolicy::WarnOnly);
        let mut now = 0.0;
        regulator.regulate(&TimeInputs {
            do_reset: true,
            ..frame(now)
        });
        now += 10.0;
        regulator.regulate(&frame(now));
        now += 50.0;
        regulator.regulate(&frame(now));
        assert_eq!(regulator.frames_above_target(), 1);
        now += 15.0;
        regulator.regulate(&frame(now));
        assert_eq!(regulator.frames_above_target(), 0);
    }

    #[test]
    fn halve_cap_policy_shrinks_cap_until_reset() {
        let mut regulator = TimeRegulator::new(100, ThrottlePolicy::HalveCap);
        let mut now = 0.0;
        regulator.regulate(&TimeInputs {
            do_reset: true,
            ..frame(now)
        });
        now += 10.0;
        regulator.regulate(&frame(now));
        for _ in 0..10 {
            now += 50.0;
            regulator.regulate(&frame(now));
        }
        assert_eq!(regulator.substep_cap(), 50);

        now += 10.0;
        regulator.regulate(&TimeInputs {
            do_reset: true,
            ..frame(now)
        });
        assert_eq!(regulator.substep_cap(), 100);
    }

    #[test]
    fn substeps_are_clamped_to_cap() {
        let mut regulator = TimeRegulator::new(5, ThrottlePolicy::WarnOnly);
        regulator.regulate(&TimeInputs {
            do_reset: true,
            ..frame(0.0)
        });
        let substeps = regulator.regulate(&frame(1000.0));
        assert_eq!(substeps, 5);
        assert!(regulator.throttling_ratio() < 1.0);
    }

    #[test]
    fn zero_substep_frames_keep_ratio_finite() {
        let mut regulator = TimeRegulator::new(100, ThrottlePolicy::WarnOnly);
        let mut now = 0.0;
        for _ in 0..10 {
            now += 1.0;
            assert_eq!(regulator.regulate(&frame(now)), 0);
        }
        assert!(regulator.throttling_ratio().is_finite());
        assert!((regulator.throttling_ratio() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn reset_rewinds_previous_time_by_one_estimate() {
        let mut regulator = TimeRegulator::new(100, ThrottlePolicy::WarnOnly);
        // A reset frame sees exactly one default render step of elapsed time
        let substeps = regulator.regulate(&TimeInputs {
            now_ms: 5000.0,
            sim_rate: 90,
            do_pause: false,
            do_reset: true,
        });
        assert_eq!(substeps, 1);
        assert!((regulator.accumulator_ms() - 1000.0 / 60.0 / 3.0).abs() < 1e-6);
    }
}
