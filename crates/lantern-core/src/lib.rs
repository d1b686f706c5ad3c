// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::time::{Duration, Instant};

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();
}

/// Measures wall time between consecutive frames.
///
/// A long stall (debugger break, window drag on some platforms) would
/// otherwise feed a huge delta into movement and animation, so deltas are
/// clamped to `max_frame_time`.
#[derive(Debug)]
pub struct FrameClock {
    last: Instant,
    max_frame_time: Duration,
}

impl FrameClock {
    pub const DEFAULT_MAX_FRAME_TIME: Duration = Duration::from_millis(250);

    pub fn new() -> Self {
        Self::with_max_frame_time(Self::DEFAULT_MAX_FRAME_TIME)
    }

    pub fn with_max_frame_time(max_frame_time: Duration) -> Self {
        Self {
            last: Instant::now(),
            max_frame_time,
        }
    }

    /// Seconds since the previous tick (or since construction).
    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        let dt = self.delta_until(now);
        self.last = now;
        dt
    }

    fn delta_until(&self, now: Instant) -> f32 {
        let elapsed = now.saturating_duration_since(self.last);
        if elapsed > self.max_frame_time {
            tracing::debug!(
                "frame time {:.3}s clamped to {:.3}s",
                elapsed.as_secs_f32(),
                self.max_frame_time.as_secs_f32()
            );
            self.max_frame_time.as_secs_f32()
        } else {
            elapsed.as_secs_f32()
        }
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_is_clamped_to_max_frame_time() {
        let clock = FrameClock::with_max_frame_time(Duration::from_millis(100));
        let later = clock.last + Duration::from_secs(3);
        assert_eq!(clock.delta_until(later), 0.1);
    }

    #[test]
    fn short_delta_passes_through() {
        let clock = FrameClock::new();
        let later = clock.last + Duration::from_millis(16);
        assert!((clock.delta_until(later) - 0.016).abs() < 1e-6);
    }

    #[test]
    fn tick_never_goes_negative() {
        let mut clock = FrameClock::new();
        assert!(clock.tick() >= 0.0);
        assert!(clock.tick() >= 0.0);
    }
}
