//! Minimum spacing between accepted commands

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CooldownGate {
    cooldown: Duration,
    last_accepted: Option<Instant>,
}

impl CooldownGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_accepted: None,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Time left before another command may be accepted, `None` when open
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        let last = self.last_accepted?;
        let elapsed = now.saturating_duration_since(last);
        (elapsed < self.cooldown).then(|| self.cooldown - elapsed)
    }

    /// Only accepted detections restart the cooldown
    pub fn mark_accepted(&mut self, now: Instant) {
        self.last_accepted = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_until_first_accept() {
        let gate = CooldownGate::new(Duration::from_secs(2));
        assert_eq!(gate.remaining(Instant::now()), None);
    }

    #[test]
    fn test_blocks_within_window() {
        let t0 = Instant::now();
        let mut gate = CooldownGate::new(Duration::from_secs(2));
        gate.mark_accepted(t0);
        assert_eq!(gate.remaining(t0), Some(Duration::from_secs(2)));
        assert_eq!(
            gate.remaining(t0 + Duration::from_millis(500)),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(gate.remaining(t0 + Duration::from_secs(2)), None);
        assert_eq!(gate.remaining(t0 + Duration::from_secs(10)), None);
    }

    #[test]
    fn test_zero_cooldown() {
        let t0 = Instant::now();
        let mut gate = CooldownGate::new(Duration::ZERO);
        gate.mark_accepted(t0);
        assert_eq!(gate.remaining(t0), None);
    }
}
