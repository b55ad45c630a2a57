use rand::Rng;
use std::time::Duration;

const BASE_DELAY: Duration = Duration::from_secs(5);
const MAX_DELAY: Duration = Duration::from_secs(5 * 60);

/// Exponential reconnect backoff: 5 s doubling up to 5 min, with up to
/// 25% jitter so a netsplit's worth of clients does not reconnect in
/// lockstep.
#[derive(Clone, Debug)]
pub struct Backoff {
    attempt: u32,
}

impl Backoff {
    pub fn new() -> Backoff {
        Backoff { attempt: 0 }
    }

    /// Delay to wait before the next attempt, advancing the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let exp = BASE_DELAY.saturating_mul(1u32 << self.attempt.min(16));
        let capped = exp.min(MAX_DELAY);
        self.attempt = self.attempt.saturating_add(1);
        jitter(capped)
    }

    /// Call on a successful connection so the next failure starts over
    /// from the base delay.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::new()
    }
}

fn jitter(d: Duration) -> Duration {
    let quarter = d.as_millis() as u64 / 4;
    if quarter == 0 {
        return d;
    }
    let extra = rand::rng().random_range(0..=quarter);
    d + Duration::from_millis(extra)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_doubles_and_caps() {
        let mut b = Backoff::new();
        let d1 = b.next_delay();
        assert!(d1 >= BASE_DELAY && d1 <= BASE_DELAY + BASE_DELAY / 4);
        let d2 = b.next_delay();
        assert!(d2 >= BASE_DELAY * 2);
        for _ in 0..20 {
            let d = b.next_delay();
            assert!(d <= MAX_DELAY + MAX_DELAY / 4);
        }
    }

    #[test]
    fn reset_returns_to_base() {
        let mut b = Backoff::new();
        let _ = b.next_delay();
        let _ = b.next_delay();
        b.reset();
        assert!(b.next_delay() <= BASE_DELAY + BASE_DELAY / 4);
    }
}
