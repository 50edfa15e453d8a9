//! Cross-window chime rate limiter.
//!
//! Stateless except for the timestamp of the last permitted chime.
//! `check_and_record` is atomic: at most one caller observes `allowed=true`
//! per cooldown window.

use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

pub struct ChimeLimiter {
    cooldown: Duration,
    last_allowed_at: Mutex<Option<Instant>>,
}

impl Default for ChimeLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

pub struct ChimeCheck {
    pub allowed: bool,
    pub seconds_remaining: f64,
}

impl ChimeLimiter {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_allowed_at: Mutex::new(None),
        }
    }

    pub fn check_and_record(&self) -> ChimeCheck {
        let mut last = self.last_allowed_at.lock().unwrap();
        let now = Instant::now();

        let elapsed = last.map(|t| now.duration_since(t));
        let allowed = match elapsed {
            Some(e) => e >= self.cooldown,
            None => true,
        };

        if allowed {
            *last = Some(now);
            ChimeCheck {
                allowed: true,
                seconds_remaining: 0.0,
            }
        } else {
            let remaining = self.cooldown - elapsed.unwrap();
            ChimeCheck {
                allowed: false,
                seconds_remaining: (remaining.as_secs_f64() * 10.0).round() / 10.0,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn first_call_is_always_allowed() {
        let limiter = ChimeLimiter::new(Duration::from_secs(60));
        let check = limiter.check_and_record();
        assert!(check.allowed);
        assert_eq!(check.seconds_remaining, 0.0);
    }

    #[test]
    fn second_call_within_cooldown_is_denied() {
        let limiter = ChimeLimiter::new(Duration::from_millis(100));
        assert!(limiter.check_and_record().allowed);
        let second = limiter.check_and_record();
        assert!(!second.allowed);
        assert!(second.seconds_remaining > 0.0);
    }

    #[test]
    fn call_after_cooldown_elapses_is_allowed_again() {
        let limiter = ChimeLimiter::new(Duration::from_millis(20));
        assert!(limiter.check_and_record().allowed);
        thread::sleep(Duration::from_millis(30));
        assert!(limiter.check_and_record().allowed);
    }
}
