use std::{collections::HashMap, time::Duration};

use tokio::time::Instant;

pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(1000);

/// Drops switch toggles that arrive too soon after the previous accepted
/// toggle of the same device.
#[derive(Debug)]
pub struct DebounceGuard {
    window: Duration,
    last_toggle: HashMap<String, Instant>,
}

impl Default for DebounceGuard {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_WINDOW)
    }
}

impl DebounceGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_toggle: HashMap::new(),
        }
    }

    /// Returns `true` and records `now` if the toggle may proceed. Rejected
    /// attempts are not recorded, so they never extend the window.
    pub fn try_acquire(&mut self, device_id: &str, now: Instant) -> bool {
        if let Some(previous) = self.last_toggle.get(device_id) {
            if now.saturating_duration_since(*previous) < self.window {
                return false;
            }
        }

        self.last_toggle.insert(device_id.to_string(), now);
        true
    }

    pub fn forget(&mut self, device_id: &str) {
        self.last_toggle.remove(device_id);
    }

    pub fn clear(&mut self) {
        self.last_toggle.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_toggles_inside_window() {
        let mut guard = DebounceGuard::default();
        let t0 = Instant::now();

        assert!(guard.try_acquire("1", t0));
        assert!(!guard.try_acquire("1", t0 + Duration::from_millis(999)));
        assert!(guard.try_acquire("1", t0 + Duration::from_millis(1000)));
    }

    #[test]
    fn rejected_attempts_do_not_extend_window() {
        let mut guard = DebounceGuard::default();
        let t0 = Instant::now();

        assert!(guard.try_acquire("1", t0));
        assert!(!guard.try_acquire("1", t0 + Duration::from_millis(900)));
        assert!(guard.try_acquire("1", t0 + Duration::from_millis(1100)));
    }

    #[test]
    fn devices_are_independent() {
        let mut guard = DebounceGuard::new(Duration::from_millis(500));
        let t0 = Instant::now();

        assert!(guard.try_acquire("1", t0));
        assert!(guard.try_acquire("2", t0 + Duration::from_millis(10)));
        assert!(!guard.try_acquire("1", t0 + Duration::from_millis(20)));

        guard.forget("1");
        assert!(guard.try_acquire("1", t0 + Duration::from_millis(30)));
    }
}
