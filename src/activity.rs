use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Inactivity timer over the viewer's pointer/touch activity.
///
/// The tracker owns only the timer and debounce logic; event delivery
/// belongs to the host. While armed, every accepted activity sample
/// restarts a single deadline of the configured threshold. When the
/// deadline elapses un-restarted the tracker reports exactly one firing
/// and re-arms itself, so the overlay can reappear after the next quiet
/// period.
#[derive(Debug)]
pub struct ActivityTracker {
    threshold: Duration,
    debounce: Duration,
    armed: bool,
    deadline: Option<Instant>,
    last_activity: Option<Instant>,
    last_sample: Option<Instant>,
}

impl ActivityTracker {
    pub fn new(threshold: Duration, debounce: Duration) -> Self {
        Self {
            threshold,
            debounce,
            armed: false,
            deadline: None,
            last_activity: None,
            last_sample: None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Start (or restart) inactivity detection
    pub fn arm(&mut self, now: Instant) {
        self.armed = true;
        self.deadline = Some(now + self.threshold);
    }

    /// Stop inactivity detection and clear any pending deadline.
    /// Safe to call repeatedly.
    pub fn disarm(&mut self) {
        self.armed = false;
        self.deadline = None;
        self.last_sample = None;
    }

    /// Record a raw activity event.
    ///
    /// Activity is noted even while disarmed so a pause that arrives
    /// when the viewer has long been idle can reveal the overlay
    /// without a fresh wait. Returns `true` when the sample survived
    /// the debounce window.
    pub fn record_activity(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_sample {
            if now.saturating_duration_since(last) < self.debounce {
                return false;
            }
        }
        self.last_sample = Some(now);
        self.last_activity = Some(now);

        if self.armed {
            self.deadline = Some(now + self.threshold);
        }
        true
    }

    /// Pending inactivity deadline, if armed
    pub fn deadline(&self) -> Option<Instant> {
        if self.armed {
            self.deadline
        } else {
            None
        }
    }

    /// Consume a due deadline. Fires at most once per quiet period and
    /// immediately re-arms for the next one.
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if self.armed && now >= deadline => {
                debug!("Inactivity threshold reached");
                self.deadline = Some(now + self.threshold);
                true
            }
            _ => false,
        }
    }

    /// Whether any activity has ever been noted. The idle-past-threshold
    /// shortcut on pause needs positive evidence of old activity; a
    /// fresh page with an untouched pointer waits the full threshold.
    pub fn has_recorded_activity(&self) -> bool {
        self.last_activity.is_some()
    }

    /// How long the viewer has been idle, measured from the last noted
    /// activity; viewers with no recorded activity count as idle forever
    pub fn idle_for(&self, now: Instant) -> Duration {
        match self.last_activity {
            Some(last) => now.saturating_duration_since(last),
            None => Duration::MAX,
        }
    }

    /// Whether the viewer is already past the inactivity threshold
    pub fn idle_past_threshold(&self, now: Instant) -> bool {
        self.idle_for(now) >= self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> ActivityTracker {
        ActivityTracker::new(Duration::from_secs(10), Duration::from_millis(150))
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_restarts_on_activity() {
        let mut t = tracker();
        let start = Instant::now();
        t.arm(start);
        assert_eq!(t.deadline(), Some(start + Duration::from_secs(10)));

        let later = start + Duration::from_secs(4);
        assert!(t.record_activity(later));
        assert_eq!(t.deadline(), Some(later + Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_then_rearms() {
        let mut t = tracker();
        let start = Instant::now();
        t.arm(start);

        let due = start + Duration::from_secs(10);
        assert!(t.fire_if_due(due));
        // No immediate double fire; the next quiet period starts now
        assert!(!t.fire_if_due(due));
        assert_eq!(t.deadline(), Some(due + Duration::from_secs(10)));
        assert!(t.fire_if_due(due + Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_does_not_fire_early() {
        let mut t = tracker();
        let start = Instant::now();
        t.arm(start);
        assert!(!t.fire_if_due(start + Duration::from_millis(9_999)));
        assert!(t.fire_if_due(start + Duration::from_millis(10_000)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_is_idempotent() {
        let mut t = tracker();
        t.arm(Instant::now());
        t.disarm();
        assert!(t.deadline().is_none());
        t.disarm();
        t.disarm();
        assert!(t.deadline().is_none());
        assert!(!t.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_collapses_bursts() {
        let mut t = tracker();
        let start = Instant::now();
        t.arm(start);

        assert!(t.record_activity(start + Duration::from_secs(1)));
        assert!(!t.record_activity(start + Duration::from_secs(1) + Duration::from_millis(50)));
        assert!(t.record_activity(start + Duration::from_secs(1) + Duration::from_millis(200)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_tracked_while_disarmed() {
        let mut t = tracker();
        let start = Instant::now();
        // No activity recorded at all counts as idle forever
        assert!(t.idle_past_threshold(start));

        t.record_activity(start);
        assert!(!t.idle_past_threshold(start + Duration::from_secs(5)));
        assert!(t.idle_past_threshold(start + Duration::from_secs(10)));
    }
}
