//! Speed pacing: throttles virtual-time advancement so that
//! `elapsed_wall * speed ≈ elapsed_virtual`.

use std::time::{Duration, Instant};

use threadsim_common::{SimTime, MAX_SIMULATE_SPEED};

/// Minimum sleep to bother with; shorter waits just burn a syscall.
const MIN_SLEEP: Duration = Duration::from_micros(200);

/// Tracks wall-clock vs virtual-time progress for one pacing session. The
/// session restarts whenever the speed changes or a new go period begins, so
/// past drift is never replayed.
#[derive(Debug)]
pub struct Pacer {
    speed: f64,
    start_wall: Instant,
    start_sim: SimTime,
}

impl Pacer {
    pub fn new(speed: f64, start_sim: SimTime) -> Self {
        Pacer {
            speed,
            start_wall: Instant::now(),
            start_sim,
        }
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// True when pacing is disabled and the dispatcher runs flat out.
    pub fn is_max_speed(&self) -> bool {
        self.speed >= MAX_SIMULATE_SPEED
    }

    /// Restarts the session at the current wall clock and `sim` time.
    pub fn restart(&mut self, speed: f64, sim: SimTime) {
        self.speed = speed;
        self.start_wall = Instant::now();
        self.start_sim = sim;
    }

    /// The virtual time that should have been reached by now.
    pub fn target_sim_time(&self) -> SimTime {
        if self.is_max_speed() {
            return SimTime::MAX;
        }
        let elapsed = self.start_wall.elapsed();
        let scaled = (elapsed.as_micros() as f64 * self.speed) as u64;
        self.start_sim.saturating_add(scaled)
    }

    /// How long to sleep before advancing to `next_event_time`, or `None`
    /// to advance immediately.
    pub fn sleep_before(&self, next_event_time: SimTime) -> Option<Duration> {
        if self.is_max_speed() {
            return None;
        }
        let target = self.target_sim_time();
        if next_event_time <= target {
            return None;
        }
        let sim_ahead = next_event_time - self.start_sim;
        let wall_offset = Duration::from_micros((sim_ahead as f64 / self.speed) as u64);
        let due = self.start_wall + wall_offset;
        let now = Instant::now();
        if due <= now {
            return None;
        }
        let wait = due - now;
        if wait < MIN_SLEEP {
            None
        } else {
            Some(wait)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_speed_never_sleeps() {
        let pacer = Pacer::new(MAX_SIMULATE_SPEED, 0);
        assert!(pacer.is_max_speed());
        assert_eq!(pacer.sleep_before(u64::MAX / 2), None);
    }

    #[test]
    fn near_events_run_immediately() {
        let pacer = Pacer::new(1.0, 0);
        // An event at sim time 0 is never in the future.
        assert_eq!(pacer.sleep_before(0), None);
    }

    #[test]
    fn far_events_wait() {
        let pacer = Pacer::new(1.0, 0);
        // An event 10 s of virtual time ahead needs close to 10 s of wall
        // time at speed 1.
        let wait = pacer.sleep_before(10_000_000).expect("should sleep");
        assert!(wait > Duration::from_secs(9));
        assert!(wait <= Duration::from_secs(10));
    }

    #[test]
    fn higher_speed_shortens_the_wait() {
        let pacer = Pacer::new(100.0, 0);
        let wait = pacer.sleep_before(10_000_000).expect("should sleep");
        assert!(wait <= Duration::from_millis(100));
    }

    #[test]
    fn restart_rebases_progress() {
        let mut pacer = Pacer::new(1.0, 0);
        pacer.restart(1.0, 50_000_000);
        // The new session starts at sim 50 s; an event shortly after is due
        // almost immediately, not 50 s out.
        let wait = pacer.sleep_before(50_000_500);
        assert!(wait.is_none() || wait.unwrap() < Duration::from_millis(10));
    }
}
