// kestrel/realtime.rs
use std::time::{Duration, Instant};

// Control register bits
pub const CTRL_ENABLE: u32 = 0x01;
pub const CTRL_ONE_SHOT: u32 = 0x02; // 0 = periodic
pub const CTRL_INT_PENDING: u32 = 0x04; // write-1-to-clear
pub const CTRL_ALARM_MODE: u32 = 0x08; // fire only at counter == compare

pub const MIN_FREQUENCY: u32 = 1;
pub const MAX_FREQUENCY: u32 = 1000;

/// Wall-clock-driven timer at a programmable frequency (1-1000 Hz).
///
/// The timer never runs on its own thread: the step loop polls it with a
/// monotonic clock reading. `last_tick` advances by whole periods rather than
/// snapping to `now`, so drift stays bounded no matter how unevenly the VM
/// polls.
#[derive(Debug, Clone)]
pub struct RealTimeTimer {
    counter: u32,
    frequency: u32,
    control: u32,
    compare: u32,
    pending: bool,
    last_tick: Option<Instant>,
}

impl Default for RealTimeTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl RealTimeTimer {
    pub fn new() -> Self {
        RealTimeTimer {
            counter: 0,
            frequency: 1,
            control: 0,
            compare: 0,
            pending: false,
            last_tick: None,
        }
    }

    pub fn reset(&mut self) {
        *self = RealTimeTimer::new();
    }

    fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frequency.clamp(MIN_FREQUENCY, MAX_FREQUENCY) as f64)
    }

    /// Sample the wall clock; called once per step by the step loop.
    pub fn poll(&mut self) -> bool {
        self.poll_at(Instant::now())
    }

    /// Clock-injected body of `poll`, so tests can drive synthetic time.
    pub fn poll_at(&mut self, now: Instant) -> bool {
        if self.control & CTRL_ENABLE == 0 {
            return false;
        }

        let last = match self.last_tick {
            Some(t) => t,
            None => {
                // first poll after enable arms the timing base
                self.last_tick = Some(now);
                return false;
            }
        };

        let period = self.period();
        let elapsed = now.duration_since(last);
        if elapsed < period {
            return false;
        }

        // catch up by whole periods when the VM polls slowly
        let ticks = (elapsed.as_secs_f64() / period.as_secs_f64()) as u32;
        self.counter = self.counter.wrapping_add(ticks);
        self.last_tick = Some(last + period * ticks);

        if self.control & CTRL_ALARM_MODE != 0 {
            if self.compare > 0 && self.counter >= self.compare {
                self.set_pending();
                self.control &= !CTRL_ENABLE;
                return true;
            }
            return false;
        }

        self.set_pending();
        if self.control & CTRL_ONE_SHOT != 0 {
            self.control &= !CTRL_ENABLE;
        }
        true
    }

    fn set_pending(&mut self) {
        self.pending = true;
        self.control |= CTRL_INT_PENDING;
    }

    pub fn pending(&self) -> bool {
        self.pending
    }

    pub fn read_counter(&self) -> u32 {
        self.counter
    }

    pub fn read_frequency(&self) -> u32 {
        self.frequency
    }

    pub fn write_frequency(&mut self, value: u32) {
        self.frequency = value.clamp(MIN_FREQUENCY, MAX_FREQUENCY);
    }

    pub fn read_compare(&self) -> u32 {
        self.compare
    }

    pub fn write_compare(&mut self, value: u32) {
        self.compare = value;
    }

    pub fn read_control(&self) -> u32 {
        self.control
    }

    /// Bit 2 written as 1 clears pending; other bits replace the stored ones.
    /// Enabling arms the timing base on the next poll.
    pub fn write_control(&mut self, value: u32) {
        if value & CTRL_INT_PENDING != 0 {
            self.pending = false;
            self.control &= !CTRL_INT_PENDING;
        }
        let keep_pending = self.control & CTRL_INT_PENDING;
        let was_enabled = self.control & CTRL_ENABLE != 0;
        self.control = (value & !CTRL_INT_PENDING & 0x0F) | keep_pending;
        if !was_enabled && self.control & CTRL_ENABLE != 0 {
            self.last_tick = None;
        }
    }

    pub fn read_status(&self) -> u32 {
        let mut status = 0;
        if self.control & CTRL_ENABLE != 0 {
            status |= 0x01;
        }
        if self.pending {
            status |= 0x02;
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled(freq: u32, control: u32) -> (RealTimeTimer, Instant) {
        let mut t = RealTimeTimer::new();
        t.write_frequency(freq);
        t.write_control(control | CTRL_ENABLE);
        let base = Instant::now();
        assert!(!t.poll_at(base)); // arms the timing base
        (t, base)
    }

    #[test]
    fn frequency_is_clamped() {
        let mut t = RealTimeTimer::new();
        t.write_frequency(0);
        assert_eq!(t.read_frequency(), 1);
        t.write_frequency(5000);
        assert_eq!(t.read_frequency(), 1000);
    }

    #[test]
    fn fires_after_one_period() {
        let (mut t, base) = enabled(100, 0); // 10 ms period
        assert!(!t.poll_at(base + Duration::from_millis(5)));
        assert!(t.poll_at(base + Duration::from_millis(11)));
        assert!(t.pending());
        assert_eq!(t.read_counter(), 1);
    }

    #[test]
    fn catches_up_whole_periods_without_drift() {
        let (mut t, base) = enabled(100, 0);
        // poll late by 3.5 periods: counter advances 3, base advances 30 ms
        assert!(t.poll_at(base + Duration::from_millis(35)));
        assert_eq!(t.read_counter(), 3);
        // only 5 ms of phase used up; next fire at 40 ms
        assert!(!t.poll_at(base + Duration::from_millis(39)));
        assert!(t.poll_at(base + Duration::from_millis(41)));
    }

    #[test]
    fn one_shot_disables_after_first_fire() {
        let (mut t, base) = enabled(100, CTRL_ONE_SHOT);
        assert!(t.poll_at(base + Duration::from_millis(11)));
        assert_eq!(t.read_control() & CTRL_ENABLE, 0);
        assert!(!t.poll_at(base + Duration::from_millis(30)));
    }

    #[test]
    fn alarm_mode_waits_for_compare() {
        let mut t = RealTimeTimer::new();
        t.write_frequency(100);
        t.write_compare(3);
        t.write_control(CTRL_ENABLE | CTRL_ALARM_MODE);
        let base = Instant::now();
        assert!(!t.poll_at(base));
        assert!(!t.poll_at(base + Duration::from_millis(11)));
        assert!(!t.poll_at(base + Duration::from_millis(21)));
        assert!(t.poll_at(base + Duration::from_millis(31)));
        assert!(t.pending());
        assert_eq!(t.read_control() & CTRL_ENABLE, 0);
    }

    #[test]
    fn write_one_to_clear_pending() {
        let (mut t, base) = enabled(100, 0);
        assert!(t.poll_at(base + Duration::from_millis(11)));
        t.write_control(CTRL_ENABLE | CTRL_INT_PENDING);
        assert!(!t.pending());
        assert_eq!(t.read_control() & CTRL_INT_PENDING, 0);
    }

    #[test]
    fn status_reflects_running_and_pending() {
        let (mut t, base) = enabled(100, 0);
        assert_eq!(t.read_status(), 0x01);
        t.poll_at(base + Duration::from_millis(11));
        assert_eq!(t.read_status(), 0x03);
    }
}
