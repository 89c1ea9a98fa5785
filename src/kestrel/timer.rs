// kestrel/timer.rs

// Control register bits
pub const CTRL_ENABLE: u32 = 0x01;
pub const CTRL_PERIODIC: u32 = 0x02; // 0 = one-shot
pub const CTRL_INT_PENDING: u32 = 0x04; // write-1-to-clear
pub const CTRL_AUTO_RELOAD: u32 = 0x08;

/// Instruction-tick-driven timer with compare, prescaler, one-shot/periodic
/// modes, and a write-1-to-clear pending bit.
#[derive(Debug, Default, Clone)]
pub struct Timer {
    counter: u32,
    compare: u32,
    control: u32,
    prescaler: u32,
    prescale_acc: u32,
    pending: bool,
}

impl Timer {
    pub fn new() -> Self {
        Timer { prescaler: 1, ..Default::default() }
    }

    pub fn reset(&mut self) {
        *self = Timer::new();
    }

    /// Advance by one instruction tick. Returns true when the compare match
    /// raises the pending bit on this tick.
    pub fn tick(&mut self) -> bool {
        if self.control & CTRL_ENABLE == 0 {
            return false;
        }

        self.prescale_acc += 1;
        if self.prescale_acc < self.prescaler {
            return false;
        }
        self.prescale_acc = 0;

        self.counter = self.counter.wrapping_add(1);

        // compare == 0 never fires; a freshly enabled timer stays quiet until
        // a compare value is programmed
        if self.compare > 0 && self.counter >= self.compare && !self.pending {
            self.pending = true;
            self.control |= CTRL_INT_PENDING;
            if self.control & CTRL_PERIODIC != 0 {
                if self.control & CTRL_AUTO_RELOAD != 0 {
                    self.counter = 0;
                }
            } else {
                self.control &= !CTRL_ENABLE;
            }
            return true;
        }
        false
    }

    pub fn pending(&self) -> bool {
        self.pending
    }

    pub fn read_counter(&self) -> u32 {
        self.counter
    }

    pub fn write_counter(&mut self, value: u32) {
        self.counter = value;
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

    /// Bit 2 written as 1 clears the pending state; the remaining bits
    /// replace the stored control bits. The pending bit cannot be set by a
    /// store.
    pub fn write_control(&mut self, value: u32) {
        if value & CTRL_INT_PENDING != 0 {
            self.pending = false;
            self.control &= !CTRL_INT_PENDING;
        }
        let keep_pending = self.control & CTRL_INT_PENDING;
        self.control = (value & !CTRL_INT_PENDING & 0x0F) | keep_pending;
    }

    pub fn read_prescaler(&self) -> u32 {
        self.prescaler
    }

    pub fn write_prescaler(&mut self, value: u32) {
        self.prescaler = value.max(1);
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

    fn armed(compare: u32, control: u32) -> Timer {
        let mut t = Timer::new();
        t.write_compare(compare);
        t.write_control(control);
        t
    }

    #[test]
    fn disabled_timer_does_not_count() {
        let mut t = armed(1, 0);
        assert!(!t.tick());
        assert_eq!(t.read_counter(), 0);
    }

    #[test]
    fn fires_on_compare_match() {
        let mut t = armed(3, CTRL_ENABLE);
        assert!(!t.tick());
        assert!(!t.tick());
        assert!(t.tick());
        assert!(t.pending());
    }

    #[test]
    fn compare_zero_never_fires() {
        let mut t = armed(0, CTRL_ENABLE);
        for _ in 0..100 {
            assert!(!t.tick());
        }
        assert!(!t.pending());
    }

    #[test]
    fn one_shot_disables_itself() {
        let mut t = armed(1, CTRL_ENABLE);
        assert!(t.tick());
        assert_eq!(t.read_control() & CTRL_ENABLE, 0);
        assert!(!t.tick());
    }

    #[test]
    fn periodic_auto_reload_restarts_counter() {
        let mut t = armed(2, CTRL_ENABLE | CTRL_PERIODIC | CTRL_AUTO_RELOAD);
        assert!(!t.tick());
        assert!(t.tick());
        assert_eq!(t.read_counter(), 0);
        // still pending: no re-fire until the handler clears it
        assert!(!t.tick());
        t.write_control(CTRL_ENABLE | CTRL_PERIODIC | CTRL_AUTO_RELOAD | CTRL_INT_PENDING);
        assert!(!t.pending());
        assert!(t.tick());
        assert_eq!(t.read_counter(), 0);
    }

    #[test]
    fn prescaler_divides_ticks() {
        let mut t = armed(1, CTRL_ENABLE);
        t.write_prescaler(4);
        assert!(!t.tick());
        assert!(!t.tick());
        assert!(!t.tick());
        assert!(t.tick());
    }

    #[test]
    fn prescaler_floor_is_one() {
        let mut t = Timer::new();
        t.write_prescaler(0);
        assert_eq!(t.read_prescaler(), 1);
    }

    #[test]
    fn write_one_to_clear_pending() {
        let mut t = armed(1, CTRL_ENABLE | CTRL_PERIODIC);
        assert!(t.tick());
        assert!(t.pending());
        t.write_control(t.read_control() | CTRL_INT_PENDING);
        assert!(!t.pending());
        assert_eq!(t.read_control() & CTRL_INT_PENDING, 0);
    }

    #[test]
    fn control_write_cannot_set_pending() {
        let mut t = Timer::new();
        t.write_control(CTRL_ENABLE);
        assert!(!t.pending());
        assert_eq!(t.read_control() & CTRL_INT_PENDING, 0);
    }

    #[test]
    fn status_reflects_running_and_pending() {
        let mut t = armed(1, CTRL_ENABLE | CTRL_PERIODIC);
        assert_eq!(t.read_status(), 0x01);
        t.tick();
        assert_eq!(t.read_status(), 0x03);
    }
}
