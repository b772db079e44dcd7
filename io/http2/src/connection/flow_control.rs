//! Flow control window tracking.

/// A flow control window at connection or stream scope.
///
/// Windows are signed: a SETTINGS_INITIAL_WINDOW_SIZE decrease can push a
/// send window below zero until the peer drains in-flight data.
#[derive(Debug, Clone)]
pub struct FlowControl {
    /// Current credit in bytes.
    window: i64,
    /// Initial window size, the replenishment target.
    initial: u32,
}

impl FlowControl {
    /// Create a window with `initial` bytes of credit.
    pub fn new(initial: u32) -> Self {
        Self {
            window: i64::from(initial),
            initial,
        }
    }

    /// Current credit. Negative means the window is overdrawn.
    pub fn available(&self) -> i64 {
        self.window
    }

    /// The replenishment target.
    pub fn initial(&self) -> u32 {
        self.initial
    }

    /// Spend credit (data sent or received).
    pub fn consume(&mut self, amount: u32) {
        self.window -= i64::from(amount);
    }

    /// Add credit (WINDOW_UPDATE).
    pub fn credit(&mut self, amount: u32) {
        self.window += i64::from(amount);
    }

    /// Shift the window after a SETTINGS_INITIAL_WINDOW_SIZE change.
    pub fn adjust(&mut self, delta: i64) {
        self.window += delta;
    }

    /// Receive side: whether the peer should be given more credit. True
    /// once the window has fallen below half the initial size.
    pub fn needs_update(&self) -> bool {
        self.window < i64::from(self.initial / 2)
    }

    /// Receive side: restore the window to its initial size, returning the
    /// WINDOW_UPDATE increment to send.
    pub fn take_update(&mut self) -> u32 {
        let increment = i64::from(self.initial) - self.window;
        if increment <= 0 {
            return 0;
        }
        self.window = i64::from(self.initial);
        increment as u32
    }
}

impl Default for FlowControl {
    fn default() -> Self {
        Self::new(crate::frame::DEFAULT_INITIAL_WINDOW_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_and_credit() {
        let mut fc = FlowControl::default();
        assert_eq!(fc.available(), 65535);
        fc.consume(1000);
        assert_eq!(fc.available(), 64535);
        fc.credit(500);
        assert_eq!(fc.available(), 65035);
    }

    #[test]
    fn update_threshold_at_half_window() {
        let mut fc = FlowControl::new(65535);
        fc.consume(30000);
        assert!(!fc.needs_update()); // 35535 >= 32767

        fc.consume(10000);
        assert!(fc.needs_update()); // 25535 < 32767

        let increment = fc.take_update();
        assert_eq!(increment, 40000);
        assert_eq!(fc.available(), 65535);
        assert!(!fc.needs_update());
    }

    #[test]
    fn take_update_on_full_window_is_zero() {
        let mut fc = FlowControl::new(1000);
        assert_eq!(fc.take_update(), 0);
    }

    #[test]
    fn window_can_go_negative_under_adjust() {
        let mut fc = FlowControl::new(1000);
        fc.consume(900);
        fc.adjust(-500);
        assert_eq!(fc.available(), -400);
        fc.credit(1000);
        assert_eq!(fc.available(), 600);
    }
}
