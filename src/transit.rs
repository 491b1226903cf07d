use parking_lot::{Condvar, Mutex};

/// The transit drain gate (spec §5).
///
/// The upstream design is a single-count semaphore that's posted exactly
/// when the transit counter is zero: `IN_TRANSIT_INCREMENT` consumes it on
/// the 0→1 edge, `IN_TRANSIT_DECREMENT` posts it on the 1→0 edge, and
/// `IN_TRANSIT_WAIT` is a consume-then-post peek-block. A `Mutex` + `Condvar`
/// guarding the counter directly gives the same one-shot "drain gate"
/// behaviour without a raw semaphore primitive, and doubles as the
/// `transit_lock` the spec calls a separate leaf lock.
#[derive(Default)]
pub struct TransitGate {
    count: Mutex<i64>,
    drained: Condvar,
}

impl TransitGate {
    pub fn new() -> TransitGate {
        TransitGate {
            count: Mutex::new(0),
            drained: Condvar::new(),
        }
    }

    /// `IN_TRANSIT_INCREMENT`.
    pub fn increment(&self) {
        let mut count = self.count.lock();
        *count += 1;
    }

    /// `IN_TRANSIT_DECREMENT`. Panics if the counter would go negative,
    /// matching invariant 2 ("transit_buffer_headers >= 0 at all times").
    pub fn decrement(&self) {
        let mut count = self.count.lock();
        *count -= 1;
        assert!(*count >= 0, "transit counter went negative");
        if *count == 0 {
            self.drained.notify_all();
        }
    }

    /// `IN_TRANSIT_WAIT`: blocks until the counter reaches zero.
    pub fn wait_drained(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.drained.wait(&mut count);
        }
    }

    pub fn count(&self) -> i64 {
        *self.count.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_drained_returns_immediately_when_empty() {
        let gate = TransitGate::new();
        gate.wait_drained();
    }

    #[test]
    fn wait_drained_blocks_until_decremented() {
        let gate = Arc::new(TransitGate::new());
        gate.increment();
        gate.increment();

        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || gate.wait_drained())
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        gate.decrement();
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        gate.decrement();
        waiter.join().unwrap();
        assert_eq!(gate.count(), 0);
    }

    #[test]
    #[should_panic(expected = "negative")]
    fn decrement_below_zero_panics() {
        let gate = TransitGate::new();
        gate.decrement();
    }
}
