use std::time::{Duration, Instant};

/// Rx or Tx side of a port's transfer statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counters {
    pub buffer_count: u64,
    pub first_buffer_time: Option<Instant>,
    pub last_buffer_time: Option<Instant>,
    pub max_delay: Duration,
}

impl Counters {
    fn record(&mut self, now: Instant) {
        if self.first_buffer_time.is_none() {
            self.first_buffer_time = Some(now);
        }
        if let Some(last) = self.last_buffer_time {
            let delay = now.saturating_duration_since(last);
            if delay > self.max_delay {
                self.max_delay = delay;
            }
        }
        self.last_buffer_time = Some(now);
        self.buffer_count += 1;
    }

    fn reset(&mut self) {
        *self = Counters::default();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Rx,
    Tx,
}

#[derive(Debug, Default)]
pub(crate) struct StatsPair {
    pub rx: Counters,
    pub tx: Counters,
}

impl StatsPair {
    pub fn record(&mut self, dir: Direction, now: Instant) {
        match dir {
            Direction::Rx => self.rx.record(now),
            Direction::Tx => self.tx.record(now),
        }
    }

    pub fn get(&self, dir: Direction) -> Counters {
        match dir {
            Direction::Rx => self.rx,
            Direction::Tx => self.tx,
        }
    }

    pub fn reset(&mut self, dir: Direction) {
        match dir {
            Direction::Rx => self.rx.reset(),
            Direction::Tx => self.tx.reset(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_tracks_count_and_timestamps() {
        let mut c = Counters::default();
        let t0 = Instant::now();
        c.record(t0);
        assert_eq!(c.buffer_count, 1);
        assert_eq!(c.first_buffer_time, Some(t0));
        assert_eq!(c.last_buffer_time, Some(t0));
    }

    #[test]
    fn reset_zeroes_counters() {
        let mut c = Counters::default();
        c.record(Instant::now());
        c.reset();
        assert_eq!(c.buffer_count, 0);
        assert!(c.first_buffer_time.is_none());
    }
}
