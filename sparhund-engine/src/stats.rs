//! Process-wide counters shared by every decoder.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct Counters {
    packets: u64,
    bytes: u64,
    errors: BTreeMap<String, u64>,
}

/// Packet, byte and error-subject totals behind a single lock.
#[derive(Debug)]
pub struct SharedStats {
    counters: Mutex<Counters>,
    started: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub packets: u64,
    pub bytes: u64,
    pub errors: BTreeMap<String, u64>,
    pub elapsed: Duration,
}

impl StatsSnapshot {
    pub fn total_errors(&self) -> u64 {
        self.errors.values().sum()
    }
}

impl SharedStats {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            started: Instant::now(),
        }
    }

    #[inline]
    pub fn record_packet(&self, bytes: usize) {
        let mut counters = self.counters.lock();
        counters.packets += 1;
        counters.bytes += bytes as u64;
    }

    pub fn record_error(&self, subject: &str) {
        let mut counters = self.counters.lock();
        match counters.errors.get_mut(subject) {
            Some(count) => *count += 1,
            None => {
                counters.errors.insert(subject.to_string(), 1);
            }
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let counters = self.counters.lock();
        StatsSnapshot {
            packets: counters.packets,
            bytes: counters.bytes,
            errors: counters.errors.clone(),
            elapsed: self.started.elapsed(),
        }
    }
}

impl Default for SharedStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn concurrent_updates_are_not_lost() {
        let stats = Arc::new(SharedStats::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_packet(10);
                        stats.record_error("http request");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.packets, 4000);
        assert_eq!(snapshot.bytes, 40_000);
        assert_eq!(snapshot.errors["http request"], 4000);
        assert_eq!(snapshot.total_errors(), 4000);
    }
}
