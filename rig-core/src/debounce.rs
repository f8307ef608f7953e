//! Load cell debounce cache.
//!
//! The HX711 protocol is slow relative to the sampling tick, so reads are rate
//! limited by a poll floor and bridged with the last valid value while it is
//! still fresh. A cheaper ready-line check runs on its own, sparser cadence and
//! only feeds [`ReadyStats`]; it never gates the read.

use core::time::Duration;

use crate::ports::{LoadCellPort, RAW_READ_FAILED};
use crate::telemetry::TelemetryInstant;

/// Minimum spacing between protocol reads.
pub const POLL_FLOOR: Duration = Duration::from_millis(20);
/// Minimum spacing between ready-line checks.
pub const READY_CHECK_FLOOR: Duration = Duration::from_millis(100);
/// Age after which a cached value is no longer reported.
pub const STALENESS: Duration = Duration::from_millis(1_000);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DebounceConfig {
    pub poll_floor: Duration,
    pub ready_check_floor: Duration,
    pub staleness: Duration,
}

impl DebounceConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            poll_floor: POLL_FLOOR,
            ready_check_floor: READY_CHECK_FLOOR,
            staleness: STALENESS,
        }
    }

    #[must_use]
    pub const fn with_poll_floor(mut self, poll_floor: Duration) -> Self {
        self.poll_floor = poll_floor;
        self
    }

    #[must_use]
    pub const fn with_ready_check_floor(mut self, ready_check_floor: Duration) -> Self {
        self.ready_check_floor = ready_check_floor;
        self
    }

    #[must_use]
    pub const fn with_staleness(mut self, staleness: Duration) -> Self {
        self.staleness = staleness;
        self
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a reading came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadingSource {
    /// Read from the sensor on this call.
    Fresh,
    /// Served from the cache, either inside the poll floor or after a failed read.
    Cached,
    /// No fresh read and no usable cache.
    Unavailable,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LoadCellReading {
    pub value: f32,
    pub valid: bool,
    pub source: ReadingSource,
    /// Result of the last ready-line check.
    pub ready: bool,
}

/// Counters for ready-line checks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadyStats {
    pub ready: u32,
    pub not_ready: u32,
}

impl ReadyStats {
    pub fn record(&mut self, ready: bool) {
        if ready {
            self.ready = self.ready.saturating_add(1);
        } else {
            self.not_ready = self.not_ready.saturating_add(1);
        }
    }

    #[must_use]
    pub fn checks(&self) -> u32 {
        self.ready.saturating_add(self.not_ready)
    }

    /// Share of checks that found the sensor ready, in whole percent.
    #[must_use]
    pub fn ready_percent(&self) -> u8 {
        let checks = u64::from(self.checks());
        if checks == 0 {
            return 0;
        }
        let percent = u64::from(self.ready) * 100 / checks;
        u8::try_from(percent).unwrap_or(100)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Clone, Copy, Debug)]
struct CachedValue<TInstant> {
    value: f32,
    captured_at: TInstant,
}

/// Rate-limited, cache-bridged view of a [`LoadCellPort`].
pub struct LoadCellDebounce<TInstant> {
    config: DebounceConfig,
    cached: Option<CachedValue<TInstant>>,
    last_poll: Option<TInstant>,
    last_ready_check: Option<TInstant>,
    last_ready: bool,
    stats: ReadyStats,
}

impl<TInstant> LoadCellDebounce<TInstant>
where
    TInstant: TelemetryInstant,
{
    #[must_use]
    pub const fn new(config: DebounceConfig) -> Self {
        Self {
            config,
            cached: None,
            last_poll: None,
            last_ready_check: None,
            last_ready: false,
            stats: ReadyStats {
                ready: 0,
                not_ready: 0,
            },
        }
    }

    pub fn read<S: LoadCellPort>(&mut self, sensor: &mut S, now: TInstant) -> LoadCellReading {
        let poll_due = self
            .last_poll
            .is_none_or(|last| now.saturating_duration_since(last) >= self.config.poll_floor);
        if !poll_due {
            return self.from_cache(now);
        }

        let ready_due = self.last_ready_check.is_none_or(|last| {
            now.saturating_duration_since(last) >= self.config.ready_check_floor
        });
        if ready_due {
            self.last_ready = sensor.is_ready();
            self.last_ready_check = Some(now);
            self.stats.record(self.last_ready);
        }

        self.last_poll = Some(now);
        let raw = sensor.read_raw();
        if raw == RAW_READ_FAILED {
            return self.from_cache(now);
        }

        #[allow(clippy::cast_precision_loss)]
        let value = raw as f32;
        self.cached = Some(CachedValue {
            value,
            captured_at: now,
        });
        LoadCellReading {
            value,
            valid: true,
            source: ReadingSource::Fresh,
            ready: self.last_ready,
        }
    }

    fn from_cache(&self, now: TInstant) -> LoadCellReading {
        match self.cached {
            Some(cached)
                if now.saturating_duration_since(cached.captured_at) < self.config.staleness =>
            {
                LoadCellReading {
                    value: cached.value,
                    valid: true,
                    source: ReadingSource::Cached,
                    ready: self.last_ready,
                }
            }
            _ => LoadCellReading {
                value: 0.0,
                valid: false,
                source: ReadingSource::Unavailable,
                ready: self.last_ready,
            },
        }
    }

    pub fn stats(&self) -> ReadyStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    pub fn config(&self) -> DebounceConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, Debug)]
    struct MockInstant(u64);

    impl TelemetryInstant for MockInstant {
        fn saturating_duration_since(&self, earlier: Self) -> Duration {
            Duration::from_millis(self.0.saturating_sub(earlier.0))
        }
    }

    struct ScriptedCell {
        reads: heapless::Deque<i32, 8>,
        ready: bool,
        ready_checks: u32,
        raw_reads: u32,
    }

    impl ScriptedCell {
        fn new(values: &[i32]) -> Self {
            let mut reads = heapless::Deque::new();
            for value in values {
                reads.push_back(*value).unwrap();
            }
            Self {
                reads,
                ready: true,
                ready_checks: 0,
                raw_reads: 0,
            }
        }
    }

    impl LoadCellPort for ScriptedCell {
        fn is_ready(&mut self) -> bool {
            self.ready_checks += 1;
            self.ready
        }

        fn read_raw(&mut self) -> i32 {
            self.raw_reads += 1;
            self.reads.pop_front().unwrap_or(RAW_READ_FAILED)
        }
    }

    #[test]
    fn failed_read_falls_back_to_fresh_cache() {
        let mut cell = ScriptedCell::new(&[250, RAW_READ_FAILED]);
        let mut debounce = LoadCellDebounce::new(DebounceConfig::default());

        assert_eq!(debounce.read(&mut cell, MockInstant(0)).source, ReadingSource::Fresh);
        let reading = debounce.read(&mut cell, MockInstant(30));
        assert_eq!(reading.source, ReadingSource::Cached);
        assert!(reading.valid);
        assert_eq!(reading.value, 250.0);
    }

    #[test]
    fn no_cache_means_invalid_zero() {
        let mut cell = ScriptedCell::new(&[]);
        let mut debounce = LoadCellDebounce::new(DebounceConfig::default());

        let reading = debounce.read(&mut cell, MockInstant(0));
        assert!(!reading.valid);
        assert_eq!(reading.value, 0.0);
        assert_eq!(reading.source, ReadingSource::Unavailable);
    }

    #[test]
    fn ready_checks_follow_their_own_floor() {
        let mut cell = ScriptedCell::new(&[1, 2, 3, 4, 5, 6]);
        let mut debounce = LoadCellDebounce::new(DebounceConfig::default());

        for t in [0, 20, 40, 60, 80, 100] {
            let _ = debounce.read(&mut cell, MockInstant(t));
        }

        assert_eq!(cell.raw_reads, 6);
        assert_eq!(cell.ready_checks, 2);
        assert_eq!(debounce.stats().ready_percent(), 100);
    }

    #[test]
    fn ready_percent_rounds_down() {
        let mut stats = ReadyStats::default();
        stats.record(true);
        stats.record(false);
        stats.record(false);
        assert_eq!(stats.ready_percent(), 33);
        stats.reset();
        assert_eq!(stats.checks(), 0);
        assert_eq!(stats.ready_percent(), 0);
    }
}
