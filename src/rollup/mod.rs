//! Usage Roll-up (spec §4.G): periodic aggregation of raw per-job
//! consumption into hourly → daily → monthly buckets, keyed by
//! association and QoS.
//!
//! Roll-up is append-plus-periodic-aggregate: raw samples accumulate,
//! then a scheduled pass folds a closed window into the next coarser
//! bucket. Idempotence comes from keying every bucket by its exact
//! `(start, end)` window and overwriting rather than incrementing on
//! re-roll.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

/// One raw usage observation, the roll-up's input (fed by the accounting
/// worker applying a committed Update Bus object).
#[derive(Debug, Clone)]
pub struct RawUsage {
    pub assoc_id: u32,
    pub qos_id: Option<u32>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub cpu_seconds: u64,
    pub wall_seconds: u64,
    pub mem_mb_seconds: u64,
}

/// The key identifying one aggregate bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub assoc_id: u32,
    pub qos_id: Option<u32>,
    pub window_start: DateTime<Utc>,
}

/// An aggregate bucket's accumulated value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketValue {
    pub cpu_seconds: u64,
    pub wall_seconds: u64,
    pub mem_mb_seconds: u64,
}

impl BucketValue {
    fn add(&mut self, other: &BucketValue) {
        self.cpu_seconds += other.cpu_seconds;
        self.wall_seconds += other.wall_seconds;
        self.mem_mb_seconds += other.mem_mb_seconds;
    }
}

#[derive(Debug, Default)]
struct Buckets {
    hourly: HashMap<BucketKey, BucketValue>,
    daily: HashMap<BucketKey, BucketValue>,
    monthly: HashMap<BucketKey, BucketValue>,
}

/// The Usage Roll-up engine.
pub struct Rollup {
    buckets: RwLock<Buckets>,
    raw: RwLock<Vec<RawUsage>>,
    archive_data: bool,
    archived: RwLock<Vec<(BucketKey, BucketValue)>>,
}

fn hour_floor(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_minute(0).unwrap().with_second(0).unwrap().with_nanosecond(0).unwrap()
}

fn day_floor(t: DateTime<Utc>) -> DateTime<Utc> {
    hour_floor(t).with_hour(0).unwrap()
}

fn month_floor(t: DateTime<Utc>) -> DateTime<Utc> {
    day_floor(t).with_day(1).unwrap()
}

impl Rollup {
    pub fn new(archive_data: bool) -> Self {
        Self {
            buckets: RwLock::new(Buckets::default()),
            raw: RwLock::new(Vec::new()),
            archive_data,
            archived: RwLock::new(Vec::new()),
        }
    }

    /// Record a raw sample, awaiting its next roll.
    pub fn record(&self, sample: RawUsage) {
        self.raw.write().push(sample);
    }

    /// Roll every raw sample whose `period_start` falls in `[start, end)`
    /// into hourly buckets, then fold closed hourlies into dailies and
    /// closed dailies into monthlies. Idempotent: re-rolling the same
    /// window recomputes identical bucket values rather than adding to
    /// them (spec §8's idempotence property).
    pub fn roll(&self, start: DateTime<Utc>, end: DateTime<Utc>) {
        let raw = self.raw.read();
        let mut hourly_window: HashMap<BucketKey, BucketValue> = HashMap::new();
        for sample in raw.iter() {
            if sample.period_start < start || sample.period_start >= end {
                continue;
            }
            let key = BucketKey {
                assoc_id: sample.assoc_id,
                qos_id: sample.qos_id,
                window_start: hour_floor(sample.period_start),
            };
            let entry = hourly_window.entry(key).or_default();
            entry.add(&BucketValue {
                cpu_seconds: sample.cpu_seconds,
                wall_seconds: sample.wall_seconds,
                mem_mb_seconds: sample.mem_mb_seconds,
            });
        }
        drop(raw);

        let mut buckets = self.buckets.write();
        for (key, value) in hourly_window {
            buckets.hourly.insert(key, value);
        }

        self.fold_closed(&mut buckets, end);
    }

    /// Recompute daily buckets from every hourly bucket whose hour has
    /// fully elapsed by `now`, and monthly buckets from every daily bucket
    /// whose day has fully elapsed. Recomputing from scratch each time
    /// (rather than incrementing) is what makes a re-roll idempotent.
    fn fold_closed(&self, buckets: &mut Buckets, now: DateTime<Utc>) {
        let mut daily: HashMap<BucketKey, BucketValue> = HashMap::new();
        for (key, value) in &buckets.hourly {
            if key.window_start + ChronoDuration::hours(1) > now {
                continue;
            }
            let day_key = BucketKey {
                assoc_id: key.assoc_id,
                qos_id: key.qos_id,
                window_start: day_floor(key.window_start),
            };
            daily.entry(day_key).or_default().add(value);
        }
        buckets.daily = daily;

        let mut monthly: HashMap<BucketKey, BucketValue> = HashMap::new();
        for (key, value) in &buckets.daily {
            if key.window_start + ChronoDuration::days(1) > now {
                continue;
            }
            let month_key = BucketKey {
                assoc_id: key.assoc_id,
                qos_id: key.qos_id,
                window_start: month_floor(key.window_start),
            };
            monthly.entry(month_key).or_default().add(value);
        }
        buckets.monthly = monthly;
    }

    pub fn hourly(&self, key: &BucketKey) -> Option<BucketValue> {
        self.buckets.read().hourly.get(key).copied()
    }

    pub fn daily(&self, key: &BucketKey) -> Option<BucketValue> {
        self.buckets.read().daily.get(key).copied()
    }

    pub fn monthly(&self, key: &BucketKey) -> Option<BucketValue> {
        self.buckets.read().monthly.get(key).copied()
    }

    /// Dump aggregates older than `cutoff` to the archive sink (in-process
    /// stand-in here — the real sink is the accounting store, a capability
    /// interface outside this core) and drop them from the live map, when
    /// `archive_data` is set.
    pub fn archive_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        if !self.archive_data {
            return 0;
        }
        let mut buckets = self.buckets.write();
        let mut archived = self.archived.write();
        let mut count = 0;
        let buckets = &mut *buckets;
        for map in [&mut buckets.hourly, &mut buckets.daily, &mut buckets.monthly] {
            let stale: Vec<BucketKey> = map.keys().filter(|k| k.window_start < cutoff).cloned().collect();
            for key in stale {
                if let Some(value) = map.remove(&key) {
                    archived.push((key, value));
                    count += 1;
                }
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(assoc_id: u32, start: DateTime<Utc>, cpu_seconds: u64) -> RawUsage {
        RawUsage {
            assoc_id,
            qos_id: None,
            period_start: start,
            period_end: start + ChronoDuration::minutes(30),
            cpu_seconds,
            wall_seconds: 1800,
            mem_mb_seconds: 0,
        }
    }

    #[test]
    fn roll_is_idempotent_over_same_window() {
        let rollup = Rollup::new(false);
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 10, 15, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2026, 1, 1, 10, 45, 0).unwrap();
        rollup.record(sample(1, t0, 100));
        rollup.record(sample(1, t1, 50));

        let window_end = Utc.with_ymd_and_hms(2026, 1, 1, 11, 0, 0).unwrap();
        rollup.roll(Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap(), window_end);
        let key = BucketKey { assoc_id: 1, qos_id: None, window_start: hour_floor(t0) };
        let first = rollup.hourly(&key).unwrap();
        assert_eq!(first.cpu_seconds, 150);

        rollup.roll(Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap(), window_end);
        let second = rollup.hourly(&key).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn hourly_folds_into_daily_once_hour_elapsed() {
        let rollup = Rollup::new(false);
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 10, 15, 0).unwrap();
        rollup.record(sample(2, t0, 200));
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        rollup.roll(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(), now);

        let day_key = BucketKey { assoc_id: 2, qos_id: None, window_start: day_floor(t0) };
        let daily = rollup.daily(&day_key).unwrap();
        assert_eq!(daily.cpu_seconds, 200);
    }
}
