//! Sliding-window bucketed counters.
//!
//! A [`Series`] accumulates `(instant, value)` events into a fixed ring of
//! buckets covering a trailing time window. Reads report the windowed sum
//! and event count, with the oldest bucket linearly faded by the fraction
//! of it that has slid out of the window. All operations take the current
//! instant explicitly, so callers (and tests) control time.

use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, Default)]
struct Bucket {
    sum: f64,
    count: f64,
}

impl Bucket {
    fn clear(&mut self) {
        self.sum = 0.0;
        self.count = 0.0;
    }
}

/// A sliding-window counter over a fixed number of time buckets.
///
/// ```
/// use std::time::{Duration, Instant};
/// use meridian_series::Series;
///
/// let start = Instant::now();
/// let mut s = Series::new(Duration::from_secs(60), 6);
/// s.add(start, 1.0);
/// s.add(start + Duration::from_secs(30), 3.0);
/// let (sum, count) = s.get(start + Duration::from_secs(30));
/// assert_eq!(sum, 4.0);
/// assert_eq!(count, 2.0);
/// ```
#[derive(Clone, Debug)]
pub struct Series {
    /// Total trailing window covered by the ring.
    window: Duration,
    /// Time span of a single bucket (`window / buckets.len()`).
    granularity: Duration,
    buckets: Vec<Bucket>,
    /// Index of the bucket currently accepting events.
    head: usize,
    /// Start instant of the head bucket. `None` until the first event.
    head_start: Option<Instant>,
}

impl Series {
    /// Create a series covering `window`, split into `buckets` ring slots.
    ///
    /// Panics if `window` is zero or `buckets` is zero.
    pub fn new(window: Duration, buckets: usize) -> Self {
        assert!(!window.is_zero(), "series window must be non-zero");
        assert!(buckets > 0, "series must have at least one bucket");
        Series {
            window,
            granularity: window / buckets as u32,
            buckets: vec![Bucket::default(); buckets],
            head: 0,
            head_start: None,
        }
    }

    /// The trailing window this series covers.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record `v` at instant `now`.
    ///
    /// Instants earlier than the head bucket are credited to the head
    /// bucket; the series never rewinds.
    pub fn add(&mut self, now: Instant, v: f64) {
        self.rotate(now);
        let head = &mut self.buckets[self.head];
        head.sum += v;
        head.count += 1.0;
    }

    /// Windowed `(sum, count)` as of `now`.
    pub fn get(&self, now: Instant) -> (f64, f64) {
        let mut sum = 0.0;
        let mut count = 0.0;
        for (idx, bucket) in self.buckets.iter().enumerate() {
            let weight = self.weight_at(idx, now);
            sum += bucket.sum * weight;
            count += bucket.count * weight;
        }
        (sum, count)
    }

    /// Windowed sum normalized to events per `per` (e.g. per minute).
    pub fn sum_per(&self, now: Instant, per: Duration) -> f64 {
        let (sum, _) = self.get(now);
        sum * (per.as_secs_f64() / self.window.as_secs_f64())
    }

    /// Advance the ring so the head bucket contains `now`.
    fn rotate(&mut self, now: Instant) {
        let Some(mut head_start) = self.head_start else {
            self.head_start = Some(now);
            return;
        };
        if now < head_start + self.granularity {
            return;
        }
        let elapsed = now.duration_since(head_start);
        let steps = (elapsed.as_nanos() / self.granularity.as_nanos()) as usize;
        if steps >= self.buckets.len() {
            // The whole ring has expired; start fresh.
            for bucket in &mut self.buckets {
                bucket.clear();
            }
            self.head_start = Some(now);
            return;
        }
        for _ in 0..steps {
            self.head = (self.head + 1) % self.buckets.len();
            self.buckets[self.head].clear();
            head_start += self.granularity;
        }
        self.head_start = Some(head_start);
    }

    /// Fraction of bucket `idx` that still lies inside `[now - window, now]`.
    fn weight_at(&self, idx: usize, now: Instant) -> f64 {
        let Some(head_start) = self.head_start else {
            return 0.0;
        };
        let len = self.buckets.len();
        // Distance (in buckets) behind the head, walking the ring backwards.
        let age = (self.head + len - idx) % len;
        let Some(bucket_start) = head_start.checked_sub(self.granularity * age as u32) else {
            return 0.0;
        };
        let bucket_end = bucket_start + self.granularity;
        let window_start = now.checked_sub(self.window);
        match window_start {
            Some(ws) if bucket_end <= ws => 0.0,
            Some(ws) if bucket_start < ws => {
                bucket_end.duration_since(ws).as_secs_f64() / self.granularity.as_secs_f64()
            }
            _ => 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    fn series() -> (Series, Instant) {
        (Series::new(WINDOW, 6), Instant::now() + WINDOW)
    }

    #[test]
    fn empty_series_reads_zero() {
        let (s, start) = series();
        assert_eq!(s.get(start), (0.0, 0.0));
        assert_eq!(s.sum_per(start, Duration::from_secs(60)), 0.0);
    }

    #[test]
    fn accumulates_within_window() {
        let (mut s, start) = series();
        s.add(start, 2.0);
        s.add(start + Duration::from_secs(15), 3.0);
        s.add(start + Duration::from_secs(35), 5.0);
        let (sum, count) = s.get(start + Duration::from_secs(35));
        assert_eq!(sum, 10.0);
        assert_eq!(count, 3.0);
    }

    #[test]
    fn old_events_expire() {
        let (mut s, start) = series();
        s.add(start, 4.0);
        // Rotate the head well past the first bucket.
        s.add(start + Duration::from_secs(90), 1.0);
        let (sum, count) = s.get(start + Duration::from_secs(90));
        assert_eq!(sum, 1.0);
        assert_eq!(count, 1.0);
    }

    #[test]
    fn oldest_bucket_fades_linearly() {
        let (mut s, start) = series();
        s.add(start, 10.0);
        // Half of the first bucket (10s granularity) has left the window:
        // the window at start+65s begins at start+5s.
        s.add(start + Duration::from_secs(50), 0.0);
        let (sum, _) = s.get(start + Duration::from_secs(65));
        assert!((sum - 5.0).abs() < 1e-9, "faded sum was {sum}");
    }

    #[test]
    fn full_expiry_clears_ring() {
        let (mut s, start) = series();
        for i in 0..6 {
            s.add(start + Duration::from_secs(i * 10), 1.0);
        }
        // Jump past an entire window with no events in between.
        s.add(start + Duration::from_secs(1000), 7.0);
        let (sum, count) = s.get(start + Duration::from_secs(1000));
        assert_eq!(sum, 7.0);
        assert_eq!(count, 1.0);
    }

    #[test]
    fn sum_per_normalizes_to_period() {
        let (mut s, start) = series();
        for i in 0..30 {
            s.add(start + Duration::from_secs(i), 1.0);
        }
        let now = start + Duration::from_secs(29);
        let per_minute = s.sum_per(now, Duration::from_secs(60));
        assert!((per_minute - 30.0).abs() < 1e-9, "rate was {per_minute}");
        let per_second = s.sum_per(now, Duration::from_secs(1));
        assert!((per_second - 0.5).abs() < 1e-9, "rate was {per_second}");
    }

    #[test]
    fn early_instants_do_not_rewind() {
        let (mut s, start) = series();
        s.add(start + Duration::from_secs(30), 1.0);
        s.add(start, 1.0);
        let (sum, count) = s.get(start + Duration::from_secs(30));
        assert_eq!(sum, 2.0);
        assert_eq!(count, 2.0);
    }
}
