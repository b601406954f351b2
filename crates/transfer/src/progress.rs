use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

/// Percentage of `done` over `total`, rounded and clamped to 0..=100.
pub fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (done as f64 / total as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

// ---------------------------------------------------------------------------
// ProgressTracker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct ChunkEntry {
    /// Bytes already on the server when this attempt started.
    resumed: u64,
    /// Bytes sent during this attempt.
    sent: u64,
    total: u64,
}

impl ChunkEntry {
    fn done(&self) -> u64 {
        (self.resumed + self.sent).min(self.total)
    }
}

/// Per-chunk progress of one upload attempt (thread-safe).
///
/// A chunk's percentage is `(sent this attempt + resume offset) / planned size`.
pub struct ProgressTracker {
    chunks: RwLock<BTreeMap<String, ChunkEntry>>,
    speed: SpeedCalculator,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(BTreeMap::new()),
            speed: SpeedCalculator::new(None, None),
        }
    }

    /// Starts tracking a chunk whose server-side cursor is `resumed`.
    ///
    /// Returns the chunk's starting percentage.
    pub fn register(&self, chunk: &str, total: u64, resumed: u64) -> u8 {
        let entry = ChunkEntry {
            resumed: resumed.min(total),
            sent: 0,
            total,
        };
        let pct = percent_of(entry.done(), total);
        self.chunks.write().unwrap().insert(chunk.to_string(), entry);
        pct
    }

    /// Resets a chunk's cursor before it is retried.
    pub fn rebase(&self, chunk: &str, resumed: u64) -> Option<u8> {
        let mut chunks = self.chunks.write().unwrap();
        let entry = chunks.get_mut(chunk)?;
        entry.resumed = resumed.min(entry.total);
        entry.sent = 0;
        Some(percent_of(entry.done(), entry.total))
    }

    /// Records the cumulative bytes sent for `chunk` in the current request.
    ///
    /// Returns the new percentage if it changed.
    pub fn record(&self, chunk: &str, sent: u64) -> Option<u8> {
        let mut chunks = self.chunks.write().unwrap();
        let entry = chunks.get_mut(chunk)?;
        let before = percent_of(entry.done(), entry.total);
        if sent > entry.sent {
            self.speed.add_sample(sent - entry.sent);
        }
        entry.sent = sent;
        let after = percent_of(entry.done(), entry.total);
        (after != before).then_some(after)
    }

    /// Marks a chunk as fully persisted.
    pub fn complete(&self, chunk: &str) {
        let mut chunks = self.chunks.write().unwrap();
        if let Some(entry) = chunks.get_mut(chunk) {
            entry.sent = entry.total - entry.resumed;
        }
    }

    /// Returns `chunk name -> percent` for every tracked chunk.
    pub fn snapshot(&self) -> BTreeMap<String, u8> {
        let chunks = self.chunks.read().unwrap();
        chunks
            .iter()
            .map(|(name, e)| (name.clone(), percent_of(e.done(), e.total)))
            .collect()
    }

    /// Returns `(bytes persisted, bytes planned)` across all chunks.
    pub fn totals(&self) -> (u64, u64) {
        let chunks = self.chunks.read().unwrap();
        chunks
            .values()
            .fold((0, 0), |(done, total), e| (done + e.done(), total + e.total))
    }

    /// Current transfer rate in bytes/second.
    pub fn bytes_per_second(&self) -> f64 {
        self.speed.bytes_per_second()
    }

    /// Estimated time to finish the bytes not yet persisted.
    pub fn eta(&self) -> Option<Duration> {
        let (done, total) = self.totals();
        self.speed.eta(total.saturating_sub(done))
    }

    /// Drops all chunks (start of a new attempt).
    pub fn clear(&self) {
        self.chunks.write().unwrap().clear();
        self.speed.reset();
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer speed using a sliding window of samples.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 256).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples: max_samples.unwrap_or(256),
                window_size: window_size.unwrap_or(Duration::from_secs(5)),
            }),
        }
    }

    /// Records `bytes` transferred at the current instant.
    pub fn add_sample(&self, bytes: u64) {
        let mut s = self.inner.lock().unwrap();
        let now = Instant::now();
        s.samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });

        let window = s.window_size;
        s.samples
            .retain(|sample| now.duration_since(sample.timestamp) <= window);

        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Average speed in bytes/second within the window (0.0 below 2 samples).
    pub fn bytes_per_second(&self) -> f64 {
        let s = self.inner.lock().unwrap();
        let (Some(first), Some(last)) = (s.samples.first(), s.samples.last()) else {
            return 0.0;
        };
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if s.samples.len() < 2 || elapsed.is_zero() {
            return 0.0;
        }

        let total: u64 = s.samples.iter().map(|sample| sample.bytes).sum();
        total as f64 / elapsed.as_secs_f64()
    }

    /// Estimates time remaining for `remaining_bytes`; `None` while speed is unknown.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    pub fn reset(&self) {
        self.inner.lock().unwrap().samples.clear();
    }
}
