//! Running statistics fed once per processing block

use rustfft::num_traits::{Float, NumCast};

/// Mean of the last `capacity` values fed
///
/// The history starts out filled with `seed`, so the mean is defined from
/// the first call.
#[derive(Debug, Clone)]
pub struct MovingAverage<T> {
    history: Vec<T>,
    index: usize,
    sum: T,
    average: T,
}

impl<T: Float> MovingAverage<T> {
    pub fn new(capacity: usize, seed: T) -> Self {
        assert!(capacity > 0, "moving average needs a non-empty window");
        let n = <T as NumCast>::from(capacity).unwrap_or_else(T::one);
        Self {
            history: vec![seed; capacity],
            index: 0,
            sum: seed * n,
            average: seed,
        }
    }

    /// Evict the oldest value and insert `value`
    pub fn feed(&mut self, value: T) {
        let oldest = std::mem::replace(&mut self.history[self.index], value);
        self.sum = self.sum - oldest + value;
        self.index = (self.index + 1) % self.history.len();
        let n = <T as NumCast>::from(self.history.len()).unwrap_or_else(T::one);
        self.average = self.sum / n;
    }

    pub fn average(&self) -> T {
        self.average
    }

    pub fn capacity(&self) -> usize {
        self.history.len()
    }
}

/// D/U ratio reported before the warm-up period has passed
pub const NEUTRAL_DU_RATIO: f64 = 2.0;

/// Running minimum and maximum of the IF level
///
/// Bounds only ever widen. Once more than `warmup` levels have been fed the
/// spread gives a desired/undesired ratio estimate.
#[derive(Debug, Clone)]
pub struct LevelRange {
    min: f64,
    max: f64,
    feeds: u64,
    warmup: u64,
}

impl LevelRange {
    pub fn new(warmup: u64) -> Self {
        Self {
            min: f64::INFINITY,
            max: 0.0,
            feeds: 0,
            warmup,
        }
    }

    pub fn feed(&mut self, level: f64) {
        self.min = self.min.min(level);
        self.max = self.max.max(level);
        self.feeds += 1;
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// `(r + 1) / (r - 1)` with `r = max / min`
    pub fn du_ratio(&self) -> f64 {
        if self.feeds <= self.warmup {
            return NEUTRAL_DU_RATIO;
        }
        let ratio = self.max / self.min;
        // flat or degenerate levels carry no information
        if !ratio.is_finite() || ratio <= 1.0 {
            return NEUTRAL_DU_RATIO;
        }
        (ratio + 1.0) / (ratio - 1.0)
    }
}

/// Reports the first time a queue grows past its high-water mark
#[derive(Debug, Clone)]
pub struct OverflowGuard {
    high_water: usize,
    tripped: bool,
}

impl OverflowGuard {
    pub fn new(high_water: usize) -> Self {
        Self {
            high_water,
            tripped: false,
        }
    }

    /// Returns true only on the first call that sees `queued > high_water`
    pub fn check(&mut self, queued: usize) -> bool {
        if self.tripped || queued <= self.high_water {
            return false;
        }
        self.tripped = true;
        true
    }

    pub fn tripped(&self) -> bool {
        self.tripped
    }
}
