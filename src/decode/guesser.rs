//! Statistical heart-rate offset guesser for unrecognized frame layouts.
//!
//! For every byte offset seen so far the guesser keeps running statistics of
//! the values that fall inside the plausible heart-rate range. After each
//! frame it scores all offsets and reports the current byte of the best one.
//!
//! Scoring of an offset with `n >= 8` plausible samples:
//!
//! * `+2n`
//! * `-5` when the value never changes (flatline)
//! * `-10` when more than 80% of consecutive samples change (noise),
//!   otherwise up to `+5` peaking at a 30% change rate
//! * `-25 * rate` of consecutive ±1 steps (jitter)
//! * `-2` per unit of standard deviation above 30
//! * `-4` each for a mean below 40 or above 210

use crate::event::HeartRate;

const MIN_SAMPLES: u32 = 8;
const NOISE_CHANGE_RATE: f64 = 0.8;
const IDEAL_CHANGE_RATE: f64 = 0.3;
const MAX_STD: f64 = 30.0;

/// Why the guess has (or lacks) a heart rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuessNote {
    /// The best offset holds a plausible value.
    Auto,
    /// No offset has enough samples yet.
    NoCandidate,
    /// The best offset holds an implausible value in this frame.
    OutOfRange,
}

impl GuessNote {
    pub fn as_str(self) -> &'static str {
        match self {
            GuessNote::Auto => "auto",
            GuessNote::NoCandidate => "no_candidate",
            GuessNote::OutOfRange => "out_of_range",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BpmGuess {
    pub bpm: Option<HeartRate>,
    pub offset: Option<usize>,
    pub note: GuessNote,
}

#[derive(Debug, Clone, Default)]
struct OffsetStats {
    in_range: u32,
    changes: u32,
    step1: u32,
    last: Option<u8>,
    sum: f64,
    sumsq: f64,
}

impl OffsetStats {
    fn observe(&mut self, value: u8) {
        if HeartRate::new(value).is_none() {
            return;
        }
        self.in_range += 1;
        self.sum += f64::from(value);
        self.sumsq += f64::from(value) * f64::from(value);
        if let Some(last) = self.last {
            if last != value {
                self.changes += 1;
            }
            if last.abs_diff(value) == 1 {
                self.step1 += 1;
            }
        }
        self.last = Some(value);
    }

    fn score(&self) -> Option<i64> {
        if self.in_range < MIN_SAMPLES {
            return None;
        }
        let n = f64::from(self.in_range);
        let mean = self.sum / n;
        let std = (self.sumsq / n - mean * mean).max(0.0).sqrt();
        let pairs = f64::from(self.in_range.saturating_sub(1).max(1));
        let change_rate = f64::from(self.changes) / pairs;
        let step1_rate = f64::from(self.step1) / pairs;

        let mut score = i64::from(self.in_range) * 2;
        if self.changes == 0 {
            score -= 5;
        }
        if change_rate > NOISE_CHANGE_RATE {
            score -= 10;
        } else {
            score += round_half_up(10.0 * (0.5 - (change_rate - IDEAL_CHANGE_RATE).abs()));
        }
        score -= round_half_up(step1_rate * 25.0);
        if std > MAX_STD {
            score -= round_half_up((std - MAX_STD) * 2.0);
        }
        if mean < 40.0 {
            score -= 4;
        }
        if mean > 210.0 {
            score -= 4;
        }
        Some(score)
    }
}

fn round_half_up(value: f64) -> i64 {
    (value + 0.5).floor() as i64
}

/// Per-connection guesser state. Never shared between connections.
#[derive(Debug, Clone, Default)]
pub struct BpmGuesser {
    stats: Vec<OffsetStats>,
    best: Option<usize>,
}

impl BpmGuesser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one frame and return the current guess for it.
    pub fn update(&mut self, frame: &[u8]) -> BpmGuess {
        if self.stats.len() < frame.len() {
            self.stats.resize_with(frame.len(), OffsetStats::default);
        }
        for (stats, &value) in self.stats.iter_mut().zip(frame) {
            stats.observe(value);
        }

        self.best = self.choose_best();
        let Some(offset) = self.best else {
            return BpmGuess {
                bpm: None,
                offset: None,
                note: GuessNote::NoCandidate,
            };
        };

        match frame.get(offset).copied().and_then(HeartRate::new) {
            Some(bpm) => BpmGuess {
                bpm: Some(bpm),
                offset: Some(offset),
                note: GuessNote::Auto,
            },
            None => BpmGuess {
                bpm: None,
                offset: Some(offset),
                note: GuessNote::OutOfRange,
            },
        }
    }

    /// Offset currently believed to carry the heart rate.
    pub fn best_offset(&self) -> Option<usize> {
        self.best
    }

    /// Highest scoring offset; the lowest offset wins ties.
    fn choose_best(&self) -> Option<usize> {
        let mut best: Option<(usize, i64)> = None;
        for (idx, stats) in self.stats.iter().enumerate() {
            let Some(score) = stats.score() else {
                continue;
            };
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((idx, score));
            }
        }
        best.map(|(idx, _)| idx)
    }
}
