// Candlestick Pattern Detection - scans recent candles at candle boundaries
// Independent strength functions per formation, fixed priority, cooldown

use crate::core::types::{DetectedPattern, OhlcCandle, PatternKind};
use tracing::debug;

/// Completed candles that must elapse between accepted patterns.
const PATTERN_COOLDOWN_CANDLES: u64 = 2;

/// Body/range ratio below which a candle is a clean doji.
const DOJI_STRICT_RATIO: f64 = 0.10;
const DOJI_LOOSE_RATIO: f64 = 0.15;
/// Trigger-side wick must be at least this multiple of the body.
const WICK_BODY_MULTIPLE: f64 = 2.0;
/// Off-side wick must stay below this fraction of the range.
const OFF_WICK_RANGE_LIMIT: f64 = 0.30;
/// Star body must stay within this fraction of the first candle's body.
const STAR_BODY_RATIO: f64 = 0.40;

// ============================================================================
// Strength functions: 0.0 = no match, otherwise confidence in (0, 1]
// ============================================================================

pub fn doji_strength(candle: &OhlcCandle) -> f64 {
    let range = candle.range();
    if range <= 0.0 {
        return 0.0;
    }
    let ratio = candle.body() / range;
    if ratio < DOJI_STRICT_RATIO {
        1.0
    } else if ratio < DOJI_LOOSE_RATIO {
        0.7
    } else {
        0.0
    }
}

pub fn hammer_strength(candle: &OhlcCandle) -> f64 {
    let range = candle.range();
    let body = candle.body();
    if range <= 0.0 {
        return 0.0;
    }
    let lower = candle.lower_wick();
    let upper = candle.upper_wick();
    if lower >= WICK_BODY_MULTIPLE * body && body > 0.0 && upper < OFF_WICK_RANGE_LIMIT * range {
        (lower / body / 4.0).min(1.0)
    } else {
        0.0
    }
}

pub fn shooting_star_strength(candle: &OhlcCandle) -> f64 {
    let range = candle.range();
    let body = candle.body();
    if range <= 0.0 {
        return 0.0;
    }
    let lower = candle.lower_wick();
    let upper = candle.upper_wick();
    if upper >= WICK_BODY_MULTIPLE * body && body > 0.0 && lower < OFF_WICK_RANGE_LIMIT * range {
        (upper / body / 4.0).min(1.0)
    } else {
        0.0
    }
}

pub fn bullish_engulfing_strength(prev: &OhlcCandle, current: &OhlcCandle) -> f64 {
    if !prev.is_bearish() || !current.is_bullish() || prev.body() <= 0.0 {
        return 0.0;
    }
    // Current body must fully contain the prior bearish body
    if current.open <= prev.close && current.close >= prev.open {
        (current.body() / prev.body() / 2.0).min(1.0)
    } else {
        0.0
    }
}

pub fn bearish_engulfing_strength(prev: &OhlcCandle, current: &OhlcCandle) -> f64 {
    if !prev.is_bullish() || !current.is_bearish() || prev.body() <= 0.0 {
        return 0.0;
    }
    if current.open >= prev.close && current.close <= prev.open {
        (current.body() / prev.body() / 2.0).min(1.0)
    } else {
        0.0
    }
}

pub fn morning_star_strength(first: &OhlcCandle, star: &OhlcCandle, third: &OhlcCandle) -> f64 {
    if !first.is_bearish() || first.body() <= 0.0 || !third.is_bullish() {
        return 0.0;
    }
    if star.body() > STAR_BODY_RATIO * first.body() {
        return 0.0;
    }
    let midpoint = first.midpoint();
    if third.close <= midpoint {
        return 0.0;
    }
    let half_range = first.range() / 2.0;
    if half_range <= 0.0 {
        return 0.0;
    }
    ((third.close - midpoint) / half_range).clamp(0.1, 1.0)
}

pub fn evening_star_strength(first: &OhlcCandle, star: &OhlcCandle, third: &OhlcCandle) -> f64 {
    if !first.is_bullish() || first.body() <= 0.0 || !third.is_bearish() {
        return 0.0;
    }
    if star.body() > STAR_BODY_RATIO * first.body() {
        return 0.0;
    }
    let midpoint = first.midpoint();
    if third.close >= midpoint {
        return 0.0;
    }
    let half_range = first.range() / 2.0;
    if half_range <= 0.0 {
        return 0.0;
    }
    ((midpoint - third.close) / half_range).clamp(0.1, 1.0)
}

// ============================================================================
// Scanner
// ============================================================================

/// Scans the most recent candles at each completed-candle boundary.
///
/// Fixed priority: three-candle formations beat two-candle formations beat
/// single-candle formations; within a span tier the directional formations
/// are checked before the neutral doji. Only the single highest-priority
/// match is kept, and a cooldown suppresses re-firing until
/// `PATTERN_COOLDOWN_CANDLES` further candles have completed.
pub struct PatternScanner {
    last_accepted_at: Option<u64>,
}

impl PatternScanner {
    pub fn new() -> Self {
        Self { last_accepted_at: None }
    }

    /// Forget all state, e.g. after a symbol change.
    pub fn reset(&mut self) {
        self.last_accepted_at = None;
    }

    /// Evaluate the candle tail. `completed_candles` is the total number of
    /// candle windows closed so far for this symbol (from the uncapped tick
    /// counter).
    pub fn scan(
        &mut self,
        candles: &[OhlcCandle],
        completed_candles: u64,
        timestamp_ms: i64,
    ) -> Option<DetectedPattern> {
        if candles.is_empty() || completed_candles == 0 {
            return None;
        }

        // Cooldown applies to every pattern except the very first
        if let Some(last) = self.last_accepted_at {
            if completed_candles - last < PATTERN_COOLDOWN_CANDLES {
                return None;
            }
        }

        let (kind, strength) = Self::best_match(candles)?;
        self.last_accepted_at = Some(completed_candles);

        let pattern = DetectedPattern {
            kind,
            sentiment: kind.sentiment(),
            strength,
            timestamp_ms,
            candle_index: completed_candles - 1,
        };
        debug!(
            kind = %pattern.kind,
            strength = pattern.strength,
            candle = pattern.candle_index,
            "Pattern detected"
        );
        Some(pattern)
    }

    fn best_match(candles: &[OhlcCandle]) -> Option<(PatternKind, f64)> {
        let current = candles.last()?;
        let prev = candles.len().checked_sub(2).map(|i| &candles[i]);
        let third_back = candles.len().checked_sub(3).map(|i| &candles[i]);

        if let (Some(first), Some(star)) = (third_back, prev) {
            let strength = morning_star_strength(first, star, current);
            if strength > 0.0 {
                return Some((PatternKind::MorningStar, strength));
            }
            let strength = evening_star_strength(first, star, current);
            if strength > 0.0 {
                return Some((PatternKind::EveningStar, strength));
            }
        }

        if let Some(prev) = prev {
            let strength = bullish_engulfing_strength(prev, current);
            if strength > 0.0 {
                return Some((PatternKind::BullishEngulfing, strength));
            }
            let strength = bearish_engulfing_strength(prev, current);
            if strength > 0.0 {
                return Some((PatternKind::BearishEngulfing, strength));
            }
        }

        let strength = hammer_strength(current);
        if strength > 0.0 {
            return Some((PatternKind::Hammer, strength));
        }
        let strength = shooting_star_strength(current);
        if strength > 0.0 {
            return Some((PatternKind::ShootingStar, strength));
        }
        let strength = doji_strength(current);
        if strength > 0.0 {
            return Some((PatternKind::Doji, strength));
        }

        None
    }
}

impl Default for PatternScanner {
    fn default() -> Self {
        Self::new()
    }
}
