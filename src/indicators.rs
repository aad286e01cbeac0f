use rust_decimal::Decimal;

use crate::types::Candle;

// =============================================================================
// EMA
// =============================================================================

/// Recursive EMA with k = 2/(period+1), seeded with the first input.
/// Short series give degraded values through the warm-up of the recursion;
/// that is the defined behavior, not an error.
#[derive(Debug, Clone)]
pub struct Ema {
    pub period: usize,
    pub current_value: Option<Decimal>,
    k: Decimal,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        let period_dec = Decimal::from(period);
        let two = Decimal::from(2);
        let k = two / (period_dec + Decimal::ONE);
        Self {
            period,
            current_value: None,
            k,
        }
    }

    pub fn update(&mut self, price: Decimal) -> Decimal {
        match self.current_value {
            Some(prev) => {
                let new_val = (price - prev) * self.k + prev;
                self.current_value = Some(new_val);
                new_val
            }
            None => {
                self.current_value = Some(price);
                price
            }
        }
    }
}

// =============================================================================
// TRUE RANGE / ATR
// =============================================================================

/// TR(i) = max(H-L, |H-C[i-1]|, |L-C[i-1]|). At i=0 the prior close is taken
/// as C[0], which collapses to H-L.
pub fn true_ranges(candles: &[Candle]) -> Vec<Decimal> {
    let mut out = Vec::with_capacity(candles.len());
    let mut prev_close: Option<Decimal> = None;
    for c in candles {
        let tr = match prev_close {
            Some(prev) => {
                let hl = c.high - c.low;
                let hc = (c.high - prev).abs();
                let lc = (c.low - prev).abs();
                hl.max(hc).max(lc)
            }
            None => c.high - c.low,
        };
        out.push(tr);
        prev_close = Some(c.close);
    }
    out
}

/// Simple rolling mean of the trailing `period` true ranges. Cells before the
/// first full window are back-filled from the first computable value; a series
/// shorter than `period` falls back to the running mean, so no cell is ever
/// left undefined.
pub fn atr_series(true_ranges: &[Decimal], period: usize) -> Vec<Decimal> {
    let len = true_ranges.len();
    if len == 0 {
        return Vec::new();
    }
    let mut out = vec![Decimal::ZERO; len];

    if len < period {
        let mut sum = Decimal::ZERO;
        for (i, tr) in true_ranges.iter().enumerate() {
            sum += *tr;
            out[i] = sum / Decimal::from(i + 1);
        }
        return out;
    }

    for i in (period - 1)..len {
        let window = &true_ranges[i + 1 - period..=i];
        let sum: Decimal = window.iter().copied().sum();
        out[i] = sum / Decimal::from(period);
    }
    let first = out[period - 1];
    for cell in out.iter_mut().take(period - 1) {
        *cell = first;
    }
    out
}

// =============================================================================
// RSI
// =============================================================================

/// RSI over a trailing window of close-to-close deltas. avg_loss = 0
/// saturates to 100 (explicit division-by-zero policy); before the first
/// delta exists the value is the neutral 50. Warm-up indices average over
/// the deltas available so far.
pub fn rsi_series(closes: &[Decimal], period: usize) -> Vec<Decimal> {
    let len = closes.len();
    let mut out = Vec::with_capacity(len);
    let hundred = Decimal::from(100);

    let mut gains: Vec<Decimal> = Vec::with_capacity(len);
    let mut losses: Vec<Decimal> = Vec::with_capacity(len);
    for i in 1..len {
        let delta = closes[i] - closes[i - 1];
        if delta > Decimal::ZERO {
            gains.push(delta);
            losses.push(Decimal::ZERO);
        } else {
            gains.push(Decimal::ZERO);
            losses.push(-delta);
        }
    }

    for i in 0..len {
        if i == 0 {
            out.push(Decimal::from(50));
            continue;
        }
        let window = i.min(period);
        let start = i - window;
        let avg_gain: Decimal =
            gains[start..i].iter().copied().sum::<Decimal>() / Decimal::from(window);
        let avg_loss: Decimal =
            losses[start..i].iter().copied().sum::<Decimal>() / Decimal::from(window);

        let rsi = if avg_loss.is_zero() {
            hundred
        } else {
            let rs = avg_gain / avg_loss;
            hundred - (hundred / (Decimal::ONE + rs))
        };
        out.push(rsi);
    }
    out
}

// =============================================================================
// PIVOT / FRACTAL DETECTION
// =============================================================================

/// A candle is a pivot high iff its High equals the maximum High inside the
/// centered window [i-swing, i+swing]. Windows that run past either series
/// boundary are not evaluated; ties inside the window flag every candle that
/// shares the extreme, and the forward-fill downstream picks the most recent.
pub fn is_pivot_high(highs: &[Decimal], idx: usize, swing: usize) -> bool {
    if idx < swing || idx + swing >= highs.len() {
        return false;
    }
    let window = &highs[idx - swing..=idx + swing];
    let max = window.iter().copied().max().unwrap_or(highs[idx]);
    highs[idx] == max
}

pub fn is_pivot_low(lows: &[Decimal], idx: usize, swing: usize) -> bool {
    if idx < swing || idx + swing >= lows.len() {
        return false;
    }
    let window = &lows[idx - swing..=idx + swing];
    let min = window.iter().copied().min().unwrap_or(lows[idx]);
    lows[idx] == min
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn candle(open: i64, high: i64, low: i64, close: i64) -> Candle {
        Candle {
            timestamp: Utc.timestamp_opt(0, 0).unwrap(),
            open: Decimal::new(open, 4),
            high: Decimal::new(high, 4),
            low: Decimal::new(low, 4),
            close: Decimal::new(close, 4),
            volume: Decimal::from(1000),
            is_london: false,
            is_ny: false,
            is_killzone: false,
        }
    }

    #[test]
    fn test_ema_seeds_with_first_value() {
        let mut ema = Ema::new(50);
        assert_eq!(ema.update(Decimal::from(100)), Decimal::from(100));
        let second = ema.update(Decimal::from(200));
        assert!(second > Decimal::from(100) && second < Decimal::from(200));
    }

    #[test]
    fn test_true_range_first_candle_is_high_low() {
        let candles = vec![candle(11000, 11030, 10990, 11010)];
        let trs = true_ranges(&candles);
        assert_eq!(trs[0], Decimal::new(40, 4));
    }

    #[test]
    fn test_true_range_uses_prev_close_gap() {
        // Gap up: prev close 1.1010, next low 1.1050 -> TR includes the gap.
        let candles = vec![
            candle(11000, 11030, 10990, 11010),
            candle(11055, 11080, 11050, 11070),
        ];
        let trs = true_ranges(&candles);
        // max(0.0030, |1.1080-1.1010|=0.0070, |1.1050-1.1010|=0.0040)
        assert_eq!(trs[1], Decimal::new(70, 4));
    }

    #[test]
    fn test_atr_backfills_warmup_cells() {
        let trs: Vec<Decimal> = (1..=20).map(Decimal::from).collect();
        let atr = atr_series(&trs, 14);
        assert_eq!(atr.len(), trs.len());
        // First full window covers 1..=14 -> mean 7.5
        assert_eq!(atr[13], Decimal::new(75, 1));
        for i in 0..13 {
            assert_eq!(atr[i], atr[13]);
        }
        assert!(atr.iter().all(|v| *v > Decimal::ZERO));
    }

    #[test]
    fn test_atr_short_series_uses_running_mean() {
        let trs = vec![Decimal::from(2), Decimal::from(4), Decimal::from(6)];
        let atr = atr_series(&trs, 14);
        assert_eq!(atr[0], Decimal::from(2));
        assert_eq!(atr[1], Decimal::from(3));
        assert_eq!(atr[2], Decimal::from(4));
    }

    #[test]
    fn test_rsi_saturates_at_100_when_no_losses() {
        let closes: Vec<Decimal> = (1..=30).map(Decimal::from).collect();
        let rsi = rsi_series(&closes, 14);
        assert_eq!(rsi.len(), closes.len());
        assert_eq!(rsi[0], Decimal::from(50));
        assert_eq!(*rsi.last().unwrap(), Decimal::from(100));
    }

    #[test]
    fn test_rsi_balanced_moves_stay_midrange() {
        // Alternating +1/-1: equal gains and losses -> RSI 50 once both sides
        // are in the window.
        let mut closes = vec![Decimal::from(100)];
        for i in 0..30 {
            let last = *closes.last().unwrap();
            let step = if i % 2 == 0 {
                Decimal::ONE
            } else {
                -Decimal::ONE
            };
            closes.push(last + step);
        }
        let rsi = rsi_series(&closes, 14);
        assert_eq!(*rsi.last().unwrap(), Decimal::from(50));
    }

    #[test]
    fn test_pivot_high_centered_window() {
        let mut highs: Vec<Decimal> = vec![Decimal::from(10); 21];
        highs[10] = Decimal::from(15);
        assert!(is_pivot_high(&highs, 10, 5));
        // Neighbor sharing a lower value is not a pivot against the spike.
        assert!(!is_pivot_high(&highs, 9, 5));
    }

    #[test]
    fn test_pivot_boundary_windows_not_evaluated() {
        let highs: Vec<Decimal> = (0..20).map(Decimal::from).collect();
        // Index 19 is the global max but the window runs past the end.
        assert!(!is_pivot_high(&highs, 19, 5));
        assert!(!is_pivot_high(&highs, 2, 5));
    }

    #[test]
    fn test_pivot_ties_flag_both() {
        let mut lows: Vec<Decimal> = vec![Decimal::from(10); 30];
        lows[12] = Decimal::from(5);
        lows[14] = Decimal::from(5);
        assert!(is_pivot_low(&lows, 12, 5));
        assert!(is_pivot_low(&lows, 14, 5));
    }
}
