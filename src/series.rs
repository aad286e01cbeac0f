use rust_decimal::Decimal;

use crate::indicators::{atr_series, is_pivot_high, is_pivot_low, rsi_series, true_ranges, Ema};
use crate::types::{Bias, Candle};

pub const ATR_PERIOD: usize = 14;
pub const RSI_PERIOD: usize = 14;

/// A confirmed local extreme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PivotKind {
    High,
    Low,
}

#[derive(Debug, Clone, Copy)]
pub struct Pivot {
    pub index: usize,
    pub price: Decimal,
    pub kind: PivotKind,
}

/// Derived columns for one candle. Immutable once computed; a re-analysis
/// always starts from the raw OHLCV again.
#[derive(Debug, Clone)]
pub struct StructureRow {
    pub ema_50: Decimal,
    pub ema_200: Decimal,
    pub true_range: Decimal,
    pub atr: Decimal,
    pub rsi: Decimal,
    pub is_pivot_high: bool,
    pub is_pivot_low: bool,
    /// Most recent confirmed pivot of each kind, forward-filled. None until
    /// the first pivot is confirmed.
    pub last_pivot_high: Option<Decimal>,
    pub last_pivot_low: Option<Decimal>,
    pub bias: Bias,
    pub fvg_bullish: bool,
    pub fvg_bearish: bool,
    pub fvg_top: Option<Decimal>,
    pub fvg_bottom: Option<Decimal>,
}

/// Candle series plus its derived structure table. One row per candle,
/// always. Building it is a pure function of the input.
#[derive(Debug, Clone)]
pub struct AnnotatedSeries {
    pub candles: Vec<Candle>,
    pub rows: Vec<StructureRow>,
}

impl AnnotatedSeries {
    pub fn analyze(candles: Vec<Candle>, swing_length: usize) -> Self {
        let len = candles.len();
        if len == 0 {
            return Self {
                candles,
                rows: Vec::new(),
            };
        }

        let closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();
        let highs: Vec<Decimal> = candles.iter().map(|c| c.high).collect();
        let lows: Vec<Decimal> = candles.iter().map(|c| c.low).collect();

        let mut ema_50 = Ema::new(50);
        let mut ema_200 = Ema::new(200);
        let ema50_col: Vec<Decimal> = closes.iter().map(|c| ema_50.update(*c)).collect();
        let ema200_col: Vec<Decimal> = closes.iter().map(|c| ema_200.update(*c)).collect();

        let tr_col = true_ranges(&candles);
        let atr_col = atr_series(&tr_col, ATR_PERIOD);
        let rsi_col = rsi_series(&closes, RSI_PERIOD);

        // Pivot flags need the full series (centered window), so they are
        // computed up front; the forward-fill below is then a plain fold.
        let pivot_high_flags: Vec<bool> = (0..len)
            .map(|i| is_pivot_high(&highs, i, swing_length))
            .collect();
        let pivot_low_flags: Vec<bool> = (0..len)
            .map(|i| is_pivot_low(&lows, i, swing_length))
            .collect();

        let mut rows = Vec::with_capacity(len);
        let mut last_pivot_high: Option<Decimal> = None;
        let mut last_pivot_low: Option<Decimal> = None;

        for i in 0..len {
            if pivot_high_flags[i] {
                last_pivot_high = Some(highs[i]);
            }
            if pivot_low_flags[i] {
                last_pivot_low = Some(lows[i]);
            }

            let bias = if closes[i] > ema50_col[i] && ema50_col[i] > ema200_col[i] {
                Bias::Bullish
            } else if closes[i] < ema50_col[i] && ema50_col[i] < ema200_col[i] {
                Bias::Bearish
            } else {
                Bias::Ranging
            };

            // 3-candle imbalance against candle i-2. The two conditions are
            // mutually exclusive: both together would need Low[i] > High[i]
            // through the i-2 range.
            let (fvg_bullish, fvg_bearish, fvg_top, fvg_bottom) = if i >= 2 {
                if lows[i] > highs[i - 2] {
                    (true, false, Some(lows[i]), Some(highs[i - 2]))
                } else if highs[i] < lows[i - 2] {
                    (false, true, Some(lows[i - 2]), Some(highs[i]))
                } else {
                    (false, false, None, None)
                }
            } else {
                (false, false, None, None)
            };

            rows.push(StructureRow {
                ema_50: ema50_col[i],
                ema_200: ema200_col[i],
                true_range: tr_col[i],
                atr: atr_col[i],
                rsi: rsi_col[i],
                is_pivot_high: pivot_high_flags[i],
                is_pivot_low: pivot_low_flags[i],
                last_pivot_high,
                last_pivot_low,
                bias,
                fvg_bullish,
                fvg_bearish,
                fvg_top,
                fvg_bottom,
            });
        }

        Self { candles, rows }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last_candle(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn last_row(&self) -> Option<&StructureRow> {
        self.rows.last()
    }

    /// Overall market bias: the bias of the last candle. Empty series has no
    /// direction.
    pub fn market_bias(&self) -> Bias {
        self.rows.last().map(|r| r.bias).unwrap_or(Bias::Ranging)
    }

    /// All confirmed pivots, in series order.
    pub fn pivots(&self) -> Vec<Pivot> {
        let mut out = Vec::new();
        for (i, row) in self.rows.iter().enumerate() {
            if row.is_pivot_high {
                out.push(Pivot {
                    index: i,
                    price: self.candles[i].high,
                    kind: PivotKind::High,
                });
            }
            if row.is_pivot_low {
                out.push(Pivot {
                    index: i,
                    price: self.candles[i].low,
                    kind: PivotKind::Low,
                });
            }
        }
        out
    }
}
