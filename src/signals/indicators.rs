//! Streaming indicator math for the buy-signal filter.

/// Exponential moving average over a price series, span-parameterised.
/// Seeded with the first price, then recursively updated; the last value
/// is returned.
pub fn ema(prices: &[f64], span: usize) -> Option<f64> {
    if prices.is_empty() || span == 0 {
        return None;
    }
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut value = prices[0];
    for price in &prices[1..] {
        value = alpha * price + (1.0 - alpha) * value;
    }
    Some(value)
}

/// RSI over the trailing `period` deltas, rolling-mean style:
/// `rs = avg_gain / (avg_loss + eps)`, `rsi = 100 - 100 / (1 + rs)`.
pub fn rsi(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period + 1 {
        return None;
    }
    let window = &prices[prices.len() - (period + 1)..];
    let mut gain_sum = 0.0;
    let mut loss_sum = 0.0;
    for pair in window.windows(2) {
        let delta = pair[1] - pair[0];
        if delta > 0.0 {
            gain_sum += delta;
        } else {
            loss_sum += -delta;
        }
    }
    let avg_gain = gain_sum / period as f64;
    let avg_loss = loss_sum / period as f64;
    let rs = avg_gain / (avg_loss + 1e-9);
    Some(100.0 - 100.0 / (1.0 + rs))
}
