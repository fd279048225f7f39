//! Log-odds confidence update.

/// Distance kept from exact 0 and 1 before taking log-odds.
pub const PROBABILITY_EPSILON: f64 = 1e-6;

pub fn clamp_probability(p: f64) -> f64 {
    p.clamp(PROBABILITY_EPSILON, 1.0 - PROBABILITY_EPSILON)
}

pub fn logit(p: f64) -> f64 {
    let p = clamp_probability(p);
    (p / (1.0 - p)).ln()
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// `sigmoid(logit(base) + alpha * (successes - failures))`, clamped into `(0, 1)`.
pub fn adjusted_confidence(base: f64, successes: u32, failures: u32, alpha: f64) -> f64 {
    let evidence = f64::from(successes) - f64::from(failures);
    clamp_probability(sigmoid(logit(base) + alpha * evidence))
}
