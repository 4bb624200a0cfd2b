//! Scalar statistics shared by the insight and KPI comparisons.

use super::distribution::f64_or_zero;
use serde::{Deserialize, Serialize};

/// `a / b` with `0 / 0 = 0` and `x / 0 = ±∞` (sign of `x`).
pub fn smart_divide(a: f64, b: f64) -> f64 {
    if b == 0.0 {
        if a == 0.0 {
            0.0
        } else if a > 0.0 {
            f64::INFINITY
        } else {
            f64::NEG_INFINITY
        }
    } else {
        a / b
    }
}

/// Percent change from `v1` to `v2`; ±100 when starting from zero.
pub fn percent_change(v1: f64, v2: f64) -> f64 {
    if v1 == 0.0 {
        if v2 > 0.0 {
            100.0
        } else if v2 < 0.0 {
            -100.0
        } else {
            0.0
        }
    } else {
        smart_divide(v2 - v1, v1) * 100.0
    }
}

/// `v2 / v1`, reading a zero `v1` as 1.
pub fn factor_change(v1: f64, v2: f64) -> f64 {
    let v1 = if v1 == 0.0 { 1.0 } else { v1 };
    smart_divide(v2, v1)
}

/// Replaces NaN and infinities with 0 so scores stay serializable.
pub fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Pairwise comparison of one value across two periods.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffMetric {
    #[serde(deserialize_with = "f64_or_zero")]
    pub first: f64,
    #[serde(deserialize_with = "f64_or_zero")]
    pub second: f64,
    #[serde(deserialize_with = "f64_or_zero")]
    pub perc: f64,
    #[serde(deserialize_with = "f64_or_zero")]
    pub factor: f64,
}

impl DiffMetric {
    pub fn compute(first: f64, second: f64) -> Self {
        Self {
            first,
            second,
            perc: percent_change(first, second),
            factor: factor_change(first, second),
        }
    }

    /// KPI variant: a zero baseline reports +100% and a factor equal to `second`.
    pub fn compute_kpi(first: f64, second: f64) -> Self {
        if first == 0.0 {
            return Self {
                first,
                second,
                perc: 100.0,
                factor: second,
            };
        }
        Self {
            first,
            second,
            perc: 100.0 * (second - first) / first,
            factor: second / first,
        }
    }
}

/// `a · log2(b / c)` with `0 · log(…) = 0` and a zero `c` yielding 0.
fn a_log2_b_by_c(a: f64, b: f64, c: f64) -> f64 {
    if a == 0.0 || c == 0.0 {
        return 0.0;
    }
    a * smart_divide(b, c).log2()
}

/// KL divergence between the binary distributions `[a, 1-a]` and `[b, 1-b]`.
pub fn kl_divergence(a: f64, b: f64) -> f64 {
    a_log2_b_by_c(a, a, b) + a_log2_b_by_c(1.0 - a, 1.0 - a, 1.0 - b)
}

/// Jensen–Shannon divergence between `[p, 1-p]` and `[q, 1-q]`.
pub fn js_divergence(p: f64, q: f64) -> f64 {
    let m = 0.5 * (p + q);
    let jsd = 0.5 * (kl_divergence(p, m) + kl_divergence(q, m));
    if jsd.is_nan() {
        tracing::warn!(p, q, "JS divergence is NaN");
        return 0.0;
    }
    jsd
}
