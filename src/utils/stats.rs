//! Statistics kernel for metric analysis.
//!
//! Pure routines shared by the trend analyzer and agent implementations:
//! p95 outlier filtering, ordinary-least-squares trend fitting, coefficient
//! of variation, and lagged Pearson correlation. Every routine strips
//! non-finite values before computing and reports how many were removed.

/// Result of cleaning a raw series: the finite values and the count removed.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanedSeries {
    pub values: Vec<f64>,
    pub removed: usize,
}

/// Remove NaN/Inf values from a series.
#[must_use]
pub fn validate_series(values: &[f64]) -> CleanedSeries {
    let cleaned: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let removed = values.len() - cleaned.len();
    CleanedSeries {
        values: cleaned,
        removed,
    }
}

/// 95th percentile with linear interpolation between closest ranks.
fn percentile_95(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = 0.95 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let weight = rank - lower as f64;
        sorted[lower] * (1.0 - weight) + sorted[upper] * weight
    }
}

/// Split a series at the 95th percentile.
///
/// Series with fewer than 5 points pass through unfiltered: removing points
/// from a set that small would leave too little signal for classification.
/// Returns `(kept, outliers)` where outliers are strictly above the
/// threshold.
#[must_use]
pub fn filter_outliers_p95(values: &[f64]) -> (Vec<f64>, Vec<f64>) {
    if values.len() < 5 {
        return (values.to_vec(), Vec::new());
    }

    let threshold = percentile_95(values);
    let (kept, outliers): (Vec<f64>, Vec<f64>) =
        values.iter().copied().partition(|v| *v <= threshold);
    (kept, outliers)
}

/// Ordinary least squares over integer index vs. value.
///
/// Returns `(slope, r_squared)`. A flat series (`SS_tot = 0`) yields
/// `(0.0, 0.0)` rather than NaN. Series with fewer than 2 points yield
/// `(0.0, 0.0)` as well.
#[must_use]
pub fn linear_trend(values: &[f64]) -> (f64, f64) {
    let n = values.len();
    if n < 2 {
        return (0.0, 0.0);
    }

    let nf = n as f64;
    let mean_x = (nf - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / nf;

    let mut ss_xy = 0.0;
    let mut ss_xx = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        ss_xy += dx * (y - mean_y);
        ss_xx += dx * dx;
    }

    let slope = if ss_xx == 0.0 { 0.0 } else { ss_xy / ss_xx };
    let intercept = mean_y - slope * mean_x;

    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (i, y) in values.iter().enumerate() {
        let predicted = slope * i as f64 + intercept;
        ss_res += (y - predicted).powi(2);
        ss_tot += (y - mean_y).powi(2);
    }

    // Clamp float dust; OLS with intercept keeps r² in [0,1] analytically.
    let r_squared = if ss_tot > 0.0 {
        (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
    } else {
        0.0
    };

    (slope, r_squared)
}

/// Coefficient of variation: population stddev over |mean|.
///
/// A constant zero series yields 0; a zero-mean series with spread yields
/// infinity so callers treat it as maximally unstable.
#[must_use]
pub fn coef_variation(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    if mean == 0.0 {
        if std_dev == 0.0 {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        std_dev / mean.abs()
    }
}

/// Lagged Pearson correlation result.
#[derive(Debug, Clone, PartialEq)]
pub struct LaggedCorrelation {
    pub coefficient: f64,
    pub p_value: f64,
    pub lag: i64,
    pub sample_count: usize,
}

fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len();
    if n < 2 || n != b.len() {
        return None;
    }
    let nf = n as f64;
    let mean_a = a.iter().sum::<f64>() / nf;
    let mean_b = b.iter().sum::<f64>() / nf;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    if var_a == 0.0 || var_b == 0.0 {
        return None;
    }
    Some((cov / (var_a.sqrt() * var_b.sqrt())).clamp(-1.0, 1.0))
}

/// Complementary error function, Abramowitz & Stegun 7.1.26 rational
/// approximation (max error 1.5e-7).
fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let tau = t
        * (-z * z - 1.265_512_23
            + t * (1.000_023_68
                + t * (0.374_091_96
                    + t * (0.096_784_18
                        + t * (-0.186_288_06
                            + t * (0.278_868_07
                                + t * (-1.135_203_98
                                    + t * (1.488_515_87
                                        + t * (-0.822_152_23 + t * 0.170_872_77)))))))))
        .exp();
    if x >= 0.0 {
        tau
    } else {
        2.0 - tau
    }
}

/// Two-sided p-value for a Pearson coefficient via the Fisher z-transform.
fn pearson_p_value(r: f64, n: usize) -> f64 {
    if n < 4 {
        return 1.0;
    }
    let clamped = r.clamp(-0.999_999, 0.999_999);
    let z = 0.5 * ((1.0 + clamped) / (1.0 - clamped)).ln();
    let score = z.abs() * ((n - 3) as f64).sqrt();
    (erfc(score / std::f64::consts::SQRT_2)).clamp(0.0, 1.0)
}

/// Pearson correlation scanned over lags in `[-max_lag, +max_lag]`.
///
/// Both series are stripped of non-finite values pairwise before the scan.
/// The winning lag maximizes |r|; ties break on the smallest |lag|, then on
/// the smallest positive lag. A lag of `k > 0` compares `a[k..]` against
/// `b[..n-k]`; `k < 0` the reverse.
#[must_use]
pub fn pearson_with_lag(a: &[f64], b: &[f64], max_lag: usize) -> LaggedCorrelation {
    let len = a.len().min(b.len());
    let mut clean_a = Vec::with_capacity(len);
    let mut clean_b = Vec::with_capacity(len);
    for i in 0..len {
        if a[i].is_finite() && b[i].is_finite() {
            clean_a.push(a[i]);
            clean_b.push(b[i]);
        }
    }

    let mut best: Option<(f64, i64, usize)> = None;

    let max_lag = max_lag as i64;
    for lag in -max_lag..=max_lag {
        let (sa, sb): (&[f64], &[f64]) = if lag > 0 {
            let l = lag as usize;
            if l >= clean_a.len() {
                continue;
            }
            (&clean_a[l..], &clean_b[..clean_b.len() - l])
        } else if lag < 0 {
            let l = (-lag) as usize;
            if l >= clean_b.len() {
                continue;
            }
            (&clean_a[..clean_a.len() - l], &clean_b[l..])
        } else {
            (&clean_a[..], &clean_b[..])
        };

        let Some(r) = pearson(sa, sb) else { continue };

        let better = match best {
            None => true,
            Some((best_r, best_lag, _)) => {
                let abs_cmp = r.abs().partial_cmp(&best_r.abs());
                match abs_cmp {
                    Some(std::cmp::Ordering::Greater) => true,
                    Some(std::cmp::Ordering::Equal) => {
                        lag.abs() < best_lag.abs()
                            || (lag.abs() == best_lag.abs() && lag > 0 && best_lag < 0)
                    }
                    _ => false,
                }
            }
        };
        if better {
            best = Some((r, lag, sa.len()));
        }
    }

    match best {
        Some((r, lag, n)) => LaggedCorrelation {
            coefficient: r,
            p_value: pearson_p_value(r, n),
            lag,
            sample_count: n,
        },
        None => LaggedCorrelation {
            coefficient: 0.0,
            p_value: 1.0,
            lag: 0,
            sample_count: clean_a.len(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn validate_strips_non_finite() {
        let cleaned = validate_series(&[1.0, f64::NAN, 2.0, f64::INFINITY, 3.0]);
        assert_eq!(cleaned.values, vec![1.0, 2.0, 3.0]);
        assert_eq!(cleaned.removed, 2);
    }

    #[test]
    fn p95_passthrough_below_five_points() {
        let (kept, outliers) = filter_outliers_p95(&[1.0, 2.0, 100.0]);
        assert_eq!(kept, vec![1.0, 2.0, 100.0]);
        assert!(outliers.is_empty());
    }

    #[test]
    fn p95_removes_spike() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 100.0];
        let (kept, outliers) = filter_outliers_p95(&values);
        assert_eq!(outliers, vec![100.0]);
        assert_eq!(kept.len(), 9);
    }

    #[test]
    fn p95_tight_distribution_may_remove_nothing() {
        let values = vec![5.0, 5.0, 5.0, 5.0, 5.0];
        let (kept, outliers) = filter_outliers_p95(&values);
        assert_eq!(kept.len(), 5);
        assert!(outliers.is_empty());
    }

    #[test]
    fn linear_trend_perfect_line() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let (slope, r2) = linear_trend(&values);
        assert!((slope - 1.0).abs() < 1e-9);
        assert!((r2 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn linear_trend_flat_series_has_zero_r2() {
        let values = vec![3.0; 8];
        let (slope, r2) = linear_trend(&values);
        assert_eq!(slope, 0.0);
        assert_eq!(r2, 0.0);
    }

    #[test]
    fn coef_variation_cases() {
        assert_eq!(coef_variation(&[0.0, 0.0, 0.0]), 0.0);
        assert!(coef_variation(&[-1.0, 0.0, 1.0]).is_infinite());
        let cv = coef_variation(&[10.0, 10.0, 10.0]);
        assert_eq!(cv, 0.0);
    }

    #[test]
    fn pearson_detects_shifted_series() {
        // b is a copied two steps later; a leads b.
        let a: Vec<f64> = (0..20).map(|i| (i as f64 * 0.7).sin()).collect();
        let mut b = vec![0.0, 0.0];
        b.extend_from_slice(&a[..18]);

        let result = pearson_with_lag(&a, &b, 5);
        assert_eq!(result.lag, -2);
        assert!(result.coefficient > 0.99);
        assert!(result.p_value < 0.01);
    }

    #[test]
    fn pearson_identical_series_zero_lag() {
        let a: Vec<f64> = (0..15).map(|i| i as f64).collect();
        let result = pearson_with_lag(&a, &a, 3);
        assert_eq!(result.lag, 0);
        assert!((result.coefficient - 1.0).abs() < 1e-9);
    }
}
