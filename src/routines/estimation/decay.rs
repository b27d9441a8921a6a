/// Result of a log₂-linear least-squares fit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayFit {
    /// Slope of `log₂(value)` against the level
    pub slope: f64,
    /// Number of observations used in the fit
    pub observations: usize,
}

/// Fit `log₂(value) = c + slope · level` through one sequence of observations
///
/// Non-positive and non-finite values are skipped. Returns `None` with fewer than two usable
/// observations on distinct levels.
pub fn fit_decay(points: &[(u32, f64)]) -> Option<DecayFit> {
    fit_decay_pooled(&[points.to_vec()])
}

/// Fit a common slope through several lines of observations
///
/// Every line gets its own intercept, the slope is shared. Lines with fewer than two usable
/// observations do not contribute.
pub fn fit_decay_pooled(lines: &[Vec<(u32, f64)>]) -> Option<DecayFit> {
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut observations = 0;

    for line in lines {
        let usable: Vec<(f64, f64)> = line
            .iter()
            .filter(|(_, value)| value.is_finite() && *value > 0.0)
            .map(|&(level, value)| (level as f64, value.log2()))
            .collect();
        if usable.len() < 2 {
            continue;
        }

        let n = usable.len() as f64;
        let x_mean = usable.iter().map(|(x, _)| x).sum::<f64>() / n;
        let y_mean = usable.iter().map(|(_, y)| y).sum::<f64>() / n;
        for (x, y) in &usable {
            sxy += (x - x_mean) * (y - y_mean);
            sxx += (x - x_mean) * (x - x_mean);
        }
        observations += usable.len();
    }

    if observations < 2 || sxx <= 0.0 {
        return None;
    }
    let slope = sxy / sxx;
    if !slope.is_finite() {
        return None;
    }
    Some(DecayFit {
        slope,
        observations,
    })
}

/// Asymptotic complexity of MIMC for the given rates
///
/// The work needed to reach a tolerance `TOL` behaves like `TOL^rate · log(1/TOL)^log_rate`.
/// The logarithmic exponent is `None` when the rates fall outside the cases covered by the
/// theory.
pub fn complexity_rate(weak: &[f64], strong: &[f64], work: &[f64]) -> (f64, Option<f64>) {
    let d = weak.len();
    let delta: Vec<f64> = (0..d)
        .map(|i| (work[i] - strong[i]) / (2.0 * weak[i]))
        .collect();
    let zeta = delta.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let xi = (0..d)
        .map(|i| (2.0 * weak[i] - strong[i]) / work[i])
        .fold(f64::INFINITY, f64::min);
    let d2 = delta.iter().filter(|&&x| x == 0.0).count() as f64;
    let dz = delta.iter().filter(|&&x| x == zeta).count() as f64;
    let d = d as f64;

    let rate = -2.0 * (1.0 + zeta.max(0.0));
    let log_rate = if (zeta <= 0.0 && zeta < xi) || (zeta == xi && zeta == 0.0 && d <= 2.0) {
        Some(2.0 * d2)
    } else if zeta > 0.0 && xi > 0.0 {
        Some(2.0 * (dz - 1.0) * (zeta + 1.0))
    } else if zeta == 0.0 && xi == 0.0 && d > 2.0 {
        Some(2.0 * d2 + d - 3.0)
    } else if zeta > 0.0 && xi == 0.0 {
        Some(d - 1.0 + 2.0 * (dz - 1.0) * (1.0 + zeta))
    } else {
        None
    };
    (rate, log_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_geometric_decay() {
        let points: Vec<(u32, f64)> = (1..6).map(|l| (l, 3.0 * 2f64.powf(-1.5 * l as f64))).collect();
        let fit = fit_decay(&points).unwrap();
        assert!((fit.slope + 1.5).abs() < 1e-10);
        assert_eq!(fit.observations, 5);
    }

    #[test]
    fn test_too_few_observations() {
        assert!(fit_decay(&[(1, 0.5)]).is_none());
        assert!(fit_decay(&[(1, 0.5), (2, 0.0), (3, f64::NAN)]).is_none());
        assert!(fit_decay(&[]).is_none());
    }

    #[test]
    fn test_pooled_lines_share_slope() {
        let a: Vec<(u32, f64)> = (1..4).map(|l| (l, 2f64.powi(-(l as i32)))).collect();
        let b: Vec<(u32, f64)> = (1..3).map(|l| (l, 100.0 * 2f64.powi(-(l as i32)))).collect();
        let fit = fit_decay_pooled(&[a, b, vec![(7, 1.0)]]).unwrap();
        assert!((fit.slope + 1.0).abs() < 1e-10);
        assert_eq!(fit.observations, 5);
    }

    #[test]
    fn test_standard_complexity() {
        // Multilevel case with s > γ has the canonical TOL^-2 complexity
        let (rate, log_rate) = complexity_rate(&[1.0], &[2.0], &[1.0]);
        assert_eq!(rate, -2.0);
        assert_eq!(log_rate, Some(0.0));

        // s = γ adds a squared logarithm
        let (rate, log_rate) = complexity_rate(&[1.0], &[1.0], &[1.0]);
        assert_eq!(rate, -2.0);
        assert_eq!(log_rate, Some(2.0));

        // s < γ
        let (rate, _) = complexity_rate(&[1.0], &[1.0], &[3.0]);
        assert_eq!(rate, -4.0);
    }
}
