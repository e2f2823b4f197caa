use ndarray::Array1;
use serde::Serialize;

/// A calibration observation: the raw mean measured for a standard and its accepted value
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CalibrationPoint {
    pub raw: f64,
    pub target: f64,
}

impl CalibrationPoint {
    pub const fn new(raw: f64, target: f64) -> Self {
        Self { raw, target }
    }
}

/// Linear calibration `target = slope * raw + intercept` with its coefficient of determination
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

impl LinearFit {
    /// The neutral mapping used when a channel has no calibration points
    pub const IDENTITY: Self = Self {
        slope: 1.0,
        intercept: 0.0,
        r_squared: 0.0,
    };

    /// Map a raw value through the calibration
    pub fn apply(&self, raw: f64) -> f64 {
        self.slope.mul_add(raw, self.intercept)
    }
}

/// Fit a straight line through calibration points
///
/// - Two or more points are fit by ordinary least squares. When every target is identical the
///   fit explains all the variance there is, and R² is 1. Otherwise R² is clamped to `[0, 1]`.
/// - A single point only fixes an offset: the slope is unity and R² is 0.
/// - Without points the fit is [`LinearFit::IDENTITY`].
///
/// # Examples
///
/// ```
/// use iso_quant::fit::{fit_linear, CalibrationPoint};
///
/// let points = [CalibrationPoint::new(-9.0, -11.0), CalibrationPoint::new(1.0, 1.0)];
/// let fit = fit_linear(&points);
/// assert!((fit.slope - 1.2).abs() < 1e-12);
/// assert!((fit.intercept - -0.2).abs() < 1e-12);
/// ```
pub fn fit_linear(points: &[CalibrationPoint]) -> LinearFit {
    match points {
        [] => LinearFit::IDENTITY,
        [point] => LinearFit {
            slope: 1.0,
            intercept: point.target - point.raw,
            r_squared: 0.0,
        },
        _ => least_squares(points),
    }
}

/// A sum of squared deviations from the mean which rounding alone can produce
///
/// Averaging `n` values of magnitude `v` misplaces the mean by at most about `n` ulps of `v`,
/// so deviations stay below `n * EPSILON * v` and their squares sum below
/// `(n * EPSILON)² * Σv²`.
#[allow(clippy::cast_precision_loss)]
fn is_negligible(sum_of_squares: f64, sum_of_squared_values: f64, n: usize) -> bool {
    let ulps = f64::EPSILON * n as f64;
    sum_of_squares <= ulps * ulps * sum_of_squared_values
}

fn least_squares(points: &[CalibrationPoint]) -> LinearFit {
    let raw: Array1<f64> = points.iter().map(|point| point.raw).collect();
    let target: Array1<f64> = points.iter().map(|point| point.target).collect();

    let raw_mean = raw.mean().unwrap_or_default();
    let target_mean = target.mean().unwrap_or_default();
    let raw_deviation = &raw - raw_mean;
    let target_deviation = &target - target_mean;

    let n = points.len();
    let sxx = raw_deviation.dot(&raw_deviation);
    let (slope, intercept) = if is_negligible(sxx, raw.dot(&raw), n) {
        // Every raw value is the same `c`, so only `slope * c + intercept` is determined. Take
        // the minimum-norm solution, as a pseudo-inverse solver would.
        let norm = raw_mean.mul_add(raw_mean, 1.0);
        (raw_mean * target_mean / norm, target_mean / norm)
    } else {
        let slope = raw_deviation.dot(&target_deviation) / sxx;
        (slope, slope.mul_add(-raw_mean, target_mean))
    };

    let residuals = &target - &raw.mapv(|x| slope.mul_add(x, intercept));
    let ss_res = residuals.dot(&residuals);
    let ss_tot = target_deviation.dot(&target_deviation);

    let r_squared = if is_negligible(ss_tot, target.dot(&target), n) {
        1.0
    } else {
        (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
    };

    LinearFit {
        slope,
        intercept,
        r_squared,
    }
}
