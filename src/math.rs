use ndarray::Array1;
use num_traits::{Float, FromPrimitive};

/// Collect the present values of a slice with missing entries into an [`Array1`]
pub fn present<E: Copy>(values: &[Option<E>]) -> Array1<E> {
    values.iter().filter_map(|value| *value).collect()
}

/// Arithmetic mean of the present values
///
/// Returns `None` when every value is missing.
///
/// # Examples
///
/// ```
/// use iso_quant::math::mean_ignoring_missing;
///
/// let mean = mean_ignoring_missing(&[Some(1.0), None, Some(3.0)]);
/// assert_eq!(mean, Some(2.0));
/// assert_eq!(mean_ignoring_missing::<f64>(&[None, None]), None);
/// ```
pub fn mean_ignoring_missing<E: Float + FromPrimitive>(values: &[Option<E>]) -> Option<E> {
    present(values).mean()
}

/// Sample standard deviation (`n - 1` divisor) of the present values
///
/// The spread of fewer than two values cannot be measured, so the result is `None` rather
/// than zero in that case.
///
/// # Examples
///
/// ```
/// use iso_quant::math::sample_standard_deviation;
///
/// let sd = sample_standard_deviation(&[Some(2.0), Some(4.0), None]).unwrap();
/// assert!((sd - 2f64.sqrt()).abs() < 1e-12);
/// assert_eq!(sample_standard_deviation(&[Some(2.0)]), None);
/// ```
pub fn sample_standard_deviation<E: Float + FromPrimitive>(values: &[Option<E>]) -> Option<E> {
    let values = present(values);
    if values.len() < 2 {
        return None;
    }
    Some(values.std(E::one()))
}

/// Combine two independent uncertainties in quadrature
pub fn root_sum_square<E: Float>(a: E, b: E) -> E {
    a.hypot(b)
}
