//! Small descriptive statistics over paired score series.

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    let m = mean(values);
    mean(&values.iter().map(|v| (v - m).powi(2)).collect::<Vec<_>>()).sqrt()
}

/// Pearson correlation of two equally long series.
///
/// Fewer than two points, mismatched lengths, or a constant series give 0.
pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    if xs.len() < 2 || xs.len() != ys.len() {
        return 0.0;
    }

    let (sx, sy) = (std_dev(xs), std_dev(ys));
    if sx == 0.0 || sy == 0.0 {
        return 0.0;
    }

    let (mx, my) = (mean(xs), mean(ys));
    let cov = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| (x - mx) * (y - my))
        .sum::<f64>()
        / xs.len() as f64;
    (cov / (sx * sy)).clamp(-1.0, 1.0)
}
