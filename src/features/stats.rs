/// A column of readings pulled out of a window, for aggregate statistics.
///
/// All aggregates return 0.0 for an empty series so callers never see NaN.
/// For finite input, `mean` and `std_dev` stay finite even when the direct
/// sum or the squared deviations overflow.
pub struct Series {
    values: Vec<f64>,
}

impl Series {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mean = self.sum() / self.values.len() as f64;
        if mean.is_finite() {
            return mean;
        }
        match self.scaled() {
            Some((scale, scaled)) => scaled.mean() * scale,
            None => mean,
        }
    }

    /// Population variance (divides by N, not N - 1). Can overflow where
    /// [`Series::std_dev`] does not.
    pub fn variance(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let sum_sq_diff: f64 = self.values.iter().map(|&x| (x - mean).powi(2)).sum();
        sum_sq_diff / self.values.len() as f64
    }

    pub fn std_dev(&self) -> f64 {
        let std = self.variance().sqrt();
        if std.is_finite() {
            return std;
        }
        match self.scaled() {
            Some((scale, scaled)) => scaled.variance().sqrt() * scale,
            None => std,
        }
    }

    /// The series divided by its largest magnitude, with that magnitude.
    /// `None` when there is nothing finite to scale by.
    fn scaled(&self) -> Option<(f64, Series)> {
        let scale = self
            .values
            .iter()
            .map(|x| x.abs())
            .fold(0.0_f64, f64::max);
        if scale == 0.0 || !scale.is_finite() {
            return None;
        }
        Some((scale, Series::new(self.values.iter().map(|x| x / scale).collect())))
    }

    pub fn max(&self) -> f64 {
        self.values
            .iter()
            .copied()
            .reduce(f64::max)
            .unwrap_or(0.0)
    }

    pub fn min(&self) -> f64 {
        self.values
            .iter()
            .copied()
            .reduce(f64::min)
            .unwrap_or(0.0)
    }
}
