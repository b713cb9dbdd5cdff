//! Single-pass statistics over pixel or spectral intensities.
//!
//! `StatsScan` walks any iterator of floats once and keeps min, max, sum and
//! count, so it works directly on `ndarray` iterators without collecting.
//! The median needs a sorted copy and lives in the free function [`median`].
//!
//! Both refuse NaN input: a NaN in a diffraction pattern would silently poison
//! every threshold derived from it.

use num_traits::float::Float;
use thiserror::Error;

/// Error types for statistics over intensity data
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatsError {
    #[error("NaN value encountered at index {0}")]
    NaNEncountered(usize),
    #[error("No data provided (empty input)")]
    NoData,
}

/// Running min/max/sum/count over floating point data
#[derive(Debug, Clone)]
pub struct StatsScan<T: Float> {
    min_value: Option<T>,
    max_value: Option<T>,
    sum: T,
    count: usize,
    nan_index: Option<usize>,
}

impl<T: Float> StatsScan<T> {
    /// Scan a slice of values
    pub fn new(data: &[T]) -> Self {
        Self::from_iter_values(data.iter().copied())
    }

    /// Scan any iterator of values, stopping at the first NaN
    pub fn from_iter_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        let mut scan = Self {
            min_value: None,
            max_value: None,
            sum: T::zero(),
            count: 0,
            nan_index: None,
        };

        for (index, value) in values.into_iter().enumerate() {
            if value.is_nan() {
                scan.nan_index = Some(index);
                break;
            }
            scan.sum = scan.sum + value;
            scan.count += 1;
            scan.min_value = Some(scan.min_value.map_or(value, |m| m.min(value)));
            scan.max_value = Some(scan.max_value.map_or(value, |m| m.max(value)));
        }

        scan
    }

    fn check(&self) -> Result<(), StatsError> {
        match self.nan_index {
            Some(index) => Err(StatsError::NaNEncountered(index)),
            None if self.count == 0 => Err(StatsError::NoData),
            None => Ok(()),
        }
    }

    /// Minimum value
    pub fn min(&self) -> Result<T, StatsError> {
        self.check()?;
        self.min_value.ok_or(StatsError::NoData)
    }

    /// Maximum value
    pub fn max(&self) -> Result<T, StatsError> {
        self.check()?;
        self.max_value.ok_or(StatsError::NoData)
    }

    /// Both extremes as `(min, max)`
    pub fn min_max(&self) -> Result<(T, T), StatsError> {
        Ok((self.min()?, self.max()?))
    }

    /// Arithmetic mean
    pub fn mean(&self) -> Result<T, StatsError> {
        self.check()?;
        let n = T::from(self.count).ok_or(StatsError::NoData)?;
        Ok(self.sum / n)
    }

    /// Sum of all scanned values
    pub fn sum(&self) -> Result<T, StatsError> {
        self.check()?;
        Ok(self.sum)
    }

    /// Number of values scanned before any NaN
    pub fn count(&self) -> usize {
        self.count
    }

    /// Peak-to-peak range `max - min`
    pub fn range(&self) -> Result<T, StatsError> {
        let (min, max) = self.min_max()?;
        Ok(max - min)
    }
}

/// Median of a set of values.
///
/// Even-length inputs return the mean of the two central values, matching
/// the usual numerical convention for image medians.
///
/// # Errors
/// * `StatsError::NoData` - the iterator was empty
/// * `StatsError::NaNEncountered` - a NaN was present
pub fn median<T, I>(values: I) -> Result<T, StatsError>
where
    T: Float,
    I: IntoIterator<Item = T>,
{
    let mut sorted: Vec<T> = Vec::new();
    for (index, value) in values.into_iter().enumerate() {
        if value.is_nan() {
            return Err(StatsError::NaNEncountered(index));
        }
        sorted.push(value);
    }
    if sorted.is_empty() {
        return Err(StatsError::NoData);
    }

    // NaN was rejected above, so the comparison is total
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Ok(sorted[mid])
    } else {
        let two = T::one() + T::one();
        Ok((sorted[mid - 1] + sorted[mid]) / two)
    }
}
