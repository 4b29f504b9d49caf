use std::collections::VecDeque;

/// Trailing moving average that discards the highest and lowest samples
///
/// Used for ping smoothing, where a single stalled packet would otherwise
/// skew the estimate for a whole window.
#[derive(Debug, Clone)]
pub struct TruncatedAverage {
    samples: VecDeque<u32>,
    capacity: usize,
    value: u32,
}

impl TruncatedAverage {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            value: 0,
        }
    }

    /// Record a sample and recompute the average
    pub fn record(&mut self, sample: u32) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        self.value = self.compute();
    }

    /// Current average (0 before the first sample)
    #[inline]
    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.value = 0;
    }

    fn compute(&self) -> u32 {
        let count = self.samples.len();
        if count == 0 {
            return 0;
        }
        let sum: u64 = self.samples.iter().map(|&s| s as u64).sum();
        if count < 3 {
            return (sum / count as u64) as u32;
        }
        let min = self.samples.iter().copied().min().unwrap_or(0) as u64;
        let max = self.samples.iter().copied().max().unwrap_or(0) as u64;
        ((sum - min - max) / (count as u64 - 2)) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_zero() {
        let avg = TruncatedAverage::new(8);
        assert_eq!(avg.value(), 0);
        assert!(avg.is_empty());
    }

    #[test]
    fn test_few_samples_plain_mean() {
        let mut avg = TruncatedAverage::new(8);
        avg.record(10);
        avg.record(20);
        assert_eq!(avg.value(), 15);
    }

    #[test]
    fn test_outliers_discarded() {
        let mut avg = TruncatedAverage::new(8);
        for sample in [50, 52, 48, 1000, 0, 50] {
            avg.record(sample);
        }
        // 1000 and 0 are dropped: (50 + 52 + 48 + 50) / 4
        assert_eq!(avg.value(), 50);
    }

    #[test]
    fn test_window_trails() {
        let mut avg = TruncatedAverage::new(3);
        for sample in [500, 500, 500, 10, 10, 10] {
            avg.record(sample);
        }
        assert_eq!(avg.len(), 3);
        assert_eq!(avg.value(), 10);
    }
}
