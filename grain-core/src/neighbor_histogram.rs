use crate::stats::RINGS;

/// Accumulates ring counts per diameter bin.
///
/// For each bin, this buffer stores:
///
/// - The sum of the ring-count vectors of all grains added to the bin.
/// - The number of grains that were added.
///
/// This lets the packer rebuild the neighborhood statistics of the active
/// set in one pass and then query the **average** ring counts per bin.
#[derive(Debug, Clone)]
pub struct NeighborHistogram {
    /// Accumulated ring counts for each bin.
    sums: Vec<[f64; RINGS]>,
    /// Number of grains for each bin.
    count: Vec<u32>,
}

impl NeighborHistogram {
    /// Creates a new [`NeighborHistogram`] with `len` empty bins.
    ///
    /// ### Parameters
    /// - `len` - Number of diameter bins.
    pub fn with_len(len: usize) -> Self {
        Self {
            sums: vec![[0.0; RINGS]; len],
            count: vec![0; len],
        }
    }

    fn len(&self) -> usize {
        self.count.len()
    }

    /// Resets all bins without changing the length.
    pub fn clear(&mut self) {
        self.sums.fill([0.0; RINGS]);
        self.count.fill(0);
    }

    /// Adds one grain's ring counts to `bin`.
    ///
    /// ### Panics
    /// Panics if `bin` is out of bounds.
    #[inline]
    pub fn add(&mut self, bin: usize, rings: [u32; RINGS]) {
        for (s, r) in self.sums[bin].iter_mut().zip(rings) {
            *s += r as f64;
        }
        self.count[bin] += 1;
    }

    /// Average ring counts of `bin`, or zeros if the bin is empty.
    #[inline]
    pub fn avg(&self, bin: usize) -> [f64; RINGS] {
        let c = self.count[bin];
        if c == 0 {
            [0.0; RINGS]
        } else {
            self.sums[bin].map(|s| s / c as f64)
        }
    }

    /// Sum of squared differences between `target` and the bin averages.
    ///
    /// `target` has one entry per bin.
    pub fn squared_error(&self, target: &[[f64; RINGS]]) -> f64 {
        debug_assert_eq!(self.len(), target.len());
        target
            .iter()
            .enumerate()
            .map(|(bin, t)| {
                let avg = self.avg(bin);
                t.iter().zip(avg).map(|(t, a)| (t - a) * (t - a)).sum::<f64>()
            })
            .sum()
    }
}
