use crate::masked::{Masked, MaskedColor, MaskedColors};
use base::defs::{Error, ErrorKind::*, Result};

/// Running per-vertex color sums and observation counts.
///
/// Folding is commutative and associative, so partial accumulators built
/// over disjoint camera subsets can be merged in any order.
#[derive(Clone, Debug, PartialEq)]
pub struct ColorAccumulator {
    sums: Vec<[f64; 3]>,
    counts: Vec<[u32; 3]>,
}

impl ColorAccumulator {
    pub fn new(num_vertices: usize) -> Self {
        Self {
            sums: vec![[0.0; 3]; num_vertices],
            counts: vec![[0; 3]; num_vertices],
        }
    }

    pub fn len(&self) -> usize {
        self.sums.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sums.is_empty()
    }

    fn check_len(&self, len: usize, what: &str) -> Result<()> {
        if len != self.len() {
            let desc = format!(
                "{} has {} vertices, accumulator has {}",
                what,
                len,
                self.len()
            );
            return Err(Error::new(AggregationError, desc));
        }
        Ok(())
    }

    pub fn fold(mut self, colors: &[MaskedColor]) -> Result<Self> {
        self.check_len(colors.len(), "sample")?;

        let iter = self.sums.iter_mut().zip(self.counts.iter_mut());
        for ((sum, count), color) in iter.zip(colors) {
            for c in 0..3 {
                if let Masked::Observed(value) = color[c] {
                    sum[c] += value;
                    count[c] += 1;
                }
            }
        }

        Ok(self)
    }

    pub fn merge(mut self, other: ColorAccumulator) -> Result<Self> {
        self.check_len(other.len(), "merged accumulator")?;

        let iter = self.sums.iter_mut().zip(self.counts.iter_mut());
        let other_iter = other.sums.iter().zip(other.counts.iter());
        for ((sum, count), (other_sum, other_count)) in iter.zip(other_iter) {
            for c in 0..3 {
                sum[c] += other_sum[c];
                count[c] += other_count[c];
            }
        }

        Ok(self)
    }

    /// Number of vertices with at least one observed channel.
    pub fn num_observed_vertices(&self) -> usize {
        self.counts
            .iter()
            .filter(|count| count.iter().any(|&n| n > 0))
            .count()
    }

    /// Per-channel mean, or no data where nothing was ever observed.
    pub fn finalize(self) -> MaskedColors {
        self.sums
            .iter()
            .zip(self.counts.iter())
            .map(|(sum, count)| {
                let mut color = [Masked::Unobserved; 3];
                for c in 0..3 {
                    if count[c] > 0 {
                        color[c] = Masked::Observed(sum[c] / count[c] as f64);
                    }
                }
                color
            })
            .collect()
    }
}
