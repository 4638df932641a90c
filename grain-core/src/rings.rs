//! Distance rings between grain candidates.
//!
//! Ring `r` of a grain `n` holds the candidates whose centroid lies in
//! `[r * d_n, (r + 1) * d_n)` from `n`'s centroid, where `d_n` is `n`'s
//! equivalent diameter, for `r` in `0..RINGS`. The table is stored inverted
//! in one flat arena: the slice for `(g, r)` lists every `n` whose ring `r`
//! contains `g`, so activating `g` only touches those entries.

use crate::grain::Grain;
use crate::stats::RINGS;
use crate::types::GrainId;

/// Inverted ring lists plus live per-grain ring counts.
#[derive(Clone, Debug, Default)]
pub struct NeighborRings {
    /// `offsets[g * RINGS + r]..offsets[g * RINGS + r + 1]` indexes `members`.
    offsets: Vec<usize>,
    members: Vec<GrainId>,
    /// Number of active candidates in each ring of each grain.
    counts: Vec<[u32; RINGS]>,
}

impl NeighborRings {
    /// Buckets every unordered pair of distinct candidates.
    ///
    /// ### Parameters
    /// - `grains` - Candidates with centroids already placed.
    ///
    /// ### Returns
    /// Rings with all counts at zero.
    pub fn build(grains: &[Grain]) -> Self {
        let n = grains.len();
        let mut entries: Vec<(usize, GrainId)> = Vec::new();

        for (i, gi) in grains.iter().enumerate() {
            for (j, gj) in grains.iter().enumerate().skip(i + 1) {
                let dist = gi.centroid.distance(gj.centroid);
                // i inside j's rings, listed under i.
                if dist < 3.0 * gj.diameter {
                    let r = (dist / gj.diameter) as usize;
                    entries.push((i * RINGS + r, j));
                }
                if dist < 3.0 * gi.diameter {
                    let r = (dist / gi.diameter) as usize;
                    entries.push((j * RINGS + r, i));
                }
            }
        }
        entries.sort_by_key(|&(slot, member)| (slot, member));

        let mut offsets = vec![0; n * RINGS + 1];
        for &(slot, _) in &entries {
            offsets[slot + 1] += 1;
        }
        for s in 0..n * RINGS {
            offsets[s + 1] += offsets[s];
        }

        Self {
            offsets,
            members: entries.into_iter().map(|(_, m)| m).collect(),
            counts: vec![[0; RINGS]; n],
        }
    }

    /// Grains whose ring `ring` contains `grain`.
    pub fn containing(&self, grain: GrainId, ring: usize) -> &[GrainId] {
        let slot = grain * RINGS + ring;
        &self.members[self.offsets[slot]..self.offsets[slot + 1]]
    }

    /// Active candidates counted in each ring of `grain`.
    #[inline]
    pub fn counts(&self, grain: GrainId) -> [u32; RINGS] {
        self.counts[grain]
    }

    /// Records `grain` as active in the rings that contain it.
    pub fn activate(&mut self, grain: GrainId) {
        for r in 0..RINGS {
            let slot = grain * RINGS + r;
            for m in self.offsets[slot]..self.offsets[slot + 1] {
                self.counts[self.members[m]][r] += 1;
            }
        }
    }

    /// Reverses [`NeighborRings::activate`].
    pub fn deactivate(&mut self, grain: GrainId) {
        for r in 0..RINGS {
            let slot = grain * RINGS + r;
            for m in self.offsets[slot]..self.offsets[slot + 1] {
                let c = &mut self.counts[self.members[m]][r];
                *c = c.saturating_sub(1);
            }
        }
    }
}
