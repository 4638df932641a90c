/// Identifier for a grain in a packed structure.
///
/// This is an index into the grain list (`0..K`), and is only meaningful
/// within the structure that produced it. Voxels store the 1-based
/// [`Label`] of the grain instead, see [`label_for`].
pub type GrainId = usize;

/// Per-voxel grain label.
///
/// - `0` ([`UNASSIGNED`]) - no grain claims the voxel.
/// - negative ([`CONFLICT`]) - two or more grains claimed the voxel.
/// - `1..=K` - matrix grain `label - 1`.
/// - `> K` - precipitate `label - K - 1`.
pub type Label = i32;

pub const UNASSIGNED: Label = 0;
pub const CONFLICT: Label = -1;

/// Converts a grain index into the label written into voxels.
#[inline]
pub fn label_for(id: GrainId) -> Label {
    id as Label + 1
}

/// Converts a positive label back into a grain index.
///
/// ### Returns
/// `None` for unassigned or conflicted labels.
#[inline]
pub fn grain_for(label: Label) -> Option<GrainId> {
    if label > 0 {
        Some((label - 1) as GrainId)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_one_based() {
        assert_eq!(label_for(0), 1);
        assert_eq!(grain_for(1), Some(0));
        assert_eq!(grain_for(label_for(41)), Some(41));
    }

    #[test]
    fn non_positive_labels_have_no_grain() {
        assert_eq!(grain_for(UNASSIGNED), None);
        assert_eq!(grain_for(CONFLICT), None);
    }
}
