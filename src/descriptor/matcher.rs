//! Best/second-best descriptor matching with ambiguity rejection.

use crate::descriptor::PointDescriptor;
use crate::point::PointMatch;

/// For each descriptor of `a`, finds the closest descriptor of `b`.
///
/// A correspondence is emitted only when `best < min_similarity` and
/// `best * significance < second_best`. At most one correspondence is produced
/// per descriptor of `a`; matches need not be mutual.
pub fn find_corresponding_descriptors<D: PointDescriptor>(
    a: &[D],
    b: &[D],
    min_similarity: f64,
    significance: f64,
) -> Vec<PointMatch> {
    let mut out = Vec::new();
    for da in a {
        let mut best = f64::MAX;
        let mut second = f64::MAX;
        let mut best_idx = None;
        for (j, db) in b.iter().enumerate() {
            let d = da.distance(db);
            if d < best {
                second = best;
                best = d;
                best_idx = Some(j);
            } else if d < second {
                second = d;
            }
        }
        if let Some(j) = best_idx {
            if best < min_similarity && best * significance < second {
                out.push(PointMatch::new(*da.basis(), *b[j].basis()));
            }
        }
    }
    out
}
