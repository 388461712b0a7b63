// matcher.rs — Brute-force Hamming matcher with a train-once reference.
//
// The reference frame's descriptors are loaded into the matcher exactly
// once (`train`). Every later frame asks for the two nearest reference
// descriptors of each query descriptor (`knn2`), and `ratio_filter` keeps
// only matches that are clearly better than the runner-up:
//
//     accept  ⇔  d(best) < ratio · d(second)
//
// With a few hundred keypoints per thermal frame an exhaustive scan is
// cheap enough that no index structure is needed.

use crate::descriptor::Descriptor;
use crate::error::{Error, Result};

/// Default distinctiveness ratio.
pub const DEFAULT_RATIO: f32 = 0.88;

/// One correspondence between a query and a reference descriptor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    pub query: usize,
    pub reference: usize,
    pub distance: u32,
}

/// The two nearest reference descriptors of one query descriptor.
/// `second` is `None` when the reference set holds a single descriptor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KnnMatch {
    pub best: Match,
    pub second: Option<Match>,
}

/// Exhaustive Hamming matcher.
#[derive(Debug, Clone, Default)]
pub struct BruteForceMatcher {
    reference: Option<Vec<Descriptor>>,
}

impl BruteForceMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_trained(&self) -> bool {
        self.reference.is_some()
    }

    /// Index the reference descriptors. Allowed once per matcher.
    pub fn train(&mut self, reference: &[Descriptor]) -> Result<()> {
        if self.reference.is_some() {
            return Err(Error::RegistrationAlreadyTrained);
        }
        self.reference = Some(reference.to_vec());
        Ok(())
    }

    /// Two nearest reference descriptors for each query descriptor.
    /// Ties keep the lower reference index.
    pub fn knn2(&self, query: &[Descriptor]) -> Result<Vec<KnnMatch>> {
        let reference = self.reference.as_ref().ok_or(Error::RegistrationNotTrained)?;
        if reference.is_empty() {
            return Ok(Vec::new());
        }

        let knn = query
            .iter()
            .enumerate()
            .map(|(qi, q)| {
                let candidate = |ri: usize| Match {
                    query: qi,
                    reference: ri,
                    distance: q.hamming(&reference[ri]),
                };
                let (best, second) = (1..reference.len()).map(candidate).fold(
                    (candidate(0), None),
                    |(best, second): (Match, Option<Match>), m| {
                        if m.distance < best.distance {
                            (m, Some(best))
                        } else if second.map_or(true, |s| m.distance < s.distance) {
                            (best, Some(m))
                        } else {
                            (best, second)
                        }
                    },
                );
                KnnMatch { best, second }
            })
            .collect();
        Ok(knn)
    }
}

/// Keep the best match of every pair that passes the ratio test.
///
/// A pair without a runner-up cannot show distinctiveness and is dropped.
pub fn ratio_filter(knn: &[KnnMatch], ratio: f32) -> Vec<Match> {
    knn.iter()
        .filter_map(|k| {
            let second = k.second?;
            ((k.best.distance as f32) < ratio * second.distance as f32).then_some(k.best)
        })
        .collect()
}
