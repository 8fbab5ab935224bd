use crate::similarity::similarity_or_zero;
use crate::types::{EnrolledIdentity, FaceDescriptor, MatchResult};

/// Minimum similarity for a query to count as a recognized identity.
pub const ACCEPTANCE_THRESHOLD: f32 = 0.75;

/// Strategy for comparing a query descriptor against enrolled identities.
///
/// Implementations must be deterministic and return a confidence in [0, 1].
/// An indexed nearest-neighbour structure can replace the linear scan
/// behind this trait without changing callers.
pub trait Matcher: Send {
    fn best_match(
        &self,
        query: &FaceDescriptor,
        candidates: &[EnrolledIdentity],
        threshold: f32,
    ) -> MatchResult;
}

/// Linear scan over every active candidate using the Euclidean similarity.
///
/// Ties keep the first candidate encountered.
#[derive(Debug, Default, Clone, Copy)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn best_match(
        &self,
        query: &FaceDescriptor,
        candidates: &[EnrolledIdentity],
        threshold: f32,
    ) -> MatchResult {
        let mut best_sim = 0.0f32;
        let mut best_idx: Option<usize> = None;

        for (i, identity) in candidates.iter().enumerate() {
            if !identity.active {
                continue;
            }
            let sim = similarity_or_zero(&query.encoding, &identity.encoding, &identity.id);
            if best_idx.is_none() || sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_sim > threshold => MatchResult {
                recognized: true,
                identity_id: Some(candidates[idx].id.clone()),
                identity_name: Some(candidates[idx].name.clone()),
                confidence: best_sim,
            },
            _ => MatchResult::unrecognized(best_sim),
        }
    }
}
