//! Nearest-reference identity matching.

use crate::detector::{DetectorError, FaceLocator};
use crate::recognizer::FaceEncoder;
use crate::types::{Embedding, FaceMatch, MatchResult, ReferenceIdentity};

/// Default Euclidean distance threshold for L2-normalized ArcFace embeddings.
///
/// Roughly equivalent to a cosine similarity of 0.4 between unit vectors.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 1.1;

/// Strategy for comparing a query embedding against the enrolled gallery.
pub trait Matcher {
    fn compare(
        &self,
        query: &Embedding,
        gallery: &[ReferenceIdentity],
        threshold: f32,
    ) -> MatchResult;
}

/// Nearest-neighbour matcher over Euclidean distance.
///
/// Scans every reference. Ties keep the first reference in gallery order.
/// References whose dimension differs from the query are skipped.
/// The threshold is applied once, to the final minimum: a match requires a
/// distance strictly below it.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        query: &Embedding,
        gallery: &[ReferenceIdentity],
        threshold: f32,
    ) -> MatchResult {
        let mut best: Option<(usize, f32)> = None;

        for (i, reference) in gallery.iter().enumerate() {
            if reference.embedding.dim() != query.dim() {
                tracing::debug!(
                    id = %reference.identity.id,
                    expected = query.dim(),
                    found = reference.embedding.dim(),
                    "reference dimension mismatch, skipped"
                );
                continue;
            }
            let dist = query.euclidean_distance(&reference.embedding);
            let closer = match best {
                None => true,
                Some((_, min_dist)) => dist < min_dist,
            };
            if closer {
                best = Some((i, dist));
            }
        }

        match best {
            Some((idx, dist)) if dist < threshold => MatchResult {
                matched: true,
                distance: Some(dist),
                identity: Some(gallery[idx].identity.clone()),
            },
            Some((_, dist)) => MatchResult::unknown(Some(dist)),
            None => MatchResult::unknown(None),
        }
    }
}

/// Locate every face in a luma frame and match each one against the gallery.
///
/// A face whose embedding cannot be computed is dropped from the result;
/// a locator failure fails the whole frame.
#[allow(clippy::too_many_arguments)]
pub fn identify_faces<L, E, M>(
    frame: &[u8],
    width: u32,
    height: u32,
    locator: &mut L,
    encoder: &mut E,
    matcher: &M,
    gallery: &[ReferenceIdentity],
    threshold: f32,
) -> Result<Vec<FaceMatch>, DetectorError>
where
    L: FaceLocator + ?Sized,
    E: FaceEncoder + ?Sized,
    M: Matcher + ?Sized,
{
    let faces = locator.locate(frame, width, height)?;
    let mut matches = Vec::with_capacity(faces.len());

    for face in faces {
        let embedding = match encoder.encode(frame, width, height, &face) {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(
                    error = %e,
                    confidence = face.confidence,
                    "skipping face without embedding"
                );
                continue;
            }
        };
        let result = matcher.compare(&embedding, gallery, threshold);
        tracing::trace!(label = %result.label(), distance = ?result.distance, "face matched");
        matches.push(FaceMatch { face, result });
    }

    Ok(matches)
}
