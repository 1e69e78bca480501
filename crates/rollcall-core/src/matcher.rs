//! Nearest-neighbour matching of detected faces against the known set.
//!
//! Candidates are visited in ascending student id and only a strictly closer
//! candidate replaces the current best, so equidistant candidates resolve to
//! the lowest id.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::types::{DetectedFace, Embedding, KnownEncodings, MatchOutcome, MatchResult, StudentId};

/// Closest comparable known embedding to `probe`, with its distance.
///
/// Returns `None` if no known embedding shares the probe's dimensionality.
pub fn nearest(probe: &Embedding, known: &KnownEncodings) -> Option<(StudentId, f32)> {
    let mut best: Option<(StudentId, f32)> = None;

    for (&student_id, candidate) in known.embeddings() {
        if candidate.dim() != probe.dim() {
            tracing::warn!(
                student_id,
                expected = probe.dim(),
                actual = candidate.dim(),
                "skipping known embedding with mismatched dimensionality"
            );
            continue;
        }
        let distance = probe.distance(candidate);
        match best {
            Some((_, d)) if distance >= d => {}
            _ => best = Some((student_id, distance)),
        }
    }

    best
}

/// Classify one probe embedding under `tolerance`.
pub fn classify(probe: &Embedding, known: &KnownEncodings, tolerance: f32) -> MatchOutcome {
    match nearest(probe, known) {
        None => MatchOutcome::NoCandidates,
        Some((student_id, distance)) if distance <= tolerance => MatchOutcome::Matched {
            student_id,
            distance,
        },
        Some((_, distance)) => MatchOutcome::Unmatched { distance },
    }
}

/// Classify every detected face, preserving detection order.
pub fn match_faces(
    faces: Vec<DetectedFace>,
    known: &KnownEncodings,
    tolerance: f32,
) -> Vec<MatchResult> {
    faces
        .into_iter()
        .map(|face| MatchResult {
            outcome: classify(&face.embedding, known, tolerance),
            bounding_box: face.bounding_box,
        })
        .collect()
}

/// Detect, embed, and match all faces in one grayscale frame.
pub fn match_frame<A: FaceAnalyzer + ?Sized>(
    analyzer: &mut A,
    frame: &[u8],
    width: u32,
    height: u32,
    known: &KnownEncodings,
    tolerance: f32,
) -> Result<Vec<MatchResult>, AnalyzerError> {
    let faces = analyzer.analyze(frame, width, height)?;
    let results = match_faces(faces, known, tolerance);
    tracing::trace!(
        faces = results.len(),
        matched = results.iter().filter(|r| r.is_match()).count(),
        "frame matched"
    );
    Ok(results)
}
