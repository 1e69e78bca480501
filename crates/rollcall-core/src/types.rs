use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier assigned to a student by the record store.
pub type StudentId = i64;

/// Distance reported for a face when there were no known embeddings to compare.
///
/// This is the maximum of the normalised metric, but a face carrying it was
/// never compared against anything. Inspect [`MatchOutcome`] rather than the
/// number to tell the two apart.
pub const NO_CANDIDATE_DISTANCE: f32 = 1.0;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Integer pixel edges as `(top, right, bottom, left)`.
    pub fn to_trbl(&self) -> (i32, i32, i32, i32) {
        (
            self.y.round() as i32,
            (self.x + self.width).round() as i32,
            (self.y + self.height).round() as i32,
            self.x.round() as i32,
        )
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// False if any component is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Distance between two embeddings in `[0, 1]`; smaller is more similar.
    ///
    /// Both vectors are L2-normalised and the Euclidean distance between them
    /// is halved, so identical directions give 0 and opposite directions give 1.
    /// A zero vector has no direction and is maximally distant from everything.
    pub fn distance(&self, other: &Embedding) -> f32 {
        let norm_a = l2_norm(&self.values);
        let norm_b = l2_norm(&other.values);
        if norm_a == 0.0 || norm_b == 0.0 {
            return 1.0;
        }

        let squared: f32 = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a / norm_a - b / norm_b).powi(2))
            .sum();

        (squared.sqrt() / 2.0).min(1.0)
    }
}

fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|v| v * v).sum::<f32>().sqrt()
}

/// One enrolled student as held by the encoding cache.
#[derive(Debug, Clone, PartialEq)]
pub struct KnownEncoding {
    pub student_id: StudentId,
    pub name: String,
    pub embedding: Embedding,
}

/// In-memory view of the encoding cache, keyed and ordered by student id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnownEncodings {
    embeddings: BTreeMap<StudentId, Embedding>,
    names: BTreeMap<StudentId, String>,
}

impl KnownEncodings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `student_id`.
    pub fn insert(&mut self, student_id: StudentId, name: impl Into<String>, embedding: Embedding) {
        self.embeddings.insert(student_id, embedding);
        self.names.insert(student_id, name.into());
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    pub fn embedding(&self, student_id: StudentId) -> Option<&Embedding> {
        self.embeddings.get(&student_id)
    }

    pub fn name(&self, student_id: StudentId) -> Option<&str> {
        self.names.get(&student_id).map(String::as_str)
    }

    /// Display label for a student, falling back to the id.
    pub fn label(&self, student_id: StudentId) -> String {
        self.name(student_id)
            .map(str::to_string)
            .unwrap_or_else(|| student_id.to_string())
    }

    pub fn embeddings(&self) -> &BTreeMap<StudentId, Embedding> {
        &self.embeddings
    }

    pub fn names(&self) -> &BTreeMap<StudentId, String> {
        &self.names
    }
}

impl FromIterator<KnownEncoding> for KnownEncodings {
    fn from_iter<I: IntoIterator<Item = KnownEncoding>>(iter: I) -> Self {
        let mut known = KnownEncodings::new();
        for entry in iter {
            known.insert(entry.student_id, entry.name, entry.embedding);
        }
        known
    }
}

/// A face found in a frame, with its embedding.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bounding_box: BoundingBox,
    pub embedding: Embedding,
}

/// How a detected face compared against the known set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchOutcome {
    /// Nearest candidate was within tolerance.
    Matched { student_id: StudentId, distance: f32 },
    /// Nearest candidate was beyond tolerance; `distance` is to that candidate.
    Unmatched { distance: f32 },
    /// The known set was empty.
    NoCandidates,
}

/// Result of matching one detected face.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub bounding_box: BoundingBox,
    pub outcome: MatchOutcome,
}

impl MatchResult {
    pub fn matched_student_id(&self) -> Option<StudentId> {
        match self.outcome {
            MatchOutcome::Matched { student_id, .. } => Some(student_id),
            _ => None,
        }
    }

    /// Distance to the nearest candidate, or [`NO_CANDIDATE_DISTANCE`].
    pub fn distance(&self) -> f32 {
        match self.outcome {
            MatchOutcome::Matched { distance, .. } | MatchOutcome::Unmatched { distance } => {
                distance
            }
            MatchOutcome::NoCandidates => NO_CANDIDATE_DISTANCE,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self.outcome, MatchOutcome::Matched { .. })
    }
}
