//! Face analysis capability: pixels in, boxes and embeddings out.

use crate::detector::{DetectorError, DetectorOptions, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, DetectedFace, Embedding};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("frame buffer holds {actual} bytes, expected {expected} for {width}x{height}")]
    InvalidFrame {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("analyzer failed: {0}")]
    Other(String),
}

/// Detects faces in an 8-bit grayscale frame and embeds them.
///
/// Implementations must return embeddings of one fixed dimensionality across
/// calls. Boxes may come back in any order.
pub trait FaceAnalyzer {
    fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<BoundingBox>, AnalyzerError>;

    fn embed(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<Embedding, AnalyzerError>;

    /// Detect every face and embed each one.
    fn analyze(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<DetectedFace>, AnalyzerError> {
        let boxes = self.detect(frame, width, height)?;
        boxes
            .into_iter()
            .map(|bounding_box| {
                let embedding = self.embed(frame, width, height, &bounding_box)?;
                Ok(DetectedFace {
                    bounding_box,
                    embedding,
                })
            })
            .collect()
    }
}

impl<T: FaceAnalyzer + ?Sized> FaceAnalyzer for &mut T {
    fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<BoundingBox>, AnalyzerError> {
        (**self).detect(frame, width, height)
    }

    fn embed(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<Embedding, AnalyzerError> {
        (**self).embed(frame, width, height, face)
    }
}

/// Reject buffers too short for the stated dimensions.
pub fn check_frame(frame: &[u8], width: u32, height: u32) -> Result<(), AnalyzerError> {
    let expected = width as usize * height as usize;
    if expected == 0 || frame.len() < expected {
        return Err(AnalyzerError::InvalidFrame {
            width,
            height,
            expected,
            actual: frame.len(),
        });
    }
    Ok(())
}

/// SCRFD detection + ArcFace embedding.
pub struct OnnxFaceAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceAnalyzer {
    /// Load both models. Fails fast if either file is missing.
    pub fn load(
        scrfd_path: &str,
        arcface_path: &str,
        options: DetectorOptions,
    ) -> Result<Self, AnalyzerError> {
        let detector = FaceDetector::load(scrfd_path, options)?;
        let recognizer = FaceRecognizer::load(arcface_path)?;
        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<BoundingBox>, AnalyzerError> {
        check_frame(frame, width, height)?;
        Ok(self.detector.detect(frame, width, height)?)
    }

    fn embed(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<Embedding, AnalyzerError> {
        check_frame(frame, width, height)?;
        Ok(self.recognizer.embed(frame, width, height, face)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_frame_accepts_exact() {
        assert!(check_frame(&[0u8; 12], 4, 3).is_ok());
    }

    #[test]
    fn test_check_frame_rejects_short() {
        let err = check_frame(&[0u8; 11], 4, 3).unwrap_err();
        assert!(matches!(
            err,
            AnalyzerError::InvalidFrame { expected: 12, actual: 11, .. }
        ));
    }

    #[test]
    fn test_check_frame_rejects_empty_dims() {
        assert!(check_frame(&[], 0, 0).is_err());
    }
}
