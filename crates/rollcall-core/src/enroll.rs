//! Enrollment: turn one photo of a student into one embedding.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::types::Embedding;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("expected exactly one face in the image, found {faces}")]
    NoFaceOrAmbiguous { faces: usize },
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),
}

/// Decode raw image bytes (JPEG/PNG/...) and embed the single face in them.
///
/// Zero faces and multiple faces are both rejected; no embedding is computed
/// for a rejected image.
pub fn enroll<A: FaceAnalyzer + ?Sized>(
    analyzer: &mut A,
    image_bytes: &[u8],
) -> Result<Embedding, EnrollError> {
    let gray = image::load_from_memory(image_bytes)?.into_luma8();
    let (width, height) = gray.dimensions();
    tracing::debug!(width, height, "enroll: decoded image");
    enroll_frame(analyzer, gray.as_raw(), width, height)
}

/// Embed the single face in an already-decoded grayscale frame.
pub fn enroll_frame<A: FaceAnalyzer + ?Sized>(
    analyzer: &mut A,
    frame: &[u8],
    width: u32,
    height: u32,
) -> Result<Embedding, EnrollError> {
    let faces = analyzer.detect(frame, width, height)?;
    let [face] = faces.as_slice() else {
        tracing::info!(faces = faces.len(), "enroll: rejected image");
        return Err(EnrollError::NoFaceOrAmbiguous { faces: faces.len() });
    };

    let embedding = analyzer.embed(frame, width, height, face)?;
    tracing::info!(
        confidence = face.confidence,
        dim = embedding.dim(),
        "enroll: embedding extracted"
    );
    Ok(embedding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;

    const DIM: usize = 8;

    /// Reports `faces` boxes and counts embed calls.
    struct CountingAnalyzer {
        faces: usize,
        embeds: usize,
        seen: Option<(u32, u32, usize)>,
    }

    impl CountingAnalyzer {
        fn with_faces(faces: usize) -> Self {
            Self {
                faces,
                embeds: 0,
                seen: None,
            }
        }
    }

    impl FaceAnalyzer for CountingAnalyzer {
        fn detect(
            &mut self,
            frame: &[u8],
            width: u32,
            height: u32,
        ) -> Result<Vec<BoundingBox>, AnalyzerError> {
            self.seen = Some((width, height, frame.len()));
            Ok((0..self.faces)
                .map(|i| BoundingBox {
                    x: i as f32 * 10.0,
                    y: 0.0,
                    width: 8.0,
                    height: 8.0,
                    confidence: 0.9,
                    landmarks: None,
                })
                .collect())
        }

        fn embed(
            &mut self,
            _frame: &[u8],
            _width: u32,
            _height: u32,
            _face: &BoundingBox,
        ) -> Result<Embedding, AnalyzerError> {
            self.embeds += 1;
            Ok(Embedding::new(vec![0.125; DIM]))
        }
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, image::Rgb([200, 120, 40]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_single_face_returns_embedding() {
        let mut analyzer = CountingAnalyzer::with_faces(1);
        let embedding = enroll(&mut analyzer, &png_bytes(32, 24)).unwrap();
        assert_eq!(embedding.dim(), DIM);
        assert_eq!(analyzer.embeds, 1);
        // Decoded to one byte per pixel before detection.
        assert_eq!(analyzer.seen, Some((32, 24, 32 * 24)));
    }

    #[test]
    fn test_no_face_rejected() {
        let mut analyzer = CountingAnalyzer::with_faces(0);
        let err = enroll(&mut analyzer, &png_bytes(16, 16)).unwrap_err();
        assert!(matches!(err, EnrollError::NoFaceOrAmbiguous { faces: 0 }));
        assert_eq!(analyzer.embeds, 0);
    }

    #[test]
    fn test_multiple_faces_rejected() {
        for faces in [2, 3, 7] {
            let mut analyzer = CountingAnalyzer::with_faces(faces);
            let err = enroll(&mut analyzer, &png_bytes(16, 16)).unwrap_err();
            assert!(
                matches!(err, EnrollError::NoFaceOrAmbiguous { faces: n } if n == faces),
                "{faces} faces: {err}"
            );
            assert_eq!(analyzer.embeds, 0);
        }
    }

    #[test]
    fn test_garbage_bytes_fail_to_decode() {
        let mut analyzer = CountingAnalyzer::with_faces(1);
        let err = enroll(&mut analyzer, b"definitely not an image").unwrap_err();
        assert!(matches!(err, EnrollError::Decode(_)));
        assert!(analyzer.seen.is_none());
    }

    #[test]
    fn test_enroll_frame_grayscale() {
        let mut analyzer = CountingAnalyzer::with_faces(1);
        let frame = vec![90u8; 20 * 10];
        let embedding = enroll_frame(&mut analyzer, &frame, 20, 10).unwrap();
        assert_eq!(embedding.values, vec![0.125; DIM]);
    }
}
