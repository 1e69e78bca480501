//! Student registration: photo → embedding → stored student.

use rollcall_core::records::{ImageStore, RecordError, StudentRegistry};
use rollcall_core::{enroll, EnrollError, FaceAnalyzer, StudentId};
use rollcall_store::{EmbeddingStore, StoreError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegisterError {
    #[error("student name must not be empty")]
    EmptyName,
    #[error(transparent)]
    Enroll(#[from] EnrollError),
    #[error("record store: {0}")]
    Record(#[from] RecordError),
    #[error("encoding cache: {0}")]
    Store(#[from] StoreError),
}

/// Enroll `image_bytes`, then persist the image, the student and the encoding.
///
/// Nothing is written unless the photo holds exactly one face. If a later
/// write fails, the earlier ones are undone.
pub fn register_student<A, R, I>(
    analyzer: &mut A,
    registry: &R,
    images: &I,
    encodings: &EmbeddingStore,
    name: &str,
    image_bytes: &[u8],
    filename: &str,
) -> Result<StudentId, RegisterError>
where
    A: FaceAnalyzer + ?Sized,
    R: StudentRegistry,
    I: ImageStore,
{
    let name = name.trim();
    if name.is_empty() {
        return Err(RegisterError::EmptyName);
    }

    let embedding = enroll(analyzer, image_bytes)?;
    let image_ref = images.save(image_bytes, filename)?;

    let student_id = match registry.create_student(name, &image_ref) {
        Ok(id) => id,
        Err(e) => {
            discard_image(images, &image_ref);
            return Err(e.into());
        }
    };

    if let Err(e) = encodings.upsert(student_id, name, &embedding) {
        if let Err(err) = registry.delete_student(student_id) {
            tracing::warn!(
                student_id,
                error = %err,
                "could not delete student after failed registration; row has no encoding"
            );
        }
        discard_image(images, &image_ref);
        return Err(e.into());
    }

    tracing::info!(student_id, name, image_ref = %image_ref, "student registered");
    Ok(student_id)
}

fn discard_image<I: ImageStore>(images: &I, image_ref: &str) {
    if let Err(err) = images.remove(image_ref) {
        tracing::warn!(image_ref, error = %err, "orphaned enrollment image");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, ImageFormat};
    use rollcall_core::{AnalyzerError, BoundingBox, Embedding};
    use rollcall_store::{LocalImageStore, SqliteRecords};
    use std::io::Cursor;

    struct FixedFaces(usize);

    impl FaceAnalyzer for FixedFaces {
        fn detect(
            &mut self,
            _frame: &[u8],
            _width: u32,
            _height: u32,
        ) -> Result<Vec<BoundingBox>, AnalyzerError> {
            Ok(vec![
                BoundingBox {
                    x: 1.0,
                    y: 1.0,
                    width: 4.0,
                    height: 4.0,
                    confidence: 0.8,
                    landmarks: None,
                };
                self.0
            ])
        }

        fn embed(
            &mut self,
            _frame: &[u8],
            _width: u32,
            _height: u32,
            _face: &BoundingBox,
        ) -> Result<Embedding, AnalyzerError> {
            Ok(Embedding::new(vec![0.6, 0.8, 0.0]))
        }
    }

    fn photo() -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageLuma8(GrayImage::from_pixel(12, 12, image::Luma([128])))
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    struct Stores {
        dir: tempfile::TempDir,
        db: SqliteRecords,
        images: LocalImageStore,
        encodings: EmbeddingStore,
    }

    fn stores() -> Stores {
        let dir = tempfile::tempdir().unwrap();
        Stores {
            db: SqliteRecords::open_in_memory().unwrap(),
            images: LocalImageStore::new(dir.path().join("images")),
            encodings: EmbeddingStore::open(dir.path().join("encodings.json")),
            dir,
        }
    }

    #[test]
    fn test_register_persists_everything() {
        let s = stores();
        let id = register_student(
            &mut FixedFaces(1),
            &s.db,
            &s.images,
            &s.encodings,
            "  Ana ",
            &photo(),
            "ana.png",
        )
        .unwrap();

        let students = s.db.students().unwrap();
        assert_eq!(students.len(), 1);
        assert_eq!(students[0].id, id);
        assert_eq!(students[0].name, "Ana");
        assert!(students[0].image_ref.ends_with(".png"));
        assert!(std::path::Path::new(&students[0].image_ref).exists());

        let known = s.encodings.load().unwrap();
        assert_eq!(known.name(id), Some("Ana"));
        assert_eq!(known.embedding(id).unwrap().values, vec![0.6, 0.8, 0.0]);
    }

    #[test]
    fn test_ambiguous_photo_writes_nothing() {
        let s = stores();
        let err = register_student(
            &mut FixedFaces(2),
            &s.db,
            &s.images,
            &s.encodings,
            "Ana",
            &photo(),
            "ana.png",
        )
        .unwrap_err();

        assert!(matches!(
            err,
            RegisterError::Enroll(EnrollError::NoFaceOrAmbiguous { faces: 2 })
        ));
        assert!(s.db.students().unwrap().is_empty());
        assert!(!s.dir.path().join("images").exists());
        assert!(s.encodings.load().unwrap().is_empty());
    }

    /// Registry whose inserts always fail.
    struct RejectingRegistry;

    impl StudentRegistry for RejectingRegistry {
        fn create_student(&self, _name: &str, _image_ref: &str) -> Result<StudentId, RecordError> {
            Err(RecordError::Missing("students table".into()))
        }

        fn delete_student(&self, _student_id: StudentId) -> Result<bool, RecordError> {
            Ok(false)
        }
    }

    fn saved_images(s: &Stores) -> usize {
        std::fs::read_dir(s.dir.path().join("images"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[test]
    fn test_failed_student_insert_removes_image() {
        let s = stores();
        let err = register_student(
            &mut FixedFaces(1),
            &RejectingRegistry,
            &s.images,
            &s.encodings,
            "Ana",
            &photo(),
            "ana.png",
        )
        .unwrap_err();

        assert!(matches!(err, RegisterError::Record(RecordError::Missing(_))));
        assert_eq!(saved_images(&s), 0);
    }

    #[test]
    fn test_failed_encoding_write_rolls_back() {
        let s = stores();
        std::fs::write(s.encodings.path(), b"{ not json").unwrap();

        let err = register_student(
            &mut FixedFaces(1),
            &s.db,
            &s.images,
            &s.encodings,
            "Ana",
            &photo(),
            "ana.png",
        )
        .unwrap_err();

        assert!(matches!(err, RegisterError::Store(ref e) if e.is_corrupt()));
        assert!(s.db.students().unwrap().is_empty());
        assert_eq!(saved_images(&s), 0);
        assert_eq!(std::fs::read(s.encodings.path()).unwrap(), b"{ not json");
    }

    #[test]
    fn test_blank_name_rejected() {
        let s = stores();
        let err = register_student(
            &mut FixedFaces(1),
            &s.db,
            &s.images,
            &s.encodings,
            "   ",
            &photo(),
            "x.png",
        )
        .unwrap_err();
        assert!(matches!(err, RegisterError::EmptyName));
        assert!(s.db.students().unwrap().is_empty());
    }
}
