use std::io::Write;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("invalid file name '{0}'")]
    InvalidName(String),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to save face crop: {0}")]
    Image(#[from] image::ImageError),
}

/// Raw document uploads and the faces cropped out of them.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    upload_dir: PathBuf,
    faces_dir: PathBuf,
}

impl DocumentStore {
    pub fn new(upload_dir: &Path, faces_dir: &Path) -> Self {
        Self {
            upload_dir: upload_dir.to_path_buf(),
            faces_dir: faces_dir.to_path_buf(),
        }
    }

    /// Persist an upload under its base name, never overwriting: a taken name
    /// gets a short random suffix before the extension.
    pub fn save_upload(&self, filename: &str, contents: &[u8]) -> Result<PathBuf, DocumentError> {
        let base = base_name(filename)?;
        std::fs::create_dir_all(&self.upload_dir).map_err(|source| DocumentError::Io {
            path: self.upload_dir.clone(),
            source,
        })?;

        let mut candidate = self.upload_dir.join(&base);
        loop {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
            {
                Ok(mut file) => {
                    file.write_all(contents).map_err(|source| DocumentError::Io {
                        path: candidate.clone(),
                        source,
                    })?;
                    return Ok(candidate);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    candidate = self.upload_dir.join(with_suffix(&base));
                }
                Err(source) => {
                    return Err(DocumentError::Io {
                        path: candidate,
                        source,
                    })
                }
            }
        }
    }

    /// Save a cropped face as `face_<upload base name>` in the faces directory.
    pub fn save_face(&self, upload: &Path, face: &DynamicImage) -> Result<PathBuf, DocumentError> {
        let base = upload
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| DocumentError::InvalidName(upload.display().to_string()))?;
        std::fs::create_dir_all(&self.faces_dir).map_err(|source| DocumentError::Io {
            path: self.faces_dir.clone(),
            source,
        })?;

        let path = self.faces_dir.join(format!("face_{base}"));
        let format = ImageFormat::from_path(&path).unwrap_or(ImageFormat::Png);
        DynamicImage::ImageRgb8(face.to_rgb8()).save_with_format(&path, format)?;
        Ok(path)
    }
}

/// Final path component of a client-supplied name; rejects names that have
/// none (empty, `..`, `/`).
fn base_name(filename: &str) -> Result<String, DocumentError> {
    Path::new(filename.trim())
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| DocumentError::InvalidName(filename.to_string()))
}

fn with_suffix(base: &str) -> String {
    let tag = uuid::Uuid::new_v4().simple().to_string();
    let tag = &tag[..7];
    let path = Path::new(base);
    match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) => format!(
            "{}_{tag}.{}",
            stem.to_string_lossy(),
            ext.to_string_lossy()
        ),
        _ => format!("{base}_{tag}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn scratch_store(tag: &str) -> (DocumentStore, PathBuf) {
        let root = std::env::temp_dir().join(format!(
            "blinkproofd-docs-test-{tag}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let store = DocumentStore::new(&root.join("media"), &root.join("processed_faces"));
        (store, root)
    }

    #[test]
    fn test_upload_strips_directories() {
        let (store, root) = scratch_store("strip");
        let path = store.save_upload("../../etc/passport.png", b"abc").unwrap();
        assert_eq!(path, root.join("media").join("passport.png"));
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_upload_never_overwrites() {
        let (store, root) = scratch_store("clobber");
        let first = store.save_upload("id.jpg", b"one").unwrap();
        let second = store.save_upload("id.jpg", b"two").unwrap();
        assert_ne!(first, second);
        assert_eq!(std::fs::read(&first).unwrap(), b"one");
        assert_eq!(std::fs::read(&second).unwrap(), b"two");
        let name = second.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("id_") && name.ends_with(".jpg"), "{name}");
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_upload_rejects_nameless() {
        let (store, _root) = scratch_store("nameless");
        assert!(matches!(
            store.save_upload("..", b"x"),
            Err(DocumentError::InvalidName(_))
        ));
        assert!(matches!(
            store.save_upload("  ", b"x"),
            Err(DocumentError::InvalidName(_))
        ));
    }

    #[test]
    fn test_face_saved_with_prefix() {
        let (store, root) = scratch_store("face");
        let upload = store.save_upload("card.png", b"raw").unwrap();
        let crop = DynamicImage::ImageRgb8(RgbImage::new(5, 7));
        let path = store.save_face(&upload, &crop).unwrap();
        assert_eq!(path, root.join("processed_faces").join("face_card.png"));
        let saved = image::open(&path).unwrap();
        assert_eq!((saved.width(), saved.height()), (5, 7));
        let _ = std::fs::remove_dir_all(&root);
    }
}
