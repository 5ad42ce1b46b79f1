//! Image attachments
//!
//! Tests attach screenshots as (kind, payload) pairs; the store persists them
//! next to the report and hands back relative paths.

use base64::Engine;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::error::ConfigError;

/// Directory, relative to the output dir, images are written to
pub const IMAGE_DIR: &str = "images";

/// An image payload by kind
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Image {
    File(PathBuf),
    Base64(String),
    Bin(Vec<u8>),
    Url(String),
}

impl Image {
    /// Build from a kind name: `file`, `base64`, `bin` or `url`
    pub fn from_kind(kind: &str, payload: impl Into<Vec<u8>>) -> Result<Self, ConfigError> {
        let payload = payload.into();
        let text = || String::from_utf8_lossy(&payload).into_owned();
        match kind {
            "file" => Ok(Image::File(PathBuf::from(text()))),
            "base64" => Ok(Image::Base64(text())),
            "bin" => Ok(Image::Bin(payload.clone())),
            "url" => Ok(Image::Url(text())),
            other => Err(ConfigError::UnsupportedImageKind(other.to_string())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Image::File(_) => "file",
            Image::Base64(_) => "base64",
            Image::Bin(_) => "bin",
            Image::Url(_) => "url",
        }
    }
}

/// Persists images and returns their stored relative paths
pub trait ImageStore: Send + Sync {
    fn save(&self, test_id: &str, images: &[Image]) -> Result<Vec<String>, ConfigError>;
}

/// Store that drops every image; the default when no output dir is configured
#[derive(Clone, Copy, Debug, Default)]
pub struct NullImageStore;

impl ImageStore for NullImageStore {
    fn save(&self, _test_id: &str, _images: &[Image]) -> Result<Vec<String>, ConfigError> {
        Ok(Vec::new())
    }
}

/// Writes images under `<output_dir>/images/`
#[derive(Clone, Debug)]
pub struct DirImageStore {
    output_dir: PathBuf,
}

impl DirImageStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    fn images_dir(&self) -> PathBuf {
        self.output_dir.join(IMAGE_DIR)
    }

    fn save_one(&self, image: &Image) -> Result<String, String> {
        let (file_name, bytes) = match image {
            Image::File(path) => {
                let bytes = fs::read(path).map_err(|e| format!("{}: {e}", path.display()))?;
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(generated_name);
                (name, bytes)
            }
            Image::Base64(data) => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(data.trim())
                    .map_err(|e| format!("invalid base64 image: {e}"))?;
                (generated_name(), bytes)
            }
            Image::Bin(bytes) => (generated_name(), bytes.clone()),
            Image::Url(url) => (generated_name(), fetch_url(url)?),
        };

        let dir = self.images_dir();
        fs::create_dir_all(&dir).map_err(|e| format!("{}: {e}", dir.display()))?;
        let target = dir.join(&file_name);
        fs::write(&target, bytes).map_err(|e| format!("{}: {e}", target.display()))?;

        debug!("Saved {} image to {}", image.kind(), target.display());
        Ok(Path::new(IMAGE_DIR)
            .join(file_name)
            .to_string_lossy()
            .into_owned())
    }
}

impl ImageStore for DirImageStore {
    fn save(&self, test_id: &str, images: &[Image]) -> Result<Vec<String>, ConfigError> {
        images
            .iter()
            .map(|image| {
                self.save_one(image).map_err(|reason| ConfigError::ImageSave {
                    test: test_id.to_string(),
                    reason,
                })
            })
            .collect()
    }
}

static IMAGE_SEQ: AtomicU64 = AtomicU64::new(1);

/// `%Y%m%d%H%M%S_<seq>_<1..=100>.png`, unique within the process
fn generated_name() -> String {
    let seq = IMAGE_SEQ.fetch_add(1, Ordering::Relaxed);
    let suffix: u32 = rand::random_range(1..=100);
    format!("{}_{seq}_{suffix}.png", Utc::now().format("%Y%m%d%H%M%S"))
}

/// Download on a plain thread so a surrounding async runtime is never blocked
fn fetch_url(url: &str) -> Result<Vec<u8>, String> {
    let url = url.to_string();
    std::thread::spawn(move || -> Result<Vec<u8>, String> {
        let response = reqwest::blocking::get(&url)
            .and_then(|r| r.error_for_status())
            .map_err(|e| format!("{url}: {e}"))?;
        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| format!("{url}: {e}"))
    })
    .join()
    .map_err(|_| "image download thread panicked".to_string())?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_from_kind() {
        assert_eq!(
            Image::from_kind("url", "http://x/y.png").unwrap(),
            Image::Url("http://x/y.png".to_string())
        );
        assert_eq!(
            Image::from_kind("bin", vec![1u8, 2]).unwrap(),
            Image::Bin(vec![1, 2])
        );
        assert!(matches!(
            Image::from_kind("gif", "x"),
            Err(ConfigError::UnsupportedImageKind(kind)) if kind == "gif"
        ));
    }

    #[test]
    fn test_dir_store_saves_each_kind() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("shot.png");
        fs::write(&source, b"png-bytes").unwrap();

        let store = DirImageStore::new(dir.path().join("out"));
        let saved = store
            .save(
                "m.C.t",
                &[
                    Image::File(source.clone()),
                    Image::Base64("aGVsbG8=".to_string()),
                    Image::Bin(vec![0, 1, 2]),
                ],
            )
            .unwrap();

        assert_eq!(saved.len(), 3);
        assert_eq!(saved[0], Path::new("images").join("shot.png").to_string_lossy());
        for rel in &saved {
            assert!(rel.starts_with("images"));
        }
        let decoded_name = Path::new(&saved[1]).file_name().unwrap();
        let decoded = fs::read(dir.path().join("out/images").join(decoded_name)).unwrap();
        assert_eq!(decoded, b"hello");
    }

    #[test]
    fn test_dir_store_reports_bad_payload() {
        let dir = tempdir().unwrap();
        let store = DirImageStore::new(dir.path());
        let err = store
            .save("m.C.t", &[Image::Base64("***".to_string())])
            .unwrap_err();
        assert!(matches!(err, ConfigError::ImageSave { .. }));
    }

    #[test]
    fn test_null_store() {
        assert!(NullImageStore
            .save("m.C.t", &[Image::Bin(vec![1])])
            .unwrap()
            .is_empty());
    }
}
