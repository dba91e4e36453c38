//! Read-only access to the template photo directory.

use std::path::PathBuf;
use thiserror::Error;

const TEMPLATE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("invalid template name: {0}")]
    InvalidName(String),
    #[error("template not found: {0}")]
    NotFound(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct TemplateStore {
    dir: PathBuf,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Image file names in the directory, sorted. Empty when the directory
    /// does not exist.
    pub async fn list(&self) -> Result<Vec<String>, TemplateError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(dir = %self.dir.display(), "template directory missing");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if is_template_image(&name) && entry.file_type().await?.is_file() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Raw bytes of template `name`.
    ///
    /// Names must be a single path component.
    pub async fn read(&self, name: &str) -> Result<Vec<u8>, TemplateError> {
        validate_name(name)?;
        match tokio::fs::read(self.dir.join(name)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(TemplateError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn extension(name: &str) -> Option<String> {
    name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())
}

pub fn is_template_image(name: &str) -> bool {
    extension(name).is_some_and(|ext| TEMPLATE_EXTENSIONS.contains(&ext.as_str()))
}

/// MIME type to serve a template file with.
pub fn content_type(name: &str) -> &'static str {
    match extension(name).as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

fn validate_name(name: &str) -> Result<(), TemplateError> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(TemplateError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(files: &[&str]) -> (tempfile::TempDir, TemplateStore) {
        let dir = tempfile::tempdir().unwrap();
        for f in files {
            std::fs::write(dir.path().join(f), f.as_bytes()).unwrap();
        }
        let store = TemplateStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn test_list_filters_and_sorts() {
        let (_dir, store) = store_with(&["b.JPG", "a.png", "notes.txt", "c.jpeg", "noext"]);
        assert_eq!(store.list().await.unwrap(), vec!["a.png", "b.JPG", "c.jpeg"]);
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_empty() {
        let store = TemplateStore::new("/nonexistent/facebooth/templates");
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_skips_directories() {
        let (dir, store) = store_with(&["a.png"]);
        std::fs::create_dir(dir.path().join("nested.png")).unwrap();
        assert_eq!(store.list().await.unwrap(), vec!["a.png"]);
    }

    #[tokio::test]
    async fn test_read_existing() {
        let (_dir, store) = store_with(&["group.jpg"]);
        assert_eq!(store.read("group.jpg").await.unwrap(), b"group.jpg");
    }

    #[tokio::test]
    async fn test_read_missing() {
        let (_dir, store) = store_with(&[]);
        assert!(matches!(store.read("missing.jpg").await, Err(TemplateError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_read_rejects_traversal() {
        let (_dir, store) = store_with(&["a.png"]);
        for name in ["../a.png", "sub/a.png", "..\\a.png", "..", ""] {
            assert!(
                matches!(store.read(name).await, Err(TemplateError::InvalidName(_))),
                "{name:?} accepted"
            );
        }
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type("x.PNG"), "image/png");
        assert_eq!(content_type("x.jpeg"), "image/jpeg");
        assert_eq!(content_type("x.gif"), "application/octet-stream");
    }
}
