use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::StorageError;

/// Longest single path component most filesystems accept, in bytes.
const MAX_COMPONENT_BYTES: usize = 255;

/// Extensions longer than this are treated as part of the name when
/// shortening.
const MAX_KEPT_EXTENSION_BYTES: usize = 16;

/// Attachment files on local disk, one subdirectory per account.
///
/// Stored references look like `12/1709630000123-<uuid>_invoice.pdf`. The
/// random part keeps names unique across workers without any shared counter,
/// and files are created with `create_new` so nothing is ever overwritten.
/// Long attachment names are shortened so the file name stays within
/// [`MAX_COMPONENT_BYTES`]; the database keeps the original.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_root(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| StorageError::Io {
                path: self.root.clone(),
                source,
            })
    }

    /// Write `data` and return its stored reference (relative to the root).
    pub async fn save(
        &self,
        account_id: i32,
        original_filename: &str,
        data: &[u8],
    ) -> Result<String, StorageError> {
        let safe_name = sanitize_filename(original_filename)?;

        let account_dir = self.root.join(account_id.to_string());
        tokio::fs::create_dir_all(&account_dir)
            .await
            .map_err(|source| StorageError::Io {
                path: account_dir.clone(),
                source,
            })?;

        let prefix = format!(
            "{}-{}_",
            Utc::now().timestamp_millis(),
            Uuid::new_v4().simple()
        );
        let budget = MAX_COMPONENT_BYTES.saturating_sub(prefix.len());
        let file_name = format!("{}{}", prefix, shorten_filename(&safe_name, budget));
        let path = account_dir.join(&file_name);

        if let Err(source) = write_new(&path, data).await {
            // Don't leave half-written files behind.
            let _ = tokio::fs::remove_file(&path).await;
            return Err(StorageError::Io { path, source });
        }

        tracing::debug!("Stored {} bytes at {}", data.len(), path.display());
        Ok(format!("{}/{}", account_id, file_name))
    }

    pub async fn read(&self, stored_ref: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(stored_ref)?;
        tokio::fs::read(&path)
            .await
            .map_err(|source| StorageError::Io { path, source })
    }

    pub async fn remove(&self, stored_ref: &str) -> Result<(), StorageError> {
        let path = self.resolve(stored_ref)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|source| StorageError::Io { path, source })
    }

    /// Map a stored reference back to a path, refusing anything that would
    /// leave the content directory.
    fn resolve(&self, stored_ref: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(stored_ref);
        let only_normal = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));

        if stored_ref.is_empty() || !only_normal {
            return Err(StorageError::OutsideContentDir(stored_ref.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

async fn write_new(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    Ok(())
}

/// Strip control characters and reject anything that could name a different
/// directory. Separators are refused outright, so the name is a single
/// component and only `.`/`..` (or other all-dot names) can escape.
pub fn sanitize_filename(name: &str) -> Result<String, StorageError> {
    let unsafe_name = || StorageError::UnsafeFilename(name.to_string());

    if name.contains(['/', '\\', '\0']) {
        return Err(unsafe_name());
    }

    let cleaned: String = name.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        return Err(unsafe_name());
    }

    Ok(cleaned.to_string())
}

/// Cut `name` down to `max` bytes on a char boundary, keeping a short
/// extension such as `.pdf` intact.
fn shorten_filename(name: &str, max: usize) -> String {
    if name.len() <= max {
        return name.to_string();
    }

    let keep_extension = |dot: usize| {
        let len = name.len() - dot;
        dot > 0 && len <= MAX_KEPT_EXTENSION_BYTES && len < max
    };
    let (stem, extension) = match name.rfind('.') {
        Some(dot) if keep_extension(dot) => name.split_at(dot),
        _ => (name, ""),
    };

    let mut end = max - extension.len();
    while !stem.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &stem[..end], extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("invoice.pdf").unwrap(), "invoice.pdf");
        assert_eq!(sanitize_filename(" q3\treport.pdf ").unwrap(), "q3report.pdf");

        assert_eq!(
            sanitize_filename("Invoice..final.pdf").unwrap(),
            "Invoice..final.pdf"
        );

        let rejected = [
            "../etc/passwd",
            "a/b.pdf",
            "..\\win.pdf",
            "..",
            ".",
            " .. ",
            "",
            "...",
            "nul\0.pdf",
        ];
        for bad in rejected {
            assert!(
                matches!(sanitize_filename(bad), Err(StorageError::UnsafeFilename(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[tokio::test]
    async fn test_same_name_gets_distinct_references() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        let first = store.save(3, "invoice.pdf", b"first").await.unwrap();
        let second = store.save(3, "invoice.pdf", b"second").await.unwrap();

        assert_ne!(first, second);
        assert!(first.starts_with("3/"));
        assert!(first.ends_with("_invoice.pdf"));
        assert_eq!(store.read(&first).await.unwrap(), b"first");
        assert_eq!(store.read(&second).await.unwrap(), b"second");
    }

    #[test]
    fn test_shorten_filename() {
        assert_eq!(shorten_filename("short.pdf", 20), "short.pdf");
        assert_eq!(shorten_filename("abcdefghij.pdf", 8), "abcd.pdf");
        // Never splits a multi-byte character.
        assert_eq!(shorten_filename("請請請.pdf", 10), "請請.pdf");
        assert_eq!(shorten_filename("no-extension-here", 5), "no-ex");
    }

    #[tokio::test]
    async fn test_long_filename_is_shortened_to_fit() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let name = format!("{}.pdf", "請".repeat(70));
        assert!(name.len() > 200);

        let stored = store.save(1, &name, b"%PDF").await.unwrap();

        let component = stored.strip_prefix("1/").unwrap();
        assert!(component.len() <= MAX_COMPONENT_BYTES);
        assert!(component.ends_with("請.pdf"));
        assert_eq!(store.read(&stored).await.unwrap(), b"%PDF");
    }

    #[tokio::test]
    async fn test_concurrent_saves_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        let saves = (0..32).map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .save(i % 2, "scan.pdf", format!("body {}", i).as_bytes())
                    .await
                    .unwrap()
            })
        });
        let refs: Vec<String> = futures::future::join_all(saves)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let unique: HashSet<_> = refs.iter().collect();
        assert_eq!(unique.len(), 32);
    }

    #[tokio::test]
    async fn test_traversal_rejected_before_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("content"));

        let err = store.save(1, "../../escape.pdf", b"x").await.unwrap_err();
        assert!(matches!(err, StorageError::UnsafeFilename(_)));
        assert!(!dir.path().join("content").exists());
    }

    #[tokio::test]
    async fn test_remove_and_resolve_guard() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        let stored = store.save(9, "a.pdf", b"data").await.unwrap();
        store.remove(&stored).await.unwrap();
        assert!(store.read(&stored).await.is_err());

        assert!(matches!(
            store.read("../secrets").await,
            Err(StorageError::OutsideContentDir(_))
        ));
        assert!(matches!(
            store.read("/etc/passwd").await,
            Err(StorageError::OutsideContentDir(_))
        ));
    }

    #[tokio::test]
    async fn test_ensure_root_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested/pdfs"));
        store.ensure_root().await.unwrap();
        assert!(store.root().is_dir());
    }
}
