//! Per-job directory layout.
//!
//! ```text
//! <root>/<job_id>/references/reference_00.jpg
//! <root>/<job_id>/outputs/cover.png
//! <root>/<job_id>/outputs/page_01.png
//! <root>/<job_id>/outputs/back_cover.png
//! <root>/<job_id>/outputs/character_ref.png
//! <root>/<job_id>/outputs/result.json
//! ```

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::artifact::{artifact_filename, ANCHOR_FILENAME};
use crate::book::FinalPackage;
use crate::error::StorageError;

/// Filename of the serialized final package.
pub const RESULT_FILENAME: &str = "result.json";

const REFERENCES_DIR: &str = "references";
const OUTPUTS_DIR: &str = "outputs";
const ALLOWED_REFERENCE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Filenames stored for one job, sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobAssets {
    pub references: Vec<String>,
    pub outputs: Vec<String>,
}

/// MIME type from a file extension.
pub fn mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

/// True when `name` is usable as a single path component under the root:
/// non-empty, not `.` or `..`, and free of separators and NUL.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

fn check_name(name: &str) -> Result<(), StorageError> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(StorageError::InvalidName(name.to_string()))
    }
}

/// Filesystem layout rooted at the configured storage directory.
#[derive(Debug, Clone)]
pub struct JobStorage {
    root: PathBuf,
}

impl JobStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(job_id)
    }

    pub fn references_dir(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join(REFERENCES_DIR)
    }

    pub fn outputs_dir(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join(OUTPUTS_DIR)
    }

    /// Deterministic location of a page artifact.
    pub fn artifact_path(&self, job_id: &str, page_number: i32) -> PathBuf {
        self.outputs_dir(job_id).join(artifact_filename(page_number))
    }

    pub fn anchor_path(&self, job_id: &str) -> PathBuf {
        self.outputs_dir(job_id).join(ANCHOR_FILENAME)
    }

    pub fn result_path(&self, job_id: &str) -> PathBuf {
        self.outputs_dir(job_id).join(RESULT_FILENAME)
    }

    /// Creates the job's reference and output directories.
    pub async fn prepare(&self, job_id: &str) -> Result<(), StorageError> {
        check_name(job_id)?;
        tokio::fs::create_dir_all(self.references_dir(job_id)).await?;
        tokio::fs::create_dir_all(self.outputs_dir(job_id)).await?;
        Ok(())
    }

    /// Copies reference images into the job directory as
    /// `reference_NN.<ext>`, normalizing unknown extensions to `.jpg`.
    pub async fn save_references(
        &self,
        job_id: &str,
        sources: &[PathBuf],
    ) -> Result<Vec<PathBuf>, StorageError> {
        check_name(job_id)?;
        let dir = self.references_dir(job_id);
        tokio::fs::create_dir_all(&dir).await?;

        let mut saved = Vec::with_capacity(sources.len());
        for (index, source) in sources.iter().enumerate() {
            let ext = source
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_lowercase)
                .filter(|e| ALLOWED_REFERENCE_EXTENSIONS.contains(&e.as_str()))
                .unwrap_or_else(|| "jpg".to_string());
            let target = dir.join(format!("reference_{:02}.{}", index, ext));
            tokio::fs::copy(source, &target).await?;
            saved.push(target);
        }
        Ok(saved)
    }

    /// Writes the final package as pretty JSON and returns its location.
    pub async fn write_result(
        &self,
        job_id: &str,
        package: &FinalPackage,
    ) -> Result<PathBuf, StorageError> {
        let path = self.result_path(job_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(package)?;
        tokio::fs::write(&path, json).await?;
        Ok(path)
    }

    pub async fn read_result(&self, job_id: &str) -> Result<FinalPackage, StorageError> {
        check_name(job_id)?;
        let path = self.result_path(job_id);
        if !tokio::fs::try_exists(&path).await? {
            return Err(StorageError::JobNotFound(job_id.to_string()));
        }
        let json = tokio::fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Lists reference and output filenames for a job.
    pub fn list_assets(&self, job_id: &str) -> Result<JobAssets, StorageError> {
        check_name(job_id)?;
        let job_dir = self.job_dir(job_id);
        if !job_dir.is_dir() {
            return Err(StorageError::JobNotFound(job_id.to_string()));
        }
        Ok(JobAssets {
            references: list_files(&self.references_dir(job_id))?,
            outputs: list_files(&self.outputs_dir(job_id))?,
        })
    }

    /// Locates an asset by filename, checking outputs before references.
    pub fn asset_path(&self, job_id: &str, filename: &str) -> Option<PathBuf> {
        if !is_valid_name(job_id) || !is_valid_name(filename) {
            return None;
        }
        [self.outputs_dir(job_id), self.references_dir(job_id)]
            .into_iter()
            .map(|dir| dir.join(filename))
            .find(|path| path.is_file())
    }

    /// Removes everything stored for a job. Returns false if nothing existed.
    pub async fn cleanup(&self, job_id: &str) -> Result<bool, StorageError> {
        check_name(job_id)?;
        let dir = self.job_dir(job_id);
        if !tokio::fs::try_exists(&dir).await? {
            return Ok(false);
        }
        tokio::fs::remove_dir_all(&dir).await?;
        Ok(true)
    }

    /// Reads an image and encodes it as a `data:` URL.
    pub async fn data_url(&self, path: &Path) -> Result<String, StorageError> {
        let bytes = tokio::fs::read(path).await?;
        Ok(format!(
            "data:{};base64,{}",
            mime_type(path),
            BASE64.encode(bytes)
        ))
    }

    /// Fills `image_data_url` on every page whose artifact exists.
    ///
    /// Missing files are left without an embedded image.
    pub async fn embed_images(&self, package: &mut FinalPackage) {
        let output_dir = package.output_directory.clone();
        for page in package.all_pages_mut() {
            let Some(filename) = page.image_filename.as_deref() else {
                continue;
            };
            let path = output_dir.join(filename);
            match self.data_url(&path).await {
                Ok(url) => page.image_data_url = Some(url),
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Image not embedded");
                }
            }
        }
    }
}

fn list_files(dir: &Path) -> Result<Vec<String>, StorageError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        if entry.file_type().is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_paths() {
        let storage = JobStorage::new("/data");
        assert_eq!(
            storage.artifact_path("j1", 4),
            PathBuf::from("/data/j1/outputs/page_04.png")
        );
        assert_eq!(
            storage.anchor_path("j1"),
            PathBuf::from("/data/j1/outputs/character_ref.png")
        );
        assert_eq!(
            storage.result_path("j1"),
            PathBuf::from("/data/j1/outputs/result.json")
        );
    }

    #[test]
    fn test_mime_type() {
        assert_eq!(mime_type(Path::new("a.PNG")), "image/png");
        assert_eq!(mime_type(Path::new("a.jpeg")), "image/jpeg");
        assert_eq!(mime_type(Path::new("a.bin")), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_save_references_and_list_assets() {
        let dir = TempDir::new().expect("temp dir");
        let source_png = dir.path().join("photo.PNG");
        let source_other = dir.path().join("scan.tiff");
        std::fs::write(&source_png, b"png").expect("write");
        std::fs::write(&source_other, b"tiff").expect("write");

        let storage = JobStorage::new(dir.path().join("storage"));
        storage.prepare("job").await.expect("prepared");
        let saved = storage
            .save_references("job", &[source_png, source_other])
            .await
            .expect("saved");
        assert!(saved[0].ends_with("reference_00.png"));
        assert!(saved[1].ends_with("reference_01.jpg"));

        std::fs::write(storage.artifact_path("job", 1), b"img").expect("write");
        let assets = storage.list_assets("job").expect("listed");
        assert_eq!(assets.references, vec!["reference_00.png", "reference_01.jpg"]);
        assert_eq!(assets.outputs, vec!["page_01.png"]);

        assert!(storage.asset_path("job", "page_01.png").is_some());
        assert!(storage.asset_path("job", "reference_00.png").is_some());
        assert!(storage.asset_path("job", "nope.png").is_none());
    }

    #[tokio::test]
    async fn test_cleanup() {
        let dir = TempDir::new().expect("temp dir");
        let storage = JobStorage::new(dir.path());
        storage.prepare("job").await.expect("prepared");
        assert!(storage.cleanup("job").await.expect("cleanup"));
        assert!(!storage.cleanup("job").await.expect("cleanup"));
        assert!(matches!(
            storage.list_assets("job"),
            Err(StorageError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unsafe_names_never_touch_the_root() {
        let dir = TempDir::new().expect("temp dir");
        let root = dir.path().join("storage");
        let storage = JobStorage::new(&root);
        storage.prepare("job").await.expect("prepared");
        std::fs::write(dir.path().join("secret.txt"), b"x").expect("write");

        for name in ["", ".", "..", "../job", "a/b", "a\\b"] {
            assert!(!is_valid_name(name), "{:?} accepted", name);
            assert!(matches!(
                storage.cleanup(name).await,
                Err(StorageError::InvalidName(_))
            ));
            assert!(matches!(
                storage.list_assets(name),
                Err(StorageError::InvalidName(_))
            ));
            assert!(storage.prepare(name).await.is_err());
        }
        assert!(is_valid_name("job-1.v2"));
        assert!(root.join("job").is_dir());
        assert!(storage.asset_path("job", "../../secret.txt").is_none());
        assert!(storage.asset_path("..", "secret.txt").is_none());
    }

    #[tokio::test]
    async fn test_data_url() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("cover.png");
        std::fs::write(&path, b"abc").expect("write");
        let url = JobStorage::new(dir.path())
            .data_url(&path)
            .await
            .expect("encoded");
        assert_eq!(url, "data:image/png;base64,YWJj");
    }
}
