//! The PDF library the RAG index is built from.
//!
//! All file operations stay inside one configured directory. Names coming from
//! clients must be bare file names. Symlinks in the directory are not documents:
//! they are never listed, written through or deleted.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Longest accepted file name in bytes.
const MAX_FILENAME_LEN: usize = 255;

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("invalid file name")]
    InvalidFilename,
    #[error("only PDF files are allowed")]
    NotPdf,
    #[error("document '{0}' not found")]
    NotFound(String),
    #[error("no PDF documents found")]
    NoDocuments,
    #[error("index rebuild failed: {stderr}")]
    IndexFailed { stderr: String },
    #[error("index rebuild timed out after {secs} seconds")]
    IndexTimedOut { secs: u64 },
    #[error("could not start indexer: {0}")]
    IndexerUnavailable(std::io::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A PDF in the library.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentInfo {
    pub filename: String,
    pub file_path: String,
    pub size_bytes: u64,
    pub uploaded_at: String,
}

/// Outcome of a successful index rebuild.
#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    pub documents_indexed: usize,
    pub output: String,
}

/// External program that rebuilds the RAG index from the library.
#[derive(Debug, Clone)]
pub struct IndexerCommand {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl IndexerCommand {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
}

pub struct DocumentLibrary {
    dir: PathBuf,
    indexer: IndexerCommand,
}

/// Whether `name` is a single normal path component.
pub fn is_bare_filename(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_FILENAME_LEN {
        return false;
    }
    if name.contains(['/', '\\', '\0']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn has_pdf_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

impl DocumentLibrary {
    pub fn new(dir: impl Into<PathBuf>, indexer: IndexerCommand) -> Self {
        Self {
            dir: dir.into(),
            indexer,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn ensure_dir(&self) -> Result<(), DocumentError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    /// All PDFs in the library, newest first.
    pub async fn list(&self) -> Result<Vec<DocumentInfo>, DocumentError> {
        self.ensure_dir().await?;

        let mut documents = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !has_pdf_extension(&path) {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let modified: DateTime<Utc> = metadata.modified()?.into();
            documents.push((
                modified,
                DocumentInfo {
                    filename: entry.file_name().to_string_lossy().into_owned(),
                    file_path: path.to_string_lossy().into_owned(),
                    size_bytes: metadata.len(),
                    uploaded_at: modified.to_rfc3339(),
                },
            ));
        }

        documents.sort_by(|(a_time, a), (b_time, b)| {
            b_time.cmp(a_time).then_with(|| a.filename.cmp(&b.filename))
        });
        Ok(documents.into_iter().map(|(_, doc)| doc).collect())
    }

    /// Metadata of the directory entry itself, without following a symlink.
    async fn entry_metadata(&self, filename: &str) -> Result<Option<std::fs::Metadata>, DocumentError> {
        match tokio::fs::symlink_metadata(self.dir.join(filename)).await {
            Ok(metadata) => Ok(Some(metadata)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Store an uploaded PDF, replacing any file with the same name.
    ///
    /// The bytes go to a hidden temporary file first and are renamed into
    /// place, so a failed write never leaves a truncated document behind.
    pub async fn save_upload(&self, filename: &str, bytes: &[u8]) -> Result<DocumentInfo, DocumentError> {
        if !is_bare_filename(filename) {
            return Err(DocumentError::InvalidFilename);
        }
        if !has_pdf_extension(Path::new(filename)) {
            return Err(DocumentError::NotPdf);
        }

        self.ensure_dir().await?;
        if let Some(existing) = self.entry_metadata(filename).await? {
            if !existing.is_file() {
                warn!(filename, "Rejected upload over a non-regular file");
                return Err(DocumentError::InvalidFilename);
            }
        }

        let path = self.dir.join(filename);
        let partial = self.dir.join(format!(".{}.{}.part", filename, Uuid::new_v4()));
        let written = match tokio::fs::write(&partial, bytes).await {
            Ok(()) => tokio::fs::rename(&partial, &path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                warn!(error = %cleanup, "Failed to remove partial upload");
            }
            return Err(e.into());
        }

        let metadata = tokio::fs::symlink_metadata(&path).await?;
        let modified: DateTime<Utc> = metadata.modified()?.into();
        info!(filename, size = metadata.len(), "Document uploaded");

        Ok(DocumentInfo {
            filename: filename.to_string(),
            file_path: path.to_string_lossy().into_owned(),
            size_bytes: metadata.len(),
            uploaded_at: modified.to_rfc3339(),
        })
    }

    /// Delete one file from the library.
    pub async fn delete(&self, filename: &str) -> Result<(), DocumentError> {
        if !is_bare_filename(filename) {
            warn!(filename, "Rejected document delete outside the library");
            return Err(DocumentError::InvalidFilename);
        }

        self.ensure_dir().await?;
        let Some(metadata) = self.entry_metadata(filename).await? else {
            return Err(DocumentError::NotFound(filename.to_string()));
        };
        if !metadata.is_file() {
            warn!(filename, "Rejected delete of a non-regular file");
            return Err(DocumentError::InvalidFilename);
        }

        tokio::fs::remove_file(self.dir.join(filename)).await?;
        info!(filename, "Document deleted");
        Ok(())
    }

    async fn pdf_count(&self) -> Result<usize, DocumentError> {
        Ok(self.list().await?.len())
    }

    /// Run the indexer over the library.
    ///
    /// The child runs in the parent of the library directory and is killed if
    /// it outlives the configured timeout. Nothing is retried.
    pub async fn rebuild_index(&self) -> Result<IndexReport, DocumentError> {
        let count = self.pdf_count().await?;
        if count == 0 {
            return Err(DocumentError::NoDocuments);
        }

        let root = tokio::fs::canonicalize(&self.dir).await?;
        let cwd = root.parent().unwrap_or(&root);

        info!(
            program = %self.indexer.program,
            documents = count,
            "Rebuilding index"
        );

        let child = tokio::process::Command::new(&self.indexer.program)
            .args(&self.indexer.args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(DocumentError::IndexerUnavailable)?;

        let output = match tokio::time::timeout(self.indexer.timeout, child.wait_with_output()).await
        {
            Ok(output) => output?,
            Err(_) => {
                let secs = self.indexer.timeout.as_secs();
                error!(secs, "Index rebuild timed out");
                return Err(DocumentError::IndexTimedOut { secs });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            error!(status = %output.status, stderr = %stderr, "Index rebuild failed");
            return Err(DocumentError::IndexFailed { stderr });
        }

        info!(documents = count, "Index rebuilt");
        Ok(IndexReport {
            documents_indexed: count,
            output: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str, timeout: Duration) -> IndexerCommand {
        IndexerCommand {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            timeout,
        }
    }

    fn library(dir: &Path, indexer: IndexerCommand) -> DocumentLibrary {
        DocumentLibrary::new(dir.join("data"), indexer)
    }

    #[test]
    fn test_is_bare_filename() {
        assert!(is_bare_filename("report.pdf"));
        assert!(is_bare_filename("my report (1).PDF"));
        assert!(!is_bare_filename(""));
        assert!(!is_bare_filename("."));
        assert!(!is_bare_filename(".."));
        assert!(!is_bare_filename("../../etc/passwd"));
        assert!(!is_bare_filename("/etc/passwd"));
        assert!(!is_bare_filename("sub/report.pdf"));
        assert!(!is_bare_filename("..\\secret.pdf"));
        assert!(!is_bare_filename(&"a".repeat(300)));
    }

    #[tokio::test]
    async fn test_upload_list_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let lib = library(tmp.path(), sh("true", Duration::from_secs(5)));

        assert!(lib.list().await.unwrap().is_empty());

        lib.save_upload("a.pdf", b"%PDF-1.4 a").await.unwrap();
        lib.save_upload("B.PDF", b"%PDF-1.4 bb").await.unwrap();
        tokio::fs::write(lib.dir().join("notes.txt"), b"ignored").await.unwrap();

        let docs = lib.list().await.unwrap();
        assert_eq!(docs.len(), 2);
        let a = docs.iter().find(|d| d.filename == "a.pdf").unwrap();
        assert_eq!(a.size_bytes, 10);
        assert!(DateTime::parse_from_rfc3339(&a.uploaded_at).is_ok());

        lib.delete("a.pdf").await.unwrap();
        assert_eq!(lib.list().await.unwrap().len(), 1);
        assert!(matches!(
            lib.delete("a.pdf").await,
            Err(DocumentError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_upload_rejects_non_pdf_and_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let lib = library(tmp.path(), sh("true", Duration::from_secs(5)));

        assert!(matches!(
            lib.save_upload("evil.exe", b"MZ").await,
            Err(DocumentError::NotPdf)
        ));
        assert!(matches!(
            lib.save_upload("../escape.pdf", b"x").await,
            Err(DocumentError::InvalidFilename)
        ));
        assert!(!tmp.path().join("escape.pdf").exists());
    }

    #[tokio::test]
    async fn test_delete_rejects_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        let lib = library(tmp.path(), sh("true", Duration::from_secs(5)));
        let outside = tmp.path().join("outside.pdf");
        tokio::fs::write(&outside, b"keep me").await.unwrap();

        assert!(matches!(
            lib.delete("../outside.pdf").await,
            Err(DocumentError::InvalidFilename)
        ));
        assert!(matches!(
            lib.delete("../../etc/passwd").await,
            Err(DocumentError::InvalidFilename)
        ));
        assert!(outside.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_delete_rejects_symlink_escape() {
        let tmp = tempfile::tempdir().unwrap();
        let lib = library(tmp.path(), sh("true", Duration::from_secs(5)));
        lib.list().await.unwrap();

        let outside = tmp.path().join("outside.pdf");
        tokio::fs::write(&outside, b"keep me").await.unwrap();
        std::os::unix::fs::symlink(&outside, lib.dir().join("link.pdf")).unwrap();

        assert!(matches!(
            lib.delete("link.pdf").await,
            Err(DocumentError::InvalidFilename)
        ));
        assert!(outside.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_delete_removes_nothing_behind_a_link() {
        let tmp = tempfile::tempdir().unwrap();
        let lib = library(tmp.path(), sh("true", Duration::from_secs(5)));
        lib.save_upload("a.pdf", b"%PDF-1.4 a").await.unwrap();
        std::os::unix::fs::symlink("a.pdf", lib.dir().join("b.pdf")).unwrap();

        assert!(matches!(
            lib.delete("b.pdf").await,
            Err(DocumentError::InvalidFilename)
        ));
        assert!(lib.dir().join("a.pdf").exists());
        assert!(tokio::fs::symlink_metadata(lib.dir().join("b.pdf")).await.is_ok());
        assert_eq!(lib.list().await.unwrap().len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_upload_does_not_write_through_symlink() {
        let tmp = tempfile::tempdir().unwrap();
        let lib = library(tmp.path(), sh("true", Duration::from_secs(5)));
        lib.list().await.unwrap();

        let outside = tmp.path().join("outside.pdf");
        tokio::fs::write(&outside, b"keep me").await.unwrap();
        std::os::unix::fs::symlink("../outside.pdf", lib.dir().join("evil.pdf")).unwrap();

        assert!(matches!(
            lib.save_upload("evil.pdf", b"OVERWRITTEN").await,
            Err(DocumentError::InvalidFilename)
        ));
        assert_eq!(tokio::fs::read(&outside).await.unwrap(), b"keep me");
    }

    #[tokio::test]
    async fn test_upload_leaves_no_partial_files() {
        let tmp = tempfile::tempdir().unwrap();
        let lib = library(tmp.path(), sh("true", Duration::from_secs(5)));

        lib.save_upload("a.pdf", b"old").await.unwrap();
        lib.save_upload("a.pdf", b"replacement").await.unwrap();

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(lib.dir()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["a.pdf"]);
        assert_eq!(tokio::fs::read(lib.dir().join("a.pdf")).await.unwrap(), b"replacement");
    }

    #[tokio::test]
    async fn test_rebuild_requires_documents() {
        let tmp = tempfile::tempdir().unwrap();
        let lib = library(tmp.path(), sh("true", Duration::from_secs(5)));

        assert!(matches!(
            lib.rebuild_index().await,
            Err(DocumentError::NoDocuments)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rebuild_success_runs_in_parent_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let lib = library(tmp.path(), sh("ls data", Duration::from_secs(5)));
        lib.save_upload("a.pdf", b"%PDF").await.unwrap();

        let report = lib.rebuild_index().await.unwrap();
        assert_eq!(report.documents_indexed, 1);
        assert!(report.output.contains("a.pdf"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rebuild_failure_reports_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        let lib = library(
            tmp.path(),
            sh("echo 'index broke' >&2; exit 3", Duration::from_secs(5)),
        );
        lib.save_upload("a.pdf", b"%PDF").await.unwrap();

        match lib.rebuild_index().await {
            Err(DocumentError::IndexFailed { stderr }) => assert!(stderr.contains("index broke")),
            other => panic!("expected IndexFailed, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rebuild_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let lib = library(
            tmp.path(),
            IndexerCommand {
                program: "sleep".into(),
                args: vec!["5".into()],
                timeout: Duration::from_millis(200),
            },
        );
        lib.save_upload("a.pdf", b"%PDF").await.unwrap();

        let started = std::time::Instant::now();
        assert!(matches!(
            lib.rebuild_index().await,
            Err(DocumentError::IndexTimedOut { secs: 0 })
        ));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_missing_indexer() {
        let tmp = tempfile::tempdir().unwrap();
        let lib = library(
            tmp.path(),
            IndexerCommand {
                program: "definitely-not-an-indexer-binary".into(),
                args: vec![],
                timeout: Duration::from_secs(5),
            },
        );
        lib.save_upload("a.pdf", b"%PDF").await.unwrap();

        assert!(matches!(
            lib.rebuild_index().await,
            Err(DocumentError::IndexerUnavailable(_))
        ));
    }
}
