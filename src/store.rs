use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::info;

use crate::fetcher::RawPage;
use crate::parser::normalize::CaseRecord;

pub const METADATA_FILE: &str = "case_metadata.json";

static PAGE_FILE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^page-(\d+)\.html$").unwrap());

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("failed to create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize case metadata: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Where fetched pages and the final record collection end up.
///
/// Each call is independent; a failed write must not prevent later ones.
pub trait Store {
    /// Persist the body of page `index` (1-based).
    fn save_page(&mut self, index: usize, page: &RawPage) -> Result<PathBuf, PersistenceError>;
    fn save_metadata(&mut self, records: &[CaseRecord]) -> Result<PathBuf, PersistenceError>;
}

/// `page-<n>.html` and `case_metadata.json` under one directory.
pub struct FsStore {
    dir: PathBuf,
}

impl FsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn page_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("page-{}.html", index))
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    /// Saved `page-<n>.html` files in this directory, ordered by page number.
    pub fn saved_pages(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut pages: Vec<(u64, PathBuf)> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                let index = PAGE_FILE_RE.captures(name.to_str()?)?[1].parse().ok()?;
                Some((index, entry.path()))
            })
            .collect();
        pages.sort_by_key(|(index, _)| *index);
        Ok(pages.into_iter().map(|(_, path)| path).collect())
    }

    fn write(&self, path: &Path, contents: &str) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.dir).map_err(|source| PersistenceError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;
        fs::write(path, contents).map_err(|source| PersistenceError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Store for FsStore {
    fn save_page(&mut self, index: usize, page: &RawPage) -> Result<PathBuf, PersistenceError> {
        let path = self.page_path(index);
        self.write(&path, &page.body)?;
        info!(
            path = %path.display(),
            url = %page.spec.url,
            fetched_at = %page.fetched_at,
            bytes = page.body.len(),
            "Saved page"
        );
        Ok(path)
    }

    fn save_metadata(&mut self, records: &[CaseRecord]) -> Result<PathBuf, PersistenceError> {
        let path = self.metadata_path();
        let json = serde_json::to_string_pretty(records)?;
        self.write(&path, &json)?;
        info!(path = %path.display(), records = records.len(), "Saved case metadata");
        Ok(path)
    }
}
