use std::fs;
use std::path::PathBuf;

use indicatif::ProgressBar;
use tracing::{debug, error, info, warn};

use crate::fetcher::{FetchError, Fetcher, PageRequestSpec};
use crate::parser::extract::Extractor;
use crate::parser::normalize::CaseRecord;
use crate::parser::process_page;
use crate::session::Session;
use crate::store::Store;
use crate::transport::Transport;

/// Where a run is. Page numbers are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    NotStarted,
    Fetching(usize),
    Extracting(usize),
    Aggregating,
    Done,
    Failed(usize),
}

/// Case records in page order, then document order within each page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataCollection {
    records: Vec<CaseRecord>,
    pages: usize,
}

impl MetadataCollection {
    fn push_page(&mut self, records: Vec<CaseRecord>) {
        self.records.extend(records);
        self.pages += 1;
    }

    pub fn records(&self) -> &[CaseRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Pages that contributed to this collection (including pages with no cases).
    pub fn pages(&self) -> usize {
        self.pages
    }

    pub fn undated(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.date_delivered.is_none())
            .count()
    }
}

/// A fetch failed and the remaining pages were skipped.
#[derive(Debug, thiserror::Error)]
#[error("page {page} of {total} could not be fetched; remaining pages skipped: {source}")]
pub struct PipelineError {
    pub page: usize,
    pub total: usize,
    #[source]
    pub source: FetchError,
    /// Records from the pages fetched before the failure; already persisted.
    pub partial: MetadataCollection,
}

pub struct Pipeline<T, S> {
    fetcher: Fetcher<T>,
    extractor: Extractor,
    store: S,
    progress: ProgressBar,
    stage: Stage,
}

impl<T: Transport, S: Store> Pipeline<T, S> {
    pub fn new(fetcher: Fetcher<T>, extractor: Extractor, store: S) -> Self {
        Self {
            fetcher,
            extractor,
            store,
            progress: ProgressBar::hidden(),
            stage: Stage::NotStarted,
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    #[cfg(test)]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    #[cfg(test)]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[cfg(test)]
    pub fn fetcher(&self) -> &Fetcher<T> {
        &self.fetcher
    }

    /// Fetch, persist and extract every page in order, then persist the collection.
    ///
    /// The first fetch failure stops the run: later pages are never requested.
    /// Pages already fetched stay on disk and their records are still written
    /// before the error is returned; a failure on page 1 writes nothing. Write
    /// failures are logged and skipped.
    pub async fn run(
        &mut self,
        specs: &[PageRequestSpec],
        session: &mut Session,
    ) -> Result<MetadataCollection, PipelineError> {
        let total = specs.len();
        let mut collection = MetadataCollection::default();
        self.progress.set_length(total as u64);

        for (i, spec) in specs.iter().enumerate() {
            let page_no = i + 1;
            self.enter(Stage::Fetching(page_no));
            self.progress.set_message(format!("page {}", page_no));

            let page = match self.fetcher.fetch(spec, session).await {
                Ok(page) => page,
                Err(source) => {
                    self.enter(Stage::Failed(page_no));
                    error!(
                        page = page_no,
                        total,
                        status = ?source.status(),
                        error = %source,
                        "Fetch failed, aborting run"
                    );
                    // Nothing fetched: keep whatever an earlier run left behind.
                    if collection.pages() > 0 {
                        self.save_metadata(&collection);
                    }
                    self.progress.abandon();
                    return Err(PipelineError {
                        page: page_no,
                        total,
                        source,
                        partial: collection,
                    });
                }
            };

            if let Err(e) = self.store.save_page(page_no, &page) {
                error!(page = page_no, error = %e, "Failed to save page");
            }

            self.enter(Stage::Extracting(page_no));
            let records = process_page(&self.extractor, &page.body);
            if records.is_empty() {
                warn!(page = page_no, url = %spec.url, "No case entries found");
            } else {
                info!(page = page_no, records = records.len(), "Extracted case entries");
            }
            collection.push_page(records);
            self.progress.inc(1);
        }

        self.enter(Stage::Aggregating);
        self.save_metadata(&collection);
        self.enter(Stage::Done);
        self.progress.finish_and_clear();

        if collection.is_empty() {
            warn!(pages = collection.pages(), "No case entries found on any page");
        }
        info!(
            pages = collection.pages(),
            records = collection.len(),
            undated = collection.undated(),
            "Run complete"
        );
        Ok(collection)
    }

    fn enter(&mut self, stage: Stage) {
        debug!(from = ?self.stage, to = ?stage, "Pipeline stage");
        self.stage = stage;
    }

    fn save_metadata(&mut self, collection: &MetadataCollection) {
        if let Err(e) = self.store.save_metadata(collection.records()) {
            error!(error = %e, "Failed to save case metadata");
        }
    }
}

/// Re-run extraction over pages saved by an earlier run, without any network access.
///
/// Files that cannot be read are logged and skipped.
pub fn rebuild_from_files(extractor: &Extractor, files: &[PathBuf]) -> MetadataCollection {
    let mut collection = MetadataCollection::default();
    for path in files {
        match fs::read_to_string(path) {
            Ok(body) => {
                let records = process_page(extractor, &body);
                info!(path = %path.display(), records = records.len(), "Re-extracted page");
                collection.push_page(records);
            }
            Err(e) => error!(path = %path.display(), error = %e, "Failed to read saved page"),
        }
    }
    collection
}
