pub mod extract;
pub mod normalize;

use tracing::debug;

use extract::Extractor;
use normalize::CaseRecord;

/// Two-pass pipeline for one page: HTML → raw field sets → case records.
pub fn process_page(extractor: &Extractor, page_body: &str) -> Vec<CaseRecord> {
    let raw = extractor.extract(page_body);
    let blank = raw.iter().filter(|r| r.is_blank()).count();
    if blank > 0 {
        debug!(blank, entries = raw.len(), "Keeping case entries with no recognised fields");
    }
    raw.iter().map(normalize::normalize).collect()
}
