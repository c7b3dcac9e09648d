use std::collections::BTreeMap;

use scraper::{ElementRef, Html, Selector};

pub const DEFAULT_CONTAINER: &str = "div.post";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    CaseTitle,
    CaseNumber,
    DateDelivered,
    Judge,
    Court,
    Parties,
    Advocates,
    Citation,
}

/// Where a field lives inside one case container.
#[derive(Debug, Clone, Copy)]
pub enum Lookup {
    /// Text of the first `h2`.
    Heading,
    /// First element carrying `class`, with `label` removed.
    ClassText { class: &'static str, label: &'static str },
    /// First `.bg` block whose text contains `label`.
    LabelledBlock(&'static str),
    /// First `p` whose text contains `label`.
    LabelledParagraph(&'static str),
}

pub const RULES: &[(Field, Lookup)] = &[
    (Field::CaseTitle, Lookup::Heading),
    (Field::CaseNumber, Lookup::ClassText { class: "case-number", label: "Case Number:" }),
    (Field::DateDelivered, Lookup::ClassText { class: "date-delivered", label: "Date Delivered:" }),
    (Field::Judge, Lookup::LabelledBlock("Judge:")),
    (Field::Court, Lookup::LabelledBlock("Court:")),
    (Field::Parties, Lookup::LabelledBlock("Parties:")),
    (Field::Advocates, Lookup::LabelledBlock("Advocates:")),
    (Field::Citation, Lookup::LabelledParagraph("Citation:")),
];

/// Unnormalized text per field for one case container. Missing fields read as "".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFieldSet(BTreeMap<Field, String>);

impl RawFieldSet {
    pub fn get(&self, field: Field) -> &str {
        self.0.get(&field).map(String::as_str).unwrap_or("")
    }

    pub fn set(&mut self, field: Field, value: impl Into<String>) {
        self.0.insert(field, value.into());
    }

    pub fn is_blank(&self) -> bool {
        self.0.values().all(|v| v.trim().is_empty())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid selector `{selector}`: {reason}")]
pub struct SelectorError {
    selector: String,
    reason: String,
}

fn parse_selector(css: &str) -> Result<Selector, SelectorError> {
    Selector::parse(css).map_err(|e| SelectorError {
        selector: css.to_string(),
        reason: e.to_string(),
    })
}

/// A [`Lookup`] with its selector parsed once.
struct Matcher {
    field: Field,
    selector: Selector,
    label: Option<&'static str>,
    /// Skip candidates whose text lacks the label instead of taking the first one.
    label_required: bool,
}

impl Matcher {
    fn compile(field: Field, lookup: Lookup) -> Result<Self, SelectorError> {
        let (css, label, label_required) = match lookup {
            Lookup::Heading => ("h2".to_string(), None, false),
            Lookup::ClassText { class, label } => (format!(".{}", class), Some(label), false),
            Lookup::LabelledBlock(label) => (".bg".to_string(), Some(label), true),
            Lookup::LabelledParagraph(label) => ("p".to_string(), Some(label), true),
        };
        Ok(Self {
            field,
            selector: parse_selector(&css)?,
            label,
            label_required,
        })
    }

    /// Best-effort text of the field; "" when nothing matches.
    fn find(&self, container: ElementRef) -> String {
        let mut candidates = container.select(&self.selector).map(elem_text);
        let text = match self.label {
            Some(label) if self.label_required => candidates.find(|t| t.contains(label)),
            _ => candidates.next(),
        };
        match (text, self.label) {
            (Some(text), Some(label)) => text.replacen(label, "", 1),
            (Some(text), None) => text,
            (None, _) => String::new(),
        }
    }
}

pub struct Extractor {
    container: Selector,
    matchers: Vec<Matcher>,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(DEFAULT_CONTAINER).expect("built-in selectors are valid")
    }
}

impl Extractor {
    pub fn new(container: &str) -> Result<Self, SelectorError> {
        let matchers = RULES
            .iter()
            .map(|&(field, lookup)| Matcher::compile(field, lookup))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            container: parse_selector(container)?,
            matchers,
        })
    }

    /// One field set per case container, in document order.
    ///
    /// Never fails: HTML that yields no containers gives an empty vec, and a
    /// container with none of the fields still yields an all-empty set.
    pub fn extract(&self, page_body: &str) -> Vec<RawFieldSet> {
        let document = Html::parse_document(page_body);
        document
            .select(&self.container)
            .map(|container| {
                let mut fields = RawFieldSet::default();
                for matcher in &self.matchers {
                    fields.set(matcher.field, matcher.find(container));
                }
                fields
            })
            .collect()
    }
}

fn elem_text(element: ElementRef) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
