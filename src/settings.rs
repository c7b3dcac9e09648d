use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, REFERER};
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};

use crate::fetcher::PageRequestSpec;
use crate::parser::extract::DEFAULT_CONTAINER;
use crate::transport::{FormBody, FormEncoding};

const ENV_PREFIX: &str = "CASELAW";

/// Run settings: built-in defaults, then an optional file, then `CASELAW_*`
/// environment variables (`__` separates nested keys). CLI flags go on top in `main`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Search endpoint; page 1 is a POST here.
    pub base_url: String,
    pub page_count: usize,
    /// Offset step between pagination URLs (`{base_url}page/{offset}/`).
    pub results_per_page: usize,
    pub search: SearchForm,
    pub search_headers: BTreeMap<String, String>,
    pub page_headers: BTreeMap<String, String>,
    /// Send each pagination request with `Referer` set to the previous page.
    pub chain_referer: bool,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub output_dir: PathBuf,
    pub container_selector: String,
}

/// Advanced-search form filters, submitted once with the first page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchForm {
    pub content: String,
    pub subject: String,
    pub case_number: String,
    pub parties: String,
    pub courts: Vec<String>,
    pub date_from: String,
    pub date_to: String,
    pub submit: String,
    pub encoding: FormEncoding,
}

impl Default for SearchForm {
    fn default() -> Self {
        Self {
            content: String::new(),
            subject: String::new(),
            case_number: String::new(),
            parties: String::new(),
            courts: vec!["190000".to_string()],
            date_from: "01 Jan 2022".to_string(),
            date_to: "31 Jan 2022".to_string(),
            submit: "Search".to_string(),
            encoding: FormEncoding::Multipart,
        }
    }
}

impl SearchForm {
    /// Form fields in submission order; one `court[]` entry per court.
    pub fn to_form(&self) -> FormBody {
        let mut fields = vec![
            ("content".to_string(), self.content.clone()),
            ("subject".to_string(), self.subject.clone()),
            ("case_number".to_string(), self.case_number.clone()),
            ("parties".to_string(), self.parties.clone()),
        ];
        fields.extend(self.courts.iter().map(|c| ("court[]".to_string(), c.clone())));
        fields.push(("date_from".to_string(), self.date_from.clone()));
        fields.push(("date_to".to_string(), self.date_to.clone()));
        fields.push(("submit".to_string(), self.submit.clone()));
        FormBody {
            encoding: self.encoding,
            fields,
        }
    }
}

fn headers(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "http://kenyalaw.org/caselaw/cases/advanced_search/".to_string(),
            page_count: 5,
            results_per_page: 10,
            search: SearchForm::default(),
            search_headers: headers(&[
                ("Cache-Control", "no-cache"),
                ("Origin", "http://kenyalaw.org"),
                ("Pragma", "no-cache"),
                (
                    "Referer",
                    "http://kenyalaw.org/caselaw/cases/advanced_search_courts?court=190000",
                ),
                ("Upgrade-Insecure-Requests", "1"),
            ]),
            page_headers: headers(&[
                ("Cache-Control", "no-cache"),
                ("Pragma", "no-cache"),
                ("Upgrade-Insecure-Requests", "1"),
            ]),
            chain_referer: true,
            user_agent: concat!("caselaw_scraper/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: 30,
            output_dir: PathBuf::from("."),
            container_selector: DEFAULT_CONTAINER.to_string(),
        }
    }
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    fn load_with_prefix(path: Option<&Path>, env_prefix: &str) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder
            .build()
            .context("Failed to load settings")?
            .try_deserialize()
            .context("Invalid settings")?;
        Ok(settings)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// URL of page `page` (1-based). Page 1 is the search endpoint itself.
    pub fn page_url(&self, page: usize) -> Result<Url> {
        let mut base = self.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base).with_context(|| format!("Invalid base_url `{}`", self.base_url))?;
        if page <= 1 {
            return Ok(base);
        }
        let offset = (page - 1) * self.results_per_page;
        base.join(&format!("page/{}/", offset))
            .with_context(|| format!("Invalid pagination URL for page {}", page))
    }

    /// The ordered request list: a POST search that opens the session, then
    /// GETs against the pagination URLs that reuse it.
    pub fn page_specs(&self) -> Result<Vec<PageRequestSpec>> {
        if self.page_count == 0 {
            bail!("page_count must be at least 1");
        }

        let mut specs: Vec<PageRequestSpec> = Vec::with_capacity(self.page_count);
        for page in 1..=self.page_count {
            let url = self.page_url(page)?;
            let spec = if page == 1 {
                PageRequestSpec {
                    url,
                    method: Method::POST,
                    headers: header_map(&self.search_headers)?,
                    form: Some(self.search.to_form()),
                    requires_session: false,
                }
            } else {
                let mut headers = header_map(&self.page_headers)?;
                if self.chain_referer {
                    if let Some(previous) = specs.last() {
                        let referer = HeaderValue::from_str(previous.url.as_str())
                            .context("Previous page URL is not a valid Referer")?;
                        headers.insert(REFERER, referer);
                    }
                }
                PageRequestSpec {
                    url,
                    method: Method::GET,
                    headers,
                    form: None,
                    requires_session: true,
                }
            };
            specs.push(spec);
        }
        Ok(specs)
    }
}

fn header_map(pairs: &BTreeMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(pairs.len());
    for (name, value) in pairs {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("Invalid header name `{}`", name))?;
        let value = HeaderValue::from_str(value)
            .with_context(|| format!("Invalid value for header `{}`", name.as_str()))?;
        map.insert(name, value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_specs_match_search_then_pagination() {
        let specs = Settings::default().page_specs().unwrap();
        let urls: Vec<&str> = specs.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(
            urls,
            [
                "http://kenyalaw.org/caselaw/cases/advanced_search/",
                "http://kenyalaw.org/caselaw/cases/advanced_search/page/10/",
                "http://kenyalaw.org/caselaw/cases/advanced_search/page/20/",
                "http://kenyalaw.org/caselaw/cases/advanced_search/page/30/",
                "http://kenyalaw.org/caselaw/cases/advanced_search/page/40/",
            ]
        );

        assert_eq!(specs[0].method, Method::POST);
        assert!(!specs[0].requires_session);
        assert!(specs[0].form.is_some());
        assert_eq!(
            specs[0].headers.get(REFERER).unwrap(),
            "http://kenyalaw.org/caselaw/cases/advanced_search_courts?court=190000"
        );

        for pair in specs.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            assert_eq!(next.method, Method::GET);
            assert!(next.requires_session);
            assert!(next.form.is_none());
            assert_eq!(next.headers.get(REFERER).unwrap(), prev.url.as_str());
            assert_eq!(next.headers.get("pragma").unwrap(), "no-cache");
        }
    }

    #[test]
    fn search_form_field_order() {
        let mut search = SearchForm::default();
        search.courts = vec!["190000".into(), "200000".into()];
        let names: Vec<String> = search.to_form().fields.into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            names,
            ["content", "subject", "case_number", "parties", "court[]", "court[]", "date_from", "date_to", "submit"]
        );
    }

    #[test]
    fn form_encoding_is_configurable() {
        assert_eq!(SearchForm::default().to_form().encoding, FormEncoding::Multipart);

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "[search]\nencoding = \"url_encoded\"\n").unwrap();
        let settings = Settings::load_with_prefix(Some(file.path()), "CASELAW_TEST_ENCODING").unwrap();
        assert_eq!(settings.search.to_form().encoding, FormEncoding::UrlEncoded);
    }

    #[test]
    fn referer_chaining_can_be_disabled() {
        let settings = Settings {
            chain_referer: false,
            page_count: 2,
            ..Settings::default()
        };
        let specs = settings.page_specs().unwrap();
        assert!(specs[1].headers.get(REFERER).is_none());
    }

    #[test]
    fn base_url_without_trailing_slash() {
        let settings = Settings {
            base_url: "http://example.test/search".into(),
            results_per_page: 25,
            ..Settings::default()
        };
        assert_eq!(settings.page_url(3).unwrap().as_str(), "http://example.test/search/page/50/");
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let zero = Settings {
            page_count: 0,
            ..Settings::default()
        };
        assert!(zero.page_specs().is_err());

        let bad_url = Settings {
            base_url: "not a url".into(),
            ..Settings::default()
        };
        assert!(bad_url.page_specs().is_err());

        let mut bad_header = Settings::default();
        bad_header.page_headers.insert("bad header".into(), "x".into());
        assert!(bad_header.page_specs().is_err());
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{ "page_count": 2, "timeout_secs": 5, "search": {{ "date_from": "01 Feb 2022" }} }}"#
        )
        .unwrap();

        let settings = Settings::load_with_prefix(Some(file.path()), "CASELAW_TEST_FILE").unwrap();
        assert_eq!(settings.page_count, 2);
        assert_eq!(settings.timeout(), Duration::from_secs(5));
        assert_eq!(settings.search.date_from, "01 Feb 2022");
        // Untouched nested fields keep their defaults.
        assert_eq!(settings.search.date_to, "31 Jan 2022");
        assert_eq!(settings.results_per_page, 10);
    }

    #[test]
    fn environment_overrides_defaults() {
        std::env::set_var("CASELAW_TEST_ENV_TIMEOUT_SECS", "7");
        std::env::set_var("CASELAW_TEST_ENV_SEARCH__DATE_TO", "28 Feb 2022");

        let settings = Settings::load_with_prefix(None, "CASELAW_TEST_ENV").unwrap();
        assert_eq!(settings.timeout_secs, 7);
        assert_eq!(settings.search.date_to, "28 Feb 2022");
        assert_eq!(settings.page_count, 5);
    }

    #[test]
    fn missing_file_is_an_error() {
        let missing = Path::new("/nonexistent/caselaw.toml");
        assert!(Settings::load_with_prefix(Some(missing), "CASELAW_TEST_MISSING").is_err());
    }
}
