use std::time::Instant;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, COOKIE};
use reqwest::{Method, StatusCode, Url};
use tracing::{debug, info, warn};

use crate::session::Session;
use crate::transport::{FormBody, HttpRequest, Transport, TransportError};

/// One page of the run, built from settings before any request is sent.
#[derive(Debug, Clone)]
pub struct PageRequestSpec {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub form: Option<FormBody>,
    /// Attach the session's cookies. The search submission creates the
    /// session; every pagination request must carry it.
    pub requires_session: bool,
}

#[derive(Debug, Clone)]
pub struct RawPage {
    pub spec: PageRequestSpec,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("status code error: {status} from {url}")]
    Status { url: Url, status: StatusCode },
    #[error("no response from {url} within the request timeout")]
    Timeout { url: Url },
    #[error("request to {url} failed: {source}")]
    Transport {
        url: Url,
        #[source]
        source: TransportError,
    },
}

impl FetchError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub struct Fetcher<T> {
    transport: T,
}

impl<T: Transport> Fetcher<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send one page request, updating `session` from the response.
    ///
    /// Any status outside 2xx is a [`FetchError::Status`]; the body is not
    /// inspected. Cookies are absorbed before the status check, so even a
    /// failing response updates the session.
    pub async fn fetch(
        &self,
        spec: &PageRequestSpec,
        session: &mut Session,
    ) -> Result<RawPage, FetchError> {
        let mut headers = spec.headers.clone();
        if spec.requires_session {
            match session.cookie_header(&spec.url) {
                Some(cookie) => {
                    headers.insert(COOKIE, cookie);
                }
                None => debug!(url = %spec.url, "No session cookies to attach"),
            }
        }

        let request = HttpRequest {
            method: spec.method.clone(),
            url: spec.url.clone(),
            headers,
            form: spec.form.clone(),
        };

        let start = Instant::now();
        let response = self
            .transport
            .send(request)
            .await
            .map_err(|err| match err {
                TransportError::Timeout => FetchError::Timeout {
                    url: spec.url.clone(),
                },
                other => FetchError::Transport {
                    url: spec.url.clone(),
                    source: other,
                },
            })?;
        let latency_ms = start.elapsed().as_millis() as u64;

        session.absorb(&spec.url, &response.headers);
        debug!(url = %spec.url, cookies = session.cookies_seen(), "Session updated");

        if !response.status.is_success() {
            warn!(url = %spec.url, status = %response.status, latency_ms, "Fetch failed");
            return Err(FetchError::Status {
                url: spec.url.clone(),
                status: response.status,
            });
        }

        info!(
            url = %spec.url,
            method = %spec.method,
            status = %response.status,
            bytes = response.body.len(),
            latency_ms,
            "Fetched page"
        );

        Ok(RawPage {
            spec: spec.clone(),
            body: response.body,
            fetched_at: Utc::now(),
        })
    }
}
