use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, HeaderValue, SET_COOKIE};
use reqwest::Url;

/// Cookie state shared by every request of one run.
///
/// Created once before the first fetch and dropped with the run. The fetcher
/// is the only writer: it records `Set-Cookie` headers after each response and
/// reads the jar back when a request asks for the session.
#[derive(Debug, Default)]
pub struct Session {
    jar: Jar,
    stored: usize,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every `Set-Cookie` header of a response received from `url`.
    pub fn absorb(&mut self, url: &Url, headers: &HeaderMap) {
        let count = headers.get_all(SET_COOKIE).iter().count();
        if count == 0 {
            return;
        }
        self.jar.set_cookies(&mut headers.get_all(SET_COOKIE).iter(), url);
        self.stored += count;
    }

    /// `Cookie` header value to attach to a request for `url`, if any cookie matches.
    pub fn cookie_header(&self, url: &Url) -> Option<HeaderValue> {
        self.jar.cookies(url)
    }

    /// Number of `Set-Cookie` headers absorbed so far.
    pub fn cookies_seen(&self) -> usize {
        self.stored
    }
}
