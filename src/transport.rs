use std::future::Future;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::multipart::Form;
use reqwest::{Method, StatusCode, Url};
use serde::{Deserialize, Serialize};

/// How a form body goes over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormEncoding {
    Multipart,
    UrlEncoded,
}

/// Ordered form fields; repeated keys (`court[]`) are allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormBody {
    pub encoding: FormEncoding,
    pub fields: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub form: Option<FormBody>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error(transparent)]
    Http(reqwest::Error),
}

impl TransportError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Http(err)
        }
    }
}

/// One HTTP exchange. Cookies are not handled here; the fetcher owns the session.
pub trait Transport {
    fn send(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, TransportError>> + Send;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(TransportError::Http)?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);

        if let Some(form) = request.form {
            builder = match form.encoding {
                FormEncoding::Multipart => {
                    // Field names such as `court[]` go out as-is, like a browser form.
                    let multipart = form
                        .fields
                        .into_iter()
                        .fold(Form::new().percent_encode_noop(), |acc, (name, value)| {
                            acc.text(name, value)
                        });
                    builder.multipart(multipart)
                }
                FormEncoding::UrlEncoded => builder.form(&form.fields),
            };
        }

        let response = builder.send().await.map_err(TransportError::from_reqwest)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(TransportError::from_reqwest)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(head_end) = text.find("\r\n\r\n") {
                let content_length = text[..head_end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= head_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Serve one canned response and hand back the raw request text.
    async fn serve_once(response: &'static str) -> (Url, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_request(&mut stream).await;
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
            request
        });
        let url = Url::parse(&format!("http://{}/search/", addr)).unwrap();
        (url, handle)
    }

    fn transport(timeout: Duration) -> ReqwestTransport {
        ReqwestTransport::new(timeout, "caselaw_scraper/test").unwrap()
    }

    #[tokio::test]
    async fn returns_status_headers_and_body() {
        let (url, server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nSet-Cookie: sid=42; Path=/\r\nContent-Length: 13\r\nConnection: close\r\n\r\n<p>hello</p>\n",
        )
        .await;

        let response = transport(Duration::from_secs(5))
            .send(HttpRequest {
                method: Method::GET,
                url,
                headers: HeaderMap::new(),
                form: None,
            })
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, "<p>hello</p>\n");
        assert_eq!(response.headers.get("set-cookie").unwrap(), "sid=42; Path=/");

        let raw = server.await.unwrap();
        assert!(raw.starts_with("GET /search/ HTTP/1.1"));
        assert!(raw.to_ascii_lowercase().contains("user-agent: caselaw_scraper/test"));
    }

    #[tokio::test]
    async fn error_status_is_not_a_transport_error() {
        let (url, server) = serve_once(
            "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;

        let response = transport(Duration::from_secs(5))
            .send(HttpRequest {
                method: Method::GET,
                url,
                headers: HeaderMap::new(),
                form: None,
            })
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn multipart_form_is_posted() {
        let (url, server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
        )
        .await;

        let form = FormBody {
            encoding: FormEncoding::Multipart,
            fields: vec![
                ("court[]".to_string(), "190000".to_string()),
                ("submit".to_string(), "Search".to_string()),
            ],
        };
        transport(Duration::from_secs(5))
            .send(HttpRequest {
                method: Method::POST,
                url,
                headers: HeaderMap::new(),
                form: Some(form),
            })
            .await
            .unwrap();

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /search/ HTTP/1.1"));
        assert!(raw.to_ascii_lowercase().contains("content-type: multipart/form-data"));
        assert!(raw.contains("name=\"court[]\""));
        assert!(raw.contains("190000"));
        assert!(raw.contains("name=\"submit\""));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let err = transport(Duration::from_millis(200))
            .send(HttpRequest {
                method: Method::GET,
                url: Url::parse(&format!("http://{}/", addr)).unwrap(),
                headers: HeaderMap::new(),
                form: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Timeout));
    }
}
