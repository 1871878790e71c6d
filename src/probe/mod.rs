//! HTTP status probing and soft-404 detection.
//!
//! The status probe speaks just enough HTTP/1.1 to read a status line and headers over a
//! plain or TLS socket. The content check performs a real, size-capped GET.

mod content;
mod head;
mod tls;

use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use serde::Serialize;
use thiserror::Error;
use tokio::{net::TcpStream, time::timeout};
use tokio_rustls::TlsConnector;

use crate::{config::CheckerSettings, domain::CheckUrl};

pub use content::{ContentChecker, ContentRules};
use head::ResponseHead;

/// Status code standing for "no HTTP answer": unparsable URL, unsupported scheme or
/// connection failure
pub const NOT_CHECKED: u16 = 0;
pub const HTTP_OK: u16 = 200;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ProbeResult {
    pub status_code: u16,
    pub reason_phrase: String,
    pub final_url: String,
    pub final_status_code: u16,
    pub final_reason_phrase: String,
    /// Any response in the redirect chain set a cookie
    pub uses_cookies: bool,
}

impl ProbeResult {
    pub fn not_checked(url: &str) -> Self {
        Self {
            final_url: url.to_string(),
            ..Default::default()
        }
    }

    pub fn was_checked(&self) -> bool {
        self.status_code != NOT_CHECKED
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status_code)
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("TLS setup failed: {0}")]
    Tls(#[from] rustls::Error),
    #[error("HTTP client setup failed: {0}")]
    Client(#[from] reqwest::Error),
    #[error("invalid content pattern: {0}")]
    Pattern(#[from] regex::Error),
}

#[async_trait]
pub trait Prober: Send + Sync {
    /// Status of a URL and of the end of its redirect chain
    async fn probe(&self, url: &str) -> ProbeResult;

    /// Whether the page at `url` is something other than an error page served with 200
    async fn has_valid_content(&self, url: &str) -> bool;
}

pub struct HttpProber {
    connector: TlsConnector,
    user_agent: String,
    connect_timeout: Duration,
    max_redirects: usize,
    content: ContentChecker,
}

impl HttpProber {
    pub fn new(settings: &CheckerSettings) -> Result<Self, ProbeError> {
        Ok(Self {
            connector: tls::connector(settings.verify_ssl)?,
            user_agent: settings.user_agent.clone(),
            connect_timeout: settings.connect_timeout(),
            max_redirects: settings.max_redirects,
            content: ContentChecker::new(settings)?,
        })
    }

    /// One request/response exchange; `None` when no HTTP answer was obtained
    async fn fetch_head(&self, url: &CheckUrl) -> Option<ResponseHead> {
        let request = head::build_request(url, &self.user_agent);
        let host = url.host().trim_start_matches('[').trim_end_matches(']');

        let stream = match timeout(self.connect_timeout, TcpStream::connect((host, url.port()))).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                tracing::debug!(url = %url.as_str(), error = %e, "connection failed");
                return None;
            }
            Err(_) => {
                tracing::debug!(url = %url.as_str(), "connection timed out");
                return None;
            }
        };

        let raw = if url.is_https() {
            let server_name = ServerName::try_from(host.to_string()).ok()?;
            let tls = match timeout(self.connect_timeout, self.connector.connect(server_name, stream))
                .await
            {
                Ok(Ok(tls)) => tls,
                Ok(Err(e)) => {
                    tracing::debug!(url = %url.as_str(), error = %e, "TLS handshake failed");
                    return None;
                }
                Err(_) => {
                    tracing::debug!(url = %url.as_str(), "TLS handshake timed out");
                    return None;
                }
            };
            timeout(self.connect_timeout, head::exchange(tls, &request)).await
        } else {
            timeout(self.connect_timeout, head::exchange(stream, &request)).await
        };

        match raw {
            Ok(Ok(raw)) => head::parse_response_head(&raw),
            Ok(Err(e)) => {
                tracing::debug!(url = %url.as_str(), error = %e, "reading response failed");
                None
            }
            Err(_) => {
                tracing::debug!(url = %url.as_str(), "response timed out");
                None
            }
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    #[tracing::instrument(name = "probe::probe", skip(self))]
    async fn probe(&self, url: &str) -> ProbeResult {
        let Ok(mut current) = CheckUrl::parse(url) else {
            return ProbeResult::not_checked(url);
        };

        let Some(first) = self.fetch_head(&current).await else {
            return ProbeResult::not_checked(url);
        };

        let mut result = ProbeResult {
            status_code: first.status_code,
            reason_phrase: first.reason_phrase.clone(),
            final_url: url.to_string(),
            final_status_code: first.status_code,
            final_reason_phrase: first.reason_phrase,
            uses_cookies: first.sets_cookie,
        };

        let mut location = first.location;
        let mut hops = 0;
        while let Some(target) = location.take() {
            if hops == self.max_redirects {
                tracing::debug!(hops, "redirect limit reached");
                break;
            }
            let Ok(next) = current.join(&target) else {
                tracing::debug!(location = %target, "unfollowable redirect target");
                break;
            };
            hops += 1;
            current = next;
            result.final_url = current.as_str().to_string();

            match self.fetch_head(&current).await {
                Some(head) => {
                    result.final_status_code = head.status_code;
                    result.final_reason_phrase = head.reason_phrase;
                    result.uses_cookies |= head.sets_cookie;
                    location = head.location;
                }
                None => {
                    result.final_status_code = NOT_CHECKED;
                    result.final_reason_phrase = String::new();
                }
            }
        }

        result
    }

    async fn has_valid_content(&self, url: &str) -> bool {
        self.content.has_valid_content(url).await
    }
}
