use std::sync::LazyLock;

use regex::Regex;
use reqwest::{
    Client,
    header::{CONTENT_TYPE, HeaderMap},
    redirect::Policy,
};
use scraper::{Html, Selector};

use crate::{config::CheckerSettings, probe::ProbeError};

static SCRIPT_OR_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>")
        .expect("script/style pattern is valid")
});

/// Phrases that mark a page served with 200 as an error page
#[derive(Debug, Clone)]
pub struct ContentRules {
    title: Vec<Regex>,
    body: Vec<Regex>,
}

impl ContentRules {
    pub const DEFAULT_TITLE_PATTERNS: &[&str] = &[r"(?i)\b404\b", r"(?i)\bnot\s+found\b"];
    pub const DEFAULT_BODY_PATTERNS: &[&str] = &[
        r"(?i)\b(page|file|document|resource|url)\s+(you\s+requested\s+)?(was\s+)?not\s+found\b",
        r"(?i)\b(could|can)\s*not\s+be\s+found\b",
        r"(?i)\b404\s+(error|not\s+found)\b",
    ];

    pub fn new<S: AsRef<str>>(title: &[S], body: &[S]) -> Result<Self, regex::Error> {
        let compile = |patterns: &[S]| {
            patterns
                .iter()
                .map(|p| Regex::new(p.as_ref()))
                .collect::<Result<Vec<_>, _>>()
        };

        Ok(Self {
            title: compile(title)?,
            body: compile(body)?,
        })
    }

    /// Judge extracted page text; a page without title or body text is valid
    pub fn page_looks_valid(&self, html: &str) -> bool {
        let cleaned = SCRIPT_OR_STYLE.replace_all(html, " ");
        let document = Html::parse_document(&cleaned);

        let title = element_text(&document, "title");
        let body = element_text(&document, "body");
        if title.is_empty() && body.is_empty() {
            return true;
        }

        if self.title.iter().any(|re| re.is_match(&title)) {
            return false;
        }

        !self.body.iter().any(|re| re.is_match(&body))
    }
}

impl Default for ContentRules {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TITLE_PATTERNS, Self::DEFAULT_BODY_PATTERNS)
            .expect("default content patterns are valid")
    }
}

fn element_text(document: &Html, selector: &str) -> String {
    let Ok(selector) = Selector::parse(selector) else {
        return String::new();
    };

    let text: Vec<&str> = document
        .select(&selector)
        .flat_map(|el| el.text())
        .flat_map(str::split_whitespace)
        .collect();

    text.join(" ")
}

fn is_textual(headers: &HeaderMap) -> bool {
    match headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
        None => true,
        Some(content_type) => {
            let content_type = content_type.to_ascii_lowercase();
            content_type.starts_with("text/")
                || content_type.contains("html")
                || content_type.contains("xml")
        }
    }
}

/// Fetches a page and looks for soft-404 text, failing open on every error
pub struct ContentChecker {
    client: Client,
    rules: ContentRules,
    limit: usize,
}

impl ContentChecker {
    pub fn new(settings: &CheckerSettings) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .user_agent(&settings.user_agent)
            .timeout(settings.connect_timeout())
            .danger_accept_invalid_certs(!settings.verify_ssl)
            .redirect(Policy::limited(settings.max_redirects))
            .build()?;

        let rules = ContentRules::new(
            &settings.content_rules.title_patterns,
            &settings.content_rules.body_patterns,
        )?;

        Ok(Self {
            client,
            rules,
            limit: settings.content_limit_bytes,
        })
    }

    #[tracing::instrument(name = "probe::has_valid_content", skip(self))]
    pub async fn has_valid_content(&self, url: &str) -> bool {
        let mut response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(error = %e, "content fetch failed, assuming valid");
                return true;
            }
        };

        if !is_textual(response.headers()) {
            return true;
        }

        let mut body = Vec::new();
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    body.extend_from_slice(&chunk);
                    if body.len() >= self.limit {
                        body.truncate(self.limit);
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(error = %e, read = body.len(), "content read interrupted");
                    break;
                }
            }
        }

        let valid = self.rules.page_looks_valid(&String::from_utf8_lossy(&body));
        if !valid {
            tracing::debug!("page text looks like an error page");
        }
        valid
    }
}
