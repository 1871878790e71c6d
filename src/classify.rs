//! Merges a probe outcome into the failure history of a URL.

use std::time::Duration;

use time::OffsetDateTime;
use url::Url;

use crate::{
    domain::{CheckableUrl, UrlHistoryEntry},
    probe::{HTTP_OK, ProbeResult},
};

/// Everything known about one check of one URL
#[derive(Debug, Clone)]
pub struct Observation<'a> {
    pub key: &'a CheckableUrl,
    pub probe: &'a ProbeResult,
    /// Content verdict for the URL itself, true unless it answered 200 with an error page
    pub url_content_valid: bool,
    /// Content verdict for the final URL, true unless it answered 200 with an error page
    pub final_content_valid: bool,
    pub checked_at: OffsetDateTime,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// The URL works; any stored history is deleted
    Healthy,
    /// The URL fails; the stored history is replaced by this entry
    Failing(UrlHistoryEntry),
}

impl Verdict {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Verdict::Healthy)
    }
}

/// A redirect that only switches between http and https or adds or drops `www.`
///
/// Hosts compare case-insensitively; port, path and query must match exactly.
pub fn is_benign_redirect(url: &str, final_url: &str) -> bool {
    let (Ok(from), Ok(to)) = (Url::parse(url.trim()), Url::parse(final_url.trim())) else {
        return false;
    };

    let is_web = |u: &Url| matches!(u.scheme(), "http" | "https");
    // the url crate lowercases hosts of http(s) URLs
    let bare_host = |u: &Url| {
        u.host_str()
            .map(|host| host.strip_prefix("www.").unwrap_or(host).to_string())
    };

    is_web(&from)
        && is_web(&to)
        && bare_host(&from).is_some()
        && bare_host(&from) == bare_host(&to)
        && from.port() == to.port()
        && from.path() == to.path()
        && from.query() == to.query()
}

fn same_host(a: &str, b: &str) -> bool {
    match (Url::parse(a), Url::parse(b)) {
        (Ok(a), Ok(b)) => a.host_str().is_some() && a.host_str() == b.host_str(),
        _ => false,
    }
}

pub fn classify(existing: Option<&UrlHistoryEntry>, obs: &Observation<'_>) -> Verdict {
    let probe = obs.probe;

    if !probe.was_checked() || probe.status_code == HTTP_OK && obs.url_content_valid {
        return Verdict::Healthy;
    }

    if probe.is_redirect()
        && probe.final_status_code == HTTP_OK
        && is_benign_redirect(&obs.key.url, &probe.final_url)
    {
        return Verdict::Healthy;
    }

    let (times_invalid, hidden) = match existing {
        Some(prev)
            if prev.status_code == probe.status_code
                && prev.final_status_code == probe.final_status_code
                && (prev.final_url == probe.final_url
                    || probe.uses_cookies && same_host(&prev.final_url, &probe.final_url)) =>
        {
            (prev.times_invalid.saturating_add(1).max(1), prev.hidden)
        }
        _ => (1, false),
    };

    Verdict::Failing(UrlHistoryEntry {
        key: obs.key.clone(),
        times_invalid,
        hidden,
        check_date: obs.checked_at,
        check_duration_ms: i64::try_from(obs.duration.as_millis()).unwrap_or(i64::MAX),
        status_code: probe.status_code,
        reason_phrase: probe.reason_phrase.clone(),
        final_url: probe.final_url.clone(),
        final_status_code: probe.final_status_code,
        final_reason_phrase: probe.final_reason_phrase.clone(),
        is_final_url_invalid: probe.final_status_code == HTTP_OK && !obs.final_content_valid,
    })
}

#[cfg(test)]
mod test {
    use time::macros::datetime;

    use super::*;

    const URL: &str = "http://example.com/x";

    fn key() -> CheckableUrl {
        CheckableUrl::new(7, 3, URL)
    }

    fn probe(status: u16, final_status: u16, final_url: &str) -> ProbeResult {
        ProbeResult {
            status_code: status,
            reason_phrase: format!("status {status}"),
            final_url: final_url.to_string(),
            final_status_code: final_status,
            final_reason_phrase: format!("status {final_status}"),
            uses_cookies: false,
        }
    }

    fn run(existing: Option<&UrlHistoryEntry>, probe: &ProbeResult) -> Verdict {
        let key = key();
        classify(
            existing,
            &Observation {
                key: &key,
                probe,
                url_content_valid: true,
                final_content_valid: true,
                checked_at: datetime!(2026-02-01 10:00 UTC),
                duration: Duration::from_millis(120),
            },
        )
    }

    fn failing(verdict: Verdict) -> UrlHistoryEntry {
        match verdict {
            Verdict::Failing(entry) => entry,
            Verdict::Healthy => panic!("expected a failing verdict"),
        }
    }

    #[test]
    fn repeated_failure_increments() {
        let result = probe(404, 404, URL);

        let first = failing(run(None, &result));
        assert_eq!(first.times_invalid, 1);
        assert!(!first.hidden);

        let mut hidden = first.clone();
        hidden.hidden = true;

        let second = failing(run(Some(&hidden), &result));
        assert_eq!(second.times_invalid, 2);
        assert!(second.hidden);

        let third = failing(run(Some(&second), &result));
        assert_eq!(third.times_invalid, 3);
        assert!(third.hidden);
        assert_eq!(third.check_duration_ms, 120);
        assert_eq!(third.check_date, datetime!(2026-02-01 10:00 UTC));
    }

    #[test]
    fn changed_final_url_resets() {
        let mut prev = failing(run(None, &probe(302, 404, "http://example.com/a")));
        prev.times_invalid = 5;
        prev.hidden = true;

        let entry = failing(run(Some(&prev), &probe(302, 404, "http://example.com/b")));
        assert_eq!(entry.times_invalid, 1);
        assert!(!entry.hidden);
    }

    #[test]
    fn changed_status_resets() {
        let mut prev = failing(run(None, &probe(500, 500, URL)));
        prev.times_invalid = 3;

        let entry = failing(run(Some(&prev), &probe(503, 503, URL)));
        assert_eq!(entry.times_invalid, 1);
    }

    #[test]
    fn cookie_servers_may_vary_final_url_on_same_host() {
        let mut prev = failing(run(None, &probe(302, 404, "https://example.com/login?s=1")));
        prev.times_invalid = 2;
        prev.hidden = true;

        let mut result = probe(302, 404, "https://example.com/login?s=2");
        result.uses_cookies = true;
        let entry = failing(run(Some(&prev), &result));
        assert_eq!(entry.times_invalid, 3);
        assert!(entry.hidden);

        let mut moved = probe(302, 404, "https://other.example.com/login");
        moved.uses_cookies = true;
        let entry = failing(run(Some(&prev), &moved));
        assert_eq!(entry.times_invalid, 1);
        assert!(!entry.hidden);
    }

    #[test]
    fn healthy_and_unchecked_results() {
        let prev = failing(run(None, &probe(404, 404, URL)));

        assert_eq!(run(Some(&prev), &probe(200, 200, URL)), Verdict::Healthy);
        assert_eq!(
            run(Some(&prev), &ProbeResult::not_checked(URL)),
            Verdict::Healthy
        );
    }

    #[test]
    fn soft_404_is_failing() {
        let key = key();
        let result = probe(200, 200, URL);
        let verdict = classify(
            None,
            &Observation {
                key: &key,
                probe: &result,
                url_content_valid: false,
                final_content_valid: false,
                checked_at: datetime!(2026-02-01 10:00 UTC),
                duration: Duration::ZERO,
            },
        );

        let entry = failing(verdict);
        assert_eq!(entry.times_invalid, 1);
        assert!(entry.is_final_url_invalid);
    }

    #[test]
    fn redirect_to_error_page_flags_final_url() {
        let key = key();
        let result = probe(301, 200, "http://example.com/moved-elsewhere");
        let verdict = classify(
            None,
            &Observation {
                key: &key,
                probe: &result,
                url_content_valid: true,
                final_content_valid: false,
                checked_at: datetime!(2026-02-01 10:00 UTC),
                duration: Duration::ZERO,
            },
        );

        assert!(failing(verdict).is_final_url_invalid);
    }

    #[test]
    fn benign_redirects_are_healthy() {
        assert_eq!(
            run(None, &probe(301, 200, "https://www.example.com/x")),
            Verdict::Healthy
        );
        assert_eq!(
            run(None, &probe(302, 200, "https://example.com/x")),
            Verdict::Healthy
        );

        // benign shape but the target fails
        assert!(!run(None, &probe(301, 404, "https://www.example.com/x")).is_healthy());
        // target is a different page
        assert!(!run(None, &probe(301, 200, "https://www.example.com/y")).is_healthy());
    }

    #[test]
    fn benign_redirect_shapes() {
        let benign = [
            ("http://example.com/x", "https://example.com/x"),
            ("https://www.example.com/x", "http://example.com/x"),
            ("http://example.com", "https://www.example.com/"),
            ("HTTP://Example.com/x", "https://www.example.com/x"),
            ("http://example.com/a?b=C", "https://WWW.example.com/a?b=C"),
        ];
        for (from, to) in benign {
            assert!(is_benign_redirect(from, to), "{from} -> {to}");
        }

        let other = [
            ("http://example.com/x", "https://example.org/x"),
            ("http://example.com/x", "https://example.com/x/login"),
            ("http://example.com/?a=1", "https://example.com/?a=2"),
            ("http://shop.example.com/", "https://example.com/"),
            ("http://example.com/Report.PDF", "https://www.example.com/report.pdf"),
            ("http://example.com/docs", "https://example.com/docs/"),
            ("http://example.com/?q=Rust", "https://example.com/?q=rust"),
            ("http://example.com:8080/x", "https://example.com/x"),
            ("ftp://example.com/x", "https://example.com/x"),
        ];
        for (from, to) in other {
            assert!(!is_benign_redirect(from, to), "{from} -> {to}");
        }
    }
}
