#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use time::{OffsetDateTime, macros::datetime};

use url_checker::{
    checker::UrlChecker,
    clock::ManualClock,
    config::CheckerSettings,
    domain::{CheckableUrl, FieldKind, FieldValue, UrlHistoryEntry},
    probe::{ProbeResult, Prober},
    store::MemoryStore,
};

pub const NOW: OffsetDateTime = datetime!(2026-03-02 12:00 UTC);

/// Prober answering from a script; unknown URLs are healthy
#[derive(Default)]
pub struct FakeProber {
    results: Mutex<HashMap<String, ProbeResult>>,
    error_pages: Mutex<HashSet<String>>,
    probed: Mutex<Vec<String>>,
    /// Simulated time spent per probe
    pub latency: Duration,
}

impl FakeProber {
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Default::default()
        }
    }

    pub fn set(&self, url: &str, result: ProbeResult) {
        self.results.lock().unwrap().insert(url.to_string(), result);
    }

    pub fn respond(&self, url: &str, status_code: u16) {
        self.set(url, status(url, status_code));
    }

    pub fn error_page(&self, url: &str) {
        self.error_pages.lock().unwrap().insert(url.to_string());
    }

    pub fn probed(&self) -> Vec<String> {
        self.probed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Prober for FakeProber {
    async fn probe(&self, url: &str) -> ProbeResult {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.probed.lock().unwrap().push(url.to_string());

        self.results
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| status(url, 200))
    }

    async fn has_valid_content(&self, url: &str) -> bool {
        !self.error_pages.lock().unwrap().contains(url)
    }
}

/// A probe result without redirects
pub fn status(url: &str, status_code: u16) -> ProbeResult {
    ProbeResult {
        status_code,
        reason_phrase: format!("status {status_code}"),
        final_url: url.to_string(),
        final_status_code: status_code,
        final_reason_phrase: format!("status {status_code}"),
        uses_cookies: false,
    }
}

pub fn redirect(status_code: u16, final_url: &str, final_status_code: u16) -> ProbeResult {
    ProbeResult {
        status_code,
        reason_phrase: "Moved".into(),
        final_url: final_url.to_string(),
        final_status_code,
        final_reason_phrase: format!("status {final_status_code}"),
        uses_cookies: false,
    }
}

pub fn url_field(field_id: i64, url: &str) -> FieldValue {
    FieldValue::new(field_id, FieldKind::Url, url)
}

pub fn rich_text_field(field_id: i64, html: &str) -> FieldValue {
    FieldValue::new(field_id, FieldKind::RichText, html)
}

pub fn failing_entry(
    key: CheckableUrl,
    times_invalid: i32,
    check_date: OffsetDateTime,
) -> UrlHistoryEntry {
    UrlHistoryEntry {
        final_url: key.url.clone(),
        key,
        times_invalid,
        hidden: false,
        check_date,
        check_duration_ms: 25,
        status_code: 404,
        reason_phrase: "Not Found".into(),
        final_status_code: 404,
        final_reason_phrase: "Not Found".into(),
        is_final_url_invalid: false,
    }
}

pub fn settings() -> CheckerSettings {
    CheckerSettings {
        batch_size: 10,
        per_domain_cap: 3,
        ..Default::default()
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub prober: Arc<FakeProber>,
    pub clock: Arc<ManualClock>,
    pub checker: Arc<UrlChecker>,
}

impl Harness {
    pub fn new(settings: CheckerSettings) -> Self {
        Self::with_prober(settings, FakeProber::default())
    }

    pub fn with_prober(settings: CheckerSettings, prober: FakeProber) -> Self {
        let store = Arc::new(MemoryStore::new());
        let prober = Arc::new(prober);
        let clock = Arc::new(ManualClock::new(NOW));
        let checker = Arc::new(UrlChecker::new(
            store.clone(),
            store.clone(),
            prober.clone(),
            clock.clone(),
            settings,
        ));

        Self {
            store,
            prober,
            clock,
            checker,
        }
    }

    /// Run queued checks until the queue is empty
    pub async fn drain(&self) -> usize {
        let mut ran = 0;
        while self.checker.run_next().await.unwrap() {
            ran += 1;
        }
        ran
    }
}
