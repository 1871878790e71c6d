use std::collections::HashMap;

use super::CheckUrl;

/// Second-level labels under which country registries hand out names
///
/// An approximation of the public suffix list: hosts under shared suffixes such as
/// `github.io` all fall into one budget.
const SECOND_LEVEL_REGISTRIES: &[&str] = &["ac", "co", "com", "edu", "gov", "net", "org"];

/// Registered domain of a URL's host, used to group checks against one site
///
/// `www.news.example.co.uk` and `example.co.uk` share `example.co.uk`. IP hosts are
/// their own domain. Uncheckable URLs have none.
pub fn registered_domain(url: &str) -> Option<String> {
    let url = CheckUrl::parse(url).ok()?;
    let host = url.host().trim_end_matches('.').to_ascii_lowercase();

    if url.as_url().domain().is_none() {
        return Some(host);
    }

    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    let keep = match labels.as_slice() {
        [.., second, tld] if tld.len() == 2 && SECOND_LEVEL_REGISTRIES.contains(second) => 3,
        _ => 2,
    };

    let start = labels.len().saturating_sub(keep);
    Some(labels[start..].join("."))
}

/// Checks credited per domain during one scheduling pass
#[derive(Debug)]
pub struct DomainBudget {
    cap: usize,
    counts: HashMap<String, usize>,
}

impl DomainBudget {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            counts: HashMap::new(),
        }
    }

    /// Credit all URLs of one unit of work, or none of them
    ///
    /// The demand of a unit on one domain is clamped to the cap, so a unit with more
    /// URLs on a domain than the cap still fits while that domain is untouched.
    pub fn try_take<S: AsRef<str>>(&mut self, urls: &[S]) -> bool {
        let mut demand: HashMap<String, usize> = HashMap::new();
        for domain in urls.iter().filter_map(|u| registered_domain(u.as_ref())) {
            *demand.entry(domain).or_default() += 1;
        }

        let fits = demand.iter().all(|(domain, &wanted)| {
            let used = self.counts.get(domain).copied().unwrap_or(0);
            used + wanted.min(self.cap) <= self.cap
        });
        if !fits {
            return false;
        }

        for (domain, wanted) in demand {
            *self.counts.entry(domain).or_default() += wanted.min(self.cap);
        }
        true
    }

    pub fn used(&self, domain: &str) -> usize {
        self.counts.get(domain).copied().unwrap_or(0)
    }
}
