// src/matcher.rs
//! Label-boundary domain matching and the frozen watch-list.

/// Check whether an observed certificate domain falls under a watched domain.
///
/// Matches the watched domain itself or any subdomain of it, comparing ASCII
/// case-insensitively. The suffix must start on a label boundary, so
/// `mynhn.no` does not match `nhn.no` while `www.nhn.no` does.
pub fn is_domain_match(observed: &str, watched: &str) -> bool {
    if observed.is_empty() || watched.is_empty() {
        return false;
    }

    if observed.len() == watched.len() {
        return observed.eq_ignore_ascii_case(watched);
    }

    // Need at least one character of label plus the separating dot
    if observed.len() < watched.len() + 2 {
        return false;
    }

    let bytes = observed.as_bytes();
    let split = bytes.len() - watched.len();
    bytes[split - 1] == b'.' && bytes[split..].eq_ignore_ascii_case(watched.as_bytes())
}

/// Immutable set of watched domains, fixed once the pipeline starts.
///
/// Entries are trimmed, lower-cased and de-duplicated; configuration order is
/// preserved because match sets are reported in watch-list order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchList {
    domains: Vec<String>,
}

impl WatchList {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for domain in domains {
            let domain = domain.as_ref().trim().to_ascii_lowercase();
            if domain.is_empty() || normalized.contains(&domain) {
                continue;
            }
            normalized.push(domain);
        }

        Self { domains: normalized }
    }

    /// An empty watch-list means "deliver every certificate".
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    /// First watched term covering `leaf`, if any
    pub fn term_for(&self, leaf: &str) -> Option<&str> {
        self.domains
            .iter()
            .find(|watched| is_domain_match(leaf, watched))
            .map(String::as_str)
    }

    /// True if any leaf domain is covered by any watched term.
    pub fn matches_any<S: AsRef<str>>(&self, leaves: &[S]) -> bool {
        leaves.iter().any(|leaf| self.term_for(leaf.as_ref()).is_some())
    }

    /// Every watched term that covers at least one leaf, in watch-list order.
    pub fn matched_terms<S: AsRef<str>>(&self, leaves: &[S]) -> Vec<String> {
        self.domains
            .iter()
            .filter(|watched| {
                leaves
                    .iter()
                    .any(|leaf| is_domain_match(leaf.as_ref(), watched))
            })
            .cloned()
            .collect()
    }
}
