use std::collections::HashMap;
use std::sync::Arc;

use crate::models::job::Utility;
use crate::scraper::extractor::Extractor;
use crate::scraper::itf::{self, ItfExtractor};

/// Extractors keyed by site.
pub type ExtractorRegistry = HashMap<&'static str, Arc<dyn Extractor>>;

/// URL substring to site key. The first match wins.
const SITE_PATTERNS: &[(&str, &str)] = &[("itfllc", itf::SITE_KEY), ("conversebank", "conversebank")];

/// Which site a loaded URL belongs to.
pub fn resolve_site(url: &str) -> Option<&'static str> {
    SITE_PATTERNS
        .iter()
        .find(|(pattern, _)| url.contains(pattern))
        .map(|(_, site)| *site)
}

/// Registry with every extractor this crate ships.
pub fn default_registry() -> ExtractorRegistry {
    let mut registry: ExtractorRegistry = HashMap::new();
    registry.insert(itf::SITE_KEY, Arc::new(ItfExtractor));
    registry
}

/// Candidate portal URLs per utility, tried in order.
#[derive(Debug, Clone, Default)]
pub struct SiteDirectory {
    urls: HashMap<Utility, Vec<String>>,
}

impl SiteDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add URLs for a utility. Accepts a comma-separated list; blanks are
    /// skipped.
    pub fn with_urls(mut self, utility: Utility, urls: &str) -> Self {
        let parsed = urls
            .split(',')
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string);
        self.urls.entry(utility).or_default().extend(parsed);
        self
    }

    pub fn candidate_urls(&self, utility: Utility) -> &[String] {
        self.urls.get(&utility).map(Vec::as_slice).unwrap_or_default()
    }
}
