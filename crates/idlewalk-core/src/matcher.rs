//! Keyword-based title matching.

use std::sync::Arc;

use tracing::debug;

/// The match predicate injected into a browse task: pure, total over all
/// title strings including empty.
pub type TitlePredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Substring keyword matcher over item titles.
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    keywords: Vec<String>,
    case_sensitive: bool,
}

impl KeywordMatcher {
    pub fn new(keywords: Vec<String>, case_sensitive: bool) -> Self {
        let keywords = if case_sensitive {
            keywords
        } else {
            keywords.into_iter().map(|k| k.to_lowercase()).collect()
        };
        Self {
            keywords,
            case_sensitive,
        }
    }

    /// Whether any keyword occurs in the title.
    pub fn matches(&self, title: &str) -> bool {
        let haystack = if self.case_sensitive {
            title.to_string()
        } else {
            title.to_lowercase()
        };
        for keyword in &self.keywords {
            if haystack.contains(keyword.as_str()) {
                debug!("title matched keyword '{}': {}", keyword, title);
                return true;
            }
        }
        false
    }

    /// Box into the predicate form the browse task takes.
    pub fn into_predicate(self) -> TitlePredicate {
        Arc::new(move |title| self.matches(title))
    }
}
