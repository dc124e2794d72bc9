//! Search term composition and local predicates

use serde::{Deserialize, Serialize};

use crate::models::ContentReader;
use crate::storage::ItemPredicate;

/// Filters understood by both the server and the local fallback
pub const BUILTIN_FILTERS: [&str; 4] = ["in:inbox", "in:all", "in:archive", "type:file"];

/// The user's current search: free text plus selected label names
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub term: String,
    pub label_names: Vec<String>,
}

impl SearchQuery {
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            label_names: Vec::new(),
        }
    }

    pub fn with_labels(mut self, label_names: Vec<String>) -> Self {
        self.label_names = label_names;
        self
    }

    /// Query string sent to the server
    ///
    /// None when there is neither a term nor a label selection; otherwise the
    /// term followed by ` label:<a>,<b>` when labels are selected.
    pub fn remote_query(&self) -> Option<String> {
        if self.term.is_empty() && self.label_names.is_empty() {
            return None;
        }

        let mut query = self.term.clone();
        if !self.label_names.is_empty() {
            query.push_str(" label:");
            query.push_str(&self.label_names.join(","));
        }
        Some(query)
    }

    /// True when the term holds nothing but built-in filters and spaces
    pub fn term_is_empty(&self) -> bool {
        let mut rest = self.term.clone();
        for filter in BUILTIN_FILTERS {
            rest = rest.replace(filter, "");
        }
        rest.replace(' ', "").is_empty()
    }

    /// Local predicate matching the term's built-in filter
    ///
    /// Precedence: `in:all`, then `in:archive`, then `type:file`; anything
    /// else means the inbox.
    pub fn default_predicate(&self) -> ItemPredicate {
        let undeleted = ItemPredicate::undeleted();
        if self.term.contains("in:all") {
            undeleted
        } else if self.term.contains("in:archive") {
            undeleted.archived(true)
        } else if self.term.contains("type:file") {
            undeleted.content_reader(ContentReader::Pdf)
        } else {
            undeleted.archived(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SyncStatus;

    #[test]
    fn test_remote_query_composition() {
        assert_eq!(SearchQuery::default().remote_query(), None);
        assert_eq!(
            SearchQuery::new("rust").remote_query().as_deref(),
            Some("rust")
        );
        assert_eq!(
            SearchQuery::new("rust")
                .with_labels(vec!["news".into(), "later".into()])
                .remote_query()
                .as_deref(),
            Some("rust label:news,later")
        );
        assert_eq!(
            SearchQuery::default()
                .with_labels(vec!["news".into()])
                .remote_query()
                .as_deref(),
            Some(" label:news")
        );
    }

    #[test]
    fn test_term_is_empty_ignores_builtin_filters() {
        assert!(SearchQuery::new("").term_is_empty());
        assert!(SearchQuery::new("in:inbox").term_is_empty());
        assert!(SearchQuery::new(" in:archive  type:file ").term_is_empty());
        assert!(!SearchQuery::new("in:archive rust").term_is_empty());
        assert!(!SearchQuery::new("label:news").term_is_empty());
    }

    #[test]
    fn test_default_predicate_precedence() {
        let all = SearchQuery::new("in:all in:archive").default_predicate();
        assert_eq!(all, ItemPredicate::undeleted());

        let archive = SearchQuery::new("in:archive type:file").default_predicate();
        assert_eq!(archive.archived, Some(true));
        assert_eq!(archive.content_reader, None);

        let files = SearchQuery::new("type:file").default_predicate();
        assert_eq!(files.content_reader, Some(ContentReader::Pdf));
        assert_eq!(files.archived, None);

        let inbox = SearchQuery::new("rust").default_predicate();
        assert_eq!(inbox.archived, Some(false));
        assert_eq!(inbox.exclude_status, Some(SyncStatus::NeedsDeletion));
    }
}
