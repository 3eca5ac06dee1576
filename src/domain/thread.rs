//! Thread identity.
//!
//! A thread is addressed by `(page_path, category)`. The key is normalized on
//! construction so that requests differing only by query hints resolve to the
//! same cache entries.

use std::fmt;

use super::error::DomainError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadKey {
    page_path: String,
    category: String,
}

impl ThreadKey {
    pub fn new(page_path: &str, category: &str) -> Result<Self, DomainError> {
        let page_path = normalize_page_path(page_path);
        if page_path.is_empty() {
            return Err(DomainError::validation("page path must not be empty"));
        }

        let category = category.trim();
        if category.is_empty() {
            return Err(DomainError::validation("category must not be empty"));
        }

        Ok(Self {
            page_path: page_path.to_string(),
            category: category.to_string(),
        })
    }

    /// The page path; also the exact title of the remote discussion.
    pub fn page_path(&self) -> &str {
        &self.page_path
    }

    pub fn category(&self) -> &str {
        &self.category
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.category, self.page_path)
    }
}

/// Strip whitespace and any query or fragment suffix from a page path.
fn normalize_page_path(raw: &str) -> &str {
    let trimmed = raw.trim();
    let end = trimmed.find(['?', '#']).unwrap_or(trimmed.len());
    trimmed[..end].trim_end()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_hints_do_not_change_the_key() {
        let plain = ThreadKey::new("/ch01", "Notes").expect("valid key");
        let hinted = ThreadKey::new("/ch01?id=D_kwDO123", "Notes").expect("valid key");
        let fragment = ThreadKey::new("  /ch01#section-2 ", " Notes ").expect("valid key");

        assert_eq!(plain, hinted);
        assert_eq!(plain, fragment);
        assert_eq!(plain.to_string(), "Notes::/ch01");
    }

    #[test]
    fn categories_are_distinct_keys() {
        let notes = ThreadKey::new("/ch01", "Notes").expect("valid key");
        let announcements = ThreadKey::new("/ch01", "Announcements").expect("valid key");
        assert_ne!(notes, announcements);
    }

    #[test]
    fn empty_components_are_rejected() {
        assert!(ThreadKey::new("   ", "Notes").is_err());
        assert!(ThreadKey::new("?id=1", "Notes").is_err());
        assert!(ThreadKey::new("/ch01", "").is_err());
    }
}
