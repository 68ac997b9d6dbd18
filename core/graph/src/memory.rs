//! In-memory tree source for testing.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use integrator_common::{Error, Result};

use crate::drive::classify_drive_item;
use crate::tree::{Classified, Listing, TreeSource};

#[derive(Debug, Clone)]
enum Entry {
    Listing(Listing),
    Failure,
}

/// In-memory tree source.
///
/// Listings are keyed by reference and items are classified like OneDrive
/// items. Every `list` call is recorded so tests can count requests.
#[derive(Default)]
pub struct MemoryTreeSource {
    entries: HashMap<String, Entry>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MemoryTreeSource {
    /// Create an empty source; any reference without a listing is not found.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listing(mut self, reference: &str, items: Vec<Value>) -> Self {
        self.entries
            .insert(reference.to_string(), Entry::Listing(Listing::new(items)));
        self
    }

    /// Listing whose first page carries a continuation link.
    pub fn with_paged_listing(mut self, reference: &str, items: Vec<Value>, next_link: &str) -> Self {
        self.entries.insert(
            reference.to_string(),
            Entry::Listing(Listing {
                items,
                next_link: Some(next_link.to_string()),
            }),
        );
        self
    }

    /// Listing `reference` fails with a service error.
    pub fn with_failure(mut self, reference: &str) -> Self {
        self.entries.insert(reference.to_string(), Entry::Failure);
        self
    }

    /// References listed so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TreeSource for MemoryTreeSource {
    fn name(&self) -> &str {
        "memory"
    }

    fn root_ref(&self) -> String {
        "root".to_string()
    }

    async fn list(&self, _token: &str, reference: &str) -> Result<Listing> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(reference.to_string());
        }

        match self.entries.get(reference) {
            Some(Entry::Listing(listing)) => Ok(listing.clone()),
            Some(Entry::Failure) => Err(Error::Api {
                status: 500,
                message: format!("listing {} failed", reference),
            }),
            None => Err(Error::NotFound(reference.to_string())),
        }
    }

    fn classify(&self, raw: &Value) -> Option<Classified> {
        classify_drive_item(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_source_listing() {
        let source = MemoryTreeSource::new()
            .with_listing("root", vec![json!({"id": "1", "name": "a.txt"})])
            .with_failure("broken");

        let listing = source.list("t", "root").await.unwrap();
        assert_eq!(listing.items.len(), 1);
        assert!(listing.next_link.is_none());

        assert!(matches!(
            source.list("t", "broken").await,
            Err(Error::Api { status: 500, .. })
        ));
        assert!(matches!(
            source.list("t", "missing").await,
            Err(Error::NotFound(_))
        ));
        assert_eq!(source.calls(), vec!["root", "broken", "missing"]);
    }
}
