use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod content;
pub mod error;
pub mod mediator;
pub mod page;
pub mod settings;
pub mod state;

#[cfg(test)]
pub(crate) mod test_utils;

pub use content::{ContentLoader, PageContent, Placeholder};
pub use error::{KeyError, RenderError, StateError, UnknownCategory};
pub use mediator::{ChangeMediator, ChangePhase, PageChangeObserver, SubscriptionId, SuppressGuard};
pub use page::{PageController, PageManager};
pub use settings::ViewSettings;
pub use state::{
    FileStateStore, MemoryStateStore, PageStatePayload, SessionState, StateStore, STATE_VERSION,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookCategory {
    Bible,
    Commentary,
    Dictionary,
    Map,
    GeneralBook,
}

impl BookCategory {
    pub const ALL: [BookCategory; 5] = [
        BookCategory::Bible,
        BookCategory::Commentary,
        BookCategory::Dictionary,
        BookCategory::Map,
        BookCategory::GeneralBook,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BookCategory::Bible => "bible",
            BookCategory::Commentary => "commentary",
            BookCategory::Dictionary => "dictionary",
            BookCategory::Map => "map",
            BookCategory::GeneralBook => "general_book",
        }
    }

    /// Position of this category in [`BookCategory::ALL`].
    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// Bibles and commentaries are addressed by the same scripture keys.
    pub fn shares_keys(self) -> bool {
        matches!(self, BookCategory::Bible | BookCategory::Commentary)
    }
}

impl fmt::Display for BookCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BookCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        BookCategory::ALL
            .into_iter()
            .find(|category| category.name() == normalized)
            .or(match normalized.as_str() {
                "maps" => Some(BookCategory::Map),
                "book" | "generalbook" => Some(BookCategory::GeneralBook),
                _ => None,
            })
            .ok_or_else(|| UnknownCategory(s.to_owned()))
    }
}

/// Locator of a logical unit inside a document, e.g. an OSIS reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(String);

impl Key {
    pub fn new(osis_id: impl Into<String>) -> Self {
        Self(osis_id.into())
    }

    pub fn osis_id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type DocumentRef = Arc<dyn Document>;

/// A content source owned by the catalog.
pub trait Document: Send + Sync + fmt::Debug {
    fn initials(&self) -> &str;

    fn name(&self) -> &str {
        self.initials()
    }

    fn category(&self) -> BookCategory;

    fn language(&self) -> &str;

    fn parse_key(&self, text: &str) -> Result<Key, KeyError>;

    fn contains(&self, key: &Key) -> bool;

    fn first_key(&self) -> Option<Key>;

    /// The key `num` pages away from `key`, one key per page.
    fn key_plus(&self, key: &Key, num: isize) -> Option<Key>;

    /// Drops cached resources once the document stops being current.
    fn deactivate(&self) {}
}

pub fn same_document(a: &dyn Document, b: &dyn Document) -> bool {
    a.initials() == b.initials()
}

pub trait Catalog: Send + Sync {
    fn resolve_document(&self, initials: &str) -> Option<DocumentRef>;
    fn list_documents(&self, category: BookCategory) -> Vec<DocumentRef>;
}

#[async_trait]
pub trait TextRenderer: Send + Sync {
    async fn render(
        &self,
        document: &dyn Document,
        key: Option<&Key>,
        as_fragment: bool,
    ) -> Result<String, RenderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_names_round_trip_through_from_str() {
        for category in BookCategory::ALL {
            assert_eq!(category.name().parse::<BookCategory>().unwrap(), category);
        }
        assert_eq!(
            "General-Book".parse::<BookCategory>().unwrap(),
            BookCategory::GeneralBook
        );
        assert_eq!("maps".parse::<BookCategory>().unwrap(), BookCategory::Map);
        assert!("atlas".parse::<BookCategory>().is_err());
    }

    #[test]
    fn category_serializes_as_snake_case() {
        let json = serde_json::to_string(&BookCategory::GeneralBook).unwrap();
        assert_eq!(json, "\"general_book\"");
    }

    #[test]
    fn only_scripture_categories_share_keys() {
        assert!(BookCategory::Bible.shares_keys());
        assert!(BookCategory::Commentary.shares_keys());
        assert!(!BookCategory::Dictionary.shares_keys());
        assert!(!BookCategory::GeneralBook.shares_keys());
    }
}
