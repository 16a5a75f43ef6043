//! Fakes shared by the unit tests of this crate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    BookCategory, Catalog, ChangePhase, Document, DocumentRef, Key, KeyError, PageChangeObserver,
    RenderError, TextRenderer,
};

#[derive(Debug)]
pub struct FakeDocument {
    initials: String,
    category: BookCategory,
    keys: Vec<Key>,
    deactivations: AtomicUsize,
    lookups: AtomicUsize,
}

impl FakeDocument {
    pub fn new(initials: &str, category: BookCategory, keys: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            initials: initials.to_owned(),
            category,
            keys: keys.iter().map(|key| Key::new(*key)).collect(),
            deactivations: AtomicUsize::new(0),
            lookups: AtomicUsize::new(0),
        })
    }

    pub fn deactivations(&self) -> usize {
        self.deactivations.load(Ordering::SeqCst)
    }

    /// Times `contains` was asked about a key.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl Document for FakeDocument {
    fn initials(&self) -> &str {
        &self.initials
    }

    fn category(&self) -> BookCategory {
        self.category
    }

    fn language(&self) -> &str {
        "en"
    }

    fn parse_key(&self, text: &str) -> Result<Key, KeyError> {
        if text.is_empty() || text.contains(char::is_whitespace) {
            return Err(KeyError::Malformed(text.to_owned()));
        }
        let key = Key::new(text);
        if self.keys.contains(&key) {
            Ok(key)
        } else {
            Err(KeyError::NotFound {
                document: self.initials.clone(),
                key: text.to_owned(),
            })
        }
    }

    fn contains(&self, key: &Key) -> bool {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.keys.contains(key)
    }

    fn first_key(&self) -> Option<Key> {
        self.keys.first().cloned()
    }

    fn key_plus(&self, key: &Key, num: isize) -> Option<Key> {
        let index = self.keys.iter().position(|candidate| candidate == key)?;
        let target = index.checked_add_signed(num)?;
        self.keys.get(target).cloned()
    }

    fn deactivate(&self) {
        self.deactivations.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeCatalog {
    documents: Mutex<Vec<DocumentRef>>,
}

impl FakeCatalog {
    pub fn with(documents: Vec<DocumentRef>) -> Arc<Self> {
        Arc::new(Self {
            documents: Mutex::new(documents),
        })
    }

    pub fn uninstall(&self, initials: &str) {
        self.documents
            .lock()
            .retain(|document| document.initials() != initials);
    }
}

impl Catalog for FakeCatalog {
    fn resolve_document(&self, initials: &str) -> Option<DocumentRef> {
        self.documents
            .lock()
            .iter()
            .find(|document| document.initials() == initials)
            .cloned()
    }

    fn list_documents(&self, category: BookCategory) -> Vec<DocumentRef> {
        self.documents
            .lock()
            .iter()
            .filter(|document| document.category() == category)
            .cloned()
            .collect()
    }
}

type PhaseLog = Arc<Mutex<Vec<(&'static str, ChangePhase)>>>;

pub struct RecordingObserver {
    name: &'static str,
    log: PhaseLog,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::named("recorder", Arc::new(Mutex::new(Vec::new())))
    }

    pub fn named(name: &'static str, log: PhaseLog) -> Self {
        Self { name, log }
    }

    pub fn phases(&self) -> Vec<ChangePhase> {
        self.log
            .lock()
            .iter()
            .filter(|(name, _)| *name == self.name)
            .map(|(_, phase)| *phase)
            .collect()
    }
}

impl PageChangeObserver for RecordingObserver {
    fn on_page_change(&self, phase: ChangePhase) -> Result<()> {
        self.log.lock().push((self.name, phase));
        Ok(())
    }
}

pub enum FakeRenderer {
    Text(&'static str),
    Failing,
}

#[async_trait]
impl TextRenderer for FakeRenderer {
    async fn render(
        &self,
        document: &dyn Document,
        key: Option<&Key>,
        _as_fragment: bool,
    ) -> Result<String, RenderError> {
        match self {
            FakeRenderer::Text(text) => Ok(match key {
                Some(key) if !text.is_empty() => format!("{}:{}:{}", document.initials(), key, text),
                _ => (*text).to_owned(),
            }),
            FakeRenderer::Failing => Err(RenderError::Content {
                document: document.initials().to_owned(),
                message: "backend offline".to_owned(),
            }),
        }
    }
}
