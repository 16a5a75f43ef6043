use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::content::{ContentLoader, PageContent, Placeholder};
use crate::mediator::ChangeMediator;
use crate::state::{PageStatePayload, SessionState};
use crate::{same_document, BookCategory, Catalog, DocumentRef, Key};

/// Scroll position recorded together with the page it was measured on.
#[derive(Debug, Clone, Default)]
struct RecordedOffset {
    ratio: f32,
    document: Option<String>,
    key: Option<Key>,
}

/// Navigation state of one page slot. The only writer of its document and key.
pub struct PageController {
    category: BookCategory,
    catalog: Arc<dyn Catalog>,
    mediator: Arc<ChangeMediator>,
    document: Option<DocumentRef>,
    key: Option<Key>,
    offset: RecordedOffset,
    share_key_between_docs: bool,
    inhibit_change_notifications: bool,
}

impl PageController {
    pub fn new(
        category: BookCategory,
        share_key_between_docs: bool,
        catalog: Arc<dyn Catalog>,
        mediator: Arc<ChangeMediator>,
    ) -> Self {
        Self {
            category,
            catalog,
            mediator,
            document: None,
            key: None,
            offset: RecordedOffset::default(),
            share_key_between_docs,
            inhibit_change_notifications: false,
        }
    }

    pub fn category(&self) -> BookCategory {
        self.category
    }

    pub fn is_share_key_between_docs(&self) -> bool {
        self.share_key_between_docs
    }

    pub fn set_share_key_between_docs(&mut self, share: bool) {
        self.share_key_between_docs = share;
    }

    pub fn is_inhibit_change_notifications(&self) -> bool {
        self.inhibit_change_notifications
    }

    pub fn set_inhibit_change_notifications(&mut self, inhibit: bool) {
        self.inhibit_change_notifications = inhibit;
    }

    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    pub fn set_key(&mut self, key: Key) {
        self.before_page_change();
        self.do_set_key(Some(key));
        self.page_change();
    }

    /// Falls back to the first installed document of this slot's category
    /// and caches it until the next document change or invalidation.
    pub fn current_document(&mut self) -> Option<DocumentRef> {
        if self.document.is_none() {
            self.document = self.catalog.list_documents(self.category).into_iter().next();
            if let Some(document) = &self.document {
                debug!(category = %self.category, document = document.initials(), "defaulted current document");
            }
        }
        self.document.clone()
    }

    /// The cached document, without falling back to the catalog.
    pub fn cached_document(&self) -> Option<&DocumentRef> {
        self.document.as_ref()
    }

    pub fn is_current_document_set(&self) -> bool {
        self.document.is_some()
    }

    #[instrument(skip(self, document), fields(category = %self.category, document = document.initials()))]
    pub fn set_current_document(&mut self, document: DocumentRef) {
        self.before_page_change();
        let previous = self.document.clone();
        let changed = !previous
            .as_ref()
            .is_some_and(|previous| same_document(previous.as_ref(), document.as_ref()));

        if changed && !self.share_key_between_docs {
            let orphaned = self.key.as_ref().is_some_and(|key| !document.contains(key));
            if orphaned {
                debug!(key = ?self.key, "new document does not contain key, clearing it");
                self.do_set_key(None);
            }
        }
        self.local_set_current_document(Some(document));

        if changed {
            if let Some(previous) = previous {
                previous.deactivate();
            }
        }
        self.page_change();
    }

    /// Sets both without notifying, for jumps that arrive with a known-good key.
    pub fn set_current_document_and_key(&mut self, document: DocumentRef, key: Key) {
        let previous = self.document.clone();
        self.do_set_key(Some(key));
        self.local_set_current_document(Some(Arc::clone(&document)));
        if let Some(previous) = previous {
            if !same_document(previous.as_ref(), document.as_ref()) {
                previous.deactivate();
            }
        }
    }

    pub fn invalidate(&mut self) {
        if let Some(document) = self.document.take() {
            debug!(category = %self.category, document = document.initials(), "invalidated current document");
        }
    }

    /// Re-resolves the cached document; clears it and returns false once uninstalled.
    pub fn check_document_still_installed(&mut self) -> bool {
        if let Some(document) = self.document.take() {
            debug!(document = document.initials(), "checking current document is still installed");
            self.document = self.catalog.resolve_document(document.initials());
            if self.document.is_none() {
                warn!(category = %self.category, document = document.initials(), "current document is no longer installed");
            }
        }
        self.document.is_some()
    }

    /// How far down the page the reader was. Reads 0 once the document or key
    /// has moved away from where the ratio was recorded.
    pub fn offset_ratio(&self) -> f32 {
        let Some(key) = &self.key else {
            return 0.0;
        };
        let document = self.document.as_ref().map(|document| document.initials());
        if self.offset.key.as_ref() != Some(key) || self.offset.document.as_deref() != document {
            return 0.0;
        }
        self.offset.ratio
    }

    pub fn set_offset_ratio(&mut self, ratio: f32) {
        let ratio = if ratio.is_finite() {
            ratio.clamp(0.0, 1.0)
        } else {
            warn!(ratio, "ignoring non-finite offset ratio");
            0.0
        };
        let document = self
            .current_document()
            .map(|document| document.initials().to_owned());
        self.offset = RecordedOffset {
            ratio,
            document,
            key: self.key.clone(),
        };
    }

    /// Key `num` pages away from the current one; the first key when none is set.
    pub fn page_plus(&mut self, num: isize) -> Option<Key> {
        let document = self.current_document()?;
        match &self.key {
            Some(key) => document.key_plus(key, num),
            None => document.first_key(),
        }
    }

    #[instrument(skip(self, payload), fields(category = %self.category))]
    pub fn restore_state(&mut self, payload: &PageStatePayload) {
        let Some(initials) = payload.document() else {
            debug!("no document in page state");
            return;
        };
        let Some(document) = self.catalog.resolve_document(initials) else {
            warn!(document = initials, "page state refers to a document that is not installed");
            return;
        };
        debug!(document = document.initials(), "restored document");
        self.local_set_current_document(Some(Arc::clone(&document)));

        if let Some(key_name) = payload.key() {
            match document.parse_key(key_name) {
                Ok(key) => {
                    debug!(%key, "restored key");
                    self.do_set_key(Some(key));
                }
                Err(err) => {
                    warn!(key = key_name, error = %err, "failed to restore key");
                }
            }
        }
    }

    pub fn serialize_state(&mut self) -> PageStatePayload {
        match self.current_document() {
            Some(document) => PageStatePayload::new(
                Some(document.initials().to_owned()),
                self.key.as_ref().map(|key| key.osis_id().to_owned()),
            ),
            None => PageStatePayload::empty(),
        }
    }

    /// Moves to `key` and loads its content before announcing the change.
    #[instrument(skip(self, loader, key), fields(category = %self.category, %key))]
    pub async fn navigate(&mut self, key: Key, loader: &ContentLoader) -> PageContent {
        self.before_page_change();
        self.do_set_key(Some(key));
        let content = self.load_page(loader, false).await;
        self.page_change();
        content
    }

    pub async fn current_page_content(&mut self, loader: &ContentLoader, as_fragment: bool) -> String {
        self.load_page(loader, as_fragment).await.markup
    }

    /// Renders `key` of the current document without changing state.
    pub async fn fragment_for(&mut self, key: &Key, loader: &ContentLoader) -> String {
        match self.current_document() {
            Some(document) => loader.load(document.as_ref(), Some(key), true).await,
            None => loader.placeholder(Placeholder::NoContent, true),
        }
    }

    pub async fn load_page(&mut self, loader: &ContentLoader, as_fragment: bool) -> PageContent {
        let document = self.current_document();
        let key = self.key.clone();
        let markup = match &document {
            Some(document) => loader.load(document.as_ref(), key.as_ref(), as_fragment).await,
            None => loader.placeholder(Placeholder::NoContent, as_fragment),
        };
        PageContent {
            document: document.map(|document| document.initials().to_owned()),
            key,
            markup,
        }
    }

    fn do_set_key(&mut self, key: Option<Key>) {
        debug!(category = %self.category, key = ?key, "setting key");
        if self.key != key {
            self.offset = RecordedOffset::default();
        }
        self.key = key;
    }

    fn local_set_current_document(&mut self, document: Option<DocumentRef>) {
        let changed = match (&self.document, &document) {
            (Some(current), Some(next)) => !same_document(current.as_ref(), next.as_ref()),
            (None, None) => false,
            _ => true,
        };
        if changed {
            self.offset = RecordedOffset::default();
        }
        self.document = document;
    }

    fn before_page_change(&self) {
        if !self.inhibit_change_notifications {
            self.mediator.notify_before();
        }
    }

    fn page_change(&self) {
        if !self.inhibit_change_notifications {
            self.mediator.notify_after();
        }
    }
}

/// One page controller per document category plus the slot currently shown.
pub struct PageManager {
    pages: [PageController; BookCategory::ALL.len()],
    active: BookCategory,
    mediator: Arc<ChangeMediator>,
}

impl PageManager {
    pub fn new(catalog: Arc<dyn Catalog>, mediator: Arc<ChangeMediator>) -> Self {
        let pages = BookCategory::ALL.map(|category| {
            PageController::new(
                category,
                category.shares_keys(),
                Arc::clone(&catalog),
                Arc::clone(&mediator),
            )
        });
        Self {
            pages,
            active: BookCategory::Bible,
            mediator,
        }
    }

    pub fn mediator(&self) -> &Arc<ChangeMediator> {
        &self.mediator
    }

    pub fn active_category(&self) -> BookCategory {
        self.active
    }

    pub fn page(&self, category: BookCategory) -> &PageController {
        &self.pages[category.index()]
    }

    pub fn page_mut(&mut self, category: BookCategory) -> &mut PageController {
        &mut self.pages[category.index()]
    }

    pub fn active(&self) -> &PageController {
        self.page(self.active)
    }

    pub fn active_mut(&mut self) -> &mut PageController {
        self.page_mut(self.active)
    }

    pub fn set_active_category(&mut self, category: BookCategory) {
        if category == self.active {
            return;
        }
        self.mediator.notify_before();
        debug!(from = %self.active, to = %category, "switching page slot");
        self.active = category;
        self.mediator.notify_after();
    }

    /// Shows `document` in the slot of its category.
    pub fn show_document(&mut self, document: DocumentRef) {
        let category = document.category();
        self.active = category;
        self.page_mut(category).set_current_document(document);
    }

    /// Sets the key of the active slot and mirrors it into every other slot
    /// that shares keys with it.
    pub fn set_key(&mut self, key: Key) {
        self.active().before_page_change();
        self.mirror_key(&key);
        let page = self.active_mut();
        page.do_set_key(Some(key));
        page.page_change();
    }

    /// Like [`PageManager::set_key`], announcing the change once the active
    /// slot's content is loaded.
    #[instrument(skip(self, loader, key), fields(category = %self.active, %key))]
    pub async fn navigate(&mut self, key: Key, loader: &ContentLoader) -> PageContent {
        self.active().before_page_change();
        self.mirror_key(&key);
        let page = self.active_mut();
        page.do_set_key(Some(key));
        let content = page.load_page(loader, false).await;
        page.page_change();
        content
    }

    fn mirror_key(&mut self, key: &Key) {
        let active = self.active;
        for page in self.pages.iter_mut() {
            let category = page.category();
            if category == active || !(category.shares_keys() && active.shares_keys()) {
                continue;
            }
            let accepts = page
                .current_document()
                .is_some_and(|document| document.contains(key));
            if accepts {
                page.do_set_key(Some(key.clone()));
            }
        }
    }

    /// Re-checks every slot against the catalog and returns the slots whose
    /// document disappeared.
    pub fn check_documents_still_installed(&mut self) -> Vec<BookCategory> {
        self.pages
            .iter_mut()
            .filter(|page| page.is_current_document_set())
            .filter_map(|page| (!page.check_document_still_installed()).then_some(page.category()))
            .collect()
    }

    pub fn snapshot(&mut self) -> SessionState {
        let mut state = SessionState::new(Some(self.active));
        for page in self.pages.iter_mut() {
            if !page.is_current_document_set() {
                continue;
            }
            let payload = page.serialize_state();
            if !payload.is_empty() {
                state.pages.insert(page.category(), payload);
            }
        }
        state
    }

    #[instrument(skip(self, state), fields(pages = state.pages.len()))]
    pub fn restore(&mut self, state: &SessionState) {
        let mediator = Arc::clone(&self.mediator);
        let _guard = mediator.suppress();
        for (category, payload) in &state.pages {
            self.page_mut(*category).restore_state(payload);
        }
        if let Some(active) = state.active {
            self.active = active;
        }
    }
}
