use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use bibleview_bridge::{
    BridgeCommand, BridgeEvent, BridgeHandle, ContentChunk, Direction, Gesture, LayoutSurface,
    SelectionMode, Surface, SurfaceLine, VerseSelection,
};
use bibleview_core::{
    BookCategory, ContentLoader, Key, PageContent, PageManager, StateStore, ViewSettings,
};
use bibleview_render::FileCatalog;
use tracing::{debug, info, warn};

/// Keys of the pages currently laid out on the surface.
#[derive(Debug, Clone)]
struct LoadedRange {
    first: Key,
    last: Key,
}

pub struct Reader {
    manager: PageManager,
    catalog: Arc<FileCatalog>,
    loader: ContentLoader,
    bridge: BridgeHandle<LayoutSurface>,
    long_press: Duration,
    cursor_offset: f32,
    loaded: Option<LoadedRange>,
    message: Option<String>,
}

impl Reader {
    pub fn new(
        manager: PageManager,
        catalog: Arc<FileCatalog>,
        loader: ContentLoader,
        bridge: BridgeHandle<LayoutSurface>,
        settings: &ViewSettings,
    ) -> Self {
        Self {
            manager,
            catalog,
            loader,
            bridge,
            long_press: Duration::from_millis(settings.long_press_ms),
            cursor_offset: settings.toolbar_offset + settings.target_line,
            loaded: None,
            message: None,
        }
    }

    #[cfg(test)]
    pub fn bridge(&self) -> &BridgeHandle<LayoutSurface> {
        &self.bridge
    }

    /// Lays out the active slot's page, replacing whatever was shown.
    pub async fn show_current_page(&mut self) {
        if self.manager.active().key().is_none() {
            if let Some(first) = self.manager.active_mut().page_plus(0) {
                self.manager.set_key(first);
            }
        }
        let generation = self.bridge.generation();
        let content = self
            .manager
            .active_mut()
            .load_page(&self.loader, false)
            .await;
        self.replace(content, generation);
    }

    /// Scrolls to where the reader left the active page, if still valid.
    pub async fn restore_offset(&mut self) {
        let ratio = self.manager.active().offset_ratio();
        let offset = self
            .bridge
            .with_bridge(|bridge| ratio * bridge.surface().max_scroll_offset());
        self.scroll_to(offset).await;
    }

    pub async fn page_step(&mut self, delta: isize) {
        match self.manager.active_mut().page_plus(delta) {
            Some(key) => self.navigate(key).await,
            None => self.message = Some("no more pages".to_owned()),
        }
    }

    pub async fn goto(&mut self, text: &str) -> Result<()> {
        let document = self
            .manager
            .active_mut()
            .current_document()
            .ok_or_else(|| anyhow!("no document in the {} slot", self.manager.active_category()))?;
        let key = document.parse_key(text)?;
        self.navigate(key).await;
        self.bridge
            .submit(BridgeCommand::ScrollToVerse(text.trim().to_owned()));
        self.after_scroll().await;
        Ok(())
    }

    pub async fn switch_slot(&mut self, category: BookCategory) {
        if category == self.manager.active_category() {
            return;
        }
        self.record_offset();
        self.manager.set_active_category(category);
        self.show_current_page().await;
        self.restore_offset().await;
    }

    pub async fn scroll_by(&mut self, delta: f32) {
        let current = self
            .bridge
            .with_bridge(|bridge| bridge.surface().scroll_offset());
        self.scroll_to(current + delta).await;
    }

    pub async fn scroll_to(&mut self, offset: f32) {
        if self.bridge.on_scroll(offset).is_some() {
            self.process_events().await;
        }
    }

    pub fn viewport_height(&self) -> f32 {
        self.bridge
            .with_bridge(|bridge| bridge.surface().viewport_height())
    }

    pub fn content_end(&self) -> f32 {
        self.bridge
            .with_bridge(|bridge| bridge.surface().max_scroll_offset())
    }

    pub fn set_selection_mode(&mut self, mode: SelectionMode) {
        let command = match mode {
            SelectionMode::Off => BridgeCommand::DisableVerseTouchSelection,
            SelectionMode::TouchSelect => BridgeCommand::EnableVerseTouchSelection,
            SelectionMode::LongPressSelect => BridgeCommand::EnableVerseLongTouchSelectionMode,
        };
        self.bridge.submit(command);
    }

    pub fn clear_highlights(&mut self) {
        self.bridge.submit(BridgeCommand::ClearVerseHighlight);
    }

    /// Taps or long-presses the verse on the cursor line.
    pub fn gesture(&mut self, long: bool) -> bool {
        let gesture = if long {
            Gesture::Press(self.long_press)
        } else {
            Gesture::Tap
        };
        self.bridge
            .gesture(self.cursor_offset, gesture)
            .unwrap_or(false)
    }

    pub async fn resize(&mut self, columns: u16, rows: u16) {
        let offset = self.bridge.with_bridge(|bridge| {
            bridge
                .surface_mut()
                .resize(usize::from(columns), f32::from(rows));
            bridge.surface().scroll_offset()
        });
        self.scroll_to(offset).await;
    }

    /// Reloads the catalog and falls back to another document when the shown
    /// one was uninstalled.
    pub async fn catalog_changed(&mut self) {
        match self.catalog.reload() {
            Ok(count) => debug!(count, "catalog reloaded"),
            Err(err) => {
                warn!(error = %err, "failed to reload catalog");
                return;
            }
        }
        let missing = self.manager.check_documents_still_installed();
        if missing.contains(&self.manager.active_category()) {
            info!(category = %self.manager.active_category(), "shown document was uninstalled");
            self.message = Some("document uninstalled".to_owned());
            self.show_current_page().await;
        }
    }

    pub fn persist(&mut self, store: &dyn StateStore) -> Result<()> {
        self.record_offset();
        store.save(&self.manager.snapshot())
    }

    pub fn frame(&self) -> (Vec<SurfaceLine>, VerseSelection) {
        self.bridge.with_bridge(|bridge| {
            (
                bridge.surface().visible_lines(),
                bridge.selection().clone(),
            )
        })
    }

    pub fn status(&mut self) -> String {
        let category = self.manager.active_category();
        let page = self.manager.active();
        let document = page
            .cached_document()
            .map(|document| document.name().to_owned())
            .unwrap_or_else(|| "no document".to_owned());
        let mut status = format!("[{category}] {document}");
        if let Some(key) = page.key() {
            status.push_str(&format!(" {key}"));
        }
        let mode = self.bridge.with_bridge(|bridge| bridge.selection().mode());
        match mode {
            SelectionMode::Off => {}
            SelectionMode::TouchSelect => status.push_str(" | select"),
            SelectionMode::LongPressSelect => status.push_str(" | long-press select"),
        }
        if let Some(message) = self.message.take() {
            status.push_str(" | ");
            status.push_str(&message);
        }
        status
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    async fn navigate(&mut self, key: Key) {
        let content = self.manager.navigate(key, &self.loader).await;
        let generation = self.bridge.generation();
        self.replace(content, generation);
        self.scroll_to(0.0).await;
    }

    fn replace(&mut self, content: PageContent, generation: u64) {
        self.loaded = content.key.clone().map(|key| LoadedRange {
            first: key.clone(),
            last: key,
        });
        self.bridge.submit(BridgeCommand::ReplaceContent {
            markup: content.markup,
            generation,
        });
    }

    fn record_offset(&mut self) {
        let (offset, max) = self.bridge.with_bridge(|bridge| {
            let surface = bridge.surface();
            (surface.scroll_offset(), surface.max_scroll_offset())
        });
        let ratio = if max > 0.0 { offset / max } else { 0.0 };
        self.manager.active_mut().set_offset_ratio(ratio);
    }

    async fn after_scroll(&mut self) {
        let offset = self
            .bridge
            .with_bridge(|bridge| bridge.surface().scroll_offset());
        self.scroll_to(offset).await;
    }

    async fn process_events(&mut self) {
        let events = self.bridge.with_bridge(|bridge| bridge.events());
        let pending: Vec<_> = events.lock().drain(..).collect();
        for event in pending {
            match event {
                BridgeEvent::NeedsContent {
                    direction,
                    generation,
                } => self.load_adjacent(direction, generation).await,
                BridgeEvent::TopVerseChanged(verse) => self.sync_key(&verse),
                BridgeEvent::ContentRejected {
                    generation,
                    current,
                } => debug!(generation, current, "bridge dropped stale content"),
            }
        }
    }

    async fn load_adjacent(&mut self, direction: Direction, generation: u64) {
        let Some(range) = self.loaded.clone() else {
            return;
        };
        let Some(document) = self.manager.active_mut().current_document() else {
            return;
        };
        let next = match direction {
            Direction::Top => document.key_plus(&range.first, -1),
            Direction::Bottom => document.key_plus(&range.last, 1),
        };
        let Some(next) = next else {
            debug!(?direction, "no more content in this direction");
            return;
        };

        let markup = self
            .manager
            .active_mut()
            .fragment_for(&next, &self.loader)
            .await;
        if generation != self.bridge.generation() {
            debug!(generation, "page changed while loading adjacent content");
            return;
        }
        self.bridge.submit(BridgeCommand::InsertContent(ContentChunk {
            markup,
            direction,
            generation,
        }));
        if let Some(range) = self.loaded.as_mut() {
            match direction {
                Direction::Top => range.first = next,
                Direction::Bottom => range.last = next,
            }
        }
    }

    /// Follows the verse at the top of the view without announcing a page
    /// change, so content already requested stays current.
    fn sync_key(&mut self, verse: &str) {
        let Some(document) = self.manager.active().cached_document().cloned() else {
            return;
        };
        let Ok(key) = document.parse_key(verse) else {
            return;
        };
        if self.manager.active().key() == Some(&key) {
            return;
        }
        debug!(%key, "key follows scroll position");
        self.manager.active_mut().set_inhibit_change_notifications(true);
        self.manager.set_key(key);
        self.manager.active_mut().set_inhibit_change_notifications(false);
    }
}
