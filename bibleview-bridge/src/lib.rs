use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bibleview_core::{ChangePhase, PageChangeObserver, ViewSettings};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub mod highlight;
pub mod surface;

pub use highlight::{Gesture, SelectionMode, VerseSelection};
pub use surface::{BlockId, LayoutSurface, Surface, SurfaceLine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Top,
    Bottom,
}

/// Markup loaded for one edge of the surface, tagged with the content
/// generation it was requested under.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentChunk {
    pub markup: String,
    pub direction: Direction,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionMode {
    Replace,
    Merge,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeSettings {
    pub toolbar_offset: f32,
    pub target_line: f32,
    pub edge_threshold: f32,
    pub long_press: Duration,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self::from(&ViewSettings::default())
    }
}

impl From<&ViewSettings> for BridgeSettings {
    fn from(settings: &ViewSettings) -> Self {
        Self {
            toolbar_offset: settings.toolbar_offset,
            target_line: settings.target_line,
            edge_threshold: settings.edge_threshold,
            long_press: Duration::from_millis(settings.long_press_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BridgeCommand {
    InsertContent(ContentChunk),
    ReplaceContent { markup: String, generation: u64 },
    RegisterVersePositions {
        positions: HashMap<String, f32>,
        mode: PositionMode,
    },
    ScrollToVerse(String),
    SetToolbarOffset(f32),
    HighlightVerse(String),
    UnhighlightVerse(String),
    ClearVerseHighlight,
    EnableVerseTouchSelection,
    EnableVerseLongTouchSelectionMode,
    DisableVerseTouchSelection,
    /// Host scroll to an absolute offset.
    Scroll(f32),
    /// Gesture on the verse `cursor` below the top of the view.
    Gesture { cursor: f32, gesture: Gesture },
}

#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    NeedsContent { direction: Direction, generation: u64 },
    TopVerseChanged(String),
    ContentRejected { generation: u64, current: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScrollReport {
    pub offset: f32,
    pub top_verse: Option<String>,
    pub requests: Vec<Direction>,
}

pub struct ContentBridge<S> {
    surface: S,
    settings: BridgeSettings,
    verse_positions: HashMap<String, f32>,
    generation: u64,
    selection: VerseSelection,
    top_verse: Option<String>,
    // edges already asked for since the last insertion there
    requested_top: bool,
    requested_bottom: bool,
    events: Arc<Mutex<Vec<BridgeEvent>>>,
}

impl<S: Surface> ContentBridge<S> {
    pub fn new(surface: S, settings: BridgeSettings) -> Self {
        Self {
            surface,
            selection: VerseSelection::new(settings.long_press),
            settings,
            verse_positions: HashMap::new(),
            generation: 0,
            top_verse: None,
            requested_top: false,
            requested_bottom: false,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    pub fn events(&self) -> Arc<Mutex<Vec<BridgeEvent>>> {
        Arc::clone(&self.events)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn selection(&self) -> &VerseSelection {
        &self.selection
    }

    pub fn verse_position(&self, verse: &str) -> Option<f32> {
        self.verse_positions.get(verse).copied()
    }

    pub fn verse_positions(&self) -> &HashMap<String, f32> {
        &self.verse_positions
    }

    pub fn top_verse(&self) -> Option<&str> {
        self.top_verse.as_deref()
    }

    /// Content requested before this call becomes stale.
    pub fn begin_page_change(&mut self) -> u64 {
        self.generation += 1;
        self.selection.cancel();
        self.requested_top = false;
        self.requested_bottom = false;
        debug!(generation = self.generation, "content generation advanced");
        self.generation
    }

    pub fn apply(&mut self, command: BridgeCommand) {
        match command {
            BridgeCommand::InsertContent(chunk) => {
                self.insert_content(chunk);
            }
            BridgeCommand::ReplaceContent { markup, generation } => {
                self.replace_content(&markup, generation);
            }
            BridgeCommand::RegisterVersePositions { positions, mode } => {
                self.register_verse_positions(positions, mode)
            }
            BridgeCommand::ScrollToVerse(verse) => {
                self.scroll_to_verse(&verse);
            }
            BridgeCommand::SetToolbarOffset(offset) => self.set_toolbar_offset(offset),
            BridgeCommand::HighlightVerse(verse) => self.selection.highlight(&verse),
            BridgeCommand::UnhighlightVerse(verse) => self.selection.unhighlight(&verse),
            BridgeCommand::ClearVerseHighlight => self.selection.clear(),
            BridgeCommand::EnableVerseTouchSelection => {
                self.selection.set_mode(SelectionMode::TouchSelect)
            }
            BridgeCommand::EnableVerseLongTouchSelectionMode => {
                self.selection.set_mode(SelectionMode::LongPressSelect)
            }
            BridgeCommand::DisableVerseTouchSelection => self.selection.set_mode(SelectionMode::Off),
            BridgeCommand::Scroll(offset) => {
                self.on_scroll(offset);
            }
            BridgeCommand::Gesture { cursor, gesture } => {
                self.gesture_in_view(cursor, gesture);
            }
        }
    }

    fn accepts(&self, generation: u64) -> bool {
        if generation == self.generation {
            return true;
        }
        warn!(
            generation,
            current = self.generation,
            "ignoring content loaded for an earlier page"
        );
        self.events.lock().push(BridgeEvent::ContentRejected {
            generation,
            current: self.generation,
        });
        false
    }

    /// Returns false when the chunk belongs to an earlier generation.
    pub fn insert_content(&mut self, chunk: ContentChunk) -> bool {
        if !self.accepts(chunk.generation) {
            return false;
        }
        match chunk.direction {
            Direction::Top => self.insert_at_top(&chunk.markup),
            Direction::Bottom => self.insert_at_end(&chunk.markup),
        }
        true
    }

    /// Prepends without moving what the reader sees.
    pub fn insert_at_top(&mut self, markup: &str) {
        let old_scroll = self.surface.scroll_offset();
        let anchor = self.surface.anchor_at(old_scroll);
        let old_anchor = anchor.and_then(|block| self.surface.element_offset(block));

        let added = self.surface.prepend(markup);

        let new_anchor = anchor.and_then(|block| self.surface.element_offset(block));
        let delta = match (old_anchor, new_anchor) {
            (Some(old), Some(new)) => new - old,
            _ => 0.0,
        };
        for position in self.verse_positions.values_mut() {
            *position += delta;
        }
        self.verse_positions.extend(added);
        self.surface.set_scroll_offset(old_scroll + delta);
        self.requested_top = false;
        debug!(delta, scroll = self.surface.scroll_offset(), "content inserted at top");
    }

    pub fn insert_at_end(&mut self, markup: &str) {
        let added = self.surface.append(markup);
        self.verse_positions.extend(added);
        self.requested_bottom = false;
        debug!(height = self.surface.content_height(), "content inserted at end");
    }

    /// Returns false when `generation` is stale.
    pub fn replace_content(&mut self, markup: &str, generation: u64) -> bool {
        if !self.accepts(generation) {
            return false;
        }
        self.verse_positions = self.surface.replace(markup);
        self.selection.cancel();
        self.top_verse = None;
        self.requested_top = false;
        self.requested_bottom = false;
        debug!(verses = self.verse_positions.len(), "content replaced");
        true
    }

    pub fn register_verse_positions(&mut self, positions: HashMap<String, f32>, mode: PositionMode) {
        match mode {
            PositionMode::Replace => self.verse_positions = positions,
            PositionMode::Merge => self.verse_positions.extend(positions),
        }
    }

    /// Returns false, leaving the scroll offset alone, for an unknown verse.
    pub fn scroll_to_verse(&mut self, verse: &str) -> bool {
        let Some(position) = self.verse_position(verse) else {
            debug!(verse, "no position recorded for verse");
            return false;
        };
        let target = position - self.settings.toolbar_offset - self.settings.target_line;
        self.surface.set_scroll_offset(target);
        true
    }

    pub fn set_toolbar_offset(&mut self, offset: f32) {
        self.settings.toolbar_offset = offset.max(0.0);
    }

    pub fn set_long_press(&mut self, long_press: Duration) {
        self.settings.long_press = long_press;
        self.selection.set_long_press(long_press);
    }

    /// Records a host scroll and asks for more content near either edge.
    pub fn on_scroll(&mut self, offset: f32) -> ScrollReport {
        self.surface.set_scroll_offset(offset);
        let offset = self.surface.scroll_offset();

        let top_verse = self.surface.verse_at(offset + self.settings.toolbar_offset);
        if top_verse != self.top_verse {
            if let Some(verse) = &top_verse {
                self.events
                    .lock()
                    .push(BridgeEvent::TopVerseChanged(verse.clone()));
            }
            self.top_verse = top_verse.clone();
        }

        let mut requests = Vec::new();
        if self.surface.content_height() > 0.0 {
            let threshold = self.settings.edge_threshold;
            if offset <= threshold && !self.requested_top {
                self.requested_top = true;
                requests.push(Direction::Top);
            }
            if self.surface.max_scroll_offset() - offset <= threshold && !self.requested_bottom {
                self.requested_bottom = true;
                requests.push(Direction::Bottom);
            }
        }
        if !requests.is_empty() {
            let mut events = self.events.lock();
            for &direction in &requests {
                events.push(BridgeEvent::NeedsContent {
                    direction,
                    generation: self.generation,
                });
            }
        }

        ScrollReport {
            offset,
            top_verse,
            requests,
        }
    }

    pub fn gesture_in_view(&mut self, cursor: f32, gesture: Gesture) -> bool {
        let offset = self.surface.scroll_offset() + cursor;
        self.gesture_at(offset, gesture)
    }

    /// Applies a gesture to the verse shown at `offset` in content coordinates.
    pub fn gesture_at(&mut self, offset: f32, gesture: Gesture) -> bool {
        match self.surface.verse_at(offset) {
            Some(verse) => self.selection.gesture(&verse, gesture),
            None => false,
        }
    }
}

/// One-shot readiness signal that can be awaited any number of times.
#[derive(Clone)]
pub struct ReadyGate {
    tx: Arc<watch::Sender<bool>>,
}

impl ReadyGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn open(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        if rx.wait_for(|ready| *ready).await.is_err() {
            warn!("ready gate closed before opening");
        }
    }
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::new()
    }
}

struct Shared<S> {
    bridge: ContentBridge<S>,
    pending: VecDeque<BridgeCommand>,
    ready: bool,
}

/// Cloneable facade over a [`ContentBridge`]. Commands submitted before
/// [`BridgeHandle::initialize`] are queued and replayed in order.
pub struct BridgeHandle<S> {
    shared: Arc<Mutex<Shared<S>>>,
    gate: ReadyGate,
}

impl<S> Clone for BridgeHandle<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            gate: self.gate.clone(),
        }
    }
}

impl<S: Surface> BridgeHandle<S> {
    pub fn new(bridge: ContentBridge<S>) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                bridge,
                pending: VecDeque::new(),
                ready: false,
            })),
            gate: ReadyGate::new(),
        }
    }

    pub fn submit(&self, command: BridgeCommand) {
        let mut shared = self.shared.lock();
        if shared.ready {
            shared.bridge.apply(command);
        } else {
            debug!(?command, "bridge not ready, queueing command");
            shared.pending.push_back(command);
        }
    }

    pub fn initialize(&self) {
        let mut shared = self.shared.lock();
        if shared.ready {
            return;
        }
        let flushed = shared.pending.len();
        while let Some(command) = shared.pending.pop_front() {
            shared.bridge.apply(command);
        }
        shared.ready = true;
        drop(shared);
        self.gate.open();
        info!(flushed, "content bridge ready");
    }

    pub fn is_ready(&self) -> bool {
        self.gate.is_open()
    }

    pub async fn when_ready(&self) {
        self.gate.wait().await
    }

    pub fn pending(&self) -> usize {
        self.shared.lock().pending.len()
    }

    pub fn generation(&self) -> u64 {
        self.shared.lock().bridge.generation()
    }

    /// Queues the scroll until [`BridgeHandle::initialize`], returning `None`.
    pub fn on_scroll(&self, offset: f32) -> Option<ScrollReport> {
        let mut shared = self.shared.lock();
        if !shared.ready {
            debug!(offset, "bridge not ready, queueing scroll");
            shared.pending.push_back(BridgeCommand::Scroll(offset));
            return None;
        }
        Some(shared.bridge.on_scroll(offset))
    }

    /// Queues the gesture until [`BridgeHandle::initialize`], returning `None`.
    pub fn gesture(&self, cursor: f32, gesture: Gesture) -> Option<bool> {
        let mut shared = self.shared.lock();
        if !shared.ready {
            debug!(cursor, ?gesture, "bridge not ready, queueing gesture");
            shared.pending.push_back(BridgeCommand::Gesture { cursor, gesture });
            return None;
        }
        Some(shared.bridge.gesture_in_view(cursor, gesture))
    }

    pub fn with_bridge<R>(&self, f: impl FnOnce(&mut ContentBridge<S>) -> R) -> R {
        f(&mut self.shared.lock().bridge)
    }
}

impl<S: Surface + 'static> PageChangeObserver for BridgeHandle<S> {
    fn on_page_change(&self, phase: ChangePhase) -> Result<()> {
        if phase == ChangePhase::Before {
            self.shared.lock().bridge.begin_page_change();
        }
        Ok(())
    }
}
