use std::collections::BTreeSet;
use std::time::Duration;

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionMode {
    #[default]
    Off,
    TouchSelect,
    LongPressSelect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    Tap,
    Press(Duration),
}

/// Highlighted verses plus the selection mode that decides how gestures act.
///
/// Highlights survive mode changes and cancellation; only
/// [`VerseSelection::clear`] empties the set.
#[derive(Debug, Clone)]
pub struct VerseSelection {
    highlighted: BTreeSet<String>,
    mode: SelectionMode,
    selecting: bool,
    long_press: Duration,
}

impl VerseSelection {
    pub fn new(long_press: Duration) -> Self {
        Self {
            highlighted: BTreeSet::new(),
            mode: SelectionMode::Off,
            selecting: false,
            long_press,
        }
    }

    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    /// True while a long press has started a selection that taps extend.
    pub fn is_selecting(&self) -> bool {
        self.selecting
    }

    /// Switching between the two selecting modes passes through `Off`.
    /// Re-enabling the current mode keeps an active selection.
    pub fn set_mode(&mut self, mode: SelectionMode) {
        if self.mode == mode {
            return;
        }
        if self.mode != SelectionMode::Off && mode != SelectionMode::Off {
            self.set_mode(SelectionMode::Off);
        }
        debug!(from = ?self.mode, to = ?mode, "selection mode changed");
        self.mode = mode;
        self.selecting = false;
    }

    pub fn set_long_press(&mut self, long_press: Duration) {
        self.long_press = long_press;
    }

    pub fn highlight(&mut self, verse: &str) {
        self.highlighted.insert(verse.to_owned());
    }

    pub fn unhighlight(&mut self, verse: &str) {
        self.highlighted.remove(verse);
    }

    pub fn clear(&mut self) {
        self.highlighted.clear();
    }

    pub fn is_highlighted(&self, verse: &str) -> bool {
        self.highlighted.contains(verse)
    }

    pub fn highlighted(&self) -> impl Iterator<Item = &str> {
        self.highlighted.iter().map(String::as_str)
    }

    /// Leaves an active long-press selection. Mode and highlights stay.
    pub fn cancel(&mut self) {
        if self.selecting {
            debug!("verse selection cancelled");
        }
        self.selecting = false;
    }

    /// Applies a gesture on `verse`. Returns whether the highlight set changed.
    pub fn gesture(&mut self, verse: &str, gesture: Gesture) -> bool {
        match (self.mode, gesture) {
            (SelectionMode::Off, _) => false,
            (SelectionMode::TouchSelect, Gesture::Tap) => self.toggle(verse),
            (SelectionMode::TouchSelect, Gesture::Press(_)) => false,
            (SelectionMode::LongPressSelect, Gesture::Press(held)) => {
                if held < self.long_press {
                    return false;
                }
                self.selecting = true;
                self.highlighted.insert(verse.to_owned())
            }
            (SelectionMode::LongPressSelect, Gesture::Tap) if self.selecting => self.toggle(verse),
            (SelectionMode::LongPressSelect, Gesture::Tap) => false,
        }
    }

    fn toggle(&mut self, verse: &str) -> bool {
        if !self.highlighted.remove(verse) {
            self.highlighted.insert(verse.to_owned());
        }
        true
    }
}
