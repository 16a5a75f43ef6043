use std::io::{self, Write};

use anyhow::Result;
use bibleview_bridge::{SurfaceLine, VerseSelection};
use bibleview_core::BookCategory;
use crossterm::{
    cursor,
    event::{Event, KeyCode, KeyEvent, KeyModifiers},
    queue,
    style::{Attribute, Print, SetAttribute},
    terminal::{Clear, ClearType},
};
use tracing::trace;

pub struct TerminalPainter<W: Write> {
    writer: W,
}

#[derive(Debug, Clone, Copy)]
pub struct DrawParams {
    pub columns: u16,
    pub rows: u16,
    /// Row that gestures act on; drawn underlined.
    pub cursor_row: Option<u16>,
}

impl DrawParams {
    pub fn clamped(columns: u16, rows: u16) -> Self {
        Self {
            columns: columns.max(1),
            rows: rows.max(1),
            cursor_row: None,
        }
    }

    pub fn with_cursor(mut self, row: u16) -> Self {
        self.cursor_row = Some(row.min(self.rows.saturating_sub(1)));
        self
    }
}

impl<W: Write> TerminalPainter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Draws viewport lines from the top row down. Lines of highlighted
    /// verses are shown in reverse video.
    pub fn draw(
        &mut self,
        lines: &[SurfaceLine],
        selection: &VerseSelection,
        params: DrawParams,
    ) -> Result<()> {
        let columns = usize::from(params.columns);
        for row in 0..params.rows {
            queue!(
                self.writer,
                cursor::MoveTo(0, row),
                Clear(ClearType::CurrentLine)
            )?;
            let Some(line) = lines.get(usize::from(row)) else {
                continue;
            };

            let highlighted = line
                .verse
                .as_deref()
                .is_some_and(|verse| selection.is_highlighted(verse));
            let under_cursor = params.cursor_row == Some(row);
            if highlighted {
                queue!(self.writer, SetAttribute(Attribute::Reverse))?;
            }
            if under_cursor {
                queue!(self.writer, SetAttribute(Attribute::Underlined))?;
            }
            let text: String = line.text.chars().take(columns).collect();
            queue!(self.writer, Print(text))?;
            if highlighted || under_cursor {
                queue!(self.writer, SetAttribute(Attribute::Reset))?;
            }
        }
        trace!(rows = params.rows, lines = lines.len(), "viewport drawn");
        self.writer.flush()?;
        Ok(())
    }

    pub fn begin_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026h")?;
        Ok(())
    }

    /// The terminal renders everything buffered since `begin_sync_update` at once.
    pub fn end_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Scroll { lines: isize },
    ScrollPages { pages: isize },
    ScrollToStart,
    ScrollToEnd,
    NextPage { count: usize },
    PrevPage { count: usize },
    SwitchSlot(BookCategory),
    EnableTouchSelection,
    EnableLongPressSelection,
    DisableSelection,
    Tap,
    LongPress,
    ClearHighlights,
    BeginKeyPrompt,
    KeyPromptChanged { text: String },
    KeyPromptSubmit { text: String },
    KeyPromptCancel,
    Quit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    KeyPrompt,
}

#[derive(Debug, Default)]
pub struct EventMapper {
    pending_count: Option<usize>,
    pending_digits: String,
    char_stack: String,
    mode: InputMode,
    prompt_buffer: String,
}

impl EventMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&mut self, mode: InputMode) {
        if self.mode != mode {
            self.reset_count();
            self.reset_char_stack();
            self.prompt_buffer.clear();
            self.mode = mode;
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        match self.mode {
            InputMode::Normal => self.map_event_normal(event),
            InputMode::KeyPrompt => self.map_event_prompt(event),
        }
    }

    fn map_event_normal(&mut self, event: Event) -> UiEvent {
        let Event::Key(KeyEvent {
            code, modifiers, ..
        }) = event
        else {
            return UiEvent::None;
        };

        if self.char_stack == "s" {
            self.reset_char_stack();
            self.reset_count();
            return match code {
                KeyCode::Char('b') => UiEvent::SwitchSlot(BookCategory::Bible),
                KeyCode::Char('c') => UiEvent::SwitchSlot(BookCategory::Commentary),
                KeyCode::Char('d') => UiEvent::SwitchSlot(BookCategory::Dictionary),
                KeyCode::Char('m') => UiEvent::SwitchSlot(BookCategory::Map),
                KeyCode::Char('g') => UiEvent::SwitchSlot(BookCategory::GeneralBook),
                _ => UiEvent::None,
            };
        }

        match (code, modifiers) {
            (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                if let Some(digit) = c.to_digit(10) {
                    self.push_digit(digit as usize);
                }
                UiEvent::None
            }
            (KeyCode::Char('s'), KeyModifiers::NONE) => {
                self.reset_count();
                self.char_stack.push('s');
                UiEvent::None
            }
            (KeyCode::Char('j'), KeyModifiers::NONE) | (KeyCode::Down, _) => {
                let count = self.take_count() as isize;
                UiEvent::Scroll { lines: count }
            }
            (KeyCode::Char('k'), KeyModifiers::NONE) | (KeyCode::Up, _) => {
                let count = self.take_count() as isize;
                UiEvent::Scroll { lines: -count }
            }
            (KeyCode::Char(' '), _) | (KeyCode::PageDown, _) => {
                let count = self.take_count() as isize;
                UiEvent::ScrollPages { pages: count }
            }
            (KeyCode::Char('b'), KeyModifiers::NONE) | (KeyCode::PageUp, _) => {
                let count = self.take_count() as isize;
                UiEvent::ScrollPages { pages: -count }
            }
            (KeyCode::Char('n'), KeyModifiers::NONE) | (KeyCode::Char(']'), _) => {
                let count = self.take_count();
                UiEvent::NextPage { count }
            }
            (KeyCode::Char('p'), KeyModifiers::NONE) | (KeyCode::Char('['), _) => {
                let count = self.take_count();
                UiEvent::PrevPage { count }
            }
            (KeyCode::Char('g'), KeyModifiers::NONE) | (KeyCode::Home, _) => {
                self.reset_count();
                UiEvent::ScrollToStart
            }
            (KeyCode::Char('G'), _) | (KeyCode::End, _) => {
                self.reset_count();
                UiEvent::ScrollToEnd
            }
            (KeyCode::Char('v'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::EnableTouchSelection
            }
            (KeyCode::Char('V'), _) => {
                self.reset_count();
                UiEvent::EnableLongPressSelection
            }
            (KeyCode::Esc, _) => {
                self.reset_count();
                UiEvent::DisableSelection
            }
            (KeyCode::Enter, _) => {
                self.reset_count();
                UiEvent::Tap
            }
            (KeyCode::Char('x'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::LongPress
            }
            (KeyCode::Char('c'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::ClearHighlights
            }
            (KeyCode::Char(':'), _) => {
                self.set_mode(InputMode::KeyPrompt);
                UiEvent::BeginKeyPrompt
            }
            (KeyCode::Char('q'), _) => {
                self.reset_count();
                UiEvent::Quit
            }
            (KeyCode::Char('c'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                UiEvent::Quit
            }
            _ => {
                self.reset_count();
                UiEvent::None
            }
        }
    }

    fn map_event_prompt(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(KeyEvent {
                code, modifiers, ..
            }) => match (code, modifiers) {
                (KeyCode::Esc, _) => {
                    self.set_mode(InputMode::Normal);
                    UiEvent::KeyPromptCancel
                }
                (KeyCode::Enter, _) => {
                    let text = self.prompt_buffer.clone();
                    self.set_mode(InputMode::Normal);
                    UiEvent::KeyPromptSubmit { text }
                }
                (KeyCode::Backspace, _) => {
                    self.prompt_buffer.pop();
                    UiEvent::KeyPromptChanged {
                        text: self.prompt_buffer.clone(),
                    }
                }
                (KeyCode::Char(c), mods) if mods.is_empty() || mods == KeyModifiers::SHIFT => {
                    self.prompt_buffer.push(c);
                    UiEvent::KeyPromptChanged {
                        text: self.prompt_buffer.clone(),
                    }
                }
                _ => UiEvent::None,
            },
            _ => UiEvent::None,
        }
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        self.pending_count = Some(current.saturating_mul(10).saturating_add(digit));
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self
            .pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1);
        self.pending_digits.clear();
        count
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    fn reset_char_stack(&mut self) {
        self.char_stack.clear();
    }

    pub fn pending_input(&self) -> Option<String> {
        if self.mode == InputMode::KeyPrompt {
            return Some(format!(":{}", self.prompt_buffer));
        }
        let pending = format!("{}{}", self.pending_digits, self.char_stack);
        if pending.is_empty() {
            None
        } else {
            Some(pending)
        }
    }
}

pub fn write_status_line<W: Write>(writer: &mut W, row: u16, label: &str) -> io::Result<()> {
    queue!(
        writer,
        cursor::MoveTo(0, row),
        Clear(ClearType::CurrentLine),
        SetAttribute(Attribute::Bold),
        Print(label),
        SetAttribute(Attribute::Reset)
    )?;
    writer.flush()
}
