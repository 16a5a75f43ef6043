//! Layout surfaces the bridge drives.
//!
//! [`LayoutSurface`] lays markup out as wrapped text lines. Every markup line
//! becomes one block; a block that starts with a `<v id=".."/>` marker belongs
//! to that verse.

use std::collections::HashMap;

/// Identifies a laid-out block for as long as it stays on the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(u64);

pub trait Surface: Send {
    fn scroll_offset(&self) -> f32;
    /// Clamped to `0..=max_scroll_offset()`.
    fn set_scroll_offset(&mut self, offset: f32);
    fn viewport_height(&self) -> f32;
    fn content_height(&self) -> f32;

    fn max_scroll_offset(&self) -> f32 {
        (self.content_height() - self.viewport_height()).max(0.0)
    }

    /// Each insertion returns the positions of the verses it added, measured
    /// after the insertion.
    fn prepend(&mut self, markup: &str) -> HashMap<String, f32>;
    fn append(&mut self, markup: &str) -> HashMap<String, f32>;
    fn replace(&mut self, markup: &str) -> HashMap<String, f32>;

    /// Block covering `offset`, or the last block above it.
    fn anchor_at(&self, offset: f32) -> Option<BlockId>;
    fn element_offset(&self, block: BlockId) -> Option<f32>;
    fn verse_at(&self, offset: f32) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceLine {
    pub verse: Option<String>,
    pub text: String,
}

#[derive(Debug)]
struct Block {
    id: BlockId,
    verse: Option<String>,
    lines: Vec<String>,
    top: f32,
}

#[derive(Debug)]
pub struct LayoutSurface {
    columns: usize,
    line_height: f32,
    viewport_height: f32,
    scroll: f32,
    blocks: Vec<Block>,
    next_id: u64,
}

impl LayoutSurface {
    pub fn new(columns: usize, viewport_height: f32, line_height: f32) -> Self {
        Self {
            columns: columns.max(1),
            line_height: if line_height > 0.0 { line_height } else { 1.0 },
            viewport_height: viewport_height.max(0.0),
            scroll: 0.0,
            blocks: Vec::new(),
            next_id: 0,
        }
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn line_height(&self) -> f32 {
        self.line_height
    }

    /// Re-wraps everything at the new width, keeping the top block in view.
    pub fn resize(&mut self, columns: usize, viewport_height: f32) {
        let anchor = self.anchor_at(self.scroll);
        let within = anchor
            .and_then(|block| self.element_offset(block))
            .map(|top| self.scroll - top)
            .unwrap_or(0.0);

        self.columns = columns.max(1);
        self.viewport_height = viewport_height.max(0.0);
        for block in &mut self.blocks {
            let text = block.lines.join(" ");
            block.lines = wrap(&text, self.columns);
        }
        self.relayout();

        let top = anchor.and_then(|block| self.element_offset(block)).unwrap_or(0.0);
        self.set_scroll_offset(top + within);
    }

    /// Lines visible in the viewport, top to bottom.
    pub fn visible_lines(&self) -> Vec<SurfaceLine> {
        let bottom = self.scroll + self.viewport_height;
        let mut lines = Vec::new();
        for block in &self.blocks {
            for (row, text) in block.lines.iter().enumerate() {
                let top = block.top + row as f32 * self.line_height;
                if top + self.line_height <= self.scroll || top >= bottom {
                    continue;
                }
                lines.push(SurfaceLine {
                    verse: block.verse.clone(),
                    text: text.clone(),
                });
            }
        }
        lines
    }

    fn parse(&mut self, markup: &str) -> Vec<Block> {
        let mut blocks = Vec::new();
        for raw in markup.lines() {
            let (verse, body) = split_verse_marker(raw.trim());
            let text = decode_entities(&strip_tags(body));
            let text = text.trim();
            if text.is_empty() && verse.is_none() {
                continue;
            }
            let id = BlockId(self.next_id);
            self.next_id += 1;
            blocks.push(Block {
                id,
                verse,
                lines: wrap(text, self.columns),
                top: 0.0,
            });
        }
        blocks
    }

    fn relayout(&mut self) {
        let mut top = 0.0;
        for block in &mut self.blocks {
            block.top = top;
            top += block.lines.len() as f32 * self.line_height;
        }
    }

    fn positions_of(&self, ids: &[BlockId]) -> HashMap<String, f32> {
        self.blocks
            .iter()
            .filter(|block| ids.contains(&block.id))
            .filter_map(|block| block.verse.clone().map(|verse| (verse, block.top)))
            .collect()
    }

    fn block_index_at(&self, offset: f32) -> Option<usize> {
        if self.blocks.is_empty() {
            return None;
        }
        let index = self
            .blocks
            .partition_point(|block| block.top <= offset)
            .saturating_sub(1);
        Some(index)
    }
}

impl Surface for LayoutSurface {
    fn scroll_offset(&self) -> f32 {
        self.scroll
    }

    fn set_scroll_offset(&mut self, offset: f32) {
        let offset = if offset.is_finite() { offset } else { 0.0 };
        self.scroll = offset.clamp(0.0, self.max_scroll_offset());
    }

    fn viewport_height(&self) -> f32 {
        self.viewport_height
    }

    fn content_height(&self) -> f32 {
        self.blocks
            .last()
            .map(|block| block.top + block.lines.len() as f32 * self.line_height)
            .unwrap_or(0.0)
    }

    fn prepend(&mut self, markup: &str) -> HashMap<String, f32> {
        let mut blocks = self.parse(markup);
        let ids: Vec<_> = blocks.iter().map(|block| block.id).collect();
        blocks.append(&mut self.blocks);
        self.blocks = blocks;
        self.relayout();
        self.positions_of(&ids)
    }

    fn append(&mut self, markup: &str) -> HashMap<String, f32> {
        let blocks = self.parse(markup);
        let ids: Vec<_> = blocks.iter().map(|block| block.id).collect();
        self.blocks.extend(blocks);
        self.relayout();
        self.positions_of(&ids)
    }

    fn replace(&mut self, markup: &str) -> HashMap<String, f32> {
        self.blocks = self.parse(markup);
        self.relayout();
        self.scroll = 0.0;
        let ids: Vec<_> = self.blocks.iter().map(|block| block.id).collect();
        self.positions_of(&ids)
    }

    fn anchor_at(&self, offset: f32) -> Option<BlockId> {
        self.block_index_at(offset).map(|index| self.blocks[index].id)
    }

    fn element_offset(&self, block: BlockId) -> Option<f32> {
        self.blocks
            .iter()
            .find(|candidate| candidate.id == block)
            .map(|block| block.top)
    }

    fn verse_at(&self, offset: f32) -> Option<String> {
        let index = self.block_index_at(offset)?;
        // headings above the first verse count as that verse
        self.blocks[index..]
            .iter()
            .chain(self.blocks[..index].iter().rev())
            .find_map(|block| block.verse.clone())
    }
}

fn split_verse_marker(line: &str) -> (Option<String>, &str) {
    let Some(rest) = line.strip_prefix("<v id=\"") else {
        return (None, line);
    };
    match rest.split_once("\"/>") {
        Some((id, body)) => (Some(decode_entities(id)), body),
        None => (None, line),
    }
}

fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

fn wrap(text: &str, columns: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let mut word = word;
        while word.chars().count() > columns {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let split = word
                .char_indices()
                .nth(columns)
                .map(|(index, _)| index)
                .unwrap_or(word.len());
            lines.push(word[..split].to_owned());
            word = &word[split..];
        }
        if word.is_empty() {
            continue;
        }
        let needed = current.chars().count() + usize::from(!current.is_empty()) + word.chars().count();
        if needed > columns && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAPTER: &str = "<h2>Genesis 1</h2>\n\
        <v id=\"Gen.1.1\"/>In the beginning God created the heaven and the earth.\n\
        <v id=\"Gen.1.2\"/>And the earth was without form, and void.";

    #[test]
    fn wrap_breaks_on_words_and_long_tokens() {
        assert_eq!(wrap("a bb ccc", 4), vec!["a bb", "ccc"]);
        assert_eq!(wrap("abcdefgh", 3), vec!["abc", "def", "gh"]);
        assert_eq!(wrap("", 10), vec![String::new()]);
    }

    #[test]
    fn verse_markers_and_entities_are_parsed() {
        assert_eq!(
            split_verse_marker("<v id=\"Gen.1.1\"/>text"),
            (Some("Gen.1.1".to_owned()), "text")
        );
        assert_eq!(split_verse_marker("<h2>x</h2>"), (None, "<h2>x</h2>"));
        assert_eq!(decode_entities(&strip_tags("<b>A &amp;lt; B</b>")), "A &lt; B");
    }

    #[test]
    fn replace_measures_verses() {
        let mut surface = LayoutSurface::new(20, 2.0, 1.0);
        let positions = surface.replace(CHAPTER);

        assert_eq!(positions["Gen.1.1"], 1.0);
        // "In the beginning God" / "created the heaven" / "and the earth."
        assert_eq!(positions["Gen.1.2"], 4.0);
        assert_eq!(surface.content_height(), 7.0);
        assert_eq!(surface.verse_at(0.0).as_deref(), Some("Gen.1.1"));
        assert_eq!(surface.verse_at(4.5).as_deref(), Some("Gen.1.2"));
    }

    #[test]
    fn scroll_offset_is_clamped() {
        let mut surface = LayoutSurface::new(20, 2.0, 1.0);
        surface.replace(CHAPTER);
        surface.set_scroll_offset(100.0);
        assert_eq!(surface.scroll_offset(), 5.0);
        surface.set_scroll_offset(-3.0);
        assert_eq!(surface.scroll_offset(), 0.0);
        surface.set_scroll_offset(f32::NAN);
        assert_eq!(surface.scroll_offset(), 0.0);
    }

    #[test]
    fn prepend_moves_existing_blocks_down() {
        let mut surface = LayoutSurface::new(80, 2.0, 1.0);
        surface.replace(CHAPTER);
        let anchor = surface.anchor_at(1.0).unwrap();
        assert_eq!(surface.element_offset(anchor), Some(1.0));

        let added = surface.prepend("<v id=\"Gen.0.1\"/>before\n<v id=\"Gen.0.2\"/>also before");
        assert_eq!(added.len(), 2);
        assert_eq!(added["Gen.0.2"], 1.0);
        assert_eq!(surface.element_offset(anchor), Some(3.0));
    }

    #[test]
    fn visible_lines_follow_scroll() {
        let mut surface = LayoutSurface::new(20, 2.0, 1.0);
        surface.replace(CHAPTER);
        surface.set_scroll_offset(3.0);
        let lines = surface.visible_lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "and the earth.");
        assert_eq!(lines[1].verse.as_deref(), Some("Gen.1.2"));
    }
}
