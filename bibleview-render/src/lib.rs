use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bibleview_core::{
    BookCategory, Catalog, Document, DocumentRef, Key, KeyError, RenderError, TextRenderer,
};
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse document file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid document file {path:?}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

#[derive(Debug, Deserialize)]
struct DocumentFile {
    initials: String,
    name: Option<String>,
    category: BookCategory,
    #[serde(default = "default_language")]
    language: String,
    #[serde(default)]
    pages: Vec<PageFile>,
}

#[derive(Debug, Deserialize)]
struct PageFile {
    key: String,
    title: Option<String>,
    #[serde(default)]
    verses: Vec<VerseFile>,
}

#[derive(Debug, Deserialize)]
struct VerseFile {
    id: String,
    text: String,
}

fn default_language() -> String {
    "en".to_owned()
}

#[derive(Debug, Clone)]
pub struct Verse {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct Page {
    pub key: Key,
    pub title: String,
    pub verses: Vec<Verse>,
}

/// A document loaded from one TOML file of the catalog directory.
#[derive(Debug)]
pub struct CatalogDocument {
    initials: String,
    name: String,
    category: BookCategory,
    language: String,
    path: PathBuf,
    pages: Vec<Page>,
    // page keys and verse ids to page index
    index: HashMap<String, usize>,
    render_cache: Mutex<HashMap<(usize, bool), String>>,
}

impl CatalogDocument {
    pub fn from_toml_str(raw: &str, path: &Path) -> Result<Self, CatalogError> {
        let file: DocumentFile = toml::from_str(raw).map_err(|source| CatalogError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let invalid = |reason: String| CatalogError::Invalid {
            path: path.to_path_buf(),
            reason,
        };

        let initials = file.initials.trim().to_owned();
        if initials.is_empty() {
            return Err(invalid("initials must not be empty".to_owned()));
        }

        let mut index = HashMap::new();
        let mut pages = Vec::with_capacity(file.pages.len());
        for (position, page) in file.pages.into_iter().enumerate() {
            if index.insert(page.key.clone(), position).is_some() {
                return Err(invalid(format!("duplicate key {}", page.key)));
            }
            for verse in &page.verses {
                if index.insert(verse.id.clone(), position).is_some() {
                    return Err(invalid(format!("duplicate verse {}", verse.id)));
                }
            }
            pages.push(Page {
                title: page.title.unwrap_or_else(|| page.key.clone()),
                key: Key::new(page.key),
                verses: page
                    .verses
                    .into_iter()
                    .map(|verse| Verse {
                        id: verse.id,
                        text: verse.text,
                    })
                    .collect(),
            });
        }

        Ok(Self {
            name: file.name.unwrap_or_else(|| initials.clone()),
            initials,
            category: file.category,
            language: file.language,
            path: path.to_path_buf(),
            pages,
            index,
            render_cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw, path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    fn page_index(&self, key: &Key) -> Option<usize> {
        self.index
            .get(key.osis_id())
            .copied()
            .filter(|&position| self.pages[position].key == *key)
    }

    /// Markup for one page: a heading line, then one line per verse.
    pub fn render_page(&self, key: &Key, as_fragment: bool) -> Option<String> {
        let position = self.page_index(key)?;
        if let Some(cached) = self.render_cache.lock().get(&(position, as_fragment)) {
            return Some(cached.clone());
        }

        let page = &self.pages[position];
        let mut lines = Vec::with_capacity(page.verses.len() + 2);
        if !as_fragment {
            lines.push(format!("<h1>{}</h1>", escape(&self.name)));
        }
        lines.push(format!("<h2>{}</h2>", escape(&page.title)));
        for verse in &page.verses {
            lines.push(format!(
                "<v id=\"{}\"/>{}",
                escape(&verse.id),
                escape(&verse.text)
            ));
        }
        let markup = lines.join("\n");

        self.render_cache
            .lock()
            .insert((position, as_fragment), markup.clone());
        Some(markup)
    }

    #[cfg(test)]
    fn cached_renders(&self) -> usize {
        self.render_cache.lock().len()
    }
}

impl Document for CatalogDocument {
    fn initials(&self) -> &str {
        &self.initials
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> BookCategory {
        self.category
    }

    fn language(&self) -> &str {
        &self.language
    }

    /// Accepts page keys and verse ids; a verse id resolves to its page.
    fn parse_key(&self, text: &str) -> Result<Key, KeyError> {
        let text = text.trim();
        if text.is_empty() || text.contains(char::is_whitespace) {
            return Err(KeyError::Malformed(text.to_owned()));
        }
        self.index
            .get(text)
            .map(|&position| self.pages[position].key.clone())
            .ok_or_else(|| KeyError::NotFound {
                document: self.initials.clone(),
                key: text.to_owned(),
            })
    }

    fn contains(&self, key: &Key) -> bool {
        self.page_index(key).is_some()
    }

    fn first_key(&self) -> Option<Key> {
        self.pages.first().map(|page| page.key.clone())
    }

    fn key_plus(&self, key: &Key, num: isize) -> Option<Key> {
        let position = self.page_index(key)?;
        let target = position.checked_add_signed(num)?;
        self.pages.get(target).map(|page| page.key.clone())
    }

    fn deactivate(&self) {
        let mut cache = self.render_cache.lock();
        if !cache.is_empty() {
            debug!(document = %self.initials, entries = cache.len(), "dropping render cache");
            cache.clear();
        }
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Catalog backed by a directory of `*.toml` document files.
pub struct FileCatalog {
    root: PathBuf,
    documents: RwLock<Vec<Arc<CatalogDocument>>>,
}

impl FileCatalog {
    pub fn open(root: PathBuf) -> Result<Self, CatalogError> {
        let catalog = Self {
            root,
            documents: RwLock::new(Vec::new()),
        };
        catalog.reload()?;
        Ok(catalog)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rescans the directory. Files that fail to load are skipped.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub fn reload(&self) -> Result<usize, CatalogError> {
        let entries = fs::read_dir(&self.root).map_err(|source| CatalogError::Io {
            path: self.root.clone(),
            source,
        })?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();

        let loaded: Vec<_> = paths
            .par_iter()
            .map(|path| CatalogDocument::load(path))
            .collect();

        let mut documents: Vec<Arc<CatalogDocument>> = Vec::with_capacity(loaded.len());
        for result in loaded {
            match result {
                Ok(document) => {
                    if documents
                        .iter()
                        .any(|existing| existing.initials == document.initials)
                    {
                        warn!(
                            document = %document.initials,
                            path = %document.path.display(),
                            "duplicate document initials, keeping the first"
                        );
                        continue;
                    }
                    documents.push(Arc::new(document));
                }
                Err(err) => warn!(error = %err, "skipping document file"),
            }
        }

        let count = documents.len();
        info!(count, "loaded document catalog");
        *self.documents.write() = documents;
        Ok(count)
    }

    pub fn entry(&self, initials: &str) -> Option<Arc<CatalogDocument>> {
        self.documents
            .read()
            .iter()
            .find(|document| document.initials == initials)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }
}

impl Catalog for FileCatalog {
    fn resolve_document(&self, initials: &str) -> Option<DocumentRef> {
        self.entry(initials).map(|document| document as DocumentRef)
    }

    fn list_documents(&self, category: BookCategory) -> Vec<DocumentRef> {
        self.documents
            .read()
            .iter()
            .filter(|document| document.category == category)
            .map(|document| Arc::clone(document) as DocumentRef)
            .collect()
    }
}

/// Text-rendering facade over the documents of a [`FileCatalog`].
pub struct MarkupRenderer {
    catalog: Arc<FileCatalog>,
}

impl MarkupRenderer {
    pub fn new(catalog: Arc<FileCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl TextRenderer for MarkupRenderer {
    #[instrument(skip(self, document), fields(document = document.initials()))]
    async fn render(
        &self,
        document: &dyn Document,
        key: Option<&Key>,
        as_fragment: bool,
    ) -> Result<String, RenderError> {
        let entry = self
            .catalog
            .entry(document.initials())
            .ok_or_else(|| RenderError::Content {
                document: document.initials().to_owned(),
                message: "document is not installed".to_owned(),
            })?;
        let key = key.ok_or_else(|| RenderError::Content {
            document: document.initials().to_owned(),
            message: "no key selected".to_owned(),
        })?;
        entry
            .render_page(key, as_fragment)
            .ok_or_else(|| RenderError::UnknownKey {
                document: document.initials().to_owned(),
                key: key.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const KJV: &str = r#"
initials = "KJV"
name = "King James Version"
category = "bible"

[[pages]]
key = "Gen.1"
title = "Genesis 1"

[[pages.verses]]
id = "Gen.1.1"
text = "In the beginning God created the heaven and the earth."

[[pages.verses]]
id = "Gen.1.2"
text = "And the earth was without form, and void."

[[pages]]
key = "Gen.2"

[[pages.verses]]
id = "Gen.2.1"
text = "Thus the heavens and the earth were finished."
"#;

    const EASTON: &str = r#"
initials = "Easton"
category = "dictionary"
language = "en"

[[pages]]
key = "Aaron"

[[pages.verses]]
id = "Aaron.1"
text = "The eldest son of Amram & Jochebed <a Levite>."
"#;

    fn catalog_dir() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("kjv.toml"), KJV).unwrap();
        std::fs::write(dir.path().join("easton.toml"), EASTON).unwrap();
        std::fs::write(dir.path().join("broken.toml"), "initials = ").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        dir
    }

    #[test]
    fn catalog_skips_broken_files() {
        let dir = catalog_dir();
        let catalog = FileCatalog::open(dir.path().to_path_buf()).unwrap();
        assert_eq!(catalog.len(), 2);
        assert!(catalog.resolve_document("KJV").is_some());
        assert_eq!(catalog.list_documents(BookCategory::Dictionary).len(), 1);
        assert!(catalog.list_documents(BookCategory::Map).is_empty());
    }

    #[test]
    fn reload_forgets_removed_documents() {
        let dir = catalog_dir();
        let catalog = FileCatalog::open(dir.path().to_path_buf()).unwrap();
        std::fs::remove_file(dir.path().join("easton.toml")).unwrap();

        assert_eq!(catalog.reload().unwrap(), 1);
        assert!(catalog.resolve_document("Easton").is_none());
    }

    #[test]
    fn verse_ids_resolve_to_their_page() {
        let document = CatalogDocument::from_toml_str(KJV, Path::new("kjv.toml")).unwrap();
        assert_eq!(document.parse_key("Gen.1.2").unwrap(), Key::new("Gen.1"));
        assert_eq!(document.parse_key(" Gen.2 ").unwrap(), Key::new("Gen.2"));
        assert!(matches!(
            document.parse_key("Gen 1"),
            Err(KeyError::Malformed(_))
        ));
        assert!(matches!(
            document.parse_key("Exod.1"),
            Err(KeyError::NotFound { .. })
        ));
        assert!(document.contains(&Key::new("Gen.2")));
        assert!(!document.contains(&Key::new("Gen.1.1")));
    }

    #[test]
    fn key_plus_stays_within_document() {
        let document = CatalogDocument::from_toml_str(KJV, Path::new("kjv.toml")).unwrap();
        let first = document.first_key().unwrap();
        assert_eq!(document.key_plus(&first, 1), Some(Key::new("Gen.2")));
        assert_eq!(document.key_plus(&first, -1), None);
        assert_eq!(document.key_plus(&first, 2), None);
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let raw = "initials = \"X\"\ncategory = \"map\"\n[[pages]]\nkey = \"A\"\n[[pages]]\nkey = \"A\"\n";
        assert!(matches!(
            CatalogDocument::from_toml_str(raw, Path::new("x.toml")),
            Err(CatalogError::Invalid { .. })
        ));
    }

    #[test]
    fn deactivate_drops_render_cache() {
        let document = CatalogDocument::from_toml_str(KJV, Path::new("kjv.toml")).unwrap();
        document.render_page(&Key::new("Gen.1"), false).unwrap();
        document.render_page(&Key::new("Gen.1"), true).unwrap();
        assert_eq!(document.cached_renders(), 2);

        document.deactivate();
        assert_eq!(document.cached_renders(), 0);
    }

    #[tokio::test]
    async fn renderer_emits_verse_markers() {
        let dir = catalog_dir();
        let catalog = Arc::new(FileCatalog::open(dir.path().to_path_buf()).unwrap());
        let renderer = MarkupRenderer::new(Arc::clone(&catalog));
        let document = catalog.resolve_document("KJV").unwrap();

        let page = renderer
            .render(document.as_ref(), Some(&Key::new("Gen.1")), false)
            .await
            .unwrap();
        let lines: Vec<_> = page.lines().collect();
        assert_eq!(lines[0], "<h1>King James Version</h1>");
        assert_eq!(lines[1], "<h2>Genesis 1</h2>");
        assert!(lines[2].starts_with("<v id=\"Gen.1.1\"/>In the beginning"));

        let fragment = renderer
            .render(document.as_ref(), Some(&Key::new("Gen.2")), true)
            .await
            .unwrap();
        assert!(fragment.starts_with("<h2>Gen.2</h2>"));
    }

    #[tokio::test]
    async fn renderer_escapes_text_and_reports_unknown_keys() {
        let dir = catalog_dir();
        let catalog = Arc::new(FileCatalog::open(dir.path().to_path_buf()).unwrap());
        let renderer = MarkupRenderer::new(Arc::clone(&catalog));
        let document = catalog.resolve_document("Easton").unwrap();

        let page = renderer
            .render(document.as_ref(), Some(&Key::new("Aaron")), true)
            .await
            .unwrap();
        assert!(page.contains("Amram &amp; Jochebed &lt;a Levite&gt;."));

        let missing = renderer
            .render(document.as_ref(), Some(&Key::new("Zion")), true)
            .await;
        assert!(matches!(missing, Err(RenderError::UnknownKey { .. })));
        let keyless = renderer.render(document.as_ref(), None, true).await;
        assert!(matches!(keyless, Err(RenderError::Content { .. })));
    }
}
