use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::{debug, error, instrument};

use crate::{Document, Key, TextRenderer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placeholder {
    NoContent,
    ErrorOccurred,
}

type Messages = HashMap<Placeholder, &'static str>;

static MESSAGES: Lazy<HashMap<&'static str, Messages>> = Lazy::new(|| {
    use Placeholder::*;
    HashMap::from([
        (
            "en",
            HashMap::from([
                (NoContent, "No content available for this page."),
                (ErrorOccurred, "An error occurred while loading this page."),
            ]),
        ),
        (
            "de",
            HashMap::from([
                (NoContent, "Für diese Seite ist kein Inhalt verfügbar."),
                (ErrorOccurred, "Beim Laden dieser Seite ist ein Fehler aufgetreten."),
            ]),
        ),
        (
            "es",
            HashMap::from([
                (NoContent, "No hay contenido disponible para esta página."),
                (ErrorOccurred, "Se produjo un error al cargar esta página."),
            ]),
        ),
        (
            "fi",
            HashMap::from([
                (NoContent, "Tälle sivulle ei ole sisältöä."),
                (ErrorOccurred, "Sivun lataamisessa tapahtui virhe."),
            ]),
        ),
    ])
});

impl Placeholder {
    /// Message for `locale` (`"de"`, `"de-AT"`, `"fi_FI"`), English when unknown.
    pub fn message(self, locale: &str) -> &'static str {
        let language = locale
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        MESSAGES
            .get(language.as_str())
            .and_then(|messages| messages.get(&self))
            .or_else(|| MESSAGES.get("en").and_then(|messages| messages.get(&self)))
            .copied()
            .unwrap_or_default()
    }

    pub fn markup(self, locale: &str, as_fragment: bool) -> String {
        let body = format!("<p class=\"message\">{}</p>", self.message(locale));
        if as_fragment {
            body
        } else {
            format!("<html><body>{body}</body></html>")
        }
    }
}

/// Markup for one page together with the state it was produced for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContent {
    pub document: Option<String>,
    pub key: Option<Key>,
    pub markup: String,
}

/// Wraps the text-rendering facade so callers always receive displayable markup.
pub struct ContentLoader {
    renderer: Arc<dyn TextRenderer>,
    locale: String,
}

impl ContentLoader {
    pub fn new(renderer: Arc<dyn TextRenderer>, locale: impl Into<String>) -> Self {
        Self {
            renderer,
            locale: locale.into(),
        }
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn placeholder(&self, kind: Placeholder, as_fragment: bool) -> String {
        kind.markup(&self.locale, as_fragment)
    }

    #[instrument(skip(self, document, key), fields(document = document.initials()))]
    pub async fn load(&self, document: &dyn Document, key: Option<&Key>, as_fragment: bool) -> String {
        match self.renderer.render(document, key, as_fragment).await {
            Ok(markup) if markup.trim().is_empty() => {
                debug!(key = ?key, "renderer produced no content");
                self.placeholder(Placeholder::NoContent, as_fragment)
            }
            Ok(markup) => markup,
            Err(err) => {
                error!(key = ?key, error = %err, "failed to render page");
                self.placeholder(Placeholder::ErrorOccurred, as_fragment)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeDocument, FakeRenderer};
    use crate::BookCategory;

    #[test]
    fn placeholder_falls_back_to_english() {
        assert_eq!(
            Placeholder::NoContent.message("de-AT"),
            "Für diese Seite ist kein Inhalt verfügbar."
        );
        assert_eq!(
            Placeholder::ErrorOccurred.message("xx"),
            "An error occurred while loading this page."
        );
        assert_eq!(
            Placeholder::NoContent.message(""),
            "No content available for this page."
        );
    }

    #[test]
    fn fragments_are_not_wrapped_in_a_document() {
        let fragment = Placeholder::NoContent.markup("en", true);
        assert!(fragment.starts_with("<p"));
        let page = Placeholder::NoContent.markup("en", false);
        assert!(page.starts_with("<html>"));
    }

    #[tokio::test]
    async fn empty_render_becomes_no_content_placeholder() {
        let loader = ContentLoader::new(Arc::new(FakeRenderer::Text("")), "fi");
        let doc = FakeDocument::new("KJV", BookCategory::Bible, &["Gen.1"]);
        let key = Key::new("Gen.1");

        let markup = loader.load(&*doc, Some(&key), false).await;

        assert!(markup.contains("Tälle sivulle ei ole sisältöä."));
    }

    #[tokio::test]
    async fn render_failure_becomes_error_placeholder() {
        let loader = ContentLoader::new(Arc::new(FakeRenderer::Failing), "en");
        let doc = FakeDocument::new("KJV", BookCategory::Bible, &["Gen.1"]);

        let markup = loader.load(&*doc, None, true).await;

        assert_eq!(
            markup,
            "<p class=\"message\">An error occurred while loading this page.</p>"
        );
    }
}
