//! Localization interface.
//!
//! Loading translation files is an external concern; the engine only needs
//! a way to hand handlers a [`Localizer`] resolved for the language a
//! condition matched in. [`MapLocalizer`] is the map-backed default used
//! by tests and small deployments.

use std::collections::BTreeMap;
use std::sync::Arc;

use weld_core::Session;

/// Translation table: message key → language → text.
pub type LocaleTable = BTreeMap<String, BTreeMap<String, String>>;

/// A language-resolved view over a translation table, handed to handlers
/// that declare needing one.
#[derive(Clone)]
pub struct Localizer {
    lang: Option<String>,
    table: Arc<LocaleTable>,
}

impl Localizer {
    /// A localizer with no translations.
    pub fn empty() -> Self {
        Self {
            lang: None,
            table: Arc::new(LocaleTable::new()),
        }
    }

    pub(crate) fn new(lang: Option<String>, table: Arc<LocaleTable>) -> Self {
        Self { lang, table }
    }

    /// The language evaluation resolved, if any.
    pub fn lang(&self) -> Option<&str> {
        self.lang.as_deref()
    }

    /// Looks up `key` in the resolved language, falling back to the first
    /// available translation.
    pub fn text(&self, key: &str) -> Option<&str> {
        let translations = self.table.get(key)?;
        if let Some(lang) = &self.lang
            && let Some(text) = translations.get(lang)
        {
            return Some(text);
        }
        translations.values().next().map(String::as_str)
    }
}

impl std::fmt::Debug for Localizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Localizer")
            .field("lang", &self.lang)
            .field("keys", &self.table.len())
            .finish()
    }
}

/// Supplies localizers to the dispatcher.
pub trait LocalizerProvider: Send + Sync {
    /// Builds a localizer for the session, preferring `lang` (the language
    /// evaluation resolved) when given.
    fn localizer(&self, session: &Session, lang: Option<&str>) -> Localizer;
}

/// Provider over an in-memory translation table.
pub struct MapLocalizer {
    table: Arc<LocaleTable>,
    default_lang: Option<String>,
}

impl MapLocalizer {
    pub fn new(table: LocaleTable) -> Self {
        Self {
            table: Arc::new(table),
            default_lang: None,
        }
    }

    /// Sets the language used when evaluation resolved none.
    pub fn default_lang(mut self, lang: impl Into<String>) -> Self {
        self.default_lang = Some(lang.into());
        self
    }
}

impl LocalizerProvider for MapLocalizer {
    fn localizer(&self, _session: &Session, lang: Option<&str>) -> Localizer {
        let lang = lang.map(str::to_string).or_else(|| self.default_lang.clone());
        Localizer::new(lang, Arc::clone(&self.table))
    }
}

/// Provider yielding empty localizers; the default when none is wired.
pub struct NullLocalizer;

impl LocalizerProvider for NullLocalizer {
    fn localizer(&self, _session: &Session, _lang: Option<&str>) -> Localizer {
        Localizer::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> LocaleTable {
        let mut greetings = BTreeMap::new();
        greetings.insert("en".to_string(), "hello".to_string());
        greetings.insert("fr".to_string(), "bonjour".to_string());
        let mut table = LocaleTable::new();
        table.insert("greeting".to_string(), greetings);
        table
    }

    #[test]
    fn resolved_language_wins() {
        let localizer = Localizer::new(Some("fr".into()), Arc::new(table()));
        assert_eq!(localizer.text("greeting"), Some("bonjour"));
    }

    #[test]
    fn falls_back_to_first_translation() {
        let localizer = Localizer::new(Some("de".into()), Arc::new(table()));
        assert_eq!(localizer.text("greeting"), Some("hello"));
        assert_eq!(localizer.text("missing"), None);
    }
}
