//! Input forms for cells created and edited through documents and sheets.

/// A new cell.
///
/// Document cells use `id` as their local id (a fresh `cellN` when absent);
/// sheet cells are named after their position and ignore it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CellInit {
    pub id: Option<String>,
    pub source: String,
    /// Language override; `None` uses the resource's language.
    pub lang: Option<String>,
}

impl CellInit {
    pub fn new(id: &str, source: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            source: source.to_string(),
            lang: None,
        }
    }

    pub fn with_lang(mut self, lang: &str) -> Self {
        self.lang = Some(lang.to_string());
        self
    }
}

impl From<&str> for CellInit {
    fn from(source: &str) -> Self {
        Self {
            source: source.to_string(),
            ..Self::default()
        }
    }
}

impl From<String> for CellInit {
    fn from(source: String) -> Self {
        Self {
            source,
            ..Self::default()
        }
    }
}

/// Partial update of an existing cell.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CellPatch {
    pub source: Option<String>,
    /// `Some(None)` clears the language override.
    pub lang: Option<Option<String>>,
}

impl CellPatch {
    pub fn lang(lang: Option<&str>) -> Self {
        Self {
            source: None,
            lang: Some(lang.map(str::to_string)),
        }
    }
}

impl From<&str> for CellPatch {
    fn from(source: &str) -> Self {
        Self {
            source: Some(source.to_string()),
            lang: None,
        }
    }
}

impl From<String> for CellPatch {
    fn from(source: String) -> Self {
        Self {
            source: Some(source),
            lang: None,
        }
    }
}
