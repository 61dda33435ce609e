//! Bibliographic references cited by record values.

use serde::{Deserialize, Serialize};

/// One catalog entry; `id` is the value records carry in `ref`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub id: String,
    /// Publication kind such as `article`, `book`, or `report`.
    pub kind: Option<String>,
    pub author: Option<String>,
    pub title: Option<String>,
    pub journal: Option<String>,
    /// Kept as text; catalogs carry placeholders such as `--`.
    pub year: Option<String>,
    pub volume: Option<String>,
    pub pages: Option<String>,
    pub doi: Option<String>,
    pub notes: Option<String>,
}

impl Reference {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// One-line citation, `Author (year). Title. Journal volume, pages`,
    /// with absent parts left out.
    pub fn citation(&self) -> String {
        let mut citation = self.author.clone().unwrap_or_default();
        if let Some(year) = &self.year {
            citation.push_str(&format!(" ({year})"));
        }
        for part in [&self.title, &self.journal].into_iter().flatten() {
            if !citation.is_empty() {
                citation.push_str(". ");
            }
            citation.push_str(part);
        }
        if let Some(volume) = &self.volume {
            citation.push_str(&format!(" {volume}"));
        }
        if let Some(pages) = &self.pages {
            citation.push_str(&format!(", {pages}"));
        }
        citation.trim().to_string()
    }
}
