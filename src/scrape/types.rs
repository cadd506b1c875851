use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Marker that introduces a text-fragment directive in a URL.
pub const FRAGMENT_MARKER: &str = "#:~:text=";

pub const NO_ANCHOR: &str = "no-anchor";
pub const UNSUPPORTED_FORMAT: &str = "unsupported-format";
pub const MATCH_ERROR: &str = "match-error";
/// Written into a reference whose URL never made it into the result map.
pub const URL_NOT_PROCESSED: &str = "URL_NOT_PROCESSED";

/// Query text → AI-overview sections for that query.
pub type QuerySections = BTreeMap<String, Vec<Section>>;

/// One cited source of an AI-overview section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub url: String,
    /// Page text, anchor span, raw fallback body or a sentinel status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scraped_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity_score: Option<f64>,
}

impl Reference {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            scraped_content: None,
            similarity_score: None,
        }
    }
}

/// One AI-overview block. `text` is the benchmark content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    /// Only present in the cleaned view: the configured starting candidate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_text: Option<String>,
    #[serde(default)]
    pub references: Vec<Reference>,
}

/// Outcome of acquiring one URL.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionResult {
    /// Anchor span (primary path) or raw body (fallback path).
    Ok(String),
    NoAnchor,
    UnsupportedFormat,
    MatchError,
    /// Carries the full rendered detail, e.g. `error - 404`.
    Error(String),
}

impl AcquisitionResult {
    /// Whether the outcome carries content worth ranking. Only the two
    /// classifications that tell us nothing are dropped.
    pub fn is_usable(&self) -> bool {
        !matches!(self, Self::NoAnchor | Self::MatchError)
    }

    /// String form stored in `Reference::scraped_content`.
    pub fn as_content(&self) -> &str {
        match self {
            Self::Ok(text) => text,
            Self::NoAnchor => NO_ANCHOR,
            Self::UnsupportedFormat => UNSUPPORTED_FORMAT,
            Self::MatchError => MATCH_ERROR,
            Self::Error(detail) => detail,
        }
    }
}
