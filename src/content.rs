//! Payloads handed out after a successful exchange.
use crate::error::ConfigError;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Source of the response body for a verified session.
pub trait ContentProvider: Send + Sync {
    fn pick(&self) -> Vec<u8>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub quote: String,
    #[serde(default)]
    pub author: String,
}

const BUILTIN: &[&str] = &[
    "Love uprightness you who are rulers on earth",
    "Wisdom will never enter the soul of a wrong-doer, nor dwell in a body enslaved to sin",
    "Wisdom is a spirit friendly to humanity, though she will not let a blasphemer's words go unpunished",
    "For the spirit of the Lord fills the world, and that which holds everything together knows every word said",
    "No one who speaks what is wrong will go undetected, nor will avenging Justice pass by such a one",
    "There is a jealous ear that overhears everything, not even a murmur of complaint escapes it",
    "Do not court death by the errors of your ways, nor invite destruction through the work of your hands",
];

/// Read-only quote table; one random quote text per request.
#[derive(Debug, Clone)]
pub struct QuoteBook {
    quotes: Vec<Quote>,
}

impl QuoteBook {
    pub fn new(quotes: Vec<Quote>) -> Result<Self, ConfigError> {
        if quotes.is_empty() {
            return Err(ConfigError::Content("quote book is empty".into()));
        }
        Ok(Self { quotes })
    }

    pub fn builtin() -> Self {
        Self {
            quotes: BUILTIN
                .iter()
                .map(|q| Quote {
                    quote: (*q).to_owned(),
                    author: "Wisdom of Solomon".to_owned(),
                })
                .collect(),
        }
    }

    /// Parse `[{"quote": "...", "author": "..."}, ...]`.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ConfigError> {
        let quotes: Vec<Quote> =
            serde_json::from_slice(bytes).map_err(|e| ConfigError::Content(e.to_string()))?;
        Self::new(quotes)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = fs::read(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&bytes)
    }

    pub fn quotes(&self) -> &[Quote] {
        &self.quotes
    }

    pub fn contains_text(&self, text: &str) -> bool {
        self.quotes.iter().any(|q| q.quote == text)
    }
}

impl ContentProvider for QuoteBook {
    fn pick(&self) -> Vec<u8> {
        self.quotes
            .choose(&mut rand::thread_rng())
            .map(|q| q.quote.clone().into_bytes())
            .unwrap_or_default()
    }
}
