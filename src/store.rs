//! Word store backing the server.
//!
//! An ordered, immutable list of words loaded once at startup. Sessions
//! borrow it read-only, so no locking is needed.

use crate::config::ConfigError;
use crate::protocol::{self, PageRequest, PageResponse};
use bytes::BytesMut;
use std::path::Path;
use tracing::info;

/// Ordered word sequence
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WordStore {
    words: Vec<String>,
}

/// A window into the store, borrowed for the duration of one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page<'a> {
    pub words: &'a [String],
    pub end_of_stream: bool,
}

impl Page<'_> {
    pub fn encode(&self) -> BytesMut {
        protocol::encode_response(self.words, self.end_of_stream)
    }

    pub fn to_response(&self) -> PageResponse {
        PageResponse {
            words: self.words.to_vec(),
            end_of_stream: self.end_of_stream,
        }
    }
}

impl WordStore {
    pub fn new(words: Vec<String>) -> Self {
        WordStore { words }
    }

    /// Split text on commas and line breaks. Tokens are trimmed and empty
    /// tokens dropped.
    pub fn from_text(text: &str) -> Self {
        let words = text
            .split([',', '\n'])
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();
        WordStore { words }
    }

    /// Load a word file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
        let store = Self::from_text(&text);
        info!(path = %path.display(), words = store.len(), "Loaded word store");
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// Resolve a request to its window.
    ///
    /// The window is `words[p..min(p + k, n)]`. End of stream is signalled
    /// whenever `p + k >= n`, so a final non-empty window carries the
    /// sentinel along with its words and an offset past the end yields an
    /// empty window with the sentinel alone.
    pub fn page(&self, request: PageRequest) -> Page<'_> {
        let n = self.words.len();
        let PageRequest { offset, stride } = request;

        if offset >= n {
            return Page {
                words: &[],
                end_of_stream: true,
            };
        }

        let reach = offset.saturating_add(stride);
        Page {
            words: &self.words[offset..reach.min(n)],
            end_of_stream: reach >= n,
        }
    }
}
