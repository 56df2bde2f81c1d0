//! Word frequency aggregation over accumulated response text.

use crate::protocol::{self, SENTINEL};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Occurrence counts keyed by word, iterated in lexicographic order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrequencyTable {
    counts: BTreeMap<String, usize>,
}

impl FrequencyTable {
    /// Count every word token in `text`, skipping the sentinel.
    pub fn from_text(text: &str) -> Self {
        let mut table = FrequencyTable::default();
        for word in protocol::tokens(text).filter(|t| *t != SENTINEL) {
            *table.counts.entry(word.to_string()).or_insert(0) += 1;
        }
        table
    }

    pub fn get(&self, word: &str) -> Option<usize> {
        self.counts.get(word).copied()
    }

    /// Number of distinct words.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.counts.iter().map(|(w, c)| (w.as_str(), *c))
    }
}

/// `word, count` lines.
impl fmt::Display for FrequencyTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (word, count) in self.iter() {
            writeln!(f, "{word}, {count}")?;
        }
        Ok(())
    }
}

/// Render the client's stdout report: an `ELAPSED_MS:<whole ms>` line
/// followed by the frequency table.
pub fn render_report(elapsed: Duration, table: &FrequencyTable) -> String {
    format!("ELAPSED_MS:{}\n{}", elapsed.as_millis(), table)
}
