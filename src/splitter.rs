//! Character-count text splitter.
//!
//! Text is cut on a separator (a blank line by default) and the pieces are
//! greedily merged back into chunks of at most `chunk_size` characters.
//! A single piece longer than `chunk_size` is kept whole and becomes an
//! oversized chunk.

use std::{collections::VecDeque, path::PathBuf};

use crate::{
    error::{Error, Result},
    loader::Document,
};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 0;
pub const DEFAULT_SEPARATOR: &str = "\n\n";

/// Splitter configuration. Sizes are measured in characters.
///
/// # Examples
///
/// ```
/// use docqa::splitter::{SplitterConfig, split_text};
///
/// let config = SplitterConfig::new(11, 0).unwrap();
/// let chunks = split_text("alpha\n\nbeta\n\ngamma delta", &config);
/// assert_eq!(chunks, vec!["alpha\n\nbeta", "gamma delta"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitterConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub separator: String,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            separator: DEFAULT_SEPARATOR.to_string(),
        }
    }
}

impl SplitterConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_overlap > chunk_size {
            return Err(Error::Config(format!(
                "chunk overlap ({chunk_overlap}) is larger than chunk size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            ..Self::default()
        })
    }
}

/// A piece of a [`Document`] small enough to embed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub source: PathBuf,
    pub page: Option<usize>,
    /// Zero-based position of the chunk within its document.
    pub index: usize,
}

impl Chunk {
    /// `file.pdf`, or `file.pdf (page 3)` with a one-based page number.
    pub fn label(&self) -> String {
        let name = self
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source.display().to_string());
        match self.page {
            Some(page) => format!("{name} (page {})", page + 1),
            None => name,
        }
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split one text into chunks.
pub fn split_text(text: &str, config: &SplitterConfig) -> Vec<String> {
    let pieces: Vec<&str> = if config.separator.is_empty() {
        text.split_inclusive(|_| true).collect()
    } else {
        text.split(config.separator.as_str())
            .filter(|s| !s.is_empty())
            .collect()
    };
    merge_pieces(&pieces, config)
}

fn join_pieces(pieces: &VecDeque<&str>, separator: &str) -> Option<String> {
    let joined = pieces.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn merge_pieces(pieces: &[&str], config: &SplitterConfig) -> Vec<String> {
    let sep_len = char_len(&config.separator);
    let mut chunks = Vec::new();
    let mut current: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for &piece in pieces {
        let len = char_len(piece);
        let joiner = if current.is_empty() { 0 } else { sep_len };

        if total + len + joiner > config.chunk_size {
            if total > config.chunk_size {
                tracing::warn!(
                    size = total,
                    limit = config.chunk_size,
                    "created a chunk longer than the configured size"
                );
            }
            if !current.is_empty() {
                chunks.extend(join_pieces(&current, &config.separator));

                // Keep at most `chunk_overlap` characters of trailing
                // context, and only as much as leaves room for `piece`.
                while let Some(&front) = current.front() {
                    let keep = total <= config.chunk_overlap
                        && (total + len + sep_len <= config.chunk_size
                            || total == 0);
                    if keep {
                        break;
                    }
                    let front_joiner =
                        if current.len() > 1 { sep_len } else { 0 };
                    total -= char_len(front) + front_joiner;
                    current.pop_front();
                }
            }
        }

        current.push_back(piece);
        total += len + if current.len() > 1 { sep_len } else { 0 };
    }

    chunks.extend(join_pieces(&current, &config.separator));
    chunks
}

/// Split every document, carrying source and page over to each chunk.
pub fn split_documents(
    documents: &[Document],
    config: &SplitterConfig,
) -> Vec<Chunk> {
    documents
        .iter()
        .flat_map(|doc| {
            split_text(&doc.content, config).into_iter().enumerate().map(
                |(index, text)| Chunk {
                    text,
                    source: doc.source.clone(),
                    page: doc.page,
                    index,
                },
            )
        })
        .collect()
}
