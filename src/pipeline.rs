//! End-to-end question answering over a directory of documents.
//!
//! ```text
//! discover -> load -> split -> embed -> VectorStore
//! question -> embed -> similarity search -> rerank -> prompt -> generate
//! ```

use std::path::{Path, PathBuf};

use crate::{
    embedding::{Embedder, embed_chunks},
    embedding_db::EmbeddingDb,
    error::{Error, Result},
    generation::Generator,
    loader::load_documents,
    prompt,
    reranker::{CrossEncoder, RankedPassage, build_context, pre_rerank, rerank},
    settings::Settings,
    splitter::{SplitterConfig, split_documents},
    vector_store::{ScoredChunk, VectorStore},
    walker::discover_files,
};

/// What [`Pipeline::index_directory`] found and stored.
#[derive(Debug, Default)]
pub struct IndexReport {
    pub files: usize,
    pub documents: usize,
    pub chunks: usize,
    /// Chunk vectors reused from the embedding cache.
    pub cache_hits: usize,
    /// Files that could not be loaded, with the reason.
    pub failures: Vec<(PathBuf, String)>,
}

/// The reranked passages for a question and the context built from them.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub context: String,
    pub passages: Vec<RankedPassage>,
    /// Where each passage came from, e.g. `report.pdf (page 2)`.
    pub sources: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    /// The exact prompt sent to the generator.
    pub prompt: String,
    pub passages: Vec<RankedPassage>,
    pub sources: Vec<String>,
}

pub struct Pipeline<E, C, G> {
    settings: Settings,
    embedder: E,
    cross_encoder: C,
    generator: G,
    cache: Option<EmbeddingDb>,
    store: Option<VectorStore>,
    recursive: bool,
    show_progress: bool,
}

impl<E: Embedder, C: CrossEncoder, G: Generator> Pipeline<E, C, G> {
    pub fn new(
        settings: Settings,
        embedder: E,
        cross_encoder: C,
        generator: G,
    ) -> Self {
        Self {
            settings,
            embedder,
            cross_encoder,
            generator,
            cache: None,
            store: None,
            recursive: false,
            show_progress: false,
        }
    }

    /// Reuse and persist chunk vectors through `cache`.
    pub fn with_cache(mut self, cache: EmbeddingDb) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Descend into sub-directories when indexing.
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Draw a progress bar on stderr while embedding.
    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// Number of chunks in the current index, `None` before indexing.
    pub fn indexed_chunks(&self) -> Option<usize> {
        self.store.as_ref().map(VectorStore::len)
    }

    /// Build the in-memory index for `dir`, replacing any previous one.
    ///
    /// A directory without any loadable text produces an empty index;
    /// questions against it get an empty context.
    pub fn index_directory(&mut self, dir: &Path) -> Result<IndexReport> {
        let files = discover_files(dir, self.recursive)?;
        let loaded = load_documents(&files);

        let splitter = SplitterConfig::new(
            self.settings.chunk_size,
            self.settings.chunk_overlap,
        )?;
        let chunks = split_documents(&loaded.documents, &splitter);

        let embedded = embed_chunks(
            &mut self.embedder,
            self.cache.as_ref(),
            &chunks,
            self.show_progress,
        )?;

        let dimension = embedded.vectors.first().map_or(0, Vec::len);
        let mut store = VectorStore::new(dimension);
        let chunk_count = chunks.len();
        for (chunk, vector) in chunks.into_iter().zip(&embedded.vectors) {
            store.add(chunk, vector)?;
        }
        self.store = Some(store);

        let report = IndexReport {
            files: files.len(),
            documents: loaded.documents.len(),
            chunks: chunk_count,
            cache_hits: embedded.cache_hits,
            failures: loaded.failures,
        };
        tracing::info!(
            dir = %dir.display(),
            files = report.files,
            documents = report.documents,
            chunks = report.chunks,
            cache_hits = report.cache_hits,
            "indexed documents"
        );
        Ok(report)
    }

    fn store(&self) -> Result<&VectorStore> {
        self.store.as_ref().ok_or_else(|| {
            Error::Config("no documents indexed yet".to_string())
        })
    }

    /// The `retrieve_k` chunks nearest to the question.
    pub fn retrieve(&mut self, question: &str) -> Result<Vec<ScoredChunk>> {
        let question = checked_question(question)?;
        if self.store()?.is_empty() {
            return Ok(Vec::new());
        }

        let query = self.embedder.embed_query(question)?;
        self.store()?
            .similarity_search(&query, self.settings.retrieve_k)
    }

    /// Retrieve, rerank and keep the best `rerank_top_n` passages.
    pub fn context_for(&mut self, question: &str) -> Result<Retrieval> {
        let candidates = self.retrieve(question)?;
        let pairs = pre_rerank(&candidates, question);
        let passages = rerank(
            &mut self.cross_encoder,
            &pairs,
            self.settings.rerank_top_n,
        )?;
        tracing::debug!(
            candidates = candidates.len(),
            kept = passages.len(),
            "reranked candidates"
        );

        let sources = passages
            .iter()
            .map(|p| candidates[p.retrieval_rank].chunk.label())
            .collect();

        Ok(Retrieval {
            context: build_context(&passages),
            passages,
            sources,
        })
    }

    /// Answer `question` from the indexed documents.
    pub fn ask(&mut self, question: &str) -> Result<Answer> {
        let Retrieval {
            context,
            passages,
            sources,
        } = self.context_for(question)?;
        let prompt = prompt::render(&context, question, &self.settings.language);
        let text = self.generator.generate(&prompt)?;

        Ok(Answer {
            text,
            prompt,
            passages,
            sources,
        })
    }
}

fn checked_question(question: &str) -> Result<&str> {
    if question.trim().is_empty() {
        return Err(Error::Config("question must not be empty".to_string()));
    }
    Ok(question)
}
