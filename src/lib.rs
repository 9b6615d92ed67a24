//! docqa - ask questions about a directory of documents.
//!
//! docqa loads PDF, Word, Excel, PowerPoint, text and markdown files,
//! splits them into chunks and embeds them with a sentence-transformers
//! model. For each question it retrieves the nearest chunks, reranks them
//! with a cross-encoder and asks a language model to answer from the best
//! passages only. All models run through
//! [candle](https://github.com/huggingface/candle); the language model can
//! also be any OpenAI-compatible server.
//!
//! # Quick start
//!
//! ```no_run
//! use std::path::Path;
//!
//! use docqa::{
//!     BgeReranker, ConfigDb, DataDir, EmbeddingDb, Pipeline,
//!     SentenceEmbedder, Settings, generation,
//! };
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let config_db = ConfigDb::open(&data_dir.config_db()).unwrap();
//! let settings = Settings::resolve(Some(&config_db), &[]).unwrap();
//!
//! let embedder = SentenceEmbedder::new(settings.embedding_model.clone());
//! let reranker = BgeReranker::new(settings.reranker_model.clone());
//! let generator = generation::from_settings(&settings).unwrap();
//! let cache = EmbeddingDb::open(&data_dir.embeddings_db()).unwrap();
//!
//! let mut pipeline = Pipeline::new(settings, embedder, reranker, generator)
//!     .with_cache(cache);
//! pipeline.index_directory(Path::new("./docs")).unwrap();
//!
//! let answer = pipeline.ask("What is the refund policy?").unwrap();
//! println!("{}", answer.text);
//! ```

pub mod chat;
pub mod config_db;
pub mod data_dir;
pub mod embedding;
pub mod embedding_db;
pub mod error;
pub mod generation;
pub mod loader;
pub mod model_manager;
pub mod pipeline;
pub mod prompt;
pub mod reranker;
pub mod settings;
pub mod splitter;
pub mod vector_store;
pub mod walker;

pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use embedding::{Embedder, SentenceEmbedder};
pub use embedding_db::EmbeddingDb;
pub use error::{Error, Result};
pub use generation::Generator;
pub use pipeline::Pipeline;
pub use reranker::{BgeReranker, CrossEncoder};
pub use settings::Settings;
pub use vector_store::VectorStore;
