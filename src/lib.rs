//! docchat-backend: chat-with-your-documents core.
//!
//! Three layers over four external collaborators (record store, vector
//! index, embedder, generation model):
//!
//! - `ingest`: upload validation, chunking and the async pipeline that
//!   embeds and indexes documents with an observable status lifecycle.
//! - `retrieval`: scoped top-k similarity search over processed documents.
//! - `chat`: grounded answering with source citations and session history.
//!
//! `AppState` wires everything from an `AppConfig`; a transport layer sits
//! on top and is out of scope here.

pub mod chat;
pub mod core;
pub mod ingest;
pub mod llm;
pub mod logging;
pub mod retrieval;
pub mod state;
pub mod store;
pub mod vector;

pub use chat::{Answer, ChatOrchestrator};
pub use core::{AppConfig, CoreError};
pub use ingest::IngestionPipeline;
pub use retrieval::{RetrievalEngine, RetrievalScope, RetrievedChunk};
pub use state::AppState;
