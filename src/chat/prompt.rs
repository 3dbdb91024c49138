//! Prompt assembly for grounded question answering.
//!
//! The prompt is: one system instruction carrying the retrieved context, the
//! recent session history, then the user's question. Each context chunk is
//! tagged with its source label; the answer's citations come from the exact
//! set of chunks that made it into the prompt, so callers never have to trust
//! the model to report its own sources.

use crate::llm::ChatMessage;
use crate::retrieval::RetrievedChunk;
use crate::store::StoredMessage;

const SYSTEM_INSTRUCTION: &str = "You are a document assistant. Answer the \
user's question using only the context below. Each context passage is tagged \
with its source in square brackets. If the context does not contain the \
answer, say so plainly instead of guessing.";

/// An assembled prompt plus the citations it actually contains.
pub struct AssembledPrompt {
    pub messages: Vec<ChatMessage>,
    /// Ordered, deduplicated source labels of the included chunks.
    pub sources: Vec<String>,
}

/// Build the message list for one generation call.
///
/// Chunks are consumed in rank order until `max_context_chars` is reached;
/// lower-ranked chunks past the cap are dropped and do not appear in
/// `sources`. At least one chunk is always included so a single oversized
/// chunk cannot produce an empty context.
pub fn assemble(
    question: &str,
    chunks: &[RetrievedChunk],
    history: &[StoredMessage],
    max_context_chars: usize,
) -> AssembledPrompt {
    let mut context = String::new();
    let mut sources: Vec<String> = Vec::new();
    let mut used_chars = 0usize;

    for (rank, chunk) in chunks.iter().enumerate() {
        let chunk_chars = chunk.text.chars().count();
        if rank > 0 && used_chars + chunk_chars > max_context_chars {
            break;
        }
        used_chars += chunk_chars;

        context.push_str(&format!("[{}]\n{}\n\n", chunk.source_label, chunk.text));
        if !sources.contains(&chunk.source_label) {
            sources.push(chunk.source_label.clone());
        }
    }

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(format!(
        "{}\n\nContext:\n{}",
        SYSTEM_INSTRUCTION,
        context.trim_end()
    )));

    for entry in history {
        messages.push(ChatMessage {
            role: entry.role.clone(),
            content: entry.content.clone(),
        });
    }

    messages.push(ChatMessage::user(question));

    AssembledPrompt { messages, sources }
}
