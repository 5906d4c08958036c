//! AI enrichment for TLKB: metadata extraction, Diátaxis classification,
//! embeddings and extractive summaries behind swappable capability traits.

mod enricher;
mod llm;
mod prompts;
mod summary;

pub use enricher::{
    build_embedding_text, strip_code_fences, truncate_chars, EmbeddingInput, Enricher,
    CLASSIFY_CONTENT_LIMIT, EMBEDDING_CHAR_BUDGET, METADATA_CONTENT_LIMIT,
};
pub use llm::{Embedder, GenerationRequest, LlmConfig, LlmError, OpenAiClient, TextGenerator};
pub use prompts::{load_topic_taxonomy, read_topic_taxonomy, PROMPT_TAXONOMY_LIMIT};
pub use summary::summarize;

pub const CRATE_NAME: &str = "tlkb-enrich";
