//! Prompt construction, the LLM client and post-processing of model output.

pub mod diff;
pub mod llm;
pub mod prompt;
pub mod sanitize;

pub use diff::{annotate_char_diff, modification_context};
pub use llm::{GeminiClient, TextGenerator};
pub use prompt::{GeneratePrompt, RefinePrompt};
pub use sanitize::sanitize_sql_query;
