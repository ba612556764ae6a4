pub mod chat_llm;
pub mod db;
pub mod evaluator_llm;
pub mod knowledge_base;
pub mod patient_llm;

pub use chat_llm::OpenAiChatAdapter;
pub use db::DbAdapter;
pub use evaluator_llm::OpenAiEvaluatorAdapter;
pub use knowledge_base::{EmptyKnowledgeBase, PineconeKnowledgeBase};
pub use patient_llm::OpenAiPatientAdapter;

use async_openai::types::chat::CreateChatCompletionResponse;
use ecos_core::ports::{PortError, PortResult};

/// Extracts the text content from the first choice of a chat completion.
/// `what` names the calling adapter in error messages.
pub(crate) fn first_choice_text(
    response: CreateChatCompletionResponse,
    what: &str,
) -> PortResult<String> {
    match response.choices.into_iter().next() {
        Some(choice) => choice.message.content.ok_or_else(|| {
            PortError::Unexpected(format!("{} LLM response contained no text content.", what))
        }),
        None => Err(PortError::Unexpected(format!(
            "{} LLM returned no choices in its response.",
            what
        ))),
    }
}
