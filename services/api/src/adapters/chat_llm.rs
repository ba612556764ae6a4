//! services/api/src/adapters/chat_llm.rs
//!
//! This module contains the adapter for the course Q&A LLM.
//! It implements the `QuestionAnsweringService` port from the `core` crate.

const SYSTEM_INSTRUCTIONS: &str = r#"You are a teaching assistant for medical students enrolled in an online course.

You receive COURSE CONTEXT: passages retrieved from the course material, most relevant first.

Your role:
- Answer the student's question clearly and accurately, in the language the question was asked in.
- Ground your answer in the COURSE CONTEXT whenever it covers the question.
- If the context does not cover the question, say so briefly and answer from general medical knowledge, flagging that it goes beyond the course.
- Never invent references, page numbers or guidelines.
- Keep answers focused: a few short paragraphs or a short list is usually enough."#;

const USER_INPUT_TEMPLATE: &str = r#"COURSE CONTEXT:
---
{context}
---

QUESTION:
{question}"#;

const NO_CONTEXT: &str = "(no passage from the course matched this question)";

use super::first_choice_text;
use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use ecos_core::ports::{PortError, PortResult, QuestionAnsweringService};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `QuestionAnsweringService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiChatAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiChatAdapter {
    /// Creates a new `OpenAiChatAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

fn render_user_input(question: &str, context: &str) -> String {
    let context = if context.trim().is_empty() {
        NO_CONTEXT
    } else {
        context
    };
    USER_INPUT_TEMPLATE
        .replace("{context}", context)
        .replace("{question}", question)
}

//=========================================================================================
// `QuestionAnsweringService` Trait Implementation
//=========================================================================================

#[async_trait]
impl QuestionAnsweringService for OpenAiChatAdapter {
    /// Answers a student's question from the retrieved course passages.
    async fn answer_question(&self, question: &str, context: &str) -> PortResult<String> {
        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SYSTEM_INSTRUCTIONS)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(render_user_input(question, context))
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .n(1)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        let answer = first_choice_text(response, "Chat")?;
        Ok(answer.trim().to_string())
    }
}
