//! services/api/src/adapters/patient_llm.rs
//!
//! This module contains the adapter for the simulated-patient LLM.
//! It implements the `PatientSimulationService` port from the `core` crate.

const ROLE_RULES: &str = r#"You are role-playing a patient during a structured clinical examination (ECOS).

Rules:
- Stay in character at all times. You are the patient, never the doctor or an assistant.
- Answer only what the student asks. Do not volunteer the diagnosis or medical terminology a patient would not know.
- Reveal findings from the case description only when the student's question or examination would reasonably uncover them.
- Keep replies short and natural, like a real patient talking (one to four sentences).
- Reply in the language the student uses.

CASE DESCRIPTION:
"#;

use super::first_choice_text;
use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use ecos_core::domain::{EcosMessage, EcosScenario, MessageRole};
use ecos_core::ports::{PatientSimulationService, PortError, PortResult};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `PatientSimulationService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiPatientAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiPatientAdapter {
    /// Creates a new `OpenAiPatientAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

fn system_prompt(scenario: &EcosScenario) -> String {
    format!("{}{}", ROLE_RULES, scenario.patient_prompt.trim())
}

//=========================================================================================
// `PatientSimulationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl PatientSimulationService for OpenAiPatientAdapter {
    /// Replays the whole transcript so the patient stays consistent across turns.
    async fn reply_as_patient(
        &self,
        scenario: &EcosScenario,
        transcript: &[EcosMessage],
    ) -> PortResult<String> {
        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(transcript.len() + 1);
        messages.push(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt(scenario))
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        );

        for entry in transcript {
            let message: ChatCompletionRequestMessage = match entry.role {
                MessageRole::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(entry.content.as_str())
                    .build()
                    .map_err(|e| PortError::Unexpected(e.to_string()))?
                    .into(),
                MessageRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(entry.content.as_str())
                    .build()
                    .map_err(|e| PortError::Unexpected(e.to_string()))?
                    .into(),
            };
            messages.push(message);
        }

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(0.7)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        let reply = first_choice_text(response, "Patient simulation")?;
        Ok(reply.trim().to_string())
    }
}
