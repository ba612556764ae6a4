//! services/api/src/adapters/evaluator_llm.rs
//!
//! This module contains the adapter for the rubric-evaluation LLM.
//! It implements the `EvaluationService` port from the `core` crate.
//!
//! The model is asked for a JSON document; everything numeric it returns is
//! re-checked against the rubric by `ecos_core::evaluation` before it is stored.

const SYSTEM_INSTRUCTIONS: &str = r#"You are an examiner grading a medical student's performance in a structured clinical examination (ECOS).

You receive the case description, the grading rubric (criterion id and maximum points) and the full transcript between the student and the simulated patient.

Grade each rubric criterion from 0 to its maximum points, based only on what the student actually did in the transcript.

Respond with ONLY a JSON object, no prose and no code fences, with this shape:
{
  "scores": [{"criterion": "<criterion id>", "score": <number>, "feedback": "<one or two sentences>"}],
  "summary": "<overall assessment in three sentences at most>",
  "strengths": ["<strength>", ...],
  "weaknesses": ["<weakness>", ...],
  "recommendations": ["<concrete recommendation>", ...]
}

Use exactly the criterion ids from the rubric. Write the feedback in the language of the transcript."#;

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
use ecos_core::domain::{CriterionScore, EcosMessage, EcosScenario, EvaluationDraft, MessageRole};
use ecos_core::ports::{EvaluationService, PortError, PortResult};
use serde::Deserialize;

//=========================================================================================
// Model Output Types
//=========================================================================================

#[derive(Debug, Deserialize)]
struct EvaluationPayload {
    #[serde(default)]
    scores: Vec<ScorePayload>,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    weaknesses: Vec<String>,
    #[serde(default)]
    recommendations: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ScorePayload {
    #[serde(alias = "criterionId", alias = "criterion_id")]
    criterion: String,
    score: f64,
    #[serde(default)]
    feedback: String,
}

/// Parses the model's reply, tolerating a surrounding markdown code fence.
fn parse_evaluation(raw: &str) -> PortResult<EvaluationDraft> {
    let trimmed = raw.trim();
    let json = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => {
            return Err(PortError::Unexpected(
                "Evaluation LLM reply contained no JSON object.".to_string(),
            ))
        }
    };

    let payload: EvaluationPayload = serde_json::from_str(json).map_err(|e| {
        PortError::Unexpected(format!("Evaluation LLM reply was not valid JSON: {}", e))
    })?;

    Ok(EvaluationDraft {
        scores: payload
            .scores
            .into_iter()
            .map(|s| CriterionScore {
                criterion_id: s.criterion,
                score: s.score,
                feedback: s.feedback,
            })
            .collect(),
        summary: payload.summary,
        strengths: payload.strengths,
        weaknesses: payload.weaknesses,
        recommendations: payload.recommendations,
    })
}

fn render_case(scenario: &EcosScenario, transcript: &[EcosMessage]) -> String {
    let rubric = scenario
        .evaluation_criteria
        .iter()
        .map(|(criterion, weight)| format!("- {}: {} points", criterion, weight))
        .collect::<Vec<_>>()
        .join("\n");

    let dialogue = if transcript.is_empty() {
        "(the student did not say anything)".to_string()
    } else {
        transcript
            .iter()
            .map(|m| {
                let speaker = match m.role {
                    MessageRole::User => "STUDENT",
                    MessageRole::Assistant => "PATIENT",
                };
                format!("{}: {}", speaker, m.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "CASE: {}\n{}\n\nPATIENT SCRIPT:\n{}\n\nRUBRIC:\n{}\n\nTRANSCRIPT:\n{}",
        scenario.title, scenario.description, scenario.patient_prompt, rubric, dialogue
    )
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `EvaluationService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiEvaluatorAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiEvaluatorAdapter {
    /// Creates a new `OpenAiEvaluatorAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

//=========================================================================================
// `EvaluationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl EvaluationService for OpenAiEvaluatorAdapter {
    async fn evaluate_transcript(
        &self,
        scenario: &EcosScenario,
        transcript: &[EcosMessage],
    ) -> PortResult<EvaluationDraft> {
        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SYSTEM_INSTRUCTIONS)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(render_case(scenario, transcript))
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(0.2)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        let raw = first_choice_text(response, "Evaluation")?;
        parse_evaluation(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ecos_core::domain::Rubric;
    use uuid::Uuid;

    #[test]
    fn parses_fenced_json_with_alias_fields() {
        let raw = r#"```json
{"scores":[{"criterionId":"anamnese","score":16,"feedback":"Good"},
           {"criterion":"examen_physique","score":25.5}],
 "summary":"Fine","strengths":["Listening"]}
```"#;
        let draft = parse_evaluation(raw).unwrap();
        assert_eq!(draft.scores.len(), 2);
        assert_eq!(draft.scores[0].criterion_id, "anamnese");
        assert_eq!(draft.scores[1].score, 25.5);
        assert!(draft.scores[1].feedback.is_empty());
        assert_eq!(draft.summary, "Fine");
        assert!(draft.weaknesses.is_empty());
    }

    #[test]
    fn rejects_replies_without_json() {
        assert!(matches!(
            parse_evaluation("I cannot grade this."),
            Err(PortError::Unexpected(_))
        ));
        assert!(parse_evaluation("{ not json }").is_err());
    }

    #[test]
    fn case_rendering_labels_speakers_and_rubric() {
        let session_id = Uuid::new_v4();
        let scenario = EcosScenario {
            id: Uuid::new_v4(),
            title: "Chest pain".to_string(),
            description: "55 year old man".to_string(),
            patient_prompt: "You have had chest pain since this morning.".to_string(),
            evaluation_criteria: Rubric::from([("anamnese".to_string(), 20)]),
            created_by: "prof@fac.fr".to_string(),
            created_at: Utc::now(),
        };
        let transcript = vec![
            EcosMessage {
                id: Uuid::new_v4(),
                session_id,
                role: MessageRole::User,
                content: "Where does it hurt?".to_string(),
                created_at: Utc::now(),
            },
            EcosMessage {
                id: Uuid::new_v4(),
                session_id,
                role: MessageRole::Assistant,
                content: "In my chest.".to_string(),
                created_at: Utc::now(),
            },
        ];

        let rendered = render_case(&scenario, &transcript);
        assert!(rendered.contains("- anamnese: 20 points"));
        assert!(rendered.contains("STUDENT: Where does it hurt?\nPATIENT: In my chest."));
    }
}
