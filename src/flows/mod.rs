//! LLM-backed grading flows: prompt assembly, the provider call, and parsing
//! of the structured JSON reply. Handlers and the background worker call in
//! here; highlight reconciliation happens at the call sites because it needs
//! the plain answer text.

use anyhow::{Result, anyhow};
use serde::Deserialize;

use crate::config::GraderSettings;
use crate::llm::{ChatMessage, LlmClient, LlmRequest, MessageRole};
use crate::roster::{
    AnalysisSegment, ChatRole, ChatTurn, GradingResult, Question, Sentiment, new_segment_id,
};

/// Inputs for grading one (question, student) pair.
#[derive(Debug, Clone)]
pub struct GradeDocumentInput<'a> {
    pub question: &'a Question,
    pub answer: &'a str,
}

/// Grading output before highlight reconciliation: the segments carry ids but
/// `highlighted_answer` is not yet derived.
#[derive(Debug, Clone)]
pub struct GradeDocumentOutput {
    pub analysis: Vec<AnalysisSegment>,
    pub overall_feedback: String,
    pub score: f64,
}

/// Inputs for one refinement turn over an already-graded pair.
#[derive(Debug, Clone)]
pub struct ChatWithDocumentInput<'a> {
    pub question: &'a Question,
    pub answer: &'a str,
    pub current: &'a GradingResult,
    pub chat_history: &'a [ChatTurn],
    pub user_message: &'a str,
}

#[derive(Debug, Clone)]
pub struct ChatWithDocumentOutput {
    pub llm_response: String,
    pub updated: GradeDocumentOutput,
}

pub async fn grade_document(
    llm: &LlmClient,
    settings: &GraderSettings,
    input: GradeDocumentInput<'_>,
) -> Result<GradeDocumentOutput> {
    let request = LlmRequest::new(
        settings.models.grading_model.clone(),
        vec![
            ChatMessage::new(
                MessageRole::System,
                settings.prompts.grading_instructions.clone(),
            ),
            ChatMessage::new(MessageRole::User, build_grading_context(&input)),
        ],
    );

    let response = llm.execute(request).await?;
    let payload = parse_grade_payload(&response.text)?;
    Ok(assign_segment_ids(payload))
}

pub async fn chat_with_document(
    llm: &LlmClient,
    settings: &GraderSettings,
    input: ChatWithDocumentInput<'_>,
) -> Result<ChatWithDocumentOutput> {
    let request = LlmRequest::new(
        settings.models.chat_model.clone(),
        vec![
            ChatMessage::new(
                MessageRole::System,
                settings.prompts.chat_instructions.clone(),
            ),
            ChatMessage::new(MessageRole::User, build_chat_context(&input)),
        ],
    );

    let response = llm.execute(request).await?;
    let payload: ChatResponsePayload = serde_json::from_str(json_payload(&response.text))
        .map_err(|err| anyhow!("invalid chat refinement JSON: {}", err))?;

    Ok(ChatWithDocumentOutput {
        llm_response: payload.llm_response,
        updated: assign_segment_ids(payload.updated_analysis),
    })
}

/// Reformats a messy pasted block into the name-plus-bulleted-answers layout
/// the parser expects. The reply is plain text, not JSON.
pub async fn format_answers(
    llm: &LlmClient,
    settings: &GraderSettings,
    raw_text: &str,
) -> Result<String> {
    let request = LlmRequest::new(
        settings.models.format_model.clone(),
        vec![
            ChatMessage::new(
                MessageRole::System,
                settings.prompts.format_instructions.clone(),
            ),
            ChatMessage::new(
                MessageRole::User,
                format!("Now, please format the following text:\n\n{}", raw_text),
            ),
        ],
    );

    let response = llm.execute(request).await?;
    Ok(response.text.trim().to_string())
}

fn build_grading_context(input: &GradeDocumentInput<'_>) -> String {
    let mut context = format!(
        "**Question:**\n{}\n\n**Grading Rubric:**\n{}\nThe maximum score is {} points.\n",
        input.question.text, input.question.rubric, input.question.max_points
    );
    if !input.question.keywords.trim().is_empty() {
        context.push_str(&format!(
            "\n**Keywords to consider:**\n{}\n",
            input.question.keywords
        ));
    }
    context.push_str(&format!("\n**Student's Answer:**\n{}\n", input.answer));
    context
}

fn build_chat_context(input: &ChatWithDocumentInput<'_>) -> String {
    let mut context = format!(
        "**Original Context:**\n- Question: {}\n- Rubric: {}\n- Answer: {}\n",
        input.question.text, input.question.rubric, input.answer
    );
    if !input.question.keywords.trim().is_empty() {
        context.push_str(&format!("- Keywords: {}\n", input.question.keywords));
    }

    context.push_str(&format!(
        "\n**Current Analysis You Provided:**\n- Score: {}\n- Overall Feedback: \"{}\"\n- Segment Analysis:\n",
        input.current.score, input.current.overall_feedback
    ));
    for segment in &input.current.analysis {
        let sentiment = match segment.sentiment {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
        };
        context.push_str(&format!(
            "  - Segment: \"{}\" | Comment: \"{}\" | Sentiment: {}\n",
            segment.segment, segment.comment, sentiment
        ));
    }

    context.push_str("\n**Conversation History:**\n");
    for turn in input.chat_history {
        let role = match turn.role {
            ChatRole::User => "user",
            ChatRole::Model => "model",
        };
        context.push_str(&format!("  - {}: {}\n", role, turn.message));
    }

    context.push_str(&format!(
        "\n**User's New Message:**\n\"{}\"\n",
        input.user_message
    ));
    context
}

fn parse_grade_payload(text: &str) -> Result<GradeResponsePayload> {
    serde_json::from_str(json_payload(text))
        .map_err(|err| anyhow!("invalid grading JSON: {}", err))
}

/// Ids are assigned here rather than requested from the model, so they stay
/// well-formed and unique within a reply.
fn assign_segment_ids(payload: GradeResponsePayload) -> GradeDocumentOutput {
    let analysis = payload
        .analysis
        .into_iter()
        .enumerate()
        .map(|(index, item)| AnalysisSegment {
            id: new_segment_id(index),
            segment: item.segment,
            comment: item.comment,
            sentiment: item.sentiment,
        })
        .collect();

    GradeDocumentOutput {
        analysis,
        overall_feedback: payload.overall_feedback,
        score: payload.score,
    }
}

/// Models occasionally wrap the JSON object in a Markdown code fence despite
/// instructions; unwrap it before parsing.
fn json_payload(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[derive(Debug, Deserialize)]
struct GradeResponsePayload {
    #[serde(default)]
    analysis: Vec<SegmentPayload>,
    #[serde(rename = "overallFeedback", default)]
    overall_feedback: String,
    #[serde(default)]
    score: f64,
}

#[derive(Debug, Deserialize)]
struct SegmentPayload {
    segment: String,
    #[serde(default)]
    comment: String,
    sentiment: Sentiment,
}

#[derive(Debug, Deserialize)]
struct ChatResponsePayload {
    #[serde(rename = "llmResponse", default)]
    llm_response: String,
    #[serde(rename = "updatedAnalysis")]
    updated_analysis: GradeResponsePayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_payload_parses_and_gets_ids() {
        let text = r#"{
            "analysis": [
                {"segment": "makes sugar for food", "comment": "Correct product.", "sentiment": "positive"},
                {"segment": "through their roots", "comment": "Plants absorb sunlight through leaves.", "sentiment": "negative"}
            ],
            "overallFeedback": "Mostly right.",
            "score": 7
        }"#;
        let output = assign_segment_ids(parse_grade_payload(text).unwrap());
        assert_eq!(output.analysis.len(), 2);
        assert!(output.analysis[0].id.starts_with("segment-0-"));
        assert!(output.analysis[1].id.starts_with("segment-1-"));
        assert_eq!(output.analysis[0].sentiment, Sentiment::Positive);
        assert_eq!(output.overall_feedback, "Mostly right.");
        assert_eq!(output.score, 7.0);
    }

    #[test]
    fn fenced_json_is_unwrapped() {
        let text = "```json\n{\"analysis\": [], \"overallFeedback\": \"ok\", \"score\": 5}\n```";
        let output = parse_grade_payload(text).unwrap();
        assert_eq!(output.overall_feedback, "ok");
        assert_eq!(output.score, 5.0);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(parse_grade_payload("The student did well overall.").is_err());
    }

    #[test]
    fn chat_payload_parses_nested_analysis() {
        let text = r#"{
            "llmResponse": "I raised the score as requested.",
            "updatedAnalysis": {
                "analysis": [{"segment": "powerhouse of the cell", "comment": "Key phrase.", "sentiment": "positive"}],
                "overallFeedback": "Better than first judged.",
                "score": 9
            }
        }"#;
        let payload: ChatResponsePayload = serde_json::from_str(json_payload(text)).unwrap();
        assert_eq!(payload.llm_response, "I raised the score as requested.");
        let updated = assign_segment_ids(payload.updated_analysis);
        assert_eq!(updated.analysis.len(), 1);
        assert_eq!(updated.score, 9.0);
    }

    #[test]
    fn grading_context_includes_keywords_only_when_present() {
        let mut question = Question {
            id: "q1".to_string(),
            text: "Explain photosynthesis.".to_string(),
            rubric: "Out of 10.".to_string(),
            keywords: String::new(),
            max_points: 10.0,
        };
        let without = build_grading_context(&GradeDocumentInput {
            question: &question,
            answer: "Plants make food.",
        });
        assert!(!without.contains("Keywords to consider"));

        question.keywords = "chlorophyll, glucose".to_string();
        let with = build_grading_context(&GradeDocumentInput {
            question: &question,
            answer: "Plants make food.",
        });
        assert!(with.contains("Keywords to consider"));
        assert!(with.contains("chlorophyll, glucose"));
        assert!(with.contains("maximum score is 10"));
    }
}
