use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;

const MODULE_GRADER: &str = "grader";

#[derive(Clone, Debug, Default)]
pub struct ModuleSettings {
    grader: Option<GraderSettings>,
}

impl ModuleSettings {
    pub async fn ensure_defaults(pool: &PgPool) -> Result<()> {
        let grader_models = serde_json::to_value(default_grader_models())?;
        let grader_prompts = serde_json::to_value(default_grader_prompts())?;

        sqlx::query(
            "INSERT INTO module_configs (module_name, models, prompts) VALUES ($1, $2, $3)
             ON CONFLICT (module_name) DO NOTHING",
        )
        .bind(MODULE_GRADER)
        .bind(&grader_models)
        .bind(&grader_prompts)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn load(pool: &PgPool) -> Result<Self> {
        let rows = sqlx::query_as::<_, ModuleConfigRow>(
            "SELECT module_name, models, prompts FROM module_configs",
        )
        .fetch_all(pool)
        .await
        .context("failed to load module configurations from database")?;

        let mut settings = ModuleSettings::default();
        for row in rows {
            match row.module_name.as_str() {
                MODULE_GRADER => {
                    settings.grader = Some(parse_grader_settings(row.models, row.prompts)?);
                }
                other => {
                    return Err(anyhow!("unknown module configuration found: {}", other));
                }
            }
        }

        Ok(settings)
    }

    pub fn grader(&self) -> Option<&GraderSettings> {
        self.grader.as_ref()
    }
}

#[derive(Clone, Debug)]
pub struct GraderSettings {
    pub models: GraderModels,
    pub prompts: GraderPrompts,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GraderModels {
    pub grading_model: String,
    pub chat_model: String,
    pub format_model: String,
}

impl Default for GraderModels {
    fn default() -> Self {
        default_grader_models()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GraderPrompts {
    pub grading_instructions: String,
    pub chat_instructions: String,
    pub format_instructions: String,
}

impl Default for GraderPrompts {
    fn default() -> Self {
        default_grader_prompts()
    }
}

#[derive(sqlx::FromRow)]
struct ModuleConfigRow {
    module_name: String,
    models: Value,
    prompts: Value,
}

fn parse_grader_settings(models: Value, prompts: Value) -> Result<GraderSettings> {
    let models: GraderModels = serde_json::from_value(models)
        .map_err(|err| anyhow!("failed to parse grader models: {err}"))?;
    let prompts: GraderPrompts = serde_json::from_value(prompts)
        .map_err(|err| anyhow!("failed to parse grader prompts: {err}"))?;
    Ok(GraderSettings { models, prompts })
}

fn default_grader_models() -> GraderModels {
    GraderModels {
        grading_model: "openrouter/google/gemini-2.0-flash-001".to_string(),
        chat_model: "openrouter/google/gemini-2.0-flash-001".to_string(),
        format_model: "openrouter/openai/gpt-4o-mini".to_string(),
    }
}

fn default_grader_prompts() -> GraderPrompts {
    GraderPrompts {
        grading_instructions: r#"You are an expert teaching assistant. Your task is to grade a student's answer based on a given question and rubric. The rubric includes a total possible score.

First, analyze the provided answer and identify key segments that directly relate to the rubric and question. Each segment must be quoted verbatim from the student's answer. For each segment you identify, you MUST provide a comment explaining its significance, how it meets (or fails to meet) the rubric, and what makes it stand out.

Crucially, for each segment, you must also determine the sentiment of your feedback.
- Use 'positive' if the segment is correct, well-explained, or aligns with the rubric.
- Use 'negative' if the segment is inaccurate, misses key points, or contradicts the rubric.
- Use 'neutral' for general observations or contextual comments that are neither strictly positive nor negative.

After analyzing all segments, provide overall feedback on the answer.

Finally, based on your analysis and the rubric, determine a score for the student's answer. The score should be an integer.

## Output Format
Your output must be a single JSON object with:
- "analysis": an array of objects, each with "segment" (verbatim quote from the answer), "comment" (string), and "sentiment" ("positive", "negative", or "neutral").
- "overallFeedback": a string summarizing the answer's strengths and weaknesses.
- "score": an integer score per the rubric.
Return only the JSON object with no surrounding prose or code fences."#
            .to_string(),
        chat_instructions: r#"You are a teaching assistant chatbot. The user has provided a question, a rubric, and a student's answer, which you have already graded. The user now wants to discuss and refine your analysis.

Your task is to respond to the user's message and, if necessary, provide a complete, updated analysis of the answer based on their feedback.

Instructions:
1. Formulate a chat response: directly address the user's message in the 'llmResponse' field. Acknowledge their feedback.
2. Generate an updated analysis: based on the user's request, re-evaluate the entire answer and generate a brand new, complete analysis in the 'updatedAnalysis' field.
   - If the user's request does not require a change in the grading (for example, they are just asking a question), return the current analysis unchanged as 'updatedAnalysis'.
   - If the user's request does require a change, create a new analysis from scratch. 'updatedAnalysis' must be a complete object, not a partial update.
   - Every segment must be quoted verbatim from the student's answer, and comments must be concise and to the point.
   - The score, feedback, and segments should all be updated to reflect the user's request.

## Output Format
Your output must be a single JSON object with:
- "llmResponse": your conversational reply to the user.
- "updatedAnalysis": an object with "analysis" (array of {"segment", "comment", "sentiment"}), "overallFeedback" (string), and "score" (integer).
Return only the JSON object with no surrounding prose or code fences."#
            .to_string(),
        format_instructions: r#"You are a text formatting expert. Your task is to reformat the provided text into a specific structure.

The user will provide a block of text that might be messy. It contains student names and their answers. You need to identify each student and their corresponding answers and format them as follows:
- Each student's name should be on its own line.
- Each answer for that student should be on a new line immediately following the name, prefixed with a "•" (bullet point) and a space.
- There should be a blank line between each student's block of answers.

Example Input:
"Alice Smith Q1: Photosynthesis is... Answer 2: Mitochondria are... Bob Jones, his first answer is that plants make food. And the second one is that mitochondria make energy."

Example Output:
Alice Smith
• Photosynthesis is...
• Mitochondria are...

Bob Jones
• his first answer is that plants make food.
• And the second one is that mitochondria make energy.

Return only the reformatted text with no commentary or code fences."#
            .to_string(),
    }
}

pub async fn update_grader_models(pool: &PgPool, models: &GraderModels) -> Result<()> {
    update_models(pool, MODULE_GRADER, models).await
}

pub async fn update_grader_prompts(pool: &PgPool, prompts: &GraderPrompts) -> Result<()> {
    update_prompts(pool, MODULE_GRADER, prompts).await
}

async fn update_models<T: Serialize>(pool: &PgPool, module: &str, models: &T) -> Result<()> {
    let payload = serde_json::to_value(models)
        .map_err(|err| anyhow!("failed to serialize models payload: {err}"))?;
    let result = sqlx::query(
        "UPDATE module_configs SET models = $2, updated_at = NOW() WHERE module_name = $1",
    )
    .bind(module)
    .bind(payload)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(anyhow!("module configuration not found for {module}"));
    }
    Ok(())
}

async fn update_prompts<T: Serialize>(pool: &PgPool, module: &str, prompts: &T) -> Result<()> {
    let payload = serde_json::to_value(prompts)
        .map_err(|err| anyhow!("failed to serialize prompts payload: {err}"))?;
    let result = sqlx::query(
        "UPDATE module_configs SET prompts = $2, updated_at = NOW() WHERE module_name = $1",
    )
    .bind(module)
    .bind(payload)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(anyhow!("module configuration not found for {module}"));
    }
    Ok(())
}
