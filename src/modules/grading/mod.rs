//! Grading endpoints: the background grading job, chat refinement of a
//! graded pair, and manual score overrides.
//!
//! A grading run walks every (question, student) pair in roster order,
//! strictly one LLM call at a time, persisting each result as it lands.
//! The first failed call aborts the run; results graded up to that point are
//! kept so a retry has less to redo.

use axum::{
    Json, Router,
    extract::{Path as AxumPath, State},
    http::StatusCode,
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::{
    flows::{self, ChatWithDocumentInput, GradeDocumentInput},
    highlight,
    modules::assignments::{internal, require_assignment},
    roster::{ChatRole, ChatTurn, GradingResult, GradingTable, Student},
    store::assignments::{GradeJobStatus, JobStatus},
    web::{ApiMessage, AppState, json_error},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/assignments/:id/grade", post(start_grading))
        .route("/api/assignments/:id/grade/status", get(grading_status))
        .route("/api/assignments/:id/chat", post(chat))
        .route(
            "/api/assignments/:id/results/:question_id/:student_id/score",
            put(override_score),
        )
}

#[derive(Serialize)]
struct GradeSubmission {
    #[serde(rename = "statusUrl")]
    status_url: String,
}

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(rename = "questionId")]
    question_id: String,
    #[serde(rename = "studentId")]
    student_id: String,
    message: String,
}

#[derive(Serialize)]
struct ChatResponse {
    #[serde(rename = "llmResponse")]
    llm_response: String,
    result: GradingResult,
}

#[derive(Deserialize)]
struct ScoreOverrideRequest {
    score: f64,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ApiMessage>)>;

async fn start_grading(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<(StatusCode, Json<GradeSubmission>)> {
    require_assignment(&state, &id).await?;

    let store = state.store();
    let questions = store.questions(&id).await.map_err(internal)?;
    let students = store.students(&id).await.map_err(internal)?;

    if questions.is_empty() || students.is_empty() {
        return Err(json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "Add at least one question and one student before grading.",
        ));
    }

    if let Some(status) = store.grade_status(&id).await.map_err(internal)? {
        if matches!(status.status, JobStatus::Pending | JobStatus::Processing) {
            return Err(json_error(
                StatusCode::CONFLICT,
                "A grading run is already in progress for this assignment.",
            ));
        }
    }

    let total = questions.len() * students.len();
    store
        .set_grade_status(&id, &GradeJobStatus::pending(total))
        .await
        .map_err(internal)?;

    spawn_grade_worker(state, id.clone());

    Ok((
        StatusCode::ACCEPTED,
        Json(GradeSubmission {
            status_url: format!("/api/assignments/{id}/grade/status"),
        }),
    ))
}

async fn grading_status(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<GradeJobStatus>> {
    require_assignment(&state, &id).await?;

    match state.store().grade_status(&id).await.map_err(internal)? {
        Some(status) => Ok(Json(status)),
        None => Err(json_error(
            StatusCode::NOT_FOUND,
            "No grading run has been started for this assignment.",
        )),
    }
}

fn spawn_grade_worker(state: AppState, assignment_id: String) {
    tokio::spawn(async move {
        if let Err(err) = process_grade_job(state, &assignment_id).await {
            error!(?err, assignment = %assignment_id, "grading job failed");
        }
    });
}

async fn process_grade_job(state: AppState, assignment_id: &str) -> anyhow::Result<()> {
    let store = state.store();
    let questions = store.questions(assignment_id).await?;
    let students = store.students(assignment_id).await?;
    let total = questions.len() * students.len();

    let Some(settings) = state.grader_settings().await else {
        mark_failed(
            &state,
            assignment_id,
            0,
            total,
            "Grader settings are not configured.",
        )
        .await?;
        return Ok(());
    };
    let llm = state.llm_client();

    // A fresh run invalidates everything graded before.
    let mut results = GradingTable::default();
    store.set_results(assignment_id, &results).await?;

    let mut completed = 0usize;
    for (question_index, question) in questions.iter().enumerate() {
        for student in &students {
            update_status(
                &state,
                assignment_id,
                JobStatus::Processing,
                &pair_detail(question_index, student),
                completed,
                total,
            )
            .await?;

            let Some(answer) = answer_for(student, question_index) else {
                // No answer to grade; the pair still counts toward progress.
                completed += 1;
                continue;
            };

            let output = match flows::grade_document(
                &llm,
                &settings,
                GradeDocumentInput { question, answer },
            )
            .await
            {
                Ok(output) => output,
                Err(err) => {
                    error!(?err, assignment = assignment_id, question = %question.id,
                           student = %student.id, "grading call failed");
                    mark_failed(
                        &state,
                        assignment_id,
                        completed,
                        total,
                        &format!(
                            "Grading failed on question {} for {}: {}",
                            question_index + 1,
                            student.name,
                            err
                        ),
                    )
                    .await?;
                    return Ok(());
                }
            };

            let highlighted = highlight::reconcile(answer, &output.analysis);
            results.insert(
                &question.id,
                &student.id,
                GradingResult {
                    analysis: output.analysis,
                    overall_feedback: output.overall_feedback,
                    score: output.score,
                    highlighted_answer: highlighted,
                },
            );
            // Persist per pair so an aborted run keeps its partial results.
            store.set_results(assignment_id, &results).await?;
            completed += 1;
        }
    }

    update_status(
        &state,
        assignment_id,
        JobStatus::Completed,
        &format!("Graded {completed} of {total} pairs."),
        completed,
        total,
    )
    .await?;

    Ok(())
}

/// Discusses a graded answer with the model and applies the refreshed
/// analysis. Nothing is persisted when the model call fails, so the failed
/// user message never enters the stored history.
async fn chat(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<ChatResponse>> {
    require_assignment(&state, &id).await?;

    let store = state.store();
    let questions = store.questions(&id).await.map_err(internal)?;
    let students = store.students(&id).await.map_err(internal)?;
    let mut results = store.results(&id).await.map_err(internal)?;

    let Some((question_index, question)) = questions
        .iter()
        .enumerate()
        .find(|(_, q)| q.id == request.question_id)
    else {
        return Err(json_error(StatusCode::NOT_FOUND, "Question not found."));
    };
    let Some(student) = students.iter().find(|s| s.id == request.student_id) else {
        return Err(json_error(StatusCode::NOT_FOUND, "Student not found."));
    };
    let Some(current) = results.get(&question.id, &student.id).cloned() else {
        return Err(json_error(
            StatusCode::NOT_FOUND,
            "Grade this answer before chatting about it.",
        ));
    };

    if request.message.trim().is_empty() {
        return Err(json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "The chat message cannot be empty.",
        ));
    }

    let Some(settings) = state.grader_settings().await else {
        return Err(json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Grader settings are not configured.",
        ));
    };

    // The stored highlighted answer is the source of truth for the text under
    // discussion; strip the markup to recover the plain answer.
    let plain_answer = highlight::strip_markup(&current.highlighted_answer);
    let answer = if plain_answer.is_empty() {
        answer_for(student, question_index).unwrap_or_default()
    } else {
        plain_answer.as_str()
    };

    let history = store
        .chat_history(&id, &question.id, &student.id)
        .await
        .map_err(internal)?;

    let output = flows::chat_with_document(
        &state.llm_client(),
        &settings,
        ChatWithDocumentInput {
            question,
            answer,
            current: &current,
            chat_history: &history,
            user_message: &request.message,
        },
    )
    .await
    .map_err(|err| {
        error!(?err, assignment = %id, "chat refinement failed");
        json_error(
            StatusCode::BAD_GATEWAY,
            "The model did not return a usable reply. Your message was not saved.",
        )
    })?;

    let updated = GradingResult {
        highlighted_answer: highlight::reconcile(answer, &output.updated.analysis),
        analysis: output.updated.analysis,
        overall_feedback: output.updated.overall_feedback,
        score: output.updated.score,
    };

    results.insert(&question.id, &student.id, updated.clone());
    store.set_results(&id, &results).await.map_err(internal)?;

    let mut turns = history;
    turns.push(ChatTurn {
        role: ChatRole::User,
        message: request.message,
    });
    turns.push(ChatTurn {
        role: ChatRole::Model,
        message: output.llm_response.clone(),
    });
    store
        .set_chat_history(&id, &question.id, &student.id, &turns)
        .await
        .map_err(internal)?;

    Ok(Json(ChatResponse {
        llm_response: output.llm_response,
        result: updated,
    }))
}

/// Manual score correction. Only the score changes; analysis, feedback, and
/// the highlighted answer stay as graded.
async fn override_score(
    State(state): State<AppState>,
    AxumPath((id, question_id, student_id)): AxumPath<(String, String, String)>,
    Json(request): Json<ScoreOverrideRequest>,
) -> ApiResult<Json<GradingResult>> {
    require_assignment(&state, &id).await?;

    if !request.score.is_finite() || request.score < 0.0 {
        return Err(json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "The score must be a non-negative number.",
        ));
    }

    let store = state.store();
    let mut results = store.results(&id).await.map_err(internal)?;
    let Some(mut result) = results.get(&question_id, &student_id).cloned() else {
        return Err(json_error(
            StatusCode::NOT_FOUND,
            "No grading result exists for this pair.",
        ));
    };

    result.score = request.score;
    results.insert(&question_id, &student_id, result.clone());
    store.set_results(&id, &results).await.map_err(internal)?;

    Ok(Json(result))
}

fn answer_for(student: &Student, question_index: usize) -> Option<&str> {
    student
        .answers
        .get(question_index)
        .map(String::as_str)
        .filter(|answer| !answer.trim().is_empty())
}

fn pair_detail(question_index: usize, student: &Student) -> String {
    format!("Grading question {} for {}", question_index + 1, student.name)
}

async fn update_status(
    state: &AppState,
    assignment_id: &str,
    status: JobStatus,
    detail: &str,
    completed_pairs: usize,
    total_pairs: usize,
) -> anyhow::Result<()> {
    state
        .store()
        .set_grade_status(
            assignment_id,
            &GradeJobStatus {
                status,
                detail: detail.to_string(),
                error_message: None,
                completed_pairs,
                total_pairs,
            },
        )
        .await
}

async fn mark_failed(
    state: &AppState,
    assignment_id: &str,
    completed_pairs: usize,
    total_pairs: usize,
    message: &str,
) -> anyhow::Result<()> {
    state
        .store()
        .set_grade_status(
            assignment_id,
            &GradeJobStatus {
                status: JobStatus::Failed,
                detail: "Grading stopped.".to_string(),
                error_message: Some(message.to_string()),
                completed_pairs,
                total_pairs,
            },
        )
        .await
}
