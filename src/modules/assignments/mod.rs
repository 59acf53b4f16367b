//! Assignment lifecycle and answer ingestion endpoints.
//!
//! An assignment bundles a question roster, a student roster, and the grading
//! results derived from them. Students come in either as one uploaded
//! document per student or as one pasted block covering the whole class.

use std::path::PathBuf;

use axum::{
    Json, Router,
    extract::{Multipart, Path as AxumPath, State},
    http::StatusCode,
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

use crate::{
    flows,
    roster::{
        self, Question, Student,
        extract::{read_document_text, student_name_from_filename},
        parse,
    },
    store::assignments::AssignmentSummary,
    web::{
        ApiMessage, AppState, json_error,
        uploads::{FileFieldConfig, process_upload_form},
    },
};

const INGEST_STORAGE_ROOT: &str = "storage/ingest";
const INGEST_EXTENSIONS: &[&str] = &["pdf", "docx", "txt"];
const MAX_INGEST_FILES: usize = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/assignments", get(list_assignments).post(create_assignment))
        .route(
            "/api/assignments/:id",
            get(assignment_snapshot).delete(delete_assignment),
        )
        .route("/api/assignments/:id/name", put(rename_assignment))
        .route("/api/assignments/:id/questions", put(replace_questions))
        .route("/api/assignments/:id/students", put(replace_students))
        .route("/api/assignments/:id/example", post(load_example))
        .route("/api/assignments/:id/ingest/paste", post(ingest_paste))
        .route("/api/assignments/:id/ingest/files", post(ingest_files))
        .route("/api/format-answers", post(format_answers))
}

#[derive(Deserialize)]
struct CreateAssignmentRequest {
    name: String,
}

#[derive(Serialize)]
struct AssignmentSnapshot {
    id: String,
    name: String,
    questions: Vec<Question>,
    students: Vec<Student>,
    results: roster::GradingTable,
}

#[derive(Serialize)]
struct IngestResponse {
    students: Vec<Student>,
    warnings: Vec<String>,
}

#[derive(Deserialize)]
struct PasteRequest {
    text: String,
    #[serde(rename = "expectedStudents", default)]
    expected_students: Option<usize>,
}

#[derive(Deserialize)]
struct FormatRequest {
    text: String,
}

#[derive(Serialize)]
struct FormatResponse {
    #[serde(rename = "formattedText")]
    formatted_text: String,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ApiMessage>)>;

async fn list_assignments(State(state): State<AppState>) -> ApiResult<Json<Vec<AssignmentSummary>>> {
    let listed = state.store().list().await.map_err(internal)?;
    Ok(Json(listed))
}

async fn create_assignment(
    State(state): State<AppState>,
    Json(request): Json<CreateAssignmentRequest>,
) -> ApiResult<(StatusCode, Json<AssignmentSummary>)> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "Assignment name cannot be empty.",
        ));
    }

    let id = state.store().create(name).await.map_err(internal)?;
    Ok((
        StatusCode::CREATED,
        Json(AssignmentSummary {
            id,
            name: name.to_string(),
        }),
    ))
}

async fn assignment_snapshot(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<AssignmentSnapshot>> {
    let store = state.store();
    let name = require_assignment(&state, &id).await?;

    let questions = store.questions(&id).await.map_err(internal)?;
    let students = store.students(&id).await.map_err(internal)?;
    let results = store.results(&id).await.map_err(internal)?;

    Ok(Json(AssignmentSnapshot {
        id,
        name,
        questions,
        students,
        results,
    }))
}

async fn delete_assignment(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<StatusCode> {
    require_assignment(&state, &id).await?;
    state.store().delete(&id).await.map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn rename_assignment(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(request): Json<CreateAssignmentRequest>,
) -> ApiResult<StatusCode> {
    require_assignment(&state, &id).await?;
    let name = request.name.trim();
    if name.is_empty() {
        return Err(json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "Assignment name cannot be empty.",
        ));
    }
    state.store().set_name(&id, name).await.map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Replaces the question roster. Questions arriving without an id are minted
/// one; editing questions invalidates previous grading results, which are
/// cleared.
async fn replace_questions(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(mut questions): Json<Vec<Question>>,
) -> ApiResult<Json<Vec<Question>>> {
    require_assignment(&state, &id).await?;

    for (index, question) in questions.iter_mut().enumerate() {
        if question.id.trim().is_empty() {
            question.id = format!("q{}", roster::timestamp_millis() + index as i64);
        }
        if !question.max_points.is_finite() || question.max_points <= 0.0 {
            return Err(json_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "maxPoints must be a positive number.",
            ));
        }
    }

    let store = state.store();
    store.set_questions(&id, &questions).await.map_err(internal)?;
    store
        .set_results(&id, &roster::GradingTable::default())
        .await
        .map_err(internal)?;
    store.clear_chat(&id).await.map_err(internal)?;
    Ok(Json(questions))
}

async fn replace_students(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(mut students): Json<Vec<Student>>,
) -> ApiResult<Json<Vec<Student>>> {
    require_assignment(&state, &id).await?;

    for (index, student) in students.iter_mut().enumerate() {
        if student.id.trim().is_empty() {
            student.id = roster::new_student_id(index);
        }
    }

    let store = state.store();
    store.set_students(&id, &students).await.map_err(internal)?;
    store
        .set_results(&id, &roster::GradingTable::default())
        .await
        .map_err(internal)?;
    store.clear_chat(&id).await.map_err(internal)?;
    Ok(Json(students))
}

/// Loads the built-in sample assignment so the grader can be tried end to end
/// without entering any data.
async fn load_example(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<AssignmentSnapshot>> {
    let name = require_assignment(&state, &id).await?;

    let (questions, students) = roster::example_roster();
    let store = state.store();
    store.set_questions(&id, &questions).await.map_err(internal)?;
    store.set_students(&id, &students).await.map_err(internal)?;
    store
        .set_results(&id, &roster::GradingTable::default())
        .await
        .map_err(internal)?;
    store.clear_chat(&id).await.map_err(internal)?;

    Ok(Json(AssignmentSnapshot {
        id,
        name,
        questions,
        students,
        results: roster::GradingTable::default(),
    }))
}

/// Mode B ingestion: one pasted block with names and bulleted answers.
async fn ingest_paste(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(request): Json<PasteRequest>,
) -> ApiResult<Json<IngestResponse>> {
    require_assignment(&state, &id).await?;

    let store = state.store();
    let questions = store.questions(&id).await.map_err(internal)?;

    let mut outcome = parse::parse_pasted_block(&request.text);
    outcome.warnings.extend(parse::validate_roster(
        &outcome.students,
        request.expected_students,
        questions.len(),
    ));

    store
        .set_students(&id, &outcome.students)
        .await
        .map_err(internal)?;
    store
        .set_results(&id, &roster::GradingTable::default())
        .await
        .map_err(internal)?;
    store.clear_chat(&id).await.map_err(internal)?;

    Ok(Json(IngestResponse {
        students: outcome.students,
        warnings: outcome.warnings,
    }))
}

/// Mode A ingestion: one uploaded document per student. Files are staged to a
/// per-request directory, extracted, and removed afterwards. Unreadable files
/// become warnings rather than failing the whole batch.
async fn ingest_files(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    multipart: Multipart,
) -> ApiResult<Json<IngestResponse>> {
    require_assignment(&state, &id).await?;

    let dest_dir = PathBuf::from(INGEST_STORAGE_ROOT).join(Uuid::new_v4().to_string());
    let config = FileFieldConfig::new("files", INGEST_EXTENSIONS, MAX_INGEST_FILES);

    let upload = process_upload_form(multipart, &dest_dir, &[config])
        .await
        .map_err(|err| json_error(StatusCode::BAD_REQUEST, err.message().to_string()))?;

    let expected_students = upload
        .first_text("expectedStudents")
        .and_then(|value| value.trim().parse::<usize>().ok());

    let mut documents = Vec::new();
    let mut warnings = Vec::new();
    for file in upload.files_for("files") {
        match read_document_text(&file.stored_path) {
            Ok(text) => {
                documents.push((student_name_from_filename(&file.original_name), text));
            }
            Err(err) => {
                warnings.push(format!(
                    "Could not read \"{}\": {}",
                    file.original_name, err
                ));
            }
        }
    }

    if let Err(err) = tokio::fs::remove_dir_all(&dest_dir).await {
        warn!(?err, dir = %dest_dir.display(), "failed to clean up ingest directory");
    }

    let store = state.store();
    let questions = store.questions(&id).await.map_err(internal)?;

    let mut outcome = parse::parse_student_files(documents);
    warnings.append(&mut outcome.warnings);
    warnings.extend(parse::validate_roster(
        &outcome.students,
        expected_students,
        questions.len(),
    ));

    store
        .set_students(&id, &outcome.students)
        .await
        .map_err(internal)?;
    store
        .set_results(&id, &roster::GradingTable::default())
        .await
        .map_err(internal)?;
    store.clear_chat(&id).await.map_err(internal)?;

    Ok(Json(IngestResponse {
        students: outcome.students,
        warnings,
    }))
}

/// Hands a messy pasted block to the formatting model so it comes back in the
/// name-plus-bullets layout the parser understands. The caller still reviews
/// and re-submits the result through the paste endpoint.
async fn format_answers(
    State(state): State<AppState>,
    Json(request): Json<FormatRequest>,
) -> ApiResult<Json<FormatResponse>> {
    if request.text.trim().is_empty() {
        return Err(json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "There is no text to format.",
        ));
    }

    let Some(settings) = state.grader_settings().await else {
        return Err(json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Grader settings are not configured.",
        ));
    };

    let formatted = flows::format_answers(&state.llm_client(), &settings, &request.text)
        .await
        .map_err(|err| {
            error!(?err, "answer formatting failed");
            json_error(
                StatusCode::BAD_GATEWAY,
                "The formatting model did not return a usable reply.",
            )
        })?;

    Ok(Json(FormatResponse {
        formatted_text: formatted,
    }))
}

pub(crate) async fn require_assignment(
    state: &AppState,
    id: &str,
) -> Result<String, (StatusCode, Json<ApiMessage>)> {
    match state.store().name(id).await {
        Ok(Some(name)) => Ok(name),
        Ok(None) => Err(json_error(StatusCode::NOT_FOUND, "Assignment not found.")),
        Err(err) => {
            error!(?err, assignment = id, "failed to load assignment");
            Err(json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error.",
            ))
        }
    }
}

pub(crate) fn internal(err: anyhow::Error) -> (StatusCode, Json<ApiMessage>) {
    error!(?err, "assignment storage error");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paste_request_accepts_expected_student_count() {
        let request: PasteRequest =
            serde_json::from_str(r#"{"text":"Alice\n• A1","expectedStudents":3}"#).unwrap();
        assert_eq!(request.expected_students, Some(3));

        let request: PasteRequest = serde_json::from_str(r#"{"text":"Alice\n• A1"}"#).unwrap();
        assert_eq!(request.expected_students, None);
    }

    #[test]
    fn snapshot_serializes_with_persisted_field_names() {
        let snapshot = AssignmentSnapshot {
            id: "asg-1".to_string(),
            name: "Quiz".to_string(),
            questions: Vec::new(),
            students: Vec::new(),
            results: roster::GradingTable::default(),
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["id"], "asg-1");
        assert!(value["results"].is_object());
    }
}
