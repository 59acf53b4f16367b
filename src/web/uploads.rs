use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

use axum::extract::Multipart;
use tokio::{fs::File, io::AsyncWriteExt};

/// Result type used by the shared upload helpers.
pub type UploadResult<T> = Result<T, UploadError>;

/// Error returned when validating or persisting uploaded files.
#[derive(Debug)]
pub struct UploadError {
    message: String,
}

impl UploadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for UploadError {}

/// Expectations for a single multipart file field. Stored filenames keep the
/// sanitized original name because student names are derived from it.
#[derive(Debug, Clone, Copy)]
pub struct FileFieldConfig<'a> {
    pub field_name: &'a str,
    pub allowed_extensions: &'a [&'a str],
    pub max_files: usize,
    pub min_files: usize,
}

impl<'a> FileFieldConfig<'a> {
    pub fn new(field_name: &'a str, allowed_extensions: &'a [&'a str], max_files: usize) -> Self {
        Self {
            field_name,
            allowed_extensions,
            max_files,
            min_files: if max_files == 0 { 0 } else { 1 },
        }
    }
}

/// Metadata describing a stored upload on disk.
#[derive(Debug, Clone)]
pub struct SavedFile {
    pub field_name: String,
    pub original_name: String,
    pub stored_name: String,
    pub stored_path: PathBuf,
    pub file_size: u64,
}

/// Aggregated output of the shared upload processor.
#[derive(Debug, Default)]
pub struct UploadOutcome {
    pub files: Vec<SavedFile>,
    pub text_fields: HashMap<String, Vec<String>>,
}

impl UploadOutcome {
    pub fn files_for<'a>(&'a self, field_name: &str) -> impl Iterator<Item = &'a SavedFile> {
        self.files
            .iter()
            .filter(move |file| file.field_name == field_name)
    }

    pub fn first_text(&self, field_name: &str) -> Option<&str> {
        self.text_fields
            .get(field_name)
            .and_then(|values| values.first().map(|s| s.as_str()))
    }
}

/// Ensures the destination directory exists.
pub async fn ensure_directory(path: &Path) -> UploadResult<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|err| UploadError::new(format!("failed to create upload directory: {err}")))
}

/// Parses multipart form data, persisting files according to the provided configuration.
///
/// The caller is responsible for creating a unique destination directory (e.g. per ingest).
pub async fn process_upload_form(
    mut multipart: Multipart,
    dest_dir: &Path,
    field_configs: &[FileFieldConfig<'_>],
) -> UploadResult<UploadOutcome> {
    ensure_directory(dest_dir).await?;

    let mut field_states = HashMap::new();
    for config in field_configs {
        if config.max_files == 0 {
            return Err(UploadError::new(format!(
                "max_files for field `{}` must be greater than 0",
                config.field_name
            )));
        }
        if config.min_files > config.max_files {
            return Err(UploadError::new(format!(
                "min_files for field `{}` cannot exceed max_files",
                config.field_name
            )));
        }
        field_states.insert(
            config.field_name.to_string(),
            FieldState {
                config: *config,
                count: 0,
            },
        );
    }

    let mut text_fields: HashMap<String, Vec<String>> = HashMap::new();
    let mut saved_files: Vec<SavedFile> = Vec::new();
    let mut used_names: HashSet<String> = HashSet::new();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| UploadError::new(format!("failed to parse upload form: {err}")))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        if field.file_name().is_none() {
            let value = field.text().await.map_err(|err| {
                UploadError::new(format!("failed to read field `{field_name}`: {err}"))
            })?;
            text_fields
                .entry(field_name.clone())
                .or_default()
                .push(value);
            continue;
        }

        let Some(state) = field_states.get_mut(field_name.as_str()) else {
            return Err(UploadError::new(format!(
                "unsupported file field: `{field_name}`"
            )));
        };

        if state.count >= state.config.max_files {
            return Err(UploadError::new(format!(
                "too many files for field `{}` (limit {})",
                state.config.field_name, state.config.max_files
            )));
        }

        let file_name = field.file_name().unwrap_or("upload.bin").to_string();
        let mut sanitized = sanitize_filename::sanitize(&file_name);
        let extension = Path::new(&file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();

        if sanitized.is_empty() {
            sanitized = if extension.is_empty() {
                format!("file_{}", state.count)
            } else {
                format!("file_{}.{}", state.count, extension)
            };
        }

        if !state.config.allowed_extensions.is_empty()
            && !state
                .config
                .allowed_extensions
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(&extension))
        {
            return Err(UploadError::new(format!(
                "field `{}` does not accept `{extension}` files",
                state.config.field_name
            )));
        }

        let stored_name = unique_name(sanitized, &mut used_names);
        let stored_path = dest_dir.join(&stored_name);
        let mut file = File::create(&stored_path)
            .await
            .map_err(|err| UploadError::new(format!("failed to save file: {err}")))?;

        let mut total_bytes: u64 = 0;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|err| UploadError::new(format!("failed to read upload data: {err}")))?
        {
            total_bytes += chunk.len() as u64;
            file.write_all(&chunk)
                .await
                .map_err(|err| UploadError::new(format!("failed to write file: {err}")))?;
        }
        file.flush()
            .await
            .map_err(|err| UploadError::new(format!("failed to flush file: {err}")))?;

        saved_files.push(SavedFile {
            field_name: state.config.field_name.to_string(),
            original_name: file_name,
            stored_name,
            stored_path,
            file_size: total_bytes,
        });

        state.count += 1;
    }

    for state in field_states.values() {
        if state.count < state.config.min_files {
            return Err(UploadError::new(format!(
                "field `{}` requires at least {} file(s)",
                state.config.field_name, state.config.min_files
            )));
        }
    }

    Ok(UploadOutcome {
        files: saved_files,
        text_fields,
    })
}

#[derive(Clone, Copy, Debug)]
struct FieldState<'a> {
    config: FileFieldConfig<'a>,
    count: usize,
}

fn unique_name(candidate: String, used: &mut HashSet<String>) -> String {
    if used.insert(candidate.clone()) {
        return candidate;
    }

    let (stem, extension) = split_name(&candidate);
    let mut counter = 1usize;
    loop {
        let attempt = if extension.is_empty() {
            format!("{}_{}", stem, counter)
        } else {
            format!("{}_{}.{}", stem, counter, extension)
        };
        if used.insert(attempt.clone()) {
            return attempt;
        }
        counter += 1;
    }
}

fn split_name(name: &str) -> (String, String) {
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
        .to_string();
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_string();
    (stem, extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_name_appends_counter() {
        let mut used = HashSet::new();
        let first = unique_name("Alice.docx".to_string(), &mut used);
        let second = unique_name("Alice.docx".to_string(), &mut used);
        assert_eq!(first, "Alice.docx");
        assert_eq!(second, "Alice_1.docx");
    }

    #[test]
    fn split_name_handles_extension() {
        let (stem, ext) = split_name("report.final.docx");
        assert_eq!(stem, "report.final");
        assert_eq!(ext, "docx");
    }
}
