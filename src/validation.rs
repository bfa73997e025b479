//! Upload gate for `POST /analyze`.
//!
//! Every file is checked against the configured limits before anything is
//! sent to the model provider.  Sizes are recomputed from the payload itself;
//! whatever size the browser reported is never consulted.

use std::collections::HashSet;

use thiserror::Error;

use crate::payload::{decoded_byte_length, extract_payload};
use crate::AnalysisRequestFile;

pub const DEFAULT_MAX_FILES: usize = 5;
pub const DEFAULT_MAX_FILE_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_MAX_TOTAL_BYTES: usize = 25 * 1024 * 1024;
pub const PDF_MIME_TYPE: &str = "application/pdf";

#[derive(Debug, Clone)]
pub struct UploadLimits {
    pub max_files: usize,
    pub max_file_bytes: usize,
    pub max_total_bytes: usize,
    pub allowed_mime_types: HashSet<String>,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_files: DEFAULT_MAX_FILES,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            max_total_bytes: DEFAULT_MAX_TOTAL_BYTES,
            allowed_mime_types: HashSet::from([PDF_MIME_TYPE.to_string()]),
        }
    }
}

/// First failing condition found while validating an upload batch.  Messages
/// are written for end users and returned verbatim.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("At least {min} file is required")]
    TooFewFiles { min: usize },
    #[error("At most {max} files can be analyzed at once")]
    TooManyFiles { max: usize },
    #[error("Unsupported file type '{declared}'; only PDF documents are accepted")]
    UnsupportedType { declared: String },
    #[error("File '{name}' is declared as '{declared}' but its data URI says '{detected}'")]
    MimeMismatch {
        name: String,
        declared: String,
        detected: String,
    },
    #[error("File '{name}' is not valid base64")]
    InvalidEncoding { name: String },
    #[error("File '{name}' exceeds the {} size limit", format_mib(.limit))]
    FileTooLarge { name: String, size: usize, limit: usize },
    #[error("Uploaded files exceed the {} combined size limit", format_mib(.limit))]
    TotalTooLarge { total: usize, limit: usize },
    #[error("Invalid request body: {0}")]
    Malformed(String),
}

impl ValidationError {
    /// Size violations map to 413; everything else is a plain bad request.
    pub fn is_size_violation(&self) -> bool {
        matches!(
            self,
            ValidationError::FileTooLarge { .. } | ValidationError::TotalTooLarge { .. }
        )
    }
}

/// A file that passed every check.  Borrows the request body so the bytes
/// that were measured are exactly the bytes forwarded to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedDocument<'a> {
    pub name: Option<&'a str>,
    pub mime_type: &'a str,
    pub payload: &'a str,
    pub decoded_bytes: usize,
}

impl ValidatedDocument<'_> {
    pub fn display_name(&self) -> &str {
        match self.name.map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => crate::model::UNTITLED_FILE_NAME,
        }
    }
}

/// Validate an upload batch in order, stopping at the first failure.
pub fn validate_upload<'a>(
    files: &'a [AnalysisRequestFile],
    limits: &UploadLimits,
) -> Result<Vec<ValidatedDocument<'a>>, ValidationError> {
    if files.is_empty() {
        return Err(ValidationError::TooFewFiles { min: 1 });
    }
    if files.len() > limits.max_files {
        return Err(ValidationError::TooManyFiles {
            max: limits.max_files,
        });
    }

    let mut documents = Vec::with_capacity(files.len());
    let mut total: usize = 0;
    for (idx, file) in files.iter().enumerate() {
        let label = || file_label(file, idx);

        if !limits.allowed_mime_types.contains(file.mime_type.as_str()) {
            return Err(ValidationError::UnsupportedType {
                declared: file.mime_type.clone(),
            });
        }

        let extracted = extract_payload(&file.base64);
        if let Some(detected) = extracted.detected_mime_type {
            if detected != file.mime_type {
                return Err(ValidationError::MimeMismatch {
                    name: label(),
                    declared: file.mime_type.clone(),
                    detected: detected.to_string(),
                });
            }
        }

        let size = decoded_byte_length(extracted.payload)
            .ok_or_else(|| ValidationError::InvalidEncoding { name: label() })?;
        if size > limits.max_file_bytes {
            return Err(ValidationError::FileTooLarge {
                name: label(),
                size,
                limit: limits.max_file_bytes,
            });
        }

        total = total.saturating_add(size);
        if total > limits.max_total_bytes {
            tracing::debug!(file_index = idx, total, "upload batch crossed total size limit");
            return Err(ValidationError::TotalTooLarge {
                total,
                limit: limits.max_total_bytes,
            });
        }

        documents.push(ValidatedDocument {
            name: file.name.as_deref(),
            mime_type: file.mime_type.as_str(),
            payload: extracted.payload,
            decoded_bytes: size,
        });
    }
    Ok(documents)
}

fn file_label(file: &AnalysisRequestFile, idx: usize) -> String {
    match file.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => format!("#{}", idx + 1),
    }
}

fn format_mib(bytes: &usize) -> String {
    let mib = *bytes as f64 / (1024.0 * 1024.0);
    if mib.fract() == 0.0 {
        format!("{} MiB", mib as u64)
    } else {
        format!("{:.2} MiB", mib)
    }
}
