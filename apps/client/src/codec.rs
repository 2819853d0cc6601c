//! File transfer: upload-side extension guard and multipart packing,
//! download-side base64 decode and save.

use std::io::Write;
use std::path::{Path, PathBuf};

use base64::Engine;
use bytes::Bytes;
use serde::Deserialize;
use tracing::{debug, info};

use crate::errors::{ClientError, ValidationError};

pub const XLSX_MEDIA_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Spreadsheet,
    Unknown,
}

/// Which suffixes a flow accepts. Matching is case-insensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowList {
    /// Single-file batch prediction and the multi-year trend.
    Excel,
    /// Comparison also takes CSV exports.
    ExcelOrCsv,
}

impl AllowList {
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            AllowList::Excel => &[".xlsx", ".xls"],
            AllowList::ExcelOrCsv => &[".xlsx", ".xls", ".csv"],
        }
    }

    pub fn classify(&self, name: &str) -> FileKind {
        let lower = name.to_lowercase();
        if self.extensions().iter().any(|ext| lower.ends_with(ext)) {
            FileKind::Spreadsheet
        } else {
            FileKind::Unknown
        }
    }
}

/// A user-selected file that passed the extension guard.
#[derive(Debug, Clone)]
pub struct UploadCandidate {
    pub raw_bytes: Bytes,
    pub declared_name: String,
    pub recognized_kind: FileKind,
}

impl UploadCandidate {
    pub fn media_type(&self) -> &'static str {
        let lower = self.declared_name.to_lowercase();
        if lower.ends_with(".xlsx") {
            XLSX_MEDIA_TYPE
        } else if lower.ends_with(".xls") {
            "application/vnd.ms-excel"
        } else if lower.ends_with(".csv") {
            "text/csv"
        } else {
            "application/octet-stream"
        }
    }

    /// Reads a file from disk and validates its name against `allow`.
    pub async fn from_path(path: &Path, allow: AllowList) -> Result<Self, ClientError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        // Reject on the name alone so a bad selection never touches the disk.
        if allow.classify(&name) != FileKind::Spreadsheet {
            return Err(unsupported(&name, allow).into());
        }
        let raw = tokio::fs::read(path).await?;
        Ok(validate(&name, Bytes::from(raw), allow)?)
    }
}

/// Accepts a file only if its name ends in one of the allowed suffixes.
/// The content itself is not inspected.
pub fn validate(
    name: &str,
    raw_bytes: Bytes,
    allow: AllowList,
) -> Result<UploadCandidate, ValidationError> {
    match allow.classify(name) {
        FileKind::Spreadsheet => Ok(UploadCandidate {
            raw_bytes,
            declared_name: name.to_string(),
            recognized_kind: FileKind::Spreadsheet,
        }),
        FileKind::Unknown => Err(unsupported(name, allow)),
    }
}

fn unsupported(name: &str, allow: AllowList) -> ValidationError {
    ValidationError::UnsupportedExtension {
        name: name.to_string(),
        allowed: allow.extensions().iter().map(|e| e.to_string()).collect(),
    }
}

/// Named candidates destined for one multipart request, in slot order.
#[derive(Debug, Clone, Default)]
pub struct UploadForm {
    parts: Vec<(String, UploadCandidate)>,
}

impl UploadForm {
    pub fn parts(&self) -> &[(String, UploadCandidate)] {
        &self.parts
    }

    pub fn slot_names(&self) -> Vec<&str> {
        self.parts.iter().map(|(slot, _)| slot.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn to_multipart(&self) -> Result<reqwest::multipart::Form, ClientError> {
        let mut form = reqwest::multipart::Form::new();
        for (slot, candidate) in &self.parts {
            let part = reqwest::multipart::Part::bytes(candidate.raw_bytes.to_vec())
                .file_name(candidate.declared_name.clone())
                .mime_str(candidate.media_type())?;
            form = form.part(slot.clone(), part);
        }
        Ok(form)
    }
}

/// Packs named slots into one form. Unset slots are left out entirely.
pub fn build_upload_form<'a, I>(slots: I) -> UploadForm
where
    I: IntoIterator<Item = (&'a str, Option<UploadCandidate>)>,
{
    let parts: Vec<_> = slots
        .into_iter()
        .filter_map(|(slot, candidate)| candidate.map(|c| (slot.to_string(), c)))
        .collect();
    debug!(
        "Upload form slots: {:?}",
        parts.iter().map(|(s, _)| s.as_str()).collect::<Vec<_>>()
    );
    UploadForm { parts }
}

/// A result file produced by the service.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EncodedFilePayload {
    #[serde(rename = "file_base64")]
    pub base64_body: String,
    #[serde(rename = "filename", default = "default_result_filename")]
    pub suggested_filename: String,
    #[serde(default = "default_media_type")]
    pub media_type: String,
}

fn default_result_filename() -> String {
    format!(
        "career_predictions_{}.xlsx",
        chrono::Utc::now().timestamp_millis()
    )
}

fn default_media_type() -> String {
    XLSX_MEDIA_TYPE.to_string()
}

impl EncodedFilePayload {
    pub fn decode(&self) -> Result<Vec<u8>, ClientError> {
        base64::engine::general_purpose::STANDARD
            .decode(self.base64_body.trim())
            .map_err(|e| ClientError::FileDecode(format!("invalid base64 body: {e}")))
    }
}

/// Destination for decoded result files.
#[derive(Debug, Clone)]
pub struct DownloadDir {
    root: PathBuf,
}

impl DownloadDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Decodes `payload` and saves it under its suggested name.
    ///
    /// Bytes go to a temp file in the same directory first and are only moved
    /// into place once fully written; on any error the temp file is removed.
    pub fn save(&self, payload: &EncodedFilePayload) -> Result<PathBuf, ClientError> {
        let body = payload.decode()?;
        let target = self.root.join(safe_file_name(&payload.suggested_filename));

        let mut staged = tempfile::NamedTempFile::new_in(&self.root)?;
        staged.write_all(&body)?;
        staged.flush()?;
        staged.persist(&target).map_err(|e| ClientError::Io(e.error))?;

        info!(
            "Saved {} ({} bytes, {}) to {}",
            payload.suggested_filename,
            body.len(),
            payload.media_type,
            target.display()
        );
        Ok(target)
    }
}

/// Keeps only the final path component so a server-chosen name cannot escape the directory.
fn safe_file_name(suggested: &str) -> String {
    let last = suggested
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    match last {
        "" | "." | ".." => default_result_filename(),
        name => name.to_string(),
    }
}
