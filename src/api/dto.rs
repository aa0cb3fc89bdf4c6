use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::{Validate, ValidateUrl, ValidationError};

// ==================== AUTH ====================

#[derive(Debug, Clone, Serialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, message = "Name is required"))]
    pub name: Option<String>,
}

// ==================== CHAT ====================

#[derive(Debug, Clone, Serialize)]
pub struct ConversationCreate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageCreate<'a> {
    pub content: &'a str,
}

// ==================== CODE ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExplainLevel {
    Beginner,
    Intermediate,
    Advanced,
}

pub const DEFAULT_LANGUAGE: &str = "python";

#[derive(Debug, Clone, Serialize, Validate)]
pub struct CodeGenerateRequest {
    #[validate(length(min = 10, message = "Description must be at least 10 characters"))]
    pub description: String,
    #[validate(length(min = 1, message = "Language is required"))]
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Serialize, Validate)]
pub struct CodeReviewRequest {
    #[validate(length(min = 1, message = "Code is required"))]
    pub code: String,
    #[validate(length(min = 1, message = "Language is required"))]
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focus: Option<String>,
}

#[derive(Debug, Clone, Serialize, Validate)]
pub struct CodeExplainRequest {
    #[validate(length(min = 1, message = "Code is required"))]
    pub code: String,
    #[validate(length(min = 1, message = "Language is required"))]
    pub language: String,
    pub level: ExplainLevel,
}

#[derive(Debug, Clone, Serialize, Validate)]
pub struct CodeFixRequest {
    #[validate(length(min = 1, message = "Code is required"))]
    pub code: String,
    #[validate(length(min = 1, message = "Error message is required"))]
    pub error: String,
    #[validate(length(min = 1, message = "Language is required"))]
    pub language: String,
}

// ==================== RESEARCH ====================

#[derive(Debug, Clone, Serialize, Validate)]
pub struct ScrapeRequest {
    #[validate(url(message = "Please enter a valid URL"))]
    pub url: String,
}

pub const DEFAULT_MAX_SOURCES: u32 = 5;

#[derive(Debug, Clone, Serialize, Validate)]
pub struct ResearchRequest {
    #[validate(length(min = 10, message = "Query must be at least 10 characters"))]
    pub query: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[validate(
        length(max = 10, message = "Maximum 10 URLs allowed"),
        custom(function = "validate_url_list")
    )]
    pub urls: Vec<String>,
    #[validate(range(min = 1, max = 10))]
    pub max_sources: u32,
}

fn validate_url_list(urls: &[String]) -> Result<(), ValidationError> {
    if urls.iter().all(|u| u.validate_url()) {
        Ok(())
    } else {
        Err(ValidationError::new("url").with_message("Every source must be a valid URL".into()))
    }
}

// ==================== INSTRUCTION ====================

#[derive(Debug, Clone, Serialize)]
pub struct InstructionRequest<'a> {
    pub instruction: &'a str,
    pub extracted_data: &'a Value,
}

// ==================== JOBS ====================

/// Reply of `/extraction/extract`: the job to poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionJob {
    pub job_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStatus {
    #[serde(default)]
    pub job_id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub cost_estimate: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProcessingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "completed" | "failed")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchUploadResponse {
    pub batch_job_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStatus {
    pub status: String,
    #[serde(default)]
    pub processed_files: u32,
    #[serde(default)]
    pub total_files: u32,
    #[serde(default)]
    pub progress: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status.as_str(),
            "completed" | "completed_with_errors" | "failed"
        )
    }
}

pub const MAX_BATCH_FILES: usize = 10;
pub const MAX_BATCH_NAME_LEN: usize = 100;

// ==================== EXPORT ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
    Excel,
    Xml,
    Html,
}

impl ExportFormat {
    /// Path segment under `/export/`.
    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Excel => "excel",
            ExportFormat::Xml => "xml",
            ExportFormat::Html => "html",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Excel => "xlsx",
            other => other.as_str(),
        }
    }
}
