//! One-shot tool endpoints. Results the client never inspects stay opaque JSON.

use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::path::{Path, PathBuf};
use validator::Validate;

use super::dto::{
    BatchStatus, BatchUploadResponse, CodeExplainRequest, CodeFixRequest, CodeGenerateRequest,
    CodeReviewRequest, ExportFormat, ExtractionJob, InstructionRequest, ProcessingStatus,
    ResearchRequest, ScrapeRequest, MAX_BATCH_FILES, MAX_BATCH_NAME_LEN,
};
use super::{ApiClient, ApiError};

async fn file_part(path: &Path) -> Result<Part, ApiError> {
    let bytes = tokio::fs::read(path).await?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "upload".to_string());
    Ok(Part::bytes(bytes).file_name(name))
}

fn trimmed_instruction(instruction: &str) -> Result<&str, ApiError> {
    let trimmed = instruction.trim();
    if trimmed.is_empty() {
        return Err(ApiError::InvalidInput(
            "instruction must not be empty".to_string(),
        ));
    }
    Ok(trimmed)
}

impl ApiClient {
    // ==================== CODE ====================

    pub async fn generate_code(&self, request: &CodeGenerateRequest) -> Result<Value, ApiError> {
        request.validate()?;
        self.post_json("/code/generate", request).await
    }

    pub async fn review_code(&self, request: &CodeReviewRequest) -> Result<Value, ApiError> {
        request.validate()?;
        self.post_json("/code/review", request).await
    }

    pub async fn explain_code(&self, request: &CodeExplainRequest) -> Result<Value, ApiError> {
        request.validate()?;
        self.post_json("/code/explain", request).await
    }

    pub async fn fix_code(&self, request: &CodeFixRequest) -> Result<Value, ApiError> {
        request.validate()?;
        self.post_json("/code/fix", request).await
    }

    // ==================== RESEARCH ====================

    pub async fn scrape_url(&self, url: &str) -> Result<Value, ApiError> {
        let request = ScrapeRequest {
            url: url.to_string(),
        };
        request.validate()?;
        self.post_json("/research/scrape", &request).await
    }

    pub async fn research_topic(&self, request: &ResearchRequest) -> Result<Value, ApiError> {
        request.validate()?;
        self.post_json("/research/topic", request).await
    }

    /// Uploads a document whose text can be folded into a research query.
    pub async fn upload_research_file(&self, path: &Path) -> Result<Value, ApiError> {
        let form = Form::new().part("file", file_part(path).await?);
        self.post_multipart("/research/upload", form).await
    }

    // ==================== EXTRACTION ====================

    pub async fn extract_file(&self, path: &Path) -> Result<ExtractionJob, ApiError> {
        let form = Form::new().part("file", file_part(path).await?);
        self.post_multipart("/extraction/extract", form).await
    }

    pub async fn processing_status(&self, job_id: &str) -> Result<ProcessingStatus, ApiError> {
        self.get_json(&format!("/processing/status/{}", job_id)).await
    }

    // ==================== EXPORT ====================

    /// Server-side export; see `services::export` for the client-side fallback.
    pub async fn export_raw(&self, data: &Value, format: ExportFormat) -> Result<Bytes, ApiError> {
        self.post_for_bytes(&format!("/export/{}", format.as_str()), data)
            .await
    }

    // ==================== BATCH ====================

    pub async fn batch_upload(
        &self,
        name: &str,
        files: &[PathBuf],
    ) -> Result<BatchUploadResponse, ApiError> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_BATCH_NAME_LEN {
            return Err(ApiError::InvalidInput(format!(
                "batch name must be 1-{} characters",
                MAX_BATCH_NAME_LEN
            )));
        }
        if files.is_empty() || files.len() > MAX_BATCH_FILES {
            return Err(ApiError::InvalidInput(format!(
                "a batch takes 1-{} files, got {}",
                MAX_BATCH_FILES,
                files.len()
            )));
        }

        let mut form = Form::new();
        for path in files {
            form = form.part("files", file_part(path).await?);
        }
        form = form.text("batch_name", name.to_string());

        tracing::info!("Uploading batch '{}' with {} files", name, files.len());
        self.post_multipart("/batch/upload", form).await
    }

    pub async fn batch_status(&self, batch_job_id: &str) -> Result<BatchStatus, ApiError> {
        self.get_json(&format!("/batch/status/{}", batch_job_id))
            .await
    }

    // ==================== INSTRUCTION ====================

    /// Applies a natural-language transformation to extracted data.
    pub async fn process_instruction(
        &self,
        instruction: &str,
        extracted_data: &Value,
    ) -> Result<Value, ApiError> {
        let instruction = trimmed_instruction(instruction)?;
        self.post_json(
            "/instruction/process",
            &InstructionRequest {
                instruction,
                extracted_data,
            },
        )
        .await
    }

    /// Same as [`process_instruction`](Self::process_instruction) without committing the result.
    pub async fn preview_instruction(
        &self,
        instruction: &str,
        extracted_data: &Value,
    ) -> Result<Value, ApiError> {
        let instruction = trimmed_instruction(instruction)?;
        self.post_json(
            "/instruction/preview",
            &InstructionRequest {
                instruction,
                extracted_data,
            },
        )
        .await
    }

    pub async fn instruction_examples(&self) -> Result<Value, ApiError> {
        self.get_json("/instruction/examples").await
    }
}
