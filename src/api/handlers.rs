use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use crate::db::entities::pdf_metadata;
use crate::ingest::synchronizer::{AttachmentFailure, SyncPhase, SyncResult};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct CheckEmailsResponse {
    pub success: bool,
    pub results: Vec<AccountReport>,
}

/// Per-account outcome of a run.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountReport {
    pub account_id: i32,
    pub email_address: String,
    pub success: bool,
    pub phase: SyncPhase,
    pub stored_count: usize,
    pub duplicate_count: usize,
    pub messages_seen: usize,
    pub skipped: Vec<SkippedAttachment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<SyncPhase>,
    pub auth_failure: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedAttachment {
    pub position: Option<u64>,
    pub filename: Option<String>,
    pub error: String,
}

impl From<&AttachmentFailure> for SkippedAttachment {
    fn from(f: &AttachmentFailure) -> Self {
        Self {
            position: f.position,
            filename: f.filename.clone(),
            error: f.error.to_string(),
        }
    }
}

impl From<&SyncResult> for AccountReport {
    fn from(r: &SyncResult) -> Self {
        Self {
            account_id: r.account_id,
            email_address: r.email_address.clone(),
            success: r.is_success(),
            phase: r.phase,
            stored_count: r.stored_count,
            duplicate_count: r.duplicate_count,
            messages_seen: r.messages_seen,
            skipped: r.attachment_failures.iter().map(SkippedAttachment::from).collect(),
            error: r.failure.as_ref().map(|f| f.error.to_string()),
            failed_phase: r.failure.as_ref().map(|f| f.phase),
            auth_failure: r.is_auth_failure(),
        }
    }
}

/// POST /api/email-ingestion/check-emails: run every account once.
pub async fn check_emails(
    State(state): State<AppState>,
) -> Result<Json<CheckEmailsResponse>, ApiError> {
    let results = state.orchestrator.run_once().await?;

    Ok(Json(CheckEmailsResponse {
        success: true,
        results: results.iter().map(AccountReport::from).collect(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListPdfsQuery {
    pub account_id: Option<i32>,
}

/// GET /api/pdfs: stored attachment metadata, newest first.
pub async fn list_pdfs(
    State(state): State<AppState>,
    Query(query): Query<ListPdfsQuery>,
) -> Result<Json<Vec<pdf_metadata::Model>>, ApiError> {
    let mut select = pdf_metadata::Entity::find();
    if let Some(account_id) = query.account_id {
        select = select.filter(pdf_metadata::Column::AccountId.eq(account_id));
    }

    let rows = select
        .order_by_desc(pdf_metadata::Column::DateReceived)
        .order_by_desc(pdf_metadata::Column::Id)
        .all(&state.db)
        .await?;

    Ok(Json(rows))
}

/// GET /api/pdfs/:id: the stored PDF bytes.
pub async fn download_pdf(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Response, ApiError> {
    let row = pdf_metadata::Entity::find_by_id(id)
        .one(&state.db)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("PDF {} not found", id)))?;

    let data = state.files.read(&row.file_path).await?;

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/pdf")
        .header("Content-Length", data.len().to_string())
        .header(
            "Content-Disposition",
            format!(
                "attachment; filename=\"{}\"",
                row.attachment_file_name.replace(['"', '\\'], "_")
            ),
        )
        .body(Body::from(data))
        .map_err(|e| ApiError::InternalError(e.to_string()))
}
