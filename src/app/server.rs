//! HTTP 編譯服務

use crate::app::emitters::ArtifactKind;
use crate::core::compiler::{CheckReport, CompileRequest, Compiler};
use crate::core::loader::SourceDocument;
use crate::domain::artifact::Artifact;
use crate::domain::finding::Finding;
use crate::utils::error::{CompileError, ErrorCategory};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::net::TcpListener;

// Request types
#[derive(Debug, Clone, Deserialize)]
pub struct CompileBody {
    /// 主定義 YAML 內容
    pub master: String,
    /// 註冊表 YAML 內容
    pub registry: String,
    #[serde(default)]
    pub overlays: Vec<String>,
    pub environment: String,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub formats: Vec<ArtifactKind>,
}

impl CompileBody {
    fn into_request(self) -> CompileRequest {
        let overlays = self
            .overlays
            .into_iter()
            .enumerate()
            .map(|(index, text)| SourceDocument::new(format!("overlay[{}]", index), text))
            .collect();
        let formats = if self.formats.is_empty() {
            ArtifactKind::ALL.to_vec()
        } else {
            self.formats
        };
        CompileRequest::new(
            SourceDocument::new("master", self.master),
            SourceDocument::new("registry", self.registry),
            self.environment,
        )
        .with_overlays(overlays)
        .with_variables(self.variables)
        .without_secret_variables()
        .with_formats(formats)
    }
}

// Response types
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct CompileResponse {
    pub environment: String,
    pub services: Vec<String>,
    pub artifacts: Vec<ArtifactBody>,
    pub compiled_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ArtifactBody {
    pub path: String,
    pub contents: String,
}

impl From<Artifact> for ArtifactBody {
    fn from(artifact: Artifact) -> Self {
        Self {
            path: artifact.display_path(),
            contents: artifact.contents,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    #[serde(flatten)]
    pub report: CheckReport,
    pub clean: bool,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub suggestion: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<Finding>,
}

/// 編譯錯誤轉為 HTTP 回應：輸入問題 400，註冊表違規 422，其餘 500
pub struct ApiError(CompileError);

impl From<CompileError> for ApiError {
    fn from(error: CompileError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = self.0;
        let status = match error.category() {
            ErrorCategory::Input | ErrorCategory::Environment | ErrorCategory::Configuration => {
                StatusCode::BAD_REQUEST
            }
            ErrorCategory::Registry => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCategory::Output | ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let findings = match &error {
            CompileError::RegistryViolation { findings } => findings.clone(),
            _ => Vec::new(),
        };
        tracing::warn!("⚠️ Request failed with {}: {}", status, error);
        (
            status,
            Json(ErrorResponse {
                error: error.to_string(),
                suggestion: error.recovery_suggestion(),
                findings,
            }),
        )
            .into_response()
    }
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// POST /api/v1/compile
async fn compile(Json(body): Json<CompileBody>) -> Result<Json<CompileResponse>, ApiError> {
    let mut compiler = Compiler::new(body.into_request());
    let output = compiler.compile().await?;
    tracing::info!(
        "✅ Compiled {} ({} artifact(s)) in {:?}",
        output.environment,
        output.artifacts.len(),
        output.duration
    );
    Ok(Json(CompileResponse {
        environment: output.environment,
        services: output.services,
        artifacts: output.artifacts.into_iter().map(ArtifactBody::from).collect(),
        compiled_at: Utc::now(),
    }))
}

/// POST /api/v1/check
async fn check(Json(body): Json<CompileBody>) -> Result<Json<CheckResponse>, ApiError> {
    let mut compiler = Compiler::new(body.into_request());
    let report = compiler.check()?;
    Ok(Json(CheckResponse {
        clean: report.is_clean(),
        report,
        checked_at: Utc::now(),
    }))
}

/// 服務不保留跨請求的可變狀態
pub fn router() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/compile", post(compile))
        .route("/api/v1/check", post(check))
}

/// 在已綁定的 listener 上提供服務（測試可綁定 port 0）
pub async fn serve(listener: TcpListener) -> std::io::Result<()> {
    if let Ok(address) = listener.local_addr() {
        tracing::info!("🚀 fleet-compiler server listening on {}", address);
    }
    axum::serve(listener, router()).await
}
