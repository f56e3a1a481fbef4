//! HTTP routes for upload tooling: raw-format introspection, header-only
//! templates, and feature builds from an uploaded CSV body.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::encoding::CategoricalEncoder;
use crate::normalize::SchemaError;
use crate::pipeline::{
    build_features, validate_config, BuiltFeatures, FeatureBuildConfig, FeatureBuildError,
};
use crate::raw::{raw_template_csv, read_raw_csv, RAW_OPTIONAL, RAW_REQUIRED};
use crate::schema::{feature_template_csv, FeatureSchema, ModelContract};

/// A contract resolved once and reused for every request.
#[derive(Debug, Clone)]
pub struct FeatureService {
    pub schema: FeatureSchema,
    pub encoder: CategoricalEncoder,
    pub config: FeatureBuildConfig,
}

impl FeatureService {
    pub fn from_contract(
        contract: &ModelContract,
        config: FeatureBuildConfig,
    ) -> Result<Self, FeatureBuildError> {
        validate_config(&config)?;
        Ok(Self {
            schema: contract.schema()?,
            encoder: contract.encoder()?,
            config,
        })
    }

    pub fn build_from_csv(&self, body: &[u8]) -> Result<BuiltFeatures, FeatureBuildError> {
        let raw = read_raw_csv(body)?;
        build_features(&raw, &self.schema, &self.encoder, &self.config)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSchemaInfo {
    pub required: Vec<String>,
    pub optional: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
}

#[derive(Clone)]
struct FeatureAppState {
    service: Arc<FeatureService>,
}

pub fn feature_router(service: Arc<FeatureService>) -> Router {
    Router::new()
        .route("/schema/raw", get(get_raw_schema))
        .route("/schema/features", get(get_feature_schema))
        .route("/template/raw", get(get_raw_template))
        .route("/template/features", get(get_feature_template))
        .route("/features", post(post_features))
        .with_state(FeatureAppState { service })
}

async fn get_raw_schema() -> impl IntoResponse {
    Json(RawSchemaInfo {
        required: RAW_REQUIRED.iter().map(|s| s.to_string()).collect(),
        optional: RAW_OPTIONAL.iter().map(|s| s.to_string()).collect(),
    })
}

async fn get_feature_schema(State(state): State<FeatureAppState>) -> impl IntoResponse {
    Json(state.service.schema.clone())
}

async fn get_raw_template() -> Response {
    csv_response(raw_template_csv().map_err(FeatureBuildError::from))
}

async fn get_feature_template(State(state): State<FeatureAppState>) -> Response {
    csv_response(feature_template_csv(&state.service.schema).map_err(FeatureBuildError::from))
}

async fn post_features(State(state): State<FeatureAppState>, body: String) -> Response {
    info!(
        component = "feature_server",
        event = "http.features.request",
        body_bytes = body.len()
    );

    let service = Arc::clone(&state.service);
    let result =
        tokio::task::spawn_blocking(move || service.build_from_csv(body.as_bytes())).await;

    match result {
        Ok(Ok(built)) => Json(built).into_response(),
        Ok(Err(err)) => error_response(&err),
        Err(join_err) => {
            warn!(
                component = "feature_server",
                event = "http.features.join_error",
                error = %join_err
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: "feature build task failed".to_string(),
                    missing: Vec::new(),
                }),
            )
                .into_response()
        }
    }
}

fn csv_response(body: Result<String, FeatureBuildError>) -> Response {
    match body {
        Ok(text) => ([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], text).into_response(),
        Err(err) => error_response(&err),
    }
}

fn error_response(err: &FeatureBuildError) -> Response {
    let (status, missing) = match err {
        FeatureBuildError::Schema(SchemaError::MissingRawColumns { missing }) => {
            (StatusCode::UNPROCESSABLE_ENTITY, missing.clone())
        }
        FeatureBuildError::RawInput(_) | FeatureBuildError::Csv(_) => {
            (StatusCode::BAD_REQUEST, Vec::new())
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, Vec::new()),
    };

    warn!(
        component = "feature_server",
        event = "http.features.error",
        status = status.as_u16(),
        error = %err
    );

    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
            missing,
        }),
    )
        .into_response()
}
