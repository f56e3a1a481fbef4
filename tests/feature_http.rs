use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use credit_features::{
    feature_router, BuiltFeatures, ErrorBody, FeatureBuildConfig, FeatureSchema, FeatureService,
    ModelContract, RawSchemaInfo,
};
use tower::util::ServiceExt;

fn app() -> Router {
    let contract = ModelContract::new([
        "client_prev_txn_count",
        "term_days",
        "payment_method_NEFT",
    ]);
    let service = FeatureService::from_contract(&contract, FeatureBuildConfig::default())
        .expect("contract should resolve");
    feature_router(Arc::new(service))
}

async fn get_text(app: Router, uri: &str) -> (StatusCode, String) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

async fn post_csv(app: Router, body: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/features")
                .header("content-type", "text/csv")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

#[tokio::test]
async fn raw_schema_lists_required_and_optional_fields() {
    let (status, text) = get_text(app(), "/schema/raw").await;
    assert_eq!(status, StatusCode::OK);

    let info: RawSchemaInfo = serde_json::from_str(&text).unwrap();
    assert_eq!(info.required.len(), 8);
    assert!(info.required.iter().any(|name| name == "invoice_date"));
    assert_eq!(info.optional, vec!["payment_actual_date"]);
}

#[tokio::test]
async fn feature_schema_returns_contract_columns_in_order() {
    let (status, text) = get_text(app(), "/schema/features").await;
    assert_eq!(status, StatusCode::OK);

    let schema: FeatureSchema = serde_json::from_str(&text).unwrap();
    assert_eq!(
        schema.names(),
        vec!["client_prev_txn_count", "term_days", "payment_method_NEFT"]
    );
    assert_eq!(schema.fingerprint.len(), 64);
}

#[tokio::test]
async fn templates_are_header_only_csv() {
    let (status, raw) = get_text(app(), "/template/raw").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        raw.trim_end(),
        "invoice_id,client_id,client_name,invoice_date,payment_due_date,invoice_amount,material_name,payment_method,payment_actual_date"
    );

    let (status, features) = get_text(app(), "/template/features").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(features.lines().count(), 1);
    assert!(features
        .trim_end()
        .ends_with(",target,client_prev_txn_count,term_days,payment_method_NEFT"));
}

#[tokio::test]
async fn post_features_builds_rows_for_uploaded_csv() {
    let body = "invoice_id,client_id,client_name,invoice_date,payment_due_date,invoice_amount,material_name,payment_method\n\
                I1,C1,Acme,2024-01-01,2024-01-31,100,Steel,NEFT\n\
                I2,C1,Acme,2024-01-15,2024-03-15,40,Steel,Cash\n";
    let (status, bytes) = post_csv(app(), body).await;
    assert_eq!(status, StatusCode::OK);

    let built: BuiltFeatures = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(built.report.output_rows, 2);
    assert!(!built.report.has_target);
    assert_eq!(built.rows[0].values, vec![0.0, 30.0, 1.0]);
    assert_eq!(built.rows[1].values, vec![1.0, 60.0, 0.0]);
}

#[tokio::test]
async fn post_features_reports_missing_columns() {
    let (status, bytes) = post_csv(app(), "invoice_id,client_id\nI1,C1\n").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let err: ErrorBody = serde_json::from_slice(&bytes).unwrap();
    assert!(err.error.contains("invoice_date"));
    assert_eq!(err.missing.len(), 6);
    assert!(err.missing.iter().any(|name| name == "payment_method"));
}

#[tokio::test]
async fn post_features_rejects_empty_body() {
    let (status, bytes) = post_csv(app(), "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let err: ErrorBody = serde_json::from_slice(&bytes).unwrap();
    assert!(err.missing.is_empty());
}
