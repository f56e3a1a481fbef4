use std::io;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use credit_features::{
    build_features_from_raw, feature_router, log_app_bind, log_app_start, log_contract_loaded,
    log_features_written, read_raw_csv, CategoryVocabulary, FeatureBuildConfig, FeatureService,
    LoggingConfig, ModelContract, NominalField,
};
use tower::util::ServiceExt;
use tracing::dispatcher::with_default;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriter;

#[derive(Clone, Default)]
struct SharedWriter {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedWriter {
    fn output_string(&self) -> String {
        let bytes = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        String::from_utf8_lossy(&bytes).to_string()
    }
}

struct SharedWriterGuard {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for SharedWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut out = self
            .inner
            .lock()
            .expect("writer lock should not be poisoned");
        out.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture_logs(max_level: Level, f: impl FnOnce()) -> String {
    let writer = SharedWriter::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_ansi(false)
        .with_max_level(max_level)
        .with_writer(writer.clone())
        .finish();
    let dispatch = tracing::Dispatch::new(subscriber);

    with_default(&dispatch, f);
    writer.output_string()
}

const RAW: &str = "invoice_id,client_id,client_name,invoice_date,payment_due_date,invoice_amount,material_name,payment_method\n\
                   I1,C1,Acme,2024-01-01,2024-01-31,100,Steel,Crypto\n\
                   I2,C1,Acme,someday,2024-02-01,20,Steel,NEFT\n";

#[test]
fn feature_build_emits_start_and_finish_events() {
    let logs = capture_logs(Level::INFO, || {
        let raw = read_raw_csv(RAW.as_bytes()).expect("csv should parse");
        let built = build_features_from_raw(
            &raw,
            &ModelContract::new(["term_days"]),
            &FeatureBuildConfig::default(),
        )
        .expect("build should succeed");
        assert_eq!(built.report.parse_warnings, 1);
    });

    assert!(logs.contains("\"event\":\"features.build.start\""));
    assert!(logs.contains("\"event\":\"normalize.parse_warnings\""));
    assert!(logs.contains("\"event\":\"features.build.finish\""));
}

#[test]
fn unknown_categories_are_logged_per_row_at_debug() {
    let contract = ModelContract::new(["payment_method_NEFT"]).with_vocabulary(vec![
        CategoryVocabulary::new(
            NominalField::PaymentMethod,
            Some("Cash".to_string()),
            vec!["NEFT".to_string()],
        ),
    ]);

    let logs = capture_logs(Level::DEBUG, || {
        let raw = read_raw_csv(RAW.as_bytes()).expect("csv should parse");
        let built = build_features_from_raw(&raw, &contract, &FeatureBuildConfig::default())
            .expect("build should succeed");
        assert_eq!(built.report.unknown_category_warnings, 1);
    });

    assert!(logs.contains("\"event\":\"encoding.unknown_category\""));
    assert!(logs.contains("\"event\":\"features.build.unknown_categories\""));
}

#[test]
fn lifecycle_helpers_emit_baseline_events() {
    let logs = capture_logs(Level::INFO, || {
        let cfg = LoggingConfig::default();
        log_app_start("feature_server", &cfg);
        log_contract_loaded("models/metadata.json", 3, "abc123");
        log_app_bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080));
        log_features_written("stdout", 12, 3);
    });

    assert!(logs.contains("\"event\":\"app.start\""));
    assert!(logs.contains("\"event\":\"contract.loaded\""));
    assert!(logs.contains("\"event\":\"app.bind\""));
    assert!(logs.contains("\"event\":\"features.written\""));
}

#[test]
fn features_route_emits_http_request_event() {
    let logs = capture_logs(Level::INFO, || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("single-thread runtime should build");

        rt.block_on(async {
            let service = FeatureService::from_contract(
                &ModelContract::new(["term_days"]),
                FeatureBuildConfig::default(),
            )
            .expect("contract should resolve");
            let app = feature_router(Arc::new(service));

            let response = app
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/features")
                        .body(Body::from("invoice_id,client_id\nI1,C1\n"))
                        .expect("request should build"),
                )
                .await
                .expect("features request should complete");

            assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        });
    });

    assert!(logs.contains("\"event\":\"http.features.request\""));
    assert!(logs.contains("\"event\":\"http.features.error\""));
}
