use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use credit_features::{
    feature_router, init_logging, log_app_bind, log_app_start, log_contract_loaded,
    logging_config_from_env, FeatureBuildConfig, FeatureService, ModelContract,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start("feature_server", &logging_cfg);

    let addr: SocketAddr = std::env::var("CREDIT_FEATURES_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
        .parse()?;
    let contract_path = std::env::var("CREDIT_FEATURES_CONTRACT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("models/metadata.json"));

    let contract = ModelContract::load(&contract_path)?;
    let service = FeatureService::from_contract(&contract, FeatureBuildConfig::default())?;
    log_contract_loaded(
        &contract_path.display().to_string(),
        service.schema.len(),
        &service.schema.fingerprint,
    );

    let app = feature_router(Arc::new(service));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    log_app_bind(bound_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
