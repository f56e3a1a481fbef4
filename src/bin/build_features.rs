use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use credit_features::{
    build_features_from_raw, init_logging, load_raw_from_store, log_app_start,
    log_contract_loaded, log_features_written, logging_config_from_env, raw_template_csv,
    read_raw_csv_path, write_features_csv, FeatureBuildConfig, ModelContract, RawTable, RowOrder,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start("build_features", &logging_cfg);

    if std::env::args().nth(1).as_deref() == Some("template") {
        print!("{}", raw_template_csv()?);
        return Ok(());
    }

    let input = std::env::var("CREDIT_FEATURES_INPUT")
        .map(PathBuf::from)
        .map_err(|_| "CREDIT_FEATURES_INPUT must point at a raw CSV or SQLite ledger")?;
    let contract_path = std::env::var("CREDIT_FEATURES_CONTRACT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("models/metadata.json"));

    let contract = ModelContract::load(&contract_path)?;
    let schema = contract.schema()?;
    log_contract_loaded(
        &contract_path.display().to_string(),
        schema.len(),
        &schema.fingerprint,
    );

    let cfg = FeatureBuildConfig {
        row_order: row_order_from_env(),
        ..FeatureBuildConfig::default()
    };

    let raw = read_input(&input)?;
    let built = build_features_from_raw(&raw, &contract, &cfg)?;

    match std::env::var("CREDIT_FEATURES_OUTPUT") {
        Ok(path) => {
            let file = fs::File::create(&path)?;
            write_features_csv(file, &built)?;
            log_features_written(&path, built.report.output_rows, built.schema.len());
        }
        Err(_) => {
            write_features_csv(io::stdout().lock(), &built)?;
            log_features_written("stdout", built.report.output_rows, built.schema.len());
        }
    }

    Ok(())
}

fn read_input(path: &Path) -> Result<RawTable, Box<dyn std::error::Error>> {
    let is_store = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "sqlite" | "sqlite3" | "db"))
        .unwrap_or(false);

    if is_store {
        Ok(load_raw_from_store(path)?)
    } else {
        Ok(read_raw_csv_path(path)?)
    }
}

fn row_order_from_env() -> RowOrder {
    match std::env::var("CREDIT_FEATURES_ROW_ORDER") {
        Ok(raw) if raw.trim().eq_ignore_ascii_case("input") => RowOrder::Input,
        _ => RowOrder::Partitioned,
    }
}
