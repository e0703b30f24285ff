use liquidity_dl::config::AuthMode;
use liquidity_dl::{Config, Error, Pipeline, Result, audit_output, run_until_signal};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "config.json";

#[tokio::main]
async fn main() {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, code = e.exit_code(), "run failed");
        std::process::exit(e.exit_code());
    }
}

async fn run() -> Result<()> {
    let path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let mut config = Config::from_json_file(&path)?;
    apply_env_overrides(&mut config);
    tracing::info!(config = %path, "configuration loaded");

    let pipeline = Pipeline::new(config.clone())?;
    let summary = run_until_signal(pipeline).await?;

    let audit = audit_output(&config)?;
    if audit.total_rows() != summary.rows_written && !config.output.append {
        tracing::warn!(
            written = summary.rows_written,
            on_disk = audit.total_rows(),
            "row count on disk differs from rows written"
        );
    }
    if !audit.is_clean() {
        return Err(Error::Other("output audit found malformed files".to_string()));
    }
    Ok(())
}

/// Secrets may come from the environment instead of the config file
fn apply_env_overrides(config: &mut Config) {
    if let Ok(key) = std::env::var("LIQUIDITY_API_KEY") {
        config.source.api_key = Some(key);
    }
    if let Ok(secret) = std::env::var("LIQUIDITY_CLIENT_SECRET")
        && let AuthMode::ClientCredentials { client_secret, .. } = &mut config.auth.mode
    {
        *client_secret = secret;
    }
}
