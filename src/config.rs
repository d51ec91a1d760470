use anyhow::{Context, Result};
use dotenv::dotenv;

/// Load .env from the current working directory; if missing, fall back to the
/// Cargo project root so `cargo run` from subdirectories still picks it up.
pub fn ensure_dotenv() {
    if dotenv().is_ok() {
        return;
    }
    let root = env!("CARGO_MANIFEST_DIR");
    let candidate = format!("{}/.env", root);
    let _ = dotenv::from_filename(candidate);
}

pub fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        })
        .unwrap_or(default)
}

pub fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

/// Database URL for the relational target store. CLI override wins, then env.
pub fn db_url(cli_override: Option<&str>) -> Result<String> {
    if let Some(url) = cli_override {
        return Ok(url.to_string());
    }
    std::env::var("DATABASE_URL")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .context("DATABASE_URL not configured; set it in the environment or pass --db-url")
}

/// Directory holding the document-store export (one JSON dump per collection).
pub fn source_dir(cli_override: Option<&str>) -> Result<String> {
    if let Some(dir) = cli_override {
        return Ok(dir.to_string());
    }
    std::env::var("SOURCE_EXPORT_DIR")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .context("SOURCE_EXPORT_DIR not configured; set it in the environment or pass --source-dir")
}
