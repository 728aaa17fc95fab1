use anyhow::{Context, Result};

pub const DEFAULT_KEYWORD: &str = "팝업스토어";
const DEFAULT_DB_PATH: &str = "data/popup.sqlite";

/// Everything the pipeline reads from the environment. Credentials for the
/// place lookup are required; the classifier credential is optional and its
/// absence simply disables classification.
pub struct AppConfig {
    pub naver_client_id: String,
    pub naver_client_secret: String,
    pub openai_api_key: Option<String>,
    pub search_keyword: Option<String>,
    pub db_path: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            naver_client_id: required("NAVER_CLIENT_ID")?,
            naver_client_secret: required("NAVER_CLIENT_SECRET")?,
            openai_api_key: optional("OPENAI_API_KEY"),
            search_keyword: optional("SEARCH_KEYWORD"),
            db_path: db_path_from_env(),
        })
    }
}

/// Database location for commands that do not need API credentials.
pub fn db_path_from_env() -> String {
    optional("DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string())
}

fn required(name: &str) -> Result<String> {
    optional(name).with_context(|| format!("{} must be set (see .env.example)", name))
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
