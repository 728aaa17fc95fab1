use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::enrich::EnrichedRecord;

/// Category vocabulary. The store seeds its `categories` table from this
/// list, and the classifier prompt enumerates it.
pub const CATEGORIES: &[&str] = &[
    "fashion",
    "beauty",
    "food",
    "character",
    "exhibition",
    "entertainment",
    "lifestyle",
    "theme_park",
    "animation",
    "tech",
    "culture",
    "sports",
    "etc",
];

/// Tag applied when classification is unavailable or fails.
pub const FALLBACK_CATEGORY: &str = "etc";

const SYSTEM_PROMPT: &str = "You are an expert in categorizing popup stores.\n\
Select 1-3 most appropriate categories from the following list:\n\n\
Categories:\n\
- fashion\n\
- beauty\n\
- food\n\
- character\n\
- exhibition\n\
- entertainment\n\
- lifestyle\n\
- theme_park\n\
- animation\n\
- tech\n\
- culture\n\
- sports\n\
- etc\n\n\
CRITICAL: Return ONLY a raw JSON array without markdown code blocks, explanations, or formatting.\n\
Do NOT wrap the response in ```json or ``` tags.\n\n\
Required format (pure JSON array):\n\
[\n\
  {\"name\": \"popup store name\", \"categories\": [\"fashion\", \"beauty\"]},\n\
  {\"name\": \"another store\", \"categories\": [\"food\"]}\n\
]";

/// Batch categorization of enriched records. Implementations return a map
/// from record name to its tags; the coordinator applies the `etc` fallback.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify_batch(
        &self,
        records: &[EnrichedRecord],
    ) -> Result<HashMap<String, Vec<String>>>;
}

/// Chat-completion-backed classifier. One request per page batch keeps the
/// token spend proportional to pages, not records.
pub struct OpenAiClassifier {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiClassifier {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    /// Point the client somewhere else (tests).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Serialize)]
struct ClassifyItem<'a> {
    name: &'a str,
    address: &'a str,
    description: &'a str,
}

#[derive(Deserialize)]
struct ClassifiedItem {
    name: String,
    #[serde(default)]
    categories: Vec<String>,
}

#[async_trait]
impl Classifier for OpenAiClassifier {
    async fn classify_batch(
        &self,
        records: &[EnrichedRecord],
    ) -> Result<HashMap<String, Vec<String>>> {
        let items: Vec<ClassifyItem> = records
            .iter()
            .map(|r| ClassifyItem {
                name: &r.name,
                address: &r.address,
                description: &r.description,
            })
            .collect();

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: serde_json::to_string_pretty(&items)?,
                },
            ],
            temperature: 0.3,
            max_tokens: 2000,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .context("classification request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("classification API error {}: {}", status, body));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .context("classification response was not valid JSON")?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow!("classification response had no choices"))?;

        let classified: Vec<ClassifiedItem> = serde_json::from_str(strip_code_fence(&content))
            .context("classification content did not parse as a JSON array")?;

        Ok(classified
            .into_iter()
            .map(|c| (c.name, c.categories))
            .collect())
    }
}

/// Models ignore the no-fence instruction often enough that the response may
/// arrive as ```json ... ```; strip one surrounding fence before parsing.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

// ── Tests ──
