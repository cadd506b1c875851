pub mod polling;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::scrape::types::{QuerySections, Reference, Section};
use polling::{poll_task, RetryPolicy, AI_OVERVIEW};

/// Asynchronous SERP job API: submit a query, then fetch the task by id.
#[async_trait]
pub trait SerpSource: Send + Sync {
    async fn submit(&self, query: &str) -> Result<String>;
    async fn get_task(&self, task_id: &str) -> Result<Value>;
}

/// DataForSEO Google organic SERP client.
pub struct DataForSeoClient {
    client: reqwest::Client,
    base_url: String,
    login: String,
    password: String,
    location: String,
    language: String,
}

impl DataForSeoClient {
    pub fn from_env() -> Result<Self> {
        let base_url = dotenv::var("DATAFORSEO_BASE_URL")
            .unwrap_or_else(|_| "https://api.dataforseo.com".to_string());
        let login = dotenv::var("DATAFORSEO_LOGIN").context("DATAFORSEO_LOGIN required")?;
        let password =
            dotenv::var("DATAFORSEO_PASSWORD").context("DATAFORSEO_PASSWORD required")?;
        let location = dotenv::var("SERP_LOCATION").unwrap_or_else(|_| "Italy".to_string());
        let language = dotenv::var("SERP_LANGUAGE").unwrap_or_else(|_| "Italian".to_string());
        Self::new(base_url, login, password, location, language)
    }

    pub fn new(
        base_url: String,
        login: String,
        password: String,
        location: String,
        language: String,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            login,
            password,
            location,
            language,
        })
    }
}

#[async_trait]
impl SerpSource for DataForSeoClient {
    async fn submit(&self, query: &str) -> Result<String> {
        let body = serde_json::json!([{
            "keyword": query,
            "location_name": self.location,
            "language_name": self.language,
            "device": "desktop",
            "load_async_ai_overview": true,
        }]);

        let json: Value = self
            .client
            .post(format!("{}/v3/serp/google/organic/task_post", self.base_url))
            .basic_auth(&self.login, Some(&self.password))
            .json(&body)
            .send()
            .await
            .context("SERP task_post failed")?
            .error_for_status()
            .context("SERP task_post rejected")?
            .json()
            .await
            .context("Failed to parse task_post JSON")?;

        json["tasks"]
            .get(0)
            .and_then(|t| t["id"].as_str())
            .map(str::to_string)
            .context("task_post response has no task id")
    }

    async fn get_task(&self, task_id: &str) -> Result<Value> {
        self.client
            .get(format!(
                "{}/v3/serp/google/organic/task_get/advanced/{}",
                self.base_url, task_id
            ))
            .basic_auth(&self.login, Some(&self.password))
            .send()
            .await
            .context("SERP task_get failed")?
            .error_for_status()
            .context("SERP task_get rejected")?
            .json()
            .await
            .context("Failed to parse task_get JSON")
    }
}

/// Extract the AI-overview sections from a completed task payload.
pub fn parse_overview(payload: &Value) -> Vec<Section> {
    let items = payload["tasks"]
        .get(0)
        .and_then(|t| t["result"].get(0))
        .and_then(|r| r["items"].as_array());
    let Some(items) = items else {
        return Vec::new();
    };
    let Some(overview) = items.iter().find(|i| i["type"] == AI_OVERVIEW) else {
        return Vec::new();
    };

    overview["items"]
        .as_array()
        .map(|blocks| {
            blocks
                .iter()
                .map(|block| Section {
                    title: block["title"].as_str().map(str::to_string),
                    text: block["text"].as_str().map(str::to_string),
                    starting_text: None,
                    references: block["references"]
                        .as_array()
                        .map(|refs| {
                            refs.iter()
                                .filter_map(|r| r["url"].as_str())
                                .filter(|url| !url.is_empty())
                                .map(Reference::new)
                                .collect()
                        })
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default()
}

async fn fetch_one(
    source: &dyn SerpSource,
    query: &str,
    readiness: RetryPolicy,
    feature: RetryPolicy,
) -> Result<Vec<Section>> {
    let task_id = source.submit(query).await?;
    let payload = poll_task(source, &task_id, readiness, feature).await?;
    Ok(parse_overview(&payload))
}

/// Fetch AI overviews for every query, one at a time. A query whose fetch
/// fails gets an empty section list; the batch carries on.
pub async fn fetch_overviews<'a>(
    source: &dyn SerpSource,
    queries: impl IntoIterator<Item = &'a String>,
    readiness: RetryPolicy,
    feature: RetryPolicy,
) -> QuerySections {
    let queries: Vec<&String> = queries.into_iter().collect();
    let total = queries.len();
    let mut full = QuerySections::new();

    for (i, query) in queries.into_iter().enumerate() {
        info!(query = %query, "[{}/{}] Fetching AI overview", i + 1, total);
        let sections = match fetch_one(source, query, readiness, feature).await {
            Ok(sections) => sections,
            Err(e) => {
                warn!(query = %query, "AI overview not available: {:#}", e);
                Vec::new()
            }
        };
        info!(query = %query, sections = sections.len(), "AI overview fetched");
        full.insert(query.clone(), sections);
    }

    full
}

/// Keep only the first section of each query that has any.
pub fn first_sections(full: &QuerySections) -> QuerySections {
    full.iter()
        .filter_map(|(query, sections)| {
            sections
                .first()
                .map(|first| (query.clone(), vec![first.clone()]))
        })
        .collect()
}
