//! Semantic ranking oracle: the Discovery Engine `:rank` REST endpoint.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Records beyond this count are not meaningfully ranked in one call.
pub const TOP_N: usize = 10;

/// One record submitted to (and, with `score`, returned by) the ranker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingRecord {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub score: f64,
}

impl RankingRecord {
    pub fn new(id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            score: 0.0,
        }
    }
}

/// Scores records against a query. Ids must be unique within one call;
/// the result is ordered by descending score.
#[async_trait]
pub trait RankingOracle: Send + Sync {
    async fn rank(&self, query: &str, records: Vec<RankingRecord>) -> Result<Vec<RankingRecord>>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RankRequest<'a> {
    model: &'a str,
    top_n: usize,
    query: &'a str,
    records: Vec<RequestRecord<'a>>,
}

#[derive(Serialize)]
struct RequestRecord<'a> {
    id: &'a str,
    title: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct RankResponse {
    #[serde(default)]
    records: Vec<RankingRecord>,
}

pub struct RankerClient {
    client: reqwest::Client,
    base_url: String,
    project_id: String,
    model: String,
    access_token: String,
}

impl RankerClient {
    pub fn from_env() -> Result<Self> {
        let base_url = dotenv::var("RANKER_BASE_URL")
            .unwrap_or_else(|_| "https://discoveryengine.googleapis.com".to_string());
        let project_id =
            dotenv::var("RANKER_PROJECT_ID").context("RANKER_PROJECT_ID required")?;
        let access_token =
            dotenv::var("RANKER_ACCESS_TOKEN").context("RANKER_ACCESS_TOKEN required")?;
        let model = dotenv::var("RANKER_MODEL")
            .unwrap_or_else(|_| "semantic-ranker-default@latest".to_string());
        Self::new(base_url, project_id, model, access_token)
    }

    pub fn new(
        base_url: String,
        project_id: String,
        model: String,
        access_token: String,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            base_url,
            project_id,
            model,
            access_token,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/projects/{}/locations/global/rankingConfigs/default_ranking_config:rank",
            self.base_url.trim_end_matches('/'),
            self.project_id
        )
    }
}

#[async_trait]
impl RankingOracle for RankerClient {
    async fn rank(&self, query: &str, records: Vec<RankingRecord>) -> Result<Vec<RankingRecord>> {
        let body = RankRequest {
            model: &self.model,
            top_n: TOP_N,
            query,
            records: records
                .iter()
                .map(|r| RequestRecord {
                    id: &r.id,
                    title: &r.title,
                    content: &r.content,
                })
                .collect(),
        };

        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .context("Ranker request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(500).collect();
            bail!("Ranker returned {}: {}", status, snippet);
        }

        let parsed: RankResponse = resp.json().await.context("Failed to parse ranker JSON")?;

        // The service may omit content/title; restore them from the request.
        let mut ranked: Vec<RankingRecord> = parsed
            .records
            .into_iter()
            .map(|mut r| {
                if let Some(orig) = records.iter().find(|o| o.id == r.id) {
                    if r.content.is_empty() {
                        r.content = orig.content.clone();
                    }
                    if r.title.is_empty() {
                        r.title = orig.title.clone();
                    }
                }
                r
            })
            .collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

        debug!(query, returned = ranked.len(), "ranking received");
        Ok(ranked)
    }
}

/// Log a ranking as a table, highest score first.
pub fn log_ranking_table(title: &str, records: &[RankingRecord]) {
    let mut sorted: Vec<&RankingRecord> = records.iter().collect();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    tracing::info!("--- {} ---", title);
    tracing::info!("  │ {:<5} | {:<8} | {:<25} | Preview", "Rank", "Score", "ID");
    for (i, record) in sorted.iter().enumerate() {
        let preview: String = record.content.replace('\n', " ").chars().take(100).collect();
        tracing::info!(
            "  │ {:<5} | {:<8.4} | {:<25} | {}...",
            i + 1,
            record.score,
            record.id,
            preview
        );
    }
}
