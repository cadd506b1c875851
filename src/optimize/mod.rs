pub mod critic;
pub mod prompts;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::llm::GenerativeOracle;
use crate::ranker::{log_ranking_table, RankingOracle, RankingRecord};
use crate::scrape::types::{QuerySections, Reference, Section};
use crate::state::OptimizationMode;

use critic::{parse_critique, Critique, Directive};
use prompts::PromptTemplates;

const AIO_RECORD_ID: &str = "aio_content";

/// One step of the optimization walk. Iteration 0 is the starting text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub score: f64,
    pub critic_critique: String,
    pub critic_directives: Vec<Directive>,
    pub generated_text: String,
}

/// A baseline ranking entry as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineEntry {
    pub id: String,
    pub title: String,
    pub text: String,
    pub score: f64,
}

impl From<&RankingRecord> for BaselineEntry {
    fn from(r: &RankingRecord) -> Self {
        Self {
            id: r.id.clone(),
            title: r.title.clone(),
            text: r.content.clone(),
            score: r.score,
        }
    }
}

/// Terminal artifact for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub aio_content: String,
    /// Score of the baseline winner: the bar to beat.
    pub aio_content_score: f64,
    pub benchmark_id: String,
    pub starting_text: String,
    pub first_benchmark_score: f64,
    pub best_optimized_text: String,
    pub best_optimized_text_score: f64,
    pub iterations_ran: u32,
    pub references: Vec<Reference>,
    pub iteration_history: Vec<IterationRecord>,
    pub baseline_ranking: Vec<BaselineEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halt_reason: Option<String>,
}

/// Why a query produced no result. The batch continues regardless.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("no AI overview text to benchmark against")]
    MissingBenchmark,
    #[error("no valid references after cleaning")]
    NoValidReferences,
    #[error("starting text generation failed: {0:#}")]
    Generation(anyhow::Error),
    #[error("baseline ranking failed: {0:#}")]
    Baseline(anyhow::Error),
    #[error("scoring the starting text failed: {0:#}")]
    CandidateScore(anyhow::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    pub max_iterations: u32,
    pub mode: OptimizationMode,
    /// Added to the benchmark score in early-exit mode.
    pub benchmark_offset: f64,
}

/// Critique → rewrite → re-score loop against the ranking oracle.
pub struct Optimizer {
    llm: Arc<dyn GenerativeOracle>,
    ranker: Arc<dyn RankingOracle>,
    prompts: PromptTemplates,
    settings: LoopSettings,
}

impl Optimizer {
    pub fn new(
        llm: Arc<dyn GenerativeOracle>,
        ranker: Arc<dyn RankingOracle>,
        prompts: PromptTemplates,
        settings: LoopSettings,
    ) -> Self {
        Self {
            llm,
            ranker,
            prompts,
            settings,
        }
    }

    /// Optimize every query in order. Failed queries are logged and skipped.
    pub async fn optimize_all(&self, cleaned: &QuerySections) -> BTreeMap<String, OptimizationResult> {
        let total = cleaned.len();
        let mut results = BTreeMap::new();

        for (i, (query, sections)) in cleaned.iter().enumerate() {
            info!(query = %query, "[{}/{}] Starting optimization", i + 1, total);
            let Some(section) = sections.first() else {
                warn!(query = %query, "no AI overview section, skipping");
                continue;
            };
            match self.optimize_query(query, section).await {
                Ok(result) => {
                    results.insert(query.clone(), result);
                }
                Err(e) => error!(query = %query, "query skipped: {}", e),
            }
        }

        results
    }

    pub async fn optimize_query(
        &self,
        query: &str,
        section: &Section,
    ) -> Result<OptimizationResult, QueryError> {
        let aio_content = section
            .text
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or(QueryError::MissingBenchmark)?;
        if section.references.is_empty() {
            return Err(QueryError::NoValidReferences);
        }

        let starting_text = match section.starting_text.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(text) => text.to_string(),
            None => {
                info!(query, "No starting text, generating one");
                self.llm
                    .generate(&self.prompts.initial_prompt(query, aio_content))
                    .await
                    .map_err(QueryError::Generation)?
            }
        };

        // Baseline: the overview and every surviving reference in one call.
        let baseline = self
            .ranker
            .rank(query, baseline_records(aio_content, &section.references))
            .await
            .map_err(QueryError::Baseline)?;
        let benchmark = baseline
            .iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .cloned()
            .ok_or_else(|| QueryError::Baseline(anyhow::anyhow!("empty baseline ranking")))?;

        let initial = self
            .score(query, 0, "Starting text", &starting_text)
            .await
            .map_err(QueryError::CandidateScore)?;
        let first_score = initial.score;

        log_ranking_table("STARTING RANKING", &with_candidate(&baseline, initial));
        info!(
            query,
            first_score,
            benchmark_score = benchmark.score,
            benchmark_id = %benchmark.id,
            "Baseline computed"
        );

        let mut history = vec![IterationRecord {
            iteration: 0,
            score: first_score,
            critic_critique: String::new(),
            critic_directives: Vec::new(),
            generated_text: starting_text.clone(),
        }];

        let mut current = starting_text.clone();
        let mut best_text = starting_text.clone();
        let mut best_score = first_score;
        let mut iterations_ran = 0;
        let mut halt_reason = None;
        let target = benchmark.score + self.settings.benchmark_offset;

        for iteration in 1..=self.settings.max_iterations {
            iterations_ran = iteration;
            info!(query, "Iteration {}/{}", iteration, self.settings.max_iterations);

            let critique = match self.critique(query, &benchmark.content, &current).await {
                Ok(critique) => critique,
                Err(e) => {
                    error!(query, iteration, "critic failed, stopping: {:#}", e);
                    halt_reason = Some(format!("iteration {}: {:#}", iteration, e));
                    break;
                }
            };
            debug!(
                iteration,
                directives = critique.improvement_directives.len(),
                "─── Critique ───"
            );
            for line in critique.overall_critique.lines().take(20) {
                debug!("  │ {}", line);
            }

            let rewrite_prompt = self
                .prompts
                .optimizer_prompt(&current, &critique.improvement_directives);
            let new_text = match self.llm.generate(&rewrite_prompt).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(query, iteration, "rewrite failed, skipping iteration: {:#}", e);
                    continue;
                }
            };

            // A failed score discards this rewrite; the walk resumes from `current`.
            let title = format!("Iteration {}", iteration);
            let scored = match self.score(query, iteration, &title, &new_text).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(query, iteration, "scoring failed, skipping iteration: {:#}", e);
                    continue;
                }
            };
            let new_score = scored.score;

            log_ranking_table(
                &format!("RANKING ITERATION #{}", iteration),
                &with_candidate(&baseline, scored),
            );

            let delta = new_score - best_score;
            if new_score > best_score {
                info!(iteration, new_score, delta, "Improvement, new best text");
                best_score = new_score;
                best_text = new_text.clone();
            } else {
                info!(iteration, new_score, delta, "No improvement");
            }

            // Always explore from the newest draft, even after a regression.
            current = new_text.clone();

            history.push(IterationRecord {
                iteration,
                score: new_score,
                critic_critique: critique.overall_critique,
                critic_directives: critique.improvement_directives,
                generated_text: new_text,
            });

            if self.settings.mode == OptimizationMode::EarlyExit && new_score > target {
                info!(iteration, new_score, target, "Benchmark exceeded, stopping");
                break;
            }
        }

        Ok(OptimizationResult {
            aio_content: aio_content.to_string(),
            aio_content_score: benchmark.score,
            benchmark_id: benchmark.id.clone(),
            starting_text,
            first_benchmark_score: first_score,
            best_optimized_text: best_text,
            best_optimized_text_score: best_score,
            iterations_ran,
            references: section.references.clone(),
            iteration_history: history,
            baseline_ranking: baseline.iter().map(BaselineEntry::from).collect(),
            halt_reason,
        })
    }

    async fn critique(
        &self,
        query: &str,
        benchmark_text: &str,
        current: &str,
    ) -> anyhow::Result<Critique> {
        let prompt = self.prompts.critic_prompt(query, benchmark_text, current);
        let raw = self.llm.generate(&prompt).await?;
        Ok(parse_critique(&raw)?)
    }

    /// Score one candidate alone.
    async fn score(
        &self,
        query: &str,
        iteration: u32,
        title: &str,
        text: &str,
    ) -> anyhow::Result<RankingRecord> {
        let record = RankingRecord::new(format!("optimized_iter_{}", iteration), title, text);
        self.ranker
            .rank(query, vec![record])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("ranker returned no record"))
    }
}

fn baseline_records(aio_content: &str, references: &[Reference]) -> Vec<RankingRecord> {
    let mut records = vec![RankingRecord::new(
        AIO_RECORD_ID,
        "Original AI overview",
        aio_content,
    )];
    for (idx, reference) in references.iter().enumerate() {
        records.push(RankingRecord::new(
            format!("ref_{}", idx),
            format!("Competitor source {}", idx),
            ranking_text(reference.scraped_content.as_deref().unwrap_or("")),
        ));
    }
    records
}

fn with_candidate(baseline: &[RankingRecord], candidate: RankingRecord) -> Vec<RankingRecord> {
    let mut table = baseline.to_vec();
    table.push(candidate);
    table
}

/// Raw HTML captured by the fallback path is reduced to text before ranking.
fn ranking_text(content: &str) -> String {
    if looks_like_html(content) {
        html2text::from_read(content.as_bytes(), 120).unwrap_or_else(|_| content.to_string())
    } else {
        content.to_string()
    }
}

fn looks_like_html(content: &str) -> bool {
    let head: String = content.trim_start().chars().take(512).collect::<String>().to_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html") || head.contains("<body")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use anyhow::Result;
    use async_trait::async_trait;

    /// Replays scripted completions and records every prompt.
    struct ScriptedLlm {
        responses: Mutex<VecDeque<Result<String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<Result<String>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GenerativeOracle for ScriptedLlm {
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow::anyhow!("script exhausted")))
        }
    }

    /// Fixed scores for baseline records, scripted scores for candidates.
    struct ScriptedRanker {
        baseline: Vec<(&'static str, f64)>,
        candidates: Mutex<VecDeque<Result<f64>>>,
        calls: Mutex<Vec<Vec<RankingRecord>>>,
    }

    impl ScriptedRanker {
        fn new(baseline: Vec<(&'static str, f64)>, candidates: Vec<Result<f64>>) -> Self {
            Self {
                baseline,
                candidates: Mutex::new(candidates.into()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RankingOracle for ScriptedRanker {
        async fn rank(&self, _query: &str, records: Vec<RankingRecord>) -> Result<Vec<RankingRecord>> {
            self.calls.lock().unwrap().push(records.clone());
            if records.iter().any(|r| r.id == AIO_RECORD_ID) {
                let mut ranked: Vec<RankingRecord> = records
                    .into_iter()
                    .map(|mut r| {
                        r.score = self
                            .baseline
                            .iter()
                            .find(|(id, _)| *id == r.id)
                            .map(|(_, s)| *s)
                            .unwrap_or(0.1);
                        r
                    })
                    .collect();
                ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
                return Ok(ranked);
            }
            let score = self
                .candidates
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow::anyhow!("no scripted score")))?;
            Ok(records
                .into_iter()
                .map(|mut r| {
                    r.score = score;
                    r
                })
                .collect())
        }
    }

    fn critique_json(label: &str) -> Result<String> {
        Ok(format!(
            "```json\n{{\"overall_critique\": \"critique {label}\", \"improvement_directives\": [{{\"directive_type\": \"coverage\", \"description\": \"directive {label}\"}}]}}\n```"
        ))
    }

    fn section(starting_text: Option<&str>, refs: &[(&str, &str)]) -> Section {
        Section {
            title: Some("Overview".into()),
            text: Some("The AI overview text.".into()),
            starting_text: starting_text.map(str::to_string),
            references: refs
                .iter()
                .map(|(url, content)| Reference {
                    url: url.to_string(),
                    scraped_content: Some(content.to_string()),
                    similarity_score: None,
                })
                .collect(),
        }
    }

    fn optimizer(
        llm: Arc<ScriptedLlm>,
        ranker: Arc<ScriptedRanker>,
        max_iterations: u32,
        mode: OptimizationMode,
    ) -> Optimizer {
        Optimizer::new(
            llm,
            ranker,
            PromptTemplates::default(),
            LoopSettings {
                max_iterations,
                mode,
                benchmark_offset: 0.0,
            },
        )
    }

    #[tokio::test]
    async fn test_regression_then_improvement() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            critique_json("one"),
            Ok("draft one".into()),
            critique_json("two"),
            Ok("draft two".into()),
        ]));
        let ranker = Arc::new(ScriptedRanker::new(
            vec![("aio_content", 0.9), ("ref_0", 0.6)],
            vec![Ok(0.80), Ok(0.75), Ok(0.85)],
        ));
        let opt = optimizer(llm.clone(), ranker, 2, OptimizationMode::Complete);

        let result = opt
            .optimize_query("q", &section(Some("starting draft"), &[("https://a", "source a")]))
            .await
            .unwrap();

        assert_eq!(result.first_benchmark_score, 0.80);
        assert_eq!(result.best_optimized_text_score, 0.85);
        assert_eq!(result.best_optimized_text, "draft two");
        assert_eq!(result.iterations_ran, 2);
        let iterations: Vec<u32> = result.iteration_history.iter().map(|r| r.iteration).collect();
        assert_eq!(iterations, vec![0, 1, 2]);
        assert_eq!(result.iteration_history[1].score, 0.75);
        assert_eq!(result.iteration_history[1].generated_text, "draft one");
        assert_eq!(result.iteration_history[1].critic_critique, "critique one");
        assert_eq!(
            result.iteration_history[1].critic_directives[0].description,
            "directive one"
        );

        // The second critique works on the regressed draft, not the best one.
        let prompts = llm.prompts();
        assert!(prompts[2].contains("draft one"));
        assert!(prompts[3].contains("- directive two"));
    }

    #[tokio::test]
    async fn test_best_stays_at_start_when_nothing_improves() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            critique_json("one"),
            Ok("worse".into()),
        ]));
        let ranker = Arc::new(ScriptedRanker::new(
            vec![("aio_content", 0.9)],
            vec![Ok(0.80), Ok(0.75)],
        ));
        let opt = optimizer(llm, ranker, 1, OptimizationMode::Complete);

        let result = opt
            .optimize_query("q", &section(Some("starting draft"), &[("https://a", "a")]))
            .await
            .unwrap();
        assert_eq!(result.best_optimized_text, "starting draft");
        assert_eq!(result.best_optimized_text_score, 0.80);
        assert_eq!(result.iteration_history.len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_critique_halts_query() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok("not json at all".into())]));
        let ranker = Arc::new(ScriptedRanker::new(vec![("aio_content", 0.9)], vec![Ok(0.5)]));
        let opt = optimizer(llm.clone(), ranker, 3, OptimizationMode::Complete);

        let result = opt
            .optimize_query("q", &section(Some("start"), &[("https://a", "a")]))
            .await
            .unwrap();
        assert_eq!(result.iteration_history.len(), 1);
        assert_eq!(result.best_optimized_text, "start");
        assert_eq!(result.best_optimized_text_score, 0.5);
        assert_eq!(result.iterations_ran, 1);
        assert!(result.halt_reason.is_some());
        // No rewrite was attempted.
        assert_eq!(llm.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_score_discards_rewrite() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            critique_json("one"),
            Ok("lost draft".into()),
            critique_json("two"),
            Ok("kept draft".into()),
        ]));
        let ranker = Arc::new(ScriptedRanker::new(
            vec![("aio_content", 0.9)],
            vec![Ok(0.5), Err(anyhow::anyhow!("ranker unavailable")), Ok(0.6)],
        ));
        let opt = optimizer(llm.clone(), ranker, 2, OptimizationMode::Complete);

        let result = opt
            .optimize_query("q", &section(Some("start"), &[("https://a", "a")]))
            .await
            .unwrap();

        let iterations: Vec<u32> = result.iteration_history.iter().map(|r| r.iteration).collect();
        assert_eq!(iterations, vec![0, 2]);
        assert_eq!(result.best_optimized_text, "kept draft");
        // Iteration 2 critiques the pre-rewrite text.
        let prompts = llm.prompts();
        assert!(prompts[2].contains("\"start\""));
        assert!(!prompts[2].contains("lost draft"));
    }

    #[tokio::test]
    async fn test_early_exit_stops_once_benchmark_exceeded() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            critique_json("one"),
            Ok("winner".into()),
        ]));
        let ranker = Arc::new(ScriptedRanker::new(
            vec![("aio_content", 0.7)],
            vec![Ok(0.5), Ok(0.9)],
        ));
        let opt = optimizer(llm, ranker, 3, OptimizationMode::EarlyExit);

        let result = opt
            .optimize_query("q", &section(Some("start"), &[("https://a", "a")]))
            .await
            .unwrap();
        assert_eq!(result.iterations_ran, 1);
        assert_eq!(result.best_optimized_text, "winner");
        assert!(result.halt_reason.is_none());
    }

    #[tokio::test]
    async fn test_complete_mode_runs_full_budget_past_benchmark() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            critique_json("one"),
            Ok("a".into()),
            critique_json("two"),
            Ok("b".into()),
            critique_json("three"),
            Ok("c".into()),
        ]));
        let ranker = Arc::new(ScriptedRanker::new(
            vec![("aio_content", 0.7)],
            vec![Ok(0.5), Ok(0.9), Ok(0.95), Ok(0.8)],
        ));
        let opt = optimizer(llm, ranker, 3, OptimizationMode::Complete);

        let result = opt
            .optimize_query("q", &section(Some("start"), &[("https://a", "a")]))
            .await
            .unwrap();
        assert_eq!(result.iterations_ran, 3);
        assert_eq!(result.iteration_history.len(), 4);
        assert_eq!(result.best_optimized_text, "b");
        assert_eq!(result.best_optimized_text_score, 0.95);
    }

    #[tokio::test]
    async fn test_best_score_is_running_max_of_history() {
        let mut responses = Vec::new();
        for i in 0..5 {
            responses.push(critique_json(&i.to_string()));
            responses.push(Ok(format!("draft {}", i)));
        }
        let llm = Arc::new(ScriptedLlm::new(responses));
        let ranker = Arc::new(ScriptedRanker::new(
            vec![("aio_content", 0.99)],
            vec![Ok(0.41), Ok(0.52), Ok(0.38), Ok(0.61), Ok(0.60), Ok(0.45)],
        ));
        let opt = optimizer(llm, ranker, 5, OptimizationMode::Complete);

        let result = opt
            .optimize_query("q", &section(Some("start"), &[("https://a", "a")]))
            .await
            .unwrap();
        let running_max = result
            .iteration_history
            .iter()
            .map(|r| r.score)
            .fold(f64::MIN, f64::max);
        assert_eq!(result.best_optimized_text_score, running_max);
        assert_eq!(result.best_optimized_text, "draft 2");
    }

    #[tokio::test]
    async fn test_generates_starting_text_when_missing() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok("generated start".into())]));
        let ranker = Arc::new(ScriptedRanker::new(vec![("aio_content", 0.9)], vec![Ok(0.4)]));
        let opt = optimizer(llm.clone(), ranker, 0, OptimizationMode::Complete);

        let result = opt
            .optimize_query("best hiking boots", &section(Some(""), &[("https://a", "a")]))
            .await
            .unwrap();
        assert_eq!(result.starting_text, "generated start");
        assert_eq!(result.iteration_history[0].generated_text, "generated start");
        let prompts = llm.prompts();
        assert!(prompts[0].contains("best hiking boots"));
        assert!(prompts[0].contains("The AI overview text."));
    }

    #[tokio::test]
    async fn test_competitor_can_win_baseline() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            critique_json("one"),
            Ok("draft".into()),
        ]));
        let ranker = Arc::new(ScriptedRanker::new(
            vec![("aio_content", 0.5), ("ref_0", 0.2), ("ref_1", 0.8)],
            vec![Ok(0.3), Ok(0.4)],
        ));
        let opt = optimizer(llm.clone(), ranker, 1, OptimizationMode::Complete);

        let result = opt
            .optimize_query(
                "q",
                &section(Some("start"), &[("https://a", "weak source"), ("https://b", "strong source")]),
            )
            .await
            .unwrap();
        assert_eq!(result.benchmark_id, "ref_1");
        assert_eq!(result.aio_content_score, 0.8);
        assert_eq!(result.baseline_ranking[0].id, "ref_1");
        assert!(llm.prompts()[0].contains("strong source"));
    }

    #[tokio::test]
    async fn test_html_reference_is_ranked_as_text() {
        let llm = Arc::new(ScriptedLlm::new(vec![]));
        let ranker = Arc::new(ScriptedRanker::new(vec![("aio_content", 0.9)], vec![Ok(0.4)]));
        let opt = optimizer(llm, ranker.clone(), 0, OptimizationMode::Complete);

        let html = "<!DOCTYPE html><html><body><p>Plain words here</p></body></html>";
        let result = opt
            .optimize_query("q", &section(Some("start"), &[("https://a", html)]))
            .await
            .unwrap();

        let calls = ranker.calls.lock().unwrap();
        let submitted = &calls[0][1].content;
        assert!(submitted.contains("Plain words here"));
        assert!(!submitted.contains("<body>"));
        // The stored reference keeps the raw capture.
        assert_eq!(result.references[0].scraped_content.as_deref(), Some(html));
    }

    #[tokio::test]
    async fn test_no_references_is_query_failure() {
        let llm = Arc::new(ScriptedLlm::new(vec![]));
        let ranker = Arc::new(ScriptedRanker::new(vec![], vec![]));
        let opt = optimizer(llm, ranker, 1, OptimizationMode::Complete);

        let err = opt
            .optimize_query("q", &section(Some("start"), &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::NoValidReferences));
    }

    #[tokio::test]
    async fn test_batch_continues_past_failed_query() {
        let llm = Arc::new(ScriptedLlm::new(vec![]));
        let ranker = Arc::new(ScriptedRanker::new(vec![("aio_content", 0.9)], vec![Ok(0.4)]));
        let opt = optimizer(llm, ranker, 0, OptimizationMode::Complete);

        let mut cleaned = QuerySections::new();
        // Its only reference was a match-error, so cleaning left nothing.
        cleaned.insert("a broken query".into(), vec![section(Some("start"), &[])]);
        cleaned.insert("b good query".into(), vec![section(Some("start"), &[("https://a", "a")])]);

        let results = opt.optimize_all(&cleaned).await;
        assert_eq!(results.len(), 1);
        assert!(results.contains_key("b good query"));
    }

    #[tokio::test]
    async fn test_match_error_query_skipped_after_cleaning() {
        use crate::scrape::types::AcquisitionResult;
        use crate::scrape::{populate, ScrapeOutcome};
        use std::collections::HashMap;

        let mut sections = QuerySections::new();
        let mut unscraped = section(None, &[]);
        unscraped.references = vec![Reference::new("https://broken.example/#:~:text=a,b")];
        sections.insert("a broken query".into(), vec![unscraped.clone()]);
        unscraped.references = vec![Reference::new("https://good.example/#:~:text=a,b")];
        sections.insert("b good query".into(), vec![unscraped]);

        let mut results = HashMap::new();
        results.insert(
            "https://broken.example/#:~:text=a,b".to_string(),
            AcquisitionResult::MatchError,
        );
        results.insert(
            "https://good.example/#:~:text=a,b".to_string(),
            AcquisitionResult::Ok("a good span b".into()),
        );
        let outcome = ScrapeOutcome {
            populated: populate(&sections, &results),
            results,
        };
        let mut starting = BTreeMap::new();
        starting.insert("a broken query".to_string(), "draft a".to_string());
        starting.insert("b good query".to_string(), "draft b".to_string());
        let cleaned = outcome.clean(&starting);
        assert!(cleaned["a broken query"][0].references.is_empty());

        let llm = Arc::new(ScriptedLlm::new(vec![]));
        let ranker = Arc::new(ScriptedRanker::new(vec![("aio_content", 0.9)], vec![Ok(0.4)]));
        let opt = optimizer(llm, ranker.clone(), 0, OptimizationMode::Complete);

        let results = opt.optimize_all(&cleaned).await;
        assert_eq!(results.len(), 1);
        let good = &results["b good query"];
        assert_eq!(good.starting_text, "draft b");
        assert_eq!(good.references[0].scraped_content.as_deref(), Some("a good span b"));
        // Only the good query reached the ranker: one baseline, one starting score.
        assert_eq!(ranker.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_result_serializes_expected_fields() {
        let result = OptimizationResult {
            aio_content: "aio".into(),
            aio_content_score: 0.9,
            benchmark_id: "aio_content".into(),
            starting_text: "s".into(),
            first_benchmark_score: 0.5,
            best_optimized_text: "s".into(),
            best_optimized_text_score: 0.5,
            iterations_ran: 0,
            references: vec![],
            iteration_history: vec![],
            baseline_ranking: vec![],
            halt_reason: None,
        };
        let value = serde_json::to_value(&result).unwrap();
        for field in [
            "aio_content",
            "aio_content_score",
            "starting_text",
            "first_benchmark_score",
            "best_optimized_text",
            "best_optimized_text_score",
            "iterations_ran",
            "references",
            "iteration_history",
            "baseline_ranking",
        ] {
            assert!(value.get(field).is_some(), "missing {}", field);
        }
        assert!(value.get("halt_reason").is_none());
    }
}
