pub mod acquire;
pub mod fragment;
pub mod render;
pub mod types;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use acquire::Acquirer;
use types::{AcquisitionResult, QuerySections, Section, MATCH_ERROR, NO_ANCHOR, URL_NOT_PROCESSED};

/// Result of one scraping batch.
pub struct ScrapeOutcome {
    /// Deep copy of the input with every reference's content filled in.
    pub populated: QuerySections,
    /// Per-URL outcome, keyed by URL rather than completion order.
    pub results: HashMap<String, AcquisitionResult>,
}

/// Every distinct reference URL across all queries and sections.
pub fn unique_urls(sections: &QuerySections) -> BTreeSet<String> {
    sections
        .values()
        .flatten()
        .flat_map(|section| section.references.iter())
        .map(|r| r.url.clone())
        .collect()
}

/// Acquire every distinct URL once, with at most `max_concurrency` in flight,
/// and attach the results to a copy of `sections`.
///
/// Never fails: a task that panics or is cancelled is recorded as an
/// `ERROR: ...` result for its URL only.
pub async fn scrape_all(
    acquirer: Arc<dyn Acquirer>,
    sections: &QuerySections,
    max_concurrency: usize,
    timeout_ms: u64,
) -> ScrapeOutcome {
    let urls = unique_urls(sections);
    if urls.is_empty() {
        info!("No reference URLs to scrape");
        return ScrapeOutcome {
            populated: sections.clone(),
            results: HashMap::new(),
        };
    }

    info!(
        unique_urls = urls.len(),
        max_concurrency, "Scraping reference URLs"
    );

    let gate = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut task_urls = Vec::with_capacity(urls.len());
    let mut handles = Vec::with_capacity(urls.len());

    for url in urls {
        let gate = gate.clone();
        let acquirer = acquirer.clone();
        let task_url = url.clone();
        handles.push(tokio::spawn(async move {
            let Ok(_permit) = gate.acquire_owned().await else {
                return AcquisitionResult::Error("ERROR: admission gate closed".to_string());
            };
            acquirer.acquire(&task_url, timeout_ms).await
        }));
        task_urls.push(url);
    }

    let joined = futures::future::join_all(handles).await;

    let mut results = HashMap::with_capacity(task_urls.len());
    for (url, outcome) in task_urls.into_iter().zip(joined) {
        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                warn!(url = %url, "acquisition task failed: {}", e);
                AcquisitionResult::Error(format!("ERROR: {}", e))
            }
        };
        debug!(url = %url, outcome = kind(&result), "acquired");
        results.insert(url, result);
    }

    log_summary(&results);

    let populated = populate(sections, &results);
    ScrapeOutcome { populated, results }
}

/// Write each URL's content into every reference that cites it.
pub fn populate(
    sections: &QuerySections,
    results: &HashMap<String, AcquisitionResult>,
) -> QuerySections {
    let mut populated = sections.clone();
    for reference in populated
        .values_mut()
        .flatten()
        .flat_map(|section| section.references.iter_mut())
    {
        let content = results
            .get(&reference.url)
            .map(|r| r.as_content())
            .unwrap_or(URL_NOT_PROCESSED);
        reference.scraped_content = Some(content.to_string());
    }
    populated
}

impl ScrapeOutcome {
    /// Build the cleaned view: the first section of each query, with the
    /// query's starting text attached and only references whose outcome
    /// is usable. A URL missing from `results` keeps its reference.
    ///
    /// A query left with no references is kept; rejecting it is the caller's call.
    pub fn clean(&self, starting_texts: &BTreeMap<String, String>) -> QuerySections {
        let mut cleaned = QuerySections::new();
        for (query, sections) in &self.populated {
            let Some(first) = sections.first() else {
                continue;
            };
            let references: Vec<_> = first
                .references
                .iter()
                .filter(|r| self.results.get(&r.url).map_or(true, AcquisitionResult::is_usable))
                .cloned()
                .collect();

            debug!(
                query = %query,
                kept = references.len(),
                dropped = first.references.len() - references.len(),
                "cleaned references"
            );

            cleaned.insert(
                query.clone(),
                vec![Section {
                    title: first.title.clone(),
                    text: first.text.clone(),
                    starting_text: Some(starting_texts.get(query).cloned().unwrap_or_default()),
                    references,
                }],
            );
        }
        cleaned
    }
}

fn kind(result: &AcquisitionResult) -> &'static str {
    match result {
        AcquisitionResult::Ok(_) => "ok",
        AcquisitionResult::NoAnchor => NO_ANCHOR,
        AcquisitionResult::UnsupportedFormat => types::UNSUPPORTED_FORMAT,
        AcquisitionResult::MatchError => MATCH_ERROR,
        AcquisitionResult::Error(_) => "error",
    }
}

fn log_summary(results: &HashMap<String, AcquisitionResult>) {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for result in results.values() {
        *counts.entry(kind(result)).or_default() += 1;
    }
    for (outcome, count) in counts {
        info!(outcome, count, "scrape outcome");
    }
}
