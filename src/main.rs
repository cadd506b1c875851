mod artifacts;
mod llm;
mod optimize;
mod ranker;
mod scrape;
mod serp;
mod state;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::{info, Level};

use artifacts::ArtifactStore;
use llm::LlmClient;
use optimize::prompts::PromptTemplates;
use optimize::OptimizationResult;
use ranker::RankerClient;
use scrape::acquire::{ContentAcquirer, HttpFetcher};
use scrape::render::ChromiumRenderer;
use scrape::types::QuerySections;
use serp::DataForSeoClient;
use state::{AppState, OptimizationMode, PipelineConfig};

#[derive(Parser)]
#[command(
    name = "aio-reranker",
    about = "Rewrite content until it outranks the sources behind a Google AI overview",
    version
)]
struct Cli {
    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Directory for the JSON artifacts of every stage
    #[arg(long, global = true, default_value = "output")]
    output_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, scrape and optimize in one go
    Run {
        #[command(flatten)]
        queries: QueryArgs,
        #[command(flatten)]
        scrape: ScrapeArgs,
        #[command(flatten)]
        optimize: OptimizeArgs,
    },
    /// Fetch AI overviews for every query
    Fetch {
        #[command(flatten)]
        queries: QueryArgs,
    },
    /// Scrape the references of previously fetched overviews
    Scrape {
        #[command(flatten)]
        queries: QueryArgs,
        #[command(flatten)]
        scrape: ScrapeArgs,
    },
    /// Optimize against previously scraped references
    Optimize {
        #[command(flatten)]
        optimize: OptimizeArgs,
    },
}

#[derive(Args)]
struct QueryArgs {
    /// JSON object mapping each query to its starting text ("" = generate one)
    #[arg(long)]
    queries: PathBuf,
}

#[derive(Args)]
struct ScrapeArgs {
    /// Maximum concurrent acquisitions
    #[arg(long)]
    parallel: Option<usize>,
    /// Browser navigation timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[derive(Args)]
struct OptimizeArgs {
    /// Directory holding the three prompt templates
    #[arg(long)]
    prompts_dir: Option<PathBuf>,
    /// Maximum rewrite iterations per query
    #[arg(long)]
    iterations: Option<u32>,
    /// Stop condition for the rewrite loop
    #[arg(long, value_enum)]
    mode: Option<OptimizationMode>,
    /// Margin added to the benchmark score in early-exit mode
    #[arg(long)]
    benchmark_offset: Option<f64>,
}

impl ScrapeArgs {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(parallel) = self.parallel {
            config.parallel_tasks = parallel;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.navigation_timeout_ms = timeout_ms;
        }
    }
}

impl OptimizeArgs {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(iterations) = self.iterations {
            config.max_iterations = iterations;
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(offset) = self.benchmark_offset {
            config.benchmark_offset = offset;
        }
    }

    fn prompts(&self) -> Result<PromptTemplates> {
        match &self.prompts_dir {
            Some(dir) => PromptTemplates::from_dir(dir),
            None => Ok(PromptTemplates::default()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    // Load env
    let _ = dotenv::dotenv();

    let mut config = PipelineConfig {
        output_dir: cli.output_dir.clone(),
        ..Default::default()
    };
    let store = ArtifactStore::new(&config.output_dir)?;
    info!(output_dir = %config.output_dir.display(), "Artifact store ready");

    match cli.command {
        Commands::Run {
            queries,
            scrape,
            optimize,
        } => {
            scrape.apply(&mut config);
            optimize.apply(&mut config);
            // Fail on bad templates before spending any API calls.
            let prompts = optimize.prompts()?;
            let queries = artifacts::read_queries(&queries.queries)?;

            let aio = fetch_stage(&config, &store, &queries).await?;
            let cleaned = scrape_stage(&config, &store, &aio, &queries).await?;
            let state = build_state(config, prompts)?;
            let results = optimize_stage(&state, &store, &cleaned).await?;
            print_summary(&results);
        }
        Commands::Fetch { queries } => {
            let queries = artifacts::read_queries(&queries.queries)?;
            fetch_stage(&config, &store, &queries).await?;
        }
        Commands::Scrape { queries, scrape } => {
            scrape.apply(&mut config);
            let queries = artifacts::read_queries(&queries.queries)?;
            let aio: QuerySections = store.read(artifacts::AIO_DATA)?;
            scrape_stage(&config, &store, &aio, &queries).await?;
        }
        Commands::Optimize { optimize } => {
            optimize.apply(&mut config);
            let prompts = optimize.prompts()?;
            let cleaned: QuerySections = store.read(artifacts::CLEANED_SCRAPED_CONTENT)?;
            let state = build_state(config, prompts)?;
            let results = optimize_stage(&state, &store, &cleaned).await?;
            print_summary(&results);
        }
    }

    Ok(())
}

fn build_state(config: PipelineConfig, prompts: PromptTemplates) -> Result<AppState> {
    let llm = Arc::new(LlmClient::from_env()?);
    info!("LLM client initialized");
    let ranker = Arc::new(RankerClient::from_env()?);
    info!("Ranker client initialized");

    Ok(AppState {
        config,
        llm,
        ranker,
        prompts,
    })
}

async fn fetch_stage(
    config: &PipelineConfig,
    store: &ArtifactStore,
    queries: &BTreeMap<String, String>,
) -> Result<QuerySections> {
    let client = DataForSeoClient::from_env()?;
    info!(queries = queries.len(), "Fetching AI overviews");

    let full = serp::fetch_overviews(
        &client,
        queries.keys(),
        config.readiness_policy,
        config.feature_policy,
    )
    .await;
    let aio = serp::first_sections(&full);
    info!(
        with_overview = aio.len(),
        total = full.len(),
        "AI overviews fetched"
    );

    store.write(artifacts::AIO_DATA_FULL, &full)?;
    store.write(artifacts::AIO_DATA, &aio)?;
    Ok(aio)
}

async fn scrape_stage(
    config: &PipelineConfig,
    store: &ArtifactStore,
    aio: &QuerySections,
    queries: &BTreeMap<String, String>,
) -> Result<QuerySections> {
    let renderer = Arc::new(ChromiumRenderer::new(config.chromium_path.clone()));
    let fetcher = Arc::new(HttpFetcher::new(config.fallback_timeout_ms)?);
    let acquirer = Arc::new(ContentAcquirer::new(renderer, fetcher));

    let outcome = scrape::scrape_all(
        acquirer,
        aio,
        config.parallel_tasks,
        config.navigation_timeout_ms,
    )
    .await;
    info!(urls = outcome.results.len(), "Scraping finished");
    store.write(artifacts::SCRAPED_CONTENT, &outcome.populated)?;

    let cleaned = outcome.clean(queries);
    store.write(artifacts::CLEANED_SCRAPED_CONTENT, &cleaned)?;
    Ok(cleaned)
}

async fn optimize_stage(
    state: &AppState,
    store: &ArtifactStore,
    cleaned: &QuerySections,
) -> Result<BTreeMap<String, OptimizationResult>> {
    info!(
        queries = cleaned.len(),
        max_iterations = state.config.max_iterations,
        mode = ?state.config.mode,
        "Starting optimization"
    );
    let results = state.optimizer().optimize_all(cleaned).await;
    store.write(artifacts::CONTENT_GEN, &results)?;
    Ok(results)
}

fn print_summary(results: &BTreeMap<String, OptimizationResult>) {
    println!("\n=== Optimization summary ({} queries) ===", results.len());
    for (query, result) in results {
        let verdict = if result.best_optimized_text_score > result.aio_content_score {
            "beats benchmark"
        } else {
            "below benchmark"
        };
        println!("\nQuery: {}", query);
        println!(
            "  Final score: {:.4} (start {:.4}) vs benchmark {:.4} [{}], {}",
            result.best_optimized_text_score,
            result.first_benchmark_score,
            result.aio_content_score,
            result.benchmark_id,
            verdict
        );
        println!("  Iterations run: {}", result.iterations_ran);
        if let Some(reason) = &result.halt_reason {
            println!("  Halted: {}", reason);
        }
        println!("  Best text:\n{}", indent(&result.best_optimized_text));
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("    {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}
