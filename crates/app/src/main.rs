use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use recall_core::{
    parse_query_date, CharacterNgramEmbedder, Embedder, EmbeddingConfig, FallbackEmbedder,
    IndexJobs, IndexWriter, JobInfo, JobStatus, KeywordIndex, MemoryKeywordIndex,
    MemoryVectorIndex, OllamaEmbedder, OllamaReranker, OpenSearchStore, QdrantStore, Query,
    RankedResult, RecallConfig, SearchCoordinator, SearchMode, VaultConfig, VaultFilter,
    VectorIndex, WriterOptions,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

type Jobs = IndexJobs<dyn KeywordIndex, dyn VectorIndex>;
type Coordinator = SearchCoordinator<dyn KeywordIndex, dyn VectorIndex>;

#[derive(Parser)]
#[command(name = "recall", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// YAML or JSON config file
    #[arg(long, env = "RECALL_CONFIG")]
    config: Option<PathBuf>,

    /// Vault notes root as name=path; repeatable, overrides the config file
    #[arg(long = "vault-root", value_parser = parse_root)]
    vault_roots: Vec<(String, PathBuf)>,

    /// PDF root for a vault as name=path; repeatable
    #[arg(long = "pdf-root", value_parser = parse_root)]
    pdf_roots: Vec<(String, PathBuf)>,

    /// Skip PDF sources
    #[arg(long, default_value_t = false)]
    no_pdf: bool,

    /// Where indexed chunks live
    #[arg(long, value_enum, env = "RECALL_STORE", default_value = "memory")]
    store: StoreKind,

    /// Snapshot directory for the memory store
    #[arg(long, env = "RECALL_DATA_DIR", default_value = ".recall")]
    data_dir: PathBuf,

    /// OpenSearch base URL
    #[arg(long, env = "RECALL_OPENSEARCH_URL", default_value = "http://localhost:9200")]
    opensearch_url: String,

    /// OpenSearch index name
    #[arg(long, env = "RECALL_OPENSEARCH_INDEX", default_value = "recall_chunks")]
    opensearch_index: String,

    /// Qdrant base URL
    #[arg(long, env = "RECALL_QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection
    #[arg(long, env = "RECALL_QDRANT_COLLECTION", default_value = "recall_chunks")]
    qdrant_collection: String,

    /// Embedding provider used for chunks and queries
    #[arg(long, value_enum, env = "RECALL_EMBEDDER", default_value = "ngram")]
    embedder: EmbedderKind,

    /// Ollama base URL, overrides the config file
    #[arg(long, env = "OLLAMA_URL")]
    ollama_url: Option<String>,

    /// Remote embedding accelerator tried before the local provider
    #[arg(long, env = "RECALL_ACCELERATOR_URL")]
    accelerator_url: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum StoreKind {
    /// In-process BM25 and cosine stores persisted as JSON snapshots.
    Memory,
    /// OpenSearch for keywords, Qdrant for vectors.
    Remote,
}

#[derive(Clone, Copy, ValueEnum)]
enum EmbedderKind {
    Ngram,
    Ollama,
}

#[derive(Subcommand)]
enum Command {
    /// Bring the index in line with the vault files on disk.
    Index {
        /// Vault name, or "all".
        #[arg(long, default_value = "all")]
        vault: VaultFilter,
        /// Re-index every file instead of only changed ones.
        #[arg(long, default_value_t = false)]
        full: bool,
    },
    /// Run a hybrid search and print ranked files.
    Search {
        /// Search text; may contain dates like "last week" or a person's name.
        query: String,
        /// Vault name, or "all".
        #[arg(long, default_value = "all")]
        vault: VaultFilter,
        /// vector, bm25, hybrid or query.
        #[arg(long, default_value = "hybrid")]
        mode: SearchMode,
        /// Earliest note date, YYYY-MM-DD.
        #[arg(long, value_parser = parse_query_date)]
        from: Option<chrono::NaiveDate>,
        /// Latest note date, YYYY-MM-DD.
        #[arg(long, value_parser = parse_query_date)]
        to: Option<chrono::NaiveDate>,
        /// Only notes mentioning this person.
        #[arg(long)]
        person: Option<String>,
        /// Number of results to return.
        #[arg(long)]
        limit: Option<usize>,
        /// Score candidates with the Ollama reranker (query mode).
        #[arg(long, default_value_t = false)]
        rerank: bool,
        /// Print the retrieval plan and per-list ranks.
        #[arg(long, default_value_t = false)]
        explain: bool,
    },
    /// Print indexed file and chunk counts per vault.
    Status,
}

fn parse_root(value: &str) -> Result<(String, PathBuf), String> {
    let (name, path) = value
        .split_once('=')
        .ok_or_else(|| format!("expected name=path, got {value:?}"))?;
    if name.trim().is_empty() || path.trim().is_empty() {
        return Err(format!("expected name=path, got {value:?}"));
    }
    Ok((name.trim().to_string(), PathBuf::from(path.trim())))
}

fn load_config(cli: &Cli) -> anyhow::Result<RecallConfig> {
    let mut config = match &cli.config {
        Some(path) => RecallConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RecallConfig::default(),
    };

    for (name, root) in &cli.vault_roots {
        match config.vaults.iter_mut().find(|vault| &vault.name == name) {
            Some(vault) => vault.notes_root = root.clone(),
            None => config.vaults.push(VaultConfig::new(name, root)),
        }
    }
    for (name, root) in &cli.pdf_roots {
        let vault = config
            .vaults
            .iter_mut()
            .find(|vault| &vault.name == name)
            .with_context(|| format!("--pdf-root names unknown vault {name}"))?;
        vault.pdf_root = Some(root.clone());
    }
    if let Some(url) = &cli.ollama_url {
        config.embedding.ollama_url = url.clone();
    }
    if let Some(url) = &cli.accelerator_url {
        config.embedding.accelerator_url = Some(url.clone());
    }
    if cli.no_pdf {
        config.pdf_enabled = false;
    }

    config.validate()?;
    Ok(config)
}

fn build_embedder(kind: EmbedderKind, config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    let local: Arc<dyn Embedder> = match kind {
        EmbedderKind::Ngram => Arc::new(CharacterNgramEmbedder {
            dimensions: config.dimensions,
        }),
        EmbedderKind::Ollama => Arc::new(OllamaEmbedder::new(
            "ollama",
            &config.ollama_url,
            &config.model,
            config.dimensions,
            config.request_timeout(),
        )?),
    };

    let Some(accelerator_url) = &config.accelerator_url else {
        return Ok(local);
    };
    let accelerator = OllamaEmbedder::new(
        "accelerator",
        accelerator_url,
        &config.model,
        config.dimensions,
        config.request_timeout(),
    )?;
    let embedder = FallbackEmbedder::new(
        Arc::new(accelerator),
        local,
        config.accelerator_ready_timeout(),
        config.max_attempts,
    )?;
    Ok(Arc::new(embedder))
}

async fn open_stores(
    cli: &Cli,
    dimensions: usize,
) -> anyhow::Result<(Arc<dyn KeywordIndex>, Arc<dyn VectorIndex>)> {
    match cli.store {
        StoreKind::Memory => {
            std::fs::create_dir_all(&cli.data_dir)
                .with_context(|| format!("creating {}", cli.data_dir.display()))?;
            let keyword = MemoryKeywordIndex::open(cli.data_dir.join("keyword.json"))?;
            let vector = MemoryVectorIndex::open(cli.data_dir.join("vector.json"))?;
            Ok((Arc::new(keyword), Arc::new(vector)))
        }
        StoreKind::Remote => {
            let keyword = OpenSearchStore::new(&cli.opensearch_url, &cli.opensearch_index)?;
            keyword.ensure_index().await?;
            let vector = QdrantStore::new(&cli.qdrant_url, &cli.qdrant_collection, dimensions)?;
            vector.ensure_collection().await?;
            Ok((Arc::new(keyword), Arc::new(vector)))
        }
    }
}

/// Starts a job and follows it to the end; Ctrl-C cancels it.
async fn run_index(jobs: &Jobs, vault: VaultFilter, full: bool) -> anyhow::Result<JobInfo> {
    let id = jobs.start_index(vault, full)?;
    let finished = jobs.wait(id);
    tokio::pin!(finished);

    let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
    let mut reported = None;
    loop {
        tokio::select! {
            info = &mut finished => return Ok(info?),
            _ = ticker.tick() => {
                let progress = jobs.index_progress();
                if progress.running && reported != Some(progress.processed) {
                    reported = Some(progress.processed);
                    info!(
                        job = %id,
                        processed = progress.processed,
                        total = progress.total,
                        percent = progress.percent,
                        current_file = progress.current_file.as_deref().unwrap_or("-"),
                        "indexing"
                    );
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                warn!(job = %id, "interrupted, cancelling job");
                jobs.cancel(id)?;
            }
        }
    }
}

fn print_result(position: usize, result: &RankedResult, explain: bool) {
    println!(
        "[{}] score={:.4} vault={} {}",
        position + 1,
        result.score,
        result.vault,
        result.file_path
    );
    let date = result
        .date
        .map(|date| date.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "  title={} category={} date={} source={}",
        result.title, result.category, date, result.source_type
    );
    if let Some(page) = result.page_number {
        println!("  page={page}");
    }
    if !result.people.is_empty() {
        println!("  people={}", result.people.join(", "));
    }
    if explain {
        println!(
            "  bm25_rank={:?} vector_rank={:?} rerank_score={:?}",
            result.bm25_rank, result.vector_rank, result.rerank_score
        );
    }
    if !result.excerpt.is_empty() {
        println!("  {}", result.excerpt);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let embedder = build_embedder(cli.embedder, &config.embedding)?;
    let (keyword, vector) = open_stores(&cli, embedder.dimensions()).await?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        vaults = config.vaults.len(),
        embedder = embedder.name(),
        "recall boot"
    );

    match cli.command {
        Command::Index { vault, full } => {
            let writer = IndexWriter::new(keyword, vector, embedder)
                .with_options(WriterOptions::from(&config));
            let jobs: Jobs = IndexJobs::new(writer, config);
            let info = run_index(&jobs, vault, full).await?;

            println!(
                "job {} {} vault={} full={}",
                info.id, info.status, info.vault, info.full
            );
            let summary = &info.summary;
            println!(
                "indexed_files={} indexed_chunks={} deleted={} unchanged={} touched={} failed={}",
                summary.indexed_files,
                summary.indexed_chunks,
                summary.deleted,
                summary.unchanged,
                summary.touched,
                summary.failed.len()
            );
            for failure in &summary.failed {
                println!("  failed {}: {}", failure.file_path, failure.reason);
            }

            match info.status {
                JobStatus::Failed => bail!(
                    "indexing failed: {}",
                    info.error.as_deref().unwrap_or("unknown error")
                ),
                JobStatus::Cancelled => bail!("indexing cancelled"),
                _ => {}
            }
        }
        Command::Search {
            query,
            vault,
            mode,
            from,
            to,
            person,
            limit,
            rerank,
            explain,
        } => {
            let mut search_query = Query::new(query)
                .with_mode(mode)
                .with_vault(vault)
                .with_dates(from, to)
                .with_limit(limit.unwrap_or(config.search.default_limit));
            if let Some(person) = person {
                search_query = search_query.with_person(person);
            }

            let mut coordinator: Coordinator =
                SearchCoordinator::new(keyword, vector, embedder).with_config(config.search.clone());
            if rerank {
                let reranker = OllamaReranker::new(
                    &config.embedding.ollama_url,
                    &config.embedding.rerank_model,
                    config.search.rerank_timeout(),
                )?;
                coordinator = coordinator.with_reranker(Arc::new(reranker));
            }

            let results = coordinator.search(&search_query).await?;

            println!(
                "query: {} mode={} results={}",
                search_query.raw_text,
                search_query.mode,
                results.len()
            );
            if explain {
                let plan = coordinator.plan(&search_query);
                let range = plan
                    .date_range
                    .as_ref()
                    .map(|range| format!("{}..={} ({})", range.start, range.end, range.expression))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "explain: semantic_text={:?} date_range={} person={} confidence={} keyword_weight={:.1} vector_weight={:.1}",
                    plan.semantic_text,
                    range,
                    plan.route.person.as_deref().unwrap_or("-"),
                    plan.route.confidence,
                    plan.keyword_weight,
                    plan.vector_weight
                );
            }
            for (position, result) in results.iter().enumerate() {
                print_result(position, result, explain);
            }
        }
        Command::Status => {
            let writer = IndexWriter::new(keyword, vector, embedder);
            let jobs: Jobs = IndexJobs::new(writer, config);
            for status in jobs.status().await? {
                println!(
                    "{} files={} chunks={}",
                    status.vault, status.files, status.chunks
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roots_parse_as_name_and_path() {
        assert_eq!(
            parse_root("work=/notes/work").unwrap(),
            ("work".to_string(), PathBuf::from("/notes/work"))
        );
        assert!(parse_root("/notes/work").is_err());
        assert!(parse_root("=/notes").is_err());
    }

    #[test]
    fn cli_roots_extend_config_vaults() {
        let cli = Cli::parse_from([
            "recall",
            "--vault-root",
            "work=/notes/work",
            "--pdf-root",
            "work=/scans",
            "--no-pdf",
            "status",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(
            config.vault("work"),
            Some(&VaultConfig::new("work", "/notes/work").with_pdf_root("/scans"))
        );
        assert!(!config.pdf_enabled);
    }

    #[test]
    fn pdf_root_needs_a_known_vault() {
        let cli = Cli::parse_from(["recall", "--pdf-root", "work=/scans", "status"]);
        assert!(load_config(&cli).is_err());
    }

    #[test]
    fn search_arguments_parse_into_core_types() {
        let cli = Cli::parse_from([
            "recall", "search", "standup notes", "--vault", "work", "--mode", "bm25", "--from",
            "2026-02-01",
        ]);
        let Command::Search { vault, mode, from, .. } = cli.command else {
            panic!("expected search");
        };
        assert_eq!(vault, VaultFilter::Only("work".to_string()));
        assert_eq!(mode, SearchMode::Bm25);
        assert_eq!(from, chrono::NaiveDate::from_ymd_opt(2026, 2, 1));
    }
}
