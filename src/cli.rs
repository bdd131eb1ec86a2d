//! CLI implementation for corpusquery.
//!
//! Thin frontend: constructs the core's capability implementations (a
//! real `ChunkStore`, the configured embedding/LM/reranker capabilities
//! or test fakes) and then only calls into the core's invocation
//! surface — no retrieval, fusion, routing, or assembly logic lives here.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use corpusquery::assembler::{ContextAssembler, OrderingStrategy};
use corpusquery::classifier::{AdaptiveClassifier, RetrievalAction};
use corpusquery::config::Config;
use corpusquery::embedding::{EmbeddingProvider, PlaceholderEmbeddingProvider};
use corpusquery::eval::{EvalHarness, GoldenEntry, RetrievalRunner};
use corpusquery::fusion::{SearchFilter, SearchHit, SearchOptions};
use corpusquery::multi_project::MultiProjectFusion;
use corpusquery::reranker::{DegradingReranker, Reranker, UnavailableReranker};
use corpusquery::router::{QueryRouter, RoutingDecision};
use corpusquery::store::Store;
use corpusquery::store_manager::StoreManager;
use corpusquery::trace::{TraceEntry, TraceLatencies, TraceRecorder};
use corpusquery::{FusionRetriever, Project};

/// Dimensionality of the placeholder embedding provider wired up until a
/// real capability is configured.
const PLACEHOLDER_DIMS: usize = 256;

/// Token budget handed to the context assembler for `ask`.
const ASK_TOKEN_BUDGET: usize = 4000;

#[derive(Parser, Debug)]
#[command(name = "corpusquery", version, about = "Local-first retrieval and routing over your codebases")]
pub struct Cli {
    /// Path to the SQLite index database.
    #[arg(long, global = true, default_value = ".corpusquery/index.db")]
    pub db: PathBuf,

    /// Enable debug logging.
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Treat routing as forced to RAG even at low confidence (never
    /// un-skips a `Simple` classification).
    #[arg(long, global = true)]
    pub force_rag: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage indexed projects.
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Search one or more projects without answer synthesis.
    Search {
        query: String,
        /// Explicit project name or id; routed automatically if omitted.
        #[arg(long)]
        project: Option<String>,
        #[arg(short, long, default_value_t = 10)]
        k: usize,
        #[arg(long)]
        json: bool,
    },
    /// Ask a question: routed, classified, retrieved, and assembled into
    /// cited context.
    Ask {
        query: String,
        #[arg(long)]
        project: Option<String>,
        #[arg(short, long, default_value_t = 10)]
        k: usize,
        #[arg(long)]
        json: bool,
    },
    /// Evaluate retrieval quality against a golden dataset.
    Eval {
        #[command(subcommand)]
        command: EvalCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum ProjectCommands {
    /// Register a new project rooted at `path`. Chunking and embedding
    /// ingestion are not performed here — this only creates the project
    /// record an external ingest step populates.
    Create {
        path: PathBuf,
        #[arg(long)]
        name: Option<String>,
    },
    /// Delete a project, cascade-deleting its chunks and eval history.
    Delete { id: String },
    /// List registered projects.
    List,
}

#[derive(Subcommand, Debug)]
pub enum EvalCommands {
    /// Run a golden dataset (a JSON array of `{query, relevant_file_paths}`)
    /// against a project, or routed across all projects if none is given.
    Run {
        dataset: PathBuf,
        #[arg(long)]
        project: Option<String>,
        #[arg(short, long, default_value_t = 10)]
        k: usize,
    },
    /// Print a previously-persisted run's aggregate metrics.
    Report { run_id: String },
}

pub async fn run(cli: Cli) -> Result<()> {
    if let Some(parent) = cli.db.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let store = Store::open(&cli.db).context("failed to open index database")?;
    let project_root = std::env::current_dir()?;
    let config = Config::load(&project_root);

    let embedder: Arc<dyn EmbeddingProvider> =
        Arc::new(PlaceholderEmbeddingProvider::new(PLACEHOLDER_DIMS));
    let reranker: Arc<dyn Reranker> = Arc::new(DegradingReranker::new(UnavailableReranker));
    let manager = Arc::new(StoreManager::with_params(
        store.clone(),
        config.ef_search_or_default(),
        config.bm25_k1_or_default(),
        config.bm25_b_or_default(),
    ));
    let retriever = Arc::new(FusionRetriever::with_rrf_k(
        store.clone(),
        embedder.clone(),
        reranker.clone(),
        config.rrf_k_or_default(),
    ));
    let multi = Arc::new(MultiProjectFusion::new(retriever, manager.clone(), reranker));
    let router = QueryRouter::new(None, cli.force_rag || config.force_rag_or_default());

    // Cancelled on Ctrl-C; honored at every suspension point in the search
    // path (mirrors the teacher's graceful-shutdown signal in its server).
    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        ctrl_c_cancel.cancel();
    });

    match cli.command {
        Commands::Project { command } => {
            run_project_command(&store, embedder.as_ref(), &manager, command).await
        }
        Commands::Search {
            query,
            project,
            k,
            json,
        } => run_search(&store, &multi, &router, &cancel, &query, project, k, json).await,
        Commands::Ask {
            query,
            project,
            k,
            json,
        } => {
            run_ask(
                &store, &multi, &router, &config, &cancel, &query, project, k, json,
            )
            .await
        }
        Commands::Eval { command } => run_eval_command(&store, &multi, &cancel, command).await,
    }
}

async fn run_project_command(
    store: &Arc<Store>,
    embedder: &dyn EmbeddingProvider,
    manager: &Arc<StoreManager>,
    command: ProjectCommands,
) -> Result<()> {
    match command {
        ProjectCommands::Create { path, name } => {
            let canonical = dunce::canonicalize(&path)
                .with_context(|| format!("project path does not exist: {}", path.display()))?;
            let name = name.unwrap_or_else(|| {
                canonical
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| canonical.display().to_string())
            });
            let now = Utc::now();
            let project = Project {
                id: uuid::Uuid::new_v4().to_string(),
                name,
                path: canonical.display().to_string(),
                embedding_model: embedder.model_name().to_string(),
                embedding_dimensions: embedder.dimensions(),
                file_count: 0,
                chunk_count: 0,
                indexed_at: now,
                updated_at: now,
                tags: Vec::new(),
                description: None,
            };
            store.create_project(&project)?;
            println!("created project {} ({})", project.name, project.id);
            Ok(())
        }
        ProjectCommands::Delete { id } => {
            store.delete_project(&id)?;
            manager.invalidate(&id).await;
            println!("deleted project {id}");
            Ok(())
        }
        ProjectCommands::List => {
            let projects = store.list_projects()?;
            if projects.is_empty() {
                println!("no projects registered");
                return Ok(());
            }
            for p in projects {
                println!("{}\t{}\t{} chunks\t{}", p.id, p.name, p.chunk_count, p.path);
            }
            Ok(())
        }
    }
}

/// Resolves which projects a query targets: the explicit `--project` flag
/// (matched by id or name) when given, else the router's decision.
async fn resolve_projects(
    store: &Store,
    router: &QueryRouter,
    query: &str,
    explicit: Option<&str>,
) -> Result<(Vec<Project>, RoutingDecision)> {
    let all_projects = store.list_projects()?;
    let explicit_id = match explicit {
        None => None,
        Some(needle) => {
            let found = all_projects
                .iter()
                .find(|p| p.id == needle || p.name == needle)
                .ok_or_else(|| anyhow::anyhow!("no project matches '{needle}'"))?;
            Some(found.id.clone())
        }
    };

    let decision = router
        .route(query, &all_projects, explicit_id.as_deref(), None)
        .await;

    let selected: Vec<Project> = all_projects
        .into_iter()
        .filter(|p| decision.project_ids.contains(&p.id))
        .collect();
    Ok((selected, decision))
}

async fn run_search(
    store: &Arc<Store>,
    multi: &Arc<MultiProjectFusion>,
    router: &QueryRouter,
    cancel: &CancellationToken,
    query: &str,
    project: Option<String>,
    k: usize,
    json: bool,
) -> Result<()> {
    let (projects, decision) = resolve_projects(store, router, query, project.as_deref()).await?;
    if projects.is_empty() {
        println!("no projects to search");
        return Ok(());
    }

    let opts = SearchOptions {
        final_k: k,
        min_score: None,
        filter: SearchFilter::default(),
        rerank: true,
    };
    let result = match multi.search(&projects, query, &opts, cancel).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => return Err(e.into()),
        Err(_cancelled) => {
            println!("search cancelled");
            return Ok(());
        }
    };

    if json {
        let payload = serde_json::json!({
            "routing_method": format!("{:?}", decision.method),
            "hits": result.hits.iter().map(hit_to_json).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!(
            "routed via {:?} (confidence {:.2})",
            decision.method, decision.confidence
        );
        for (i, hit) in result.hits.iter().enumerate() {
            println!(
                "{}. {}:{}-{} (score {:.3})\n    {}",
                i + 1,
                hit.file_path,
                hit.line_range.start,
                hit.line_range.end,
                hit.effective_score(),
                first_line(&hit.content),
            );
        }
    }
    Ok(())
}

async fn run_ask(
    store: &Arc<Store>,
    multi: &Arc<MultiProjectFusion>,
    router: &QueryRouter,
    config: &Config,
    cancel: &CancellationToken,
    query: &str,
    project: Option<String>,
    k: usize,
    json: bool,
) -> Result<()> {
    let start = Instant::now();
    let classifier = AdaptiveClassifier::new();
    let class = classifier.classify(query, false);
    let action = classifier.retrieval_action(class, k.max(1));
    let tracer = TraceRecorder::new(store.clone(), config.trace_sampling_rate_or_default());

    let final_k = match action {
        RetrievalAction::Skip => {
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "class": format!("{:?}", class),
                        "skipped": true,
                    }))?
                );
            } else {
                println!("query classified as {class:?}; no retrieval performed");
            }
            tracer
                .record(TraceEntry {
                    project_ids: Vec::new(),
                    query: query.to_string(),
                    retrieved_file_paths: Vec::new(),
                    top_k: k,
                    latencies: TraceLatencies {
                        retrieval_ms: None,
                        assembly_ms: None,
                        total_ms: Some(start.elapsed().as_millis() as u64),
                    },
                    retrieval_method: "skipped".to_string(),
                    routing_method: None,
                    routing_confidence: None,
                    answer: None,
                    feedback: None,
                })
                .await;
            return Ok(());
        }
        RetrievalAction::Normal { final_k } => final_k,
        RetrievalAction::Expanded { final_k } => final_k,
        RetrievalAction::WithConversationContext { final_k } => final_k,
    };

    let (projects, decision) = resolve_projects(store, router, query, project.as_deref()).await?;
    if projects.is_empty() {
        println!("no projects to search");
        return Ok(());
    }

    let opts = SearchOptions {
        final_k,
        min_score: None,
        filter: SearchFilter::default(),
        rerank: true,
    };
    let retrieval_start = Instant::now();
    let result = match multi.search(&projects, query, &opts, cancel).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => return Err(e.into()),
        Err(_cancelled) => {
            // Cancelled mid-search: discard partial results and skip the
            // trace write entirely.
            println!("search cancelled");
            return Ok(());
        }
    };
    let retrieval_ms = retrieval_start.elapsed().as_millis() as u64;

    if cancel.is_cancelled() {
        println!("search cancelled");
        return Ok(());
    }

    for (project_id, error) in &result.partial_failures {
        tracing::warn!(project_id = %project_id, error = %error, "project skipped during ask");
    }

    let assembly_start = Instant::now();
    let assembler = ContextAssembler::new(ASK_TOKEN_BUDGET, OrderingStrategy::Relevance);
    let assembled = assembler.assemble(result.hits);
    let assembly_ms = assembly_start.elapsed().as_millis() as u64;

    let retrieved_file_paths: Vec<String> =
        assembled.sources.iter().map(|s| s.file_path.clone()).collect();

    tracer
        .record(TraceEntry {
            project_ids: projects.iter().map(|p| p.id.clone()).collect(),
            query: query.to_string(),
            retrieved_file_paths,
            top_k: final_k,
            latencies: TraceLatencies {
                retrieval_ms: Some(retrieval_ms),
                assembly_ms: Some(assembly_ms),
                total_ms: Some(start.elapsed().as_millis() as u64),
            },
            retrieval_method: "fusion".to_string(),
            routing_method: Some(format!("{:?}", decision.method)),
            routing_confidence: Some(decision.confidence),
            answer: None,
            feedback: None,
        })
        .await;

    // Answer synthesis against a language model is an external
    // collaborator; this prints the assembled, cited context instead.
    if json {
        let payload = serde_json::json!({
            "class": format!("{:?}", class),
            "routing_method": format!("{:?}", decision.method),
            "total_tokens": assembled.total_tokens,
            "deduplicated_count": assembled.deduplicated_count,
            "dropped_count": assembled.dropped_count,
            "sources": assembled.sources.iter().map(|s| serde_json::json!({
                "citation": s.citation,
                "chunk_id": s.chunk_id,
                "file_path": s.file_path,
                "line_start": s.line_range.start,
                "line_end": s.line_range.end,
                "truncated": s.truncated,
                "content": s.content,
            })).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!(
            "routed via {:?}, classified {:?}, {} sources ({} tokens)",
            decision.method,
            class,
            assembled.sources.len(),
            assembled.total_tokens
        );
        for source in &assembled.sources {
            println!(
                "[{}] {}:{}-{}{}",
                source.citation,
                source.file_path,
                source.line_range.start,
                source.line_range.end,
                if source.truncated { " (truncated)" } else { "" },
            );
            println!("{}", source.content);
            println!();
        }
    }
    Ok(())
}

async fn run_eval_command(
    store: &Arc<Store>,
    multi: &Arc<MultiProjectFusion>,
    cancel: &CancellationToken,
    command: EvalCommands,
) -> Result<()> {
    match command {
        EvalCommands::Run { dataset, project, k } => {
            let raw = std::fs::read_to_string(&dataset)
                .with_context(|| format!("failed to read dataset {}", dataset.display()))?;
            let entries: Vec<GoldenEntry> = serde_json::from_str(&raw)
                .context("dataset must be a JSON array of {query, relevant_file_paths}")?;

            let all_projects = store.list_projects()?;
            let projects: Vec<Project> = match &project {
                Some(needle) => all_projects
                    .into_iter()
                    .filter(|p| &p.id == needle || &p.name == needle)
                    .collect(),
                None => all_projects,
            };
            if projects.is_empty() {
                anyhow::bail!("no matching projects to evaluate against");
            }

            let project_id = if projects.len() == 1 {
                Some(projects[0].id.clone())
            } else {
                None
            };
            let runner = MultiProjectRunner {
                multi: multi.clone(),
                projects,
                final_k: k,
                cancel: cancel.clone(),
            };
            let harness = EvalHarness::new(store.clone());
            let dataset_name = dataset
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "dataset".to_string());
            let result = harness
                .run(project_id.as_deref(), &dataset_name, &entries, &runner, k)
                .await?;

            println!("run {}", result.run_id);
            println!("MAP: {:.4}", result.mean_average_precision);
            println!("MRR: {:.4}", result.aggregate.reciprocal_rank);
            println!("hit rate: {:.4}", result.aggregate.hit_rate);
            println!("precision@{k}: {:.4}", result.aggregate.precision_at_k);
            println!("recall@{k}: {:.4}", result.aggregate.recall_at_k);
            println!("nDCG: {:.4}", result.aggregate.ndcg);
            if let Some(verdict) = &result.regression {
                println!("regression: {verdict:?}");
            }
            let failed = result.per_query.iter().filter(|r| r.error.is_some()).count();
            if failed > 0 {
                println!("{failed}/{} queries failed to retrieve", result.per_query.len());
            }
            Ok(())
        }
        EvalCommands::Report { run_id } => {
            let summary = store
                .get_eval_run(&run_id)?
                .ok_or_else(|| anyhow::anyhow!("no such eval run: {run_id}"))?;
            println!("run {} ({})", summary.run_id, summary.created_at.to_rfc3339());
            println!("dataset: {}", summary.dataset_name);
            if let Some(project_id) = &summary.project_id {
                println!("project: {project_id}");
            }
            println!("MAP: {:.4}", summary.metrics.average_precision);
            println!("MRR: {:.4}", summary.metrics.reciprocal_rank);
            println!("hit rate: {:.4}", summary.metrics.hit_rate);
            println!("nDCG: {:.4}", summary.metrics.ndcg);
            Ok(())
        }
    }
}

struct MultiProjectRunner {
    multi: Arc<MultiProjectFusion>,
    projects: Vec<Project>,
    final_k: usize,
    cancel: CancellationToken,
}

#[async_trait::async_trait]
impl RetrievalRunner for MultiProjectRunner {
    async fn retrieve_file_paths(&self, query: &str) -> anyhow::Result<Vec<String>> {
        let opts = SearchOptions {
            final_k: self.final_k,
            min_score: None,
            filter: SearchFilter::default(),
            rerank: true,
        };
        match self.multi.search(&self.projects, query, &opts, &self.cancel).await {
            Ok(Ok(result)) => Ok(result.hits.into_iter().map(|h| h.file_path).collect()),
            Ok(Err(e)) => Err(e.into()),
            Err(_cancelled) => anyhow::bail!("search cancelled"),
        }
    }
}

fn hit_to_json(hit: &SearchHit) -> serde_json::Value {
    serde_json::json!({
        "chunk_id": hit.chunk_id,
        "file_path": hit.file_path,
        "line_start": hit.line_range.start,
        "line_end": hit.line_range.end,
        "project_id": hit.project_id,
        "score": hit.effective_score(),
    })
}

fn first_line(content: &str) -> &str {
    content.lines().next().unwrap_or("").trim()
}
