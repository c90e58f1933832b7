//! Archivist CLI
//!
//! Command-line front end over one data directory:
//! - `build`: corpus + alias seed + co-occurrence records -> persisted artifacts
//! - `query`, `connections`, `path`, `stats`: read-only retrieval
//! - `review`: the disambiguation queue (import, decide, back up, restore)
//!
//! Human-readable output goes to stdout; `--json` switches it to JSON.
//! Logs always go to stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use archivist_index::{AliasStore, AliasTable, DateRange};
use archivist_ingest::{
    load_alias_seed, load_contacts, load_corpus, load_entity_seeds, load_manifests, BuildInputs,
    BuildOutcome, BuildReport, IndexBuilder,
};
use archivist_query::{HybridWeights, QueryEngine, QuerySpec};
use archivist_storage::{
    load_artifacts, read_alias_table, save_build, ArchivistConfig, ArtifactPaths,
};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

mod output;
mod review;

#[derive(Parser)]
#[command(name = "archivist")]
#[command(
    author,
    version,
    about = "Archivist: entity resolution and hybrid retrieval over document archives"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Data directory holding the alias table, artifacts and review state.
    #[arg(long, global = true, default_value = "archivist-data")]
    data_dir: PathBuf,

    /// Config file (default: `<data-dir>/archivist.json` when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the entity index, relationship graph and vector index.
    ///
    /// Resumes from `build.ckpt` when a previous run was interrupted.
    Build(BuildArgs),

    /// Retrieve documents (semantic, entity, multi-entity, temporal or hybrid).
    Query(QueryArgs),

    /// Entities adjacent to an entity, heaviest edge first.
    Connections {
        entity: String,
        #[arg(long)]
        min_weight: Option<u64>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },

    /// Shortest co-occurrence path between two entities.
    Path {
        from: String,
        to: String,
        #[arg(long)]
        max_hops: Option<usize>,
        #[arg(long)]
        min_weight: Option<u64>,
        #[arg(long)]
        json: bool,
    },

    /// Aggregate counts for the built archive.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Disambiguation review queue.
    Review {
        #[command(subcommand)]
        command: review::ReviewCommands,
    },
}

#[derive(Args)]
struct BuildArgs {
    /// Corpus: a JSON Lines file or a directory of `.txt` files.
    #[arg(long)]
    corpus: PathBuf,

    /// `{alias: canonical}` seed; only used when the data directory has no
    /// alias table yet.
    #[arg(long)]
    aliases: Option<PathBuf>,

    /// Entity descriptions (type, bio, tags).
    #[arg(long)]
    entities: Option<PathBuf>,

    /// Flight manifest records.
    #[arg(long)]
    manifests: Option<PathBuf>,

    /// Contact records.
    #[arg(long)]
    contacts: Option<PathBuf>,

    /// Discard any checkpoint and rebuild from the first document.
    #[arg(long)]
    fresh: bool,

    /// Stop after this many documents (resumable).
    #[arg(long)]
    max_documents: Option<usize>,

    #[arg(long)]
    min_mentions: Option<u32>,

    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct QueryArgs {
    /// Free text.
    #[arg(long, short)]
    text: Option<String>,

    /// Entity filter (repeatable; all must match).
    #[arg(long = "entity", short)]
    entities: Vec<String>,

    /// Earliest primary date (inclusive, YYYY-MM-DD).
    #[arg(long)]
    from: Option<NaiveDate>,

    /// Latest primary date (inclusive, YYYY-MM-DD).
    #[arg(long)]
    to: Option<NaiveDate>,

    #[arg(long)]
    source: Option<String>,

    #[arg(long)]
    limit: Option<usize>,

    /// Hybrid weight of semantic similarity (default from config).
    #[arg(long)]
    semantic_weight: Option<f64>,

    /// Hybrid weight of the graph signal (default from config).
    #[arg(long)]
    graph_weight: Option<f64>,

    /// Edges lighter than this do not count towards the graph signal.
    #[arg(long)]
    min_weight: Option<u64>,

    #[arg(long)]
    json: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.global.verbose);

    let paths = ArtifactPaths::new(&cli.global.data_dir);
    let config = ArchivistConfig::resolve(&cli.global.data_dir, cli.global.config.as_deref())?;

    match cli.command {
        Commands::Build(args) => cmd_build(&paths, config, args),
        Commands::Query(args) => cmd_query(&paths, &config, args),
        Commands::Connections {
            entity,
            min_weight,
            limit,
            json,
        } => {
            let engine = open_engine(&paths, &config)?;
            let response = engine.connections(&entity, min_weight, limit);
            if json {
                output::print_json(&response)
            } else {
                output::print_connections(&response);
                Ok(())
            }
        }
        Commands::Path {
            from,
            to,
            max_hops,
            min_weight,
            json,
        } => {
            let engine = open_engine(&paths, &config)?;
            let response = engine.shortest_path(&from, &to, max_hops, min_weight)?;
            if json {
                output::print_json(&response)
            } else {
                output::print_path(&response);
                Ok(())
            }
        }
        Commands::Stats { json } => {
            let engine = open_engine(&paths, &config)?;
            let stats = engine.stats();
            if json {
                output::print_json(&stats)
            } else {
                output::print_stats(&stats);
                Ok(())
            }
        }
        Commands::Review { command } => review::cmd_review(&paths, command),
    }
}

/// Load persisted artifacts and serve them with the configured embedder.
fn open_engine(paths: &ArtifactPaths, config: &ArchivistConfig) -> Result<QueryEngine> {
    let artifacts = load_artifacts(paths)?;
    let embedder = config.build.embedder()?;
    let engine = QueryEngine::from_artifacts(
        artifacts,
        config.normalizer.normalizer(),
        embedder,
        config.retrieval.clone(),
    )?;
    Ok(engine)
}

/// The live alias table if the data directory has one, else the seed.
///
/// A live table carries review decisions, so a seed is never allowed to
/// replace it silently.
fn alias_table_for_build(paths: &ArtifactPaths, seed: Option<&Path>) -> Result<(AliasTable, u64)> {
    let live = paths.aliases();
    match (live.exists(), seed) {
        (true, None) => read_alias_table(&live),
        (true, Some(seed)) => Err(anyhow!(
            "{} already holds the live alias table; it may contain review decisions that {} would discard. \
             Drop --aliases to build against the live table, or use a new --data-dir.",
            live.display(),
            seed.display()
        )),
        (false, Some(seed)) => Ok((load_alias_seed(seed)?, 1)),
        (false, None) => bail!(
            "no alias table in {}; pass --aliases <seed.json> for the first build",
            paths.root().display()
        ),
    }
}

fn cmd_build(paths: &ArtifactPaths, mut config: ArchivistConfig, args: BuildArgs) -> Result<()> {
    if let Some(min) = args.min_mentions {
        config.build.min_mentions = min;
    }
    config.validate()?;

    let (table, alias_version) = alias_table_for_build(paths, args.aliases.as_deref())?;
    let corpus = load_corpus(&args.corpus)?;
    let manifests = match &args.manifests {
        Some(p) => load_manifests(p)?,
        None => Vec::new(),
    };
    let contacts = match &args.contacts {
        Some(p) => load_contacts(p)?,
        None => Vec::new(),
    };
    let seeds = match &args.entities {
        Some(p) => load_entity_seeds(p)?,
        None => Vec::new(),
    };
    tracing::info!(
        documents = corpus.len(),
        manifests = manifests.len(),
        contacts = contacts.len(),
        seeds = seeds.len(),
        alias_version,
        "build inputs loaded"
    );
    let embedder = config.build.embedder()?;
    let normalizer = config.normalizer.normalizer();

    let mut options = config.build.options(Some(paths.checkpoint()));
    options.fresh = args.fresh;
    options.max_documents = args.max_documents;

    let inputs = BuildInputs {
        corpus: &corpus,
        aliases: &table,
        normalizer: &normalizer,
        embedder: &*embedder,
        manifests: &manifests,
        contacts: &contacts,
        seeds: &seeds,
    };
    let builder = IndexBuilder::new(inputs, options)?;
    match builder.run().context("build failed")? {
        BuildOutcome::Suspended { cursor, total } => {
            eprintln!(
                "{} build suspended at document {cursor} of {total}; run `archivist build` again to resume",
                "info:".yellow().bold()
            );
            Ok(())
        }
        BuildOutcome::Complete(built) => {
            let manifest = save_build(paths, &built, &table, alias_version)?;
            if args.json {
                output::print_json(&manifest)
            } else {
                print_report(&manifest.report);
                eprintln!(
                    "{} {}",
                    "wrote".green().bold(),
                    paths.root().display().to_string().bold()
                );
                Ok(())
            }
        }
    }
}

fn print_report(report: &BuildReport) {
    eprintln!(
        "{} indexed {} of {} documents ({} failed, {} rejected at ingestion)",
        "ok".green().bold(),
        report.documents_indexed,
        report.documents_total,
        report.documents_failed,
        report.rejected_records
    );
    if let Some(cursor) = report.resumed_from {
        eprintln!("   resumed from checkpoint at document {cursor}");
    }
    eprintln!(
        "   co-occurrence events: {} flight, {} contact, {} document ({} unmapped participants)",
        report.manifest_events,
        report.contact_events,
        report.document_events,
        report.unmapped_participants
    );
}

fn cmd_query(paths: &ArtifactPaths, config: &ArchivistConfig, args: QueryArgs) -> Result<()> {
    let engine = open_engine(paths, config)?;
    let weights = match (args.semantic_weight, args.graph_weight) {
        (None, None) => None,
        (s, g) => {
            let defaults = engine.default_weights();
            Some(HybridWeights::new(
                s.unwrap_or(defaults.semantic),
                g.unwrap_or(defaults.graph),
            ))
        }
    };
    let date_range = (args.from.is_some() || args.to.is_some())
        .then(|| DateRange::new(args.from, args.to));
    let spec = QuerySpec {
        text: args.text,
        entities: args.entities,
        date_range,
        source: args.source,
        min_edge_weight: args.min_weight,
        limit: args.limit,
        weights,
    };
    let response = engine.query(&spec)?;
    if args.json {
        output::print_json(&response)
    } else {
        output::print_query(&response);
        Ok(())
    }
}

/// Alias store over the live table, for the review commands.
fn open_alias_store(paths: &ArtifactPaths) -> Result<Arc<AliasStore>> {
    let (table, version) = read_alias_table(&paths.aliases()).with_context(|| {
        format!(
            "no alias table in {}; run `archivist build --aliases <seed.json>` first",
            paths.root().display()
        )
    })?;
    Ok(Arc::new(AliasStore::new(table, version)))
}
