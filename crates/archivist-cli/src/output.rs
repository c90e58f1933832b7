//! Human-readable and JSON rendering for CLI results.

use anyhow::Result;
use archivist_index::{PathOutcome, Resolution};
use archivist_query::{ConnectionsResponse, PathResponse, QueryResponse, Stats};
use colored::Colorize;
use serde::Serialize;

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn describe(resolution: &Resolution) -> String {
    match resolution {
        Resolution::Exact { canonical } => canonical.clone(),
        Resolution::Fuzzy { canonical, score } => format!("{canonical} (fuzzy {score:.2})"),
        Resolution::Unmapped { name } => format!("{name} (unmapped)"),
    }
}

fn stale_warning(stale: bool) {
    if stale {
        eprintln!(
            "{} alias table changed since the last build; entity postings may be out of date \
             until `archivist build` is run again",
            "warning:".yellow().bold()
        );
    }
}

pub fn print_query(response: &QueryResponse) {
    stale_warning(response.index_stale);
    for name in &response.resolved {
        println!(
            "{} {} -> {}",
            "entity".cyan(),
            name.input,
            describe(&name.resolution)
        );
    }
    if !response.unresolved.is_empty() {
        eprintln!(
            "{} no canonical entity for: {}",
            "warning:".yellow().bold(),
            response.unresolved.join(", ")
        );
    }
    if response.is_empty() {
        println!("{} no matching documents ({} mode)", "ok".green().bold(), response.mode);
        return;
    }
    println!(
        "{} {} documents ({} mode)",
        "ok".green().bold(),
        response.hits.len(),
        response.mode
    );
    for (rank, hit) in response.hits.iter().enumerate() {
        let date = hit
            .metadata
            .date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        print!(
            "{:>3}. {}  score={:.4}  source={}  date={}",
            rank + 1,
            hit.doc_id.bold(),
            hit.score,
            hit.metadata.source,
            date
        );
        if let Some(c) = &hit.components {
            print!("  [semantic={:.3} graph={:.3}]", c.semantic, c.graph);
        }
        println!();
    }
}

pub fn print_connections(response: &ConnectionsResponse) {
    let Some(entity) = &response.entity else {
        println!("{} `{}` is not a known entity", "ok".green().bold(), response.input);
        return;
    };
    println!(
        "{} {} connections for {}",
        "ok".green().bold(),
        response.connections.len(),
        entity.bold()
    );
    for c in &response.connections {
        let contexts = c
            .contexts
            .iter()
            .map(|(ctx, n)| format!("{}={n}", ctx.as_str()))
            .collect::<Vec<_>>()
            .join(" ");
        println!("  {:>5}  {}  ({contexts})", c.weight, c.entity);
    }
}

pub fn print_path(response: &PathResponse) {
    let from = describe(&response.from.resolution);
    let to = describe(&response.to.resolution);
    match &response.outcome {
        PathOutcome::Found {
            path,
            hops,
            min_weight,
        } => {
            println!(
                "{} {from} -> {to}: {hops} hop(s){}",
                "ok".green().bold(),
                min_weight
                    .map(|w| format!(", weakest edge {w}"))
                    .unwrap_or_default()
            );
            println!("  {}", path.join(" -> "));
        }
        PathOutcome::NotConnected => {
            println!(
                "{} {from} and {to} are not connected within {} hop(s)",
                "ok".green().bold(),
                response.max_hops
            );
        }
    }
}

pub fn print_stats(stats: &Stats) {
    stale_warning(stats.index_stale);
    let rows: [(&str, String); 15] = [
        ("documents ingested", stats.documents_ingested.to_string()),
        ("documents indexed", stats.documents_indexed.to_string()),
        ("documents failed", stats.documents_failed.to_string()),
        ("documents embedded", stats.documents_embedded.to_string()),
        ("entities tracked", stats.entities_tracked.to_string()),
        ("indexed entities", stats.indexed_entities.to_string()),
        ("aliases", stats.aliases.to_string()),
        ("canonical entities", stats.canonical_entities.to_string()),
        ("graph nodes", stats.graph_nodes.to_string()),
        ("graph edges", stats.graph_edges.to_string()),
        ("embedding dim", stats.embedding_dim.to_string()),
        ("embedder", stats.embedder_model.clone()),
        ("min mentions", stats.min_mentions.to_string()),
        ("alias version", stats.alias_version.to_string()),
        ("index stale", stats.index_stale.to_string()),
    ];
    for (label, value) in rows {
        println!("{:<20} {}", format!("{label}:").cyan(), value);
    }
}
