//! `archivist review ...`: the human-in-the-loop disambiguation queue.

use std::path::PathBuf;

use anyhow::Result;
use archivist_storage::{
    ArtifactPaths, ChangelogEntry, Decision, DisambiguationReview, Proposal, ProposalState,
};
use clap::{Subcommand, ValueEnum};
use colored::Colorize;
use uuid::Uuid;

use crate::{open_alias_store, output};

#[derive(Subcommand)]
pub enum ReviewCommands {
    /// Queue oracle suggestions from a JSON array of
    /// `{original, suggested, confidence, rationale}` objects.
    Import {
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },

    /// List proposals (pending only, unless `--state` or `--all`).
    List {
        #[arg(long, value_enum)]
        state: Option<StateArg>,
        #[arg(long, conflicts_with = "state")]
        all: bool,
        #[arg(long)]
        json: bool,
    },

    /// Accept a proposal: back up the alias table, then merge.
    Accept {
        id: Uuid,
        #[arg(long)]
        reviewer: Option<String>,
    },

    /// Reject a proposal (logged, no alias change).
    Reject {
        id: Uuid,
        #[arg(long)]
        reviewer: Option<String>,
    },

    /// Skip a proposal (logged, no alias change).
    Skip {
        id: Uuid,
        #[arg(long)]
        reviewer: Option<String>,
    },

    /// List alias-table backups, oldest first.
    Backups {
        #[arg(long)]
        json: bool,
    },

    /// Restore the alias table from a backup (the current table is backed up first).
    Restore {
        name: String,
        #[arg(long)]
        reviewer: Option<String>,
    },

    /// Print the changelog.
    Log {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum StateArg {
    Proposed,
    Accepted,
    Rejected,
    Skipped,
}

impl From<StateArg> for ProposalState {
    fn from(s: StateArg) -> Self {
        match s {
            StateArg::Proposed => ProposalState::Proposed,
            StateArg::Accepted => ProposalState::Accepted,
            StateArg::Rejected => ProposalState::Rejected,
            StateArg::Skipped => ProposalState::Skipped,
        }
    }
}

pub fn cmd_review(paths: &ArtifactPaths, command: ReviewCommands) -> Result<()> {
    let store = open_alias_store(paths)?;
    let review = DisambiguationReview::open(paths.clone(), store)?;

    match command {
        ReviewCommands::Import { input, json } => {
            let added = review.import(&input)?;
            if json {
                return output::print_json(&added);
            }
            println!("{} queued {} proposals", "ok".green().bold(), added.len());
            print_proposals(&added);
        }
        ReviewCommands::List { state, all, json } => {
            let proposals = if all {
                review.list(None)
            } else {
                review.list(Some(state.map_or(ProposalState::Proposed, Into::into)))
            };
            if json {
                return output::print_json(&proposals);
            }
            print_proposals(&proposals);
        }
        ReviewCommands::Accept { id, reviewer } => {
            decide(&review, id, Decision::Accept, reviewer.as_deref())?
        }
        ReviewCommands::Reject { id, reviewer } => {
            decide(&review, id, Decision::Reject, reviewer.as_deref())?
        }
        ReviewCommands::Skip { id, reviewer } => {
            decide(&review, id, Decision::Skip, reviewer.as_deref())?
        }
        ReviewCommands::Backups { json } => {
            let backups = review.list_backups()?;
            if json {
                return output::print_json(&backups);
            }
            if backups.is_empty() {
                println!("{} no backups yet", "ok".green().bold());
            }
            for b in &backups {
                println!("  {}  (alias version {})", b.name, b.alias_version);
            }
        }
        ReviewCommands::Restore { name, reviewer } => {
            let entry = review.restore(&name, reviewer.as_deref())?;
            print_entry(&entry);
        }
        ReviewCommands::Log { json } => {
            let log = review.changelog()?;
            if json {
                return output::print_json(&log);
            }
            for entry in &log {
                print_entry(entry);
            }
        }
    }
    Ok(())
}

fn decide(
    review: &DisambiguationReview,
    id: Uuid,
    decision: Decision,
    reviewer: Option<&str>,
) -> Result<()> {
    let entry = review.decide(id, decision, reviewer)?;
    print_entry(&entry);
    if entry.alias_version_after != entry.alias_version_before {
        eprintln!(
            "{} entity postings reflect alias version {}; rebuild to re-index",
            "info:".yellow().bold(),
            entry.alias_version_before
        );
    }
    Ok(())
}

fn print_proposals(proposals: &[Proposal]) {
    if proposals.is_empty() {
        println!("{} no proposals", "ok".green().bold());
        return;
    }
    for p in proposals {
        println!(
            "{}  [{}]  {} -> {}  (confidence {:.2})",
            p.id.to_string().bold(),
            p.state,
            p.original,
            p.suggested.bold(),
            p.confidence
        );
        if !p.rationale.is_empty() {
            println!("      {}", p.rationale.dimmed());
        }
    }
}

fn print_entry(entry: &ChangelogEntry) {
    let subject = match (&entry.original, &entry.suggested) {
        (Some(o), Some(s)) => format!("{o} -> {s}"),
        _ => entry.backup.clone().unwrap_or_default(),
    };
    println!(
        "{} {}  {:?}  {}  (alias v{} -> v{})",
        "ok".green().bold(),
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        entry.action,
        subject,
        entry.alias_version_before,
        entry.alias_version_after
    );
}
