//! Disambiguation review workflow.
//!
//! Proposals come from an external oracle (name, suggested canonical,
//! confidence, rationale) and wait in `review/proposals.json` until a reviewer
//! decides them:
//!
//! ```text
//! proposed ──accept──► accepted   (alias table mutated)
//!     │
//!     ├──reject──► rejected       (logged only)
//!     └──skip────► skipped        (logged only)
//! ```
//!
//! Confidence never triggers anything on its own. An accept runs, in order:
//! backup of the current table (create-new, never overwritten), merge into a
//! copy, atomic rewrite of `aliases.json`, append to the changelog, then the
//! new snapshot is published to readers. A failure at any step leaves the
//! published table and the on-disk table as they were.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use archivist_index::{AliasSnapshot, AliasStore, AliasTable, AliasTableFile, IndexError, MergeOutcome};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifacts::{read_json, write_alias_table, write_json_atomic, ArtifactPaths};

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalState {
    Proposed,
    Accepted,
    Rejected,
    Skipped,
}

impl ProposalState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ProposalState::Proposed)
    }
}

impl std::fmt::Display for ProposalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ProposalState::Proposed => "proposed",
            ProposalState::Accepted => "accepted",
            ProposalState::Rejected => "rejected",
            ProposalState::Skipped => "skipped",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Reject,
    Skip,
}

impl Decision {
    fn target_state(self) -> ProposalState {
        match self {
            Decision::Accept => ProposalState::Accepted,
            Decision::Reject => ProposalState::Rejected,
            Decision::Skip => ProposalState::Skipped,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: Uuid,
    pub original: String,
    pub suggested: String,
    /// Oracle confidence in `[0, 1]`; informational only.
    pub confidence: f64,
    pub rationale: String,
    pub state: ProposalState,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<String>,
}

/// One suggestion as produced by the disambiguation oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleSuggestion {
    pub original: String,
    pub suggested: String,
    pub confidence: f64,
    #[serde(default)]
    pub rationale: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangelogAction {
    Accepted,
    Rejected,
    Skipped,
    Restored,
}

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangelogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal_id: Option<Uuid>,
    pub action: ChangelogAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<String>,
    pub alias_version_before: u64,
    pub alias_version_after: u64,
    /// Backup file name (under `review/backups/`) taken before the mutation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<MergeOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupInfo {
    pub name: String,
    pub path: PathBuf,
    pub alias_version: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("no proposal with id {0}")]
    UnknownProposal(Uuid),

    #[error("proposal {id} is already {state}; decisions are final")]
    AlreadyDecided { id: Uuid, state: ProposalState },

    #[error("confidence must be within [0, 1], got {0}")]
    InvalidConfidence(f64),

    #[error("proposal names must not be empty")]
    EmptyName,

    #[error("proposal maps `{0}` onto itself")]
    SelfMapping(String),

    #[error("no backup named `{0}`")]
    UnknownBackup(String),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),

    #[error(transparent)]
    Index(#[from] IndexError),
}

impl From<anyhow::Error> for ReviewError {
    fn from(e: anyhow::Error) -> Self {
        ReviewError::Storage(e)
    }
}

pub type ReviewResult<T> = std::result::Result<T, ReviewError>;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ReviewError + '_ {
    move |source| ReviewError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ============================================================================
// Workflow
// ============================================================================

#[derive(Debug)]
pub struct DisambiguationReview {
    paths: ArtifactPaths,
    store: Arc<AliasStore>,
    /// Also serializes decisions so one proposal cannot be decided twice.
    proposals: Mutex<Vec<Proposal>>,
}

impl DisambiguationReview {
    /// Open the review queue for a data directory, sharing `store` with readers.
    pub fn open(paths: ArtifactPaths, store: Arc<AliasStore>) -> ReviewResult<Self> {
        let proposals_path = paths.proposals();
        let proposals: Vec<Proposal> = if proposals_path.exists() {
            read_json(&proposals_path)?
        } else {
            Vec::new()
        };
        Ok(Self {
            paths,
            store,
            proposals: Mutex::new(proposals),
        })
    }

    pub fn store(&self) -> &Arc<AliasStore> {
        &self.store
    }

    /// Queue a new proposal. Nothing is applied.
    pub fn propose(
        &self,
        original: &str,
        suggested: &str,
        confidence: f64,
        rationale: &str,
    ) -> ReviewResult<Proposal> {
        let mut proposals = self.proposals.lock();
        let proposal = new_proposal(original, suggested, confidence, rationale)?;
        proposals.push(proposal.clone());
        write_json_atomic(&self.paths.proposals(), &*proposals)?;
        tracing::info!(id = %proposal.id, original, suggested, confidence, "proposal queued");
        Ok(proposal)
    }

    /// Queue every suggestion in an oracle file (JSON array). All-or-nothing.
    pub fn import(&self, path: &Path) -> ReviewResult<Vec<Proposal>> {
        let suggestions: Vec<OracleSuggestion> = read_json(path)?;
        let created = suggestions
            .iter()
            .map(|s| new_proposal(&s.original, &s.suggested, s.confidence, &s.rationale))
            .collect::<ReviewResult<Vec<_>>>()?;

        let mut proposals = self.proposals.lock();
        proposals.extend(created.iter().cloned());
        write_json_atomic(&self.paths.proposals(), &*proposals)?;
        tracing::info!(path = %path.display(), count = created.len(), "imported proposals");
        Ok(created)
    }

    pub fn get(&self, id: Uuid) -> Option<Proposal> {
        self.proposals.lock().iter().find(|p| p.id == id).cloned()
    }

    /// Proposals in `state`, or all of them, in queue order.
    pub fn list(&self, state: Option<ProposalState>) -> Vec<Proposal> {
        self.proposals
            .lock()
            .iter()
            .filter(|p| state.map_or(true, |s| p.state == s))
            .cloned()
            .collect()
    }

    pub fn pending(&self) -> Vec<Proposal> {
        self.list(Some(ProposalState::Proposed))
    }

    /// Apply an explicit reviewer decision to a pending proposal.
    pub fn decide(
        &self,
        id: Uuid,
        decision: Decision,
        reviewer: Option<&str>,
    ) -> ReviewResult<ChangelogEntry> {
        let mut proposals = self.proposals.lock();
        let idx = proposals
            .iter()
            .position(|p| p.id == id)
            .ok_or(ReviewError::UnknownProposal(id))?;
        let proposal = proposals[idx].clone();
        if proposal.state.is_terminal() {
            return Err(ReviewError::AlreadyDecided {
                id,
                state: proposal.state,
            });
        }

        let entry = match decision {
            Decision::Accept => self.commit_accept(&proposal, reviewer)?,
            Decision::Reject | Decision::Skip => {
                let version = self.store.snapshot().version;
                let entry = ChangelogEntry {
                    action: if decision == Decision::Reject {
                        ChangelogAction::Rejected
                    } else {
                        ChangelogAction::Skipped
                    },
                    ..proposal_entry(&proposal, reviewer, version, version)
                };
                self.append_changelog(&entry)?;
                entry
            }
        };

        let decided = &mut proposals[idx];
        decided.state = decision.target_state();
        decided.decided_at = Some(entry.timestamp);
        decided.reviewer = reviewer.map(str::to_string);
        if let Err(e) = write_json_atomic(&self.paths.proposals(), &*proposals) {
            // The decision itself is durable in the changelog.
            tracing::error!(id = %id, error = %e, "failed to persist proposal state");
            return Err(e.into());
        }
        tracing::info!(id = %id, state = %decision.target_state(), "proposal decided");
        Ok(entry)
    }

    fn commit_accept(
        &self,
        proposal: &Proposal,
        reviewer: Option<&str>,
    ) -> ReviewResult<ChangelogEntry> {
        let mut committed: Option<ChangelogEntry> = None;
        self.store.commit(|snap| -> ReviewResult<AliasTable> {
            let backup = self.write_backup(snap)?;

            let mut table = snap.table.clone();
            let outcome = table.merge(&proposal.original, &proposal.suggested)?;
            table.check_invariants()?;

            let next = snap.next_version();
            write_alias_table(&self.paths.aliases(), &table, next)?;

            let entry = ChangelogEntry {
                action: ChangelogAction::Accepted,
                backup: Some(backup),
                outcome: Some(outcome),
                ..proposal_entry(proposal, reviewer, snap.version, next)
            };
            if let Err(e) = self.append_changelog(&entry) {
                // Put the prior table back so disk matches the published snapshot.
                write_alias_table(&self.paths.aliases(), &snap.table, snap.version)?;
                return Err(e);
            }
            committed = Some(entry);
            Ok(table)
        })?;
        committed.ok_or_else(|| ReviewError::Storage(anyhow::anyhow!("commit produced no entry")))
    }

    /// Snapshot `snap` under `review/backups/`, never replacing an existing file.
    fn write_backup(&self, snap: &AliasSnapshot) -> ReviewResult<String> {
        let dir = self.paths.backups_dir();
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        let bytes = serde_json::to_vec_pretty(&snap.table.to_file(snap.version))
            .map_err(|e| ReviewError::Storage(e.into()))?;

        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.6fZ");
        let mut attempt = 0u32;
        loop {
            let name = match attempt {
                0 => format!("aliases-{stamp}-v{}.json", snap.version),
                n => format!("aliases-{stamp}-v{}-{n}.json", snap.version),
            };
            let path = dir.join(&name);
            let mut f = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(f) => f,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    attempt += 1;
                    continue;
                }
                Err(e) => return Err(io_err(&path)(e)),
            };
            f.write_all(&bytes).map_err(io_err(&path))?;
            f.sync_all().map_err(io_err(&path))?;
            tracing::info!(backup = %name, alias_version = snap.version, "alias table backed up");
            return Ok(name);
        }
    }

    fn append_changelog(&self, entry: &ChangelogEntry) -> ReviewResult<()> {
        let path = self.paths.changelog();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let mut line = serde_json::to_string(entry).map_err(|e| ReviewError::Storage(e.into()))?;
        line.push('\n');
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err(&path))?;
        f.write_all(line.as_bytes()).map_err(io_err(&path))?;
        f.sync_all().map_err(io_err(&path))?;
        Ok(())
    }

    /// Every changelog entry, oldest first.
    pub fn changelog(&self) -> ReviewResult<Vec<ChangelogEntry>> {
        let path = self.paths.changelog();
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&path)(e)),
        };
        let mut out = Vec::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(io_err(&path))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry = serde_json::from_str(&line).map_err(|e| {
                ReviewError::Storage(anyhow::anyhow!(
                    "corrupt changelog line {} in {}: {e}",
                    i + 1,
                    path.display()
                ))
            })?;
            out.push(entry);
        }
        Ok(out)
    }

    /// Backups, oldest first.
    pub fn list_backups(&self) -> ReviewResult<Vec<BackupInfo>> {
        let dir = self.paths.backups_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&dir)(e)),
        };
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_err(&dir))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let file: AliasTableFile = read_json(&path)?;
            out.push(BackupInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                path,
                alias_version: file.alias_version,
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Load the table stored in a backup.
    pub fn read_backup(&self, name: &str) -> ReviewResult<(AliasTable, u64)> {
        if name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(ReviewError::UnknownBackup(name.to_string()));
        }
        let path = self.paths.backups_dir().join(name);
        if !path.is_file() {
            return Err(ReviewError::UnknownBackup(name.to_string()));
        }
        let file: AliasTableFile = read_json(&path)?;
        let table = AliasTable::from_file(&file, &path)?;
        Ok((table, file.alias_version))
    }

    /// Roll the alias table back to a backup.
    ///
    /// The current table is backed up first, so a restore can itself be undone.
    /// The version keeps increasing; it never goes back to the backup's number.
    pub fn restore(&self, name: &str, reviewer: Option<&str>) -> ReviewResult<ChangelogEntry> {
        let (restored, restored_from) = self.read_backup(name)?;
        let mut committed: Option<ChangelogEntry> = None;
        self.store.commit(|snap| -> ReviewResult<AliasTable> {
            let backup = self.write_backup(snap)?;
            let next = snap.next_version();
            write_alias_table(&self.paths.aliases(), &restored, next)?;
            let entry = ChangelogEntry {
                timestamp: Utc::now(),
                proposal_id: None,
                action: ChangelogAction::Restored,
                original: None,
                suggested: None,
                confidence: None,
                rationale: Some(format!("restored {name} (alias version {restored_from})")),
                reviewer: reviewer.map(str::to_string),
                alias_version_before: snap.version,
                alias_version_after: next,
                backup: Some(backup),
                outcome: None,
            };
            if let Err(e) = self.append_changelog(&entry) {
                write_alias_table(&self.paths.aliases(), &snap.table, snap.version)?;
                return Err(e);
            }
            committed = Some(entry);
            Ok(restored)
        })?;
        committed.ok_or_else(|| ReviewError::Storage(anyhow::anyhow!("restore produced no entry")))
    }
}

fn new_proposal(
    original: &str,
    suggested: &str,
    confidence: f64,
    rationale: &str,
) -> ReviewResult<Proposal> {
    let original = archivist_index::display_form(original);
    let suggested = archivist_index::display_form(suggested);
    if archivist_index::name_key(&original).is_empty()
        || archivist_index::name_key(&suggested).is_empty()
    {
        return Err(ReviewError::EmptyName);
    }
    if archivist_index::name_key(&original) == archivist_index::name_key(&suggested) {
        return Err(ReviewError::SelfMapping(original));
    }
    if !(0.0..=1.0).contains(&confidence) {
        return Err(ReviewError::InvalidConfidence(confidence));
    }
    Ok(Proposal {
        id: Uuid::new_v4(),
        original,
        suggested,
        confidence,
        rationale: rationale.to_string(),
        state: ProposalState::Proposed,
        created_at: Utc::now(),
        decided_at: None,
        reviewer: None,
    })
}

fn proposal_entry(
    proposal: &Proposal,
    reviewer: Option<&str>,
    before: u64,
    after: u64,
) -> ChangelogEntry {
    ChangelogEntry {
        timestamp: Utc::now(),
        proposal_id: Some(proposal.id),
        action: ChangelogAction::Skipped,
        original: Some(proposal.original.clone()),
        suggested: Some(proposal.suggested.clone()),
        confidence: Some(proposal.confidence),
        rationale: Some(proposal.rationale.clone()),
        reviewer: reviewer.map(str::to_string),
        alias_version_before: before,
        alias_version_after: after,
        backup: None,
        outcome: None,
    }
}
