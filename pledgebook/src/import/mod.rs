//! Bulk member import.
//!
//! Candidates parsed from CSV are checked against the current roster. Each
//! one either goes straight to the insert set or becomes a [`Conflict`] that
//! needs a [`Resolution`]. A resolved [`ImportAnalysis`] turns into an
//! [`ImportPlan`] of insert and update batches for the store.

pub mod csv;

use crate::error::{PledgeError, Result};
use crate::member::{Member, MemberFields, MemberId};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Phones need more than this many digits to count as a match.
const MIN_PHONE_MATCH_DIGITS: usize = 6;

/// Case-fold and trim a name for comparison.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Keep only the digits of a phone number.
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Why a candidate was matched to an existing member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchReason {
    #[serde(rename = "Name Match")]
    NameMatch,
    #[serde(rename = "Phone Match")]
    PhoneMatch,
}

impl fmt::Display for MatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchReason::NameMatch => f.write_str("Name Match"),
            MatchReason::PhoneMatch => f.write_str("Phone Match"),
        }
    }
}

/// What to do with a conflicting candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Discard the candidate; the existing member is untouched.
    #[default]
    Skip,
    /// Overwrite the existing member's fields, keeping its id and payments.
    Update,
    /// Add the candidate as a new member anyway.
    Create,
}

impl FromStr for Resolution {
    type Err = PledgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "skip" => Ok(Resolution::Skip),
            "update" | "merge" => Ok(Resolution::Update),
            "create" => Ok(Resolution::Create),
            other => Err(PledgeError::Validation(format!(
                "Unknown resolution '{other}' (expected skip, update or create)"
            ))),
        }
    }
}

/// A candidate that matched an existing member.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conflict {
    pub candidate: MemberFields,
    pub existing: Member,
    pub reason: MatchReason,
    pub resolution: Resolution,
}

/// Result of duplicate detection over a batch of candidates.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportAnalysis {
    pub clean: Vec<MemberFields>,
    pub conflicts: Vec<Conflict>,
}

/// Insert and update batches ready for the store's bulk write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportPlan {
    pub inserts: Vec<Member>,
    pub updates: Vec<Member>,
    pub skipped: usize,
    pub warnings: Vec<String>,
}

impl ImportPlan {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty()
    }
}

fn find_match<'a>(
    candidate: &MemberFields,
    existing: &'a [Member],
) -> Option<(&'a Member, MatchReason)> {
    let name = normalize_name(&candidate.name);
    let phone = normalize_phone(&candidate.phone);

    existing.iter().find_map(|m| {
        if normalize_name(&m.name) == name {
            return Some((m, MatchReason::NameMatch));
        }
        let other = normalize_phone(&m.phone);
        let phone_match = phone.len() > MIN_PHONE_MATCH_DIGITS
            && other.len() > MIN_PHONE_MATCH_DIGITS
            && phone == other;
        phone_match.then_some((m, MatchReason::PhoneMatch))
    })
}

impl ImportAnalysis {
    /// Split candidates into clean inserts and conflicts. The first matching
    /// existing member wins; every conflict starts as [`Resolution::Skip`].
    pub fn analyze(candidates: Vec<MemberFields>, existing: &[Member]) -> Self {
        let mut analysis = ImportAnalysis::default();
        for candidate in candidates {
            match find_match(&candidate, existing) {
                Some((matched, reason)) => analysis.conflicts.push(Conflict {
                    candidate,
                    existing: matched.clone(),
                    reason,
                    resolution: Resolution::Skip,
                }),
                None => analysis.clean.push(candidate),
            }
        }
        analysis
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// Set the resolution of one conflict.
    pub fn resolve(&mut self, index: usize, resolution: Resolution) -> Result<()> {
        let count = self.conflicts.len();
        let conflict = self.conflicts.get_mut(index).ok_or_else(|| {
            PledgeError::Validation(format!("No conflict at index {index} (have {count})"))
        })?;
        conflict.resolution = resolution;
        Ok(())
    }

    /// Set the same resolution on every conflict.
    pub fn resolve_all(&mut self, resolution: Resolution) {
        for conflict in &mut self.conflicts {
            conflict.resolution = resolution;
        }
    }

    /// Build the write batches. New members get sequential ids from `next_id`,
    /// clean candidates first, then `Create` conflicts in order.
    ///
    /// `Update` merges onto the member as it stands in `roster` now, not the
    /// copy taken at analysis time, so payments logged in between survive. A
    /// matched member that has since been deleted is skipped with a warning.
    pub fn plan(&self, next_id: MemberId, roster: &[Member]) -> ImportPlan {
        let mut plan = ImportPlan::default();
        let mut new_fields: Vec<&MemberFields> = self.clean.iter().collect();

        for conflict in &self.conflicts {
            match conflict.resolution {
                Resolution::Skip => plan.skipped += 1,
                Resolution::Create => new_fields.push(&conflict.candidate),
                Resolution::Update => {
                    let id = conflict.existing.id;
                    match roster.iter().find(|m| m.id == id) {
                        Some(current) => {
                            plan.updates.push(current.merged_with(&conflict.candidate))
                        }
                        None => {
                            plan.skipped += 1;
                            plan.warnings.push(format!(
                                "'{}' matched member {id}, which no longer exists. Skipped.",
                                conflict.candidate.name
                            ));
                        }
                    }
                }
            }
        }

        plan.inserts = new_fields
            .into_iter()
            .zip(next_id..)
            .map(|(fields, id)| Member::new(id, fields.clone()))
            .collect();
        plan
    }
}

/// A parsed and analysed CSV import waiting to be committed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportSession {
    pub analysis: ImportAnalysis,
    pub warnings: Vec<String>,
}

impl ImportSession {
    /// Parse CSV text and check it against the given roster snapshot.
    pub fn from_csv(text: &str, existing: &[Member]) -> Result<Self> {
        let parsed = csv::parse_members(text)?;
        Ok(ImportSession {
            analysis: ImportAnalysis::analyze(parsed.candidates, existing),
            warnings: parsed.warnings,
        })
    }

    /// With no conflicts there is nothing to ask the user.
    pub fn needs_confirmation(&self) -> bool {
        self.analysis.has_conflicts()
    }
}

/// Counts reported after a committed import.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub warnings: Vec<String>,
}

/// Outcome of [`Store::import_csv`](crate::Store::import_csv).
#[derive(Debug, Clone, PartialEq)]
pub enum ImportOutcome {
    /// No conflicts were found and the import was written.
    Committed(ImportReport),
    /// Conflicts need a resolution before [`Store::commit_import`](crate::Store::commit_import).
    NeedsResolution(ImportSession),
}
