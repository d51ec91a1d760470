use tracing::{info, warn};

use crate::errors::RecordError;
use crate::store::Outcome;

pub mod career;
pub mod challenges;
pub mod competitions;
pub mod countries;
pub mod games;
pub mod gapfill;
pub mod saves;
pub mod seasons;
pub mod teams;
pub mod trophies;
pub mod users;

/// Per-step accounting, reported once at the end of every step.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StepCounters {
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: u64,
}

impl StepCounters {
    pub fn tally(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Created => self.created += 1,
            Outcome::Updated => self.updated += 1,
        }
    }

    pub fn tally_created(&mut self, was_created: bool) {
        if was_created {
            self.created += 1;
        } else {
            self.updated += 1;
        }
    }

    /// Whole-record skip: counted and logged, never fatal to the step.
    pub fn skip(&mut self, err: &RecordError) {
        self.skipped += 1;
        warn!(%err, "record skipped");
    }

    /// Field-level anomaly on a record that is still migrated (an optional
    /// foreign key nulled, a team link dropped).
    pub fn field_warning(&mut self, err: &RecordError) {
        self.errors += 1;
        warn!(%err, "field dropped");
    }

    pub fn report(&self, step: &str) {
        info!(
            step,
            created = self.created,
            updated = self.updated,
            skipped = self.skipped,
            errors = self.errors,
            "step complete"
        );
    }

    pub fn merge(&mut self, other: StepCounters) {
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.errors += other.errors;
    }
}

/// Source foreign ids for teams/clubs/leagues arrive as strings; coerce to
/// the numeric ids the target schema uses.
pub fn parse_numeric_id(
    path: &str,
    field: &'static str,
    raw: &str,
) -> Result<i64, RecordError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| RecordError::invalid(path, field, raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_coercion_accepts_padded_strings() {
        assert_eq!(parse_numeric_id("p", "teamId", " 42 ").unwrap(), 42);
        assert!(parse_numeric_id("p", "teamId", "42a").is_err());
        assert!(parse_numeric_id("p", "teamId", "").is_err());
    }
}
