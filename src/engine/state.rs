use std::fmt;
use std::path::PathBuf;

use crate::extract::ExtractError;

// Why a version was passed over without producing output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    DestinationExists,
    NoWheel,
    HashMismatch,
    UnsafeVersion,
}

impl SkipReason {
    pub fn label(self) -> &'static str {
        match self {
            SkipReason::DestinationExists => "already extracted",
            SkipReason::NoWheel => "no wheel available",
            SkipReason::HashMismatch => "hash mismatch",
            SkipReason::UnsafeVersion => "version is not a plain directory name",
        }
    }
}

// Terminal state of one version's trip through the pipeline.
#[derive(Debug)]
pub enum VersionOutcome {
    Skipped(SkipReason),
    Done(PathBuf),
    Failed(ExtractError),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub extracted: usize,
    pub already_present: usize,
    pub without_wheel: usize,
    pub hash_mismatches: usize,
    pub unsafe_versions: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn record(&mut self, outcome: &VersionOutcome) {
        match outcome {
            VersionOutcome::Done(_) => self.extracted += 1,
            VersionOutcome::Skipped(SkipReason::DestinationExists) => self.already_present += 1,
            VersionOutcome::Skipped(SkipReason::NoWheel) => self.without_wheel += 1,
            VersionOutcome::Skipped(SkipReason::HashMismatch) => self.hash_mismatches += 1,
            VersionOutcome::Skipped(SkipReason::UnsafeVersion) => self.unsafe_versions += 1,
            VersionOutcome::Failed(_) => self.failed += 1,
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} extracted, {} already present, {} without wheel, {} hash mismatches",
            self.extracted, self.already_present, self.without_wheel, self.hash_mismatches
        )?;
        if self.unsafe_versions > 0 {
            write!(f, ", {} unsafe versions", self.unsafe_versions)?;
        }
        write!(f, ", {} failed", self.failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_line_reports_every_outcome() {
        let mut summary = RunSummary::default();
        summary.record(&VersionOutcome::Done(PathBuf::from("out/1.0")));
        summary.record(&VersionOutcome::Skipped(SkipReason::NoWheel));
        summary.record(&VersionOutcome::Failed(ExtractError::MissingSubtree {
            prefix: "notebook/static/".into(),
        }));
        summary.record(&VersionOutcome::Failed(ExtractError::UnsafeEntry("../x".into())));

        assert_eq!(
            summary.to_string(),
            "1 extracted, 0 already present, 1 without wheel, 0 hash mismatches, 2 failed"
        );

        summary.record(&VersionOutcome::Skipped(SkipReason::UnsafeVersion));
        assert_eq!(
            summary.to_string(),
            "1 extracted, 0 already present, 1 without wheel, 0 hash mismatches, \
             1 unsafe versions, 2 failed"
        );
    }
}
