//! Set arithmetic deciding what to fetch and what to publish.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use spiegel_schema::{PackageArtifact, PackageTarget};

/// Which invalid artifacts a run repairs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePolicy {
    /// Re-fetch every invalid artifact, wanted or not.
    #[default]
    HealAll,
    /// Re-fetch invalid artifacts only when they are still wanted.
    WantedOnly,
}

impl ReconcilePolicy {
    /// Drop the invalid artifacts this policy does not repair.
    pub fn select_invalid(
        self,
        invalid: Vec<PackageArtifact>,
        wanted: &[PackageTarget],
    ) -> Vec<PackageArtifact> {
        match self {
            Self::HealAll => invalid,
            Self::WantedOnly => {
                let wanted: HashSet<&PackageTarget> = wanted.iter().collect();
                invalid
                    .into_iter()
                    .filter(|a| wanted.contains(&a.target))
                    .collect()
            }
        }
    }
}

/// `(invalid ∪ wanted) \ valid`, compared by target identity.
pub fn reconcile(
    valid: &[PackageArtifact],
    invalid: &[PackageArtifact],
    wanted: &[PackageTarget],
) -> HashSet<PackageTarget> {
    let valid: HashSet<&PackageTarget> = valid.iter().map(|a| &a.target).collect();

    invalid
        .iter()
        .map(|a| &a.target)
        .chain(wanted)
        .filter(|t| !valid.contains(t))
        .cloned()
        .collect()
}

/// Remove every artifact whose version had at least one failed target.
///
/// A version is published only when all of its platforms are present, so one
/// failed platform withholds the whole version from the catalog.
pub fn exclude_failed_versions(
    artifacts: Vec<PackageArtifact>,
    failed: &[PackageTarget],
) -> Vec<PackageArtifact> {
    let failed_versions: HashSet<(&str, &str)> = failed
        .iter()
        .map(|t| (t.identity.name.as_str(), t.version.as_str()))
        .collect();

    artifacts
        .into_iter()
        .filter(|a| {
            !failed_versions.contains(&(a.target.identity.name.as_str(), a.version()))
        })
        .collect()
}
