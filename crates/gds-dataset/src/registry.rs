use gds_batch::RunMetadata;
use gds_core::{DatasetKind, GdsError, GdsResult};
use std::collections::BTreeSet;
use std::fmt;

/// What makes two runs interchangeable for the dataset. Terminal names
/// repeat between grids, so every key is scoped to its grid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CombinationKey {
    /// Malfunction location and type
    Malfunction {
        grid: String,
        terminals: Vec<String>,
        kind: String,
    },
    /// Set of terminals with an installed PV
    PvPresence { grid: String, terminals: Vec<String> },
}

impl CombinationKey {
    pub fn from_metadata(
        grid: &str,
        kind: DatasetKind,
        metadata: &RunMetadata,
    ) -> GdsResult<Self> {
        match kind {
            DatasetKind::MalfunctionsInLvGrid => {
                let malfunction = metadata.malfunction.as_ref().ok_or_else(|| {
                    GdsError::Parse(format!(
                        "run {} carries no malfunction description",
                        metadata.run
                    ))
                })?;
                Ok(CombinationKey::Malfunction {
                    grid: grid.to_string(),
                    terminals: sorted(&malfunction.terminals),
                    kind: malfunction.curve.label().to_string(),
                })
            }
            DatasetKind::PvNoPv => Ok(CombinationKey::PvPresence {
                grid: grid.to_string(),
                terminals: sorted(&metadata.pv_terminals),
            }),
        }
    }
}

impl fmt::Display for CombinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CombinationKey::Malfunction {
                grid,
                terminals,
                kind,
            } => write!(f, "{kind} at {grid}[{}]", terminals.join(", ")),
            CombinationKey::PvPresence { grid, terminals } => {
                write!(f, "PVs at {grid}[{}]", terminals.join(", "))
            }
        }
    }
}

fn sorted(items: &[String]) -> Vec<String> {
    let mut items = items.to_vec();
    items.sort();
    items.dedup();
    items
}

/// Keys consumed during one assembly pass.
#[derive(Debug, Clone, Default)]
pub struct CombinationRegistry {
    seen: BTreeSet<CombinationKey>,
    duplicates: usize,
}

impl CombinationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key`; `false` (and counted) when it was seen before.
    pub fn register(&mut self, key: CombinationKey) -> bool {
        if self.seen.insert(key) {
            true
        } else {
            self.duplicates += 1;
            false
        }
    }

    pub fn contains(&self, key: &CombinationKey) -> bool {
        self.seen.contains(key)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }
}
