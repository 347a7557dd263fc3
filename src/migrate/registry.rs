//! Ordered collection of migration steps.

use std::collections::{BTreeSet, HashSet};

use super::step::MigrationStep;

/// A statically ordered list of steps, with lookups by table and version.
///
/// Versions are unique within one table; different tables may reuse numbers.
#[derive(Debug, Clone)]
pub struct MigrationRegistry {
    steps: Vec<MigrationStep>,
}

impl MigrationRegistry {
    /// Build a registry, rejecting duplicate versions within a table.
    pub fn new(steps: Vec<MigrationStep>) -> anyhow::Result<Self> {
        let mut seen = HashSet::new();
        for step in &steps {
            if step.version == 0 {
                anyhow::bail!("migration versions start at 1 (table '{}')", step.table);
            }
            if !seen.insert((step.table, step.version)) {
                anyhow::bail!(
                    "duplicate migration version {} for table '{}'",
                    step.version,
                    step.table
                );
            }
        }
        Ok(Self { steps })
    }

    /// All steps in declaration order.
    pub fn all_steps(&self) -> &[MigrationStep] {
        &self.steps
    }

    /// Steps for `table`, ascending by version.
    pub fn steps_for_table(&self, table: &str) -> Vec<&MigrationStep> {
        let mut steps: Vec<&MigrationStep> =
            self.steps.iter().filter(|s| s.table == table).collect();
        steps.sort_by_key(|s| s.version);
        steps
    }

    /// Steps for `table` with `version > from_version`, ascending.
    pub fn steps_after_version(&self, table: &str, from_version: u32) -> Vec<&MigrationStep> {
        self.steps_for_table(table)
            .into_iter()
            .filter(|s| s.version > from_version)
            .collect()
    }

    /// Highest registered version for `table`, `0` when it has none.
    pub fn latest_version(&self, table: &str) -> u32 {
        self.steps
            .iter()
            .filter(|s| s.table == table)
            .map(|s| s.version)
            .max()
            .unwrap_or(0)
    }

    pub fn all_table_names(&self) -> BTreeSet<&'static str> {
        self.steps.iter().map(|s| s.table).collect()
    }

    /// Table names by first appearance, the order the runner walks them in.
    pub fn tables_in_order(&self) -> Vec<&'static str> {
        let mut seen = HashSet::new();
        self.steps
            .iter()
            .filter(|s| seen.insert(s.table))
            .map(|s| s.table)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::step::{Probe, SchemaChange};

    fn step(version: u32, table: &'static str) -> MigrationStep {
        MigrationStep::new(
            version,
            table,
            "noop",
            SchemaChange::Execute {
                sql: "SELECT 1",
                skip_if: Probe::Never,
            },
        )
    }

    fn registry() -> MigrationRegistry {
        MigrationRegistry::new(vec![
            step(1, "memos"),
            step(1, "tags"),
            step(3, "memos"),
            step(2, "memos"),
            step(10, "tags"),
            step(10, "memos"),
        ])
        .unwrap()
    }

    #[test]
    fn test_steps_for_table_sorted() {
        let r = registry();
        let versions: Vec<u32> = r.steps_for_table("memos").iter().map(|s| s.version).collect();
        assert_eq!(versions, vec![1, 2, 3, 10]);
    }

    #[test]
    fn test_steps_after_version_excludes_applied() {
        let r = registry();
        let versions: Vec<u32> = r
            .steps_after_version("memos", 2)
            .iter()
            .map(|s| s.version)
            .collect();
        assert_eq!(versions, vec![3, 10]);
        assert!(r.steps_after_version("memos", 10).is_empty());
        assert_eq!(r.steps_after_version("memos", 0).len(), 4);
    }

    #[test]
    fn test_latest_version() {
        let r = registry();
        assert_eq!(r.latest_version("memos"), 10);
        assert_eq!(r.latest_version("tags"), 10);
        assert_eq!(r.latest_version("unknown"), 0);
    }

    #[test]
    fn test_table_names_deduplicated() {
        let r = registry();
        let names: Vec<&str> = r.all_table_names().into_iter().collect();
        assert_eq!(names, vec!["memos", "tags"]);
        assert_eq!(r.tables_in_order(), vec!["memos", "tags"]);
    }

    #[test]
    fn test_all_steps_keeps_declaration_order() {
        let r = registry();
        let order: Vec<(u32, &str)> = r.all_steps().iter().map(|s| (s.version, s.table)).collect();
        assert_eq!(order[2], (3, "memos"));
        assert_eq!(order[3], (2, "memos"));
    }

    #[test]
    fn test_duplicate_version_in_table_rejected() {
        let err = MigrationRegistry::new(vec![step(2, "memos"), step(2, "memos")]).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_version_zero_rejected() {
        assert!(MigrationRegistry::new(vec![step(0, "memos")]).is_err());
    }
}
