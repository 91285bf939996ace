//! Table name filters.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::error::{MigrateError, Result};

/// Case-insensitive set of table-name globs.
#[derive(Debug, Clone)]
pub struct TableFilter {
    set: GlobSet,
    len: usize,
}

impl TableFilter {
    /// Compile patterns such as `tmp_*` or `audit_log`.
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = GlobBuilder::new(pattern)
                .case_insensitive(true)
                .literal_separator(false)
                .build()
                .map_err(|e| {
                    MigrateError::Config(format!("invalid table pattern '{}': {}", pattern, e))
                })?;
            builder.add(glob);
        }
        let set = builder
            .build()
            .map_err(|e| MigrateError::Config(format!("invalid table patterns: {}", e)))?;
        Ok(Self {
            set,
            len: patterns.len(),
        })
    }

    /// Filter that matches nothing.
    pub fn empty() -> Self {
        Self {
            set: GlobSet::empty(),
            len: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn matches(&self, table: &str) -> bool {
        self.set.is_match(table)
    }
}

/// Include/exclude pair. An empty include list admits every table.
#[derive(Debug, Clone)]
pub struct TableSelection {
    include: TableFilter,
    exclude: TableFilter,
}

impl TableSelection {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        Ok(Self {
            include: TableFilter::new(include)?,
            exclude: TableFilter::new(exclude)?,
        })
    }

    /// Whether a table takes part.
    pub fn admits(&self, table: &str) -> bool {
        (self.include.is_empty() || self.include.matches(table)) && !self.exclude.matches(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(p: &[&str]) -> Vec<String> {
        p.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_glob_is_case_insensitive() {
        let filter = TableFilter::new(&patterns(&["tmp_*", "Audit"])).unwrap();
        assert!(filter.matches("TMP_orders"));
        assert!(filter.matches("audit"));
        assert!(!filter.matches("orders"));
    }

    #[test]
    fn test_empty_filter_matches_nothing() {
        let filter = TableFilter::empty();
        assert!(filter.is_empty());
        assert!(!filter.matches("users"));
    }

    #[test]
    fn test_selection() {
        let sel = TableSelection::new(&patterns(&["user*"]), &patterns(&["user_tmp"])).unwrap();
        assert!(sel.admits("users"));
        assert!(!sel.admits("user_tmp"));
        assert!(!sel.admits("orders"));

        let all = TableSelection::new(&[], &[]).unwrap();
        assert!(all.admits("anything"));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(TableFilter::new(&patterns(&["[unclosed"])).is_err());
    }
}
