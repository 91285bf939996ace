//! Index recommendation engine.
//!
//! The application pushes `(sql, execution time, table)` samples through
//! [`IndexAdvisor::record_query`]. Literals and placeholders are replaced by
//! `?` so repeated shapes collapse into one pattern. A pattern that is both
//! frequent and slow yields an index suggestion; indexes whose columns are a
//! prefix of another index on the same table are flagged as redundant.
//!
//! The advisor never touches a database. The planner copies its suggestions
//! into the plan and applies `create` suggestions only on request.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AdvisorConfig;
use crate::core::schema::{SchemaModel, Table};

static STRING_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'(?:[^']|'')*'").expect("valid literal regex"));

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\$\d+|:[A-Za-z_][A-Za-z0-9_]*|@[A-Za-z_][A-Za-z0-9_]*|\?\d*)")
        .expect("valid placeholder regex")
});

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+(?:\.\d+)?\b").expect("valid number regex"));

static IN_LIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bin\s*\(\s*\?(?:\s*,\s*\?)*\s*\)").expect("valid in-list regex"));

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

static WHERE_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\bwhere\b(.*?)(?:\bgroup\s+by\b|\border\s+by\b|\blimit\b|\breturning\b|$)")
        .expect("valid where regex")
});

static ORDER_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\border\s+by\b(.*?)(?:\blimit\b|\boffset\b|$)").expect("valid order regex")
});

static PREDICATE_COLUMN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:[A-Za-z_][A-Za-z0-9_]*\.)?([A-Za-z_][A-Za-z0-9_]*)\s*(?:=|<>|!=|<=|>=|<|>|\bin\b|\blike\b|\bilike\b|\bis\b|\bbetween\b)",
    )
    .expect("valid predicate regex")
});

const KEYWORDS: &[&str] = &["and", "or", "not", "null", "exists", "case", "when", "then"];

/// Statistics for one normalized query shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPattern {
    pub shape: String,
    pub table: String,
    pub count: u64,
    pub total_ms: f64,
    pub max_ms: f64,
    /// Columns referenced by predicates, then ORDER BY, in first-seen order.
    pub columns: Vec<String>,
    pub last_seen: DateTime<Utc>,
}

impl QueryPattern {
    pub fn avg_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms / self.count as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    /// Add an index.
    Create,
    /// An existing index is covered by another one.
    Drop,
    /// Slow and frequent, but no indexable predicate was found.
    Review,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// One ranked suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecommendation {
    pub kind: RecommendationKind,
    pub table: String,
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,
    pub priority: Priority,
    /// Executions × average milliseconds of the pattern; 0 for drops.
    pub estimated_impact: f64,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
}

/// Collects query statistics and turns them into suggestions.
#[derive(Debug)]
pub struct IndexAdvisor {
    config: AdvisorConfig,
    patterns: Mutex<HashMap<(String, String), QueryPattern>>,
}

impl Default for IndexAdvisor {
    fn default() -> Self {
        Self::new(AdvisorConfig::default())
    }
}

impl IndexAdvisor {
    pub fn new(config: AdvisorConfig) -> Self {
        Self {
            config,
            patterns: Mutex::new(HashMap::new()),
        }
    }

    /// Record one executed query. Never fails and never blocks on I/O.
    pub fn record_query(&self, sql: &str, execution_time_ms: f64, table: &str) {
        if !execution_time_ms.is_finite() || execution_time_ms < 0.0 {
            debug!("Ignoring query sample with execution time {}", execution_time_ms);
            return;
        }
        let shape = normalize_query(sql);
        if shape.is_empty() {
            return;
        }
        let table = table.trim().to_string();
        let key = (table.clone(), shape);

        let mut patterns = self.patterns.lock();
        if !patterns.contains_key(&key) && patterns.len() >= self.config.max_patterns {
            evict_least_used(&mut patterns);
        }
        let now = Utc::now();
        let pattern = patterns.entry(key).or_insert_with_key(|(table, shape)| QueryPattern {
            shape: shape.clone(),
            table: table.clone(),
            count: 0,
            total_ms: 0.0,
            max_ms: 0.0,
            columns: extract_columns(shape),
            last_seen: now,
        });
        pattern.count += 1;
        pattern.total_ms += execution_time_ms;
        pattern.max_ms = pattern.max_ms.max(execution_time_ms);
        pattern.last_seen = now;
    }

    /// Snapshot of recorded patterns, most frequent first.
    pub fn patterns(&self) -> Vec<QueryPattern> {
        let mut out: Vec<_> = self.patterns.lock().values().cloned().collect();
        out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.shape.cmp(&b.shape)));
        out
    }

    pub fn clear(&self) {
        self.patterns.lock().clear();
    }

    /// Ranked suggestions. With a model, columns are checked against the
    /// table, already-covered patterns are skipped and redundant indexes are
    /// reported.
    pub fn recommend(&self, model: Option<&SchemaModel>) -> Vec<IndexRecommendation> {
        let threshold = self.config.slow_query_threshold_ms;
        let mut out = Vec::new();

        for pattern in self.patterns() {
            if pattern.count < self.config.min_frequency || pattern.avg_ms() < threshold {
                continue;
            }
            let table = model.and_then(|m| m.table(&pattern.table));
            // Shapes are lowercased; take the model's spelling.
            let columns: Vec<String> = match table {
                Some(t) => pattern
                    .columns
                    .iter()
                    .filter_map(|c| t.columns.iter().find(|tc| tc.name.eq_ignore_ascii_case(c)))
                    .map(|tc| tc.name.clone())
                    .collect(),
                None => pattern.columns.clone(),
            };
            if let Some(t) = table {
                if !columns.is_empty() && is_covered(t, &columns) {
                    debug!("Pattern on '{}' already covered by an index", pattern.table);
                    continue;
                }
            }

            let impact = pattern.count as f64 * pattern.avg_ms();
            let priority = if pattern.avg_ms() >= threshold * 5.0 {
                Priority::High
            } else if pattern.avg_ms() >= threshold * 2.0 {
                Priority::Medium
            } else {
                Priority::Low
            };

            if columns.is_empty() {
                out.push(IndexRecommendation {
                    kind: RecommendationKind::Review,
                    table: pattern.table.clone(),
                    columns,
                    index_name: None,
                    priority,
                    estimated_impact: impact,
                    reason: format!(
                        "{} executions averaging {:.1} ms with no indexable predicate: {}",
                        pattern.count,
                        pattern.avg_ms(),
                        pattern.shape
                    ),
                    sql: None,
                });
                continue;
            }

            let name = index_name(&pattern.table, &columns);
            out.push(IndexRecommendation {
                kind: RecommendationKind::Create,
                table: pattern.table.clone(),
                sql: Some(format!(
                    "CREATE INDEX {} ON {} ({})",
                    quote(&name),
                    quote(&pattern.table),
                    columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ")
                )),
                index_name: Some(name),
                columns,
                priority,
                estimated_impact: impact,
                reason: format!(
                    "{} executions averaging {:.1} ms (threshold {:.1} ms)",
                    pattern.count,
                    pattern.avg_ms(),
                    threshold
                ),
            });
        }

        // Two patterns on the same table may suggest the same index.
        let mut seen = std::collections::HashSet::new();
        out.retain(|r| r.kind != RecommendationKind::Create || seen.insert(r.index_name.clone()));

        if let Some(model) = model {
            for table in model.base_tables() {
                out.extend(redundant_indexes(table));
            }
        }

        out.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.estimated_impact.total_cmp(&a.estimated_impact))
                .then_with(|| a.table.cmp(&b.table))
        });
        out
    }
}

fn evict_least_used(patterns: &mut HashMap<(String, String), QueryPattern>) {
    let victim = patterns
        .iter()
        .min_by(|a, b| {
            a.1.count
                .cmp(&b.1.count)
                .then_with(|| a.1.last_seen.cmp(&b.1.last_seen))
        })
        .map(|(k, _)| k.clone());
    if let Some(key) = victim {
        warn!("Query pattern table full, evicting '{}'", key.1);
        patterns.remove(&key);
    }
}

/// Replace literals and placeholders with `?` and collapse whitespace.
pub fn normalize_query(sql: &str) -> String {
    let s = STRING_LITERAL.replace_all(sql.trim(), "?");
    let s = PLACEHOLDER.replace_all(&s, "?");
    let s = NUMBER.replace_all(&s, "?");
    let s = WHITESPACE.replace_all(&s, " ");
    let s = IN_LIST.replace_all(&s, "IN (?)");
    s.trim().trim_end_matches(';').trim().to_lowercase()
}

fn extract_columns(shape: &str) -> Vec<String> {
    let unquoted = shape.replace(['"', '`', '[', ']'], "");
    let mut columns: Vec<String> = Vec::new();
    let mut push = |c: &str| {
        let c = c.to_lowercase();
        if !KEYWORDS.contains(&c.as_str()) && !columns.contains(&c) {
            columns.push(c);
        }
    };

    if let Some(m) = WHERE_CLAUSE.captures(&unquoted).and_then(|c| c.get(1)) {
        for cap in PREDICATE_COLUMN.captures_iter(m.as_str()) {
            push(&cap[1]);
        }
    }
    if let Some(m) = ORDER_CLAUSE.captures(&unquoted).and_then(|c| c.get(1)) {
        for term in m.as_str().split(',') {
            let name = term.split_whitespace().next().unwrap_or_default();
            let name = name.rsplit('.').next().unwrap_or(name);
            if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                push(name);
            }
        }
    }
    columns
}

/// Some existing index already starts with these columns.
fn is_covered(table: &Table, columns: &[String]) -> bool {
    table.indexes.iter().any(|idx| {
        idx.predicate.is_none() && idx.column_names().is_some_and(|cols| cols.starts_with(columns))
    }) || table.primary_key.starts_with(columns)
}

/// Non-unique, non-partial indexes whose columns are a prefix of another
/// index on the same table.
pub fn redundant_indexes(table: &Table) -> Vec<IndexRecommendation> {
    let mut out = Vec::new();
    for (i, idx) in table.indexes.iter().enumerate() {
        if idx.is_unique || idx.predicate.is_some() {
            continue;
        }
        let Some(cols) = idx.column_names() else {
            continue;
        };
        let covering = table.indexes.iter().enumerate().find(|(j, other)| {
            if *j == i || other.predicate.is_some() {
                return false;
            }
            let Some(other_cols) = other.column_names() else {
                return false;
            };
            // Identical definitions: keep the first one.
            other_cols.starts_with(&cols) && (other_cols.len() > cols.len() || *j < i)
        });
        if let Some((_, other)) = covering {
            out.push(IndexRecommendation {
                kind: RecommendationKind::Drop,
                table: table.name.clone(),
                columns: cols,
                index_name: Some(idx.name.clone()),
                priority: Priority::Low,
                estimated_impact: 0.0,
                reason: format!("columns are a prefix of index '{}'", other.name),
                sql: Some(format!("DROP INDEX {}", quote(&idx.name))),
            });
        }
    }
    out
}

/// `idx_<table>_<cols>`, capped at PostgreSQL's identifier length.
pub(crate) fn index_name(table: &str, columns: &[String]) -> String {
    let mut name = format!("idx_{}_{}", table, columns.join("_"));
    if name.len() > 63 {
        let mut end = 63;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name.truncate(end);
    }
    name
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
