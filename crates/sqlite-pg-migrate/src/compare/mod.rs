//! Schema comparator.
//!
//! [`compare`] is a pure function of two models: it reports what would have to
//! change in `current` for it to match `desired`. In a migration `current` is
//! the target database and `desired` is the source.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::core::schema::{Column, ForeignKey, Index, SchemaModel, Table};
use crate::error::Result;

/// Kind of a single difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifferenceKind {
    TableAdded,
    TableRemoved,
    TableModified,
    ColumnAdded,
    ColumnRemoved,
    ColumnTypeChanged,
    ColumnNullabilityChanged,
    ColumnDefaultChanged,
    IndexAdded,
    IndexRemoved,
    ConstraintAdded,
    ConstraintRemoved,
}

impl DifferenceKind {
    /// Whether applying this difference destroys something in `current`.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            DifferenceKind::TableRemoved
                | DifferenceKind::ColumnRemoved
                | DifferenceKind::IndexRemoved
                | DifferenceKind::ConstraintRemoved
        )
    }
}

/// Severity, ordered so that `max` picks the worse one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Informational,
    Breaking,
}

/// Object captured before or after a change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "object", rename_all = "snake_case")]
pub enum Snapshot {
    Table(Box<Table>),
    Column(Column),
    Index(Index),
    ForeignKey(ForeignKey),
    PrimaryKey { columns: Vec<String> },
}

/// One structural discrepancy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Difference {
    pub kind: DifferenceKind,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    /// Index or constraint name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Snapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Snapshot>,
    pub message: String,
    pub severity: Severity,
}

/// Counts by kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub total: usize,
    pub breaking: usize,
    pub informational: usize,
    pub by_kind: BTreeMap<DifferenceKind, usize>,
}

/// Outcome of comparing two models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    /// True iff every difference is informational.
    pub compatible: bool,
    pub differences: Vec<Difference>,
    pub summary: ComparisonSummary,
}

impl ComparisonResult {
    fn from_differences(differences: Vec<Difference>) -> Self {
        let mut summary = ComparisonSummary {
            total: differences.len(),
            ..Default::default()
        };
        for d in &differences {
            *summary.by_kind.entry(d.kind).or_default() += 1;
            match d.severity {
                Severity::Breaking => summary.breaking += 1,
                Severity::Informational => summary.informational += 1,
            }
        }
        Self {
            compatible: summary.breaking == 0,
            differences,
            summary,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.differences.is_empty()
    }

    /// Differences of one kind.
    pub fn of_kind(&self, kind: DifferenceKind) -> impl Iterator<Item = &Difference> {
        self.differences.iter().filter(move |d| d.kind == kind)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Compare `current` against `desired`.
pub fn compare(current: &SchemaModel, desired: &SchemaModel) -> ComparisonResult {
    let current_by_name: HashMap<&str, &Table> =
        current.tables.iter().map(|t| (t.name.as_str(), t)).collect();
    let desired_by_name: HashMap<&str, &Table> =
        desired.tables.iter().map(|t| (t.name.as_str(), t)).collect();

    let mut differences = Vec::new();

    for table in &desired.tables {
        match current_by_name.get(table.name.as_str()) {
            None => differences.push(Difference {
                kind: DifferenceKind::TableAdded,
                table: table.name.clone(),
                column: None,
                object: None,
                before: None,
                after: Some(Snapshot::Table(Box::new(table.clone()))),
                message: format!("{} '{}' is missing", relation_word(table), table.name),
                severity: Severity::Breaking,
            }),
            Some(existing) => {
                if table.is_view || existing.is_view {
                    continue;
                }
                let children = compare_tables(existing, table);
                if let Some(severity) = children.iter().map(|d| d.severity).max() {
                    differences.push(Difference {
                        kind: DifferenceKind::TableModified,
                        table: table.name.clone(),
                        column: None,
                        object: None,
                        before: None,
                        after: None,
                        message: format!(
                            "Table '{}' differs in {} place(s)",
                            table.name,
                            children.len()
                        ),
                        severity,
                    });
                    differences.extend(children);
                }
            }
        }
    }

    for table in &current.tables {
        if !desired_by_name.contains_key(table.name.as_str()) {
            differences.push(Difference {
                kind: DifferenceKind::TableRemoved,
                table: table.name.clone(),
                column: None,
                object: None,
                before: Some(Snapshot::Table(Box::new(table.clone()))),
                after: None,
                message: format!(
                    "{} '{}' exists only in {}",
                    relation_word(table),
                    table.name,
                    current.dialect
                ),
                severity: Severity::Breaking,
            });
        }
    }

    ComparisonResult::from_differences(differences)
}

fn relation_word(table: &Table) -> &'static str {
    if table.is_view {
        "View"
    } else {
        "Table"
    }
}

fn compare_tables(current: &Table, desired: &Table) -> Vec<Difference> {
    let mut out = Vec::new();
    let name = desired.name.as_str();

    for col in &desired.columns {
        match current.column(&col.name) {
            None => out.push(Difference {
                kind: DifferenceKind::ColumnAdded,
                table: name.to_string(),
                column: Some(col.name.clone()),
                object: None,
                before: None,
                after: Some(Snapshot::Column(col.clone())),
                message: format!("Column '{}.{}' is missing", name, col.name),
                severity: Severity::Breaking,
            }),
            Some(existing) => compare_columns(name, existing, col, &mut out),
        }
    }
    for col in &current.columns {
        if desired.column(&col.name).is_none() {
            out.push(Difference {
                kind: DifferenceKind::ColumnRemoved,
                table: name.to_string(),
                column: Some(col.name.clone()),
                object: None,
                before: Some(Snapshot::Column(col.clone())),
                after: None,
                message: format!("Column '{}.{}' is not in the desired schema", name, col.name),
                severity: Severity::Breaking,
            });
        }
    }

    compare_indexes(name, current, desired, &mut out);
    compare_constraints(name, current, desired, &mut out);
    out
}

fn compare_columns(table: &str, current: &Column, desired: &Column, out: &mut Vec<Difference>) {
    let snapshot = |c: &Column| Some(Snapshot::Column(c.clone()));

    if current.canonical_type != desired.canonical_type {
        let fits = current.type_advisory || desired.canonical_type.fits_into(&current.canonical_type);
        out.push(Difference {
            kind: DifferenceKind::ColumnTypeChanged,
            table: table.to_string(),
            column: Some(desired.name.clone()),
            object: None,
            before: snapshot(current),
            after: snapshot(desired),
            message: format!(
                "Column '{}.{}' type {} differs from {}",
                table, desired.name, current.canonical_type, desired.canonical_type
            ),
            severity: if fits {
                Severity::Informational
            } else {
                Severity::Breaking
            },
        });
    }

    if current.is_nullable != desired.is_nullable {
        let tightening = !desired.is_nullable;
        out.push(Difference {
            kind: DifferenceKind::ColumnNullabilityChanged,
            table: table.to_string(),
            column: Some(desired.name.clone()),
            object: None,
            before: snapshot(current),
            after: snapshot(desired),
            message: format!(
                "Column '{}.{}' should be {}",
                table,
                desired.name,
                if tightening { "NOT NULL" } else { "nullable" }
            ),
            severity: if tightening {
                Severity::Breaking
            } else {
                Severity::Informational
            },
        });
    }

    if current.default != desired.default {
        out.push(Difference {
            kind: DifferenceKind::ColumnDefaultChanged,
            table: table.to_string(),
            column: Some(desired.name.clone()),
            object: None,
            before: snapshot(current),
            after: snapshot(desired),
            message: format!("Column '{}.{}' default differs", table, desired.name),
            severity: Severity::Informational,
        });
    }
}

/// Indexes match on (parts, uniqueness); names are engine-generated and ignored.
fn compare_indexes(table: &str, current: &Table, desired: &Table, out: &mut Vec<Difference>) {
    let same = |a: &Index, b: &Index| a.parts == b.parts && a.is_unique == b.is_unique;

    for idx in &desired.indexes {
        if !current.indexes.iter().any(|c| same(c, idx)) {
            out.push(Difference {
                kind: DifferenceKind::IndexAdded,
                table: table.to_string(),
                column: None,
                object: Some(idx.name.clone()),
                before: None,
                after: Some(Snapshot::Index(idx.clone())),
                message: format!("Index '{}' on '{}' is missing", idx.name, table),
                severity: Severity::Informational,
            });
        }
    }
    for idx in &current.indexes {
        if !desired.indexes.iter().any(|d| same(idx, d)) {
            out.push(Difference {
                kind: DifferenceKind::IndexRemoved,
                table: table.to_string(),
                column: None,
                object: Some(idx.name.clone()),
                before: Some(Snapshot::Index(idx.clone())),
                after: None,
                message: format!("Index '{}' on '{}' is not in the desired schema", idx.name, table),
                severity: Severity::Informational,
            });
        }
    }
}

fn compare_constraints(table: &str, current: &Table, desired: &Table, out: &mut Vec<Difference>) {
    if current.primary_key != desired.primary_key {
        if !current.primary_key.is_empty() {
            out.push(Difference {
                kind: DifferenceKind::ConstraintRemoved,
                table: table.to_string(),
                column: None,
                object: Some("PRIMARY KEY".to_string()),
                before: Some(Snapshot::PrimaryKey {
                    columns: current.primary_key.clone(),
                }),
                after: None,
                message: format!(
                    "Primary key ({}) on '{}' is not in the desired schema",
                    current.primary_key.join(", "),
                    table
                ),
                severity: Severity::Informational,
            });
        }
        if !desired.primary_key.is_empty() {
            out.push(Difference {
                kind: DifferenceKind::ConstraintAdded,
                table: table.to_string(),
                column: None,
                object: Some("PRIMARY KEY".to_string()),
                before: None,
                after: Some(Snapshot::PrimaryKey {
                    columns: desired.primary_key.clone(),
                }),
                message: format!(
                    "Primary key ({}) on '{}' is missing",
                    desired.primary_key.join(", "),
                    table
                ),
                severity: Severity::Informational,
            });
        }
    }

    for fk in &desired.foreign_keys {
        if !current.foreign_keys.iter().any(|c| c.same_definition(fk)) {
            out.push(Difference {
                kind: DifferenceKind::ConstraintAdded,
                table: table.to_string(),
                column: None,
                object: Some(fk.name.clone()),
                before: None,
                after: Some(Snapshot::ForeignKey(fk.clone())),
                message: format!(
                    "Foreign key '{}' ({}) -> {} is missing",
                    fk.name,
                    fk.columns.join(", "),
                    fk.ref_table
                ),
                severity: Severity::Informational,
            });
        }
    }
    for fk in &current.foreign_keys {
        if !desired.foreign_keys.iter().any(|d| d.same_definition(fk)) {
            out.push(Difference {
                kind: DifferenceKind::ConstraintRemoved,
                table: table.to_string(),
                column: None,
                object: Some(fk.name.clone()),
                before: Some(Snapshot::ForeignKey(fk.clone())),
                after: None,
                message: format!("Foreign key '{}' on '{}' is not in the desired schema", fk.name, table),
                severity: Severity::Informational,
            });
        }
    }
}
