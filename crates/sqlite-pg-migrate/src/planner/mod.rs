//! Migration planner.
//!
//! Turns a [`ComparisonResult`] into an ordered [`MigrationPlan`]:
//!
//! 1. Pre-hooks: target schema creation and, in truncate mode, deleting rows
//!    children-first.
//! 2. One unit per table, in foreign-key order. Drops come first (children
//!    first), then creates, alters and copies (parents first). The executor
//!    runs each unit in its own transaction.
//! 3. Post-hooks: foreign keys deferred to break cycles or added to existing
//!    tables, views, and applied index recommendations.
//!
//! Constructs the target cannot express either get a fallback recorded as a
//! warning, or fail planning unless `continue_on_error` is set.

mod ddl;
pub mod order;

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::advisor::{IndexRecommendation, RecommendationKind};
use crate::compare::{ComparisonResult, Difference, DifferenceKind, Snapshot};
use crate::config::{DiscoveryConfig, MigrationConfig, TargetMode};
use crate::core::capability::DialectKind;
use crate::core::schema::{Column, Index, SchemaModel, Table};
use crate::dialect::CanonicalType;
use crate::discovery::TableSelection;
use crate::error::{MigrateError, Result};

use ddl::DdlWriter;
pub use order::{dependency_order, DependencyOrder};

/// What a statement does, used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    CreateSchema,
    CreateTable,
    DropTable,
    DropView,
    AlterTable,
    CreateIndex,
    AddConstraint,
    CreateView,
    DeleteRows,
    ResetIdentity,
    /// Connection setting scoped to the unit's transaction.
    SessionSetting,
}

impl StatementKind {
    /// Statements that change structure rather than data.
    pub fn is_schema_change(&self) -> bool {
        !matches!(
            self,
            StatementKind::CreateSchema
                | StatementKind::DeleteRows
                | StatementKind::ResetIdentity
                | StatementKind::SessionSetting
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStatement {
    pub kind: StatementKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub sql: String,
    pub description: String,
}

impl PlanStatement {
    fn new(kind: StatementKind, table: &str, sql: String, description: impl Into<String>) -> Self {
        Self {
            kind,
            table: Some(table.to_string()),
            sql,
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitAction {
    Create,
    Drop,
    Alter,
    Copy,
}

/// How the source is paged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Pagination {
    /// `WHERE pk > last ORDER BY pk LIMIT n` on a single integer key.
    Keyset { column: String },
    /// `ORDER BY cols LIMIT n OFFSET k`.
    Ordered { order_by: Vec<String> },
    /// `ORDER BY rowid LIMIT n OFFSET k` (SQLite tables without a key).
    Rowid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyColumn {
    pub name: String,
    /// Read through a text cast; the driver has no value mapping for the type.
    pub read_as_text: bool,
    /// Target type the text is cast back to on insert.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_cast: Option<String>,
}

/// Copy one source table into one target table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyTask {
    pub source_table: String,
    pub source_namespace: String,
    pub target_table: String,
    pub target_namespace: String,
    pub columns: Vec<CopyColumn>,
    pub batch_size: usize,
    pub pagination: Pagination,
    /// Upsert key; `None` for plain inserts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_columns: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_rows: Option<i64>,
}

/// Work for one table, executed in one target transaction:
/// `statements`, then `copy`, then `after_copy`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableUnit {
    pub table: String,
    pub action: UnitAction,
    pub statements: Vec<PlanStatement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy: Option<CopyTask>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after_copy: Vec<PlanStatement>,
    /// Tables this one references by foreign key.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl TableUnit {
    fn new(table: &str, action: UnitAction) -> Self {
        Self {
            table: table.to_string(),
            action,
            statements: Vec::new(),
            copy: None,
            after_copy: Vec::new(),
            depends_on: Vec::new(),
        }
    }

    fn depending_on(mut self, table: &Table) -> Self {
        self.depends_on = table.referenced_tables().into_iter().map(str::to_string).collect();
        self
    }

    fn is_empty(&self) -> bool {
        self.statements.is_empty() && self.copy.is_none() && self.after_copy.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EstimatedImpact {
    pub tables_created: usize,
    pub tables_dropped: usize,
    pub tables_altered: usize,
    pub tables_copied: usize,
    pub estimated_rows: i64,
    pub statement_count: usize,
    /// Drops tables or deletes rows.
    pub destructive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub source_dialect: DialectKind,
    pub target_dialect: DialectKind,
    pub target_namespace: String,
    pub pre_hooks: Vec<PlanStatement>,
    pub migrations: Vec<TableUnit>,
    pub post_hooks: Vec<PlanStatement>,
    pub optimizations: Vec<String>,
    pub index_recommendations: Vec<IndexRecommendation>,
    pub estimated_impact: EstimatedImpact,
    pub warnings: Vec<String>,
    /// SHA-256 over statement text and copy tasks.
    pub checksum: String,
    pub dry_run: bool,
    pub created_at: DateTime<Utc>,
}

impl MigrationPlan {
    /// Every statement in execution order, excluding row copies.
    pub fn statements(&self) -> impl Iterator<Item = &PlanStatement> {
        self.pre_hooks
            .iter()
            .chain(
                self.migrations
                    .iter()
                    .flat_map(|u| u.statements.iter().chain(u.after_copy.iter())),
            )
            .chain(self.post_hooks.iter())
    }

    pub fn copy_tasks(&self) -> impl Iterator<Item = &CopyTask> {
        self.migrations.iter().filter_map(|u| u.copy.as_ref())
    }

    /// Nothing to execute.
    pub fn is_empty(&self) -> bool {
        self.pre_hooks.iter().all(|s| s.kind == StatementKind::CreateSchema)
            && self.migrations.is_empty()
            && self.post_hooks.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn compute_checksum(&self) -> String {
        let mut hasher = Sha256::new();
        for stmt in self.statements() {
            hasher.update(stmt.sql.as_bytes());
            hasher.update(b";\n");
        }
        for task in self.copy_tasks() {
            let cols: Vec<&str> = task.columns.iter().map(|c| c.name.as_str()).collect();
            hasher.update(
                format!(
                    "COPY {}.{} -> {}.{} ({})\n",
                    task.source_namespace,
                    task.source_table,
                    task.target_namespace,
                    task.target_table,
                    cols.join(", ")
                )
                .as_bytes(),
            );
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Planner options, normally taken from the config file.
#[derive(Debug, Clone)]
pub struct PlanOptions {
    pub batch_size: usize,
    pub schema_only: bool,
    pub drop_tables: bool,
    pub continue_on_error: bool,
    pub include_tables: Vec<String>,
    pub exclude_tables: Vec<String>,
    pub target_mode: TargetMode,
    pub include_views: bool,
    pub apply_index_recommendations: bool,
    pub parallel: bool,
    pub workers: usize,
    pub dry_run: bool,
    /// The target checks foreign keys on every insert.
    pub enforce_foreign_keys: bool,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self::from_config(&MigrationConfig::default(), &DiscoveryConfig::default())
    }
}

impl PlanOptions {
    pub fn from_config(migration: &MigrationConfig, discovery: &DiscoveryConfig) -> Self {
        Self {
            batch_size: migration.batch_size,
            schema_only: migration.schema_only,
            drop_tables: migration.drop_tables,
            continue_on_error: migration.continue_on_error,
            include_tables: migration.include_tables.clone(),
            exclude_tables: migration.exclude_tables.clone(),
            target_mode: migration.target_mode,
            include_views: discovery.include_views,
            apply_index_recommendations: migration.apply_index_recommendations,
            parallel: migration.parallel,
            workers: migration.get_workers(),
            dry_run: false,
            enforce_foreign_keys: false,
        }
    }
}

/// Builds plans. Holds only options; every call is independent.
#[derive(Debug, Clone, Default)]
pub struct MigrationPlanner {
    options: PlanOptions,
}

impl MigrationPlanner {
    pub fn new(options: PlanOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &PlanOptions {
        &self.options
    }

    /// Plan the changes that make `target` match `source`.
    ///
    /// `comparison` must be `compare(target, source)`.
    pub fn plan(
        &self,
        comparison: &ComparisonResult,
        source: &SchemaModel,
        target: &SchemaModel,
        recommendations: &[IndexRecommendation],
    ) -> Result<MigrationPlan> {
        let builder = PlanBuilder {
            options: &self.options,
            ddl: DdlWriter::new(target.dialect, source.dialect, target.namespace.clone()),
            selection: TableSelection::new(&self.options.include_tables, &self.options.exclude_tables)?,
            source,
            target,
            warnings: Vec::new(),
            pre_hooks: Vec::new(),
            units: Vec::new(),
            post_hooks: Vec::new(),
            deferred_fks: 0,
            added_columns: HashSet::new(),
        };
        builder.build(comparison, recommendations)
    }
}

struct PlanBuilder<'a> {
    options: &'a PlanOptions,
    ddl: DdlWriter,
    selection: TableSelection,
    source: &'a SchemaModel,
    target: &'a SchemaModel,
    warnings: Vec<String>,
    pre_hooks: Vec<PlanStatement>,
    units: Vec<TableUnit>,
    post_hooks: Vec<PlanStatement>,
    deferred_fks: usize,
    /// `(table, column)` added to existing tables by this plan.
    added_columns: HashSet<(String, String)>,
}

impl<'a> PlanBuilder<'a> {
    /// A construct with no fallback: fatal, or skipped with a warning.
    fn unsupported(&mut self, message: String) -> Result<()> {
        if self.options.continue_on_error {
            warn!("Skipping: {}", message);
            self.warnings.push(format!("skipped: {}", message));
            Ok(())
        } else {
            Err(MigrateError::Planning(message))
        }
    }

    fn build(
        mut self,
        comparison: &'a ComparisonResult,
        recommendations: &[IndexRecommendation],
    ) -> Result<MigrationPlan> {
        let caps = self.ddl.caps();

        let mut added: Vec<&'a Table> = Vec::new();
        let mut added_views: Vec<&'a Table> = Vec::new();
        let mut removed: Vec<&'a Table> = Vec::new();
        let mut modified: Vec<&'a str> = Vec::new();
        let mut children: HashMap<&'a str, Vec<&'a Difference>> = HashMap::new();

        for diff in &comparison.differences {
            if !self.selection.admits(&diff.table) {
                continue;
            }
            match (diff.kind, &diff.before, &diff.after) {
                (DifferenceKind::TableAdded, _, Some(Snapshot::Table(t))) => {
                    let t: &'a Table = t;
                    if t.is_view {
                        added_views.push(t);
                    } else {
                        added.push(t);
                    }
                }
                (DifferenceKind::TableRemoved, Some(Snapshot::Table(t)), _) => removed.push(t.as_ref()),
                (DifferenceKind::TableModified, _, _) => modified.push(&diff.table),
                _ => children.entry(&diff.table).or_default().push(diff),
            }
        }

        if caps.namespaces {
            self.pre_hooks.push(PlanStatement {
                kind: StatementKind::CreateSchema,
                table: None,
                sql: self.ddl.create_schema(),
                description: format!("Ensure schema '{}' exists", self.target.namespace),
            });
        }

        self.plan_drops(&removed);

        // Every source table that gets a unit, in dependency order.
        let added_names: HashSet<&str> = added.iter().map(|t| t.name.as_str()).collect();
        let copy_existing = !self.options.schema_only && self.options.target_mode != TargetMode::CreateMissing;
        let mut involved: Vec<&'a Table> = Vec::new();
        for table in self.source.base_tables() {
            if !self.selection.admits(&table.name) {
                continue;
            }
            let existing = self.target.table(&table.name).is_some_and(|t| !t.is_view);
            if added_names.contains(table.name.as_str())
                || modified.contains(&table.name.as_str())
                || (existing && copy_existing)
            {
                involved.push(table);
            }
        }
        let order = dependency_order(&involved);

        if copy_existing && self.options.target_mode == TargetMode::Truncate {
            for name in order.reversed() {
                if !added_names.contains(name.as_str()) && self.target.table(&name).is_some() {
                    self.pre_hooks.push(PlanStatement::new(
                        StatementKind::DeleteRows,
                        &name,
                        self.ddl.delete_all(&name),
                        format!("Empty '{}' before reload", name),
                    ));
                }
            }
        }

        let by_name: HashMap<&str, &'a Table> = involved.iter().map(|t| (t.name.as_str(), *t)).collect();
        for name in &order.order {
            let Some(&table) = by_name.get(name.as_str()) else {
                continue;
            };
            let mut unit = if added_names.contains(name.as_str()) {
                self.plan_create(table, &order, &added_names)?
            } else {
                let diffs = children.remove(name.as_str()).unwrap_or_default();
                self.plan_alter(table, &diffs, &added_names)?
            };

            let creating = unit.action == UnitAction::Create;
            if !self.options.schema_only && (creating || copy_existing) {
                self.plan_copy(table, &mut unit)?;
            }
            if !unit.is_empty() {
                self.units.push(unit);
            }
        }

        self.plan_views(&added_views)?;
        self.plan_recommendations(recommendations, &added_names);

        let optimizations = self.optimizations(&order);
        let mut plan = MigrationPlan {
            source_dialect: self.source.dialect,
            target_dialect: self.target.dialect,
            target_namespace: self.target.namespace.clone(),
            pre_hooks: self.pre_hooks,
            migrations: self.units,
            post_hooks: self.post_hooks,
            optimizations,
            index_recommendations: recommendations.to_vec(),
            estimated_impact: EstimatedImpact::default(),
            warnings: self.warnings,
            checksum: String::new(),
            dry_run: self.options.dry_run,
            created_at: Utc::now(),
        };
        plan.estimated_impact = estimate(&plan);
        plan.checksum = plan.compute_checksum();

        for w in &plan.warnings {
            warn!("{}", w);
        }
        info!(
            "Planned {} table unit(s), {} statement(s), {} copy task(s)",
            plan.migrations.len(),
            plan.estimated_impact.statement_count,
            plan.estimated_impact.tables_copied
        );
        Ok(plan)
    }

    fn plan_drops(&mut self, removed: &[&'a Table]) {
        if !self.options.drop_tables {
            for t in removed {
                self.warnings.push(format!(
                    "{} '{}' exists only in the target; left in place (drop_tables is off)",
                    if t.is_view { "View" } else { "Table" },
                    t.name
                ));
            }
            return;
        }

        // Views first; they depend on tables.
        for view in removed.iter().filter(|t| t.is_view) {
            let materialized = view.view.as_ref().is_some_and(|v| v.materialized);
            let mut unit = TableUnit::new(&view.name, UnitAction::Drop);
            unit.statements.push(PlanStatement::new(
                StatementKind::DropView,
                &view.name,
                self.ddl.drop_view(&view.name, materialized),
                format!("Drop view '{}'", view.name),
            ));
            self.units.push(unit);
        }

        let tables: Vec<&Table> = removed.iter().filter(|t| !t.is_view).copied().collect();
        for name in dependency_order(&tables).reversed() {
            let Some(table) = tables.iter().find(|t| t.name == name) else {
                continue;
            };
            let mut unit = TableUnit::new(&name, UnitAction::Drop).depending_on(table);
            unit.statements.push(PlanStatement::new(
                StatementKind::DropTable,
                &name,
                self.ddl.drop_table(&name),
                format!("Drop table '{}'", name),
            ));
            self.units.push(unit);
        }
    }

    /// A referenced table exists after this plan runs.
    fn will_exist(&self, table: &str, added: &HashSet<&str>) -> bool {
        added.contains(table) || self.target.table(table).is_some()
    }

    fn plan_create(
        &mut self,
        table: &Table,
        order: &DependencyOrder,
        added: &HashSet<&str>,
    ) -> Result<TableUnit> {
        let caps = self.ddl.caps();
        let mut deferred = Vec::new();
        let mut self_refs = Vec::new();
        let mut missing = Vec::new();
        let mut omitted = Vec::new();
        for fk in &table.foreign_keys {
            if fk.ref_table == table.name {
                // A child row may arrive in an earlier batch than its parent.
                if caps.alter_add_constraint {
                    self_refs.push(fk.clone());
                }
            } else if !self.will_exist(&fk.ref_table, added) {
                missing.push(fk.clone());
            } else if order.is_deferred(&table.name, &fk.name) && added.contains(fk.ref_table.as_str()) {
                if !caps.forward_references {
                    deferred.push(fk.clone());
                } else if self.options.enforce_foreign_keys {
                    // The referenced table does not exist while this one loads.
                    self.unsupported(format!(
                        "{}: foreign key '{}' closes a reference cycle through '{}', which {} cannot load with foreign keys enforced",
                        table.name,
                        fk.name,
                        fk.ref_table,
                        self.ddl.target()
                    ))?;
                    omitted.push(fk.clone());
                }
            }
        }

        for fk in &missing {
            self.warnings.push(format!(
                "{}: foreign key '{}' references '{}', which is not part of the migration; skipped",
                table.name, fk.name, fk.ref_table
            ));
        }

        let mut unit = TableUnit::new(&table.name, UnitAction::Create).depending_on(table);
        let sql = self.ddl.create_table(
            table,
            |fk| {
                !missing
                    .iter()
                    .chain(&deferred)
                    .chain(&self_refs)
                    .chain(&omitted)
                    .any(|d| d.name == fk.name)
            },
            &mut self.warnings,
        );
        unit.statements.push(PlanStatement::new(
            StatementKind::CreateTable,
            &table.name,
            sql,
            format!("Create table '{}'", table.name),
        ));

        for fk in deferred {
            self.deferred_fks += 1;
            self.post_hooks.push(PlanStatement::new(
                StatementKind::AddConstraint,
                &table.name,
                self.ddl.add_foreign_key(&table.name, &fk),
                format!("Add foreign key '{}' deferred to break a reference cycle", fk.name),
            ));
        }
        for fk in self_refs {
            self.deferred_fks += 1;
            self.post_hooks.push(PlanStatement::new(
                StatementKind::AddConstraint,
                &table.name,
                self.ddl.add_foreign_key(&table.name, &fk),
                format!("Add self-referencing foreign key '{}' after the load", fk.name),
            ));
        }

        // Secondary indexes go after the load.
        for idx in &table.indexes {
            let name = self.ddl.index_name(&table.name, idx);
            if let Some(sql) = self.ddl.create_index(&table.name, idx, &name, &mut self.warnings) {
                unit.after_copy.push(PlanStatement::new(
                    StatementKind::CreateIndex,
                    &table.name,
                    sql,
                    format!("Create index '{}'", name),
                ));
            }
        }
        Ok(unit)
    }

    fn plan_alter(
        &mut self,
        table: &Table,
        diffs: &[&Difference],
        added: &HashSet<&str>,
    ) -> Result<TableUnit> {
        let caps = self.ddl.caps();
        let name = table.name.as_str();
        let current = self.target.table(name);
        let action = if diffs.is_empty() { UnitAction::Copy } else { UnitAction::Alter };
        let mut unit = TableUnit::new(name, action).depending_on(table);

        for diff in diffs {
            let column = diff.column.as_deref().unwrap_or_default();
            match (diff.kind, &diff.before, &diff.after) {
                (DifferenceKind::ColumnAdded, _, Some(Snapshot::Column(col))) => {
                    let mut col = col.clone();
                    if !col.is_nullable && col.default.is_none() && !caps.alter_column_nullability {
                        col.is_nullable = true;
                        self.warnings.push(format!(
                            "{}.{}: added as nullable; {} cannot add a NOT NULL column without a default",
                            name,
                            col.name,
                            self.ddl.target()
                        ));
                    }
                    let sql = self.ddl.add_column(table, &col, &mut self.warnings);
                    self.added_columns.insert((name.to_string(), col.name.clone()));
                    unit.statements.push(PlanStatement::new(
                        StatementKind::AlterTable,
                        name,
                        sql,
                        format!("Add column '{}.{}'", name, col.name),
                    ));
                }
                (DifferenceKind::ColumnTypeChanged, Some(Snapshot::Column(cur)), Some(Snapshot::Column(col))) => {
                    if caps.dynamic_typing {
                        self.warnings.push(format!(
                            "{}.{}: declared type {} kept; {} values are not constrained by it",
                            name,
                            column,
                            cur.canonical_type,
                            col.canonical_type
                        ));
                    } else if caps.alter_column_type {
                        let sql = self.ddl.alter_column_type(name, col, &mut self.warnings);
                        unit.statements.push(PlanStatement::new(
                            StatementKind::AlterTable,
                            name,
                            sql,
                            format!("Change type of '{}.{}'", name, column),
                        ));
                    } else {
                        self.unsupported(format!(
                            "changing the type of {}.{} on {}",
                            name,
                            column,
                            self.ddl.target()
                        ))?;
                    }
                }
                (DifferenceKind::ColumnNullabilityChanged, _, Some(Snapshot::Column(col))) => {
                    if caps.alter_column_nullability {
                        unit.statements.push(PlanStatement::new(
                            StatementKind::AlterTable,
                            name,
                            self.ddl.alter_nullability(name, column, col.is_nullable),
                            format!("Change nullability of '{}.{}'", name, column),
                        ));
                    } else {
                        self.unsupported(format!(
                            "changing nullability of {}.{} on {}",
                            name,
                            column,
                            self.ddl.target()
                        ))?;
                    }
                }
                (DifferenceKind::ColumnDefaultChanged, _, Some(Snapshot::Column(col))) => {
                    if col.is_auto_increment && caps.identity_columns {
                        continue;
                    }
                    if caps.alter_column_default {
                        let default = self.ddl.default_sql(name, col, &mut self.warnings);
                        unit.statements.push(PlanStatement::new(
                            StatementKind::AlterTable,
                            name,
                            self.ddl.alter_default(name, column, default.as_deref()),
                            format!("Change default of '{}.{}'", name, column),
                        ));
                    } else {
                        self.warnings.push(format!(
                            "{}.{}: existing default kept; {} cannot alter column defaults",
                            name,
                            column,
                            self.ddl.target()
                        ));
                    }
                }
                (DifferenceKind::IndexAdded, _, Some(Snapshot::Index(idx))) => {
                    self.plan_added_index(&mut unit, name, idx, current);
                }
                (DifferenceKind::ConstraintAdded, _, Some(Snapshot::ForeignKey(fk))) => {
                    if !caps.alter_add_constraint {
                        self.unsupported(format!(
                            "adding foreign key '{}' to existing table {} on {}",
                            fk.name,
                            name,
                            self.ddl.target()
                        ))?;
                    } else if !self.will_exist(&fk.ref_table, added) {
                        self.warnings.push(format!(
                            "{}: foreign key '{}' references '{}', which is not part of the migration; skipped",
                            name, fk.name, fk.ref_table
                        ));
                    } else {
                        self.post_hooks.push(PlanStatement::new(
                            StatementKind::AddConstraint,
                            name,
                            self.ddl.add_foreign_key(name, fk),
                            format!("Add foreign key '{}'", fk.name),
                        ));
                    }
                }
                (DifferenceKind::ConstraintAdded, _, Some(Snapshot::PrimaryKey { columns })) => {
                    let has_pk = current.is_some_and(|t| !t.primary_key.is_empty());
                    if !caps.alter_add_constraint || has_pk {
                        self.unsupported(format!(
                            "setting primary key ({}) on existing table {} on {}",
                            columns.join(", "),
                            name,
                            self.ddl.target()
                        ))?;
                    } else {
                        unit.statements.push(PlanStatement::new(
                            StatementKind::AddConstraint,
                            name,
                            self.ddl.add_primary_key(name, columns),
                            format!("Add primary key to '{}'", name),
                        ));
                    }
                }
                (kind, _, _) if kind.is_destructive() => {
                    self.warnings.push(format!("{}; left in place", diff.message));
                }
                _ => debug!("No action for {:?} on '{}'", diff.kind, name),
            }
        }
        Ok(unit)
    }

    fn plan_added_index(&mut self, unit: &mut TableUnit, table: &str, idx: &Index, current: Option<&Table>) {
        let mut name = self.ddl.index_name(table, idx);
        if current.is_some_and(|t| t.indexes.iter().any(|i| i.name == name)) {
            let renamed = ddl::cap_identifier(format!("{}_new", name));
            self.warnings.push(format!(
                "{}: index '{}' already exists with another definition; creating '{}'",
                table, name, renamed
            ));
            name = renamed;
        }
        if let Some(sql) = self.ddl.create_index(table, idx, &name, &mut self.warnings) {
            unit.after_copy.push(PlanStatement::new(
                StatementKind::CreateIndex,
                table,
                sql,
                format!("Create index '{}'", name),
            ));
        }
    }

    fn plan_copy(&mut self, table: &Table, unit: &mut TableUnit) -> Result<()> {
        let creating = unit.action == UnitAction::Create;
        let existing = self.target.table(&table.name);

        // Columns present on the target once this unit's statements ran.
        let mut target_columns: HashSet<&str> = HashSet::new();
        if let Some(t) = existing.filter(|_| !creating) {
            target_columns.extend(t.columns.iter().map(|c| c.name.as_str()));
            target_columns.extend(
                table
                    .columns
                    .iter()
                    .filter(|c| self.added_columns.contains(&(table.name.clone(), c.name.clone())))
                    .map(|c| c.name.as_str()),
            );
        } else {
            target_columns.extend(table.columns.iter().map(|c| c.name.as_str()));
        }

        let pg_target = self.ddl.target() == DialectKind::Postgres;
        let mut scratch = Vec::new();
        let columns: Vec<CopyColumn> = table
            .columns
            .iter()
            .filter(|c| target_columns.contains(c.name.as_str()))
            .map(|c| {
                let read_as_text = needs_text_read(c);
                let text_cast = (read_as_text && pg_target).then(|| {
                    existing
                        .filter(|_| !creating)
                        .and_then(|t| t.column(&c.name))
                        .map(|tc| tc.native_type.clone())
                        .unwrap_or_else(|| self.ddl.column_type(&table.name, c, &mut scratch))
                });
                CopyColumn {
                    name: c.name.clone(),
                    read_as_text,
                    text_cast,
                }
            })
            .collect();
        if columns.is_empty() {
            self.warnings.push(format!("{}: no common columns to copy", table.name));
            return Ok(());
        }

        let conflict_columns = if !creating && self.options.target_mode == TargetMode::Upsert {
            if table.primary_key.is_empty() {
                if self.options.continue_on_error {
                    self.warnings.push(format!(
                        "skipped copy of '{}': upsert mode requires a primary key",
                        table.name
                    ));
                    return Ok(());
                }
                return Err(MigrateError::NoPrimaryKey(table.name.clone()));
            }
            Some(table.primary_key.clone())
        } else {
            None
        };

        let pagination = if let Some(pk) = table.integer_pk() {
            Pagination::Keyset {
                column: pk.name.clone(),
            }
        } else if !table.primary_key.is_empty() {
            Pagination::Ordered {
                order_by: table.primary_key.clone(),
            }
        } else if self.source.dialect == DialectKind::Sqlite {
            Pagination::Rowid
        } else {
            Pagination::Ordered {
                order_by: table.column_names(),
            }
        };

        unit.copy = Some(CopyTask {
            source_table: table.name.clone(),
            source_namespace: self.source.namespace.clone(),
            target_table: table.name.clone(),
            target_namespace: self.target.namespace.clone(),
            columns,
            batch_size: self.options.batch_size.max(1),
            pagination,
            conflict_columns,
            estimated_rows: table.estimated_rows,
        });

        let identity = if creating {
            self.ddl.identity_column(table)
        } else {
            existing.and_then(|t| self.ddl.identity_column(t))
        };
        if let Some(col) = identity {
            // Before the index builds.
            unit.after_copy.insert(
                0,
                PlanStatement::new(
                    StatementKind::ResetIdentity,
                    &table.name,
                    self.ddl.reset_identity(&table.name, &col.name),
                    format!("Reset identity of '{}.{}'", table.name, col.name),
                ),
            );
        }

        // SQLite checks each row at statement end; defer to commit so a
        // parent may arrive in a later batch of the same unit.
        let checked = if creating { Some(table) } else { existing };
        if self.options.enforce_foreign_keys
            && self.ddl.target() == DialectKind::Sqlite
            && checked.is_some_and(|t| t.foreign_keys.iter().any(|fk| fk.ref_table == t.name))
        {
            unit.statements.insert(
                0,
                PlanStatement::new(
                    StatementKind::SessionSetting,
                    &table.name,
                    "PRAGMA defer_foreign_keys = ON".to_string(),
                    format!("Check self-references of '{}' at commit", table.name),
                ),
            );
        }
        if !creating {
            debug!("Copy into existing table '{}' ({:?})", table.name, self.options.target_mode);
        }
        Ok(())
    }

    fn plan_views(&mut self, views: &[&'a Table]) -> Result<()> {
        if !self.options.include_views {
            return Ok(());
        }
        let caps = self.ddl.caps();
        for view in views {
            let info = view.view.as_ref();
            if !self.ddl.same_dialect() {
                self.unsupported(format!(
                    "view '{}' is written in {} SQL and cannot be created on {}",
                    view.name,
                    self.source.dialect,
                    self.ddl.target()
                ))?;
                continue;
            }
            let Some(definition) = info.and_then(|v| v.definition.as_deref()) else {
                self.warnings.push(format!("view '{}': definition unavailable; skipped", view.name));
                continue;
            };
            let mut materialized = info.is_some_and(|v| v.materialized);
            if materialized && !caps.materialized_views {
                self.warnings.push(format!(
                    "materialized view '{}' created as a plain view on {}",
                    view.name,
                    self.ddl.target()
                ));
                materialized = false;
            }
            let populated = info.and_then(|v| v.populated).unwrap_or(true);
            self.post_hooks.push(PlanStatement::new(
                StatementKind::CreateView,
                &view.name,
                self.ddl.create_view(&view.name, definition, materialized, populated),
                format!("Create view '{}'", view.name),
            ));
        }
        Ok(())
    }

    fn plan_recommendations(&mut self, recommendations: &[IndexRecommendation], added: &HashSet<&str>) {
        if !self.options.apply_index_recommendations {
            return;
        }
        let mut seen = BTreeSet::new();
        for rec in recommendations {
            if rec.kind != RecommendationKind::Create || rec.columns.is_empty() {
                continue;
            }
            if !self.selection.admits(&rec.table) || !self.will_exist(&rec.table, added) {
                self.warnings.push(format!(
                    "index recommendation for '{}' not applied: table is not part of the migration",
                    rec.table
                ));
                continue;
            }
            let cols: Vec<&str> = rec.columns.iter().map(String::as_str).collect();
            let name = rec
                .index_name
                .clone()
                .unwrap_or_else(|| crate::advisor::index_name(&rec.table, &rec.columns));
            if !seen.insert(name.clone()) {
                continue;
            }
            let idx = Index::on_columns(name.clone(), &cols, false);
            if let Some(sql) = self.ddl.create_index(&rec.table, &idx, &name, &mut self.warnings) {
                self.post_hooks.push(PlanStatement::new(
                    StatementKind::CreateIndex,
                    &rec.table,
                    sql,
                    format!("Create recommended index '{}' ({})", name, rec.reason),
                ));
            }
        }
    }

    fn optimizations(&self, order: &DependencyOrder) -> Vec<String> {
        let mut out = Vec::new();
        let copies: Vec<&CopyTask> = self.units.iter().filter_map(|u| u.copy.as_ref()).collect();
        if !copies.is_empty() {
            out.push(format!(
                "Rows are copied in batches of {}; multi-row INSERTs are split at {} bind parameters",
                self.options.batch_size.max(1),
                self.ddl.caps().max_bind_params
            ));
            let keyset = copies
                .iter()
                .filter(|c| matches!(c.pagination, Pagination::Keyset { .. }))
                .count();
            if keyset > 0 {
                out.push(format!(
                    "{} table(s) are paged by primary key (keyset) instead of OFFSET",
                    keyset
                ));
            }
        }
        if self
            .units
            .iter()
            .any(|u| u.action == UnitAction::Create && u.after_copy.iter().any(|s| s.kind == StatementKind::CreateIndex))
        {
            out.push(
                "Secondary indexes on new tables are built after the bulk load, inside the table's transaction"
                    .to_string(),
            );
        }
        if self.deferred_fks > 0 {
            out.push(format!(
                "{} foreign key(s) are added after loading to break reference cycles or self-references",
                self.deferred_fks
            ));
        }
        if self.options.parallel && order.order.len() > 1 {
            out.push(format!(
                "Tables without foreign-key links run concurrently on up to {} worker(s)",
                self.options.workers.max(1)
            ));
        }
        out
    }
}

/// Column types the drivers cannot decode natively.
fn needs_text_read(col: &Column) -> bool {
    col.unmapped_type
        || matches!(
            col.canonical_type,
            CanonicalType::Interval | CanonicalType::TextSearch
        )
}

fn estimate(plan: &MigrationPlan) -> EstimatedImpact {
    let count = |action| plan.migrations.iter().filter(|u| u.action == action).count();
    EstimatedImpact {
        tables_created: count(UnitAction::Create),
        tables_dropped: plan
            .migrations
            .iter()
            .flat_map(|u| u.statements.iter())
            .filter(|s| s.kind == StatementKind::DropTable)
            .count(),
        tables_altered: count(UnitAction::Alter),
        tables_copied: plan.copy_tasks().count(),
        estimated_rows: plan.copy_tasks().filter_map(|c| c.estimated_rows).sum(),
        statement_count: plan.statements().count(),
        destructive: plan.statements().any(|s| {
            matches!(
                s.kind,
                StatementKind::DropTable | StatementKind::DropView | StatementKind::DeleteRows
            )
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisor::Priority;
    use crate::compare::compare;
    use crate::core::schema::{ForeignKey, ReferentialAction, ViewInfo};

    fn make_test_fk(table: &str, column: &str, parent: &str) -> ForeignKey {
        ForeignKey {
            name: format!("fk_{}_{}", table, column),
            columns: vec![column.to_string()],
            ref_table: parent.to_string(),
            ref_schema: "main".into(),
            ref_columns: vec!["id".into()],
            on_delete: ReferentialAction::NoAction,
            on_update: ReferentialAction::NoAction,
            deferrable: false,
            initially_deferred: false,
        }
    }

    fn make_test_table(name: &str, parents: &[&str]) -> Table {
        let mut id = Column::new("id", CanonicalType::Integer);
        id.is_primary_key = true;
        id.is_nullable = false;
        id.is_auto_increment = true;
        let mut table = Table::new("main", name);
        table.columns = vec![id];
        for parent in parents {
            let col = format!("{}_id", parent);
            table.columns.push(Column::new(col.clone(), CanonicalType::Integer));
            table.foreign_keys.push(make_test_fk(name, &col, parent));
        }
        table.primary_key = vec!["id".into()];
        table
    }

    fn make_test_model(dialect: DialectKind, tables: Vec<Table>) -> SchemaModel {
        let mut model = SchemaModel::empty(dialect, dialect.default_namespace());
        model.tables = tables;
        model
    }

    fn make_test_plan(
        source: &SchemaModel,
        target: &SchemaModel,
        options: PlanOptions,
    ) -> Result<MigrationPlan> {
        let comparison = compare(target, source);
        MigrationPlanner::new(options).plan(&comparison, source, target, &[])
    }

    fn position(plan: &MigrationPlan, needle: &str) -> usize {
        plan.statements()
            .position(|s| s.sql.starts_with(needle))
            .unwrap_or_else(|| panic!("no statement starting with {}", needle))
    }

    #[test]
    fn test_creates_follow_foreign_keys() {
        let source = make_test_model(
            DialectKind::Sqlite,
            vec![
                make_test_table("order_items", &["orders"]),
                make_test_table("orders", &["users"]),
                make_test_table("users", &[]),
            ],
        );
        let target = make_test_model(DialectKind::Postgres, vec![]);
        let plan = make_test_plan(&source, &target, PlanOptions::default()).unwrap();

        let users = position(&plan, "CREATE TABLE \"public\".\"users\"");
        let orders = position(&plan, "CREATE TABLE \"public\".\"orders\"");
        let items = position(&plan, "CREATE TABLE \"public\".\"order_items\"");
        assert!(users < orders && orders < items);
        assert_eq!(plan.pre_hooks[0].kind, StatementKind::CreateSchema);
        assert_eq!(plan.copy_tasks().count(), 3);
        assert_eq!(plan.estimated_impact.tables_created, 3);
        assert!(!plan.estimated_impact.destructive);
        assert_eq!(plan.checksum.len(), 64);
    }

    #[test]
    fn test_cycle_defers_foreign_key_on_postgres() {
        let source = make_test_model(
            DialectKind::Sqlite,
            vec![make_test_table("a", &["b"]), make_test_table("b", &["a"])],
        );
        let target = make_test_model(DialectKind::Postgres, vec![]);
        let plan = make_test_plan(&source, &target, PlanOptions::default()).unwrap();

        let create_a = &plan.migrations[0].statements[0].sql;
        assert!(!create_a.contains("REFERENCES"));
        assert_eq!(plan.post_hooks.len(), 1);
        assert_eq!(plan.post_hooks[0].kind, StatementKind::AddConstraint);
        assert!(plan.post_hooks[0].sql.contains("\"fk_a_b_id\""));
        assert!(plan.optimizations.iter().any(|o| o.contains("reference cycles")));
    }

    #[test]
    fn test_cycle_stays_inline_on_sqlite() {
        let source = make_test_model(
            DialectKind::Postgres,
            vec![make_test_table("a", &["b"]), make_test_table("b", &["a"])],
        );
        let target = make_test_model(DialectKind::Sqlite, vec![]);
        let plan = make_test_plan(&source, &target, PlanOptions::default()).unwrap();
        assert!(plan.post_hooks.is_empty());
        assert!(plan.pre_hooks.is_empty());
        assert!(plan.migrations.iter().all(|u| u.statements[0].sql.contains("REFERENCES")));
    }

    #[test]
    fn test_self_reference_added_after_load_on_postgres() {
        let source = make_test_model(DialectKind::Sqlite, vec![make_test_table("node", &["node"])]);
        let target = make_test_model(DialectKind::Postgres, vec![]);
        let plan = make_test_plan(&source, &target, PlanOptions::default()).unwrap();

        let create = &plan.migrations[0].statements[0].sql;
        assert!(create.contains("\"node_id\""));
        assert!(!create.contains("REFERENCES"));
        assert_eq!(plan.post_hooks.len(), 1);
        assert_eq!(plan.post_hooks[0].kind, StatementKind::AddConstraint);
        assert!(plan.post_hooks[0].sql.contains("\"fk_node_node_id\""));
        assert!(plan.migrations[0].copy.is_some());
    }

    #[test]
    fn test_self_reference_checked_at_commit_on_enforcing_sqlite() {
        let source = make_test_model(DialectKind::Postgres, vec![make_test_table("node", &["node"])]);
        let target = make_test_model(DialectKind::Sqlite, vec![]);

        let plan = make_test_plan(&source, &target, PlanOptions::default()).unwrap();
        assert!(plan.post_hooks.is_empty());
        assert_eq!(plan.migrations[0].statements.len(), 1);
        assert!(plan.migrations[0].statements[0].sql.contains("REFERENCES"));

        let options = PlanOptions {
            enforce_foreign_keys: true,
            ..Default::default()
        };
        let plan = make_test_plan(&source, &target, options).unwrap();
        let unit = &plan.migrations[0];
        assert_eq!(unit.statements[0].kind, StatementKind::SessionSetting);
        assert_eq!(unit.statements[0].sql, "PRAGMA defer_foreign_keys = ON");
        assert!(unit.statements[1].sql.contains("REFERENCES"));
        assert!(!unit.statements[0].kind.is_schema_change());
        assert_eq!(plan.estimated_impact.tables_created, 1);
    }

    #[test]
    fn test_cycle_on_enforcing_sqlite_has_no_fallback() {
        let source = make_test_model(
            DialectKind::Postgres,
            vec![make_test_table("a", &["b"]), make_test_table("b", &["a"])],
        );
        let target = make_test_model(DialectKind::Sqlite, vec![]);
        let options = PlanOptions {
            enforce_foreign_keys: true,
            ..Default::default()
        };
        let err = make_test_plan(&source, &target, options.clone()).unwrap_err();
        assert!(matches!(err, MigrateError::Planning(ref m) if m.contains("fk_a_b_id")));

        let options = PlanOptions {
            continue_on_error: true,
            ..options
        };
        let plan = make_test_plan(&source, &target, options).unwrap();
        assert!(plan.warnings.iter().any(|w| w.starts_with("skipped: a: foreign key 'fk_a_b_id'")));
        let create_a = &plan.migrations[0].statements[0].sql;
        assert!(create_a.starts_with("CREATE TABLE \"a\""));
        assert!(!create_a.contains("REFERENCES"));
        assert!(plan.migrations[1].statements[0].sql.contains("REFERENCES \"a\""));
        assert_eq!(plan.copy_tasks().count(), 2);
    }

    #[test]
    fn test_drop_tables_is_explicit() {
        let source = make_test_model(DialectKind::Sqlite, vec![make_test_table("users", &[])]);
        let target = make_test_model(
            DialectKind::Sqlite,
            vec![make_test_table("users", &[]), make_test_table("legacy", &[])],
        );

        let plan = make_test_plan(&source, &target, PlanOptions::default()).unwrap();
        assert!(plan.migrations.is_empty());
        assert!(plan.warnings.iter().any(|w| w.contains("'legacy'")));

        let options = PlanOptions {
            drop_tables: true,
            ..Default::default()
        };
        let plan = make_test_plan(&source, &target, options).unwrap();
        assert_eq!(plan.migrations.len(), 1);
        assert_eq!(plan.migrations[0].action, UnitAction::Drop);
        assert_eq!(plan.migrations[0].statements[0].sql, "DROP TABLE \"legacy\"");
        assert!(plan.estimated_impact.destructive);
    }

    #[test]
    fn test_drops_children_first() {
        let source = make_test_model(DialectKind::Postgres, vec![]);
        let target = make_test_model(
            DialectKind::Postgres,
            vec![make_test_table("parent", &[]), make_test_table("child", &["parent"])],
        );
        let options = PlanOptions {
            drop_tables: true,
            ..Default::default()
        };
        let plan = make_test_plan(&source, &target, options).unwrap();
        let tables: Vec<&str> = plan.migrations.iter().map(|u| u.table.as_str()).collect();
        assert_eq!(tables, vec!["child", "parent"]);
    }

    #[test]
    fn test_schema_only_skips_copies() {
        let source = make_test_model(DialectKind::Sqlite, vec![make_test_table("users", &[])]);
        let target = make_test_model(DialectKind::Postgres, vec![]);
        let options = PlanOptions {
            schema_only: true,
            ..Default::default()
        };
        let plan = make_test_plan(&source, &target, options).unwrap();
        assert_eq!(plan.copy_tasks().count(), 0);
        assert!(plan.migrations[0].after_copy.is_empty());
    }

    #[test]
    fn test_copy_task_shape() {
        let source = make_test_model(DialectKind::Sqlite, vec![make_test_table("users", &[])]);
        let target = make_test_model(DialectKind::Postgres, vec![]);
        let plan = make_test_plan(&source, &target, PlanOptions::default()).unwrap();

        let unit = &plan.migrations[0];
        let task = unit.copy.as_ref().unwrap();
        assert_eq!(task.pagination, Pagination::Keyset { column: "id".into() });
        assert_eq!(task.batch_size, 500);
        assert_eq!(task.conflict_columns, None);
        assert_eq!(unit.after_copy[0].kind, StatementKind::ResetIdentity);
    }

    #[test]
    fn test_existing_tables_by_target_mode() {
        let source = make_test_model(
            DialectKind::Sqlite,
            vec![make_test_table("users", &[]), make_test_table("orders", &["users"])],
        );
        let target = source.clone();

        let plan = make_test_plan(&source, &target, PlanOptions::default()).unwrap();
        assert!(plan.migrations.is_empty());
        assert!(plan.is_empty());

        let truncate = PlanOptions {
            target_mode: TargetMode::Truncate,
            ..Default::default()
        };
        let plan = make_test_plan(&source, &target, truncate).unwrap();
        let deletes: Vec<&str> = plan.pre_hooks.iter().map(|s| s.sql.as_str()).collect();
        assert_eq!(deletes, vec!["DELETE FROM \"orders\"", "DELETE FROM \"users\""]);
        assert_eq!(plan.copy_tasks().count(), 2);
        assert_eq!(plan.migrations[0].table, "users");

        let upsert = PlanOptions {
            target_mode: TargetMode::Upsert,
            ..Default::default()
        };
        let plan = make_test_plan(&source, &target, upsert).unwrap();
        assert!(plan
            .copy_tasks()
            .all(|t| t.conflict_columns == Some(vec!["id".to_string()])));
    }

    #[test]
    fn test_upsert_requires_primary_key() {
        let mut logs = Table::new("main", "logs");
        logs.columns = vec![Column::new("line", CanonicalType::Text)];
        let source = make_test_model(DialectKind::Sqlite, vec![logs]);
        let target = source.clone();
        let upsert = PlanOptions {
            target_mode: TargetMode::Upsert,
            ..Default::default()
        };
        let err = make_test_plan(&source, &target, upsert.clone()).unwrap_err();
        assert!(matches!(err, MigrateError::NoPrimaryKey(ref t) if t == "logs"));

        let lenient = PlanOptions {
            continue_on_error: true,
            ..upsert
        };
        let plan = make_test_plan(&source, &target, lenient).unwrap();
        assert_eq!(plan.copy_tasks().count(), 0);
    }

    #[test]
    fn test_sqlite_nullability_change_has_no_fallback() {
        let target = make_test_model(DialectKind::Sqlite, vec![make_test_table("users", &[])]);
        let mut users = make_test_table("users", &[]);
        let mut email = Column::new("email", CanonicalType::Text);
        email.is_nullable = false;
        users.columns.push(email.clone());
        let source = make_test_model(DialectKind::Sqlite, vec![users.clone()]);

        // Added NOT NULL column without default falls back to nullable.
        let plan = make_test_plan(&source, &target, PlanOptions::default()).unwrap();
        assert_eq!(
            plan.migrations[0].statements[0].sql,
            "ALTER TABLE \"users\" ADD COLUMN \"email\" TEXT"
        );
        assert!(plan.warnings.iter().any(|w| w.contains("added as nullable")));

        // Tightening an existing column cannot be expressed.
        let mut existing = users.clone();
        existing.columns[1].is_nullable = true;
        let target = make_test_model(DialectKind::Sqlite, vec![existing]);
        let err = make_test_plan(&source, &target, PlanOptions::default()).unwrap_err();
        assert!(matches!(err, MigrateError::Planning(_)));

        let lenient = PlanOptions {
            continue_on_error: true,
            ..Default::default()
        };
        let plan = make_test_plan(&source, &target, lenient).unwrap();
        assert!(plan.warnings.iter().any(|w| w.starts_with("skipped:")));
    }

    #[test]
    fn test_postgres_alters_and_removed_objects() {
        let mut current = make_test_table("users", &[]);
        current.columns.push(Column::new("legacy", CanonicalType::Text));
        current.columns.push(Column::new("age", CanonicalType::SmallInt));
        current.indexes.push(Index::on_columns("idx_legacy", &["legacy"], false));
        let target = make_test_model(DialectKind::Postgres, vec![current]);

        let mut desired = make_test_table("users", &[]);
        let mut age = Column::new("age", CanonicalType::BigInt);
        age.is_nullable = false;
        desired.columns.push(age);
        let source = make_test_model(DialectKind::Postgres, vec![desired]);

        let plan = make_test_plan(&source, &target, PlanOptions::default()).unwrap();
        let sql: Vec<&str> = plan.migrations[0].statements.iter().map(|s| s.sql.as_str()).collect();
        assert_eq!(
            sql,
            vec![
                "ALTER TABLE \"public\".\"users\" ALTER COLUMN \"age\" TYPE bigint USING \"age\"::bigint",
                "ALTER TABLE \"public\".\"users\" ALTER COLUMN \"age\" SET NOT NULL",
            ]
        );
        assert!(plan.warnings.iter().any(|w| w.contains("legacy") && w.ends_with("left in place")));
        assert!(plan.warnings.iter().any(|w| w.contains("idx_legacy")));
    }

    #[test]
    fn test_views_same_dialect_only() {
        let mut view = Table::new("main", "active_users");
        view.is_view = true;
        view.view = Some(ViewInfo {
            definition: Some("SELECT id FROM users".into()),
            dialect: DialectKind::Sqlite,
            materialized: false,
            populated: None,
        });
        let source = make_test_model(DialectKind::Sqlite, vec![make_test_table("users", &[]), view]);

        let sqlite_target = make_test_model(DialectKind::Sqlite, vec![]);
        let plan = make_test_plan(&source, &sqlite_target, PlanOptions::default()).unwrap();
        assert_eq!(plan.post_hooks.len(), 1);
        assert_eq!(
            plan.post_hooks[0].sql,
            "CREATE VIEW \"active_users\" AS SELECT id FROM users"
        );

        let pg_target = make_test_model(DialectKind::Postgres, vec![]);
        let err = make_test_plan(&source, &pg_target, PlanOptions::default()).unwrap_err();
        assert!(matches!(err, MigrateError::Planning(ref m) if m.contains("active_users")));

        let no_views = PlanOptions {
            include_views: false,
            ..Default::default()
        };
        assert!(make_test_plan(&source, &pg_target, no_views).is_ok());
    }

    #[test]
    fn test_include_exclude_filters() {
        let source = make_test_model(
            DialectKind::Sqlite,
            vec![
                make_test_table("users", &[]),
                make_test_table("audit_log", &[]),
                make_test_table("audit_archive", &[]),
            ],
        );
        let target = make_test_model(DialectKind::Sqlite, vec![]);
        let options = PlanOptions {
            exclude_tables: vec!["audit_*".into()],
            ..Default::default()
        };
        let plan = make_test_plan(&source, &target, options).unwrap();
        let tables: Vec<&str> = plan.migrations.iter().map(|u| u.table.as_str()).collect();
        assert_eq!(tables, vec!["users"]);
    }

    #[test]
    fn test_index_recommendations_applied_on_request() {
        let source = make_test_model(DialectKind::Sqlite, vec![make_test_table("users", &[])]);
        let target = source.clone();
        let rec = IndexRecommendation {
            kind: RecommendationKind::Create,
            table: "users".into(),
            columns: vec!["id".into()],
            index_name: Some("idx_users_id".into()),
            priority: Priority::High,
            estimated_impact: 1000.0,
            reason: "slow".into(),
            sql: None,
        };
        let comparison = compare(&target, &source);

        let plan = MigrationPlanner::default()
            .plan(&comparison, &source, &target, std::slice::from_ref(&rec))
            .unwrap();
        assert_eq!(plan.index_recommendations.len(), 1);
        assert!(plan.post_hooks.is_empty());

        let options = PlanOptions {
            apply_index_recommendations: true,
            ..Default::default()
        };
        let plan = MigrationPlanner::new(options)
            .plan(&comparison, &source, &target, &[rec])
            .unwrap();
        assert_eq!(
            plan.post_hooks[0].sql,
            "CREATE INDEX \"idx_users_id\" ON \"users\" (\"id\")"
        );
    }

    #[test]
    fn test_plan_to_json() {
        let source = make_test_model(DialectKind::Sqlite, vec![make_test_table("users", &[])]);
        let target = make_test_model(DialectKind::Postgres, vec![]);
        let plan = make_test_plan(&source, &target, PlanOptions::default()).unwrap();
        let json = plan.to_json().unwrap();
        assert!(json.contains("\"estimated_impact\""));
        assert!(json.contains("\"strategy\": \"keyset\""));
    }
}
