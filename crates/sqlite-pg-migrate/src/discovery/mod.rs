//! Discovery coordinator: selects the driver pair for a connection's dialect,
//! applies filters and assembles a [`SchemaModel`].

mod filter;

pub use filter::{TableFilter, TableSelection};

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::core::catalog::{DriverCatalog, DriverPair};
use crate::core::schema::{
    Cardinality, Column, DefaultValue, ForeignKey, Index, ReferentialAction, Relationship,
    SchemaModel, Table, ViewInfo,
};
use crate::core::traits::{DatabaseHandle, RawColumn, RawForeignKey, RawRelationKind, RawTable};
use crate::dialect::{CanonicalType, CanonicalTypeInfo};
use crate::error::{MigrateError, Result};

/// Discovers schema models. Stateless apart from the injected catalog, so one
/// instance can serve concurrent calls.
#[derive(Clone, Default)]
pub struct DiscoveryCoordinator {
    catalog: DriverCatalog,
}

impl DiscoveryCoordinator {
    pub fn new(catalog: DriverCatalog) -> Self {
        Self { catalog }
    }

    /// Coordinator with the built-in SQLite and PostgreSQL drivers.
    pub fn with_builtins() -> Self {
        Self::new(DriverCatalog::with_builtins())
    }

    /// Discover every admitted table and view in the handle's namespace.
    ///
    /// Fails with `UnsupportedDialect` when no driver pair is registered and
    /// with `Discovery` when listing relations or columns fails. Index and
    /// foreign key failures only add a warning for that table.
    pub async fn discover(
        &self,
        db: &dyn DatabaseHandle,
        config: &DiscoveryConfig,
    ) -> Result<SchemaModel> {
        let dialect = db.dialect();
        let pair = self.catalog.require(dialect)?;
        let namespace = db.namespace().to_string();

        let exclude = TableFilter::new(&config.exclude_tables)?;
        let internal: HashSet<String> = if config.include_internal_tables {
            HashSet::new()
        } else {
            config
                .internal_tables
                .iter()
                .map(|t| t.to_lowercase())
                .collect()
        };
        let overrides = parse_type_overrides(config)?;

        let raw_tables = pair
            .introspector
            .list_tables(db, &namespace, config.include_views)
            .await
            .map_err(|e| MigrateError::discovery(format!("{} relations in '{}'", dialect, namespace), e))?;

        let mut model = SchemaModel::empty(dialect, namespace.clone());
        for raw in raw_tables {
            if internal.contains(&raw.name.to_lowercase()) {
                debug!("Skipping internal table {}", raw.name);
                continue;
            }
            if exclude.matches(&raw.name) {
                debug!("Excluding table {}", raw.name);
                continue;
            }
            let table = self
                .discover_table(db, pair, &namespace, raw, &overrides, &mut model.warnings)
                .await?;
            model.tables.push(table);
        }

        resolve_implicit_references(&mut model);
        model.relationships = infer_relationships(&model.tables);
        model.discovered_at = Utc::now();

        info!(
            "Discovered {} tables and {} views in {} schema '{}'",
            model.base_tables().count(),
            model.views().count(),
            dialect,
            namespace
        );
        for w in &model.warnings {
            warn!("{}", w);
        }
        Ok(model)
    }

    async fn discover_table(
        &self,
        db: &dyn DatabaseHandle,
        pair: &DriverPair,
        namespace: &str,
        raw: RawTable,
        overrides: &HashMap<String, CanonicalType>,
        warnings: &mut Vec<String>,
    ) -> Result<Table> {
        let raw_columns = pair
            .introspector
            .columns(db, namespace, &raw.name)
            .await
            .map_err(|e| MigrateError::discovery(format!("columns of {}", raw.name), e))?;

        let mut table = Table::new(namespace, raw.name.as_str());
        table.estimated_rows = raw.estimated_rows;

        let is_view = raw.kind != RawRelationKind::Table;
        let table_sql = if is_view { None } else { raw.definition.as_deref() };
        let pk_len = raw_columns.iter().filter(|c| c.pk_position.is_some()).count();

        for rc in &raw_columns {
            let column = build_column(pair, rc, pk_len, table_sql, overrides, &raw.name, warnings);
            table.columns.push(column);
        }

        let mut pk: Vec<&RawColumn> = raw_columns.iter().filter(|c| c.pk_position.is_some()).collect();
        pk.sort_by_key(|c| c.pk_position);
        table.primary_key = pk.into_iter().map(|c| c.name.clone()).collect();

        if is_view {
            table.is_view = true;
            table.view = Some(ViewInfo {
                definition: raw.definition.clone(),
                dialect: pair.introspector.dialect(),
                materialized: raw.kind == RawRelationKind::MaterializedView,
                populated: raw.populated,
            });
            return Ok(table);
        }

        match pair.introspector.indexes(db, namespace, &raw.name).await {
            Ok(indexes) => {
                table.indexes = indexes
                    .into_iter()
                    .map(|ri| Index {
                        name: ri.name,
                        parts: ri.parts,
                        is_unique: ri.is_unique,
                        predicate: ri.predicate,
                        method: ri.method,
                        include: ri.include,
                    })
                    .collect();
            }
            Err(e) => warnings.push(format!(
                "{}: indexes could not be discovered and were left out: {}",
                raw.name, e
            )),
        }

        match pair.introspector.foreign_keys(db, namespace, &raw.name).await {
            Ok(fks) => {
                table.foreign_keys = fks
                    .into_iter()
                    .map(|fk| build_foreign_key(&raw.name, namespace, fk))
                    .collect();
            }
            Err(e) => warnings.push(format!(
                "{}: foreign keys could not be discovered and were left out: {}",
                raw.name, e
            )),
        }

        Ok(table)
    }
}

impl std::fmt::Debug for DiscoveryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryCoordinator")
            .field("dialects", &self.catalog.dialects())
            .finish()
    }
}

/// `custom_type_mappings` keyed by lowercased native type.
fn parse_type_overrides(config: &DiscoveryConfig) -> Result<HashMap<String, CanonicalType>> {
    config
        .custom_type_mappings
        .iter()
        .map(|(native, canonical)| {
            let ty = CanonicalType::from_str(canonical).map_err(|e| {
                MigrateError::Config(format!(
                    "custom type mapping '{}: {}' is invalid: {}",
                    native, canonical, e
                ))
            })?;
            Ok((native.trim().to_lowercase(), ty))
        })
        .collect()
}

fn build_column(
    pair: &DriverPair,
    rc: &RawColumn,
    pk_len: usize,
    table_sql: Option<&str>,
    overrides: &HashMap<String, CanonicalType>,
    table: &str,
    warnings: &mut Vec<String>,
) -> Column {
    let normalizer = &pair.normalizer;
    let native_lower = rc.native_type.trim().to_lowercase();
    let base = native_lower
        .split('(')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();

    let info = match overrides.get(&native_lower).or_else(|| overrides.get(&base)) {
        Some(ty) => CanonicalTypeInfo::lossless(ty.clone()),
        None => normalizer
            .type_converter()
            .to_canonical(&rc.native_type, rc.max_length, rc.precision, rc.scale),
    };
    if let Some(w) = &info.warning {
        warnings.push(format!("{}.{}: {}", table, rc.name, w));
    }

    let normalized = rc.default.as_deref().map(|d| normalizer.normalize_default(d));
    let implies_auto = normalized.as_ref().is_some_and(|n| n.implies_auto_increment);
    let mut default = normalized.and_then(|n| n.value);

    // Booleans stored as 0/1 compare equal to TRUE/FALSE.
    if info.canonical_type == CanonicalType::Boolean {
        if let Some(DefaultValue::Number(n)) = &default {
            match n.as_str() {
                "0" => default = Some(DefaultValue::Boolean(false)),
                "1" => default = Some(DefaultValue::Boolean(true)),
                _ => {}
            }
        }
    }

    let is_auto_increment = implies_auto || normalizer.is_auto_increment(rc, pk_len, table_sql);

    Column {
        name: rc.name.clone(),
        canonical_type: info.canonical_type,
        native_type: rc.native_type.clone(),
        is_nullable: rc.is_nullable,
        default,
        is_primary_key: rc.pk_position.is_some(),
        is_auto_increment,
        type_advisory: normalizer.types_are_advisory(),
        unmapped_type: info.unmapped,
        ordinal_pos: rc.ordinal_pos,
    }
}

fn build_foreign_key(table: &str, namespace: &str, fk: RawForeignKey) -> ForeignKey {
    let name = fk
        .name
        .unwrap_or_else(|| format!("fk_{}_{}", table, fk.columns.join("_")));
    ForeignKey {
        name,
        columns: fk.columns,
        ref_table: fk.ref_table,
        ref_schema: fk.ref_schema.unwrap_or_else(|| namespace.to_string()),
        ref_columns: fk.ref_columns,
        on_delete: ReferentialAction::from_sql(&fk.on_delete),
        on_update: ReferentialAction::from_sql(&fk.on_update),
        deferrable: fk.deferrable,
        initially_deferred: fk.initially_deferred,
    }
}

/// A foreign key without target columns points at the parent's primary key.
fn resolve_implicit_references(model: &mut SchemaModel) {
    let pks: HashMap<String, Vec<String>> = model
        .tables
        .iter()
        .map(|t| (t.name.clone(), t.primary_key.clone()))
        .collect();

    let mut warnings = Vec::new();
    for table in &mut model.tables {
        for fk in &mut table.foreign_keys {
            if !fk.ref_columns.is_empty() {
                continue;
            }
            match pks.get(&fk.ref_table) {
                Some(pk) if !pk.is_empty() => fk.ref_columns = pk.clone(),
                _ => warnings.push(format!(
                    "{}: foreign key {} references {} whose primary key is unknown",
                    table.name, fk.name, fk.ref_table
                )),
            }
        }
    }
    model.warnings.extend(warnings);
}

/// One relationship per foreign key. A key over unique columns is one-to-one.
pub fn infer_relationships(tables: &[Table]) -> Vec<Relationship> {
    tables
        .iter()
        .flat_map(|table| {
            table.foreign_keys.iter().map(move |fk| Relationship {
                name: fk.name.clone(),
                from_table: table.name.clone(),
                from_columns: fk.columns.clone(),
                to_table: fk.ref_table.clone(),
                to_columns: fk.ref_columns.clone(),
                cardinality: if table.is_unique_key(&fk.columns) {
                    Cardinality::OneToOne
                } else {
                    Cardinality::ManyToOne
                },
            })
        })
        .collect()
}
