//! Foreign-key dependency ordering.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::core::schema::Table;

/// Parents-first ordering of a set of tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyOrder {
    /// Table names, every referenced table before its referrers.
    pub order: Vec<String>,
    /// `(table, foreign key name)` pairs that point at a table placed later.
    /// They only appear when the graph has a cycle.
    pub deferred: Vec<(String, String)>,
}

impl DependencyOrder {
    pub fn is_deferred(&self, table: &str, fk: &str) -> bool {
        self.deferred.iter().any(|(t, f)| t == table && f == fk)
    }

    /// Children-first order, used for drops and deletes.
    pub fn reversed(&self) -> Vec<String> {
        self.order.iter().rev().cloned().collect()
    }
}

/// Kahn's algorithm over the foreign keys among `tables`.
///
/// References to tables outside the set and self references are ignored.
/// Ties keep input order. When every remaining table waits on another, the
/// one with the fewest unplaced parents is placed and its keys to unplaced
/// tables are deferred.
pub fn dependency_order(tables: &[&Table]) -> DependencyOrder {
    let position: HashMap<&str, usize> = tables
        .iter()
        .enumerate()
        .map(|(i, t)| (t.name.as_str(), i))
        .collect();

    // parents[i] = set of table indexes that table i references
    let parents: Vec<HashSet<usize>> = tables
        .iter()
        .enumerate()
        .map(|(i, t)| {
            t.foreign_keys
                .iter()
                .filter_map(|fk| position.get(fk.ref_table.as_str()).copied())
                .filter(|&p| p != i)
                .collect()
        })
        .collect();

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); tables.len()];
    for (i, ps) in parents.iter().enumerate() {
        for &p in ps {
            children[p].push(i);
        }
    }

    let mut waiting: Vec<usize> = parents.iter().map(|p| p.len()).collect();
    let mut placed = vec![false; tables.len()];
    let mut ready: BTreeSet<usize> = (0..tables.len()).filter(|&i| waiting[i] == 0).collect();
    let mut result = DependencyOrder::default();

    while result.order.len() < tables.len() {
        let next = match ready.pop_first() {
            Some(i) => i,
            None => {
                // Cycle: pick the table closest to being ready.
                let Some(i) = (0..tables.len())
                    .filter(|&i| !placed[i])
                    .min_by_key(|&i| (waiting[i], i))
                else {
                    break;
                };
                let table = tables[i];
                for fk in &table.foreign_keys {
                    if let Some(&p) = position.get(fk.ref_table.as_str()) {
                        if p != i && !placed[p] {
                            result.deferred.push((table.name.clone(), fk.name.clone()));
                        }
                    }
                }
                i
            }
        };

        placed[next] = true;
        result.order.push(tables[next].name.clone());
        for &child in &children[next] {
            if placed[child] {
                continue;
            }
            waiting[child] = waiting[child].saturating_sub(1);
            if waiting[child] == 0 {
                ready.insert(child);
            }
        }
    }

    result
}
