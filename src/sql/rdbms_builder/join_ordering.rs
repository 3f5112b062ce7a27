//! Orders joins so every `ON` clause only reads aliases introduced before it.
use std::cmp::Ordering;

use super::{rdbms_join::RdbmsJoin, CompileError, CompileResult};

/// Whether `reader`'s `ON` clause reads an alias `provider` introduces.
fn reads(reader: &RdbmsJoin, provider: &RdbmsJoin) -> bool {
    provider
        .provided_aliases()
        .iter()
        .any(|alias| reader.join_condition_table_aliases.contains(*alias))
}

/// Pairwise order of two joins given their positions in the original list: a join reading
/// the other's alias goes after it, unrelated joins keep their original order.
fn compare(a: (usize, &RdbmsJoin), b: (usize, &RdbmsJoin)) -> Ordering {
    if reads(a.1, b.1) {
        Ordering::Greater
    } else if reads(b.1, a.1) {
        Ordering::Less
    } else {
        a.0.cmp(&b.0)
    }
}

/// Stable dependency sort. The comparator alone is not transitive, so each step only ranks
/// the joins that read no remaining join and emits the least of them. Aliases not provided
/// by any listed join (the `FROM` table, enclosing scopes) impose no constraint.
pub fn sort_joins(joins: Vec<RdbmsJoin>) -> CompileResult<Vec<RdbmsJoin>> {
    let mut remaining: Vec<(usize, RdbmsJoin)> = joins.into_iter().enumerate().collect();
    let mut sorted = Vec::with_capacity(remaining.len());
    while !remaining.is_empty() {
        let next = remaining
            .iter()
            .enumerate()
            .filter(|(_, (_, join))| {
                !remaining
                    .iter()
                    .any(|(_, other)| !std::ptr::eq(join, other) && reads(join, other))
            })
            .min_by(|(_, (a_index, a)), (_, (b_index, b))| {
                compare((*a_index, a), (*b_index, b))
            })
            .map(|(position, _)| position);
        let Some(position) = next else {
            let cycle = remaining
                .iter()
                .map(|(_, join)| join.alias.to_owned())
                .collect();
            return Err(CompileError::JoinCycle(cycle));
        };
        sorted.push(remaining.remove(position).1);
    }
    tracing::debug!(
        order = ?sorted.iter().map(|join| join.alias.as_str()).collect::<Vec<_>>(),
        "ordered joins"
    );
    Ok(sorted)
}
