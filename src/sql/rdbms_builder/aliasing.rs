use std::sync::atomic::{AtomicUsize, Ordering};

/// Prefix for aliases of nodes in the root select.
pub const ROOT_PREFIX: &str = "t";
/// Prefix for aliases inside `EXISTS` filter subqueries.
pub const FILTER_PREFIX: &str = "f";
/// Prefix for type predicate subqueries.
pub const TYPE_PREDICATE_PREFIX: &str = "i";

/// Column every navigation subselect exposes its correlation key under.
pub const BASE_COLUMN: &str = "__base";
/// Row number column used to apply limit and offset per correlated partner.
pub const ROW_NUMBER_COLUMN: &str = "__rn";

/// Hands out table aliases. One counter is shared by every scope of a compilation, so
/// aliases stay unique across nesting levels while the prefix keeps namespaces apart.
#[derive(Debug, Default)]
pub struct AliasGenerator {
    counter: AtomicUsize,
}

impl AliasGenerator {
    pub fn next(&self, prefix: &str) -> String {
        let index = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}{index}")
    }
}

/// Prefix of the `depth`th nested navigation subselect.
pub fn sub_select_prefix(depth: usize) -> String {
    format!("n{depth}_")
}

pub fn ancestor_alias(node_alias: &str, ancestor_postfix: &str) -> String {
    format!("{node_alias}{ancestor_postfix}")
}

pub fn junction_alias(node_alias: &str) -> String {
    format!("{node_alias}_j")
}

/// Column alias of the `index`th unbound feature of a select.
pub fn feature_alias(index: usize) -> String {
    format!("__f{index}")
}

/// Column alias of the `index`th exposed ordering column of a navigation subselect.
pub fn order_alias(index: usize) -> String {
    format!("__o{index}")
}

/// Alias of one column of a multi column feature.
pub fn column_alias(alias: &str, column: Option<&str>) -> String {
    match column {
        Some(column) => format!("{alias}_{column}"),
        None => alias.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_share_one_counter_across_prefixes() {
        let aliases = AliasGenerator::default();
        assert_eq!(aliases.next(ROOT_PREFIX), "t0");
        assert_eq!(aliases.next(&sub_select_prefix(1)), "n1_1");
        assert_eq!(aliases.next(ROOT_PREFIX), "t2");
    }

    #[test]
    fn derived_aliases() {
        assert_eq!(ancestor_alias("t3", "_base"), "t3_base");
        assert_eq!(feature_alias(4), "__f4");
        assert_eq!(column_alias("__f0", Some("version")), "__f0_version");
        assert_eq!(column_alias("name", None), "name");
    }
}
