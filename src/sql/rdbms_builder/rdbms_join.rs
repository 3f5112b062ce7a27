//! Physical joins, ready to be ordered and rendered.
use indexmap::IndexSet;

use crate::sql::ast::{self, Expr, Ident, Query, TableFactor};

use super::{table_context::TableContext, ID_COLUMN};

/// An association table sitting between a join and its partner.
#[derive(Debug, Clone)]
pub struct Junction {
    pub table: String,
    pub alias: String,
    /// Column holding the partner's id.
    pub source_column: String,
    /// Column holding the joined row's id.
    pub target_column: String,
}

#[derive(Debug, Clone)]
pub enum RdbmsJoinKind {
    /// `alias.column_name = partner_alias.partner_column_name`, optionally through a junction
    /// table, optionally narrowed by inline conditions.
    Table {
        table: String,
        column_name: String,
        partner_alias: String,
        partner_column_name: String,
        junction: Option<Junction>,
        conditions: Vec<Expr>,
    },
    /// Storage of a supertype level, sharing the id of `partner_alias`.
    Ancestor { table: String, partner_alias: String },
    /// Owner of the partner, picked from whichever candidate owner join matched.
    Container {
        table: String,
        candidate_aliases: Vec<String>,
        conditions: Vec<Expr>,
    },
    /// A resolved, driver supplied `ON` condition.
    Custom {
        table: String,
        condition: String,
        dependencies: IndexSet<String>,
        conditions: Vec<Expr>,
    },
    /// A nested select joined as a derived table. Cross joined without a condition.
    Query {
        query: Box<Query>,
        condition: Option<Expr>,
    },
}

#[derive(Debug, Clone)]
pub struct RdbmsJoin {
    pub alias: String,
    pub kind: RdbmsJoinKind,
    pub outer: bool,
    /// Aliases the `ON` clause reads, excluding the ones this join provides itself.
    pub join_condition_table_aliases: IndexSet<String>,
}

impl RdbmsJoin {
    pub fn new(alias: &str, kind: RdbmsJoinKind, outer: bool) -> Self {
        let mut join = Self {
            alias: alias.to_owned(),
            kind,
            outer,
            join_condition_table_aliases: IndexSet::new(),
        };
        join.join_condition_table_aliases = join.dependencies();
        join
    }

    pub fn ancestor(alias: &str, table: &str, partner_alias: &str) -> Self {
        Self::new(
            alias,
            RdbmsJoinKind::Ancestor {
                table: table.to_owned(),
                partner_alias: partner_alias.to_owned(),
            },
            true,
        )
    }

    /// Aliases this join brings into scope.
    pub fn provided_aliases(&self) -> Vec<&str> {
        match &self.kind {
            RdbmsJoinKind::Table {
                junction: Some(junction),
                ..
            } => vec![junction.alias.as_str(), self.alias.as_str()],
            _ => vec![self.alias.as_str()],
        }
    }

    fn dependencies(&self) -> IndexSet<String> {
        let mut qualifiers = IndexSet::new();
        for on in self.to_ast().iter().filter_map(|join| join.on.as_ref()) {
            on.collect_qualifiers(&mut qualifiers);
        }
        if let RdbmsJoinKind::Custom { dependencies, .. } = &self.kind {
            qualifiers.extend(dependencies.iter().cloned());
        }
        for alias in self.provided_aliases() {
            qualifiers.shift_remove(alias);
        }
        qualifiers
    }

    pub fn to_ast(&self) -> Vec<ast::Join> {
        let table = |name: &str| TableContext::from_table(name, &self.alias);
        match &self.kind {
            RdbmsJoinKind::Table {
                table: table_name,
                column_name,
                partner_alias,
                partner_column_name,
                junction,
                conditions,
            } => {
                let target = table(table_name);
                let partner_column = Expr::column(partner_alias, partner_column_name);
                let mut joins = vec![];
                let link = match junction {
                    Some(junction) => {
                        let junction_table =
                            TableContext::from_table(&junction.table, &junction.alias);
                        joins.push(ast::Join::on(
                            self.outer,
                            junction_table.table_factor(),
                            Expr::eq(
                                junction_table.column(&junction.source_column),
                                partner_column,
                            ),
                        ));
                        Expr::eq(
                            target.column(column_name),
                            junction_table.column(&junction.target_column),
                        )
                    }
                    None => Expr::eq(target.column(column_name), partner_column),
                };
                joins.push(ast::Join::on(
                    self.outer,
                    target.table_factor(),
                    conjunction(link, conditions),
                ));
                joins
            }
            RdbmsJoinKind::Ancestor {
                table: table_name,
                partner_alias,
            } => {
                let ancestor = table(table_name);
                vec![ast::Join::on(
                    self.outer,
                    ancestor.table_factor(),
                    Expr::eq(ancestor.column(ID_COLUMN), Expr::column(partner_alias, ID_COLUMN)),
                )]
            }
            RdbmsJoinKind::Container {
                table: table_name,
                candidate_aliases,
                conditions,
            } => {
                let container = table(table_name);
                let owner_id = Expr::Template {
                    template: coalesce_template(candidate_aliases.len()),
                    args: candidate_aliases
                        .iter()
                        .map(|alias| Expr::column(alias, ID_COLUMN))
                        .collect(),
                };
                vec![ast::Join::on(
                    self.outer,
                    container.table_factor(),
                    conjunction(Expr::eq(container.column(ID_COLUMN), owner_id), conditions),
                )]
            }
            RdbmsJoinKind::Custom {
                table: table_name,
                condition,
                conditions,
                ..
            } => vec![ast::Join::on(
                self.outer,
                table(table_name).table_factor(),
                conjunction(Expr::Raw(condition.to_owned()), conditions),
            )],
            RdbmsJoinKind::Query { query, condition } => {
                let relation = TableFactor::Derived {
                    subquery: query.clone(),
                    alias: Ident::quoted(&self.alias),
                };
                vec![match condition {
                    Some(condition) => ast::Join::on(self.outer, relation, condition.to_owned()),
                    None => ast::Join::cross(relation),
                }]
            }
        }
    }
}

fn coalesce_template(count: usize) -> String {
    let placeholders = (0..count)
        .map(|index| format!("{{{index}}}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("COALESCE({placeholders})")
}

/// `first AND rest...`
pub fn conjunction(first: Expr, rest: &[Expr]) -> Expr {
    rest.iter().cloned().fold(first, Expr::and)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::sql::ast::display_separated;

    fn render(join: &RdbmsJoin) -> String {
        display_separated(&join.to_ast(), "").to_string()
    }

    #[test]
    fn table_join_links_column_to_partner_column() {
        let join = RdbmsJoin::new(
            "t1",
            RdbmsJoinKind::Table {
                table: "customers".to_owned(),
                column_name: "id".to_owned(),
                partner_alias: "t0".to_owned(),
                partner_column_name: "customer_id".to_owned(),
                junction: None,
                conditions: vec![],
            },
            true,
        );
        assert_eq!(
            render(&join),
            r#" LEFT OUTER JOIN "customers" "t1" ON "t1"."id" = "t0"."customer_id""#
        );
        assert_eq!(
            join.join_condition_table_aliases.into_iter().collect::<Vec<_>>(),
            vec!["t0".to_owned()]
        );
    }

    #[test]
    fn junction_joins_render_before_the_target_and_are_not_dependencies() {
        let join = RdbmsJoin::new(
            "t2",
            RdbmsJoinKind::Table {
                table: "tags".to_owned(),
                column_name: "id".to_owned(),
                partner_alias: "t0".to_owned(),
                partner_column_name: "id".to_owned(),
                junction: Some(Junction {
                    table: "post_tags".to_owned(),
                    alias: "t2_j".to_owned(),
                    source_column: "post_id".to_owned(),
                    target_column: "tag_id".to_owned(),
                }),
                conditions: vec![],
            },
            false,
        );
        assert_eq!(
            render(&join),
            concat!(
                r#" INNER JOIN "post_tags" "t2_j" ON "t2_j"."post_id" = "t0"."id""#,
                r#" INNER JOIN "tags" "t2" ON "t2"."id" = "t2_j"."tag_id""#
            )
        );
        assert_eq!(join.join_condition_table_aliases.len(), 1);
    }

    #[test]
    fn container_join_coalesces_candidate_ids() {
        let join = RdbmsJoin::new(
            "t3",
            RdbmsJoinKind::Container {
                table: "owners".to_owned(),
                candidate_aliases: vec!["t1".to_owned(), "t2".to_owned()],
                conditions: vec![],
            },
            true,
        );
        assert_eq!(
            render(&join),
            r#" LEFT OUTER JOIN "owners" "t3" ON "t3"."id" = COALESCE("t1"."id", "t2"."id")"#
        );
        assert_eq!(
            join.join_condition_table_aliases.into_iter().collect::<Vec<_>>(),
            vec!["t1".to_owned(), "t2".to_owned()]
        );
    }
}
