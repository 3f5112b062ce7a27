//! Expands logical joins into physical joins, including inheritance ancestor joins.
use indexmap::IndexSet;

use crate::sql::{
    ast::{self, Expr, Query, SelectItem, TableWithJoins},
    catalog::{ReferenceMapping, SchemaResolver},
    query_graph::{ContainerReference, Filter, Join, JoinKind},
};

use super::{
    aliasing::{ancestor_alias, junction_alias, FILTER_PREFIX},
    context::{CompilationContext, Scope},
    custom_join,
    feature_mapper::map_single,
    join_ordering::sort_joins,
    rdbms_join::{conjunction, Junction, RdbmsJoin, RdbmsJoinKind},
    sub_select::{self, CompiledSubSelect},
    table_context::TableContext,
    CompileError, CompileResult, ID_COLUMN,
};

/// Physical joins and `WHERE` conditions collected for one select level.
#[derive(Debug, Default)]
pub struct JoinAccumulator {
    pub joins: Vec<RdbmsJoin>,
    pub conditions: Vec<Expr>,
    /// Join filters bound for the `WHERE` clause. They may read subselects of the level that
    /// are only registered after all joins are processed.
    pending_filters: Vec<Filter>,
}

impl JoinAccumulator {
    pub fn push_sub_select(&mut self, compiled: CompiledSubSelect) {
        self.joins.push(compiled.join);
        self.conditions.extend(compiled.condition);
    }

    /// Maps the deferred join filters. Call once every subselect of the level is registered.
    pub fn map_pending_filters(&mut self, ctx: &mut CompilationContext) -> CompileResult<()> {
        for filter in std::mem::take(&mut self.pending_filters) {
            self.conditions.push(map_single(ctx, &filter.condition)?);
        }
        Ok(())
    }
}

/// Processes `joins` and, depth first, the joins hanging off each of them.
pub fn process_joins(
    ctx: &mut CompilationContext,
    partner: &str,
    joins: &[Join],
    accumulator: &mut JoinAccumulator,
) -> CompileResult<()> {
    for join in joins {
        process_join(ctx, partner, join, accumulator)?;
    }
    Ok(())
}

fn process_join(
    ctx: &mut CompilationContext,
    partner: &str,
    join: &Join,
    accumulator: &mut JoinAccumulator,
) -> CompileResult<()> {
    // filters reading a correlated subselect cannot live in the ON clause
    let inline = !join
        .filters
        .iter()
        .any(|filter| filter.condition.contains_sub_select());
    let inline_filters = if inline { &join.filters[..] } else { &[] };
    let first = accumulator.joins.len();
    match &join.kind {
        JoinKind::Reference { reference } => {
            let physical = simple_join(
                ctx,
                partner,
                &join.id,
                reference,
                &join.target_type,
                join.outer,
                inline_filters,
            )?;
            accumulator.joins.push(physical);
        }
        JoinKind::Container { references } => {
            container_join(ctx, partner, join, references, inline_filters, accumulator)?
        }
        JoinKind::Cast => cast_join(ctx, partner, join, inline_filters, accumulator)?,
        JoinKind::Custom { sql } => {
            let (_, _, partner_binding) = ctx.resolve_node(partner)?;
            let alias = ctx.bind_node(&join.id, &join.target_type)?;
            let condition = custom_join::resolve(ctx, sql, &alias, &partner_binding.alias)?;
            let conditions =
                inline_conditions(ctx, &join.id, &alias, &join.target_type, inline_filters)?;
            accumulator.joins.push(RdbmsJoin::new(
                &alias,
                RdbmsJoinKind::Custom {
                    table: ctx.schema.table_name(&join.target_type)?,
                    condition: condition.sql,
                    dependencies: condition.dependencies,
                    conditions,
                },
                join.outer,
            ));
        }
        JoinKind::SubSelect { sub_select } => {
            if !join.joins.is_empty() {
                return Err(CompileError::Unsupported(format!(
                    "Joins below subselect join {}",
                    join.id
                )));
            }
            let compiled = sub_select::build(ctx, sub_select, Some(partner))?;
            accumulator.push_sub_select(compiled);
            accumulator.pending_filters.extend(join.filters.iter().cloned());
            return Ok(());
        }
    }
    let aliases: Vec<&str> = accumulator.joins[first..]
        .iter()
        .map(|join| join.alias.as_str())
        .collect();
    tracing::debug!(join = %join.id, partner, ?aliases, "expanded join");
    if !inline {
        accumulator.pending_filters.extend(join.filters.iter().cloned());
    }
    process_joins(ctx, &join.id, &join.joins, accumulator)
}

/// Joins `target_type` along `reference` of the partner node and binds the result as `id`.
pub fn simple_join(
    ctx: &mut CompilationContext,
    partner: &str,
    id: &str,
    reference: &str,
    target_type: &str,
    outer: bool,
    filters: &[Filter],
) -> CompileResult<RdbmsJoin> {
    let metamodel = ctx.metamodel;
    let schema = ctx.schema;
    let (partner_scope, partner_id, partner_binding) = ctx.resolve_node(partner)?;
    let definition = metamodel.find_reference(&partner_binding.type_name, reference)?;
    if definition.target_type != target_type {
        if metamodel.supertypes(target_type)?.contains(&definition.target_type) {
            tracing::warn!(
                reference,
                target_type,
                "descendant joins are not processed, use a cast join to narrow the target"
            );
            return Err(CompileError::Unsupported(format!(
                "Descendant join from {} to {target_type}",
                definition.target_type
            )));
        }
        return Err(CompileError::AncestorResolution {
            type_name: target_type.to_owned(),
            declaring_type: definition.target_type.to_owned(),
        });
    }
    let alias = ctx.bind_node(id, target_type)?;
    let kind = match schema.reference_mapping(definition) {
        ReferenceMapping::OwnerFk { column } => {
            // the foreign key is stored with the declaring level
            let partner_alias = if definition.declaring_type == partner_binding.type_name {
                partner_binding.alias
            } else {
                ctx.require_ancestor(partner_scope, &partner_id, &definition.declaring_type);
                ancestor_alias(
                    &partner_binding.alias,
                    &schema.ancestor_postfix(&definition.declaring_type)?,
                )
            };
            table_kind(schema, target_type, ID_COLUMN, &partner_alias, column, None)?
        }
        ReferenceMapping::InverseFk { column } => table_kind(
            schema,
            target_type,
            column,
            &partner_binding.alias,
            ID_COLUMN,
            None,
        )?,
        ReferenceMapping::JoinTable {
            table,
            source_column,
            target_column,
        } => table_kind(
            schema,
            target_type,
            ID_COLUMN,
            &partner_binding.alias,
            ID_COLUMN,
            Some(Junction {
                table: table.to_owned(),
                alias: junction_alias(&alias),
                source_column: source_column.to_owned(),
                target_column: target_column.to_owned(),
            }),
        )?,
    };
    let kind = with_conditions(kind, inline_conditions(ctx, id, &alias, target_type, filters)?);
    Ok(RdbmsJoin::new(&alias, kind, outer))
}

fn table_kind(
    schema: &dyn SchemaResolver,
    type_name: &str,
    column_name: &str,
    partner_alias: &str,
    partner_column_name: &str,
    junction: Option<Junction>,
) -> CompileResult<RdbmsJoinKind> {
    Ok(RdbmsJoinKind::Table {
        table: schema.table_name(type_name)?,
        column_name: column_name.to_owned(),
        partner_alias: partner_alias.to_owned(),
        partner_column_name: partner_column_name.to_owned(),
        junction,
        conditions: vec![],
    })
}

fn with_conditions(kind: RdbmsJoinKind, extra: Vec<Expr>) -> RdbmsJoinKind {
    match kind {
        RdbmsJoinKind::Table {
            table,
            column_name,
            partner_alias,
            partner_column_name,
            junction,
            mut conditions,
        } => {
            conditions.extend(extra);
            RdbmsJoinKind::Table {
                table,
                column_name,
                partner_alias,
                partner_column_name,
                junction,
                conditions,
            }
        }
        other => other,
    }
}

/// One outer join per candidate owner, then the owner itself keyed on whichever candidate
/// matched.
fn container_join(
    ctx: &mut CompilationContext,
    partner: &str,
    join: &Join,
    references: &[ContainerReference],
    filters: &[Filter],
    accumulator: &mut JoinAccumulator,
) -> CompileResult<()> {
    if references.is_empty() {
        return Err(CompileError::Internal(format!(
            "Container join {} has no candidate owner",
            join.id
        )));
    }
    let metamodel = ctx.metamodel;
    let schema = ctx.schema;
    let (partner_scope, partner_id, partner_binding) = ctx.resolve_node(partner)?;
    let partner_chain = metamodel.type_chain(&partner_binding.type_name)?;
    let mut candidate_aliases = vec![];
    for candidate in references {
        let definition = metamodel.find_reference(&candidate.owner_type, &candidate.reference)?;
        if !partner_chain.contains(&definition.target_type) {
            return Err(CompileError::AncestorResolution {
                type_name: partner_binding.type_name,
                declaring_type: definition.target_type.to_owned(),
            });
        }
        let candidate_alias = ctx.next_alias()?;
        let kind = match schema.reference_mapping(definition) {
            ReferenceMapping::OwnerFk { column } => table_kind(
                schema,
                &definition.declaring_type,
                column,
                &partner_binding.alias,
                ID_COLUMN,
                None,
            )?,
            ReferenceMapping::InverseFk { column } => {
                // the back pointer is stored with the referenced level of the partner
                let partner_alias = if definition.target_type == partner_binding.type_name {
                    partner_binding.alias.to_owned()
                } else {
                    ctx.require_ancestor(partner_scope, &partner_id, &definition.target_type);
                    ancestor_alias(
                        &partner_binding.alias,
                        &schema.ancestor_postfix(&definition.target_type)?,
                    )
                };
                table_kind(
                    schema,
                    &definition.declaring_type,
                    ID_COLUMN,
                    &partner_alias,
                    column,
                    None,
                )?
            }
            ReferenceMapping::JoinTable { table, .. } => {
                tracing::warn!(
                    owner = %candidate.owner_type,
                    reference = %candidate.reference,
                    table = %table,
                    "container ownership through a join table is not processed"
                );
                return Err(CompileError::Unsupported(format!(
                    "Container join through join table {table}"
                )));
            }
        };
        accumulator
            .joins
            .push(RdbmsJoin::new(&candidate_alias, kind, true));
        candidate_aliases.push(candidate_alias);
    }
    let alias = ctx.bind_node(&join.id, &join.target_type)?;
    let conditions = inline_conditions(ctx, &join.id, &alias, &join.target_type, filters)?;
    accumulator.joins.push(RdbmsJoin::new(
        &alias,
        RdbmsJoinKind::Container {
            table: schema.table_name(&join.target_type)?,
            candidate_aliases,
            conditions,
        },
        join.outer,
    ));
    Ok(())
}

/// The target level shares the partner's id; every supertype level up to the root follows,
/// each joined to the level before it. Only the first join carries filters.
fn cast_join(
    ctx: &mut CompilationContext,
    partner: &str,
    join: &Join,
    filters: &[Filter],
    accumulator: &mut JoinAccumulator,
) -> CompileResult<()> {
    let metamodel = ctx.metamodel;
    let schema = ctx.schema;
    let (_, _, partner_binding) = ctx.resolve_node(partner)?;
    if !metamodel
        .type_chain(&join.target_type)?
        .contains(&partner_binding.type_name)
    {
        return Err(CompileError::AncestorResolution {
            type_name: join.target_type.to_owned(),
            declaring_type: partner_binding.type_name,
        });
    }
    let alias = ctx.bind_node(&join.id, &join.target_type)?;
    let conditions = inline_conditions(ctx, &join.id, &alias, &join.target_type, filters)?;
    let kind = table_kind(
        schema,
        &join.target_type,
        ID_COLUMN,
        &partner_binding.alias,
        ID_COLUMN,
        None,
    )?;
    accumulator
        .joins
        .push(RdbmsJoin::new(&alias, with_conditions(kind, conditions), join.outer));
    let mut previous = alias.to_owned();
    for supertype in metamodel.supertypes(&join.target_type)? {
        let level_alias = ancestor_alias(&alias, &schema.ancestor_postfix(&supertype)?);
        accumulator.joins.push(RdbmsJoin::ancestor(
            &level_alias,
            &schema.table_name(&supertype)?,
            &previous,
        ));
        previous = level_alias;
    }
    Ok(())
}

/// Compiles `filters` of the node `id` into `EXISTS (...)` conditions for its `ON` clause. The
/// node is rebound inside the subquery so the filters read the subquery's own row.
fn inline_conditions(
    ctx: &mut CompilationContext,
    id: &str,
    alias: &str,
    type_name: &str,
    filters: &[Filter],
) -> CompileResult<Vec<Expr>> {
    if filters.is_empty() {
        return Ok(vec![]);
    }
    let ((inner_alias, predicates), scope) = ctx.scoped(FILTER_PREFIX, false, |ctx| {
        let inner_alias = ctx.bind_node(id, type_name)?;
        let predicates = filters
            .iter()
            .map(|filter| map_single(ctx, &filter.condition))
            .collect::<CompileResult<Vec<_>>>()?;
        Ok((inner_alias, predicates))
    })?;
    let table = TableContext::try_from_type(type_name, &inner_alias, ctx.schema)?;
    let joins = emit_joins(ctx.schema, scope, vec![])?;
    let correlation = Expr::eq(table.column(ID_COLUMN), Expr::column(alias, ID_COLUMN));
    let query = Query::new(vec![SelectItem::UnnamedExpr(Expr::number(1))])
        .from(vec![TableWithJoins {
            relation: table.table_factor(),
            joins,
        }])
        .predicate(Some(conjunction(correlation, &predicates)));
    Ok(vec![Expr::Exists(query.boxed())])
}

/// One outer join per ancestor level recorded for the nodes of `scope`, skipping aliases
/// already present in `existing`.
pub fn ancestor_joins(
    schema: &dyn SchemaResolver,
    scope: &mut Scope,
    existing: &[RdbmsJoin],
) -> CompileResult<Vec<RdbmsJoin>> {
    let mut present: IndexSet<String> = existing
        .iter()
        .flat_map(|join| join.provided_aliases())
        .map(str::to_owned)
        .collect();
    let mut joins = vec![];
    for (node, ancestors) in scope.ancestors.take() {
        let binding = scope
            .node(&node)
            .ok_or_else(|| CompileError::UnknownNode(node.to_owned()))?;
        for ancestor in ancestors {
            let alias = ancestor_alias(&binding.alias, &schema.ancestor_postfix(&ancestor)?);
            if !present.insert(alias.to_owned()) {
                tracing::debug!(%alias, "ancestor join already present");
                continue;
            }
            tracing::debug!(%alias, %node, %ancestor, "injecting ancestor join");
            joins.push(RdbmsJoin::ancestor(
                &alias,
                &schema.table_name(&ancestor)?,
                &binding.alias,
            ));
        }
    }
    Ok(joins)
}

/// Completes a scope's join list with its ancestor joins, orders it and renders it.
pub fn emit_joins(
    schema: &dyn SchemaResolver,
    mut scope: Scope,
    mut joins: Vec<RdbmsJoin>,
) -> CompileResult<Vec<ast::Join>> {
    let ancestors = ancestor_joins(schema, &mut scope, &joins)?;
    joins.extend(ancestors);
    Ok(sort_joins(joins)?
        .iter()
        .flat_map(RdbmsJoin::to_ast)
        .collect())
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::sql::{
        catalog::Catalog,
        dialect::Dialect,
        function_signature::FunctionSignature,
        query_graph::Feature,
        rdbms_builder::{aliasing::ROOT_PREFIX, context::Variables, function_mapper::FunctionMapper},
    };

    fn catalog() -> Catalog {
        Catalog::default()
            .with_type("Base", None, "base")
            .with_type("Mid", Some("Base"), "mid")
            .with_type("Leaf", Some("Mid"), "leaf")
            .with_type("Customer", None, "customers")
            .with_attribute("Leaf", "weight", "weight")
            .with_reference(
                "Base",
                "customer",
                "Customer",
                ReferenceMapping::OwnerFk {
                    column: "customer_id".to_owned(),
                },
            )
            .with_reference(
                "Customer",
                "tags",
                "Customer",
                ReferenceMapping::JoinTable {
                    table: "customer_tags".to_owned(),
                    source_column: "customer_id".to_owned(),
                    target_column: "tag_id".to_owned(),
                },
            )
    }

    fn compile(catalog: &Catalog, source_type: &str, joins: &[Join]) -> (String, Vec<Expr>) {
        let functions = FunctionMapper::new();
        let parameters = IndexMap::new();
        let variables = Variables::new();
        let mut ctx = CompilationContext::new(
            Dialect::Postgresql,
            catalog,
            catalog,
            &functions,
            &parameters,
            &variables,
        );
        let (accumulator, scope) = ctx
            .scoped(ROOT_PREFIX, true, |ctx| {
                ctx.bind_node("root", source_type)?;
                let mut accumulator = JoinAccumulator::default();
                process_joins(ctx, "root", joins, &mut accumulator)?;
                accumulator.map_pending_filters(ctx)?;
                Ok(accumulator)
            })
            .unwrap();
        let joins = emit_joins(catalog, scope, accumulator.joins).unwrap();
        (
            ast::display_separated(&joins, "").to_string(),
            accumulator.conditions,
        )
    }

    #[test]
    fn inherited_owner_fk_reads_the_ancestor_table() {
        let joins = [Join::new(
            "customer",
            JoinKind::Reference {
                reference: "customer".to_owned(),
            },
            "Customer",
        )];
        let (sql, _) = compile(&catalog(), "Leaf", &joins);
        assert_eq!(
            sql,
            concat!(
                r#" LEFT OUTER JOIN "base" "t0_base" ON "t0_base"."id" = "t0"."id""#,
                r#" LEFT OUTER JOIN "customers" "t1" ON "t1"."id" = "t0_base"."customer_id""#,
            )
        );
    }

    #[test]
    fn join_table_references_go_through_the_junction() {
        let joins = [Join::new(
            "tags",
            JoinKind::Reference {
                reference: "tags".to_owned(),
            },
            "Customer",
        )];
        let (sql, _) = compile(&catalog(), "Customer", &joins);
        assert_eq!(
            sql,
            concat!(
                r#" LEFT OUTER JOIN "customer_tags" "t1_j" ON "t1_j"."customer_id" = "t0"."id""#,
                r#" LEFT OUTER JOIN "customers" "t1" ON "t1"."id" = "t1_j"."tag_id""#,
            )
        );
    }

    #[test]
    fn cast_chains_every_level_to_the_previous_join() {
        let joins = [Join::new("leaf", JoinKind::Cast, "Leaf")];
        let (sql, _) = compile(&catalog(), "Base", &joins);
        assert_eq!(
            sql,
            concat!(
                r#" LEFT OUTER JOIN "leaf" "t1" ON "t1"."id" = "t0"."id""#,
                r#" LEFT OUTER JOIN "mid" "t1_mid" ON "t1_mid"."id" = "t1"."id""#,
                r#" LEFT OUTER JOIN "base" "t1_base" ON "t1_base"."id" = "t1_mid"."id""#,
            )
        );
    }

    #[test]
    fn cast_to_an_unrelated_type_fails() {
        let joins = [Join::new("customer", JoinKind::Cast, "Customer")];
        let functions = FunctionMapper::new();
        let parameters = IndexMap::new();
        let variables = Variables::new();
        let catalog = catalog();
        let mut ctx = CompilationContext::new(
            Dialect::Postgresql,
            &catalog,
            &catalog,
            &functions,
            &parameters,
            &variables,
        );
        ctx.push_scope(ROOT_PREFIX, true);
        ctx.bind_node("root", "Base").unwrap();
        let error = process_joins(&mut ctx, "root", &joins, &mut JoinAccumulator::default());
        assert!(matches!(error, Err(CompileError::AncestorResolution { .. })));
    }

    #[test]
    fn cast_filters_become_exists_on_the_first_join() {
        let mut join = Join::new("leaf", JoinKind::Cast, "Leaf");
        join.filters.push(
            Feature::function(
                FunctionSignature::Equals,
                [
                    ("left", Feature::attribute("leaf", "weight")),
                    ("right", Feature::constant(json!(3))),
                ],
            )
            .into(),
        );
        let (sql, conditions) = compile(&catalog(), "Base", &[join]);
        assert_eq!(
            sql,
            concat!(
                r#" LEFT OUTER JOIN "leaf" "t1" ON "t1"."id" = "t0"."id" AND EXISTS "#,
                r#"(SELECT 1 FROM "leaf" "f2" WHERE "f2"."id" = "t1"."id" AND ("f2"."weight" = :p1))"#,
                r#" LEFT OUTER JOIN "mid" "t1_mid" ON "t1_mid"."id" = "t1"."id""#,
                r#" LEFT OUTER JOIN "base" "t1_base" ON "t1_base"."id" = "t1_mid"."id""#,
            )
        );
        assert!(conditions.is_empty());
    }
}
