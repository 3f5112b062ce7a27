//! Navigation subselects: multi hop navigation compiled into a derived table and joined back
//! to the node it starts from.
use crate::sql::{
    ast::{
        BinaryOperator, Expr, Function, Ident, ObjectName, OrderByExpr, Query, SelectItem,
        TableWithJoins, WindowSpec,
    },
    function_signature::FunctionSignature,
    query_graph::{Feature, SubSelect},
};

use super::{
    aliasing::{feature_alias, order_alias, sub_select_prefix, BASE_COLUMN, ROW_NUMBER_COLUMN},
    context::{CompilationContext, SubSelectBinding},
    feature_mapper::map_single,
    join_processor::{emit_joins, simple_join, JoinAccumulator},
    rdbms_join::{conjunction, RdbmsJoin, RdbmsJoinKind},
    table_context::TableContext,
    CompileError, CompileResult, ID_COLUMN,
};

/// The join of a navigation subselect plus the outer `WHERE` condition it needs, if any.
#[derive(Debug)]
pub struct CompiledSubSelect {
    pub join: RdbmsJoin,
    pub condition: Option<Expr>,
}

struct Body {
    base: TableContext,
    accumulator: JoinAccumulator,
    projection: Vec<SelectItem>,
    group_by: Vec<Expr>,
    /// Orderings of every hop, outermost hop first.
    ordering: Vec<OrderByExpr>,
    columns: Vec<(String, bool)>,
    order_columns: Vec<(String, bool)>,
    aggregate: bool,
}

/// Compiles `sub_select` into a derived table and registers its columns in the current scope.
/// Without an explicit partner the subselect correlates with `default_partner`, and without
/// either it is cross joined.
pub fn build(
    ctx: &mut CompilationContext,
    sub_select: &SubSelect,
    default_partner: Option<&str>,
) -> CompileResult<CompiledSubSelect> {
    let partner = match sub_select.partner.as_deref().or(default_partner) {
        Some(partner) => {
            let (_, _, binding) = ctx.resolve_node(partner)?;
            if !ctx
                .metamodel
                .type_chain(&binding.type_name)?
                .contains(&sub_select.base_type)
            {
                return Err(CompileError::AncestorResolution {
                    type_name: binding.type_name,
                    declaring_type: sub_select.base_type.to_owned(),
                });
            }
            Some(binding)
        }
        None => None,
    };
    let correlated = partner.is_some();
    if sub_select.exclude && !correlated {
        return Err(CompileError::Unsupported(format!(
            "Excluding subselect {} has no partner to correlate with",
            sub_select.id
        )));
    }
    let paged = sub_select.limit.is_some() || sub_select.offset.is_some();
    if correlated && paged && sub_select.features.iter().any(Feature::is_aggregate) {
        tracing::warn!(
            sub_select = %sub_select.id,
            "paging a correlated aggregate is not processed, it yields one row per partner"
        );
        return Err(CompileError::Unsupported(format!(
            "Limit or offset on correlated aggregate subselect {}",
            sub_select.id
        )));
    }
    let alias = ctx.next_alias()?;
    let prefix = sub_select_prefix(ctx.scope_depth());
    let (body, scope) =
        ctx.scoped(&prefix, true, |ctx| compile_body(ctx, sub_select, correlated))?;

    let per_partner_paging = correlated && paged;
    let mut projection = body.projection;
    if per_partner_paging {
        projection.push(SelectItem::ExprWithAlias {
            expr: row_number(&body.base, body.ordering.to_owned()),
            alias: Ident::quoted(ROW_NUMBER_COLUMN),
        });
    }
    let joins = emit_joins(ctx.schema, scope, body.accumulator.joins)?;
    let mut query = Query::new(projection)
        .from(vec![TableWithJoins {
            relation: body.base.table_factor(),
            joins,
        }])
        .predicate(
            body.accumulator
                .conditions
                .into_iter()
                .reduce(Expr::and),
        )
        .group_by(body.group_by);
    if !correlated && paged {
        query = query
            .order_by(body.ordering)
            .limit(sub_select.limit)
            .offset(sub_select.offset);
    }

    let base_column = Expr::column(&alias, BASE_COLUMN);
    let join = match &partner {
        Some(partner) => {
            let mut conditions = vec![];
            if per_partner_paging {
                let offset = sub_select.offset.unwrap_or(0);
                let row_number = Expr::column(&alias, ROW_NUMBER_COLUMN);
                if offset > 0 {
                    conditions.push(binary(row_number.to_owned(), BinaryOperator::Gt, offset));
                }
                if let Some(limit) = sub_select.limit {
                    conditions.push(binary(row_number, BinaryOperator::LtEq, offset + limit));
                }
            }
            let correlation = Expr::eq(
                base_column.to_owned(),
                Expr::column(&partner.alias, ID_COLUMN),
            );
            RdbmsJoin::new(
                &alias,
                RdbmsJoinKind::Query {
                    query: query.boxed(),
                    condition: Some(conjunction(correlation, &conditions)),
                },
                true,
            )
        }
        None => RdbmsJoin::new(
            &alias,
            RdbmsJoinKind::Query {
                query: query.boxed(),
                condition: None,
            },
            false,
        ),
    };
    tracing::debug!(
        sub_select = %sub_select.id,
        %alias,
        correlated,
        paged,
        aggregate = body.aggregate,
        "built navigation subselect"
    );
    ctx.register_sub_select(
        &sub_select.id,
        SubSelectBinding {
            alias: alias.to_owned(),
            columns: body.columns,
            order_columns: body.order_columns,
        },
    )?;
    Ok(CompiledSubSelect {
        join,
        condition: sub_select.exclude.then(|| Expr::IsNull(Box::new(base_column))),
    })
}

fn compile_body(
    ctx: &mut CompilationContext,
    sub_select: &SubSelect,
    correlated: bool,
) -> CompileResult<Body> {
    let base_alias = ctx.bind_node(&sub_select.id, &sub_select.base_type)?;
    let base = TableContext::try_from_type(&sub_select.base_type, &base_alias, ctx.schema)?;
    let mut accumulator = JoinAccumulator::default();
    let mut previous = sub_select.id.as_str();
    for step in &sub_select.navigation {
        let join = simple_join(
            ctx,
            previous,
            &step.id,
            &step.reference,
            &step.target_type,
            false,
            &[],
        )?;
        accumulator.joins.push(join);
        previous = step.id.as_str();
    }
    for step in &sub_select.navigation {
        for filter in &step.filters {
            accumulator
                .conditions
                .push(map_single(ctx, &filter.condition)?);
        }
    }

    let aggregate = sub_select.features.iter().any(Feature::is_aggregate);
    // an uncorrelated aggregate collapses into a single row
    let keyed = correlated || !aggregate;
    let base_id = base.column(ID_COLUMN);
    let mut projection = vec![];
    let mut group_by = vec![];
    if keyed {
        projection.push(SelectItem::ExprWithAlias {
            expr: base_id.to_owned(),
            alias: Ident::quoted(BASE_COLUMN),
        });
        if aggregate {
            group_by.push(base_id);
        }
    }
    let mut columns = vec![];
    for (index, feature) in sub_select.features.iter().enumerate() {
        let expr = map_single(ctx, feature)?;
        if aggregate && !feature.is_aggregate() {
            group_by.push(expr.to_owned());
        }
        let alias = feature_alias(index);
        projection.push(SelectItem::ExprWithAlias {
            expr,
            alias: Ident::quoted(&alias),
        });
        columns.push((alias, is_count(feature)));
    }

    let mut ordering = vec![];
    let mut order_columns = vec![];
    let last = sub_select.navigation.len().saturating_sub(1);
    for (hop, step) in sub_select.navigation.iter().enumerate() {
        for order in &step.order_by {
            let expr = map_single(ctx, &order.feature)?;
            // only the last hop's order is visible outside, and not through a grouping
            if hop == last && !aggregate {
                let alias = order_alias(order_columns.len());
                projection.push(SelectItem::ExprWithAlias {
                    expr: expr.to_owned(),
                    alias: Ident::quoted(&alias),
                });
                order_columns.push((alias, order.descending));
            }
            ordering.push(OrderByExpr {
                expr,
                asc: order.descending.then_some(false),
            });
        }
    }
    Ok(Body {
        base,
        accumulator,
        projection,
        group_by,
        ordering,
        columns,
        order_columns,
        aggregate,
    })
}

fn is_count(feature: &Feature) -> bool {
    matches!(
        feature,
        Feature::Function {
            signature: FunctionSignature::Count | FunctionSignature::CountDistinct,
            ..
        }
    )
}

fn row_number(base: &TableContext, order_by: Vec<OrderByExpr>) -> Expr {
    Expr::Function(Function {
        name: ObjectName(vec![Ident::unquoted("ROW_NUMBER")]),
        args: vec![],
        over: Some(WindowSpec {
            partition_by: vec![base.column(ID_COLUMN)],
            order_by,
        }),
    })
}

fn binary(left: Expr, op: BinaryOperator, right: u64) -> Expr {
    Expr::BinaryOp {
        left: Box::new(left),
        op,
        right: Box::new(Expr::number(right)),
    }
}
