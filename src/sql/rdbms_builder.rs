use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use super::{
    ast::{Expr, Ident, OrderByExpr, Query, SelectItem, TableWithJoins},
    catalog::{Metamodel, SchemaResolver},
    dialect::Dialect,
    query_graph::{OrderBy, Select},
};

pub mod aliasing;
pub mod context;
mod custom_join;
mod error;
pub mod feature_mapper;
pub mod function_mapper;
mod join_ordering;
mod join_processor;
mod rdbms_join;
mod sub_select;
mod table_context;

use self::{
    aliasing::ROOT_PREFIX,
    context::{CompilationContext, VariableResolver},
    feature_mapper::{map_projections, map_single},
    function_mapper::FunctionMapper,
    join_processor::{emit_joins, process_joins, JoinAccumulator},
    table_context::TableContext,
};
pub use error::{CompileError, CompileResult};

/// Identity column shared by every level of a type hierarchy.
pub const ID_COLUMN: &str = "id";
/// Discriminator column on the hierarchy root.
pub const TYPE_COLUMN: &str = "type_name";
/// Columns read by a type metadata access, all stored on the hierarchy root.
pub const TYPE_METADATA_COLUMNS: [&str; 8] = [
    TYPE_COLUMN,
    "version",
    "created_by",
    "created_by_id",
    "created_at",
    "updated_by",
    "updated_by_id",
    "updated_at",
];

#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub sql: String,
    /// Bound values by parameter name, `:p1` in the SQL binds `p1`.
    pub parameters: IndexMap<String, Value>,
    /// Output column aliases in projection order.
    pub columns: Vec<String>,
}

/// Compiles logical query graphs into SQL for one dialect. Cheap to clone; clones share the
/// function mapper and its enumeration ladders.
#[derive(Debug, Clone, Default)]
pub struct RdbmsBuilder {
    dialect: Dialect,
    functions: Arc<FunctionMapper>,
}

impl RdbmsBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self::with_functions(dialect, Arc::new(FunctionMapper::new()))
    }
    pub fn with_functions(dialect: Dialect, functions: Arc<FunctionMapper>) -> Self {
        Self { dialect, functions }
    }
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }
    pub fn build_sql_statement(
        &self,
        select: &Select,
        metamodel: &dyn Metamodel,
        schema: &dyn SchemaResolver,
        parameters: &IndexMap<String, Value>,
        variables: &dyn VariableResolver,
    ) -> CompileResult<CompiledQuery> {
        let mut ctx = CompilationContext::new(
            self.dialect,
            metamodel,
            schema,
            &self.functions,
            parameters,
            variables,
        );
        let (query, columns) = root_query(&mut ctx, select)?;
        let sql = query.to_string();
        tracing::debug!(dialect = %self.dialect, %sql, "compiled query");
        Ok(CompiledQuery {
            sql,
            parameters: ctx.parameters.into_values(),
            columns,
        })
    }
}

struct RootBody {
    table: TableContext,
    accumulator: JoinAccumulator,
    projection: Vec<SelectItem>,
    columns: Vec<String>,
    group_by: Vec<Expr>,
    order_by: Vec<OrderByExpr>,
}

fn root_query(
    ctx: &mut CompilationContext,
    select: &Select,
) -> CompileResult<(Query, Vec<String>)> {
    let (body, scope) = ctx.scoped(ROOT_PREFIX, true, |ctx| root_body(ctx, select))?;
    let joins = emit_joins(ctx.schema, scope, body.accumulator.joins)?;
    let query = Query::new(body.projection)
        .distinct(select.distinct)
        .from(vec![TableWithJoins {
            relation: body.table.table_factor(),
            joins,
        }])
        .predicate(body.accumulator.conditions.into_iter().reduce(Expr::and))
        .group_by(body.group_by)
        .order_by(body.order_by)
        .limit(select.limit)
        .offset(select.offset);
    Ok((query, body.columns))
}

fn root_body(ctx: &mut CompilationContext, select: &Select) -> CompileResult<RootBody> {
    let alias = ctx.bind_node(&select.id, &select.source_type)?;
    let table = TableContext::try_from_type(&select.source_type, &alias, ctx.schema)?;

    let mut accumulator = JoinAccumulator::default();
    process_joins(ctx, &select.id, &select.joins, &mut accumulator)?;
    for sub_select in &select.sub_selects {
        let compiled = sub_select::build(ctx, sub_select, None)?;
        accumulator.push_sub_select(compiled);
    }
    accumulator.map_pending_filters(ctx)?;
    for filter in &select.filters {
        accumulator
            .conditions
            .push(map_single(ctx, &filter.condition)?);
    }

    let projected = map_projections(ctx, select)?;
    if projected.is_empty() {
        return Err(CompileError::EmptyProjection(select.id.to_owned()));
    }
    let group_by = if projected.iter().any(|field| field.aggregate) {
        projected
            .iter()
            .filter(|field| !field.aggregate)
            .map(|field| field.expr.to_owned())
            .collect()
    } else {
        vec![]
    };
    let columns = projected.iter().map(|field| field.alias.to_owned()).collect();
    let projection = projected
        .into_iter()
        .map(|field| SelectItem::ExprWithAlias {
            expr: field.expr,
            alias: Ident::quoted(field.alias),
        })
        .collect();

    let mut order_by = vec![];
    for order in &select.order_by {
        match order {
            OrderBy::Feature {
                feature,
                descending,
            } => order_by.push(OrderByExpr {
                expr: map_single(ctx, feature)?,
                asc: descending.then_some(false),
            }),
            OrderBy::SubSelect { sub_select } => {
                let binding = ctx.resolve_sub_select(sub_select)?;
                order_by.extend(binding.order_columns.iter().map(|(column, descending)| {
                    OrderByExpr {
                        expr: Expr::column(&binding.alias, column),
                        asc: descending.then_some(false),
                    }
                }));
            }
        }
    }

    Ok(RootBody {
        table,
        accumulator,
        projection,
        columns,
        group_by,
        order_by,
    })
}
