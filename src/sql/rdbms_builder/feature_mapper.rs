//! Turns logical features into physical SQL expressions.
use indexmap::IndexMap;
use serde_json::Value;

use crate::sql::{
    ast::{self, Expr},
    catalog::Enumeration,
    function_signature::{Arity, FunctionSignature},
    query_graph::{Feature, Projection, Select, PARAMETER_CATEGORY},
};

use super::{
    aliasing::{ancestor_alias, column_alias, feature_alias, TYPE_PREDICATE_PREFIX},
    context::CompilationContext,
    function_mapper::{FunctionOptions, TypePredicateTarget},
    CompileError, CompileResult, ID_COLUMN, TYPE_METADATA_COLUMNS,
};

/// One physical column produced by a feature. `column` names the part of a multi column
/// feature, `None` for single column features.
#[derive(Debug, Clone)]
pub struct PhysicalField {
    pub column: Option<&'static str>,
    pub expr: Expr,
}

impl PhysicalField {
    fn single(expr: Expr) -> Self {
        Self { column: None, expr }
    }
}

/// A projected output column.
#[derive(Debug, Clone)]
pub struct ProjectedField {
    pub alias: String,
    pub expr: Expr,
    pub aggregate: bool,
}

pub fn map_feature(
    ctx: &mut CompilationContext,
    feature: &Feature,
) -> CompileResult<Vec<PhysicalField>> {
    match feature {
        Feature::Attribute {
            node,
            type_name,
            attribute,
        } => {
            let expr = map_attribute(ctx, node, type_name.as_deref(), attribute)?;
            Ok(vec![PhysicalField::single(expr)])
        }
        Feature::IdAttribute { node } => {
            let (scope, node, binding) = ctx.resolve_node(node)?;
            for supertype in ctx.metamodel.supertypes(&binding.type_name)? {
                ctx.require_ancestor(scope, &node, &supertype);
            }
            Ok(vec![PhysicalField::single(Expr::column(&binding.alias, ID_COLUMN))])
        }
        Feature::TypeAttribute { node } => {
            let (scope, node, binding) = ctx.resolve_node(node)?;
            let supertypes = ctx.metamodel.supertypes(&binding.type_name)?;
            for supertype in &supertypes {
                ctx.require_ancestor(scope, &node, supertype);
            }
            // metadata lives on the hierarchy root
            let qualifier = match supertypes.last() {
                Some(root) => {
                    ancestor_alias(&binding.alias, &ctx.schema.ancestor_postfix(root)?)
                }
                None => binding.alias,
            };
            Ok(TYPE_METADATA_COLUMNS
                .iter()
                .map(|column| PhysicalField {
                    column: Some(*column),
                    expr: Expr::column(&qualifier, column),
                })
                .collect())
        }
        Feature::Constant {
            key,
            value,
            enumeration,
        } => {
            let value = match enumeration {
                Some(name) => {
                    coerce_constant(ctx.metamodel.require_enumeration(name)?, value)?
                }
                None => value.to_owned(),
            };
            let parameter = match key {
                Some(key) => ctx.parameters.bind_memoized(key, value),
                None => ctx.parameters.bind(value),
            };
            Ok(vec![PhysicalField::single(placeholder(&parameter))])
        }
        Feature::Variable {
            key,
            category,
            name,
            enumeration,
        } => {
            let value = resolve_variable(ctx, category, name, enumeration.as_deref())?;
            let identity = key
                .to_owned()
                .unwrap_or_else(|| format!("variable:{category}:{name}"));
            let parameter = ctx.parameters.bind_memoized(&identity, value);
            Ok(vec![PhysicalField::single(placeholder(&parameter))])
        }
        Feature::Function {
            signature,
            parameters,
            enumeration,
            precision,
            scale,
        } => {
            let metamodel = ctx.metamodel;
            let mut options = FunctionOptions {
                precision: *precision,
                scale: *scale,
                ..Default::default()
            };
            if let Some(name) = enumeration {
                options.enumeration = Some(metamodel.require_enumeration(name)?);
            }
            if matches!(signature, FunctionSignature::InstanceOf | FunctionSignature::TypeOf) {
                options.type_predicate =
                    Some(type_predicate_target(ctx, *signature, parameters)?);
            }
            let arguments = match signature.arity() {
                Arity::Named(names) => names
                    .iter()
                    .map(|name| {
                        parameters.get(*name).ok_or_else(|| {
                            CompileError::MissingFunctionParameter {
                                signature: *signature,
                                parameter: (*name).to_owned(),
                            }
                        })
                    })
                    .collect::<CompileResult<Vec<_>>>()?,
                Arity::Variadic { .. } => parameters.values().collect(),
            };
            let arguments = arguments
                .into_iter()
                .map(|argument| map_single(ctx, argument))
                .collect::<CompileResult<Vec<_>>>()?;
            let pattern = ctx.functions.map(*signature, arguments, ctx.dialect, &options)?;
            Ok(vec![PhysicalField::single(pattern.into_expr())])
        }
        Feature::EntityTypeName { type_name } => {
            let name = ctx.metamodel.require_type(type_name)?.name.to_owned();
            let parameter = ctx
                .parameters
                .bind_memoized(&format!("type:{name}"), Value::String(name));
            Ok(vec![PhysicalField::single(placeholder(&parameter))])
        }
        Feature::SubSelect {
            sub_select,
            feature,
        } => {
            let binding = ctx.resolve_sub_select(sub_select)?;
            let (column, is_count) = binding.columns.get(*feature).ok_or_else(|| {
                CompileError::Internal(format!(
                    "Subselect {sub_select} has no feature {feature}"
                ))
            })?;
            let expr = Expr::column(&binding.alias, column);
            let expr = if *is_count {
                // an empty group reads as zero
                Expr::Template {
                    template: "COALESCE({0}, 0)".to_owned(),
                    args: vec![expr],
                }
            } else {
                expr
            };
            Ok(vec![PhysicalField::single(expr)])
        }
    }
}

/// Maps a feature that must produce exactly one column, e.g. a function argument or filter.
pub fn map_single(ctx: &mut CompilationContext, feature: &Feature) -> CompileResult<Expr> {
    let mut fields = map_feature(ctx, feature)?;
    match (fields.pop(), fields.is_empty()) {
        (Some(field), true) => Ok(field.expr),
        (field, _) => Err(CompileError::FeatureArity(
            fields.len() + usize::from(field.is_some()),
        )),
    }
}

/// Maps the projected features of `select`, once per bound target or once under a positional
/// alias when the projection has no bindings.
pub fn map_projections(
    ctx: &mut CompilationContext,
    select: &Select,
) -> CompileResult<Vec<ProjectedField>> {
    let mut projected = vec![];
    for (index, Projection { feature, bindings }) in select.features.iter().enumerate() {
        let aggregate = feature.is_aggregate();
        if bindings.is_empty() {
            let alias = feature_alias(index);
            for field in map_feature(ctx, feature)? {
                projected.push(ProjectedField {
                    alias: column_alias(&alias, field.column),
                    expr: field.expr,
                    aggregate,
                });
            }
            continue;
        }
        for binding in bindings {
            let target = select
                .targets
                .iter()
                .find(|target| target.id == binding.target)
                .ok_or_else(|| CompileError::UnknownNode(binding.target.to_owned()))?;
            ctx.set_redirect(Some((select.id.to_owned(), target.node.to_owned())))?;
            let fields = map_feature(ctx, feature);
            ctx.set_redirect(None)?;
            for field in fields? {
                projected.push(ProjectedField {
                    alias: column_alias(&binding.alias, field.column),
                    expr: field.expr,
                    aggregate,
                });
            }
        }
    }
    Ok(projected)
}

fn map_attribute(
    ctx: &mut CompilationContext,
    node: &str,
    type_name: Option<&str>,
    attribute: &str,
) -> CompileResult<Expr> {
    let (scope, node, binding) = ctx.resolve_node(node)?;
    let definition = ctx
        .metamodel
        .find_attribute(type_name.unwrap_or(&binding.type_name), attribute)?;
    let column = ctx.schema.column_name(definition);
    let declaring_type = definition.declaring_type.to_owned();
    if declaring_type == binding.type_name {
        return Ok(Expr::column(&binding.alias, &column));
    }
    if !ctx.metamodel.supertypes(&binding.type_name)?.contains(&declaring_type) {
        return Err(CompileError::AncestorResolution {
            type_name: binding.type_name,
            declaring_type,
        });
    }
    ctx.require_ancestor(scope, &node, &declaring_type);
    let qualifier = ancestor_alias(&binding.alias, &ctx.schema.ancestor_postfix(&declaring_type)?);
    Ok(Expr::column(&qualifier, &column))
}

fn type_predicate_target(
    ctx: &CompilationContext,
    signature: FunctionSignature,
    parameters: &IndexMap<String, Feature>,
) -> CompileResult<TypePredicateTarget> {
    let type_name = match parameters.get("type") {
        Some(Feature::EntityTypeName { type_name }) => type_name,
        Some(_) => {
            return Err(CompileError::Unsupported(format!(
                "{signature} requires an entity type name as its type"
            )))
        }
        None => {
            return Err(CompileError::MissingFunctionParameter {
                signature,
                parameter: "type".to_owned(),
            })
        }
    };
    let checked_type = match signature {
        FunctionSignature::TypeOf => ctx.metamodel.root_type(type_name)?,
        _ => type_name.to_owned(),
    };
    Ok(TypePredicateTarget {
        table: ctx.schema.table_name(&checked_type)?,
        alias: ctx.aliases.next(TYPE_PREDICATE_PREFIX),
    })
}

/// Named parameters carry enumeration values as literal positions, other categories carry
/// literal names.
fn resolve_variable(
    ctx: &CompilationContext,
    category: &str,
    name: &str,
    enumeration: Option<&str>,
) -> CompileResult<Value> {
    let unresolved = || CompileError::UnresolvedVariable {
        category: category.to_owned(),
        name: name.to_owned(),
    };
    if category == PARAMETER_CATEGORY {
        let value = ctx.parameter_bag.get(name).cloned().ok_or_else(unresolved)?;
        return match enumeration {
            Some(enumeration) => {
                let enumeration = ctx.metamodel.require_enumeration(enumeration)?;
                value
                    .as_u64()
                    .and_then(|position| enumeration.literals.get(position as usize))
                    .map(|literal| Value::from(literal.value))
                    .ok_or_else(|| invalid_literal(enumeration, &value))
            }
            None => Ok(value),
        };
    }
    let value = ctx.variables.resolve(category, name).ok_or_else(unresolved)?;
    match enumeration {
        Some(enumeration) => {
            let enumeration = ctx.metamodel.require_enumeration(enumeration)?;
            value
                .as_str()
                .and_then(|literal| enumeration.literal_by_name(literal))
                .map(|literal| Value::from(literal.value))
                .ok_or_else(|| invalid_literal(enumeration, &value))
        }
        None => Ok(value),
    }
}

fn coerce_constant(enumeration: &Enumeration, value: &Value) -> CompileResult<Value> {
    let literal = match value {
        Value::String(name) => enumeration.literal_by_name(name),
        Value::Number(number) => enumeration
            .literals
            .iter()
            .find(|literal| number.as_i64() == Some(literal.value)),
        _ => None,
    };
    literal
        .map(|literal| Value::from(literal.value))
        .ok_or_else(|| invalid_literal(enumeration, value))
}

fn invalid_literal(enumeration: &Enumeration, value: &Value) -> CompileError {
    CompileError::InvalidEnumerationValue {
        enumeration: enumeration.name.to_owned(),
        value: value.to_string(),
    }
}

fn placeholder(parameter: &str) -> Expr {
    Expr::Value(ast::Value::Placeholder(format!(":{parameter}")))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::sql::{
        catalog::Catalog,
        dialect::Dialect,
        rdbms_builder::{aliasing::ROOT_PREFIX, context::Variables, function_mapper::FunctionMapper},
    };

    fn catalog() -> Catalog {
        Catalog::default()
            .with_type("Base", None, "base")
            .with_type("Mid", Some("Base"), "mid")
            .with_type("Leaf", Some("Mid"), "leaf")
            .with_type("Other", None, "other")
            .with_attribute("Base", "name", "name")
            .with_attribute("Mid", "rank", "rank")
            .with_attribute("Leaf", "weight", "weight")
            .with_attribute("Other", "label", "label")
            .with_enumeration("Status", &[("OPEN", 10), ("DONE", 20)])
    }

    struct Fixture {
        catalog: Catalog,
        functions: FunctionMapper,
        parameters: IndexMap<String, Value>,
        variables: Variables,
    }

    impl Fixture {
        fn new() -> Self {
            let mut variables = Variables::new();
            variables
                .entry("USER".to_owned())
                .or_default()
                .insert("status".to_owned(), json!("DONE"));
            Self {
                catalog: catalog(),
                functions: FunctionMapper::new(),
                parameters: IndexMap::from([("status".to_owned(), json!(1))]),
                variables,
            }
        }
        fn context(&self) -> CompilationContext<'_> {
            let mut ctx = CompilationContext::new(
                Dialect::Postgresql,
                &self.catalog,
                &self.catalog,
                &self.functions,
                &self.parameters,
                &self.variables,
            );
            ctx.push_scope(ROOT_PREFIX, true);
            ctx.bind_node("leaf", "Leaf").unwrap();
            ctx
        }
    }

    #[test]
    fn inherited_attribute_reads_the_ancestor_alias() {
        let fixture = Fixture::new();
        let mut ctx = fixture.context();
        let expr = map_single(&mut ctx, &Feature::attribute("leaf", "name")).unwrap();
        assert_eq!(expr.to_string(), r#""t0_base"."name""#);
        let own = map_single(&mut ctx, &Feature::attribute("leaf", "weight")).unwrap();
        assert_eq!(own.to_string(), r#""t0"."weight""#);
        let ancestors = ctx.current_scope().unwrap().ancestors.get("leaf").cloned();
        assert_eq!(
            ancestors.unwrap().into_iter().collect::<Vec<_>>(),
            vec!["Base".to_owned()]
        );
    }

    #[test]
    fn attribute_of_an_unrelated_type_is_an_ancestor_resolution_error() {
        let fixture = Fixture::new();
        let mut ctx = fixture.context();
        let feature = Feature::Attribute {
            node: "leaf".to_owned(),
            type_name: Some("Other".to_owned()),
            attribute: "label".to_owned(),
        };
        assert_eq!(
            map_single(&mut ctx, &feature).unwrap_err(),
            CompileError::AncestorResolution {
                type_name: "Leaf".to_owned(),
                declaring_type: "Other".to_owned(),
            }
        );
    }

    #[test]
    fn type_attribute_yields_eight_metadata_columns_from_the_root_table() {
        let fixture = Fixture::new();
        let mut ctx = fixture.context();
        let fields = map_feature(
            &mut ctx,
            &Feature::TypeAttribute {
                node: "leaf".to_owned(),
            },
        )
        .unwrap();
        assert_eq!(fields.len(), 8);
        assert_eq!(fields[0].column, Some("type_name"));
        assert_eq!(fields[0].expr.to_string(), r#""t0_base"."type_name""#);
        let ancestors = ctx.current_scope().unwrap().ancestors.get("leaf").cloned().unwrap();
        assert_eq!(ancestors.len(), 2);
        assert!(matches!(
            map_single(&mut ctx, &Feature::TypeAttribute { node: "leaf".to_owned() }),
            Err(CompileError::FeatureArity(8))
        ));
    }

    #[test]
    fn constants_with_a_shared_key_bind_one_parameter() {
        let fixture = Fixture::new();
        let mut ctx = fixture.context();
        let constant = Feature::Constant {
            key: Some("c".to_owned()),
            value: json!(5),
            enumeration: None,
        };
        let first = map_single(&mut ctx, &constant).unwrap();
        let second = map_single(&mut ctx, &constant).unwrap();
        let anonymous = map_single(&mut ctx, &Feature::constant(json!(5))).unwrap();
        assert_eq!(first.to_string(), ":p1");
        assert_eq!(second.to_string(), ":p1");
        assert_eq!(anonymous.to_string(), ":p2");
    }

    #[test]
    fn parameter_variables_index_literals_by_position() {
        let fixture = Fixture::new();
        let mut ctx = fixture.context();
        let variable = Feature::Variable {
            key: None,
            category: PARAMETER_CATEGORY.to_owned(),
            name: "status".to_owned(),
            enumeration: Some("Status".to_owned()),
        };
        map_single(&mut ctx, &variable).unwrap();
        assert_eq!(ctx.parameters.into_values()["p1"], json!(20));
    }

    #[test]
    fn resolver_variables_match_literals_by_name() {
        let fixture = Fixture::new();
        let mut ctx = fixture.context();
        let variable = Feature::Variable {
            key: None,
            category: "USER".to_owned(),
            name: "status".to_owned(),
            enumeration: Some("Status".to_owned()),
        };
        map_single(&mut ctx, &variable).unwrap();
        assert_eq!(ctx.parameters.into_values()["p1"], json!(20));
    }

    #[test]
    fn unknown_variables_are_errors() {
        let fixture = Fixture::new();
        let mut ctx = fixture.context();
        let variable = Feature::Variable {
            key: None,
            category: "USER".to_owned(),
            name: "missing".to_owned(),
            enumeration: None,
        };
        assert!(matches!(
            map_single(&mut ctx, &variable),
            Err(CompileError::UnresolvedVariable { .. })
        ));
    }

    #[test]
    fn functions_map_named_parameters_in_declared_order() {
        let fixture = Fixture::new();
        let mut ctx = fixture.context();
        let feature = Feature::Function {
            signature: FunctionSignature::Like,
            parameters: IndexMap::from([
                ("pattern".to_owned(), Feature::constant(json!("a%"))),
                ("value".to_owned(), Feature::attribute("leaf", "weight")),
            ]),
            enumeration: None,
            precision: None,
            scale: None,
        };
        let expr = map_single(&mut ctx, &feature).unwrap();
        assert_eq!(expr.to_string(), r#"("t0"."weight" LIKE :p1)"#);
    }

    #[test]
    fn missing_function_parameters_are_named() {
        let fixture = Fixture::new();
        let mut ctx = fixture.context();
        let feature = Feature::function(
            FunctionSignature::Equals,
            [("left", Feature::attribute("leaf", "weight"))],
        );
        assert_eq!(
            map_single(&mut ctx, &feature).unwrap_err(),
            CompileError::MissingFunctionParameter {
                signature: FunctionSignature::Equals,
                parameter: "right".to_owned(),
            }
        );
    }

    #[test]
    fn instance_of_checks_the_named_type_table() {
        let fixture = Fixture::new();
        let mut ctx = fixture.context();
        let feature = Feature::function(
            FunctionSignature::InstanceOf,
            [
                ("object", Feature::IdAttribute { node: "leaf".to_owned() }),
                (
                    "type",
                    Feature::EntityTypeName {
                        type_name: "Mid".to_owned(),
                    },
                ),
            ],
        );
        let expr = map_single(&mut ctx, &feature).unwrap();
        assert_eq!(
            expr.to_string(),
            r#"EXISTS (SELECT 1 FROM "mid" "i1" WHERE "i1"."id" = "t0"."id")"#
        );
    }
}
