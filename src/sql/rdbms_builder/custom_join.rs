//! Driver supplied join conditions with backtick delimited identifier placeholders.
//!
//! `` `$this` `` and `` `$partner` `` name the joined and the partner table, `` `$<node>` `` any
//! other node in scope, `` `Type` `` a type's table and `` `Type.member` `` the column behind an
//! attribute or a foreign key reference.
use indexmap::IndexSet;

use crate::sql::{
    ast::Ident,
    catalog::{Metamodel, ReferenceMapping, SchemaResolver},
};

use super::{context::CompilationContext, CompileError, CompileResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    Placeholder(&'a str),
}

peg::parser! {
    grammar custom_join_sql() for str {
        pub rule segments() -> Vec<Segment<'input>>
            = segments:segment()* ![_] { segments }

        rule segment() -> Segment<'input>
            = placeholder() / text()

        rule placeholder() -> Segment<'input>
            = "`" name:$([^ '`']*) "`" { Segment::Placeholder(name) }

        rule text() -> Segment<'input>
            = text:$([^ '`']+) { Segment::Text(text) }
    }
}

/// Splits `sql` into text and placeholders. An unterminated placeholder fails at the offset the
/// parser stopped at.
pub fn parse(sql: &str) -> CompileResult<Vec<Segment<'_>>> {
    custom_join_sql::segments(sql).map_err(|error| CompileError::MalformedCustomJoin {
        sql: sql.to_owned(),
        offset: error.location.offset,
    })
}

/// A custom join condition with every placeholder substituted.
#[derive(Debug, Clone)]
pub struct ResolvedCondition {
    pub sql: String,
    /// Aliases the condition names.
    pub dependencies: IndexSet<String>,
}

pub fn resolve(
    ctx: &CompilationContext,
    sql: &str,
    this_alias: &str,
    partner_alias: &str,
) -> CompileResult<ResolvedCondition> {
    let mut resolved = String::with_capacity(sql.len());
    let mut dependencies = IndexSet::from([partner_alias.to_owned()]);
    for segment in parse(sql)? {
        match segment {
            Segment::Text(text) => resolved.push_str(text),
            Segment::Placeholder("$this") => {
                resolved.push_str(&Ident::quoted(this_alias).to_string())
            }
            Segment::Placeholder("$partner") => {
                resolved.push_str(&Ident::quoted(partner_alias).to_string())
            }
            Segment::Placeholder(name) => match name.strip_prefix('$') {
                Some(node) => {
                    let (_, _, binding) = ctx
                        .resolve_node(node)
                        .map_err(|_| CompileError::UnresolvedIdentifier(name.to_owned()))?;
                    resolved.push_str(&Ident::quoted(&binding.alias).to_string());
                    dependencies.insert(binding.alias);
                }
                None => {
                    let physical = resolve_identifier(ctx.metamodel, ctx.schema, name)?;
                    resolved.push_str(&Ident::quoted(physical).to_string());
                }
            },
        }
    }
    dependencies.shift_remove(this_alias);
    Ok(ResolvedCondition {
        sql: resolved,
        dependencies,
    })
}

/// Physical table or column name behind a qualified logical name.
fn resolve_identifier(
    metamodel: &dyn Metamodel,
    schema: &dyn SchemaResolver,
    name: &str,
) -> CompileResult<String> {
    let unresolved = || CompileError::UnresolvedIdentifier(name.to_owned());
    let Some((type_name, member)) = name.split_once('.') else {
        return metamodel
            .type_definition(name)
            .ok_or_else(unresolved)
            .and_then(|definition| schema.table_name(&definition.name));
    };
    metamodel.type_definition(type_name).ok_or_else(unresolved)?;
    if let Ok(attribute) = metamodel.find_attribute(type_name, member) {
        return Ok(schema.column_name(attribute));
    }
    let reference = metamodel
        .find_reference(type_name, member)
        .map_err(|_| unresolved())?;
    match schema.reference_mapping(reference) {
        ReferenceMapping::OwnerFk { column } | ReferenceMapping::InverseFk { column } => {
            Ok(column.to_owned())
        }
        ReferenceMapping::JoinTable { .. } => Err(unresolved()),
    }
}
