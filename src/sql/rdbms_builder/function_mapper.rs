//! Translates abstract function signatures into positional SQL patterns per dialect.
use std::borrow::Cow;

use dashmap::DashMap;

use crate::sql::{
    ast::{Expr, Ident, Value},
    catalog::Enumeration,
    dialect::Dialect,
    function_signature::{Arity, FunctionSignature},
};

use super::{CompileError, CompileResult, ID_COLUMN, TYPE_COLUMN};

/// A SQL template with `{n}` placeholders and the already mapped fragments filling them.
#[derive(Debug, Clone)]
pub struct SqlPattern {
    pub template: String,
    pub parameters: Vec<Expr>,
}

impl SqlPattern {
    pub fn into_expr(self) -> Expr {
        Expr::Template {
            template: self.template,
            args: self.parameters,
        }
    }
}

/// Storage a type predicate (`INSTANCE_OF`, `TYPE_OF`) checks against.
#[derive(Debug, Clone)]
pub struct TypePredicateTarget {
    pub table: String,
    pub alias: String,
}

#[derive(Debug, Clone, Default)]
pub struct FunctionOptions<'a> {
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub enumeration: Option<&'a Enumeration>,
    pub type_predicate: Option<TypePredicateTarget>,
}

/// Maps signatures to patterns. `ENUM_TO_STRING` ladders are built once per enumeration and
/// dialect and shared by every compilation using this mapper. Catalogs differ per request, so
/// ladders are keyed by the full literal list rather than the enumeration name.
#[derive(Debug, Default)]
pub struct FunctionMapper {
    enum_ladders: DashMap<(Enumeration, Dialect), String>,
}

impl FunctionMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `signature` has a mapping in `dialect`.
    pub fn supports(signature: FunctionSignature, dialect: Dialect) -> bool {
        match signature {
            FunctionSignature::EnumToString
            | FunctionSignature::InstanceOf
            | FunctionSignature::TypeOf => true,
            _ => template(signature, 1, dialect).is_ok(),
        }
    }

    pub fn map(
        &self,
        signature: FunctionSignature,
        parameters: Vec<Expr>,
        dialect: Dialect,
        options: &FunctionOptions,
    ) -> CompileResult<SqlPattern> {
        if let Arity::Variadic { min } = signature.arity() {
            if parameters.len() < min {
                return Err(CompileError::MissingFunctionParameter {
                    signature,
                    parameter: min.to_string(),
                });
            }
        }
        let template = match signature {
            FunctionSignature::EnumToString => {
                let enumeration = options.enumeration.ok_or_else(|| {
                    CompileError::MissingFunctionParameter {
                        signature,
                        parameter: "enumeration".to_owned(),
                    }
                })?;
                Cow::Owned(self.enum_ladder(enumeration, dialect)?)
            }
            FunctionSignature::InstanceOf | FunctionSignature::TypeOf => {
                let target = options.type_predicate.as_ref().ok_or_else(|| {
                    CompileError::MissingFunctionParameter {
                        signature,
                        parameter: "type".to_owned(),
                    }
                })?;
                Cow::Owned(type_predicate(signature, target))
            }
            _ => template(signature, parameters.len(), dialect)?,
        };
        let template = match (signature.is_decimal_arithmetic(), options.precision) {
            (true, Some(precision)) if signature != FunctionSignature::ToDecimal => format!(
                "CAST({} AS DECIMAL({}, {}))",
                template,
                precision,
                options.scale.unwrap_or(0)
            ),
            _ if signature == FunctionSignature::ToDecimal => match options.precision {
                Some(precision) => format!(
                    "CAST({{0}} AS DECIMAL({}, {}))",
                    precision,
                    options.scale.unwrap_or(0)
                ),
                None => "CAST({0} AS DECIMAL)".to_owned(),
            },
            _ => template.into_owned(),
        };
        Ok(SqlPattern {
            template,
            parameters,
        })
    }

    /// `CASE WHEN {0} = <literal> THEN '<name>' ... ELSE NULL END`, literals in declaration
    /// order, each comparison produced by the `EQUALS` mapping of the dialect.
    fn enum_ladder(&self, enumeration: &Enumeration, dialect: Dialect) -> CompileResult<String> {
        let key = (enumeration.clone(), dialect);
        if let Some(ladder) = self.enum_ladders.get(&key) {
            return Ok(ladder.value().clone());
        }
        let mut ladder = String::from("CASE");
        for literal in &enumeration.literals {
            let equals = self.map(
                FunctionSignature::Equals,
                vec![Expr::Raw("{0}".to_owned()), Expr::number(literal.value)],
                dialect,
                &FunctionOptions::default(),
            )?;
            ladder.push_str(&format!(
                " WHEN {} THEN {}",
                equals.into_expr(),
                Value::SingleQuotedString(literal.name.to_owned())
            ));
        }
        ladder.push_str(" ELSE NULL END");
        Ok(self
            .enum_ladders
            .entry(key)
            .or_insert(ladder)
            .value()
            .clone())
    }
}

fn type_predicate(signature: FunctionSignature, target: &TypePredicateTarget) -> String {
    let alias = Ident::quoted(&target.alias);
    let mut template = format!(
        "EXISTS (SELECT 1 FROM {} {} WHERE {}.{} = {{0}}",
        Ident::quoted(&target.table),
        alias,
        alias,
        Ident::quoted(ID_COLUMN),
    );
    if signature == FunctionSignature::TypeOf {
        template.push_str(&format!(" AND {}.{} = {{1}}", alias, Ident::quoted(TYPE_COLUMN)));
    }
    template.push(')');
    template
}

fn variadic(separator: &str, count: usize) -> String {
    (0..count)
        .map(|index| format!("{{{index}}}"))
        .collect::<Vec<_>>()
        .join(separator)
}

fn template(
    signature: FunctionSignature,
    count: usize,
    dialect: Dialect,
) -> CompileResult<Cow<'static, str>> {
    use Dialect::{Postgresql as PG, H2};
    use FunctionSignature as FS;
    let unsupported = || CompileError::UnsupportedFunction { signature, dialect };
    let template: &'static str = match (signature, dialect) {
        (FS::And, _) => return Ok(Cow::Owned(format!("({})", variadic(" AND ", count)))),
        (FS::Or, _) => return Ok(Cow::Owned(format!("({})", variadic(" OR ", count)))),
        (FS::Concat, _) => return Ok(Cow::Owned(format!("({})", variadic(" || ", count)))),
        (FS::Coalesce, _) => {
            return Ok(Cow::Owned(format!("COALESCE({})", variadic(", ", count))))
        }
        (FS::Not, _) => "(NOT {0})",
        (FS::Equals, _) => "({0} = {1})",
        (FS::NotEquals, _) => "({0} <> {1})",
        (FS::GreaterThan, _) => "({0} > {1})",
        (FS::GreaterThanOrEqual, _) => "({0} >= {1})",
        (FS::LessThan, _) => "({0} < {1})",
        (FS::LessThanOrEqual, _) => "({0} <= {1})",
        (FS::IsNull, _) => "({0} IS NULL)",
        (FS::IsNotNull, _) => "({0} IS NOT NULL)",
        (FS::Like, _) => "({0} LIKE {1})",
        (FS::LikeCaseInsensitive, PG) => "({0} ILIKE {1})",
        (FS::LikeCaseInsensitive, H2) => "(LOWER({0}) LIKE LOWER({1}))",
        (FS::AddInteger | FS::AddDecimal, _) => "({0} + {1})",
        (FS::SubtractInteger | FS::SubtractDecimal, _) => "({0} - {1})",
        (FS::MultiplyInteger | FS::MultiplyDecimal, _) => "({0} * {1})",
        (FS::DivideInteger | FS::DivideDecimal, _) => "({0} / {1})",
        (FS::ModuloInteger, _) if dialect.supports_modulo_operator() => "({0} % {1})",
        (FS::ModuloInteger, _) => "MOD({0},{1})",
        (FS::NegateInteger | FS::NegateDecimal, _) => "(-{0})",
        (FS::RoundDecimal, _) => "ROUND({0}, {1})",
        (FS::AbsDecimal, _) => "ABS({0})",
        (FS::FloorDecimal, _) => "FLOOR({0})",
        (FS::CeilDecimal, _) => "CEIL({0})",
        // precision and scale are applied by the caller
        (FS::ToDecimal, _) => "CAST({0} AS DECIMAL)",
        (FS::ToString, _) => {
            return Ok(Cow::Owned(format!("CAST({{0}} AS {})", dialect.text_type())))
        }
        (FS::StringToInteger, _) => "CAST({0} AS INTEGER)",
        (FS::Upper, _) => "UPPER({0})",
        (FS::Lower, _) => "LOWER({0})",
        (FS::Trim, _) => "TRIM({0})",
        (FS::Length, _) => "LENGTH({0})",
        (FS::Substring, _) => "SUBSTRING({0} FROM {1} FOR {2})",
        (FS::IndexOf, PG) => "POSITION({1} IN {0})",
        (FS::IndexOf, H2) => "LOCATE({1}, {0})",
        (FS::StartsWith, _) => "(LEFT({0}, LENGTH({1})) = {1})",
        (FS::EndsWith, _) => "(RIGHT({0}, LENGTH({1})) = {1})",
        (FS::Contains, PG) => "(POSITION({1} IN {0}) > 0)",
        (FS::Contains, H2) => "(LOCATE({1}, {0}) > 0)",
        (FS::MatchesRegex, PG) => "({0} ~ {1})",
        (FS::MatchesRegex, H2) => "REGEXP_LIKE({0}, {1})",
        (FS::Replace, _) => "REPLACE({0}, {1}, {2})",
        (FS::LeftPad, _) => "LPAD({0}, {1}, {2})",
        (FS::RightPad, _) => "RPAD({0}, {1}, {2})",
        (FS::CurrentDate, _) => "CURRENT_DATE",
        (FS::CurrentDateTime, _) => "CURRENT_TIMESTAMP",
        (FS::Date, PG) => "MAKE_DATE({0}, {1}, {2})",
        (FS::Date, H2) => "CAST(CONCAT(LPAD(CAST({0} AS VARCHAR), 4, '0'), '-', LPAD(CAST({1} AS VARCHAR), 2, '0'), '-', LPAD(CAST({2} AS VARCHAR), 2, '0')) AS DATE)",
        (FS::DateTime, PG) => "MAKE_TIMESTAMP({0}, {1}, {2}, {3}, {4}, {5})",
        (FS::DateTime, H2) => return Err(unsupported()),
        (FS::Year, _) => "EXTRACT(YEAR FROM {0})",
        (FS::Month, _) => "EXTRACT(MONTH FROM {0})",
        (FS::Day, _) => "EXTRACT(DAY FROM {0})",
        (FS::Hour, _) => "EXTRACT(HOUR FROM {0})",
        (FS::Minute, _) => "EXTRACT(MINUTE FROM {0})",
        (FS::Second, _) => "EXTRACT(SECOND FROM {0})",
        (FS::DayOfWeek, PG) => "EXTRACT(ISODOW FROM {0})",
        (FS::DayOfWeek, H2) => "ISO_DAY_OF_WEEK({0})",
        (FS::DateOf, _) => "CAST({0} AS DATE)",
        (FS::LastDayOfMonth, PG) => return Err(unsupported()),
        (FS::LastDayOfMonth, H2) => "LAST_DAY({0})",
        (FS::DifferenceDays, PG) => "(CAST({1} AS DATE) - CAST({0} AS DATE))",
        (FS::DifferenceDays, H2) => "DATEDIFF(DAY, {0}, {1})",
        (FS::DifferenceHours, PG) => "FLOOR(EXTRACT(EPOCH FROM ({1} - {0})) / 3600)",
        (FS::DifferenceHours, H2) => "DATEDIFF(HOUR, {0}, {1})",
        (FS::DifferenceMinutes, PG) => "FLOOR(EXTRACT(EPOCH FROM ({1} - {0})) / 60)",
        (FS::DifferenceMinutes, H2) => "DATEDIFF(MINUTE, {0}, {1})",
        (FS::DifferenceSeconds, PG) => "FLOOR(EXTRACT(EPOCH FROM ({1} - {0})))",
        (FS::DifferenceSeconds, H2) => "DATEDIFF(SECOND, {0}, {1})",
        (FS::DifferenceMonths, PG) => {
            "(EXTRACT(YEAR FROM AGE({1}, {0})) * 12 + EXTRACT(MONTH FROM AGE({1}, {0})))"
        }
        (FS::DifferenceMonths, H2) => "DATEDIFF(MONTH, {0}, {1})",
        (FS::DifferenceYears, PG) => "EXTRACT(YEAR FROM AGE({1}, {0}))",
        (FS::DifferenceYears, H2) => "DATEDIFF(YEAR, {0}, {1})",
        (FS::AddDate, _) if dialect.supports_interval_arithmetic() => {
            "({0} + {1} * INTERVAL '1 day')"
        }
        (FS::AddDate, _) => "TIMESTAMPADD(DAY, {1}, {0})",
        (FS::AddDateTime, _) if dialect.supports_interval_arithmetic() => {
            "({0} + {1} * INTERVAL '1 second')"
        }
        (FS::AddDateTime, _) => "TIMESTAMPADD(SECOND, {1}, {0})",
        (FS::AddMonths, _) if dialect.supports_interval_arithmetic() => {
            "({0} + {1} * INTERVAL '1 month')"
        }
        (FS::AddMonths, _) => "TIMESTAMPADD(MONTH, {1}, {0})",
        (FS::Count, _) => "COUNT({0})",
        (FS::CountDistinct, _) => "COUNT(DISTINCT {0})",
        (FS::Sum, _) => "SUM({0})",
        (FS::Average, _) => "AVG({0})",
        (FS::Minimum, _) => "MIN({0})",
        (FS::Maximum, _) => "MAX({0})",
        (FS::CaseWhen, _) => "CASE WHEN {0} THEN {1} ELSE {2} END",
        (FS::Undefined, _) => "NULL",
        (FS::EnumToString | FS::InstanceOf | FS::TypeOf, _) => {
            return Err(CompileError::Internal(format!(
                "{signature} has no fixed pattern"
            )))
        }
    };
    Ok(Cow::Borrowed(template))
}
