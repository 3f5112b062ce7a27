use std::fmt;

use indexmap::IndexSet;

#[derive(Debug, Clone)]
pub struct Query {
    distinct: bool,
    projection: Vec<SelectItem>,
    from: Vec<TableWithJoins>,
    predicate: Option<Expr>,
    group_by: Vec<Expr>,
    order_by: Vec<OrderByExpr>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Query {
    pub fn new(projection: Vec<SelectItem>) -> Self {
        Self {
            distinct: false,
            projection,
            from: vec![],
            predicate: None,
            group_by: vec![],
            order_by: vec![],
            limit: None,
            offset: None,
        }
    }
    pub fn distinct(self, distinct: bool) -> Self {
        Self { distinct, ..self }
    }
    pub fn from(self, from: Vec<TableWithJoins>) -> Self {
        Self { from, ..self }
    }
    pub fn predicate(self, predicate: Option<Expr>) -> Self {
        Self { predicate, ..self }
    }
    pub fn group_by(self, group_by: Vec<Expr>) -> Self {
        Self { group_by, ..self }
    }
    pub fn order_by(self, order_by: Vec<OrderByExpr>) -> Self {
        Self { order_by, ..self }
    }
    pub fn limit(self, limit: Option<u64>) -> Self {
        Self { limit, ..self }
    }
    pub fn offset(self, offset: Option<u64>) -> Self {
        Self { offset, ..self }
    }
    pub fn boxed(self) -> Box<Self> {
        Box::new(self)
    }
    /// Table aliases referenced by qualified identifiers anywhere in this query.
    pub fn collect_qualifiers(&self, qualifiers: &mut IndexSet<String>) {
        for item in &self.projection {
            if let SelectItem::ExprWithAlias { expr, .. } | SelectItem::UnnamedExpr(expr) = item {
                expr.collect_qualifiers(qualifiers);
            }
        }
        for join in self.from.iter().flat_map(|table| &table.joins) {
            if let Some(on) = &join.on {
                on.collect_qualifiers(qualifiers);
            }
        }
        if let Some(predicate) = &self.predicate {
            predicate.collect_qualifiers(qualifiers);
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT ")?;
        if self.distinct {
            write!(f, "DISTINCT ")?;
        }
        write!(f, "{}", display_separated(&self.projection, ", "))?;
        if !self.from.is_empty() {
            write!(f, " FROM {}", display_separated(&self.from, ", "))?;
        }
        if let Some(predicate) = &self.predicate {
            write!(f, " WHERE {}", predicate)?;
        }
        if !self.group_by.is_empty() {
            write!(f, " GROUP BY {}", display_separated(&self.group_by, ", "))?;
        }
        if !self.order_by.is_empty() {
            write!(f, " ORDER BY {}", display_separated(&self.order_by, ", "))?;
        }
        if let Some(limit) = &self.limit {
            write!(f, " LIMIT {}", limit)?;
        }
        if let Some(offset) = &self.offset {
            write!(f, " OFFSET {}", offset)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct OrderByExpr {
    pub expr: Expr,
    pub asc: Option<bool>,
}

impl fmt::Display for OrderByExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        match self.asc {
            Some(true) => write!(f, " ASC")?,
            Some(false) => write!(f, " DESC")?,
            None => (),
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum SelectItem {
    UnnamedExpr(Expr),
    ExprWithAlias { expr: Expr, alias: Ident },
}

impl fmt::Display for SelectItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectItem::UnnamedExpr(expr) => write!(f, "{}", expr),
            SelectItem::ExprWithAlias { expr, alias } => write!(f, "{} AS {}", expr, alias),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableWithJoins {
    pub relation: TableFactor,
    pub joins: Vec<Join>,
}

impl fmt::Display for TableWithJoins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.relation)?;
        for join in &self.joins {
            write!(f, "{}", join)?;
        }
        Ok(())
    }
}

/// One `JOIN` clause. Only cross joins come without an `ON` condition.
#[derive(Debug, Clone)]
pub struct Join {
    pub operator: JoinOperator,
    pub relation: TableFactor,
    pub on: Option<Expr>,
}

impl Join {
    pub fn on(outer: bool, relation: TableFactor, on: Expr) -> Self {
        let operator = if outer {
            JoinOperator::LeftOuter
        } else {
            JoinOperator::Inner
        };
        Self {
            operator,
            relation,
            on: Some(on),
        }
    }
    pub fn cross(relation: TableFactor) -> Self {
        Self {
            operator: JoinOperator::Cross,
            relation,
            on: None,
        }
    }
}

impl fmt::Display for Join {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, " {} {}", self.operator, self.relation)?;
        match &self.on {
            Some(on) => write!(f, " ON {on}"),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOperator {
    Inner,
    LeftOuter,
    Cross,
}

impl fmt::Display for JoinOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JoinOperator::Inner => "INNER JOIN",
            JoinOperator::LeftOuter => "LEFT OUTER JOIN",
            JoinOperator::Cross => "CROSS JOIN",
        })
    }
}

/// Every relation in the generated SQL is aliased.
#[derive(Debug, Clone)]
pub enum TableFactor {
    Table { name: ObjectName, alias: Ident },
    Derived { subquery: Box<Query>, alias: Ident },
}

impl fmt::Display for TableFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableFactor::Table { name, alias } => write!(f, "{name} {alias}"),
            TableFactor::Derived { subquery, alias } => write!(f, "({subquery}) {alias}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObjectName(pub Vec<Ident>);

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", display_separated(&self.0, "."))
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    CompoundIdentifier(Vec<Ident>),
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },
    Value(Value),
    Function(Function),
    IsNull(Box<Expr>),
    Exists(Box<Query>),
    /// A positional template such as `MOD({0}, {1})`, filled with `args` when rendered.
    Template {
        template: String,
        args: Vec<Expr>,
    },
    /// Pre-rendered SQL. Only produced from resolved custom join fragments.
    Raw(String),
}

impl Expr {
    pub fn column(qualifier: &str, column: &str) -> Self {
        Expr::CompoundIdentifier(vec![Ident::quoted(qualifier), Ident::quoted(column)])
    }
    pub fn eq(left: Expr, right: Expr) -> Self {
        Expr::BinaryOp {
            left: Box::new(left),
            op: BinaryOperator::Eq,
            right: Box::new(right),
        }
    }
    pub fn and(left: Expr, right: Expr) -> Self {
        Expr::BinaryOp {
            left: Box::new(left),
            op: BinaryOperator::And,
            right: Box::new(right),
        }
    }
    pub fn number(value: impl ToString) -> Self {
        Expr::Value(Value::Number(value.to_string()))
    }

    /// Collects the first part of every compound identifier, i.e. the table aliases the
    /// expression depends on.
    pub fn collect_qualifiers(&self, qualifiers: &mut IndexSet<String>) {
        match self {
            Expr::CompoundIdentifier(idents) => {
                if let (Some(first), true) = (idents.first(), idents.len() > 1) {
                    qualifiers.insert(first.value().to_owned());
                }
            }
            Expr::BinaryOp { left, right, .. } => {
                left.collect_qualifiers(qualifiers);
                right.collect_qualifiers(qualifiers);
            }
            Expr::IsNull(expr) => expr.collect_qualifiers(qualifiers),
            Expr::Function(function) => {
                for arg in &function.args {
                    arg.collect_qualifiers(qualifiers);
                }
                if let Some(over) = &function.over {
                    for expr in &over.partition_by {
                        expr.collect_qualifiers(qualifiers);
                    }
                    for order in &over.order_by {
                        order.expr.collect_qualifiers(qualifiers);
                    }
                }
            }
            Expr::Template { args, .. } => {
                for arg in args {
                    arg.collect_qualifiers(qualifiers);
                }
            }
            Expr::Exists(query) => query.collect_qualifiers(qualifiers),
            Expr::Value(_) | Expr::Raw(_) => {}
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::CompoundIdentifier(idents) => write!(f, "{}", display_separated(idents, ".")),
            Expr::BinaryOp { left, op, right } => write!(f, "{} {} {}", left, op, right),
            Expr::Value(value) => write!(f, "{}", value),
            Expr::Function(function) => write!(f, "{}", function),
            Expr::IsNull(expr) => write!(f, "{expr} IS NULL"),
            Expr::Exists(query) => write!(f, "EXISTS ({})", query),
            Expr::Template { template, args } => write_template(f, template, args),
            Expr::Raw(sql) => write!(f, "{}", sql),
        }
    }
}

fn write_template(f: &mut fmt::Formatter<'_>, template: &str, args: &[Expr]) -> fmt::Result {
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let (head, tail) = rest.split_at(start);
        write!(f, "{}", head)?;
        let index = tail[1..]
            .find('}')
            .and_then(|end| tail[1..end + 1].parse::<usize>().ok().map(|i| (i, end)));
        match index {
            Some((index, end)) if index < args.len() => {
                write!(f, "{}", args[index])?;
                rest = &tail[end + 2..];
            }
            _ => {
                write!(f, "{{")?;
                rest = &tail[1..];
            }
        }
    }
    write!(f, "{}", rest)
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: ObjectName,
    pub args: Vec<Expr>,
    /// Makes this a window function.
    pub over: Option<WindowSpec>,
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name, display_separated(&self.args, ", "))?;
        if let Some(over) = &self.over {
            write!(f, " OVER ({})", over)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct WindowSpec {
    pub partition_by: Vec<Expr>,
    pub order_by: Vec<OrderByExpr>,
}

impl fmt::Display for WindowSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.partition_by.is_empty() {
            write!(
                f,
                "PARTITION BY {}",
                display_separated(&self.partition_by, ", ")
            )?;
        }
        if !self.order_by.is_empty() {
            if !self.partition_by.is_empty() {
                write!(f, " ")?;
            }
            write!(f, "ORDER BY {}", display_separated(&self.order_by, ", "))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum BinaryOperator {
    Gt,
    LtEq,
    Eq,
    And,
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinaryOperator::Gt => write!(f, ">"),
            BinaryOperator::LtEq => write!(f, "<="),
            BinaryOperator::Eq => write!(f, "="),
            BinaryOperator::And => write!(f, "AND"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    Number(String),
    SingleQuotedString(String),
    Placeholder(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::SingleQuotedString(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Placeholder(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    value: String,
    quoted: bool,
}

impl Ident {
    pub fn quoted<S: Into<String>>(value: S) -> Self {
        Self {
            value: value.into(),
            quoted: true,
        }
    }
    pub fn unquoted<S: Into<String>>(value: S) -> Self {
        Self {
            value: value.into(),
            quoted: false,
        }
    }
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.quoted {
            write!(f, "\"{}\"", self.value.replace('"', "\"\""))
        } else {
            write!(f, "{}", self.value)
        }
    }
}

pub struct DisplaySeparated<'a, T>
where
    T: fmt::Display,
{
    slice: &'a [T],
    separator: &'static str,
}

pub fn display_separated<'a, T>(
    slice: &'a [T],
    separator: &'static str,
) -> DisplaySeparated<'a, T>
where
    T: fmt::Display,
{
    DisplaySeparated { slice, separator }
}

impl<'a, T> fmt::Display for DisplaySeparated<'a, T>
where
    T: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for t in self.slice {
            if first {
                first = false;
            } else {
                write!(f, "{}", self.separator)?;
            }
            write!(f, "{}", t)?;
        }
        Ok(())
    }
}
