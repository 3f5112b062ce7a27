use crate::sql::{
    ast::{Expr, Ident, ObjectName, TableFactor},
    catalog::SchemaResolver,
};

use super::CompileResult;

/// Physical storage of one type level as seen under one alias.
#[derive(Debug, Clone)]
pub struct TableContext {
    table_name: String,
    pub table_alias: String,
}

impl TableContext {
    pub fn try_from_type(
        type_name: &str,
        table_alias: &str,
        schema: &dyn SchemaResolver,
    ) -> CompileResult<Self> {
        Ok(Self {
            table_name: schema.table_name(type_name)?,
            table_alias: table_alias.to_owned(),
        })
    }
    pub fn from_table(table_name: &str, table_alias: &str) -> Self {
        Self {
            table_name: table_name.to_owned(),
            table_alias: table_alias.to_owned(),
        }
    }
    pub fn table_name(&self) -> &str {
        &self.table_name
    }
    pub fn table_ident(&self) -> ObjectName {
        ObjectName(vec![Ident::quoted(&self.table_name)])
    }
    pub fn table_factor(&self) -> TableFactor {
        TableFactor::Table {
            name: self.table_ident(),
            alias: Ident::quoted(&self.table_alias),
        }
    }
    pub fn column(&self, column_name: &str) -> Expr {
        Expr::column(&self.table_alias, column_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::catalog::Catalog;

    #[test]
    fn renders_quoted_table_and_alias() {
        let catalog = Catalog::default().with_type("Order", None, "orders");
        let table = TableContext::try_from_type("Order", "t0", &catalog).unwrap();
        assert_eq!(table.table_factor().to_string(), r#""orders" "t0""#);
        assert_eq!(table.column("id").to_string(), r#""t0"."id""#);
    }
}
