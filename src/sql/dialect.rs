use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// The SQL syntax variant a query is compiled for.
#[derive(
    Debug,
    Default,
    Serialize,
    Deserialize,
    JsonSchema,
    Hash,
    Eq,
    PartialEq,
    Clone,
    Copy,
    Display,
    EnumIter,
    EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Dialect {
    #[default]
    Postgresql,
    H2,
}

impl Dialect {
    /// Target type used when casting a value to text.
    pub fn text_type(&self) -> &'static str {
        match self {
            Dialect::Postgresql => "TEXT",
            Dialect::H2 => "VARCHAR",
        }
    }
    pub fn supports_modulo_operator(&self) -> bool {
        matches!(self, Dialect::Postgresql)
    }
    pub fn supports_interval_arithmetic(&self) -> bool {
        matches!(self, Dialect::Postgresql)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn dialect_names_round_trip_through_strum_and_serde() {
        assert_eq!(Dialect::from_str("H2").ok(), Some(Dialect::H2));
        assert_eq!(Dialect::Postgresql.to_string(), "POSTGRESQL");
        let parsed: Dialect = serde_json::from_str("\"POSTGRESQL\"").unwrap();
        assert_eq!(parsed, Dialect::Postgresql);
    }
}
