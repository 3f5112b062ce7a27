//! Read-only facts about the entity model and its physical storage.
//!
//! The compiler only talks to the [`Metamodel`] and [`SchemaResolver`] traits. [`Catalog`] is the
//! serializable implementation used by the server and by tests.
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use super::rdbms_builder::{CompileError, CompileResult};

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct TypeDefinition {
    pub name: String,
    /// Direct supertype. Every level of a hierarchy is stored in its own table sharing `id`.
    pub supertype: Option<String>,
    pub table: String,
    #[serde(default)]
    pub is_abstract: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct AttributeDefinition {
    pub declaring_type: String,
    pub name: String,
    pub column: String,
    #[serde(default)]
    pub derived: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct ReferenceDefinition {
    pub declaring_type: String,
    pub name: String,
    pub target_type: String,
    pub mapping: ReferenceMapping,
    /// The declaring type owns the referenced objects.
    #[serde(default)]
    pub containment: bool,
}

/// Where the foreign key of a reference lives.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReferenceMapping {
    /// The declaring type's table holds `column` pointing at the target's id.
    OwnerFk { column: String },
    /// The target type's table holds `column` pointing back at the owner's id.
    InverseFk { column: String },
    /// An association table links both ids.
    JoinTable {
        table: String,
        source_column: String,
        target_column: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct EnumLiteral {
    pub name: String,
    pub value: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Enumeration {
    pub name: String,
    /// Literals in declaration order.
    pub literals: Vec<EnumLiteral>,
}

impl Enumeration {
    pub fn literal_by_name(&self, name: &str) -> Option<&EnumLiteral> {
        self.literals.iter().find(|literal| literal.name == name)
    }
}

pub trait Metamodel {
    fn type_definition(&self, type_name: &str) -> Option<&TypeDefinition>;
    fn attributes_of(&self, type_name: &str) -> Vec<&AttributeDefinition>;
    fn references_of(&self, type_name: &str) -> Vec<&ReferenceDefinition>;
    fn enumeration(&self, name: &str) -> Option<&Enumeration>;

    fn require_type(&self, type_name: &str) -> CompileResult<&TypeDefinition> {
        self.type_definition(type_name)
            .ok_or_else(|| CompileError::UnknownType(type_name.to_owned()))
    }

    /// Supertypes of `type_name`, nearest first, ending with the hierarchy root.
    fn supertypes(&self, type_name: &str) -> CompileResult<Vec<String>> {
        let mut supertypes: Vec<String> = vec![];
        let mut current = self.require_type(type_name)?;
        while let Some(supertype) = &current.supertype {
            if supertype == type_name || supertypes.contains(supertype) {
                return Err(CompileError::Internal(format!(
                    "Inheritance cycle through type {}",
                    supertype
                )));
            }
            supertypes.push(supertype.to_owned());
            current = self.require_type(supertype)?;
        }
        Ok(supertypes)
    }

    /// `type_name` followed by all of its supertypes.
    fn type_chain(&self, type_name: &str) -> CompileResult<Vec<String>> {
        let mut chain = vec![self.require_type(type_name)?.name.to_owned()];
        chain.extend(self.supertypes(type_name)?);
        Ok(chain)
    }

    fn root_type(&self, type_name: &str) -> CompileResult<String> {
        let chain = self.type_chain(type_name)?;
        Ok(chain.last().cloned().unwrap_or_else(|| type_name.to_owned()))
    }

    /// Finds an attribute declared on `type_name` or inherited from one of its supertypes.
    fn find_attribute(
        &self,
        type_name: &str,
        attribute: &str,
    ) -> CompileResult<&AttributeDefinition> {
        for candidate in self.type_chain(type_name)? {
            if let Some(definition) = self
                .attributes_of(&candidate)
                .into_iter()
                .find(|definition| definition.name == attribute)
            {
                return Ok(definition);
            }
        }
        Err(CompileError::UnknownAttribute {
            type_name: type_name.to_owned(),
            attribute: attribute.to_owned(),
        })
    }

    /// Finds a reference declared on `type_name` or inherited from one of its supertypes.
    fn find_reference(
        &self,
        type_name: &str,
        reference: &str,
    ) -> CompileResult<&ReferenceDefinition> {
        for candidate in self.type_chain(type_name)? {
            if let Some(definition) = self
                .references_of(&candidate)
                .into_iter()
                .find(|definition| definition.name == reference)
            {
                return Ok(definition);
            }
        }
        Err(CompileError::UnknownReference {
            type_name: type_name.to_owned(),
            reference: reference.to_owned(),
        })
    }

    fn require_enumeration(&self, name: &str) -> CompileResult<&Enumeration> {
        self.enumeration(name)
            .ok_or_else(|| CompileError::UnknownEnumeration(name.to_owned()))
    }
}

pub trait SchemaResolver {
    fn table_name(&self, type_name: &str) -> CompileResult<String>;
    fn column_name(&self, attribute: &AttributeDefinition) -> String;
    fn reference_mapping<'a>(&self, reference: &'a ReferenceDefinition) -> &'a ReferenceMapping;

    /// Suffix appended to a node alias to name the join against an ancestor's table.
    fn ancestor_postfix(&self, type_name: &str) -> CompileResult<String> {
        Ok(format!("_{}", self.table_name(type_name)?))
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct Catalog {
    #[serde(default)]
    pub types: Vec<TypeDefinition>,
    #[serde(default)]
    pub attributes: Vec<AttributeDefinition>,
    #[serde(default)]
    pub references: Vec<ReferenceDefinition>,
    #[serde(default)]
    pub enumerations: Vec<Enumeration>,
}

impl Catalog {
    pub fn with_type(mut self, name: &str, supertype: Option<&str>, table: &str) -> Self {
        self.types.push(TypeDefinition {
            name: name.to_owned(),
            supertype: supertype.map(str::to_owned),
            table: table.to_owned(),
            is_abstract: false,
        });
        self
    }
    pub fn with_attribute(mut self, declaring_type: &str, name: &str, column: &str) -> Self {
        self.attributes.push(AttributeDefinition {
            declaring_type: declaring_type.to_owned(),
            name: name.to_owned(),
            column: column.to_owned(),
            derived: false,
        });
        self
    }
    pub fn with_reference(
        mut self,
        declaring_type: &str,
        name: &str,
        target_type: &str,
        mapping: ReferenceMapping,
    ) -> Self {
        self.references.push(ReferenceDefinition {
            declaring_type: declaring_type.to_owned(),
            name: name.to_owned(),
            target_type: target_type.to_owned(),
            mapping,
            containment: false,
        });
        self
    }
    pub fn with_enumeration(mut self, name: &str, literals: &[(&str, i64)]) -> Self {
        self.enumerations.push(Enumeration {
            name: name.to_owned(),
            literals: literals
                .iter()
                .map(|(name, value)| EnumLiteral {
                    name: (*name).to_owned(),
                    value: *value,
                })
                .collect(),
        });
        self
    }
}

impl Metamodel for Catalog {
    fn type_definition(&self, type_name: &str) -> Option<&TypeDefinition> {
        self.types.iter().find(|definition| definition.name == type_name)
    }
    fn attributes_of(&self, type_name: &str) -> Vec<&AttributeDefinition> {
        self.attributes
            .iter()
            .filter(|definition| definition.declaring_type == type_name)
            .collect()
    }
    fn references_of(&self, type_name: &str) -> Vec<&ReferenceDefinition> {
        self.references
            .iter()
            .filter(|definition| definition.declaring_type == type_name)
            .collect()
    }
    fn enumeration(&self, name: &str) -> Option<&Enumeration> {
        self.enumerations
            .iter()
            .find(|enumeration| enumeration.name == name)
    }
}

impl SchemaResolver for Catalog {
    fn table_name(&self, type_name: &str) -> CompileResult<String> {
        Ok(self.require_type(type_name)?.table.to_owned())
    }
    fn column_name(&self, attribute: &AttributeDefinition) -> String {
        attribute.column.to_owned()
    }
    fn reference_mapping<'a>(&self, reference: &'a ReferenceDefinition) -> &'a ReferenceMapping {
        &reference.mapping
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hierarchy() -> Catalog {
        Catalog::default()
            .with_type("Base", None, "base")
            .with_type("Mid", Some("Base"), "mid")
            .with_type("Leaf", Some("Mid"), "leaf")
            .with_attribute("Base", "name", "name")
            .with_attribute("Leaf", "weight", "weight")
    }

    #[test]
    fn supertypes_are_listed_nearest_first() {
        let catalog = hierarchy();
        assert_eq!(catalog.supertypes("Leaf").unwrap(), vec!["Mid", "Base"]);
        assert_eq!(catalog.root_type("Leaf").unwrap(), "Base");
        assert!(catalog.supertypes("Base").unwrap().is_empty());
    }

    #[test]
    fn inherited_attributes_resolve_to_their_declaring_type() {
        let catalog = hierarchy();
        let attribute = catalog.find_attribute("Leaf", "name").unwrap();
        assert_eq!(attribute.declaring_type, "Base");
        assert!(matches!(
            catalog.find_attribute("Mid", "weight"),
            Err(CompileError::UnknownAttribute { .. })
        ));
    }

    #[test]
    fn ancestor_postfix_uses_the_table_name() {
        assert_eq!(hierarchy().ancestor_postfix("Mid").unwrap(), "_mid");
    }

    #[test]
    fn reference_mappings_deserialize_from_tagged_json() {
        let mapping: ReferenceMapping = serde_json::from_value(serde_json::json!({
            "kind": "join_table",
            "table": "order_items",
            "source_column": "order_id",
            "target_column": "item_id"
        }))
        .unwrap();
        assert!(matches!(mapping, ReferenceMapping::JoinTable { .. }));
    }
}
