//! The logical query graph handed over by the upstream query builder.
//!
//! Node ids are unique within one graph; they key alias assignment and ancestor tracking.
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use super::function_signature::FunctionSignature;

pub type NodeId = String;
pub type TargetId = String;

/// Category of variables resolved from the request's named parameters.
pub const PARAMETER_CATEGORY: &str = "PARAMETER";

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct Select {
    pub id: NodeId,
    pub source_type: String,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default)]
    pub features: Vec<Projection>,
    #[serde(default)]
    pub joins: Vec<Join>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    #[serde(default)]
    pub sub_selects: Vec<SubSelect>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    #[serde(default)]
    pub distinct: bool,
}

impl Select {
    pub fn new(id: &str, source_type: &str) -> Self {
        Self {
            id: id.to_owned(),
            source_type: source_type.to_owned(),
            targets: vec![],
            features: vec![],
            joins: vec![],
            filters: vec![],
            order_by: vec![],
            sub_selects: vec![],
            limit: None,
            offset: None,
            distinct: false,
        }
    }
}

/// One concrete projection slot of a polymorphic result. `node` is the node materializing
/// `type_name`, usually the select itself or a cast join below it.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct Target {
    pub id: TargetId,
    pub type_name: String,
    pub node: NodeId,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct TargetBinding {
    pub target: TargetId,
    pub alias: String,
}

/// A feature projected by a select, once per bound target or once under a generated alias.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct Projection {
    pub feature: Feature,
    #[serde(default)]
    pub bindings: Vec<TargetBinding>,
}

impl From<Feature> for Projection {
    fn from(feature: Feature) -> Self {
        Self {
            feature,
            bindings: vec![],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct Join {
    pub id: NodeId,
    pub kind: JoinKind,
    pub target_type: String,
    #[serde(default = "default_outer")]
    pub outer: bool,
    #[serde(default)]
    pub filters: Vec<Filter>,
    /// Joins whose partner is this join.
    #[serde(default)]
    pub joins: Vec<Join>,
}

fn default_outer() -> bool {
    true
}

impl Join {
    pub fn new(id: &str, kind: JoinKind, target_type: &str) -> Self {
        Self {
            id: id.to_owned(),
            kind,
            target_type: target_type.to_owned(),
            outer: true,
            filters: vec![],
            joins: vec![],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JoinKind {
    /// Follow `reference` from the partner to `target_type`.
    Reference { reference: String },
    /// Navigate to the owner of the partner, which is held through exactly one of `references`.
    /// Each reference is declared on a candidate owner type and targets the partner's type.
    Container { references: Vec<ContainerReference> },
    /// Narrow the partner to `target_type`.
    Cast,
    /// Join `target_type` on a driver supplied `ON` condition.
    Custom { sql: String },
    /// Join a correlated navigation subselect.
    SubSelect { sub_select: Box<SubSelect> },
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct ContainerReference {
    pub owner_type: String,
    pub reference: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct Filter {
    pub condition: Feature,
}

impl From<Feature> for Filter {
    fn from(condition: Feature) -> Self {
        Self { condition }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderBy {
    Feature {
        feature: Feature,
        #[serde(default)]
        descending: bool,
    },
    /// The exposed ordering of a navigation subselect, i.e. its last hop's order.
    SubSelect { sub_select: NodeId },
}

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct SubSelect {
    pub id: NodeId,
    /// Outer node the subselect correlates with. Uncorrelated subselects are cross joined.
    pub partner: Option<NodeId>,
    /// Type the navigation starts from. Must match the partner's type when one is given.
    pub base_type: String,
    #[serde(default)]
    pub navigation: Vec<NavigationStep>,
    #[serde(default)]
    pub features: Vec<Feature>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Keep only outer rows without a match.
    #[serde(default)]
    pub exclude: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct NavigationStep {
    pub id: NodeId,
    pub reference: String,
    pub target_type: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub order_by: Vec<NavigationOrder>,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct NavigationOrder {
    pub feature: Feature,
    #[serde(default)]
    pub descending: bool,
}

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Feature {
    Attribute {
        node: NodeId,
        /// Type the attribute is looked up on; defaults to the node's type.
        type_name: Option<String>,
        attribute: String,
    },
    IdAttribute {
        node: NodeId,
    },
    TypeAttribute {
        node: NodeId,
    },
    Constant {
        /// Stable source identity; constants sharing it and their value bind one parameter.
        key: Option<String>,
        value: serde_json::Value,
        enumeration: Option<String>,
    },
    Variable {
        key: Option<String>,
        category: String,
        name: String,
        enumeration: Option<String>,
    },
    Function {
        signature: FunctionSignature,
        #[serde(default)]
        parameters: IndexMap<String, Feature>,
        enumeration: Option<String>,
        precision: Option<u32>,
        scale: Option<u32>,
    },
    EntityTypeName {
        type_name: String,
    },
    SubSelect {
        sub_select: NodeId,
        /// Index into the subselect's features.
        feature: usize,
    },
}

impl Feature {
    pub fn attribute(node: &str, attribute: &str) -> Self {
        Feature::Attribute {
            node: node.to_owned(),
            type_name: None,
            attribute: attribute.to_owned(),
        }
    }
    pub fn constant(value: serde_json::Value) -> Self {
        Feature::Constant {
            key: None,
            value,
            enumeration: None,
        }
    }
    pub fn function<const N: usize>(
        signature: FunctionSignature,
        parameters: [(&str, Feature); N],
    ) -> Self {
        Feature::Function {
            signature,
            parameters: parameters
                .into_iter()
                .map(|(name, feature)| (name.to_owned(), feature))
                .collect(),
            enumeration: None,
            precision: None,
            scale: None,
        }
    }

    /// Whether evaluating this feature reads a correlated subselect.
    pub fn contains_sub_select(&self) -> bool {
        match self {
            Feature::SubSelect { .. } => true,
            Feature::Function { parameters, .. } => {
                parameters.values().any(Feature::contains_sub_select)
            }
            _ => false,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Feature::Function { signature, .. } if signature.is_aggregate())
    }
}
