//! Mutable state threaded through one compilation.
use dashmap::DashMap;
use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use serde_json::Value;

use crate::sql::{
    catalog::{Metamodel, SchemaResolver},
    dialect::Dialect,
    query_graph::NodeId,
};

use super::{
    aliasing::AliasGenerator, function_mapper::FunctionMapper, CompileError, CompileResult,
};

/// Named values for non-parameter variable categories, e.g. `USER -> id -> 7`.
pub type Variables = IndexMap<String, IndexMap<String, Value>>;

pub trait VariableResolver {
    fn resolve(&self, category: &str, name: &str) -> Option<Value>;
}

impl VariableResolver for Variables {
    fn resolve(&self, category: &str, name: &str) -> Option<Value> {
        self.get(category).and_then(|values| values.get(name)).cloned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeBinding {
    pub alias: String,
    pub type_name: String,
}

/// Ancestor tables each node needs outer joined, in first-request order.
#[derive(Debug, Default)]
pub struct AncestorMap(IndexMap<NodeId, IndexSet<String>>);

impl AncestorMap {
    pub fn require(&mut self, node: &str, ancestor: &str) {
        self.0
            .entry(node.to_owned())
            .or_default()
            .insert(ancestor.to_owned());
    }
    pub fn get(&self, node: &str) -> Option<&IndexSet<String>> {
        self.0.get(node)
    }
    pub fn take(&mut self) -> IndexMap<NodeId, IndexSet<String>> {
        std::mem::take(&mut self.0)
    }
}

/// Output of a compiled navigation subselect, as seen by features of the enclosing select.
#[derive(Debug, Clone)]
pub struct SubSelectBinding {
    pub alias: String,
    /// Column alias per subselect feature, and whether that feature is a `COUNT`.
    pub columns: Vec<(String, bool)>,
    /// Exposed ordering columns with their direction.
    pub order_columns: Vec<(String, bool)>,
}

#[derive(Debug)]
pub struct Scope {
    prefix: String,
    /// Derived tables cannot see the nodes of enclosing scopes.
    isolated: bool,
    nodes: IndexMap<NodeId, NodeBinding>,
    sub_selects: IndexMap<NodeId, SubSelectBinding>,
    redirect: Option<(NodeId, NodeId)>,
    pub ancestors: AncestorMap,
}

impl Scope {
    fn new(prefix: &str, isolated: bool) -> Self {
        Self {
            prefix: prefix.to_owned(),
            isolated,
            nodes: IndexMap::new(),
            sub_selects: IndexMap::new(),
            redirect: None,
            ancestors: AncestorMap::default(),
        }
    }
    pub fn node(&self, id: &str) -> Option<&NodeBinding> {
        self.nodes.get(id)
    }
}

#[derive(Debug, Hash, PartialEq, Eq)]
struct ConstantKey {
    identity: String,
    value: String,
}

/// Bound parameters of one compilation. Constants with a stable identity are memoized so the
/// same logical constant always binds exactly one parameter.
#[derive(Debug, Default)]
pub struct ParameterRegistry {
    memoized: DashMap<ConstantKey, String>,
    values: Mutex<IndexMap<String, Value>>,
}

impl ParameterRegistry {
    /// Binds `value` and returns its parameter name.
    pub fn bind(&self, value: Value) -> String {
        let mut values = self.values.lock();
        let name = format!("p{}", values.len() + 1);
        values.insert(name.clone(), value);
        name
    }

    /// Binds `value` once per `identity`; later calls with the same identity and value reuse
    /// the first parameter. The entry lock makes check-and-insert atomic per key.
    pub fn bind_memoized(&self, identity: &str, value: Value) -> String {
        let key = ConstantKey {
            identity: identity.to_owned(),
            value: value.to_string(),
        };
        self.memoized
            .entry(key)
            .or_insert_with(|| self.bind(value))
            .value()
            .clone()
    }

    pub fn into_values(self) -> IndexMap<String, Value> {
        self.values.into_inner()
    }
}

pub struct CompilationContext<'a> {
    pub dialect: Dialect,
    pub metamodel: &'a dyn Metamodel,
    pub schema: &'a dyn SchemaResolver,
    pub functions: &'a FunctionMapper,
    /// The request's named parameters.
    pub parameter_bag: &'a IndexMap<String, Value>,
    pub variables: &'a dyn VariableResolver,
    pub aliases: AliasGenerator,
    pub parameters: ParameterRegistry,
    scopes: Vec<Scope>,
}

impl<'a> CompilationContext<'a> {
    pub fn new(
        dialect: Dialect,
        metamodel: &'a dyn Metamodel,
        schema: &'a dyn SchemaResolver,
        functions: &'a FunctionMapper,
        parameter_bag: &'a IndexMap<String, Value>,
        variables: &'a dyn VariableResolver,
    ) -> Self {
        Self {
            dialect,
            metamodel,
            schema,
            functions,
            parameter_bag,
            variables,
            aliases: AliasGenerator::default(),
            parameters: ParameterRegistry::default(),
            scopes: vec![],
        }
    }

    pub fn push_scope(&mut self, prefix: &str, isolated: bool) {
        self.scopes.push(Scope::new(prefix, isolated));
    }

    pub fn pop_scope(&mut self) -> CompileResult<Scope> {
        self.scopes
            .pop()
            .ok_or_else(|| CompileError::Internal("Scope stack underflow".to_owned()))
    }

    /// Runs `build` inside a fresh scope and hands back the scope with the result. The scope is
    /// popped even when `build` fails.
    pub fn scoped<T>(
        &mut self,
        prefix: &str,
        isolated: bool,
        build: impl FnOnce(&mut Self) -> CompileResult<T>,
    ) -> CompileResult<(T, Scope)> {
        self.push_scope(prefix, isolated);
        let result = build(self);
        let scope = self.pop_scope()?;
        Ok((result?, scope))
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn current_scope(&self) -> CompileResult<&Scope> {
        self.scopes
            .last()
            .ok_or_else(|| CompileError::Internal("No active scope".to_owned()))
    }

    pub fn current_scope_mut(&mut self) -> CompileResult<&mut Scope> {
        self.scopes
            .last_mut()
            .ok_or_else(|| CompileError::Internal("No active scope".to_owned()))
    }

    /// A fresh alias in the current scope's namespace, for tables no node is bound to.
    pub fn next_alias(&self) -> CompileResult<String> {
        Ok(self.aliases.next(&self.current_scope()?.prefix))
    }

    /// Assigns `id` a fresh alias in the current scope.
    pub fn bind_node(&mut self, id: &str, type_name: &str) -> CompileResult<String> {
        let scope = self
            .scopes
            .last_mut()
            .ok_or_else(|| CompileError::Internal("No active scope".to_owned()))?;
        if scope.nodes.contains_key(id) {
            return Err(CompileError::Internal(format!(
                "Node {id} is bound twice in one scope"
            )));
        }
        let alias = self.aliases.next(&scope.prefix);
        scope.nodes.insert(
            id.to_owned(),
            NodeBinding {
                alias: alias.clone(),
                type_name: type_name.to_owned(),
            },
        );
        Ok(alias)
    }

    /// Finds the binding of `id`, innermost scope first. Returns the owning scope's index
    /// and the id after redirection.
    pub fn resolve_node(&self, id: &str) -> CompileResult<(usize, NodeId, NodeBinding)> {
        for (index, scope) in self.scopes.iter().enumerate().rev() {
            let id = match &scope.redirect {
                Some((from, to)) if from == id => to.as_str(),
                _ => id,
            };
            if let Some(binding) = scope.nodes.get(id) {
                return Ok((index, id.to_owned(), binding.clone()));
            }
            if scope.isolated {
                break;
            }
        }
        Err(CompileError::UnknownNode(id.to_owned()))
    }

    /// Records that `node` needs the table of `ancestor` joined in the scope that owns it.
    pub fn require_ancestor(&mut self, scope: usize, node: &str, ancestor: &str) {
        if let Some(scope) = self.scopes.get_mut(scope) {
            scope.ancestors.require(node, ancestor);
        }
    }

    pub fn set_redirect(&mut self, redirect: Option<(NodeId, NodeId)>) -> CompileResult<()> {
        self.current_scope_mut()?.redirect = redirect;
        Ok(())
    }

    pub fn register_sub_select(
        &mut self,
        id: &str,
        binding: SubSelectBinding,
    ) -> CompileResult<()> {
        self.current_scope_mut()?
            .sub_selects
            .insert(id.to_owned(), binding);
        Ok(())
    }

    pub fn resolve_sub_select(&self, id: &str) -> CompileResult<&SubSelectBinding> {
        for scope in self.scopes.iter().rev() {
            if let Some(binding) = scope.sub_selects.get(id) {
                return Ok(binding);
            }
            if scope.isolated {
                break;
            }
        }
        Err(CompileError::UnknownNode(id.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;

    #[test]
    fn memoized_constants_bind_one_parameter_per_identity_and_value() {
        let registry = ParameterRegistry::default();
        let first = registry.bind_memoized("c1", json!(42));
        let second = registry.bind_memoized("c1", json!(42));
        let other_value = registry.bind_memoized("c1", json!(43));
        let unmemoized = registry.bind(json!(42));
        assert_eq!(first, "p1");
        assert_eq!(second, "p1");
        assert_eq!(other_value, "p2");
        assert_eq!(unmemoized, "p3");
        assert_eq!(registry.into_values().len(), 3);
    }

    #[test]
    fn concurrent_memoization_binds_once() {
        let registry = Arc::new(ParameterRegistry::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.bind_memoized("shared", json!("x")))
            })
            .collect();
        let names: IndexSet<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(names.len(), 1);
        let registry = Arc::try_unwrap(registry).unwrap();
        assert_eq!(registry.into_values().len(), 1);
    }

    #[test]
    fn variables_resolve_by_category_and_name() {
        let mut variables = Variables::new();
        variables
            .entry("USER".to_owned())
            .or_default()
            .insert("id".to_owned(), json!(7));
        assert_eq!(variables.resolve("USER", "id"), Some(json!(7)));
        assert_eq!(variables.resolve("USER", "name"), None);
    }
}
