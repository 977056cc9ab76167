//! # Smartflow Contracts
//!
//! The standard contract registry: descriptions for well-known functions,
//! keyed by name and served to the analyzer through the core's
//! [`ContractProvider`] trait. Each built-in handler is registered in
//! [`StandardContracts::new`]; embedders extend the registry with their own
//! descriptions, either built programmatically or loaded from JSON.

use rustc_hash::FxHashMap;
use smartflow_core::dataflow::{
    ContractCondition, ContractDescription, ContractProvider, InvocationKind, ReturnsValue,
};
use smartflow_core::hir::{SymbolId, Symbols};
use smartflow_core::types::Ty;

/// Registry of contract descriptions for called functions.
pub struct StandardContracts {
    by_name: FxHashMap<String, ContractDescription>,
}

impl StandardContracts {
    /// A registry preloaded with the standard library's contracts.
    pub fn new() -> Self {
        let mut registry = Self::empty();

        // Collection pipeline: the result keeps the elements for which the
        // predicate answered true (or false, for the negated form).
        registry.register(
            "filter",
            ContractDescription::new()
                .for_each_return_value(0, true)
                .calls_in_place(0, InvocationKind::Unknown),
        );
        registry.register(
            "filterNot",
            ContractDescription::new()
                .for_each_return_value(0, false)
                .calls_in_place(0, InvocationKind::Unknown),
        );

        // Assertions: reaching the next statement means the condition held.
        registry.register(
            "require",
            ContractDescription::new().conditional(
                ReturnsValue::Wildcard,
                ContractCondition::BooleanParameter {
                    parameter: 0,
                    negated: false,
                },
            ),
        );
        registry.register(
            "check",
            ContractDescription::new().conditional(
                ReturnsValue::Wildcard,
                ContractCondition::BooleanParameter {
                    parameter: 0,
                    negated: false,
                },
            ),
        );
        registry.register(
            "requireNotNull",
            ContractDescription::new().conditional(
                ReturnsValue::Wildcard,
                ContractCondition::IsNull {
                    parameter: 0,
                    negated: true,
                },
            ),
        );

        // Scope functions run their block exactly once.
        for name in ["let", "run", "also", "apply"] {
            registry.register(
                name,
                ContractDescription::new().calls_in_place(0, InvocationKind::ExactlyOnce),
            );
        }

        registry
    }

    pub fn empty() -> Self {
        Self {
            by_name: FxHashMap::default(),
        }
    }

    pub fn register(&mut self, name: &str, description: ContractDescription) {
        self.by_name.insert(name.to_string(), description);
    }

    /// A `returns(true) implies (parameter is ty)` predicate contract.
    pub fn register_type_guard(&mut self, name: &str, parameter: usize, ty: Ty) {
        self.register(
            name,
            ContractDescription::new().conditional(
                ReturnsValue::True,
                ContractCondition::IsInstance {
                    parameter,
                    ty,
                    negated: false,
                },
            ),
        );
    }

    /// Loads a description from its JSON form.
    pub fn load_json(&mut self, name: &str, json: &str) -> anyhow::Result<()> {
        self.register(name, ContractDescription::from_json(json)?);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ContractDescription> {
        self.by_name.get(name)
    }
}

impl Default for StandardContracts {
    fn default() -> Self {
        Self::new()
    }
}

impl ContractProvider for StandardContracts {
    fn contract_description(
        &self,
        symbols: &Symbols,
        function: SymbolId,
    ) -> Option<&ContractDescription> {
        self.by_name.get(&symbols.get(function).name)
    }
}
