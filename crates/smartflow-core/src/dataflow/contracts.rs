//! Contract descriptions and their interpretation
//!
//! A contract description is plain data (loadable from JSON) attached to a
//! function symbol by a [`ContractProvider`]. On call exit the conditional
//! effects become implications keyed on the call result; `returns()` effects
//! with no value constraint are approved immediately. The static query maps
//! call-site argument types to refined return types without touching flows.

use crate::dataflow::flow::{
    Flow, Implication, Operation, OperationStatement, Statement, TypeStatement,
};
use crate::dataflow::logic::LogicSystem;
use crate::dataflow::variable::VariableStorage;
use crate::hir::{Argument, Expr, ExprKind, SymbolId, Symbols};
use crate::types::{Ty, TypeContext};
use serde::{Deserialize, Serialize};

/// What the function is known to have returned for an effect to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnsValue {
    /// The function returned at all.
    Wildcard,
    True,
    False,
    Null,
    NotNull,
}

impl ReturnsValue {
    /// The operation observed on the call result, if any.
    pub fn as_operation(self) -> Option<Operation> {
        match self {
            ReturnsValue::Wildcard => None,
            ReturnsValue::True => Some(Operation::EqTrue),
            ReturnsValue::False => Some(Operation::EqFalse),
            ReturnsValue::Null => Some(Operation::EqNull),
            ReturnsValue::NotNull => Some(Operation::NotEqNull),
        }
    }
}

/// A predicate over a formal parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContractCondition {
    IsInstance {
        parameter: usize,
        ty: Ty,
        negated: bool,
    },
    IsNull {
        parameter: usize,
        negated: bool,
    },
    BooleanParameter {
        parameter: usize,
        negated: bool,
    },
}

impl ContractCondition {
    pub fn parameter(&self) -> usize {
        match self {
            ContractCondition::IsInstance { parameter, .. }
            | ContractCondition::IsNull { parameter, .. }
            | ContractCondition::BooleanParameter { parameter, .. } => *parameter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalEffect {
    pub returns: ReturnsValue,
    pub condition: ContractCondition,
}

/// How often a functional parameter is invoked during the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvocationKind {
    AtMostOnce,
    ExactlyOnce,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContractEffect {
    Conditional(ConditionalEffect),
    CallsInPlace {
        parameter: usize,
        kind: InvocationKind,
    },
    /// The returned collection keeps exactly the elements for which the
    /// functional parameter returned `expected`.
    ForEachReturnValue {
        parameter: usize,
        expected: bool,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractDescription {
    pub effects: Vec<ContractEffect>,
}

impl ContractDescription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conditional(mut self, returns: ReturnsValue, condition: ContractCondition) -> Self {
        self.effects
            .push(ContractEffect::Conditional(ConditionalEffect {
                returns,
                condition,
            }));
        self
    }

    pub fn calls_in_place(mut self, parameter: usize, kind: InvocationKind) -> Self {
        self.effects
            .push(ContractEffect::CallsInPlace { parameter, kind });
        self
    }

    pub fn for_each_return_value(mut self, parameter: usize, expected: bool) -> Self {
        self.effects
            .push(ContractEffect::ForEachReturnValue { parameter, expected });
        self
    }

    pub fn conditional_effects(&self) -> impl Iterator<Item = &ConditionalEffect> {
        self.effects.iter().filter_map(|e| match e {
            ContractEffect::Conditional(c) => Some(c),
            _ => None,
        })
    }

    pub fn for_each_effects(&self) -> impl Iterator<Item = (usize, bool)> + '_ {
        self.effects.iter().filter_map(|e| match e {
            ContractEffect::ForEachReturnValue { parameter, expected } => {
                Some((*parameter, *expected))
            }
            _ => None,
        })
    }

    pub fn invocation_kind(&self, parameter: usize) -> InvocationKind {
        self.effects
            .iter()
            .find_map(|e| match e {
                ContractEffect::CallsInPlace { parameter: p, kind } if *p == parameter => {
                    Some(*kind)
                }
                _ => None,
            })
            .unwrap_or(InvocationKind::Unknown)
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Supplies contract descriptions for called functions.
pub trait ContractProvider {
    fn contract_description(
        &self,
        symbols: &Symbols,
        function: SymbolId,
    ) -> Option<&ContractDescription>;
}

/// Provider with no contracts at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoContracts;

impl ContractProvider for NoContracts {
    fn contract_description(&self, _: &Symbols, _: SymbolId) -> Option<&ContractDescription> {
        None
    }
}

/// The positional value arguments of a call; lambda slots are `None`.
fn value_arguments(call: &Expr) -> Option<Vec<Option<&Expr>>> {
    let ExprKind::Call { args, .. } = &call.kind else {
        return None;
    };
    Some(
        args.iter()
            .map(|arg| match arg {
                Argument::Expr(e) => Some(e),
                Argument::Lambda(_) => None,
            })
            .collect(),
    )
}

/// Installs the call's conditional effects into the flow. `returns()` effects
/// without a value constraint are approved on the spot; the rest become
/// implications keyed on the call result. Returns the type statements
/// installed immediately.
pub fn process_contracts(
    logic: &LogicSystem,
    storage: &mut VariableStorage,
    symbols: &Symbols,
    flow: &mut Flow,
    description: &ContractDescription,
    call: &Expr,
) -> Vec<TypeStatement> {
    let Some(args) = value_arguments(call) else {
        return Vec::new();
    };
    let result_var = storage.get_or_create_variable(flow, symbols, call);
    let mut installed = Vec::new();
    for effect in description.conditional_effects() {
        // A malformed effect never aborts analysis; it just yields nothing.
        let Some(Some(arg)) = args.get(effect.condition.parameter()) else {
            continue;
        };
        let arg_var = storage.get_or_create_variable(flow, symbols, arg);
        let mut statements: Vec<Statement> = Vec::new();
        match &effect.condition {
            ContractCondition::BooleanParameter { negated, .. } => {
                statements.push(Statement::Operation(OperationStatement::new(
                    arg_var,
                    Operation::from_boolean(!negated),
                )));
            }
            ContractCondition::IsNull { negated, .. } => {
                let op = if *negated {
                    Operation::NotEqNull
                } else {
                    Operation::EqNull
                };
                statements.push(Statement::Operation(OperationStatement::new(arg_var, op)));
                // A definitely-not-null real argument also pins its type.
                if *negated && arg_var.is_real() {
                    statements.push(Statement::Type(TypeStatement::with_exact(arg_var, Ty::Any)));
                }
            }
            ContractCondition::IsInstance { ty, negated, .. } => {
                if arg_var.is_synthetic() {
                    continue;
                }
                let ts = if *negated {
                    TypeStatement::with_excluded(arg_var, ty.clone())
                } else {
                    TypeStatement::with_exact(arg_var, ty.clone())
                };
                statements.push(Statement::Type(ts));
            }
        }
        for statement in statements {
            match effect.returns.as_operation() {
                None => match statement {
                    Statement::Operation(os) => {
                        installed.extend(logic.approve_statements_inside_flow(flow, os, true));
                    }
                    Statement::Type(ts) => {
                        logic.add_type_statement(flow, ts.clone());
                        installed.push(ts);
                    }
                },
                Some(op) => {
                    logic.add_implication(
                        flow,
                        Implication::new(OperationStatement::new(result_var, op), statement),
                    );
                }
            }
        }
    }
    installed
}

/// Statically evaluates conditional effects from call-site argument types and
/// maps the satisfied ones to refined return types.
pub fn conditional_return_types(
    ctx: &TypeContext,
    symbols: &Symbols,
    description: &ContractDescription,
    call: &Expr,
) -> Option<Vec<Ty>> {
    let args = value_arguments(call)?;
    let return_type = call.static_type(symbols);
    let mut refined: Vec<Ty> = Vec::new();
    for effect in description.conditional_effects() {
        let Some(Some(arg)) = args.get(effect.condition.parameter()) else {
            continue;
        };
        let arg_type = arg.static_type(symbols);
        let satisfied = match &effect.condition {
            ContractCondition::IsInstance { ty, negated: false, .. } => {
                ctx.is_subtype_of(&arg_type, ty)
            }
            ContractCondition::IsInstance { negated: true, .. } => false,
            ContractCondition::IsNull { negated: true, .. } => !arg_type.is_nullable(),
            ContractCondition::IsNull { negated: false, .. } => arg.as_null_constant(),
            ContractCondition::BooleanParameter { negated, .. } => {
                arg.as_bool_constant() == Some(!negated)
            }
        };
        if !satisfied {
            continue;
        }
        let ty = match effect.returns {
            ReturnsValue::Wildcard => continue,
            ReturnsValue::True | ReturnsValue::False => Ty::boolean(),
            ReturnsValue::Null => Ty::null(),
            ReturnsValue::NotNull => return_type.not_nullable(),
        };
        if !refined.contains(&ty) {
            refined.push(ty);
        }
    }
    if refined.is_empty() {
        None
    } else {
        Some(refined)
    }
}
