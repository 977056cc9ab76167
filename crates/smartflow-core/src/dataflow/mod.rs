//! Dataflow analysis for smartcasts
//!
//! This module implements the flow-sensitive refinement engine:
//! - Variable interning for real and synthetic dataflow variables
//! - Persistent per-node flows of type statements and implications
//! - The logic algebra (join, union, approve, translate)
//! - The implicit-receiver stack adapter
//! - Contract interpretation on call exit
//! - The analyzer driven by resolver events

mod analyzer;
mod contracts;
mod flow;
mod logic;
mod receivers;
mod variable;

pub use analyzer::{
    ControlFlowGraphReference, DataFlowAnalyzer, DataFlowAnalyzerContext, DataFlowInfo,
};
pub use contracts::{
    conditional_return_types, process_contracts, ConditionalEffect, ContractCondition,
    ContractDescription, ContractEffect, ContractProvider, InvocationKind, NoContracts,
    ReturnsValue,
};
pub use flow::{
    Flow, Implication, LocalAlias, Operation, OperationStatement, Statement, TypeStatement,
};
pub use logic::{LogicSystem, TypeStatementMap};
pub use receivers::{ImplicitReceiver, ImplicitReceiverStack};
pub use variable::{RealVariableKey, VarId, VariableStorage};
