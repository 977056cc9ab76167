//! # Smartflow Core
//!
//! A CFG-driven dataflow analyzer computing smartcast type refinements for a
//! statically typed front end. The resolver walks a declaration body and
//! reports every syntactic event; the analyzer maintains a flow of facts and
//! implications per CFG node and answers, for any use site, whether an
//! expression may be treated as a narrower type than declared.
//!
//! ## Modules
//!
//! - **[`hir`]** - The syntax model events are reported against
//! - **[`types`]** - Types, subtyping, and intersection
//! - **[`cfg`]** - The control flow graph and its builder
//! - **[`dataflow`]** - Variable storage, flows, the logic system, contracts,
//!   and the analyzer itself

pub mod cfg;
pub mod dataflow;
pub mod hir;
pub mod types;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::cfg::{ControlFlowGraph, EdgeLabel, GraphBuilder, NodeId, NodeKind};
    pub use crate::dataflow::{
        ContractCondition, ContractDescription, ContractEffect, ContractProvider,
        ControlFlowGraphReference, DataFlowAnalyzer, DataFlowInfo, Flow, Implication,
        InvocationKind, LogicSystem, NoContracts, Operation, OperationStatement, ReturnsValue,
        Statement, TypeStatement, VarId, VariableStorage,
    };
    pub use crate::hir::{
        AnonymousFunction, Argument, BooleanOp, EqualityOp, Expr, ExprId, ExprKind, Function,
        HirBuilder, Literal, Stmt, Symbol, SymbolId, SymbolKind, Symbols, WhenBranch,
    };
    pub use crate::types::{Ty, TypeContext, TypeIntersector};
}
