//! The dataflow analyzer
//!
//! Driven event-by-event as the resolver walks a declaration body. Every
//! event asks the graph builder for the CFG node just produced, joins the
//! predecessor flows into that node's flow, applies the event's refinement
//! rules, and stores the result for later queries. The pass is strictly
//! forward: back edges are never followed, so no fixpoint iteration happens.

use crate::cfg::{ControlFlowGraph, GraphBuilder, NodeId, NodeKind};
use crate::dataflow::contracts::{
    conditional_return_types, process_contracts, ContractProvider, InvocationKind,
};
use crate::dataflow::flow::{
    Flow, Implication, Operation, OperationStatement, Statement, TypeStatement,
};
use crate::dataflow::logic::{LogicSystem, TypeStatementMap};
use crate::dataflow::receivers::ImplicitReceiverStack;
use crate::dataflow::variable::{VarId, VariableStorage};
use crate::hir::{
    AnonymousFunction, Argument, BooleanOp, Expr, ExprId, ExprKind, Function, Stmt, SymbolId,
    SymbolKind, Symbols, WhenBranch,
};
use crate::types::{Ty, TypeContext, TypeIntersector};
use anyhow::{anyhow, Result};
use rustc_hash::FxHashMap;
use tracing::trace;

/// Snapshot of the analysis handed to downstream passes at function exit.
#[derive(Debug, Clone)]
pub struct DataFlowInfo {
    pub variable_storage: VariableStorage,
    pub flow_on_nodes: FxHashMap<NodeId, Flow>,
}

/// The built graph plus the dataflow snapshot.
#[derive(Debug, Clone)]
pub struct ControlFlowGraphReference {
    pub graph: ControlFlowGraph,
    pub data_flow_info: DataFlowInfo,
}

/// State owned by exactly one active analysis, reset at the top level.
#[derive(Default)]
pub struct DataFlowAnalyzerContext {
    pub variable_storage: VariableStorage,
    pub flow_on_nodes: FxHashMap<NodeId, Flow>,
    pub graph_builder: GraphBuilder,
    node_for_expr: FxHashMap<ExprId, NodeId>,
    /// Return expressions per anonymous function: expression, node, static type.
    return_expressions: FxHashMap<ExprId, Vec<(ExprId, NodeId, Ty)>>,
}

impl DataFlowAnalyzerContext {
    fn reset(&mut self) {
        self.variable_storage.clear();
        self.flow_on_nodes.clear();
        self.graph_builder = GraphBuilder::new();
        self.node_for_expr.clear();
        self.return_expressions.clear();
    }
}

struct WhenFrame {
    last_condition: Option<VarId>,
}

struct CallFrame {
    lambda_exits: Vec<(NodeId, bool)>,
}

struct FunctionFrame {
    /// `Some` for anonymous functions.
    function: Option<ExprId>,
    returns: Vec<(ExprId, NodeId, Ty)>,
}

pub struct DataFlowAnalyzer<'a> {
    symbols: &'a Symbols,
    types: &'a TypeContext,
    provider: &'a dyn ContractProvider,
    ctx: DataFlowAnalyzerContext,
    receiver_stack: ImplicitReceiverStack,
    when_frames: Vec<WhenFrame>,
    call_frames: Vec<CallFrame>,
    function_frames: Vec<FunctionFrame>,
    ignore_function_calls: bool,
}

impl<'a> DataFlowAnalyzer<'a> {
    pub fn new(
        symbols: &'a Symbols,
        types: &'a TypeContext,
        provider: &'a dyn ContractProvider,
    ) -> Self {
        Self {
            symbols,
            types,
            provider,
            ctx: DataFlowAnalyzerContext::default(),
            receiver_stack: ImplicitReceiverStack::new(),
            when_frames: Vec::new(),
            call_frames: Vec::new(),
            function_frames: Vec::new(),
            ignore_function_calls: false,
        }
    }

    pub fn receiver_stack(&self) -> &ImplicitReceiverStack {
        &self.receiver_stack
    }

    /// Analyzes one top-level declaration body. The analyzer context is reset
    /// on entry, so flows from the previous declaration are released.
    pub fn analyze_function(&mut self, function: &Function) -> Result<ControlFlowGraphReference> {
        if self.ctx.graph_builder.is_top_level() {
            self.ctx.reset();
            self.receiver_stack = ImplicitReceiverStack::new();
            self.when_frames.clear();
            self.call_frames.clear();
            self.function_frames.clear();
        }
        trace!(name = %function.name, "enter function");
        self.enter_function(function);
        for stmt in &function.body {
            self.process_statement(stmt)?;
        }
        self.exit_function(function)
    }

    /// Runs `f` with call processing suppressed, as during overload candidate
    /// analysis.
    pub fn with_ignore_function_calls<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous = std::mem::replace(&mut self.ignore_function_calls, true);
        let result = f(self);
        self.ignore_function_calls = previous;
        result
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Refined types for a qualified access at its use site. The list begins
    /// with the aliased variable's declared type when the access crossed an
    /// alias, followed by the accumulated exact types.
    pub fn get_type_using_smartcast_info(&self, expr: &Expr) -> Option<Vec<Ty>> {
        let node = self.ctx.node_for_expr.get(&expr.id)?;
        let flow = self.ctx.flow_on_nodes.get(node)?;
        let (var, alias) = self
            .ctx
            .variable_storage
            .real_variable(flow, self.symbols, expr)?;
        let mut result = Vec::new();
        if let Some(alias) = alias {
            result.push(alias.original_type);
        }
        if let Some(statement) = flow.approved(var) {
            result.extend(statement.exact_type.iter().cloned());
        }
        if result.is_empty() {
            None
        } else {
            Some(result)
        }
    }

    /// Statically satisfied conditional contract effects, mapped to refined
    /// return types.
    pub fn get_type_using_conditional_contracts(&self, call: &Expr) -> Option<Vec<Ty>> {
        if self.ignore_function_calls {
            return None;
        }
        let ExprKind::Call { function, .. } = &call.kind else {
            return None;
        };
        let description = self.provider.contract_description(self.symbols, *function)?;
        conditional_return_types(self.types, self.symbols, description, call)
    }

    /// Narrows a collection-returning call through its `forEachReturnValue`
    /// contract: the element type is intersected with what the functional
    /// argument's parameter was known to be at every exit where the lambda
    /// returned the expected value.
    pub fn get_type_using_contracts_for_collections(&self, call: &Expr) -> Option<Vec<Ty>> {
        if self.ignore_function_calls {
            return None;
        }
        let ExprKind::Call { function, args, .. } = &call.kind else {
            return None;
        };
        let description = self.provider.contract_description(self.symbols, *function)?;
        let return_type = call.static_type(self.symbols);
        let logic = LogicSystem::new(self.types);
        for (parameter, expected) in description.for_each_effects() {
            let Some(Argument::Lambda(lambda)) = args.get(parameter) else {
                continue;
            };
            let Some(param_symbol) = lambda.parameter else {
                continue;
            };
            let Some(param_var) = self
                .ctx
                .variable_storage
                .real_variable_for_symbol(self.symbols, param_symbol)
            else {
                continue;
            };
            let Some(returns) = self.ctx.return_expressions.get(&lambda.id) else {
                continue;
            };
            let mut groups: Vec<TypeStatementMap> = Vec::new();
            for (return_expr, node, static_type) in returns {
                if static_type.is_nothing() {
                    continue;
                }
                let Some(flow) = self.ctx.flow_on_nodes.get(node) else {
                    continue;
                };
                let Some(return_var) = self
                    .ctx
                    .variable_storage
                    .variable_for_expression(*return_expr)
                else {
                    continue;
                };
                let mut branch = flow.fork();
                logic.approve_statements_inside_flow(
                    &mut branch,
                    OperationStatement::new(return_var, Operation::from_boolean(expected)),
                    false,
                );
                let mut group = TypeStatementMap::default();
                if let Some(statement) = branch.approved(param_var) {
                    group.insert(param_var, statement.clone());
                }
                groups.push(group);
            }
            if groups.is_empty() {
                continue;
            }
            let combined = logic.or_type_statements(&groups);
            let Some(statement) = combined.get(&param_var) else {
                continue;
            };
            let Some(element) = return_type.element_type() else {
                continue;
            };
            let mut types = vec![element.clone()];
            types.extend(statement.exact_type.iter().cloned());
            let refined = TypeIntersector::intersect(self.types, &types);
            if let Some(narrowed) = return_type.with_element_type(refined) {
                return Some(vec![narrowed]);
            }
        }
        None
    }

    /// Return expressions recorded for an analyzed anonymous function.
    pub fn return_expressions_of_anonymous_function(
        &self,
        function: ExprId,
    ) -> Result<Vec<ExprId>> {
        self.ctx
            .return_expressions
            .get(&function)
            .map(|records| records.iter().map(|(expr, _, _)| *expr).collect())
            .ok_or_else(|| anyhow!("inconsistent storage: no analysis recorded for function"))
    }

    /// Forgets every node and flow produced for a call, so its resolution can
    /// be retried from a clean slate.
    pub fn drop_subgraph_from_call(&mut self, call: ExprId) {
        if let Some(mark) = self.ctx.graph_builder.drop_subgraph_from_call(call) {
            self.ctx.flow_on_nodes.retain(|node, _| node.0 < mark);
            self.ctx.node_for_expr.retain(|_, node| node.0 < mark);
        }
    }

    // ------------------------------------------------------------------
    // Flow plumbing
    // ------------------------------------------------------------------

    fn store_flow(&mut self, node: NodeId, flow: Flow) {
        self.ctx.flow_on_nodes.insert(node, flow);
    }

    fn flow_at(&self, node: NodeId) -> Flow {
        self.ctx
            .flow_on_nodes
            .get(&node)
            .cloned()
            .unwrap_or_default()
    }

    /// The universal event prelude: joins the usable predecessor flows into
    /// this node's flow. A dead node takes every non-back predecessor; a live
    /// one only edges marked as used in dataflow. Call exits with several
    /// dataflow predecessors union instead, their paths being sequential.
    fn merge_incoming_flow(&mut self, node: NodeId, update_receivers: bool, should_fork: bool) -> Flow {
        let logic = LogicSystem::new(self.types);
        let (predecessors, is_call) = {
            let graph = self.ctx.graph_builder.graph();
            let node_is_dead = graph.node(node).is_dead;
            let mut predecessors = Vec::new();
            for (previous, label) in graph.incoming_edges(node) {
                let usable = if node_is_dead {
                    !label.is_back
                } else {
                    label.used_in_dfa
                };
                if usable {
                    if let Some(flow) = self.ctx.flow_on_nodes.get(previous) {
                        predecessors.push(flow.clone());
                    }
                }
            }
            (predecessors, graph.node(node).kind == NodeKind::FunctionCall)
        };
        let mut flow = if is_call && predecessors.len() > 1 {
            logic.union(&predecessors)
        } else {
            logic.join(&predecessors)
        };
        if update_receivers {
            self.receiver_stack.update_all(self.types, &flow);
        }
        if should_fork {
            flow = flow.fork();
        }
        self.store_flow(node, flow.clone());
        flow
    }

    /// Adds a fact, propagating it to the receiver stack when the variable is
    /// an implicit receiver.
    fn add_type_statement(&mut self, flow: &mut Flow, statement: TypeStatement) {
        let logic = LogicSystem::new(self.types);
        let variable = statement.variable;
        if logic.add_type_statement(flow, statement)
            && self.ctx.variable_storage.is_receiver_variable(variable)
        {
            self.receiver_stack.update_receiver(self.types, flow, variable);
        }
    }

    /// Approves a statement inside the flow and pushes any receiver
    /// refinements to the stack.
    fn approve_inside(
        &mut self,
        flow: &mut Flow,
        statement: OperationStatement,
        remove_synthetics: bool,
    ) {
        let logic = LogicSystem::new(self.types);
        let installed = logic.approve_statements_inside_flow(flow, statement, remove_synthetics);
        for installed_statement in installed {
            if self
                .ctx
                .variable_storage
                .is_receiver_variable(installed_statement.variable)
            {
                self.receiver_stack
                    .update_receiver(self.types, flow, installed_statement.variable);
            }
        }
    }

    fn record_expr_node(&mut self, expr: ExprId, node: NodeId) {
        self.ctx.node_for_expr.insert(expr, node);
    }

    // ------------------------------------------------------------------
    // Statement driver
    // ------------------------------------------------------------------

    fn process_statement(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Declaration {
                symbol,
                initializer,
            } => {
                if let Some(init) = initializer {
                    self.process_expression(init)?;
                }
                self.exit_variable_declaration(*symbol, initializer.as_ref());
                Ok(())
            }
            Stmt::Assignment { symbol, value } => {
                self.process_expression(value)?;
                self.exit_variable_assignment(*symbol, value);
                Ok(())
            }
            Stmt::Expr(expr) => self.process_expression(expr),
            Stmt::Return { value } => {
                if let Some(expr) = value {
                    self.process_expression(expr)?;
                }
                self.exit_jump(value.as_ref());
                Ok(())
            }
            Stmt::While { condition, body } => self.process_while(condition, body),
            Stmt::DoWhile { body, condition } => self.process_do_while(body, condition),
        }
    }

    fn process_expression(&mut self, expr: &Expr) -> Result<()> {
        match &expr.kind {
            ExprKind::Literal(_) => Ok(()),
            ExprKind::Access { receiver, .. } => {
                if let Some(receiver) = receiver {
                    self.process_expression(receiver)?;
                }
                self.exit_qualified_access(expr);
                Ok(())
            }
            ExprKind::TypeTest { operand, .. } => {
                self.process_expression(operand)?;
                self.exit_type_test(expr);
                Ok(())
            }
            ExprKind::Cast { operand, .. } => {
                self.process_expression(operand)?;
                self.exit_cast(expr);
                Ok(())
            }
            ExprKind::Equality { lhs, rhs, .. } => {
                self.process_expression(lhs)?;
                self.process_expression(rhs)?;
                self.exit_equality(expr);
                Ok(())
            }
            ExprKind::BooleanOp { left, right, .. } => {
                let node = self.ctx.graph_builder.enter_binary_operator(expr.id);
                self.merge_incoming_flow(node, false, false);
                self.process_expression(left)?;
                self.exit_left_binary_operator(expr, left);
                self.process_expression(right)?;
                self.exit_binary_operator(expr, left, right);
                Ok(())
            }
            ExprKind::Not { operand } => {
                self.process_expression(operand)?;
                self.exit_not(expr, operand);
                Ok(())
            }
            ExprKind::CheckedNotNull { operand } => {
                self.process_expression(operand)?;
                self.exit_checked_not_null(expr, operand);
                Ok(())
            }
            ExprKind::SafeCall { receiver, call } => {
                self.process_expression(receiver)?;
                self.enter_safe_call(expr, receiver);
                self.process_expression(call)?;
                self.exit_safe_call(expr, receiver);
                Ok(())
            }
            ExprKind::Call { .. } => self.process_call(expr),
            ExprKind::When {
                branches,
                else_body,
            } => self.process_when(expr, branches, else_body.as_deref()),
        }
    }

    // ------------------------------------------------------------------
    // Functions and jumps
    // ------------------------------------------------------------------

    fn enter_function(&mut self, function: &Function) {
        let (enter, _exit) = self.ctx.graph_builder.enter_function();
        self.function_frames.push(FunctionFrame {
            function: None,
            returns: Vec::new(),
        });
        if let Some(receiver) = function.receiver {
            let variable = self
                .ctx
                .variable_storage
                .get_or_create_real_for_symbol(self.symbols, receiver);
            let ty = self.symbols.get(receiver).ty.clone();
            self.receiver_stack.push(variable, receiver, ty);
        }
        self.store_flow(enter, Flow::new());
    }

    fn exit_function(&mut self, function: &Function) -> Result<ControlFlowGraphReference> {
        let exit = self.ctx.graph_builder.exit_function();
        self.merge_incoming_flow(exit, true, false);
        self.function_frames
            .pop()
            .ok_or_else(|| anyhow!("inconsistent storage: no function frame to pop"))?;
        for param in &function.params {
            self.ctx.variable_storage.remove_real(*param);
        }
        if function.receiver.is_some() {
            self.receiver_stack.pop();
        }
        trace!(name = %function.name, nodes = self.ctx.graph_builder.graph().node_count(), "exit function");
        Ok(ControlFlowGraphReference {
            graph: self.ctx.graph_builder.graph().clone(),
            data_flow_info: DataFlowInfo {
                variable_storage: self.ctx.variable_storage.clone(),
                flow_on_nodes: self.ctx.flow_on_nodes.clone(),
            },
        })
    }

    fn exit_jump(&mut self, value: Option<&Expr>) {
        let node = self.ctx.graph_builder.jump_node();
        self.merge_incoming_flow(node, false, false);
        if let Some(expr) = value {
            let expr_node = self
                .ctx
                .node_for_expr
                .get(&expr.id)
                .copied()
                .unwrap_or(node);
            let static_type = expr.static_type(self.symbols);
            if let Some(frame) = self.function_frames.last_mut() {
                frame.returns.push((expr.id, expr_node, static_type));
            }
        }
    }

    fn process_anonymous_function(
        &mut self,
        lambda: &AnonymousFunction,
        kind: InvocationKind,
    ) -> Result<()> {
        let (enter, _exit) = self.ctx.graph_builder.enter_anonymous_function(lambda.id);
        self.function_frames.push(FunctionFrame {
            function: Some(lambda.id),
            returns: Vec::new(),
        });
        if let Some(receiver) = lambda.receiver {
            let variable = self
                .ctx
                .variable_storage
                .get_or_create_real_for_symbol(self.symbols, receiver);
            let ty = self.symbols.get(receiver).ty.clone();
            self.receiver_stack.push(variable, receiver, ty);
        }
        self.merge_incoming_flow(enter, false, true);
        for stmt in &lambda.body {
            self.process_statement(stmt)?;
        }
        // The trailing expression is the implicit return value.
        if let Some(Stmt::Expr(last)) = lambda.body.last() {
            if let Some(node) = self.ctx.node_for_expr.get(&last.id).copied() {
                let static_type = last.static_type(self.symbols);
                if let Some(frame) = self.function_frames.last_mut() {
                    frame.returns.push((last.id, node, static_type));
                }
            }
        }
        let exit = self.ctx.graph_builder.exit_anonymous_function();
        self.merge_incoming_flow(exit, true, false);
        let frame = self
            .function_frames
            .pop()
            .ok_or_else(|| anyhow!("inconsistent storage: no lambda frame to pop"))?;
        if let Some(function) = frame.function {
            self.ctx.return_expressions.insert(function, frame.returns);
        }
        if lambda.receiver.is_some() {
            self.receiver_stack.pop();
        }
        if let Some(call_frame) = self.call_frames.last_mut() {
            call_frame
                .lambda_exits
                .push((exit, kind == InvocationKind::ExactlyOnce));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Accesses and operators
    // ------------------------------------------------------------------

    fn exit_qualified_access(&mut self, expr: &Expr) {
        let node = self
            .ctx
            .graph_builder
            .expression_node(NodeKind::QualifiedAccess, expr.id);
        self.record_expr_node(expr.id, node);
        let flow = self.merge_incoming_flow(node, false, false);
        self.ctx
            .variable_storage
            .get_or_create_variable(&flow, self.symbols, expr);
    }

    fn exit_type_test(&mut self, expr: &Expr) {
        let ExprKind::TypeTest {
            operand,
            ty,
            negated,
        } = &expr.kind
        else {
            return;
        };
        let node = self
            .ctx
            .graph_builder
            .expression_node(NodeKind::TypeOperator, expr.id);
        self.record_expr_node(expr.id, node);
        let mut flow = self.merge_incoming_flow(node, false, false);
        let logic = LogicSystem::new(self.types);
        let result = self.ctx.variable_storage.create_synthetic(expr.id);
        if let Some(operand_var) =
            self.ctx
                .variable_storage
                .get_or_create_real(&flow, self.symbols, operand)
        {
            let positive = Operation::from_boolean(!negated);
            logic.add_implication(
                &mut flow,
                Implication::new(
                    OperationStatement::new(result, positive),
                    Statement::Type(TypeStatement::with_exact(operand_var, ty.clone())),
                ),
            );
            logic.add_implication(
                &mut flow,
                Implication::new(
                    OperationStatement::new(result, positive.invert()),
                    Statement::Type(TypeStatement::with_excluded(operand_var, ty.clone())),
                ),
            );
            if !ty.is_nullable() {
                logic.add_implication(
                    &mut flow,
                    Implication::new(
                        OperationStatement::new(result, positive),
                        Statement::Operation(OperationStatement::new(
                            operand_var,
                            Operation::NotEqNull,
                        )),
                    ),
                );
                logic.add_implication(
                    &mut flow,
                    Implication::new(
                        OperationStatement::new(result, positive),
                        Statement::Type(TypeStatement::with_exact(operand_var, Ty::Any)),
                    ),
                );
            }
            // `x !is Nothing?` can only mean x is a value.
            if *negated && *ty == Ty::null() {
                self.add_type_statement(
                    &mut flow,
                    TypeStatement::with_exact(operand_var, Ty::Any),
                );
            }
        }
        self.store_flow(node, flow);
    }

    fn exit_cast(&mut self, expr: &Expr) {
        let ExprKind::Cast { operand, ty, safe } = &expr.kind else {
            return;
        };
        let node = self
            .ctx
            .graph_builder
            .expression_node(NodeKind::TypeOperator, expr.id);
        self.record_expr_node(expr.id, node);
        let mut flow = self.merge_incoming_flow(node, false, false);
        let logic = LogicSystem::new(self.types);
        let operand_var = self
            .ctx
            .variable_storage
            .get_or_create_real(&flow, self.symbols, operand);
        if *safe {
            let result = self.ctx.variable_storage.create_synthetic(expr.id);
            if let Some(operand_var) = operand_var {
                logic.add_implication(
                    &mut flow,
                    Implication::new(
                        OperationStatement::new(result, Operation::NotEqNull),
                        Statement::Type(TypeStatement::with_exact(operand_var, ty.clone())),
                    ),
                );
                logic.add_implication(
                    &mut flow,
                    Implication::new(
                        OperationStatement::new(result, Operation::EqNull),
                        Statement::Type(TypeStatement::with_excluded(operand_var, ty.clone())),
                    ),
                );
                if !ty.is_nullable() {
                    logic.add_implication(
                        &mut flow,
                        Implication::new(
                            OperationStatement::new(result, Operation::NotEqNull),
                            Statement::Operation(OperationStatement::new(
                                operand_var,
                                Operation::NotEqNull,
                            )),
                        ),
                    );
                }
            }
        } else if let Some(operand_var) = operand_var {
            if !ty.is_nullable() {
                self.approve_inside(
                    &mut flow,
                    OperationStatement::new(operand_var, Operation::NotEqNull),
                    true,
                );
            }
            self.add_type_statement(&mut flow, TypeStatement::with_exact(operand_var, ty.clone()));
        }
        self.store_flow(node, flow);
    }

    fn exit_equality(&mut self, expr: &Expr) {
        let ExprKind::Equality { op, lhs, rhs } = &expr.kind else {
            return;
        };
        let node = self
            .ctx
            .graph_builder
            .expression_node(NodeKind::Equality, expr.id);
        self.record_expr_node(expr.id, node);
        let mut flow = self.merge_incoming_flow(node, false, false);
        if lhs.is_constant() && rhs.is_constant() {
            self.store_flow(node, flow);
            return;
        }
        let logic = LogicSystem::new(self.types);
        let result = self.ctx.variable_storage.create_synthetic(expr.id);
        let is_eq = op.is_eq();
        if lhs.as_null_constant() || rhs.as_null_constant() {
            let other = if lhs.as_null_constant() { rhs } else { lhs };
            let other_var = self
                .ctx
                .variable_storage
                .get_or_create_variable(&flow, self.symbols, other);
            let (when_true, when_false) = if is_eq {
                (Operation::EqNull, Operation::NotEqNull)
            } else {
                (Operation::NotEqNull, Operation::EqNull)
            };
            logic.add_implication(
                &mut flow,
                Implication::new(
                    OperationStatement::new(result, Operation::EqTrue),
                    Statement::Operation(OperationStatement::new(other_var, when_true)),
                ),
            );
            logic.add_implication(
                &mut flow,
                Implication::new(
                    OperationStatement::new(result, Operation::EqFalse),
                    Statement::Operation(OperationStatement::new(other_var, when_false)),
                ),
            );
            if other_var.is_real() {
                // Whichever truth value means "is a value" also pins the type.
                let definite = Operation::from_boolean(!is_eq);
                logic.add_implication(
                    &mut flow,
                    Implication::new(
                        OperationStatement::new(result, definite),
                        Statement::Type(TypeStatement::with_exact(other_var, Ty::Any)),
                    ),
                );
            }
        } else if let Some(constant) = lhs.as_bool_constant().or_else(|| rhs.as_bool_constant()) {
            let other = if lhs.as_bool_constant().is_some() {
                rhs
            } else {
                lhs
            };
            let other_var = self
                .ctx
                .variable_storage
                .get_or_create_variable(&flow, self.symbols, other);
            let inverted = is_eq != constant;
            logic.translate_variable_from_condition_in_statements(
                &mut flow,
                other_var,
                result,
                |implication| {
                    Some(if inverted {
                        implication.invert_condition()
                    } else {
                        implication
                    })
                },
            );
        } else if op.is_identity() {
            let lhs_type = lhs.static_type(self.symbols);
            let rhs_type = rhs.static_type(self.symbols);
            if !lhs_type.is_nullable() && !rhs_type.is_nullable() {
                let key = Operation::from_boolean(is_eq);
                if let Some(lhs_var) =
                    self.ctx
                        .variable_storage
                        .get_or_create_real(&flow, self.symbols, lhs)
                {
                    logic.add_implication(
                        &mut flow,
                        Implication::new(
                            OperationStatement::new(result, key),
                            Statement::Type(TypeStatement::with_exact(lhs_var, rhs_type.clone())),
                        ),
                    );
                }
                if let Some(rhs_var) =
                    self.ctx
                        .variable_storage
                        .get_or_create_real(&flow, self.symbols, rhs)
                {
                    logic.add_implication(
                        &mut flow,
                        Implication::new(
                            OperationStatement::new(result, key),
                            Statement::Type(TypeStatement::with_exact(rhs_var, lhs_type)),
                        ),
                    );
                }
            }
        }
        self.store_flow(node, flow);
    }

    fn exit_not(&mut self, expr: &Expr, operand: &Expr) {
        let node = self
            .ctx
            .graph_builder
            .expression_node(NodeKind::Not, expr.id);
        self.record_expr_node(expr.id, node);
        let mut flow = self.merge_incoming_flow(node, false, false);
        let logic = LogicSystem::new(self.types);
        let operand_var = self
            .ctx
            .variable_storage
            .get_or_create_variable(&flow, self.symbols, operand);
        let result = self.ctx.variable_storage.create_synthetic(expr.id);
        logic.replace_variable_from_condition_in_statements(
            &mut flow,
            operand_var,
            result,
            |implication| Some(implication.invert_condition()),
        );
        self.store_flow(node, flow);
    }

    fn exit_checked_not_null(&mut self, expr: &Expr, operand: &Expr) {
        let node = self
            .ctx
            .graph_builder
            .expression_node(NodeKind::CheckedNotNull, expr.id);
        self.record_expr_node(expr.id, node);
        let mut flow = self.merge_incoming_flow(node, false, false);
        if let Some(operand_var) =
            self.ctx
                .variable_storage
                .get_or_create_real(&flow, self.symbols, operand)
        {
            self.add_type_statement(&mut flow, TypeStatement::with_exact(operand_var, Ty::Any));
            self.approve_inside(
                &mut flow,
                OperationStatement::new(operand_var, Operation::NotEqNull),
                true,
            );
        } else if let Some(operand_var) = self
            .ctx
            .variable_storage
            .variable_for_expression(operand.id)
        {
            // A transient operand still drives pending implications, e.g.
            // the result of a safe call chain.
            self.approve_inside(
                &mut flow,
                OperationStatement::new(operand_var, Operation::NotEqNull),
                true,
            );
        }
        self.store_flow(node, flow);
    }

    fn enter_safe_call(&mut self, expr: &Expr, receiver: &Expr) {
        let node = self.ctx.graph_builder.enter_safe_call(expr.id);
        let mut flow = self.merge_incoming_flow(node, false, true);
        if let Some(receiver_var) =
            self.ctx
                .variable_storage
                .get_or_create_real(&flow, self.symbols, receiver)
        {
            self.add_type_statement(&mut flow, TypeStatement::with_exact(receiver_var, Ty::Any));
            self.approve_inside(
                &mut flow,
                OperationStatement::new(receiver_var, Operation::NotEqNull),
                false,
            );
        } else if let Some(receiver_var) = self
            .ctx
            .variable_storage
            .variable_for_expression(receiver.id)
        {
            self.approve_inside(
                &mut flow,
                OperationStatement::new(receiver_var, Operation::NotEqNull),
                false,
            );
        }
        self.store_flow(node, flow);
    }

    fn exit_safe_call(&mut self, expr: &Expr, receiver: &Expr) {
        let node = self.ctx.graph_builder.exit_safe_call(expr.id);
        self.record_expr_node(expr.id, node);
        let mut flow = self.merge_incoming_flow(node, true, false);
        let logic = LogicSystem::new(self.types);
        let result = self.ctx.variable_storage.create_synthetic(expr.id);
        // When the receiver's variable cannot be resolved the facts are
        // skipped entirely.
        if let Some(receiver_var) =
            self.ctx
                .variable_storage
                .get_or_create_real(&flow, self.symbols, receiver)
        {
            logic.add_implication(
                &mut flow,
                Implication::new(
                    OperationStatement::new(result, Operation::NotEqNull),
                    Statement::Operation(OperationStatement::new(
                        receiver_var,
                        Operation::NotEqNull,
                    )),
                ),
            );
            logic.add_implication(
                &mut flow,
                Implication::new(
                    OperationStatement::new(result, Operation::NotEqNull),
                    Statement::Type(TypeStatement::with_exact(receiver_var, Ty::Any)),
                ),
            );
        } else if let Some(receiver_var) = self
            .ctx
            .variable_storage
            .variable_for_expression(receiver.id)
        {
            logic.add_implication(
                &mut flow,
                Implication::new(
                    OperationStatement::new(result, Operation::NotEqNull),
                    Statement::Operation(OperationStatement::new(
                        receiver_var,
                        Operation::NotEqNull,
                    )),
                ),
            );
        }
        self.store_flow(node, flow);
    }

    // ------------------------------------------------------------------
    // Boolean operators
    // ------------------------------------------------------------------

    fn exit_left_binary_operator(&mut self, expr: &Expr, left: &Expr) {
        let ExprKind::BooleanOp { op, .. } = &expr.kind else {
            return;
        };
        let (left_exit, right_enter) = self.ctx.graph_builder.exit_left_binary_operator(expr.id);
        let flow = self.merge_incoming_flow(left_exit, false, false);
        let left_var = self
            .ctx
            .variable_storage
            .get_or_create_variable(&flow, self.symbols, left);
        let is_and = matches!(op, BooleanOp::And);
        // The right operand only evaluates when the left did not decide the
        // result, so its entry flow assumes the left's non-deciding value.
        let mut right_flow = flow.fork();
        self.approve_inside(
            &mut right_flow,
            OperationStatement::new(left_var, Operation::from_boolean(is_and)),
            false,
        );
        self.store_flow(right_enter, right_flow);
    }

    fn exit_binary_operator(&mut self, expr: &Expr, left: &Expr, right: &Expr) {
        let ExprKind::BooleanOp { op, .. } = &expr.kind else {
            return;
        };
        let is_and = matches!(op, BooleanOp::And);
        let nodes = self.ctx.graph_builder.exit_binary_operator(expr.id);
        self.record_expr_node(expr.id, nodes.exit);
        let mut flow = self.merge_incoming_flow(nodes.exit, false, false);
        let logic = LogicSystem::new(self.types);
        let left_var = self
            .ctx
            .variable_storage
            .get_or_create_variable(&flow, self.symbols, left);
        let right_var = self
            .ctx
            .variable_storage
            .get_or_create_variable(&flow, self.symbols, right);
        let result = self.ctx.variable_storage.create_synthetic(expr.id);
        if nodes.right_is_dead {
            // The only normal exit is the short circuit, so the left operand
            // must have decided the result.
            self.approve_inside(
                &mut flow,
                OperationStatement::new(left_var, Operation::from_boolean(!is_and)),
                true,
            );
        } else {
            let flow_from_left = self.flow_at(nodes.left_exit);
            let flow_from_right = self.flow_at(nodes.right_last);
            let deciding = Operation::from_boolean(is_and);
            let short = Operation::from_boolean(!is_and);
            // Both operands evaluated and produced the non-short-circuit value.
            let mut both = logic.approved_type_statements_after(
                &flow_from_right,
                OperationStatement::new(left_var, deciding),
            );
            let right_deciding = logic.approved_type_statements_after(
                &flow_from_right,
                OperationStatement::new(right_var, deciding),
            );
            for (variable, statement) in right_deciding {
                both.entry(variable)
                    .and_modify(|existing| existing.union_with(&statement))
                    .or_insert(statement);
            }
            // Either the left short-circuited or the right decided.
            let left_short = logic.approved_type_statements_after(
                &flow_from_left,
                OperationStatement::new(left_var, short),
            );
            let right_short = logic.approved_type_statements_after(
                &flow_from_right,
                OperationStatement::new(right_var, short),
            );
            let either = logic.or_type_statements(&[left_short, right_short]);
            let (approved_if_true, approved_if_false) = if is_and {
                (both, either)
            } else {
                (either, both)
            };
            for (_, statement) in approved_if_true {
                logic.add_implication(
                    &mut flow,
                    Implication::new(
                        OperationStatement::new(result, Operation::EqTrue),
                        Statement::Type(statement),
                    ),
                );
            }
            for (_, statement) in approved_if_false {
                logic.add_implication(
                    &mut flow,
                    Implication::new(
                        OperationStatement::new(result, Operation::EqFalse),
                        Statement::Type(statement),
                    ),
                );
            }
        }
        self.receiver_stack.update_all(self.types, &flow);
        self.store_flow(nodes.exit, flow);
    }

    // ------------------------------------------------------------------
    // when
    // ------------------------------------------------------------------

    fn process_when(
        &mut self,
        expr: &Expr,
        branches: &[WhenBranch],
        else_body: Option<&[Stmt]>,
    ) -> Result<()> {
        let enter = self.ctx.graph_builder.enter_when(expr.id);
        self.merge_incoming_flow(enter, false, false);
        self.when_frames.push(WhenFrame {
            last_condition: None,
        });
        for branch in branches {
            let condition_enter = self.ctx.graph_builder.enter_when_branch_condition();
            let mut flow = self.merge_incoming_flow(condition_enter, false, false);
            // Negative information from the previous branch accumulates.
            if let Some(previous) = self.when_frames.last().and_then(|f| f.last_condition) {
                flow = flow.fork();
                self.approve_inside(
                    &mut flow,
                    OperationStatement::new(previous, Operation::EqFalse),
                    true,
                );
                self.store_flow(condition_enter, flow);
            }
            self.process_expression(&branch.condition)?;
            let condition_exit = self
                .ctx
                .graph_builder
                .exit_when_branch_condition(branch.condition.id);
            let flow = self.merge_incoming_flow(condition_exit, false, false);
            let condition_var = self.ctx.variable_storage.get_or_create_variable(
                &flow,
                self.symbols,
                &branch.condition,
            );
            if let Some(frame) = self.when_frames.last_mut() {
                frame.last_condition = Some(condition_var);
            }
            let result_enter = self.ctx.graph_builder.enter_when_branch_result();
            let mut branch_flow = self.merge_incoming_flow(result_enter, false, true);
            self.approve_inside(
                &mut branch_flow,
                OperationStatement::new(condition_var, Operation::EqTrue),
                false,
            );
            self.store_flow(result_enter, branch_flow);
            for stmt in &branch.body {
                self.process_statement(stmt)?;
            }
            let result_exit = self.ctx.graph_builder.exit_when_branch_result();
            self.merge_incoming_flow(result_exit, false, false);
        }
        if let Some(body) = else_body {
            let else_enter = self.ctx.graph_builder.enter_when_else_branch();
            let mut flow = self.merge_incoming_flow(else_enter, false, true);
            if let Some(previous) = self.when_frames.last().and_then(|f| f.last_condition) {
                self.approve_inside(
                    &mut flow,
                    OperationStatement::new(previous, Operation::EqFalse),
                    true,
                );
            }
            self.store_flow(else_enter, flow);
            for stmt in body {
                self.process_statement(stmt)?;
            }
            let result_exit = self.ctx.graph_builder.exit_when_branch_result();
            self.merge_incoming_flow(result_exit, false, false);
        }
        let needs_synthetic_else = else_body.is_none();
        let (synthetic, exit) = self.ctx.graph_builder.exit_when(needs_synthetic_else);
        if let Some(synthetic) = synthetic {
            let mut flow = self.merge_incoming_flow(synthetic, false, true);
            if let Some(previous) = self.when_frames.last().and_then(|f| f.last_condition) {
                self.approve_inside(
                    &mut flow,
                    OperationStatement::new(previous, Operation::EqFalse),
                    true,
                );
            }
            self.store_flow(synthetic, flow);
        }
        self.when_frames.pop();
        self.record_expr_node(expr.id, exit);
        self.merge_incoming_flow(exit, true, false);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Loops
    // ------------------------------------------------------------------

    fn process_while(&mut self, condition: &Expr, body: &[Stmt]) -> Result<()> {
        let (loop_enter, condition_enter) = self.ctx.graph_builder.enter_while_loop();
        self.merge_incoming_flow(loop_enter, false, false);
        self.merge_incoming_flow(condition_enter, true, false);
        self.process_expression(condition)?;
        let (condition_exit, block_enter) =
            self.ctx.graph_builder.exit_while_condition(condition.id);
        let flow = self.merge_incoming_flow(condition_exit, false, false);
        let condition_var =
            self.ctx
                .variable_storage
                .get_or_create_variable(&flow, self.symbols, condition);
        let mut body_flow = flow.fork();
        self.approve_inside(
            &mut body_flow,
            OperationStatement::new(condition_var, Operation::EqTrue),
            false,
        );
        self.store_flow(block_enter, body_flow);
        for stmt in body {
            self.process_statement(stmt)?;
        }
        let (block_exit, loop_exit) = self.ctx.graph_builder.exit_while_loop();
        self.merge_incoming_flow(block_exit, false, false);
        let mut exit_flow = self.flow_at(condition_exit).fork();
        self.approve_inside(
            &mut exit_flow,
            OperationStatement::new(condition_var, Operation::EqFalse),
            true,
        );
        self.receiver_stack.update_all(self.types, &exit_flow);
        self.store_flow(loop_exit, exit_flow);
        Ok(())
    }

    fn process_do_while(&mut self, body: &[Stmt], condition: &Expr) -> Result<()> {
        let (loop_enter, block_enter) = self.ctx.graph_builder.enter_do_while_loop();
        self.merge_incoming_flow(loop_enter, false, false);
        self.merge_incoming_flow(block_enter, true, false);
        for stmt in body {
            self.process_statement(stmt)?;
        }
        let (block_exit, condition_enter) = self.ctx.graph_builder.enter_do_while_condition();
        self.merge_incoming_flow(block_exit, false, false);
        self.merge_incoming_flow(condition_enter, false, false);
        self.process_expression(condition)?;
        let (condition_exit, loop_exit) = self.ctx.graph_builder.exit_do_while_loop(condition.id);
        let flow = self.merge_incoming_flow(condition_exit, false, false);
        let condition_var =
            self.ctx
                .variable_storage
                .get_or_create_variable(&flow, self.symbols, condition);
        let mut exit_flow = flow.fork();
        self.approve_inside(
            &mut exit_flow,
            OperationStatement::new(condition_var, Operation::EqFalse),
            true,
        );
        self.receiver_stack.update_all(self.types, &exit_flow);
        self.store_flow(loop_exit, exit_flow);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Declarations, assignments, calls
    // ------------------------------------------------------------------

    fn exit_variable_declaration(&mut self, symbol: SymbolId, initializer: Option<&Expr>) {
        let node = self.ctx.graph_builder.statement_node(None);
        let mut flow = self.merge_incoming_flow(node, false, false);
        let property_var = self
            .ctx
            .variable_storage
            .get_or_create_real_for_symbol(self.symbols, symbol);
        if let Some(init) = initializer {
            self.bind_initializer(&mut flow, property_var, symbol, init);
        }
        self.store_flow(node, flow);
    }

    fn exit_variable_assignment(&mut self, symbol: SymbolId, value: &Expr) {
        let node = self.ctx.graph_builder.statement_node(None);
        let mut flow = self.merge_incoming_flow(node, false, false);
        let logic = LogicSystem::new(self.types);
        // The target is taken without unwrapping so its aliasing can be
        // refreshed, and everything known about it is erased.
        let property_var = self
            .ctx
            .variable_storage
            .get_or_create_real_for_symbol(self.symbols, symbol);
        logic.remove_local_variable_alias(&mut flow, property_var);
        logic.remove_all_about_variable(&mut flow, property_var);
        self.bind_initializer(&mut flow, property_var, symbol, value);
        self.store_flow(node, flow);
    }

    fn bind_initializer(
        &mut self,
        flow: &mut Flow,
        property_var: VarId,
        symbol: SymbolId,
        initializer: &Expr,
    ) {
        let logic = LogicSystem::new(self.types);
        let initializer_var =
            self.ctx
                .variable_storage
                .get_or_create_variable(flow, self.symbols, initializer);
        let is_val = matches!(self.symbols.get(symbol).kind, SymbolKind::LocalVal);
        if initializer_var.is_synthetic() {
            // Facts about the transient initializer become facts about the
            // variable it was bound to.
            logic.translate_variable_from_condition_in_statements(
                flow,
                initializer_var,
                property_var,
                Some,
            );
        } else if is_val {
            logic.add_local_variable_alias(
                flow,
                property_var,
                initializer_var,
                initializer.static_type(self.symbols),
            );
        }
        // A val bound to a non-null initializer keeps the initializer's type,
        // whether initialized at its declaration or by a deferred first
        // assignment. A reassigned var only gets its facts erased.
        if is_val {
            let initializer_type = initializer.static_type(self.symbols);
            if !initializer_type.is_nullable() {
                self.add_type_statement(
                    flow,
                    TypeStatement::with_exact(property_var, initializer_type),
                );
            }
        }
    }

    fn process_call(&mut self, expr: &Expr) -> Result<()> {
        let ExprKind::Call {
            function,
            receiver,
            args,
        } = &expr.kind
        else {
            return Ok(());
        };
        if let Some(receiver) = receiver {
            self.process_expression(receiver)?;
        }
        self.ctx.graph_builder.enter_function_call(expr.id);
        self.call_frames.push(CallFrame {
            lambda_exits: Vec::new(),
        });
        let description = self
            .provider
            .contract_description(self.symbols, *function)
            .cloned();
        for (index, arg) in args.iter().enumerate() {
            match arg {
                Argument::Expr(e) => self.process_expression(e)?,
                Argument::Lambda(lambda) => {
                    let kind = description
                        .as_ref()
                        .map(|d| d.invocation_kind(index))
                        .unwrap_or(InvocationKind::Unknown);
                    self.process_anonymous_function(lambda, kind)?;
                }
            }
        }
        let frame = self
            .call_frames
            .pop()
            .ok_or_else(|| anyhow!("inconsistent storage: no call frame to pop"))?;
        let node = self
            .ctx
            .graph_builder
            .exit_function_call(expr.id, &frame.lambda_exits);
        self.record_expr_node(expr.id, node);
        let mut flow = self.merge_incoming_flow(node, false, false);
        if !self.ignore_function_calls {
            if let Some(description) = &description {
                let logic = LogicSystem::new(self.types);
                let installed = process_contracts(
                    &logic,
                    &mut self.ctx.variable_storage,
                    self.symbols,
                    &mut flow,
                    description,
                    expr,
                );
                for statement in installed {
                    if self
                        .ctx
                        .variable_storage
                        .is_receiver_variable(statement.variable)
                    {
                        self.receiver_stack
                            .update_receiver(self.types, &flow, statement.variable);
                    }
                }
            }
        }
        self.store_flow(node, flow);
        Ok(())
    }
}
