//! Control flow graph and its builder
//!
//! The graph is node-per-event: every analyzer event maps to one node, and
//! edges carry the labels the dataflow merge consults (`used_in_dfa`,
//! `used_in_cfa`, `is_dead`, `is_back`). Construction is a single forward
//! pass; loops produce explicit back edges that dataflow never follows.

use crate::hir::ExprId;
use rustc_hash::FxHashMap;

/// Unique identifier for a CFG node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Label on an incoming edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeLabel {
    pub used_in_dfa: bool,
    pub used_in_cfa: bool,
    pub is_dead: bool,
    pub is_back: bool,
}

impl EdgeLabel {
    /// Ordinary forward edge, visible to both analyses.
    pub const NORMAL: EdgeLabel = EdgeLabel {
        used_in_dfa: true,
        used_in_cfa: true,
        is_dead: false,
        is_back: false,
    };
    /// Edge out of unreachable code.
    pub const DEAD: EdgeLabel = EdgeLabel {
        used_in_dfa: false,
        used_in_cfa: true,
        is_dead: true,
        is_back: false,
    };
    /// Loop back edge, excluded from dataflow to keep the pass single-shot.
    pub const BACK: EdgeLabel = EdgeLabel {
        used_in_dfa: false,
        used_in_cfa: true,
        is_dead: false,
        is_back: true,
    };
    /// Control-only edge; dataflow ignores it.
    pub const CFG_ONLY: EdgeLabel = EdgeLabel {
        used_in_dfa: false,
        used_in_cfa: true,
        is_dead: false,
        is_back: false,
    };
    /// Dataflow-only edge; control-flow analyses ignore it.
    pub const DFG_ONLY: EdgeLabel = EdgeLabel {
        used_in_dfa: true,
        used_in_cfa: false,
        is_dead: false,
        is_back: false,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    FunctionEnter,
    FunctionExit,
    AnonymousFunctionEnter,
    AnonymousFunctionExit,
    Statement,
    QualifiedAccess,
    TypeOperator,
    Equality,
    CheckedNotNull,
    Not,
    FunctionCall,
    SafeCallEnter,
    SafeCallExit,
    WhenEnter,
    WhenBranchConditionEnter,
    WhenBranchConditionExit,
    WhenBranchResultEnter,
    WhenBranchResultExit,
    WhenSyntheticElse,
    WhenExit,
    BinaryOperatorEnter,
    BinaryOperatorExitLeft,
    BinaryOperatorEnterRight,
    BinaryOperatorExit,
    LoopEnter,
    LoopConditionEnter,
    LoopConditionExit,
    LoopBlockEnter,
    LoopBlockExit,
    LoopExit,
    Jump,
}

#[derive(Debug, Clone)]
pub struct CfgNode {
    pub id: NodeId,
    pub kind: NodeKind,
    /// The syntactic element this node was produced for, if any.
    pub expr: Option<ExprId>,
    pub is_dead: bool,
}

/// The graph itself. Nodes are stored in creation order.
#[derive(Debug, Clone, Default)]
pub struct ControlFlowGraph {
    nodes: Vec<CfgNode>,
    incoming: Vec<Vec<(NodeId, EdgeLabel)>>,
    outgoing: Vec<Vec<NodeId>>,
}

impl ControlFlowGraph {
    pub fn node(&self, id: NodeId) -> &CfgNode {
        &self.nodes[id.0 as usize]
    }

    pub fn incoming_edges(&self, id: NodeId) -> &[(NodeId, EdgeLabel)] {
        &self.incoming[id.0 as usize]
    }

    pub fn previous_nodes(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.incoming[id.0 as usize].iter().map(|(n, _)| *n)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn push(&mut self, kind: NodeKind, expr: Option<ExprId>, is_dead: bool) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(CfgNode {
            id,
            kind,
            expr,
            is_dead,
        });
        self.incoming.push(Vec::new());
        self.outgoing.push(Vec::new());
        id
    }

    fn add_edge(&mut self, from: NodeId, to: NodeId, label: EdgeLabel) {
        self.incoming[to.0 as usize].push((from, label));
        self.outgoing[from.0 as usize].push(to);
    }

    fn mark_alive(&mut self, id: NodeId) {
        self.nodes[id.0 as usize].is_dead = false;
    }

    fn truncate(&mut self, count: usize) {
        self.nodes.truncate(count);
        self.incoming.truncate(count);
        self.outgoing.truncate(count);
        let limit = count as u32;
        for edges in &mut self.incoming {
            edges.retain(|(from, _)| from.0 < limit);
        }
        for targets in &mut self.outgoing {
            targets.retain(|to| to.0 < limit);
        }
    }
}

struct FunctionFrame {
    exit: NodeId,
}

struct WhenFrame {
    last_condition_exit: Option<NodeId>,
    branch_exits: Vec<(NodeId, bool)>,
}

struct LoopFrame {
    /// Back-edge target: the condition entry for `while`, the block entry for
    /// `do-while`.
    back_target: NodeId,
    condition_exit: Option<NodeId>,
}

struct BoolFrame {
    left_exit: NodeId,
}

struct SafeFrame {
    receiver_last: Option<NodeId>,
}

struct LambdaFrame {
    previous_last: Option<NodeId>,
    previous_alive: bool,
}

/// Result of sealing a binary boolean operator.
#[derive(Debug, Clone, Copy)]
pub struct BinaryOperatorExitNodes {
    pub exit: NodeId,
    pub left_exit: NodeId,
    pub right_last: NodeId,
    /// The right operand never completes normally while the left does.
    pub right_is_dead: bool,
}

/// Produces CFG nodes as the analyzer reports syntactic events.
#[derive(Default)]
pub struct GraphBuilder {
    graph: ControlFlowGraph,
    last_node: Option<NodeId>,
    alive: bool,
    function_stack: Vec<FunctionFrame>,
    when_stack: Vec<WhenFrame>,
    loop_stack: Vec<LoopFrame>,
    bool_stack: Vec<BoolFrame>,
    safe_stack: Vec<SafeFrame>,
    lambda_stack: Vec<LambdaFrame>,
    /// First node of each call subgraph, for retry cleanup.
    call_marks: FxHashMap<ExprId, (u32, Option<NodeId>)>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn graph(&self) -> &ControlFlowGraph {
        &self.graph
    }

    /// Whether analysis has returned to the top level.
    pub fn is_top_level(&self) -> bool {
        self.function_stack.is_empty()
    }

    fn add_node(&mut self, kind: NodeKind, expr: Option<ExprId>) -> NodeId {
        let id = self.graph.push(kind, expr, !self.alive);
        if let Some(last) = self.last_node {
            let label = if self.alive {
                EdgeLabel::NORMAL
            } else {
                EdgeLabel::DEAD
            };
            self.graph.add_edge(last, id, label);
        }
        self.last_node = Some(id);
        id
    }

    /// Re-anchors construction at an existing node, restoring its liveness.
    fn anchor(&mut self, node: NodeId) {
        self.alive = !self.graph.node(node).is_dead;
        self.last_node = Some(node);
    }

    pub fn enter_function(&mut self) -> (NodeId, NodeId) {
        self.last_node = None;
        self.alive = true;
        let enter = self.add_node(NodeKind::FunctionEnter, None);
        // The exit is reserved now so jumps have a target; it is sealed in
        // exit_function.
        let exit = self.graph.push(NodeKind::FunctionExit, None, true);
        self.function_stack.push(FunctionFrame { exit });
        (enter, exit)
    }

    pub fn exit_function(&mut self) -> NodeId {
        let frame = self.function_stack.pop().expect("no function to exit");
        if let Some(last) = self.last_node {
            let label = if self.alive {
                EdgeLabel::NORMAL
            } else {
                EdgeLabel::DEAD
            };
            self.graph.add_edge(last, frame.exit, label);
        }
        let live = self
            .graph
            .incoming_edges(frame.exit)
            .iter()
            .any(|(_, label)| !label.is_dead);
        if live {
            self.graph.mark_alive(frame.exit);
        }
        self.alive = live;
        self.last_node = Some(frame.exit);
        frame.exit
    }

    pub fn enter_anonymous_function(&mut self, function: ExprId) -> (NodeId, NodeId) {
        self.lambda_stack.push(LambdaFrame {
            previous_last: self.last_node,
            previous_alive: self.alive,
        });
        let enter = self.add_node(NodeKind::AnonymousFunctionEnter, Some(function));
        let exit = self
            .graph
            .push(NodeKind::AnonymousFunctionExit, Some(function), true);
        self.function_stack.push(FunctionFrame { exit });
        (enter, exit)
    }

    pub fn exit_anonymous_function(&mut self) -> NodeId {
        let exit = self.exit_function();
        let frame = self.lambda_stack.pop().expect("no lambda to exit");
        // The lambda is a detour; the caller chain continues where it left off.
        self.last_node = frame.previous_last;
        self.alive = frame.previous_alive;
        exit
    }

    pub fn statement_node(&mut self, expr: Option<ExprId>) -> NodeId {
        self.add_node(NodeKind::Statement, expr)
    }

    pub fn expression_node(&mut self, kind: NodeKind, expr: ExprId) -> NodeId {
        self.add_node(kind, Some(expr))
    }

    /// A jump to the innermost function exit. Construction continues dead.
    pub fn jump_node(&mut self) -> NodeId {
        let node = self.add_node(NodeKind::Jump, None);
        if let Some(frame) = self.function_stack.last() {
            let label = if self.alive {
                EdgeLabel::NORMAL
            } else {
                EdgeLabel::DEAD
            };
            self.graph.add_edge(node, frame.exit, label);
        }
        self.alive = false;
        node
    }

    pub fn enter_when(&mut self, expr: ExprId) -> NodeId {
        let node = self.add_node(NodeKind::WhenEnter, Some(expr));
        self.when_stack.push(WhenFrame {
            last_condition_exit: None,
            branch_exits: Vec::new(),
        });
        node
    }

    pub fn enter_when_branch_condition(&mut self) -> NodeId {
        if let Some(cond_exit) = self.when_stack.last().and_then(|f| f.last_condition_exit) {
            self.anchor(cond_exit);
        }
        self.add_node(NodeKind::WhenBranchConditionEnter, None)
    }

    pub fn exit_when_branch_condition(&mut self, condition: ExprId) -> NodeId {
        let node = self.add_node(NodeKind::WhenBranchConditionExit, Some(condition));
        if let Some(frame) = self.when_stack.last_mut() {
            frame.last_condition_exit = Some(node);
        }
        node
    }

    pub fn enter_when_branch_result(&mut self) -> NodeId {
        self.add_node(NodeKind::WhenBranchResultEnter, None)
    }

    /// Entry of the explicit `else` branch, anchored on the last condition's
    /// false path.
    pub fn enter_when_else_branch(&mut self) -> NodeId {
        if let Some(cond_exit) = self.when_stack.last().and_then(|f| f.last_condition_exit) {
            self.anchor(cond_exit);
        }
        self.add_node(NodeKind::WhenBranchResultEnter, None)
    }

    pub fn exit_when_branch_result(&mut self) -> NodeId {
        let node = self.add_node(NodeKind::WhenBranchResultExit, None);
        let alive = self.alive;
        if let Some(frame) = self.when_stack.last_mut() {
            frame.branch_exits.push((node, alive));
        }
        node
    }

    pub fn exit_when(&mut self, needs_synthetic_else: bool) -> (Option<NodeId>, NodeId) {
        let synthetic = if needs_synthetic_else {
            if let Some(cond_exit) = self.when_stack.last().and_then(|f| f.last_condition_exit) {
                self.anchor(cond_exit);
            }
            let node = self.add_node(NodeKind::WhenSyntheticElse, None);
            let alive = self.alive;
            if let Some(frame) = self.when_stack.last_mut() {
                frame.branch_exits.push((node, alive));
            }
            Some(node)
        } else {
            None
        };
        let frame = self.when_stack.pop().expect("no when to exit");
        let any_alive = frame.branch_exits.iter().any(|(_, alive)| *alive);
        let exit = self.graph.push(NodeKind::WhenExit, None, !any_alive);
        for (node, alive) in frame.branch_exits {
            let label = if alive {
                EdgeLabel::NORMAL
            } else {
                EdgeLabel::DEAD
            };
            self.graph.add_edge(node, exit, label);
        }
        self.alive = any_alive;
        self.last_node = Some(exit);
        (synthetic, exit)
    }

    pub fn enter_while_loop(&mut self) -> (NodeId, NodeId) {
        let loop_enter = self.add_node(NodeKind::LoopEnter, None);
        let condition_enter = self.add_node(NodeKind::LoopConditionEnter, None);
        self.loop_stack.push(LoopFrame {
            back_target: condition_enter,
            condition_exit: None,
        });
        (loop_enter, condition_enter)
    }

    pub fn exit_while_condition(&mut self, condition: ExprId) -> (NodeId, NodeId) {
        let condition_exit = self.add_node(NodeKind::LoopConditionExit, Some(condition));
        if let Some(frame) = self.loop_stack.last_mut() {
            frame.condition_exit = Some(condition_exit);
        }
        let block_enter = self.add_node(NodeKind::LoopBlockEnter, None);
        (condition_exit, block_enter)
    }

    pub fn exit_while_loop(&mut self) -> (NodeId, NodeId) {
        let block_exit = self.add_node(NodeKind::LoopBlockExit, None);
        let frame = self.loop_stack.pop().expect("no loop to exit");
        self.graph
            .add_edge(block_exit, frame.back_target, EdgeLabel::BACK);
        let condition_exit = frame.condition_exit.unwrap_or(block_exit);
        self.anchor(condition_exit);
        let loop_exit = self.add_node(NodeKind::LoopExit, None);
        (block_exit, loop_exit)
    }

    pub fn enter_do_while_loop(&mut self) -> (NodeId, NodeId) {
        let loop_enter = self.add_node(NodeKind::LoopEnter, None);
        let block_enter = self.add_node(NodeKind::LoopBlockEnter, None);
        self.loop_stack.push(LoopFrame {
            back_target: block_enter,
            condition_exit: None,
        });
        (loop_enter, block_enter)
    }

    pub fn enter_do_while_condition(&mut self) -> (NodeId, NodeId) {
        let block_exit = self.add_node(NodeKind::LoopBlockExit, None);
        let condition_enter = self.add_node(NodeKind::LoopConditionEnter, None);
        (block_exit, condition_enter)
    }

    pub fn exit_do_while_loop(&mut self, condition: ExprId) -> (NodeId, NodeId) {
        let condition_exit = self.add_node(NodeKind::LoopConditionExit, Some(condition));
        let frame = self.loop_stack.pop().expect("no loop to exit");
        self.graph
            .add_edge(condition_exit, frame.back_target, EdgeLabel::BACK);
        let loop_exit = self.add_node(NodeKind::LoopExit, None);
        (condition_exit, loop_exit)
    }

    pub fn enter_binary_operator(&mut self, expr: ExprId) -> NodeId {
        self.add_node(NodeKind::BinaryOperatorEnter, Some(expr))
    }

    pub fn exit_left_binary_operator(&mut self, expr: ExprId) -> (NodeId, NodeId) {
        let left_exit = self.add_node(NodeKind::BinaryOperatorExitLeft, Some(expr));
        let right_enter = self.add_node(NodeKind::BinaryOperatorEnterRight, Some(expr));
        self.bool_stack.push(BoolFrame { left_exit });
        (left_exit, right_enter)
    }

    pub fn exit_binary_operator(&mut self, expr: ExprId) -> BinaryOperatorExitNodes {
        let frame = self.bool_stack.pop().expect("no binary operator to exit");
        let right_last = self.last_node.unwrap_or(frame.left_exit);
        let left_alive = !self.graph.node(frame.left_exit).is_dead;
        let right_is_dead = !self.alive && left_alive;
        if right_is_dead {
            // Only the short-circuit path reaches the exit; the right side
            // joins it on a dead edge.
            self.anchor(frame.left_exit);
            let exit = self.add_node(NodeKind::BinaryOperatorExit, Some(expr));
            self.graph.add_edge(right_last, exit, EdgeLabel::DEAD);
            BinaryOperatorExitNodes {
                exit,
                left_exit: frame.left_exit,
                right_last,
                right_is_dead,
            }
        } else {
            let exit = self.add_node(NodeKind::BinaryOperatorExit, Some(expr));
            let label = if left_alive {
                EdgeLabel::NORMAL
            } else {
                EdgeLabel::DEAD
            };
            self.graph.add_edge(frame.left_exit, exit, label);
            BinaryOperatorExitNodes {
                exit,
                left_exit: frame.left_exit,
                right_last,
                right_is_dead,
            }
        }
    }

    pub fn enter_safe_call(&mut self, expr: ExprId) -> NodeId {
        self.safe_stack.push(SafeFrame {
            receiver_last: self.last_node,
        });
        self.add_node(NodeKind::SafeCallEnter, Some(expr))
    }

    pub fn exit_safe_call(&mut self, expr: ExprId) -> NodeId {
        let frame = self.safe_stack.pop().expect("no safe call to exit");
        let exit = self.add_node(NodeKind::SafeCallExit, Some(expr));
        // Bypass edge: the receiver was null and the call never ran.
        if let Some(receiver_last) = frame.receiver_last {
            let label = if self.graph.node(receiver_last).is_dead {
                EdgeLabel::DEAD
            } else {
                EdgeLabel::NORMAL
            };
            self.graph.add_edge(receiver_last, exit, label);
            if !label.is_dead {
                self.graph.mark_alive(exit);
                self.alive = true;
            }
        }
        exit
    }

    pub fn enter_function_call(&mut self, call: ExprId) {
        self.call_marks
            .insert(call, (self.graph.node_count() as u32, self.last_node));
    }

    /// Seals a call. Lambda argument exits are attached with dataflow-only
    /// edges when the callee is known to invoke them exactly once, and
    /// control-only edges otherwise.
    pub fn exit_function_call(&mut self, call: ExprId, lambda_exits: &[(NodeId, bool)]) -> NodeId {
        let node = self.add_node(NodeKind::FunctionCall, Some(call));
        for (exit, union_into_dfa) in lambda_exits {
            let label = if *union_into_dfa {
                EdgeLabel::DFG_ONLY
            } else {
                EdgeLabel::CFG_ONLY
            };
            self.graph.add_edge(*exit, node, label);
        }
        node
    }

    /// Drops every node produced for the given call, restoring construction
    /// to the state just before it. Used when resolution is retried.
    pub fn drop_subgraph_from_call(&mut self, call: ExprId) -> Option<u32> {
        let (mark, previous_last) = self.call_marks.remove(&call)?;
        self.graph.truncate(mark as usize);
        self.last_node = previous_last;
        if let Some(last) = previous_last {
            self.alive = !self.graph.node(last).is_dead;
        }
        self.call_marks.retain(|_, (m, _)| *m <= mark);
        Some(mark)
    }
}
