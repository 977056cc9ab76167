//! Implicit receiver stack adapter
//!
//! Refined types of implicit receivers must take effect at use sites, so the
//! resolver's receiver stack is updated in place whenever a flow learns
//! something about a receiver variable. When the refinement disappears (a
//! join dropped it), the original declared type is reinstalled.

use crate::dataflow::flow::Flow;
use crate::dataflow::variable::VarId;
use crate::hir::SymbolId;
use crate::types::{Ty, TypeContext, TypeIntersector};

#[derive(Debug, Clone)]
pub struct ImplicitReceiver {
    pub variable: VarId,
    pub symbol: SymbolId,
    pub original_type: Ty,
    pub current_type: Ty,
}

#[derive(Debug, Default)]
pub struct ImplicitReceiverStack {
    entries: Vec<ImplicitReceiver>,
}

impl ImplicitReceiverStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, variable: VarId, symbol: SymbolId, original_type: Ty) {
        self.entries.push(ImplicitReceiver {
            variable,
            symbol,
            original_type: original_type.clone(),
            current_type: original_type,
        });
    }

    pub fn pop(&mut self) -> Option<ImplicitReceiver> {
        self.entries.pop()
    }

    pub fn top(&self) -> Option<&ImplicitReceiver> {
        self.entries.last()
    }

    /// The innermost receiver for a symbol, if it is on the stack.
    pub fn find(&self, symbol: SymbolId) -> Option<&ImplicitReceiver> {
        self.entries.iter().rev().find(|r| r.symbol == symbol)
    }

    /// Recomputes one receiver's visible type from the flow's facts.
    pub fn update_receiver(&mut self, ctx: &TypeContext, flow: &Flow, variable: VarId) {
        for entry in self.entries.iter_mut().rev() {
            if entry.variable != variable {
                continue;
            }
            entry.current_type = match flow.approved(variable) {
                Some(statement) if !statement.exact_type.is_empty() => {
                    let mut types: Vec<Ty> = vec![entry.original_type.clone()];
                    types.extend(statement.exact_type.iter().cloned());
                    TypeIntersector::intersect(ctx, &types)
                }
                _ => entry.original_type.clone(),
            };
        }
    }

    /// Recomputes every receiver on the stack.
    pub fn update_all(&mut self, ctx: &TypeContext, flow: &Flow) {
        let variables: Vec<VarId> = self.entries.iter().map(|r| r.variable).collect();
        for variable in variables {
            self.update_receiver(ctx, flow, variable);
        }
    }
}
