//! Dataflow variables and their interning storage
//!
//! A [`VarId`] is either *real* (a stable, program-observable lvalue keyed by
//! symbol and receiver chain) or *synthetic* (an opaque token for a transient
//! expression). Synthetic ids carry a tag bit so the logic system can tell
//! the variants apart without a storage lookup.

use crate::dataflow::flow::Flow;
use crate::hir::{Expr, ExprId, ExprKind, SymbolId, SymbolKind, Symbols};
use rustc_hash::FxHashMap;

const SYNTHETIC_BIT: u32 = 1 << 31;

/// Identity of a dataflow variable inside the logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(u32);

impl VarId {
    fn real(index: u32) -> VarId {
        VarId(index)
    }

    fn synthetic(index: u32) -> VarId {
        VarId(index | SYNTHETIC_BIT)
    }

    pub fn is_synthetic(self) -> bool {
        self.0 & SYNTHETIC_BIT != 0
    }

    pub fn is_real(self) -> bool {
        !self.is_synthetic()
    }

    fn index(self) -> usize {
        (self.0 & !SYNTHETIC_BIT) as usize
    }
}

/// Structural identity of a real variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RealVariableKey {
    pub symbol: SymbolId,
    pub receiver: Option<VarId>,
    pub is_receiver: bool,
}

/// Interns real and synthetic dataflow variables.
#[derive(Debug, Default, Clone)]
pub struct VariableStorage {
    real_keys: Vec<RealVariableKey>,
    real_index: FxHashMap<RealVariableKey, VarId>,
    synthetic_count: u32,
    synthetic_index: FxHashMap<ExprId, VarId>,
    /// Memoizes the variable chosen for an expression identity.
    expression_memo: FxHashMap<ExprId, VarId>,
}

impl VariableStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the expression names a stable lvalue, making it eligible for a
    /// real variable. Every link of the receiver chain must itself be stable.
    pub fn is_stable(symbols: &Symbols, expr: &Expr) -> bool {
        match &expr.kind {
            ExprKind::Access { symbol, receiver } => {
                let stable_symbol = match symbols.get(*symbol).kind {
                    SymbolKind::LocalVal
                    | SymbolKind::LocalVar
                    | SymbolKind::ValueParameter
                    | SymbolKind::This => true,
                    SymbolKind::Member { is_val, is_final } => is_val && is_final,
                    SymbolKind::Function => false,
                };
                stable_symbol
                    && receiver
                        .as_ref()
                        .map_or(true, |r| Self::is_stable(symbols, r))
            }
            _ => false,
        }
    }

    fn intern_real(&mut self, key: RealVariableKey) -> VarId {
        if let Some(&var) = self.real_index.get(&key) {
            return var;
        }
        let var = VarId::real(self.real_keys.len() as u32);
        self.real_keys.push(key.clone());
        self.real_index.insert(key, var);
        var
    }

    fn real_variable_for(&mut self, symbols: &Symbols, expr: &Expr) -> Option<VarId> {
        if !Self::is_stable(symbols, expr) {
            return None;
        }
        let ExprKind::Access { symbol, receiver } = &expr.kind else {
            return None;
        };
        let receiver_var = match receiver {
            Some(r) => Some(self.real_variable_for(symbols, r)?),
            None => None,
        };
        let is_receiver = matches!(symbols.get(*symbol).kind, SymbolKind::This);
        Some(self.intern_real(RealVariableKey {
            symbol: *symbol,
            receiver: receiver_var,
            is_receiver,
        }))
    }

    /// The canonical real variable for a qualified access, following the
    /// flow's direct alias map. `None` when the access is not stable.
    pub fn get_or_create_real(
        &mut self,
        flow: &Flow,
        symbols: &Symbols,
        expr: &Expr,
    ) -> Option<VarId> {
        let var = self.real_variable_for(symbols, expr)?;
        self.expression_memo.entry(expr.id).or_insert(var);
        Some(flow.unwrap_alias(var))
    }

    /// As [`get_or_create_real`](Self::get_or_create_real), but does not
    /// follow aliases. Used on assignment targets so aliasing can be
    /// refreshed.
    pub fn get_or_create_real_without_unwrapping(
        &mut self,
        symbols: &Symbols,
        expr: &Expr,
    ) -> Option<VarId> {
        self.real_variable_for(symbols, expr)
    }

    /// The real variable for a bare local symbol (declaration/assignment
    /// targets have no receiver chain).
    pub fn get_or_create_real_for_symbol(&mut self, symbols: &Symbols, symbol: SymbolId) -> VarId {
        let is_receiver = matches!(symbols.get(symbol).kind, SymbolKind::This);
        self.intern_real(RealVariableKey {
            symbol,
            receiver: None,
            is_receiver,
        })
    }

    /// Non-creating query: the interned real variable for an access, unwrapped
    /// through the flow's alias map. Returns the variable facts are stored
    /// under and the alias entry crossed, if any.
    pub fn real_variable(
        &self,
        flow: &Flow,
        symbols: &Symbols,
        expr: &Expr,
    ) -> Option<(VarId, Option<crate::dataflow::flow::LocalAlias>)> {
        if !Self::is_stable(symbols, expr) {
            return None;
        }
        let ExprKind::Access { symbol, receiver } = &expr.kind else {
            return None;
        };
        let receiver_var = match receiver {
            Some(r) => Some(self.real_variable(flow, symbols, r)?.0),
            None => None,
        };
        let is_receiver = matches!(symbols.get(*symbol).kind, SymbolKind::This);
        let key = RealVariableKey {
            symbol: *symbol,
            receiver: receiver_var,
            is_receiver,
        };
        let var = *self.real_index.get(&key)?;
        match flow.alias(var) {
            Some(alias) => Some((alias.underlying, Some(alias.clone()))),
            None => Some((var, None)),
        }
    }

    /// Non-creating lookup of the real variable for a bare local symbol.
    pub fn real_variable_for_symbol(&self, symbols: &Symbols, symbol: SymbolId) -> Option<VarId> {
        let is_receiver = matches!(symbols.get(symbol).kind, SymbolKind::This);
        self.real_index
            .get(&RealVariableKey {
                symbol,
                receiver: None,
                is_receiver,
            })
            .copied()
    }

    /// A fresh synthetic variable bound to the expression's identity.
    /// Requesting it again for the same expression yields the same token.
    pub fn create_synthetic(&mut self, expr: ExprId) -> VarId {
        if let Some(&var) = self.synthetic_index.get(&expr) {
            return var;
        }
        let var = VarId::synthetic(self.synthetic_count);
        self.synthetic_count += 1;
        self.synthetic_index.insert(expr, var);
        self.expression_memo.insert(expr, var);
        var
    }

    /// Real if the expression is a stable access, synthetic otherwise.
    pub fn get_or_create_variable(&mut self, flow: &Flow, symbols: &Symbols, expr: &Expr) -> VarId {
        if let Some(&var) = self.expression_memo.get(&expr.id) {
            if var.is_real() {
                return flow.unwrap_alias(var);
            }
            return var;
        }
        match self.get_or_create_real(flow, symbols, expr) {
            Some(var) => var,
            None => self.create_synthetic(expr.id),
        }
    }

    /// The variable previously recorded for an expression, if any.
    pub fn variable_for_expression(&self, expr: ExprId) -> Option<VarId> {
        self.expression_memo.get(&expr).copied()
    }

    pub fn real_key(&self, var: VarId) -> Option<&RealVariableKey> {
        if var.is_synthetic() {
            return None;
        }
        self.real_keys.get(var.index())
    }

    pub fn is_receiver_variable(&self, var: VarId) -> bool {
        self.real_key(var).is_some_and(|k| k.is_receiver)
    }

    /// Drops interning for a symbol leaving scope. Facts already recorded in
    /// flows stay, they just become unreachable.
    pub fn remove_real(&mut self, symbol: SymbolId) {
        self.real_index.retain(|key, _| key.symbol != symbol);
    }

    /// Wipes everything between top-level declarations.
    pub fn clear(&mut self) {
        self.real_keys.clear();
        self.real_index.clear();
        self.synthetic_count = 0;
        self.synthetic_index.clear();
        self.expression_memo.clear();
    }
}
