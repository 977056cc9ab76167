//! The logic algebra over flows
//!
//! All operations are pure with respect to everything but the flow handed in:
//! the system holds only a reference to the subtyping oracle. Approving an
//! operation statement computes the transitive closure of its effects over
//! the pending implications; joining intersects facts that hold on every
//! incoming path.

use crate::dataflow::flow::{
    Flow, Implication, LocalAlias, Operation, OperationStatement, Statement, TypeStatement,
};
use crate::dataflow::variable::VarId;
use crate::types::{Ty, TypeContext};
use im_rc::OrdMap;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use tracing::trace;

/// Derived type statements grouped per variable.
pub type TypeStatementMap = FxHashMap<VarId, TypeStatement>;

/// Guard against pathological implication chains.
const MAX_APPROVALS: usize = 1000;

pub struct LogicSystem<'a> {
    types: &'a TypeContext,
}

impl<'a> LogicSystem<'a> {
    pub fn new(types: &'a TypeContext) -> Self {
        Self { types }
    }

    pub fn type_context(&self) -> &TypeContext {
        self.types
    }

    /// Unions the statement into the flow's approved facts. Returns whether
    /// anything new was learned. Synthetic variables never carry type facts.
    pub fn add_type_statement(&self, flow: &mut Flow, statement: TypeStatement) -> bool {
        if statement.is_empty() || statement.variable.is_synthetic() {
            return false;
        }
        match flow.approved_type_statements.get(&statement.variable) {
            Some(existing) => {
                if statement.is_subsumed_by(existing) {
                    return false;
                }
                let mut merged = existing.clone();
                merged.union_with(&statement);
                flow.approved_type_statements
                    .insert(statement.variable, merged);
                true
            }
            None => {
                flow.approved_type_statements
                    .insert(statement.variable, statement);
                true
            }
        }
    }

    /// Stores an implication unless it is already useless: a condition the
    /// approved facts rule out, an empty or tautological effect, or an effect
    /// identical to its own condition.
    pub fn add_implication(&self, flow: &mut Flow, implication: Implication) {
        if self.is_trivial(flow, &implication.condition) {
            return;
        }
        match &implication.effect {
            Statement::Type(ts) => {
                if ts.is_empty() || ts.variable.is_synthetic() || self.is_tautological(flow, ts) {
                    return;
                }
            }
            Statement::Operation(os) => {
                if *os == implication.condition {
                    return;
                }
            }
        }
        if flow.logic_statements.iter().any(|i| *i == implication) {
            return;
        }
        flow.logic_statements.push_back(implication);
    }

    /// The transitive closure of effects derivable once `statement` is known
    /// to hold. Does not mutate the flow.
    pub fn approve_operation_statement(
        &self,
        flow: &Flow,
        statement: OperationStatement,
    ) -> Vec<Statement> {
        let mut results = Vec::new();
        let mut queue = VecDeque::new();
        let mut seen = FxHashSet::default();
        queue.push_back(statement);
        seen.insert(statement);
        let mut steps = 0;
        while let Some(current) = queue.pop_front() {
            steps += 1;
            if steps > MAX_APPROVALS {
                break;
            }
            for implication in flow.implications() {
                let condition = implication.condition;
                if condition.variable == current.variable
                    && current.operation.implies(condition.operation)
                {
                    results.push(implication.effect.clone());
                    if let Statement::Operation(next) = &implication.effect {
                        if seen.insert(*next) {
                            queue.push_back(*next);
                        }
                    }
                }
            }
        }
        trace!(?statement, derived = results.len(), "approve");
        results
    }

    /// As [`approve_operation_statement`], with the derived type statements
    /// merged per variable.
    pub fn approved_type_statements_after(
        &self,
        flow: &Flow,
        statement: OperationStatement,
    ) -> TypeStatementMap {
        let mut map = TypeStatementMap::default();
        for derived in self.approve_operation_statement(flow, statement) {
            if let Statement::Type(ts) = derived {
                map.entry(ts.variable)
                    .and_modify(|existing| existing.union_with(&ts))
                    .or_insert(ts);
            }
        }
        map
    }

    /// Installs everything derivable from `statement` into the flow. When
    /// `should_remove_synthetics` is set, implications conditioned on the
    /// consumed synthetic variables are dropped: the expressions they decorate
    /// cannot be named again. Returns the installed type statements.
    pub fn approve_statements_inside_flow(
        &self,
        flow: &mut Flow,
        statement: OperationStatement,
        should_remove_synthetics: bool,
    ) -> Vec<TypeStatement> {
        let derived = self.approve_operation_statement(flow, statement);
        let mut consumed = FxHashSet::default();
        if statement.variable.is_synthetic() {
            consumed.insert(statement.variable);
        }
        let mut installed = Vec::new();
        for effect in derived {
            match effect {
                Statement::Type(ts) => {
                    self.add_type_statement(flow, ts.clone());
                    installed.push(ts);
                }
                Statement::Operation(os) => {
                    if os.variable.is_synthetic() {
                        consumed.insert(os.variable);
                    }
                }
            }
        }
        if should_remove_synthetics && !consumed.is_empty() {
            flow.logic_statements = flow
                .implications()
                .filter(|imp| !consumed.contains(&imp.condition.variable))
                .cloned()
                .collect();
        }
        installed
    }

    /// Intersection of flows from multiple predecessors: a fact survives only
    /// if every path agrees on it.
    pub fn join(&self, flows: &[Flow]) -> Flow {
        match flows {
            [] => Flow::new(),
            [single] => single.clone(),
            [first, rest @ ..] => {
                trace!(inputs = flows.len(), "join");
                let mut result = Flow::new();
                for (var, statement) in first.approved_type_statements.iter() {
                    let mut acc = statement.clone();
                    let mut present_everywhere = true;
                    for flow in rest {
                        match flow.approved(*var) {
                            Some(other) => acc.intersect_with(other),
                            None => {
                                present_everywhere = false;
                                break;
                            }
                        }
                    }
                    if present_everywhere && !acc.is_empty() {
                        result.approved_type_statements.insert(*var, acc);
                    }
                }
                result.logic_statements = first
                    .implications()
                    .filter(|imp| {
                        rest.iter()
                            .all(|flow| flow.implications().any(|other| other == *imp))
                    })
                    .cloned()
                    .collect();
                for (var, alias) in first.direct_alias_map.iter() {
                    if rest.iter().all(|flow| flow.alias(*var) == Some(alias)) {
                        result.direct_alias_map.insert(*var, alias.clone());
                    }
                }
                result.backwards_alias_map = Self::rebuild_backwards(&result.direct_alias_map);
                result
            }
        }
    }

    /// Union of flows known to be sequentially composed, e.g. the argument
    /// subgraphs of one call.
    pub fn union(&self, flows: &[Flow]) -> Flow {
        match flows {
            [] => Flow::new(),
            [single] => single.clone(),
            [first, rest @ ..] => {
                let mut result = first.clone();
                for flow in rest {
                    for (var, statement) in flow.approved_type_statements.iter() {
                        match result.approved_type_statements.get(var) {
                            Some(existing) => {
                                let mut merged = existing.clone();
                                merged.union_with(statement);
                                result.approved_type_statements.insert(*var, merged);
                            }
                            None => {
                                result
                                    .approved_type_statements
                                    .insert(*var, statement.clone());
                            }
                        }
                    }
                    for implication in flow.implications() {
                        if !result.implications().any(|i| i == implication) {
                            result.logic_statements.push_back(implication.clone());
                        }
                    }
                    for (var, alias) in flow.direct_alias_map.iter() {
                        if result.alias(*var).is_none() {
                            result.direct_alias_map.insert(*var, alias.clone());
                        }
                    }
                }
                result.backwards_alias_map = Self::rebuild_backwards(&result.direct_alias_map);
                result
            }
        }
    }

    /// "One of these groups holds": per-variable intersection of the exact
    /// type sets, keeping only variables every group refines.
    pub fn or_type_statements(&self, groups: &[TypeStatementMap]) -> TypeStatementMap {
        let Some((first, rest)) = groups.split_first() else {
            return TypeStatementMap::default();
        };
        let mut result = TypeStatementMap::default();
        for (var, statement) in first {
            let mut acc = statement.clone();
            let everywhere = rest.iter().all(|group| {
                group
                    .get(var)
                    .map(|other| {
                        acc.intersect_with(other);
                        true
                    })
                    .unwrap_or(false)
            });
            if everywhere && !acc.is_empty() {
                result.insert(*var, acc);
            }
        }
        result
    }

    /// Rewrites every implication conditioned on `from` into one conditioned
    /// on `to`, keeping the originals. The transform may drop or adjust each
    /// candidate.
    pub fn translate_variable_from_condition_in_statements(
        &self,
        flow: &mut Flow,
        from: VarId,
        to: VarId,
        transform: impl Fn(Implication) -> Option<Implication>,
    ) {
        let rekeyed: Vec<Implication> = flow
            .implications()
            .filter(|imp| imp.condition.variable == from)
            .filter_map(|imp| {
                transform(Implication::new(
                    OperationStatement::new(to, imp.condition.operation),
                    imp.effect.clone(),
                ))
            })
            .collect();
        for implication in rekeyed {
            self.add_implication(flow, implication);
        }
    }

    /// As [`translate_variable_from_condition_in_statements`], removing the
    /// originals.
    pub fn replace_variable_from_condition_in_statements(
        &self,
        flow: &mut Flow,
        from: VarId,
        to: VarId,
        transform: impl Fn(Implication) -> Option<Implication>,
    ) {
        self.translate_variable_from_condition_in_statements(flow, from, to, transform);
        flow.logic_statements = flow
            .implications()
            .filter(|imp| imp.condition.variable != from)
            .cloned()
            .collect();
    }

    /// Binds `alias` to the same value as `underlying`.
    pub fn add_local_variable_alias(
        &self,
        flow: &mut Flow,
        alias: VarId,
        underlying: VarId,
        original_type: Ty,
    ) {
        flow.direct_alias_map.insert(
            alias,
            LocalAlias {
                underlying,
                original_type,
            },
        );
        let mut set = flow
            .backwards_alias_map
            .get(&underlying)
            .cloned()
            .unwrap_or_default();
        set.insert(alias);
        flow.backwards_alias_map.insert(underlying, set);
    }

    /// Dissolves aliasing around a variable about to be reassigned: its own
    /// binding, and every binding that pointed at it.
    pub fn remove_local_variable_alias(&self, flow: &mut Flow, variable: VarId) {
        if let Some(alias) = flow.direct_alias_map.remove(&variable) {
            if let Some(set) = flow.backwards_alias_map.get(&alias.underlying) {
                let mut set = set.clone();
                set.remove(&variable);
                flow.backwards_alias_map.insert(alias.underlying, set);
            }
        }
        if let Some(dependents) = flow.backwards_alias_map.remove(&variable) {
            for dependent in dependents {
                flow.direct_alias_map.remove(&dependent);
            }
        }
    }

    /// Erases every fact and implication mentioning the variable.
    pub fn remove_all_about_variable(&self, flow: &mut Flow, variable: VarId) {
        flow.approved_type_statements.remove(&variable);
        flow.logic_statements = flow
            .implications()
            .filter(|imp| imp.condition.variable != variable && imp.effect.variable() != variable)
            .cloned()
            .collect();
    }

    /// A condition can never hold once the approved facts about its variable
    /// contradict it: a value already known non-null cannot be null, and a
    /// value known to be null is neither non-null nor a boolean.
    fn is_trivial(&self, flow: &Flow, condition: &OperationStatement) -> bool {
        let Some(existing) = flow.approved(condition.variable) else {
            return false;
        };
        let known_not_null = existing.exact_type.iter().any(|ty| !ty.is_nullable())
            || existing.excluded_type.contains(&Ty::null());
        let known_null = existing.exact_type.contains(&Ty::null());
        match condition.operation {
            Operation::EqNull => known_not_null,
            Operation::NotEqNull | Operation::EqTrue | Operation::EqFalse => known_null,
        }
    }

    /// A type effect teaches nothing when every type it asserts is already
    /// entailed by an approved fact.
    fn is_tautological(&self, flow: &Flow, statement: &TypeStatement) -> bool {
        let Some(existing) = flow.approved(statement.variable) else {
            return false;
        };
        statement.exact_type.iter().all(|ty| {
            existing
                .exact_type
                .iter()
                .any(|have| self.types.is_subtype_of(have, ty))
        }) && statement
            .excluded_type
            .iter()
            .all(|ty| existing.excluded_type.contains(ty))
    }

    fn rebuild_backwards(
        direct: &OrdMap<VarId, LocalAlias>,
    ) -> OrdMap<VarId, im_rc::OrdSet<VarId>> {
        let mut backwards: OrdMap<VarId, im_rc::OrdSet<VarId>> = OrdMap::new();
        for (var, alias) in direct.iter() {
            let mut set = backwards.get(&alias.underlying).cloned().unwrap_or_default();
            set.insert(*var);
            backwards.insert(alias.underlying, set);
        }
        backwards
    }
}
