//! Flow state: statements, implications, and the per-node persistent flow
//!
//! A [`Flow`] is the accumulated dataflow state at one CFG node. Forks are
//! cheap: the maps are structurally shared, so a child flow copies nothing
//! until it diverges.

use crate::dataflow::variable::VarId;
use crate::types::Ty;
use im_rc::{OrdMap, OrdSet, Vector};
use smallvec::SmallVec;

/// The observable condition of an atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    EqTrue,
    EqFalse,
    EqNull,
    NotEqNull,
}

impl Operation {
    pub fn invert(self) -> Operation {
        match self {
            Operation::EqTrue => Operation::EqFalse,
            Operation::EqFalse => Operation::EqTrue,
            Operation::EqNull => Operation::NotEqNull,
            Operation::NotEqNull => Operation::EqNull,
        }
    }

    /// Whether knowing `self` holds is enough to know `other` holds.
    /// A boolean value is never null, so both truth values entail `NotEqNull`.
    pub fn implies(self, other: Operation) -> bool {
        self == other
            || matches!(
                (self, other),
                (Operation::EqTrue, Operation::NotEqNull)
                    | (Operation::EqFalse, Operation::NotEqNull)
            )
    }

    pub fn from_boolean(value: bool) -> Operation {
        if value {
            Operation::EqTrue
        } else {
            Operation::EqFalse
        }
    }
}

/// `variable <op>`, e.g. "x is not null".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationStatement {
    pub variable: VarId,
    pub operation: Operation,
}

impl OperationStatement {
    pub fn new(variable: VarId, operation: Operation) -> Self {
        Self {
            variable,
            operation,
        }
    }

    pub fn invert(self) -> Self {
        Self {
            variable: self.variable,
            operation: self.operation.invert(),
        }
    }
}

/// The variable is known to belong to every type in `exact_type` and to none
/// in `excluded_type`. Membership is the semantic content; the vectors are
/// insertion-ordered dedup sets.
#[derive(Debug, Clone, Eq)]
pub struct TypeStatement {
    pub variable: VarId,
    pub exact_type: SmallVec<[Ty; 2]>,
    pub excluded_type: SmallVec<[Ty; 2]>,
}

impl TypeStatement {
    pub fn new(variable: VarId) -> Self {
        Self {
            variable,
            exact_type: SmallVec::new(),
            excluded_type: SmallVec::new(),
        }
    }

    pub fn with_exact(variable: VarId, ty: Ty) -> Self {
        let mut s = Self::new(variable);
        s.insert_exact(ty);
        s
    }

    pub fn with_excluded(variable: VarId, ty: Ty) -> Self {
        let mut s = Self::new(variable);
        s.insert_excluded(ty);
        s
    }

    pub fn is_empty(&self) -> bool {
        self.exact_type.is_empty() && self.excluded_type.is_empty()
    }

    pub fn insert_exact(&mut self, ty: Ty) {
        if !self.exact_type.contains(&ty) {
            self.exact_type.push(ty);
        }
    }

    pub fn insert_excluded(&mut self, ty: Ty) {
        if !self.excluded_type.contains(&ty) {
            self.excluded_type.push(ty);
        }
    }

    /// Unions the other statement's sets into this one.
    pub fn union_with(&mut self, other: &TypeStatement) {
        for ty in &other.exact_type {
            self.insert_exact(ty.clone());
        }
        for ty in &other.excluded_type {
            self.insert_excluded(ty.clone());
        }
    }

    /// Keeps only the facts the other statement also carries.
    pub fn intersect_with(&mut self, other: &TypeStatement) {
        self.exact_type.retain(|ty| other.exact_type.contains(ty));
        self.excluded_type
            .retain(|ty| other.excluded_type.contains(ty));
    }

    /// Whether every fact here is already present in `other`.
    pub fn is_subsumed_by(&self, other: &TypeStatement) -> bool {
        self.exact_type.iter().all(|t| other.exact_type.contains(t))
            && self
                .excluded_type
                .iter()
                .all(|t| other.excluded_type.contains(t))
    }
}

impl PartialEq for TypeStatement {
    fn eq(&self, other: &Self) -> bool {
        self.variable == other.variable
            && self.is_subsumed_by(other)
            && other.is_subsumed_by(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Operation(OperationStatement),
    Type(TypeStatement),
}

impl Statement {
    pub fn variable(&self) -> VarId {
        match self {
            Statement::Operation(os) => os.variable,
            Statement::Type(ts) => ts.variable,
        }
    }
}

/// `condition ⟹ effect`: once the condition is approved, the effect is added
/// to the flow.
#[derive(Debug, Clone, PartialEq)]
pub struct Implication {
    pub condition: OperationStatement,
    pub effect: Statement,
}

impl Implication {
    pub fn new(condition: OperationStatement, effect: Statement) -> Self {
        Self { condition, effect }
    }

    pub fn invert_condition(self) -> Self {
        Self {
            condition: self.condition.invert(),
            effect: self.effect,
        }
    }
}

/// A local variable currently naming the same value as another variable.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalAlias {
    pub underlying: VarId,
    /// Declared type of the aliased variable at the point of binding.
    pub original_type: Ty,
}

/// Per-node dataflow state with structural sharing across forks.
#[derive(Debug, Clone, Default)]
pub struct Flow {
    pub(crate) approved_type_statements: OrdMap<VarId, TypeStatement>,
    pub(crate) logic_statements: Vector<Implication>,
    pub(crate) direct_alias_map: OrdMap<VarId, LocalAlias>,
    pub(crate) backwards_alias_map: OrdMap<VarId, OrdSet<VarId>>,
}

impl Flow {
    pub fn new() -> Self {
        Self::default()
    }

    /// A child flow for divergent refinement. Copy-on-write: nothing is
    /// duplicated until one side mutates.
    pub fn fork(&self) -> Flow {
        self.clone()
    }

    pub fn approved(&self, variable: VarId) -> Option<&TypeStatement> {
        self.approved_type_statements.get(&variable)
    }

    pub fn implications(&self) -> impl Iterator<Item = &Implication> {
        self.logic_statements.iter()
    }

    pub fn alias(&self, variable: VarId) -> Option<&LocalAlias> {
        self.direct_alias_map.get(&variable)
    }

    /// Follows the direct alias map one step.
    pub fn unwrap_alias(&self, variable: VarId) -> VarId {
        self.direct_alias_map
            .get(&variable)
            .map_or(variable, |a| a.underlying)
    }

    pub fn approved_variables(&self) -> impl Iterator<Item = VarId> + '_ {
        self.approved_type_statements.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::variable::VariableStorage;
    use crate::hir::ExprId;

    fn synthetic(storage: &mut VariableStorage, id: u32) -> VarId {
        storage.create_synthetic(ExprId(id))
    }

    #[test]
    fn test_operation_inversion() {
        assert_eq!(Operation::EqTrue.invert(), Operation::EqFalse);
        assert_eq!(Operation::NotEqNull.invert(), Operation::EqNull);
    }

    #[test]
    fn test_truth_implies_not_null() {
        assert!(Operation::EqTrue.implies(Operation::NotEqNull));
        assert!(Operation::EqFalse.implies(Operation::NotEqNull));
        assert!(!Operation::NotEqNull.implies(Operation::EqTrue));
        assert!(!Operation::EqNull.implies(Operation::NotEqNull));
    }

    #[test]
    fn test_type_statement_is_a_set() {
        let mut storage = VariableStorage::new();
        let v = synthetic(&mut storage, 0);
        let mut a = TypeStatement::with_exact(v, Ty::class("Int"));
        a.insert_exact(Ty::class("String"));
        a.insert_exact(Ty::class("Int"));
        assert_eq!(a.exact_type.len(), 2);

        let mut b = TypeStatement::with_exact(v, Ty::class("String"));
        b.insert_exact(Ty::class("Int"));
        // Set equality ignores insertion order.
        assert_eq!(a, b);
    }

    #[test]
    fn test_type_statement_intersection() {
        let mut storage = VariableStorage::new();
        let v = synthetic(&mut storage, 0);
        let mut a = TypeStatement::with_exact(v, Ty::class("Int"));
        a.insert_exact(Ty::class("String"));
        let b = TypeStatement::with_exact(v, Ty::class("Int"));
        a.intersect_with(&b);
        assert_eq!(a.exact_type.as_slice(), &[Ty::class("Int")]);
    }

    #[test]
    fn test_fork_shares_then_diverges() {
        let mut storage = VariableStorage::new();
        let v = synthetic(&mut storage, 0);
        let mut parent = Flow::new();
        parent
            .approved_type_statements
            .insert(v, TypeStatement::with_exact(v, Ty::class("Int")));
        let mut child = parent.fork();
        let w = synthetic(&mut storage, 1);
        child
            .approved_type_statements
            .insert(w, TypeStatement::with_exact(w, Ty::class("String")));
        assert!(parent.approved(w).is_none());
        assert!(child.approved(v).is_some());
    }
}
