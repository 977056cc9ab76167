//! End-to-end smartcast scenarios driven through the analyzer.

use smartflow_core::prelude::*;

fn type_context() -> TypeContext {
    let mut ctx = TypeContext::new();
    ctx.register_class("Number", &[]);
    ctx.register_class("Int", &["Number"]);
    ctx.register_class("String", &[]);
    ctx.register_class("Boolean", &[]);
    ctx
}

fn function(name: &str, params: Vec<SymbolId>, body: Vec<Stmt>) -> Function {
    Function {
        name: name.to_string(),
        params: params.into(),
        receiver: None,
        return_type: Ty::Any,
        body,
    }
}

/// A test-local provider with a handful of named descriptions.
struct TestProvider {
    entries: Vec<(String, ContractDescription)>,
}

impl TestProvider {
    fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn with(mut self, name: &str, description: ContractDescription) -> Self {
        self.entries.push((name.to_string(), description));
        self
    }
}

impl ContractProvider for TestProvider {
    fn contract_description(
        &self,
        symbols: &Symbols,
        function: SymbolId,
    ) -> Option<&ContractDescription> {
        let name = &symbols.get(function).name;
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d)
    }
}

/// Every returned refinement must keep the use site a subtype of the declared
/// type once intersected with it.
fn assert_no_unsafe_widening(ctx: &TypeContext, declared: &Ty, refined: &[Ty]) {
    let mut types = vec![declared.clone()];
    types.extend(refined.iter().cloned());
    let intersected = TypeIntersector::intersect(ctx, &types);
    assert!(
        ctx.is_subtype_of(&intersected, declared),
        "refinement widened {declared} to {intersected}"
    );
}

#[test]
fn test_type_test_in_if_branch() {
    // fun f(x: Any?) { if (x is String) x }
    let types = type_context();
    let mut b = HirBuilder::new();
    let x = b.declare("x", SymbolKind::ValueParameter, Ty::nullable(Ty::Any));
    let operand = b.access(x);
    let test = b.is_type(operand, Ty::class("String"));
    let probe = b.access(x);
    let if_stmt = b.if_stmt(test, vec![Stmt::Expr(probe.clone())]);
    let f = function("f", vec![x], vec![if_stmt]);

    let provider = NoContracts;
    let mut analyzer = DataFlowAnalyzer::new(&b.symbols, &types, &provider);
    analyzer.analyze_function(&f).unwrap();

    let refined = analyzer.get_type_using_smartcast_info(&probe).unwrap();
    assert!(refined.contains(&Ty::class("String")));
    assert_no_unsafe_widening(&types, &Ty::nullable(Ty::Any), &refined);
}

#[test]
fn test_null_check_in_if_branch() {
    // fun f(x: Any?) { if (x != null) x }
    let types = type_context();
    let mut b = HirBuilder::new();
    let x = b.declare("x", SymbolKind::ValueParameter, Ty::nullable(Ty::Any));
    let lhs = b.access(x);
    let null = b.null();
    let test = b.equality(EqualityOp::NotEq, lhs, null);
    let probe = b.access(x);
    let if_stmt = b.if_stmt(test, vec![Stmt::Expr(probe.clone())]);
    let f = function("f", vec![x], vec![if_stmt]);

    let provider = NoContracts;
    let mut analyzer = DataFlowAnalyzer::new(&b.symbols, &types, &provider);
    analyzer.analyze_function(&f).unwrap();

    let refined = analyzer.get_type_using_smartcast_info(&probe).unwrap();
    assert!(refined.contains(&Ty::Any));
    assert_no_unsafe_widening(&types, &Ty::nullable(Ty::Any), &refined);
}

#[test]
fn test_checked_not_null_flows_forward() {
    // fun f(x: Any?) { x!!; x }
    let types = type_context();
    let mut b = HirBuilder::new();
    let x = b.declare("x", SymbolKind::ValueParameter, Ty::nullable(Ty::Any));
    let operand = b.access(x);
    let bang = b.checked_not_null(operand);
    let probe = b.access(x);
    let f = function("f", vec![x], vec![Stmt::Expr(bang), Stmt::Expr(probe.clone())]);

    let provider = NoContracts;
    let mut analyzer = DataFlowAnalyzer::new(&b.symbols, &types, &provider);
    analyzer.analyze_function(&f).unwrap();

    let refined = analyzer.get_type_using_smartcast_info(&probe).unwrap();
    assert!(refined.contains(&Ty::Any));
}

#[test]
fn test_bound_condition_variable() {
    // fun f(x: Any?) { val b = x is String; if (b) x }
    let types = type_context();
    let mut b = HirBuilder::new();
    let x = b.declare("x", SymbolKind::ValueParameter, Ty::nullable(Ty::Any));
    let bound = b.declare("b", SymbolKind::LocalVal, Ty::boolean());
    let operand = b.access(x);
    let test = b.is_type(operand, Ty::class("String"));
    let condition = b.access(bound);
    let probe = b.access(x);
    let if_stmt = b.if_stmt(condition, vec![Stmt::Expr(probe.clone())]);
    let f = function(
        "f",
        vec![x],
        vec![
            Stmt::Declaration {
                symbol: bound,
                initializer: Some(test),
            },
            if_stmt,
        ],
    );

    let provider = NoContracts;
    let mut analyzer = DataFlowAnalyzer::new(&b.symbols, &types, &provider);
    analyzer.analyze_function(&f).unwrap();

    let refined = analyzer.get_type_using_smartcast_info(&probe).unwrap();
    assert!(refined.contains(&Ty::class("String")));
}

#[test]
fn test_conjunction_refines_both_operands() {
    // fun f(x: Any?, y: Any?) { if (x is Int && y is String) { x; y } }
    let types = type_context();
    let mut b = HirBuilder::new();
    let x = b.declare("x", SymbolKind::ValueParameter, Ty::nullable(Ty::Any));
    let y = b.declare("y", SymbolKind::ValueParameter, Ty::nullable(Ty::Any));
    let left_operand = b.access(x);
    let left = b.is_type(left_operand, Ty::class("Int"));
    let right_operand = b.access(y);
    let right = b.is_type(right_operand, Ty::class("String"));
    let both = b.and(left, right);
    let probe_x = b.access(x);
    let probe_y = b.access(y);
    let if_stmt = b.if_stmt(both, vec![Stmt::Expr(probe_x.clone()), Stmt::Expr(probe_y.clone())]);
    let f = function("f", vec![x, y], vec![if_stmt]);

    let provider = NoContracts;
    let mut analyzer = DataFlowAnalyzer::new(&b.symbols, &types, &provider);
    analyzer.analyze_function(&f).unwrap();

    let refined_x = analyzer.get_type_using_smartcast_info(&probe_x).unwrap();
    assert!(refined_x.contains(&Ty::class("Int")));
    let refined_y = analyzer.get_type_using_smartcast_info(&probe_y).unwrap();
    assert!(refined_y.contains(&Ty::class("String")));
}

#[test]
fn test_negated_test_with_early_return() {
    // fun f(x: Any?) { if (!(x is String)) return; x }
    let types = type_context();
    let mut b = HirBuilder::new();
    let x = b.declare("x", SymbolKind::ValueParameter, Ty::nullable(Ty::Any));
    let operand = b.access(x);
    let test = b.is_type(operand, Ty::class("String"));
    let negated = b.not(test);
    let probe = b.access(x);
    let if_stmt = b.if_stmt(negated, vec![Stmt::Return { value: None }]);
    let f = function("f", vec![x], vec![if_stmt, Stmt::Expr(probe.clone())]);

    let provider = NoContracts;
    let mut analyzer = DataFlowAnalyzer::new(&b.symbols, &types, &provider);
    analyzer.analyze_function(&f).unwrap();

    let refined = analyzer.get_type_using_smartcast_info(&probe).unwrap();
    assert!(refined.contains(&Ty::class("String")));
}

#[test]
fn test_when_accumulates_negative_information() {
    // fun f(x: Any?) { when { x is Int -> x; x is String -> x; else -> {} } }
    let types = type_context();
    let mut b = HirBuilder::new();
    let x = b.declare("x", SymbolKind::ValueParameter, Ty::nullable(Ty::Any));
    let operand1 = b.access(x);
    let cond1 = b.is_type(operand1, Ty::class("Int"));
    let probe1 = b.access(x);
    let operand2 = b.access(x);
    let cond2 = b.is_type(operand2, Ty::class("String"));
    let probe2 = b.access(x);
    let when = b.when(
        vec![
            WhenBranch {
                condition: cond1,
                body: vec![Stmt::Expr(probe1.clone())],
            },
            WhenBranch {
                condition: cond2,
                body: vec![Stmt::Expr(probe2.clone())],
            },
        ],
        Some(vec![]),
    );
    let f = function("f", vec![x], vec![Stmt::Expr(when)]);

    let provider = NoContracts;
    let mut analyzer = DataFlowAnalyzer::new(&b.symbols, &types, &provider);
    analyzer.analyze_function(&f).unwrap();

    let refined1 = analyzer.get_type_using_smartcast_info(&probe1).unwrap();
    assert!(refined1.contains(&Ty::class("Int")));
    let refined2 = analyzer.get_type_using_smartcast_info(&probe2).unwrap();
    assert!(refined2.contains(&Ty::class("String")));
    assert!(!refined2.contains(&Ty::class("Int")));
}

#[test]
fn test_filter_contract_narrows_collection() {
    // fun f(xs: List<Any?>) { xs.filter { it is Int } }
    let types = type_context();
    let mut b = HirBuilder::new();
    let xs = b.declare(
        "xs",
        SymbolKind::ValueParameter,
        Ty::List(Box::new(Ty::nullable(Ty::Any))),
    );
    let filter = b.declare(
        "filter",
        SymbolKind::Function,
        Ty::List(Box::new(Ty::nullable(Ty::Any))),
    );
    let it = b.declare("it", SymbolKind::ValueParameter, Ty::nullable(Ty::Any));
    let it_access = b.access(it);
    let test = b.is_type(it_access, Ty::class("Int"));
    let lambda = b.lambda(Some(it), vec![Stmt::Expr(test)]);
    let receiver = b.access(xs);
    let call = b.call_on(receiver, filter, vec![Argument::Lambda(lambda)]);
    let f = function("f", vec![xs], vec![Stmt::Expr(call.clone())]);

    let provider = TestProvider::empty().with(
        "filter",
        ContractDescription::new()
            .for_each_return_value(0, true)
            .calls_in_place(0, InvocationKind::Unknown),
    );
    let mut analyzer = DataFlowAnalyzer::new(&b.symbols, &types, &provider);
    analyzer.analyze_function(&f).unwrap();

    let refined = analyzer
        .get_type_using_contracts_for_collections(&call)
        .unwrap();
    assert_eq!(refined, vec![Ty::List(Box::new(Ty::class("Int")))]);
}

#[test]
fn test_safe_call_does_not_establish_non_null() {
    // fun f(x: Any?) { x?.hashCode(); if (x != null) x }
    let types = type_context();
    let mut b = HirBuilder::new();
    let x = b.declare("x", SymbolKind::ValueParameter, Ty::nullable(Ty::Any));
    let hash_code = b.declare("hashCode", SymbolKind::Function, Ty::class("Int"));
    let receiver = b.access(x);
    let call = b.call(hash_code, vec![]);
    let safe = b.safe_call(receiver, call);
    let probe_after_safe = b.access(x);
    let lhs = b.access(x);
    let null = b.null();
    let test = b.equality(EqualityOp::NotEq, lhs, null);
    let probe = b.access(x);
    let if_stmt = b.if_stmt(test, vec![Stmt::Expr(probe.clone())]);
    let f = function(
        "f",
        vec![x],
        vec![Stmt::Expr(safe), Stmt::Expr(probe_after_safe.clone()), if_stmt],
    );

    let provider = NoContracts;
    let mut analyzer = DataFlowAnalyzer::new(&b.symbols, &types, &provider);
    analyzer.analyze_function(&f).unwrap();

    // The safe call alone proves nothing once both paths merge.
    assert!(analyzer
        .get_type_using_smartcast_info(&probe_after_safe)
        .is_none());
    let refined = analyzer.get_type_using_smartcast_info(&probe).unwrap();
    assert!(refined.contains(&Ty::Any));
}

#[test]
fn test_reassignment_erases_facts() {
    // var x: Any? = "s"; if (x is String) { x = 1; x }
    let types = type_context();
    let mut b = HirBuilder::new();
    let x = b.declare("x", SymbolKind::LocalVar, Ty::nullable(Ty::Any));
    let init = b.str("s");
    let operand = b.access(x);
    let test = b.is_type(operand, Ty::class("String"));
    let one = b.int(1);
    let probe = b.access(x);
    let if_stmt = b.if_stmt(
        test,
        vec![
            Stmt::Assignment {
                symbol: x,
                value: one,
            },
            Stmt::Expr(probe.clone()),
        ],
    );
    let f = function(
        "f",
        vec![],
        vec![
            Stmt::Declaration {
                symbol: x,
                initializer: Some(init),
            },
            if_stmt,
        ],
    );

    let provider = NoContracts;
    let mut analyzer = DataFlowAnalyzer::new(&b.symbols, &types, &provider);
    analyzer.analyze_function(&f).unwrap();

    assert!(analyzer.get_type_using_smartcast_info(&probe).is_none());
}

#[test]
fn test_val_declaration_keeps_initializer_type() {
    // val x: Any? = "s"; x
    let types = type_context();
    let mut b = HirBuilder::new();
    let x = b.declare("x", SymbolKind::LocalVal, Ty::nullable(Ty::Any));
    let init = b.str("s");
    let probe = b.access(x);
    let f = function(
        "f",
        vec![],
        vec![
            Stmt::Declaration {
                symbol: x,
                initializer: Some(init),
            },
            Stmt::Expr(probe.clone()),
        ],
    );

    let provider = NoContracts;
    let mut analyzer = DataFlowAnalyzer::new(&b.symbols, &types, &provider);
    analyzer.analyze_function(&f).unwrap();

    let refined = analyzer.get_type_using_smartcast_info(&probe).unwrap();
    assert!(refined.contains(&Ty::class("String")));
    assert_no_unsafe_widening(&types, &Ty::nullable(Ty::Any), &refined);
}

#[test]
fn test_val_deferred_first_assignment_keeps_initializer_type() {
    // val x: Any?; x = "s"; x
    let types = type_context();
    let mut b = HirBuilder::new();
    let x = b.declare("x", SymbolKind::LocalVal, Ty::nullable(Ty::Any));
    let value = b.str("s");
    let probe = b.access(x);
    let f = function(
        "f",
        vec![],
        vec![
            Stmt::Declaration {
                symbol: x,
                initializer: None,
            },
            Stmt::Assignment { symbol: x, value },
            Stmt::Expr(probe.clone()),
        ],
    );

    let provider = NoContracts;
    let mut analyzer = DataFlowAnalyzer::new(&b.symbols, &types, &provider);
    analyzer.analyze_function(&f).unwrap();

    let refined = analyzer.get_type_using_smartcast_info(&probe).unwrap();
    assert!(refined.contains(&Ty::class("String")));
}

#[test]
fn test_alias_round_trip() {
    // val a = b; if (b is String) a — facts about b are visible through a.
    let types = type_context();
    let mut b = HirBuilder::new();
    let source = b.declare("b", SymbolKind::ValueParameter, Ty::nullable(Ty::Any));
    let alias = b.declare("a", SymbolKind::LocalVal, Ty::nullable(Ty::Any));
    let init = b.access(source);
    let operand = b.access(source);
    let test = b.is_type(operand, Ty::class("String"));
    let probe = b.access(alias);
    let if_stmt = b.if_stmt(test, vec![Stmt::Expr(probe.clone())]);
    let f = function(
        "f",
        vec![source],
        vec![
            Stmt::Declaration {
                symbol: alias,
                initializer: Some(init),
            },
            if_stmt,
        ],
    );

    let provider = NoContracts;
    let mut analyzer = DataFlowAnalyzer::new(&b.symbols, &types, &provider);
    analyzer.analyze_function(&f).unwrap();

    let refined = analyzer.get_type_using_smartcast_info(&probe).unwrap();
    // The list leads with the aliased variable's declared type.
    assert_eq!(refined[0], Ty::nullable(Ty::Any));
    assert!(refined.contains(&Ty::class("String")));
}

#[test]
fn test_alias_dies_with_reassignment_of_underlying() {
    // var b; val a = b; b = ...; a no longer sees b's facts.
    let types = type_context();
    let mut b = HirBuilder::new();
    let source = b.declare("b", SymbolKind::LocalVar, Ty::nullable(Ty::Any));
    let alias = b.declare("a", SymbolKind::LocalVal, Ty::nullable(Ty::Any));
    let source_init = b.str("s");
    let alias_init = b.access(source);
    let reassign = b.int(1);
    let operand = b.access(source);
    let test = b.is_type(operand, Ty::class("String"));
    let probe = b.access(alias);
    let if_stmt = b.if_stmt(test, vec![Stmt::Expr(probe.clone())]);
    let f = function(
        "f",
        vec![],
        vec![
            Stmt::Declaration {
                symbol: source,
                initializer: Some(source_init),
            },
            Stmt::Declaration {
                symbol: alias,
                initializer: Some(alias_init),
            },
            Stmt::Assignment {
                symbol: source,
                value: reassign,
            },
            if_stmt,
        ],
    );

    let provider = NoContracts;
    let mut analyzer = DataFlowAnalyzer::new(&b.symbols, &types, &provider);
    analyzer.analyze_function(&f).unwrap();

    assert!(analyzer.get_type_using_smartcast_info(&probe).is_none());
}

#[test]
fn test_disjunction_intersects_branches() {
    // if (x is String || x is String) x — both alternatives agree.
    let types = type_context();
    let mut b = HirBuilder::new();
    let x = b.declare("x", SymbolKind::ValueParameter, Ty::nullable(Ty::Any));
    let o1 = b.access(x);
    let left = b.is_type(o1, Ty::class("String"));
    let o2 = b.access(x);
    let right = b.is_type(o2, Ty::class("String"));
    let either = b.or(left, right);
    let probe = b.access(x);
    let if_stmt = b.if_stmt(either, vec![Stmt::Expr(probe.clone())]);
    let f = function("f", vec![x], vec![if_stmt]);

    let provider = NoContracts;
    let mut analyzer = DataFlowAnalyzer::new(&b.symbols, &types, &provider);
    analyzer.analyze_function(&f).unwrap();

    let refined = analyzer.get_type_using_smartcast_info(&probe).unwrap();
    assert!(refined.contains(&Ty::class("String")));
}

#[test]
fn test_disjunction_of_different_types_yields_nothing() {
    // if (x is Int || x is String) x — the alternatives disagree.
    let types = type_context();
    let mut b = HirBuilder::new();
    let x = b.declare("x", SymbolKind::ValueParameter, Ty::nullable(Ty::Any));
    let o1 = b.access(x);
    let left = b.is_type(o1, Ty::class("Int"));
    let o2 = b.access(x);
    let right = b.is_type(o2, Ty::class("String"));
    let either = b.or(left, right);
    let probe = b.access(x);
    let if_stmt = b.if_stmt(either, vec![Stmt::Expr(probe.clone())]);
    let f = function("f", vec![x], vec![if_stmt]);

    let provider = NoContracts;
    let mut analyzer = DataFlowAnalyzer::new(&b.symbols, &types, &provider);
    analyzer.analyze_function(&f).unwrap();

    let refined = analyzer.get_type_using_smartcast_info(&probe);
    // Only the common non-null fact may survive; no concrete class does.
    if let Some(refined) = refined {
        assert!(!refined.contains(&Ty::class("Int")));
        assert!(!refined.contains(&Ty::class("String")));
    }
}

#[test]
fn test_unchecked_cast_installs_fact() {
    // x as String; x
    let types = type_context();
    let mut b = HirBuilder::new();
    let x = b.declare("x", SymbolKind::ValueParameter, Ty::nullable(Ty::Any));
    let operand = b.access(x);
    let cast = b.cast(operand, Ty::class("String"));
    let probe = b.access(x);
    let f = function("f", vec![x], vec![Stmt::Expr(cast), Stmt::Expr(probe.clone())]);

    let provider = NoContracts;
    let mut analyzer = DataFlowAnalyzer::new(&b.symbols, &types, &provider);
    analyzer.analyze_function(&f).unwrap();

    let refined = analyzer.get_type_using_smartcast_info(&probe).unwrap();
    assert!(refined.contains(&Ty::class("String")));
}

#[test]
fn test_safe_cast_bound_to_val() {
    // val c = x as? String; if (c != null) x
    let types = type_context();
    let mut b = HirBuilder::new();
    let x = b.declare("x", SymbolKind::ValueParameter, Ty::nullable(Ty::Any));
    let c = b.declare("c", SymbolKind::LocalVal, Ty::nullable(Ty::class("String")));
    let operand = b.access(x);
    let cast = b.safe_cast(operand, Ty::class("String"));
    let lhs = b.access(c);
    let null = b.null();
    let test = b.equality(EqualityOp::NotEq, lhs, null);
    let probe = b.access(x);
    let if_stmt = b.if_stmt(test, vec![Stmt::Expr(probe.clone())]);
    let f = function(
        "f",
        vec![x],
        vec![
            Stmt::Declaration {
                symbol: c,
                initializer: Some(cast),
            },
            if_stmt,
        ],
    );

    let provider = NoContracts;
    let mut analyzer = DataFlowAnalyzer::new(&b.symbols, &types, &provider);
    analyzer.analyze_function(&f).unwrap();

    let refined = analyzer.get_type_using_smartcast_info(&probe).unwrap();
    assert!(refined.contains(&Ty::class("String")));
}

#[test]
fn test_while_condition_refines_body() {
    // while (x is String) { x }
    let types = type_context();
    let mut b = HirBuilder::new();
    let x = b.declare("x", SymbolKind::ValueParameter, Ty::nullable(Ty::Any));
    let operand = b.access(x);
    let condition = b.is_type(operand, Ty::class("String"));
    let probe = b.access(x);
    let f = function(
        "f",
        vec![x],
        vec![Stmt::While {
            condition,
            body: vec![Stmt::Expr(probe.clone())],
        }],
    );

    let provider = NoContracts;
    let mut analyzer = DataFlowAnalyzer::new(&b.symbols, &types, &provider);
    analyzer.analyze_function(&f).unwrap();

    let refined = analyzer.get_type_using_smartcast_info(&probe).unwrap();
    assert!(refined.contains(&Ty::class("String")));
}

#[test]
fn test_do_while_condition_refines_exit() {
    // do { } while (x == null); x
    let types = type_context();
    let mut b = HirBuilder::new();
    let x = b.declare("x", SymbolKind::ValueParameter, Ty::nullable(Ty::Any));
    let lhs = b.access(x);
    let null = b.null();
    let condition = b.equality(EqualityOp::Eq, lhs, null);
    let probe = b.access(x);
    let f = function(
        "f",
        vec![x],
        vec![
            Stmt::DoWhile {
                body: vec![],
                condition,
            },
            Stmt::Expr(probe.clone()),
        ],
    );

    let provider = NoContracts;
    let mut analyzer = DataFlowAnalyzer::new(&b.symbols, &types, &provider);
    analyzer.analyze_function(&f).unwrap();

    let refined = analyzer.get_type_using_smartcast_info(&probe).unwrap();
    assert!(refined.contains(&Ty::Any));
}

#[test]
fn test_not_nothing_nullable_is_unconditional() {
    // x !is Nothing?; x — the operand must be a value.
    let types = type_context();
    let mut b = HirBuilder::new();
    let x = b.declare("x", SymbolKind::ValueParameter, Ty::nullable(Ty::Any));
    let operand = b.access(x);
    let test = b.not_is_type(operand, Ty::null());
    let probe = b.access(x);
    let f = function("f", vec![x], vec![Stmt::Expr(test), Stmt::Expr(probe.clone())]);

    let provider = NoContracts;
    let mut analyzer = DataFlowAnalyzer::new(&b.symbols, &types, &provider);
    analyzer.analyze_function(&f).unwrap();

    let refined = analyzer.get_type_using_smartcast_info(&probe).unwrap();
    assert!(refined.contains(&Ty::Any));
}

#[test]
fn test_equality_with_boolean_constant() {
    // if ((x is String) == true) x
    let types = type_context();
    let mut b = HirBuilder::new();
    let x = b.declare("x", SymbolKind::ValueParameter, Ty::nullable(Ty::Any));
    let operand = b.access(x);
    let test = b.is_type(operand, Ty::class("String"));
    let truth = b.bool(true);
    let eq = b.equality(EqualityOp::Eq, test, truth);
    let probe = b.access(x);
    let if_stmt = b.if_stmt(eq, vec![Stmt::Expr(probe.clone())]);
    let f = function("f", vec![x], vec![if_stmt]);

    let provider = NoContracts;
    let mut analyzer = DataFlowAnalyzer::new(&b.symbols, &types, &provider);
    analyzer.analyze_function(&f).unwrap();

    let refined = analyzer.get_type_using_smartcast_info(&probe).unwrap();
    assert!(refined.contains(&Ty::class("String")));
}

#[test]
fn test_identity_pins_operand_type() {
    // fun f(x: Any, y: String) { if (x === y) x }
    let types = type_context();
    let mut b = HirBuilder::new();
    let x = b.declare("x", SymbolKind::ValueParameter, Ty::Any);
    let y = b.declare("y", SymbolKind::ValueParameter, Ty::class("String"));
    let lhs = b.access(x);
    let rhs = b.access(y);
    let test = b.equality(EqualityOp::Identity, lhs, rhs);
    let probe = b.access(x);
    let if_stmt = b.if_stmt(test, vec![Stmt::Expr(probe.clone())]);
    let f = function("f", vec![x, y], vec![if_stmt]);

    let provider = NoContracts;
    let mut analyzer = DataFlowAnalyzer::new(&b.symbols, &types, &provider);
    analyzer.analyze_function(&f).unwrap();

    let refined = analyzer.get_type_using_smartcast_info(&probe).unwrap();
    assert!(refined.contains(&Ty::class("String")));
}

#[test]
fn test_receiver_refinement_through_this() {
    // fun (this: Any?).f() { if (this is String) this }
    let types = type_context();
    let mut b = HirBuilder::new();
    let this = b.declare("this", SymbolKind::This, Ty::nullable(Ty::Any));
    let operand = b.access(this);
    let test = b.is_type(operand, Ty::class("String"));
    let probe = b.access(this);
    let if_stmt = b.if_stmt(test, vec![Stmt::Expr(probe.clone())]);
    let f = Function {
        name: "f".to_string(),
        params: vec![].into(),
        receiver: Some(this),
        return_type: Ty::Any,
        body: vec![if_stmt],
    };

    let provider = NoContracts;
    let mut analyzer = DataFlowAnalyzer::new(&b.symbols, &types, &provider);
    analyzer.analyze_function(&f).unwrap();

    let refined = analyzer.get_type_using_smartcast_info(&probe).unwrap();
    assert!(refined.contains(&Ty::class("String")));
}

#[test]
fn test_safe_call_result_null_check_refines_receiver() {
    // if (x?.hashCode() != null) x
    let types = type_context();
    let mut b = HirBuilder::new();
    let x = b.declare("x", SymbolKind::ValueParameter, Ty::nullable(Ty::Any));
    let hash_code = b.declare("hashCode", SymbolKind::Function, Ty::class("Int"));
    let receiver = b.access(x);
    let call = b.call(hash_code, vec![]);
    let safe = b.safe_call(receiver, call);
    let null = b.null();
    let test = b.equality(EqualityOp::NotEq, safe, null);
    let probe = b.access(x);
    let if_stmt = b.if_stmt(test, vec![Stmt::Expr(probe.clone())]);
    let f = function("f", vec![x], vec![if_stmt]);

    let provider = NoContracts;
    let mut analyzer = DataFlowAnalyzer::new(&b.symbols, &types, &provider);
    analyzer.analyze_function(&f).unwrap();

    let refined = analyzer.get_type_using_smartcast_info(&probe).unwrap();
    assert!(refined.contains(&Ty::Any));
}

#[test]
fn test_return_expressions_of_anonymous_function() {
    let types = type_context();
    let mut b = HirBuilder::new();
    let xs = b.declare(
        "xs",
        SymbolKind::ValueParameter,
        Ty::List(Box::new(Ty::nullable(Ty::Any))),
    );
    let callee = b.declare("forEach", SymbolKind::Function, Ty::Any);
    let it = b.declare("it", SymbolKind::ValueParameter, Ty::nullable(Ty::Any));
    let body_expr = b.access(it);
    let body_expr_id = body_expr.id;
    let lambda = b.lambda(Some(it), vec![Stmt::Expr(body_expr)]);
    let lambda_id = lambda.id;
    let receiver = b.access(xs);
    let call = b.call_on(receiver, callee, vec![Argument::Lambda(lambda)]);
    let f = function("f", vec![xs], vec![Stmt::Expr(call)]);

    let provider = NoContracts;
    let mut analyzer = DataFlowAnalyzer::new(&b.symbols, &types, &provider);
    analyzer.analyze_function(&f).unwrap();

    let returns = analyzer
        .return_expressions_of_anonymous_function(lambda_id)
        .unwrap();
    assert_eq!(returns, vec![body_expr_id]);
    assert!(analyzer
        .return_expressions_of_anonymous_function(ExprId(9999))
        .is_err());
}

#[test]
fn test_ignore_function_calls_suppresses_queries() {
    let types = type_context();
    let mut b = HirBuilder::new();
    let x = b.declare("x", SymbolKind::ValueParameter, Ty::class("String"));
    let f_sym = b.declare("transform", SymbolKind::Function, Ty::nullable(Ty::class("Int")));
    let arg = b.access(x);
    let call = b.call(f_sym, vec![Argument::Expr(arg)]);
    let f = function("f", vec![x], vec![Stmt::Expr(call.clone())]);

    let provider = TestProvider::empty().with(
        "transform",
        ContractDescription::new().conditional(
            ReturnsValue::NotNull,
            ContractCondition::IsInstance {
                parameter: 0,
                ty: Ty::class("String"),
                negated: false,
            },
        ),
    );
    let mut analyzer = DataFlowAnalyzer::new(&b.symbols, &types, &provider);
    analyzer.analyze_function(&f).unwrap();

    assert!(analyzer.get_type_using_conditional_contracts(&call).is_some());
    analyzer.with_ignore_function_calls(|analyzer| {
        assert!(analyzer.get_type_using_conditional_contracts(&call).is_none());
    });
    assert!(analyzer.get_type_using_conditional_contracts(&call).is_some());
}
