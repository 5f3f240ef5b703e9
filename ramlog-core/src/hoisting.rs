//! Move tests to the outermost loop that binds everything they read.
//!
//! Two passes. The first unifies every column pair constrained by a top level equality and
//! records literal constraints, rows whose columns are forced to two different literals are
//! impossible. The second walks each rule bottom-up: a loop whose columns equal something bound
//! further out becomes a `Query`, every other test is attached directly below the innermost loop
//! it depends on, and tests that depend on no loop at all guard the whole rule.

use crate::{
    ids::RowVar,
    ram::{BoolExp, RamProgram, RamStmt, RamTerm, RelOp, RelSym, Value},
    union_find::UnionFind,
};
use std::collections::{BTreeMap, BTreeSet};

type Column = (RowVar, usize);

pub fn hoist(program: RamProgram) -> RamProgram {
    let start = std::time::Instant::now();
    let mut hoisting = Hoisting::new(&program.stmt);
    let stmt = hoisting
        .stmt(&program.stmt)
        .filter(|_| hoisting.satisfiable > 0)
        .unwrap_or_else(|| RamStmt::Comment("no rule is satisfiable".to_string()));
    tracing::info!(
        "hoisting took {:?}, {} rows impossible",
        start.elapsed(),
        hoisting.impossible.len()
    );
    RamProgram { stmt, ..program }
}

struct Hoisting {
    /// Columns known to be equal.
    eq: UnionFind<Column>,
    /// Representative column to the outermost term it is equal to in the current scope.
    terms: BTreeMap<Column, RamTerm>,
    impossible: BTreeSet<RowVar>,
    /// Loops enclosing the current position, outermost first.
    bound: Vec<RowVar>,
    /// Tests waiting for the loop of their row to be rebuilt.
    id_to_bool: BTreeMap<RowVar, Vec<BoolExp>>,
    /// Tests of the current rule that read no row.
    independent: Vec<BoolExp>,
    /// Number of `Insert`s that survived.
    satisfiable: usize,
}

impl Hoisting {
    fn new(stmt: &RamStmt) -> Self {
        let mut eq = UnionFind::new();
        let mut literals: Vec<(Column, Value, RamTerm)> = Vec::new();
        for e in stmt.bool_exps() {
            let BoolExp::Eq(a, b) = e else {
                continue;
            };
            match (a, b) {
                (RamTerm::RowLoad(r1, c1, rel1), RamTerm::RowLoad(r2, c2, rel2)) => {
                    check_key_column(*c1, rel1, e);
                    check_key_column(*c2, rel2, e);
                    eq.union((*r1, *c1), (*r2, *c2));
                }
                (RamTerm::RowLoad(rv, c, rel), lit @ RamTerm::Lit(v, _))
                | (lit @ RamTerm::Lit(v, _), RamTerm::RowLoad(rv, c, rel)) => {
                    check_key_column(*c, rel, e);
                    eq.make_set((*rv, *c));
                    literals.push(((*rv, *c), v.clone(), lit.clone()));
                }
                (RamTerm::Lit(..), RamTerm::Lit(..)) => {}
                _ => panic!("malformed equality {e}, operands must be row loads or literals"),
            }
        }

        let mut impossible = BTreeSet::new();
        let mut terms: BTreeMap<Column, RamTerm> = BTreeMap::new();
        for (column, value, lit) in literals {
            let rep = *eq.find(&column).expect("column was inserted above");
            match terms.get(&rep) {
                Some(RamTerm::Lit(known, _)) if *known != value => {
                    tracing::debug!("{} can never equal both {known} and {value}", column.0);
                    impossible.insert(column.0);
                }
                Some(_) => {}
                None => {
                    terms.insert(rep, lit);
                }
            }
        }

        Self {
            eq,
            terms,
            impossible,
            bound: Vec::new(),
            id_to_bool: BTreeMap::new(),
            independent: Vec::new(),
            satisfiable: 0,
        }
    }

    fn stmt(&mut self, stmt: &RamStmt) -> Option<RamStmt> {
        match stmt {
            RamStmt::Insert(op) => {
                self.id_to_bool.clear();
                self.independent.clear();
                let Some(op) = self.op(op) else {
                    let mut head = None;
                    op.visit(&mut |op| {
                        if let RelOp::Project(_, rel) = op {
                            head = Some(rel);
                        }
                    });
                    let head = head.expect("every rule ends in a projection");
                    tracing::debug!("dropping unsatisfiable rule for {head}");
                    return Some(RamStmt::Comment(format!("unsatisfiable rule for {head}")));
                };
                self.satisfiable += 1;
                assert!(
                    self.id_to_bool.values().all(Vec::is_empty),
                    "tests left behind after rebuilding {op}"
                );

                let mut relations = BTreeSet::new();
                op.visit(&mut |op| match op {
                    RelOp::Search(_, rel, _) | RelOp::Query(_, rel, _, _) => {
                        relations.insert(rel.clone());
                    }
                    RelOp::Functional(..) | RelOp::Project(..) | RelOp::If(..) => {}
                });
                let mut guards: Vec<BoolExp> = relations
                    .into_iter()
                    .map(|rel| BoolExp::not(BoolExp::IsEmpty(rel)))
                    .collect();
                guards.append(&mut self.independent);

                Some(RamStmt::Insert(if guards.is_empty() {
                    op
                } else {
                    RelOp::if_(guards, op)
                }))
            }
            RamStmt::Seq(xs) => {
                let xs: Vec<RamStmt> = xs.iter().filter_map(|x| self.stmt(x)).collect();
                (!xs.is_empty()).then_some(RamStmt::Seq(xs))
            }
            RamStmt::Par(xs) => {
                let xs: Vec<RamStmt> = xs.iter().filter_map(|x| self.stmt(x)).collect();
                (!xs.is_empty()).then_some(RamStmt::Par(xs))
            }
            RamStmt::Until(tests, body) => {
                let body = self.stmt(body)?;
                Some(RamStmt::Until(tests.clone(), Box::new(body)))
            }
            RamStmt::MergeInto(..) | RamStmt::Swap(..) | RamStmt::Purge(_) | RamStmt::Comment(_) => {
                Some(stmt.clone())
            }
        }
    }

    fn op(&mut self, op: &RelOp) -> Option<RelOp> {
        match op {
            RelOp::Search(rv, rel, body) => {
                if self.impossible.contains(rv) {
                    return None;
                }
                let (keys, tests, body) = self.scope(*rv, rel, rel.key_arity(), false, body);
                let body = body?;
                Some(if keys.is_empty() {
                    RelOp::search(*rv, rel.clone(), wrap(tests, body))
                } else {
                    RelOp::query(*rv, rel.clone(), keys, wrap(tests, body))
                })
            }
            RelOp::Functional(rv, f, inputs, body, arity) => {
                if self.impossible.contains(rv) {
                    return None;
                }
                let shape = RelSym::functional(*arity);
                let (keys, tests, body) = self.scope(*rv, &shape, *arity, true, body);
                debug_assert!(keys.is_empty());
                let body = body?;
                Some(RelOp::functional(
                    *rv,
                    *f,
                    inputs.clone(),
                    wrap(tests, body),
                    *arity,
                ))
            }
            RelOp::Query(rv, rel, ..) => panic!("query of {rv} in {rel} before hoisting"),
            RelOp::If(tests, body) => {
                for test in tests {
                    match test {
                        BoolExp::Eq(RamTerm::Lit(a, _), RamTerm::Lit(b, _)) => {
                            if a != b {
                                return None;
                            }
                        }
                        BoolExp::Eq(..) => {}
                        _ => self.file(test),
                    }
                }
                self.op(body)
            }
            RelOp::Project(..) => Some(op.clone()),
        }
    }

    /// Rebuild `body` with `rv` bound. Returns the key equalities, the tests to place directly
    /// below the loop and the rebuilt body.
    fn scope(
        &mut self,
        rv: RowVar,
        rel: &RelSym,
        arity: usize,
        produced: bool,
        body: &RelOp,
    ) -> (Vec<BoolExp>, Vec<BoolExp>, Option<RelOp>) {
        let mut keys = Vec::new();
        let mut tests = Vec::new();
        let mut registered = Vec::new();
        for column in 0..arity {
            let Some(&rep) = self.eq.find(&(rv, column)) else {
                continue;
            };
            let load = RamTerm::RowLoad(rv, column, rel.clone());
            match self.terms.get(&rep) {
                None => {
                    self.terms.insert(rep, load);
                    registered.push(rep);
                }
                Some(RamTerm::RowLoad(other, _, _)) if *other == rv => {
                    tests.push(BoolExp::Eq(load, self.terms[&rep].clone()));
                }
                Some(known) if produced => tests.push(BoolExp::Eq(load, known.clone())),
                Some(known) => keys.push(BoolExp::Eq(load, known.clone())),
            }
        }

        self.bound.push(rv);
        let body = self.op(body);
        self.bound.pop();
        for rep in registered {
            self.terms.remove(&rep);
        }
        tests.extend(self.id_to_bool.remove(&rv).unwrap_or_default());
        (keys, tests, body)
    }

    /// Attach `test` to the innermost enclosing loop it reads from.
    fn file(&mut self, test: &BoolExp) {
        let (eq, terms) = (&self.eq, &self.terms);
        let test = test.map_terms(&mut |term| match term {
            RamTerm::RowLoad(rv, column, _) => eq
                .find(&(rv, column))
                .and_then(|rep| terms.get(rep))
                .cloned()
                .unwrap_or(term),
            other => other,
        });
        let deps = test.row_vars();
        if deps.is_empty() {
            self.independent.push(test);
            return;
        }
        assert!(
            deps.iter().all(|rv| self.bound.contains(rv)),
            "{test} reads a row that is not bound"
        );
        let &innermost = self
            .bound
            .iter()
            .rev()
            .find(|&&rv| deps.contains(&rv))
            .expect("deps is non-empty");
        self.id_to_bool.entry(innermost).or_default().push(test);
    }
}

fn check_key_column(column: usize, rel: &RelSym, e: &BoolExp) {
    assert!(
        column < rel.key_arity(),
        "malformed equality {e}, column {column} of {rel} is not a key column"
    );
}

fn wrap(tests: Vec<BoolExp>, body: RelOp) -> RelOp {
    if tests.is_empty() {
        body
    } else {
        RelOp::if_(tests, body)
    }
}

#[cfg(test)]
mod test {
    use super::hoist;
    use crate::{
        datalog::{self, Atom, BodyItem, Datalog, Rule, Term},
        predicates::Predicates,
        ram::{Facts, RamProgram, RelSym},
    };
    use expect_test::{Expect, expect};

    fn check(rules: Vec<Rule>, expected: Expect) {
        let program = Datalog {
            strata: vec![rules],
            ..Datalog::default()
        };
        let predicates = Predicates::initialize(&program, &Facts::new());
        let ram: RamProgram = datalog::compile(&program, Facts::new(), predicates);
        expected.assert_eq(&hoist(ram).stmt.to_string());
    }

    fn v(name: &'static str) -> Term {
        Term::var(name)
    }

    #[test]
    fn join_becomes_query() {
        let a = RelSym::new("A", 0, 2);
        let b = RelSym::new("B", 1, 2);
        let r = RelSym::new("R", 2, 2);
        check(
            vec![Rule::new(
                Atom::new(r, vec![v("x"), v("y")]),
                vec![
                    BodyItem::Atom(Atom::new(a, vec![v("x"), v("z")])),
                    BodyItem::Atom(Atom::new(b, vec![v("z"), v("y")])),
                ],
            )],
            expect![[r#"
                if !empty(A#0) && !empty(B#1) {
                    search x0 in A#0 {
                        query x1 in B#1 where x1[0] == x0[1] {
                            project (x0[0], x1[1]) into R#2
                        }
                    }
                }
            "#]],
        );
    }

    #[test]
    fn conflicting_literals_remove_rule() {
        let a = RelSym::new("A", 0, 2);
        let r = RelSym::new("R", 1, 1);
        check(
            vec![Rule::new(
                Atom::new(r, vec![v("x")]),
                vec![
                    BodyItem::Atom(Atom::new(a, vec![v("x"), v("y")])),
                    BodyItem::Eq(v("y"), Term::lit(1)),
                    BodyItem::Eq(v("y"), Term::lit(2)),
                ],
            )],
            expect![[r#"
                // no rule is satisfiable
            "#]],
        );
    }

    #[test]
    fn unsatisfiable_rule_leaves_comment() {
        let a = RelSym::new("A", 0, 2);
        let r = RelSym::new("R", 1, 1);
        let s = RelSym::new("S", 2, 1);
        check(
            vec![
                Rule::new(
                    Atom::new(r, vec![v("x")]),
                    vec![
                        BodyItem::Atom(Atom::new(a.clone(), vec![v("x"), v("y")])),
                        BodyItem::Eq(v("y"), Term::lit(1)),
                        BodyItem::Eq(v("y"), Term::lit(2)),
                    ],
                ),
                Rule::new(
                    Atom::new(s, vec![v("x")]),
                    vec![BodyItem::Atom(Atom::new(a, vec![v("x"), Term::lit(1)]))],
                ),
            ],
            expect![[r#"
                // unsatisfiable rule for R#1
                if !empty(A#0) {
                    query x1 in A#0 where x1[1] == 1 {
                        project (x1[0]) into S#2
                    }
                }
            "#]],
        );
    }

    #[test]
    fn literal_becomes_query_key() {
        let a = RelSym::new("A", 0, 2);
        let r = RelSym::new("R", 1, 1);
        check(
            vec![Rule::new(
                Atom::new(r, vec![v("x")]),
                vec![BodyItem::Atom(Atom::new(a, vec![v("x"), Term::lit(3)]))],
            )],
            expect![[r#"
                if !empty(A#0) {
                    query x0 in A#0 where x0[1] == 3 {
                        project (x0[0]) into R#1
                    }
                }
            "#]],
        );
    }

    #[test]
    fn literal_comparison_decided_statically() {
        let a = RelSym::new("A", 0, 1);
        let r = RelSym::new("R", 1, 1);
        let rule = |lit: i64| {
            Rule::new(
                Atom::new(r.clone(), vec![v("x")]),
                vec![
                    BodyItem::Atom(Atom::new(a.clone(), vec![v("x")])),
                    BodyItem::Eq(Term::lit(lit), Term::lit(1)),
                ],
            )
        };
        check(
            vec![rule(1), rule(2)],
            expect![[r#"
                if !empty(A#0) {
                    search x0 in A#0 {
                        project (x0[0]) into R#1
                    }
                }
            "#]],
        );
    }

    #[test]
    fn tests_move_to_innermost_dependency() {
        let a = RelSym::new("A", 0, 1);
        let b = RelSym::new("B", 1, 1);
        let r = RelSym::new("R", 2, 2);
        let mut program = Datalog::default();
        let positive = program.function(crate::ram::HostFunction::guard("positive", 1, |args| {
            matches!(args[0], crate::ram::Value::Int64(x) if x > 0)
        }));
        let always = program.function(crate::ram::HostFunction::guard("always", 1, |_| true));
        program.strata = vec![vec![Rule::new(
            Atom::new(r, vec![v("x"), v("y")]),
            vec![
                BodyItem::Atom(Atom::new(a, vec![v("x")])),
                BodyItem::Atom(Atom::new(b, vec![v("y")])),
                BodyItem::Guard(positive, vec![v("x")]),
                BodyItem::Guard(always, vec![Term::lit(0)]),
            ],
        )]];
        let predicates = Predicates::initialize(&program, &Facts::new());
        let ram = datalog::compile(&program, Facts::new(), predicates);
        expect![[r#"
            if !empty(A#0) && !empty(B#1) && f1(0) {
                search x0 in A#0 {
                    if f0(x0[0]) {
                        search x1 in B#1 {
                            project (x0[0], x1[0]) into R#2
                        }
                    }
                }
            }
        "#]]
        .assert_eq(&hoist(ram).stmt.to_string());
    }

    #[test]
    fn repeated_variable_within_row() {
        let a = RelSym::new("A", 0, 2);
        let r = RelSym::new("R", 1, 1);
        check(
            vec![Rule::new(
                Atom::new(r, vec![v("x")]),
                vec![BodyItem::Atom(Atom::new(a, vec![v("x"), v("x")]))],
            )],
            expect![[r#"
                if !empty(A#0) {
                    search x0 in A#0 {
                        if x0[1] == x0[0] {
                            project (x0[0]) into R#1
                        }
                    }
                }
            "#]],
        );
    }

    #[test]
    #[should_panic(expected = "malformed equality")]
    fn equality_of_applications_is_rejected() {
        let a = RelSym::new("A", 0, 1);
        let r = RelSym::new("R", 1, 1);
        let mut program = Datalog::default();
        let id = program.function(crate::ram::HostFunction::term("id", 1, |args| {
            args[0].clone()
        }));
        program.strata = vec![vec![Rule::new(
            Atom::new(r, vec![v("x")]),
            vec![
                BodyItem::Atom(Atom::new(a, vec![v("x")])),
                BodyItem::Eq(Term::app(id, vec![v("x")]), v("x")),
            ],
        )]];
        let predicates = Predicates::initialize(&program, &Facts::new());
        let _: RamProgram = hoist(datalog::compile(&program, Facts::new(), predicates));
    }
}
