//! Stratified rules and their initial compilation to RAM.
//!
//! There is no parser, programs are built directly. Strata are given by the caller and are not
//! checked. Every rule compiles to the naive plan: one nested loop per body atom, all tests in a
//! single `If` right above the `Project`. Recursive strata use the Full/Delta/New scheme.

use crate::{
    ids::{FunctionId, RamId, RowVar},
    predicates::{PredType, Predicates},
    ram::{
        BoolExp, Denotation, Facts, HostFunction, Indexes, RamProgram, RamStmt, RamTerm, RelOp,
        RelSym, Value,
    },
    typed_vec::TVec,
};
use itertools::Itertools as _;
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{self, Display, Formatter},
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Term {
    Var(&'static str),
    Lit(Value),
    Wild,
    App(FunctionId, Vec<Term>),
}
impl Term {
    pub fn var(name: &'static str) -> Self {
        Term::Var(name)
    }
    pub fn lit(v: impl Into<Value>) -> Self {
        Term::Lit(v.into())
    }
    pub fn app(f: FunctionId, args: Vec<Term>) -> Self {
        Term::App(f, args)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Atom {
    pub rel: RelSym,
    pub terms: Vec<Term>,
}
impl Atom {
    pub fn new(rel: RelSym, terms: Vec<Term>) -> Self {
        assert_eq!(rel.arity, terms.len(), "arity mismatch for {rel}");
        Self { rel, terms }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BodyItem {
    Atom(Atom),
    Not(Atom),
    Guard(FunctionId, Vec<Term>),
    /// `let (outs..) = f(ins..)`, one binding per returned row.
    Functional {
        outs: Vec<&'static str>,
        f: FunctionId,
        ins: Vec<Term>,
    },
    Eq(Term, Term),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Rule {
    pub head: Atom,
    pub body: Vec<BodyItem>,
}
impl Rule {
    pub fn new(head: Atom, body: Vec<BodyItem>) -> Self {
        Self { head, body }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Datalog {
    pub strata: Vec<Vec<Rule>>,
    pub functions: TVec<FunctionId, HostFunction>,
}
impl Datalog {
    pub fn function(&mut self, f: HostFunction) -> FunctionId {
        self.functions.push(f)
    }
}

/// Compile every stratum, in order.
pub fn compile(program: &Datalog, facts: Facts, predicates: Predicates) -> RamProgram {
    let mut ctx = Ctx {
        predicates: &predicates,
        next_row: 0,
        next_id: 0,
    };
    let stmt = RamStmt::Seq(
        program
            .strata
            .iter()
            .map(|stratum| ctx.stratum(stratum))
            .collect(),
    );
    tracing::debug!(
        "compiled {} strata using {} rows",
        program.strata.len(),
        ctx.next_row
    );
    RamProgram {
        stmt,
        facts,
        predicates,
        indexes: Indexes::default(),
        functions: program.functions.clone(),
    }
}

struct Ctx<'a> {
    predicates: &'a Predicates,
    next_row: usize,
    next_id: usize,
}

enum Binder {
    Search(RowVar, RelSym),
    Functional(RowVar, FunctionId, Vec<RamTerm>, usize),
}

impl Ctx<'_> {
    fn fresh_row(&mut self) -> RowVar {
        self.next_row += 1;
        RowVar(self.next_row - 1)
    }
    fn fresh_id(&mut self) -> RamId {
        self.next_id += 1;
        RamId(self.next_id - 1)
    }

    fn stratum(&mut self, rules: &[Rule]) -> RamStmt {
        let heads: BTreeSet<RelSym> = rules.iter().map(|r| r.head.rel.clone()).collect();
        let is_recursive = |rule: &Rule| {
            rule.body.iter().any(|item| match item {
                BodyItem::Atom(atom) => heads.contains(&atom.rel),
                _ => false,
            })
        };
        if !rules.iter().any(is_recursive) {
            return RamStmt::Seq(
                rules
                    .iter()
                    .map(|rule| RamStmt::Insert(self.rule(rule, None, PredType::Full, false)))
                    .collect(),
            );
        }

        let predicates = self.predicates;
        let as_type = |rel: &RelSym, t: PredType| predicates.full_rel_sym_to_type(rel, t);
        let advance: Vec<RamStmt> = heads
            .iter()
            .flat_map(|h| {
                [
                    RamStmt::MergeInto(as_type(h, PredType::New), h.clone()),
                    RamStmt::Swap(as_type(h, PredType::New), as_type(h, PredType::Delta)),
                    RamStmt::Purge(as_type(h, PredType::New)),
                ]
            })
            .collect();
        let done: Vec<BoolExp> = heads
            .iter()
            .map(|h| BoolExp::IsEmpty(as_type(h, PredType::Delta)))
            .collect();

        let mut stmts: Vec<RamStmt> = rules
            .iter()
            .map(|rule| RamStmt::Insert(self.rule(rule, None, PredType::New, false)))
            .collect();
        stmts.extend(advance.iter().cloned());

        let mut body = Vec::new();
        for rule in rules {
            let recursive_atoms = rule
                .body
                .iter()
                .filter_map(|item| match item {
                    BodyItem::Atom(atom) => Some(heads.contains(&atom.rel)),
                    _ => None,
                })
                .positions(|recursive| recursive)
                .collect_vec();
            for position in recursive_atoms {
                body.push(RamStmt::Insert(self.rule(
                    rule,
                    Some(position),
                    PredType::New,
                    true,
                )));
            }
        }
        body.extend(advance);
        stmts.push(RamStmt::Until(done, Box::new(RamStmt::Seq(body))));
        RamStmt::Seq(stmts)
    }

    /// Naive plan of `rule`, reading positive atom number `delta` from Delta.
    fn rule(
        &mut self,
        rule: &Rule,
        delta: Option<usize>,
        target: PredType,
        only_new: bool,
    ) -> RelOp {
        let mut env: BTreeMap<&'static str, RamTerm> = BTreeMap::new();
        let mut binders = Vec::new();
        let mut tests = Vec::new();

        let mut positive = 0;
        for item in &rule.body {
            match item {
                BodyItem::Atom(atom) => {
                    let wanted = if delta == Some(positive) {
                        PredType::Delta
                    } else {
                        PredType::Full
                    };
                    positive += 1;
                    let rel = self.predicates.full_rel_sym_to_type(&atom.rel, wanted);
                    let rv = self.fresh_row();
                    binders.push(Binder::Search(rv, rel.clone()));
                    self.bind_atom(rv, &rel, &atom.terms, &mut env, &mut tests);
                }
                BodyItem::Functional { outs, f, ins } => {
                    let inputs = ins.iter().map(|t| self.term(t, &env)).collect();
                    let rv = self.fresh_row();
                    let shape = RelSym::functional(outs.len());
                    binders.push(Binder::Functional(rv, *f, inputs, outs.len()));
                    for (column, &out) in outs.iter().enumerate() {
                        let load = RamTerm::RowLoad(rv, column, shape.clone());
                        match env.get(out) {
                            Some(bound) => tests.push(BoolExp::Eq(load, bound.clone())),
                            None => {
                                env.insert(out, load);
                            }
                        }
                    }
                }
                BodyItem::Not(..) | BodyItem::Guard(..) | BodyItem::Eq(..) => {}
            }
        }
        for item in &rule.body {
            match item {
                BodyItem::Not(atom) => {
                    let terms = atom.terms.iter().map(|t| self.term(t, &env)).collect();
                    tests.push(BoolExp::NotMemberOf(terms, atom.rel.clone()));
                }
                BodyItem::Guard(f, args) => {
                    let args = args.iter().map(|t| self.term(t, &env)).collect();
                    tests.push(BoolExp::guard(*f, args));
                }
                BodyItem::Eq(a, b) => {
                    tests.push(BoolExp::Eq(self.term(a, &env), self.term(b, &env)));
                }
                BodyItem::Atom(_) | BodyItem::Functional { .. } => {}
            }
        }

        let head: Vec<RamTerm> = rule.head.terms.iter().map(|t| self.term(t, &env)).collect();
        // A computed lattice value may reach bottom, and bottom facts are never derived.
        let computed = rule
            .head
            .rel
            .lattice_column()
            .map(|column| &head[column])
            .filter(|t| matches!(t, RamTerm::Meet(..) | RamTerm::App(..)));
        if let (Some(value), Denotation::Latticenal { bottom, .. }) =
            (computed, &rule.head.rel.den)
        {
            tests.push(BoolExp::not(BoolExp::Leq(
                bottom.clone(),
                value.clone(),
                rule.head.rel.clone(),
            )));
        }
        if only_new {
            tests.push(BoolExp::NotMemberOf(head.clone(), rule.head.rel.clone()));
        }
        let target = self.predicates.full_rel_sym_to_type(&rule.head.rel, target);
        let mut op = RelOp::Project(head, target);
        if !tests.is_empty() {
            op = RelOp::if_(tests, op);
        }
        for binder in binders.into_iter().rev() {
            op = match binder {
                Binder::Search(rv, rel) => RelOp::search(rv, rel, op),
                Binder::Functional(rv, f, inputs, arity) => {
                    RelOp::functional(rv, f, inputs, op, arity)
                }
            };
        }
        op
    }

    fn bind_atom(
        &mut self,
        rv: RowVar,
        rel: &RelSym,
        terms: &[Term],
        env: &mut BTreeMap<&'static str, RamTerm>,
        tests: &mut Vec<BoolExp>,
    ) {
        for (column, term) in terms.iter().enumerate() {
            let load = RamTerm::RowLoad(rv, column, rel.clone());
            if let (Some(lattice_column), Denotation::Latticenal { bottom, glb, .. }) =
                (rel.lattice_column(), &rel.den)
            {
                if column == lattice_column {
                    tests.push(BoolExp::not(BoolExp::Leq(
                        bottom.clone(),
                        load.clone(),
                        rel.clone(),
                    )));
                    match term {
                        Term::Var(v) => {
                            let met = match env.remove(v) {
                                Some(prev) => RamTerm::Meet(
                                    *glb,
                                    Box::new(prev),
                                    (rv, rel.clone()),
                                    self.fresh_id(),
                                ),
                                None => load,
                            };
                            env.insert(v, met);
                        }
                        Term::Wild => {}
                        _ => panic!("lattice column of {rel} must be a variable or wildcard"),
                    }
                    continue;
                }
            }
            match term {
                Term::Var(v) => match env.get(v) {
                    Some(bound) => tests.push(BoolExp::Eq(load, bound.clone())),
                    None => {
                        env.insert(v, load);
                    }
                },
                Term::Lit(value) => {
                    tests.push(BoolExp::Eq(load, RamTerm::Lit(value.clone(), self.fresh_id())));
                }
                Term::Wild => {}
                Term::App(..) => panic!("function application inside body atom of {rel}"),
            }
        }
    }

    fn term(&mut self, term: &Term, env: &BTreeMap<&'static str, RamTerm>) -> RamTerm {
        match term {
            Term::Var(v) => env
                .get(v)
                .unwrap_or_else(|| panic!("unbound variable {v}"))
                .clone(),
            Term::Lit(value) => RamTerm::Lit(value.clone(), self.fresh_id()),
            Term::Wild => panic!("wildcard outside of a body atom"),
            Term::App(f, args) => {
                let args = args.iter().map(|t| self.term(t, env)).collect();
                RamTerm::app(*f, args, self.fresh_id())
            }
        }
    }
}

impl Display for Term {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Term::Var(v) => write!(f, "{v}"),
            Term::Lit(value) => write!(f, "{value}"),
            Term::Wild => write!(f, "_"),
            Term::App(func, args) => write!(f, "{func}({})", args.iter().join(", ")),
        }
    }
}
impl Display for Atom {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.rel.name, self.terms.iter().join(", "))
    }
}
impl Display for Rule {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let body = self.body.iter().map(|item| match item {
            BodyItem::Atom(atom) => atom.to_string(),
            BodyItem::Not(atom) => format!("not {atom}"),
            BodyItem::Guard(func, args) => format!("if {func}({})", args.iter().join(", ")),
            BodyItem::Functional { outs, f, ins } => {
                format!("let ({}) = {f}({})", outs.iter().join(", "), ins.iter().join(", "))
            }
            BodyItem::Eq(a, b) => format!("if {a} == {b}"),
        });
        write!(f, "{} :- {}.", self.head, body.format(", "))
    }
}

#[cfg(test)]
mod test {
    use super::{Atom, BodyItem, Datalog, Rule, Term};
    use crate::{
        predicates::Predicates,
        ram::{Facts, RelSym},
    };
    use expect_test::expect;

    #[test]
    fn naive_join() {
        let a = RelSym::new("A", 0, 2);
        let b = RelSym::new("B", 1, 2);
        let r = RelSym::new("R", 2, 2);
        let rule = Rule::new(
            Atom::new(r, vec![Term::var("x"), Term::var("y")]),
            vec![
                BodyItem::Atom(Atom::new(a, vec![Term::var("x"), Term::var("z")])),
                BodyItem::Atom(Atom::new(b, vec![Term::var("z"), Term::var("y")])),
            ],
        );
        expect!["R(x, y) :- A(x, z), B(z, y)."].assert_eq(&rule.to_string());
        let program = Datalog {
            strata: vec![vec![rule]],
            ..Datalog::default()
        };
        let predicates = Predicates::initialize(&program, &Facts::new());
        let ram = super::compile(&program, Facts::new(), predicates);
        expect![[r#"
            search x0 in A#0 {
                search x1 in B#1 {
                    if x1[0] == x0[1] {
                        project (x0[0], x1[1]) into R#2
                    }
                }
            }
        "#]]
        .assert_eq(&ram.stmt.to_string());
    }

    #[test]
    fn recursive_stratum_uses_delta() {
        let edge = RelSym::new("Edge", 0, 2);
        let path = RelSym::new("Path", 1, 2);
        let base = Rule::new(
            Atom::new(path.clone(), vec![Term::var("x"), Term::var("y")]),
            vec![BodyItem::Atom(Atom::new(
                edge.clone(),
                vec![Term::var("x"), Term::var("y")],
            ))],
        );
        let step = Rule::new(
            Atom::new(path.clone(), vec![Term::var("x"), Term::var("z")]),
            vec![
                BodyItem::Atom(Atom::new(path, vec![Term::var("x"), Term::var("y")])),
                BodyItem::Atom(Atom::new(edge, vec![Term::var("y"), Term::var("z")])),
            ],
        );
        let program = Datalog {
            strata: vec![vec![base, step]],
            ..Datalog::default()
        };
        let predicates = Predicates::initialize(&program, &Facts::new());
        let ram = super::compile(&program, Facts::new(), predicates);
        expect![[r#"
            search x0 in Edge#0 {
                project (x0[0], x0[1]) into Path#5
            }
            search x1 in Path#1 {
                search x2 in Edge#0 {
                    if x2[0] == x1[1] {
                        project (x1[0], x2[1]) into Path#5
                    }
                }
            }
            merge Path#5 into Path#1
            swap Path#5 Path#3
            purge Path#5
            until empty(Path#3) {
                search x3 in Path#3 {
                    search x4 in Edge#0 {
                        if x4[0] == x3[1] && (x3[0], x4[1]) notin Path#1 {
                            project (x3[0], x4[1]) into Path#5
                        }
                    }
                }
                merge Path#5 into Path#1
                swap Path#5 Path#3
                purge Path#5
            }
        "#]]
        .assert_eq(&ram.stmt.to_string());
    }
}
