//! Small bundled programs, used by the command line driver and the pipeline tests.

use crate::{
    datalog::{Atom, BodyItem, Datalog, Rule, Term},
    ram::{Denotation, Facts, HostFunction, RelSym, Value},
};

fn v(name: &'static str) -> Term {
    Term::var(name)
}
fn atom(rel: &RelSym, terms: Vec<Term>) -> Atom {
    Atom::new(rel.clone(), terms)
}
fn pos(rel: &RelSym, terms: Vec<Term>) -> BodyItem {
    BodyItem::Atom(atom(rel, terms))
}
fn int(value: &Value) -> i64 {
    match value {
        Value::Int64(x) => *x,
        other => panic!("expected an integer, got {other}"),
    }
}
fn rows(xs: impl IntoIterator<Item = Vec<i64>>) -> Vec<Vec<Value>> {
    xs.into_iter()
        .map(|row| row.into_iter().map(Value::Int64).collect())
        .collect()
}

/// `R(x, x + 1) :- P(x).` over `P = 0..50`.
pub fn successor() -> (Datalog, Facts) {
    let p = RelSym::new("P", 0, 1);
    let r = RelSym::new("R", 1, 2);
    let mut program = Datalog::default();
    let succ = program.function(HostFunction::term("succ", 1, |args| {
        Value::Int64(int(&args[0]) + 1)
    }));
    program.strata = vec![vec![Rule::new(
        atom(&r, vec![v("x"), Term::app(succ, vec![v("x")])]),
        vec![pos(&p, vec![v("x")])],
    )]];
    let facts = Facts::from([(p, rows((0..50).map(|x| vec![x])))]);
    (program, facts)
}

/// `R(x, y) :- A(x, z), B(z, y).`
pub fn join() -> (Datalog, Facts) {
    let a = RelSym::new("A", 0, 2);
    let b = RelSym::new("B", 1, 2);
    let r = RelSym::new("R", 2, 2);
    let program = Datalog {
        strata: vec![vec![Rule::new(
            atom(&r, vec![v("x"), v("y")]),
            vec![pos(&a, vec![v("x"), v("z")]), pos(&b, vec![v("z"), v("y")])],
        )]],
        ..Datalog::default()
    };
    let facts = Facts::from([
        (a, rows([vec![1, 10], vec![2, 20], vec![3, 10]])),
        (b, rows([vec![10, 100], vec![10, 101], vec![30, 300]])),
    ]);
    (program, facts)
}

/// Reachability over a chain of `n` edges.
pub fn transitive_closure(n: i64) -> (Datalog, Facts) {
    let edge = RelSym::new("Edge", 0, 2);
    let path = RelSym::new("Path", 1, 2);
    let program = Datalog {
        strata: vec![vec![
            Rule::new(
                atom(&path, vec![v("x"), v("y")]),
                vec![pos(&edge, vec![v("x"), v("y")])],
            ),
            Rule::new(
                atom(&path, vec![v("x"), v("z")]),
                vec![
                    pos(&path, vec![v("x"), v("y")]),
                    pos(&edge, vec![v("y"), v("z")]),
                ],
            ),
        ]],
        ..Datalog::default()
    };
    let facts = Facts::from([(edge, rows((0..n).map(|x| vec![x, x + 1])))]);
    (program, facts)
}

/// `R(x) :- A(x, y), y == 1, y == 2.`
pub fn unsatisfiable() -> (Datalog, Facts) {
    let a = RelSym::new("A", 0, 2);
    let r = RelSym::new("R", 1, 1);
    let program = Datalog {
        strata: vec![vec![Rule::new(
            atom(&r, vec![v("x")]),
            vec![
                pos(&a, vec![v("x"), v("y")]),
                BodyItem::Eq(v("y"), Term::lit(1)),
                BodyItem::Eq(v("y"), Term::lit(2)),
            ],
        )]],
        ..Datalog::default()
    };
    let facts = Facts::from([(a, rows([vec![0, 1], vec![1, 2]]))]);
    (program, facts)
}

/// Shortest distances from node 0, as a lattice where smaller is more precise.
pub fn shortest_path() -> (Datalog, Facts) {
    let mut program = Datalog::default();
    let leq = program.function(HostFunction::term("geq", 2, |args| {
        Value::Bool(int(&args[0]) >= int(&args[1]))
    }));
    let lub = program.function(HostFunction::term("min", 2, |args| {
        Value::Int64(int(&args[0]).min(int(&args[1])))
    }));
    let glb = program.function(HostFunction::term("max", 2, |args| {
        Value::Int64(int(&args[0]).max(int(&args[1])))
    }));
    let add = program.function(HostFunction::term("add", 2, |args| {
        Value::Int64(int(&args[0]).saturating_add(int(&args[1])))
    }));
    let den = Denotation::Latticenal {
        bottom: Value::Int64(i64::MAX),
        leq,
        lub,
        glb,
    };
    let source = RelSym::new("Source", 0, 1);
    let edge = RelSym::new("Edge", 1, 3);
    let dist = RelSym::new_lattice("Dist", 2, 2, den);
    program.strata = vec![vec![
        Rule::new(
            atom(&dist, vec![v("x"), Term::lit(0)]),
            vec![pos(&source, vec![v("x")])],
        ),
        Rule::new(
            atom(&dist, vec![v("y"), Term::app(add, vec![v("d"), v("w")])]),
            vec![
                pos(&dist, vec![v("x"), v("d")]),
                pos(&edge, vec![v("x"), v("y"), v("w")]),
            ],
        ),
    ]];
    let facts = Facts::from([
        (source, rows([vec![0]])),
        (
            edge,
            rows([
                vec![0, 1, 4],
                vec![0, 2, 1],
                vec![2, 1, 2],
                vec![1, 3, 1],
                vec![2, 3, 5],
                vec![3, 4, 3],
            ]),
        ),
    ]);
    (program, facts)
}

/// Primes up to `n` through divisors enumerated by a host function and stratified negation.
pub fn primes(n: i64) -> (Datalog, Facts) {
    let mut program = Datalog::default();
    let upto = program.function(HostFunction::functional("upto", 1, |args| {
        (1..=int(&args[0])).map(|d| vec![Value::Int64(d)]).collect()
    }));
    let divides = program.function(HostFunction::guard("divides", 2, |args| {
        int(&args[1]) % int(&args[0]) == 0
    }));
    let proper = program.function(HostFunction::guard("proper", 2, |args| {
        1 < int(&args[0]) && int(&args[0]) < int(&args[1])
    }));
    let above_one = program.function(HostFunction::guard("above_one", 1, |args| {
        int(&args[0]) > 1
    }));
    let num = RelSym::new("Num", 0, 1);
    let divisor = RelSym::new("Divisor", 1, 2);
    let composite = RelSym::new("Composite", 2, 1);
    let prime = RelSym::new("Prime", 3, 1);
    program.strata = vec![
        vec![Rule::new(
            atom(&divisor, vec![v("d"), v("n")]),
            vec![
                pos(&num, vec![v("n")]),
                BodyItem::Functional {
                    outs: vec!["d"],
                    f: upto,
                    ins: vec![v("n")],
                },
                BodyItem::Guard(divides, vec![v("d"), v("n")]),
            ],
        )],
        vec![Rule::new(
            atom(&composite, vec![v("n")]),
            vec![
                pos(&divisor, vec![v("d"), v("n")]),
                BodyItem::Guard(proper, vec![v("d"), v("n")]),
            ],
        )],
        vec![Rule::new(
            atom(&prime, vec![v("n")]),
            vec![
                pos(&num, vec![v("n")]),
                BodyItem::Not(atom(&composite, vec![v("n")])),
                BodyItem::Guard(above_one, vec![v("n")]),
            ],
        )],
    ];
    let facts = Facts::from([(num, rows((1..=n).map(|x| vec![x])))]);
    (program, facts)
}
