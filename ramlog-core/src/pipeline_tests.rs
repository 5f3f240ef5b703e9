//! End to end runs of the bundled programs, with and without hoisting.

use crate::{
    Configuration, compile, compile_with,
    datalog::{Atom, BodyItem, Datalog, Rule, Term},
    demo,
    interpret::Solution,
    predicates::Predicates,
    ram::{Denotation, Facts, HostFunction, RelSym, Value},
    run, solve,
};
use expect_test::expect;
use proptest::prelude::*;
use std::collections::BTreeSet;

fn ints(rows: &[&[i64]]) -> BTreeSet<Vec<Value>> {
    rows.iter()
        .map(|row| row.iter().copied().map(Value::Int64).collect())
        .collect()
}

fn solve_without_hoisting(program: &Datalog, facts: Facts) -> Solution {
    let config = Configuration {
        hoisting: false,
        ..Configuration::default()
    };
    run(&config, &compile_with(&config, program, facts))
}

#[test]
fn successor() {
    let (program, facts) = demo::successor();
    let solution = solve(&program, facts);
    let r = solution.get("R");
    assert_eq!(r.len(), 50);
    assert!(r.contains(&vec![Value::Int64(0), Value::Int64(1)]));
    assert!(r.contains(&vec![Value::Int64(49), Value::Int64(50)]));
    assert_eq!(solution.get("P").len(), 50);
}

#[test]
fn empty_input_skips_rule() {
    let (program, mut facts) = demo::successor();
    facts.values_mut().for_each(Vec::clear);
    let solution = solve(&program, facts);
    assert!(solution.get("R").is_empty());
}

#[test]
fn join_uses_index() {
    let (program, facts) = demo::join();
    let exe = compile(&program, facts.clone());
    expect![[r#"
        if !empty(i0) && !empty(i3) {
            search m0 [1]->m1[0] in i0 {
                query m1 in i3 prefix 1 {
                    project (m0[0], m1[1]) into i6
                }
            }
        }
    "#]]
    .assert_eq(&exe.stmt.to_string());

    let expected = ints(&[&[1, 100], &[1, 101], &[3, 100], &[3, 101]]);
    assert_eq!(run(&Configuration::default(), &exe).get("R"), expected);
    assert_eq!(solve_without_hoisting(&program, facts).get("R"), expected);
}

#[test]
fn unsatisfiable_rule_is_removed() {
    let (program, facts) = demo::unsatisfiable();
    let exe = compile(&program, facts.clone());
    expect![[r#"
        // no rule is satisfiable
    "#]]
    .assert_eq(&exe.stmt.to_string());
    assert!(run(&Configuration::default(), &exe).get("R").is_empty());
    assert!(solve_without_hoisting(&program, facts).get("R").is_empty());
}

#[test]
fn transitive_closure_of_chain() {
    let (program, facts) = demo::transitive_closure(10);
    let solution = solve(&program, facts.clone());
    let path = solution.get("Path");
    assert_eq!(path.len(), 55);
    assert!(path.contains(&vec![Value::Int64(0), Value::Int64(10)]));
    assert!(!path.contains(&vec![Value::Int64(10), Value::Int64(0)]));
    assert_eq!(solve_without_hoisting(&program, facts), solution);
}

#[test]
fn shortest_path_lattice() {
    let (program, facts) = demo::shortest_path();
    let expected = ints(&[&[0, 0], &[1, 3], &[2, 1], &[3, 4], &[4, 7]]);
    assert_eq!(solve(&program, facts.clone()).get("Dist"), expected);
    assert_eq!(solve_without_hoisting(&program, facts).get("Dist"), expected);
}

#[test]
fn primes_through_functional_and_negation() {
    let (program, facts) = demo::primes(12);
    let solution = solve(&program, facts.clone());
    assert_eq!(solution.get("Prime"), ints(&[&[2], &[3], &[5], &[7], &[11]]));
    assert!(solution.get("Divisor").contains(&vec![Value::Int64(4), Value::Int64(12)]));
    assert!(!solution.get("Composite").contains(&vec![Value::Int64(1)]));
    assert_eq!(solve_without_hoisting(&program, facts), solution);
}

#[test]
fn repeated_lattice_variable_takes_meet() {
    // R(x; l) :- A(x; l), B(x; l).
    let mut program = Datalog::default();
    let leq = program.function(HostFunction::term("leq", 2, |args| {
        Value::Bool(args[0] <= args[1])
    }));
    let lub = program.function(HostFunction::term("max", 2, |args| {
        args[0].clone().max(args[1].clone())
    }));
    let glb = program.function(HostFunction::term("min", 2, |args| {
        args[0].clone().min(args[1].clone())
    }));
    let den = Denotation::Latticenal {
        bottom: Value::Int64(0),
        leq,
        lub,
        glb,
    };
    let a = RelSym::new_lattice("A", 0, 2, den.clone());
    let b = RelSym::new_lattice("B", 1, 2, den.clone());
    let r = RelSym::new_lattice("R", 2, 2, den);
    let v = Term::var;
    program.strata = vec![vec![Rule::new(
        Atom::new(r, vec![v("x"), v("l")]),
        vec![
            BodyItem::Atom(Atom::new(a.clone(), vec![v("x"), v("l")])),
            BodyItem::Atom(Atom::new(b.clone(), vec![v("x"), v("l")])),
        ],
    )]];
    let facts = Facts::from([
        (a, ints(&[&[1, 5], &[2, 3]]).into_iter().collect()),
        (b, ints(&[&[1, 2], &[2, 7], &[3, 1]]).into_iter().collect()),
    ]);
    let expected = ints(&[&[1, 2], &[2, 3]]);
    assert_eq!(solve(&program, facts.clone()).get("R"), expected);
    assert_eq!(solve_without_hoisting(&program, facts).get("R"), expected);
}

/// Sets of bits ordered by inclusion, with the empty set as bottom.
fn bitset_lattice(program: &mut Datalog) -> Denotation {
    fn bits(v: &Value) -> i64 {
        let Value::Int64(x) = v else {
            panic!("{v} is not a bit set")
        };
        *x
    }
    let leq = program.function(HostFunction::term("subset", 2, |args| {
        Value::Bool(bits(&args[0]) & !bits(&args[1]) == 0)
    }));
    let lub = program.function(HostFunction::term("union", 2, |args| {
        Value::Int64(bits(&args[0]) | bits(&args[1]))
    }));
    let glb = program.function(HostFunction::term("intersection", 2, |args| {
        Value::Int64(bits(&args[0]) & bits(&args[1]))
    }));
    Denotation::Latticenal {
        bottom: Value::Int64(0),
        leq,
        lub,
        glb,
    }
}

#[test]
fn meet_reaching_bottom_is_not_derived() {
    // R(x; l) :- A(x; l), B(x; l).
    let mut program = Datalog::default();
    let den = bitset_lattice(&mut program);
    let a = RelSym::new_lattice("A", 0, 2, den.clone());
    let b = RelSym::new_lattice("B", 1, 2, den.clone());
    let r = RelSym::new_lattice("R", 2, 2, den);
    let v = Term::var;
    program.strata = vec![vec![Rule::new(
        Atom::new(r, vec![v("x"), v("l")]),
        vec![
            BodyItem::Atom(Atom::new(a.clone(), vec![v("x"), v("l")])),
            BodyItem::Atom(Atom::new(b.clone(), vec![v("x"), v("l")])),
        ],
    )]];
    let facts = Facts::from([
        (a, ints(&[&[1, 0b01], &[2, 0b011]]).into_iter().collect()),
        (b, ints(&[&[1, 0b10], &[2, 0b110]]).into_iter().collect()),
    ]);
    let expected = ints(&[&[2, 0b010]]);
    assert_eq!(solve(&program, facts.clone()).get("R"), expected);
    assert_eq!(solve_without_hoisting(&program, facts).get("R"), expected);
}

#[test]
fn strings_survive_joins() {
    let parent = RelSym::new("Parent", 0, 2);
    let grandparent = RelSym::new("Grandparent", 1, 2);
    let v = Term::var;
    let program = Datalog {
        strata: vec![vec![Rule::new(
            Atom::new(grandparent, vec![v("x"), v("z")]),
            vec![
                BodyItem::Atom(Atom::new(parent.clone(), vec![v("x"), v("y")])),
                BodyItem::Atom(Atom::new(parent.clone(), vec![v("y"), v("z")])),
            ],
        )]],
        ..Datalog::default()
    };
    let pairs = [("ann", "bob"), ("bob", "cid"), ("cid", "dan")];
    let facts = Facts::from([(
        parent,
        pairs
            .iter()
            .map(|&(x, y)| vec![Value::from(x), Value::from(y)])
            .collect(),
    )]);
    let expected: BTreeSet<Vec<Value>> = [("ann", "cid"), ("bob", "dan")]
        .iter()
        .map(|&(x, y)| vec![Value::from(x), Value::from(y)])
        .collect();
    assert_eq!(solve(&program, facts).get("Grandparent"), expected);
}

#[test]
fn dumping_phases_keeps_results() {
    let (program, facts) = demo::join();
    let config = Configuration {
        dump_phases: true,
        ..Configuration::default()
    };
    let solution = run(&config, &compile_with(&config, &program, facts.clone()));
    assert_eq!(solution, solve(&program, facts));
}

fn closure(edges: &[(i64, i64)]) -> BTreeSet<Vec<Value>> {
    let mut paths: BTreeSet<(i64, i64)> = edges.iter().copied().collect();
    loop {
        let next: BTreeSet<(i64, i64)> = paths
            .iter()
            .flat_map(|&(x, y)| {
                edges
                    .iter()
                    .filter(move |&&(p, _)| p == y)
                    .map(move |&(_, z)| (x, z))
            })
            .collect();
        let before = paths.len();
        paths.extend(next);
        if paths.len() == before {
            break;
        }
    }
    paths
        .into_iter()
        .map(|(x, y)| vec![Value::Int64(x), Value::Int64(y)])
        .collect()
}

proptest! {
    #[test]
    fn hoisting_preserves_closure(edges in proptest::collection::vec((0i64..6, 0i64..6), 0..15)) {
        let (program, mut facts) = demo::transitive_closure(0);
        let edge = RelSym::new("Edge", 0, 2);
        facts.insert(
            edge,
            edges.iter().map(|&(x, y)| vec![Value::Int64(x), Value::Int64(y)]).collect(),
        );
        let hoisted = solve(&program, facts.clone());
        let naive = solve_without_hoisting(&program, facts);
        prop_assert_eq!(hoisted.get("Path"), closure(&edges));
        prop_assert_eq!(&hoisted, &naive);
    }
}

/// Rules over `A` and `B` (pairs) and `L1` and `L2` (bit set lattices) that exercise literal
/// keys, repeated variables, guards, negation, host functionals, lattice meets and recursion.
fn mixed_program() -> Datalog {
    let mut program = Datalog::default();
    let den = bitset_lattice(&mut program);
    let even = program.function(HostFunction::guard("even", 1, |args| {
        matches!(args[0], Value::Int64(x) if x % 2 == 0)
    }));
    let upto = program.function(HostFunction::functional("upto", 1, |args| {
        let Value::Int64(n) = args[0] else {
            panic!("upto of {}", args[0])
        };
        (1..=n).map(|d| vec![Value::Int64(d)]).collect()
    }));
    let a = RelSym::new("A", 0, 2);
    let b = RelSym::new("B", 1, 2);
    let l1 = RelSym::new_lattice("L1", 2, 2, den.clone());
    let l2 = RelSym::new_lattice("L2", 3, 2, den.clone());
    let keyed = RelSym::new("Keyed", 4, 1);
    let filtered = RelSym::new("Filtered", 5, 2);
    let below = RelSym::new("Below", 6, 2);
    let met = RelSym::new_lattice("Met", 7, 2, den);
    let reach = RelSym::new("Reach", 8, 2);
    let v = Term::var;
    let pos = |rel: &RelSym, terms: Vec<Term>| BodyItem::Atom(Atom::new(rel.clone(), terms));
    program.strata = vec![
        vec![
            // Keyed(x) :- A(x, 3), B(x, x).
            Rule::new(
                Atom::new(keyed, vec![v("x")]),
                vec![pos(&a, vec![v("x"), Term::lit(3)]), pos(&b, vec![v("x"), v("x")])],
            ),
            // Filtered(x, y) :- A(x, y), not B(y, x), if even(x).
            Rule::new(
                Atom::new(filtered, vec![v("x"), v("y")]),
                vec![
                    pos(&a, vec![v("x"), v("y")]),
                    BodyItem::Not(Atom::new(b.clone(), vec![v("y"), v("x")])),
                    BodyItem::Guard(even, vec![v("x")]),
                ],
            ),
            // Below(x, z) :- A(x, y), let (z) = upto(y).
            Rule::new(
                Atom::new(below, vec![v("x"), v("z")]),
                vec![
                    pos(&a, vec![v("x"), v("y")]),
                    BodyItem::Functional {
                        outs: vec!["z"],
                        f: upto,
                        ins: vec![v("y")],
                    },
                ],
            ),
            // Met(x; l) :- L1(x; l), L2(x; l).
            Rule::new(
                Atom::new(met, vec![v("x"), v("l")]),
                vec![pos(&l1, vec![v("x"), v("l")]), pos(&l2, vec![v("x"), v("l")])],
            ),
        ],
        vec![
            // Reach(x, y) :- A(x, y).
            Rule::new(
                Atom::new(reach.clone(), vec![v("x"), v("y")]),
                vec![pos(&a, vec![v("x"), v("y")])],
            ),
            // Reach(x, z) :- Reach(x, y), B(y, z).
            Rule::new(
                Atom::new(reach.clone(), vec![v("x"), v("z")]),
                vec![pos(&reach, vec![v("x"), v("y")]), pos(&b, vec![v("y"), v("z")])],
            ),
        ],
    ];
    program
}

fn pairs(rows: &[(i64, i64)]) -> Vec<Vec<Value>> {
    rows.iter()
        .map(|&(x, y)| vec![Value::Int64(x), Value::Int64(y)])
        .collect()
}

proptest! {
    #[test]
    fn hoisting_preserves_mixed_rules(
        a in proptest::collection::vec((0i64..5, 0i64..5), 0..12),
        b in proptest::collection::vec((0i64..5, 0i64..5), 0..12),
        l1 in proptest::collection::vec((0i64..4, 0i64..8), 0..8),
        l2 in proptest::collection::vec((0i64..4, 0i64..8), 0..8),
    ) {
        let program = mixed_program();
        let relations: Vec<RelSym> = Predicates::initialize(&program, &Facts::new())
            .relations()
            .cloned()
            .collect();
        let rel = |name: &str| {
            relations
                .iter()
                .find(|rel| rel.name == name)
                .cloned()
                .expect("relation of the program")
        };
        let facts = Facts::from([
            (rel("A"), pairs(&a)),
            (rel("B"), pairs(&b)),
            (rel("L1"), pairs(&l1)),
            (rel("L2"), pairs(&l2)),
        ]);
        let hoisted = solve(&program, facts.clone());
        let naive = solve_without_hoisting(&program, facts);
        prop_assert_eq!(&hoisted, &naive);
    }
}
