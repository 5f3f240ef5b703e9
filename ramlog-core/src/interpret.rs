//! Sequential reference interpreter for executable RAM.
//!
//! Each physical index is an ordered map from the permuted key to the lattice value of the fact
//! (unit for relational facts). `Par` branches run one after the other.

use crate::{
    boxing::Boxing,
    executable::{Binder, BoolExp, Program, RelOp, Stmt, Term},
    ids::{FunctionId, IndexPos, MemPos},
    ram::{Denotation, RelSym, Value},
    typed_vec::TVec,
};
use std::collections::{BTreeMap, BTreeSet};

type Index = BTreeMap<Vec<i64>, Value>;

/// Facts of every Full relation after evaluation, lattice values last.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Solution {
    pub relations: BTreeMap<RelSym, BTreeSet<Vec<Value>>>,
}
impl Solution {
    /// Facts of the relation named `name`, empty if there is none.
    pub fn get(&self, name: &str) -> BTreeSet<Vec<Value>> {
        self.relations
            .iter()
            .find(|(rel, _)| rel.name == name)
            .map(|(_, facts)| facts.clone())
            .unwrap_or_default()
    }
}

pub fn interpret(program: &Program) -> Solution {
    let start = std::time::Instant::now();
    let mut interpreter = Interpreter {
        program,
        boxing: program.boxing.clone(),
        indexes: program.indexes.iter().map(|_| Index::new()).collect(),
        tuples: program.arities.iter().map(|&arity| vec![0; arity]).collect(),
        lattices: program.arities.iter().map(|_| Value::Unit).collect(),
    };
    for (&(slot, column), &word) in &program.constant_writes {
        interpreter.tuples[slot][column] = word;
    }
    for (rel, facts) in &program.facts {
        let targets: Vec<IndexPos> = program
            .indexes
            .iter_enumerate()
            .filter(|(_, meta)| meta.rel.id == rel.id)
            .map(|(pos, _)| pos)
            .collect();
        for (key, lattice) in facts {
            for &pos in &targets {
                interpreter.insert(pos, key, lattice.clone());
            }
        }
    }

    interpreter.stmt(&program.stmt);

    let solution = interpreter.solution();
    tracing::info!(
        "interpretation took {:?}, {} facts",
        start.elapsed(),
        solution.relations.values().map(BTreeSet::len).sum::<usize>()
    );
    solution
}

struct Interpreter<'a> {
    program: &'a Program,
    boxing: Boxing,
    indexes: TVec<IndexPos, Index>,
    tuples: TVec<MemPos, Vec<i64>>,
    lattices: TVec<MemPos, Value>,
}

impl Interpreter<'_> {
    fn lattice_ops(&self, pos: IndexPos) -> Option<&Denotation> {
        let rel = &self.program.indexes[pos].rel;
        rel.is_lattice().then_some(&rel.den)
    }

    fn permute(&self, pos: IndexPos, key: &[i64]) -> Vec<i64> {
        self.program.indexes[pos]
            .search_order
            .iter()
            .map(|&c| key[c])
            .collect()
    }
    fn unpermute(&self, pos: IndexPos, permuted: &[i64]) -> Vec<i64> {
        let order = &self.program.indexes[pos].search_order;
        let mut key = vec![0; order.len()];
        for (i, &c) in order.iter().enumerate() {
            key[c] = permuted[i];
        }
        key
    }

    fn call(&self, f: FunctionId, args: &[Value]) -> Value {
        self.program.functions[f].call(args)
    }
    fn leq(&self, f: FunctionId, a: &Value, b: &Value) -> bool {
        match self.call(f, &[a.clone(), b.clone()]) {
            Value::Bool(b) => b,
            other => panic!("lattice order returned {other}"),
        }
    }

    /// Insert a fact, joining lattice values.
    fn insert(&mut self, pos: IndexPos, key: &[i64], lattice: Value) {
        let permuted = self.permute(pos, key);
        let value = match self.lattice_ops(pos).cloned() {
            Some(Denotation::Latticenal { leq, lub, .. }) => {
                match self.indexes[pos].get(&permuted) {
                    Some(old) => {
                        let joined = self.call(lub, &[old.clone(), lattice]);
                        if self.leq(leq, &joined, old) {
                            return;
                        }
                        joined
                    }
                    None => lattice,
                }
            }
            _ => Value::Unit,
        };
        self.indexes[pos].insert(permuted, value);
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Insert(op) => self.op(op),
            Stmt::MergeInto(src, dst) => {
                let facts: Vec<(Vec<i64>, Value)> = self.indexes[*src]
                    .iter()
                    .map(|(k, v)| (self.unpermute(*src, k), v.clone()))
                    .collect();
                for (key, lattice) in facts {
                    self.insert(*dst, &key, lattice);
                }
            }
            Stmt::Swap(a, b) => {
                assert_eq!(
                    self.program.indexes[*a].search_order,
                    self.program.indexes[*b].search_order
                );
                let taken = std::mem::take(&mut self.indexes[*a]);
                self.indexes[*a] = std::mem::replace(&mut self.indexes[*b], taken);
            }
            Stmt::Purge(pos) => self.indexes[*pos].clear(),
            Stmt::Seq(xs) | Stmt::Par(xs) => xs.iter().for_each(|x| self.stmt(x)),
            Stmt::Until(tests, body) => {
                while !tests.iter().all(|t| self.test(t)) {
                    self.stmt(body);
                }
            }
            Stmt::Comment(_) => {}
        }
    }

    fn op(&mut self, op: &RelOp) {
        match op {
            RelOp::Search { bind, index, body } => {
                let rows: Vec<(Vec<i64>, Value)> = self.indexes[*index]
                    .iter()
                    .map(|(k, v)| (self.unpermute(*index, k), v.clone()))
                    .collect();
                for (key, lattice) in rows {
                    self.bind(bind, key, lattice, body);
                }
            }
            RelOp::Query {
                bind,
                index,
                prefix,
                body,
            } => {
                let program = self.program;
                let order = &program.indexes[*index].search_order;
                let tuple = &self.tuples[bind.slot];
                let fixed: Vec<i64> = order[..*prefix].iter().map(|&c| tuple[c]).collect();
                let bound = |fill: i64| {
                    let mut key = fixed.clone();
                    key.resize(order.len(), fill);
                    key
                };
                let rows: Vec<(Vec<i64>, Value)> = self.indexes[*index]
                    .range(bound(i64::MIN)..=bound(i64::MAX))
                    .map(|(k, v)| (self.unpermute(*index, k), v.clone()))
                    .collect();
                for (key, lattice) in rows {
                    self.bind(bind, key, lattice, body);
                }
            }
            RelOp::Functional {
                bind,
                f,
                inputs,
                outputs,
                body,
            } => {
                let args: Vec<Value> = inputs.iter().map(|t| self.boxed(t)).collect();
                for row in self.program.functions[*f].rows(&args) {
                    assert_eq!(row.len(), outputs.len(), "functional returned a wrong row");
                    let key = row
                        .iter()
                        .zip(outputs)
                        .map(|(value, &pos)| self.boxing.unbox(pos, value))
                        .collect();
                    self.bind(bind, key, Value::Unit, body);
                }
            }
            RelOp::Project { terms, indexes } => {
                let program = self.program;
                let rel = &program.indexes[indexes[0]].rel;
                let key: Vec<i64> = terms[..rel.key_arity()]
                    .iter()
                    .map(|t| self.unboxed(t))
                    .collect();
                let lattice = match rel.lattice_column() {
                    Some(c) => self.boxed(&terms[c]),
                    None => Value::Unit,
                };
                for &pos in indexes {
                    self.insert(pos, &key, lattice.clone());
                }
            }
            RelOp::If { tests, body } => {
                if tests.iter().all(|t| self.test(t)) {
                    self.op(body);
                }
            }
        }
    }

    fn bind(&mut self, bind: &Binder, key: Vec<i64>, lattice: Value, body: &RelOp) {
        for w in &bind.writes {
            self.tuples[w.slot][w.target_column] = key[w.column];
        }
        let saved = bind.meet_with.map(|meet| {
            let saved = self.lattices[meet.slot].clone();
            self.lattices[meet.slot] = match meet.glb {
                Some(glb) => self.call(glb, &[saved.clone(), lattice.clone()]),
                None => lattice.clone(),
            };
            (meet.slot, saved)
        });
        self.tuples[bind.slot] = key;
        self.lattices[bind.slot] = lattice;
        self.op(body);
        if let Some((slot, saved)) = saved {
            self.lattices[slot] = saved;
        }
    }

    fn test(&mut self, test: &BoolExp) -> bool {
        match test {
            BoolExp::Not(e) => !self.test(e),
            BoolExp::IsEmpty(pos) => self.indexes[*pos].is_empty(),
            BoolExp::NotMemberOf(terms, pos) => {
                let program = self.program;
                let rel = &program.indexes[*pos].rel;
                let key: Vec<i64> = terms[..rel.key_arity()]
                    .iter()
                    .map(|t| self.unboxed(t))
                    .collect();
                let permuted = self.permute(*pos, &key);
                match (&rel.den, rel.lattice_column()) {
                    (Denotation::Latticenal { leq, .. }, Some(c)) => {
                        let value = self.boxed(&terms[c]);
                        match self.indexes[*pos].get(&permuted) {
                            Some(old) => !self.leq(*leq, &value, old),
                            None => true,
                        }
                    }
                    _ => !self.indexes[*pos].contains_key(&permuted),
                }
            }
            BoolExp::Leq(value, term, leq) => {
                let lattice = self.boxed(term);
                self.leq(*leq, &lattice, value)
            }
            BoolExp::Eq(a, b) => {
                if a.is_boxed_only() || b.is_boxed_only() {
                    self.boxed(a) == self.boxed(b)
                } else {
                    self.unboxed(a) == self.unboxed(b)
                }
            }
            BoolExp::Guard(f, args) => {
                let args: Vec<Value> = args.iter().map(|t| self.boxed(t)).collect();
                self.program.functions[*f].test(&args)
            }
        }
    }

    fn boxed(&mut self, term: &Term) -> Value {
        match term {
            Term::Lit { boxed, .. } => boxed.clone(),
            Term::LoadFromTuple { slot, column, pos } => {
                self.boxing.rebox(*pos, self.tuples[*slot][*column])
            }
            Term::LoadLatVar { slot } => self.lattices[*slot].clone(),
            Term::Meet { glb, term, slot } => {
                let value = self.boxed(term);
                self.call(*glb, &[value, self.lattices[*slot].clone()])
            }
            Term::App { f, args, .. } => {
                let args: Vec<Value> = args.iter().map(|t| self.boxed(t)).collect();
                self.call(*f, &args)
            }
        }
    }

    fn unboxed(&mut self, term: &Term) -> i64 {
        match term {
            Term::Lit { unboxed, .. } => *unboxed,
            Term::LoadFromTuple { slot, column, .. } => self.tuples[*slot][*column],
            Term::App { pos, .. } => {
                let value = self.boxed(term);
                self.boxing.unbox(*pos, &value)
            }
            Term::LoadLatVar { .. } | Term::Meet { .. } => {
                panic!("lattice value {term} used as a key")
            }
        }
    }

    fn solution(&self) -> Solution {
        let predicates = &self.program.predicates;
        let mut relations = BTreeMap::new();
        for (pos, meta) in self.program.indexes.iter_enumerate() {
            if meta.number != 0 || !predicates.is_full_id(meta.rel.id) {
                continue;
            }
            let facts: BTreeSet<Vec<Value>> = self.indexes[pos]
                .iter()
                .map(|(permuted, lattice)| {
                    let key = self.unpermute(pos, permuted);
                    let mut row: Vec<Value> = key
                        .iter()
                        .enumerate()
                        .map(|(c, &word)| {
                            self.boxing
                                .rebox(self.boxing.column_pos(meta.rel.id, c), word)
                        })
                        .collect();
                    if meta.rel.is_lattice() {
                        row.push(lattice.clone());
                    }
                    row
                })
                .collect();
            relations.insert(meta.rel.clone(), facts);
        }
        Solution { relations }
    }
}
