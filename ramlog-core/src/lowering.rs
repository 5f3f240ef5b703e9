//! Lower hoisted RAM to executable RAM.
//!
//! Rows get memory slots in the order their loops are first seen. Relation statements fan out
//! over the physical indexes of their relation. The key of a `Query` is never evaluated at
//! runtime: literal key columns are written into the slot once, before execution, and key
//! columns equal to a column of an enclosing row are copied when that row is bound. Each chain
//! of lattice meets accumulates in a slot of its own, after the row slots.

use crate::{
    boxing::Boxing,
    executable::{self, Binder, IndexMeta, MeetWith, Program, Stmt, Term, WriteTuple},
    ids::{FunctionId, IndexPos, MemPos, RowVar},
    ram::{BoolExp, Denotation, RamProgram, RamStmt, RamTerm, RelOp, RelSym, Value},
    typed_vec::TVec,
    union_find::UnionFind,
};
use std::collections::{BTreeMap, BTreeSet};

pub fn lower(program: RamProgram) -> Program {
    let start = std::time::Instant::now();

    let mut slots = BTreeMap::new();
    let mut arities: TVec<MemPos, usize> = TVec::new();
    program.stmt.visit_ops(&mut |op| {
        let (rv, arity) = match op {
            RelOp::Search(rv, rel, _) | RelOp::Query(rv, rel, _, _) => (*rv, rel.key_arity()),
            RelOp::Functional(rv, _, _, _, arity) => (*rv, *arity),
            RelOp::Project(..) | RelOp::If(..) => return,
        };
        slots.entry(rv).or_insert_with(|| arities.push(arity));
    });

    let mut lowering = Lowering {
        program: &program,
        boxing: Boxing::initialize(&program),
        slots,
        constant_writes: BTreeMap::new(),
        pending_writes: BTreeMap::new(),
        meets: MeetWithMap::default(),
        pending_meets: BTreeMap::new(),
        bound: Vec::new(),
        arities,
    };
    let stmt = lowering.stmt(&program.stmt);

    let mut facts = BTreeMap::new();
    for (rel, rows) in &program.facts {
        let lowered: Vec<(Vec<i64>, Value)> = rows
            .iter()
            .map(|row| {
                assert_eq!(row.len(), rel.arity, "fact of {rel} with wrong arity");
                let key = (0..rel.key_arity())
                    .map(|c| {
                        let pos = lowering.boxing.column_pos(rel.id, c);
                        lowering.boxing.unbox(pos, &row[c])
                    })
                    .collect();
                let lattice = rel
                    .lattice_column()
                    .map_or(Value::Unit, |c| row[c].clone());
                (key, lattice)
            })
            .collect();
        facts.insert(rel.clone(), lowered);
    }

    let predicates = &program.predicates;
    let mut metas: Vec<Option<IndexMeta>> = vec![None; program.indexes.count];
    for (&id, info) in &program.indexes.relations {
        let rel = predicates.rel_sym_from_pred_type(
            predicates.id_to_full_pred_id(id),
            predicates.id_to_pred_type(id),
        );
        for (number, (order, pos)) in info.search_orders.iter().zip(&info.positions).enumerate() {
            metas[pos.0] = Some(IndexMeta {
                rel: rel.clone(),
                number,
                search_order: order.clone(),
            });
        }
    }
    let indexes: TVec<IndexPos, IndexMeta> = metas
        .into_iter()
        .map(|meta| meta.expect("index positions are dense"))
        .collect();

    let Lowering {
        boxing,
        constant_writes,
        arities,
        ..
    } = lowering;
    tracing::info!(
        "lowering took {:?}, {} slots, {} constant writes",
        start.elapsed(),
        arities.len(),
        constant_writes.len()
    );
    Program {
        stmt,
        facts,
        predicates: program.predicates.clone(),
        indexes,
        arities,
        constant_writes,
        boxing,
        functions: program.functions.clone(),
    }
}

/// Classes of rows whose lattice values are met with each other, and the earliest bound row of
/// each class.
#[derive(Default)]
struct MeetWithMap {
    uf: UnionFind<RowVar>,
    order: BTreeMap<RowVar, usize>,
    earliest: BTreeMap<RowVar, RowVar>,
    /// Slot holding the running meet of a class, keyed by its earliest row.
    accumulators: BTreeMap<RowVar, MemPos>,
}
impl MeetWithMap {
    fn seed(&mut self, rv: RowVar) {
        let n = self.order.len();
        self.order.entry(rv).or_insert(n);
        self.uf.make_set(rv);
        self.earliest.entry(rv).or_insert(rv);
    }
    fn earliest(&self, rv: RowVar) -> RowVar {
        let root = self
            .uf
            .find(&rv)
            .unwrap_or_else(|| panic!("{rv} is met before it is bound"));
        self.earliest[root]
    }
    fn union(&mut self, a: RowVar, b: RowVar) {
        let (ea, eb) = (self.earliest(a), self.earliest(b));
        self.uf.union(a, b);
        let root = *self.uf.find(&a).expect("inserted by union");
        let first = if self.order[&ea] <= self.order[&eb] {
            ea
        } else {
            eb
        };
        self.earliest.insert(root, first);
    }
}

struct Lowering<'a> {
    program: &'a RamProgram,
    boxing: Boxing,
    slots: BTreeMap<RowVar, MemPos>,
    constant_writes: BTreeMap<(MemPos, usize), i64>,
    /// Writes to perform when the row is bound, collected while lowering its body.
    pending_writes: BTreeMap<RowVar, Vec<WriteTuple>>,
    meets: MeetWithMap,
    pending_meets: BTreeMap<RowVar, MeetWith>,
    bound: Vec<RowVar>,
    /// Row slots first, then one accumulator slot per meet class.
    arities: TVec<MemPos, usize>,
}

impl Lowering<'_> {
    fn slot(&self, rv: RowVar) -> MemPos {
        *self
            .slots
            .get(&rv)
            .unwrap_or_else(|| panic!("{rv} is never bound"))
    }
    fn positions(&self, rel: &RelSym) -> &[IndexPos] {
        &self.program.indexes.info(rel).positions
    }

    fn stmt(&mut self, stmt: &RamStmt) -> Stmt {
        match stmt {
            RamStmt::Insert(op) => {
                let op = self.op(op);
                assert!(self.pending_writes.is_empty(), "write to a row never bound");
                assert!(self.pending_meets.is_empty(), "meet with a row never bound");
                Stmt::Insert(op)
            }
            RamStmt::MergeInto(src, dst) => {
                let from = self.positions(src)[0];
                fan_out(Stmt::Par, self.positions(dst), |to| Stmt::MergeInto(from, to))
            }
            RamStmt::Purge(rel) => fan_out(Stmt::Seq, self.positions(rel), Stmt::Purge),
            RamStmt::Swap(new, delta) => {
                let indexes = &self.program.indexes;
                assert_eq!(
                    indexes.info(new).search_orders[0],
                    indexes.info(delta).search_orders[0],
                    "swap of {new} and {delta} with different default orders"
                );
                let from = self.positions(new)[0];
                let delta = self.positions(delta);
                if delta.len() == 1 {
                    Stmt::Swap(from, delta[0])
                } else {
                    let rest = &delta[1..];
                    Stmt::Seq(vec![
                        Stmt::Seq(rest.iter().map(|&to| Stmt::Purge(to)).collect()),
                        Stmt::Par(rest.iter().map(|&to| Stmt::MergeInto(from, to)).collect()),
                        Stmt::Swap(from, delta[0]),
                    ])
                }
            }
            RamStmt::Seq(xs) => Stmt::Seq(xs.iter().map(|x| self.stmt(x)).collect()),
            RamStmt::Par(xs) => Stmt::Par(xs.iter().map(|x| self.stmt(x)).collect()),
            RamStmt::Until(tests, body) => {
                let tests = tests.iter().map(|t| self.bool(t)).collect();
                Stmt::Until(tests, Box::new(self.stmt(body)))
            }
            RamStmt::Comment(text) => Stmt::Comment(text.clone()),
        }
    }

    fn binder(&mut self, rv: RowVar, body: &RelOp) -> (Binder, Box<executable::RelOp>) {
        self.meets.seed(rv);
        self.bound.push(rv);
        let body = self.op(body);
        self.bound.pop();
        let bind = Binder {
            slot: self.slot(rv),
            writes: self.pending_writes.remove(&rv).unwrap_or_default(),
            meet_with: self.pending_meets.remove(&rv),
        };
        (bind, Box::new(body))
    }

    fn op(&mut self, op: &RelOp) -> executable::RelOp {
        match op {
            RelOp::Search(rv, rel, body) => {
                let index = self.positions(rel)[0];
                let (bind, body) = self.binder(*rv, body);
                executable::RelOp::Search { bind, index, body }
            }
            RelOp::Query(rv, rel, tests, body) => {
                let slot = self.slot(*rv);
                let mut columns = BTreeSet::new();
                for test in tests {
                    let (column, operand) = key_operand(*rv, test);
                    columns.insert(column);
                    match operand {
                        RamTerm::Lit(value, id) => {
                            let pos = self.boxing.node_pos(*id);
                            let word = self.boxing.unbox(pos, value);
                            if let Some(old) = self.constant_writes.insert((slot, column), word) {
                                assert_eq!(old, word, "conflicting constants for {slot}[{column}]");
                            }
                        }
                        RamTerm::RowLoad(src, src_column, _)
                            if src != rv && self.bound.contains(src) =>
                        {
                            self.pending_writes.entry(*src).or_default().push(WriteTuple {
                                column: *src_column,
                                slot,
                                target_column: column,
                            });
                        }
                        _ => panic!(
                            "query key {test} of {rv} is neither a literal nor a column of an enclosing row"
                        ),
                    }
                }

                let info = self.program.indexes.info(rel);
                let prefix = columns.len();
                let number = info
                    .search_orders
                    .iter()
                    .position(|order| {
                        order.len() >= prefix
                            && order[..prefix].iter().copied().collect::<BTreeSet<_>>() == columns
                    })
                    .unwrap_or_else(|| panic!("no index of {rel} starts with {columns:?}"));
                let index = info.positions[number];
                let (bind, body) = self.binder(*rv, body);
                executable::RelOp::Query {
                    bind,
                    index,
                    prefix,
                    body,
                }
            }
            RelOp::Functional(rv, f, inputs, body, arity) => {
                let inputs = inputs.iter().map(|t| self.term(t)).collect();
                let outputs = (0..*arity).map(|c| self.boxing.row_pos(*rv, c)).collect();
                let (bind, body) = self.binder(*rv, body);
                executable::RelOp::Functional {
                    bind,
                    f: *f,
                    inputs,
                    outputs,
                    body,
                }
            }
            RelOp::Project(terms, rel) => executable::RelOp::Project {
                terms: terms.iter().map(|t| self.term(t)).collect(),
                indexes: self.positions(rel).to_vec(),
            },
            RelOp::If(tests, body) => executable::RelOp::If {
                tests: tests.iter().map(|t| self.bool(t)).collect(),
                body: Box::new(self.op(body)),
            },
        }
    }

    fn term(&mut self, term: &RamTerm) -> Term {
        match term {
            RamTerm::Lit(value, id) => {
                let pos = self.boxing.node_pos(*id);
                Term::Lit {
                    unboxed: self.boxing.unbox(pos, value),
                    boxed: value.clone(),
                }
            }
            RamTerm::RowLoad(rv, column, rel) => {
                let slot = self.slot(*rv);
                if rel.lattice_column() == Some(*column) {
                    Term::LoadLatVar { slot }
                } else {
                    Term::LoadFromTuple {
                        slot,
                        column: *column,
                        pos: self.boxing.row_pos(*rv, *column),
                    }
                }
            }
            RamTerm::App(f, args, id) => Term::App {
                f: *f,
                args: args.iter().map(|t| self.term(t)).collect(),
                pos: self.boxing.node_pos(*id),
            },
            RamTerm::Meet(glb, inner, (rv, _), _) => match meet_chain(*glb, inner) {
                Some(mut members) => {
                    members.push(*rv);
                    for &member in &members[1..] {
                        self.meets.union(members[0], member);
                    }
                    let earliest = self.meets.earliest(*rv);
                    let slot = *self
                        .meets
                        .accumulators
                        .entry(earliest)
                        .or_insert_with(|| self.arities.push(0));
                    let starts = std::iter::once((earliest, None));
                    let continues = members
                        .into_iter()
                        .filter(|&m| m != earliest)
                        .map(|m| (m, Some(*glb)));
                    for (member, glb) in starts.chain(continues) {
                        let meet = MeetWith { slot, glb };
                        if let Some(old) = self.pending_meets.insert(member, meet) {
                            assert_eq!(old, meet, "{member} is met into two lattice variables");
                        }
                    }
                    Term::LoadLatVar { slot }
                }
                None => Term::Meet {
                    glb: *glb,
                    term: Box::new(self.term(inner)),
                    slot: self.slot(*rv),
                },
            },
        }
    }

    fn bool(&mut self, test: &BoolExp) -> executable::BoolExp {
        match test {
            BoolExp::Not(e) => executable::BoolExp::Not(Box::new(self.bool(e))),
            BoolExp::IsEmpty(rel) => executable::BoolExp::IsEmpty(self.positions(rel)[0]),
            BoolExp::NotMemberOf(terms, rel) => executable::BoolExp::NotMemberOf(
                terms.iter().map(|t| self.term(t)).collect(),
                self.positions(rel)[0],
            ),
            BoolExp::Leq(value, term, rel) => {
                let Denotation::Latticenal { leq, .. } = rel.den else {
                    panic!("{test} on relational {rel}")
                };
                executable::BoolExp::Leq(value.clone(), self.term(term), leq)
            }
            BoolExp::Eq(a, b) => executable::BoolExp::Eq(self.term(a), self.term(b)),
            BoolExp::Guard(f, args) => {
                executable::BoolExp::Guard(*f, args.iter().map(|t| self.term(t)).collect())
            }
        }
    }
}

/// Single statement for one index, otherwise one per index.
fn fan_out(
    group: impl FnOnce(Vec<Stmt>) -> Stmt,
    positions: &[IndexPos],
    each: impl Fn(IndexPos) -> Stmt,
) -> Stmt {
    match positions {
        [single] => each(*single),
        _ => group(positions.iter().map(|&pos| each(pos)).collect()),
    }
}

fn key_operand(rv: RowVar, test: &BoolExp) -> (usize, &RamTerm) {
    match test {
        BoolExp::Eq(RamTerm::RowLoad(lhs, column, _), operand) if *lhs == rv => (*column, operand),
        BoolExp::Eq(operand, RamTerm::RowLoad(rhs, column, _)) if *rhs == rv => (*column, operand),
        _ => panic!("query of {rv} has a non-key test {test}"),
    }
}

/// Rows of a chain of meets over lattice columns, innermost first.
fn meet_chain(glb: FunctionId, term: &RamTerm) -> Option<Vec<RowVar>> {
    match term {
        RamTerm::RowLoad(rv, column, rel) if rel.lattice_column() == Some(*column) => {
            Some(vec![*rv])
        }
        RamTerm::Meet(inner_glb, inner, (rv, _), _) if *inner_glb == glb => {
            let mut members = meet_chain(glb, inner)?;
            members.push(*rv);
            Some(members)
        }
        _ => None,
    }
}
