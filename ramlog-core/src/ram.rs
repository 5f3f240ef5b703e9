//! Relational algebra machine (RAM) intermediate representation.
//!
//! Produced by the initial compilation of a stratified program, rewritten by hoisting and consumed
//! by lowering. Every node is plain data; host functions are referenced through [`FunctionId`].

use crate::{
    ids::{FunctionId, IndexPos, RamId, RelId, RowVar},
    predicates::Predicates,
    typed_vec::TVec,
};
use itertools::Itertools as _;
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{self, Display, Formatter},
    sync::Arc,
};

/// Boxed value, the uniform representation used by host functions.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Value {
    Unit,
    Bool(bool),
    Int64(i64),
    Str(String),
}
impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "()"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int64(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s:?}"),
        }
    }
}
impl From<i64> for Value {
    fn from(x: i64) -> Self {
        Value::Int64(x)
    }
}
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

/// Preloaded facts of each Full relation. Lattice values are the last column.
pub type Facts = BTreeMap<RelSym, Vec<Vec<Value>>>;

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Denotation {
    Relational,
    /// The last column holds a lattice value.
    Latticenal {
        bottom: Value,
        leq: FunctionId,
        lub: FunctionId,
        glb: FunctionId,
    },
}

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RelSym {
    pub name: &'static str,
    pub id: RelId,
    pub arity: usize,
    pub den: Denotation,
}
impl RelSym {
    pub fn new(name: &'static str, id: usize, arity: usize) -> Self {
        Self {
            name,
            id: RelId(id),
            arity,
            den: Denotation::Relational,
        }
    }
    pub fn new_lattice(name: &'static str, id: usize, arity: usize, den: Denotation) -> Self {
        assert!(arity >= 1, "lattice relation {name} needs a lattice column");
        Self {
            name,
            id: RelId(id),
            arity,
            den,
        }
    }
    /// Shape of the rows produced by a host function, never stored in an index.
    pub fn functional(arity: usize) -> Self {
        Self {
            name: "functional",
            id: RelId::functional(),
            arity,
            den: Denotation::Relational,
        }
    }
    pub fn is_lattice(&self) -> bool {
        matches!(self.den, Denotation::Latticenal { .. })
    }
    /// Number of columns stored in tuple memory and indexes.
    pub fn key_arity(&self) -> usize {
        if self.is_lattice() {
            self.arity - 1
        } else {
            self.arity
        }
    }
    pub fn lattice_column(&self) -> Option<usize> {
        self.is_lattice().then(|| self.arity - 1)
    }
}
impl Display for RelSym {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id.0)
    }
}

pub type TermFn = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;
pub type GuardFn = Arc<dyn Fn(&[Value]) -> bool + Send + Sync>;
pub type FunctionalFn = Arc<dyn Fn(&[Value]) -> Vec<Vec<Value>> + Send + Sync>;

#[derive(Clone)]
pub enum HostFnKind {
    Term(TermFn),
    Guard(GuardFn),
    Functional(FunctionalFn),
}

/// A function supplied by the host, called with boxed arguments.
#[derive(Clone)]
pub struct HostFunction {
    pub name: &'static str,
    pub arity: usize,
    pub kind: HostFnKind,
}
impl HostFunction {
    pub fn term(
        name: &'static str,
        arity: usize,
        f: impl Fn(&[Value]) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            arity,
            kind: HostFnKind::Term(Arc::new(f)),
        }
    }
    pub fn guard(
        name: &'static str,
        arity: usize,
        f: impl Fn(&[Value]) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            arity,
            kind: HostFnKind::Guard(Arc::new(f)),
        }
    }
    pub fn functional(
        name: &'static str,
        arity: usize,
        f: impl Fn(&[Value]) -> Vec<Vec<Value>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            arity,
            kind: HostFnKind::Functional(Arc::new(f)),
        }
    }
    pub fn call(&self, args: &[Value]) -> Value {
        match &self.kind {
            HostFnKind::Term(f) => f(args),
            _ => panic!("{} is not a term function", self.name),
        }
    }
    pub fn test(&self, args: &[Value]) -> bool {
        match &self.kind {
            HostFnKind::Guard(f) => f(args),
            _ => panic!("{} is not a guard", self.name),
        }
    }
    pub fn rows(&self, args: &[Value]) -> Vec<Vec<Value>> {
        match &self.kind {
            HostFnKind::Functional(f) => f(args),
            _ => panic!("{} is not a functional", self.name),
        }
    }
}
impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            HostFnKind::Term(_) => "term",
            HostFnKind::Guard(_) => "guard",
            HostFnKind::Functional(_) => "functional",
        };
        write!(f, "{}/{} ({kind})", self.name, self.arity)
    }
}

/// Host functions take between one and five arguments.
pub const MAX_HOST_ARITY: usize = 5;

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum RamTerm {
    Lit(Value, RamId),
    RowLoad(RowVar, usize, RelSym),
    /// Meet of a term with the lattice value of a row.
    Meet(FunctionId, Box<RamTerm>, (RowVar, RelSym), RamId),
    App(FunctionId, Vec<RamTerm>, RamId),
}
impl RamTerm {
    pub fn app(f: FunctionId, args: Vec<RamTerm>, id: RamId) -> Self {
        assert!(
            (1..=MAX_HOST_ARITY).contains(&args.len()),
            "host function {f} applied to {} arguments",
            args.len()
        );
        RamTerm::App(f, args, id)
    }
    pub fn row_vars(&self, out: &mut BTreeSet<RowVar>) {
        match self {
            RamTerm::Lit(..) => {}
            RamTerm::RowLoad(rv, _, _) => {
                out.insert(*rv);
            }
            RamTerm::Meet(_, t, (rv, _), _) => {
                t.row_vars(out);
                out.insert(*rv);
            }
            RamTerm::App(_, args, _) => args.iter().for_each(|t| t.row_vars(out)),
        }
    }
    /// Rebuild the term bottom-up, `f` sees every subterm after its children were rebuilt.
    pub fn map(&self, f: &mut impl FnMut(RamTerm) -> RamTerm) -> RamTerm {
        let rebuilt = match self {
            RamTerm::Lit(..) | RamTerm::RowLoad(..) => self.clone(),
            RamTerm::Meet(func, t, row, id) => {
                RamTerm::Meet(*func, Box::new(t.map(f)), row.clone(), *id)
            }
            RamTerm::App(func, args, id) => {
                RamTerm::App(*func, args.iter().map(|t| t.map(f)).collect(), *id)
            }
        };
        f(rebuilt)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum BoolExp {
    Not(Box<BoolExp>),
    IsEmpty(RelSym),
    NotMemberOf(Vec<RamTerm>, RelSym),
    /// Holds iff the lattice valued term is below or equal to the value.
    Leq(Value, RamTerm, RelSym),
    Eq(RamTerm, RamTerm),
    Guard(FunctionId, Vec<RamTerm>),
}
impl BoolExp {
    pub fn guard(f: FunctionId, args: Vec<RamTerm>) -> Self {
        assert!(
            (1..=MAX_HOST_ARITY).contains(&args.len()),
            "guard {f} applied to {} arguments",
            args.len()
        );
        BoolExp::Guard(f, args)
    }
    pub fn not(e: BoolExp) -> Self {
        BoolExp::Not(Box::new(e))
    }
    pub fn row_vars(&self) -> BTreeSet<RowVar> {
        let mut out = BTreeSet::new();
        self.collect_row_vars(&mut out);
        out
    }
    fn collect_row_vars(&self, out: &mut BTreeSet<RowVar>) {
        match self {
            BoolExp::Not(e) => e.collect_row_vars(out),
            BoolExp::IsEmpty(_) => {}
            BoolExp::NotMemberOf(terms, _) | BoolExp::Guard(_, terms) => {
                terms.iter().for_each(|t| t.row_vars(out));
            }
            BoolExp::Leq(_, t, _) => t.row_vars(out),
            BoolExp::Eq(a, b) => {
                a.row_vars(out);
                b.row_vars(out);
            }
        }
    }
    pub fn map_terms(&self, f: &mut impl FnMut(RamTerm) -> RamTerm) -> BoolExp {
        match self {
            BoolExp::Not(e) => BoolExp::Not(Box::new(e.map_terms(f))),
            BoolExp::IsEmpty(_) => self.clone(),
            BoolExp::Leq(v, t, rel) => BoolExp::Leq(v.clone(), t.map(f), rel.clone()),
            BoolExp::NotMemberOf(terms, rel) => {
                BoolExp::NotMemberOf(terms.iter().map(|t| t.map(f)).collect(), rel.clone())
            }
            BoolExp::Eq(a, b) => BoolExp::Eq(a.map(f), b.map(f)),
            BoolExp::Guard(func, terms) => {
                BoolExp::Guard(*func, terms.iter().map(|t| t.map(f)).collect())
            }
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum RelOp {
    /// Unindexed iteration.
    Search(RowVar, RelSym, Box<RelOp>),
    /// Index driven iteration, the tests are equalities on columns of the bound row.
    Query(RowVar, RelSym, Vec<BoolExp>, Box<RelOp>),
    /// Iterate the rows returned by a host function of the given output arity.
    Functional(RowVar, FunctionId, Vec<RamTerm>, Box<RelOp>, usize),
    Project(Vec<RamTerm>, RelSym),
    If(Vec<BoolExp>, Box<RelOp>),
}
impl RelOp {
    pub fn search(rv: RowVar, rel: RelSym, body: RelOp) -> Self {
        RelOp::Search(rv, rel, Box::new(body))
    }
    pub fn query(rv: RowVar, rel: RelSym, tests: Vec<BoolExp>, body: RelOp) -> Self {
        RelOp::Query(rv, rel, tests, Box::new(body))
    }
    pub fn functional(
        rv: RowVar,
        f: FunctionId,
        inputs: Vec<RamTerm>,
        body: RelOp,
        arity: usize,
    ) -> Self {
        RelOp::Functional(rv, f, inputs, Box::new(body), arity)
    }
    pub fn if_(tests: Vec<BoolExp>, body: RelOp) -> Self {
        RelOp::If(tests, Box::new(body))
    }
    /// Pre-order traversal.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a RelOp)) {
        f(self);
        match self {
            RelOp::Search(_, _, body)
            | RelOp::Query(_, _, _, body)
            | RelOp::Functional(_, _, _, body, _)
            | RelOp::If(_, body) => body.visit(f),
            RelOp::Project(..) => {}
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum RamStmt {
    Insert(RelOp),
    MergeInto(RelSym, RelSym),
    Swap(RelSym, RelSym),
    Purge(RelSym),
    Seq(Vec<RamStmt>),
    /// Branches touch disjoint state and may run concurrently.
    Par(Vec<RamStmt>),
    /// Run the body until all tests hold.
    Until(Vec<BoolExp>, Box<RamStmt>),
    Comment(String),
}
impl RamStmt {
    /// Pre-order traversal of every statement.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a RamStmt)) {
        f(self);
        match self {
            RamStmt::Seq(xs) | RamStmt::Par(xs) => xs.iter().for_each(|x| x.visit(f)),
            RamStmt::Until(_, body) => body.visit(f),
            RamStmt::Insert(_)
            | RamStmt::MergeInto(..)
            | RamStmt::Swap(..)
            | RamStmt::Purge(_)
            | RamStmt::Comment(_) => {}
        }
    }
    /// Pre-order traversal of every operator below an `Insert`.
    pub fn visit_ops<'a>(&'a self, f: &mut impl FnMut(&'a RelOp)) {
        self.visit(&mut |stmt| {
            if let RamStmt::Insert(op) = stmt {
                op.visit(f);
            }
        });
    }
    /// Every boolean expression, including the tests of `Until` and `Query`.
    pub fn bool_exps(&self) -> Vec<&BoolExp> {
        let mut out = Vec::new();
        self.visit(&mut |stmt| {
            if let RamStmt::Until(tests, _) = stmt {
                out.extend(tests);
            }
        });
        self.visit_ops(&mut |op| match op {
            RelOp::Query(_, _, tests, _) | RelOp::If(tests, _) => out.extend(tests),
            RelOp::Search(..) | RelOp::Functional(..) | RelOp::Project(..) => {}
        });
        out
    }
}

/// Placement of a relation's indexes.
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct IndexInfo {
    /// Column permutation of each index, the first index is the default one.
    pub search_orders: Vec<Vec<usize>>,
    /// Physical slot of each index.
    pub positions: Vec<IndexPos>,
}

/// Index placement table, keyed by relation id of every generation.
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct Indexes {
    pub relations: BTreeMap<RelId, IndexInfo>,
    pub count: usize,
}
impl Indexes {
    pub fn info(&self, rel: &RelSym) -> &IndexInfo {
        self.relations
            .get(&rel.id)
            .unwrap_or_else(|| panic!("no index placement for {rel}"))
    }
    /// Physical slot of index number `i` of `rel`.
    pub fn position(&self, rel: &RelSym, i: usize) -> IndexPos {
        self.info(rel).positions[i]
    }
}

/// Input bundle of hoisting and lowering.
#[derive(Clone, Debug)]
pub struct RamProgram {
    pub stmt: RamStmt,
    pub facts: Facts,
    pub predicates: Predicates,
    /// Filled in by index selection, empty before.
    pub indexes: Indexes,
    pub functions: TVec<FunctionId, HostFunction>,
}
impl Display for RamTerm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RamTerm::Lit(v, _) => write!(f, "{v}"),
            RamTerm::RowLoad(rv, i, _) => write!(f, "{rv}[{i}]"),
            RamTerm::Meet(func, t, (rv, _), _) => write!(f, "{func}({t}, {rv}.lat)"),
            RamTerm::App(func, args, _) => write!(f, "{func}({})", args.iter().join(", ")),
        }
    }
}
impl Display for BoolExp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BoolExp::Not(e) => write!(f, "!{e}"),
            BoolExp::IsEmpty(rel) => write!(f, "empty({rel})"),
            BoolExp::NotMemberOf(terms, rel) => {
                write!(f, "({}) notin {rel}", terms.iter().join(", "))
            }
            BoolExp::Leq(v, t, _) => write!(f, "{t} <= {v}"),
            BoolExp::Eq(a, b) => write!(f, "{a} == {b}"),
            BoolExp::Guard(func, terms) => write!(f, "{func}({})", terms.iter().join(", ")),
        }
    }
}

const INDENT: &str = "    ";

impl RelOp {
    fn fmt_indent(&self, f: &mut Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = INDENT.repeat(depth);
        let (head, body) = match self {
            RelOp::Search(rv, rel, body) => (format!("search {rv} in {rel}"), body),
            RelOp::Query(rv, rel, tests, body) => (
                format!("query {rv} in {rel} where {}", tests.iter().join(" && ")),
                body,
            ),
            RelOp::Functional(rv, func, inputs, body, _) => (
                format!("functional {rv} <- {func}({})", inputs.iter().join(", ")),
                body,
            ),
            RelOp::If(tests, body) => (format!("if {}", tests.iter().join(" && ")), body),
            RelOp::Project(terms, rel) => {
                return writeln!(f, "{pad}project ({}) into {rel}", terms.iter().join(", "));
            }
        };
        writeln!(f, "{pad}{head} {{")?;
        body.fmt_indent(f, depth + 1)?;
        writeln!(f, "{pad}}}")
    }
}
impl Display for RelOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.fmt_indent(f, 0)
    }
}

impl RamStmt {
    fn fmt_indent(&self, f: &mut Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = INDENT.repeat(depth);
        match self {
            RamStmt::Insert(op) => op.fmt_indent(f, depth),
            RamStmt::MergeInto(src, dst) => writeln!(f, "{pad}merge {src} into {dst}"),
            RamStmt::Swap(a, b) => writeln!(f, "{pad}swap {a} {b}"),
            RamStmt::Purge(rel) => writeln!(f, "{pad}purge {rel}"),
            RamStmt::Seq(xs) => xs.iter().try_for_each(|x| x.fmt_indent(f, depth)),
            RamStmt::Par(xs) => {
                writeln!(f, "{pad}par {{")?;
                xs.iter().try_for_each(|x| x.fmt_indent(f, depth + 1))?;
                writeln!(f, "{pad}}}")
            }
            RamStmt::Until(tests, body) => {
                writeln!(f, "{pad}until {} {{", tests.iter().join(" && "))?;
                body.fmt_indent(f, depth + 1)?;
                writeln!(f, "{pad}}}")
            }
            RamStmt::Comment(text) => writeln!(f, "{pad}// {text}"),
        }
    }
}
impl Display for RamStmt {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.fmt_indent(f, 0)
    }
}
