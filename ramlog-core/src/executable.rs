//! Executable RAM: every row lives in a numbered memory slot, every relation operation names a
//! physical index and every key value is an unboxed word.

use crate::{
    boxing::Boxing,
    ids::{BoxingPos, FunctionId, IndexPos, MemPos},
    predicates::Predicates,
    ram::{HostFunction, RelSym, Value},
    typed_vec::TVec,
};
use itertools::Itertools as _;
use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Term {
    Lit { unboxed: i64, boxed: Value },
    LoadFromTuple {
        slot: MemPos,
        column: usize,
        pos: BoxingPos,
    },
    LoadLatVar { slot: MemPos },
    /// Meet of a term with the lattice value in a slot, evaluated when read.
    Meet {
        glb: FunctionId,
        term: Box<Term>,
        slot: MemPos,
    },
    App {
        f: FunctionId,
        args: Vec<Term>,
        pos: BoxingPos,
    },
}
impl Term {
    /// Lattice values have no unboxed form.
    pub fn is_boxed_only(&self) -> bool {
        matches!(self, Term::LoadLatVar { .. } | Term::Meet { .. })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BoolExp {
    Not(Box<BoolExp>),
    IsEmpty(IndexPos),
    NotMemberOf(Vec<Term>, IndexPos),
    /// Lattice valued term is below or equal to the value.
    Leq(Value, Term, FunctionId),
    Eq(Term, Term),
    Guard(FunctionId, Vec<Term>),
}

/// Copy a column of the bound row into a key column of a later query's slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct WriteTuple {
    pub column: usize,
    pub slot: MemPos,
    pub target_column: usize,
}

/// While the row is bound, the accumulator in `slot` holds the row's lattice value met with
/// what it held before. Without `glb` the row starts the chain and the accumulator is overwritten.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MeetWith {
    pub slot: MemPos,
    pub glb: Option<FunctionId>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Binder {
    pub slot: MemPos,
    pub writes: Vec<WriteTuple>,
    pub meet_with: Option<MeetWith>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RelOp {
    Search {
        bind: Binder,
        index: IndexPos,
        body: Box<RelOp>,
    },
    /// Rows whose first `prefix` columns in the order of `index` equal the slot's tuple.
    Query {
        bind: Binder,
        index: IndexPos,
        prefix: usize,
        body: Box<RelOp>,
    },
    Functional {
        bind: Binder,
        f: FunctionId,
        inputs: Vec<Term>,
        outputs: Vec<BoxingPos>,
        body: Box<RelOp>,
    },
    /// Insert into every index of the relation.
    Project { terms: Vec<Term>, indexes: Vec<IndexPos> },
    If { tests: Vec<BoolExp>, body: Box<RelOp> },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Stmt {
    Insert(RelOp),
    MergeInto(IndexPos, IndexPos),
    Swap(IndexPos, IndexPos),
    Purge(IndexPos),
    Seq(Vec<Stmt>),
    Par(Vec<Stmt>),
    Until(Vec<BoolExp>, Box<Stmt>),
    Comment(String),
}
impl Stmt {
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Stmt)) {
        f(self);
        match self {
            Stmt::Seq(xs) | Stmt::Par(xs) => xs.iter().for_each(|x| x.visit(f)),
            Stmt::Until(_, body) => body.visit(f),
            Stmt::Insert(_)
            | Stmt::MergeInto(..)
            | Stmt::Swap(..)
            | Stmt::Purge(_)
            | Stmt::Comment(_) => {}
        }
    }
}

/// One physical index.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexMeta {
    pub rel: RelSym,
    /// Number of the index within its relation.
    pub number: usize,
    pub search_order: Vec<usize>,
}

/// Output of lowering.
#[derive(Clone, Debug)]
pub struct Program {
    pub stmt: Stmt,
    /// Unboxed key and boxed lattice value of every preloaded fact.
    pub facts: BTreeMap<RelSym, Vec<(Vec<i64>, Value)>>,
    pub predicates: Predicates,
    pub indexes: TVec<IndexPos, IndexMeta>,
    /// Number of tuple columns of each slot.
    pub arities: TVec<MemPos, usize>,
    /// Query key columns fixed to a literal, written once before execution.
    pub constant_writes: BTreeMap<(MemPos, usize), i64>,
    pub boxing: Boxing,
    pub functions: TVec<FunctionId, HostFunction>,
}

impl Display for Term {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Term::Lit { boxed, .. } => write!(f, "{boxed}"),
            Term::LoadFromTuple { slot, column, .. } => write!(f, "{slot}[{column}]"),
            Term::LoadLatVar { slot } => write!(f, "{slot}.lat"),
            Term::Meet { glb, term, slot } => write!(f, "{glb}({term}, {slot}.lat)"),
            Term::App { f: func, args, .. } => write!(f, "{func}({})", args.iter().join(", ")),
        }
    }
}
impl Display for BoolExp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BoolExp::Not(e) => write!(f, "!{e}"),
            BoolExp::IsEmpty(index) => write!(f, "empty({index})"),
            BoolExp::NotMemberOf(terms, index) => {
                write!(f, "({}) notin {index}", terms.iter().join(", "))
            }
            BoolExp::Leq(v, term, _) => write!(f, "{term} <= {v}"),
            BoolExp::Eq(a, b) => write!(f, "{a} == {b}"),
            BoolExp::Guard(func, terms) => write!(f, "{func}({})", terms.iter().join(", ")),
        }
    }
}
impl Display for Binder {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.slot)?;
        for w in &self.writes {
            write!(f, " [{}]->{}[{}]", w.column, w.slot, w.target_column)?;
        }
        match self.meet_with {
            Some(MeetWith {
                slot,
                glb: Some(glb),
            }) => write!(f, " meet {slot} by {glb}")?,
            Some(MeetWith { slot, glb: None }) => write!(f, " lat->{slot}")?,
            None => {}
        }
        Ok(())
    }
}

const INDENT: &str = "    ";

impl RelOp {
    fn fmt_indent(&self, f: &mut Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = INDENT.repeat(depth);
        let (head, body) = match self {
            RelOp::Search { bind, index, body } => (format!("search {bind} in {index}"), body),
            RelOp::Query {
                bind,
                index,
                prefix,
                body,
            } => (format!("query {bind} in {index} prefix {prefix}"), body),
            RelOp::Functional {
                bind,
                f: func,
                inputs,
                body,
                ..
            } => (
                format!("functional {bind} <- {func}({})", inputs.iter().join(", ")),
                body,
            ),
            RelOp::If { tests, body } => (format!("if {}", tests.iter().join(" && ")), body),
            RelOp::Project { terms, indexes } => {
                return writeln!(
                    f,
                    "{pad}project ({}) into {}",
                    terms.iter().join(", "),
                    indexes.iter().join(" ")
                );
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

impl Stmt {
    fn fmt_indent(&self, f: &mut Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = INDENT.repeat(depth);
        match self {
            Stmt::Insert(op) => op.fmt_indent(f, depth),
            Stmt::MergeInto(src, dst) => writeln!(f, "{pad}merge {src} into {dst}"),
            Stmt::Swap(a, b) => writeln!(f, "{pad}swap {a} {b}"),
            Stmt::Purge(index) => writeln!(f, "{pad}purge {index}"),
            Stmt::Seq(xs) => xs.iter().try_for_each(|x| x.fmt_indent(f, depth)),
            Stmt::Par(xs) => {
                writeln!(f, "{pad}par {{")?;
                xs.iter().try_for_each(|x| x.fmt_indent(f, depth + 1))?;
                writeln!(f, "{pad}}}")
            }
            Stmt::Until(tests, body) => {
                writeln!(f, "{pad}until {} {{", tests.iter().join(" && "))?;
                body.fmt_indent(f, depth + 1)?;
                writeln!(f, "{pad}}}")
            }
            Stmt::Comment(text) => writeln!(f, "{pad}// {text}"),
        }
    }
}
impl Display for Stmt {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.fmt_indent(f, 0)
    }
}

impl Program {
    /// Index placement and memory layout, for dumps.
    pub fn dbg_summary(&self) -> String {
        let indexes = self
            .indexes
            .iter_enumerate()
            .map(|(pos, meta)| {
                format!(
                    "{pos}: {} #{} {:?}",
                    meta.rel, meta.number, meta.search_order
                )
            })
            .join("\n");
        let slots = self
            .arities
            .iter_enumerate()
            .map(|(slot, arity)| format!("{slot}: {arity}"))
            .join(", ");
        format!("{indexes}\nslots {slots}\n{}", self.stmt)
    }
}
