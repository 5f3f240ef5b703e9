//! Conversion between boxed [`Value`]s and the `i64` words stored in tuples and indexes.
//!
//! Every place that holds a key value (a column of a relation, a column of a bound row, the
//! result of a literal or application) is a site. Sites that exchange values share a boxing
//! position and therefore one representation. The type of a position is fixed by the first value
//! unboxed at it, non-integer values are interned per position.

use crate::{
    ids::{BoxingPos, ObjectId, RamId, RelId, RowVar},
    ram::{BoolExp, RamProgram, RamTerm, RelOp, RelSym, Value},
    typed_set::TSet,
    typed_vec::TVec,
    union_find::UnionFind,
};
use std::collections::BTreeMap;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BoxingType {
    Unit,
    Bool,
    Int64,
    Object,
}
impl BoxingType {
    fn of(value: &Value) -> Self {
        match value {
            Value::Unit => BoxingType::Unit,
            Value::Bool(_) => BoxingType::Bool,
            Value::Int64(_) => BoxingType::Int64,
            Value::Str(_) => BoxingType::Object,
        }
    }
}

#[derive(Clone, Debug, Default)]
struct BoxingTable {
    ty: Option<BoxingType>,
    objects: TSet<ObjectId, Value>,
}

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
enum Site {
    /// Key column of a Full relation.
    Column(RelId, usize),
    Row(RowVar, usize),
    Node(RamId),
}

#[derive(Clone, Debug, Default)]
pub struct Boxing {
    sites: BTreeMap<Site, BoxingPos>,
    tables: TVec<BoxingPos, BoxingTable>,
}

impl Boxing {
    /// Group the sites of every relation, row and value node of `program`.
    pub fn initialize(program: &RamProgram) -> Self {
        let predicates = &program.predicates;
        let column =
            |rel: &RelSym, c: usize| Site::Column(predicates.id_to_full_pred_id(rel.id), c);

        let mut uf: UnionFind<Site> = UnionFind::new();
        for rel in predicates.relations() {
            uf.make_sets((0..rel.key_arity()).map(|c| Site::Column(rel.id, c)));
        }
        program.stmt.visit_ops(&mut |op| match op {
            RelOp::Search(rv, rel, _) | RelOp::Query(rv, rel, _, _) => {
                for c in 0..rel.key_arity() {
                    uf.union(Site::Row(*rv, c), column(rel, c));
                }
            }
            RelOp::Functional(rv, _, inputs, _, arity) => {
                uf.make_sets((0..*arity).map(|c| Site::Row(*rv, c)));
                inputs.iter().for_each(|t| visit_term(&mut uf, t));
            }
            RelOp::Project(terms, rel) => {
                for (c, term) in terms.iter().enumerate() {
                    visit_term(&mut uf, term);
                    if let Some(site) = (c < rel.key_arity()).then(|| site_of(term)).flatten() {
                        uf.union(site, column(rel, c));
                    }
                }
            }
            RelOp::If(..) => {}
        });
        for test in program.stmt.bool_exps() {
            visit_bool(&mut uf, test, &column);
        }

        let mut reps: TSet<BoxingPos, Site> = TSet::new();
        let sites: BTreeMap<Site, BoxingPos> = uf
            .keys()
            .map(|site| {
                let rep = uf.find(site).expect("key of the union find").clone();
                (site.clone(), reps.insert(rep))
            })
            .collect();
        tracing::debug!("{} sites in {} boxing positions", sites.len(), reps.len());
        Self {
            sites,
            tables: TVec::new_with_size(reps.len(), BoxingTable::default()),
        }
    }

    fn pos(&self, site: Site) -> BoxingPos {
        *self
            .sites
            .get(&site)
            .unwrap_or_else(|| panic!("{site:?} has no boxing position"))
    }
    pub fn row_pos(&self, rv: RowVar, column: usize) -> BoxingPos {
        self.pos(Site::Row(rv, column))
    }
    pub fn node_pos(&self, id: RamId) -> BoxingPos {
        self.pos(Site::Node(id))
    }
    /// Position of a key column of a Full relation.
    pub fn column_pos(&self, rel: RelId, column: usize) -> BoxingPos {
        self.pos(Site::Column(rel, column))
    }

    pub fn ty(&self, pos: BoxingPos) -> Option<BoxingType> {
        self.tables[pos].ty
    }

    pub fn unbox(&mut self, pos: BoxingPos, value: &Value) -> i64 {
        let table = &mut self.tables[pos];
        let ty = *table.ty.get_or_insert(BoxingType::of(value));
        match (ty, value) {
            (BoxingType::Unit, Value::Unit) => 0,
            (BoxingType::Bool, Value::Bool(b)) => i64::from(*b),
            (BoxingType::Int64, Value::Int64(x)) => *x,
            (BoxingType::Object, Value::Str(_)) => table.objects.insert(value.clone()).0 as i64,
            _ => panic!("cannot unbox {value} at {pos}, which holds {ty:?}"),
        }
    }

    pub fn rebox(&self, pos: BoxingPos, word: i64) -> Value {
        let table = &self.tables[pos];
        match table.ty {
            Some(BoxingType::Unit) => Value::Unit,
            Some(BoxingType::Bool) => Value::Bool(word != 0),
            Some(BoxingType::Int64) => Value::Int64(word),
            Some(BoxingType::Object) => table
                .objects
                .as_tvec()
                .get(ObjectId(word as usize))
                .unwrap_or_else(|| panic!("{word} was never interned at {pos}"))
                .clone(),
            None => panic!("nothing was ever unboxed at {pos}"),
        }
    }
}

fn site_of(term: &RamTerm) -> Option<Site> {
    match term {
        RamTerm::Lit(_, id) | RamTerm::App(_, _, id) => Some(Site::Node(*id)),
        RamTerm::RowLoad(rv, c, rel) => {
            (Some(*c) != rel.lattice_column()).then_some(Site::Row(*rv, *c))
        }
        RamTerm::Meet(..) => None,
    }
}

fn visit_term(uf: &mut UnionFind<Site>, term: &RamTerm) {
    match term {
        RamTerm::Lit(_, id) => uf.make_set(Site::Node(*id)),
        RamTerm::RowLoad(..) => {}
        RamTerm::App(_, args, id) => {
            uf.make_set(Site::Node(*id));
            args.iter().for_each(|t| visit_term(uf, t));
        }
        RamTerm::Meet(_, t, _, _) => visit_term(uf, t),
    }
}

fn visit_bool(uf: &mut UnionFind<Site>, test: &BoolExp, column: &impl Fn(&RelSym, usize) -> Site) {
    match test {
        BoolExp::Not(e) => visit_bool(uf, e, column),
        BoolExp::IsEmpty(_) => {}
        BoolExp::Leq(_, t, _) => visit_term(uf, t),
        BoolExp::NotMemberOf(terms, rel) => {
            for (c, term) in terms.iter().enumerate() {
                visit_term(uf, term);
                if let Some(site) = (c < rel.key_arity()).then(|| site_of(term)).flatten() {
                    uf.union(site, column(rel, c));
                }
            }
        }
        BoolExp::Eq(a, b) => {
            visit_term(uf, a);
            visit_term(uf, b);
            if let (Some(a), Some(b)) = (site_of(a), site_of(b)) {
                uf.union(a, b);
            }
        }
        BoolExp::Guard(_, args) => args.iter().for_each(|t| visit_term(uf, t)),
    }
}

#[cfg(test)]
mod test {
    use super::{Boxing, BoxingType};
    use crate::{
        datalog::{self, Atom, BodyItem, Datalog, Rule, Term},
        ids::{RelId, RowVar},
        predicates::Predicates,
        ram::{Facts, RelSym, Value},
    };

    #[test]
    fn joined_columns_share_position() {
        let a = RelSym::new("A", 0, 2);
        let b = RelSym::new("B", 1, 1);
        let r = RelSym::new("R", 2, 1);
        let v = Term::var;
        let program = Datalog {
            strata: vec![vec![Rule::new(
                Atom::new(r, vec![v("y")]),
                vec![
                    BodyItem::Atom(Atom::new(a, vec![v("x"), v("y")])),
                    BodyItem::Atom(Atom::new(b, vec![v("x")])),
                ],
            )]],
            ..Datalog::default()
        };
        let predicates = Predicates::initialize(&program, &Facts::new());
        let ram = datalog::compile(&program, Facts::new(), predicates);
        let boxing = Boxing::initialize(&ram);

        assert_eq!(boxing.column_pos(RelId(0), 0), boxing.column_pos(RelId(1), 0));
        assert_eq!(boxing.column_pos(RelId(0), 1), boxing.column_pos(RelId(2), 0));
        assert_ne!(boxing.column_pos(RelId(0), 0), boxing.column_pos(RelId(0), 1));
        assert_eq!(boxing.row_pos(RowVar(1), 0), boxing.row_pos(RowVar(0), 0));
    }

    #[test]
    fn strings_are_interned_per_position() {
        let a = RelSym::new("A", 0, 2);
        let mut facts = Facts::new();
        facts.insert(a.clone(), vec![]);
        let ram = datalog::compile(
            &Datalog::default(),
            Facts::new(),
            Predicates::initialize(&Datalog::default(), &facts),
        );
        let mut boxing = Boxing::initialize(&ram);
        let (first, second) = (boxing.column_pos(RelId(0), 0), boxing.column_pos(RelId(0), 1));

        assert_eq!(boxing.unbox(first, &Value::from("b")), 0);
        assert_eq!(boxing.unbox(first, &Value::from("a")), 1);
        assert_eq!(boxing.unbox(first, &Value::from("b")), 0);
        assert_eq!(boxing.rebox(first, 1), Value::from("a"));
        assert_eq!(boxing.ty(first), Some(BoxingType::Object));

        assert_eq!(boxing.unbox(second, &Value::Bool(true)), 1);
        assert_eq!(boxing.rebox(second, 1), Value::Bool(true));
        assert_eq!(boxing.unbox(second, &Value::Bool(false)), 0);
    }

    #[test]
    #[should_panic(expected = "cannot unbox")]
    fn mixed_types_at_one_position() {
        let a = RelSym::new("A", 0, 1);
        let mut facts = Facts::new();
        facts.insert(a, vec![]);
        let ram = datalog::compile(
            &Datalog::default(),
            Facts::new(),
            Predicates::initialize(&Datalog::default(), &facts),
        );
        let mut boxing = Boxing::initialize(&ram);
        let pos = boxing.column_pos(RelId(0), 0);
        let _: i64 = boxing.unbox(pos, &Value::Int64(3));
        let _: i64 = boxing.unbox(pos, &Value::from("three"));
    }
}
