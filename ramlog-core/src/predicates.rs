//! Relation generations for semi-naive evaluation.
//!
//! For `max` base relations, ids `[0, max)` are Full, `[max, 2max)` are Delta and `[2max, 3max)`
//! are New. Converting between generations is arithmetic on the id.

use crate::{
    datalog::{BodyItem, Datalog},
    ids::RelId,
    ram::{Facts, RelSym},
};
use std::collections::BTreeMap;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum PredType {
    Full,
    Delta,
    New,
}
impl PredType {
    fn offset(self) -> usize {
        match self {
            PredType::Full => 0,
            PredType::Delta => 1,
            PredType::New => 2,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Predicates {
    max: usize,
    /// Every Full relation, by id.
    relations: BTreeMap<RelId, RelSym>,
}

impl Predicates {
    /// Collect every Full relation mentioned by a rule head, a body atom or the preloaded facts.
    pub fn initialize(program: &Datalog, edb: &Facts) -> Self {
        let mut relations: BTreeMap<RelId, RelSym> = BTreeMap::new();
        let mut add = |rel: &RelSym| {
            if let Some(old) = relations.insert(rel.id, rel.clone()) {
                assert_eq!(&old, rel, "two relations share id {}", rel.id);
            }
        };
        for rule in program.strata.iter().flatten() {
            add(&rule.head.rel);
            for item in &rule.body {
                match item {
                    BodyItem::Atom(atom) | BodyItem::Not(atom) => add(&atom.rel),
                    BodyItem::Guard(..) | BodyItem::Functional { .. } | BodyItem::Eq(..) => {}
                }
            }
        }
        edb.keys().for_each(&mut add);
        let max = relations.keys().next_back().map_or(0, |RelId(id)| id + 1);
        tracing::debug!("{} relations, max id {max}", relations.len());
        Self { max, relations }
    }

    pub fn max(&self) -> usize {
        self.max
    }
    pub fn relations(&self) -> impl Iterator<Item = &RelSym> {
        self.relations.values()
    }

    pub fn full_id_to_pred_type(&self, id: RelId, wanted: PredType) -> RelId {
        assert!(self.is_full_id(id), "{id} is not a Full id");
        RelId(id.0 + wanted.offset() * self.max)
    }
    pub fn id_to_full_pred_id(&self, id: RelId) -> RelId {
        RelId(id.0 - self.id_to_pred_type(id).offset() * self.max)
    }
    pub fn id_to_pred_type(&self, id: RelId) -> PredType {
        match id.0 / self.max.max(1) {
            0 => PredType::Full,
            1 => PredType::Delta,
            2 => PredType::New,
            _ => panic!("{id} outside of the relation id space (max {})", self.max),
        }
    }
    pub fn is_full_id(&self, id: RelId) -> bool {
        self.id_to_pred_type(id) == PredType::Full
    }

    /// Full relation symbol to the wanted generation.
    pub fn full_rel_sym_to_type(&self, sym: &RelSym, wanted: PredType) -> RelSym {
        RelSym {
            id: self.full_id_to_pred_type(sym.id, wanted),
            ..sym.clone()
        }
    }
    /// Relation symbol of any generation to the wanted generation.
    pub fn get_rel_sym_as_type(&self, sym: &RelSym, wanted: PredType) -> RelSym {
        let full = RelSym {
            id: self.id_to_full_pred_id(sym.id),
            ..sym.clone()
        };
        self.full_rel_sym_to_type(&full, wanted)
    }
    /// Registered relation with the given Full id, in the wanted generation.
    pub fn rel_sym_from_pred_type(&self, full_id: RelId, wanted: PredType) -> RelSym {
        let sym = self
            .relations
            .get(&full_id)
            .unwrap_or_else(|| panic!("{full_id} is not a registered relation"));
        self.full_rel_sym_to_type(sym, wanted)
    }
}
