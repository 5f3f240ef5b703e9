//! Find required indexes given uses
//! In other words, the key columns of every `Query` to physical indexes.

use crate::{
    ids::{ColumnId, IndexId, IndexPos, IndexUsageId, RelId},
    predicates::PredType,
    ram::{BoolExp, IndexInfo, Indexes, RamProgram, RamTerm, RelOp},
    typed_set::TSet,
    typed_vec::TVec,
};

use std::collections::{BTreeMap, BTreeSet};

struct BipartiteMatching {
    next: TVec<IndexUsageId, Option<IndexUsageId>>,
    has_prev: TVec<IndexUsageId, bool>,
}
impl BipartiteMatching {
    /// Uses Ford-Fulkerson
    ///
    /// 1. Repeatedly, find a single augmenting path to extend the matching.
    /// 2. DFS from any unmatched left-node, taking unused edges rightwards and used edges leftwards.
    fn compute_maximum_bipartite_matching(graph: &TVec<IndexUsageId, Vec<IndexUsageId>>) -> Self {
        // `graph[iuA].contains(iuB)` implies that `iuA` queries a subset of the columns of `iuB`.

        let mut match_back: TVec<IndexUsageId, Option<IndexUsageId>> = graph.new_same_size();
        let mut matched = 0;

        for left_origin in graph.enumerate() {
            let mut visited_right: TVec<IndexUsageId, bool> = graph.new_same_size();

            if dfs(left_origin, graph, &mut match_back, &mut visited_right) {
                matched += 1;
            }
        }
        assert_eq!(matched, match_back.iter().copied().flatten().count());

        fn dfs(
            left: IndexUsageId,
            graph: &TVec<IndexUsageId, Vec<IndexUsageId>>,
            match_back: &mut TVec<IndexUsageId, Option<IndexUsageId>>,
            visited_right: &mut TVec<IndexUsageId, bool>,
        ) -> bool {
            for &right in &graph[left] {
                if match_back[right].is_none() {
                    // Found augmenting path!
                    match_back[right] = Some(left);
                    return true;
                }
            }
            for &right in &graph[left] {
                let Some(conflict) = match_back[right] else {
                    unreachable!("every right node was matched by the first loop")
                };
                if conflict == left || visited_right[right] {
                    continue;
                }
                visited_right[right] = true;

                if dfs(conflict, graph, match_back, visited_right) {
                    match_back[right] = Some(left);
                    return true;
                }
            }
            false
        }

        Self {
            next: {
                let mut next: TVec<IndexUsageId, Option<IndexUsageId>> = match_back.new_same_size();
                for (right, left) in match_back.iter_enumerate() {
                    let &Some(left) = left else { continue };
                    next[left] = Some(right);
                }
                next
            },
            has_prev: match_back.map(Option::is_some),
        }
    }
}

/// Index `index` answers the usage using its first `prefix` columns.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct IndexUsageInfo {
    pub(crate) prefix: usize,
    pub(crate) index: IndexId,
}

// user:
// Want an index on these columns
// [0, 1*, 2, 3*, 4]
//
// lib:
// Permute query/result in this order, and index on a prefix of 2 variables:
// [*3, *1, 4, 2, 0]

/// Cover the uses with as few column orders as possible, such that every use is a prefix of some
/// order.
fn curried_index(
    columns: usize,
    uses: &TSet<IndexUsageId, BTreeSet<ColumnId>>,
) -> (
    TVec<IndexUsageId, IndexUsageInfo>,
    TVec<IndexId, Vec<ColumnId>>,
) {
    // Bipartite matching can solve the problem of covering a directed graph with a minimum
    // number of disjoint line graphs (isolated nodes are considered lines).
    //
    // Reduction: Split every node of the directed graph into a left and right node. Replace
    // every directed edge with an undirected edge from and to the corresponding left and right
    // nodes.

    let uses = uses.as_tvec();
    let graph = {
        let mut graph: TVec<IndexUsageId, Vec<IndexUsageId>> = uses.new_same_size();
        for (iu_left, columns_left) in uses.iter_enumerate() {
            for (iu_right, columns_right) in uses.iter_enumerate() {
                if columns_left.len() < columns_right.len() && columns_left.is_subset(columns_right)
                {
                    graph[iu_left].push(iu_right);
                }
            }
        }
        graph
    };
    let BipartiteMatching { next, has_prev } =
        BipartiteMatching::compute_maximum_bipartite_matching(&graph);

    // Recover full indexes from matching.

    let mut iu_to_index: TVec<IndexUsageId, Option<IndexId>> = uses.new_same_size();
    let mut indexes: TVec<IndexId, Vec<ColumnId>> = TVec::new();

    for mut iu in has_prev
        .iter_enumerate()
        .filter_map(|(iu, has_prev)| (!has_prev).then_some(iu))
    {
        let index_id = IndexId(indexes.len());
        let mut index: Vec<ColumnId> = uses[iu].iter().copied().collect();
        iu_to_index[iu] = Some(index_id);

        while let Some(iu2) = next[iu] {
            index.extend(uses[iu2].difference(&uses[iu]));
            assert_eq!(index.len(), uses[iu2].len());
            iu_to_index[iu2] = Some(index_id);
            iu = iu2;
        }
        index.extend((0..columns).map(ColumnId).filter(|c| !uses[iu].contains(c)));
        assert_eq!(columns, index.len());

        indexes.push_expected(index_id, index);
    }

    let mut sorted: Vec<IndexId> = indexes.enumerate().collect();
    sorted.sort_by(|&a, &b| indexes[a].cmp(&indexes[b]));
    let mut renamed: TVec<IndexId, IndexId> = indexes.new_same_size();
    for (new, &old) in sorted.iter().enumerate() {
        renamed[old] = IndexId(new);
    }

    (
        uses.iter_enumerate()
            .map(|(iu, cols)| IndexUsageInfo {
                prefix: cols.len(),
                index: renamed[iu_to_index[iu].expect(
                    "all iu should have been visited, as roots or by walking a line subgraph",
                )],
            })
            .collect(),
        sorted.into_iter().map(|old| indexes[old].clone()).collect(),
    )
}

/// Columns of the `Query` row that are constrained by its key equalities.
pub(crate) fn key_columns(op: &RelOp) -> BTreeSet<usize> {
    let RelOp::Query(rv, rel, tests, _) = op else {
        return BTreeSet::new();
    };
    tests
        .iter()
        .map(|test| match test {
            BoolExp::Eq(RamTerm::RowLoad(lhs, column, _), _) if lhs == rv => *column,
            BoolExp::Eq(_, RamTerm::RowLoad(rhs, column, _)) if rhs == rv => *column,
            _ => panic!("query of {rv} in {rel} has a non-key test {test}"),
        })
        .collect()
}

/// Decide the indexes of every relation and number them.
///
/// Full and Delta of a relation share their column orders, New only has the first one.
pub fn place_indexes(program: RamProgram) -> RamProgram {
    let start = std::time::Instant::now();
    let predicates = &program.predicates;

    let mut uses: BTreeMap<RelId, TSet<IndexUsageId, BTreeSet<ColumnId>>> = BTreeMap::new();
    program.stmt.visit_ops(&mut |op| {
        if let RelOp::Query(_, rel, _, _) = op {
            let full = predicates.id_to_full_pred_id(rel.id);
            let _: IndexUsageId = uses
                .entry(full)
                .or_default()
                .insert(key_columns(op).into_iter().map(ColumnId).collect());
        }
    });

    let mut relations = BTreeMap::new();
    let mut count = 0;
    let mut fresh = |n: usize| {
        count += n;
        (count - n..count).map(IndexPos).collect::<Vec<_>>()
    };
    for rel in predicates.relations() {
        let columns = rel.key_arity();
        let mut rel_uses = uses.remove(&rel.id).unwrap_or_default();
        // Guarantee some index.
        let _: IndexUsageId = rel_uses.insert((0..columns).map(ColumnId).collect());
        let (usages, orders) = curried_index(columns, &rel_uses);
        for (iu, usage) in usages.iter_enumerate() {
            let prefix: BTreeSet<ColumnId> =
                orders[usage.index][..usage.prefix].iter().copied().collect();
            assert_eq!(&prefix, &rel_uses.as_tvec()[iu], "{rel}: {iu} is not a prefix");
        }
        let search_orders: Vec<Vec<usize>> = orders
            .iter()
            .map(|order| order.iter().map(|c| c.0).collect())
            .collect();
        tracing::trace!("{rel}: {search_orders:?}");

        for wanted in [PredType::Full, PredType::Delta] {
            relations.insert(
                predicates.full_id_to_pred_type(rel.id, wanted),
                IndexInfo {
                    search_orders: search_orders.clone(),
                    positions: fresh(search_orders.len()),
                },
            );
        }
        relations.insert(
            predicates.full_id_to_pred_type(rel.id, PredType::New),
            IndexInfo {
                search_orders: vec![search_orders[0].clone()],
                positions: fresh(1),
            },
        );
    }
    assert!(uses.is_empty(), "query of an unregistered relation");

    let indexes = Indexes { relations, count };
    tracing::info!(
        "index selection took {:?}, {} indexes",
        start.elapsed(),
        indexes.count
    );
    RamProgram { indexes, ..program }
}
