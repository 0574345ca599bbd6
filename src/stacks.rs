use std::{
    cmp::Reverse,
    collections::{BTreeSet, BinaryHeap, HashMap},
};

use crate::models::Stack;

/// Edge
///
/// A dependency between two revisions of a stack, by PHID.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    pub child: String,
    pub parent: String,
}

impl Stack {
    pub fn edge_list(&self) -> Vec<Edge> {
        self.edges
            .iter()
            .map(|[child, parent]| Edge {
                child: child.clone(),
                parent: parent.clone(),
            })
            .collect()
    }
}

/// topological_order
///
/// Orders the stack's revisions so every parent comes before its children. Among
/// revisions that are ready at the same time the lower revision number goes first.
/// Edges naming unknown revisions are ignored; revisions caught in a cycle are appended
/// by revision number.
pub fn topological_order(stack: &Stack) -> Vec<String> {
    let edges = stack.edge_list();
    let numbers: HashMap<&str, u64> = stack
        .revisions
        .iter()
        .map(|r| (r.phid.as_str(), r.number()))
        .collect();

    let mut pending_parents: HashMap<&str, usize> =
        numbers.keys().map(|phid| (*phid, 0)).collect();
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    for Edge { child, parent } in &edges {
        if !numbers.contains_key(child.as_str()) || !numbers.contains_key(parent.as_str()) {
            continue;
        }
        children
            .entry(parent.as_str())
            .or_default()
            .push(child.as_str());
        *pending_parents.entry(child.as_str()).or_default() += 1;
    }

    let mut ready: BinaryHeap<Reverse<(u64, &str)>> = pending_parents
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(phid, _)| Reverse((numbers[phid], *phid)))
        .collect();

    let mut order = Vec::with_capacity(numbers.len());
    while let Some(Reverse((_, phid))) = ready.pop() {
        order.push(phid.to_string());
        for child in children.get(phid).into_iter().flatten() {
            if let Some(count) = pending_parents.get_mut(child) {
                *count -= 1;
                if *count == 0 {
                    ready.push(Reverse((numbers[child], *child)));
                }
            }
        }
    }

    if order.len() < numbers.len() {
        let placed: BTreeSet<&str> = order.iter().map(String::as_str).collect();
        let mut rest: Vec<(u64, &str)> = numbers
            .iter()
            .filter(|(phid, _)| !placed.contains(*phid))
            .map(|(phid, n)| (*n, *phid))
            .collect();
        rest.sort();
        order.extend(rest.into_iter().map(|(_, phid)| phid.to_string()));
    }

    order
}

/// LandableSeries
///
/// What can be landed from the point of view of one revision.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LandableSeries {
    /// Root-first path ending at the viewed revision, if it is landable.
    pub series: Option<Vec<String>>,
    /// Every revision appearing on any landable path.
    pub landable: BTreeSet<String>,
}

/// landable_series
///
/// A revision may appear on many landable paths when it or a descendant has several
/// children, but the path up to it is unique, so the first path containing it is used.
pub fn landable_series(stack: &Stack, revision_phid: &str) -> LandableSeries {
    let landable = stack.landable_paths.iter().flatten().cloned().collect();

    let series = stack.landable_paths.iter().find_map(|path| {
        path.iter()
            .position(|phid| phid == revision_phid)
            .map(|index| path[..=index].to_vec())
    });

    LandableSeries { series, landable }
}
