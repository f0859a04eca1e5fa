use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;

use nexus_core::{
    rank_violations, CanvasRegistry, ContextEngine, DepthMode, EdgeKind, Error, GraphStore,
    MemoryStorage, NewEdge, NewNode, NodeType,
};

fn node_type() -> impl Strategy<Value = NodeType> {
    prop_oneof![
        Just(NodeType::Topic),
        Just(NodeType::Module),
        Just(NodeType::Child)
    ]
}

fn edge_kind() -> impl Strategy<Value = EdgeKind> {
    prop_oneof![Just(EdgeKind::Hierarchical), Just(EdgeKind::Associative)]
}

/// Node types plus edge attempts as index pairs into the node list.
fn graph_input() -> impl Strategy<Value = (Vec<NodeType>, Vec<(usize, usize, EdgeKind)>)> {
    prop::collection::vec(node_type(), 1..12).prop_flat_map(|types| {
        let n = types.len();
        let edges = prop::collection::vec((0..n, 0..n, edge_kind()), 0..30);
        (Just(types), edges)
    })
}

fn build(types: &[NodeType], attempts: &[(usize, usize, EdgeKind)]) -> GraphStore {
    let mut g = GraphStore::new();
    for (i, t) in types.iter().enumerate() {
        g.add_node(NewNode::new(*t, format!("node {i}")).id(format!("n{i}")).module(format!("m{}", i % 3)))
            .unwrap();
    }
    for (s, t, kind) in attempts {
        let _ = g.add_edge(NewEdge::new(format!("n{s}"), format!("n{t}"), "because", *kind));
    }
    g
}

fn context_ids(g: &GraphStore, selection: &[String], depth: DepthMode) -> BTreeSet<String> {
    ContextEngine::compute(g, selection, depth)
        .unwrap()
        .nodes
        .into_iter()
        .map(|n| n.id.to_string())
        .collect()
}

proptest! {
    #[test]
    fn downward_hierarchical_edges_are_always_rejected((types, attempts) in graph_input()) {
        let mut g = build(&types, &[]);
        for (s, t, kind) in attempts {
            let before = g.edge_count();
            let had_pair = g.edge(&format!("n{s}"), &format!("n{t}")).is_some();
            let result = g.add_edge(NewEdge::new(format!("n{s}"), format!("n{t}"), "because", kind));
            let downward = kind == EdgeKind::Hierarchical && types[s].rank() <= types[t].rank();
            if s == t {
                prop_assert!(matches!(result, Err(Error::SelfLoop(_))));
                prop_assert_eq!(g.edge_count(), before);
            } else if downward {
                prop_assert!(matches!(result, Err(Error::HierarchyViolation(_))));
                prop_assert_eq!(g.edge_count(), before);
            } else {
                prop_assert!(result.is_ok());
                prop_assert_eq!(g.edge_count(), if had_pair { before } else { before + 1 });
            }
        }
        prop_assert!(rank_violations(&g).is_empty());
    }

    #[test]
    fn deleting_a_node_removes_exactly_its_edges(
        (types, attempts) in graph_input(),
        pick in any::<prop::sample::Index>(),
    ) {
        let mut g = build(&types, &attempts);
        let victim = format!("n{}", pick.index(types.len()));
        let incident = g.edges().filter(|e| e.touches(&victim)).count();
        let before = g.edge_count();

        let removal = g.delete_node(&victim).unwrap();
        prop_assert_eq!(removal.edges.len(), incident);
        prop_assert_eq!(g.edge_count(), before - incident);
        let snapshot = g.snapshot();
        prop_assert!(snapshot.nodes.iter().all(|n| n.id.as_str() != victim));
        prop_assert!(snapshot.edges.iter().all(|e| !e.touches(&victim)));
    }

    #[test]
    fn context_is_monotonic_in_depth(
        (types, attempts) in graph_input(),
        picks in prop::collection::vec(any::<prop::sample::Index>(), 1..4),
    ) {
        let g = build(&types, &attempts);
        let selection: Vec<String> = picks.iter().map(|p| format!("n{}", p.index(types.len()))).collect();

        let f0 = context_ids(&g, &selection, DepthMode::F0);
        let f1 = context_ids(&g, &selection, DepthMode::F1);
        let f2 = context_ids(&g, &selection, DepthMode::F2);
        let selected: BTreeSet<String> = selection.iter().cloned().collect();
        prop_assert_eq!(&f0, &selected);
        prop_assert!(f0.is_subset(&f1));
        prop_assert!(f1.is_subset(&f2));
    }

    #[test]
    fn context_is_deterministic(
        (types, attempts) in graph_input(),
        picks in prop::collection::vec(any::<prop::sample::Index>(), 1..4),
        depth in prop_oneof![Just(DepthMode::F0), Just(DepthMode::F1), Just(DepthMode::F2)],
    ) {
        let g = build(&types, &attempts);
        let mut selection: Vec<String> = picks.iter().map(|p| format!("n{}", p.index(types.len()))).collect();
        let first = ContextEngine::compute(&g, &selection, depth).unwrap();
        selection.reverse();
        let second = ContextEngine::compute(&g, &selection, depth).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn context_edges_stay_inside_context(
        (types, attempts) in graph_input(),
        pick in any::<prop::sample::Index>(),
    ) {
        let g = build(&types, &attempts);
        let selection = vec![format!("n{}", pick.index(types.len()))];
        let result = ContextEngine::compute(&g, &selection, DepthMode::F2).unwrap();
        let ids = result.node_ids();
        prop_assert!(result.edges.iter().all(|e| ids.contains(e.source.as_str()) && ids.contains(e.target.as_str())));
        prop_assert_eq!(result.stats.node_count, result.nodes.len());
    }

    #[test]
    fn work_on_one_canvas_never_touches_another(
        (types, attempts) in graph_input(),
    ) {
        let r = CanvasRegistry::open(Arc::new(MemoryStorage::new())).unwrap();
        let a = r.create("A").unwrap();
        let b = r.create("B").unwrap();
        let canvas_a = r.get(a.id.as_str()).unwrap();
        canvas_a.add_node(NewNode::new(NodeType::Topic, "anchor").id("n0")).unwrap();
        let before = (canvas_a.meta(), canvas_a.snapshot());

        let canvas_b = r.get(b.id.as_str()).unwrap();
        for (i, t) in types.iter().enumerate() {
            canvas_b.add_node(NewNode::new(*t, "x").id(format!("n{i}"))).unwrap();
        }
        for (s, t, kind) in &attempts {
            let _ = canvas_b.add_edge(NewEdge::new(format!("n{s}"), format!("n{t}"), "j", *kind));
        }
        let _ = canvas_b.delete_node("n0");
        r.delete(b.id.as_str()).unwrap();

        prop_assert_eq!((canvas_a.meta(), canvas_a.snapshot()), before);
    }
}
