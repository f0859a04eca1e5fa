use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;

use nexus_core::{
    CanvasRegistry, ContextEngine, DepthMode, Error, FsStorage, GraphStore, MemoryStorage,
    NewEdge, NewNode, NodeType, Role, Storage, DEFAULT_CANVAS_ID,
};

fn registry() -> CanvasRegistry {
    CanvasRegistry::open(Arc::new(MemoryStorage::new())).unwrap()
}

fn ids(result: &nexus_core::ContextResult) -> BTreeSet<String> {
    result.nodes.iter().map(|n| n.id.to_string()).collect()
}

fn set(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

#[test]
fn hierarchical_edges_must_point_up() {
    let mut g = GraphStore::new();
    g.add_node(NewNode::new(NodeType::Topic, "Topic").id("T1")).unwrap();
    g.add_node(NewNode::new(NodeType::Module, "Module").id("M1")).unwrap();
    g.add_node(NewNode::new(NodeType::Child, "Child").id("C1")).unwrap();

    g.add_edge(NewEdge::hierarchical("C1", "M1", "belongs to")).unwrap();
    let err = g
        .add_edge(NewEdge::hierarchical("M1", "C1", "contains"))
        .unwrap_err();
    assert!(matches!(err, Error::HierarchyViolation(_)));
    assert_eq!(g.edge_count(), 1);
}

#[test]
fn context_grows_with_depth() {
    let mut g = GraphStore::new();
    g.add_node(NewNode::new(NodeType::Topic, "Topic").id("T1")).unwrap();
    g.add_node(NewNode::new(NodeType::Module, "Module").id("M1")).unwrap();
    g.add_node(NewNode::new(NodeType::Child, "Child").id("C1")).unwrap();

    let f0 = ContextEngine::compute(&g, ["C1"], DepthMode::F0).unwrap();
    assert_eq!(ids(&f0), set(&["C1"]));

    g.add_edge(NewEdge::hierarchical("C1", "M1", "belongs to")).unwrap();
    let f1 = ContextEngine::compute(&g, ["C1"], DepthMode::F1).unwrap();
    assert_eq!(ids(&f1), set(&["C1", "M1"]));

    g.add_edge(NewEdge::hierarchical("M1", "T1", "belongs to")).unwrap();
    let f2 = ContextEngine::compute(&g, ["C1"], DepthMode::F2).unwrap();
    assert_eq!(ids(&f2), set(&["C1", "M1", "T1"]));
    assert_eq!(f2.stats.edge_count, 2);
}

#[test]
fn new_canvas_is_isolated_from_default() {
    let r = registry();
    let default = r.active().unwrap();
    default
        .add_node(NewNode::new(NodeType::Topic, "Existing").id("D1"))
        .unwrap();
    let before = default.snapshot();

    let meta = r.create("Project X").unwrap();
    r.activate(meta.id.as_str()).unwrap();
    r.active()
        .unwrap()
        .add_node(NewNode::new(NodeType::Child, "N1").id("N1"))
        .unwrap();

    let list = r.list();
    let entry = list.iter().find(|e| e.meta.id == meta.id).unwrap();
    assert!(entry.is_active);
    assert_eq!(entry.meta.name, "Project X");
    assert_eq!(list.iter().filter(|e| e.is_active).count(), 1);
    // Most recently modified first.
    assert_eq!(list[0].meta.id, meta.id);

    let project = r.get(meta.id.as_str()).unwrap();
    assert!(project.node("N1").is_some());
    assert_eq!(r.get(DEFAULT_CANVAS_ID).unwrap().snapshot(), before);
}

#[test]
fn deleted_node_is_unknown_to_context() {
    let mut g = GraphStore::new();
    g.add_node(NewNode::new(NodeType::Module, "M1").id("M1")).unwrap();
    g.add_node(NewNode::new(NodeType::Module, "M2").id("M2")).unwrap();
    g.add_node(NewNode::new(NodeType::Child, "C1").id("C1")).unwrap();
    g.add_edge(NewEdge::hierarchical("C1", "M1", "in")).unwrap();
    g.add_edge(NewEdge::associative("M2", "C1", "mentions")).unwrap();

    g.delete_node("C1").unwrap();
    assert_eq!(g.edge_count(), 0);
    let err = ContextEngine::compute(&g, ["C1"], DepthMode::F0).unwrap_err();
    assert!(matches!(err, Error::UnknownNode(ref id) if id.as_str() == "C1"));
}

#[test]
fn default_canvas_cannot_be_deleted() {
    let r = registry();
    let other = r.create("Other").unwrap();
    let before = r.list();

    let err = r.delete(DEFAULT_CANVAS_ID).unwrap_err();
    assert!(matches!(err, Error::ProtectedCanvas(_)));
    assert_eq!(r.list(), before);
    assert_eq!(r.active_id().as_str(), DEFAULT_CANVAS_ID);
    assert!(r.get(other.id.as_str()).is_ok());
}

#[test]
fn mutating_and_deleting_b_leaves_a_alone() {
    let dir = tempfile::tempdir().unwrap();
    let r = CanvasRegistry::open(Arc::new(FsStorage::new(dir.path()))).unwrap();
    let a = r.create("A").unwrap();
    let b = r.create("B").unwrap();

    let canvas_a = r.get(a.id.as_str()).unwrap();
    canvas_a
        .add_node(NewNode::new(NodeType::Topic, "Keep").id("K1"))
        .unwrap();
    let a_before = (canvas_a.meta(), canvas_a.snapshot());
    let a_file = fs::read_to_string(dir.path().join("canvases").join(a.id.as_str()).join("canvas.json"))
        .unwrap();

    let canvas_b = r.get(b.id.as_str()).unwrap();
    canvas_b
        .add_node(NewNode::new(NodeType::Topic, "Temp").id("K1"))
        .unwrap();
    canvas_b.delete_node("K1").unwrap();
    r.delete(b.id.as_str()).unwrap();

    assert_eq!((canvas_a.meta(), canvas_a.snapshot()), a_before);
    let a_after = fs::read_to_string(dir.path().join("canvases").join(a.id.as_str()).join("canvas.json"))
        .unwrap();
    assert_eq!(a_file, a_after);
    assert!(!dir.path().join("canvases").join(b.id.as_str()).exists());
}

#[test]
fn state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let project_id;
    let session;
    {
        let r = CanvasRegistry::open(Arc::new(FsStorage::new(dir.path()))).unwrap();
        let meta = r.create("Research").unwrap();
        project_id = meta.id.clone();
        r.activate(meta.id.as_str()).unwrap();
        let c = r.active().unwrap();
        c.add_node(NewNode::new(NodeType::Module, "Auth").id("M1")).unwrap();
        c.add_node(NewNode::new(NodeType::Child, "Login").id("C1").module("Auth"))
            .unwrap();
        c.add_edge(NewEdge::hierarchical("C1", "M1", "part of")).unwrap();
        let q = c.context_query(["C1"], DepthMode::F1).unwrap();
        c.append_chat_turn(q.session_id.as_str(), Role::User, "how does login work?")
            .unwrap();
        c.update_settings(&serde_json::json!({ "manual_connection_ai_assist": true }))
            .unwrap();
        session = q.session_id;
    }

    let r = CanvasRegistry::open(Arc::new(FsStorage::new(dir.path()))).unwrap();
    assert_eq!(r.active_id(), project_id);
    let c = r.active().unwrap();
    assert_eq!(c.snapshot().nodes.len(), 2);
    assert_eq!(c.snapshot().edges.len(), 1);
    assert!(c.settings().manual_connection_ai_assist);
    let restored = c.chat_session(session.as_str()).unwrap();
    assert_eq!(restored.turns.len(), 1);
    assert_eq!(restored.context.dominant_module, "Auth");
}

#[test]
fn corrupt_canvas_is_skipped_but_default_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FsStorage::new(dir.path()));
    {
        let r = CanvasRegistry::open(storage.clone()).unwrap();
        r.create("Broken").unwrap();
    }
    let broken = storage
        .list_canvases()
        .unwrap()
        .into_iter()
        .find(|id| id.as_str() != DEFAULT_CANVAS_ID)
        .unwrap();
    let broken_file = dir.path().join("canvases").join(broken.as_str()).join("canvas.json");
    fs::write(&broken_file, "{ truncated").unwrap();

    let r = CanvasRegistry::open(storage.clone()).unwrap();
    assert_eq!(r.list().len(), 1);
    assert!(r.get(broken.as_str()).is_err());

    let default_file = dir
        .path()
        .join("canvases")
        .join(DEFAULT_CANVAS_ID)
        .join("canvas.json");
    fs::write(&default_file, "[]").unwrap();
    let err = CanvasRegistry::open(storage).err().unwrap();
    assert_eq!(err.kind(), "PersistenceError");
    assert!(!err.to_string().contains(&dir.path().display().to_string()));
}

#[test]
fn unknown_active_pointer_falls_back_to_default() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("registry.json"), r#"{"active_id":"gone-1234abcd"}"#).unwrap();
    let r = CanvasRegistry::open(Arc::new(FsStorage::new(dir.path()))).unwrap();
    assert_eq!(r.active_id().as_str(), DEFAULT_CANVAS_ID);
    let raw = fs::read_to_string(dir.path().join("registry.json")).unwrap();
    assert!(raw.contains(DEFAULT_CANVAS_ID));
}
