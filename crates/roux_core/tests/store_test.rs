//! Store integration tests: CRUD, reconcile, traversal, and the
//! vault-level consistency properties.

use predicates::prelude::*;
use roux_common::warnings::WarningBuffer;
use roux_common::{RouxError, SourceRef};
use roux_core::{CandidateFilter, CreateNode, HubMetric, NeighborDirection, Store, UpdateNode};
use roux_test_helpers::prelude::*;

fn open_store(root: &std::path::Path) -> Store {
    init_test_logging();
    let config = roux_config::Config::load(root).unwrap();
    Store::open(&config, WarningBuffer::new()).unwrap()
}

#[test]
fn test_create_then_query() {
    let vault = temp_vault();
    let mut store = open_store(vault.path());

    store
        .create_node(CreateNode {
            id: "Notes/Research.md".to_string(),
            content: "See [[ML]]".to_string(),
            ..Default::default()
        })
        .unwrap();

    let node = store.get_node("notes/research.md").unwrap().unwrap();
    assert_eq!(node.title, "Research");
    assert_eq!(node.outgoing_links, vec!["ml.md"]);
    assert_eq!(node.content.as_deref(), Some("See [[ML]]"));

    // The ghost target answers backlink queries with the real source.
    let incoming = store
        .neighbors("ml.md", NeighborDirection::In, None)
        .unwrap();
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].id, "notes/research.md");

    // On-disk casing is preserved.
    assert!(vault.path().join("Notes/Research.md").exists());
}

#[test]
fn test_create_existing_node_rejected() {
    let vault = vault_with_files(&[("a.md", "existing")]);
    let mut store = open_store(vault.path());

    let err = store
        .create_node(CreateNode {
            id: "A.md".to_string(),
            content: "clobber".to_string(),
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, RouxError::NodeExists { .. }));
    assert_eq!(
        std::fs::read_to_string(vault.path().join("a.md")).unwrap(),
        "existing"
    );
}

#[test]
fn test_create_rejects_escaping_paths() {
    let vault = temp_vault();
    let mut store = open_store(vault.path());

    for bad in ["../outside.md", "/abs.md", "a/../../b.md"] {
        let err = store
            .create_node(CreateNode {
                id: bad.to_string(),
                content: "x".to_string(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, RouxError::InvalidInput(_)), "{}", bad);
    }
}

#[test]
fn test_roundtrip_preserves_fields() {
    let vault = temp_vault();
    let mut store = open_store(vault.path());

    let mut properties = serde_json::Map::new();
    properties.insert("author".to_string(), serde_json::json!("sam"));
    properties.insert("rating".to_string(), serde_json::json!(5));

    store
        .create_node(CreateNode {
            id: "trip.md".to_string(),
            content: "body text\n".to_string(),
            title: Some("Round Trip".to_string()),
            tags: vec!["Alpha".to_string(), "beta".to_string()],
            properties,
        })
        .unwrap();

    let node = store.get_node("trip.md").unwrap().unwrap();
    assert_eq!(node.title, "Round Trip");
    assert_eq!(node.content.as_deref(), Some("body text\n"));
    assert_eq!(node.tags, vec!["alpha", "beta"]);
    assert_eq!(node.properties["author"], serde_json::json!("sam"));
    assert_eq!(node.properties["rating"], serde_json::json!(5));
    assert!(!node.properties.contains_key("title"));
    assert!(!node.properties.contains_key("tags"));
}

#[test]
fn test_update_rewrites_in_place() {
    let vault = vault_with_files(&[("a.md", "---\ntitle: A\n---\nold body")]);
    let mut store = open_store(vault.path());

    let node = store
        .update_node(
            "a.md",
            UpdateNode {
                content: Some("new body".to_string()),
                tags: Some(vec!["fresh".to_string()]),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(node.content.as_deref(), Some("new body"));
    assert_eq!(node.tags, vec!["fresh"]);
    assert_eq!(node.title, "A");

    let on_disk = std::fs::read_to_string(vault.path().join("a.md")).unwrap();
    assert!(on_disk.contains("new body"));
    assert!(on_disk.contains("title: A"));
}

#[test]
fn test_update_missing_node() {
    let vault = temp_vault();
    let mut store = open_store(vault.path());

    let err = store
        .update_node(
            "nope.md",
            UpdateNode {
                content: Some("x".to_string()),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, RouxError::NodeNotFound { .. }));
}

#[test]
fn test_link_integrity_on_retitle() {
    let vault = vault_with_files(&[("a.md", "points at [[b]]"), ("b.md", "target")]);
    let before_a = std::fs::read_to_string(vault.path().join("a.md")).unwrap();
    let before_b = std::fs::read_to_string(vault.path().join("b.md")).unwrap();

    let mut store = open_store(vault.path());
    let err = store
        .update_node(
            "b.md",
            UpdateNode {
                title: Some("B Renamed".to_string()),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, RouxError::LinkIntegrity(_)));

    // Neither file touched.
    assert_eq!(
        std::fs::read_to_string(vault.path().join("a.md")).unwrap(),
        before_a
    );
    assert_eq!(
        std::fs::read_to_string(vault.path().join("b.md")).unwrap(),
        before_b
    );
}

#[test]
fn test_retitle_allowed_without_backlinks() {
    let vault = vault_with_files(&[("solo.md", "nothing links here")]);
    let mut store = open_store(vault.path());

    let node = store
        .update_node(
            "solo.md",
            UpdateNode {
                title: Some("Standalone".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(node.title, "Standalone");
}

#[test]
fn test_delete_node() {
    let vault = vault_with_files(&[("a.md", "x")]);
    let mut store = open_store(vault.path());

    assert!(store.delete_node("a.md").unwrap());
    assert!(store.get_node("a.md").unwrap().is_none());
    assert!(!vault.path().join("a.md").exists());

    // Absent id reports false, not an error.
    assert!(!store.delete_node("a.md").unwrap());
}

#[test]
fn test_ghost_neighbor_scenario() {
    let vault = vault_with_files(&[("a.md", "refers to [[ghost]]")]);
    let store = open_store(vault.path());

    // Only the real node is listed.
    let page = store.list_nodes(None, None, 100, 0).unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.nodes[0].id, "a.md");

    // Ghosts are not real nodes: hydration collapses them out.
    let out = store.neighbors("a.md", NeighborDirection::Out, None).unwrap();
    assert!(out.is_empty());

    // And a ghost is not a path endpoint.
    assert!(store.find_path("a.md", "ghost.md").unwrap().is_none());
}

#[test]
fn test_ghost_promotion_and_demotion() {
    let vault = vault_with_files(&[("a.md", "see [[b]]")]);
    let mut store = open_store(vault.path());

    assert!(store.get_node("b.md").unwrap().is_none());

    // Promote: the ghost's file appears.
    write_note(vault.path(), "b.md", "now real");
    store.reconcile_one("b.md").unwrap();
    assert!(store.get_node("b.md").unwrap().is_some());
    let path = store.find_path("a.md", "b.md").unwrap().unwrap();
    assert_eq!(path, vec!["a.md", "b.md"]);

    // Demote: the file vanishes, the backlink keeps working via the ghost.
    std::fs::remove_file(vault.path().join("b.md")).unwrap();
    store.reconcile_one("b.md").unwrap();
    assert!(store.get_node("b.md").unwrap().is_none());
    let incoming = store.neighbors("b.md", NeighborDirection::In, None).unwrap();
    assert_eq!(incoming.len(), 1);
}

#[test]
fn test_centrality_scenario() {
    let vault = vault_with_files(&[
        ("a.md", "[[b]] and [[d]]"),
        ("b.md", "[[c]] and [[e]]"),
        ("d.md", "[[e]]"),
        ("c.md", "leaf"),
        ("e.md", "leaf"),
    ]);
    let store = open_store(vault.path());

    let top_in = store.hubs(HubMetric::InDegree, 1).unwrap();
    assert_eq!(top_in, vec![("e.md".to_string(), 2)]);

    let top_out = store.hubs(HubMetric::OutDegree, 2).unwrap();
    assert_eq!(
        top_out,
        vec![("a.md".to_string(), 2), ("b.md".to_string(), 2)]
    );

    // Persisted rows agree with the mirror (P2).
    let e = store.get_centrality("e.md").unwrap().unwrap();
    assert_eq!(e.in_degree, 2);
    assert_eq!(e.out_degree, 0);
    assert!(store.get_centrality("nope.md").unwrap().is_none());
}

#[test]
fn test_list_total_matches_unpaginated_len() {
    // P3: total equals the length of the unpaginated listing.
    let vault = vault_with_files(&[
        ("recipes/soup.md", "---\ntags: [food]\n---\nx"),
        ("recipes/stew.md", "---\ntags: [food]\n---\nx"),
        ("notes/a.md", "x"),
    ]);
    let store = open_store(vault.path());

    let paginated = store.list_nodes(Some("food"), None, 1, 1).unwrap();
    let full = store.list_nodes(Some("food"), None, 1000, 0).unwrap();
    assert_eq!(paginated.total, full.nodes.len());
    assert_eq!(paginated.total, 2);

    let by_path = store.list_nodes(None, Some("Recipes"), 1000, 0).unwrap();
    assert_eq!(by_path.total, 2);
}

#[test]
fn test_nodes_exist_agrees_with_get_nodes() {
    // P4: all-exist iff get_nodes returns every id.
    let vault = vault_with_files(&[("a.md", "x"), ("b.md", "x")]);
    let store = open_store(vault.path());

    let all = vec!["a.md".to_string(), "b.md".to_string()];
    let exists = store.nodes_exist(&all).unwrap();
    assert!(exists.values().all(|v| *v));
    assert_eq!(store.get_nodes(&all).unwrap().len(), all.len());

    let mixed = vec!["a.md".to_string(), "ghost.md".to_string()];
    let exists = store.nodes_exist(&mixed).unwrap();
    assert!(!exists.values().all(|v| *v));
    assert!(store.get_nodes(&mixed).unwrap().len() < mixed.len());
}

#[test]
fn test_reconcile_idempotence() {
    // P7: a second reconcile with no file change leaves identical state.
    let vault = vault_with_files(&[
        ("a.md", "---\ntitle: A\ntags: [x]\n---\nlinks [[b]]"),
        ("b.md", "plain"),
    ]);
    let mut store = open_store(vault.path());

    let first_a = store.get_node("a.md").unwrap().unwrap();
    let first_centrality = store.get_centrality("b.md").unwrap().unwrap();

    store.reconcile_one("a.md").unwrap();
    let second_a = store.get_node("a.md").unwrap().unwrap();
    let second_centrality = store.get_centrality("b.md").unwrap().unwrap();

    assert_eq!(first_a, second_a);
    assert_eq!(first_centrality.in_degree, second_centrality.in_degree);
    assert_eq!(first_centrality.out_degree, second_centrality.out_degree);

    let page = store.list_nodes(None, None, 100, 0).unwrap();
    assert_eq!(page.total, 2);
}

#[test]
fn test_parse_failure_warns_and_skips() {
    let vault = vault_with_files(&[("good.md", "fine"), ("bad.md", "---\ntitle: truncated")]);
    let config = roux_config::Config::load(vault.path()).unwrap();
    let warnings = WarningBuffer::new();
    let store = Store::open(&config, warnings.clone()).unwrap();

    // The healthy file is cached, the broken one is skipped with a warning.
    assert!(store.get_node("good.md").unwrap().is_some());
    assert!(store.get_node("bad.md").unwrap().is_none());

    let drained = warnings.drain();
    assert!(
        drained
            .iter()
            .any(|w| predicates::str::contains("parse failed").eval(w)),
        "expected a parse warning, got {:?}",
        drained
    );
}

#[test]
fn test_parse_failure_keeps_previous_version() {
    let vault = vault_with_files(&[("a.md", "---\ntitle: Good\n---\nv1")]);
    let mut store = open_store(vault.path());

    // Corrupt the file: reconcile skips it, keeping the committed version.
    write_note(vault.path(), "a.md", "---\ntitle: cut off");
    store.reconcile_one("a.md").unwrap();

    let node = store.get_node("a.md").unwrap().unwrap();
    assert_eq!(node.title, "Good");
    assert_eq!(node.content.as_deref(), Some("v1"));
}

#[test]
#[cfg(target_os = "linux")]
fn test_case_collision_is_hard_error() {
    // Two real files whose ids collide only by case. Requires a
    // case-sensitive filesystem to even exist on disk.
    let vault = vault_with_files(&[("Note.md", "upper"), ("note.md", "lower")]);
    let config = roux_config::Config::load(vault.path()).unwrap();
    let result = Store::open(&config, WarningBuffer::new());
    assert!(matches!(result, Err(RouxError::CaseCollision { .. })));
}

#[test]
fn test_resolve_nodes_exact_and_fuzzy() {
    let vault = vault_with_files(&[
        ("ml.md", "---\ntitle: Machine Learning\n---\nx"),
        ("cooking.md", "---\ntitle: Cooking Basics\n---\nx"),
    ]);
    let store = open_store(vault.path());
    let filter = CandidateFilter::default();

    let exact = store
        .resolve_nodes(
            &["machine learning".to_string()],
            roux_core::store::ResolveStrategy::Exact,
            0.0,
            &filter,
        )
        .unwrap();
    assert_eq!(exact[0].match_id.as_deref(), Some("ml.md"));
    assert_eq!(exact[0].score, 1.0);

    let fuzzy = store
        .resolve_nodes(
            &["machine lerning".to_string()],
            roux_core::store::ResolveStrategy::Fuzzy,
            0.7,
            &filter,
        )
        .unwrap();
    assert_eq!(fuzzy[0].match_id.as_deref(), Some("ml.md"));
    assert!(fuzzy[0].score >= 0.7);

    let miss = store
        .resolve_nodes(
            &["quantum chromodynamics".to_string()],
            roux_core::store::ResolveStrategy::Fuzzy,
            0.7,
            &filter,
        )
        .unwrap();
    assert!(miss[0].match_id.is_none());
}

#[test]
fn test_resolve_candidates_honor_filters() {
    let vault = vault_with_files(&[
        ("recipes/soup.md", "---\ntitle: Soup\ntags: [food]\n---\nx"),
        ("notes/soup.md", "---\ntitle: Soup Notes\n---\nx"),
    ]);
    let store = open_store(vault.path());

    let by_path = store
        .resolve_candidates(&CandidateFilter {
            path: Some("recipes".to_string()),
            tag: None,
        })
        .unwrap();
    assert_eq!(by_path.len(), 1);
    assert_eq!(by_path[0].0, "recipes/soup.md");

    let by_tag = store
        .resolve_candidates(&CandidateFilter {
            tag: Some("food".to_string()),
            path: None,
        })
        .unwrap();
    assert_eq!(by_tag.len(), 1);
}

#[test]
fn test_resolve_titles_covers_ghosts() {
    let vault = vault_with_files(&[("a.md", "---\ntitle: Alpha\n---\nsee [[missing note]]")]);
    let store = open_store(vault.path());

    let titles = store
        .resolve_titles(&["a.md".to_string(), "missing note.md".to_string()])
        .unwrap();
    assert_eq!(titles["a.md"], "Alpha");
    assert_eq!(titles["missing note.md"], "missing note");
}

#[test]
fn test_random_node_respects_tags() {
    let vault = vault_with_files(&[
        ("a.md", "---\ntags: [pick]\n---\nx"),
        ("b.md", "---\ntags: [other]\n---\nx"),
    ]);
    let store = open_store(vault.path());

    for _ in 0..10 {
        let node = store
            .random_node(&["pick".to_string()])
            .unwrap()
            .expect("tagged node exists");
        assert_eq!(node.id, "a.md");
    }

    assert!(store
        .random_node(&["nonexistent".to_string()])
        .unwrap()
        .is_none());

    let any = store.random_node(&[]).unwrap().unwrap();
    assert!(["a.md", "b.md"].contains(&any.id.as_str()));
}

#[test]
fn test_stats() {
    let vault = vault_with_files(&[
        ("a.md", "---\ntags: [x, y]\n---\n[[b]] [[ghost]]"),
        ("b.md", "---\ntags: [x]\n---\nplain"),
    ]);
    let store = open_store(vault.path());

    let stats = store.stats().unwrap();
    assert_eq!(stats.nodes, 2);
    assert_eq!(stats.ghosts, 1);
    assert_eq!(stats.edges, 2);
    assert_eq!(stats.tags, 2);
}

#[test]
fn test_source_ref_records_disk_path() {
    let vault = vault_with_files(&[("Dir/Note.md", "x")]);
    let store = open_store(vault.path());

    let node = store.get_node("dir/note.md").unwrap().unwrap();
    match &node.source {
        SourceRef::File { path, modified_ms } => {
            assert_eq!(path, "Dir/Note.md");
            assert!(*modified_ms > 0);
        }
        other => panic!("expected file source, got {:?}", other),
    }
}

#[test]
fn test_vector_passthrough_and_cleanup_on_delete() {
    let vault = vault_with_files(&[("a.md", "x"), ("b.md", "y")]);
    let mut store = open_store(vault.path());

    store.store_embedding("a.md", &[1.0, 0.0], "stub").unwrap();
    store.store_embedding("b.md", &[0.0, 1.0], "stub").unwrap();

    let hits = store.search_by_vector(&[1.0, 0.0], 5).unwrap();
    assert_eq!(hits[0].0, "a.md");

    store.delete_node("a.md").unwrap();
    assert!(!store.has_embedding("a.md").unwrap());
    let hits = store.search_by_vector(&[1.0, 0.0], 5).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0, "b.md");
}

#[test]
fn test_sidecar_is_rebuildable() {
    let vault = vault_with_files(&[("a.md", "see [[b]]"), ("b.md", "x")]);
    {
        let _store = open_store(vault.path());
    }

    // Blow away the side-car; a fresh open reconstructs everything.
    std::fs::remove_dir_all(vault.path().join(".roux")).unwrap();
    let store = open_store(vault.path());
    assert_eq!(store.list_nodes(None, None, 100, 0).unwrap().total, 2);
    assert_eq!(
        store.find_path("a.md", "b.md").unwrap().unwrap(),
        vec!["a.md", "b.md"]
    );
}
