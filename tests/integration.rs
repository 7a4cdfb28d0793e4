//! Integration tests for the branch store.

use branchline::{
    set_entity_meta_all, BranchEvent, BranchState, CommitType, DocumentCollection, EntityMeta,
    EntityStore, EventFilter, Predicate, Store, StoreConfig, SubscriptionConfig, TemporalEntity,
    Timestamp, BUSINESS_ID_FIELD,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Concept {
    meta: EntityMeta,
    concept_id: String,
    term: String,
}

impl Concept {
    fn new(concept_id: &str, term: &str) -> Self {
        Self {
            meta: EntityMeta::default(),
            concept_id: concept_id.into(),
            term: term.into(),
        }
    }
}

impl TemporalEntity for Concept {
    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn business_id(&self) -> Option<&str> {
        Some(&self.concept_id)
    }
}

fn test_store(dir: &TempDir) -> Store {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    Store::create(StoreConfig {
        path: dir.path().join("store"),
        create_if_missing: true,
        history_cache_size: 64,
    })
    .unwrap()
}

/// Edit concepts on a branch the way a consumer does: end old versions,
/// stamp, save, complete.
fn edit(store: &Store, concepts: &DocumentCollection<Concept>, path: &str, batch: Vec<Concept>) -> Timestamp {
    let mut commit = store.branches().open_commit(path, CommitType::Content).unwrap();
    let ids: Vec<String> = batch.iter().map(|c| c.concept_id.clone()).collect();
    store
        .criteria()
        .end_old_versions(&mut commit, BUSINESS_ID_FIELD, ids, concepts)
        .unwrap();

    let mut batch = batch;
    set_entity_meta_all(&mut batch, &commit);
    concepts.save_all(batch).unwrap();
    store.branches().complete_commit(&commit).unwrap();
    commit.timepoint()
}

fn terms_on(store: &Store, concepts: &DocumentCollection<Concept>, path: &str, concept_id: &str) -> Vec<String> {
    let visible = store.criteria().branch_criteria(path).unwrap().to_predicate();
    let query = visible.and(Predicate::field_in(BUSINESS_ID_FIELD, [concept_id]));
    let mut terms: Vec<String> = concepts
        .find(&query)
        .unwrap()
        .into_iter()
        .map(|c| c.term)
        .collect();
    terms.sort();
    terms
}

// --- Realistic Workflow Tests ---

#[test]
fn test_edit_rebase_scenario() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let concepts = DocumentCollection::new();

    store.branches().create("MAIN").unwrap();
    edit(&store, &concepts, "MAIN", vec![Concept::new("X", "original")]);
    let a = store.branches().create("MAIN/A").unwrap();
    assert_eq!(a.base, store.branches().require_latest("MAIN").unwrap().head);

    let t2 = edit(&store, &concepts, "MAIN/A", vec![Concept::new("X", "edited on A")]);
    assert_eq!(store.branches().require_latest("MAIN/A").unwrap().head, t2);

    let t3 = edit(&store, &concepts, "MAIN", vec![Concept::new("X", "edited on MAIN")]);
    assert_eq!(terms_on(&store, &concepts, "MAIN/A", "X"), vec!["edited on A"]);
    assert_eq!(
        store.branches().find_latest_with_state("MAIN/A").unwrap().unwrap().1,
        BranchState::Diverged
    );

    // Rebase, resolving the conflict in favour of the parent by ending
    // the branch's own version.
    let rebase = store.branches().open_rebase_commit("MAIN/A").unwrap();
    assert_eq!(rebase.branch().base, t3);
    let own = concepts
        .find(&Predicate::path_eq("MAIN_A").and(Predicate::EndUnset))
        .unwrap();
    let own_ids: Vec<_> = own.iter().filter_map(|c| c.internal_id()).collect();
    concepts.end_versions(&own_ids, rebase.timepoint()).unwrap();
    let rebased = store.branches().complete_commit(&rebase).unwrap();

    assert_eq!(rebased.base, t3);
    assert_eq!(terms_on(&store, &concepts, "MAIN/A", "X"), vec!["edited on MAIN"]);
    assert_eq!(terms_on(&store, &concepts, "MAIN", "X"), vec!["edited on MAIN"]);
}

#[test]
fn test_visibility_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let concepts = DocumentCollection::new();

    let main = store.branches().create("MAIN").unwrap();
    let t = edit(&store, &concepts, "MAIN", vec![Concept::new("1", "heart")]);

    assert_eq!(terms_on(&store, &concepts, "MAIN", "1"), vec!["heart"]);

    // As of the row that covered the branch before the commit.
    let before = store.branches().find_at_timepoint("MAIN", main.start).unwrap();
    assert!(before.end.is_some());
    let then = store.criteria().branch_criteria_for(&before).unwrap();
    assert!(concepts.find(&then.to_predicate()).unwrap().is_empty());

    // And for every later commit.
    edit(&store, &concepts, "MAIN", vec![Concept::new("2", "lung")]);
    assert_eq!(terms_on(&store, &concepts, "MAIN", "1"), vec!["heart"]);
    assert!(store.branches().require_latest("MAIN").unwrap().head > t);
}

#[test]
fn test_ancestor_hiding_never_mutates_parent() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let concepts = DocumentCollection::new();

    store.branches().create("MAIN").unwrap();
    edit(&store, &concepts, "MAIN", vec![Concept::new("1", "heart")]);
    let parent_version = concepts.find(&Predicate::path_eq("MAIN")).unwrap().remove(0);

    store.branches().create("MAIN/A").unwrap();
    store.branches().create("MAIN/A/B").unwrap();
    edit(&store, &concepts, "MAIN/A/B", vec![Concept::new("1", "cardiac")]);

    assert_eq!(terms_on(&store, &concepts, "MAIN/A/B", "1"), vec!["cardiac"]);
    assert_eq!(terms_on(&store, &concepts, "MAIN/A", "1"), vec!["heart"]);
    assert_eq!(terms_on(&store, &concepts, "MAIN", "1"), vec!["heart"]);

    let id = parent_version.internal_id().unwrap();
    assert_eq!(concepts.get(id), Some(parent_version));
    assert!(store
        .branches()
        .require_latest("MAIN/A/B")
        .unwrap()
        .versions_replaced
        .contains(&id));
}

#[test]
fn test_promotion_workflow() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let concepts = DocumentCollection::new();

    store.branches().create("MAIN").unwrap();
    edit(&store, &concepts, "MAIN", vec![Concept::new("1", "heart")]);
    store.branches().create("MAIN/A").unwrap();
    edit(&store, &concepts, "MAIN/A", vec![Concept::new("1", "cardiac"), Concept::new("2", "new")]);
    assert_eq!(
        store.branches().find_latest_with_state("MAIN/A").unwrap().unwrap().1,
        BranchState::Forward
    );

    // Move the branch's versions up to the parent.
    let mut promotion = store.branches().open_promotion_commit("MAIN", "MAIN/A").unwrap();
    let changes = store
        .branches()
        .require_latest("MAIN/A")
        .map(|a| store.criteria().changes_on_branch(&a))
        .unwrap()
        .and(Predicate::EndUnset);
    let mut promoted = concepts.find(&changes).unwrap();
    let source_ids: Vec<_> = promoted.iter().filter_map(|c| c.internal_id()).collect();
    let ids: Vec<String> = promoted.iter().map(|c| c.concept_id.clone()).collect();

    store
        .criteria()
        .end_old_versions(&mut promotion, BUSINESS_ID_FIELD, ids, &concepts)
        .unwrap();
    concepts.end_versions(&source_ids, promotion.timepoint()).unwrap();
    set_entity_meta_all(&mut promoted, &promotion);
    concepts.save_all(promoted).unwrap();
    let main = store.branches().complete_commit(&promotion).unwrap();
    assert_eq!(main.head, promotion.timepoint());

    let a = store.branches().require_latest("MAIN/A").unwrap();
    assert!(a.versions_replaced.is_empty());
    assert!(!a.contains_content);
    assert_eq!(a.base, main.head);
    assert_eq!(
        store.branches().find_latest_with_state("MAIN/A").unwrap().unwrap().1,
        BranchState::UpToDate
    );

    assert_eq!(terms_on(&store, &concepts, "MAIN", "1"), vec!["cardiac"]);
    assert_eq!(terms_on(&store, &concepts, "MAIN", "2"), vec!["new"]);
    assert_eq!(terms_on(&store, &concepts, "MAIN/A", "1"), vec!["cardiac"]);
    assert_eq!(terms_on(&store, &concepts, "MAIN/A", "2"), vec!["new"]);
}

#[test]
fn test_sibling_branches_are_isolated() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let concepts = DocumentCollection::new();

    store.branches().create("MAIN").unwrap();
    edit(&store, &concepts, "MAIN", vec![Concept::new("1", "base")]);
    store.branches().create("MAIN/A").unwrap();
    store.branches().create("MAIN/B").unwrap();

    edit(&store, &concepts, "MAIN/A", vec![Concept::new("1", "from A")]);
    edit(&store, &concepts, "MAIN/B", vec![Concept::new("1", "from B")]);

    assert_eq!(terms_on(&store, &concepts, "MAIN/A", "1"), vec!["from A"]);
    assert_eq!(terms_on(&store, &concepts, "MAIN/B", "1"), vec!["from B"]);
    assert_eq!(terms_on(&store, &concepts, "MAIN", "1"), vec!["base"]);
}

#[test]
fn test_deep_hierarchy_criteria() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let concepts = DocumentCollection::new();

    let mut path = String::from("MAIN");
    store.branches().create(&path).unwrap();
    edit(&store, &concepts, &path, vec![Concept::new("root", "at root")]);
    for depth in 1..=6 {
        path = format!("{}/L{}", path, depth);
        store.branches().create(&path).unwrap();
    }

    let criteria = store.criteria().branch_criteria(&path).unwrap();
    assert_eq!(criteria.levels().len(), 7);
    assert_eq!(terms_on(&store, &concepts, &path, "root"), vec!["at root"]);
}

#[test]
fn test_reopen_after_writes() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig {
        path: dir.path().join("store"),
        ..Default::default()
    };

    {
        let store = Store::open_or_create(config.clone()).unwrap();
        let concepts = DocumentCollection::new();
        store.branches().create("MAIN").unwrap();
        store.branches().create("MAIN/A").unwrap();
        edit(&store, &concepts, "MAIN/A", vec![Concept::new("1", "persisted")]);
        store.save_collection("concepts", &concepts).unwrap();
    }

    let store = Store::open_or_create(config).unwrap();
    let concepts: DocumentCollection<Concept> = store.load_collection("concepts").unwrap();
    assert_eq!(concepts.len(), 1);
    assert_eq!(terms_on(&store, &concepts, "MAIN/A", "1"), vec!["persisted"]);

    // Timepoints keep moving forward after reopening.
    let head = store.branches().require_latest("MAIN/A").unwrap().head;
    let t = edit(&store, &concepts, "MAIN/A", vec![Concept::new("1", "again")]);
    assert!(t > head);

    let empty: DocumentCollection<Concept> = store.load_collection("descriptions").unwrap();
    assert!(empty.is_empty());
}

#[test]
fn test_find_children_and_all() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);

    for path in ["MAIN", "MAIN/B", "MAIN/A", "MAIN/A/A1", "MAIN/C"] {
        store.branches().create(path).unwrap();
    }

    let children: Vec<String> = store
        .branches()
        .find_children("MAIN/A")
        .unwrap()
        .into_iter()
        .map(|b| b.path)
        .collect();
    assert_eq!(children, vec!["MAIN/A/A1"]);

    let all: Vec<String> = store
        .branches()
        .find_all()
        .unwrap()
        .into_iter()
        .map(|b| b.path)
        .collect();
    assert_eq!(all, vec!["MAIN", "MAIN/A", "MAIN/A/A1", "MAIN/B", "MAIN/C"]);
}

#[test]
fn test_commit_events_for_subtree() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let concepts = DocumentCollection::new();

    store.branches().create("MAIN").unwrap();
    let handle = store.branches().subscribe(SubscriptionConfig {
        filter: EventFilter::under("MAIN/A"),
        ..Default::default()
    });

    store.branches().create("MAIN/A").unwrap();
    store.branches().create("MAIN/B").unwrap();
    let t = edit(&store, &concepts, "MAIN/A", vec![Concept::new("1", "x")]);
    edit(&store, &concepts, "MAIN/B", vec![Concept::new("1", "y")]);

    let created = handle.recv_timeout(Duration::from_millis(100)).unwrap();
    assert!(matches!(created, BranchEvent::BranchCreated { ref path, .. } if path == "MAIN/A"));

    let completed = handle.recv_timeout(Duration::from_millis(100)).unwrap();
    assert_eq!(
        completed,
        BranchEvent::CommitCompleted {
            path: "MAIN/A".into(),
            timepoint: t,
            commit_type: CommitType::Content,
            source: None,
        }
    );
    assert!(handle.try_recv().is_err());
}

#[test]
fn test_lock_holds_branch_quiescent() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    store.branches().create("MAIN").unwrap();

    let handle = store.branches().subscribe(SubscriptionConfig {
        filter: EventFilter::all(),
        ..Default::default()
    });

    store.branches().lock_branch("MAIN").unwrap();
    assert!(store.branches().open_commit("MAIN", CommitType::Content).is_err());
    store.branches().unlock("MAIN").unwrap();
    let commit = store.branches().open_commit("MAIN", CommitType::Content).unwrap();
    store.branches().complete_commit(&commit).unwrap();

    let events: Vec<BranchEvent> = handle.receiver.try_iter().collect();
    assert_eq!(events.len(), 4);
    assert_eq!(
        events[1],
        BranchEvent::BranchUnlocked {
            path: "MAIN".into(),
            forced: false
        }
    );
}

#[test]
fn test_branch_state_current_detects_review_staleness() {
    let dir = TempDir::new().unwrap();
    let store = test_store(&dir);
    let concepts = DocumentCollection::new();

    store.branches().create("MAIN").unwrap();
    store.branches().create("MAIN/A").unwrap();
    let reviewed = store.branches().require_latest("MAIN/A").unwrap();

    assert!(store
        .branches()
        .is_branch_state_current("MAIN/A", reviewed.base, reviewed.head)
        .unwrap());

    edit(&store, &concepts, "MAIN/A", vec![Concept::new("1", "x")]);
    assert!(!store
        .branches()
        .is_branch_state_current("MAIN/A", reviewed.base, reviewed.head)
        .unwrap());
}
