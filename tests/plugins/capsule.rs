use chrono::{Duration, TimeZone, Utc};
use recap::core::changes::{ChangeStatus, FileChange, VcsReference};
use recap::core::error::RecapError;
use recap::core::markers::Marker;
use recap::core::store::Store;
use recap::plugins::capsule::{Capsule, CapsuleDraft, CapsuleStore, ListFilter};
use std::fs;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::tempdir;

fn init_store(root: &std::path::Path) -> CapsuleStore {
    let store = Store::project(root);
    let capsule_store = CapsuleStore::open(&store);
    capsule_store.init().unwrap();
    capsule_store
}

fn draft(summary: &str, tags: &[&str]) -> CapsuleDraft {
    CapsuleDraft {
        summary: summary.to_string(),
        message: None,
        tags: tags.iter().map(|t| t.to_string()).collect(),
        files_changed: vec![FileChange {
            path: "src/lib.rs".to_string(),
            status: ChangeStatus::Modified,
            lines_added: Some(4),
            lines_removed: Some(1),
        }],
        markers: vec![Marker {
            file: "src/lib.rs".to_string(),
            line: 7,
            text: "tighten errors".to_string(),
        }],
        reference: VcsReference::Commit {
            id: "deadbeef".to_string(),
        },
    }
}

fn sealed(id: u64, created_at: chrono::DateTime<Utc>, summary: &str, tags: &[&str]) -> Capsule {
    let d = draft(summary, tags);
    let mut capsule = Capsule {
        id,
        created_at,
        summary: d.summary,
        message: d.message,
        tags: d.tags,
        files_changed: d.files_changed,
        markers: d.markers,
        reference: d.reference,
        content_hash: String::new(),
    };
    capsule.content_hash = capsule.computed_hash_hex();
    capsule
}

#[test]
fn test_append_then_get_returns_equal_capsule() {
    let tmp = tempdir().unwrap();
    let store = init_store(tmp.path());

    let capsule = store.append_new(draft("first session", &["setup"])).unwrap();
    let loaded = store.get(capsule.id).unwrap();
    assert_eq!(loaded, capsule);
}

#[test]
fn test_ids_strictly_increasing_and_gapless() {
    let tmp = tempdir().unwrap();
    let store = init_store(tmp.path());

    for expected in 1..=5u64 {
        let capsule = store.append_new(draft("session", &[])).unwrap();
        assert_eq!(capsule.id, expected);
    }
}

#[test]
fn test_duplicate_id_rejected() {
    let tmp = tempdir().unwrap();
    let store = init_store(tmp.path());
    store.append_new(draft("one", &[])).unwrap();
    store.append_new(draft("two", &[])).unwrap();

    let stale = sealed(2, Utc::now(), "colliding", &[]);
    match store.append(&stale) {
        Err(RecapError::DuplicateId { id, .. }) => assert_eq!(id, 2),
        other => panic!("expected DuplicateId, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_durability_across_store_reopen() {
    let tmp = tempdir().unwrap();
    let capsule = {
        let store = init_store(tmp.path());
        store.append_new(draft("durable", &["bugfix"])).unwrap()
    };

    // Fresh handle over the same directory, as after a process restart.
    let store = CapsuleStore::open(&Store::project(tmp.path()));
    let loaded = store.get(capsule.id).unwrap();
    assert_eq!(loaded, capsule);
}

#[test]
fn test_index_rebuilds_from_log_after_db_loss() {
    let tmp = tempdir().unwrap();
    let store = init_store(tmp.path());
    for _ in 0..3 {
        store.append_new(draft("session", &[])).unwrap();
    }

    // Simulate abrupt termination that took the index with it.
    fs::remove_file(store.db_path()).unwrap();

    let store = CapsuleStore::open(&Store::project(tmp.path()));
    let all = store.list(&ListFilter::default()).unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all.last().unwrap().id, 3);
}

#[test]
fn test_explicit_rebuild_reports_count() {
    let tmp = tempdir().unwrap();
    let store = init_store(tmp.path());
    store.append_new(draft("a", &[])).unwrap();
    store.append_new(draft("b", &[])).unwrap();
    assert_eq!(store.rebuild().unwrap(), 2);
}

#[test]
fn test_list_tag_filter_preserves_ascending_ids() {
    let tmp = tempdir().unwrap();
    let store = init_store(tmp.path());
    store.append_new(draft("one", &["bugfix"])).unwrap();
    store.append_new(draft("two", &["feature"])).unwrap();
    store.append_new(draft("three", &["bugfix", "auth"])).unwrap();

    let filter = ListFilter {
        tags: vec!["bugfix".to_string()],
        ..Default::default()
    };
    let hits = store.list(&filter).unwrap();
    let ids: Vec<u64> = hits.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![1, 3]);
}

#[test]
fn test_list_time_range_is_inclusive() {
    let tmp = tempdir().unwrap();
    let store = init_store(tmp.path());

    let day = |d: u32| Utc.with_ymd_and_hms(2026, 3, d, 12, 0, 0).unwrap();
    store.append(&sealed(1, day(1), "first", &[])).unwrap();
    store.append(&sealed(2, day(2), "second", &[])).unwrap();
    store.append(&sealed(3, day(3), "third", &[])).unwrap();

    let filter = ListFilter {
        since: Some(day(2)),
        until: Some(day(3)),
        tags: vec![],
    };
    let ids: Vec<u64> = store.list(&filter).unwrap().iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![2, 3]);
}

#[test]
fn test_search_is_case_insensitive_and_recent_first() {
    let tmp = tempdir().unwrap();
    let store = init_store(tmp.path());

    let base = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
    store
        .append(&sealed(1, base, "JWT Authentication added", &[]))
        .unwrap();
    store
        .append(&sealed(2, base + Duration::days(1), "docs pass", &[]))
        .unwrap();
    store
        .append(&sealed(
            3,
            base + Duration::days(2),
            "auth refresh token fix",
            &["auth"],
        ))
        .unwrap();

    let hits = store.search("auth").unwrap();
    let ids: Vec<u64> = hits.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![3, 1]);
}

#[test]
fn test_search_matches_message_and_tags() {
    let tmp = tempdir().unwrap();
    let store = init_store(tmp.path());

    let mut d = draft("unrelated summary", &["Backend"]);
    d.message = Some("fixing the LOGIN flow".to_string());
    store.append_new(d).unwrap();

    assert_eq!(store.search("login").unwrap().len(), 1);
    assert_eq!(store.search("backend").unwrap().len(), 1);
    assert!(store.search("frontend").unwrap().is_empty());
}

#[test]
fn test_tags_deduplicated_on_seal() {
    let tmp = tempdir().unwrap();
    let store = init_store(tmp.path());
    let capsule = store
        .append_new(draft("tagged", &["auth", "auth", "bugfix"]))
        .unwrap();
    assert_eq!(capsule.tags, vec!["auth", "bugfix"]);
}

#[test]
fn test_last_reference_tracks_newest_capsule() {
    let tmp = tempdir().unwrap();
    let store = init_store(tmp.path());
    assert!(store.last_reference().unwrap().is_none());

    store.append_new(draft("one", &[])).unwrap();
    let mut d = draft("two", &[]);
    d.reference = VcsReference::Commit {
        id: "cafebabe".to_string(),
    };
    store.append_new(d).unwrap();

    assert_eq!(
        store.last_reference().unwrap(),
        Some(VcsReference::Commit {
            id: "cafebabe".to_string()
        })
    );
}

#[test]
fn test_concurrent_appends_never_collide_or_lose_capsules() {
    let tmp = tempdir().unwrap();
    init_store(tmp.path());

    let n = 8;
    let barrier = Arc::new(Barrier::new(n));
    let root = tmp.path().to_path_buf();
    let handles: Vec<_> = (0..n)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            let root = root.clone();
            thread::spawn(move || {
                let store = CapsuleStore::open(&Store::project(&root));
                barrier.wait();
                store.append_new(draft("racing", &[])).unwrap().id
            })
        })
        .collect();

    let mut ids: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), n);

    let store = CapsuleStore::open(&Store::project(tmp.path()));
    assert_eq!(store.count().unwrap(), n as u64);
}

#[test]
fn test_corrupt_log_line_surfaces_store_corrupt() {
    let tmp = tempdir().unwrap();
    let store = init_store(tmp.path());
    store.append_new(draft("good", &[])).unwrap();

    let mut raw = fs::read_to_string(store.log_path()).unwrap();
    raw.push_str("{not json\n");
    fs::write(store.log_path(), raw).unwrap();

    match store.read_log() {
        Err(RecapError::StoreCorrupt { detail, .. }) => {
            assert!(detail.contains(":2"), "detail should locate the record: {}", detail)
        }
        other => panic!("expected StoreCorrupt, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_tampered_record_fails_hash_check() {
    let tmp = tempdir().unwrap();
    let store = init_store(tmp.path());
    store.append_new(draft("honest summary", &[])).unwrap();

    let raw = fs::read_to_string(store.log_path()).unwrap();
    let tampered = raw.replace("honest summary", "revised history");
    fs::write(store.log_path(), tampered).unwrap();

    assert!(matches!(
        store.read_log(),
        Err(RecapError::StoreCorrupt { .. })
    ));
}

#[test]
fn test_cleanup_removes_only_old_capsules() {
    let tmp = tempdir().unwrap();
    let store = init_store(tmp.path());

    let old = Utc::now() - Duration::days(60);
    store.append(&sealed(1, old, "ancient", &[])).unwrap();
    store.append_new(draft("recent", &[])).unwrap();

    let cutoff = Utc::now() - Duration::days(30);
    assert_eq!(store.cleanup_before(cutoff, true).unwrap(), 1);
    // Dry run removed nothing.
    assert_eq!(store.count().unwrap(), 2);

    assert_eq!(store.cleanup_before(cutoff, false).unwrap(), 1);
    let remaining = store.list(&ListFilter::default()).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].summary, "recent");
}

#[test]
fn test_get_unknown_id_is_not_found() {
    let tmp = tempdir().unwrap();
    let store = init_store(tmp.path());
    assert!(matches!(store.get(42), Err(RecapError::NotFound(_))));
}
