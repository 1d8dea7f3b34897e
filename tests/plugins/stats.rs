use chrono::{TimeZone, Utc};
use recap::core::changes::{ChangeStatus, FileChange, VcsReference};
use recap::core::markers::Marker;
use recap::core::store::Store;
use recap::plugins::capsule::{Capsule, CapsuleStore};
use recap::plugins::stats::stats;
use tempfile::tempdir;

fn init_store(root: &std::path::Path) -> CapsuleStore {
    let store = Store::project(root);
    let capsule_store = CapsuleStore::open(&store);
    capsule_store.init().unwrap();
    capsule_store
}

fn change(path: &str, added: u64, removed: u64) -> FileChange {
    FileChange {
        path: path.to_string(),
        status: ChangeStatus::Modified,
        lines_added: Some(added),
        lines_removed: Some(removed),
    }
}

fn capsule(id: u64, files: Vec<FileChange>, tags: &[&str], hour: u32) -> Capsule {
    let mut c = Capsule {
        id,
        // 2026-03-02 is a Monday.
        created_at: Utc.with_ymd_and_hms(2026, 3, 2, hour, 0, 0).unwrap(),
        summary: "session".to_string(),
        message: None,
        tags: tags.iter().map(|t| t.to_string()).collect(),
        files_changed: files,
        markers: vec![Marker {
            file: "src/lib.rs".to_string(),
            line: 1,
            text: "note".to_string(),
        }],
        reference: VcsReference::Commit {
            id: "feedface".to_string(),
        },
        content_hash: String::new(),
    };
    c.content_hash = c.computed_hash_hex();
    c
}

#[test]
fn test_empty_store_yields_zeroed_report() {
    let tmp = tempdir().unwrap();
    let store = init_store(tmp.path());

    let report = stats(&store).unwrap();
    assert_eq!(report.session_count, 0);
    assert_eq!(report.files_changed_total, 0);
    assert_eq!(report.lines_added_total, 0);
    assert_eq!(report.marker_count, 0);
    assert!(report.per_file_change_count.is_empty());
    assert!(report.tag_distribution.is_empty());
    assert_eq!(report.activity_by_weekday_hour[0][0], 0);
}

#[test]
fn test_counts_and_orderings() {
    let tmp = tempdir().unwrap();
    let store = init_store(tmp.path());

    store
        .append(&capsule(
            1,
            vec![change("src/auth.rs", 10, 2), change("src/db.rs", 3, 0)],
            &["auth"],
            9,
        ))
        .unwrap();
    store
        .append(&capsule(
            2,
            vec![change("src/auth.rs", 5, 5)],
            &["auth", "bugfix"],
            14,
        ))
        .unwrap();

    let report = stats(&store).unwrap();
    assert_eq!(report.session_count, 2);
    assert_eq!(report.files_changed_total, 3);
    assert_eq!(report.lines_added_total, 18);
    assert_eq!(report.lines_removed_total, 7);
    assert_eq!(report.marker_count, 2);

    assert_eq!(
        report.per_file_change_count,
        vec![("src/auth.rs".to_string(), 2), ("src/db.rs".to_string(), 1)]
    );
    assert_eq!(
        report.tag_distribution,
        vec![("auth".to_string(), 2), ("bugfix".to_string(), 1)]
    );

    // Both sessions landed on a Monday, at 09:00 and 14:00.
    assert_eq!(report.activity_by_weekday_hour[0][9], 1);
    assert_eq!(report.activity_by_weekday_hour[0][14], 1);
}

#[test]
fn test_binary_files_do_not_contribute_line_counts() {
    let tmp = tempdir().unwrap();
    let store = init_store(tmp.path());

    let mut c = capsule(1, vec![], &[], 10);
    c.files_changed = vec![FileChange {
        path: "assets/logo.png".to_string(),
        status: ChangeStatus::Added,
        lines_added: None,
        lines_removed: None,
    }];
    c.content_hash = c.computed_hash_hex();
    store.append(&c).unwrap();

    let report = stats(&store).unwrap();
    assert_eq!(report.files_changed_total, 1);
    assert_eq!(report.lines_added_total, 0);
    assert_eq!(report.lines_removed_total, 0);
}
