use recap::core::store::Store;
use recap::plugins::capsule::{CapsuleDraft, CapsuleStore};
use recap::plugins::registry::{Registry, search_all};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tempfile::{TempDir, tempdir};

// Registry state lives under RECAP_HOME; serialize tests so each one gets a
// private user directory.
static ENV_LOCK: Mutex<()> = Mutex::new(());

fn isolated_home() -> (TempDir, MutexGuard<'static, ()>) {
    let guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let home = tempdir().unwrap();
    unsafe {
        std::env::set_var("RECAP_HOME", home.path());
    }
    (home, guard)
}

fn init_project(root: &Path) -> CapsuleStore {
    let store = Store::project(root);
    let capsule_store = CapsuleStore::open(&store);
    capsule_store.init().unwrap();
    capsule_store
}

fn draft(summary: &str) -> CapsuleDraft {
    CapsuleDraft {
        summary: summary.to_string(),
        message: None,
        tags: vec![],
        files_changed: vec![],
        markers: vec![],
        reference: recap::core::changes::VcsReference::Commit {
            id: "feedface".to_string(),
        },
    }
}

#[test]
fn test_register_is_idempotent() {
    let (_home, _guard) = isolated_home();
    let project = tempdir().unwrap();

    let registry = Registry::open().unwrap();
    registry.register(project.path()).unwrap();
    registry.register(project.path()).unwrap();

    let roots = registry.registered_roots().unwrap();
    assert_eq!(roots, vec![project.path().to_path_buf()]);
}

#[test]
fn test_remove_is_explicit_and_final() {
    let (_home, _guard) = isolated_home();
    let project = tempdir().unwrap();

    let registry = Registry::open().unwrap();
    registry.register(project.path()).unwrap();
    registry.remove(project.path()).unwrap();
    assert!(registry.registered_roots().unwrap().is_empty());
}

#[test]
fn test_list_recomputes_counts_from_each_store() {
    let (_home, _guard) = isolated_home();
    let project = tempdir().unwrap();
    let store = init_project(project.path());
    store.append_new(draft("one")).unwrap();
    store.append_new(draft("two")).unwrap();

    let registry = Registry::open().unwrap();
    registry.register(project.path()).unwrap();

    let workspaces = registry.list().unwrap();
    assert_eq!(workspaces.len(), 1);
    assert_eq!(workspaces[0].capsule_count, 2);
    assert!(workspaces[0].last_activity.is_some());
}

#[test]
fn test_list_drops_externally_deleted_stores() {
    let (_home, _guard) = isolated_home();
    let project = tempdir().unwrap();
    init_project(project.path());

    let registry = Registry::open().unwrap();
    registry.register(project.path()).unwrap();

    fs::remove_dir_all(project.path().join(".recap")).unwrap();
    let workspaces = registry.list().unwrap();
    assert!(workspaces.is_empty());
}

#[test]
fn test_discover_finds_exactly_the_initialized_projects() {
    let (_home, _guard) = isolated_home();
    let scan_root = tempdir().unwrap();

    let a = scan_root.path().join("alpha");
    let b = scan_root.path().join("nested").join("beta");
    let plain = scan_root.path().join("plain");
    fs::create_dir_all(&a).unwrap();
    fs::create_dir_all(&b).unwrap();
    fs::create_dir_all(&plain).unwrap();
    init_project(&a);
    init_project(&b);

    // A project inside a project must not be discovered separately.
    let inner = a.join("vendored");
    fs::create_dir_all(&inner).unwrap();
    init_project(&inner);

    let registry = Registry::open().unwrap();
    let outcome = registry
        .discover(&[scan_root.path().to_path_buf()], 5)
        .unwrap();

    assert_eq!(outcome.found, vec![a.clone(), b.clone()]);
    assert!(outcome.warnings.is_empty());

    let mut registered = registry.registered_roots().unwrap();
    registered.sort();
    assert_eq!(registered, vec![a, b]);
}

#[test]
fn test_discover_respects_depth_bound() {
    let (_home, _guard) = isolated_home();
    let scan_root = tempdir().unwrap();

    let deep = scan_root.path().join("a").join("b").join("c").join("d");
    fs::create_dir_all(&deep).unwrap();
    init_project(&deep);

    let registry = Registry::open().unwrap();
    let shallow = registry
        .discover(&[scan_root.path().to_path_buf()], 2)
        .unwrap();
    assert!(shallow.found.is_empty());

    let full = registry
        .discover(&[scan_root.path().to_path_buf()], 6)
        .unwrap();
    assert_eq!(full.found, vec![deep]);
}

#[test]
fn test_select_context_is_latest_first_and_bounded() {
    let (_home, _guard) = isolated_home();
    let project = tempdir().unwrap();
    let store = init_project(project.path());
    for i in 1..=5 {
        store.append_new(draft(&format!("session {}", i))).unwrap();
    }

    let context = recap::plugins::registry::select_context(&store, None, 3).unwrap();
    let ids: Vec<u64> = context.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![5, 4, 3]);

    let filtered =
        recap::plugins::registry::select_context(&store, Some("session 2"), 10).unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].id, 2);
}

#[test]
fn test_search_all_isolates_per_store_failures() {
    let (_home, _guard) = isolated_home();
    let healthy = tempdir().unwrap();
    let corrupt = tempdir().unwrap();

    let store = init_project(healthy.path());
    store.append_new(draft("JWT Authentication added")).unwrap();

    let corrupt_store = init_project(corrupt.path());
    corrupt_store.append_new(draft("auth work")).unwrap();
    fs::write(corrupt_store.log_path(), "{broken\n").unwrap();

    let registry = Registry::open().unwrap();
    registry.register(healthy.path()).unwrap();
    registry.register(corrupt.path()).unwrap();

    let results = search_all(&registry, "auth").unwrap();
    assert_eq!(results.len(), 2);

    let by_path = |p: &Path| results.iter().find(|(root, _)| root == p).unwrap();
    assert_eq!(by_path(healthy.path()).1.as_ref().unwrap().len(), 1);
    assert!(by_path(corrupt.path()).1.is_err());
}
