// ABOUTME: Integration tests for the git-backed definition store
// ABOUTME: Round trips, optimistic concurrency, deletes, listings, history and concurrent bootstrap

use corral_core::{ErrorKind, Revision};
use corral_state::{CommitAuthor, DefinitionStore, StateError};
use pretty_assertions::assert_eq;
use rstest::rstest;
use tempfile::TempDir;

fn store() -> (TempDir, DefinitionStore) {
    let dir = TempDir::new().unwrap();
    let store = DefinitionStore::new(dir.path(), CommitAuthor::new("Test", "test@example.com"));
    (dir, store)
}

const GREETING_DIFF: &str = "\
diff --git a/greeting.txt b/greeting.txt
--- a/greeting.txt
+++ b/greeting.txt
@@ -1,2 +1,2 @@
 Hello
-World
+Ada
";

#[rstest]
#[case("app_definition.yaml", b"appId: demo\nname: Demo\n".to_vec())]
#[case("components/greeter/prompt.txt", b"Hello, {name}!".to_vec())]
#[case("blobs/raw.bin", vec![0u8, 159, 146, 150, 255])]
#[tokio::test]
async fn test_write_then_read_returns_exact_bytes(#[case] path: &str, #[case] content: Vec<u8>) {
    let (_dir, store) = store();

    let revision = store
        .write_file("demo", path, content.clone(), "Write file", None)
        .await
        .unwrap();

    let read = store.read_file("demo", path, Some(&revision)).await.unwrap();
    assert_eq!(read, content);

    let at_head = store.read_file("demo", path, None).await.unwrap();
    assert_eq!(at_head, content);
    assert_eq!(store.head_revision("demo").await.unwrap(), Some(revision));
}

#[tokio::test]
async fn test_bootstrap_creates_baseline_commit() {
    let (dir, store) = store();
    store
        .write_file("demo", "a.txt", b"a".to_vec(), "Add a", None)
        .await
        .unwrap();

    let gitignore = store.read_file("demo", ".gitignore", None).await.unwrap();
    assert_eq!(gitignore, b"runtime/*\n");
    assert!(dir.path().join("demo").join("a.txt").exists());

    let history = store.history("demo", None, 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].message, "Add a");
    assert_eq!(
        history[1].message,
        "Initial commit for application demo definition state"
    );
}

#[tokio::test]
async fn test_apply_diff_against_head() {
    let (_dir, store) = store();
    let base = store
        .write_file("demo", "greeting.txt", b"Hello\nWorld\n".to_vec(), "Add greeting", None)
        .await
        .unwrap();

    let revision = store
        .apply_diff("demo", "greeting.txt", GREETING_DIFF, &base, "Greet Ada", None)
        .await
        .unwrap();

    assert_ne!(revision, base);
    let content = store.read_file("demo", "greeting.txt", None).await.unwrap();
    assert_eq!(content, b"Hello\nAda\n");
}

#[tokio::test]
async fn test_apply_plain_unified_diff() {
    let (_dir, store) = store();
    let base = store
        .write_file("demo", "greeting.txt", b"Hello\nWorld\n".to_vec(), "Add greeting", None)
        .await
        .unwrap();

    let plain = "--- a/greeting.txt\n+++ b/greeting.txt\n@@ -1,2 +1,2 @@\n Hello\n-World\n+Ada\n";
    store
        .apply_diff("demo", "greeting.txt", plain, &base, "Greet Ada", None)
        .await
        .unwrap();

    let content = store.read_file("demo", "greeting.txt", None).await.unwrap();
    assert_eq!(content, b"Hello\nAda\n");
}

#[tokio::test]
async fn test_stale_diff_conflicts_and_leaves_head_unchanged() {
    let (_dir, store) = store();
    let stale = store
        .write_file("demo", "greeting.txt", b"Hello\nWorld\n".to_vec(), "Add greeting", None)
        .await
        .unwrap();
    let head = store
        .write_file("demo", "other.txt", b"x".to_vec(), "Unrelated change", None)
        .await
        .unwrap();

    let err = store
        .apply_diff("demo", "greeting.txt", GREETING_DIFF, &stale, "Greet Ada", None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(store.head_revision("demo").await.unwrap(), Some(head));
    assert_eq!(
        store.read_file("demo", "greeting.txt", None).await.unwrap(),
        b"Hello\nWorld\n"
    );
}

#[tokio::test]
async fn test_unclean_diff_conflicts_without_partial_apply() {
    let (_dir, store) = store();
    let base = store
        .write_file("demo", "greeting.txt", b"Hi\nthere\n".to_vec(), "Add greeting", None)
        .await
        .unwrap();

    let err = store
        .apply_diff("demo", "greeting.txt", GREETING_DIFF, &base, "Greet Ada", None)
        .await
        .unwrap_err();

    assert!(matches!(err, StateError::Conflict(_)));
    assert_eq!(store.head_revision("demo").await.unwrap(), Some(base));
}

#[tokio::test]
async fn test_diff_outside_path_is_rejected() {
    let (_dir, store) = store();
    let base = store
        .write_file("demo", "greeting.txt", b"Hello\nWorld\n".to_vec(), "Add greeting", None)
        .await
        .unwrap();

    let err = store
        .apply_diff("demo", "other.txt", GREETING_DIFF, &base, "Sneaky", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = store
        .apply_diff("demo", "greeting.txt", "not a diff", &base, "Garbage", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_delete_missing_file_is_not_found_without_new_revision() {
    let (_dir, store) = store();
    let head = store
        .write_file("demo", "a.txt", b"a".to_vec(), "Add a", None)
        .await
        .unwrap();

    let err = store
        .delete_file("demo", "missing.txt", "Remove missing", None)
        .await
        .unwrap_err();

    assert!(matches!(err, StateError::NotFound(_)));
    assert_eq!(store.head_revision("demo").await.unwrap(), Some(head));
}

#[tokio::test]
async fn test_delete_keeps_history_readable() {
    let (_dir, store) = store();
    let before = store
        .write_file("demo", "a.txt", b"a".to_vec(), "Add a", None)
        .await
        .unwrap();
    store.delete_file("demo", "a.txt", "Remove a", None).await.unwrap();

    assert!(matches!(
        store.read_file("demo", "a.txt", None).await,
        Err(StateError::NotFound(_))
    ));
    assert_eq!(
        store.read_file("demo", "a.txt", Some(&before)).await.unwrap(),
        b"a"
    );
}

#[tokio::test]
async fn test_list_directory_is_ordered() {
    let (_dir, store) = store();
    for path in ["components/b.yaml", "components/a.yaml", "components/nested/c.yaml"] {
        store
            .write_file("demo", path, b"x".to_vec(), "Add component", None)
            .await
            .unwrap();
    }

    let flat = store
        .list_directory("demo", "components", false, None)
        .await
        .unwrap();
    let paths: Vec<_> = flat.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(
        paths,
        vec!["components/a.yaml", "components/b.yaml", "components/nested"]
    );
    assert!(flat[2].is_directory);

    let deep = store
        .list_directory("demo", "components", true, None)
        .await
        .unwrap();
    let paths: Vec<_> = deep.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "components/a.yaml",
            "components/b.yaml",
            "components/nested",
            "components/nested/c.yaml"
        ]
    );

    assert!(matches!(
        store.list_directory("demo", "missing", false, None).await,
        Err(StateError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_history_filters_by_path() {
    let (_dir, store) = store();
    store
        .write_file("demo", "a.txt", b"1".to_vec(), "a v1", None)
        .await
        .unwrap();
    store
        .write_file("demo", "b.txt", b"1".to_vec(), "b v1", None)
        .await
        .unwrap();
    store
        .write_file(
            "demo",
            "a.txt",
            b"2".to_vec(),
            "a v2",
            Some(CommitAuthor::new("Ada", "ada@example.com")),
        )
        .await
        .unwrap();

    let history = store.history("demo", Some("a.txt"), 10).await.unwrap();
    let messages: Vec<_> = history.iter().map(|c| c.message.as_str()).collect();
    assert_eq!(messages, vec!["a v2", "a v1"]);
    assert_eq!(history[0].author, "Ada");

    assert_eq!(store.history("demo", None, 2).await.unwrap().len(), 2);
}

#[rstest]
#[case("../escape.txt")]
#[case("/etc/passwd")]
#[case("")]
#[tokio::test]
async fn test_paths_cannot_escape_repository(#[case] path: &str) {
    let (_dir, store) = store();
    let err = store
        .write_file("demo", path, b"x".to_vec(), "Escape", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_invalid_app_id_and_revision() {
    let (_dir, store) = store();
    assert!(matches!(
        store.write_file("..", "a.txt", b"x".to_vec(), "Nope", None).await,
        Err(StateError::Validation(_))
    ));

    store
        .write_file("demo", "a.txt", b"x".to_vec(), "Add a", None)
        .await
        .unwrap();
    assert!(matches!(
        store
            .read_file("demo", "a.txt", Some(&Revision::new("not-a-revision")))
            .await,
        Err(StateError::InvalidRevision(_))
    ));
}

#[tokio::test]
async fn test_unknown_app_reads_not_found() {
    let (_dir, store) = store();
    assert!(matches!(
        store.read_file("ghost", "a.txt", None).await,
        Err(StateError::NotFound(_))
    ));
    assert_eq!(store.head_revision("ghost").await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_writers_share_one_repository() {
    let (_dir, store) = store();

    let mut handles = Vec::new();
    for i in 0..4 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .write_file(
                    "fresh",
                    &format!("file-{}.txt", i),
                    format!("{}", i).into_bytes(),
                    &format!("Write {}", i),
                    None,
                )
                .await
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let history = store.history("fresh", None, 100).await.unwrap();
    assert_eq!(history.len(), 5);

    let files = store.list_directory("fresh", "", false, None).await.unwrap();
    assert_eq!(files.len(), 5);
}
