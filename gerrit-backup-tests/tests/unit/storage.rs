//! Backup targets: key layout, transfer rules and dry-run behavior

use gerrit_backup::storage::{
    build_targets, BackupLayout, BackupTarget, FolderTarget, ObjectStoreTarget, PutOptions, TransferError,
};
use gerrit_backup::CommandName;
use test_utils::{target_context, ConfigBuilder, MockObjectStore, StoreCall, TestContext};

fn object_target(store: &MockObjectStore, builder: &ConfigBuilder) -> BackupTarget {
    let layout = BackupLayout::from_config(&builder.build());
    BackupTarget::ObjectStore(ObjectStoreTarget::new(
        Box::new(store.clone()),
        PutOptions::default(),
        layout,
    ))
}

fn folder_target(builder: &ConfigBuilder) -> BackupTarget {
    let layout = BackupLayout::from_config(&builder.build());
    BackupTarget::Folder(FolderTarget::new(builder.temp_dir().join("backups"), layout))
}

#[test]
fn test_keys_follow_layout() {
    let builder = ConfigBuilder::minimal().with_hostname("gerrit01");
    let target = folder_target(&builder);

    assert_eq!(target.resolve_database_path(), "gerrit01/database/reviewdb.sql.tar.gz");
    assert_eq!(target.resolve_repo_path("org/project"), "gerrit01/repos/org/project.git.tar.gz");
    assert_eq!(target.resolve_repo_list_path(), "gerrit01/repos_list/repos.txt");
}

#[test]
fn test_repo_key_is_stable() {
    let builder = ConfigBuilder::minimal();
    let store = MockObjectStore::new();
    let folder = folder_target(&builder);
    let object = object_target(&store, &builder);

    let first = folder.resolve_repo_path("org/project");
    assert_eq!(first, folder.resolve_repo_path("org/project"));
    assert_eq!(first, object.resolve_repo_path("org/project"));
}

#[test]
fn test_folder_round_trip() {
    let builder = ConfigBuilder::minimal();
    let ctx = TestContext::new();
    let target = folder_target(&builder);
    let ctx_run = target_context(CommandName::Backup, false);

    let local = ctx.create_file("app.git.tar.gz", "archive bytes");
    let key = target.resolve_repo_path("teamA/app");
    target.upload(&key, &local, &ctx_run).unwrap();
    assert!(builder.temp_dir().join("backups").join(&key).is_file());

    let dest = ctx.temp_dir().join("restore/app.git.tar.gz");
    target.download(&key, &dest, &ctx_run).unwrap();
    assert_eq!(std::fs::read_to_string(dest).unwrap(), "archive bytes");
}

#[test]
fn test_missing_source_fails_before_backend_call() {
    let builder = ConfigBuilder::minimal();
    let store = MockObjectStore::new();
    let target = object_target(&store, &builder);
    let ctx = target_context(CommandName::Backup, false);

    let err = target
        .upload("gerrit-test/repos/x.git.tar.gz", &builder.temp_dir().join("absent.tar.gz"), &ctx)
        .unwrap_err();

    assert!(matches!(err, TransferError::SourceMissing(_)));
    assert!(store.get_calls().is_empty());
}

#[test]
fn test_absent_key_is_not_found_and_leaves_no_file() {
    let builder = ConfigBuilder::minimal();
    let ctx = TestContext::new();
    let run = target_context(CommandName::Restore, false);
    let dest = ctx.temp_dir().join("db.tar.gz");

    for target in [folder_target(&builder), object_target(&MockObjectStore::new(), &builder)] {
        let err = target.download("gerrit-test/database/none.tar.gz", &dest, &run).unwrap_err();
        assert!(matches!(err, TransferError::NotFound { .. }), "{}", target.description());
        assert!(!dest.exists());
    }
}

#[test]
fn test_short_write_is_an_integrity_mismatch() {
    let builder = ConfigBuilder::minimal();
    let ctx = TestContext::new();
    let store = MockObjectStore::new().short_writes();
    let target = object_target(&store, &builder);
    let local = ctx.create_file("db.tar.gz", "0123456789");

    let err = target
        .upload("gerrit-test/database/reviewdb.sql.tar.gz", &local, &target_context(CommandName::Backup, false))
        .unwrap_err();

    match err {
        TransferError::IntegrityMismatch { expected, written, .. } => {
            assert_eq!(expected, 10);
            assert_eq!(written, 9);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_download_that_never_lands_is_incomplete() {
    let builder = ConfigBuilder::minimal();
    let ctx = TestContext::new();
    let store = MockObjectStore::new().without_landing();
    store.insert("gerrit-test/repos/a.git.tar.gz", b"data");
    let target = object_target(&store, &builder);

    let err = target
        .download(
            "gerrit-test/repos/a.git.tar.gz",
            &ctx.temp_dir().join("a.git.tar.gz"),
            &target_context(CommandName::Restore, false),
        )
        .unwrap_err();
    assert!(matches!(err, TransferError::Incomplete { .. }));
}

#[test]
fn test_dry_run_touches_nothing() {
    let builder = ConfigBuilder::minimal();
    let store = MockObjectStore::new();
    let target = object_target(&store, &builder);
    let dry = target_context(CommandName::Backup, true);
    let absent = builder.temp_dir().join("absent.tar.gz");

    target.upload("k", &absent, &dry).unwrap();
    target.download("k", &absent, &dry).unwrap();
    assert!(target.list_versions("k", &dry).unwrap().is_empty());

    assert!(store.get_calls().is_empty());
    assert!(!absent.exists());
}

#[test]
fn test_versions_newest_first() {
    let builder = ConfigBuilder::minimal();
    let store = MockObjectStore::new();
    store.insert("gerrit-test/repos/a.git.tar.gz", b"one");
    store.insert("gerrit-test/repos/a.git.tar.gz", b"two");
    let run = target_context(CommandName::GetVersions, false);

    let versions = object_target(&store, &builder)
        .list_versions("gerrit-test/repos/a.git.tar.gz", &run)
        .unwrap();
    assert_eq!(versions, vec!["v2", "v1"]);
    assert_eq!(
        store.get_calls(),
        vec![StoreCall::ListVersions("gerrit-test/repos/a.git.tar.gz".to_string())]
    );

    let folder_versions = folder_target(&builder).list_versions("any", &run).unwrap();
    assert_eq!(folder_versions, vec!["0"]);
}

#[test]
fn test_uploads_carry_put_options() {
    let builder = ConfigBuilder::minimal();
    let ctx = TestContext::new();
    let store = MockObjectStore::new();
    let target = object_target(&store, &builder);
    let local = ctx.create_file("list.txt", "a\n");

    target.upload("gerrit-test/repos_list/repos.txt", &local, &target_context(CommandName::Backup, false)).unwrap();

    match &store.get_calls()[0] {
        StoreCall::Put { key, options } => {
            assert_eq!(key, "gerrit-test/repos_list/repos.txt");
            assert!(options.server_side_encryption);
            assert!(options
                .headers()
                .contains(&("x-amz-server-side-encryption".to_string(), "AES256".to_string())));
        }
        other => panic!("unexpected call: {:?}", other),
    }
}

#[test]
fn test_build_targets_puts_object_store_first() {
    let config = ConfigBuilder::minimal().with_s3_backend("gerrit-backups").build();
    let targets = build_targets(&config).unwrap();

    assert_eq!(targets.len(), 2);
    assert_eq!(targets[0].description(), "S3 Backup (gerrit-backups)");
    assert!(targets[1].description().starts_with("Folder Backup ("));
}
