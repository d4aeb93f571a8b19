#[path = "../src/backup.rs"]
mod backup;

use std::fs::File;
use std::io::{Read, Write};

fn scratch() -> tempfile::TempDir {
    tempfile::tempdir().expect("tempdir")
}

#[test]
fn zip_export_and_import_roundtrip() {
    let workspace = scratch();
    let workspace2 = scratch();
    let out_dir = scratch();

    let bytes = b"SQLite format 3\0club-test-payload";
    std::fs::write(workspace.path().join("club.sqlite3"), bytes).expect("write source db");

    let bundle_path = out_dir.path().join("workspace.clubbackup.zip");
    let export =
        backup::export_workspace_bundle(workspace.path(), &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT_V1);
    assert_eq!(export.entry_count, 3);
    assert_eq!(export.db_sha256, backup::sha256_hex(bytes));

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    assert!(manifest.contains(backup::BUNDLE_FORMAT_V1));
    assert!(manifest.contains(&export.db_sha256));
    archive
        .by_name("db/club.sqlite3")
        .expect("database entry in bundle");

    let import = backup::import_workspace_bundle(&bundle_path, workspace2.path())
        .expect("import bundle");
    assert_eq!(import.bundle_format_detected, backup::BUNDLE_FORMAT_V1);
    assert_eq!(import.db_sha256, export.db_sha256);

    let restored = std::fs::read(workspace2.path().join("club.sqlite3")).expect("read restored db");
    assert_eq!(restored, bytes);
}

#[test]
fn tampered_bundle_is_rejected_and_leaves_db_alone() {
    let out_dir = scratch();
    let workspace = scratch();
    let existing = b"SQLite format 3\0existing";
    std::fs::write(workspace.path().join("club.sqlite3"), existing).expect("write existing db");

    let bundle_path = out_dir.path().join("tampered.zip");
    {
        let f = File::create(&bundle_path).expect("create bundle");
        let mut zip = zip::ZipWriter::new(f);
        let opts = zip::write::FileOptions::default();
        zip.start_file("manifest.json", opts).expect("manifest");
        write!(
            zip,
            "{{\"format\":\"{}\",\"version\":1,\"dbSha256\":\"{}\"}}",
            backup::BUNDLE_FORMAT_V1,
            backup::sha256_hex(b"something else")
        )
        .expect("write manifest");
        zip.start_file("db/club.sqlite3", opts).expect("db entry");
        zip.write_all(b"SQLite format 3\0swapped").expect("write db");
        zip.finish().expect("finish");
    }

    let err = backup::import_workspace_bundle(&bundle_path, workspace.path())
        .expect_err("checksum mismatch");
    assert!(err.to_string().contains("checksum mismatch"), "{err}");
    let kept = std::fs::read(workspace.path().join("club.sqlite3")).expect("read db");
    assert_eq!(kept, existing);
}

#[test]
fn raw_sqlite_import_is_supported() {
    let out_dir = scratch();
    let workspace = scratch();

    let raw_file = out_dir.path().join("copy.sqlite3");
    let bytes = b"SQLite format 3\0raw-copy";
    std::fs::write(&raw_file, bytes).expect("write raw sqlite file");

    let import =
        backup::import_workspace_bundle(&raw_file, workspace.path()).expect("import raw sqlite");
    assert_eq!(import.bundle_format_detected, backup::RAW_SQLITE_FORMAT);

    let restored = std::fs::read(workspace.path().join("club.sqlite3")).expect("read restored");
    assert_eq!(restored, bytes);

    let junk = out_dir.path().join("notes.txt");
    std::fs::write(&junk, b"hello there").expect("write junk");
    assert!(backup::import_workspace_bundle(&junk, workspace.path()).is_err());
}
