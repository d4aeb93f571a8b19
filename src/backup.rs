use anyhow::{anyhow, Context};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const DB_FILE_NAME: &str = "club.sqlite3";
const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/club.sqlite3";
const META_WORKSPACE_ENTRY: &str = "meta/workspace.json";
pub const BUNDLE_FORMAT_V1: &str = "clubd-workspace-v1";
pub const RAW_SQLITE_FORMAT: &str = "raw-sqlite3";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    /// Checksum of the restored database file.
    pub db_sha256: String,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE_NAME);
    if !db_path.is_file() {
        return Err(anyhow!(
            "workspace database not found: {}",
            db_path.to_string_lossy()
        ));
    }
    let db_bytes = std::fs::read(&db_path)
        .with_context(|| format!("failed to read database {}", db_path.to_string_lossy()))?;
    let db_sha256 = sha256_hex(&db_bytes);

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": chrono::Utc::now().to_rfc3339(),
        "dbSha256": db_sha256,
    });
    write_json_entry(&mut zip, MANIFEST_ENTRY, &manifest, opts)?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    zip.write_all(&db_bytes)
        .context("failed to write database entry")?;

    let workspace_meta = json!({
        "sourceWorkspace": workspace_path.to_string_lossy(),
    });
    write_json_entry(&mut zip, META_WORKSPACE_ENTRY, &workspace_meta, opts)?;

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count: 3,
        db_sha256,
    })
}

fn write_json_entry(
    zip: &mut ZipWriter<File>,
    name: &str,
    value: &serde_json::Value,
    opts: FileOptions,
) -> anyhow::Result<()> {
    zip.start_file(name, opts)
        .with_context(|| format!("failed to start {name} entry"))?;
    let text = serde_json::to_string_pretty(value)
        .with_context(|| format!("failed to serialize {name}"))?;
    zip.write_all(text.as_bytes())
        .with_context(|| format!("failed to write {name} entry"))?;
    Ok(())
}

/// Restores `club.sqlite3` into `workspace_path` from a bundle, or from a bare
/// SQLite copy. Bundles whose database does not match the manifest checksum
/// are rejected before the existing database is touched.
pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace_path.to_string_lossy()
        )
    })?;
    let dst = workspace_path.join(DB_FILE_NAME);

    if !is_zip_file(in_path)? {
        let bytes = std::fs::read(in_path)
            .with_context(|| format!("failed to read {}", in_path.to_string_lossy()))?;
        if !bytes.starts_with(b"SQLite format 3\0") {
            return Err(anyhow!(
                "not a workspace bundle or SQLite database: {}",
                in_path.to_string_lossy()
            ));
        }
        replace_db(workspace_path, &dst, &bytes)?;
        return Ok(ImportSummary {
            bundle_format_detected: RAW_SQLITE_FORMAT.to_string(),
            db_sha256: sha256_hex(&bytes),
        });
    }

    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT_V1 {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }
    let expected_sha = manifest
        .get("dbSha256")
        .and_then(|v| v.as_str())
        .context("manifest.json missing dbSha256")?
        .to_ascii_lowercase();

    let mut db_bytes = Vec::new();
    archive
        .by_name(DB_ENTRY)
        .context("bundle missing db/club.sqlite3")?
        .read_to_end(&mut db_bytes)
        .context("failed to extract database entry")?;
    let actual_sha = sha256_hex(&db_bytes);
    if actual_sha != expected_sha {
        return Err(anyhow!(
            "database checksum mismatch: manifest {}, bundle {}",
            expected_sha,
            actual_sha
        ));
    }

    replace_db(workspace_path, &dst, &db_bytes)?;

    Ok(ImportSummary {
        bundle_format_detected: BUNDLE_FORMAT_V1.to_string(),
        db_sha256: actual_sha,
    })
}

fn replace_db(workspace_path: &Path, dst: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let tmp_dst = workspace_path.join(format!("{DB_FILE_NAME}.importing"));
    if tmp_dst.exists() {
        let _ = std::fs::remove_file(&tmp_dst);
    }
    let mut db_out = File::create(&tmp_dst).with_context(|| {
        format!(
            "failed to create temp database {}",
            tmp_dst.to_string_lossy()
        )
    })?;
    db_out
        .write_all(bytes)
        .and_then(|()| db_out.flush())
        .context("failed to write extracted database")?;
    drop(db_out);

    if dst.exists() {
        std::fs::remove_file(dst).with_context(|| {
            format!(
                "failed to remove existing database {}",
                dst.to_string_lossy()
            )
        })?;
    }
    std::fs::rename(&tmp_dst, dst).with_context(|| {
        format!(
            "failed to move extracted database to {}",
            dst.to_string_lossy()
        )
    })?;
    Ok(())
}

fn is_zip_file(path: &Path) -> anyhow::Result<bool> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut sig = [0u8; 4];
    let read = f.read(&mut sig).context("failed to read file signature")?;
    if read < 4 {
        return Ok(false);
    }
    Ok(sig == [0x50, 0x4B, 0x03, 0x04])
}
