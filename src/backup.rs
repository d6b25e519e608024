use crate::db::DB_FILE;
use anyhow::{anyhow, Context};
use rusqlite::{Connection, OpenFlags};
use serde_json::json;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::info;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/coursebook.sqlite3";
const META_WORKSPACE_ENTRY: &str = "meta/workspace.json";
pub const BUNDLE_FORMAT: &str = "coursebook-workspace-v1";
pub const RAW_SQLITE_FORMAT: &str = "raw-sqlite3";
const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// Tables a database must carry before it is allowed to replace a workspace.
const REQUIRED_TABLES: [&str; 5] = [
    "courses",
    "enrollments",
    "attendance_sessions",
    "submissions",
    "course_grades",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkspaceCounts {
    pub courses: i64,
    pub enrollments: i64,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub counts: WorkspaceCounts,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    pub counts: WorkspaceCounts,
}

/// Open `path` read-only, check it is a coursebook database, and count rows.
fn inspect_db(path: &Path) -> anyhow::Result<WorkspaceCounts> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("failed to open database {}", path.to_string_lossy()))?;
    for table in REQUIRED_TABLES {
        let present: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            [table],
            |r| r.get(0),
        )?;
        if present == 0 {
            return Err(anyhow!("database is missing table {}", table));
        }
    }
    let courses = conn.query_row("SELECT COUNT(*) FROM courses", [], |r| r.get(0))?;
    let enrollments = conn.query_row("SELECT COUNT(*) FROM enrollments", [], |r| r.get(0))?;
    Ok(WorkspaceCounts {
        courses,
        enrollments,
    })
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE);
    if !db_path.is_file() {
        return Err(anyhow!(
            "workspace database not found: {}",
            db_path.to_string_lossy()
        ));
    }
    let counts = inspect_db(&db_path)?;

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let out_file = File::create(out_path)
        .with_context(|| format!("failed to create output file {}", out_path.to_string_lossy()))?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": BUNDLE_FORMAT,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": crate::db::ts(chrono::Utc::now()),
        "counts": {
            "courses": counts.courses,
            "enrollments": counts.enrollments,
        },
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(serde_json::to_string_pretty(&manifest)?.as_bytes())
        .context("failed to write manifest entry")?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    let mut db_file = File::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?;
    std::io::copy(&mut db_file, &mut zip).context("failed to write database entry")?;

    zip.start_file(META_WORKSPACE_ENTRY, opts)
        .context("failed to start workspace metadata entry")?;
    let workspace_meta = json!({ "sourceWorkspace": workspace_path.to_string_lossy() });
    zip.write_all(serde_json::to_string_pretty(&workspace_meta)?.as_bytes())
        .context("failed to write workspace metadata entry")?;

    zip.finish().context("failed to finalize zip bundle")?;
    info!(
        out = %out_path.to_string_lossy(),
        courses = counts.courses,
        enrollments = counts.enrollments,
        "workspace bundle exported"
    );

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT.to_string(),
        entry_count: 3,
        counts,
    })
}

/// Restore a bundle (or a bare sqlite file) into `workspace_path`.
///
/// The incoming database is staged next to the live one and only swapped in
/// after it passes `inspect_db`, so a bad bundle leaves the workspace as it was.
pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!("failed to create workspace {}", workspace_path.to_string_lossy())
    })?;
    let dst = workspace_path.join(DB_FILE);
    let staged = workspace_path.join(format!("{}.importing", DB_FILE));
    if staged.exists() {
        let _ = std::fs::remove_file(&staged);
    }

    let format = match stage_input(in_path, &staged) {
        Ok(f) => f,
        Err(e) => {
            let _ = std::fs::remove_file(&staged);
            return Err(e);
        }
    };

    let counts = match inspect_db(&staged) {
        Ok(c) => c,
        Err(e) => {
            let _ = std::fs::remove_file(&staged);
            return Err(e.context("imported database failed validation"));
        }
    };

    // rename replaces dst in one step; the old database stays until then.
    std::fs::rename(&staged, &dst)
        .with_context(|| format!("failed to move staged database to {}", dst.to_string_lossy()))?;

    info!(path = %in_path.to_string_lossy(), format, "workspace restored");
    Ok(ImportSummary {
        bundle_format_detected: format.to_string(),
        counts,
    })
}

/// Copy the database out of `in_path` into `staged`, returning the detected format.
fn stage_input(in_path: &Path, staged: &Path) -> anyhow::Result<&'static str> {
    if is_zip_file(in_path)? {
        extract_bundle_db(in_path, staged)?;
        Ok(BUNDLE_FORMAT)
    } else if is_sqlite_file(in_path)? {
        std::fs::copy(in_path, staged).with_context(|| {
            format!("failed to stage sqlite database {}", in_path.to_string_lossy())
        })?;
        Ok(RAW_SQLITE_FORMAT)
    } else {
        Err(anyhow!(
            "not a workspace bundle or sqlite database: {}",
            in_path.to_string_lossy()
        ))
    }
}

fn extract_bundle_db(in_path: &Path, staged: &Path) -> anyhow::Result<()> {
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
    if format != BUNDLE_FORMAT {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }

    let mut db_out = File::create(staged)
        .with_context(|| format!("failed to create staged database {}", staged.to_string_lossy()))?;
    let mut db_entry = archive
        .by_name(DB_ENTRY)
        .with_context(|| format!("bundle missing {}", DB_ENTRY))?;
    std::io::copy(&mut db_entry, &mut db_out).context("failed to extract database entry")?;
    db_out.flush().context("failed to flush staged database")?;
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

fn is_sqlite_file(path: &Path) -> anyhow::Result<bool> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut header = [0u8; 16];
    match f.read_exact(&mut header) {
        Ok(()) => Ok(&header == SQLITE_MAGIC),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e).context("failed to read file header"),
    }
}
