//! Plugin database lifecycle: one SQLite file per (plugin, version), wiped
//! and recreated whenever the computed schema ordinal disagrees with the
//! stored one. The scheduler keeps its own bookkeeping (schema ordinal and
//! cursor) in an `indexer_meta` table inside the plugin's database so the
//! cursor commits atomically with the plugin's derived rows.

use std::path::Path;

use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbBackend, DbErr, Statement};
use sha3::{Digest, Keccak256};

use super::plugin::IndexerPlugin;

/// Folded into every schema ordinal; bump when the scheduler-side format of
/// streamed data changes in a way that invalidates derived rows.
pub const CORE_SCHEMA_VERSION: u32 = 1;

const META_SCHEMA_ORDINAL: &str = "schema_ordinal";
const META_CURSOR: &str = "cursor";

pub fn file_name(name: &str, version: u32, has_debug: bool) -> String {
    if has_debug {
        format!("indexing_{name}_v{version}.db")
    } else {
        format!("indexing_{name}_v{version}_nodebug.db")
    }
}

/// Keccak-256 over (plugin name, plugin version, core schema version),
/// truncated to 8 bytes.
pub fn schema_ordinal(name: &str, version: u32) -> i64 {
    let mut hasher = Keccak256::new();
    hasher.update(name.as_bytes());
    hasher.update([0]);
    hasher.update(version.to_be_bytes());
    hasher.update([0]);
    hasher.update(CORE_SCHEMA_VERSION.to_be_bytes());
    let digest = hasher.finalize();
    i64::from_be_bytes(digest[..8].try_into().expect("keccak digest is 32 bytes"))
}

/// Resolves the plugin's database: removes databases of other versions,
/// opens (creating if needed) the current one, and wipes + reinitializes it
/// when the stored schema ordinal disagrees with the computed one.
pub async fn open_or_reset<P: IndexerPlugin>(
    chain_dir: &Path,
    plugin: &P,
    has_debug: bool,
) -> anyhow::Result<DatabaseConnection> {
    std::fs::create_dir_all(chain_dir)?;
    remove_stale_versions(chain_dir, plugin.name(), plugin.version(), has_debug)?;

    let path = chain_dir.join(file_name(plugin.name(), plugin.version(), has_debug));
    let expected = schema_ordinal(plugin.name(), plugin.version());

    let mut db = connect(&path).await?;
    let stored = get_meta(&db, META_SCHEMA_ORDINAL).await?;
    if stored != Some(expected) {
        if stored.is_some() {
            tracing::warn!(
                plugin = plugin.name(),
                version = plugin.version(),
                "schema ordinal changed, wiping plugin database"
            );
            db.close().await?;
            remove_database_files(&path)?;
            db = connect(&path).await?;
        }
        plugin.initialize(&db).await?;
        set_meta(&db, META_SCHEMA_ORDINAL, expected).await?;
    }
    Ok(db)
}

pub async fn get_cursor(db: &impl ConnectionTrait) -> Result<i64, DbErr> {
    Ok(get_meta(db, META_CURSOR).await?.unwrap_or(-1))
}

pub async fn set_cursor(db: &impl ConnectionTrait, cursor: i64) -> Result<(), DbErr> {
    set_meta(db, META_CURSOR, cursor).await
}

async fn connect(path: &Path) -> Result<DatabaseConnection, DbErr> {
    let db = Database::connect(format!("sqlite://{}?mode=rwc", path.display())).await?;
    db.execute(Statement::from_string(
        DbBackend::Sqlite,
        "PRAGMA journal_mode = WAL".to_owned(),
    ))
    .await?;
    db.execute(Statement::from_string(
        DbBackend::Sqlite,
        r#"CREATE TABLE IF NOT EXISTS "indexer_meta" (
            "name" TEXT PRIMARY KEY,
            "value" BIGINT NOT NULL
        )"#
        .to_owned(),
    ))
    .await?;
    Ok(db)
}

async fn get_meta(db: &impl ConnectionTrait, name: &str) -> Result<Option<i64>, DbErr> {
    let row = db
        .query_one(Statement::from_sql_and_values(
            DbBackend::Sqlite,
            r#"SELECT "value" FROM "indexer_meta" WHERE "name" = ?"#,
            [name.into()],
        ))
        .await?;
    row.map(|row| row.try_get::<i64>("", "value")).transpose()
}

async fn set_meta(db: &impl ConnectionTrait, name: &str, value: i64) -> Result<(), DbErr> {
    db.execute(Statement::from_sql_and_values(
        DbBackend::Sqlite,
        r#"INSERT INTO "indexer_meta" ("name", "value") VALUES (?, ?)
           ON CONFLICT("name") DO UPDATE SET "value" = excluded."value""#,
        [name.into(), value.into()],
    ))
    .await?;
    Ok(())
}

/// Deletes databases left behind by other versions of the same plugin.
fn remove_stale_versions(
    chain_dir: &Path,
    name: &str,
    version: u32,
    has_debug: bool,
) -> std::io::Result<()> {
    let prefix = format!("indexing_{name}_v");
    let current = file_name(name, version, has_debug);
    for entry in std::fs::read_dir(chain_dir)? {
        let entry = entry?;
        let file = entry.file_name();
        let Some(file) = file.to_str() else { continue };
        if file.starts_with(&prefix) && !file.starts_with(&current) {
            tracing::info!(file, "removing stale plugin database");
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

fn remove_database_files(path: &Path) -> std::io::Result<()> {
    std::fs::remove_file(path)?;
    for suffix in ["-wal", "-shm"] {
        let mut sidecar = path.as_os_str().to_owned();
        sidecar.push(suffix);
        match std::fs::remove_file(Path::new(&sidecar)) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
