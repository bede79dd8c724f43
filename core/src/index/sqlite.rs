use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sp_utils::canonicalize;
use sqlx::{
	sqlite::{SqliteConnectOptions, SqlitePoolOptions},
	FromRow, SqlitePool,
};
use tracing::{debug, instrument};

use super::{IndexError, PathIndex, PathIndexRecord};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS worktree (
	id         TEXT PRIMARY KEY NOT NULL,
	name       TEXT NOT NULL,
	mime_type  TEXT NOT NULL,
	created_at TEXT,
	changed_at TEXT,
	is_dir     INTEGER NOT NULL DEFAULT 0,
	parent     TEXT,
	full_path  TEXT NOT NULL UNIQUE
)";

#[derive(FromRow)]
struct WorktreeRow {
	id: String,
	name: String,
	mime_type: String,
	created_at: Option<DateTime<Utc>>,
	changed_at: Option<DateTime<Utc>>,
	is_dir: bool,
	parent: Option<String>,
	full_path: String,
}

impl From<WorktreeRow> for PathIndexRecord {
	fn from(row: WorktreeRow) -> Self {
		Self {
			id: row.id,
			name: row.name,
			mime_type: row.mime_type,
			created_at: row.created_at,
			changed_at: row.changed_at,
			is_dir: row.is_dir,
			parent: row.parent,
			full_path: PathBuf::from(row.full_path),
		}
	}
}

/// Index persisted in a SQLite `worktree` table
#[derive(Clone, Debug)]
pub struct SqlitePathIndex {
	pool: SqlitePool,
}

impl SqlitePathIndex {
	/// Opens (creating if needed) the database file at `path`.
	pub async fn open(path: impl AsRef<Path>) -> Result<Self, IndexError> {
		let options = SqliteConnectOptions::new()
			.filename(path.as_ref())
			.create_if_missing(true);

		Self::with_pool(SqlitePoolOptions::new().connect_with(options).await?).await
	}

	/// Uses an existing pool, creating the schema if missing.
	pub async fn with_pool(pool: SqlitePool) -> Result<Self, IndexError> {
		sqlx::query(SCHEMA).execute(&pool).await?;

		Ok(Self { pool })
	}
}

#[async_trait]
impl PathIndex for SqlitePathIndex {
	#[instrument(skip_all, fields(id = %record.id), err)]
	async fn upsert(&self, record: PathIndexRecord) -> Result<(), IndexError> {
		let full_path = canonicalize(&record.full_path)?
			.to_string_lossy()
			.into_owned();

		let mut tx = self.pool.begin().await?;

		// A path belongs to a single remote object
		sqlx::query("DELETE FROM worktree WHERE full_path = ? AND id != ?")
			.bind(full_path.as_str())
			.bind(&record.id)
			.execute(&mut *tx)
			.await?;

		sqlx::query(
			"INSERT INTO worktree (id, name, mime_type, created_at, changed_at, is_dir, parent, full_path)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?)
			ON CONFLICT(id) DO UPDATE SET
				name = excluded.name,
				mime_type = excluded.mime_type,
				created_at = excluded.created_at,
				changed_at = excluded.changed_at,
				is_dir = excluded.is_dir,
				parent = excluded.parent,
				full_path = excluded.full_path",
		)
		.bind(&record.id)
		.bind(&record.name)
		.bind(&record.mime_type)
		.bind(record.created_at)
		.bind(record.changed_at)
		.bind(record.is_dir)
		.bind(&record.parent)
		.bind(full_path.as_str())
		.execute(&mut *tx)
		.await?;

		tx.commit().await?;

		debug!(full_path = %full_path, "Upserted path index record;");

		Ok(())
	}

	async fn delete(&self, id: &str) -> Result<(), IndexError> {
		sqlx::query("DELETE FROM worktree WHERE id = ?")
			.bind(id)
			.execute(&self.pool)
			.await?;

		Ok(())
	}

	async fn get_id_by_path(&self, path: &Path) -> Result<Option<String>, IndexError> {
		let path = canonicalize(path)?;

		sqlx::query_scalar("SELECT id FROM worktree WHERE full_path = ?")
			.bind(path.to_string_lossy().into_owned())
			.fetch_optional(&self.pool)
			.await
			.map_err(Into::into)
	}

	async fn get_by_id(&self, id: &str) -> Result<Option<PathIndexRecord>, IndexError> {
		Ok(sqlx::query_as::<_, WorktreeRow>(
			"SELECT id, name, mime_type, created_at, changed_at, is_dir, parent, full_path
			FROM worktree WHERE id = ?",
		)
		.bind(id)
		.fetch_optional(&self.pool)
		.await?
		.map(Into::into))
	}
}
