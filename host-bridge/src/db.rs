use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// One result row, column name to JSON value
pub type DbRow = Map<String, Value>;

/// What the interpreter needs from an external data connection: run a query,
/// hand back rows, report failure, and shut down cleanly.
#[async_trait]
pub trait QueryBackend: Send + Sync {
	async fn query(&self, sql: &str) -> Result<Vec<DbRow>>;

	async fn close(&self);
}

// ============================================================================
// DATABASE DRIVER - Native driver with runtime dispatch
// ============================================================================

/// Native database driver
/// Dispatches to PostgreSQL, MySQL, or SQLite based on connection URL
#[derive(Clone)]
pub enum DatabaseDriver {
	Postgres(PgPool),
	MySql(MySqlPool),
	Sqlite(SqlitePool),
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
	pub database_url: String,
	#[serde(default = "default_max_connections")]
	pub max_connections: u32,
	#[serde(default = "default_connection_timeout")]
	pub connection_timeout: u64,
}

fn default_max_connections() -> u32 {
	5
}

fn default_connection_timeout() -> u64 {
	10000 // 10 seconds
}

impl DbConfig {
	pub fn new(database_url: impl Into<String>) -> Self {
		Self {
			database_url: database_url.into(),
			max_connections: default_max_connections(),
			connection_timeout: default_connection_timeout(),
		}
	}

	/// Build a MySQL URL from the discrete fields of a `mysql:` block.
	/// User, password and database are percent-encoded.
	pub fn mysql(host: &str, user: &str, password: &str, database: &str) -> Result<Self> {
		let mut url = Url::parse(&format!("mysql://{}/", host))
			.map_err(|e| anyhow::anyhow!("Invalid MySQL host '{}': {}", host, e))?;
		url.set_username(user)
			.map_err(|_| anyhow::anyhow!("Invalid MySQL user for host '{}'", host))?;
		if !password.is_empty() {
			url.set_password(Some(password))
				.map_err(|_| anyhow::anyhow!("Invalid MySQL password for host '{}'", host))?;
		}
		url.path_segments_mut()
			.map_err(|_| anyhow::anyhow!("Invalid MySQL host '{}'", host))?
			.pop_if_empty()
			.push(database);
		Ok(Self::new(url.as_str()))
	}

	pub fn with_max_connections(mut self, max_connections: u32) -> Self {
		self.max_connections = max_connections;
		self
	}
}

impl DatabaseDriver {
	/// Connect to a database based on the URL scheme
	pub async fn connect(config: &DbConfig) -> Result<Self> {
		let url = config.database_url.as_str();
		let timeout = Duration::from_millis(config.connection_timeout);

		if url.starts_with("postgres://") || url.starts_with("postgresql://") {
			let pool = PgPoolOptions::new()
				.max_connections(config.max_connections)
				.acquire_timeout(timeout)
				.connect(url)
				.await?;
			Ok(Self::Postgres(pool))
		} else if url.starts_with("mysql://") || url.starts_with("mariadb://") {
			let pool = MySqlPoolOptions::new()
				.max_connections(config.max_connections)
				.acquire_timeout(timeout)
				.connect(url)
				.await?;
			Ok(Self::MySql(pool))
		} else if url.starts_with("sqlite://") || url.starts_with("sqlite:") {
			let pool = SqlitePoolOptions::new()
				.max_connections(config.max_connections)
				.acquire_timeout(timeout)
				.connect(url)
				.await?;
			Ok(Self::Sqlite(pool))
		} else {
			Err(anyhow::anyhow!(
				"Unsupported database URL scheme. Supported: postgres://, mysql://, sqlite://"
			))
		}
	}

	fn row_to_json_postgres(row: &PgRow) -> DbRow {
		let mut map = Map::new();

		for (i, column) in row.columns().iter().enumerate() {
			let value = match column.type_info().name() {
				"BOOL" => row.try_get::<bool, _>(i).map(|v| json!(v)),
				"INT2" => row.try_get::<i16, _>(i).map(|v| json!(v)),
				"INT4" => row.try_get::<i32, _>(i).map(|v| json!(v)),
				"INT8" => row.try_get::<i64, _>(i).map(|v| json!(v)),
				"FLOAT4" => row.try_get::<f32, _>(i).map(|v| json!(v)),
				"FLOAT8" => row.try_get::<f64, _>(i).map(|v| json!(v)),
				"JSON" | "JSONB" => row.try_get::<Value, _>(i),
				_ => row.try_get::<String, _>(i).map(|v| json!(v)),
			};
			map.insert(column.name().to_string(), value.unwrap_or(Value::Null));
		}

		map
	}

	fn row_to_json_mysql(row: &MySqlRow) -> DbRow {
		let mut map = Map::new();

		for (i, column) in row.columns().iter().enumerate() {
			let value = match column.type_info().name() {
				// MySQL stores booleans as TINYINT(1)
				"BOOLEAN" | "TINYINT(1)" | "BOOL" => row
					.try_get::<bool, _>(i)
					.or_else(|_| row.try_get::<i8, _>(i).map(|v| v != 0))
					.map(|v| json!(v)),
				"TINYINT" => row.try_get::<i8, _>(i).map(|v| json!(v)),
				"SMALLINT" => row.try_get::<i16, _>(i).map(|v| json!(v)),
				"INT" | "INTEGER" | "MEDIUMINT" => row.try_get::<i32, _>(i).map(|v| json!(v)),
				"BIGINT" => row.try_get::<i64, _>(i).map(|v| json!(v)),
				"FLOAT" => row.try_get::<f32, _>(i).map(|v| json!(v)),
				"DOUBLE" => row.try_get::<f64, _>(i).map(|v| json!(v)),
				"JSON" => row.try_get::<Value, _>(i),
				_ => row.try_get::<String, _>(i).map(|v| json!(v)),
			};
			map.insert(column.name().to_string(), value.unwrap_or(Value::Null));
		}

		map
	}

	fn row_to_json_sqlite(row: &SqliteRow) -> DbRow {
		let mut map = Map::new();

		for (i, column) in row.columns().iter().enumerate() {
			// SQLite is dynamically typed, so probe the value itself
			let value = if let Ok(v) = row.try_get::<i64, _>(i) {
				json!(v)
			} else if let Ok(v) = row.try_get::<f64, _>(i) {
				json!(v)
			} else if let Ok(v) = row.try_get::<String, _>(i) {
				json!(v)
			} else {
				Value::Null
			};
			map.insert(column.name().to_string(), value);
		}

		map
	}
}

#[async_trait]
impl QueryBackend for DatabaseDriver {
	async fn query(&self, sql: &str) -> Result<Vec<DbRow>> {
		debug!("query: {}", sql);
		let rows: Vec<DbRow> = match self {
			Self::Postgres(pool) => sqlx::query(sql)
				.fetch_all(pool)
				.await?
				.iter()
				.map(Self::row_to_json_postgres)
				.collect(),
			Self::MySql(pool) => sqlx::query(sql)
				.fetch_all(pool)
				.await?
				.iter()
				.map(Self::row_to_json_mysql)
				.collect(),
			Self::Sqlite(pool) => sqlx::query(sql)
				.fetch_all(pool)
				.await?
				.iter()
				.map(Self::row_to_json_sqlite)
				.collect(),
		};
		Ok(rows)
	}

	async fn close(&self) {
		match self {
			Self::Postgres(pool) => pool.close().await,
			Self::MySql(pool) => pool.close().await,
			Self::Sqlite(pool) => pool.close().await,
		}
	}
}
