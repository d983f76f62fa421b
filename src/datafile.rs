//! JSON Data Files
//!
//! Backing storage for `webAPI` declarations: each file holds a JSON array of
//! objects carrying an integer `id`. Appends are read-modify-write and are
//! serialized per file so two concurrent POSTs never draw the same id.

use crate::error::{HttpError, RuntimeError, RuntimeResult};
use dashmap::DashMap;
use host_bridge::FsBridge;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Data files of one workspace
pub struct DataStore {
    fs: FsBridge,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl DataStore {
    pub fn new(fs: FsBridge) -> Self {
        Self {
            fs,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, path: &str) -> Arc<Mutex<()>> {
        self.locks.entry(path.to_string()).or_default().clone()
    }

    /// Every record in `path`; an absent file reads as empty. Waits for any
    /// append in progress on the same file.
    pub async fn read_all(&self, path: &str) -> RuntimeResult<Vec<Value>> {
        let lock = self.lock_for(path);
        let _guard = lock.lock().await;
        self.read_unlocked(path).await
    }

    async fn read_unlocked(&self, path: &str) -> RuntimeResult<Vec<Value>> {
        if !self.fs.is_file(path).await {
            return Ok(Vec::new());
        }
        let text = self.fs.read_to_string(path).await?;
        serde_json::from_str(&text)
            .map_err(|e| RuntimeError::config(format!("{} is not a JSON array: {}", path, e)))
    }

    /// The record whose `id` equals `id`
    pub async fn find(&self, path: &str, id: &str) -> RuntimeResult<Option<Value>> {
        let records = self.read_all(path).await?;
        Ok(records.into_iter().find(|record| id_matches(record, id)))
    }

    /// Assign the next id, stamp `author` when given, append and rewrite
    /// the file. Returns the stored record.
    pub async fn append(
        &self,
        path: &str,
        mut record: Map<String, Value>,
        author: Option<&str>,
    ) -> RuntimeResult<Value> {
        let lock = self.lock_for(path);
        let _guard = lock.lock().await;

        let mut records = self.read_unlocked(path).await?;
        let id = next_id(&records);
        record.insert("id".to_string(), Value::from(id));
        if let Some(author) = author {
            record.insert("author".to_string(), Value::from(author));
        }
        let record = Value::Object(record);
        records.push(record.clone());

        let text = serde_json::to_string_pretty(&records)
            .map_err(|e| RuntimeError::config(e.to_string()))?;
        self.fs.write_file(path, &text).await?;
        debug!("Appended record {} to {}", id, path);

        Ok(record)
    }
}

/// One past the largest integer `id`, or 1 for an empty array
pub fn next_id(records: &[Value]) -> i64 {
    records
        .iter()
        .filter_map(|r| r.get("id").and_then(Value::as_i64))
        .max()
        .map_or(1, |max| max + 1)
}

/// Numeric ids compare by value, so `042` finds `42`; string ids compare
/// as written.
fn id_matches(record: &Value, id: &str) -> bool {
    match record.get("id") {
        Some(Value::Number(n)) => match (n.as_f64(), id.parse::<f64>()) {
            (Some(stored), Ok(requested)) => stored == requested,
            _ => false,
        },
        Some(Value::String(s)) => s == id,
        _ => false,
    }
}

/// Parse a POST body into the object to store
pub fn parse_record(body: &[u8]) -> Result<Map<String, Value>, HttpError> {
    match serde_json::from_slice(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(HttpError::internal_error("request body must be a JSON object")),
        Err(e) => Err(HttpError::internal_error(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> DataStore {
        DataStore::new(FsBridge::with_sandbox(dir.path()))
    }

    fn record(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_next_id() {
        assert_eq!(next_id(&[]), 1);
        assert_eq!(next_id(&[json!({"id": 5})]), 6);
        assert_eq!(next_id(&[json!({"id": 2}), json!({"id": 9}), json!({"x": 1})]), 10);
    }

    #[tokio::test]
    async fn test_missing_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        assert!(store(&dir).read_all("news.json").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_assigns_sequential_ids() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.fs.write_file("news.json", "[]").await.unwrap();

        let first = store.append("news.json", record(json!({"title": "a"})), None).await.unwrap();
        let second = store
            .append("news.json", record(json!({"title": "b"})), Some("u-1"))
            .await
            .unwrap();

        assert_eq!(first["id"], 1);
        assert_eq!(second["id"], 2);
        assert_eq!(second["author"], "u-1");
        assert!(first.get("author").is_none());

        let all = store.read_all("news.json").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(store.find("news.json", "2").await.unwrap().unwrap()["title"], "b");
        assert!(store.find("news.json", "3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_appends_get_distinct_ids() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(store(&dir));

        let mut handles = Vec::new();
        for n in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append("data.json", record(json!({ "n": n })), None).await.unwrap()["id"]
                    .as_i64()
                    .unwrap()
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort();
        assert_eq!(ids, (1..=8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_find_compares_numeric_ids_by_value() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .fs
            .write_file("n.json", r#"[{"id": 42, "t": "a"}, {"id": "007", "t": "b"}]"#)
            .await
            .unwrap();

        assert_eq!(store.find("n.json", "042").await.unwrap().unwrap()["t"], "a");
        assert_eq!(store.find("n.json", "42").await.unwrap().unwrap()["t"], "a");
        assert_eq!(store.find("n.json", "007").await.unwrap().unwrap()["t"], "b");
        assert!(store.find("n.json", "7").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reads_during_appends_see_whole_files() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(store(&dir));
        store.fs.write_file("log.json", "[]").await.unwrap();

        let mut handles = Vec::new();
        for n in 0..16 {
            let writer = store.clone();
            handles.push(tokio::spawn(async move {
                let body = record(json!({ "n": n, "pad": "x".repeat(4096) }));
                writer.append("log.json", body, None).await.map(|_| ())
            }));
            let reader = store.clone();
            handles.push(tokio::spawn(async move {
                reader.read_all("log.json").await.map(|_| ())
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(store.read_all("log.json").await.unwrap().len(), 16);
    }

    #[test]
    fn test_parse_record_rejects_non_objects() {
        assert!(parse_record(br#"{"title": "x"}"#).is_ok());
        assert_eq!(parse_record(b"[1]").unwrap_err().status, 500);
        assert_eq!(parse_record(b"{oops").unwrap_err().status, 500);
    }
}
