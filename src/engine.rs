//! Execution engine for compiled queries.
//!
//! Runs a [`CompiledQuery`] against a SQLite store whose tables hold one JSON
//! document per row in a `json_data` column, using sqlx.

use std::sync::Arc;

use serde_json::{Map, Value as Json};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};

use crate::assembler::{CompiledQuery, Compiler, SelectRequest};
use crate::error::{SelectError, SelectResult};

/// A connection pool plus the compiler used for [`Store::select`].
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    compiler: Arc<Compiler>,
}

impl Store {
    /// Connect to a SQLite database.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let store = Store::connect("sqlite://family.db").await?;
    /// ```
    pub async fn connect(url: &str) -> SelectResult<Self> {
        // every connection to an in-memory database is a separate database
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| SelectError::Database(e.to_string()))?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            compiler: Arc::new(Compiler::genealogy()),
        }
    }

    pub fn with_compiler(mut self, compiler: Compiler) -> Self {
        self.compiler = Arc::new(compiler);
        self
    }

    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Execute a compiled query. Single-column rows yield the column value,
    /// wider rows an object keyed by column name.
    pub async fn fetch(&self, query: &CompiledQuery) -> SelectResult<Vec<Json>> {
        let sql = query.to_string();
        tracing::debug!(%sql, "executing");
        let rows: Vec<SqliteRow> = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SelectError::Database(e.to_string()))?;
        rows.iter().map(row_to_json).collect()
    }

    /// Compile and execute a request.
    pub async fn select(&self, request: &SelectRequest) -> SelectResult<Vec<Json>> {
        let query = self.compiler.compile(request)?;
        self.fetch(&query).await
    }
}

fn row_to_json(row: &SqliteRow) -> SelectResult<Json> {
    let columns = row.columns();
    if columns.len() == 1 {
        return column_value(row, 0);
    }
    let mut map = Map::new();
    for (i, column) in columns.iter().enumerate() {
        map.insert(column.name().to_string(), column_value(row, i)?);
    }
    Ok(Json::Object(map))
}

/// Decode one column by the storage class of its value.
fn column_value(row: &SqliteRow, index: usize) -> SelectResult<Json> {
    let db_err = |e: sqlx::Error| SelectError::Database(e.to_string());
    let type_name = {
        let raw = row.try_get_raw(index).map_err(db_err)?;
        if raw.is_null() {
            return Ok(Json::Null);
        }
        raw.type_info().name().to_string()
    };

    let value = match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => {
            let n = row.try_get_unchecked::<i64, _>(index).map_err(db_err)?;
            Json::from(n)
        }
        "REAL" => {
            let x = row.try_get_unchecked::<f64, _>(index).map_err(db_err)?;
            serde_json::Number::from_f64(x)
                .map(Json::Number)
                .unwrap_or(Json::Null)
        }
        _ => {
            let text = row.try_get_unchecked::<String, _>(index).map_err(db_err)?;
            parse_document(text)
        }
    };
    Ok(value)
}

/// JSON objects and arrays come back as text; keep other strings as they are.
fn parse_document(text: String) -> Json {
    if text.starts_with('{') || text.starts_with('[') {
        if let Ok(value) = serde_json::from_str::<Json>(&text) {
            return value;
        }
    }
    Json::String(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn store() -> Store {
        let store = Store::connect("sqlite::memory:").await.unwrap();
        for table in ["person", "family"] {
            sqlx::query(&format!(
                "CREATE TABLE {} (handle TEXT PRIMARY KEY, json_data TEXT)",
                table
            ))
            .execute(store.pool())
            .await
            .unwrap();
        }
        let people = [
            json!({"handle": "P1", "gramps_id": "I0001", "gender": 1,
                   "primary_name": {"first_name": "John"},
                   "event_ref_list": [{"ref": "E1", "role": 1}, {"ref": "E2", "role": 7}]}),
            json!({"handle": "P2", "gramps_id": "I0002", "gender": 0,
                   "primary_name": {"first_name": "Mary"},
                   "event_ref_list": []}),
        ];
        for person in &people {
            sqlx::query("INSERT INTO person (handle, json_data) VALUES (?, ?)")
                .bind(person["handle"].as_str().unwrap())
                .bind(person.to_string())
                .execute(store.pool())
                .await
                .unwrap();
        }
        let family = json!({"handle": "F1", "father_handle": "P1", "mother_handle": "P2", "type": 0});
        sqlx::query("INSERT INTO family (handle, json_data) VALUES (?, ?)")
            .bind("F1")
            .bind(family.to_string())
            .execute(store.pool())
            .await
            .unwrap();
        store
    }

    #[test]
    fn test_parse_document() {
        assert_eq!(parse_document("{\"a\": 1}".into()), json!({"a": 1}));
        assert_eq!(parse_document("I0001".into()), json!("I0001"));
        assert_eq!(parse_document("[broken".into()), json!("[broken"));
    }

    #[tokio::test]
    async fn test_select_documents() {
        let store = store().await;
        let rows = store
            .select(&SelectRequest::new("person").filter("person.gender == Person.MALE"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["gramps_id"], json!("I0001"));
    }

    #[tokio::test]
    async fn test_select_fields_ordered() {
        let store = store().await;
        let rows = store
            .select(
                &SelectRequest::new("person")
                    .what("person.primary_name.first_name")
                    .order_by("-person.gramps_id"),
            )
            .await
            .unwrap();
        assert_eq!(rows, vec![json!("Mary"), json!("John")]);
    }

    #[tokio::test]
    async fn test_select_join() {
        let store = store().await;
        let rows = store
            .select(
                &SelectRequest::new("person")
                    .what("person.gramps_id")
                    .filter("family.father_handle == person.handle"),
            )
            .await
            .unwrap();
        assert_eq!(rows, vec![json!("I0001")]);
    }

    #[tokio::test]
    async fn test_select_array_membership() {
        let store = store().await;
        let rows = store
            .select(
                &SelectRequest::new("person")
                    .what("person.gramps_id")
                    .filter("item in person.event_ref_list and item.role == 7"),
            )
            .await
            .unwrap();
        assert_eq!(rows, vec![json!("I0001")]);
    }

    #[tokio::test]
    async fn test_select_union() {
        let store = store().await;
        let rows = store
            .select(
                &SelectRequest::new("person")
                    .what("person.gramps_id")
                    .filter("person.gender == 0 or item in person.event_ref_list"),
            )
            .await
            .unwrap();
        let mut ids: Vec<&str> = rows.iter().filter_map(|r| r.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["I0001", "I0002"]);
    }

    #[tokio::test]
    async fn test_select_union_ordered() {
        let store = store().await;
        let rows = store
            .select(
                &SelectRequest::new("person")
                    .what("person.gramps_id")
                    .filter("person.gender == 0 or item in person.event_ref_list")
                    .order_by("-person.gramps_id"),
            )
            .await
            .unwrap();
        assert_eq!(rows, vec![json!("I0002"), json!("I0001")]);

        let rows = store
            .select(
                &SelectRequest::new("person")
                    .what_many(["person.gramps_id", "family.handle"])
                    .filter(
                        "family.father_handle == person.handle and \
                         (person.gender == 0 or item in person.event_ref_list)",
                    )
                    .order_by("person.gramps_id"),
            )
            .await
            .unwrap();
        assert_eq!(rows, vec![json!({"_col_0": "I0001", "_col_1": "F1"})]);
    }

    #[tokio::test]
    async fn test_select_comprehension_and_exists() {
        let store = store().await;
        let rows = store
            .select(
                &SelectRequest::new("person")
                    .what("[e.ref for e in person.event_ref_list if e.role == 1]"),
            )
            .await
            .unwrap();
        assert_eq!(rows, vec![json!("E1")]);

        let rows = store
            .select(
                &SelectRequest::new("person")
                    .what("person.handle")
                    .filter("not any(e for e in person.event_ref_list)"),
            )
            .await
            .unwrap();
        assert_eq!(rows, vec![json!("P2")]);
    }

    #[tokio::test]
    async fn test_database_error() {
        let store = Store::connect("sqlite::memory:").await.unwrap();
        let err = store.select(&SelectRequest::new("person")).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Environment);
    }
}
