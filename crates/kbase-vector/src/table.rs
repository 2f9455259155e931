//! LanceDB connection and housekeeping helpers.
//!
//! Provides the database open function, an ensure-table helper and a simple
//! key/value metadata table holding one entry per persisted collection.

use arrow_array::{Array, RecordBatch, RecordBatchIterator, StringArray, TimestampMillisecondArray};
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::query::ExecutableQuery;
use lancedb::{connect, Connection};
use std::sync::Arc;

use kbase_core::error::{Error, Result};

use crate::schema::build_meta_schema;

pub async fn open_db(uri: &str) -> Result<Connection> {
    connect(uri).execute().await.map_err(Error::storage)
}

pub async fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let names = conn.table_names().execute().await.map_err(Error::storage)?;
    Ok(names.iter().any(|n| n == name))
}

pub async fn ensure_table(conn: &Connection, name: &str, schema: Arc<arrow_schema::Schema>) -> Result<()> {
    if table_exists(conn, name).await? {
        return Ok(());
    }
    // create empty table with 0 rows
    let iter = RecordBatchIterator::new(vec![].into_iter(), schema.clone());
    conn.create_table(name, Box::new(iter)).execute().await.map_err(Error::storage)?;
    Ok(())
}

/// Quote a string literal for a Lance SQL predicate.
pub fn sql_literal(value: &str) -> String { format!("'{}'", value.replace('\'', "''")) }

/// `column IN ('a', 'b', ...)`
pub fn sql_in(column: &str, values: &[String]) -> String {
    let list: Vec<String> = values.iter().map(|v| sql_literal(v)).collect();
    format!("{column} IN ({})", list.join(", "))
}

pub async fn collect_batches<S, E>(stream: S) -> Result<Vec<RecordBatch>>
where
    S: futures::Stream<Item = std::result::Result<RecordBatch, E>>,
    E: std::fmt::Display,
{
    stream.try_collect::<Vec<_>>().await.map_err(Error::storage)
}

pub fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| Error::storage(format!("column '{name}' missing or not utf8")))
}

pub async fn ensure_meta_table(conn: &Connection, name: &str) -> Result<()> {
    ensure_table(conn, name, build_meta_schema()).await
}

pub async fn set_meta(conn: &Connection, table: &str, key: &str, value: &str) -> Result<()> {
    ensure_meta_table(conn, table).await?;
    let t = conn.open_table(table).execute().await.map_err(Error::storage)?;
    let rb = RecordBatch::try_new(
        build_meta_schema(),
        vec![
            Arc::new(StringArray::from(vec![key.to_string()])),
            Arc::new(StringArray::from(vec![value.to_string()])),
            Arc::new(TimestampMillisecondArray::from(vec![Utc::now().timestamp_millis()])),
        ],
    )
    .map_err(Error::storage)?;
    let reader = Box::new(RecordBatchIterator::new(vec![Ok(rb)].into_iter(), build_meta_schema()));
    // Upsert behavior via merge_insert: key is unique
    let mut mi = t.merge_insert(&["key"]);
    mi.when_matched_update_all(None).when_not_matched_insert_all();
    let _ = mi.execute(reader).await.map_err(Error::storage)?;
    Ok(())
}

/// Every `(key, value)` pair in the meta table.
pub async fn list_meta(conn: &Connection, table: &str) -> Result<Vec<(String, String)>> {
    if !table_exists(conn, table).await? {
        return Ok(Vec::new());
    }
    let t = conn.open_table(table).execute().await.map_err(Error::storage)?;
    let stream = t.query().execute().await.map_err(Error::storage)?;
    let mut out = Vec::new();
    for batch in collect_batches(stream).await? {
        let keys = string_column(&batch, "key")?;
        let values = string_column(&batch, "value")?;
        for i in 0..batch.num_rows() {
            out.push((keys.value(i).to_string(), values.value(i).to_string()));
        }
    }
    Ok(out)
}

pub async fn delete_meta(conn: &Connection, table: &str, key: &str) -> Result<()> {
    if !table_exists(conn, table).await? {
        return Ok(());
    }
    let t = conn.open_table(table).execute().await.map_err(Error::storage)?;
    let _ = t.delete(&format!("key = {}", sql_literal(key))).await.map_err(Error::storage)?;
    Ok(())
}
