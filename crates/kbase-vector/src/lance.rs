//! LanceDB-backed index, one table per collection.
//!
//! Unfiltered queries go through Lance's cosine vector search. Filtered
//! queries scan the table and score locally so the filter is applied before
//! ranking rather than to an already truncated top-k.

use arrow_array::{Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator, StringArray};
use async_trait::async_trait;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{Connection, DistanceType, Table};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use kbase_core::error::{Error, Result};
use kbase_core::filter::MetadataFilter;
use kbase_core::traits::VectorIndex;
use kbase_core::types::{IndexStats, Meta, SearchHit, VectorRecord};
use kbase_embed::cosine_similarity;

use crate::schema::build_records_schema;
use crate::table::{collect_batches, ensure_table, sql_in, string_column};
use crate::{rank_hits, CollectionHeader};

struct Row {
    id: String,
    seq: i64,
    content: String,
    metadata: Meta,
    vector: Vec<f32>,
    distance: Option<f32>,
}

pub struct LanceIndex {
    conn: Connection,
    table_name: String,
    header: CollectionHeader,
    next_seq: AtomicI64,
    writer: Mutex<()>,
}

impl LanceIndex {
    /// Open (creating if needed) the table backing `table_name`.
    pub async fn open(conn: Connection, table_name: &str, header: CollectionHeader) -> Result<Self> {
        ensure_table(&conn, table_name, build_records_schema(header.dimension)).await?;
        let index = Self {
            conn,
            table_name: table_name.to_string(),
            header,
            next_seq: AtomicI64::new(0),
            writer: Mutex::new(()),
        };
        let max_seq = index.scan(None).await?.iter().map(|r| r.seq).max().unwrap_or(-1);
        index.next_seq.store(max_seq + 1, Ordering::SeqCst);
        Ok(index)
    }

    pub fn header(&self) -> &CollectionHeader { &self.header }

    async fn table(&self) -> Result<Table> {
        self.conn.open_table(&self.table_name).execute().await.map_err(Error::storage)
    }

    async fn scan(&self, predicate: Option<String>) -> Result<Vec<Row>> {
        let table = self.table().await?;
        let mut query = table.query();
        if let Some(p) = predicate {
            query = query.only_if(p);
        }
        let stream = query.execute().await.map_err(Error::storage)?;
        let mut rows = Vec::new();
        for batch in collect_batches(stream).await? {
            rows.extend(read_rows(&batch)?);
        }
        Ok(rows)
    }

    fn to_batch(&self, records: &[VectorRecord], seqs: &[i64]) -> Result<RecordBatch> {
        let dim = self.header.dimension;
        let metadata = records.iter().map(|r| serde_json::to_string(&r.metadata)).collect::<serde_json::Result<Vec<_>>>()?;
        let vectors = records.iter().map(|r| Some(r.vector.iter().map(|&x| Some(x)).collect::<Vec<_>>()));
        RecordBatch::try_new(
            build_records_schema(dim),
            vec![
                Arc::new(StringArray::from(records.iter().map(|r| r.id.clone()).collect::<Vec<_>>())),
                Arc::new(Int64Array::from(seqs.to_vec())),
                Arc::new(StringArray::from(records.iter().map(|r| r.text.clone()).collect::<Vec<_>>())),
                Arc::new(StringArray::from(metadata)),
                Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(
                    vectors,
                    dim as i32,
                )),
            ],
        )
        .map_err(Error::storage)
    }

    fn check_dim(&self, len: usize, what: &str) -> Result<()> {
        if len != self.header.dimension {
            return Err(Error::validation(format!(
                "{what} has dimension {len}, collection '{}' expects {}",
                self.table_name, self.header.dimension
            )));
        }
        Ok(())
    }
}

fn read_rows(batch: &RecordBatch) -> Result<Vec<Row>> {
    let ids = string_column(batch, "id")?;
    let contents = string_column(batch, "content")?;
    let metadata = string_column(batch, "metadata")?;
    let seqs = batch
        .column_by_name("seq")
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| Error::storage("column 'seq' missing"))?;
    let vectors = batch
        .column_by_name("vector")
        .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
        .ok_or_else(|| Error::storage("column 'vector' missing"))?;
    let distances = batch.column_by_name("_distance").and_then(|c| c.as_any().downcast_ref::<Float32Array>());

    let mut rows = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let values = vectors.value(i);
        let vector = values
            .as_any()
            .downcast_ref::<Float32Array>()
            .map(|a| a.values().to_vec())
            .ok_or_else(|| Error::storage("vector items are not float32"))?;
        rows.push(Row {
            id: ids.value(i).to_string(),
            seq: seqs.value(i),
            content: contents.value(i).to_string(),
            metadata: serde_json::from_str(metadata.value(i))?,
            vector,
            distance: distances.map(|d| d.value(i)),
        });
    }
    Ok(rows)
}

#[async_trait]
impl VectorIndex for LanceIndex {
    fn dim(&self) -> usize { self.header.dimension }

    async fn insert(&self, records: Vec<VectorRecord>) -> Result<()> {
        for record in &records {
            self.check_dim(record.vector.len(), &format!("vector '{}'", record.id))?;
        }
        if records.is_empty() {
            return Ok(());
        }
        let _guard = self.writer.lock().await;

        // Last write wins within a batch, like repeated single inserts.
        let mut deduped: Vec<VectorRecord> = Vec::with_capacity(records.len());
        let mut slot: HashMap<String, usize> = HashMap::new();
        for record in records {
            match slot.get(&record.id) {
                Some(&i) => deduped[i] = record,
                None => {
                    slot.insert(record.id.clone(), deduped.len());
                    deduped.push(record);
                }
            }
        }

        // Overwritten records keep their original insertion position.
        let ids: Vec<String> = deduped.iter().map(|r| r.id.clone()).collect();
        let existing: HashMap<String, i64> =
            self.scan(Some(sql_in("id", &ids))).await?.into_iter().map(|r| (r.id, r.seq)).collect();
        let seqs: Vec<i64> = deduped
            .iter()
            .map(|r| existing.get(&r.id).copied().unwrap_or_else(|| self.next_seq.fetch_add(1, Ordering::SeqCst)))
            .collect();

        let batch = self.to_batch(&deduped, &seqs)?;
        let schema = batch.schema();
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
        let table = self.table().await?;
        let mut mi = table.merge_insert(&["id"]);
        mi.when_matched_update_all(None).when_not_matched_insert_all();
        let _ = mi.execute(reader).await.map_err(Error::storage)?;
        tracing::debug!(collection = %self.table_name, added = deduped.len(), "inserted records");
        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let _guard = self.writer.lock().await;
        let table = self.table().await?;
        let before = table.count_rows(None).await.map_err(Error::storage)?;
        let _ = table.delete(&sql_in("id", ids)).await.map_err(Error::storage)?;
        let after = table.count_rows(None).await.map_err(Error::storage)?;
        let removed = before.saturating_sub(after);
        tracing::debug!(collection = %self.table_name, removed, "deleted records");
        Ok(removed)
    }

    async fn query(&self, vector: &[f32], k: usize, filter: Option<&MetadataFilter>) -> Result<Vec<SearchHit>> {
        self.check_dim(vector.len(), "query vector")?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let table = self.table().await?;
        if table.count_rows(None).await.map_err(Error::storage)? == 0 {
            return Ok(Vec::new());
        }

        let mut rows = match filter.filter(|f| !f.is_empty()) {
            Some(f) => {
                let mut rows = self.scan(None).await?;
                rows.retain(|r| f.matches(&r.metadata));
                rows
            }
            None => {
                let stream = table
                    .vector_search(vector.to_vec())
                    .map_err(Error::storage)?
                    .distance_type(DistanceType::Cosine)
                    .limit(k)
                    .execute()
                    .await
                    .map_err(Error::storage)?;
                let mut rows = Vec::new();
                for batch in collect_batches(stream).await? {
                    rows.extend(read_rows(&batch)?);
                }
                rows
            }
        };
        rows.sort_by_key(|r| r.seq);

        let hits = rows
            .into_iter()
            .map(|r| SearchHit {
                score: r.distance.map_or_else(|| cosine_similarity(vector, &r.vector), |d| 1.0 - d),
                id: r.id,
                text: r.content,
                metadata: r.metadata,
            })
            .collect();
        Ok(rank_hits(hits, k))
    }

    async fn get(&self, ids: &[String]) -> Result<Vec<VectorRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut by_id: HashMap<String, VectorRecord> = self
            .scan(Some(sql_in("id", ids)))
            .await?
            .into_iter()
            .map(|r| (r.id.clone(), VectorRecord { id: r.id, vector: r.vector, text: r.content, metadata: r.metadata }))
            .collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    async fn ids(&self) -> Result<Vec<String>> {
        let table = self.table().await?;
        let stream = table
            .query()
            .select(Select::columns(&["id", "seq"]))
            .execute()
            .await
            .map_err(Error::storage)?;
        let mut pairs = Vec::new();
        for batch in collect_batches(stream).await? {
            let ids = string_column(&batch, "id")?;
            let seqs = batch
                .column_by_name("seq")
                .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
                .ok_or_else(|| Error::storage("column 'seq' missing"))?;
            for i in 0..batch.num_rows() {
                pairs.push((seqs.value(i), ids.value(i).to_string()));
            }
        }
        pairs.sort();
        Ok(pairs.into_iter().map(|(_, id)| id).collect())
    }

    async fn stats(&self) -> Result<IndexStats> {
        let count = self.table().await?.count_rows(None).await.map_err(Error::storage)?;
        Ok(IndexStats { count, metadata: self.header.metadata.clone() })
    }

    async fn destroy(&self) -> Result<()> {
        let _guard = self.writer.lock().await;
        let _ = self.table().await?.delete("true").await.map_err(Error::storage)?;
        self.next_seq.store(0, Ordering::SeqCst);
        Ok(())
    }
}
