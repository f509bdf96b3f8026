use std::sync::Arc;

use chrono::{DateTime, Utc};
use duckdb::{params, Connection, OptionalExt};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::AppError;

use super::types::{
    annotation::{Annotation, BBox},
    annotation_triage::{AnnotationTriageLabel, AnnotationTriageOverride},
    category::Category,
    dataset::{Dataset, DatasetFormat, DatasetType},
    embedding::{decode_vector, encode_vector, Embedding},
    saved_view::SavedView,
    sample::Sample,
};

/// Wraps a single persistent DuckDB connection. DuckDB's C API requires
/// serialized access from a single native thread at a time, so every
/// operation borrows the connection for the duration of one
/// `spawn_blocking` task — the async equivalent of the short-lived,
/// request-scoped cursor called for in §5.
#[derive(Clone)]
pub struct Database {
    conn: Arc<AsyncMutex<Connection>>,
}

pub trait ProvidesDb {
    fn db(&self) -> &Database;
}

impl Database {
    /// Opens (or creates) the database file at `path` and bootstraps the
    /// schema. Bootstrap is idempotent: safe to call against an existing
    /// database with an older schema revision.
    pub async fn open(path: &str) -> Result<Self, AppError> {
        let path = path.to_string();
        let conn = tokio::task::spawn_blocking(move || Connection::open(path))
            .await
            .map_err(AppError::from)?
            .map_err(AppError::from)?;
        let db = Self {
            conn: Arc::new(AsyncMutex::new(conn)),
        };
        db.ensure_initialized().await?;
        Ok(db)
    }

    /// In-memory database, used by tests.
    pub async fn open_in_memory() -> Result<Self, AppError> {
        Self::open(":memory:").await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&Connection) -> Result<T, duckdb::Error> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.blocking_lock();
            f(&guard)
        })
        .await
        .map_err(AppError::from)?
        .map_err(AppError::from)
    }

    #[tracing::instrument(skip(self))]
    pub async fn ensure_initialized(&self) -> Result<(), AppError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS datasets (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    annotation_path TEXT NOT NULL,
                    image_dir TEXT NOT NULL,
                    format TEXT NOT NULL,
                    dataset_type TEXT NOT NULL DEFAULT 'detection',
                    image_count BIGINT NOT NULL DEFAULT 0,
                    annotation_count BIGINT NOT NULL DEFAULT 0,
                    category_count BIGINT NOT NULL DEFAULT 0,
                    prediction_count BIGINT NOT NULL DEFAULT 0,
                    metadata TEXT,
                    created_at TIMESTAMP NOT NULL
                );
                CREATE TABLE IF NOT EXISTS samples (
                    dataset_id TEXT NOT NULL,
                    id TEXT NOT NULL,
                    file_name TEXT NOT NULL,
                    width INTEGER NOT NULL DEFAULT 0,
                    height INTEGER NOT NULL DEFAULT 0,
                    thumbnail_path TEXT,
                    split TEXT,
                    tags TEXT NOT NULL DEFAULT '[]',
                    image_dir TEXT NOT NULL DEFAULT '',
                    PRIMARY KEY (dataset_id, id)
                );
                CREATE TABLE IF NOT EXISTS annotations (
                    dataset_id TEXT NOT NULL,
                    id TEXT NOT NULL,
                    sample_id TEXT NOT NULL,
                    category_name TEXT NOT NULL,
                    bbox_x DOUBLE NOT NULL DEFAULT 0,
                    bbox_y DOUBLE NOT NULL DEFAULT 0,
                    bbox_w DOUBLE NOT NULL DEFAULT 0,
                    bbox_h DOUBLE NOT NULL DEFAULT 0,
                    area DOUBLE NOT NULL DEFAULT 0,
                    is_crowd BOOLEAN NOT NULL DEFAULT FALSE,
                    source TEXT NOT NULL DEFAULT 'ground_truth',
                    confidence DOUBLE,
                    PRIMARY KEY (dataset_id, id)
                );
                CREATE TABLE IF NOT EXISTS categories (
                    dataset_id TEXT NOT NULL,
                    category_id BIGINT NOT NULL,
                    name TEXT NOT NULL,
                    supercategory TEXT,
                    PRIMARY KEY (dataset_id, category_id)
                );
                CREATE TABLE IF NOT EXISTS embeddings (
                    sample_id TEXT NOT NULL,
                    dataset_id TEXT NOT NULL,
                    model_name TEXT NOT NULL,
                    vector BLOB NOT NULL,
                    x DOUBLE,
                    y DOUBLE,
                    PRIMARY KEY (sample_id, dataset_id, model_name)
                );
                CREATE TABLE IF NOT EXISTS saved_views (
                    id TEXT PRIMARY KEY,
                    dataset_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    filter_state TEXT NOT NULL,
                    created_at TIMESTAMP NOT NULL,
                    updated_at TIMESTAMP NOT NULL
                );
                CREATE TABLE IF NOT EXISTS annotation_triage (
                    annotation_id TEXT PRIMARY KEY,
                    dataset_id TEXT NOT NULL,
                    sample_id TEXT NOT NULL,
                    label TEXT NOT NULL,
                    created_at TIMESTAMP NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_samples_dataset ON samples(dataset_id);
                CREATE INDEX IF NOT EXISTS idx_annotations_dataset ON annotations(dataset_id);
                CREATE INDEX IF NOT EXISTS idx_annotations_sample ON annotations(dataset_id, sample_id);
                CREATE INDEX IF NOT EXISTS idx_categories_dataset ON categories(dataset_id);
                CREATE INDEX IF NOT EXISTS idx_embeddings_dataset ON embeddings(dataset_id);
                CREATE INDEX IF NOT EXISTS idx_triage_sample ON annotation_triage(dataset_id, sample_id);",
            )?;
            // Additive migrations, safe to re-run against an older file.
            for stmt in [
                "ALTER TABLE samples ADD COLUMN IF NOT EXISTS tags TEXT NOT NULL DEFAULT '[]'",
                "ALTER TABLE samples ADD COLUMN IF NOT EXISTS image_dir TEXT NOT NULL DEFAULT ''",
                "ALTER TABLE datasets ADD COLUMN IF NOT EXISTS prediction_count BIGINT NOT NULL DEFAULT 0",
                "ALTER TABLE datasets ADD COLUMN IF NOT EXISTS dataset_type TEXT NOT NULL DEFAULT 'detection'",
            ] {
                conn.execute_batch(stmt)?;
            }
            Ok(())
        })
        .await
    }

    // ---- datasets ----------------------------------------------------

    #[tracing::instrument(skip(self, dataset))]
    pub async fn insert_dataset(&self, dataset: Dataset) -> Result<(), AppError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO datasets (id, name, annotation_path, image_dir, format,
                    dataset_type, image_count, annotation_count, category_count,
                    prediction_count, metadata, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    dataset.id,
                    dataset.name,
                    dataset.annotation_path,
                    dataset.image_dir,
                    dataset.format.as_str(),
                    dataset.dataset_type.as_str(),
                    dataset.image_count,
                    dataset.annotation_count,
                    dataset.category_count,
                    dataset.prediction_count,
                    dataset.metadata,
                    dataset.created_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_dataset(&self, dataset_id: &str) -> Result<Option<Dataset>, AppError> {
        let dataset_id = dataset_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, name, annotation_path, image_dir, format, dataset_type,
                    image_count, annotation_count, category_count, prediction_count,
                    metadata, created_at FROM datasets WHERE id = ?",
                params![dataset_id],
                row_to_dataset,
            )
            .optional()
        })
        .await
    }

    pub async fn list_datasets(&self) -> Result<Vec<Dataset>, AppError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, annotation_path, image_dir, format, dataset_type,
                    image_count, annotation_count, category_count, prediction_count,
                    metadata, created_at FROM datasets ORDER BY created_at DESC",
            )?;
            let rows = stmt.query_map([], row_to_dataset)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
    }

    /// Adds to (never overwrites) the counters, used by `ingest_splits`
    /// so multiple single-split calls accumulate into one dataset (§4.5).
    #[tracing::instrument(skip(self))]
    pub async fn add_dataset_counts(
        &self,
        dataset_id: &str,
        image_delta: i64,
        annotation_delta: i64,
    ) -> Result<(), AppError> {
        let dataset_id = dataset_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE datasets SET image_count = image_count + ?,
                    annotation_count = annotation_count + ? WHERE id = ?",
                params![image_delta, annotation_delta, dataset_id],
            )?;
            Ok(())
        })
        .await
    }

    /// Recomputes the derived counters from the underlying rows (I2),
    /// used after prediction import and annotation create/delete.
    #[tracing::instrument(skip(self))]
    pub async fn recompute_aggregates(&self, dataset_id: &str) -> Result<(), AppError> {
        let dataset_id = dataset_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE datasets SET
                    annotation_count = (SELECT COUNT(*) FROM annotations
                        WHERE dataset_id = ? AND source = 'ground_truth'),
                    prediction_count = (SELECT COUNT(*) FROM annotations
                        WHERE dataset_id = ? AND source != 'ground_truth'),
                    category_count = (SELECT COUNT(DISTINCT category_name) FROM annotations
                        WHERE dataset_id = ?)
                 WHERE id = ?",
                params![dataset_id, dataset_id, dataset_id, dataset_id],
            )?;
            Ok(())
        })
        .await
    }

    /// Cascading delete: samples, annotations, categories, embeddings,
    /// saved views, triage overrides, then the dataset row itself.
    /// Vector-collection and thumbnail-cache cleanup are the caller's
    /// responsibility (they live outside the column store).
    #[tracing::instrument(skip(self))]
    pub async fn delete_dataset(&self, dataset_id: &str) -> Result<(), AppError> {
        let dataset_id = dataset_id.to_string();
        self.with_conn(move |conn| {
            for table in [
                "annotation_triage",
                "saved_views",
                "embeddings",
                "annotations",
                "categories",
                "samples",
            ] {
                conn.execute(
                    &format!("DELETE FROM {table} WHERE dataset_id = ?"),
                    params![dataset_id],
                )?;
            }
            conn.execute("DELETE FROM datasets WHERE id = ?", params![dataset_id])?;
            Ok(())
        })
        .await
    }

    // ---- categories ----------------------------------------------------

    /// Inserts categories not already present for `(dataset_id, category_id)`.
    #[tracing::instrument(skip(self, categories))]
    pub async fn upsert_categories(&self, categories: Vec<Category>) -> Result<(), AppError> {
        self.with_conn(move |conn| {
            for cat in categories {
                conn.execute(
                    "INSERT INTO categories (dataset_id, category_id, name, supercategory)
                     VALUES (?, ?, ?, ?)
                     ON CONFLICT (dataset_id, category_id) DO NOTHING",
                    params![cat.dataset_id, cat.category_id, cat.name, cat.supercategory],
                )?;
            }
            Ok(())
        })
        .await
    }

    pub async fn list_categories(&self, dataset_id: &str) -> Result<Vec<Category>, AppError> {
        let dataset_id = dataset_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT dataset_id, category_id, name, supercategory FROM categories
                 WHERE dataset_id = ? ORDER BY category_id",
            )?;
            let rows = stmt.query_map(params![dataset_id], |row| {
                Ok(Category {
                    dataset_id: row.get(0)?,
                    category_id: row.get(1)?,
                    name: row.get(2)?,
                    supercategory: row.get(3)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
    }

    // ---- samples -------------------------------------------------------

    #[tracing::instrument(skip(self, samples))]
    pub async fn bulk_insert_samples(&self, samples: Vec<Sample>) -> Result<(), AppError> {
        self.with_conn(move |conn| {
            for s in samples {
                conn.execute(
                    "INSERT INTO samples (dataset_id, id, file_name, width, height,
                        thumbnail_path, split, tags, image_dir)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT (dataset_id, id) DO UPDATE SET
                        file_name = EXCLUDED.file_name,
                        width = EXCLUDED.width,
                        height = EXCLUDED.height,
                        image_dir = EXCLUDED.image_dir",
                    params![
                        s.dataset_id,
                        s.id,
                        s.file_name,
                        s.width,
                        s.height,
                        s.thumbnail_path,
                        s.split,
                        serde_json::to_string(&s.tags).unwrap_or_else(|_| "[]".to_string()),
                        s.image_dir,
                    ],
                )?;
            }
            Ok(())
        })
        .await
    }

    pub async fn get_sample(&self, dataset_id: &str, id: &str) -> Result<Option<Sample>, AppError> {
        let (dataset_id, id) = (dataset_id.to_string(), id.to_string());
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT dataset_id, id, file_name, width, height, thumbnail_path, split,
                    tags, image_dir FROM samples WHERE dataset_id = ? AND id = ?",
                params![dataset_id, id],
                row_to_sample,
            )
            .optional()
        })
        .await
    }

    pub async fn list_samples(&self, dataset_id: &str) -> Result<Vec<Sample>, AppError> {
        let dataset_id = dataset_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT dataset_id, id, file_name, width, height, thumbnail_path, split,
                    tags, image_dir FROM samples WHERE dataset_id = ? ORDER BY id",
            )?;
            let rows = stmt.query_map(params![dataset_id], row_to_sample)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
    }

    pub async fn get_samples_by_ids(
        &self,
        dataset_id: &str,
        ids: &[String],
    ) -> Result<Vec<Sample>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let dataset_id = dataset_id.to_string();
        let ids = ids.to_vec();
        self.with_conn(move |conn| {
            let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let sql = format!(
                "SELECT dataset_id, id, file_name, width, height, thumbnail_path, split,
                    tags, image_dir FROM samples WHERE dataset_id = ? AND id IN ({placeholders})"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut bound: Vec<&dyn duckdb::ToSql> = vec![&dataset_id];
            for id in &ids {
                bound.push(id);
            }
            let rows = stmt.query_map(bound.as_slice(), row_to_sample)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
    }

    /// Runs the compositional filter (C6) with pagination, returning the
    /// matching page alongside the total row count for that filter.
    #[tracing::instrument(skip(self, filter))]
    pub async fn query_samples_filtered(
        &self,
        filter: &super::filters::SampleFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Sample>, i64), AppError> {
        let built = filter.build();
        let count_sql = format!(
            "SELECT COUNT(DISTINCT s.id) FROM samples s {} WHERE {}",
            built.join_clause, built.where_clause
        );
        let page_sql = format!(
            "SELECT DISTINCT s.dataset_id, s.id, s.file_name, s.width, s.height,
                s.thumbnail_path, s.split, s.tags, s.image_dir
             FROM samples s {} WHERE {} ORDER BY {} LIMIT ? OFFSET ?",
            built.join_clause, built.where_clause, built.order_clause
        );
        self.with_conn(move |conn| {
            let total: i64 = conn.query_row(&count_sql, built.param_refs().as_slice(), |row| row.get(0))?;
            let mut page_params = built.param_refs();
            page_params.push(&limit);
            page_params.push(&offset);
            let mut stmt = conn.prepare(&page_sql)?;
            let rows = stmt.query_map(page_params.as_slice(), row_to_sample)?;
            let samples = rows.collect::<Result<Vec<_>, _>>()?;
            Ok((samples, total))
        })
        .await
    }

    /// Distinct splits, category names, and tags present in the dataset,
    /// for populating the filter UI's facet lists.
    pub async fn sample_filter_facets(
        &self,
        dataset_id: &str,
    ) -> Result<(Vec<String>, Vec<String>, Vec<String>), AppError> {
        let dataset_id = dataset_id.to_string();
        self.with_conn(move |conn| {
            let splits: Vec<String> = conn
                .prepare(
                    "SELECT DISTINCT split FROM samples
                     WHERE dataset_id = ? AND split IS NOT NULL ORDER BY split",
                )?
                .query_map(params![dataset_id], |row| row.get(0))?
                .collect::<Result<_, _>>()?;
            let categories: Vec<String> = conn
                .prepare(
                    "SELECT DISTINCT category_name FROM annotations
                     WHERE dataset_id = ? ORDER BY category_name",
                )?
                .query_map(params![dataset_id], |row| row.get(0))?
                .collect::<Result<_, _>>()?;
            let mut stmt = conn.prepare("SELECT tags FROM samples WHERE dataset_id = ?")?;
            let mut tag_set = std::collections::BTreeSet::new();
            let rows = stmt.query_map(params![dataset_id], |row| row.get::<_, String>(0))?;
            for tags_json in rows {
                let tags: Vec<String> = serde_json::from_str(&tags_json?).unwrap_or_default();
                tag_set.extend(tags);
            }
            Ok((splits, categories, tag_set.into_iter().collect()))
        })
        .await
    }

    /// Replaces the full tag list for a sample (used by the triage-tag
    /// and annotation-triage-override write paths).
    #[tracing::instrument(skip(self))]
    pub async fn set_sample_tags(
        &self,
        dataset_id: &str,
        sample_id: &str,
        tags: Vec<String>,
    ) -> Result<(), AppError> {
        let (dataset_id, sample_id) = (dataset_id.to_string(), sample_id.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE samples SET tags = ? WHERE dataset_id = ? AND id = ?",
                params![
                    serde_json::to_string(&tags).unwrap_or_else(|_| "[]".to_string()),
                    dataset_id,
                    sample_id,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Backfills a thumbnail path and the image dimensions resolved while
    /// generating it (C5's post-insert thumbnail pass).
    pub async fn set_sample_thumbnail(
        &self,
        dataset_id: &str,
        sample_id: &str,
        thumbnail_path: &str,
        width: i32,
        height: i32,
    ) -> Result<(), AppError> {
        let (dataset_id, sample_id, thumbnail_path) = (
            dataset_id.to_string(),
            sample_id.to_string(),
            thumbnail_path.to_string(),
        );
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE samples SET thumbnail_path = ?, width = ?, height = ?
                 WHERE dataset_id = ? AND id = ?",
                params![thumbnail_path, width, height, dataset_id, sample_id],
            )?;
            Ok(())
        })
        .await
    }

    // ---- annotations -----------------------------------------------------

    #[tracing::instrument(skip(self, annotations))]
    pub async fn bulk_insert_annotations(
        &self,
        annotations: Vec<Annotation>,
    ) -> Result<(), AppError> {
        self.with_conn(move |conn| {
            for a in annotations {
                conn.execute(
                    "INSERT INTO annotations (dataset_id, id, sample_id, category_name,
                        bbox_x, bbox_y, bbox_w, bbox_h, area, is_crowd, source, confidence)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT (dataset_id, id) DO UPDATE SET
                        category_name = EXCLUDED.category_name,
                        bbox_x = EXCLUDED.bbox_x, bbox_y = EXCLUDED.bbox_y,
                        bbox_w = EXCLUDED.bbox_w, bbox_h = EXCLUDED.bbox_h,
                        area = EXCLUDED.area, confidence = EXCLUDED.confidence",
                    params![
                        a.dataset_id,
                        a.id,
                        a.sample_id,
                        a.category_name,
                        a.bbox.x,
                        a.bbox.y,
                        a.bbox.w,
                        a.bbox.h,
                        a.area,
                        a.is_crowd,
                        a.source,
                        a.confidence,
                    ],
                )?;
            }
            Ok(())
        })
        .await
    }

    /// Deletes a single annotation by id. The ground-truth-only
    /// restriction on annotation CRUD (§6) is enforced by the caller
    /// before reaching this method.
    #[tracing::instrument(skip(self))]
    pub async fn delete_annotation(
        &self,
        dataset_id: &str,
        annotation_id: &str,
    ) -> Result<(), AppError> {
        let (dataset_id, annotation_id) = (dataset_id.to_string(), annotation_id.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM annotations WHERE dataset_id = ? AND id = ?",
                params![dataset_id, annotation_id],
            )?;
            Ok(())
        })
        .await
    }

    /// Looks up a single annotation by id, used to enforce the
    /// ground-truth-only restriction on annotation update/delete (§6).
    pub async fn get_annotation(
        &self,
        dataset_id: &str,
        annotation_id: &str,
    ) -> Result<Option<Annotation>, AppError> {
        let (dataset_id, annotation_id) = (dataset_id.to_string(), annotation_id.to_string());
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT dataset_id, id, sample_id, category_name, bbox_x, bbox_y, bbox_w,
                    bbox_h, area, is_crowd, source, confidence
                 FROM annotations WHERE dataset_id = ? AND id = ?",
                params![dataset_id, annotation_id],
                row_to_annotation,
            )
            .optional()
        })
        .await
    }

    /// Deletes all predictions for a run before re-inserting it, giving
    /// prediction import its idempotence (R2). See Open Question #4 in
    /// §9 for the race this does not itself resolve.
    #[tracing::instrument(skip(self))]
    pub async fn delete_predictions_by_source(
        &self,
        dataset_id: &str,
        source: &str,
    ) -> Result<(), AppError> {
        let (dataset_id, source) = (dataset_id.to_string(), source.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM annotations WHERE dataset_id = ? AND source = ?",
                params![dataset_id, source],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn list_annotations(
        &self,
        dataset_id: &str,
        source: Option<&str>,
        split: Option<&str>,
    ) -> Result<Vec<Annotation>, AppError> {
        let dataset_id = dataset_id.to_string();
        let source = source.map(str::to_string);
        let split = split.map(str::to_string);
        self.with_conn(move |conn| {
            let mut sql = "SELECT a.dataset_id, a.id, a.sample_id, a.category_name,
                    a.bbox_x, a.bbox_y, a.bbox_w, a.bbox_h, a.area, a.is_crowd,
                    a.source, a.confidence
                 FROM annotations a"
                .to_string();
            if split.is_some() {
                sql.push_str(" JOIN samples s ON s.dataset_id = a.dataset_id AND s.id = a.sample_id");
            }
            sql.push_str(" WHERE a.dataset_id = ?");
            let mut bound: Vec<Box<dyn duckdb::ToSql>> = vec![Box::new(dataset_id)];
            if let Some(source) = &source {
                sql.push_str(" AND a.source = ?");
                bound.push(Box::new(source.clone()));
            }
            if let Some(split) = &split {
                sql.push_str(" AND s.split = ?");
                bound.push(Box::new(split.clone()));
            }
            let mut stmt = conn.prepare(&sql)?;
            let refs: Vec<&dyn duckdb::ToSql> = bound.iter().map(|b| b.as_ref()).collect();
            let rows = stmt.query_map(refs.as_slice(), row_to_annotation)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
    }

    pub async fn annotations_for_sample(
        &self,
        dataset_id: &str,
        sample_id: &str,
    ) -> Result<Vec<Annotation>, AppError> {
        let (dataset_id, sample_id) = (dataset_id.to_string(), sample_id.to_string());
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT dataset_id, id, sample_id, category_name, bbox_x, bbox_y, bbox_w,
                    bbox_h, area, is_crowd, source, confidence
                 FROM annotations WHERE dataset_id = ? AND sample_id = ?",
            )?;
            let rows = stmt.query_map(params![dataset_id, sample_id], row_to_annotation)?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
    }

    // ---- saved views ----------------------------------------------------

    #[tracing::instrument(skip(self, view))]
    pub async fn upsert_saved_view(&self, view: SavedView) -> Result<(), AppError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO saved_views (id, dataset_id, name, filter_state, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT (id) DO UPDATE SET
                    name = EXCLUDED.name, filter_state = EXCLUDED.filter_state,
                    updated_at = EXCLUDED.updated_at",
                params![
                    view.id,
                    view.dataset_id,
                    view.name,
                    view.filter_state,
                    view.created_at,
                    view.updated_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn list_saved_views(&self, dataset_id: &str) -> Result<Vec<SavedView>, AppError> {
        let dataset_id = dataset_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, dataset_id, name, filter_state, created_at, updated_at
                 FROM saved_views WHERE dataset_id = ? ORDER BY updated_at DESC",
            )?;
            let rows = stmt.query_map(params![dataset_id], |row| {
                Ok(SavedView {
                    id: row.get(0)?,
                    dataset_id: row.get(1)?,
                    name: row.get(2)?,
                    filter_state: row.get(3)?,
                    created_at: row.get(4)?,
                    updated_at: row.get(5)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
    }

    // ---- annotation triage overrides ------------------------------------

    #[tracing::instrument(skip(self))]
    pub async fn upsert_annotation_triage(
        &self,
        override_: AnnotationTriageOverride,
    ) -> Result<(), AppError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO annotation_triage (annotation_id, dataset_id, sample_id, label, created_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT (annotation_id) DO UPDATE SET
                    label = EXCLUDED.label, created_at = EXCLUDED.created_at",
                params![
                    override_.annotation_id,
                    override_.dataset_id,
                    override_.sample_id,
                    override_.label.as_str(),
                    override_.created_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_annotation_triage(
        &self,
        dataset_id: &str,
        annotation_id: &str,
    ) -> Result<(), AppError> {
        let (dataset_id, annotation_id) = (dataset_id.to_string(), annotation_id.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM annotation_triage WHERE dataset_id = ? AND annotation_id = ?",
                params![dataset_id, annotation_id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn annotation_triage_for_sample(
        &self,
        dataset_id: &str,
        sample_id: &str,
    ) -> Result<Vec<AnnotationTriageOverride>, AppError> {
        let (dataset_id, sample_id) = (dataset_id.to_string(), sample_id.to_string());
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT annotation_id, dataset_id, sample_id, label, created_at
                 FROM annotation_triage WHERE dataset_id = ? AND sample_id = ?",
            )?;
            let rows = stmt.query_map(params![dataset_id, sample_id], |row| {
                let label: String = row.get(3)?;
                Ok(AnnotationTriageOverride {
                    annotation_id: row.get(0)?,
                    dataset_id: row.get(1)?,
                    sample_id: row.get(2)?,
                    label: AnnotationTriageLabel::from_str_opt(&label)
                        .unwrap_or(AnnotationTriageLabel::Mistake),
                    created_at: row.get(4)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
    }

    pub async fn count_annotation_triage_for_sample(
        &self,
        dataset_id: &str,
        sample_id: &str,
    ) -> Result<i64, AppError> {
        let (dataset_id, sample_id) = (dataset_id.to_string(), sample_id.to_string());
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM annotation_triage WHERE dataset_id = ? AND sample_id = ?",
                params![dataset_id, sample_id],
                |row| row.get(0),
            )
        })
        .await
    }

    // ---- embeddings ------------------------------------------------------

    #[tracing::instrument(skip(self))]
    pub async fn delete_embeddings_for_dataset(&self, dataset_id: &str) -> Result<(), AppError> {
        let dataset_id = dataset_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM embeddings WHERE dataset_id = ?",
                params![dataset_id],
            )?;
            Ok(())
        })
        .await
    }

    #[tracing::instrument(skip(self, embeddings))]
    pub async fn bulk_insert_embeddings(&self, embeddings: Vec<Embedding>) -> Result<(), AppError> {
        self.with_conn(move |conn| {
            for e in embeddings {
                conn.execute(
                    "INSERT INTO embeddings (sample_id, dataset_id, model_name, vector, x, y)
                     VALUES (?, ?, ?, ?, ?, ?)
                     ON CONFLICT (sample_id, dataset_id, model_name) DO UPDATE SET
                        vector = EXCLUDED.vector",
                    params![
                        e.sample_id,
                        e.dataset_id,
                        e.model_name,
                        encode_vector(&e.vector),
                        e.x,
                        e.y,
                    ],
                )?;
            }
            Ok(())
        })
        .await
    }

    pub async fn list_embeddings(&self, dataset_id: &str) -> Result<Vec<Embedding>, AppError> {
        let dataset_id = dataset_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT sample_id, dataset_id, model_name, vector, x, y
                 FROM embeddings WHERE dataset_id = ?",
            )?;
            let rows = stmt.query_map(params![dataset_id], |row| {
                let blob: Vec<u8> = row.get(3)?;
                Ok(Embedding {
                    sample_id: row.get(0)?,
                    dataset_id: row.get(1)?,
                    model_name: row.get(2)?,
                    vector: decode_vector(&blob),
                    x: row.get(4)?,
                    y: row.get(5)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn update_embedding_xy(
        &self,
        sample_id: &str,
        dataset_id: &str,
        model_name: &str,
        x: f64,
        y: f64,
    ) -> Result<(), AppError> {
        let (sample_id, dataset_id, model_name) =
            (sample_id.to_string(), dataset_id.to_string(), model_name.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE embeddings SET x = ?, y = ?
                 WHERE sample_id = ? AND dataset_id = ? AND model_name = ?",
                params![x, y, sample_id, dataset_id, model_name],
            )?;
            Ok(())
        })
        .await
    }
}

fn row_to_dataset(row: &duckdb::Row<'_>) -> Result<Dataset, duckdb::Error> {
    let format: String = row.get(4)?;
    let dataset_type: String = row.get(5)?;
    let created_at: DateTime<Utc> = row.get(11)?;
    Ok(Dataset {
        id: row.get(0)?,
        name: row.get(1)?,
        annotation_path: row.get(2)?,
        image_dir: row.get(3)?,
        format: DatasetFormat::from_str_opt(&format).unwrap_or(DatasetFormat::Coco),
        dataset_type: DatasetType::from_str_opt(&dataset_type).unwrap_or_default(),
        image_count: row.get(6)?,
        annotation_count: row.get(7)?,
        category_count: row.get(8)?,
        prediction_count: row.get(9)?,
        metadata: row.get(10)?,
        created_at,
    })
}

fn row_to_sample(row: &duckdb::Row<'_>) -> Result<Sample, duckdb::Error> {
    let tags_json: String = row.get(7)?;
    Ok(Sample {
        dataset_id: row.get(0)?,
        id: row.get(1)?,
        file_name: row.get(2)?,
        width: row.get(3)?,
        height: row.get(4)?,
        thumbnail_path: row.get(5)?,
        split: row.get(6)?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        image_dir: row.get(8)?,
    })
}

fn row_to_annotation(row: &duckdb::Row<'_>) -> Result<Annotation, duckdb::Error> {
    Ok(Annotation {
        dataset_id: row.get(0)?,
        id: row.get(1)?,
        sample_id: row.get(2)?,
        category_name: row.get(3)?,
        bbox: BBox {
            x: row.get(4)?,
            y: row.get(5)?,
            w: row.get(6)?,
            h: row.get(7)?,
        },
        area: row.get(8)?,
        is_crowd: row.get(9)?,
        source: row.get(10)?,
        confidence: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::annotation::GROUND_TRUTH_SOURCE;

    async fn test_db() -> Database {
        Database::open_in_memory().await.expect("open in-memory db")
    }

    fn sample_dataset() -> Dataset {
        Dataset {
            id: "d1".into(),
            name: "test".into(),
            annotation_path: "ann.json".into(),
            image_dir: "images".into(),
            format: DatasetFormat::Coco,
            dataset_type: DatasetType::Detection,
            image_count: 0,
            annotation_count: 0,
            category_count: 0,
            prediction_count: 0,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_and_fetch_dataset_round_trips() {
        let db = test_db().await;
        db.insert_dataset(sample_dataset()).await.unwrap();
        let fetched = db.get_dataset("d1").await.unwrap().unwrap();
        assert_eq!(fetched.name, "test");
        assert_eq!(fetched.format, DatasetFormat::Coco);
    }

    #[tokio::test]
    async fn recompute_aggregates_matches_i2() {
        let db = test_db().await;
        db.insert_dataset(sample_dataset()).await.unwrap();
        db.bulk_insert_samples(vec![Sample {
            dataset_id: "d1".into(),
            id: "s1".into(),
            file_name: "a.jpg".into(),
            width: 10,
            height: 10,
            thumbnail_path: None,
            split: None,
            tags: vec![],
            image_dir: "images".into(),
        }])
        .await
        .unwrap();
        db.bulk_insert_annotations(vec![
            Annotation {
                dataset_id: "d1".into(),
                id: "a1".into(),
                sample_id: "s1".into(),
                category_name: "car".into(),
                bbox: BBox { x: 0.0, y: 0.0, w: 5.0, h: 5.0 },
                area: 25.0,
                is_crowd: false,
                source: GROUND_TRUTH_SOURCE.into(),
                confidence: None,
            },
            Annotation {
                dataset_id: "d1".into(),
                id: "a2".into(),
                sample_id: "s1".into(),
                category_name: "car".into(),
                bbox: BBox { x: 0.0, y: 0.0, w: 5.0, h: 5.0 },
                area: 25.0,
                is_crowd: false,
                source: "run1".into(),
                confidence: Some(0.9),
            },
        ])
        .await
        .unwrap();
        db.recompute_aggregates("d1").await.unwrap();
        let dataset = db.get_dataset("d1").await.unwrap().unwrap();
        assert_eq!(dataset.annotation_count, 1);
        assert_eq!(dataset.prediction_count, 1);
        assert_eq!(dataset.category_count, 1);
    }

    #[tokio::test]
    async fn delete_dataset_cascades_to_samples() {
        let db = test_db().await;
        db.insert_dataset(sample_dataset()).await.unwrap();
        db.bulk_insert_samples(vec![Sample {
            dataset_id: "d1".into(),
            id: "s1".into(),
            file_name: "a.jpg".into(),
            width: 0,
            height: 0,
            thumbnail_path: None,
            split: None,
            tags: vec![],
            image_dir: "images".into(),
        }])
        .await
        .unwrap();
        db.delete_dataset("d1").await.unwrap();
        assert!(db.get_dataset("d1").await.unwrap().is_none());
        assert!(db.list_samples("d1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_predictions_by_source_is_idempotent_for_reimport() {
        let db = test_db().await;
        db.insert_dataset(sample_dataset()).await.unwrap();
        db.bulk_insert_samples(vec![Sample {
            dataset_id: "d1".into(),
            id: "s1".into(),
            file_name: "a.jpg".into(),
            width: 0,
            height: 0,
            thumbnail_path: None,
            split: None,
            tags: vec![],
            image_dir: "images".into(),
        }])
        .await
        .unwrap();
        let pred = Annotation {
            dataset_id: "d1".into(),
            id: "p1".into(),
            sample_id: "s1".into(),
            category_name: "car".into(),
            bbox: BBox { x: 0.0, y: 0.0, w: 1.0, h: 1.0 },
            area: 1.0,
            is_crowd: false,
            source: "run1".into(),
            confidence: Some(0.5),
        };
        for _ in 0..2 {
            db.delete_predictions_by_source("d1", "run1").await.unwrap();
            db.bulk_insert_annotations(vec![pred.clone()]).await.unwrap();
        }
        let anns = db.list_annotations("d1", Some("run1"), None).await.unwrap();
        assert_eq!(anns.len(), 1);
    }
}
