//! SQLite-backed metadata store for video assets.
//!
//! One row per asset in `video_assets`. The repository owns every SQL
//! statement; services above it never build queries.

use crate::models::asset::{Asset, EncodingStatus, EncodingUpdate, NewAsset};
use chrono::{DateTime, Utc};
use sqlx::{SqlitePool, migrate::MigrateError};
use std::sync::Arc;
use uuid::Uuid;

const ASSET_COLUMNS: &str = "id, lecture_id, user_id, filename, original_filename, file_size, \
     mime_type, container, blob_name, blob_url, encoding_status, hls_url, duration_seconds, \
     resolution, transcription_job_id, created_at, updated_at";

/// Result of a guarded encoding update.
#[derive(Debug, PartialEq)]
pub enum EncodingUpdateOutcome {
    Updated(Asset),
    NotFound,
    /// The asset already sits in a different terminal state.
    Rejected { current: EncodingStatus },
}

#[derive(Clone)]
pub struct AssetRepository {
    pub db: Arc<SqlitePool>,
}

impl AssetRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded migrations.
    pub async fn migrate(&self) -> Result<(), MigrateError> {
        sqlx::migrate!("./migrations").run(&*self.db).await
    }

    /// Cheap connectivity check used by readiness.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        let one = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        if one == 1 {
            Ok(())
        } else {
            Err(sqlx::Error::Protocol(format!("unexpected result: {}", one)))
        }
    }

    pub async fn create(&self, new: &NewAsset, now: DateTime<Utc>) -> Result<Asset, sqlx::Error> {
        let sql = format!(
            "INSERT INTO video_assets (
                id, lecture_id, user_id, filename, original_filename, file_size,
                mime_type, container, blob_name, blob_url, encoding_status,
                created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING {ASSET_COLUMNS}"
        );
        sqlx::query_as::<_, Asset>(&sql)
            .bind(Uuid::new_v4())
            .bind(&new.lecture_id)
            .bind(&new.user_id)
            .bind(&new.filename)
            .bind(&new.original_filename)
            .bind(new.file_size)
            .bind(&new.mime_type)
            .bind(&new.container)
            .bind(&new.blob_name)
            .bind(&new.blob_url)
            .bind(new.encoding_status)
            .bind(now)
            .bind(now)
            .fetch_one(&*self.db)
            .await
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<Asset>, sqlx::Error> {
        let sql = format!("SELECT {ASSET_COLUMNS} FROM video_assets WHERE id = ?");
        sqlx::query_as::<_, Asset>(&sql)
            .bind(id)
            .fetch_optional(&*self.db)
            .await
    }

    /// All assets of a lecture, newest first. Rows created within the same
    /// timestamp fall back to insertion order.
    pub async fn list_by_lecture(&self, lecture_id: &str) -> Result<Vec<Asset>, sqlx::Error> {
        let sql = format!(
            "SELECT {ASSET_COLUMNS} FROM video_assets
             WHERE lecture_id = ?
             ORDER BY created_at DESC, rowid DESC"
        );
        sqlx::query_as::<_, Asset>(&sql)
            .bind(lecture_id)
            .fetch_all(&*self.db)
            .await
    }

    pub async fn latest_for_lecture(&self, lecture_id: &str) -> Result<Option<Asset>, sqlx::Error> {
        let sql = format!(
            "SELECT {ASSET_COLUMNS} FROM video_assets
             WHERE lecture_id = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT 1"
        );
        sqlx::query_as::<_, Asset>(&sql)
            .bind(lecture_id)
            .fetch_optional(&*self.db)
            .await
    }

    /// Partial update guarded by the terminal-state rule.
    ///
    /// The guard lives in the `WHERE` clause so two concurrent writers cannot
    /// both move a terminal asset.
    pub async fn update_encoding(
        &self,
        id: Uuid,
        update: &EncodingUpdate,
        now: DateTime<Utc>,
    ) -> Result<EncodingUpdateOutcome, sqlx::Error> {
        let sql = format!(
            "UPDATE video_assets SET
                encoding_status = COALESCE(?1, encoding_status),
                hls_url = COALESCE(?2, hls_url),
                duration_seconds = COALESCE(?3, duration_seconds),
                resolution = COALESCE(?4, resolution),
                updated_at = ?5
             WHERE id = ?6
               AND (?1 IS NULL
                    OR encoding_status = ?1
                    OR encoding_status NOT IN ('completed', 'failed'))
             RETURNING {ASSET_COLUMNS}"
        );
        let updated = sqlx::query_as::<_, Asset>(&sql)
            .bind(update.encoding_status)
            .bind(&update.hls_url)
            .bind(update.duration_seconds)
            .bind(&update.resolution)
            .bind(now)
            .bind(id)
            .fetch_optional(&*self.db)
            .await?;

        if let Some(asset) = updated {
            return Ok(EncodingUpdateOutcome::Updated(asset));
        }
        Ok(match self.find(id).await? {
            Some(asset) => EncodingUpdateOutcome::Rejected {
                current: asset.encoding_status,
            },
            None => EncodingUpdateOutcome::NotFound,
        })
    }

    /// Record the external job handle. Returns the updated row, or `None` if
    /// the asset vanished in the meantime.
    pub async fn set_transcription_job(
        &self,
        id: Uuid,
        job_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Asset>, sqlx::Error> {
        let sql = format!(
            "UPDATE video_assets SET transcription_job_id = ?, updated_at = ?
             WHERE id = ?
             RETURNING {ASSET_COLUMNS}"
        );
        sqlx::query_as::<_, Asset>(&sql)
            .bind(job_id)
            .bind(now)
            .bind(id)
            .fetch_optional(&*self.db)
            .await
    }

    /// Remove the record. Returns whether a row existed.
    pub async fn delete(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM video_assets WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;
    use sqlx::sqlite::SqlitePoolOptions;

    pub(crate) async fn memory_repo() -> AssetRepository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let repo = AssetRepository::new(Arc::new(pool));
        repo.migrate().await.unwrap();
        repo
    }

    fn new_asset(lecture: &str, blob: &str, status: EncodingStatus) -> NewAsset {
        NewAsset {
            lecture_id: lecture.into(),
            user_id: None,
            filename: blob.into(),
            original_filename: "talk.mp4".into(),
            file_size: 42,
            mime_type: "video/mp4".into(),
            container: "videos".into(),
            blob_name: blob.into(),
            blob_url: format!("https://acct.blob.core.windows.net/videos/{}", blob),
            encoding_status: status,
        }
    }

    #[tokio::test]
    async fn create_then_find() {
        let repo = memory_repo().await;
        let now = Utc::now();
        let asset = repo
            .create(&new_asset("L1", "a.mp4", EncodingStatus::Pending), now)
            .await
            .unwrap();
        assert_eq!(asset.lecture_id, "L1");
        assert_eq!(asset.encoding_status, EncodingStatus::Pending);
        assert_eq!(asset.created_at, asset.updated_at);

        let found = repo.find(asset.id).await.unwrap().unwrap();
        assert_eq!(found, asset);
        assert!(repo.find(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_blob_name_is_rejected() {
        let repo = memory_repo().await;
        let now = Utc::now();
        repo.create(&new_asset("L1", "a.mp4", EncodingStatus::Pending), now)
            .await
            .unwrap();
        let err = repo
            .create(&new_asset("L2", "a.mp4", EncodingStatus::Pending), now)
            .await
            .unwrap_err();
        assert!(err.as_database_error().is_some());
    }

    #[tokio::test]
    async fn list_is_newest_first_with_insertion_tiebreak() {
        let repo = memory_repo().await;
        let t0 = Utc::now();
        let old = repo
            .create(&new_asset("L1", "old.mp4", EncodingStatus::Pending), t0)
            .await
            .unwrap();
        let t1 = t0 + Duration::seconds(5);
        let a = repo
            .create(&new_asset("L1", "a.mp4", EncodingStatus::Pending), t1)
            .await
            .unwrap();
        let b = repo
            .create(&new_asset("L1", "b.mp4", EncodingStatus::Pending), t1)
            .await
            .unwrap();
        repo.create(&new_asset("L2", "other.mp4", EncodingStatus::Pending), t1)
            .await
            .unwrap();

        let ids: Vec<Uuid> = repo
            .list_by_lecture("L1")
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec![b.id, a.id, old.id]);
        assert_eq!(repo.latest_for_lecture("L1").await.unwrap().unwrap().id, b.id);
        assert!(repo.latest_for_lecture("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn terminal_status_is_sticky() {
        let repo = memory_repo().await;
        let now = Utc::now();
        let asset = repo
            .create(&new_asset("L1", "a.mp4", EncodingStatus::Processing), now)
            .await
            .unwrap();

        let later = now + Duration::seconds(1);
        let done = EncodingUpdate {
            encoding_status: Some(EncodingStatus::Completed),
            hls_url: Some("https://cdn/a.m3u8".into()),
            ..Default::default()
        };
        let updated = match repo.update_encoding(asset.id, &done, later).await.unwrap() {
            EncodingUpdateOutcome::Updated(a) => a,
            other => panic!("unexpected outcome {:?}", other),
        };
        assert_eq!(updated.encoding_status, EncodingStatus::Completed);
        assert_eq!(updated.hls_url.as_deref(), Some("https://cdn/a.m3u8"));
        assert_eq!(updated.updated_at, later);

        let back = EncodingUpdate {
            encoding_status: Some(EncodingStatus::Pending),
            ..Default::default()
        };
        assert_eq!(
            repo.update_encoding(asset.id, &back, later).await.unwrap(),
            EncodingUpdateOutcome::Rejected {
                current: EncodingStatus::Completed
            }
        );

        // Same status and metadata-only updates still go through.
        let meta_only = EncodingUpdate {
            duration_seconds: Some(61.5),
            ..Default::default()
        };
        match repo.update_encoding(asset.id, &meta_only, later).await.unwrap() {
            EncodingUpdateOutcome::Updated(a) => {
                assert_eq!(a.duration_seconds, Some(61.5));
                assert_eq!(a.hls_url.as_deref(), Some("https://cdn/a.m3u8"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(matches!(
            repo.update_encoding(asset.id, &done, later).await.unwrap(),
            EncodingUpdateOutcome::Updated(_)
        ));

        assert_eq!(
            repo.update_encoding(Uuid::new_v4(), &done, later)
                .await
                .unwrap(),
            EncodingUpdateOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn transcription_job_and_delete() {
        let repo = memory_repo().await;
        let now = Utc::now();
        let asset = repo
            .create(&new_asset("L1", "a.mp4", EncodingStatus::Completed), now)
            .await
            .unwrap();

        let later = now + Duration::seconds(3);
        let updated = repo
            .set_transcription_job(asset.id, "job-1", later)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.transcription_job_id.as_deref(), Some("job-1"));
        assert_eq!(updated.updated_at, later);

        assert!(repo.delete(asset.id).await.unwrap());
        assert!(!repo.delete(asset.id).await.unwrap());
        assert!(
            repo.set_transcription_job(asset.id, "job-2", later)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn ping_succeeds() {
        memory_repo().await.ping().await.unwrap();
    }
}
