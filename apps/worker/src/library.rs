//! Track catalog and audio file helpers
//!
//! The `tracks` table is the worker's catalog of library files, keyed by
//! path. Scan and staging jobs upsert metadata rows; analysis jobs write
//! their measurements back. The table shares the SQLite pool with the job
//! store.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use lofty::{Accessor, AudioFile, Probe, TaggedFileExt};
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqlitePool;
use sqlx::{QueryBuilder, Sqlite};
use tracing::debug;

use crate::error::{WorkerError, WorkerResult};

/// Audio file extensions the library manages
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "ogg", "m4a", "wav", "opus", "aiff"];

const CREATE_TRACKS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS tracks (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    path             TEXT NOT NULL UNIQUE,
    title            TEXT NOT NULL,
    artist           TEXT,
    album            TEXT,
    genre            TEXT,
    year             INTEGER,
    duration_seconds REAL,
    bitrate_kbps     INTEGER,
    sample_rate      INTEGER,
    channels         INTEGER,
    file_size        INTEGER NOT NULL,
    file_hash        TEXT NOT NULL,
    bpm              REAL,
    bpm_confidence   REAL,
    key_name         TEXT,
    mode             TEXT,
    camelot          TEXT,
    key_confidence   REAL,
    peak_db          REAL,
    rms_db           REAL,
    clipping         INTEGER,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
)
"#;

/// Check whether a path has a supported audio extension
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| AUDIO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Compute the streamed SHA-256 hash of a file as lowercase hex
pub fn compute_file_hash(path: &Path) -> WorkerResult<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Pick a destination under `dir` that does not collide with an existing
/// file, appending " (n)" to the stem until a free name is found
pub fn collision_free_destination(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let source = Path::new(file_name);
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    let extension = source.extension().and_then(|s| s.to_str());

    let mut n = 1u32;
    loop {
        let name = match extension {
            Some(ext) => format!("{} ({}).{}", stem, n, ext),
            None => format!("{} ({})", stem, n),
        };
        let candidate = dir.join(name);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Tag and stream metadata captured for a track row
#[derive(Debug, Clone, PartialEq)]
pub struct TrackMetadata {
    pub path: String,
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub year: Option<i64>,
    pub duration_seconds: Option<f64>,
    pub bitrate_kbps: Option<i64>,
    pub sample_rate: Option<i64>,
    pub channels: Option<i64>,
    pub file_size: i64,
    pub file_hash: String,
}

/// Analysis measurements written back to a track row
#[derive(Debug, Clone, PartialEq)]
pub struct TrackAnalysis {
    pub bpm: f64,
    pub bpm_confidence: f64,
    pub key: String,
    pub mode: String,
    pub camelot: String,
    pub key_confidence: f64,
    pub peak_db: f64,
    pub rms_db: f64,
    pub clipping: bool,
}

/// One catalog row; analysis columns are NULL until an analyze job ran
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Track {
    pub id: i64,
    pub path: String,
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub year: Option<i64>,
    pub duration_seconds: Option<f64>,
    pub bitrate_kbps: Option<i64>,
    pub sample_rate: Option<i64>,
    pub channels: Option<i64>,
    pub file_size: i64,
    pub file_hash: String,
    pub bpm: Option<f64>,
    pub bpm_confidence: Option<f64>,
    pub key_name: Option<String>,
    pub mode: Option<String>,
    pub camelot: Option<String>,
    pub key_confidence: Option<f64>,
    pub peak_db: Option<f64>,
    pub rms_db: Option<f64>,
    pub clipping: Option<bool>,
}

impl Track {
    pub fn is_analyzed(&self) -> bool {
        self.bpm.is_some()
    }
}

/// Read tags and stream properties with lofty.
///
/// Untagged files get the filename stem as their title so the row's title
/// is never empty.
pub fn read_metadata(path: &Path, file_hash: &str) -> WorkerResult<TrackMetadata> {
    let display = path.display().to_string();
    let file_size = fs::metadata(path)?.len() as i64;

    let tagged_file = Probe::open(path)
        .map_err(|e| WorkerError::metadata_extraction(&display, e.to_string()))?
        .read()
        .map_err(|e| WorkerError::metadata_extraction(&display, e.to_string()))?;

    let properties = tagged_file.properties();
    let duration_seconds = Some(properties.duration().as_secs_f64());
    let bitrate_kbps = properties.audio_bitrate().map(i64::from);
    let sample_rate = properties.sample_rate().map(i64::from);
    let channels = properties.channels().map(i64::from);

    let tag = tagged_file.primary_tag().or_else(|| tagged_file.first_tag());

    let fallback_title = || {
        path.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Unknown")
            .to_string()
    };

    let (title, artist, album, genre, year) = match tag {
        Some(tag) => (
            tag.title()
                .map(|s| s.into_owned())
                .unwrap_or_else(fallback_title),
            tag.artist().map(|s| s.into_owned()),
            tag.album().map(|s| s.into_owned()),
            tag.genre().map(|s| s.into_owned()),
            tag.year().map(i64::from),
        ),
        None => (fallback_title(), None, None, None, None),
    };

    Ok(TrackMetadata {
        path: display,
        title,
        artist,
        album,
        genre,
        year,
        duration_seconds,
        bitrate_kbps,
        sample_rate,
        channels,
        file_size,
        file_hash: file_hash.to_string(),
    })
}

/// Repository over the `tracks` table
#[derive(Debug, Clone)]
pub struct TrackStore {
    pool: SqlitePool,
}

impl TrackStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the tracks table if it does not exist yet
    pub async fn init_schema(&self) -> WorkerResult<()> {
        sqlx::query(CREATE_TRACKS_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    /// Insert a metadata row, or refresh it when the path already exists.
    /// Analysis columns are left untouched; callers clear them separately
    /// when the file content changed.
    pub async fn upsert(&self, metadata: &TrackMetadata) -> WorkerResult<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO tracks (
                path, title, artist, album, genre, year, duration_seconds,
                bitrate_kbps, sample_rate, channels, file_size, file_hash,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                title = excluded.title,
                artist = excluded.artist,
                album = excluded.album,
                genre = excluded.genre,
                year = excluded.year,
                duration_seconds = excluded.duration_seconds,
                bitrate_kbps = excluded.bitrate_kbps,
                sample_rate = excluded.sample_rate,
                channels = excluded.channels,
                file_size = excluded.file_size,
                file_hash = excluded.file_hash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&metadata.path)
        .bind(&metadata.title)
        .bind(&metadata.artist)
        .bind(&metadata.album)
        .bind(&metadata.genre)
        .bind(metadata.year)
        .bind(metadata.duration_seconds)
        .bind(metadata.bitrate_kbps)
        .bind(metadata.sample_rate)
        .bind(metadata.channels)
        .bind(metadata.file_size)
        .bind(&metadata.file_hash)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(path = %metadata.path, "upserted track");
        Ok(())
    }

    /// All catalog paths with their content hashes, for scan diffing
    pub async fn list_paths_with_hashes(&self) -> WorkerResult<HashMap<String, String>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT path, file_hash FROM tracks")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }

    /// Delete the rows for files that disappeared from the library
    pub async fn remove_paths(&self, paths: &[String]) -> WorkerResult<u64> {
        if paths.is_empty() {
            return Ok(0);
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM tracks WHERE path IN (");
        let mut values = qb.separated(", ");
        for path in paths {
            values.push_bind(path);
        }
        values.push_unseparated(")");

        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Write analysis measurements to a row; `false` when the path is not
    /// in the catalog
    pub async fn write_analysis(&self, path: &str, analysis: &TrackAnalysis) -> WorkerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tracks SET
                bpm = ?,
                bpm_confidence = ?,
                key_name = ?,
                mode = ?,
                camelot = ?,
                key_confidence = ?,
                peak_db = ?,
                rms_db = ?,
                clipping = ?,
                updated_at = ?
            WHERE path = ?
            "#,
        )
        .bind(analysis.bpm)
        .bind(analysis.bpm_confidence)
        .bind(&analysis.key)
        .bind(&analysis.mode)
        .bind(&analysis.camelot)
        .bind(analysis.key_confidence)
        .bind(analysis.peak_db)
        .bind(analysis.rms_db)
        .bind(analysis.clipping)
        .bind(Utc::now())
        .bind(path)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Null out analysis columns after the file's content changed
    pub async fn clear_analysis(&self, path: &str) -> WorkerResult<()> {
        sqlx::query(
            r#"
            UPDATE tracks SET
                bpm = NULL,
                bpm_confidence = NULL,
                key_name = NULL,
                mode = NULL,
                camelot = NULL,
                key_confidence = NULL,
                peak_db = NULL,
                rms_db = NULL,
                clipping = NULL,
                updated_at = ?
            WHERE path = ?
            "#,
        )
        .bind(Utc::now())
        .bind(path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_by_path(&self, path: &str) -> WorkerResult<Option<Track>> {
        let track = sqlx::query_as::<_, Track>(
            r#"
            SELECT id, path, title, artist, album, genre, year, duration_seconds,
                   bitrate_kbps, sample_rate, channels, file_size, file_hash,
                   bpm, bpm_confidence, key_name, mode, camelot, key_confidence,
                   peak_db, rms_db, clipping
            FROM tracks WHERE path = ?
            "#,
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(track)
    }

    pub async fn count(&self) -> WorkerResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tracks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_store() -> TrackStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory pool");
        let store = TrackStore::new(pool);
        store.init_schema().await.expect("schema");
        store
    }

    fn sample_metadata(path: &str, hash: &str) -> TrackMetadata {
        TrackMetadata {
            path: path.to_string(),
            title: "Midnight Run".to_string(),
            artist: Some("Test Artist".to_string()),
            album: Some("Test Album".to_string()),
            genre: Some("House".to_string()),
            year: Some(2021),
            duration_seconds: Some(312.4),
            bitrate_kbps: Some(320),
            sample_rate: Some(44100),
            channels: Some(2),
            file_size: 12_480_000,
            file_hash: hash.to_string(),
        }
    }

    fn sample_analysis() -> TrackAnalysis {
        TrackAnalysis {
            bpm: 126.0,
            bpm_confidence: 0.82,
            key: "A".to_string(),
            mode: "minor".to_string(),
            camelot: "8A".to_string(),
            key_confidence: 0.74,
            peak_db: -0.3,
            rms_db: -9.8,
            clipping: false,
        }
    }

    #[test]
    fn audio_extension_check_is_case_insensitive() {
        assert!(is_audio_file(Path::new("/music/song.mp3")));
        assert!(is_audio_file(Path::new("/music/song.FLAC")));
        assert!(is_audio_file(Path::new("/music/song.Aiff")));
        assert!(!is_audio_file(Path::new("/music/cover.jpg")));
        assert!(!is_audio_file(Path::new("/music/notes.txt")));
        assert!(!is_audio_file(Path::new("/music/folder")));
    }

    #[test]
    fn collision_suffix_counts_up_from_one() {
        let dir = tempfile::tempdir().expect("tempdir");

        let first = collision_free_destination(dir.path(), "track.mp3");
        assert_eq!(first, dir.path().join("track.mp3"));
        fs::write(&first, b"a").expect("write");

        let second = collision_free_destination(dir.path(), "track.mp3");
        assert_eq!(second, dir.path().join("track (1).mp3"));
        fs::write(&second, b"b").expect("write");

        let third = collision_free_destination(dir.path(), "track.mp3");
        assert_eq!(third, dir.path().join("track (2).mp3"));

        let no_ext = collision_free_destination(dir.path(), "README");
        assert_eq!(no_ext, dir.path().join("README"));
    }

    #[test]
    fn file_hash_matches_known_vector() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data.bin");
        fs::write(&path, b"hello world").expect("write");

        let hash = compute_file_hash(&path).expect("hash");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn unparseable_file_reports_metadata_extraction_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("not-audio.mp3");
        fs::write(&path, b"junk").expect("write");

        let result = read_metadata(&path, "abc");
        assert!(matches!(
            result,
            Err(WorkerError::MetadataExtraction { .. })
        ));
    }

    #[tokio::test]
    async fn upsert_inserts_then_refreshes() {
        let store = memory_store().await;

        store
            .upsert(&sample_metadata("/music/a.flac", "hash-1"))
            .await
            .expect("insert");
        assert_eq!(store.count().await.expect("count"), 1);

        let mut changed = sample_metadata("/music/a.flac", "hash-2");
        changed.title = "Midnight Run (Extended Mix)".to_string();
        store.upsert(&changed).await.expect("update");

        assert_eq!(store.count().await.expect("count"), 1);
        let track = store
            .get_by_path("/music/a.flac")
            .await
            .expect("query")
            .expect("present");
        assert_eq!(track.title, "Midnight Run (Extended Mix)");
        assert_eq!(track.file_hash, "hash-2");
    }

    #[tokio::test]
    async fn upsert_preserves_existing_analysis() {
        let store = memory_store().await;
        store
            .upsert(&sample_metadata("/music/a.flac", "hash-1"))
            .await
            .expect("insert");
        store
            .write_analysis("/music/a.flac", &sample_analysis())
            .await
            .expect("analysis");

        store
            .upsert(&sample_metadata("/music/a.flac", "hash-1"))
            .await
            .expect("refresh");

        let track = store
            .get_by_path("/music/a.flac")
            .await
            .expect("query")
            .expect("present");
        assert!(track.is_analyzed());
        assert_eq!(track.bpm, Some(126.0));
    }

    #[tokio::test]
    async fn list_paths_with_hashes_maps_the_catalog() {
        let store = memory_store().await;
        store
            .upsert(&sample_metadata("/music/a.flac", "hash-a"))
            .await
            .expect("insert");
        store
            .upsert(&sample_metadata("/music/b.mp3", "hash-b"))
            .await
            .expect("insert");

        let map = store.list_paths_with_hashes().await.expect("list");
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("/music/a.flac").map(String::as_str), Some("hash-a"));
        assert_eq!(map.get("/music/b.mp3").map(String::as_str), Some("hash-b"));
    }

    #[tokio::test]
    async fn remove_paths_deletes_only_the_listed_rows() {
        let store = memory_store().await;
        for (path, hash) in [
            ("/music/a.flac", "ha"),
            ("/music/b.mp3", "hb"),
            ("/music/c.ogg", "hc"),
        ] {
            store
                .upsert(&sample_metadata(path, hash))
                .await
                .expect("insert");
        }

        let removed = store
            .remove_paths(&["/music/a.flac".to_string(), "/music/c.ogg".to_string()])
            .await
            .expect("remove");
        assert_eq!(removed, 2);
        assert_eq!(store.count().await.expect("count"), 1);
        assert!(store
            .get_by_path("/music/b.mp3")
            .await
            .expect("query")
            .is_some());

        let none_removed = store.remove_paths(&[]).await.expect("remove empty");
        assert_eq!(none_removed, 0);
    }

    #[tokio::test]
    async fn write_analysis_round_trips() {
        let store = memory_store().await;
        store
            .upsert(&sample_metadata("/music/a.flac", "hash-1"))
            .await
            .expect("insert");

        let wrote = store
            .write_analysis("/music/a.flac", &sample_analysis())
            .await
            .expect("write");
        assert!(wrote);

        let track = store
            .get_by_path("/music/a.flac")
            .await
            .expect("query")
            .expect("present");
        assert!(track.is_analyzed());
        assert_eq!(track.key_name.as_deref(), Some("A"));
        assert_eq!(track.mode.as_deref(), Some("minor"));
        assert_eq!(track.camelot.as_deref(), Some("8A"));
        assert_eq!(track.clipping, Some(false));

        let missing = store
            .write_analysis("/music/nope.flac", &sample_analysis())
            .await
            .expect("write missing");
        assert!(!missing);
    }

    #[tokio::test]
    async fn clear_analysis_nulls_the_measurements() {
        let store = memory_store().await;
        store
            .upsert(&sample_metadata("/music/a.flac", "hash-1"))
            .await
            .expect("insert");
        store
            .write_analysis("/music/a.flac", &sample_analysis())
            .await
            .expect("write");

        store
            .clear_analysis("/music/a.flac")
            .await
            .expect("clear");

        let track = store
            .get_by_path("/music/a.flac")
            .await
            .expect("query")
            .expect("present");
        assert!(!track.is_analyzed());
        assert!(track.key_name.is_none());
        assert!(track.clipping.is_none());
    }
}
