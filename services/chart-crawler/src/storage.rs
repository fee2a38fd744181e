//!
//! src/storage.rs
//!
//! Sqlite persistence for the crawler. The short-term database holds the
//! current day's charts plus the hourly metrics gathered against them; at
//! the start of each daily run it is copied into the long-term database
//! and emptied.
//!
//! Every unit of work takes its own transaction from the connection
//! factory that was handed to the store.
//!

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use serde_json::{Map, Value};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous},
    Column, Pool, Row, Sqlite, Transaction, TypeInfo, ValueRef
};
use tracing::{debug, info};

use crate::errors::CrawlerError;
use crate::normalize::normalize_tempo;
use crate::types::{AudioAttributes, ChartEntry, Snapshot};

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Filesystem path of a `sqlite:` url, without its query string.
fn database_path(database_url: &str) -> &Path {
    let rest = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);
    Path::new(rest.split('?').next().unwrap_or(rest))
}

/// Owns the pool for one database and hands out transactions.
#[derive(Clone, Debug)]
pub struct ConnectionFactory {
    pool: Pool<Sqlite>
}

impl ConnectionFactory {
    pub async fn open(database_url: &str) -> Result<Self, CrawlerError> {
        let is_memory = database_url == "sqlite::memory:";

        let mut opts = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // WAL is file-only
        if !is_memory {
            opts = opts.journal_mode(SqliteJournalMode::Wal)
                       .synchronous(SqliteSynchronous::Normal);
            if let Some(parent) = database_path(database_url).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        // an in-memory database lives exactly as long as its one connection
        let mut pool_opts = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(if is_memory {1} else {4});
        if is_memory {
            pool_opts = pool_opts.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_opts.connect_with(opts).await?;
        Ok( Self { pool })
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, CrawlerError> {
        Ok(self.pool.begin().await?)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

async fn apply_schema(db: &ConnectionFactory, ddl: &[&str]) -> Result<(), CrawlerError> {
    let mut tx = db.begin().await?;
    for statement in ddl {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    Ok(())
}

const SHORT_TERM_SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS track (
      id            TEXT PRIMARY KEY,
      name          TEXT NOT NULL,
      spotify_rank  INTEGER,
      tiktok_rank   INTEGER,
      in_spotify    INTEGER NOT NULL,
      in_tiktok     INTEGER NOT NULL,
      danceability  REAL,
      energy        REAL,
      valence       REAL,
      tempo         REAL,
      speechiness   REAL,
      recorded_at   INTEGER NOT NULL
    );",
    r"
    CREATE TABLE IF NOT EXISTS artist (
      id            TEXT PRIMARY KEY,
      name          TEXT NOT NULL,
      popularity    INTEGER,
      followers     INTEGER,
      recorded_at   INTEGER NOT NULL
    );",
    r"
    CREATE TABLE IF NOT EXISTS genre (
      id    INTEGER PRIMARY KEY AUTOINCREMENT,
      name  TEXT NOT NULL UNIQUE
    );",
    r"
    CREATE TABLE IF NOT EXISTS artist_genre (
      artist_id  TEXT NOT NULL REFERENCES artist(id),
      genre_id   INTEGER NOT NULL REFERENCES genre(id),
      PRIMARY KEY (artist_id, genre_id)
    );",
    r"
    CREATE TABLE IF NOT EXISTS track_artist (
      track_id   TEXT NOT NULL REFERENCES track(id),
      artist_id  TEXT NOT NULL REFERENCES artist(id),
      position   INTEGER NOT NULL,
      PRIMARY KEY (track_id, artist_id)
    );",
    r"
    CREATE TABLE IF NOT EXISTS track_popularity (
      track_id     TEXT NOT NULL REFERENCES track(id),
      popularity   INTEGER,
      recorded_at  INTEGER NOT NULL,
      PRIMARY KEY (track_id, recorded_at)
    );",
    r"
    CREATE TABLE IF NOT EXISTS artist_popularity (
      artist_id    TEXT NOT NULL REFERENCES artist(id),
      popularity   INTEGER,
      followers    INTEGER,
      recorded_at  INTEGER NOT NULL,
      PRIMARY KEY (artist_id, recorded_at)
    );",
    r"
    CREATE TABLE IF NOT EXISTS tiktok_track_views (
      track_id     TEXT NOT NULL REFERENCES track(id),
      views        REAL,
      recorded_at  INTEGER NOT NULL,
      PRIMARY KEY (track_id, recorded_at)
    );",
    r"
    CREATE TABLE IF NOT EXISTS tiktok_artist_views (
      artist_id    TEXT NOT NULL REFERENCES artist(id),
      followers    REAL,
      likes        REAL,
      recorded_at  INTEGER NOT NULL,
      PRIMARY KEY (artist_id, recorded_at)
    );",
];

/// Short-term tables, children first so deleting in this order never
/// trips a foreign key.
pub const SHORT_TERM_TABLES: [&str; 9] = [
    "artist_genre",
    "track_artist",
    "track_popularity",
    "artist_popularity",
    "tiktok_track_views",
    "tiktok_artist_views",
    "genre",
    "artist",
    "track",
];

/// A track row read back with its artist names in credit order.
/// `attributes.tempo` is the normalized value that was stored.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTrack {
    pub id: String,
    pub name: String,
    pub spotify_rank: Option<i64>,
    pub tiktok_rank: Option<i64>,
    pub attributes: AudioAttributes,
    pub artists: Vec<String>,
    pub recorded_at: i64
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredArtist {
    pub id: String,
    pub name: String,
    pub genres: Vec<String>,
    pub popularity: Option<i64>,
    pub followers: Option<i64>,
    pub recorded_at: i64
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackPopularity {
    pub track_id: String,
    pub popularity: Option<i64>,
    pub recorded_at: i64
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArtistPopularity {
    pub artist_id: String,
    pub popularity: Option<i64>,
    pub followers: Option<i64>,
    pub recorded_at: i64
}

/// View counts are in hundred-thousands.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackViews {
    pub track_id: String,
    pub views: Option<f64>,
    pub recorded_at: i64
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArtistViews {
    pub artist_id: String,
    pub followers: Option<f64>,
    pub likes: Option<f64>,
    pub recorded_at: i64
}

pub struct ShortTermStore {
    db: ConnectionFactory
}

impl ShortTermStore {
    pub async fn init(db: ConnectionFactory) -> Result<Self, CrawlerError> {
        apply_schema(&db, SHORT_TERM_SCHEMA).await?;
        Ok( Self { db })
    }

    ///
    /// Writes one resolved entry with its artists and genres in a single
    /// transaction. Rows that already exist are left as they are.
    ///
    pub async fn write_entry(&self, entry: &ChartEntry) -> Result<(), CrawlerError> {
        let Some(track_id) = entry.resolved_track_id.as_deref() else {
            return Err(CrawlerError::Db(format!("refusing unresolved entry {}", entry.name)));
        };
        let attrs = entry.audio_attributes.clone().unwrap_or_default();
        let recorded_at = now();

        let mut tx = self.db.begin().await?;
        sqlx::query(
            r"
            INSERT INTO track (
              id, name, spotify_rank, tiktok_rank, in_spotify, in_tiktok,
              danceability, energy, valence, tempo, speechiness, recorded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(id) DO NOTHING;
            "
        )
        .bind(track_id)
        .bind(&entry.name)
        .bind(entry.spotify_rank.map(i64::from))
        .bind(entry.tiktok_rank.map(i64::from))
        .bind(i32::from(entry.in_spotify()))
        .bind(i32::from(entry.in_tiktok()))
        .bind(attrs.danceability)
        .bind(attrs.energy)
        .bind(attrs.valence)
        .bind(attrs.tempo.map(normalize_tempo))
        .bind(attrs.speechiness)
        .bind(recorded_at)
        .execute(&mut *tx)
        .await?;

        for (position, artist) in entry.resolved_artists.iter().enumerate() {
            sqlx::query(
                r"
                INSERT INTO artist (id, name, popularity, followers, recorded_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(id) DO NOTHING;
                "
            )
            .bind(&artist.id)
            .bind(&artist.name)
            .bind(artist.popularity)
            .bind(artist.followers)
            .bind(recorded_at)
            .execute(&mut *tx)
            .await?;

            for genre in &artist.genres {
                sqlx::query("INSERT INTO genre (name) VALUES (?1) ON CONFLICT(name) DO NOTHING;")
                    .bind(genre)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query(
                    r"
                    INSERT INTO artist_genre (artist_id, genre_id)
                    SELECT ?1, id FROM genre WHERE name = ?2
                    ON CONFLICT DO NOTHING;
                    "
                )
                .bind(&artist.id)
                .bind(genre)
                .execute(&mut *tx)
                .await?;
            }

            sqlx::query(
                r"
                INSERT INTO track_artist (track_id, artist_id, position)
                VALUES (?1, ?2, ?3)
                ON CONFLICT DO NOTHING;
                "
            )
            .bind(track_id)
            .bind(&artist.id)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(track = %entry.name, id = %track_id, "store.write");
        Ok(())
    }

    pub async fn read_entries(&self) -> Result<Vec<StoredTrack>, CrawlerError> {
        let mut artists: HashMap<String, Vec<String>> = HashMap::new();
        let links = sqlx::query(
            r"
            SELECT ta.track_id, a.name
              FROM track_artist ta JOIN artist a ON a.id = ta.artist_id
             ORDER BY ta.track_id, ta.position;
            "
        )
        .fetch_all(self.db.pool())
        .await?;
        for r in links {
            artists.entry(r.get("track_id")).or_default().push(r.get("name"));
        }

        let rows = sqlx::query(
            r"
            SELECT id, name, spotify_rank, tiktok_rank, danceability, energy,
                   valence, tempo, speechiness, recorded_at
              FROM track ORDER BY rowid;
            "
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok( rows.into_iter().map(|r| {
            let id: String = r.get("id");
            StoredTrack {
                artists: artists.remove(&id).unwrap_or_default(),
                id,
                name: r.get("name"),
                spotify_rank: r.get("spotify_rank"),
                tiktok_rank: r.get("tiktok_rank"),
                attributes: AudioAttributes {
                    danceability: r.get("danceability"),
                    energy: r.get("energy"),
                    valence: r.get("valence"),
                    tempo: r.get("tempo"),
                    speechiness: r.get("speechiness")
                },
                recorded_at: r.get("recorded_at")
            }
        }).collect())
    }

    pub async fn read_artists(&self) -> Result<Vec<StoredArtist>, CrawlerError> {
        let mut genres: HashMap<String, Vec<String>> = HashMap::new();
        let links = sqlx::query(
            r"
            SELECT ag.artist_id, g.name
              FROM artist_genre ag JOIN genre g ON g.id = ag.genre_id
             ORDER BY ag.artist_id, g.id;
            "
        )
        .fetch_all(self.db.pool())
        .await?;
        for r in links {
            genres.entry(r.get("artist_id")).or_default().push(r.get("name"));
        }

        let rows = sqlx::query(
            "SELECT id, name, popularity, followers, recorded_at FROM artist ORDER BY rowid;"
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok( rows.into_iter().map(|r| {
            let id: String = r.get("id");
            StoredArtist {
                genres: genres.remove(&id).unwrap_or_default(),
                id,
                name: r.get("name"),
                popularity: r.get("popularity"),
                followers: r.get("followers"),
                recorded_at: r.get("recorded_at")
            }
        }).collect())
    }

    pub async fn read_links(&self) -> Result<Vec<(String, String)>, CrawlerError> {
        let rows = sqlx::query("SELECT track_id, artist_id FROM track_artist ORDER BY rowid;")
            .fetch_all(self.db.pool())
            .await?;
        Ok( rows.into_iter().map(|r| (r.get("track_id"), r.get("artist_id"))).collect())
    }

    async fn single_column(&self, sql: &str) -> Result<Vec<String>, CrawlerError> {
        let rows = sqlx::query(sql).fetch_all(self.db.pool()).await?;
        Ok( rows.into_iter().map(|r| r.get::<String, _>(0)).collect())
    }

    pub async fn track_names(&self) -> Result<Vec<String>, CrawlerError> {
        self.single_column("SELECT name FROM track ORDER BY rowid;").await
    }

    pub async fn artist_names(&self) -> Result<Vec<String>, CrawlerError> {
        self.single_column("SELECT name FROM artist ORDER BY rowid;").await
    }

    pub async fn track_ids(&self) -> Result<Vec<String>, CrawlerError> {
        self.single_column("SELECT id FROM track ORDER BY rowid;").await
    }

    pub async fn artist_ids(&self) -> Result<Vec<String>, CrawlerError> {
        self.single_column("SELECT id FROM artist ORDER BY rowid;").await
    }

    pub async fn snapshot(&self) -> Result<Snapshot, CrawlerError> {
        Ok( Snapshot {
            track_names: self.track_names().await?,
            artist_names: self.artist_names().await?
        })
    }

    pub async fn is_empty(&self) -> Result<bool, CrawlerError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM track;")
            .fetch_one(self.db.pool())
            .await?;
        Ok(count == 0)
    }

    pub async fn add_track_popularity(
        &self,
        track_id: &str,
        popularity: Option<i64>,
        recorded_at: i64
    ) -> Result<(), CrawlerError> {
        let mut tx = self.db.begin().await?;
        sqlx::query(
            r"
            INSERT INTO track_popularity (track_id, popularity, recorded_at)
            VALUES (?1, ?2, ?3) ON CONFLICT DO NOTHING;
            "
        )
        .bind(track_id)
        .bind(popularity)
        .bind(recorded_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn add_artist_popularity(
        &self,
        artist_id: &str,
        popularity: Option<i64>,
        followers: Option<i64>,
        recorded_at: i64
    ) -> Result<(), CrawlerError> {
        let mut tx = self.db.begin().await?;
        sqlx::query(
            r"
            INSERT INTO artist_popularity (artist_id, popularity, followers, recorded_at)
            VALUES (?1, ?2, ?3, ?4) ON CONFLICT DO NOTHING;
            "
        )
        .bind(artist_id)
        .bind(popularity)
        .bind(followers)
        .bind(recorded_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn add_track_views(
        &self,
        track_id: &str,
        views: Option<f64>,
        recorded_at: i64
    ) -> Result<(), CrawlerError> {
        let mut tx = self.db.begin().await?;
        sqlx::query(
            r"
            INSERT INTO tiktok_track_views (track_id, views, recorded_at)
            VALUES (?1, ?2, ?3) ON CONFLICT DO NOTHING;
            "
        )
        .bind(track_id)
        .bind(views)
        .bind(recorded_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn add_artist_views(
        &self,
        artist_id: &str,
        followers: Option<f64>,
        likes: Option<f64>,
        recorded_at: i64
    ) -> Result<(), CrawlerError> {
        let mut tx = self.db.begin().await?;
        sqlx::query(
            r"
            INSERT INTO tiktok_artist_views (artist_id, followers, likes, recorded_at)
            VALUES (?1, ?2, ?3, ?4) ON CONFLICT DO NOTHING;
            "
        )
        .bind(artist_id)
        .bind(followers)
        .bind(likes)
        .bind(recorded_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn read_track_popularity(&self) -> Result<Vec<TrackPopularity>, CrawlerError> {
        let rows = sqlx::query("SELECT track_id, popularity, recorded_at FROM track_popularity;")
            .fetch_all(self.db.pool())
            .await?;
        Ok( rows.into_iter().map(|r| TrackPopularity {
            track_id: r.get("track_id"),
            popularity: r.get("popularity"),
            recorded_at: r.get("recorded_at")
        }).collect())
    }

    pub async fn read_artist_popularity(&self) -> Result<Vec<ArtistPopularity>, CrawlerError> {
        let rows = sqlx::query(
            "SELECT artist_id, popularity, followers, recorded_at FROM artist_popularity;"
        )
        .fetch_all(self.db.pool())
        .await?;
        Ok( rows.into_iter().map(|r| ArtistPopularity {
            artist_id: r.get("artist_id"),
            popularity: r.get("popularity"),
            followers: r.get("followers"),
            recorded_at: r.get("recorded_at")
        }).collect())
    }

    pub async fn read_track_views(&self) -> Result<Vec<TrackViews>, CrawlerError> {
        let rows = sqlx::query("SELECT track_id, views, recorded_at FROM tiktok_track_views;")
            .fetch_all(self.db.pool())
            .await?;
        Ok( rows.into_iter().map(|r| TrackViews {
            track_id: r.get("track_id"),
            views: r.get("views"),
            recorded_at: r.get("recorded_at")
        }).collect())
    }

    pub async fn read_artist_views(&self) -> Result<Vec<ArtistViews>, CrawlerError> {
        let rows = sqlx::query(
            "SELECT artist_id, followers, likes, recorded_at FROM tiktok_artist_views;"
        )
        .fetch_all(self.db.pool())
        .await?;
        Ok( rows.into_iter().map(|r| ArtistViews {
            artist_id: r.get("artist_id"),
            followers: r.get("followers"),
            likes: r.get("likes"),
            recorded_at: r.get("recorded_at")
        }).collect())
    }

    /// Every row of a short-term table as a json array, for archiving.
    pub async fn dump_table(&self, table: &str) -> Result<Value, CrawlerError> {
        if !SHORT_TERM_TABLES.contains(&table) {
            return Err(CrawlerError::Db(format!("unknown table {table}")));
        }
        let rows = sqlx::query(&format!("SELECT * FROM {table} ORDER BY rowid;"))
            .fetch_all(self.db.pool())
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(row_to_json(row)?);
        }
        Ok(Value::Array(out))
    }

    pub async fn clear(&self) -> Result<(), CrawlerError> {
        let mut tx = self.db.begin().await?;
        for table in SHORT_TERM_TABLES {
            sqlx::query(&format!("DELETE FROM {table};")).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        info!("store.cleared");
        Ok(())
    }
}

fn row_to_json(row: &SqliteRow) -> Result<Value, CrawlerError> {
    let mut object = Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        let (is_null, kind) = {
            let raw = row.try_get_raw(i)?;
            (raw.is_null(), raw.type_info().name().to_string())
        };
        let value = if is_null {
            Value::Null
        } else {
            match kind.as_str() {
                "INTEGER" => Value::from(row.try_get::<i64, _>(i)?),
                "REAL"    => Value::from(row.try_get::<f64, _>(i)?),
                _         => Value::from(row.try_get::<String, _>(i)?)
            }
        };
        object.insert(column.name().to_string(), value);
    }
    Ok(Value::Object(object))
}

const LONG_TERM_SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS track (
      id            TEXT NOT NULL,
      recorded_at   INTEGER NOT NULL,
      name          TEXT NOT NULL,
      spotify_rank  INTEGER,
      tiktok_rank   INTEGER,
      in_spotify    INTEGER NOT NULL,
      in_tiktok     INTEGER NOT NULL,
      danceability  REAL,
      energy        REAL,
      valence       REAL,
      tempo         REAL,
      speechiness   REAL,
      PRIMARY KEY (id, recorded_at)
    );",
    r"
    CREATE TABLE IF NOT EXISTS artist (
      id            TEXT NOT NULL,
      recorded_at   INTEGER NOT NULL,
      name          TEXT NOT NULL,
      genres        TEXT NOT NULL,
      popularity    INTEGER,
      followers     INTEGER,
      PRIMARY KEY (id, recorded_at)
    );",
    r"
    CREATE TABLE IF NOT EXISTS track_artist (
      track_id     TEXT NOT NULL,
      artist_id    TEXT NOT NULL,
      recorded_at  INTEGER NOT NULL,
      PRIMARY KEY (track_id, artist_id, recorded_at)
    );",
    r"
    CREATE TABLE IF NOT EXISTS track_popularity (
      track_id     TEXT NOT NULL,
      popularity   INTEGER,
      recorded_at  INTEGER NOT NULL,
      PRIMARY KEY (track_id, recorded_at)
    );",
    r"
    CREATE TABLE IF NOT EXISTS artist_popularity (
      artist_id    TEXT NOT NULL,
      popularity   INTEGER,
      followers    INTEGER,
      recorded_at  INTEGER NOT NULL,
      PRIMARY KEY (artist_id, recorded_at)
    );",
    r"
    CREATE TABLE IF NOT EXISTS tiktok_track_views (
      track_id     TEXT NOT NULL,
      views        REAL,
      recorded_at  INTEGER NOT NULL,
      PRIMARY KEY (track_id, recorded_at)
    );",
    r"
    CREATE TABLE IF NOT EXISTS tiktok_artist_views (
      artist_id    TEXT NOT NULL,
      followers    REAL,
      likes        REAL,
      recorded_at  INTEGER NOT NULL,
      PRIMARY KEY (artist_id, recorded_at)
    );",
];

pub struct LongTermStore {
    db: ConnectionFactory
}

impl LongTermStore {
    pub async fn init(db: ConnectionFactory) -> Result<Self, CrawlerError> {
        apply_schema(&db, LONG_TERM_SCHEMA).await?;
        Ok( Self { db })
    }

    ///
    /// Copies the short-term contents in one transaction. Tracks are keyed
    /// by id and the time they were recorded, so a track charting on many
    /// days keeps one row per day. Returns the number of new track rows.
    ///
    pub async fn absorb(&self, short: &ShortTermStore) -> Result<u64, CrawlerError> {
        let tracks  = short.read_entries().await?;
        let artists = short.read_artists().await?;
        let links   = short.read_links().await?;
        let track_pop  = short.read_track_popularity().await?;
        let artist_pop = short.read_artist_popularity().await?;
        let track_views  = short.read_track_views().await?;
        let artist_views = short.read_artist_views().await?;

        let recorded: HashMap<&str, i64> = tracks.iter()
            .map(|t| (t.id.as_str(), t.recorded_at))
            .collect();

        let mut tx = self.db.begin().await?;
        let mut inserted = 0;

        for t in &tracks {
            let a = &t.attributes;
            inserted += sqlx::query(
                r"
                INSERT INTO track (
                  id, recorded_at, name, spotify_rank, tiktok_rank, in_spotify,
                  in_tiktok, danceability, energy, valence, tempo, speechiness
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                ON CONFLICT DO NOTHING;
                "
            )
            .bind(&t.id)
            .bind(t.recorded_at)
            .bind(&t.name)
            .bind(t.spotify_rank)
            .bind(t.tiktok_rank)
            .bind(i32::from(t.spotify_rank.is_some()))
            .bind(i32::from(t.tiktok_rank.is_some()))
            .bind(a.danceability)
            .bind(a.energy)
            .bind(a.valence)
            .bind(a.tempo)
            .bind(a.speechiness)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        for artist in &artists {
            sqlx::query(
                r"
                INSERT INTO artist (id, recorded_at, name, genres, popularity, followers)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6) ON CONFLICT DO NOTHING;
                "
            )
            .bind(&artist.id)
            .bind(artist.recorded_at)
            .bind(&artist.name)
            .bind(artist.genres.join(", "))
            .bind(artist.popularity)
            .bind(artist.followers)
            .execute(&mut *tx)
            .await?;
        }

        for (track_id, artist_id) in &links {
            let at = recorded.get(track_id.as_str()).copied().unwrap_or_default();
            sqlx::query(
                r"
                INSERT INTO track_artist (track_id, artist_id, recorded_at)
                VALUES (?1, ?2, ?3) ON CONFLICT DO NOTHING;
                "
            )
            .bind(track_id)
            .bind(artist_id)
            .bind(at)
            .execute(&mut *tx)
            .await?;
        }

        for p in &track_pop {
            sqlx::query(
                r"
                INSERT INTO track_popularity (track_id, popularity, recorded_at)
                VALUES (?1, ?2, ?3) ON CONFLICT DO NOTHING;
                "
            )
            .bind(&p.track_id)
            .bind(p.popularity)
            .bind(p.recorded_at)
            .execute(&mut *tx)
            .await?;
        }

        for p in &artist_pop {
            sqlx::query(
                r"
                INSERT INTO artist_popularity (artist_id, popularity, followers, recorded_at)
                VALUES (?1, ?2, ?3, ?4) ON CONFLICT DO NOTHING;
                "
            )
            .bind(&p.artist_id)
            .bind(p.popularity)
            .bind(p.followers)
            .bind(p.recorded_at)
            .execute(&mut *tx)
            .await?;
        }

        for v in &track_views {
            sqlx::query(
                r"
                INSERT INTO tiktok_track_views (track_id, views, recorded_at)
                VALUES (?1, ?2, ?3) ON CONFLICT DO NOTHING;
                "
            )
            .bind(&v.track_id)
            .bind(v.views)
            .bind(v.recorded_at)
            .execute(&mut *tx)
            .await?;
        }

        for v in &artist_views {
            sqlx::query(
                r"
                INSERT INTO tiktok_artist_views (artist_id, followers, likes, recorded_at)
                VALUES (?1, ?2, ?3, ?4) ON CONFLICT DO NOTHING;
                "
            )
            .bind(&v.artist_id)
            .bind(v.followers)
            .bind(v.likes)
            .bind(v.recorded_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(tracks = tracks.len(), inserted, artists = artists.len(), "longterm.absorb");
        Ok(inserted)
    }

    pub async fn track_count(&self) -> Result<i64, CrawlerError> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM track;")
            .fetch_one(self.db.pool())
            .await?)
    }

}
