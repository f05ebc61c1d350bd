//! Postgres implementation of the store seams.

use anyhow::{anyhow, Context, Result};
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use super::action_log::ActionValue;
use super::models::{
    Game, Installer, InstallerRevision, Platform, Provider, ProviderPayload, ProviderRecord,
    ResourceKind, Revision, Version, PLACEHOLDER_VERSION,
};
use super::store::{ActionLogStore, CatalogStore, InstallerStore};
use crate::util::db::Db;

const GAME_COLUMNS: &str =
    "g.id, g.name, g.slug, g.year, g.description, g.coverart, g.is_public, g.change_for_id";
const RECORD_COLUMNS: &str =
    "id, provider_id, kind, internal_id, slug, name, metadata, updated_at";
const INSTALLER_COLUMNS: &str =
    "id, game_id, slug, runner, version, description, notes, content, published";

#[derive(Clone)]
pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Loads games matching `where_sql` (aliased as `g`) together with their link sets.
    async fn load_games(&self, where_sql: &str, binds: GameFilter<'_>) -> Result<Vec<Game>> {
        let sql = format!("SELECT {GAME_COLUMNS} FROM games g WHERE {where_sql} ORDER BY g.id");
        let query = sqlx::query(&sql).persistent(false);
        let query = match binds {
            GameFilter::Id(id) => query.bind(id),
            GameFilter::Text(s) => query.bind(s.to_string()),
            GameFilter::IdText(id, s) => query.bind(id).bind(s.to_string()),
        };
        let rows = query.fetch_all(&self.db.pool).await?;
        let mut games: Vec<Game> = rows.iter().map(game_from_row).collect::<Result<_>>()?;
        if games.is_empty() {
            return Ok(games);
        }
        let ids: Vec<i64> = games.iter().map(|g| g.id).collect();

        let mut platforms: HashMap<i64, BTreeSet<i64>> = HashMap::new();
        for row in sqlx::query(
            "SELECT game_id, platform_id FROM game_platforms WHERE game_id = ANY($1)",
        )
        .persistent(false)
        .bind(&ids)
        .fetch_all(&self.db.pool)
        .await?
        {
            platforms
                .entry(row.try_get("game_id")?)
                .or_default()
                .insert(row.try_get("platform_id")?);
        }
        let mut records: HashMap<i64, BTreeSet<i64>> = HashMap::new();
        for row in sqlx::query(
            "SELECT game_id, provider_record_id FROM game_provider_records WHERE game_id = ANY($1)",
        )
        .persistent(false)
        .bind(&ids)
        .fetch_all(&self.db.pool)
        .await?
        {
            records
                .entry(row.try_get("game_id")?)
                .or_default()
                .insert(row.try_get("provider_record_id")?);
        }
        for game in &mut games {
            game.platform_ids = platforms.remove(&game.id).unwrap_or_default();
            game.provider_record_ids = records.remove(&game.id).unwrap_or_default();
        }
        Ok(games)
    }

    async fn load_records(
        &self,
        where_sql: &str,
        provider_id: i64,
        kind: ResourceKind,
        key: RecordKey<'_>,
    ) -> Result<Vec<ProviderRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM provider_records \
             WHERE provider_id = $1 AND kind = $2 {where_sql} ORDER BY id"
        );
        let query = sqlx::query(&sql)
            .persistent(false)
            .bind(provider_id)
            .bind(kind.as_str());
        let query = match key {
            RecordKey::None => query,
            RecordKey::InternalId(id) => query.bind(id),
            RecordKey::Slug(slug) => query.bind(slug.to_string()),
        };
        query
            .fetch_all(&self.db.pool)
            .await?
            .iter()
            .map(record_from_row)
            .collect()
    }
}

enum GameFilter<'a> {
    Id(i64),
    Text(&'a str),
    IdText(i64, &'a str),
}

enum RecordKey<'a> {
    None,
    InternalId(i64),
    Slug(&'a str),
}

fn game_from_row(row: &PgRow) -> Result<Game> {
    Ok(Game {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
        year: row.try_get("year")?,
        description: row.try_get("description")?,
        coverart: row.try_get("coverart")?,
        is_public: row.try_get("is_public")?,
        change_for: row.try_get("change_for_id")?,
        platform_ids: BTreeSet::new(),
        provider_record_ids: BTreeSet::new(),
    })
}

fn record_from_row(row: &PgRow) -> Result<ProviderRecord> {
    let kind: String = row.try_get("kind")?;
    Ok(ProviderRecord {
        id: row.try_get("id")?,
        provider_id: row.try_get("provider_id")?,
        kind: ResourceKind::parse(&kind)
            .ok_or_else(|| anyhow!("unknown provider record kind {kind:?}"))?,
        internal_id: row.try_get("internal_id")?,
        slug: row.try_get("slug")?,
        name: row.try_get("name")?,
        metadata: row.try_get("metadata")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn installer_from_row(row: &PgRow) -> Result<Installer> {
    Ok(Installer {
        id: row.try_get("id")?,
        game_id: row.try_get("game_id")?,
        slug: row.try_get("slug")?,
        runner: row.try_get("runner")?,
        version: row.try_get("version")?,
        description: row.try_get("description")?,
        notes: row.try_get("notes")?,
        content: row.try_get("content")?,
        published: row.try_get("published")?,
    })
}

fn version_from_row(row: &PgRow) -> Result<Version> {
    Ok(Version {
        id: row.try_get("id")?,
        revision_id: row.try_get("revision_id")?,
        content_type: row.try_get("content_type")?,
        object_id: row.try_get("object_id")?,
        serialized_data: row.try_get("serialized_data")?,
    })
}

fn platform_from_row(row: &PgRow) -> Result<Platform> {
    Ok(Platform {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
        igdb_id: row.try_get("igdb_id")?,
    })
}

#[async_trait::async_trait]
impl InstallerStore for PgStore {
    async fn revisions_with_first_version(&self) -> Result<Vec<(Revision, Option<Version>)>> {
        let rows = sqlx::query(
            "SELECT r.id AS rid, r.comment, \
                    v.id, v.revision_id, v.content_type, v.object_id, v.serialized_data \
             FROM revisions r \
             LEFT JOIN LATERAL ( \
                SELECT * FROM versions WHERE revision_id = r.id ORDER BY id LIMIT 1 \
             ) v ON TRUE \
             ORDER BY r.id",
        )
        .persistent(false)
        .fetch_all(&self.db.pool)
        .await
        .context("loading revisions")?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let revision = Revision {
                id: row.try_get("rid")?,
                comment: row.try_get("comment")?,
            };
            let version_id: Option<i64> = row.try_get("id")?;
            let version = match version_id {
                Some(_) => Some(version_from_row(row)?),
                None => None,
            };
            out.push((revision, version));
        }
        Ok(out)
    }

    async fn installer(&self, id: i64) -> Result<Option<Installer>> {
        let sql = format!("SELECT {INSTALLER_COLUMNS} FROM installers WHERE id = $1");
        sqlx::query(&sql)
            .persistent(false)
            .bind(id)
            .fetch_optional(&self.db.pool)
            .await?
            .as_ref()
            .map(installer_from_row)
            .transpose()
    }

    async fn accept_revision(
        &self,
        submission: &InstallerRevision,
        installer: &Installer,
    ) -> Result<()> {
        let mut promoted = installer.clone();
        submission.apply_to(&mut promoted);
        let mut tx = self.db.pool.begin().await?;
        sqlx::query(
            "UPDATE installers SET runner = $2, version = $3, description = $4, notes = $5, \
             content = $6 WHERE id = $1",
        )
        .persistent(false)
        .bind(promoted.id)
        .bind(&promoted.runner)
        .bind(&promoted.version)
        .bind(&promoted.description)
        .bind(&promoted.notes)
        .bind(&promoted.content)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM revisions WHERE id = $1")
            .persistent(false)
            .bind(submission.revision_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_revision(&self, revision_id: i64) -> Result<()> {
        // versions cascade
        sqlx::query("DELETE FROM revisions WHERE id = $1")
            .persistent(false)
            .bind(revision_id)
            .execute(&self.db.pool)
            .await?;
        Ok(())
    }

    async fn versions_of_type(&self, content_type: &str) -> Result<Vec<Version>> {
        sqlx::query(
            "SELECT id, revision_id, content_type, object_id, serialized_data \
             FROM versions WHERE content_type = $1 ORDER BY id",
        )
        .persistent(false)
        .bind(content_type)
        .fetch_all(&self.db.pool)
        .await?
        .iter()
        .map(version_from_row)
        .collect()
    }

    async fn delete_version(&self, version_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM versions WHERE id = $1")
            .persistent(false)
            .bind(version_id)
            .execute(&self.db.pool)
            .await?;
        Ok(())
    }

    async fn delete_empty_revisions(&self) -> Result<u64> {
        let res = sqlx::query(
            "DELETE FROM revisions r WHERE NOT EXISTS \
             (SELECT 1 FROM versions v WHERE v.revision_id = r.id)",
        )
        .persistent(false)
        .execute(&self.db.pool)
        .await?;
        Ok(res.rows_affected())
    }

    async fn abandoned_installers(&self) -> Result<Vec<Installer>> {
        let sql = format!(
            "SELECT {INSTALLER_COLUMNS} FROM installers i \
             WHERE NOT i.published AND i.version = $1 \
             AND NOT EXISTS (SELECT 1 FROM versions v WHERE v.object_id = i.id) \
             ORDER BY i.id"
        );
        sqlx::query(&sql)
            .persistent(false)
            .bind(PLACEHOLDER_VERSION)
            .fetch_all(&self.db.pool)
            .await?
            .iter()
            .map(installer_from_row)
            .collect()
    }

    async fn delete_installer(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM installers WHERE id = $1")
            .persistent(false)
            .bind(id)
            .execute(&self.db.pool)
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl CatalogStore for PgStore {
    async fn ensure_provider(&self, name: &str) -> Result<Provider> {
        let row = sqlx::query(
            "INSERT INTO providers (name) VALUES ($1) \
             ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name RETURNING id, name",
        )
        .persistent(false)
        .bind(name)
        .fetch_one(&self.db.pool)
        .await
        .with_context(|| format!("ensuring provider {name}"))?;
        Ok(Provider {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
        })
    }

    async fn upsert_provider_record(
        &self,
        provider_id: i64,
        kind: ResourceKind,
        payload: &ProviderPayload,
    ) -> Result<ProviderRecord> {
        let sql = format!(
            "INSERT INTO provider_records \
                (provider_id, kind, internal_id, slug, name, metadata, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (provider_id, kind, internal_id) DO UPDATE SET \
                slug = EXCLUDED.slug, name = EXCLUDED.name, \
                metadata = EXCLUDED.metadata, updated_at = EXCLUDED.updated_at \
             RETURNING {RECORD_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .persistent(false)
            .bind(provider_id)
            .bind(kind.as_str())
            .bind(payload.internal_id)
            .bind(&payload.slug)
            .bind(&payload.name)
            .bind(&payload.metadata)
            .bind(payload.updated_at)
            .fetch_one(&self.db.pool)
            .await?;
        debug!(
            target = "igdb",
            kind = kind.as_str(),
            internal_id = payload.internal_id,
            "upserted provider record"
        );
        record_from_row(&row)
    }

    async fn provider_records(
        &self,
        provider_id: i64,
        kind: ResourceKind,
    ) -> Result<Vec<ProviderRecord>> {
        self.load_records("", provider_id, kind, RecordKey::None).await
    }

    async fn provider_records_by_internal_id(
        &self,
        provider_id: i64,
        kind: ResourceKind,
        internal_id: i64,
    ) -> Result<Vec<ProviderRecord>> {
        self.load_records(
            "AND internal_id = $3",
            provider_id,
            kind,
            RecordKey::InternalId(internal_id),
        )
        .await
    }

    async fn provider_records_by_slug(
        &self,
        provider_id: i64,
        kind: ResourceKind,
        slug: &str,
    ) -> Result<Vec<ProviderRecord>> {
        self.load_records("AND slug = $3", provider_id, kind, RecordKey::Slug(slug))
            .await
    }

    async fn save_provider_record(&self, record: &ProviderRecord) -> Result<()> {
        sqlx::query(
            "UPDATE provider_records SET internal_id = $2, slug = $3, name = $4, \
             metadata = $5, updated_at = $6 WHERE id = $1",
        )
        .persistent(false)
        .bind(record.id)
        .bind(record.internal_id)
        .bind(&record.slug)
        .bind(&record.name)
        .bind(&record.metadata)
        .bind(record.updated_at)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    async fn delete_provider_record(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM provider_records WHERE id = $1")
            .persistent(false)
            .bind(id)
            .execute(&self.db.pool)
            .await?;
        Ok(())
    }

    async fn game_by_slug(&self, slug: &str) -> Result<Option<Game>> {
        Ok(self
            .load_games("g.slug = $1", GameFilter::Text(slug))
            .await?
            .into_iter()
            .next())
    }

    async fn games_for_provider_record(&self, record_id: i64) -> Result<Vec<Game>> {
        self.load_games(
            "EXISTS (SELECT 1 FROM game_provider_records l \
             WHERE l.game_id = g.id AND l.provider_record_id = $1)",
            GameFilter::Id(record_id),
        )
        .await
    }

    async fn create_game(&self, name: &str, slug: &str) -> Result<Game> {
        let id: i64 = sqlx::query_scalar("INSERT INTO games (name, slug) VALUES ($1, $2) RETURNING id")
            .persistent(false)
            .bind(name)
            .bind(slug)
            .fetch_one(&self.db.pool)
            .await
            .with_context(|| format!("creating game {slug}"))?;
        let mut game = Game::new(name, slug);
        game.id = id;
        Ok(game)
    }

    async fn save_game(&self, game: &Game) -> Result<()> {
        let mut tx = self.db.pool.begin().await?;
        sqlx::query(
            "UPDATE games SET name = $2, slug = $3, year = $4, description = $5, coverart = $6, \
             is_public = $7, change_for_id = $8 WHERE id = $1",
        )
        .persistent(false)
        .bind(game.id)
        .bind(&game.name)
        .bind(&game.slug)
        .bind(game.year)
        .bind(&game.description)
        .bind(&game.coverart)
        .bind(game.is_public)
        .bind(game.change_for)
        .execute(&mut *tx)
        .await?;

        let platform_ids: Vec<i64> = game.platform_ids.iter().copied().collect();
        sqlx::query("DELETE FROM game_platforms WHERE game_id = $1 AND NOT (platform_id = ANY($2))")
            .persistent(false)
            .bind(game.id)
            .bind(&platform_ids)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO game_platforms (game_id, platform_id) \
             SELECT $1, UNNEST($2::BIGINT[]) ON CONFLICT DO NOTHING",
        )
        .persistent(false)
        .bind(game.id)
        .bind(&platform_ids)
        .execute(&mut *tx)
        .await?;

        let record_ids: Vec<i64> = game.provider_record_ids.iter().copied().collect();
        sqlx::query(
            "DELETE FROM game_provider_records WHERE game_id = $1 \
             AND NOT (provider_record_id = ANY($2))",
        )
        .persistent(false)
        .bind(game.id)
        .bind(&record_ids)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO game_provider_records (game_id, provider_record_id) \
             SELECT $1, UNNEST($2::BIGINT[]) ON CONFLICT DO NOTHING",
        )
        .persistent(false)
        .bind(game.id)
        .bind(&record_ids)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_game(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM games WHERE id = $1")
            .persistent(false)
            .bind(id)
            .execute(&self.db.pool)
            .await?;
        Ok(())
    }

    async fn apostrophe_games_without_provider(&self, provider_id: i64) -> Result<Vec<Game>> {
        self.load_games(
            "g.change_for_id IS NULL AND g.name LIKE '%''%' AND NOT EXISTS ( \
                SELECT 1 FROM game_provider_records l \
                JOIN provider_records r ON r.id = l.provider_record_id \
                WHERE l.game_id = g.id AND r.provider_id = $1)",
            GameFilter::Id(provider_id),
        )
        .await
    }

    async fn provider_linked_game_by_slug(
        &self,
        provider_id: i64,
        slug: &str,
    ) -> Result<Option<Game>> {
        Ok(self
            .load_games(
                "g.slug = $2 AND EXISTS ( \
                    SELECT 1 FROM game_provider_records l \
                    JOIN provider_records r ON r.id = l.provider_record_id \
                    WHERE l.game_id = g.id AND r.provider_id = $1)",
                GameFilter::IdText(provider_id, slug),
            )
            .await?
            .into_iter()
            .next())
    }

    async fn merge_games(&self, duplicate_id: i64, survivor_id: i64) -> Result<()> {
        if duplicate_id == survivor_id {
            return Err(anyhow!("cannot merge game {duplicate_id} into itself"));
        }
        let mut tx = self.db.pool.begin().await?;
        let statements = [
            "UPDATE installers SET game_id = $2 WHERE game_id = $1",
            "INSERT INTO library_games (user_id, game_id) \
             SELECT user_id, $2 FROM library_games WHERE game_id = $1 ON CONFLICT DO NOTHING",
            "INSERT INTO game_platforms (game_id, platform_id) \
             SELECT $2, platform_id FROM game_platforms WHERE game_id = $1 ON CONFLICT DO NOTHING",
            "INSERT INTO game_provider_records (game_id, provider_record_id) \
             SELECT $2, provider_record_id FROM game_provider_records WHERE game_id = $1 \
             ON CONFLICT DO NOTHING",
            "UPDATE games s SET \
                year = COALESCE(s.year, d.year), \
                description = COALESCE(NULLIF(s.description, ''), d.description), \
                coverart = COALESCE(s.coverart, d.coverart) \
             FROM games d WHERE d.id = $1 AND s.id = $2",
        ];
        for stmt in statements {
            sqlx::query(stmt)
                .persistent(false)
                .bind(duplicate_id)
                .bind(survivor_id)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("merging game {duplicate_id} into {survivor_id}"))?;
        }
        // remaining links of the duplicate cascade
        sqlx::query("DELETE FROM games WHERE id = $1")
            .persistent(false)
            .bind(duplicate_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn installer_count(&self, game_id: i64) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM installers WHERE game_id = $1")
            .persistent(false)
            .bind(game_id)
            .fetch_one(&self.db.pool)
            .await?)
    }

    async fn user_count(&self, game_id: i64) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM library_games WHERE game_id = $1")
            .persistent(false)
            .bind(game_id)
            .fetch_one(&self.db.pool)
            .await?)
    }

    async fn platforms_with_igdb_id(&self) -> Result<Vec<Platform>> {
        sqlx::query("SELECT id, name, slug, igdb_id FROM platforms WHERE igdb_id IS NOT NULL")
            .persistent(false)
            .fetch_all(&self.db.pool)
            .await?
            .iter()
            .map(platform_from_row)
            .collect()
    }

    async fn platform_by_slug(&self, slug: &str) -> Result<Option<Platform>> {
        sqlx::query("SELECT id, name, slug, igdb_id FROM platforms WHERE slug = $1")
            .persistent(false)
            .bind(slug)
            .fetch_optional(&self.db.pool)
            .await?
            .as_ref()
            .map(platform_from_row)
            .transpose()
    }

    async fn create_platform(&self, name: &str, slug: &str) -> Result<Platform> {
        let row = sqlx::query(
            "INSERT INTO platforms (name, slug) VALUES ($1, $2) RETURNING id, name, slug, igdb_id",
        )
        .persistent(false)
        .bind(name)
        .bind(slug)
        .fetch_one(&self.db.pool)
        .await?;
        platform_from_row(&row)
    }

    async fn save_platform(&self, platform: &Platform) -> Result<()> {
        sqlx::query("UPDATE platforms SET name = $2, slug = $3, igdb_id = $4 WHERE id = $1")
            .persistent(false)
            .bind(platform.id)
            .bind(&platform.name)
            .bind(&platform.slug)
            .bind(platform.igdb_id)
            .execute(&self.db.pool)
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ActionLogStore for PgStore {
    async fn save(&self, key: &str, value: &ActionValue) -> Result<()> {
        sqlx::query(
            "INSERT INTO key_value_store (key, value, updated_at) VALUES ($1, $2, now()) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()",
        )
        .persistent(false)
        .bind(key)
        .bind(value.to_string())
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    async fn delete_zero_values(&self) -> Result<u64> {
        let res = sqlx::query("DELETE FROM key_value_store WHERE btrim(value) = '0'")
            .persistent(false)
            .execute(&self.db.pool)
            .await?;
        Ok(res.rows_affected())
    }
}
