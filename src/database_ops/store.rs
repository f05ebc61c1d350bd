//! Repository seams between the reconciliation passes and the persistent store.
//!
//! Jobs only talk to these traits. [`PgStore`](super::pg_store::PgStore) backs them with
//! Postgres, [`MemoryStore`](super::memory_store::MemoryStore) with plain collections.

use anyhow::Result;

use super::action_log::ActionValue;
use super::models::{
    Game, Installer, InstallerRevision, Platform, Provider, ProviderPayload, ProviderRecord,
    ResourceKind, Revision, Version,
};

#[async_trait::async_trait]
pub trait InstallerStore: Send + Sync {
    /// Every revision paired with its first stored version, oldest first.
    async fn revisions_with_first_version(&self) -> Result<Vec<(Revision, Option<Version>)>>;
    async fn installer(&self, id: i64) -> Result<Option<Installer>>;
    /// Promotes the submission over `installer` and drops the revision.
    async fn accept_revision(&self, submission: &InstallerRevision, installer: &Installer)
        -> Result<()>;
    /// Deletes a revision together with its versions.
    async fn delete_revision(&self, revision_id: i64) -> Result<()>;
    async fn versions_of_type(&self, content_type: &str) -> Result<Vec<Version>>;
    async fn delete_version(&self, version_id: i64) -> Result<()>;
    /// Deletes revisions without any version left; returns how many went away.
    async fn delete_empty_revisions(&self) -> Result<u64>;
    /// Unpublished placeholder forks with no pending revision.
    async fn abandoned_installers(&self) -> Result<Vec<Installer>>;
    async fn delete_installer(&self, id: i64) -> Result<()>;
}

#[async_trait::async_trait]
pub trait CatalogStore: Send + Sync {
    async fn ensure_provider(&self, name: &str) -> Result<Provider>;
    /// Creates the `(provider, kind, internal_id)` record or refreshes it in place.
    async fn upsert_provider_record(
        &self,
        provider_id: i64,
        kind: ResourceKind,
        payload: &ProviderPayload,
    ) -> Result<ProviderRecord>;
    async fn provider_records(&self, provider_id: i64, kind: ResourceKind)
        -> Result<Vec<ProviderRecord>>;
    async fn provider_records_by_internal_id(
        &self,
        provider_id: i64,
        kind: ResourceKind,
        internal_id: i64,
    ) -> Result<Vec<ProviderRecord>>;
    async fn provider_records_by_slug(
        &self,
        provider_id: i64,
        kind: ResourceKind,
        slug: &str,
    ) -> Result<Vec<ProviderRecord>>;
    async fn save_provider_record(&self, record: &ProviderRecord) -> Result<()>;
    /// Also drops the links between the record and local games.
    async fn delete_provider_record(&self, id: i64) -> Result<()>;

    async fn game_by_slug(&self, slug: &str) -> Result<Option<Game>>;
    async fn games_for_provider_record(&self, record_id: i64) -> Result<Vec<Game>>;
    async fn create_game(&self, name: &str, slug: &str) -> Result<Game>;
    /// Persists scalar fields and replaces platform and provider links.
    async fn save_game(&self, game: &Game) -> Result<()>;
    async fn delete_game(&self, id: i64) -> Result<()>;
    /// Games with an apostrophe in their name, not pending edits, not linked to the provider.
    async fn apostrophe_games_without_provider(&self, provider_id: i64) -> Result<Vec<Game>>;
    async fn provider_linked_game_by_slug(&self, provider_id: i64, slug: &str)
        -> Result<Option<Game>>;
    /// Moves every attachment of `duplicate_id` onto `survivor_id`, then deletes the duplicate.
    async fn merge_games(&self, duplicate_id: i64, survivor_id: i64) -> Result<()>;
    async fn installer_count(&self, game_id: i64) -> Result<i64>;
    async fn user_count(&self, game_id: i64) -> Result<i64>;

    async fn platforms_with_igdb_id(&self) -> Result<Vec<Platform>>;
    async fn platform_by_slug(&self, slug: &str) -> Result<Option<Platform>>;
    async fn create_platform(&self, name: &str, slug: &str) -> Result<Platform>;
    async fn save_platform(&self, platform: &Platform) -> Result<()>;
}

#[async_trait::async_trait]
pub trait ActionLogStore: Send + Sync {
    async fn save(&self, key: &str, value: &ActionValue) -> Result<()>;
    /// Removes counters stuck at zero; returns how many were deleted.
    async fn delete_zero_values(&self) -> Result<u64>;
}
