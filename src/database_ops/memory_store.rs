//! Collection-backed store used by tests and `--dry-store` runs.

use anyhow::{anyhow, bail, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::action_log::{is_zero_value, ActionValue};
use super::models::{
    Game, Installer, InstallerRevision, Platform, Provider, ProviderPayload, ProviderRecord,
    ResourceKind, Revision, Version, PLACEHOLDER_VERSION,
};
use super::store::{ActionLogStore, CatalogStore, InstallerStore};

#[derive(Debug, Default)]
pub struct MemoryState {
    next_id: i64,
    pub installers: BTreeMap<i64, Installer>,
    pub revisions: BTreeMap<i64, Revision>,
    pub versions: BTreeMap<i64, Version>,
    pub providers: BTreeMap<i64, Provider>,
    pub provider_records: BTreeMap<i64, ProviderRecord>,
    pub games: BTreeMap<i64, Game>,
    pub platforms: BTreeMap<i64, Platform>,
    /// (user_id, game_id)
    pub library: BTreeSet<(i64, i64)>,
    pub key_values: HashMap<String, String>,
}

impl MemoryState {
    pub fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct access for seeding and inspection.
    pub fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_installer(&self, mut installer: Installer) -> Installer {
        let mut st = self.state();
        if installer.id == 0 {
            installer.id = st.next_id();
        }
        st.installers.insert(installer.id, installer.clone());
        installer
    }

    /// Stores a revision with one version carrying `serialized_data`.
    pub fn insert_revision(
        &self,
        comment: &str,
        content_type: &str,
        object_id: Option<i64>,
        serialized_data: &str,
    ) -> (Revision, Version) {
        let mut st = self.state();
        let revision = Revision {
            id: st.next_id(),
            comment: comment.to_string(),
        };
        let version = Version {
            id: st.next_id(),
            revision_id: revision.id,
            content_type: content_type.to_string(),
            object_id,
            serialized_data: serialized_data.to_string(),
        };
        st.revisions.insert(revision.id, revision.clone());
        st.versions.insert(version.id, version.clone());
        (revision, version)
    }

    pub fn insert_empty_revision(&self, comment: &str) -> Revision {
        let mut st = self.state();
        let revision = Revision {
            id: st.next_id(),
            comment: comment.to_string(),
        };
        st.revisions.insert(revision.id, revision.clone());
        revision
    }

    pub fn insert_game(&self, mut game: Game) -> Game {
        let mut st = self.state();
        if game.id == 0 {
            game.id = st.next_id();
        }
        st.games.insert(game.id, game.clone());
        game
    }

    pub fn insert_platform(&self, name: &str, slug: &str, igdb_id: Option<i64>) -> Platform {
        let mut st = self.state();
        let platform = Platform {
            id: st.next_id(),
            name: name.to_string(),
            slug: slug.to_string(),
            igdb_id,
        };
        st.platforms.insert(platform.id, platform.clone());
        platform
    }

    pub fn add_library_entry(&self, user_id: i64, game_id: i64) {
        self.state().library.insert((user_id, game_id));
    }

    pub fn game(&self, id: i64) -> Option<Game> {
        self.state().games.get(&id).cloned()
    }

    pub fn key_value(&self, key: &str) -> Option<String> {
        self.state().key_values.get(key).cloned()
    }
}

fn linked_to_provider(st: &MemoryState, game: &Game, provider_id: i64) -> bool {
    game.provider_record_ids.iter().any(|rid| {
        st.provider_records
            .get(rid)
            .is_some_and(|r| r.provider_id == provider_id)
    })
}

#[async_trait::async_trait]
impl InstallerStore for MemoryStore {
    async fn revisions_with_first_version(&self) -> Result<Vec<(Revision, Option<Version>)>> {
        let st = self.state();
        Ok(st
            .revisions
            .values()
            .map(|rev| {
                let first = st
                    .versions
                    .values()
                    .find(|v| v.revision_id == rev.id)
                    .cloned();
                (rev.clone(), first)
            })
            .collect())
    }

    async fn installer(&self, id: i64) -> Result<Option<Installer>> {
        Ok(self.state().installers.get(&id).cloned())
    }

    async fn accept_revision(
        &self,
        submission: &InstallerRevision,
        installer: &Installer,
    ) -> Result<()> {
        let mut st = self.state();
        let target = st
            .installers
            .get_mut(&installer.id)
            .ok_or_else(|| anyhow!("installer {} vanished before acceptance", installer.id))?;
        submission.apply_to(target);
        st.revisions.remove(&submission.revision_id);
        st.versions.retain(|_, v| v.revision_id != submission.revision_id);
        Ok(())
    }

    async fn delete_revision(&self, revision_id: i64) -> Result<()> {
        let mut st = self.state();
        st.revisions.remove(&revision_id);
        st.versions.retain(|_, v| v.revision_id != revision_id);
        Ok(())
    }

    async fn versions_of_type(&self, content_type: &str) -> Result<Vec<Version>> {
        Ok(self
            .state()
            .versions
            .values()
            .filter(|v| v.content_type == content_type)
            .cloned()
            .collect())
    }

    async fn delete_version(&self, version_id: i64) -> Result<()> {
        self.state().versions.remove(&version_id);
        Ok(())
    }

    async fn delete_empty_revisions(&self) -> Result<u64> {
        let mut st = self.state();
        let used: BTreeSet<i64> = st.versions.values().map(|v| v.revision_id).collect();
        let before = st.revisions.len();
        st.revisions.retain(|id, _| used.contains(id));
        Ok((before - st.revisions.len()) as u64)
    }

    async fn abandoned_installers(&self) -> Result<Vec<Installer>> {
        let st = self.state();
        let targeted: BTreeSet<i64> = st.versions.values().filter_map(|v| v.object_id).collect();
        Ok(st
            .installers
            .values()
            .filter(|i| {
                !i.published && i.version == PLACEHOLDER_VERSION && !targeted.contains(&i.id)
            })
            .cloned()
            .collect())
    }

    async fn delete_installer(&self, id: i64) -> Result<()> {
        self.state().installers.remove(&id);
        Ok(())
    }
}

#[async_trait::async_trait]
impl CatalogStore for MemoryStore {
    async fn ensure_provider(&self, name: &str) -> Result<Provider> {
        let mut st = self.state();
        if let Some(p) = st.providers.values().find(|p| p.name == name) {
            return Ok(p.clone());
        }
        let provider = Provider {
            id: st.next_id(),
            name: name.to_string(),
        };
        st.providers.insert(provider.id, provider.clone());
        Ok(provider)
    }

    async fn upsert_provider_record(
        &self,
        provider_id: i64,
        kind: ResourceKind,
        payload: &ProviderPayload,
    ) -> Result<ProviderRecord> {
        let mut st = self.state();
        let existing = st.provider_records.values_mut().find(|r| {
            r.provider_id == provider_id && r.kind == kind && r.internal_id == payload.internal_id
        });
        if let Some(record) = existing {
            record.slug = payload.slug.clone();
            record.name = payload.name.clone();
            record.metadata = payload.metadata.clone();
            record.updated_at = payload.updated_at;
            return Ok(record.clone());
        }
        let record = ProviderRecord {
            id: st.next_id(),
            provider_id,
            kind,
            internal_id: payload.internal_id,
            slug: payload.slug.clone(),
            name: payload.name.clone(),
            metadata: payload.metadata.clone(),
            updated_at: payload.updated_at,
        };
        st.provider_records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn provider_records(
        &self,
        provider_id: i64,
        kind: ResourceKind,
    ) -> Result<Vec<ProviderRecord>> {
        Ok(self
            .state()
            .provider_records
            .values()
            .filter(|r| r.provider_id == provider_id && r.kind == kind)
            .cloned()
            .collect())
    }

    async fn provider_records_by_internal_id(
        &self,
        provider_id: i64,
        kind: ResourceKind,
        internal_id: i64,
    ) -> Result<Vec<ProviderRecord>> {
        Ok(self
            .state()
            .provider_records
            .values()
            .filter(|r| r.provider_id == provider_id && r.kind == kind && r.internal_id == internal_id)
            .cloned()
            .collect())
    }

    async fn provider_records_by_slug(
        &self,
        provider_id: i64,
        kind: ResourceKind,
        slug: &str,
    ) -> Result<Vec<ProviderRecord>> {
        Ok(self
            .state()
            .provider_records
            .values()
            .filter(|r| r.provider_id == provider_id && r.kind == kind && r.slug == slug)
            .cloned()
            .collect())
    }

    async fn save_provider_record(&self, record: &ProviderRecord) -> Result<()> {
        let mut st = self.state();
        if !st.provider_records.contains_key(&record.id) {
            bail!("provider record {} does not exist", record.id);
        }
        st.provider_records.insert(record.id, record.clone());
        Ok(())
    }

    async fn delete_provider_record(&self, id: i64) -> Result<()> {
        let mut st = self.state();
        st.provider_records.remove(&id);
        for game in st.games.values_mut() {
            game.provider_record_ids.remove(&id);
        }
        Ok(())
    }

    async fn game_by_slug(&self, slug: &str) -> Result<Option<Game>> {
        Ok(self.state().games.values().find(|g| g.slug == slug).cloned())
    }

    async fn games_for_provider_record(&self, record_id: i64) -> Result<Vec<Game>> {
        Ok(self
            .state()
            .games
            .values()
            .filter(|g| g.provider_record_ids.contains(&record_id))
            .cloned()
            .collect())
    }

    async fn create_game(&self, name: &str, slug: &str) -> Result<Game> {
        let mut st = self.state();
        if st.games.values().any(|g| g.slug == slug) {
            bail!("a game with slug {slug:?} already exists");
        }
        let mut game = Game::new(name, slug);
        game.id = st.next_id();
        st.games.insert(game.id, game.clone());
        Ok(game)
    }

    async fn save_game(&self, game: &Game) -> Result<()> {
        let mut st = self.state();
        if !st.games.contains_key(&game.id) {
            bail!("game {} does not exist", game.id);
        }
        st.games.insert(game.id, game.clone());
        Ok(())
    }

    async fn delete_game(&self, id: i64) -> Result<()> {
        let mut st = self.state();
        st.games.remove(&id);
        st.installers.retain(|_, i| i.game_id != id);
        st.library.retain(|(_, g)| *g != id);
        Ok(())
    }

    async fn apostrophe_games_without_provider(&self, provider_id: i64) -> Result<Vec<Game>> {
        let st = self.state();
        Ok(st
            .games
            .values()
            .filter(|g| {
                g.change_for.is_none()
                    && g.name.contains('\'')
                    && !linked_to_provider(&st, g, provider_id)
            })
            .cloned()
            .collect())
    }

    async fn provider_linked_game_by_slug(
        &self,
        provider_id: i64,
        slug: &str,
    ) -> Result<Option<Game>> {
        let st = self.state();
        Ok(st
            .games
            .values()
            .find(|g| g.slug == slug && linked_to_provider(&st, g, provider_id))
            .cloned())
    }

    async fn merge_games(&self, duplicate_id: i64, survivor_id: i64) -> Result<()> {
        if duplicate_id == survivor_id {
            bail!("cannot merge game {duplicate_id} into itself");
        }
        let mut st = self.state();
        let duplicate = st
            .games
            .remove(&duplicate_id)
            .ok_or_else(|| anyhow!("duplicate game {duplicate_id} not found"))?;
        let Some(survivor) = st.games.get_mut(&survivor_id) else {
            st.games.insert(duplicate.id, duplicate);
            bail!("surviving game {survivor_id} not found");
        };
        survivor.platform_ids.extend(duplicate.platform_ids.iter().copied());
        survivor
            .provider_record_ids
            .extend(duplicate.provider_record_ids.iter().copied());
        if survivor.year.is_none() {
            survivor.year = duplicate.year;
        }
        if survivor.description.as_deref().map_or(true, str::is_empty) {
            survivor.description = duplicate.description.clone();
        }
        if survivor.coverart.is_none() {
            survivor.coverart = duplicate.coverart.clone();
        }
        for installer in st.installers.values_mut() {
            if installer.game_id == duplicate_id {
                installer.game_id = survivor_id;
            }
        }
        let moved: Vec<(i64, i64)> = st
            .library
            .iter()
            .filter(|(_, g)| *g == duplicate_id)
            .copied()
            .collect();
        for (user, game) in moved {
            st.library.remove(&(user, game));
            st.library.insert((user, survivor_id));
        }
        Ok(())
    }

    async fn installer_count(&self, game_id: i64) -> Result<i64> {
        Ok(self
            .state()
            .installers
            .values()
            .filter(|i| i.game_id == game_id)
            .count() as i64)
    }

    async fn user_count(&self, game_id: i64) -> Result<i64> {
        Ok(self
            .state()
            .library
            .iter()
            .filter(|(_, g)| *g == game_id)
            .count() as i64)
    }

    async fn platforms_with_igdb_id(&self) -> Result<Vec<Platform>> {
        Ok(self
            .state()
            .platforms
            .values()
            .filter(|p| p.igdb_id.is_some())
            .cloned()
            .collect())
    }

    async fn platform_by_slug(&self, slug: &str) -> Result<Option<Platform>> {
        Ok(self
            .state()
            .platforms
            .values()
            .find(|p| p.slug == slug)
            .cloned())
    }

    async fn create_platform(&self, name: &str, slug: &str) -> Result<Platform> {
        Ok(self.insert_platform(name, slug, None))
    }

    async fn save_platform(&self, platform: &Platform) -> Result<()> {
        self.state().platforms.insert(platform.id, platform.clone());
        Ok(())
    }
}

#[async_trait::async_trait]
impl ActionLogStore for MemoryStore {
    async fn save(&self, key: &str, value: &ActionValue) -> Result<()> {
        self.state()
            .key_values
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete_zero_values(&self) -> Result<u64> {
        let mut st = self.state();
        let before = st.key_values.len();
        st.key_values.retain(|_, v| !is_zero_value(v));
        Ok((before - st.key_values.len()) as u64)
    }
}
