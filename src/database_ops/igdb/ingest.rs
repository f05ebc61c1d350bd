use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use super::client::{CatalogSource, IgdbConfig};
use super::IGDB_PROVIDER;
use crate::database_ops::action_log::JobReport;
use crate::database_ops::models::{ProviderPayload, ResourceKind};
use crate::database_ops::store::CatalogStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// Pages requested, including unreadable ones and the final empty page.
    pub pages: usize,
    pub records: usize,
    pub bad_pages: usize,
    pub bad_items: usize,
}

enum Page {
    Items(Vec<Value>),
    Unreadable(String),
}

fn decode_page(body: &str) -> Page {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Array(items)) => Page::Items(items),
        Ok(other) => Page::Unreadable(format!("expected a JSON array, got {}", type_name(&other))),
        Err(err) => Page::Unreadable(err.to_string()),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Pages through one IGDB resource and mirrors every item into the provider-scoped store.
///
/// Stops on the first empty page. An unreadable page is logged and skipped; once
/// `max_bad_pages` of them arrive back to back the endpoint is considered broken and the
/// run ends early. Transport errors abort.
#[instrument(skip(source, store, cfg), fields(resource = resource.as_str()))]
pub async fn igdb_loader(
    source: &dyn CatalogSource,
    store: &dyn CatalogStore,
    resource: ResourceKind,
    cfg: &IgdbConfig,
) -> Result<LoadSummary> {
    let provider = store.ensure_provider(IGDB_PROVIDER).await?;
    let page_size = cfg.page_size_for(resource);
    let mut summary = LoadSummary::default();
    let mut consecutive_bad = 0usize;
    let mut page = 1usize;

    loop {
        info!(target = "igdb", resource = resource.as_str(), page, "getting page of IGDB API");
        let body = source.fetch_page(resource, page, page_size).await?;
        summary.pages += 1;

        let items = match decode_page(&body) {
            Page::Items(items) => items,
            Page::Unreadable(reason) => {
                error!(
                    target = "igdb",
                    resource = resource.as_str(),
                    page,
                    %reason,
                    body_len = body.len(),
                    "failed to read JSON response"
                );
                summary.bad_pages += 1;
                consecutive_bad += 1;
                if consecutive_bad >= cfg.max_bad_pages {
                    warn!(
                        target = "igdb",
                        resource = resource.as_str(),
                        consecutive_bad,
                        "too many unreadable pages in a row, giving up"
                    );
                    break;
                }
                page += 1;
                continue;
            }
        };
        consecutive_bad = 0;
        if items.is_empty() {
            break;
        }

        for item in &items {
            let payload = match ProviderPayload::from_api(resource, item) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(target = "igdb", error = %err, "skipping unusable item");
                    summary.bad_items += 1;
                    continue;
                }
            };
            let record = store
                .upsert_provider_record(provider.id, resource, &payload)
                .await?;
            debug!(target = "igdb", record_id = record.id, internal_id = record.internal_id, "upserted");
            summary.records += 1;
        }
        page += 1;
    }

    info!(
        target = "igdb",
        resource = resource.as_str(),
        pages = summary.pages,
        records = summary.records,
        bad_pages = summary.bad_pages,
        bad_items = summary.bad_items,
        "IGDB load finished"
    );
    Ok(summary)
}

fn load_report(resource: ResourceKind, summary: &LoadSummary) -> JobReport {
    let prefix = format!("igdb_load_{}", resource.as_str());
    JobReport::new()
        .with(format!("{prefix}_pages"), summary.pages)
        .with(format!("{prefix}_records"), summary.records)
}

/// Loads genres, platforms or covers.
pub async fn load_igdb_resource(
    source: &dyn CatalogSource,
    store: &dyn CatalogStore,
    resource: ResourceKind,
    cfg: &IgdbConfig,
) -> Result<JobReport> {
    let summary = igdb_loader(source, store, resource, cfg).await?;
    Ok(load_report(resource, &summary))
}

/// Loads all games from IGDB, timing the run.
pub async fn load_igdb_games(
    source: &dyn CatalogSource,
    store: &dyn CatalogStore,
    cfg: &IgdbConfig,
) -> Result<JobReport> {
    let start = Utc::now();
    let summary = igdb_loader(source, store, ResourceKind::Game, cfg).await?;
    let end = Utc::now();
    let mut report = JobReport::new().with("igdb_load_games_started_at", start.to_rfc3339());
    report.extend(load_report(ResourceKind::Game, &summary));
    report.record("igdb_load_games_ended_at", end.to_rfc3339());
    report.record("igdb_load_games_duration", (end - start).num_seconds());
    Ok(report)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::database_ops::memory_store::MemoryStore;
    use anyhow::anyhow;
    use bytes::Bytes;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned page bodies; anything not scripted is an empty page.
    #[derive(Default)]
    pub(crate) struct ScriptedSource {
        pages: HashMap<(&'static str, usize), String>,
        images: HashMap<String, Bytes>,
        pub requests: Mutex<Vec<(&'static str, usize, usize)>>,
    }

    impl ScriptedSource {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn page(mut self, resource: ResourceKind, page: usize, body: Value) -> Self {
            self.pages.insert((resource.as_str(), page), body.to_string());
            self
        }

        pub(crate) fn raw_page(mut self, resource: ResourceKind, page: usize, body: &str) -> Self {
            self.pages.insert((resource.as_str(), page), body.to_string());
            self
        }

        pub(crate) fn image(mut self, image_id: &str, data: &'static [u8]) -> Self {
            self.images.insert(image_id.to_string(), Bytes::from_static(data));
            self
        }
    }

    #[async_trait::async_trait]
    impl CatalogSource for ScriptedSource {
        async fn fetch_page(
            &self,
            resource: ResourceKind,
            page: usize,
            page_size: usize,
        ) -> Result<String> {
            self.requests
                .lock()
                .unwrap()
                .push((resource.as_str(), page, page_size));
            Ok(self
                .pages
                .get(&(resource.as_str(), page))
                .cloned()
                .unwrap_or_else(|| "[]".to_string()))
        }

        async fn fetch_image(&self, image_id: &str, _size: &str) -> Result<Bytes> {
            self.images
                .get(image_id)
                .cloned()
                .ok_or_else(|| anyhow!("no image {image_id}"))
        }
    }

    fn games_page() -> Value {
        json!([
            {"id": 55, "slug": "half-life-2", "name": "Half-Life 2", "category": 0,
             "platforms": [6], "updated_at": 1700000000},
            {"id": 56, "slug": "portal", "name": "Portal", "category": 0}
        ])
    }

    #[tokio::test]
    async fn pages_until_empty_and_upserts_each_item() {
        let source = ScriptedSource::new()
            .page(ResourceKind::Game, 1, games_page())
            .page(ResourceKind::Game, 2, json!([{"id": 57, "slug": "ep-one", "name": "Episode One"}]));
        let store = MemoryStore::new();

        let report = load_igdb_games(&source, &store, &IgdbConfig::default())
            .await
            .unwrap();
        assert_eq!(report.count("igdb_load_games_pages"), 3);
        assert_eq!(report.count("igdb_load_games_records"), 3);
        assert!(report.get("igdb_load_games_started_at").is_some());
        assert!(report.get("igdb_load_games_duration").is_some());

        let requests = source.requests.lock().unwrap().clone();
        assert_eq!(requests, vec![("games", 1, 500), ("games", 2, 500), ("games", 3, 500)]);

        let st = store.state();
        assert_eq!(st.provider_records.len(), 3);
        let hl2 = st
            .provider_records
            .values()
            .find(|r| r.internal_id == 55)
            .unwrap();
        assert_eq!(hl2.slug, "half-life-2");
        assert_eq!(hl2.platform_ids(), vec![6]);
        assert!(hl2.updated_at.is_some());
    }

    #[tokio::test]
    async fn reingesting_identical_payloads_changes_nothing() {
        let source = ScriptedSource::new().page(ResourceKind::Game, 1, games_page());
        let store = MemoryStore::new();
        let cfg = IgdbConfig::default();

        igdb_loader(&source, &store, ResourceKind::Game, &cfg).await.unwrap();
        let first = store.state().provider_records.clone();
        igdb_loader(&source, &store, ResourceKind::Game, &cfg).await.unwrap();
        assert_eq!(store.state().provider_records, first);
    }

    #[tokio::test]
    async fn malformed_page_is_skipped_not_fatal() {
        let source = ScriptedSource::new()
            .page(ResourceKind::Genre, 1, json!([{"id": 5, "slug": "shooter", "name": "Shooter"}]))
            .raw_page(ResourceKind::Genre, 2, "<html>Bad Gateway</html>")
            .page(ResourceKind::Genre, 3, json!([{"id": 8, "slug": "platform", "name": "Platform"}]));
        let store = MemoryStore::new();

        let summary = igdb_loader(&source, &store, ResourceKind::Genre, &IgdbConfig::default())
            .await
            .unwrap();
        assert_eq!(summary.bad_pages, 1);
        assert_eq!(summary.records, 2);
        assert_eq!(summary.pages, 4);
        let requests = source.requests.lock().unwrap().clone();
        assert!(requests.iter().all(|(_, _, size)| *size == 10));
    }

    #[tokio::test]
    async fn persistent_garbage_ends_the_run() {
        let mut source = ScriptedSource::new();
        for page in 1..=10 {
            source = source.raw_page(ResourceKind::Cover, page, "{\"message\": \"nope\"}");
        }
        let store = MemoryStore::new();
        let cfg = IgdbConfig {
            max_bad_pages: 3,
            ..IgdbConfig::default()
        };

        let summary = igdb_loader(&source, &store, ResourceKind::Cover, &cfg).await.unwrap();
        assert_eq!(summary.pages, 3);
        assert_eq!(summary.bad_pages, 3);
        assert!(store.state().provider_records.is_empty());
    }

    #[tokio::test]
    async fn items_without_id_are_skipped() {
        let source = ScriptedSource::new().page(
            ResourceKind::Platform,
            1,
            json!([{"slug": "pc", "name": "PC"}, {"id": 6, "slug": "win", "name": "PC (Windows)"}]),
        );
        let store = MemoryStore::new();
        let summary = igdb_loader(&source, &store, ResourceKind::Platform, &IgdbConfig::default())
            .await
            .unwrap();
        assert_eq!(summary.bad_items, 1);
        assert_eq!(summary.records, 1);
        assert_eq!(store.state().provider_records.len(), 1);
    }
}
