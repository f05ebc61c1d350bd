//! Entities the maintenance jobs read and write.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// Version label of installers that were forked but never filled in.
pub const PLACEHOLDER_VERSION: &str = "Change Me";
/// Content type tag the versioning subsystem uses for installer snapshots.
pub const INSTALLER_CONTENT_TYPE: &str = "games.installer";

/// Accepted, canonical installer script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installer {
    pub id: i64,
    pub game_id: i64,
    pub slug: String,
    pub runner: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub published: bool,
}

/// A pending revision container; each holds zero or more serialized versions.
#[derive(Debug, Clone, PartialEq)]
pub struct Revision {
    pub id: i64,
    pub comment: String,
}

/// One serialized object snapshot inside a revision.
#[derive(Debug, Clone, PartialEq)]
pub struct Version {
    pub id: i64,
    pub revision_id: i64,
    pub content_type: String,
    /// Primary key of the object the snapshot belongs to.
    pub object_id: Option<i64>,
    pub serialized_data: String,
}

/// Fields of an installer as proposed by a submission.
#[derive(Debug, Clone, PartialEq, Deserialize)]
struct SubmittedFields {
    runner: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    notes: Option<String>,
    content: String,
}

/// A proposed version of an [`Installer`] awaiting moderation.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallerRevision {
    pub revision_id: i64,
    pub version_id: i64,
    /// The accepted installer this revision targets, absent for brand new submissions.
    pub installer_id: Option<i64>,
    pub comment: String,
    pub runner: String,
    pub version: String,
    pub description: Option<String>,
    pub notes: String,
    pub content: String,
}

impl InstallerRevision {
    /// Rebuilds a submission from its stored snapshot. Fails on corrupt payloads.
    pub fn from_version(revision: &Revision, version: &Version) -> Result<Self> {
        if version.content_type != INSTALLER_CONTENT_TYPE {
            return Err(anyhow!(
                "version {} holds a {} snapshot, not an installer",
                version.id,
                version.content_type
            ));
        }
        let fields: SubmittedFields = serde_json::from_str(&version.serialized_data)
            .with_context(|| format!("decoding snapshot of version {}", version.id))?;
        Ok(Self {
            revision_id: revision.id,
            version_id: version.id,
            installer_id: version.object_id,
            comment: revision.comment.clone(),
            runner: fields.runner,
            version: fields.version,
            description: fields.description,
            notes: fields.notes.unwrap_or_default(),
            content: fields.content,
        })
    }

    /// Copies the submitted fields over `installer`.
    pub fn apply_to(&self, installer: &mut Installer) {
        installer.runner = self.runner.clone();
        installer.version = self.version.clone();
        installer.description = self.description.clone();
        installer.notes = self.notes.clone();
        installer.content = self.content.clone();
    }
}

impl fmt::Display for InstallerRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.installer_id {
            Some(id) => write!(f, "revision #{} of installer #{}", self.revision_id, id),
            None => write!(f, "revision #{} (new installer)", self.revision_id),
        }
    }
}

/// Catalog resources mirrored from a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Game,
    Genre,
    Platform,
    Cover,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Game,
        ResourceKind::Genre,
        ResourceKind::Platform,
        ResourceKind::Cover,
    ];

    /// Endpoint name on the IGDB API, also the stored `kind` column.
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Game => "games",
            ResourceKind::Genre => "genres",
            ResourceKind::Platform => "platforms",
            ResourceKind::Cover => "covers",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provider {
    pub id: i64,
    pub name: String,
}

/// Provider-scoped mirror of one external catalog entity.
///
/// At most one record exists per `(provider, kind, internal_id)`; `slug` is only a display key
/// and may collide across ids.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRecord {
    pub id: i64,
    pub provider_id: i64,
    pub kind: ResourceKind,
    pub internal_id: i64,
    pub slug: String,
    pub name: String,
    pub metadata: Value,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Key fields extracted from an API payload before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPayload {
    pub internal_id: i64,
    pub slug: String,
    pub name: String,
    pub metadata: Value,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProviderPayload {
    /// Covers have no slug or name; their image id stands in for both.
    pub fn from_api(kind: ResourceKind, payload: &Value) -> Result<Self> {
        let internal_id = payload
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| anyhow!("{} payload without numeric id: {}", kind.as_str(), payload))?;
        let text = |key: &str| payload.get(key).and_then(Value::as_str).map(str::to_string);
        let (slug, name) = match kind {
            ResourceKind::Cover => {
                let image_id = text("image_id").unwrap_or_default();
                (image_id.clone(), image_id)
            }
            _ => (text("slug").unwrap_or_default(), text("name").unwrap_or_default()),
        };
        let updated_at = payload
            .get("updated_at")
            .and_then(Value::as_i64)
            .and_then(|ts| DateTime::from_timestamp(ts, 0));
        Ok(Self {
            internal_id,
            slug,
            name,
            metadata: payload.clone(),
            updated_at,
        })
    }
}

impl ProviderRecord {
    pub fn meta_i64(&self, key: &str) -> Option<i64> {
        self.metadata.get(key).and_then(Value::as_i64)
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Slug as reported by the provider payload (may differ from the stored key during
    /// migrations).
    pub fn payload_slug(&self) -> Option<&str> {
        self.meta_str("slug").filter(|s| !s.trim().is_empty())
    }

    pub fn category(&self) -> Option<GameCategory> {
        self.meta_i64("category").and_then(GameCategory::from_code)
    }

    /// IGDB game id a cover belongs to.
    pub fn cover_game_id(&self) -> Option<i64> {
        self.meta_i64("game")
    }

    pub fn cover_image_id(&self) -> Option<&str> {
        self.meta_str("image_id").filter(|s| !s.is_empty())
    }

    pub fn platform_ids(&self) -> Vec<i64> {
        self.metadata
            .get("platforms")
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_i64).collect())
            .unwrap_or_default()
    }
}

/// IGDB game categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameCategory {
    MainGame,
    DlcAddon,
    Expansion,
    Bundle,
    StandaloneExpansion,
    Mod,
    Episode,
    Season,
    Remake,
    Remaster,
    ExpandedGame,
    Port,
    Fork,
}

impl GameCategory {
    pub fn from_code(code: i64) -> Option<Self> {
        use GameCategory::*;
        Some(match code {
            0 => MainGame,
            1 => DlcAddon,
            2 => Expansion,
            3 => Bundle,
            4 => StandaloneExpansion,
            5 => Mod,
            6 => Episode,
            7 => Season,
            8 => Remake,
            9 => Remaster,
            10 => ExpandedGame,
            11 => Port,
            12 => Fork,
            _ => return None,
        })
    }
}

/// Canonical local game entity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Game {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub year: Option<i32>,
    pub description: Option<String>,
    /// Path of the cover artwork relative to the IGDB media root.
    pub coverart: Option<String>,
    pub is_public: bool,
    /// Set when this game is a pending edit of another game.
    pub change_for: Option<i64>,
    pub platform_ids: BTreeSet<i64>,
    pub provider_record_ids: BTreeSet<i64>,
}

impl Game {
    pub fn new(name: &str, slug: &str) -> Self {
        Self {
            name: name.to_string(),
            slug: slug.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Platform {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub igdb_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn revision() -> Revision {
        Revision {
            id: 3,
            comment: "[draft] tweak".into(),
        }
    }

    #[test]
    fn submission_decodes_from_installer_snapshot() {
        let version = Version {
            id: 9,
            revision_id: 3,
            content_type: INSTALLER_CONTENT_TYPE.into(),
            object_id: Some(12),
            serialized_data: json!({
                "runner": "wine",
                "version": "GOG",
                "description": null,
                "content": "files: []"
            })
            .to_string(),
        };
        let sub = InstallerRevision::from_version(&revision(), &version).unwrap();
        assert_eq!(sub.installer_id, Some(12));
        assert_eq!(sub.runner, "wine");
        assert_eq!(sub.description, None);
        assert_eq!(sub.notes, "");
        assert_eq!(sub.comment, "[draft] tweak");
    }

    #[test]
    fn corrupt_snapshot_is_an_error() {
        let version = Version {
            id: 9,
            revision_id: 3,
            content_type: INSTALLER_CONTENT_TYPE.into(),
            object_id: Some(12),
            serialized_data: "{\"runner\": ".into(),
        };
        assert!(InstallerRevision::from_version(&revision(), &version).is_err());
    }

    #[test]
    fn cover_payload_uses_image_id_as_slug() {
        let payload = json!({"id": 77, "image_id": "co1abc", "game": 55});
        let parsed = ProviderPayload::from_api(ResourceKind::Cover, &payload).unwrap();
        assert_eq!(parsed.internal_id, 77);
        assert_eq!(parsed.slug, "co1abc");
        assert!(ProviderPayload::from_api(ResourceKind::Game, &json!({"slug": "x"})).is_err());
    }

    #[test]
    fn unknown_category_codes_are_none() {
        assert_eq!(GameCategory::from_code(0), Some(GameCategory::MainGame));
        assert_eq!(GameCategory::from_code(3), Some(GameCategory::Bundle));
        assert_eq!(GameCategory::from_code(99), None);
    }
}
