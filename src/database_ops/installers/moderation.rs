//! Automatic moderation of installer submissions.
//!
//! Every pending revision is compared against the installer it targets and run through an
//! ordered list of rules. The first rule that reaches a verdict wins; a revision nobody has
//! an opinion on stays pending for a human moderator.

use anyhow::Result;
use tracing::{debug, error, info, instrument, warn};

use crate::database_ops::action_log::JobReport;
use crate::database_ops::models::{
    Installer, InstallerRevision, INSTALLER_CONTENT_TYPE, PLACEHOLDER_VERSION,
};
use crate::database_ops::store::InstallerStore;

use super::validation::validate_installer;

/// Comment marker of work-in-progress submissions.
pub const DRAFT_MARKER: &str = "[draft]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Snapshot could not be decoded.
    Corrupt,
    /// Targeted installer is gone.
    Orphaned,
    /// Runner switched to anything but the winesteam -> steam consolidation.
    RunnerChanged,
    NoChange,
    DraftWithMetadataOnly,
    /// Targets a fork whose version was never filled in.
    PlaceholderParent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferReason {
    /// Submission of an installer that does not exist yet.
    NewInstaller,
    ContentChanged,
    NoRuleMatched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject(RejectReason),
    Defer(DeferReason),
}

enum Step {
    Continue,
    Done(Decision),
}

type Rule = fn(&InstallerRevision, &Installer) -> Step;

/// Evaluated in order until one returns a verdict.
const RULES: &[Rule] = &[
    content_changed,
    runner_changed,
    metadata_unchanged,
    draft_with_metadata_only,
    placeholder_parent,
];

fn normalized(value: Option<&str>) -> &str {
    value.unwrap_or("").trim()
}

fn content_changed(submission: &InstallerRevision, original: &Installer) -> Step {
    if submission.content.trim() != original.content.trim() {
        return Step::Done(Decision::Defer(DeferReason::ContentChanged));
    }
    Step::Continue
}

fn runner_changed(submission: &InstallerRevision, original: &Installer) -> Step {
    if submission.runner == original.runner {
        return Step::Continue;
    }
    if original.runner == "winesteam" && submission.runner == "steam" {
        Step::Done(Decision::Accept)
    } else {
        Step::Done(Decision::Reject(RejectReason::RunnerChanged))
    }
}

fn metadata_unchanged(submission: &InstallerRevision, original: &Installer) -> Step {
    let same_description = normalized(submission.description.as_deref())
        == normalized(original.description.as_deref());
    let same_notes = submission.notes.trim() == original.notes.trim();
    if same_description && same_notes {
        return Step::Done(Decision::Reject(RejectReason::NoChange));
    }
    Step::Continue
}

fn draft_with_metadata_only(submission: &InstallerRevision, _original: &Installer) -> Step {
    if submission.comment.contains(DRAFT_MARKER) {
        return Step::Done(Decision::Reject(RejectReason::DraftWithMetadataOnly));
    }
    Step::Continue
}

fn placeholder_parent(_submission: &InstallerRevision, original: &Installer) -> Step {
    if original.version == PLACEHOLDER_VERSION {
        return Step::Done(Decision::Reject(RejectReason::PlaceholderParent));
    }
    Step::Continue
}

/// Verdict for a decodable submission whose installer exists.
pub fn decide(submission: &InstallerRevision, original: &Installer) -> Decision {
    for rule in RULES {
        if let Step::Done(decision) = rule(submission, original) {
            return decision;
        }
    }
    Decision::Defer(DeferReason::NoRuleMatched)
}

/// Auto deletes or accepts the submissions the rules can settle.
#[instrument(skip(store))]
pub async fn auto_process_installers(store: &dyn InstallerStore) -> Result<JobReport> {
    let mut accepted = 0usize;
    let mut deleted = 0usize;
    let mut deferred = 0usize;

    for (revision, version) in store.revisions_with_first_version().await? {
        let Some(version) = version else {
            // empty containers are the sweeper's business
            continue;
        };
        if version.content_type != INSTALLER_CONTENT_TYPE {
            debug!(target = "installers", revision_id = revision.id, "not an installer revision");
            continue;
        }
        let submission = match InstallerRevision::from_version(&revision, &version) {
            Ok(submission) => submission,
            Err(err) => {
                error!(
                    target = "installers",
                    revision_id = revision.id,
                    error = %err,
                    reason = ?RejectReason::Corrupt,
                    "deleting corrupt submission"
                );
                store.delete_revision(revision.id).await?;
                deleted += 1;
                continue;
            }
        };
        let Some(installer_id) = submission.installer_id else {
            debug!(
                target = "installers",
                %submission,
                reason = ?DeferReason::NewInstaller,
                "left for manual review"
            );
            deferred += 1;
            continue;
        };
        let Some(original) = store.installer(installer_id).await? else {
            warn!(
                target = "installers",
                %submission,
                reason = ?RejectReason::Orphaned,
                "could not find original, deleting"
            );
            store.delete_revision(submission.revision_id).await?;
            deleted += 1;
            continue;
        };

        match decide(&submission, &original) {
            Decision::Accept => {
                info!(
                    target = "installers",
                    %submission,
                    from = %original.runner,
                    to = %submission.runner,
                    "accepting"
                );
                store.accept_revision(&submission, &original).await?;
                accepted += 1;
            }
            Decision::Reject(reason) => {
                info!(target = "installers", %submission, ?reason, "deleting");
                store.delete_revision(submission.revision_id).await?;
                deleted += 1;
            }
            Decision::Defer(reason) => {
                debug!(target = "installers", %submission, ?reason, "left for manual review");
                if reason == DeferReason::ContentChanged {
                    let check = validate_installer(&submission.content, &submission.runner);
                    if !check.is_valid {
                        warn!(
                            target = "installers",
                            %submission,
                            errors = ?check.errors,
                            "submission awaiting review has script errors"
                        );
                    }
                }
                deferred += 1;
            }
        }
    }

    info!(target = "installers", accepted, deleted, deferred, "auto moderation finished");
    Ok(JobReport::new()
        .with("auto_process_installers_accepted", accepted)
        .with("auto_process_installers_deleted", deleted)
        .with("auto_process_installers_deferred", deferred))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::memory_store::MemoryStore;
    use crate::database_ops::models::Installer;
    use serde_json::json;

    fn original() -> Installer {
        Installer {
            id: 0,
            game_id: 1,
            slug: "quake-gog".into(),
            runner: "wine".into(),
            version: "GOG".into(),
            description: None,
            notes: "Needs a patch".into(),
            content: "files:\n- setup: N/A\n".into(),
            published: true,
        }
    }

    fn submission(original: &Installer) -> InstallerRevision {
        InstallerRevision {
            revision_id: 10,
            version_id: 11,
            installer_id: Some(original.id),
            comment: String::new(),
            runner: original.runner.clone(),
            version: original.version.clone(),
            description: original.description.clone(),
            notes: original.notes.clone(),
            content: original.content.clone(),
        }
    }

    #[test]
    fn content_change_defers_whatever_else_changed() {
        let orig = original();
        let mut sub = submission(&orig);
        sub.content = "files: []".into();
        sub.runner = "linux".into();
        sub.comment = "[draft]".into();
        assert_eq!(decide(&sub, &orig), Decision::Defer(DeferReason::ContentChanged));
    }

    #[test]
    fn surrounding_whitespace_is_not_a_content_change() {
        let orig = original();
        let mut sub = submission(&orig);
        sub.content = format!("\n\n{}  ", orig.content.trim());
        sub.notes = "Needs the 1.1 patch".into();
        assert_eq!(decide(&sub, &orig), Decision::Defer(DeferReason::NoRuleMatched));
    }

    #[test]
    fn winesteam_to_steam_is_accepted() {
        let mut orig = original();
        orig.runner = "winesteam".into();
        let mut sub = submission(&orig);
        sub.runner = "steam".into();
        assert_eq!(decide(&sub, &orig), Decision::Accept);
    }

    #[test]
    fn other_runner_changes_are_rejected() {
        let mut orig = original();
        orig.runner = "steam".into();
        let mut sub = submission(&orig);
        sub.runner = "winesteam".into();
        assert_eq!(
            decide(&sub, &orig),
            Decision::Reject(RejectReason::RunnerChanged)
        );
    }

    #[test]
    fn missing_and_empty_description_compare_equal() {
        let orig = original();
        let mut sub = submission(&orig);
        sub.description = Some("   ".into());
        sub.notes = format!("{}\n", orig.notes);
        assert_eq!(decide(&sub, &orig), Decision::Reject(RejectReason::NoChange));
    }

    #[test]
    fn draft_with_metadata_changes_is_rejected() {
        let orig = original();
        let mut sub = submission(&orig);
        sub.description = Some("Better description".into());
        sub.comment = "wip [draft]".into();
        assert_eq!(
            decide(&sub, &orig),
            Decision::Reject(RejectReason::DraftWithMetadataOnly)
        );
    }

    #[test]
    fn placeholder_parent_is_garbage() {
        let mut orig = original();
        orig.version = PLACEHOLDER_VERSION.into();
        let mut sub = submission(&orig);
        sub.notes = "new notes".into();
        assert_eq!(
            decide(&sub, &orig),
            Decision::Reject(RejectReason::PlaceholderParent)
        );
    }

    fn snapshot(installer: &Installer) -> String {
        json!({
            "runner": installer.runner,
            "version": installer.version,
            "description": installer.description,
            "notes": installer.notes,
            "content": installer.content,
        })
        .to_string()
    }

    #[tokio::test]
    async fn batch_applies_each_verdict() {
        let store = MemoryStore::new();
        let mut winesteam = original();
        winesteam.runner = "winesteam".into();
        let winesteam = store.insert_installer(winesteam);
        let plain = store.insert_installer(original());

        let mut to_steam = winesteam.clone();
        to_steam.runner = "steam".into();
        store.insert_revision("", INSTALLER_CONTENT_TYPE, Some(winesteam.id), &snapshot(&to_steam));

        let (unchanged, _) =
            store.insert_revision("", INSTALLER_CONTENT_TYPE, Some(plain.id), &snapshot(&plain));

        let mut edited = plain.clone();
        edited.content = "game:\n  exe: quake.exe\n".into();
        let (pending, _) =
            store.insert_revision("", INSTALLER_CONTENT_TYPE, Some(plain.id), &snapshot(&edited));

        let (corrupt, _) =
            store.insert_revision("", INSTALLER_CONTENT_TYPE, Some(plain.id), "{not json");
        let (orphan, _) =
            store.insert_revision("", INSTALLER_CONTENT_TYPE, Some(999), &snapshot(&plain));
        let empty = store.insert_empty_revision("nothing inside");
        let (brand_new, _) =
            store.insert_revision("", INSTALLER_CONTENT_TYPE, None, &snapshot(&plain));

        let report = auto_process_installers(&store).await.unwrap();
        assert_eq!(report.count("auto_process_installers_accepted"), 1);
        assert_eq!(report.count("auto_process_installers_deleted"), 3);
        assert_eq!(report.count("auto_process_installers_deferred"), 2);

        let st = store.state();
        assert_eq!(st.installers[&winesteam.id].runner, "steam");
        assert!(!st.revisions.contains_key(&unchanged.id));
        assert!(!st.revisions.contains_key(&corrupt.id));
        assert!(!st.revisions.contains_key(&orphan.id));
        assert!(st.revisions.contains_key(&pending.id));
        assert!(st.revisions.contains_key(&empty.id));
        assert!(st.revisions.contains_key(&brand_new.id));
        assert_eq!(st.revisions.len(), 3);
    }
}
