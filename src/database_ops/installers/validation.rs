//! Static checks on installer scripts.
//!
//! Each rule inspects the parsed script on its own; all rules run and their messages are
//! collected, so a submitter sees every problem at once.

use serde_yaml::{Mapping, Value};

/// Fields that belong to the installer record, never to the script body.
pub const RESERVED_FIELDS: &[&str] = &[
    "version",
    "gogid",
    "humbleid",
    "game_slug",
    "description",
    "installer_slug",
    "name",
    "notes",
    "runner",
    "slug",
    "steamid",
    "year",
];

/// Parsed script plus the runner it is meant for.
pub struct Script<'a> {
    pub body: Mapping,
    pub runner: &'a str,
}

impl Script<'_> {
    fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }
}

pub type Rule = fn(&Script<'_>) -> Result<(), String>;

pub const DEFAULT_RULES: &[Rule] = &[
    doesnt_contain_reserved_fields,
    files_is_a_sequence,
    scummvm_has_game_id,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

pub fn doesnt_contain_reserved_fields(script: &Script<'_>) -> Result<(), String> {
    match RESERVED_FIELDS.iter().find(|f| script.get(f).is_some()) {
        Some(field) => Err(format!("Don't put a '{field}' field in the script.")),
        None => Ok(()),
    }
}

pub fn files_is_a_sequence(script: &Script<'_>) -> Result<(), String> {
    match script.get("files") {
        Some(Value::Sequence(_)) | None => Ok(()),
        Some(_) => Err("'files' section should be an array.".to_string()),
    }
}

pub fn scummvm_has_game_id(script: &Script<'_>) -> Result<(), String> {
    if script.runner != "scummvm" {
        return Ok(());
    }
    let Some(game) = script.get("game") else {
        return Err("Missing section 'game'".to_string());
    };
    let has_id = game
        .as_mapping()
        .is_some_and(|section| section.contains_key("game_id"));
    if has_id {
        Ok(())
    } else {
        Err("ScummVM game should have a game identifier in the 'game' section".to_string())
    }
}

pub fn validate_installer(content: &str, runner: &str) -> ValidationResult {
    validate_with_rules(content, runner, DEFAULT_RULES)
}

pub fn validate_with_rules(content: &str, runner: &str, rules: &[Rule]) -> ValidationResult {
    let body = match serde_yaml::from_str::<Value>(content) {
        Ok(Value::Mapping(body)) => body,
        // an empty document has nothing to violate
        Ok(Value::Null) => Mapping::new(),
        Ok(_) => {
            return ValidationResult {
                is_valid: false,
                errors: vec!["Installer script should be a mapping of sections.".to_string()],
            }
        }
        Err(err) => {
            return ValidationResult {
                is_valid: false,
                errors: vec![format!("Installer script is not valid YAML: {err}")],
            }
        }
    };
    let script = Script { body, runner };
    let errors: Vec<String> = rules.iter().filter_map(|rule| rule(&script).err()).collect();
    ValidationResult {
        is_valid: errors.is_empty(),
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_as_string_is_the_only_error() {
        let result = validate_installer("files: \"notalist\"\ninstaller: []\n", "wine");
        assert!(!result.is_valid);
        assert_eq!(result.errors, vec!["'files' section should be an array.".to_string()]);
    }

    #[test]
    fn files_as_mapping_is_rejected_too() {
        let result = validate_installer("files:\n  setup: N/A\n", "linux");
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn scummvm_needs_game_section_and_id() {
        let missing_section = validate_installer("files: []\n", "scummvm");
        assert_eq!(missing_section.errors, vec!["Missing section 'game'".to_string()]);

        let missing_id = validate_installer("game:\n  path: $GAMEDIR\n", "scummvm");
        assert!(!missing_id.is_valid);
        assert!(missing_id.errors[0].contains("game identifier"));

        let ok = validate_installer("game:\n  game_id: monkey\n  path: $GAMEDIR\n", "scummvm");
        assert!(ok.is_valid);
    }

    #[test]
    fn errors_accumulate_across_rules() {
        let content = "steamid: 220\nname: Half-Life 2\nfiles: nope\n";
        let result = validate_installer(content, "scummvm");
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 3);
        assert!(result.errors[0].contains("'name'"));
    }

    #[test]
    fn reserved_field_is_reported() {
        let result = validate_installer("steamid: 220\ngame:\n  appid: 220\n", "steam");
        assert_eq!(result.errors, vec!["Don't put a 'steamid' field in the script.".to_string()]);
    }

    #[test]
    fn broken_yaml_is_invalid() {
        let result = validate_installer("files: [unterminated\n", "wine");
        assert!(!result.is_valid);
        assert!(result.errors[0].starts_with("Installer script is not valid YAML"));
    }

    #[test]
    fn custom_rule_lists_are_honored() {
        fn no_installer_section(script: &Script<'_>) -> Result<(), String> {
            if script.get("installer").is_some() {
                Ok(())
            } else {
                Err("missing installer".into())
            }
        }
        let rules: &[Rule] = &[files_is_a_sequence, no_installer_section];
        let result = validate_with_rules("files: []\n", "wine", rules);
        assert_eq!(result.errors, vec!["missing installer".to_string()]);
    }
}
