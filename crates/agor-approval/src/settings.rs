//! Project-scope permission persistence: `.claude/settings.json`.
//!
//! The file belongs to the user's tooling, not to Agor: the writer
//! merges, never replaces. Other keys are preserved verbatim; the
//! allow-list is deduplicated; the file is written with two-space
//! indentation.

use crate::error::{ApprovalError, ApprovalResult};
use serde_json::{Value, json};
use std::path::Path;

/// Relative path of the settings file under a worktree.
pub const SETTINGS_RELPATH: &str = ".claude/settings.json";

/// Merge tool names into `permissions.allow.tools` under the worktree,
/// creating directories and the file as needed. Applying the same
/// allow-list twice is equivalent to applying it once.
///
/// # Errors
///
/// Fails on filesystem errors, or when an existing settings file is not
/// valid JSON (it is never clobbered).
pub fn update_project_settings(
    worktree_path: &Path,
    allow_tools: &[String],
) -> ApprovalResult<()> {
    let settings_path = worktree_path.join(SETTINGS_RELPATH);

    let mut settings: Value = if settings_path.exists() {
        let raw = std::fs::read_to_string(&settings_path)?;
        serde_json::from_str(&raw).map_err(|e| ApprovalError::MalformedSettings {
            path: settings_path.display().to_string(),
            reason: e.to_string(),
        })?
    } else {
        json!({})
    };

    if !settings.is_object() {
        return Err(ApprovalError::MalformedSettings {
            path: settings_path.display().to_string(),
            reason: "top level is not an object".to_string(),
        });
    }

    let has_tools_array = settings
        .pointer("/permissions/allow/tools")
        .is_some_and(Value::is_array);

    if has_tools_array {
        if let Some(tools) = settings
            .pointer_mut("/permissions/allow/tools")
            .and_then(Value::as_array_mut)
        {
            for tool in allow_tools {
                if !tools.iter().any(|t| t.as_str() == Some(tool)) {
                    tools.push(Value::String(tool.clone()));
                }
            }
        }
    } else {
        // Build the missing path without touching sibling keys.
        let malformed = |what: &str| ApprovalError::MalformedSettings {
            path: settings_path.display().to_string(),
            reason: format!("{what} is not an object"),
        };
        let root = settings
            .as_object_mut()
            .ok_or_else(|| malformed("top level"))?;
        let permissions = root.entry("permissions").or_insert_with(|| json!({}));
        let permissions = permissions
            .as_object_mut()
            .ok_or_else(|| malformed("permissions"))?;
        let allow = permissions.entry("allow").or_insert_with(|| json!({}));
        let allow = allow
            .as_object_mut()
            .ok_or_else(|| malformed("permissions.allow"))?;

        let mut deduped: Vec<Value> = Vec::new();
        for tool in allow_tools {
            if !deduped.iter().any(|t| t.as_str() == Some(tool)) {
                deduped.push(Value::String(tool.clone()));
            }
        }
        allow.insert("tools".to_string(), Value::Array(deduped));
    }

    if let Some(parent) = settings_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let rendered = serde_json::to_string_pretty(&settings).map_err(|e| {
        ApprovalError::MalformedSettings {
            path: settings_path.display().to_string(),
            reason: e.to_string(),
        }
    })?;
    std::fs::write(&settings_path, format!("{rendered}\n"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(worktree: &Path) -> Value {
        let raw = std::fs::read_to_string(worktree.join(SETTINGS_RELPATH)).unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn creates_file_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        update_project_settings(dir.path(), &["Bash".to_string()]).unwrap();

        let settings = read(dir.path());
        assert_eq!(settings["permissions"]["allow"]["tools"], json!(["Bash"]));
    }

    #[test]
    fn merges_and_dedupes_preserving_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_RELPATH);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            r#"{
  "theme": "dark",
  "permissions": {
    "allow": { "tools": ["Read"] },
    "deny": ["WebFetch"]
  }
}"#,
        )
        .unwrap();

        update_project_settings(
            dir.path(),
            &["Bash".to_string(), "Read".to_string()],
        )
        .unwrap();

        let settings = read(dir.path());
        assert_eq!(settings["theme"], "dark");
        assert_eq!(settings["permissions"]["deny"], json!(["WebFetch"]));
        assert_eq!(
            settings["permissions"]["allow"]["tools"],
            json!(["Read", "Bash"])
        );
    }

    #[test]
    fn applying_twice_equals_applying_once() {
        let dir = tempfile::tempdir().unwrap();
        let tools = vec!["Bash".to_string(), "Edit".to_string()];

        update_project_settings(dir.path(), &tools).unwrap();
        let once = std::fs::read_to_string(dir.path().join(SETTINGS_RELPATH)).unwrap();

        update_project_settings(dir.path(), &tools).unwrap();
        let twice = std::fs::read_to_string(dir.path().join(SETTINGS_RELPATH)).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn two_space_indentation() {
        let dir = tempfile::tempdir().unwrap();
        update_project_settings(dir.path(), &["Bash".to_string()]).unwrap();
        let raw = std::fs::read_to_string(dir.path().join(SETTINGS_RELPATH)).unwrap();
        assert!(raw.contains("\n  \"permissions\""));
    }

    #[test]
    fn malformed_existing_file_is_never_clobbered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_RELPATH);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        let result = update_project_settings(dir.path(), &["Bash".to_string()]);
        assert!(matches!(
            result,
            Err(ApprovalError::MalformedSettings { .. })
        ));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }
}
