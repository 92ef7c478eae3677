//! The zellij config written into new user homes.

/// Minimal zellij configuration. Written once at user provisioning;
/// never overwritten, so user edits survive.
pub const ZELLIJ_CONFIG: &str = r#"// Agor-managed default. Edit freely; Agor never overwrites this file.
default_shell "bash"
pane_frames false
simplified_ui true
default_layout "compact"
keybinds {
    normal {
        bind "Ctrl q" { Quit; }
    }
}
"#;

/// Path of the zellij config, relative to a user's home.
pub const ZELLIJ_CONFIG_RELPATH: &str = ".config/zellij/config.kdl";
