//! `CLAUDE.md` session-context maintenance.
//!
//! The kernel appends one "Agor Session Context" section to the
//! worktree's `CLAUDE.md` so the agent can see which session it is
//! running in. The section is the exact suffix starting at
//! [`SECTION_MARKER`]; removal restores the previous content
//! byte-for-byte.

use agor_core::SessionId;
use std::io;
use std::path::Path;

/// Start of the appended section; everything from here to end-of-file
/// belongs to Agor.
pub const SECTION_MARKER: &str = "\n\n---\n\n## Agor Session Context";

/// Append the session-context section to `CLAUDE.md` under the
/// worktree. Idempotent: a file that already carries the section is
/// left untouched.
///
/// # Errors
///
/// Propagates filesystem failures.
pub fn append_session_context(worktree_path: &Path, session_id: SessionId) -> io::Result<()> {
    let path = worktree_path.join("CLAUDE.md");
    let existing = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };

    if existing.contains(SECTION_MARKER) {
        return Ok(());
    }

    let section = format!(
        "{SECTION_MARKER}\n\nThis worktree is managed by Agor.\n\n- Session ID: `{session_id}`\n- Short ID: `{short}`\n",
        short = session_id.short(),
    );
    std::fs::write(&path, format!("{existing}{section}"))?;
    Ok(())
}

/// Remove the session-context section, restoring the file to its
/// pre-append bytes. A file without the section is left untouched.
///
/// # Errors
///
/// Propagates filesystem failures.
pub fn remove_session_context(worktree_path: &Path) -> io::Result<()> {
    let path = worktree_path.join("CLAUDE.md");
    let existing = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    let Some(start) = existing.find(SECTION_MARKER) else {
        return Ok(());
    };
    std::fs::write(&path, &existing[..start])?;
    Ok(())
}
