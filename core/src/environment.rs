//! Boundary: gathers runtime environment facts used to render the
//! system prompt handed to `smithers-providers::multiplexer::start_round`.
//!
//! All filesystem, clock, and env-var access lives here; [`EnvironmentContext`]
//! itself is a plain, already-resolved struct with no conditional fields.

use std::path::{Path, PathBuf};

const MAX_AGENTS_MD_BYTES: usize = 64 * 1024;

/// A resolved snapshot of the process's environment, rendered into the
/// system prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentContext {
    pub date: String,
    pub os: &'static str,
    pub arch: &'static str,
    pub cwd: String,
    pub is_git_repo: bool,
    pub agents_md: String,
}

impl EnvironmentContext {
    #[must_use]
    pub fn new(
        date: impl Into<String>,
        os: &'static str,
        arch: &'static str,
        cwd: impl Into<String>,
        is_git_repo: bool,
        agents_md: impl Into<String>,
    ) -> Self {
        Self {
            date: date.into(),
            os,
            arch,
            cwd: cwd.into(),
            is_git_repo,
            agents_md: agents_md.into(),
        }
    }

    /// Gathers environment facts from the OS. Called once per process
    /// startup; the resulting context is reused for every turn.
    #[must_use]
    pub fn gather() -> Self {
        let date = system_time_date(std::time::SystemTime::now());
        let cwd_path = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let is_git_repo = has_git_ancestor(&cwd_path);
        let cwd = cwd_path.display().to_string();
        let agents_md = discover_agents_md(&cwd_path);

        Self::new(date, std::env::consts::OS, std::env::consts::ARCH, cwd, is_git_repo, agents_md)
    }

    /// Renders the context into a system-prompt-shaped block of text.
    #[must_use]
    pub fn render(&self, model: &str) -> String {
        let mut out = String::new();
        out.push_str("Environment:\n");
        out.push_str(&format!("Date: {}\n", self.date));
        out.push_str(&format!("Model: {model}\n"));
        out.push_str(&format!("Platform: {} ({})\n", self.os, self.arch));
        out.push_str(&format!("Working directory: {}\n", self.cwd));
        out.push_str(&format!("Git repository: {}\n", self.is_git_repo));
        if !self.agents_md.is_empty() {
            out.push_str("\nProject instructions:\n");
            out.push_str(&self.agents_md);
        }
        out
    }
}

fn system_time_date(now: std::time::SystemTime) -> String {
    let secs = now
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let days = secs / 86_400;
    let (y, m, d) = days_to_ymd(i64::try_from(days).unwrap_or(0));
    format!("{y:04}-{m:02}-{d:02}")
}

/// Howard Hinnant's `civil_from_days`, also used by `smithers-store`.
fn days_to_ymd(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

/// Discovers and concatenates `AGENTS.md` files from the user's
/// environment, global first, most-specific last.
///
/// Search order: `~/.smithers/AGENTS.md`, then ancestor directories from
/// root down to `cwd`. Total injected content is capped at
/// [`MAX_AGENTS_MD_BYTES`].
fn discover_agents_md(cwd: &Path) -> String {
    let mut sections = Vec::new();
    let mut sources = Vec::new();

    if let Some(home) = dirs::home_dir() {
        let global_path = home.join(".smithers").join("AGENTS.md");
        if let Ok(content) = std::fs::read_to_string(&global_path) {
            let trimmed = content.trim();
            if !trimmed.is_empty() {
                sources.push(global_path.display().to_string());
                sections.push(trimmed.to_string());
            }
        }
    }

    let mut ancestors = Vec::new();
    let mut ancestor_sources = Vec::new();
    let mut dir = cwd.to_path_buf();
    loop {
        let agents_path = dir.join("AGENTS.md");
        if agents_path.is_file() {
            if let Ok(content) = std::fs::read_to_string(&agents_path) {
                let trimmed = content.trim();
                if !trimmed.is_empty() {
                    ancestor_sources.push(agents_path.display().to_string());
                    ancestors.push(trimmed.to_string());
                }
            }
        }
        if !dir.pop() {
            break;
        }
    }
    ancestors.reverse();
    ancestor_sources.reverse();
    sections.extend(ancestors);
    sources.extend(ancestor_sources);

    if !sources.is_empty() {
        tracing::debug!(count = sources.len(), sources = ?sources, "discovered AGENTS.md instruction files");
    }

    if sections.is_empty() {
        return String::new();
    }

    let mut result = sections.join("\n\n");
    if result.len() > MAX_AGENTS_MD_BYTES {
        let mut end = MAX_AGENTS_MD_BYTES;
        while !result.is_char_boundary(end) {
            end -= 1;
        }
        result.truncate(end);
    }
    result
}

fn has_git_ancestor(start: &Path) -> bool {
    let mut dir = start.to_path_buf();
    loop {
        if dir.join(".git").exists() {
            return true;
        }
        if !dir.pop() {
            return false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{discover_agents_md, has_git_ancestor, EnvironmentContext};

    #[test]
    fn gather_produces_renderable_context() {
        let ctx = EnvironmentContext::gather();
        let rendered = ctx.render("claude/claude-sonnet-4-20250514");
        assert!(rendered.contains("Date:"));
        assert!(rendered.contains("Platform:"));
        assert!(rendered.contains("Working directory:"));
    }

    #[test]
    fn discover_agents_md_reads_from_cwd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("AGENTS.md"), "project rules here").unwrap();
        let result = discover_agents_md(dir.path());
        assert!(result.contains("project rules here"));
    }

    #[test]
    fn discover_agents_md_walks_ancestors_global_first() {
        let parent = tempfile::tempdir().unwrap();
        let child = parent.path().join("subdir");
        std::fs::create_dir(&child).unwrap();
        std::fs::write(parent.path().join("AGENTS.md"), "parent rules").unwrap();
        std::fs::write(child.join("AGENTS.md"), "child rules").unwrap();

        let result = discover_agents_md(&child);
        let parent_pos = result.find("parent rules").unwrap();
        let child_pos = result.find("child rules").unwrap();
        assert!(parent_pos < child_pos);
    }

    #[test]
    fn discover_agents_md_empty_when_none_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_agents_md(dir.path()).is_empty());
    }

    #[test]
    fn has_git_ancestor_finds_repo_or_reports_false_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!has_git_ancestor(dir.path()));
    }
}
