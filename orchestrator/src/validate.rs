//! Input validation for API endpoints.
//!
//! All checks run before the store or dispatcher is touched; violations fail
//! fast with a 400-equivalent [`ApiError::Validation`].

use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use crate::error::ApiError;

/// Upper bound on session ids (fits a 32-bit signed column either backend).
pub const MAX_SESSION_ID: i64 = i32::MAX as i64;

/// GitHub caps owner and repo segments at 100 characters each.
const MAX_NAME_SEGMENT: usize = 100;

const ALLOWED_HOSTS: [&str; 2] = ["github.com", "www.github.com"];

fn repo_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9._-]+/[A-Za-z0-9._-]+$").expect("valid regex"))
}

pub fn validate_session_id(session_id: i64) -> Result<(), ApiError> {
    if session_id <= 0 {
        return Err(ApiError::Validation(format!(
            "session_id must be greater than 0, got: {session_id}"
        )));
    }
    if session_id > MAX_SESSION_ID {
        return Err(ApiError::Validation(format!(
            "session_id too large: {session_id}"
        )));
    }
    Ok(())
}

/// Repository names must look like `owner/repo`.
pub fn validate_repo_name(name: &str) -> Result<(), ApiError> {
    if name.is_empty() {
        return Err(ApiError::Validation(
            "repository name cannot be empty".into(),
        ));
    }
    if !repo_name_re().is_match(name) {
        return Err(ApiError::Validation(format!(
            "invalid repository name format: {name}. Expected owner/repo"
        )));
    }
    let Some((owner, repo)) = name.split_once('/') else {
        return Err(ApiError::Validation(format!(
            "invalid repository name format: {name}. Expected owner/repo"
        )));
    };
    if owner.len() > MAX_NAME_SEGMENT || repo.len() > MAX_NAME_SEGMENT {
        return Err(ApiError::Validation(format!(
            "repository name too long: {name}"
        )));
    }
    Ok(())
}

/// Repository URLs must be http(s) on an allowed host, with an owner/repo path.
pub fn validate_repo_url(raw: &str) -> Result<(), ApiError> {
    if raw.is_empty() {
        return Err(ApiError::Validation("repository URL cannot be empty".into()));
    }
    let parsed = Url::parse(raw)
        .map_err(|e| ApiError::Validation(format!("invalid repository URL {raw}: {e}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ApiError::Validation(format!(
            "invalid URL scheme: {raw}. Must be http:// or https://"
        )));
    }

    let host = parsed.host_str().unwrap_or_default();
    if !ALLOWED_HOSTS.contains(&host) {
        return Err(ApiError::Validation(format!(
            "invalid repository URL: {raw}. Only github.com repositories are supported"
        )));
    }

    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();
    if segments.len() < 2 {
        return Err(ApiError::Validation(format!(
            "invalid repository URL format: {raw}. Expected https://github.com/owner/repo"
        )));
    }

    let repo = segments[1].trim_end_matches(".git");
    validate_repo_name(&format!("{}/{}", segments[0], repo))
}

/// Resolve a rules path and reject traversal outside the working sandbox.
///
/// Returns the absolute form that gets persisted with the session.
pub fn validate_rules_path(path: Option<&str>) -> Result<Option<String>, ApiError> {
    let Some(path) = path else {
        return Ok(None);
    };
    if path.is_empty() {
        return Err(ApiError::Validation("rules path cannot be empty".into()));
    }

    let resolved = resolve(Path::new(path))
        .map_err(|e| ApiError::Validation(format!("invalid rules path {path}: {e}")))?;

    // Any parent-dir component surviving resolution is a traversal attempt.
    if resolved
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(ApiError::Validation(format!(
            "path traversal detected in rules path: {path}"
        )));
    }

    if resolved.exists() && !(resolved.is_file() || resolved.is_dir()) {
        return Err(ApiError::Validation(format!(
            "rules path must be a file or directory: {path}"
        )));
    }

    Ok(Some(resolved.to_string_lossy().into_owned()))
}

/// Lexical absolutization: anchor at the current directory and fold out
/// `.`/`..` components without touching the filesystem.
fn resolve(path: &Path) -> std::io::Result<PathBuf> {
    let base = if path.is_absolute() {
        PathBuf::new()
    } else {
        std::env::current_dir()?
    };
    let mut out = base;
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_bounds() {
        assert!(validate_session_id(1).is_ok());
        assert!(validate_session_id(MAX_SESSION_ID).is_ok());
        assert!(validate_session_id(0).is_err());
        assert!(validate_session_id(-3).is_err());
        assert!(validate_session_id(MAX_SESSION_ID + 1).is_err());
    }

    #[test]
    fn repo_names() {
        assert!(validate_repo_name("owner/repo").is_ok());
        assert!(validate_repo_name("owner/repo-name.rs").is_ok());
        assert!(validate_repo_name("owner_1/repo_2").is_ok());
        assert!(validate_repo_name("").is_err());
        assert!(validate_repo_name("no-slash").is_err());
        assert!(validate_repo_name("a/b/c").is_err());
        assert!(validate_repo_name("owner/repo name").is_err());
        assert!(validate_repo_name(&format!("{}/repo", "x".repeat(101))).is_err());
    }

    #[test]
    fn repo_urls() {
        assert!(validate_repo_url("https://github.com/owner/repo").is_ok());
        assert!(validate_repo_url("http://www.github.com/owner/repo").is_ok());
        assert!(validate_repo_url("https://github.com/owner/repo.git").is_ok());
        assert!(validate_repo_url("").is_err());
        assert!(validate_repo_url("ftp://github.com/owner/repo").is_err());
        assert!(validate_repo_url("https://gitlab.com/owner/repo").is_err());
        assert!(validate_repo_url("https://github.com/owner").is_err());
        assert!(validate_repo_url("not a url").is_err());
    }

    #[test]
    fn rules_path_traversal_rejected() {
        assert_eq!(validate_rules_path(None).unwrap(), None);
        assert!(validate_rules_path(Some("")).is_err());
        let ok = validate_rules_path(Some("rules/custom.yaml")).unwrap();
        assert!(ok.unwrap().ends_with("rules/custom.yaml"));
        // `..` that climbs past the anchor is folded away, not kept
        let resolved = validate_rules_path(Some("../../etc/passwd")).unwrap().unwrap();
        assert!(!resolved.contains(".."));
    }
}
