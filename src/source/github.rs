//! GitHub repository source handler.
//!
//! Resolves `github://owner/repo` and `https://github.com/owner/repo` repo
//! roots by shallow-cloning with the `git` CLI and walking the checkout.
//! GitHub URLs that are not exactly a repo root (blob links, raw files) fall
//! through to the plain HTTP handler.

use super::{HttpHandler, SourceError, SourceHandler, SourceRecord, walk_directory};
use crate::capability::git_on_path;
use crate::config::Config;
use async_trait::async_trait;

const GITHUB_SCHEME: &str = "github://";
const GITHUB_HTTPS: &str = "https://github.com/";

/// Clones repo roots; delegates everything else to [`HttpHandler`].
pub struct GithubHandler {
    fallback: HttpHandler,
}

impl GithubHandler {
    /// Build a handler that shares the configured HTTP settings.
    pub fn new(config: &Config) -> Self {
        Self {
            fallback: HttpHandler::new(config),
        }
    }
}

#[async_trait]
impl SourceHandler for GithubHandler {
    async fn fetch(&self, input: &str) -> Result<Vec<SourceRecord>, SourceError> {
        let Some(spec) = parse_repo_spec(input)? else {
            // A github.com URL that is not a repo root is a file download.
            return self.fallback.fetch(input).await;
        };

        if !git_on_path() {
            return Err(SourceError::MissingDependency {
                feature: "github",
                requirement: "git".to_string(),
                hint: "install git and ensure it is on PATH".to_string(),
            });
        }

        let checkout = tempfile::tempdir().map_err(|source| SourceError::Io {
            path: "tempdir".to_string(),
            source,
        })?;

        let mut command = tokio::process::Command::new("git");
        command.args(["clone", "--depth", "1"]);
        if let Some(reference) = &spec.reference {
            command.args(["--branch", reference]);
        }
        command.arg(&spec.clone_url);
        command.arg(checkout.path());

        tracing::info!(repo = %spec.owner_repo, reference = ?spec.reference, "Cloning repository");
        let output = command
            .output()
            .await
            .map_err(|err| SourceError::Clone(err.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SourceError::Clone(stderr.trim().to_string()));
        }

        walk_directory(checkout.path())
    }
}

struct RepoSpec {
    owner_repo: String,
    clone_url: String,
    reference: Option<String>,
}

/// Recognize a repo-root spec. Returns `Ok(None)` for GitHub URLs that
/// should be treated as plain downloads.
fn parse_repo_spec(input: &str) -> Result<Option<RepoSpec>, SourceError> {
    if let Some(rest) = input.strip_prefix(GITHUB_SCHEME) {
        let (path, reference) = split_ref(rest);
        let owner_repo = path.trim_matches('/').to_string();
        validate_owner_repo(&owner_repo)?;
        return Ok(Some(RepoSpec {
            clone_url: format!("https://github.com/{owner_repo}.git"),
            owner_repo,
            reference,
        }));
    }

    if let Some(rest) = input.strip_prefix(GITHUB_HTTPS) {
        let (path, reference) = split_ref(rest);
        let segments: Vec<&str> = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();
        // Only exact repo roots are cloneable: /owner/repo or /owner/repo.git.
        if segments.len() != 2 {
            return Ok(None);
        }
        let owner = segments[0];
        let repo = segments[1].trim_end_matches(".git");
        let owner_repo = format!("{owner}/{repo}");
        validate_owner_repo(&owner_repo)?;
        return Ok(Some(RepoSpec {
            clone_url: format!("https://github.com/{owner_repo}.git"),
            owner_repo,
            reference,
        }));
    }

    Ok(None)
}

/// Split a trailing `?ref=...` query off a repo path.
fn split_ref(path: &str) -> (&str, Option<String>) {
    let Some((path, query)) = path.split_once('?') else {
        return (path, None);
    };
    let reference = query.split('&').find_map(|pair| {
        pair.strip_prefix("ref=")
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
    });
    (path, reference)
}

/// Validate owner/repo to keep clone arguments free of injection.
fn validate_owner_repo(owner_repo: &str) -> Result<(), SourceError> {
    let mut parts = owner_repo.split('/');
    let (Some(owner), Some(repo), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(SourceError::InvalidSpec(owner_repo.to_string()));
    };

    for part in [owner, repo] {
        let valid = !part.is_empty()
            && !part.starts_with('-')
            && !part.contains("..")
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(SourceError::InvalidSpec(owner_repo.to_string()));
        }
    }
    Ok(())
}
