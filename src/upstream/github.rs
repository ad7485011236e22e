//! Ticket system client backed by GitHub issues.
//!
//! Applications are tracked as issues; verifiers approve them by posting
//! comments with a fixed heading.

use super::{ensure_success, TicketSystem};
use crate::cache::Cache;
use crate::error::UpstreamError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Comment headings that mark an approver.
pub const APPROVAL_PREFIXES: [&str; 2] = ["## Request Approved", "## Request Proposed"];

const PAGE_SIZE: usize = 100;

/// A comment on an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueComment {
    pub author: String,
    pub body: String,
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GitHubComment {
    user: Option<GitHubUser>,
    #[serde(default)]
    body: Option<String>,
}

/// Authors of approval/proposal comments, distinct, in first-seen order.
pub fn extract_approvers(comments: &[IssueComment]) -> Vec<String> {
    let mut approvers: Vec<String> = Vec::new();

    for comment in comments {
        let body = comment.body.trim_start();
        let is_approval = APPROVAL_PREFIXES.iter().any(|p| body.starts_with(p));
        if is_approval && !approvers.contains(&comment.author) {
            approvers.push(comment.author.clone());
        }
    }

    approvers
}

/// Split an issue reference into `(owner/repo, number)`.
///
/// Accepts full issue URLs, `#42` and bare numbers; the latter two use the
/// default repository.
pub fn parse_issue_reference(reference: &str, default_repo: &str) -> Option<(String, u64)> {
    let reference = reference.trim().trim_end_matches('/');

    if let Some(rest) = reference
        .strip_prefix("https://github.com/")
        .or_else(|| reference.strip_prefix("http://github.com/"))
    {
        let parts: Vec<&str> = rest.split('/').collect();
        if parts.len() >= 4 && (parts[2] == "issues" || parts[2] == "pull") {
            let number = parts[3].parse().ok()?;
            return Some((format!("{}/{}", parts[0], parts[1]), number));
        }
        return None;
    }

    let number = reference.trim_start_matches('#').parse().ok()?;
    Some((default_repo.to_string(), number))
}

/// GitHub issues client with a per-issue comment cache.
pub struct GitHubTickets {
    http: reqwest::Client,
    api_url: String,
    default_repo: String,
    token: Option<String>,
    comments: Arc<dyn Cache<String, Vec<IssueComment>>>,
}

impl GitHubTickets {
    pub fn new(
        http: reqwest::Client,
        api_url: impl Into<String>,
        default_repo: impl Into<String>,
        token: Option<String>,
        comments: Arc<dyn Cache<String, Vec<IssueComment>>>,
    ) -> Self {
        Self {
            http,
            api_url: api_url.into(),
            default_repo: default_repo.into(),
            token,
            comments,
        }
    }

    async fn fetch_page(
        &self,
        repo: &str,
        number: u64,
        page: usize,
    ) -> Result<Vec<IssueComment>, UpstreamError> {
        let url = format!(
            "{}/repos/{}/issues/{}/comments",
            self.api_url.trim_end_matches('/'),
            repo,
            number
        );

        let mut request = self
            .http
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .query(&[("per_page", PAGE_SIZE), ("page", page)]);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }

        let comments: Vec<GitHubComment> = ensure_success(request.send().await?).await?.json().await?;

        Ok(comments
            .into_iter()
            .map(|c| IssueComment {
                author: c.user.map(|u| u.login).unwrap_or_default(),
                body: c.body.unwrap_or_default(),
            })
            .collect())
    }
}

#[async_trait]
impl TicketSystem for GitHubTickets {
    async fn issue_comments(
        &self,
        issue_reference: &str,
    ) -> Result<Vec<IssueComment>, UpstreamError> {
        let (repo, number) = parse_issue_reference(issue_reference, &self.default_repo)
            .ok_or_else(|| {
                UpstreamError::NotFound(format!("unrecognized issue reference: {}", issue_reference))
            })?;

        let key = format!("{}#{}", repo, number);
        if let Some(cached) = self.comments.get(&key) {
            debug!("Comment cache hit for {}", key);
            return Ok(cached);
        }

        let mut all = Vec::new();
        let mut page = 1;
        loop {
            let batch = self.fetch_page(&repo, number, page).await?;
            let done = batch.len() < PAGE_SIZE;
            all.extend(batch);
            if done {
                break;
            }
            page += 1;
        }

        debug!("Fetched {} comments for {}", all.len(), key);
        self.comments.set(key, all.clone());
        Ok(all)
    }
}
