//! Status comments on a pull request's comment thread.
//!
//! Every report first deletes all comments written by the bot account, then
//! posts the new one, so the thread carries at most one automated report.
//! Callers that may race on the same thread must hold a lock on the
//! comments URL around each report.

use reqwest::header::{ACCEPT, LINK};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};
use url::Url;

use crate::error::BenchError;

const MAX_DETAIL_LEN: usize = 2000;
const REPORT_HEADING: &str = "## Automated report from asv run";

/// Basic-auth credentials of the bot account
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Comment {
    /// API URL of the comment, used for deletion
    pub url: String,
    pub user: CommentAuthor,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommentAuthor {
    pub login: String,
}

pub fn started_body() -> String {
    format!("{}\nBenchmark run started", REPORT_HEADING)
}

pub fn finished_body(result_link: &Url) -> String {
    format!(
        "{}\nBenchmark run completed successfully. Results available at\n[{}]({})",
        REPORT_HEADING, result_link, result_link
    )
}

pub fn failed_body(step: &str, detail: &str) -> String {
    let detail = if detail.len() > MAX_DETAIL_LEN {
        let mut end = MAX_DETAIL_LEN;
        while !detail.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}\n... (truncated)", &detail[..end])
    } else {
        detail.to_string()
    };
    format!(
        "{}\nBenchmark run failed during {}.\n\n```\n{}\n```",
        REPORT_HEADING, step, detail
    )
}

pub fn build_http_client() -> Result<Client, BenchError> {
    Client::builder()
        .user_agent(concat!("pr_bench/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(BenchError::from)
}

/// One PR's comment thread, authenticated as the bot
#[derive(Clone)]
pub struct CommentChannel {
    client: Client,
    comments_url: String,
    credentials: Credentials,
}

impl CommentChannel {
    pub fn new(client: Client, comments_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            client,
            comments_url: comments_url.into(),
            credentials,
        }
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .header(ACCEPT, "application/vnd.github+json")
    }

    /// All comments on the thread in API order, following pagination links.
    pub async fn list_comments(&self) -> Result<Vec<Comment>, BenchError> {
        let mut comments = Vec::new();
        let mut next = Some(self.comments_url.clone());

        while let Some(page_url) = next.take() {
            let response = check_status(
                self.authed(self.client.get(&page_url)).send().await?,
                "list comments",
            )
            .await?;
            next = response
                .headers()
                .get(LINK)
                .and_then(|v| v.to_str().ok())
                .and_then(next_page_link);
            let page: Vec<Comment> = response.json().await?;
            comments.extend(page);
        }

        debug!("{} comments on {}", comments.len(), self.comments_url);
        Ok(comments)
    }

    pub async fn delete_comment(&self, comment_url: &str) -> Result<(), BenchError> {
        check_status(
            self.authed(self.client.delete(comment_url)).send().await?,
            "delete comment",
        )
        .await?;
        Ok(())
    }

    pub async fn post_comment(&self, body: &str) -> Result<(), BenchError> {
        check_status(
            self.authed(self.client.post(&self.comments_url))
                .json(&json!({ "body": body }))
                .send()
                .await?,
            "post comment",
        )
        .await?;
        Ok(())
    }

    /// Delete every comment authored by the bot account. Returns how many went.
    pub async fn delete_bot_comments(&self) -> Result<usize, BenchError> {
        let mut deleted = 0;
        for comment in self.list_comments().await? {
            if comment.user.login == self.credentials.username {
                self.delete_comment(&comment.url).await?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn replace_report(&self, body: &str) -> Result<(), BenchError> {
        let deleted = self.delete_bot_comments().await?;
        if deleted > 0 {
            info!("Removed {} previous report(s) on {}", deleted, self.comments_url);
        }
        self.post_comment(body).await
    }

    pub async fn report_started(&self) -> Result<(), BenchError> {
        self.replace_report(&started_body()).await
    }

    pub async fn report_finished(&self, result_link: &Url) -> Result<(), BenchError> {
        self.replace_report(&finished_body(result_link)).await
    }

    pub async fn report_failed(&self, step: &str, detail: &str) -> Result<(), BenchError> {
        self.replace_report(&failed_body(step, detail)).await
    }
}

async fn check_status(response: Response, action: &str) -> Result<Response, BenchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    Err(BenchError::Transport(format!(
        "{} at {} returned {}: {}",
        action, url, status, body
    )))
}

/// Pick the `rel="next"` target out of a `Link` header.
pub fn next_page_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| p.trim() == "rel=\"next\"");
        if is_next && target.starts_with('<') && target.ends_with('>') {
            Some(target[1..target.len() - 1].to_string())
        } else {
            None
        }
    })
}
