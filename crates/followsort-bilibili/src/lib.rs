//! Bilibili adapter (reqwest).
//!
//! This crate implements the `followsort-core` FollowPlatform port over the
//! web relation API, authenticated with a browser cookie and its csrf token.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, COOKIE, ORIGIN, REFERER, USER_AGENT},
    StatusCode,
};
use tokio::time::sleep;

pub mod wire;

use followsort_core::{
    config::Config,
    domain::{EntityId, FollowingPage, Group, GroupId, OwnerId},
    errors::Error,
    ports::FollowPlatform,
    throttle::RetryPolicy,
    Result,
};

pub const API_BASE: &str = "https://api.bilibili.com";

const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36";
const SPACE_ORIGIN: &str = "https://space.bilibili.com";
const WEB_LOCATION: &str = "333.1387";
const DEVICE_REQ: &str = r#"{"platform":"web","device":"pc","spmid":"333.1387"}"#;

#[derive(Clone, Debug)]
pub struct BilibiliSettings {
    pub cookie: String,
    pub csrf_token: String,
    pub base_url: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl BilibiliSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            cookie: cfg.cookie.clone(),
            csrf_token: cfg.csrf_token.clone(),
            base_url: API_BASE.to_string(),
            timeout: cfg.request_timeout,
            retry: cfg.retry_policy(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct BilibiliClient {
    http: reqwest::Client,
    base_url: String,
    csrf_token: String,
    retry: RetryPolicy,
}

impl BilibiliClient {
    pub fn new(settings: BilibiliSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .default_headers(default_headers(&settings.cookie)?)
            .timeout(settings.timeout)
            .build()
            .map_err(|e| Error::External(format!("bilibili client build failed: {e}")))?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            csrf_token: settings.csrf_token,
            retry: settings.retry,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Run `op` until it succeeds, fails permanently, or the attempt budget is spent.
    async fn with_retry<T, Fut>(&self, what: &str, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>> + Send,
    {
        let attempts = self.retry.attempts();
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(call = what, attempt = attempt + 1, of = attempts, error = %e, ?delay, "bilibili call failed; retrying");
                    attempt += 1;
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<String> {
        let resp = self
            .http
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(request_error)?;
        read_body(resp).await
    }

    async fn post_form(&self, path: &str, form: &[(&str, String)]) -> Result<String> {
        let resp = self
            .http
            .post(self.url(path))
            .query(&[("x-bili-device-req-json", DEVICE_REQ)])
            .form(form)
            .send()
            .await
            .map_err(request_error)?;
        read_body(resp).await
    }
}

fn default_headers(cookie: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        COOKIE,
        HeaderValue::from_str(cookie)
            .map_err(|_| Error::Config("BILIBILI_COOKIE contains invalid header characters".to_string()))?,
    );
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_UA));
    headers.insert(REFERER, HeaderValue::from_static("https://space.bilibili.com/"));
    headers.insert(ORIGIN, HeaderValue::from_static(SPACE_ORIGIN));
    headers.insert("accept", HeaderValue::from_static("*/*"));
    headers.insert("accept-language", HeaderValue::from_static("zh-CN,zh;q=0.7"));
    Ok(headers)
}

fn request_error(e: reqwest::Error) -> Error {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        Error::Transient(format!("bilibili request error: {e}"))
    } else {
        Error::External(format!("bilibili request error: {e}"))
    }
}

async fn read_body(resp: reqwest::Response) -> Result<String> {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| Error::Transient(format!("bilibili response read failed: {e}")))?;
    if !status.is_success() {
        return Err(status_error(status, &body));
    }
    Ok(body)
}

/// Map a non-success HTTP status to the error taxonomy.
pub fn status_error(status: StatusCode, body: &str) -> Error {
    let snippet: String = body.chars().take(200).collect();
    let msg = format!("bilibili http {status}: {snippet}");
    match status {
        // 412 is the risk-control block; it clears after backing off.
        StatusCode::TOO_MANY_REQUESTS | StatusCode::PRECONDITION_FAILED => Error::Transient(msg),
        s if s.is_server_error() => Error::Transient(msg),
        _ => Error::External(msg),
    }
}

/// `tag/create` code for a name that is already taken.
pub const TAG_EXISTS: i64 = 22106;

/// Turn a "tag already exists" rejection into the existing tag's id.
///
/// A create that timed out after the server applied it is retried and then
/// rejected with `TAG_EXISTS`; the tag is looked up by name instead.
async fn existing_on_conflict<L, Fut>(name: &str, created: Result<GroupId>, list: L) -> Result<GroupId>
where
    L: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<Group>>>,
{
    match created {
        Err(Error::Platform { code, message }) if code == TAG_EXISTS => {
            tracing::warn!(group = name, "tag already exists; looking up its id");
            list()
                .await?
                .into_iter()
                .find(|g| g.name == name && g.id.0 > 0)
                .map(|g| g.id)
                .ok_or(Error::Platform { code, message })
        }
        other => other,
    }
}

fn join_ids(ids: &[EntityId]) -> String {
    ids.iter()
        .map(|id| id.0.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl FollowPlatform for BilibiliClient {
    async fn following_page(
        &self,
        owner: OwnerId,
        page: u32,
        page_size: u32,
    ) -> Result<FollowingPage> {
        let query = [
            ("vmid", owner.0.to_string()),
            ("pn", page.to_string()),
            ("ps", page_size.to_string()),
            ("order", "desc".to_string()),
            ("order_type", String::new()),
            ("gaia_source", "main_web".to_string()),
            ("web_location", WEB_LOCATION.to_string()),
        ];
        let query = &query;
        tracing::debug!(page, page_size, "fetching followings");
        self.with_retry("followings", || async move {
            wire::following_page(&self.get("/x/relation/followings", query).await?)
        })
        .await
    }

    async fn list_groups(&self) -> Result<Vec<Group>> {
        let query = [
            ("only_master", "true".to_string()),
            ("web_location", WEB_LOCATION.to_string()),
        ];
        let query = &query;
        self.with_retry("tags", || async move {
            wire::groups(&self.get("/x/relation/tags", query).await?)
        })
        .await
    }

    async fn create_group(&self, name: &str) -> Result<GroupId> {
        let form = [("tag", name.to_string()), ("csrf", self.csrf_token.clone())];
        let form = &form;
        tracing::debug!(group = name, "creating tag");
        let created = self
            .with_retry("tag/create", || async move {
                wire::created_group(&self.post_form("/x/relation/tag/create", form).await?)
            })
            .await;
        existing_on_conflict(name, created, || self.list_groups()).await
    }

    async fn assign_to_group(&self, members: &[EntityId], group: GroupId) -> Result<()> {
        if members.is_empty() {
            return Ok(());
        }
        let form = [
            ("fids", join_ids(members)),
            ("tagids", group.0.to_string()),
            ("csrf", self.csrf_token.clone()),
        ];
        let form = &form;
        tracing::debug!(group = %group, members = members.len(), "adding users to tag");
        self.with_retry("tags/addUsers", || async move {
            wire::acknowledged(&self.post_form("/x/relation/tags/addUsers", form).await?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn client(max_attempts: u32) -> BilibiliClient {
        BilibiliClient::new(BilibiliSettings {
            cookie: "SESSDATA=x; bili_jct=y".to_string(),
            csrf_token: "y".to_string(),
            base_url: "http://127.0.0.1:9/".to_string(),
            timeout: Duration::from_secs(1),
            retry: RetryPolicy {
                max_attempts,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(4),
            },
        })
        .unwrap()
    }

    #[test]
    fn rejects_cookie_with_control_characters() {
        let err = BilibiliClient::new(BilibiliSettings {
            cookie: "SESSDATA=x\n".to_string(),
            csrf_token: String::new(),
            base_url: API_BASE.to_string(),
            timeout: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        })
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    fn tag(id: i64, name: &str) -> Group {
        Group {
            id: GroupId(id),
            name: name.to_string(),
            member_count: 0,
        }
    }

    #[tokio::test]
    async fn existing_tag_is_reused_after_create_conflict() {
        let conflict = Err(Error::Platform {
            code: TAG_EXISTS,
            message: "分组已存在".to_string(),
        });
        let id = existing_on_conflict("科技", conflict, || async {
            Ok(vec![tag(3, "游戏"), tag(41, "科技")])
        })
        .await
        .unwrap();
        assert_eq!(id, GroupId(41));
    }

    #[tokio::test]
    async fn conflict_without_matching_tag_keeps_the_platform_error() {
        let conflict = Err(Error::Platform {
            code: TAG_EXISTS,
            message: "分组已存在".to_string(),
        });
        let err = existing_on_conflict("科技", conflict, || async { Ok(vec![tag(3, "游戏")]) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Platform { code: TAG_EXISTS, .. }));
    }

    #[tokio::test]
    async fn other_create_outcomes_skip_the_lookup() {
        let counter = AtomicU32::new(0);
        let listed = &counter;
        let list = move || async move {
            listed.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        };

        let id = existing_on_conflict("科技", Ok(GroupId(9)), list).await.unwrap();
        assert_eq!(id, GroupId(9));

        let rejected = Err(Error::Platform {
            code: -400,
            message: "bad".to_string(),
        });
        let err = existing_on_conflict("科技", rejected, list).await.unwrap_err();
        assert!(matches!(err, Error::Platform { code: -400, .. }));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn builds_urls_and_id_lists() {
        let c = client(1);
        assert_eq!(c.url("/x/relation/tags"), "http://127.0.0.1:9/x/relation/tags");
        assert_eq!(join_ids(&[EntityId(1), EntityId(22), EntityId(333)]), "1,22,333");
    }

    #[test]
    fn maps_http_statuses() {
        assert!(matches!(
            status_error(StatusCode::PRECONDITION_FAILED, ""),
            Error::Transient(_)
        ));
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, ""),
            Error::Transient(_)
        ));
        assert!(matches!(
            status_error(StatusCode::SERVICE_UNAVAILABLE, ""),
            Error::Transient(_)
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, ""),
            Error::External(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_with_backoff() {
        let c = client(3);
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let start = tokio::time::Instant::now();

        let out = c
            .with_retry("test", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::Transient("busy".to_string()))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();

        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s + 2s of backoff.
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_budget_and_skips_permanent_errors() {
        let c = client(2);
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = c
            .with_retry("test", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::Transient("busy".to_string()))
            })
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = c
            .with_retry("test", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::Platform {
                    code: 22106,
                    message: "exists".to_string(),
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Platform { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
