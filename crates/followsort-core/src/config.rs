use std::{collections::HashMap, env, path::Path, time::Duration};

use crate::{
    assign::ExecutorConfig,
    classify::ClassifierConfig,
    domain::OwnerId,
    errors::Error,
    pipeline::PipelineConfig,
    retrieve::RetrieverConfig,
    throttle::RetryPolicy,
    Result,
};

/// Bilibili caps `tags/addUsers` at 50 ids per call.
pub const PLATFORM_MAX_ASSIGN_BATCH: usize = 50;

/// Typed configuration, read from the environment (and `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    // Platform credentials
    pub cookie: String,
    pub owner_id: OwnerId,
    pub csrf_token: String,

    // AI service
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub model_name: String,
    pub temperature: f32,
    pub max_tokens: u32,

    // HTTP behaviour
    pub request_delay: Duration,
    pub max_retries: u32,
    pub request_timeout: Duration,
    pub backoff_max: Duration,

    // Pagination
    pub page_size: u32,
    pub max_pages: u32,

    // Classification
    pub ai_batch_size: usize,
    pub ai_batch_delay: Duration,
    pub ai_rate_limit_requests: u32,
    pub ai_rate_limit_window: Duration,

    // Assignment
    pub assign_batch_size: usize,
    pub assign_batch_delay: Duration,
    pub min_group_size: usize,
}

impl Config {
    /// Load `.env` (if present) and read the process environment.
    ///
    /// Variables already set in the environment win over `.env` entries.
    pub fn load() -> Result<Self> {
        optional_dotenv(dotenvy::dotenv().map(|_| ()))?;
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like `load()`, with an explicit env file that must exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        dotenvy::from_path(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        let cookie = get("BILIBILI_COOKIE").ok_or_else(|| {
            Error::Config("BILIBILI_COOKIE environment variable is required".to_string())
        })?;
        let jar = parse_cookie(&cookie);

        let owner_raw = get("BILIBILI_VMID")
            .or_else(|| jar.get("DedeUserID").cloned())
            .ok_or_else(|| {
                Error::Config(
                    "BILIBILI_VMID is not set and the cookie has no DedeUserID".to_string(),
                )
            })?;
        let owner_id = owner_raw
            .trim()
            .parse::<u64>()
            .map(OwnerId)
            .map_err(|_| Error::Config(format!("invalid owner id: {owner_raw}")))?;

        let csrf_token = get("BILIBILI_CSRF")
            .or_else(|| jar.get("bili_jct").cloned())
            .ok_or_else(|| {
                Error::Config("BILIBILI_CSRF is not set and the cookie has no bili_jct".to_string())
            })?;

        let openai_api_key = get("OPENAI_API_KEY").ok_or_else(|| {
            Error::Config("OPENAI_API_KEY environment variable is required".to_string())
        })?;
        let openai_base_url = get("OPENAI_BASE_URL")
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
            .trim_end_matches('/')
            .to_string();
        let model_name = get("MODEL_NAME").unwrap_or_else(|| "gpt-3.5-turbo".to_string());
        let temperature = parse_or(&get, "AI_TEMPERATURE", 0.3f32)?;
        let max_tokens = parse_or(&get, "AI_MAX_TOKENS", 2000u32)?;

        let request_delay = Duration::from_millis(parse_or(&get, "REQUEST_DELAY_MS", 1000u64)?);
        let max_retries = parse_or(&get, "MAX_RETRIES", 3u32)?.max(1);
        let request_timeout = Duration::from_secs(parse_or(&get, "REQUEST_TIMEOUT_SECS", 30u64)?);
        let backoff_max = Duration::from_millis(parse_or(&get, "BACKOFF_MAX_MS", 30_000u64)?);

        let page_size = positive(parse_or(&get, "PAGE_SIZE", 24u32)?, "PAGE_SIZE")?;
        let max_pages = positive(parse_or(&get, "MAX_PAGES", 100u32)?, "MAX_PAGES")?;

        let ai_batch_size = positive(parse_or(&get, "AI_BATCH_SIZE", 10usize)?, "AI_BATCH_SIZE")?;
        let ai_batch_delay = Duration::from_millis(parse_or(&get, "AI_BATCH_DELAY_MS", 2000u64)?);
        let ai_rate_limit_requests = positive(
            parse_or(&get, "AI_RATE_LIMIT_REQUESTS", 10u32)?,
            "AI_RATE_LIMIT_REQUESTS",
        )?;
        let ai_rate_limit_window =
            Duration::from_secs(parse_or(&get, "AI_RATE_LIMIT_WINDOW", 60u64)?);

        let assign_batch_size = positive(
            parse_or(&get, "ASSIGN_BATCH_SIZE", PLATFORM_MAX_ASSIGN_BATCH)?,
            "ASSIGN_BATCH_SIZE",
        )?
        .min(PLATFORM_MAX_ASSIGN_BATCH);
        let assign_batch_delay =
            Duration::from_millis(parse_or(&get, "ASSIGN_BATCH_DELAY_MS", 1000u64)?);
        let min_group_size = parse_or(&get, "MIN_GROUP_SIZE", 2usize)?.max(1);

        Ok(Self {
            cookie,
            owner_id,
            csrf_token,
            openai_api_key,
            openai_base_url,
            model_name,
            temperature,
            max_tokens,
            request_delay,
            max_retries,
            request_timeout,
            backoff_max,
            page_size,
            max_pages,
            ai_batch_size,
            ai_batch_delay,
            ai_rate_limit_requests,
            ai_rate_limit_window,
            assign_batch_size,
            assign_batch_delay,
            min_group_size,
        })
    }

    /// Backoff used by the platform HTTP layer.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            base_delay: Duration::from_secs(1),
            max_delay: self.backoff_max,
        }
    }

    pub fn retriever(&self) -> RetrieverConfig {
        RetrieverConfig {
            page_size: self.page_size,
            max_pages: self.max_pages,
        }
    }

    pub fn classifier(&self) -> ClassifierConfig {
        ClassifierConfig {
            batch_size: self.ai_batch_size,
            batch_delay: self.ai_batch_delay,
            rate_limit_requests: self.ai_rate_limit_requests,
            rate_limit_window: self.ai_rate_limit_window,
            retry: self.retry_policy(),
        }
    }

    pub fn executor(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_batch: self.assign_batch_size,
            batch_delay: self.assign_batch_delay,
        }
    }

    /// Human-readable settings overview. Credentials are never included.
    pub fn summary(&self) -> Vec<(&'static str, String)> {
        vec![
            ("owner id", self.owner_id.0.to_string()),
            ("csrf token", if self.csrf_token.is_empty() { "missing" } else { "set" }.to_string()),
            ("ai model", self.model_name.clone()),
            ("ai endpoint", self.openai_base_url.clone()),
            ("request delay", format!("{}ms", self.request_delay.as_millis())),
            ("page size", self.page_size.to_string()),
            ("max pages", self.max_pages.to_string()),
            ("ai batch size", self.ai_batch_size.to_string()),
            ("assign batch size", self.assign_batch_size.to_string()),
            ("min group size", self.min_group_size.to_string()),
        ]
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            owner_id: self.owner_id,
            min_group_size: self.min_group_size,
            retriever: self.retriever(),
            executor: self.executor(),
        }
    }
}

/// Split a browser cookie header into name/value pairs.
pub fn parse_cookie(raw: &str) -> HashMap<String, String> {
    raw.split(';')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

/// A missing `.env` is fine; an unreadable or malformed one is not.
fn optional_dotenv(outcome: std::result::Result<(), dotenvy::Error>) -> Result<()> {
    match outcome {
        Err(e) if !e.not_found() => Err(Error::Config(format!("cannot load .env: {e}"))),
        _ => Ok(()),
    }
}

fn parse_or<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| Error::Config(format!("{key} has an invalid value: {raw}"))),
    }
}

fn positive<T: PartialEq + Default>(v: T, key: &str) -> Result<T> {
    if v == T::default() {
        return Err(Error::Config(format!("{key} must be greater than zero")));
    }
    Ok(v)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
