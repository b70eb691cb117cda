use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::error::FetchError;
use crate::pacing::{Pacer, RETRY_BACKOFF};

/// One attempt's request: url plus the identity chosen for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub user_agent: Option<String>,
    pub proxy: Option<String>,
}

pub trait Fetcher {
    fn fetch(&self, request: &FetchRequest) -> Result<String, FetchError>;
}

impl<F: Fetcher + ?Sized> Fetcher for &F {
    fn fetch(&self, request: &FetchRequest) -> Result<String, FetchError> {
        (**self).fetch(request)
    }
}

#[derive(Debug)]
pub enum CrawlOutcome {
    Fetched(String),
    /// Every attempt failed; the keyword yields nothing this cycle.
    Exhausted { attempts: u32, last_error: FetchError },
}

// --- Crawl client ---

pub struct CrawlClient<F> {
    fetcher: F,
    search_base: String,
    regions: Vec<String>,
    user_agents: Vec<String>,
    proxies: Vec<String>,
    max_retries: u32,
}

impl<F: Fetcher> CrawlClient<F> {
    pub fn new(fetcher: F, config: &Config) -> Self {
        Self {
            fetcher,
            search_base: format!(
                "{}{}",
                config.base_url.trim_end_matches('/'),
                config.search_path
            ),
            regions: config.regions.clone(),
            user_agents: config.user_agents.clone(),
            proxies: config.proxies.clone(),
            max_retries: config.max_retries.max(1),
        }
    }

    pub fn search_url(&self, keyword: &str) -> String {
        let mut url = format!("{}?keywords={}", self.search_base, urlencoding::encode(keyword));
        if !self.regions.is_empty() {
            let regions: Vec<_> = self.regions.iter().map(|r| urlencoding::encode(r)).collect();
            url.push_str("&region=");
            url.push_str(&regions.join(","));
        }
        url
    }

    pub fn fetch(&self, keyword: &str, pacer: &dyn Pacer) -> CrawlOutcome {
        let url = self.search_url(keyword);
        let mut rng = rand::thread_rng();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let request = FetchRequest {
                url: url.clone(),
                user_agent: self.user_agents.choose(&mut rng).cloned(),
                proxy: self.proxies.choose(&mut rng).cloned(),
            };
            debug!(keyword = %keyword, attempt, url = %request.url, proxy = ?request.proxy, "fetching");

            match self.fetcher.fetch(&request) {
                Ok(document) => return CrawlOutcome::Fetched(document),
                Err(e) => {
                    warn!(keyword = %keyword, attempt, error = %e, "fetch attempt failed");
                    if attempt >= self.max_retries {
                        error!(keyword = %keyword, attempts = attempt, "all fetch attempts failed");
                        return CrawlOutcome::Exhausted {
                            attempts: attempt,
                            last_error: e,
                        };
                    }
                    pacer.wait(RETRY_BACKOFF.0, RETRY_BACKOFF.1);
                }
            }
        }
    }
}

// --- HTTP fetcher ---

pub struct HttpFetcher {
    client: Client,
    default_headers: HeaderMap,
    timeout: std::time::Duration,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&config.accept_language)
                .context("Invalid Accept-Language value")?,
        );
        default_headers.insert(
            REFERER,
            HeaderValue::from_str(&format!("{}/", config.base_url.trim_end_matches('/')))
                .context("Invalid Referer value")?,
        );

        let timeout = config.request_timeout();
        let client = Self::builder(&default_headers, timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            default_headers,
            timeout,
        })
    }

    fn builder(headers: &HeaderMap, timeout: std::time::Duration) -> reqwest::blocking::ClientBuilder {
        Client::builder()
            .default_headers(headers.clone())
            .timeout(timeout)
    }

    fn proxied_client(&self, proxy: &str) -> Result<Client, FetchError> {
        let proxy_err = |reason: String| FetchError::Proxy {
            proxy: proxy.to_string(),
            reason,
        };
        let proxy_cfg = reqwest::Proxy::all(proxy).map_err(|e| proxy_err(e.to_string()))?;
        Self::builder(&self.default_headers, self.timeout)
            .proxy(proxy_cfg)
            .build()
            .map_err(|e| proxy_err(e.to_string()))
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, request: &FetchRequest) -> Result<String, FetchError> {
        let proxied;
        let client = match &request.proxy {
            Some(proxy) => {
                proxied = self.proxied_client(proxy)?;
                &proxied
            }
            None => &self.client,
        };

        let mut builder = client.get(&request.url);
        if let Some(ua) = &request.user_agent {
            builder = builder.header(USER_AGENT, ua);
        }

        let response = builder
            .send()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        response
            .text()
            .map_err(|e| FetchError::Transport(e.to_string()))
    }
}
