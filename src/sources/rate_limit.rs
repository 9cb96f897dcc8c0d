//! Outbound pacing for scraping traffic: the search backend gets a slow lane,
//! every organization site is paced per origin.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use http::Extensions;
use reqwest::Url;
use reqwest_middleware::{Middleware, Next};
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};

const SEARCH_INTERVAL: Duration = Duration::from_secs(1);
const SITE_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug)]
pub(crate) struct Pacer {
    search_prefix: Cow<'static, str>,
    search_interval: Duration,
    site_interval: Duration,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl Pacer {
    pub(crate) fn new(
        search_prefix: Cow<'static, str>,
        search_interval: Duration,
        site_interval: Duration,
    ) -> Self {
        Self {
            search_prefix,
            search_interval,
            site_interval,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    fn from_env() -> Self {
        Self::new(
            crate::sources::env_base(crate::config::DEFAULT_SEARCH_BASE, "SUPPORT_FINDER_SEARCH_BASE"),
            SEARCH_INTERVAL,
            SITE_INTERVAL,
        )
    }

    /// Lane name and spacing for `url`.
    fn lane(&self, url: &Url) -> (String, Duration) {
        if url.as_str().starts_with(self.search_prefix.as_ref()) {
            return ("search".to_string(), self.search_interval);
        }
        let origin = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}://{host}:{port}", url.scheme()),
            (Some(host), None) => format!("{}://{host}", url.scheme()),
            (None, _) => url.scheme().to_string(),
        };
        (origin, self.site_interval)
    }

    /// Reserves the lane's next slot and sleeps until it arrives.
    pub(crate) async fn wait(&self, url: &Url) {
        let (lane, interval) = self.lane(url);
        let slot = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = slots.get(&lane).copied().filter(|s| *s > now).unwrap_or(now);
            slots.insert(lane, slot + interval);
            slot
        };
        sleep_until(slot).await;
    }
}

static PACER: OnceLock<Arc<Pacer>> = OnceLock::new();

#[derive(Clone, Debug)]
pub(crate) struct RateLimitMiddleware {
    pacer: Arc<Pacer>,
}

impl RateLimitMiddleware {
    pub(crate) fn new() -> Self {
        Self {
            pacer: PACER.get_or_init(|| Arc::new(Pacer::from_env())).clone(),
        }
    }
}

#[async_trait::async_trait]
impl Middleware for RateLimitMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<reqwest::Response> {
        self.pacer.wait(req.url()).await;
        next.run(req, extensions).await
    }
}
