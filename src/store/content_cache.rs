use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::FinderError;
use crate::utils::persist;

#[derive(Debug, Serialize, Deserialize)]
struct CachedPage {
    url: String,
    content: String,
}

/// Extracted page text keyed by the md5 of its URL.
#[derive(Debug, Clone)]
pub struct ContentCache {
    dir: PathBuf,
}

impl ContentCache {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, url: &str) -> PathBuf {
        self.dir.join(format!("{}.json", persist::cache_key(url)))
    }

    /// Returns cached text for `url`. A corrupt entry counts as a miss.
    pub async fn get(&self, url: &str) -> Option<String> {
        match persist::load_json::<CachedPage>(&self.path_for(url)).await {
            Ok(Some(page)) if page.url == url => Some(page.content),
            Ok(_) => None,
            Err(err) => {
                debug!(url, error = %err, "Ignoring unreadable content cache entry");
                None
            }
        }
    }

    pub async fn put(&self, url: &str, content: &str) -> Result<(), FinderError> {
        let page = CachedPage {
            url: url.to_string(),
            content: content.to_string(),
        };
        persist::save_json(&self.path_for(url), &page).await
    }
}
