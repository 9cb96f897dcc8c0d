use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;

use crate::error::FinderError;

pub fn cache_key(id: &str) -> String {
    format!("{:x}", md5::compute(id.as_bytes()))
}

/// Disease ids contain `:` which some filesystems reject.
pub fn file_stem(disease_id: &str) -> String {
    disease_id
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}

/// Writes `content` to `path` through a uniquely named temp file and a rename,
/// replacing any existing file.
pub async fn save_atomic(path: &Path, content: &[u8]) -> Result<(), FinderError> {
    let Some(dir) = path.parent() else {
        return Err(FinderError::InvalidArgument(format!(
            "Invalid data path (no parent directory): {}",
            path.display()
        )));
    };
    tokio::fs::create_dir_all(dir).await?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "data".into());
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();

    let mut opened = None;
    for attempt in 0..32_u32 {
        let candidate = dir.join(format!(
            ".{name}.{}.{}.tmp",
            std::process::id(),
            seed.saturating_add(attempt as u128)
        ));
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(file) => {
                opened = Some((candidate, file));
                break;
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err.into()),
        }
    }
    let Some((tmp_path, mut file)) = opened else {
        return Err(FinderError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "Unable to allocate temporary data file",
        )));
    };

    let written = async {
        file.write_all(content).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;
    drop(file);
    if let Err(err) = written {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(err.into());
    }

    if let Err(err) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(err.into());
    }
    Ok(())
}

pub async fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), FinderError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    save_atomic(path, &bytes).await
}

/// Reads a JSON file, returning `None` when it does not exist.
pub async fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, FinderError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Lists the `*.json` files directly under `dir`, sorted by name.
pub async fn json_files(dir: &Path) -> Result<Vec<PathBuf>, FinderError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut out = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_stem_replaces_separator_characters() {
        assert_eq!(file_stem("NANDO:1200001"), "NANDO_1200001");
        assert_eq!(file_stem("a/b"), "a_b");
    }

    #[test]
    fn cache_key_is_md5_hex() {
        assert_eq!(cache_key("https://example.org"), format!("{:x}", md5::compute("https://example.org")));
        assert_eq!(cache_key("x").len(), 32);
    }

    #[tokio::test]
    async fn save_then_load_replaces_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("value.json");

        save_json(&path, &serde_json::json!({"n": 1})).await.expect("first save");
        save_json(&path, &serde_json::json!({"n": 2})).await.expect("second save");

        let loaded: Option<serde_json::Value> = load_json(&path).await.expect("load");
        assert_eq!(loaded, Some(serde_json::json!({"n": 2})));

        let files = json_files(&dir.path().join("nested")).await.expect("list");
        assert_eq!(files, vec![path]);
    }

    #[tokio::test]
    async fn missing_file_and_dir_are_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loaded: Option<serde_json::Value> =
            load_json(&dir.path().join("absent.json")).await.expect("load");
        assert!(loaded.is_none());
        assert!(json_files(&dir.path().join("absent")).await.expect("list").is_empty());
    }
}
