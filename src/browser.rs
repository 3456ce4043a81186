//! Browser management: auto-download Chromium, resolve executable paths.

use crate::error::{ReconError, Result};
use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use std::path::PathBuf;
use tracing::info;

/// Returns the managed Chrome installation directory: `~/.sitesource/chrome/`
pub fn managed_chrome_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| ReconError::Config("could not determine home directory".to_string()))?;
    Ok(home.join(".sitesource").join("chrome"))
}

/// Checks the managed directory for a previously-downloaded Chrome executable.
/// Returns `Some(path)` if found, `None` otherwise.
pub fn resolve_chrome_executable() -> Option<PathBuf> {
    let chrome_dir = managed_chrome_dir().ok()?;
    if !chrome_dir.exists() {
        return None;
    }

    // The fetcher places the executable inside a platform-specific subdirectory.
    // Walk the directory to find the first chrome/chromium executable.
    find_chrome_in_dir(&chrome_dir)
}

/// Download Chromium to the managed directory using `BrowserFetcher`.
/// Returns the path to the downloaded executable.
pub async fn download_chrome(force: bool) -> Result<PathBuf> {
    let chrome_dir = managed_chrome_dir()?;

    // If already downloaded and not forcing, return existing path
    if !force {
        if let Some(exe) = find_chrome_in_dir(&chrome_dir) {
            info!("Chrome already installed at {:?}", exe);
            return Ok(exe);
        }
    }

    // Clean directory if forcing re-download
    if force && chrome_dir.exists() {
        info!("Removing existing Chrome installation for re-download...");
        std::fs::remove_dir_all(&chrome_dir).map_err(ReconError::IoError)?;
    }

    // Create directory
    tokio::fs::create_dir_all(&chrome_dir).await.map_err(ReconError::IoError)?;

    info!("Downloading Chromium to {:?}...", chrome_dir);

    let fetcher = BrowserFetcher::new(
        BrowserFetcherOptions::builder()
            .with_path(&chrome_dir)
            .build()
            .map_err(|e| ReconError::Config(format!("failed to configure browser fetcher: {e}")))?,
    );

    let info = fetcher
        .fetch()
        .await
        .map_err(|e| ReconError::Config(format!("failed to download Chromium: {e}")))?;

    info!("Chromium downloaded to {:?}", info.executable_path);
    Ok(info.executable_path)
}

/// Search a directory recursively for a Chrome/Chromium executable.
fn find_chrome_in_dir(dir: &std::path::Path) -> Option<PathBuf> {
    if !dir.exists() {
        return None;
    }

    let entries = walk_dir_recursive(dir);
    for entry in entries {
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();
        let is_exe = name == "chrome"
            || name == "chromium"
            || name == "Chromium"
            || name == "Google Chrome"
            || name == "chrome.exe"
            || name == "chromium.exe"
            // macOS app bundle
            || name == "Chromium.app";

        if is_exe {
            // For macOS .app bundles, find the actual binary inside
            if name.ends_with(".app") {
                let inner = entry
                    .path()
                    .join("Contents/MacOS/Chromium");
                if inner.exists() {
                    return Some(inner);
                }
                continue;
            }
            if entry.path().is_file() {
                return Some(entry.path().to_path_buf());
            }
        }
    }
    None
}

/// Simple recursive directory walk (avoids adding walkdir dependency).
fn walk_dir_recursive(dir: &std::path::Path) -> Vec<std::fs::DirEntry> {
    let mut results = Vec::new();
    walk_recursive(dir, &mut results);
    results
}

fn walk_recursive(dir: &std::path::Path, results: &mut Vec<std::fs::DirEntry>) {
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            results.push(entry);
            if path.is_dir() {
                walk_recursive(&path, results);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_managed_chrome_dir() {
        let dir = managed_chrome_dir().unwrap();
        assert!(dir.ends_with("chrome"));
        assert!(dir.to_string_lossy().contains(".sitesource"));
    }
}
