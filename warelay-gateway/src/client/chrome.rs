//! Best-effort browser executable discovery.
//!
//! Order: configured override, then well-known install locations. `None`
//! means no opinion — the automation layer picks its own binary.

use std::path::{Path, PathBuf};

/// Install locations probed when no override is configured.
const WELL_KNOWN: &[&str] = &[
    "/usr/bin/google-chrome-stable",
    "/usr/bin/google-chrome",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/opt/google/chrome/chrome",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
];

/// Locate a browser executable, best effort.
pub fn discover(override_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = override_path {
        if path.exists() {
            return Some(path.to_path_buf());
        }
        tracing::warn!(
            path = %path.display(),
            "configured browser path does not exist, falling back to discovery"
        );
    }

    let found = WELL_KNOWN.iter().map(PathBuf::from).find(|path| path.exists());
    match &found {
        Some(path) => tracing::debug!(path = %path.display(), "browser executable discovered"),
        None => tracing::debug!("no browser executable found, automation layer will choose"),
    }
    found
}
