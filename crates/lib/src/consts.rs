//! Shared constants: manifest file names, environment variables, defaults.

use std::time::Duration;

/// File marking the workspace root.
pub const WORKSPACE_MANIFEST: &str = "workspace.yaml";

/// Per-component package manifest file name.
pub const COMPONENT_MANIFEST: &str = "build.yaml";

/// Environment variable overriding the default cache level.
pub const ENV_DEFAULT_CACHE_LEVEL: &str = "MASON_DEFAULT_CACHE_LEVEL";

/// Environment variable overriding the local cache directory.
pub const ENV_CACHE_DIR: &str = "MASON_CACHE_DIR";

/// Environment variable configuring the remote artifact cache base URL.
/// When unset, no remote cache is used regardless of the cache level.
pub const ENV_REMOTE_CACHE_URL: &str = "MASON_REMOTE_CACHE_URL";

/// Number of hex characters kept from the full SHA-256 when forming a
/// package version. Long enough to avoid collisions, short enough to keep
/// cache file names readable.
pub const VERSION_PREFIX_LEN: usize = 32;

/// How long the watch loop waits after the last file event before it
/// coalesces the burst into a single rebuild.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

/// Layout directory used for a dependency when the package does not map it
/// explicitly. The dependency's sanitized full name is appended.
pub const DEFAULT_DEP_LAYOUT: &str = "_deps";
