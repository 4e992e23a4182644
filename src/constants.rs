// Shared constants for the ops CLI: terminal formatting, endpoints and
// container defaults used across the execution engine.
#![allow(dead_code)]

pub const FORMAT_RESET: &str = "\x1b[0m";
pub const FORMAT_BOLD: &str = "\x1b[1m";
pub const FORMAT_GRAY: &str = "\x1b[90m";
pub const FORMAT_RED: &str = "\x1b[31m";
pub const FORMAT_GREEN: &str = "\x1b[32m";
pub const FORMAT_YELLOW: &str = "\x1b[33m";
pub const FORMAT_CYAN: &str = "\x1b[36m";

/// Default API endpoint for the team catalog, overridable via `OPS_API_HOST`.
pub const DEFAULT_API_HOST: &str = "https://app.opsctl.dev/api/v1";

/// Registry host used when computing canonical local image tags.
pub const REGISTRY_HOST: &str = "registry.opsctl.dev";

/// Team namespace used for unpublished (purely local) ops.
pub const LOCAL_TEAM: &str = "local";

/// Manifest file names probed when resolving a path argument.
pub const MANIFEST_NAMES: &[&str] = &["ops.yml", "ops.yaml"];

/// Container working directory when the op does not mount the host cwd.
pub const WORKDIR_OPS: &str = "/ops";
/// Container working directory (and bind target) when `mountCwd` is set.
pub const WORKDIR_CWD: &str = "/cwd";

/// Container path the host home directory is bound to under `mountHome`.
pub const HOME_MOUNT_TARGET: &str = "/root";

// Detach sequence: Ctrl-P followed immediately by Ctrl-Q ends the local
// attachment without stopping the remote process.
pub const DETACH_FIRST: u8 = 0x10;
pub const DETACH_SECOND: u8 = 0x11;

/// Environment variable that switches the diagnostic error channel on.
pub const DEBUG_ENV: &str = "OPS_DEBUG";

/// Version assigned to manifest entries that do not declare one.
pub const DEFAULT_VERSION: &str = "0.1.0";
