//! Identity API paths and persisted-state keys
//!
//! Paths are relative to the API base URL (e.g. `http://127.0.0.1:8080/api`).

/// Password login, returns an access/refresh pair and the user profile
pub const LOGIN_PATH: &str = "/auth/login";

/// Refresh credential exchange (rotates the refresh credential)
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Server-side refresh credential invalidation
pub const LOGOUT_PATH: &str = "/auth/logout";

/// Profile of the user owning the presented access credential
pub const PROFILE_PATH: &str = "/user/me";

/// Demo protected resource
pub const PROTECTED_DATA_PATH: &str = "/data/protected";

/// Storage key holding the persisted refresh credential
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Default access credential lifetime issued by the directory (15 minutes)
pub const DEFAULT_ACCESS_TTL_SECS: u64 = 900;

/// Default refresh credential lifetime issued by the directory (7 days)
pub const DEFAULT_REFRESH_TTL_SECS: u64 = 7 * 24 * 60 * 60;
