//! Structured logging field names for the E2EE services.
//!
//! These are the field names every event in this crate uses, so log queries
//! can filter the same way whichever component emitted the event. `tracing`
//! macros need field names as literal identifiers, so call sites spell the
//! names out and take the [`SUBSYSTEM`] value from [`SUBSYSTEM_E2EE`].
//! Key material is never logged; only identifiers, counts and durations.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Distribution aborted, key directory unreachable |
//! | WARN  | Recoverable issue: member skipped, cached record unreadable |
//! | INFO  | Lifecycle events: registration, login, logout, distribution done |
//! | DEBUG | Decision points: cache hit/miss, directory lookups |
//! | TRACE | Per-message iteration during history decryption |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "e2ee"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within the subsystem.
/// Examples: "key_cache", "group_keys", "directory", "identity", "history"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "create_group_key", "fetch_group_key", "login"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Group (or DM conversation) id.
pub const GROUP_ID: &str = "group_id";

/// Member user id a key is wrapped for or fetched by.
pub const MEMBER_ID: &str = "member_id";

/// Account user id of the current session.
pub const USER_ID: &str = "user_id";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of members a group key was delivered to.
pub const SUCCEEDED: &str = "succeeded";

/// Number of members a group key could not be delivered to.
pub const FAILED: &str = "failed";

/// Number of messages processed.
pub const MESSAGE_COUNT: &str = "message_count";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Value for [`SUBSYSTEM`] used by every module in this crate.
pub const SUBSYSTEM_E2EE: &str = "e2ee";
