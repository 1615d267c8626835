//! Rich diagnostic error types for the Leolani coordination core.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text. Reactive handlers never let these escape
//! into the event bus: the topic worker logs whatever a processor returns and
//! moves on to the next event.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the Leolani core.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain through to the CLI.
#[derive(Debug, Error, Diagnostic)]
pub enum LeolaniError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Friend(#[from] FriendError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Bdi(#[from] BdiError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Location(#[from] LocationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Reply(#[from] ReplyError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Monitoring(#[from] MonitoringError),
}

// ---------------------------------------------------------------------------
// Bus errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum BusError {
    #[error("worker \"{worker}\" consumes no topics and has no schedule")]
    #[diagnostic(
        code(leolani::bus::idle_worker),
        help("Give the worker at least one topic to consume or a scheduled tick interval.")
    )]
    IdleWorker { worker: String },
}

// ---------------------------------------------------------------------------
// Monitoring errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum MonitoringError {
    #[error("cannot listen on {addr}: {source}")]
    #[diagnostic(
        code(leolani::monitoring::bind),
        help(
            "Another process may own the port. Change `[monitoring] port` or set \
             `enabled = false` to run without the HTTP view."
        )
    )]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Friend store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum FriendError {
    #[error("identifier \"{identifier}\" is claimed by {} distinct URIs: {}", .uris.len(), .uris.join(", "))]
    #[diagnostic(
        code(leolani::friends::conflicting_uris),
        help(
            "A single perceptual identifier must map to at most one identity. \
             The store was corrupted by conflicting writers; the entries are \
             left untouched so they can be inspected and repaired."
        )
    )]
    ConflictingUris {
        identifier: String,
        uris: Vec<String>,
    },

    #[error("I/O error: {source}")]
    #[diagnostic(
        code(leolani::friends::io),
        help(
            "A filesystem operation failed. Check that the data directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("redb transaction error: {message}")]
    #[diagnostic(
        code(leolani::friends::redb),
        help(
            "The embedded friend database encountered a transaction error. \
             Try running with a fresh data directory if the problem persists."
        )
    )]
    Redb { message: String },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(leolani::friends::serde),
        help("Stored friend records could not be decoded. The on-disk format may be from another version.")
    )]
    Serialization { message: String },
}

// ---------------------------------------------------------------------------
// BDI errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum BdiError {
    #[error("the BDI transition table is empty")]
    #[diagnostic(
        code(leolani::bdi::empty_model),
        help("Configure at least the `init` and `chat` intentions under `[bdi.model]`.")
    )]
    EmptyModel,

    #[error("initial intention \"{intention}\" has no row in the transition table")]
    #[diagnostic(
        code(leolani::bdi::unknown_initial),
        help("Every initial intention needs outgoing transitions under `[bdi.model.{intention}]`.")
    )]
    UnknownInitialIntention { intention: String },

    #[error("transition \"{intention}\" --{desire}--> has no target intentions")]
    #[diagnostic(
        code(leolani::bdi::empty_target),
        help("Give each transition at least one target intention.")
    )]
    EmptyTarget { intention: String, desire: String },

    #[error("empty label in the BDI transition table")]
    #[diagnostic(
        code(leolani::bdi::empty_label),
        help("Intention and desire labels must be non-empty strings.")
    )]
    EmptyLabel,

    #[error("no transition for achieved desire(s) {achieved:?} from intention(s) {intentions:?}")]
    #[diagnostic(
        code(leolani::bdi::missing_transition),
        help(
            "The achieved desire is not mapped for the current intention. \
             Add it to `[bdi.model]` or check which component published it."
        )
    )]
    MissingTransition {
        intentions: Vec<String>,
        achieved: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Context errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ContextError {
    #[error("no active scenario to apply \"{update}\" to")]
    #[diagnostic(
        code(leolani::context::no_scenario),
        help(
            "Perception events can arrive before the `init` intention created a scenario. \
             They are dropped until a scenario is active."
        )
    )]
    NoActiveScenario { update: String },

    #[error("mention {mention_id} carries no {annotation} annotation")]
    #[diagnostic(
        code(leolani::context::missing_annotation),
        help("Speaker mentions need both an `Entity` and a `VectorIdentity` annotation.")
    )]
    MissingAnnotation {
        mention_id: String,
        annotation: String,
    },
}

// ---------------------------------------------------------------------------
// Geolocation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum LocationError {
    #[error("geolocation request to {url} failed: {message}")]
    #[diagnostic(
        code(leolani::location::request),
        help("The scenario continues with an empty location.")
    )]
    Request { url: String, message: String },

    #[error("geolocation lookup timed out after {timeout_ms} ms")]
    #[diagnostic(
        code(leolani::location::timeout),
        help("Increase `context.geolocation_timeout_ms` if the service is slow but reachable.")
    )]
    Timeout { timeout_ms: u64 },

    #[error("malformed geolocation response: {message}")]
    #[diagnostic(
        code(leolani::location::malformed),
        help("The service answered with JSON that lacks country/region/city fields.")
    )]
    Malformed { message: String },
}

// ---------------------------------------------------------------------------
// Reply errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ReplyError {
    #[error("reply generation failed: {message}")]
    #[diagnostic(
        code(leolani::reply::failed),
        help("A generic acknowledgement is sent instead.")
    )]
    Failed { message: String },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("cannot determine home directory")]
    #[diagnostic(
        code(leolani::config::no_home),
        help("Set the HOME environment variable or pass `--config` explicitly.")
    )]
    NoHome,

    #[error("failed to read configuration: {path}")]
    #[diagnostic(
        code(leolani::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {path}: {message}")]
    #[diagnostic(
        code(leolani::config::parse),
        help("Check the TOML syntax in the configuration file.")
    )]
    Parse { path: String, message: String },

    #[error("invalid configuration: {message}")]
    #[diagnostic(code(leolani::config::invalid), help("{message}"))]
    Invalid { message: String },
}

/// Convenience alias for functions returning Leolani results.
pub type LeolaniResult<T> = std::result::Result<T, LeolaniError>;
