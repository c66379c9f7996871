//! Fatal-error classification.
//!
//! When a borrower reports a resource-level error, the pool must decide
//! whether the resource is merely in a bad statement state (recoverable)
//! or the backing session is gone (fatal: disable, discard, and count
//! toward admission control).
//!
//! Classification is dispatched through a capability table keyed by
//! [`ResourceKind`] rather than by inspecting driver type names: drivers
//! expose structured diagnostics via [`DiagnosticError`] and the built-in
//! [`KindClassifier`] matches them against per-database fatal code tables.

/// Decides whether an error should permanently disable a resource.
pub trait FaultClassifier<E>: Send + Sync {
    /// `true` if the error indicates the underlying session is unusable.
    fn is_fatal(&self, error: &E) -> bool;
}

/// Classifier that never treats an error as fatal.
///
/// Disables admission control entirely; resources are only discarded by
/// validation and lifetime policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverFatal;

impl<E> FaultClassifier<E> for NeverFatal {
    fn is_fatal(&self, _error: &E) -> bool {
        false
    }
}

/// Classifier backed by a plain predicate.
pub struct FnClassifier<F>(F);

impl<F> FnClassifier<F> {
    /// Wrap a predicate as a classifier.
    pub fn new(is_fatal: F) -> Self {
        Self(is_fatal)
    }
}

impl<F> std::fmt::Debug for FnClassifier<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnClassifier").finish_non_exhaustive()
    }
}

impl<E, F> FaultClassifier<E> for FnClassifier<F>
where
    F: Fn(&E) -> bool + Send + Sync,
{
    fn is_fatal(&self, error: &E) -> bool {
        (self.0)(error)
    }
}

/// Structured diagnostics a driver error can expose for classification.
///
/// All methods have conservative defaults so partial implementations
/// still classify correctly on the signals they do provide.
pub trait DiagnosticError: std::error::Error {
    /// Vendor-specific error code, if the server reported one.
    fn code(&self) -> Option<i32> {
        None
    }

    /// Five-character SQLSTATE, if the server reported one.
    fn sql_state(&self) -> Option<&str> {
        None
    }

    /// Whether the driver itself already knows the transport is gone
    /// (connection reset, broken pipe, unexpected EOF).
    fn is_disconnect(&self) -> bool {
        false
    }
}

/// Database family tag used to select built-in classification tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ResourceKind {
    /// No database-specific knowledge: only SQLSTATE class `08` and
    /// driver-reported disconnects are fatal.
    Generic,
    /// PostgreSQL and wire-compatible servers.
    Postgres,
    /// MySQL and MariaDB.
    MySql,
    /// Microsoft SQL Server.
    SqlServer,
}

// Server-reported codes that mean the session or server is gone, per
// database family. Statement-level failures (syntax, constraint, lock
// timeouts) deliberately stay off these lists.
const MYSQL_FATAL_CODES: &[i32] = &[
    1040, // ER_CON_COUNT_ERROR: too many connections
    1042, // ER_BAD_HOST_ERROR
    1043, // ER_HANDSHAKE_ERROR
    1047, // ER_UNKNOWN_COM_ERROR
    1081, // ER_IPSOCK_ERROR
    1129, // ER_HOST_IS_BLOCKED
    1130, // ER_HOST_NOT_PRIVILEGED
    2002, // CR_CONNECTION_ERROR
    2003, // CR_CONN_HOST_ERROR
    2006, // CR_SERVER_GONE_ERROR
    2013, // CR_SERVER_LOST
];

const SQLSERVER_FATAL_CODES: &[i32] = &[
    64,    // network name no longer available
    121,   // semaphore timeout (transport)
    233,   // no process on the other end of the pipe
    596,   // cannot continue, session in kill state
    10053, // transport aborted by software
    10054, // connection reset by peer
    10060, // connection timed out
];

const PG_FATAL_STATES: &[&str] = &[
    "53300", // too_many_connections
    "57P01", // admin_shutdown
    "57P02", // crash_shutdown
    "57P03", // cannot_connect_now
];

/// Built-in classifier for a [`ResourceKind`].
///
/// Every kind treats SQLSTATE class `08` (connection exception) and
/// driver-reported disconnects as fatal; the per-kind tables add the
/// vendor codes that signal a dead session without an `08` state.
#[derive(Debug, Clone, Copy)]
pub struct KindClassifier {
    kind: ResourceKind,
}

impl KindClassifier {
    /// Create a classifier for the given database family.
    #[must_use]
    pub fn new(kind: ResourceKind) -> Self {
        Self { kind }
    }

    /// The database family this classifier targets.
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn code_is_fatal(&self, code: i32) -> bool {
        match self.kind {
            ResourceKind::MySql => MYSQL_FATAL_CODES.contains(&code),
            ResourceKind::SqlServer => SQLSERVER_FATAL_CODES.contains(&code),
            ResourceKind::Postgres | ResourceKind::Generic => false,
        }
    }

    fn state_is_fatal(&self, state: &str) -> bool {
        if state.starts_with("08") {
            return true;
        }
        match self.kind {
            ResourceKind::Postgres => PG_FATAL_STATES.contains(&state),
            _ => false,
        }
    }
}

impl<E: DiagnosticError> FaultClassifier<E> for KindClassifier {
    fn is_fatal(&self, error: &E) -> bool {
        if error.is_disconnect() {
            return true;
        }
        if error.sql_state().is_some_and(|state| self.state_is_fatal(state)) {
            return true;
        }
        error.code().is_some_and(|code| self.code_is_fatal(code))
    }
}
