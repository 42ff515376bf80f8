use snafu::Snafu;

pub type CustomResult<T> = Result<T, Error>;

/// Error taxonomy of the replay pipeline.
///
/// Every variant carries only clonable context so an outcome can be fanned
/// out to all waiters attached to the same in-flight build.
#[derive(Debug, Snafu, Clone, PartialEq)]
#[snafu(visibility(pub))]
pub enum Error {
    /// provider unreachable or returned no usable data
    #[snafu(display("data unavailable for {session}: {message}"))]
    DataUnavailableError { session: String, message: String },

    /// required session field missing or invalid, never retried
    #[snafu(display("session validation failed on field '{field}': {message}"))]
    ValidationError { field: String, message: String },

    /// a single driver stream failed to resample
    #[snafu(display("failed to synchronize driver {driver}: {message}"))]
    PartialComputationError { driver: String, message: String },

    /// durable tier write failed after exhausting all retry attempts
    #[snafu(display("durable write failed after {attempts} attempts: {message}"))]
    PersistenceError { attempts: u32, message: String },

    /// internal signal, never surfaced past the cache manager
    #[snafu(display("cache miss"))]
    CacheMissError,

    /// a shared in-flight build failed, reported to every attached waiter
    #[snafu(display("session build failed: {message}"))]
    BuildFailedError { message: String },
}
