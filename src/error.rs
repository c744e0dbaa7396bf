/// Crate-wide error type.
///
/// The variants mirror how failures are handled downstream:
///
/// - `Config` fails fast at construction time and is never corrected silently
/// - `Cache` is a hard failure (no fallback computation path exists once a
///   cache path is configured)
/// - `Optimizer` propagates to the caller; the batch layer drops the affected
///   unit rather than aborting the whole run
/// - `Data` covers degenerate inputs detectable up front (length mismatches,
///   non-finite values where finite ones are required)
///
/// The type is `Clone` so that memoized pipeline stages can cache a failure
/// and return the same error on every re-read.
#[derive(Clone, PartialEq)]
pub enum Error {
    Config(String),
    Cache(String),
    Optimizer(String),
    Data(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    fn label(&self) -> &'static str {
        match self {
            Error::Config(_) => "configuration error",
            Error::Cache(_) => "cache error",
            Error::Optimizer(_) => "optimizer error",
            Error::Data(_) => "data error",
        }
    }

    fn message(&self) -> &str {
        match self {
            Error::Config(m) | Error::Cache(m) | Error::Optimizer(m) | Error::Data(m) => m,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.label(), self.message())
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.label())
            .field("message", &self.message())
            .finish()
    }
}

impl std::error::Error for Error {}
