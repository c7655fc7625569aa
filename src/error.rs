use thiserror::Error;

/// Error taxonomy for the scrape engine. Errors here are never fatal to a
/// running cycle except `ConfigInvalid`, which aborts startup.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("transport failure calling {url}: {source}")]
    TransportFailure {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("response malformed from {url}: {detail}")]
    ResponseMalformed { url: String, detail: String },

    #[error("expression compile error in `{expr}`: {detail}")]
    ExpressionCompile { expr: String, detail: String },

    #[error("expression eval error in `{expr}`: {detail}")]
    ExpressionEval { expr: String, detail: String },

    #[error("analytics schema mismatch for table {table}: {detail}")]
    SchemaMismatch { table: String, detail: String },

    #[error("panic recovered during evaluation: {0}")]
    PanicDuringEvaluation(String),

    #[error("context db error: {0}")]
    ContextDb(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Wraps a closure that might panic and converts the panic into a
/// `PanicDuringEvaluation` error instead of unwinding across the rule
/// traversal boundary. Grounds the Go source's `recover()` defensive
/// boundary around expression evaluation and exporter pushes, replacing it
/// with an explicit Result per the redesign notes.
pub fn catch_and_report<F, T>(f: F) -> EngineResult<T>
where
    F: FnOnce() -> T + std::panic::UnwindSafe,
{
    std::panic::catch_unwind(f).map_err(|payload| {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        EngineError::PanicDuringEvaluation(msg)
    })
}
