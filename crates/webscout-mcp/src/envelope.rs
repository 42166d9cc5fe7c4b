use serde::Serialize;
use webscout_core::Error;

pub const SCHEMA_VERSION: u64 = 1;

/// Failure messages shown to hosts are cut to this many characters.
pub const MAX_MESSAGE_CHARS: usize = 2_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidParams,
    InvalidUrl,
    FetchFailed,
    NoContentFound,
    SearchFailed,
    ProviderUnavailable,
    UnknownProvider,
    NoSearchProvider,
    WorkerSpawnFailed,
    WorkerExitedNonZero,
    TaskUnderspecified,
    Cancelled,
    IoError,
    UnexpectedError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidParams => "invalid_params",
            Self::InvalidUrl => "invalid_url",
            Self::FetchFailed => "fetch_failed",
            Self::NoContentFound => "no_content_found",
            Self::SearchFailed => "search_failed",
            Self::ProviderUnavailable => "provider_unavailable",
            Self::UnknownProvider => "unknown_provider",
            Self::NoSearchProvider => "no_search_provider",
            Self::WorkerSpawnFailed => "worker_spawn_failed",
            Self::WorkerExitedNonZero => "worker_exited_non_zero",
            Self::TaskUnderspecified => "task_underspecified",
            Self::Cancelled => "cancelled",
            Self::IoError => "io_error",
            Self::UnexpectedError => "unexpected_error",
        }
    }

    pub fn retryable(self) -> bool {
        match self {
            Self::FetchFailed | Self::SearchFailed | Self::WorkerExitedNonZero => true,
            // Terminal or needs a change of input/configuration first.
            Self::InvalidParams
            | Self::InvalidUrl
            | Self::NoContentFound
            | Self::ProviderUnavailable
            | Self::UnknownProvider
            | Self::NoSearchProvider
            | Self::WorkerSpawnFailed
            | Self::TaskUnderspecified
            | Self::Cancelled
            | Self::IoError
            | Self::UnexpectedError => false,
        }
    }

    pub fn hint(self) -> &'static str {
        match self {
            Self::InvalidParams => "Check the required arguments and try again.",
            Self::InvalidUrl => "Pass an absolute http(s) URL like https://example.com/page.",
            Self::FetchFailed => "The site may be down, slow or blocking automated clients. Retry later or try another URL.",
            Self::NoContentFound => "The page has no readable article region. Try a `selector`, or a more specific URL.",
            Self::SearchFailed => "The search backend returned an error. Retry, or pass urls explicitly.",
            Self::ProviderUnavailable => "The provider lacks its credential. Set its API key (e.g. BRAVE_API_KEY) and retry.",
            Self::UnknownProvider => "Run `webscout doctor` to list registered providers.",
            Self::NoSearchProvider => "Configure a search provider (e.g. BRAVE_API_KEY) or pass urls to read directly.",
            Self::WorkerSpawnFailed => "Install the scout worker or point WEBSCOUT_WORKER_BIN at it.",
            Self::WorkerExitedNonZero => "The scout worker failed; see the message for its stderr.",
            Self::TaskUnderspecified => "Provide at least one url or a search query.",
            Self::Cancelled => "The request was cancelled before it finished.",
            Self::IoError => "A local file or pipe operation failed; check disk space and temp dir permissions.",
            Self::UnexpectedError => "Unexpected internal error.",
        }
    }

    pub fn from_error(e: &Error) -> Self {
        match e {
            Error::InvalidUrl(_) => Self::InvalidUrl,
            Error::FetchFailed(_) => Self::FetchFailed,
            Error::NoContentFound(_) => Self::NoContentFound,
            Error::Search(_) => Self::SearchFailed,
            Error::ProviderUnavailable(_) => Self::ProviderUnavailable,
            Error::UnknownProvider(_) => Self::UnknownProvider,
            Error::NoSearchProvider(_) => Self::NoSearchProvider,
            Error::WorkerSpawnFailed(_) => Self::WorkerSpawnFailed,
            Error::WorkerExitedNonZero { .. } => Self::WorkerExitedNonZero,
            Error::TaskUnderspecified(_) => Self::TaskUnderspecified,
            Error::Cancelled => Self::Cancelled,
            Error::Io(_) => Self::IoError,
        }
    }
}

pub fn bounded_message(message: &str) -> String {
    match message.char_indices().nth(MAX_MESSAGE_CHARS) {
        None => message.to_string(),
        Some((i, _)) => format!("{}…", &message[..i]),
    }
}

pub fn add_envelope_fields(payload: &mut serde_json::Value, kind: &str, elapsed_ms: u128) {
    payload["schema_version"] = serde_json::json!(SCHEMA_VERSION);
    payload["kind"] = serde_json::json!(kind);
    payload["elapsed_ms"] = serde_json::json!(elapsed_ms);
}

pub fn error_obj(code: ErrorCode, message: impl ToString, hint: impl ToString) -> serde_json::Value {
    #[derive(Serialize)]
    struct ErrorObject {
        code: &'static str,
        message: String,
        hint: String,
        retryable: bool,
    }

    let e = ErrorObject {
        code: code.as_str(),
        message: bounded_message(&message.to_string()),
        hint: hint.to_string(),
        retryable: code.retryable(),
    };
    serde_json::to_value(e).unwrap_or_else(|_| {
        serde_json::json!({
            "code": code.as_str(),
            "message": "",
            "hint": "",
            "retryable": code.retryable()
        })
    })
}

/// `{ok: false, error: {...}}` for a core error.
pub fn error_payload(e: &Error) -> serde_json::Value {
    let code = ErrorCode::from_error(e);
    serde_json::json!({
        "ok": false,
        "error": error_obj(code, e, code.hint()),
    })
}
