// Define an errors module and use a glob import as recommended by:
//
//     http://brson.github.io/2016/11/30/starting-with-error-chain
//

// Create the Error, ErrorKind, ResultExt, and Result types
error_chain! {
    // Automatic conversions between this error chain and other error types not defined by the
    // `error_chain!`. The description and cause will forward to the description and cause of the
    // original error.
    foreign_links {
        Database(::diesel::result::Error);
        DatabaseConnectionPool(::diesel::r2d2::PoolError);
        Io(::std::io::Error);
        Json(::serde_json::Error);
        Jwt(::jsonwebtoken::errors::Error);
        Reqwest(::reqwest::Error);
        UrlParse(::url::ParseError);
        Yaml(::serde_yaml::Error);
    }

    errors {
        Authorization(message: String) {
            description("unauthorized operation")
            display("Unauthorized operation: {}", message)
        }

        DagInconsistent(message: String) {
            description("mission dag and task rows disagree")
            display("Inconsistent DAG: {}", message)
        }

        InvalidStatus(token: String) {
            description("invalid status token")
            display("Invalid status token: {}", token)
        }

        NotFound(entity: String) {
            description("entity not found")
            display("Not found: {}", entity)
        }

        Peer(party: String, message: String) {
            description("peer party reported an error")
            display("Peer {} error: {}", party, message)
        }

        StaleData(entity: String) {
            description("optimistic lock version mismatch")
            display("Stale data on: {}", entity)
        }

        Validation(message: String) {
            description("validation failed")
            display("Validation error: {}", message)
        }
    }
}

impl Error {
    /// Whether this error is a version conflict raised by an
    /// optimistic-lock guarded update. Callers that can re-read and
    /// re-apply use this to decide whether to retry.
    pub fn is_stale_data(&self) -> bool {
        matches!(self.kind(), ErrorKind::StaleData(_))
    }
}

// Convenience constructors. Mediators raise these a lot and the
// `ErrorKind::...(x.to_owned()).into()` dance buries the intent.
pub mod error {
    use super::Error;
    use super::ErrorKind::*;

    pub fn authorization<S: Into<String>>(message: S) -> Error {
        Authorization(message.into()).into()
    }

    pub fn dag_inconsistent<S: Into<String>>(message: S) -> Error {
        DagInconsistent(message.into()).into()
    }

    pub fn invalid_status<S: Into<String>>(token: S) -> Error {
        InvalidStatus(token.into()).into()
    }

    pub fn not_found<S: Into<String>>(entity: S) -> Error {
        NotFound(entity.into()).into()
    }

    pub fn peer<S: Into<String>, T: Into<String>>(party: S, message: T) -> Error {
        Peer(party.into(), message.into()).into()
    }

    pub fn stale_data<S: Into<String>>(entity: S) -> Error {
        StaleData(entity.into()).into()
    }

    pub fn validation<S: Into<String>>(message: S) -> Error {
        Validation(message.into()).into()
    }
}

// Collect error strings together so that we can build a good error message to
// send up. It's worth noting that the original error is actually at the end of
// the iterator, but since it's the most relevant, we reverse the list.
//
// The chain isn't a double-ended iterator (meaning we can't use `rev`), so we
// have to collect it to a Vec first before reversing it.
pub fn error_strings(error: &Error) -> Vec<String> {
    error
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .iter()
        .cloned()
        .rev()
        .collect()
}
