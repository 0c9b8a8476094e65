use serde::Serialize;

/// Errors raised while talking to the node over JSON-RPC.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The node answered with a non-200 HTTP status. The body is not inspected.
    #[error("unexpected HTTP status {status}")]
    HttpStatus { status: u16 },

    #[error("RPC server error {code}: {message}")]
    ServerError { code: i64, message: String },

    #[error("invalid RPC response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("RPC communication failure: {0}")]
    Rpc(#[from] RpcError),

    #[error("credential error: {0}")]
    Credential(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A well-formed reply whose content is unusable, e.g. a `result` that
    /// does not decode into the expected type.
    #[error("invalid node data: {0}")]
    InvalidData(String),
}

// ==============================================================================
// Fetch Error Descriptor
// ==============================================================================

/// Coarse classification of a failed aggregation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Protocol,
    Credential,
    Config,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Rpc(RpcError::Transport(_) | RpcError::HttpStatus { .. }) => ErrorKind::Transport,
            Self::Rpc(RpcError::ServerError { .. } | RpcError::InvalidResponse(_))
            | Self::InvalidData(_) => ErrorKind::Protocol,
            Self::Credential(_) => ErrorKind::Credential,
            Self::InvalidConfig(_) => ErrorKind::Config,
        }
    }
}

/// The error half of a [`Snapshot`](crate::summary::Snapshot): which RPC
/// method aborted the cycle, and why.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("{method} failed ({kind:?}): {detail}")]
pub struct FetchError {
    pub kind: ErrorKind,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    pub detail: String,
}

impl FetchError {
    pub fn new(method: &str, err: CoreError) -> Self {
        let code = match &err {
            CoreError::Rpc(RpcError::ServerError { code, .. }) => Some(*code),
            CoreError::Rpc(RpcError::HttpStatus { status }) => Some(i64::from(*status)),
            _ => None,
        };
        let detail = match &err {
            CoreError::Rpc(RpcError::ServerError { message, .. }) => message.clone(),
            other => other.to_string(),
        };
        Self {
            kind: err.kind(),
            method: method.to_owned(),
            code,
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_keeps_code_and_message() {
        let err = FetchError::new(
            "getblockchaininfo",
            CoreError::Rpc(RpcError::ServerError {
                code: -28,
                message: "Loading block index...".to_owned(),
            }),
        );
        assert_eq!(err.kind, ErrorKind::Protocol);
        assert_eq!(err.method, "getblockchaininfo");
        assert_eq!(err.code, Some(-28));
        assert_eq!(err.detail, "Loading block index...");
    }

    #[test]
    fn http_status_is_a_transport_error() {
        let err = FetchError::new("uptime", RpcError::HttpStatus { status: 401 }.into());
        assert_eq!(err.kind, ErrorKind::Transport);
        assert_eq!(err.code, Some(401));
    }

    #[test]
    fn undecodable_result_is_a_protocol_error() {
        let err = FetchError::new(
            "getnettotals",
            CoreError::InvalidData("invalid type: string \"lots\", expected u64".to_owned()),
        );
        assert_eq!(err.kind, ErrorKind::Protocol);
        assert_eq!(err.code, None);
        let json = serde_json::to_value(&err).expect("fetch error must serialize");
        assert_eq!(json["kind"], "protocol");
    }

    #[test]
    fn credential_error_serializes_without_code() {
        let err = FetchError::new("uptime", CoreError::Credential("missing cookie".to_owned()));
        let json = serde_json::to_value(&err).expect("fetch error must serialize");
        assert_eq!(json["kind"], "credential");
        assert!(json.get("code").is_none());
    }
}
