use ethers::types::Address;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// A chain read (eth_call / eth_getCode / fee lookup) failed at the node.
///
/// Never retried here; retries belong to the transport.
#[derive(Debug, Clone, Error)]
#[error("{call} failed: {message}")]
pub struct ChainReadError {
    pub call: &'static str,
    pub message: String,
}

impl ChainReadError {
    pub fn new(call: &'static str, err: impl fmt::Display) -> Self {
        Self {
            call,
            message: err.to_string(),
        }
    }
}

/// JSON-RPC transport failure. `Rpc` keeps the server's raw error object.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    #[error("POST {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: Value },

    #[error("RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        raw: Value,
    },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RpcError {
    /// The raw error payload, when the server sent one.
    pub fn payload(&self) -> Value {
        match self {
            RpcError::Rpc { raw, .. } => raw.clone(),
            RpcError::Http { body, .. } => body.clone(),
            RpcError::Transport { message, .. } | RpcError::InvalidResponse(message) => {
                Value::String(message.clone())
            }
        }
    }
}

/// Both sponsorship and bundler estimation failed. Recovered with fallback
/// constants; only ever logged.
#[derive(Debug, Error)]
#[error("gas estimation failed (sponsor: {sponsor}; bundler: {bundler})")]
pub struct EstimationFailure {
    pub sponsor: String,
    pub bundler: String,
}

/// Failures while turning an assertion (or a hash) into challenge/signature bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChallengeEncodingError {
    #[error("clientDataJSON has no \"challenge\":\" key")]
    ChallengeNotFound,

    #[error("clientDataJSON has no \"type\":\"webauthn.get\" entry")]
    ResponseTypeNotFound,

    #[error("field {field} is not valid base64url")]
    InvalidBase64 { field: &'static str },

    #[error("clientDataJSON is not valid UTF-8")]
    InvalidUtf8,

    #[error("signature is not a DER-encoded P-256 ECDSA signature: {0}")]
    InvalidDer(String),

    #[error("validUntil {0} does not fit in 48 bits")]
    ValidUntilOutOfRange(u64),

    #[error("challenge must be 39 bytes, got {0}")]
    InvalidChallengeLength(usize),
}

#[derive(Debug, Clone, Error)]
pub enum PasskeyError {
    /// The user declined or dismissed the biometric prompt.
    #[error("passkey assertion cancelled by user")]
    Cancelled,

    #[error("passkey backend failed: {0}")]
    Backend(String),

    #[error("credential {0} is not available on this authenticator")]
    UnknownCredential(String),
}

/// The bundler refused the operation. `payload` is the raw error object so
/// callers can tell "already included" apart from "invalid".
#[derive(Debug, Clone, Error)]
#[error("bundler rejected user operation: {message}")]
pub struct SubmissionError {
    pub code: Option<i64>,
    pub message: String,
    pub payload: Value,
}

impl From<RpcError> for SubmissionError {
    fn from(err: RpcError) -> Self {
        let code = match &err {
            RpcError::Rpc { code, .. } => Some(*code),
            _ => None,
        };
        let message = match &err {
            RpcError::Rpc { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Self {
            code,
            message,
            payload: err.payload(),
        }
    }
}

#[derive(Debug, Error)]
pub enum WalletError {
    #[error(transparent)]
    ChainRead(#[from] ChainReadError),

    #[error(transparent)]
    Passkey(#[from] PasskeyError),

    #[error(transparent)]
    ChallengeEncoding(#[from] ChallengeEncodingError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error("wallet {0:?} is not deployed and no passkey public key was supplied")]
    MissingPublicKey(Address),

    #[error("wallet {0:?} is already deployed")]
    AlreadyDeployed(Address),

    #[error("no bonus token configured")]
    NoBonusToken,
}

impl WalletError {
    /// True when the user cancelled the passkey prompt.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WalletError::Passkey(PasskeyError::Cancelled))
    }
}

/// Where in the build → sign → submit sequence a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ResolveAddress,
    CheckDeployment,
    SetCallData,
    EstimateGas,
    SetFees,
    HashUserOp,
    Sign,
    FormatSignature,
    Submit,
    Confirm,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::ResolveAddress => "resolve_address",
            Stage::CheckDeployment => "check_deployment",
            Stage::SetCallData => "set_call_data",
            Stage::EstimateGas => "estimate_gas",
            Stage::SetFees => "set_fees",
            Stage::HashUserOp => "hash_user_op",
            Stage::Sign => "sign",
            Stage::FormatSignature => "format_signature",
            Stage::Submit => "submit",
            Stage::Confirm => "confirm",
        };
        f.write_str(s)
    }
}

/// A failed use-case. Retrying means running the use-case again from the start.
#[derive(Debug, Error)]
#[error("{stage} failed: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: WalletError,
}

impl PipelineError {
    pub fn new(stage: Stage, source: impl Into<WalletError>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}

/// Tags a stage onto any error convertible into [`WalletError`].
pub trait StageExt<T> {
    fn at(self, stage: Stage) -> Result<T, PipelineError>;
}

impl<T, E: Into<WalletError>> StageExt<T> for Result<T, E> {
    fn at(self, stage: Stage) -> Result<T, PipelineError> {
        self.map_err(|e| PipelineError::new(stage, e))
    }
}
