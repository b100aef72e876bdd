/// Read-only access to the watched contract over Ethereum JSON-RPC.
///
/// The contract exposes a single zero-argument view function, `lastactive()`,
/// returning a `uint256` timestamp. It is declared with `sol!` and read through
/// an alloy HTTP provider.
use crate::config::{ConfigError, Settings};
use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::client::RpcClient;
use alloy::sol;
use alloy::transports::http::{reqwest, Http};
use alloy::transports::{RpcError, TransportError};
use std::future::Future;
use std::time::Duration;

/// Upper bound on a single RPC round trip, enforced by the HTTP client.
const RPC_TIMEOUT: Duration = Duration::from_secs(30);

sol! {
    #[sol(rpc)]
    interface IDeadMansSwitch {
        function lastactive() external view returns (uint256);
    }
}

/// Parse `0x` + 40 hex digits. Mixed case is accepted without a checksum check.
pub fn parse_address(s: &str) -> Option<Address> {
    if !s.starts_with("0x") || s.len() != 42 {
        return None;
    }
    s.parse().ok()
}

/// Errors from a single `lastactive()` read. All of them are transient from
/// the watch loop's point of view.
#[derive(Debug)]
pub enum ReadError {
    /// The request failed below JSON-RPC: connect, timeout, HTTP status, or a
    /// body that is not a JSON-RPC response.
    Transport { source: TransportError },
    /// The node returned a JSON-RPC error object.
    Rpc { code: i64, message: String },
    /// The call went through but its return data could not be decoded.
    Call { source: alloy::contract::Error },
    /// The decoded value is not a usable timestamp.
    Decode { detail: String },
}

impl ReadError {
    fn from_call(err: alloy::contract::Error) -> Self {
        match err {
            alloy::contract::Error::TransportError(RpcError::ErrorResp(payload)) => {
                ReadError::Rpc {
                    code: payload.code,
                    message: payload.message.to_string(),
                }
            }
            alloy::contract::Error::TransportError(source) => ReadError::Transport { source },
            other => ReadError::Call { source: other },
        }
    }
}

impl std::fmt::Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadError::Transport { source } => write!(f, "RPC request failed: {}", source),
            ReadError::Rpc { code, message } => {
                write!(f, "RPC error {}: {}", code, message)
            }
            ReadError::Call { source } => write!(f, "lastactive() call failed: {}", source),
            ReadError::Decode { detail } => write!(f, "malformed RPC response: {}", detail),
        }
    }
}

impl std::error::Error for ReadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReadError::Transport { source } => Some(source),
            ReadError::Call { source } => Some(source),
            _ => None,
        }
    }
}

/// Source of the contract's last-active timestamp.
pub trait ChainReader {
    /// Read `lastactive()` once, in seconds since the epoch.
    fn fetch_last_active(&self) -> impl Future<Output = Result<u64, ReadError>> + Send;
}

/// `ChainReader` backed by an HTTP JSON-RPC endpoint.
pub struct RpcChainReader {
    contract: IDeadMansSwitch::IDeadMansSwitchInstance<DynProvider>,
}

impl RpcChainReader {
    /// Build the reader and run the one-time connectivity check.
    ///
    /// An endpoint that does not answer `web3_clientVersion` here is fatal.
    /// Later read failures are not.
    pub async fn connect(settings: &Settings) -> Result<Self, ConfigError> {
        let unreachable = |detail: String| ConfigError::Unreachable {
            url: settings.rpc_url.clone(),
            detail,
        };

        let url = settings
            .rpc_url
            .parse::<reqwest::Url>()
            .map_err(|e| ConfigError::InvalidValue {
                name: "RPC_URL",
                value: settings.rpc_url.clone(),
                reason: e.to_string(),
            })?;
        let http = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .map_err(|e| unreachable(e.to_string()))?;
        let client = RpcClient::new(Http::with_client(http, url), false);
        let provider = ProviderBuilder::new().connect_client(client).erased();

        let version = provider
            .get_client_version()
            .await
            .map_err(|e| unreachable(e.to_string()))?;
        tracing::info!(
            url = %settings.rpc_url,
            client_version = %version,
            "connected to RPC endpoint"
        );

        Ok(Self {
            contract: IDeadMansSwitch::new(settings.contract_address, provider),
        })
    }
}

impl ChainReader for RpcChainReader {
    async fn fetch_last_active(&self) -> Result<u64, ReadError> {
        tracing::debug!(contract = %self.contract.address(), "calling lastactive()");
        let value = self
            .contract
            .lastactive()
            .call()
            .await
            .map_err(ReadError::from_call)?;
        to_timestamp(value)
    }
}

/// Values above `u64::MAX` are rejected: no real timestamp is that large.
fn to_timestamp(value: U256) -> Result<u64, ReadError> {
    u64::try_from(value).map_err(|_| ReadError::Decode {
        detail: format!("uint256 value {value} does not fit in 64 bits"),
    })
}
