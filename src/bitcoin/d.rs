//! Implementation of the chain backend using the node's JSON-RPC
//! interface.

use std::{
    fmt, fs, io,
    time::{Duration, Instant},
};

use jsonrpc::{
    arg,
    client::Client,
    minreq_http::{self, MinreqHttpTransport},
};
use serde_json::Value as Json;

use crate::{
    bitcoin::{BitcoinInterface, Block, RawTransaction},
    config::{BitcoindConfig, BitcoindRpcAuth},
};

// If bitcoind takes more than 3 minutes to answer one of our queries, fail.
const RPC_SOCKET_TIMEOUT: u64 = 180;

// For how long do we keep retrying on communication error with bitcoind
// before giving up.
const RPC_RETRY_TIMEOUT: Duration = Duration::from_secs(30);

/// An error in the communication with bitcoind.
#[derive(Debug)]
pub enum BitcoindError {
    CookieFile(io::Error),
    InvalidAuth(String),
    Server(jsonrpc::Error),
    /// An answer that doesn't have the shape the RPC API documents.
    InvalidResponse(String),
}

impl fmt::Display for BitcoindError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::CookieFile(e) => write!(f, "Reading bitcoind cookie file: {}", e),
            Self::InvalidAuth(s) => write!(f, "Invalid RPC authentication: '{}'", s),
            Self::Server(e) => write!(f, "Bitcoind server error: {}", e),
            Self::InvalidResponse(s) => write!(f, "Invalid response from bitcoind: {}", s),
        }
    }
}

impl std::error::Error for BitcoindError {}

impl From<jsonrpc::Error> for BitcoindError {
    fn from(e: jsonrpc::Error) -> Self {
        Self::Server(e)
    }
}

impl From<minreq_http::Error> for BitcoindError {
    fn from(e: minreq_http::Error) -> Self {
        Self::Server(jsonrpc::Error::Transport(Box::new(e)))
    }
}

macro_rules! params {
    ($($param:expr),* $(,)?) => {
        [
            $(
                arg($param),
            )*
        ]
    };
}

pub struct BitcoinD {
    client: Client,
}

impl BitcoinD {
    pub fn new(config: &BitcoindConfig) -> Result<BitcoinD, BitcoindError> {
        let builder = MinreqHttpTransport::builder()
            .timeout(Duration::from_secs(RPC_SOCKET_TIMEOUT))
            .url(&format!("http://{}", config.addr))?;
        let builder = match &config.rpc_auth {
            BitcoindRpcAuth::CookieFile { cookie_path } => {
                let cookie = fs::read_to_string(cookie_path).map_err(BitcoindError::CookieFile)?;
                builder.cookie_auth(cookie.trim().to_string())
            }
            BitcoindRpcAuth::UserPass { auth } => {
                let (user, pass) = split_auth(auth)?;
                builder.basic_auth(user, Some(pass))
            }
        };
        let client = Client::with_transport(builder.build());

        Ok(BitcoinD { client })
    }

    /// Make sure we can actually reach the node before doing anything
    /// else.
    pub fn sanity_check(&self) -> Result<(), BitcoindError> {
        let count = self.block_count()?;
        log::info!("Connected to bitcoind. Chain tip is at height {}.", count);
        Ok(())
    }

    // Reasonably try to be robust to possible spurious communication
    // error. Transport errors get retried for a while, everything else is
    // surfaced immediately.
    fn handle_error(&self, e: jsonrpc::Error, start: Instant) -> Result<(), BitcoindError> {
        match e {
            jsonrpc::Error::Transport(ref err) => {
                log::error!("Transport error when talking to bitcoind: '{}'", err);
                if Instant::now().duration_since(start) > RPC_RETRY_TIMEOUT {
                    return Err(BitcoindError::Server(e));
                }
                std::thread::sleep(Duration::from_secs(1));
                log::debug!("Retrying RPC request to bitcoind.");
                Ok(())
            }
            e => Err(BitcoindError::Server(e)),
        }
    }

    fn make_request(
        &self,
        method: &str,
        params: &[Box<serde_json::value::RawValue>],
    ) -> Result<Json, BitcoindError> {
        let raw_params = serde_json::value::to_raw_value(params).ok();
        let req = self.client.build_request(method, raw_params.as_deref());
        log::trace!("Sending to bitcoind: {:#?}", req);

        let start = Instant::now();
        loop {
            match self.client.send_request(req.clone()) {
                Ok(resp) => {
                    let res = resp.result().map_err(BitcoindError::Server)?;
                    log::trace!("Got from bitcoind: {:#?}", res);
                    return Ok(res);
                }
                Err(e) => {
                    self.handle_error(e, start)?;
                }
            }
        }
    }

    pub fn block_count(&self) -> Result<u64, BitcoindError> {
        self.make_request("getblockcount", &[])?
            .as_u64()
            .ok_or_else(|| {
                BitcoindError::InvalidResponse(
                    "'getblockcount' didn't return an integer".to_string(),
                )
            })
    }

    pub fn block_hash(&self, height: u64) -> Result<String, BitcoindError> {
        self.make_request("getblockhash", &params!(height))?
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                BitcoindError::InvalidResponse("'getblockhash' didn't return a string".to_string())
            })
    }

    pub fn block(&self, hash: &str) -> Result<Block, BitcoindError> {
        let res = self.make_request("getblock", &params!(hash))?;
        serde_json::from_value(res).map_err(|e| {
            BitcoindError::InvalidResponse(format!("Deserializing 'getblock' answer: {}", e))
        })
    }

    pub fn raw_transaction(&self, txid: &str) -> Result<RawTransaction, BitcoindError> {
        let res = self.make_request("getrawtransaction", &params!(txid, 1))?;
        serde_json::from_value(res).map_err(|e| {
            BitcoindError::InvalidResponse(format!(
                "Deserializing 'getrawtransaction' answer: {}",
                e
            ))
        })
    }

    pub fn is_valid_address(&self, address: &str) -> Result<bool, BitcoindError> {
        self.make_request("validateaddress", &params!(address))?
            .get("isvalid")
            .and_then(Json::as_bool)
            .ok_or_else(|| {
                BitcoindError::InvalidResponse(
                    "No valid 'isvalid' in 'validateaddress' answer".to_string(),
                )
            })
    }
}

fn split_auth(auth: &str) -> Result<(String, String), BitcoindError> {
    let mut parts = auth.splitn(2, ':');
    match (parts.next(), parts.next()) {
        (Some(user), Some(pass)) if !user.is_empty() => Ok((user.to_string(), pass.to_string())),
        _ => Err(BitcoindError::InvalidAuth(auth.to_string())),
    }
}

impl BitcoinInterface for BitcoinD {
    fn block_count(&self) -> Result<u64, BitcoindError> {
        self.block_count()
    }

    fn block_hash(&self, height: u64) -> Result<String, BitcoindError> {
        self.block_hash(height)
    }

    fn block(&self, hash: &str) -> Result<Block, BitcoindError> {
        self.block(hash)
    }

    fn raw_transaction(&self, txid: &str) -> Result<RawTransaction, BitcoindError> {
        self.raw_transaction(txid)
    }

    fn is_valid_address(&self, address: &str) -> Result<bool, BitcoindError> {
        self.is_valid_address(address)
    }
}
