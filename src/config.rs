use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::blockchain::DEFAULT_DIFFICULTY;
use crate::error::NodeError;

/// Node settings read from the environment (after `.env` is loaded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub host: String,
    pub port: u16,
    /// Base URL peers use to reach us; sent as the envelope origin.
    pub public_url: String,
    pub peers: Vec<String>,
    pub difficulty: u32,
    pub ledger_path: PathBuf,
    pub secret_key: Option<String>,
    pub mining: bool,
    /// `(address, value)` pairs paid out by the genesis block.
    pub genesis: Vec<(String, u64)>,
}

impl NodeConfig {
    pub fn from_env() -> Result<Self, NodeError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, NodeError> {
        let var = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let host = var("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = parse_or(var("PORT"), "PORT", 8080u16)?;
        let public_url = var("PUBLIC_URL")
            .unwrap_or_else(|| format!("http://{host}:{port}"))
            .trim_end_matches('/')
            .to_string();
        let peers = var("PEERS")
            .map(|raw| {
                raw.split(',')
                    .map(|p| p.trim().trim_end_matches('/').to_string())
                    .filter(|p| !p.is_empty() && *p != public_url)
                    .collect()
            })
            .unwrap_or_default();
        let difficulty = parse_or(var("POW_DIFFICULTY"), "POW_DIFFICULTY", DEFAULT_DIFFICULTY)?;
        if difficulty > 256 {
            return Err(NodeError::Config {
                key: "POW_DIFFICULTY",
                reason: format!("{difficulty} exceeds the 256 bits of a SHA-256 digest"),
            });
        }
        let ledger_path = PathBuf::from(var("LEDGER_PATH").unwrap_or_else(|| "ledger.json".into()));
        let mining = parse_or(var("MINING"), "MINING", true)?;
        let genesis = var("GENESIS_ALLOCATIONS")
            .map(|raw| parse_allocations(&raw))
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            host,
            port,
            public_url,
            peers,
            difficulty,
            ledger_path,
            secret_key: var("NODE_SECRET_KEY"),
            mining,
            genesis,
        })
    }
}

fn parse_or<T>(raw: Option<String>, key: &'static str, default: T) -> Result<T, NodeError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(v) => v.parse().map_err(|e: T::Err| NodeError::Config {
            key,
            reason: format!("{v:?}: {e}"),
        }),
    }
}

/// `addr:value,addr:value`
fn parse_allocations(raw: &str) -> Result<Vec<(String, u64)>, NodeError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| -> Result<(String, u64), NodeError> {
            let bad = |reason: &str| NodeError::Config {
                key: "GENESIS_ALLOCATIONS",
                reason: format!("{entry:?}: {reason}"),
            };
            let (address, value) = entry.split_once(':').ok_or_else(|| bad("expected address:value"))?;
            let value: u64 = value.trim().parse().map_err(|_| bad("value is not an integer"))?;
            if value == 0 {
                return Err(bad("value must be positive"));
            }
            Ok((address.trim().to_string(), value))
        })
        .collect()
}
