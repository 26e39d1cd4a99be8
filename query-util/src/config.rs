use crate::constants::DEFAULT_FETCH_TIMEOUT_SECS;
use crate::error::QueryError;
use bitcoincore_rpc::Auth;
use bitcoincore_rpc::bitcoin::Network;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RpcAuth {
    None,
    UserPass(String, String),
    CookieFile(PathBuf),
}

fn default_network() -> Network {
    Network::Bitcoin
}

fn default_fetch_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "default_network")]
    pub network: Network,

    #[serde(default)]
    pub rpc_url: Option<String>,

    #[serde(default)]
    pub auth: Option<RpcAuth>,

    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    // 0 disables the per-fetch timeout and blocks until the backend answers
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            network: default_network(),
            rpc_url: None,
            auth: None,
            data_dir: None,
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

impl ChainConfig {
    pub fn network(&self) -> Network {
        self.network
    }

    pub fn data_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.data_dir {
            dir.clone()
        } else {
            let base_dir = dirs::home_dir().expect("Could not determine data directory");
            match self.network() {
                Network::Bitcoin => base_dir.join(".bitcoin"),
                Network::Testnet => base_dir.join(".bitcoin/testnet3"),
                Network::Regtest => base_dir.join(".bitcoin/regtest"),
                Network::Signet => base_dir.join(".bitcoin/signet"),
                Network::Testnet4 => base_dir.join(".bitcoin/testnet4"),
            }
        }
    }

    pub fn rpc_url(&self) -> String {
        if let Some(ref url) = self.rpc_url {
            url.clone()
        } else {
            let port = match self.network() {
                Network::Bitcoin => 8332,
                Network::Testnet => 18332,
                Network::Regtest => 18443,
                Network::Signet => 38332,
                Network::Testnet4 => 48332,
            };

            format!("http://127.0.0.1:{}", port)
        }
    }

    pub fn auth(&self) -> Auth {
        if let Some(ref auth) = self.auth {
            match auth {
                RpcAuth::None => Auth::None,
                RpcAuth::UserPass(user, pass) => Auth::UserPass(user.clone(), pass.clone()),
                RpcAuth::CookieFile(path) => Auth::CookieFile(path.clone()),
            }
        } else {
            // Default to the node's cookie file
            let cookie_path = self.data_dir().join(".cookie");
            Auth::CookieFile(cookie_path)
        }
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        if self.fetch_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.fetch_timeout_secs))
        }
    }

    pub fn load(root_dir: &Path) -> Result<Self, QueryError> {
        let path = root_dir.join("config.toml");
        if !path.exists() {
            info!(
                "Config file {} does not exist. Using default configuration.",
                path.display()
            );
            return Ok(ChainConfig::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|e| {
            let msg = format!("Failed to read config file {}: {}", path.display(), e);
            error!("{}", msg);
            QueryError::invalid("config", msg)
        })?;

        let config: ChainConfig = toml::from_str(&content).map_err(|e| {
            let msg = format!("Failed to parse config file {}: {}", path.display(), e);
            error!("{}", msg);
            QueryError::invalid("config", msg)
        })?;

        info!("Loaded config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ChainConfig::default();
        assert_eq!(config.network(), Network::Bitcoin);
        assert_eq!(config.rpc_url(), "http://127.0.0.1:8332");
        assert_eq!(
            config.fetch_timeout(),
            Some(Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS))
        );
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let content = r#"
network = "regtest"
rpc_url = "http://127.0.0.1:18443"
fetch_timeout_secs = 0
"#;
        let config: ChainConfig = toml::from_str(content).unwrap();
        assert_eq!(config.network(), Network::Regtest);
        assert_eq!(config.fetch_timeout(), None);
    }
}
