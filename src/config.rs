use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::{host::STORAGE_PROOF_REORG_DEPTH, logging, types::BlockHeight};

#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[clap(
    version,
    about = "Storage host",
    long_about = r#"Accepts file contracts, stores their data and submits storage proofs until each contract's window closes"#
)]
pub struct Config {
    #[clap(
        long,
        env = "LOG_FORMAT",
        help = "Log format (plain, json)",
        default_value = "plain"
    )]
    pub log_format: logging::Format,

    #[clap(
        long,
        env = "DATA_DIR",
        help = "Directory for host state and stored files"
    )]
    pub data_dir: PathBuf,

    #[clap(
        long,
        env = "NODE_RPC_URL",
        help = "URL of the node RPC server (e.g., http://localhost:9980)",
        default_value = "http://127.0.0.1:9980"
    )]
    pub node_rpc_url: String,

    #[clap(
        long,
        env = "NODE_RPC_USER",
        help = "User for node RPC authentication",
        default_value = ""
    )]
    pub node_rpc_user: String,

    #[clap(
        long,
        env = "NODE_RPC_PASSWORD",
        help = "Password for node RPC authentication",
        default_value = ""
    )]
    pub node_rpc_password: String,

    #[clap(
        long,
        env = "HOST_ADDRESS",
        help = "Address advertised to renters (e.g., host.example.com:9982)",
        default_value = ""
    )]
    pub host_address: String,

    #[clap(
        long,
        env = "API_PORT",
        help = "Port number for the API server (e.g., 9980)",
        default_value = "9981"
    )]
    pub api_port: u16,

    #[clap(
        long,
        env = "POLL_INTERVAL_SECS",
        help = "Seconds between consensus change polls",
        default_value = "5"
    )]
    pub poll_interval_secs: u64,

    #[clap(
        long,
        env = "STORAGE_PROOF_REORG_DEPTH",
        help = "Blocks to wait after a proof window opens before submitting a proof",
        default_value_t = STORAGE_PROOF_REORG_DEPTH
    )]
    pub storage_proof_reorg_depth: BlockHeight,
}

impl Config {
    pub fn persist_dir(&self) -> PathBuf {
        self.data_dir.join("host")
    }

    pub fn files_dir(&self) -> PathBuf {
        self.data_dir.join("files")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["storage-host", "--data-dir", "/tmp/host"]).unwrap();
        assert_eq!(config.log_format, logging::Format::Plain);
        assert_eq!(config.api_port, 9981);
        assert_eq!(config.storage_proof_reorg_depth, 10);
        assert_eq!(config.persist_dir(), PathBuf::from("/tmp/host/host"));
        assert_eq!(config.files_dir(), PathBuf::from("/tmp/host/files"));
    }
}
