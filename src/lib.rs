pub mod api;
pub mod collaborators;
pub mod config;
pub mod consensus_follower;
pub mod crypto;
pub mod host;
pub mod logging;
pub mod node_client;
pub mod reactor;
pub mod retry;
pub mod stopper;
pub mod storage;
pub mod test_utils;
pub mod types;
