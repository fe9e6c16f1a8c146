use base64::prelude::*;
use reqwest::{Client as HttpClient, ClientBuilder, header::HeaderMap};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    collaborators::{
        ConsensusFeed, PeerDirectory, PoolError, TransactionPool, Wallet, WalletError,
    },
    config::Config,
    types::{ConsensusChange, PriceQuote, Transaction},
};

use super::{
    error::{Error, RpcErrorResponse},
    types::{Request, Response},
};

#[derive(Clone, Debug)]
pub struct Client {
    client: HttpClient,
    url: String,
}

const JSONRPC: &str = "2.0";

impl Client {
    pub fn new(url: String, user: String, password: String) -> Result<Self, Error> {
        let client = ClientBuilder::new()
            .default_headers({
                let mut headers = HeaderMap::new();
                if !user.is_empty() || !password.is_empty() {
                    let auth_str = BASE64_STANDARD.encode(format!("{}:{}", user, password));
                    headers.insert("Authorization", format!("Basic {}", auth_str).parse()?);
                }
                headers.insert("Content-Type", "application/json".parse()?);
                headers.insert("Accept", "application/json".parse()?);
                headers
            })
            .build()?;

        Ok(Client { client, url })
    }

    pub fn new_from_config(config: &Config) -> Result<Self, Error> {
        Client::new(
            config.node_rpc_url.to_owned(),
            config.node_rpc_user.to_owned(),
            config.node_rpc_password.to_owned(),
        )
    }

    fn handle_response<T>(response: Response) -> Result<T, Error>
    where
        T: for<'de> Deserialize<'de>,
    {
        match (response.result, response.error) {
            // Methods without a return value answer with a null result.
            (result, None) => Ok(serde_json::from_value(result.unwrap_or(Value::Null))?),
            (None, Some(error)) => {
                let detail: RpcErrorResponse = serde_json::from_value(error)?;
                Err(Error::Rpc {
                    code: detail.code,
                    message: detail.message,
                })
            }
            (Some(_), Some(_)) => Err(Error::Unexpected(
                "Both result and error present in RPC response".to_string(),
            )),
        }
    }

    pub async fn call<T>(&self, method: &str, params: Vec<Value>) -> Result<T, Error>
    where
        T: for<'de> Deserialize<'de>,
    {
        let request = Request {
            jsonrpc: JSONRPC.to_owned(),
            id: "0".to_string(),
            method: method.to_string(),
            params,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .json::<Response>()
            .await?;

        Self::handle_response(response)
    }

    pub async fn wallet_sign(&self, transaction: &Transaction) -> Result<Transaction, Error> {
        self.call("wallet_sign", vec![serde_json::to_value(transaction)?])
            .await
    }

    pub async fn tpool_broadcast(&self, transaction: &Transaction) -> Result<(), Error> {
        let _: Value = self
            .call("tpool_broadcast", vec![serde_json::to_value(transaction)?])
            .await?;
        Ok(())
    }

    pub async fn hostdb_random_hosts(&self, n: usize) -> Result<Vec<PriceQuote>, Error> {
        self.call("hostdb_random_hosts", vec![n.into()]).await
    }

    pub async fn consensus_changes(&self, after: Option<u64>) -> Result<Vec<ConsensusChange>, Error> {
        self.call("consensus_changes", vec![serde_json::to_value(after)?])
            .await
    }
}

impl Wallet for Client {
    async fn sign(&self, transaction: Transaction) -> Result<Transaction, WalletError> {
        self.wallet_sign(&transaction)
            .await
            .map_err(|e| WalletError::SigningFailed(e.to_string()))
    }
}

impl TransactionPool for Client {
    async fn broadcast(&self, transaction: Transaction) -> Result<(), PoolError> {
        self.tpool_broadcast(&transaction)
            .await
            .map_err(|e| PoolError::Rejected(e.to_string()))
    }
}

impl PeerDirectory for Client {
    async fn sample(&self, n: usize) -> anyhow::Result<Vec<PriceQuote>> {
        Ok(self.hostdb_random_hosts(n).await?)
    }
}

impl ConsensusFeed for Client {
    async fn consensus_changes(&self, after: Option<u64>) -> anyhow::Result<Vec<ConsensusChange>> {
        Ok(self.consensus_changes(after).await?)
    }
}
