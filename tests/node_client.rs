use std::net::SocketAddr;

use anyhow::Result;
use axum::{Json, Router, http::HeaderMap, routing::post};
use serde_json::{Value, json};
use storage_host::{
    collaborators::{ConsensusFeed, PeerDirectory, PoolError, TransactionPool, Wallet},
    node_client::{Client, Error},
    test_utils::{apply_change, gen_blocks, proof_transaction},
    types::{ContractId, Currency, Hash256, PriceQuote},
};
use tokio::net::TcpListener;

async fn rpc(headers: HeaderMap, Json(request): Json<Value>) -> Json<Value> {
    let id = request["id"].clone();
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == "Basic dXNlcjpwYXNz");
    if !authorized {
        return Json(json!({"id": id, "error": {"code": -32600, "message": "unauthorized"}}));
    }
    let params = &request["params"];
    let result = match request["method"].as_str() {
        Some("wallet_sign") => params[0].clone(),
        Some("tpool_broadcast") => {
            if params[0]["body"]["parent_id"].is_string() {
                return Json(
                    json!({"id": id, "error": {"code": -26, "message": "proof too early"}}),
                );
            }
            json!(true)
        }
        Some("hostdb_random_hosts") => json!([
            {"net_address": "a:9982", "price": "10"},
            {"net_address": "b:9982", "price": "20"},
        ]),
        Some("consensus_changes") => {
            let after = params[0].as_u64();
            let changes = [
                apply_change(1, gen_blocks(1, 2)),
                apply_change(2, gen_blocks(3, 3)),
            ];
            let changes: Vec<_> = changes
                .into_iter()
                .filter(|c| after.is_none_or(|a| c.id > a))
                .collect();
            serde_json::to_value(changes).unwrap_or(Value::Null)
        }
        _ => {
            return Json(json!({"id": id, "error": {"code": -32601, "message": "no such method"}}));
        }
    };
    Json(json!({"id": id, "result": result}))
}

async fn spawn_node() -> Result<String> {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, Router::new().route("/", post(rpc))).await;
    });
    Ok(format!("http://{}/", addr))
}

#[tokio::test]
async fn test_node_methods() -> Result<()> {
    let client = Client::new(spawn_node().await?, "user".into(), "pass".into())?;
    let transaction = proof_transaction(ContractId(Hash256::digest(b"contract")));

    let signed = client.sign(transaction.clone()).await?;
    assert_eq!(signed, transaction);

    assert!(matches!(
        client.broadcast(signed).await,
        Err(PoolError::Rejected(message)) if message.contains("proof too early")
    ));

    let quotes = client.sample(15).await?;
    assert_eq!(
        quotes,
        vec![
            PriceQuote {
                net_address: "a:9982".to_string(),
                price: Currency::new(10),
            },
            PriceQuote {
                net_address: "b:9982".to_string(),
                price: Currency::new(20),
            },
        ]
    );

    let changes = ConsensusFeed::consensus_changes(&client, None).await?;
    assert_eq!(changes.len(), 2);
    let changes = ConsensusFeed::consensus_changes(&client, Some(1)).await?;
    assert_eq!(changes, vec![apply_change(2, gen_blocks(3, 3))]);
    Ok(())
}

#[tokio::test]
async fn test_rpc_error() -> Result<()> {
    let client = Client::new(spawn_node().await?, "user".into(), "wrong".into())?;
    match client.hostdb_random_hosts(3).await {
        Err(Error::Rpc { code, message }) => {
            assert_eq!(code, -32600);
            assert_eq!(message, "unauthorized");
        }
        other => panic!("unexpected response: {:?}", other),
    }
    Ok(())
}
