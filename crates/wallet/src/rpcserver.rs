//! Line-framed JSON-RPC 1.0 server for the wallet CLI.

use std::sync::Arc;

use btcw_log::{log_error, log_info};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::builder;
use crate::error::WalletError;
use crate::wallet::{self, Wallet};

pub const DEFAULT_RPC_ADDR: &str = "127.0.0.1:18557";

/// Accept CLI connections until shutdown, one task per connection.
pub async fn serve(
    wallet: Arc<Wallet>,
    addr: &str,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    log_info!("rpc server listening on {addr}");

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        tokio::spawn(handle_connection(wallet.clone(), stream));
                    }
                    Err(err) => {
                        log_error!("rpc accept failed: {err}");
                    }
                }
            }
        }
    }
    Ok(())
}

async fn handle_connection(wallet: Arc<Wallet>, stream: TcpStream) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let response = dispatch(&wallet, &line).await;
        let mut out = response.to_string();
        out.push('\n');
        if write_half.write_all(out.as_bytes()).await.is_err() {
            break;
        }
    }
}

async fn dispatch(wallet: &Arc<Wallet>, line: &str) -> Value {
    let Ok(request) = serde_json::from_str::<Value>(line) else {
        return error_response(Value::Null, "invalid request");
    };
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let Some(method) = request.get("method").and_then(Value::as_str) else {
        return error_response(id, "missing method");
    };
    let params = object_params(&request);

    let result = match method {
        "WalletRPC.GetBalance" => Ok(json!(wallet.balance().await)),
        "WalletRPC.GetNewAddress" => wallet.get_new_address().await.map(|address| json!(address)),
        "WalletRPC.SendToAddress" => send_to_address(wallet, params).await,
        "WalletRPC.WalletPassphrase" => wallet_passphrase(wallet, params).await,
        "WalletRPC.WalletLock" => {
            wallet.lock().await;
            Ok(json!(""))
        }
        _ => {
            return error_response(id, &format!("unknown method {method}"));
        }
    };

    match result {
        Ok(value) => json!({ "id": id, "result": value, "error": Value::Null }),
        Err(err) => {
            log_error!("rpc {method} failed: {err}");
            error_response(id, &err.to_string())
        }
    }
}

async fn send_to_address(wallet: &Arc<Wallet>, params: Option<Value>) -> Result<Value, WalletError> {
    let params = params.ok_or(WalletError::InvalidData("missing parameters"))?;
    let address = params
        .get("Address")
        .and_then(Value::as_str)
        .ok_or(WalletError::InvalidData("missing Address parameter"))?;
    let amount = params
        .get("Amount")
        .and_then(Value::as_f64)
        .ok_or(WalletError::InvalidData("missing Amount parameter"))?;
    let txid = builder::send_to_address(wallet, address, amount).await?;
    Ok(json!(txid))
}

async fn wallet_passphrase(
    wallet: &Arc<Wallet>,
    params: Option<Value>,
) -> Result<Value, WalletError> {
    let params = params.ok_or(WalletError::InvalidData("missing parameters"))?;
    let passphrase = params
        .get("Passphrase")
        .and_then(Value::as_str)
        .ok_or(WalletError::InvalidData("missing Passphrase parameter"))?;
    let duration = params
        .get("Duration")
        .and_then(Value::as_u64)
        .ok_or(WalletError::InvalidData("missing Duration parameter"))?;
    let generation = wallet.unlock(passphrase, duration).await?;
    wallet::spawn_relock(wallet.clone(), duration, generation);
    Ok(json!(""))
}

/// Object parameters, accepting both the bare `{...}` form and the
/// `[{...}]` array wrapping used by Go's net/rpc jsonrpc client.
fn object_params(request: &Value) -> Option<Value> {
    match request.get("params") {
        Some(Value::Array(entries)) => entries.first().cloned(),
        Some(Value::Object(map)) => Some(Value::Object(map.clone())),
        _ => None,
    }
}

fn error_response(id: Value, message: &str) -> Value {
    json!({ "id": id, "result": Value::Null, "error": message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::testutil::{stub_wallet, PASSPHRASE};

    #[tokio::test]
    async fn get_balance_over_dispatch() {
        let (wallet, _node) = stub_wallet(2);
        let response = dispatch(
            &wallet,
            r#"{"method":"WalletRPC.GetBalance","params":[],"id":1}"#,
        )
        .await;
        assert_eq!(response["result"], json!(0));
        assert_eq!(response["error"], Value::Null);
        assert_eq!(response["id"], json!(1));
    }

    #[tokio::test]
    async fn locked_errors_are_surfaced() {
        let (wallet, _node) = stub_wallet(2);
        let response = dispatch(
            &wallet,
            r#"{"method":"WalletRPC.GetNewAddress","params":[],"id":2}"#,
        )
        .await;
        assert_eq!(response["result"], Value::Null);
        assert_eq!(response["error"], json!("wallet is locked"));
    }

    #[tokio::test]
    async fn passphrase_unlocks_and_locks() {
        let (wallet, _node) = stub_wallet(2);
        let request = format!(
            r#"{{"method":"WalletRPC.WalletPassphrase","params":[{{"Passphrase":"{PASSPHRASE}","Duration":60}}],"id":3}}"#
        );
        let response = dispatch(&wallet, &request).await;
        assert_eq!(response["error"], Value::Null);

        let response = dispatch(
            &wallet,
            r#"{"method":"WalletRPC.GetNewAddress","params":[],"id":4}"#,
        )
        .await;
        assert_eq!(response["error"], Value::Null);
        assert!(response["result"].as_str().is_some());

        let response = dispatch(
            &wallet,
            r#"{"method":"WalletRPC.WalletLock","params":[],"id":5}"#,
        )
        .await;
        assert_eq!(response["error"], Value::Null);
        let response = dispatch(
            &wallet,
            r#"{"method":"WalletRPC.GetNewAddress","params":[],"id":6}"#,
        )
        .await;
        assert_eq!(response["error"], json!("wallet is locked"));
    }

    #[tokio::test]
    async fn bare_object_params_are_accepted() {
        let (wallet, _node) = stub_wallet(2);
        let request = format!(
            r#"{{"method":"WalletRPC.WalletPassphrase","params":{{"Passphrase":"{PASSPHRASE}","Duration":60}},"id":7}}"#
        );
        let response = dispatch(&wallet, &request).await;
        assert_eq!(response["error"], Value::Null);
    }

    #[tokio::test]
    async fn unknown_method_and_bad_json() {
        let (wallet, _node) = stub_wallet(2);
        let response = dispatch(&wallet, r#"{"method":"WalletRPC.Nope","id":8}"#).await;
        assert!(response["error"].as_str().unwrap().contains("unknown method"));

        let response = dispatch(&wallet, "not json").await;
        assert_eq!(response["error"], json!("invalid request"));
    }
}
