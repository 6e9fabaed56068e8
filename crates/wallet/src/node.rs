//! Capability boundary to the trusted full-node backend.
//!
//! Two flavors sit behind [`NodeClient`]: a btcd-style node reached over a
//! persistent line-framed JSON-RPC connection that also pushes
//! `filteredblockconnected` notifications, and a bitcoind-style node
//! spoken to with stateless HTTP POST. The scanner only sees the shared
//! surface plus an optional stream of [`BlockEvent`]s.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use btcw_consensus::{amount_from_btc, chain_params, Amount, Network};
use btcw_log::{log_error, log_warn};
use btcw_primitives::hash::{sha256d, txid_to_hex};
use btcw_primitives::Transaction;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

/// Fee rate in satoshi per kB reported when the node cannot estimate.
pub const DEFAULT_FEE_PER_KB: Amount = 2;

#[derive(Debug)]
pub enum NodeError {
    /// The node could not be reached or the connection dropped.
    Unavailable(String),
    /// The node answered with an RPC error.
    Rpc(String),
    /// The node answered with a payload the wallet cannot interpret.
    BadResponse(&'static str),
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeError::Unavailable(message) => write!(f, "node unavailable: {message}"),
            NodeError::Rpc(message) => write!(f, "{message}"),
            NodeError::BadResponse(message) => write!(f, "bad node response: {message}"),
        }
    }
}

impl std::error::Error for NodeError {}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeBackend {
    Btcd,
    Core,
}

impl NodeBackend {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "btcd" => Some(Self::Btcd),
            "core" => Some(Self::Core),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub backend: NodeBackend,
    pub network: Network,
    pub rpc_user: String,
    pub rpc_pass: String,
    /// Override for the node address; defaults to localhost on the
    /// network's well-known port.
    pub host: Option<String>,
}

/// One output of a transaction delivered by the node.
#[derive(Clone, Debug)]
pub struct BlockTxOut {
    pub index: u32,
    pub value: Amount,
    pub script_pubkey: Vec<u8>,
}

/// A transaction delivered by the node, reduced to what the scanner reads.
#[derive(Clone, Debug)]
pub struct BlockTx {
    pub txid: String,
    pub outputs: Vec<BlockTxOut>,
}

#[derive(Clone, Debug)]
pub struct NodeBlock {
    pub hash: String,
    pub txs: Vec<BlockTx>,
}

/// Live feed from the push-notification backend.
#[derive(Clone, Debug)]
pub enum BlockEvent {
    /// A block attached to the chain; `txs` already passed the node-side
    /// address filter.
    FilteredBlock {
        height: i64,
        hash: String,
        txs: Vec<BlockTx>,
    },
}

pub enum NodeClient {
    Btcd(BtcdClient),
    Core(CoreClient),
    #[cfg(test)]
    Stub(StubNode),
}

impl NodeClient {
    /// Connect to the configured backend. The push-notification flavor
    /// also returns the live block-event stream.
    pub async fn connect(
        config: &NodeConfig,
    ) -> Result<(Self, Option<mpsc::Receiver<BlockEvent>>), NodeError> {
        let params = chain_params(config.network);
        match config.backend {
            NodeBackend::Btcd => {
                let host = config
                    .host
                    .clone()
                    .unwrap_or_else(|| format!("127.0.0.1:{}", params.btcd_rpc_port));
                let (client, events) =
                    BtcdClient::connect(&host, &config.rpc_user, &config.rpc_pass).await?;
                Ok((NodeClient::Btcd(client), Some(events)))
            }
            NodeBackend::Core => {
                let url = config
                    .host
                    .clone()
                    .unwrap_or_else(|| format!("http://127.0.0.1:{}", params.core_rpc_port));
                let client = CoreClient::new(url, &config.rpc_user, &config.rpc_pass);
                Ok((NodeClient::Core(client), None))
            }
        }
    }

    pub async fn get_block_count(&self) -> Result<i64, NodeError> {
        let result = self.call("getblockcount", Vec::new()).await?;
        result
            .as_i64()
            .ok_or(NodeError::BadResponse("getblockcount is not an integer"))
    }

    pub async fn get_block_hash(&self, height: i64) -> Result<String, NodeError> {
        let result = self.call("getblockhash", vec![json!(height)]).await?;
        result
            .as_str()
            .map(str::to_owned)
            .ok_or(NodeError::BadResponse("getblockhash is not a string"))
    }

    /// Fetch a block with full transaction detail.
    pub async fn get_block_with_tx(&self, hash: &str) -> Result<NodeBlock, NodeError> {
        match self {
            // btcd: getblock <hash> verbose verbosetx, transactions under "rawtx".
            NodeClient::Btcd(client) => {
                let result = client
                    .call("getblock", vec![json!(hash), json!(true), json!(true)])
                    .await?;
                parse_verbose_block(&result, "rawtx")
            }
            // bitcoind: getblock <hash> 2, transactions under "tx".
            NodeClient::Core(client) => {
                let result = client.call("getblock", vec![json!(hash), json!(2)]).await?;
                parse_verbose_block(&result, "tx")
            }
            #[cfg(test)]
            NodeClient::Stub(stub) => stub.block(hash),
        }
    }

    pub async fn send_raw_tx(
        &self,
        tx: &Transaction,
        allow_high_fees: bool,
    ) -> Result<String, NodeError> {
        #[cfg(test)]
        if let NodeClient::Stub(stub) = self {
            return stub.send(tx);
        }
        let raw = bytes_to_hex(&tx.serialize());
        let params = match self {
            NodeClient::Btcd(_) => vec![json!(raw), json!(allow_high_fees)],
            _ => vec![json!(raw)],
        };
        let result = self.call("sendrawtransaction", params).await?;
        match result.as_str() {
            Some(txid) => Ok(txid.to_owned()),
            None => Ok(tx.txid_hex()),
        }
    }

    /// Fee rate in satoshi per kB for confirmation within `target_blocks`,
    /// falling back to [`DEFAULT_FEE_PER_KB`] when the node cannot
    /// estimate.
    pub async fn estimate_fee(&self, target_blocks: i64) -> Amount {
        let btc_per_kb = match self {
            NodeClient::Btcd(client) => client
                .call("estimatefee", vec![json!(target_blocks)])
                .await
                .ok()
                .and_then(|value| value.as_f64()),
            NodeClient::Core(client) => client
                .call(
                    "estimatesmartfee",
                    vec![json!(target_blocks), json!("CONSERVATIVE")],
                )
                .await
                .ok()
                .and_then(|value| value.get("feerate").and_then(Value::as_f64)),
            #[cfg(test)]
            NodeClient::Stub(stub) => return stub.fee_per_kb,
        };
        match btc_per_kb {
            Some(rate) if rate > 0.0 => amount_from_btc(rate).unwrap_or(DEFAULT_FEE_PER_KB),
            _ => DEFAULT_FEE_PER_KB,
        }
    }

    /// Register the wallet's external addresses with the node-side
    /// transaction filter. No-op on backends without a filter.
    pub async fn load_address_filter(&self, addresses: &[String]) -> Result<(), NodeError> {
        match self {
            NodeClient::Btcd(client) => {
                client
                    .call(
                        "loadtxfilter",
                        vec![json!(true), json!(addresses), Value::Array(Vec::new())],
                    )
                    .await?;
                Ok(())
            }
            NodeClient::Core(_) => Ok(()),
            #[cfg(test)]
            NodeClient::Stub(stub) => {
                stub.filters
                    .lock()
                    .expect("stub lock")
                    .push(addresses.to_vec());
                Ok(())
            }
        }
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, NodeError> {
        match self {
            NodeClient::Btcd(client) => client.call(method, params).await,
            NodeClient::Core(client) => client.call(method, params).await,
            #[cfg(test)]
            NodeClient::Stub(stub) => stub.call(method, params),
        }
    }
}

struct PendingRequest {
    method: String,
    params: Vec<Value>,
    reply: oneshot::Sender<Result<Value, NodeError>>,
}

/// Push-notification backend over a persistent authenticated connection.
pub struct BtcdClient {
    req_tx: mpsc::Sender<PendingRequest>,
}

impl BtcdClient {
    pub async fn connect(
        host: &str,
        user: &str,
        pass: &str,
    ) -> Result<(Self, mpsc::Receiver<BlockEvent>), NodeError> {
        let stream = TcpStream::connect(host)
            .await
            .map_err(|err| NodeError::Unavailable(err.to_string()))?;
        let (read_half, write_half) = stream.into_split();

        let (req_tx, req_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(32);
        tokio::spawn(connection_loop(read_half, write_half, req_rx, event_tx));

        let client = Self { req_tx };
        client
            .call("authenticate", vec![json!(user), json!(pass)])
            .await?;
        client.call("notifyblocks", Vec::new()).await?;
        Ok((client, event_rx))
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, NodeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = PendingRequest {
            method: method.to_owned(),
            params,
            reply: reply_tx,
        };
        self.req_tx
            .send(request)
            .await
            .map_err(|_| NodeError::Unavailable("node connection closed".into()))?;
        reply_rx
            .await
            .map_err(|_| NodeError::Unavailable("node connection closed".into()))?
    }
}

async fn connection_loop(
    read_half: OwnedReadHalf,
    mut write_half: OwnedWriteHalf,
    mut req_rx: mpsc::Receiver<PendingRequest>,
    event_tx: mpsc::Sender<BlockEvent>,
) {
    let mut lines = BufReader::new(read_half).lines();
    let mut pending: HashMap<u64, oneshot::Sender<Result<Value, NodeError>>> = HashMap::new();
    let mut next_id: u64 = 0;

    loop {
        tokio::select! {
            request = req_rx.recv() => {
                let Some(request) = request else { break };
                next_id += 1;
                let body = json!({
                    "jsonrpc": "1.0",
                    "id": next_id,
                    "method": request.method,
                    "params": request.params,
                });
                let mut line = body.to_string();
                line.push('\n');
                if let Err(err) = write_half.write_all(line.as_bytes()).await {
                    let _ = request.reply.send(Err(NodeError::Unavailable(err.to_string())));
                    break;
                }
                pending.insert(next_id, request.reply);
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let Ok(message) = serde_json::from_str::<Value>(&line) else {
                            log_warn!("discarding unparseable message from node");
                            continue;
                        };
                        if let Some(id) = message.get("id").and_then(Value::as_u64) {
                            if let Some(reply) = pending.remove(&id) {
                                let _ = reply.send(response_result(message));
                            }
                            continue;
                        }
                        if message.get("method").and_then(Value::as_str)
                            == Some("filteredblockconnected")
                        {
                            let params = message.get("params").unwrap_or(&Value::Null);
                            match parse_filtered_block(params) {
                                Ok(event) => {
                                    if event_tx.send(event).await.is_err() {
                                        break;
                                    }
                                }
                                Err(err) => {
                                    log_error!("bad block notification from node: {err}");
                                }
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        log_error!("node connection read failed: {err}");
                        break;
                    }
                }
            }
        }
    }

    for (_, reply) in pending {
        let _ = reply.send(Err(NodeError::Unavailable("node connection closed".into())));
    }
}

/// Polling backend over stateless HTTP POST.
pub struct CoreClient {
    http: reqwest::Client,
    url: String,
    user: String,
    pass: String,
    next_id: AtomicU64,
}

impl CoreClient {
    pub fn new(url: String, user: &str, pass: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
            user: user.to_owned(),
            pass: pass.to_owned(),
            next_id: AtomicU64::new(1),
        }
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, NodeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "1.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let response = self
            .http
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.pass))
            .json(&body)
            .send()
            .await
            .map_err(|err| NodeError::Unavailable(err.to_string()))?;
        let message: Value = response
            .json()
            .await
            .map_err(|err| NodeError::Unavailable(err.to_string()))?;
        response_result(message)
    }
}

fn response_result(mut message: Value) -> Result<Value, NodeError> {
    let error = message.get("error").cloned().unwrap_or(Value::Null);
    if !error.is_null() {
        let text = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| error.to_string());
        return Err(NodeError::Rpc(text));
    }
    Ok(message
        .get_mut("result")
        .map(Value::take)
        .unwrap_or(Value::Null))
}

fn parse_verbose_block(value: &Value, txs_field: &str) -> Result<NodeBlock, NodeError> {
    let hash = value
        .get("hash")
        .and_then(Value::as_str)
        .ok_or(NodeError::BadResponse("block has no hash"))?
        .to_owned();
    let raw_txs = value
        .get(txs_field)
        .and_then(Value::as_array)
        .ok_or(NodeError::BadResponse("block has no transaction list"))?;

    let mut txs = Vec::with_capacity(raw_txs.len());
    for raw_tx in raw_txs {
        let txid = raw_tx
            .get("txid")
            .and_then(Value::as_str)
            .ok_or(NodeError::BadResponse("transaction has no txid"))?
            .to_owned();
        let vouts = raw_tx
            .get("vout")
            .and_then(Value::as_array)
            .ok_or(NodeError::BadResponse("transaction has no outputs"))?;

        let mut outputs = Vec::with_capacity(vouts.len());
        for vout in vouts {
            let index = vout
                .get("n")
                .and_then(Value::as_u64)
                .ok_or(NodeError::BadResponse("output has no index"))?;
            let btc = vout
                .get("value")
                .and_then(Value::as_f64)
                .ok_or(NodeError::BadResponse("output has no value"))?;
            let value = amount_from_btc(btc)
                .map_err(|_| NodeError::BadResponse("output value out of range"))?;
            let script_hex = vout
                .get("scriptPubKey")
                .and_then(|script| script.get("hex"))
                .and_then(Value::as_str)
                .ok_or(NodeError::BadResponse("output has no script"))?;
            let script_pubkey = hex_to_bytes(script_hex)
                .ok_or(NodeError::BadResponse("output script is not hex"))?;
            outputs.push(BlockTxOut {
                index: index as u32,
                value,
                script_pubkey,
            });
        }
        txs.push(BlockTx { txid, outputs });
    }

    Ok(NodeBlock { hash, txs })
}

fn parse_filtered_block(params: &Value) -> Result<BlockEvent, NodeError> {
    let params = params
        .as_array()
        .ok_or(NodeError::BadResponse("notification params are not an array"))?;
    let height = params
        .first()
        .and_then(Value::as_i64)
        .ok_or(NodeError::BadResponse("notification has no height"))?;
    let header_hex = params
        .get(1)
        .and_then(Value::as_str)
        .ok_or(NodeError::BadResponse("notification has no header"))?;
    let header = hex_to_bytes(header_hex)
        .ok_or(NodeError::BadResponse("notification header is not hex"))?;
    let hash = txid_to_hex(&sha256d(&header));

    let raw_txs = match params.get(2) {
        Some(Value::Array(entries)) => entries.as_slice(),
        _ => &[],
    };
    let mut txs = Vec::with_capacity(raw_txs.len());
    for entry in raw_txs {
        let tx_hex = entry
            .as_str()
            .ok_or(NodeError::BadResponse("notification tx is not a string"))?;
        let bytes =
            hex_to_bytes(tx_hex).ok_or(NodeError::BadResponse("notification tx is not hex"))?;
        let tx = Transaction::deserialize(&bytes)
            .map_err(|_| NodeError::BadResponse("notification tx does not decode"))?;
        let outputs = tx
            .vout
            .iter()
            .enumerate()
            .map(|(index, out)| BlockTxOut {
                index: index as u32,
                value: out.value,
                script_pubkey: out.script_pubkey.clone(),
            })
            .collect();
        txs.push(BlockTx {
            txid: tx.txid_hex(),
            outputs,
        });
    }

    Ok(BlockEvent::FilteredBlock { height, hash, txs })
}

pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

pub(crate) fn hex_to_bytes(hex: &str) -> Option<Vec<u8>> {
    let raw = hex.as_bytes();
    if raw.len() % 2 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(raw.len() / 2);
    for chunk in raw.chunks_exact(2) {
        let hi = hex_digit(chunk[0])?;
        let lo = hex_digit(chunk[1])?;
        out.push((hi << 4) | lo);
    }
    Some(out)
}

fn hex_digit(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// In-process backend for exercising the scanner and builder in tests.
#[cfg(test)]
pub struct StubNode {
    pub fee_per_kb: Amount,
    pub block_count: std::sync::Mutex<i64>,
    pub block_hashes: std::sync::Mutex<HashMap<i64, String>>,
    pub blocks: std::sync::Mutex<HashMap<String, NodeBlock>>,
    pub sent: std::sync::Mutex<Vec<Transaction>>,
    pub filters: std::sync::Mutex<Vec<Vec<String>>>,
}

#[cfg(test)]
impl StubNode {
    pub fn new(fee_per_kb: Amount) -> Self {
        Self {
            fee_per_kb,
            block_count: std::sync::Mutex::new(0),
            block_hashes: std::sync::Mutex::new(HashMap::new()),
            blocks: std::sync::Mutex::new(HashMap::new()),
            sent: std::sync::Mutex::new(Vec::new()),
            filters: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn add_block(&self, height: i64, block: NodeBlock) {
        self.block_hashes
            .lock()
            .expect("stub lock")
            .insert(height, block.hash.clone());
        self.blocks
            .lock()
            .expect("stub lock")
            .insert(block.hash.clone(), block);
        let mut count = self.block_count.lock().expect("stub lock");
        if height > *count {
            *count = height;
        }
    }

    fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, NodeError> {
        match method {
            "getblockcount" => Ok(json!(*self.block_count.lock().expect("stub lock"))),
            "getblockhash" => {
                let height = params
                    .first()
                    .and_then(Value::as_i64)
                    .ok_or(NodeError::BadResponse("missing height"))?;
                self.block_hashes
                    .lock()
                    .expect("stub lock")
                    .get(&height)
                    .map(|hash| json!(hash))
                    .ok_or_else(|| NodeError::Rpc(format!("block {height} not found")))
            }
            _ => Err(NodeError::Rpc(format!("stub method {method}"))),
        }
    }

    fn block(&self, hash: &str) -> Result<NodeBlock, NodeError> {
        self.blocks
            .lock()
            .expect("stub lock")
            .get(hash)
            .cloned()
            .ok_or_else(|| NodeError::Rpc(format!("block {hash} not found")))
    }

    fn send(&self, tx: &Transaction) -> Result<String, NodeError> {
        self.sent.lock().expect("stub lock").push(tx.clone());
        Ok(tx.txid_hex())
    }
}
