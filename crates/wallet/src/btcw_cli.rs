//! btcw-cli: thin command-line client for the wallet daemon.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;

use btcw_consensus::money::format_btc;
use serde_json::{json, Value};

const DEFAULT_WALLET_ADDR: &str = "127.0.0.1:18557";
const MAX_WALLET_UNLOCK_SECS: u64 = 3600;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Err(message) = run(&args) {
        eprintln!("{message}");
        std::process::exit(1);
    }
}

fn run(args: &[String]) -> Result<(), String> {
    let Some(command) = args.first() else {
        return Err(usage().to_string());
    };

    match command.as_str() {
        "getbalance" => {
            let result = call("WalletRPC.GetBalance", Value::Null)?;
            let satoshis = result
                .as_i64()
                .ok_or("unexpected balance reply from wallet")?;
            println!("{}", format_btc(satoshis));
        }
        "getnewaddress" => {
            let result = call("WalletRPC.GetNewAddress", Value::Null)?;
            let address = result
                .as_str()
                .ok_or("unexpected address reply from wallet")?;
            println!("{address}");
        }
        "sendtoaddress" => {
            if args.len() != 3 {
                return Err("please provide address and amount to send".into());
            }
            let address = &args[1];
            let amount: f64 = args[2]
                .parse()
                .map_err(|_| "invalid amount".to_string())?;
            let result = call(
                "WalletRPC.SendToAddress",
                json!({ "Address": address, "Amount": amount }),
            )?;
            let txid = result.as_str().ok_or("unexpected txid reply from wallet")?;
            println!("{txid}");
        }
        "walletpassphrase" => {
            println!("enter passphrase to unlock wallet: ");
            let passphrase = read_line()?;
            println!("provide duration (in seconds) to unlock wallet");
            let duration: u64 = read_line()?
                .trim()
                .parse()
                .map_err(|_| "invalid time provided. please enter duration in seconds")?;
            if duration > MAX_WALLET_UNLOCK_SECS {
                return Err(format!(
                    "unlock duration time too high. provide a duration below {MAX_WALLET_UNLOCK_SECS} seconds (one hour)"
                ));
            }
            call(
                "WalletRPC.WalletPassphrase",
                json!({ "Passphrase": passphrase.trim_end_matches(['\r', '\n']), "Duration": duration }),
            )?;
        }
        "walletlock" => {
            call("WalletRPC.WalletLock", Value::Null)?;
        }
        "help" | "-h" | "--help" => println!("{}", usage()),
        other => return Err(format!("unknown command '{other}'\n{}", usage())),
    }
    Ok(())
}

/// One JSON-RPC call over a fresh connection to the daemon.
fn call(method: &str, params: Value) -> Result<Value, String> {
    let addr = std::env::var("BTCW_RPC_ADDR").unwrap_or_else(|_| DEFAULT_WALLET_ADDR.to_string());
    let stream = TcpStream::connect(&addr)
        .map_err(|err| format!("could not reach wallet daemon at {addr}: {err}"))?;

    let params = match params {
        Value::Null => Value::Array(Vec::new()),
        object => Value::Array(vec![object]),
    };
    let request = json!({ "method": method, "params": params, "id": 1 });
    let mut writer = &stream;
    let mut line = request.to_string();
    line.push('\n');
    writer
        .write_all(line.as_bytes())
        .map_err(|err| format!("error sending request: {err}"))?;

    let mut reader = BufReader::new(&stream);
    let mut response = String::new();
    reader
        .read_line(&mut response)
        .map_err(|err| format!("error reading reply: {err}"))?;
    let reply: Value =
        serde_json::from_str(&response).map_err(|_| "malformed reply from wallet".to_string())?;

    let error = reply.get("error").cloned().unwrap_or(Value::Null);
    if !error.is_null() {
        return Err(error.as_str().map(str::to_owned).unwrap_or(error.to_string()));
    }
    Ok(reply.get("result").cloned().unwrap_or(Value::Null))
}

fn read_line() -> Result<String, String> {
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|_| "error reading input, please try again".to_string())?;
    Ok(line)
}

fn usage() -> &'static str {
    "usage: btcw-cli <command>

  getbalance                     print the wallet balance
  getnewaddress                  generate a receiving address
  sendtoaddress <addr> <amount>  send BTC to an address
  walletpassphrase               unlock the wallet for a duration
  walletlock                     lock the wallet

The daemon address defaults to 127.0.0.1:18557; set BTCW_RPC_ADDR to
override."
}
