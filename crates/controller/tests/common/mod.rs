//! Test helpers: an in-process data node speaking the RESP admin surface

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use resp::{read_value, RespValue};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Observable state of a mock data node
pub struct MockNodeState {
    /// Last identity installed with SETNODEID
    pub node_id: Option<String>,
    /// Accepted SETNODES pushes as (payload, version)
    pub pushes: Vec<(String, i64)>,
    /// Current topology version; stale pushes are rejected
    pub version: i64,
    /// Received CLUSTERX MIGRATE commands as (range, target id)
    pub migrations: Vec<(String, String)>,
    /// What CLUSTER INFO reports for the migration state
    pub migrate_state: &'static str,
    /// Offset reported by INFO replication
    pub repl_offset: i64,
    /// Total commands handled, whatever their outcome
    pub commands: usize,
}

impl Default for MockNodeState {
    fn default() -> Self {
        Self {
            node_id: None,
            pushes: Vec::new(),
            version: 0,
            migrations: Vec::new(),
            migrate_state: "success",
            repl_offset: 0,
            commands: 0,
        }
    }
}

/// A TCP server behaving like a data node's admin command surface
pub struct MockDataNode {
    pub addr: String,
    pub state: Arc<Mutex<MockNodeState>>,
}

impl MockDataNode {
    pub async fn start() -> Self {
        Self::start_with(MockNodeState::default()).await
    }

    pub async fn start_with(state: MockNodeState) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let state = Arc::new(Mutex::new(state));
        let shared = Arc::clone(&state);
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(handle_connection(socket, Arc::clone(&shared)));
            }
        });
        Self { addr, state }
    }
}

async fn handle_connection(socket: TcpStream, state: Arc<Mutex<MockNodeState>>) {
    let mut stream = BufReader::new(socket);
    loop {
        let Ok(value) = read_value(&mut stream).await else {
            return;
        };
        let args = command_args(&value);
        let reply = dispatch(&args, &state);
        if stream.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

fn command_args(value: &RespValue) -> Vec<String> {
    match value {
        RespValue::Array(items) => items
            .iter()
            .filter_map(|item| item.as_text())
            .collect(),
        _ => Vec::new(),
    }
}

fn dispatch(args: &[String], state: &Mutex<MockNodeState>) -> String {
    state.lock().commands += 1;
    let Some(command) = args.first() else {
        return err_reply("empty command");
    };
    match command.to_uppercase().as_str() {
        "PING" => "+PONG\r\n".to_string(),
        "AUTH" => "+OK\r\n".to_string(),
        "CLUSTERX" => dispatch_clusterx(args, state),
        "CLUSTER" => {
            let state = state.lock();
            bulk_reply(&format!(
                "cluster_state:ok\r\nmigrating_state:{}\r\n",
                state.migrate_state
            ))
        }
        "INFO" => {
            let state = state.lock();
            bulk_reply(&format!("slave_repl_offset:{}\r\n", state.repl_offset))
        }
        other => err_reply(&format!("unknown command '{}'", other)),
    }
}

fn dispatch_clusterx(args: &[String], state: &Mutex<MockNodeState>) -> String {
    let Some(sub) = args.get(1) else {
        return err_reply("missing subcommand");
    };
    match sub.to_uppercase().as_str() {
        "SETNODEID" => match args.get(2) {
            Some(id) => {
                state.lock().node_id = Some(id.clone());
                "+OK\r\n".to_string()
            }
            None => err_reply("missing node id"),
        },
        "SETNODES" => {
            let (Some(payload), Some(version)) = (args.get(2), args.get(3)) else {
                return err_reply("wrong number of arguments");
            };
            let Ok(version) = version.parse::<i64>() else {
                return err_reply("invalid version");
            };
            let mut state = state.lock();
            if version <= state.version {
                return err_reply("invalid version of cluster");
            }
            state.version = version;
            state.pushes.push((payload.clone(), version));
            "+OK\r\n".to_string()
        }
        "MIGRATE" => {
            let (Some(range), Some(target)) = (args.get(2), args.get(3)) else {
                return err_reply("wrong number of arguments");
            };
            state.lock().migrations.push((range.clone(), target.clone()));
            "+OK\r\n".to_string()
        }
        other => err_reply(&format!("unknown CLUSTERX subcommand '{}'", other)),
    }
}

fn bulk_reply(text: &str) -> String {
    format!("${}\r\n{}\r\n", text.len(), text)
}

fn err_reply(message: &str) -> String {
    format!("-ERR {}\r\n", message)
}

/// Poll a condition until it holds or the deadline passes
pub async fn wait_until<F: Fn() -> bool>(condition: F, deadline: Duration) -> bool {
    let end = tokio::time::Instant::now() + deadline;
    while tokio::time::Instant::now() < end {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

/// An address on localhost that refuses connections
pub async fn dead_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}
