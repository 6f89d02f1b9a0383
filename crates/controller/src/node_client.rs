//! Data-node client
//!
//! Wraps a RESP connection with the administrative commands the
//! controller issues. Connections are opened per exchange and dropped on
//! return.

use std::collections::HashMap;
use std::time::Duration;

use metadata::{NodeInfo, SlotRange};
use resp::{Connection, RespError, RespValue};

use crate::error::{Error, Result};

/// A short-lived administrative connection to one data node
pub struct NodeClient {
    addr: String,
    conn: Connection,
}

impl NodeClient {
    /// Connect and authenticate when the node carries a password
    pub async fn connect(addr: &str, password: Option<&str>, deadline: Duration) -> Result<Self> {
        let conn = Connection::connect(addr, deadline)
            .await
            .map_err(|source| transport_error(addr, source))?;
        let mut client = Self {
            addr: addr.to_string(),
            conn,
        };
        if let Some(password) = password.filter(|p| !p.is_empty()) {
            client.exchange(vec!["AUTH".to_string(), password.to_string()]).await?;
        }
        Ok(client)
    }

    /// Connect using a node record's address and password
    pub async fn connect_to(node: &NodeInfo, deadline: Duration) -> Result<Self> {
        Self::connect(&node.address, node.password.as_deref(), deadline).await
    }

    pub async fn ping(&mut self) -> Result<()> {
        let reply = self.request(vec!["PING".to_string()]).await?;
        match reply {
            RespValue::SimpleString(ref s) if s.as_ref() == b"PONG" => Ok(()),
            RespValue::Error(message) => Err(Error::NodeRejected {
                addr: self.addr.clone(),
                message,
            }),
            _ => Ok(()),
        }
    }

    /// Install the node's identity
    pub async fn set_node_id(&mut self, node_id: &str) -> Result<()> {
        self.exchange(vec![
            "CLUSTERX".to_string(),
            "SETNODEID".to_string(),
            node_id.to_string(),
        ])
        .await
    }

    /// Push a topology snapshot
    ///
    /// Data nodes only apply versions strictly greater than their own; a
    /// rejection for an old version means the node is already up to date
    /// and counts as success.
    pub async fn set_nodes(&mut self, payload: &str, version: i64) -> Result<()> {
        let reply = self
            .request(vec![
                "CLUSTERX".to_string(),
                "SETNODES".to_string(),
                payload.to_string(),
                version.to_string(),
            ])
            .await?;
        match reply {
            RespValue::Error(message) if message.to_lowercase().contains("version") => Ok(()),
            RespValue::Error(message) => Err(Error::NodeRejected {
                addr: self.addr.clone(),
                message,
            }),
            _ => Ok(()),
        }
    }

    /// Start migrating a slot range to the shard owning `target_node_id`
    pub async fn migrate_slots(&mut self, range: &SlotRange, target_node_id: &str) -> Result<()> {
        self.exchange(vec![
            "CLUSTERX".to_string(),
            "MIGRATE".to_string(),
            range.to_string(),
            target_node_id.to_string(),
        ])
        .await
    }

    /// Fetch `CLUSTER INFO` as a field map
    pub async fn cluster_info(&mut self) -> Result<HashMap<String, String>> {
        let reply = self
            .request(vec!["CLUSTER".to_string(), "INFO".to_string()])
            .await?;
        let text = self.expect_text(reply)?;
        Ok(parse_info_fields(&text))
    }

    /// Replication offset reported by `INFO replication`
    ///
    /// Replicas report `slave_repl_offset`; masters report
    /// `master_repl_offset`. A node reporting neither counts as offset 0.
    pub async fn replication_offset(&mut self) -> Result<i64> {
        let reply = self
            .request(vec!["INFO".to_string(), "replication".to_string()])
            .await?;
        let text = self.expect_text(reply)?;
        let fields = parse_info_fields(&text);
        let offset = fields
            .get("slave_repl_offset")
            .or_else(|| fields.get("master_repl_offset"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Ok(offset)
    }

    async fn request(&mut self, args: Vec<String>) -> Result<RespValue> {
        self.conn
            .request(args)
            .await
            .map_err(|source| transport_error(&self.addr, source))
    }

    /// Issue a command expected to answer `+OK`
    async fn exchange(&mut self, args: Vec<String>) -> Result<()> {
        let reply = self.request(args).await?;
        match reply {
            RespValue::Error(message) => Err(Error::NodeRejected {
                addr: self.addr.clone(),
                message,
            }),
            _ => Ok(()),
        }
    }

    fn expect_text(&self, reply: RespValue) -> Result<String> {
        if let Some(message) = reply.as_error() {
            return Err(Error::NodeRejected {
                addr: self.addr.clone(),
                message: message.to_string(),
            });
        }
        reply.as_text().ok_or_else(|| Error::NodeRejected {
            addr: self.addr.clone(),
            message: "unexpected reply type".to_string(),
        })
    }
}

fn transport_error(addr: &str, source: RespError) -> Error {
    match source {
        RespError::TimedOut => Error::Timeout,
        source => Error::NodeUnreachable {
            addr: addr.to_string(),
            source,
        },
    }
}

/// Parse the `key:value` line format of INFO-style replies
fn parse_info_fields(text: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            fields.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    fields
}
