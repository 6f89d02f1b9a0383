//! Data-node connection
//!
//! One connection per request exchange; the controller opens, issues its
//! commands and drops the connection. Every operation runs under the
//! deadline given at connect time.

use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::{encode_command, read_value, RespError, RespValue};

/// A RESP connection to a single data node
pub struct Connection {
    stream: BufReader<TcpStream>,
    deadline: Duration,
}

impl Connection {
    /// Open a TCP connection, bounded by the deadline
    pub async fn connect(addr: &str, deadline: Duration) -> Result<Self, RespError> {
        let stream = timeout(deadline, TcpStream::connect(addr))
            .await
            .map_err(|_| RespError::TimedOut)??;
        Ok(Self {
            stream: BufReader::new(stream),
            deadline,
        })
    }

    /// Send one command and read its reply
    pub async fn request<I, A>(&mut self, args: I) -> Result<RespValue, RespError>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        let payload = encode_command(args);
        timeout(self.deadline, async {
            self.stream.write_all(&payload).await?;
            self.stream.flush().await?;
            read_value(&mut self.stream).await
        })
        .await
        .map_err(|_| RespError::TimedOut)?
    }
}
