//! RESP reply parsing

use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::{RespError, RespValue};

/// Upper bound on a single bulk string or array element count
const MAX_BULK_SIZE: usize = 64 * 1024 * 1024;

/// Read one complete RESP value from the stream
pub async fn read_value<R>(reader: &mut R) -> Result<RespValue, RespError>
where
    R: AsyncBufRead + Unpin + Send,
{
    let line = read_line(reader).await?;
    let bytes = line.as_bytes();
    if bytes.is_empty() {
        return Err(RespError::InvalidFormat("empty line".to_string()));
    }
    let rest = &line[1..];
    match bytes[0] {
        b'+' => Ok(RespValue::SimpleString(Bytes::from(rest.to_string()))),
        b'-' => Ok(RespValue::Error(rest.to_string())),
        b':' => {
            let n: i64 = rest
                .parse()
                .map_err(|_| RespError::InvalidFormat(format!("invalid integer: {}", rest)))?;
            Ok(RespValue::Integer(n))
        }
        b'$' => read_bulk(reader, rest).await,
        b'*' => read_array(reader, rest).await,
        other => Err(RespError::InvalidType(other)),
    }
}

async fn read_line<R>(reader: &mut R) -> Result<String, RespError>
where
    R: AsyncBufRead + Unpin + Send,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(RespError::UnexpectedEof);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}

async fn read_bulk<R>(reader: &mut R, len: &str) -> Result<RespValue, RespError>
where
    R: AsyncBufRead + Unpin + Send,
{
    let len: i64 = len
        .parse()
        .map_err(|_| RespError::InvalidFormat(format!("invalid bulk length: {}", len)))?;
    if len == -1 {
        return Ok(RespValue::Null);
    }
    if len < 0 {
        return Err(RespError::InvalidFormat(format!(
            "invalid bulk length: {}",
            len
        )));
    }
    let len = len as usize;
    if len > MAX_BULK_SIZE {
        return Err(RespError::FrameTooLarge(len));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf).await?;
    if crlf != [b'\r', b'\n'] {
        return Err(RespError::InvalidFormat(
            "bulk string not terminated by CRLF".to_string(),
        ));
    }
    Ok(RespValue::BulkString(Bytes::from(data)))
}

async fn read_array<R>(reader: &mut R, count: &str) -> Result<RespValue, RespError>
where
    R: AsyncBufRead + Unpin + Send,
{
    let count: i64 = count
        .parse()
        .map_err(|_| RespError::InvalidFormat(format!("invalid array length: {}", count)))?;
    if count == -1 {
        return Ok(RespValue::Null);
    }
    if count < 0 || count as usize > MAX_BULK_SIZE {
        return Err(RespError::InvalidFormat(format!(
            "invalid array length: {}",
            count
        )));
    }

    let mut items = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let item = Box::pin(read_value(reader)).await?;
        items.push(item);
    }
    Ok(RespValue::Array(items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;
    use tokio_test::io::Builder;

    async fn parse(data: &[u8]) -> Result<RespValue, RespError> {
        let reader = Builder::new().read(data).build();
        let mut reader = BufReader::new(reader);
        read_value(&mut reader).await
    }

    #[tokio::test]
    async fn test_read_simple_string() {
        let value = parse(b"+PONG\r\n").await.unwrap();
        assert_eq!(value, RespValue::SimpleString(Bytes::from("PONG")));
    }

    #[tokio::test]
    async fn test_read_error() {
        let value = parse(b"-ERR unknown command\r\n").await.unwrap();
        assert_eq!(value.as_error(), Some("ERR unknown command"));
    }

    #[tokio::test]
    async fn test_read_integer() {
        let value = parse(b":42\r\n").await.unwrap();
        assert_eq!(value.as_integer(), Some(42));
    }

    #[tokio::test]
    async fn test_read_bulk_string() {
        let value = parse(b"$5\r\nhello\r\n").await.unwrap();
        assert_eq!(value, RespValue::BulkString(Bytes::from("hello")));
    }

    #[tokio::test]
    async fn test_read_null_bulk() {
        let value = parse(b"$-1\r\n").await.unwrap();
        assert_eq!(value, RespValue::Null);
    }

    #[tokio::test]
    async fn test_read_array() {
        let value = parse(b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n").await.unwrap();
        match value {
            RespValue::Array(items) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[0], RespValue::BulkString(Bytes::from("GET")));
            }
            other => panic!("expected array, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_eof() {
        assert!(matches!(parse(b"").await, Err(RespError::UnexpectedEof)));
    }

    #[tokio::test]
    async fn test_bulk_too_large() {
        assert!(matches!(
            parse(b"$99999999999\r\n").await,
            Err(RespError::FrameTooLarge(_)) | Err(RespError::InvalidFormat(_))
        ));
    }
}
