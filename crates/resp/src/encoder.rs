//! RESP command encoding

use bytes::{BufMut, Bytes, BytesMut};

/// Encode a command as an array of bulk strings
///
/// This is the only request form data nodes accept from clients.
pub fn encode_command<I, A>(args: I) -> Bytes
where
    I: IntoIterator<Item = A>,
    A: AsRef<[u8]>,
{
    let args: Vec<A> = args.into_iter().collect();
    let mut buf = BytesMut::new();
    buf.put_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in &args {
        let arg = arg.as_ref();
        buf.put_slice(format!("${}\r\n", arg.len()).as_bytes());
        buf.put_slice(arg);
        buf.put_slice(b"\r\n");
    }
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_command() {
        let encoded = encode_command(["GET", "key"]);
        assert_eq!(
            String::from_utf8_lossy(&encoded),
            "*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n"
        );
    }

    #[test]
    fn test_encode_empty_argument() {
        let encoded = encode_command(["SET", ""]);
        assert_eq!(
            String::from_utf8_lossy(&encoded),
            "*2\r\n$3\r\nSET\r\n$0\r\n\r\n"
        );
    }
}
