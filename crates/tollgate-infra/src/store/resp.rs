//! RESP wire framing.
//!
//! Requests are inline arrays of bulk strings; replies are dispatched on
//! their first byte. Array replies only ever carry shape information for
//! this client, so the header line is returned verbatim.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use tollgate_core::error::StoreError;

/// A decoded reply frame. Error frames and nil bulk strings surface as
/// `StoreError::Server` and `StoreError::KeyNotFound` instead of variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Reply {
    Simple(String),
    Integer(i64),
    Bulk(String),
    /// Array header line, verbatim (`*<n>`).
    Array(String),
}

impl Reply {
    /// Collapse the reply to its textual payload.
    pub(crate) fn into_text(self) -> String {
        match self {
            Reply::Simple(s) | Reply::Bulk(s) | Reply::Array(s) => s,
            Reply::Integer(n) => n.to_string(),
        }
    }

    /// Interpret the reply as an integer (`:n` or a decimal text body).
    pub(crate) fn as_int(&self) -> Result<i64, StoreError> {
        match self {
            Reply::Integer(n) => Ok(*n),
            Reply::Simple(s) | Reply::Bulk(s) => s
                .parse()
                .map_err(|_| StoreError::Protocol(format!("expected integer, got {s:?}"))),
            Reply::Array(header) => Err(StoreError::Protocol(format!(
                "expected integer, got array {header:?}"
            ))),
        }
    }
}

/// Encode a command as `*<n>\r\n` followed by one `$<len>\r\n<bytes>\r\n`
/// bulk string per argument.
pub(crate) fn encode_command(args: &[&str]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + args.iter().map(|a| a.len() + 16).sum::<usize>());
    buf.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        buf.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        buf.extend_from_slice(arg.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    buf
}

/// Read one reply frame from the stream.
pub(crate) async fn read_reply<R>(reader: &mut R) -> Result<Reply, StoreError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = reader.read_line(&mut line).await?;
    if read == 0 {
        return Err(StoreError::Io("connection closed by store".to_string()));
    }
    let line = line.trim_end_matches(['\r', '\n']);

    let Some(prefix) = line.chars().next() else {
        return Err(StoreError::Protocol("empty reply line".to_string()));
    };
    let rest = &line[1..];

    match prefix {
        '+' => Ok(Reply::Simple(rest.to_string())),
        '-' => Err(StoreError::Server(rest.to_string())),
        ':' => rest
            .parse()
            .map(Reply::Integer)
            .map_err(|_| StoreError::Protocol(format!("bad integer reply {rest:?}"))),
        '$' => {
            let length: i64 = rest
                .parse()
                .map_err(|_| StoreError::Protocol(format!("bad bulk length {rest:?}")))?;
            if length == -1 {
                return Err(StoreError::KeyNotFound);
            }
            if length == 0 {
                consume_crlf(reader).await?;
                return Ok(Reply::Bulk(String::new()));
            }
            let mut data = vec![0u8; length as usize];
            reader.read_exact(&mut data).await?;
            consume_crlf(reader).await?;
            String::from_utf8(data)
                .map(Reply::Bulk)
                .map_err(|_| StoreError::Protocol("bulk string is not utf-8".to_string()))
        }
        // Shape detection only; element parsing is not needed here.
        '*' => Ok(Reply::Array(line.to_string())),
        _ => Ok(Reply::Simple(line.to_string())),
    }
}

async fn consume_crlf<R>(reader: &mut R) -> Result<(), StoreError>
where
    R: AsyncBufRead + Unpin,
{
    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn decode(bytes: &[u8]) -> Result<Reply, StoreError> {
        let mut reader = tokio::io::BufReader::new(bytes);
        read_reply(&mut reader).await
    }

    #[test]
    fn encodes_commands_as_bulk_string_arrays() {
        assert_eq!(encode_command(&["PING"]), b"*1\r\n$4\r\nPING\r\n");
        assert_eq!(
            encode_command(&["SET", "k", "v1"]),
            b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$2\r\nv1\r\n"
        );
    }

    #[tokio::test]
    async fn decodes_simple_strings() {
        assert_eq!(decode(b"+OK\r\n").await.unwrap(), Reply::Simple("OK".into()));
    }

    #[tokio::test]
    async fn decodes_integers() {
        assert_eq!(decode(b":42\r\n").await.unwrap(), Reply::Integer(42));
        assert_eq!(decode(b":-2\r\n").await.unwrap(), Reply::Integer(-2));
    }

    #[tokio::test]
    async fn decodes_bulk_strings() {
        assert_eq!(
            decode(b"$5\r\nhello\r\n").await.unwrap(),
            Reply::Bulk("hello".into())
        );
    }

    #[tokio::test]
    async fn empty_bulk_string_is_empty_not_missing() {
        assert_eq!(decode(b"$0\r\n\r\n").await.unwrap(), Reply::Bulk(String::new()));
    }

    #[tokio::test]
    async fn nil_bulk_string_is_key_not_found() {
        assert!(matches!(
            decode(b"$-1\r\n").await,
            Err(StoreError::KeyNotFound)
        ));
    }

    #[tokio::test]
    async fn error_frames_surface_the_server_message() {
        let err = decode(b"-ERR wrong number of arguments\r\n").await.unwrap_err();
        assert_eq!(err.to_string(), "redis error: ERR wrong number of arguments");
    }

    #[tokio::test]
    async fn array_replies_return_the_header_line() {
        assert_eq!(
            decode(b"*2\r\n$1\r\na\r\n$1\r\nb\r\n").await.unwrap(),
            Reply::Array("*2".into())
        );
    }

    #[tokio::test]
    async fn closed_stream_is_an_io_error() {
        assert!(matches!(decode(b"").await, Err(StoreError::Io(_))));
    }

    #[tokio::test]
    async fn consecutive_replies_parse_in_sequence() {
        let mut reader = tokio::io::BufReader::new(&b"+OK\r\n:7\r\n$2\r\nhi\r\n"[..]);
        assert_eq!(read_reply(&mut reader).await.unwrap(), Reply::Simple("OK".into()));
        assert_eq!(read_reply(&mut reader).await.unwrap(), Reply::Integer(7));
        assert_eq!(read_reply(&mut reader).await.unwrap(), Reply::Bulk("hi".into()));
    }

    #[test]
    fn reply_as_int_reads_text_bodies() {
        assert_eq!(Reply::Integer(3).as_int().unwrap(), 3);
        assert_eq!(Reply::Bulk("17".into()).as_int().unwrap(), 17);
        assert!(Reply::Bulk("x".into()).as_int().is_err());
    }
}
