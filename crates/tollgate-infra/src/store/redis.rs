//! RESP client over a single persistent TCP connection.
//!
//! The connection is guarded by a mutex so command framing is never
//! interleaved; concurrent callers queue on the lock. When a command hits a
//! socket error the connection is dropped and the next command re-dials
//! lazily, without retrying the failed command itself.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use tollgate_core::config::StoreConfig;
use tollgate_core::error::StoreError;
use tollgate_core::ports::StoreClient;

use super::resp::{encode_command, read_reply, Reply};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// Backing-store client speaking RESP over TCP.
#[derive(Debug)]
pub struct RespClient {
    address: String,
    password: String,
    db: u32,
    command_timeout: Option<Duration>,
    conn: Mutex<Option<Connection>>,
}

impl RespClient {
    /// Dial the store, authenticate, select the database, and verify the
    /// connection with a ping. Any failure is `StoreError::Unavailable`.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = Self {
            address: config.address.clone(),
            password: config.password.clone(),
            db: config.db,
            command_timeout: None,
            conn: Mutex::new(None),
        };

        let conn = client.dial().await?;
        *client.conn.lock().await = Some(conn);

        client
            .ping()
            .await
            .map_err(|e| StoreError::Unavailable(format!("ping failed: {e}")))?;

        tracing::info!(address = %client.address, db = client.db, "connected to backing store");
        Ok(client)
    }

    /// Bound every command round-trip. Without this, a stalled store pins
    /// the caller on the socket read.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Drop the connection. A later command would re-dial.
    pub async fn close(&self) {
        *self.conn.lock().await = None;
    }

    async fn dial(&self) -> Result<Connection, StoreError> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.address))
            .await
            .map_err(|_| {
                StoreError::Unavailable(format!("connect to {} timed out", self.address))
            })?
            .map_err(|e| StoreError::Unavailable(format!("connect to {}: {e}", self.address)))?;

        let (read_half, write_half) = stream.into_split();
        let mut conn = Connection {
            reader: BufReader::new(read_half),
            writer: write_half,
        };

        if !self.password.is_empty() {
            let reply = roundtrip(&mut conn, &["AUTH", &self.password]).await?;
            expect_ok(&reply)
                .map_err(|e| StoreError::Unavailable(format!("authentication failed: {e}")))?;
        }

        if self.db != 0 {
            let db = self.db.to_string();
            let reply = roundtrip(&mut conn, &["SELECT", &db]).await?;
            expect_ok(&reply)
                .map_err(|e| StoreError::Unavailable(format!("select database failed: {e}")))?;
        }

        Ok(conn)
    }

    async fn command(&self, args: &[&str]) -> Result<Reply, StoreError> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            *guard = Some(self.dial().await?);
        }
        let conn = guard.as_mut().expect("connection just established");

        let result = match self.command_timeout {
            Some(limit) => tokio::time::timeout(limit, roundtrip(conn, args))
                .await
                .unwrap_or_else(|_| Err(StoreError::Io("command timed out".to_string()))),
            None => roundtrip(conn, args).await,
        };
        if matches!(
            result,
            Err(StoreError::Io(_)) | Err(StoreError::Unavailable(_)) | Err(StoreError::Protocol(_))
        ) {
            // The stream may hold half a frame; force a re-dial next time.
            *guard = None;
        }
        result
    }
}

async fn roundtrip(conn: &mut Connection, args: &[&str]) -> Result<Reply, StoreError> {
    conn.writer.write_all(&encode_command(args)).await?;
    read_reply(&mut conn.reader).await
}

fn expect_ok(reply: &Reply) -> Result<(), StoreError> {
    match reply {
        Reply::Simple(s) if s.starts_with("OK") => Ok(()),
        other => Err(StoreError::Protocol(format!("expected +OK, got {other:?}"))),
    }
}

#[async_trait]
impl StoreClient for RespClient {
    async fn ping(&self) -> Result<String, StoreError> {
        Ok(self.command(&["PING"]).await?.into_text())
    }

    async fn get(&self, key: &str) -> Result<String, StoreError> {
        Ok(self.command(&["GET", key]).await?.into_text())
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let reply = if ttl > Duration::ZERO {
            let seconds = ttl.as_secs().max(1).to_string();
            self.command(&["SETEX", key, &seconds, value]).await?
        } else {
            self.command(&["SET", key, value]).await?
        };
        expect_ok(&reply).map_err(|_| StoreError::Server(format!("set failed: {reply:?}")))
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        self.command(&["INCR", key]).await?.as_int()
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let delta = delta.to_string();
        self.command(&["INCRBY", key, &delta]).await?.as_int()
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let seconds = ttl.as_secs().max(1).to_string();
        match self.command(&["EXPIRE", key, &seconds]).await?.as_int()? {
            1 => Ok(()),
            0 => Err(StoreError::KeyNotFound),
            other => Err(StoreError::Protocol(format!("unexpected EXPIRE reply {other}"))),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        match self.command(&["TTL", key]).await?.as_int()? {
            -2 => Err(StoreError::KeyNotFound),
            -1 => Ok(None),
            seconds => Ok(Some(Duration::from_secs(seconds.max(0) as u64))),
        }
    }

    async fn exists(&self, keys: &[&str]) -> Result<i64, StoreError> {
        let mut args = Vec::with_capacity(keys.len() + 1);
        args.push("EXISTS");
        args.extend_from_slice(keys);
        self.command(&args).await?.as_int()
    }
}
