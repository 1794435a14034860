//! Client library for talking to a dictd server
//!
//! The server answers one request per connection, so every call opens a
//! fresh TCP connection.

use crate::error::{DictError, Result};
use crate::protocol::{Command, Response, MAX_TOKEN_CHARS};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Client for a dictd server
#[derive(Debug, Clone)]
pub struct Client {
    addr: String,
}

impl Client {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send one raw request line and read the response
    pub async fn send_line(&self, line: &str) -> Result<Response> {
        let stream = TcpStream::connect(&self.addr).await?;
        let (read_half, mut write_half) = stream.into_split();

        write_half.write_all(line.trim_end().as_bytes()).await?;
        write_half.write_all(b"\n").await?;
        write_half.flush().await?;

        let mut reader = BufReader::new(read_half);
        let mut response_line = String::new();
        if reader.read_line(&mut response_line).await? == 0 {
            return Err(DictError::Client(
                "server closed the connection without answering".to_string(),
            ));
        }

        Response::parse(&response_line)
    }

    /// Send a command and return the resulting values (empty on 404)
    async fn send_command(&self, command: &Command) -> Result<Vec<String>> {
        let line = command
            .to_line()
            .ok_or_else(|| DictError::Client("cannot send an invalid command".to_string()))?;

        match self.send_line(&line).await? {
            Response::Found(values) => Ok(values),
            Response::NotFound => Ok(Vec::new()),
        }
    }

    /// Get every value stored under a key
    pub async fn get(&self, key: &str) -> Result<Vec<String>> {
        check_token(key)?;
        self.send_command(&Command::Get {
            key: key.to_string(),
        })
        .await
    }

    /// Add a value to a key, returning the key's full value list
    pub async fn put(&self, key: &str, value: &str) -> Result<Vec<String>> {
        check_token(key)?;
        check_token(value)?;
        self.send_command(&Command::Put {
            key: key.to_string(),
            value: value.to_string(),
        })
        .await
    }

    /// Remove a value from a key, returning the values left
    pub async fn delete(&self, key: &str, value: &str) -> Result<Vec<String>> {
        check_token(key)?;
        check_token(value)?;
        self.send_command(&Command::Delete {
            key: key.to_string(),
            value: value.to_string(),
        })
        .await
    }
}

/// Reject keys and values the server would not be able to parse
fn check_token(token: &str) -> Result<()> {
    let len = token.chars().count();
    if len == 0 || len > MAX_TOKEN_CHARS {
        return Err(DictError::Client(format!(
            "keys and values must be 1 to {} characters, got {}",
            MAX_TOKEN_CHARS, len
        )));
    }
    if token.contains(['<', '>', '\n', '\r']) {
        return Err(DictError::Client(format!(
            "keys and values cannot contain '<', '>' or line breaks: {:?}",
            token
        )));
    }
    Ok(())
}
