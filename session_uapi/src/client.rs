//! Control socket client.
//!
//! Requests are `get=1` or `set=1` followed by key=value lines and a blank
//! line. The engine answers with its own key=value lines (for `get`), then
//! `errno=N` and a blank line.

use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::{Duration, timeout};

use crate::transport::{UapiError, UapiResult, socket_path};

/// Upper bound on a response; a `get` on a busy interface is a few KiB.
const MAX_RESPONSE_LEN: usize = 10 * 1024 * 1024;

const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Client side of one control socket conversation.
pub struct UapiClient {
    stream: BufReader<UnixStream>,
}

impl UapiClient {
    /// Connect to the control socket of `interface_name` under `socket_dir`.
    pub async fn connect(socket_dir: &Path, interface_name: &str) -> UapiResult<Self> {
        Self::connect_path(socket_path(socket_dir, interface_name)?).await
    }

    /// Connect to a control socket by path.
    pub async fn connect_path<P: AsRef<Path>>(path: P) -> UapiResult<Self> {
        let stream = UnixStream::connect(path.as_ref()).await.map_err(|e| {
            UapiError::Connection(format!(
                "Failed to connect to {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Ok(Self {
            stream: BufReader::new(stream),
        })
    }

    /// Fetch the engine's current configuration as key=value lines.
    pub async fn get(&mut self) -> UapiResult<String> {
        self.send(b"get=1\n\n").await?;
        let response = self.receive().await?;
        parse_response(&response)
    }

    /// Apply key=value configuration lines.
    ///
    /// Blank lines in `settings` are dropped, since a blank line ends the
    /// request.
    pub async fn set(&mut self, settings: &str) -> UapiResult<()> {
        let mut request = String::from("set=1\n");
        for line in settings.lines().map(str::trim).filter(|l| !l.is_empty()) {
            request.push_str(line);
            request.push('\n');
        }
        request.push('\n');

        self.send(request.as_bytes()).await?;
        let response = self.receive().await?;
        parse_response(&response).map(|_| ())
    }

    async fn send(&mut self, data: &[u8]) -> UapiResult<()> {
        match timeout(IO_TIMEOUT, self.stream.get_mut().write_all(data)).await {
            Ok(result) => result.map_err(UapiError::Io),
            Err(_) => Err(UapiError::Timeout("Write operation timed out".to_string())),
        }
    }

    /// Read up to and including the blank line that ends a response.
    async fn receive(&mut self) -> UapiResult<String> {
        let mut response = String::new();
        loop {
            let mut line = String::new();
            let read = match timeout(IO_TIMEOUT, self.stream.read_line(&mut line)).await {
                Ok(result) => result.map_err(UapiError::Io)?,
                Err(_) => return Err(UapiError::Timeout("Read operation timed out".to_string())),
            };

            if read == 0 {
                return Err(UapiError::Protocol(
                    "connection closed before end of response".to_string(),
                ));
            }
            if line == "\n" {
                return Ok(response);
            }

            response.push_str(&line);
            if response.len() > MAX_RESPONSE_LEN {
                return Err(UapiError::Protocol(format!(
                    "Response too large: {} bytes",
                    response.len()
                )));
            }
        }
    }
}

/// Split a response into its payload and trailing errno.
///
/// Returns the payload lines when errno is zero.
pub fn parse_response(response: &str) -> UapiResult<String> {
    let mut payload = String::new();
    let mut errno = None;

    for line in response.lines() {
        match line.split_once('=') {
            Some(("errno", value)) => {
                let value = value
                    .parse::<i64>()
                    .map_err(|_| UapiError::Protocol(format!("invalid errno {value:?}")))?;
                errno = Some(value);
            }
            Some(_) => {
                payload.push_str(line);
                payload.push('\n');
            }
            None => {
                return Err(UapiError::Protocol(format!("malformed line {line:?}")));
            }
        }
    }

    match errno {
        Some(0) => Ok(payload),
        Some(code) => Err(UapiError::Remote(code)),
        None => Err(UapiError::Protocol("response missing errno".to_string())),
    }
}
