//! Newline-delimited JSON command loop.

use crate::error::{CallShieldError, Result};
use crate::ipc::protocol::{Command, Response};
use crate::sink::SharedWriter;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

/// Handler trait for processing inbound commands.
#[async_trait::async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handle a command and return its response.
    async fn handle(&self, command: Command) -> Response;

    /// Runs after the response to the last command has been written.
    async fn follow_up(&self) {}
}

/// Write one line to the shared output and flush it.
pub fn write_line(output: &SharedWriter, line: &str) -> Result<()> {
    let mut writer = output.lock().map_err(|e| CallShieldError::Protocol {
        message: format!("Failed to lock output: {}", e),
    })?;
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Read commands from `input` until EOF, answering each on `output`.
///
/// Unparseable lines get an `error` response and the loop continues.
/// Returns the number of commands handled.
pub async fn serve<R, H>(input: R, output: SharedWriter, handler: Arc<H>) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    H: CommandHandler + ?Sized,
{
    let mut lines = input.lines();
    let mut handled = 0usize;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match Command::from_json(line) {
            Ok(command) => {
                debug!(?command, "command received");
                handled += 1;
                handler.handle(command).await
            }
            Err(e) => {
                warn!(error = %e, "rejecting malformed command");
                Response::error(format!("Failed to parse command: {}", e))
            }
        };

        let json = response.to_json().map_err(|e| CallShieldError::Protocol {
            message: format!("Failed to serialize response: {}", e),
        })?;
        write_line(&output, &json)?;
        handler.follow_up().await;
    }

    info!(handled, "command input closed");
    Ok(handled)
}

/// Stdout wrapped for sharing between responses and events.
pub fn shared_stdout() -> SharedWriter {
    Arc::new(Mutex::new(Box::new(std::io::stdout())))
}

/// Serve commands from stdin until it closes.
pub async fn serve_stdio<H>(output: SharedWriter, handler: Arc<H>) -> Result<usize>
where
    H: CommandHandler + ?Sized,
{
    serve(BufReader::new(tokio::io::stdin()), output, handler).await
}
