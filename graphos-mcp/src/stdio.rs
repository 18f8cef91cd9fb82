//! Newline-delimited JSON-RPC over a byte stream pair (stdin/stdout).

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::McpError;
use crate::server::SessionServer;

/// Serve one session until `reader` reaches EOF, then close the session.
/// Every response is written as a single line.
pub async fn serve_session<R, W>(
    server: Arc<SessionServer>,
    mut reader: R,
    mut writer: W,
) -> Result<(), McpError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let session_id = server.start_new().await;
    tracing::info!(session_id = %session_id, "stdio_session_opened");

    let result = pump(&server, &session_id, &mut reader, &mut writer).await;
    server.stop(&session_id).await;
    tracing::info!(session_id = %session_id, "stdio_session_finished");
    result
}

async fn pump<R, W>(
    server: &SessionServer,
    session_id: &str,
    reader: &mut R,
    writer: &mut W,
) -> Result<(), McpError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = String::new();
    loop {
        buf.clear();
        let n = reader.read_line(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        let frame = buf.trim();
        if frame.is_empty() {
            continue;
        }

        if let Some(response) = server.handle_raw(session_id, frame).await {
            let mut line = serde_json::to_string(&response)?;
            line.push('\n');
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use graphos_actions::registry::ActionRegistry;
    use graphos_actions::{ActionDispatcher, GrantTable, RunnerSupervisor};
    use graphos_core::config::RunnerConfig;
    use graphos_store_memory::InMemoryGraphStore;
    use tokio::io::BufReader;

    use super::*;
    use crate::server::SessionServerConfig;

    fn server() -> Arc<SessionServer> {
        let supervisor = Arc::new(RunnerSupervisor::new(
            Arc::new(ActionRegistry::new()),
            Arc::new(GrantTable::from_config(&[])),
            &RunnerConfig::default(),
        ));
        let dispatcher = Arc::new(ActionDispatcher::new(
            supervisor,
            Arc::new(InMemoryGraphStore::new()),
            Duration::from_secs(1),
        ));
        Arc::new(SessionServer::new(SessionServerConfig::default(), dispatcher))
    }

    #[tokio::test]
    async fn answers_each_request_line() {
        let server = server();
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"clientInfo":{"id":"c1"}}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n\n",
            "not json\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#,
            "\n",
        );
        let mut output = Vec::new();

        serve_session(server.clone(), BufReader::new(input.as_bytes()), &mut output)
            .await
            .expect("serve");

        let text = String::from_utf8(output).expect("utf8");
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["id"], 1);
        assert!(lines[0]["result"]["protocolVersion"].is_string());
        assert_eq!(lines[1]["error"]["code"], -32700);
        assert_eq!(lines[1]["id"], serde_json::Value::Null);
        assert_eq!(lines[2]["result"], serde_json::json!({}));

        // EOF closes the session.
        assert_eq!(server.session_count().await, 0);
    }
}
