use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::{Listener, ListenerSet, Subscription, Transport};
use crate::{ParleyError, Result};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Newline-delimited JSON over a byte stream pair.
///
/// Each message is one JSON document followed by `\n`. A background task reads
/// the incoming half line by line and hands every decoded value to the
/// attached listeners; lines that are not valid JSON are logged and skipped.
/// The connection is point-to-point, so the send target is `()`.
///
/// # Examples
///
/// ```no_run
/// use parley_core::{Engine, StreamTransport};
///
/// # async fn example() -> parley_core::Result<()> {
/// // Inside a worker process spawned with piped stdio
/// let engine = Engine::new(StreamTransport::stdio()?);
/// # Ok(())
/// # }
/// ```
pub struct StreamTransport {
    listeners: ListenerSet,
    writer: Mutex<BoxedWriter>,
    reader_task: JoinHandle<()>,
    closed: watch::Receiver<bool>,
    namespace: Option<String>,
}

impl StreamTransport {
    /// Bind to a reader/writer pair. Must be called within a tokio runtime.
    pub fn new<R, W>(reader: R, writer: W) -> Result<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| ParleyError::NoRuntime)?;
        let listeners = ListenerSet::new();
        let (closed_tx, closed) = watch::channel(false);
        let reader_task = runtime.spawn(read_loop(reader, listeners.clone(), closed_tx));

        Ok(Self {
            listeners,
            writer: Mutex::new(Box::new(writer)),
            reader_task,
            closed,
            namespace: None,
        })
    }

    /// Bind to this process' stdin/stdout.
    pub fn stdio() -> Result<Self> {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Bind to a child process spawned with piped stdin and stdout.
    pub fn from_child(child: &mut Child) -> Result<Self> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ParleyError::Transport("child stdin is not piped".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ParleyError::Transport("child stdout is not piped".into()))?;
        Self::new(stdout, stdin)
    }

    /// Advertise a namespace to engines built on this transport.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Whether the incoming half has reached end of stream.
    pub fn is_closed(&self) -> bool {
        self.reader_task.is_finished()
    }

    /// Resolves once the incoming half has reached end of stream or failed.
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        // An error means the reader task is gone, which is closed as well
        let _ = closed.wait_for(|done| *done).await;
    }
}

async fn read_loop<R>(reader: R, listeners: ListenerSet, closed: watch::Sender<bool>)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => {
                debug!(target: "parley", "Stream reached end of input");
                break;
            }
            Ok(_) => {
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                // Bytes that are not UTF-8 fail here like any other bad JSON
                match serde_json::from_slice::<Value>(&line) {
                    Ok(message) => {
                        let delivered = listeners.dispatch(&message);
                        trace!(target: "parley", delivered, "Stream message dispatched");
                    }
                    Err(e) => {
                        warn!(target: "parley", error = %e, "Skipping undecodable stream line");
                    }
                }
            }
            Err(e) => {
                warn!(target: "parley", error = %e, "Stream read failed");
                break;
            }
        }
    }
    let _ = closed.send(true);
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

impl fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamTransport")
            .field("listeners", &self.listeners.len())
            .field("closed", &self.is_closed())
            .field("namespace", &self.namespace)
            .finish()
    }
}

#[async_trait]
impl Transport for StreamTransport {
    type Target = ();

    fn listen(&self, listener: Listener) -> Subscription {
        self.listeners.attach(listener)
    }

    async fn send(&self, message: Value, _target: Option<()>) -> Result<()> {
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .map_err(|e| ParleyError::Transport(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| ParleyError::Transport(e.to_string()))?;
        Ok(())
    }

    fn namespace(&self) -> Option<String> {
        self.namespace.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn lines_flow_between_duplex_halves() {
        let (left, right) = tokio::io::duplex(4096);
        let (left_read, left_write) = tokio::io::split(left);
        let (right_read, right_write) = tokio::io::split(right);
        let a = StreamTransport::new(left_read, left_write).unwrap();
        let b = StreamTransport::new(right_read, right_write).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = b.listen(Arc::new(move |msg: &Value| {
            let _ = tx.send(msg.clone());
        }));

        a.send(json!({"n": 1}), None).await.unwrap();
        a.send(json!({"n": 2}), None).await.unwrap();

        assert_eq!(rx.recv().await, Some(json!({"n": 1})));
        assert_eq!(rx.recv().await, Some(json!({"n": 2})));
    }

    #[tokio::test]
    async fn garbage_lines_are_skipped() {
        let (left, right) = tokio::io::duplex(4096);
        let (_left_read, mut left_write) = tokio::io::split(left);
        let (right_read, right_write) = tokio::io::split(right);
        let b = StreamTransport::new(right_read, right_write).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = b.listen(Arc::new(move |msg: &Value| {
            let _ = tx.send(msg.clone());
        }));

        left_write.write_all(b"not json\n\n[1,2]\n").await.unwrap();
        assert_eq!(rx.recv().await, Some(json!([1, 2])));
    }

    #[tokio::test]
    async fn invalid_utf8_line_does_not_stop_reading() {
        let (left, right) = tokio::io::duplex(4096);
        let (_left_read, mut left_write) = tokio::io::split(left);
        let (right_read, right_write) = tokio::io::split(right);
        let b = StreamTransport::new(right_read, right_write).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = b.listen(Arc::new(move |msg: &Value| {
            let _ = tx.send(msg.clone());
        }));

        left_write.write_all(b"\xff\xfe garbage\n[1,2]\n").await.unwrap();
        assert_eq!(rx.recv().await, Some(json!([1, 2])));
        assert!(!b.is_closed());
    }

    #[tokio::test]
    async fn closed_resolves_at_end_of_input() {
        let (left, right) = tokio::io::duplex(4096);
        let (right_read, right_write) = tokio::io::split(right);
        let b = StreamTransport::new(right_read, right_write).unwrap();

        drop(left);
        tokio::time::timeout(std::time::Duration::from_secs(1), b.closed())
            .await
            .unwrap();
        assert!(*b.closed.borrow());
    }
}
