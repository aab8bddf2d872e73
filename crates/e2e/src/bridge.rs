//! Task bridge: one-way messages from step execution to the host console
//!
//! Senders enqueue a named task and wait for the host to acknowledge it. The
//! host handles each task (for `log`: print it) before acknowledging, so
//! messages reach the console in enqueue order and before anything the
//! sender does next.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{E2eError, E2eResult};

pub const LOG_TASK: &str = "log";

/// Default queue depth
pub const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub seq: u64,
    pub name: String,
    pub payload: Value,
    pub sent_at: DateTime<Utc>,
}

impl TaskMessage {
    /// Payload as printed on the console
    pub fn text(&self) -> String {
        match &self.payload {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

struct TaskRequest {
    message: TaskMessage,
    ack: oneshot::Sender<E2eResult<Value>>,
}

pub type TaskHandler = Box<dyn Fn(&TaskMessage) -> E2eResult<Value> + Send + Sync>;

/// Sending side, cheap to clone
#[derive(Clone)]
pub struct TaskBridge {
    tx: mpsc::Sender<TaskRequest>,
    seq: Arc<AtomicU64>,
    timeout: Duration,
}

impl TaskBridge {
    /// Enqueue a task and wait for the host's acknowledgement
    pub async fn send(&self, name: &str, payload: Value) -> E2eResult<Value> {
        let message = TaskMessage {
            seq: self.seq.fetch_add(1, Ordering::SeqCst) + 1,
            name: name.to_string(),
            payload,
            sent_at: Utc::now(),
        };
        debug!("task #{} '{}' enqueued", message.seq, message.name);

        let (ack, ack_rx) = oneshot::channel();
        let delivery = async {
            self.tx
                .send(TaskRequest { message, ack })
                .await
                .map_err(|_| E2eError::BridgeClosed)?;
            ack_rx.await.map_err(|_| E2eError::BridgeClosed)?
        };

        match tokio::time::timeout(self.timeout, delivery).await {
            Ok(result) => result,
            Err(_) => Err(E2eError::TaskTimeout {
                name: name.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    pub async fn log(&self, message: &str) -> E2eResult<()> {
        self.send(LOG_TASK, Value::String(message.to_string())).await?;
        Ok(())
    }
}

/// Receiving side; owns the handlers and the transcript of delivered messages
pub struct TaskHost {
    rx: mpsc::Receiver<TaskRequest>,
    handlers: HashMap<String, TaskHandler>,
    /// Console sink for `log` messages
    console: Option<Box<dyn Write + Send>>,
}

/// Create a bridge/host pair with the built-in `log` handler registered
pub fn channel(capacity: usize, timeout: Duration) -> (TaskBridge, TaskHost) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let bridge = TaskBridge {
        tx,
        seq: Arc::new(AtomicU64::new(0)),
        timeout,
    };
    let mut host = TaskHost {
        rx,
        handlers: HashMap::new(),
        console: Some(Box::new(std::io::stdout())),
    };
    host.register(LOG_TASK, |_| Ok(Value::Null));
    (bridge, host)
}

impl TaskHost {
    pub fn register<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&TaskMessage) -> E2eResult<Value> + Send + Sync + 'static,
    {
        self.handlers.insert(name.to_string(), Box::new(handler));
    }

    /// Print `log` messages to stdout (on by default)
    pub fn echo(mut self, echo: bool) -> Self {
        self.console = if echo {
            Some(Box::new(std::io::stdout()))
        } else {
            None
        };
        self
    }

    /// Print `log` messages to `sink` instead of stdout
    pub fn echo_to<W: Write + Send + 'static>(mut self, sink: W) -> Self {
        self.console = Some(Box::new(sink));
        self
    }

    pub fn spawn(self) -> TaskHostHandle {
        TaskHostHandle {
            join: tokio::spawn(self.run()),
        }
    }

    /// Serve until every bridge is dropped; returns the delivered messages in order
    pub async fn run(mut self) -> Vec<TaskMessage> {
        let mut transcript = Vec::new();

        while let Some(TaskRequest { message, ack }) = self.rx.recv().await {
            let result = match self.handlers.get(&message.name) {
                Some(handler) => {
                    if message.name == LOG_TASK {
                        if let Some(console) = self.console.as_mut() {
                            if let Err(e) = writeln!(console, "{}", message.text()).and_then(|_| console.flush()) {
                                warn!("Cannot print task #{}: {}", message.seq, e);
                            }
                        }
                        debug!(task = %message.name, seq = message.seq, "delivered");
                    }
                    handler(&message)
                }
                None => {
                    warn!("Task '{}' has no handler", message.name);
                    Err(E2eError::TaskNotHandled(message.name.clone()))
                }
            };
            if result.is_ok() {
                transcript.push(message);
            }
            // Sender may have timed out already
            let _ = ack.send(result);
        }

        transcript
    }
}

pub struct TaskHostHandle {
    join: JoinHandle<Vec<TaskMessage>>,
}

impl TaskHostHandle {
    /// Wait for the host to drain; every bridge clone must be dropped first
    pub async fn finish(self) -> E2eResult<Vec<TaskMessage>> {
        self.join
            .await
            .map_err(|e| E2eError::RunnerFatal(format!("task host panicked: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_messages_delivered_in_order() {
        let (bridge, host) = channel(4, Duration::from_secs(1));
        let handle = host.echo(false).spawn();

        for i in 0..10 {
            bridge.log(&format!("message {}", i)).await.unwrap();
        }
        drop(bridge);

        let transcript = handle.finish().await.unwrap();
        assert_eq!(transcript.len(), 10);
        for (i, message) in transcript.iter().enumerate() {
            assert_eq!(message.seq, i as u64 + 1);
            assert_eq!(message.text(), format!("message {}", i));
        }
    }

    #[derive(Clone, Default)]
    struct Console(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl Write for Console {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_log_printed_once_per_message() {
        let console = Console::default();
        let (bridge, host) = channel(4, Duration::from_secs(1));
        let handle = host.echo_to(console.clone()).spawn();

        bridge.log("🚀 Starting all test suites").await.unwrap();
        bridge.log("🏁 All test suites completed").await.unwrap();
        drop(bridge);
        handle.finish().await.unwrap();

        let printed = String::from_utf8(console.0.lock().clone()).unwrap();
        assert_eq!(printed, "🚀 Starting all test suites\n🏁 All test suites completed\n");
    }

    #[tokio::test]
    async fn test_unknown_task_is_rejected() {
        let (bridge, host) = channel(4, Duration::from_secs(1));
        let handle = host.echo(false).spawn();

        let err = bridge.send("seedDatabase", Value::Null).await.unwrap_err();
        assert!(matches!(err, E2eError::TaskNotHandled(ref name) if name == "seedDatabase"));
        drop(bridge);
        assert!(handle.finish().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_custom_handler_result_returned() {
        let (bridge, mut host) = channel(4, Duration::from_secs(1));
        host.register("double", |m| {
            let n = m.payload.as_u64().unwrap_or(0);
            Ok(Value::from(n * 2))
        });
        let handle = host.spawn();

        assert_eq!(bridge.send("double", Value::from(21)).await.unwrap(), Value::from(42));
        drop(bridge);
        handle.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_without_host_times_out() {
        let (bridge, _host) = channel(1, Duration::from_millis(30));
        let err = bridge.log("nobody listening").await.unwrap_err();
        assert!(matches!(err, E2eError::TaskTimeout { .. }));
    }

    #[tokio::test]
    async fn test_send_after_host_dropped_is_closed() {
        let (bridge, host) = channel(1, Duration::from_secs(1));
        drop(host);
        let err = bridge.log("gone").await.unwrap_err();
        assert!(matches!(err, E2eError::BridgeClosed));
    }
}
