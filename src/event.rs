use color_eyre::{eyre::eyre, Result};
use tokio::sync::{mpsc, oneshot};

use crate::cache::{FetchRequest, ServeResult};
use crate::control::ControlReply;

/// Events delivered to the worker loop.
#[derive(Debug)]
pub enum WorkerEvent {
  /// An intercepted request; the serve result goes back on the reply channel
  Fetch {
    request: FetchRequest,
    reply: oneshot::Sender<Result<ServeResult>>,
  },
  /// An inbound control message with an optional reply channel
  Message {
    command: String,
    reply: Option<oneshot::Sender<ControlReply>>,
  },
  /// A background-sync trigger
  Sync { tag: String },
}

/// Create the worker event channel.
pub fn channel() -> (WorkerHandle, mpsc::UnboundedReceiver<WorkerEvent>) {
  let (tx, rx) = mpsc::unbounded_channel();
  (WorkerHandle { tx }, rx)
}

/// Clonable sender half used by page contexts and the CLI.
#[derive(Clone)]
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl WorkerHandle {
  /// Route a request through the worker and wait for its response.
  pub async fn fetch(&self, request: FetchRequest) -> Result<ServeResult> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(WorkerEvent::Fetch { request, reply })
      .map_err(|_| eyre!("Worker is gone"))?;

    rx.await.map_err(|_| eyre!("Worker dropped the request"))?
  }

  /// Send a control command and wait for a reply.
  ///
  /// Returns None when the worker sends nothing back, as happens for
  /// SKIP_WAITING and for unknown commands.
  pub async fn request(&self, command: &str) -> Result<Option<ControlReply>> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(WorkerEvent::Message {
        command: command.to_string(),
        reply: Some(reply),
      })
      .map_err(|_| eyre!("Worker is gone"))?;

    Ok(rx.await.ok())
  }

  /// Send a control command without waiting for any reply.
  #[allow(dead_code)]
  pub fn notify(&self, command: &str) -> Result<()> {
    self
      .tx
      .send(WorkerEvent::Message {
        command: command.to_string(),
        reply: None,
      })
      .map_err(|_| eyre!("Worker is gone"))
  }

  /// Fire a background-sync trigger.
  pub fn sync(&self, tag: &str) -> Result<()> {
    self
      .tx
      .send(WorkerEvent::Sync {
        tag: tag.to_string(),
      })
      .map_err(|_| eyre!("Worker is gone"))
  }
}
