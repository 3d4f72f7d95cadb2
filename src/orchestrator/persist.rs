use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Result, TendrilError};
use crate::store::MessageStore;
use crate::types::{ContentBlock, MessageContent};

enum WriteOp {
    Snapshot(Vec<ContentBlock>),
    Final {
        blocks: Vec<ContentBlock>,
        mark_complete: bool,
        ack: oneshot::Sender<Result<()>>,
    },
}

/// Per-run background writer.
///
/// Snapshots are written in order but coalesced: if several are queued only
/// the newest is stored. The final write is acknowledged to the caller.
pub(crate) struct PersistWriter {
    tx: mpsc::UnboundedSender<WriteOp>,
    task: JoinHandle<()>,
}

impl PersistWriter {
    pub(crate) fn spawn(store: Arc<dyn MessageStore>, message_id: String) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(write_loop(store, message_id, rx));
        Self { tx, task }
    }

    pub(crate) fn snapshot(&self, blocks: Vec<ContentBlock>) {
        // A closed channel means the writer is gone; the final write reports it.
        let _ = self.tx.send(WriteOp::Snapshot(blocks));
    }

    /// Queue the terminal write behind pending snapshots and wait for it.
    pub(crate) async fn finish(self, blocks: Vec<ContentBlock>, mark_complete: bool) -> Result<()> {
        let (ack, done) = oneshot::channel();
        let sent = self.tx.send(WriteOp::Final {
            blocks,
            mark_complete,
            ack,
        });
        drop(self.tx);
        let result = match sent {
            Ok(()) => done
                .await
                .unwrap_or_else(|_| Err(TendrilError::Storage("persistence writer stopped".into()))),
            Err(_) => Err(TendrilError::Storage("persistence writer stopped".into())),
        };
        let _ = self.task.await;
        result
    }
}

async fn write_loop(
    store: Arc<dyn MessageStore>,
    message_id: String,
    mut rx: mpsc::UnboundedReceiver<WriteOp>,
) {
    while let Some(mut op) = rx.recv().await {
        while let WriteOp::Snapshot(_) = op {
            match rx.try_recv() {
                Ok(next) => op = next,
                Err(_) => break,
            }
        }
        match op {
            WriteOp::Snapshot(blocks) => {
                if let Err(err) = store
                    .update_content(&message_id, MessageContent::Blocks(blocks))
                    .await
                {
                    tracing::warn!(message_id = %message_id, error = %err, "snapshot write failed");
                }
            }
            WriteOp::Final {
                blocks,
                mark_complete,
                ack,
            } => {
                let result = write_final(store.as_ref(), &message_id, blocks, mark_complete).await;
                if let Err(err) = &result {
                    tracing::warn!(message_id = %message_id, error = %err, "final write failed");
                }
                let _ = ack.send(result);
                return;
            }
        }
    }
}

async fn write_final(
    store: &dyn MessageStore,
    message_id: &str,
    blocks: Vec<ContentBlock>,
    mark_complete: bool,
) -> Result<()> {
    store
        .update_content(message_id, MessageContent::Blocks(blocks))
        .await?;
    if mark_complete && !store.mark_complete(message_id).await? {
        tracing::debug!(message_id = %message_id, "message already complete");
    }
    Ok(())
}
