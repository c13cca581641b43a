// Edit queue and batch flush.
//
// Local edits accumulate in the document's `cmd_queue` and leave as one
// `work_batch`. The flush drains the queue synchronously; `is_locked` stays
// set until that batch has been handed to the transport, and a flush
// requested in the meantime is refused rather than sent out of order.

use annolab_common::protocol::outbound::{BatchOption, ClientRequest, WorkBatch};
use annolab_common::types::{batch_identifier, Command, FeatureMap};
use tracing::debug;

use crate::client::AnnoClient;
use crate::connection::{Connector, SendReceipt};
use crate::store::DocumentHandle;

/// Result of [`AnnoClient::flush`].
#[derive(Debug)]
pub enum FlushOutcome {
    /// A batch was drained; the receipt resolves once it is on the wire.
    Sent(SendReceipt),
    /// The previous batch is not on the wire yet; nothing was drained.
    Busy,
}

impl FlushOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent(_))
    }
}

impl<C: Connector> AnnoClient<C> {
    /// Queue creation of a `type_name` annotation. Returns its batch id,
    /// usable as an address by later commands of the same batch.
    pub fn enqueue_create(&self, doc: &DocumentHandle, type_name: &str, features: FeatureMap) -> String {
        enqueue(doc, |bid| Command::Create { bid, type_name: type_name.to_owned(), features })
    }

    pub fn enqueue_edit(&self, doc: &DocumentHandle, addr: &str, features: FeatureMap) -> String {
        enqueue(doc, |bid| Command::Edit { bid, addr: addr.to_owned(), features })
    }

    pub fn enqueue_remove(&self, doc: &DocumentHandle, addr: &str) -> String {
        enqueue(doc, |bid| Command::Remove { bid, addr: addr.to_owned() })
    }

    /// Append `feature_addr` to the array feature `feature_name` of `addr`.
    pub fn enqueue_append(
        &self,
        doc: &DocumentHandle,
        addr: &str,
        feature_name: &str,
        feature_addr: &str,
    ) -> String {
        enqueue(doc, |bid| Command::AppendArray {
            bid,
            addr: addr.to_owned(),
            feature_name: feature_name.to_owned(),
            feature_addr: feature_addr.to_owned(),
        })
    }

    pub fn enqueue_recommendation(&self, doc: &DocumentHandle, addr: &str, decision: &str) -> String {
        enqueue(doc, |bid| Command::Recommendation {
            bid,
            addr: addr.to_owned(),
            recommendation_decision: decision.to_owned(),
        })
    }

    /// Drain the queue into one `work_batch` and submit it.
    ///
    /// The queue is empty when this returns. An empty queue still produces
    /// a batch. Must be called within a tokio runtime: when no session is
    /// ready the lock is released by a task once the batch goes out.
    pub fn flush(&self, doc: &DocumentHandle) -> FlushOutcome {
        let batch = doc.update(|d| {
            if d.is_locked {
                return None;
            }
            d.is_locked = true;
            Some(WorkBatch {
                cas_id: d.id.clone(),
                tool_name: d.current_tool.clone(),
                view: d.current_view().map(str::to_owned),
                perspective: d.perspective.clone(),
                queue: std::mem::take(&mut d.cmd_queue),
                options: vec![BatchOption { private_session: d.private_session }],
            })
        });
        let Some(batch) = batch else {
            debug!(cas_id = %doc.id(), "flush refused while the previous batch is pending");
            return FlushOutcome::Busy;
        };

        let commands = batch.queue.len();
        let mut receipt = self.submit(ClientRequest::WorkBatch(batch));
        if let Some(result) = receipt.try_delivered() {
            doc.update(|d| d.is_locked = false);
            debug!(cas_id = %doc.id(), commands, "batch sent");
            return FlushOutcome::Sent(SendReceipt::resolved(result));
        }

        debug!(cas_id = %doc.id(), commands, "batch waiting for session");
        let (relay, outcome) = SendReceipt::pending();
        let doc = doc.clone();
        tokio::spawn(async move {
            let result = receipt.delivered().await;
            doc.update(|d| d.is_locked = false);
            let _ = relay.send(result);
        });
        FlushOutcome::Sent(outcome)
    }
}

fn enqueue(doc: &DocumentHandle, command: impl FnOnce(String) -> Command) -> String {
    doc.update(|d| {
        let bid = batch_identifier(d.cmd_queue.len());
        d.cmd_queue.push(command(bid.clone()));
        bid
    })
}
