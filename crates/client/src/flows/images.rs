// Image pager: pages a tool's image annotations in with open_tool_seg.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use annolab_common::protocol::cmd;
use annolab_common::types::FeatureStructure;
use serde_json::Value;
use tokio::sync::watch;

use super::{message_cas_id, FlowError};
use crate::client::AnnoClient;
use crate::connection::{Connector, SendReceipt, WsConnector};
use crate::document::Document;

/// Comment key holding the base64 image itself.
pub const IMAGE_KEY: &str = "core_image_image/png";
/// Comment key giving an image's position; `reference` names the image address.
pub const IMAGE_INDEX_KEY: &str = "core_image_index";

/// Requests one tool page at a time and tracks when the last page arrived.
pub struct ImagePager<C: Connector = WsConnector> {
    client: AnnoClient<C>,
    cas_id: String,
    tool: String,
    image_type: String,
    page_size: u32,
    next_page: u32,
    reached_end: Arc<AtomicBool>,
    pages: watch::Receiver<u64>,
}

impl<C: Connector> ImagePager<C> {
    /// Listens under group `images<cas_id>`; the document must already be open.
    pub fn new(client: &AnnoClient<C>, cas_id: &str, tool: &str, image_type: &str, page_size: u32) -> Self {
        let group = format!("images{cas_id}");
        client.registry().clear_group(&group);

        let reached_end = Arc::new(AtomicBool::new(false));
        let (pages_tx, pages) = watch::channel(0u64);
        let pages_tx = Arc::new(pages_tx);

        for message_type in [cmd::OPEN_TOOL, cmd::OPEN_TOOL_SEG] {
            let id = cas_id.to_owned();
            let image_type = image_type.to_owned();
            let reached_end = reached_end.clone();
            let pages_tx = pages_tx.clone();
            let _ = client.subscribe(message_type, &group, move |message| {
                if message_cas_id(message).as_deref() != Some(id.as_str()) {
                    return;
                }
                let delivered = message
                    .pointer("/data/toolElements")
                    .and_then(|elements| elements.get(&image_type))
                    .and_then(Value::as_object)
                    .map_or(0, |entries| entries.len());
                if delivered < page_size as usize {
                    reached_end.store(true, Ordering::SeqCst);
                }
                pages_tx.send_modify(|n| *n += 1);
            });
        }

        Self {
            client: client.clone(),
            cas_id: cas_id.to_owned(),
            tool: tool.to_owned(),
            image_type: image_type.to_owned(),
            page_size,
            next_page: 1,
            reached_end,
            pages,
        }
    }

    pub fn reached_end(&self) -> bool {
        self.reached_end.load(Ordering::SeqCst)
    }

    /// Request the next page. `None` once the last page has arrived.
    pub fn request_next(&mut self) -> Result<Option<SendReceipt>, FlowError> {
        if self.reached_end() {
            return Ok(None);
        }
        let doc = self
            .client
            .document(&self.cas_id)
            .ok_or_else(|| FlowError::DocumentMissing(self.cas_id.clone()))?;
        let receipt = self.client.open_tool_segment(&doc, &self.tool, self.next_page, Some(self.page_size));
        self.next_page += 1;
        Ok(Some(receipt))
    }

    /// Wait for the next tool or page reply.
    pub async fn wait_page(&mut self) -> Result<(), FlowError> {
        self.pages.changed().await.map_err(|_| FlowError::Abandoned)
    }

    /// Images delivered so far, in index order.
    pub fn images(&self) -> Vec<FeatureStructure> {
        self.client.document(&self.cas_id).map(|doc| doc.read(|d| ordered_images(d, &self.image_type))).unwrap_or_default()
    }
}

/// Image comments of `image_type`, ordered by their `core_image_index`
/// comment. Images without an index come last.
pub fn ordered_images(doc: &Document, image_type: &str) -> Vec<FeatureStructure> {
    let Some(entries) = doc.tool_elements.get(image_type) else {
        return Vec::new();
    };
    let indices: HashMap<String, u64> = entries
        .values()
        .filter(|entry| entry.feature_str("key").as_deref() == Some(IMAGE_INDEX_KEY))
        .filter_map(|entry| {
            let reference = entry.feature_str("reference")?;
            let index = entry.feature_str("value")?.trim().parse().ok()?;
            Some((reference, index))
        })
        .collect();

    let mut images: Vec<(u64, FeatureStructure)> = entries
        .iter()
        .filter(|(_, entry)| entry.feature_str("key").as_deref() == Some(IMAGE_KEY))
        .map(|(addr, entry)| {
            let addr = entry.address().unwrap_or_else(|| addr.clone());
            (indices.get(&addr).copied().unwrap_or(u64::MAX), entry.clone())
        })
        .collect();
    images.sort_by_key(|(index, _)| *index);
    images.into_iter().map(|(_, entry)| entry).collect()
}
