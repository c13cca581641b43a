// `annolab images`: page a document's image annotations in and list them.

use annolab_client::flows::images::IMAGE_KEY;
use annolab_client::flows::ImagePager;
use annolab_common::protocol::cmd;
use anyhow::Context;
use clap::Args;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::output;
use crate::session::{self, GlobalArgs};

#[derive(Debug, Args)]
pub struct ImagesArgs {
    /// Document (CAS) id.
    pub cas_id: String,

    /// Tool whose segments carry the images.
    #[arg(long, default_value = "Image")]
    pub tool: String,

    /// Annotations per page (default from config).
    #[arg(long)]
    pub page_size: Option<u32>,

    /// Stop after this many pages.
    #[arg(long)]
    pub pages: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageInfo {
    pub addr: Option<String>,
    /// Length of the encoded image payload.
    pub encoded_len: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImagesResult {
    pub cas_id: String,
    pub pages: u32,
    /// Whether the last page was reached.
    pub complete: bool,
    pub images: Vec<ImageInfo>,
}

pub fn run(args: ImagesArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let config = global.load_config()?;
    let result = session::block_on(images(config, args, global))??;
    output::print_output(global.format(), &result, format_human)?;
    Ok(())
}

async fn images(
    config: annolab_client::ClientConfig,
    args: ImagesArgs,
    global: &GlobalArgs,
) -> anyhow::Result<ImagesResult> {
    let page_size = args.page_size.unwrap_or(config.tools.page_size).max(1);
    let image_type = config.tools.image_type.clone();
    let client = session::connect(config, global).await?;

    let (opened_tx, mut opened) = mpsc::unbounded_channel();
    let group = format!("open{}", args.cas_id);
    let cas_id = args.cas_id.clone();
    let _ = client.subscribe(cmd::OPEN_CAS, &group, move |message| {
        if session::concerns_document(message, &cas_id) {
            let _ = opened_tx.send(());
        }
    });
    client.open_document(&args.cas_id);
    session::within(global.timeout(), "the document to open", opened.recv())
        .await?
        .context("open listener was removed")?;
    client.registry().clear_group(&group);

    let mut pager = ImagePager::new(&client, &args.cas_id, &args.tool, &image_type, page_size);
    let mut pages = 0;
    while args.pages.is_none_or(|max| pages < max) {
        if pager.request_next()?.is_none() {
            break;
        }
        session::within(global.timeout(), "the next image page", pager.wait_page()).await??;
        pages += 1;
    }

    let images = pager
        .images()
        .iter()
        .map(|image| ImageInfo {
            addr: image.address(),
            encoded_len: image.feature_str("value").map_or(0, |value| value.len()),
        })
        .collect();
    let complete = pager.reached_end();
    client.disconnect();

    Ok(ImagesResult { cas_id: args.cas_id, pages, complete, images })
}

fn format_human(result: &ImagesResult) -> String {
    let mut lines = vec![format!(
        "{} images in {} ({} pages{})",
        result.images.len(),
        result.cas_id,
        result.pages,
        if result.complete { "" } else { ", more available" }
    )];
    for (index, image) in result.images.iter().enumerate() {
        let addr = image.addr.as_deref().unwrap_or("?");
        lines.push(format!("  {:>3}. {addr} ({} bytes {IMAGE_KEY})", index + 1, image.encoded_len));
    }
    lines.join("\n")
}
