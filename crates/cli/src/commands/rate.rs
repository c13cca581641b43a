// `annolab rate`: write rating form fields and wait for the service to apply them.

use annolab_client::flows::{form_values, DocumentFlow, FormValue, FormValues};
use annolab_client::FlushOutcome;
use annolab_common::protocol::cmd;
use anyhow::{bail, Context};
use clap::Args;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::output;
use crate::session::{self, GlobalArgs};

#[derive(Debug, Args)]
pub struct RateArgs {
    /// Document (CAS) id.
    pub cas_id: String,

    /// Fields to set, as `key=value`.
    #[arg(value_parser = parse_field, required = true)]
    pub fields: Vec<(String, String)>,

    /// Tool to open once the view is bound (default from config).
    #[arg(long)]
    pub tool: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateResult {
    pub cas_id: String,
    /// Field names written by this run.
    pub submitted: Vec<String>,
    /// Form as stored after the service applied the batch.
    pub form: FormValues,
}

pub fn run(args: RateArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let config = global.load_config()?;
    let result = session::block_on(rate(config, args, global))??;
    output::print_output(global.format(), &result, format_human)?;
    Ok(())
}

async fn rate(
    config: annolab_client::ClientConfig,
    args: RateArgs,
    global: &GlobalArgs,
) -> anyhow::Result<RateResult> {
    let tool = args.tool.unwrap_or_else(|| config.tools.default_tool.clone());
    let client = session::connect(config, global).await?;
    let user = session::user_name(&client)?;

    let flow = DocumentFlow::start(&client, &args.cas_id, &user, &tool);
    session::within(global.timeout(), "the document to open", flow.wait_ready()).await??;

    let (changed_tx, mut changed) = mpsc::unbounded_channel();
    let group = format!("rate{}", args.cas_id);
    let cas_id = args.cas_id.clone();
    let _ = client.subscribe(cmd::CHANGE_CAS, &group, move |message| {
        if session::concerns_document(message, &cas_id) {
            let _ = changed_tx.send(());
        }
    });

    let values = apply_fields(flow.form_values()?, &args.fields);
    let FlushOutcome::Sent(receipt) = flow.submit_form(&values)? else {
        bail!("a previous batch for document {} is still being sent", args.cas_id);
    };
    receipt.delivered().await.context("the rating batch was not sent")?;
    session::within(global.timeout(), "the service to apply the ratings", changed.recv())
        .await?
        .context("change listener was removed")?;

    let form = flow.document()?.read(form_values);
    client.registry().clear_group(&group);
    flow.stop();
    client.disconnect();

    Ok(RateResult {
        cas_id: args.cas_id,
        submitted: args.fields.into_iter().map(|(key, _)| key).collect(),
        form,
    })
}

/// Overlay `key=value` pairs on the stored form. Existing fields keep their
/// address so they are edited rather than duplicated.
fn apply_fields(mut values: FormValues, fields: &[(String, String)]) -> FormValues {
    for (key, value) in fields {
        values.entry(key.clone()).or_insert_with(|| FormValue::new("")).value = value.clone();
    }
    values
}

fn parse_field(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw.split_once('=').ok_or_else(|| format!("expected key=value, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty field name in `{raw}`"));
    }
    Ok((key.to_owned(), value.to_owned()))
}

fn format_human(result: &RateResult) -> String {
    let mut lines = vec![format!("Rated {} ({} fields)", result.cas_id, result.submitted.len())];
    for (key, field) in &result.form {
        let marker = if result.submitted.contains(key) { "*" } else { " " };
        lines.push(format!("  {marker} {key} = {}", field.value));
    }
    lines.join("\n")
}
