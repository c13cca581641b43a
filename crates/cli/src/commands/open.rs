// `annolab open`: open a document into the user's view and summarize it.

use std::collections::BTreeMap;

use annolab_client::flows::{form_values, DocumentFlow, FormValues};
use annolab_client::Document;
use annolab_common::types::FeatureMap;
use clap::Args;
use serde::Serialize;
use serde_json::Value;

use crate::output;
use crate::session::{self, GlobalArgs};

#[derive(Debug, Args)]
pub struct OpenArgs {
    /// Document (CAS) id.
    pub cas_id: String,

    /// Tool to open once the view is bound (default from config).
    #[arg(long)]
    pub tool: Option<String>,

    /// List the annotations of this type (full or last dotted segment).
    #[arg(long = "type")]
    pub type_name: Option<String>,
}

/// One annotation as listed by `--type`.
#[derive(Debug, Clone, Serialize)]
pub struct EntryView {
    pub addr: String,
    pub covered_text: Option<String>,
    pub features: FeatureMap,
}

/// What the CLI reports about an open document.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub cas_id: String,
    pub name: String,
    pub text_length: usize,
    pub view: Option<String>,
    pub view_name: Option<String>,
    pub tool: Option<String>,
    pub permission: i64,
    /// Annotation type -> count under the current tool.
    pub annotations: BTreeMap<String, usize>,
    pub form: FormValues,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<EntryView>,
}

impl DocumentSummary {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            cas_id: doc.id.clone(),
            name: doc.name.clone(),
            text_length: doc.text_len(),
            view: doc.current_view().map(str::to_owned),
            view_name: doc.current_view_name.clone(),
            tool: doc.current_tool.clone(),
            permission: doc.permission,
            annotations: doc
                .tool_elements
                .iter()
                .filter(|(_, entries)| !entries.is_empty())
                .map(|(type_name, entries)| (type_name.clone(), entries.len()))
                .collect(),
            form: form_values(doc),
            entries: Vec::new(),
        }
    }
}

/// Annotations whose type is `type_name` or ends in `.type_name`.
pub fn entries_of(doc: &Document, type_name: &str) -> Vec<EntryView> {
    let suffix = format!(".{type_name}");
    doc.tool_elements
        .iter()
        .filter(|(name, _)| *name == type_name || name.ends_with(&suffix))
        .flat_map(|(_, entries)| entries.iter())
        .map(|(addr, entry)| EntryView {
            addr: addr.clone(),
            covered_text: doc.covered_text(entry),
            features: entry.features.clone(),
        })
        .collect()
}

pub fn run(args: OpenArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let config = global.load_config()?;
    let summary = session::block_on(open(config, args, global))??;
    output::print_output(global.format(), &summary, format_human)?;
    Ok(())
}

async fn open(
    config: annolab_client::ClientConfig,
    args: OpenArgs,
    global: &GlobalArgs,
) -> anyhow::Result<DocumentSummary> {
    let tool = args.tool.unwrap_or_else(|| config.tools.default_tool.clone());
    let client = session::connect(config, global).await?;
    let user = session::user_name(&client)?;

    let flow = DocumentFlow::start(&client, &args.cas_id, &user, &tool);
    let doc = session::within(global.timeout(), "the document to open", flow.wait_ready()).await??;
    let summary = doc.read(|d| {
        let mut summary = DocumentSummary::from_document(d);
        if let Some(type_name) = &args.type_name {
            summary.entries = entries_of(d, type_name);
        }
        summary
    });

    flow.stop();
    client.disconnect();
    Ok(summary)
}

pub fn format_human(summary: &DocumentSummary) -> String {
    let mut lines = vec![format!("{} ({})", summary.name, summary.cas_id)];
    lines.push(format!("  {} characters, permission {}", summary.text_length, summary.permission));
    if let Some(view) = &summary.view {
        match &summary.view_name {
            Some(name) if name != view => lines.push(format!("  View: {name} ({view})")),
            _ => lines.push(format!("  View: {view}")),
        }
    }
    if let Some(tool) = &summary.tool {
        lines.push(format!("  Tool: {tool}"));
    }

    if summary.annotations.is_empty() {
        lines.push("  No annotations.".into());
    } else {
        lines.push(format!("  Annotations ({})", summary.annotations.values().sum::<usize>()));
        for (type_name, count) in &summary.annotations {
            lines.push(format!("    {count:>5}  {}", short_type(type_name)));
        }
    }

    for entry in &summary.entries {
        let text = entry.covered_text.as_deref().unwrap_or("");
        lines.push(format!("    [{}] \"{text}\" {}", entry.addr, Value::Object(entry.features.clone())));
    }

    if !summary.form.is_empty() {
        lines.push("  Form".into());
        for (key, field) in &summary.form {
            lines.push(format!("    {key} = {}", field.value));
        }
    }
    lines.join("\n")
}

/// Last segment of a dotted UIMA type name.
fn short_type(type_name: &str) -> &str {
    type_name.rsplit('.').next().unwrap_or(type_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{write_output, OutputFormat};
    use annolab_client::flows::FormValue;
    use annolab_common::types::FeatureStructure;

    fn sample() -> DocumentSummary {
        let mut form = FormValues::new();
        form.insert("mood".into(), FormValue::new("calm"));
        DocumentSummary {
            cas_id: "42".into(),
            name: "letter.xmi".into(),
            text_length: 11,
            view: Some("https://authority.hucompute.org/user/1".into()),
            view_name: Some("ada".into()),
            tool: Some("Time".into()),
            permission: 2,
            annotations: BTreeMap::from([(
                "org.texttechnologylab.annotation.core.Category".to_string(),
                3,
            )]),
            form,
            entries: Vec::new(),
        }
    }

    #[test]
    fn human_format_lists_view_tool_and_form() {
        let output = format_human(&sample());
        assert!(output.starts_with("letter.xmi (42)"));
        assert!(output.contains("View: ada (https://authority.hucompute.org/user/1)"));
        assert!(output.contains("Tool: Time"));
        assert!(output.contains("3  Category"));
        assert!(output.contains("mood = calm"));
    }

    #[test]
    fn human_format_without_annotations() {
        let mut summary = sample();
        summary.annotations.clear();
        summary.form.clear();
        let output = format_human(&summary);
        assert!(output.contains("No annotations."));
        assert!(!output.contains("Form"));
    }

    #[test]
    fn json_format_keeps_form_shape() {
        let mut buf = Vec::new();
        write_output(&mut buf, OutputFormat::Json, &sample(), format_human).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(parsed["cas_id"], "42");
        assert_eq!(parsed["form"]["mood"]["value"], "calm");
        assert_eq!(parsed["form"]["mood"]["type"], "org.texttechnologylab.annotation.core.Category");
    }

    #[test]
    fn entries_match_full_or_short_type_names() {
        let mut doc = Document::new("42").with_text("Hello world");
        let features = serde_json::json!({"begin": 0, "end": 5, "value": "calm"});
        let entry = FeatureStructure::with_features(features.as_object().cloned().unwrap_or_default());
        doc.tool_elements
            .entry("org.texttechnologylab.annotation.core.Category".into())
            .or_default()
            .insert("7".into(), entry);

        let by_short = entries_of(&doc, "Category");
        let by_full = entries_of(&doc, "org.texttechnologylab.annotation.core.Category");
        assert_eq!(by_short.len(), 1);
        assert_eq!(by_full.len(), 1);
        assert!(entries_of(&doc, "Time").is_empty());
        assert_eq!(by_short[0].covered_text.as_deref(), Some("Hello"));

        let mut summary = sample();
        summary.entries = by_short;
        let output = format_human(&summary);
        assert!(output.contains("[7] \"Hello\""));
    }

    #[test]
    fn summary_counts_non_empty_types() {
        let doc = Document::new("42").with_text("Hello");
        let summary = DocumentSummary::from_document(&doc);
        assert_eq!(summary.text_length, 5);
        assert!(summary.annotations.is_empty());
        assert!(summary.view.is_none());
    }
}
