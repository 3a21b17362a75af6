//! Per-format rendering of worked examples and call replays.
//!
//! The wire protocol itself (start/arg/end markers, slash-separated paths)
//! never changes — §6 requires it bit-exact. What varies by encoding is how
//! a leaf *value* is written inside an arg block: as a bare string
//! ("block", the default), or wrapped as a single-value JSON/YAML/TOML/XML
//! literal, for models more comfortable emitting one of those formats for
//! structured values. One encoding is selected globally for a run, per
//! spec §4.C.

use crate::config::MarkerConfig;
use crate::markers::ParameterTree;
use crate::parser::GadgetCall;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterEncoding {
    Block,
    Json,
    Yaml,
    Toml,
    Xml,
}

fn render_value(value: &str, encoding: ParameterEncoding) -> String {
    match encoding {
        ParameterEncoding::Block => value.to_string(),
        ParameterEncoding::Json => serde_json::to_string(value).unwrap_or_else(|_| value.to_string()),
        ParameterEncoding::Yaml => format!("\"{}\"", value.replace('"', "\\\"")),
        ParameterEncoding::Toml => format!("\"{}\"", value.replace('"', "\\\"")),
        ParameterEncoding::Xml => format!("<value>{}</value>", value.replace('&', "&amp;").replace('<', "&lt;")),
    }
}

fn render_block(
    markers: &MarkerConfig,
    name: &str,
    invocation_id: Option<&str>,
    dependencies: &[String],
    pairs: &[(String, String)],
    encoding: ParameterEncoding,
) -> String {
    let mut header = format!("{}{}", markers.start_prefix, name);
    if let Some(id) = invocation_id {
        header.push(':');
        header.push_str(id);
        if !dependencies.is_empty() {
            header.push(':');
            header.push_str(&dependencies.join(","));
        }
    }

    let mut lines = vec![header];
    for (path, value) in pairs {
        lines.push(format!("{}{}", markers.arg_prefix, path));
        lines.push(render_value(value, encoding));
    }
    lines.push(markers.end_prefix.clone());
    lines.join("\n")
}

/// Renders a worked example for the system prompt's gadget documentation.
pub fn render_example(
    markers: &MarkerConfig,
    gadget_name: &str,
    pairs: &[(String, String)],
    encoding: ParameterEncoding,
) -> String {
    render_block(markers, gadget_name, None, &[], pairs, encoding)
}

/// Renders the synthetic marker block reproducing an already-executed call,
/// for the assistant replay message.
pub fn render_call_block(markers: &MarkerConfig, call: &GadgetCall, encoding: ParameterEncoding) -> String {
    let pairs = flatten(call.parameters.as_ref());
    render_block(
        markers,
        &call.gadget_name,
        Some(&call.invocation_id),
        &call.dependencies,
        &pairs,
        encoding,
    )
}

fn flatten(tree: Option<&ParameterTree>) -> Vec<(String, String)> {
    let mut out = Vec::new();
    if let Some(tree) = tree {
        flatten_into(tree, String::new(), &mut out);
    }
    out
}

fn flatten_into(tree: &ParameterTree, prefix: String, out: &mut Vec<(String, String)>) {
    match tree {
        ParameterTree::Object(map) => {
            for (k, v) in map {
                let next = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}/{k}")
                };
                flatten_into(v, next, out);
            }
        }
        ParameterTree::Array(vec) => {
            for (i, v) in vec.iter().enumerate() {
                flatten_into(v, format!("{prefix}/{i}"), out);
            }
        }
        ParameterTree::String(s) => out.push((prefix, s.clone())),
        ParameterTree::Number { raw, .. } => out.push((prefix, raw.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_encoding_emits_bare_value() {
        let markers = MarkerConfig::default();
        let rendered = render_example(&markers, "Echo", &[("message".to_string(), "hi".to_string())], ParameterEncoding::Block);
        assert!(rendered.contains("hi"));
        assert!(!rendered.contains("\"hi\""));
    }

    #[test]
    fn json_encoding_quotes_value() {
        let markers = MarkerConfig::default();
        let rendered = render_example(&markers, "Echo", &[("message".to_string(), "hi".to_string())], ParameterEncoding::Json);
        assert!(rendered.contains("\"hi\""));
    }
}
