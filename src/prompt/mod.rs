//! The message builder and prompt assembler (Component E).
//!
//! Grounded on `agent/prompts.rs`'s `PromptTemplate` (handlebars-based) and
//! `PromptBuilder` (section/text/code/list builder pattern), adapted so the
//! builder's sections are keyed by parameter encoding rather than by a
//! fixed set of agent-personality sections.

mod encoding;

pub use encoding::ParameterEncoding;

use handlebars::Handlebars;
use serde_json::json;

use crate::config::MarkerConfig;
use crate::gadget::GadgetRegistry;
use crate::message::{ContentPart, Message};
use crate::parser::GadgetCall;

const MAIN_INSTRUCTION_TEMPLATE: &str = r#"You can invoke gadgets by emitting a marker block in your response text.

A gadget call looks like:

{{start_prefix}}GADGET_NAME[:invocation_id[:dep_id,dep_id,...]]
{{arg_prefix}}param/path
value
{{end_prefix}}

There are {{gadget_count}} gadget(s) available: {{gadget_names}}.
"#;

const RULES: &[&str] = &[
    "Each call must start on its own line with the start marker followed immediately by the gadget name.",
    "An optional invocation id and comma-separated dependency ids may follow the name, separated by colons.",
    "Parameter paths use `/` to address nested objects and arrays (e.g. `config/timeout`, `items/0`).",
    "Omit the end marker only when starting a new call or ending the stream; otherwise always close with the end marker alone on its own line.",
    "Reference a prior call's result by its invocation id once it has been returned to you.",
];

/// Builds the system prompt and the transcript replay messages for
/// already-executed calls. Holds its own `Handlebars` instance, matching
/// `PromptTemplate`'s pattern of registering named templates up front.
pub struct PromptAssembler {
    handlebars: Handlebars<'static>,
    markers: MarkerConfig,
    encoding: ParameterEncoding,
}

impl PromptAssembler {
    pub fn new(markers: MarkerConfig, encoding: ParameterEncoding) -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        handlebars
            .register_template_string("main_instruction", MAIN_INSTRUCTION_TEMPLATE)
            .expect("static template is valid handlebars");
        Self {
            handlebars,
            markers,
            encoding,
        }
    }

    /// Produces the system message describing the marker protocol, the
    /// registered gadgets, and worked examples in the selected encoding.
    pub fn build_system_message(&self, registry: &GadgetRegistry) -> Message {
        let definitions = registry.definitions();
        let gadget_names: Vec<String> = definitions.iter().map(|d| d.name.clone()).collect();

        let context = json!({
            "start_prefix": self.markers.start_prefix,
            "end_prefix": self.markers.end_prefix,
            "arg_prefix": self.markers.arg_prefix,
            "gadget_count": definitions.len(),
            "gadget_names": gadget_names.join(", "),
        });

        let mut builder = PromptBuilder::new();
        builder.text(
            self.handlebars
                .render("main_instruction", &context)
                .unwrap_or_else(|_| MAIN_INSTRUCTION_TEMPLATE.to_string()),
        );

        builder.section("Rules", &RULES.iter().map(|s| s.to_string()).collect::<Vec<_>>());

        for definition in &definitions {
            builder.section_header(&format!("Gadget: {}", definition.name));
            builder.text(&definition.description);
            if !definition.schema.fields.is_empty() {
                builder.text(&definition.schema.render_text());
            }
            for example in &definition.examples {
                builder.code(&encoding::render_example(
                    &self.markers,
                    &definition.name,
                    &example.parameters,
                    self.encoding,
                ));
            }
        }

        Message::system(builder.build())
    }

    /// Reconstructs the assistant marker block for a previously executed
    /// call (so the model sees its own prior behavior) and the paired user
    /// result message, in the `Result (invocationId): <result>` form.
    pub fn build_replay_messages(&self, call: &GadgetCall, result_text: &str) -> (Message, Message) {
        let assistant_block =
            encoding::render_call_block(&self.markers, call, self.encoding);
        let user_result = Message::user(format!(
            "Result ({}): {}",
            call.invocation_id, result_text
        ));
        (Message::assistant(assistant_block), user_result)
    }

    /// Builds a multimodal user message interleaving text with image/audio
    /// parts, per spec §4.E.
    pub fn build_multimodal_user_message(&self, parts: Vec<ContentPart>) -> Message {
        Message::user_parts(parts)
    }
}

/// A small section/text/code builder, grounded on `agent/prompts.rs`'s
/// `PromptBuilder`. Sections accumulate into one rendered string via
/// `build()`.
#[derive(Default)]
struct PromptBuilder {
    parts: Vec<String>,
}

impl PromptBuilder {
    fn new() -> Self {
        Self::default()
    }

    fn text(&mut self, text: impl AsRef<str>) -> &mut Self {
        self.parts.push(text.as_ref().to_string());
        self
    }

    fn section_header(&mut self, title: &str) -> &mut Self {
        self.parts.push(format!("## {title}"));
        self
    }

    fn section(&mut self, title: &str, items: &[String]) -> &mut Self {
        self.section_header(title);
        self.list(items);
        self
    }

    fn list(&mut self, items: &[String]) -> &mut Self {
        let rendered = items
            .iter()
            .map(|i| format!("- {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        self.parts.push(rendered);
        self
    }

    fn code(&mut self, body: &str) -> &mut Self {
        self.parts.push(format!("```\n{body}\n```"));
        self
    }

    fn build(&self) -> String {
        self.parts.join("\n\n")
    }
}
