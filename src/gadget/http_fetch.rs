//! `http_fetch` — a small GET-only HTTP gadget, grounded on the teacher's
//! `agent/client.rs` reqwest usage. Demonstrates a gadget with both a
//! `cost` and a `timeoutMs`.

use async_trait::async_trait;

use super::{
    CancelSignal, Gadget, GadgetExample, GadgetExecutionContext, GadgetOutput, ParameterField,
    ParameterKind, ParameterSchema,
};
use crate::error::{Error, Result};
use crate::markers::ParameterTree;

pub struct HttpFetchGadget {
    client: reqwest::Client,
    timeout_ms: u64,
}

impl HttpFetchGadget {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout_ms,
        }
    }
}

impl Default for HttpFetchGadget {
    fn default() -> Self {
        Self::new(15_000)
    }
}

#[async_trait]
impl Gadget for HttpFetchGadget {
    fn name(&self) -> &str {
        "http_fetch"
    }

    fn description(&self) -> &str {
        "Performs an HTTP GET request and returns the response body as text."
    }

    fn parameter_schema(&self) -> ParameterSchema {
        ParameterSchema::new(vec![ParameterField {
            path: "url".to_string(),
            description: "the URL to fetch".to_string(),
            required: true,
            kind: ParameterKind::String,
        }])
    }

    fn timeout_ms(&self) -> Option<u64> {
        Some(self.timeout_ms)
    }

    fn category(&self) -> Option<&str> {
        Some("Network Tools")
    }

    fn examples(&self) -> Vec<GadgetExample> {
        vec![GadgetExample {
            description: "Fetch a page".to_string(),
            parameters: vec![("url".to_string(), "https://example.com".to_string())],
        }]
    }

    async fn execute(
        &self,
        params: ParameterTree,
        _cancel: CancelSignal,
        _context: GadgetExecutionContext,
    ) -> Result<GadgetOutput> {
        let url = params
            .as_object()
            .and_then(|o| o.get("url"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("http_fetch requires a 'url' parameter".to_string()))?;

        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::GadgetThrew {
                name: "http_fetch".to_string(),
                invocation_id: String::new(),
                message: format!("HTTP {status}: {body}"),
            });
        }
        // A nominal per-call cost, illustrating the cost field gadgets may
        // report (summed arithmetically across a run, single-currency USD).
        Ok(GadgetOutput::with_cost(body, 0.0001))
    }
}
