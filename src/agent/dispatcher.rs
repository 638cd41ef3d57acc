//! Response Dispatcher.
//!
//! Turns a single model response into the text shown to the user, running at
//! most one tool call on the way.

use std::sync::Arc;

use tracing::{debug, info};

use crate::agent::chat::ChatSession;
use crate::agent::tools::{ToolCall, ToolKind};
use crate::flights::FlightBackend;
use crate::models::{ModelError, ModelResponse, Part};
use crate::session::ToolStatus;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("invalid arguments for {function}: {source}")]
    InvalidArguments {
        function: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{tool} backend failed: {error:#}")]
    Backend { tool: &'static str, error: anyhow::Error },
    #[error(transparent)]
    Upstream(#[from] ModelError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub kind: ToolKind,
    pub status: ToolStatus,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub text: String,
    pub tool: Option<ToolInvocation>,
}

pub struct ResponseDispatcher {
    backend: Arc<dyn FlightBackend>,
}

impl ResponseDispatcher {
    pub fn new(backend: Arc<dyn FlightBackend>) -> Self {
        Self { backend }
    }

    pub async fn dispatch(
        &self,
        chat: &mut ChatSession,
        response: &ModelResponse,
    ) -> Result<DispatchOutcome, DispatchError> {
        let call = match response.first_part() {
            Some(Part::FunctionCall(fc)) if !fc.args.is_empty() => fc,
            _ => return Ok(DispatchOutcome { text: response.text()?, tool: None }),
        };
        let extra = response.first_content().map_or(0, |c| c.parts.len().saturating_sub(1));
        if extra > 0 {
            debug!(extra, "ignoring parts after the function call");
        }

        let call = ToolCall::from_request(call)?;
        let kind = call.kind();
        let result = match &call {
            ToolCall::SearchFlights(args) => self.backend.search_flights(args).await,
            ToolCall::BookFlight(args) => self.backend.book_flight(args).await,
        }
        .map_err(|error| DispatchError::Backend { tool: kind.name(), error })?;

        if result.is_empty() {
            metrics::counter!("gemini_flights_tool_calls_total", "tool" => kind.name(), "outcome" => "empty").increment(1);
            info!(tool = kind.name(), "tool returned nothing");
            return Ok(DispatchOutcome {
                text: kind.failure_message().to_string(),
                tool: Some(ToolInvocation {
                    kind,
                    status: ToolStatus::Empty,
                    summary: call.summary(),
                }),
            });
        }

        metrics::counter!("gemini_flights_tool_calls_total", "tool" => kind.name(), "outcome" => "ok").increment(1);
        info!(tool = kind.name(), "tool returned a result, asking model to summarize");
        let follow_up = chat
            .send_message(vec![Part::function_response(kind.name(), result.into_response_object())])
            .await?;
        Ok(DispatchOutcome {
            text: follow_up.text()?,
            tool: Some(ToolInvocation { kind, status: ToolStatus::Ok, summary: call.summary() }),
        })
    }
}
