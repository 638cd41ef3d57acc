//! Turn Orchestrator.
//!
//! Each render cycle starts a fresh chat, replays the stored transcript into
//! it, seeds the introduction when the transcript is empty, then answers the
//! pending user input (if any).

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::agent::chat::ChatSession;
use crate::agent::dispatcher::{DispatchError, ResponseDispatcher};
use crate::agent::tools::{SchemaError, ToolRegistry};
use crate::flights::FlightBackend;
use crate::models::{LanguageModel, Part};
use crate::session::{Session, ToolEvent, TranscriptRole};
use crate::settings::{AppConfig, RequestOverrides, resolve_effective_settings};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderOutput {
    /// Reply to the introduction, present only on a session's first cycle.
    pub intro: Option<String>,
    pub reply: Option<String>,
}

pub struct Engine {
    config: AppConfig,
    model: Arc<dyn LanguageModel>,
    tools: ToolRegistry,
    dispatcher: ResponseDispatcher,
}

impl Engine {
    pub fn new(
        config: AppConfig,
        model: Arc<dyn LanguageModel>,
        backend: Arc<dyn FlightBackend>,
    ) -> Result<Self, SchemaError> {
        Ok(Self {
            config,
            model,
            tools: ToolRegistry::flight_tools()?,
            dispatcher: ResponseDispatcher::new(backend),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn start_chat(&self, session: &Session, overrides: &RequestOverrides) -> ChatSession {
        let eff = resolve_effective_settings(&self.config, &session.settings, overrides);
        let mut chat = ChatSession::new(self.model.clone(), &eff, self.tools.specs().to_vec());
        chat.rehydrate(&session.transcript);
        chat
    }

    /// One exchange: send, dispatch, then record both sides in the transcript.
    /// Nothing is recorded when any step fails.
    pub async fn model_answer(
        &self,
        chat: &mut ChatSession,
        session: &mut Session,
        query: &str,
    ) -> Result<String, DispatchError> {
        let response = chat.send_message(vec![Part::text(query)]).await?;
        let outcome = self.dispatcher.dispatch(chat, &response).await?;

        if let Some(tool) = outcome.tool {
            session.tool_history.push(ToolEvent {
                id: Uuid::new_v4(),
                tool: tool.kind.name().into(),
                summary: tool.summary,
                status: tool.status,
                created_at: Utc::now(),
            });
        }
        session.push_turn(TranscriptRole::User, query);
        session.push_turn(TranscriptRole::Assistant, outcome.text.clone());
        metrics::counter!("gemini_flights_turns_total").increment(1);
        Ok(outcome.text)
    }

    pub async fn render_cycle(
        &self,
        session: &mut Session,
        input: Option<&str>,
        overrides: &RequestOverrides,
    ) -> Result<RenderOutput, DispatchError> {
        let mut chat = self.start_chat(session, overrides);
        let mut out = RenderOutput::default();

        if session.transcript.is_empty() {
            info!(session = %session.id, "seeding introduction");
            let intro = self.config.intro_prompt.clone();
            out.intro = Some(self.model_answer(&mut chat, session, &intro).await?);
        }

        if let Some(query) = input.map(str::trim).filter(|q| !q.is_empty()) {
            info!(session = %session.id, chars = query.len(), "user turn");
            out.reply = Some(self.model_answer(&mut chat, session, query).await?);
        }
        Ok(out)
    }
}
