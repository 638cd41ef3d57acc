use std::sync::Arc;

use tracing::debug;

use crate::agent::tools::FunctionSpec;
use crate::models::{Content, LanguageModel, ModelError, ModelRequest, ModelResponse, Part};
use crate::session::TranscriptEntry;
use crate::settings::{EffectiveSettings, GenerationConfig};

/// Model-side conversation. History only grows; a failed send leaves it untouched.
pub struct ChatSession {
    model: Arc<dyn LanguageModel>,
    model_name: String,
    generation: GenerationConfig,
    tools: Vec<FunctionSpec>,
    history: Vec<Content>,
}

impl ChatSession {
    pub fn new(model: Arc<dyn LanguageModel>, settings: &EffectiveSettings, tools: Vec<FunctionSpec>) -> Self {
        Self {
            model,
            model_name: settings.model.clone(),
            generation: settings.generation,
            tools,
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[Content] {
        &self.history
    }

    /// Replays stored transcript entries as plain text turns.
    pub fn rehydrate(&mut self, transcript: &[TranscriptEntry]) {
        self.history.extend(transcript.iter().map(|e| Content {
            role: e.role.model_role(),
            parts: vec![Part::text(e.content.clone())],
        }));
    }

    pub async fn send_message(&mut self, parts: Vec<Part>) -> Result<ModelResponse, ModelError> {
        let outgoing = Content::user(parts);
        let mut contents = self.history.clone();
        contents.push(outgoing.clone());
        debug!(model = %self.model_name, turns = contents.len(), "send_message");
        let response = self
            .model
            .generate(ModelRequest {
                model: self.model_name.clone(),
                contents,
                tools: self.tools.clone(),
                generation: self.generation,
            })
            .await?;
        let reply = response.first_content().cloned().ok_or(ModelError::NoCandidates)?;
        self.history.push(outgoing);
        self.history.push(reply);
        Ok(response)
    }
}
