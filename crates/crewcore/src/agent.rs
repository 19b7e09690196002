use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type AgentId = Uuid;

/// An AI agent persona: role, goal, and backstory feed prompt construction,
/// the model and generation parameters drive the inference call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub role: String,
    pub goal: String,
    pub backstory: String,
    pub model: String,
    pub params: GenerationParams,
    pub active: bool,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        role: impl Into<String>,
        goal: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            role: role.into(),
            goal: goal.into(),
            backstory: String::new(),
            model: model.into(),
            params: GenerationParams::default(),
            active: true,
        }
    }

    pub fn with_backstory(mut self, backstory: impl Into<String>) -> Self {
        self.backstory = backstory.into();
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }
}

/// Sampling parameters passed through to the inference call
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.6,
            max_tokens: 32768,
            top_p: 0.9,
        }
    }
}
