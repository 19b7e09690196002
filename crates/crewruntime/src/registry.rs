use crate::store::ExecutionStore;
use crewcore::{Agent, AgentId, EngineError, Result};
use std::sync::Arc;

/// Registry of agent definitions, backed by the execution store. Supplies
/// the prompt-building context the task runner resolves agents from.
#[derive(Clone)]
pub struct AgentRegistry {
    store: Arc<dyn ExecutionStore>,
}

impl AgentRegistry {
    pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self { store }
    }

    pub async fn register(&self, agent: Agent) -> AgentId {
        let id = agent.id;
        tracing::info!("Registering agent: {} ({})", agent.name, agent.role);
        self.store.put_agent(agent).await;
        id
    }

    /// Replaces an existing definition. Running task executions keep the
    /// agent snapshot they resolved at dispatch.
    pub async fn update(&self, agent: Agent) -> Result<()> {
        if self.store.agent(agent.id).await.is_none() {
            return Err(EngineError::not_found("agent", agent.id));
        }
        tracing::info!("Updating agent: {}", agent.name);
        self.store.put_agent(agent).await;
        Ok(())
    }

    pub async fn get(&self, id: AgentId) -> Result<Agent> {
        self.store
            .agent(id)
            .await
            .ok_or_else(|| EngineError::not_found("agent", id))
    }

    pub async fn list(&self) -> Vec<Agent> {
        self.store.list_agents().await
    }

    pub async fn deactivate(&self, id: AgentId) -> Result<()> {
        let mut agent = self.get(id).await?;
        agent.active = false;
        self.store.put_agent(agent).await;
        Ok(())
    }
}
