use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::error;
use tracing::info;

use crate::config::ToolsConfig;
use crate::error::Result;
use crate::error::ToolErr;
use crate::handler::ToolHandler;
use crate::protocol::ToolSpec;

/// Every activated tool from one configuration, keyed by name.
#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<ToolHandler>>,
}

impl ToolRegistry {
    /// Activates every tool in `config`, stopping at the first failure.
    pub async fn from_config(config: &ToolsConfig) -> Result<Self> {
        let mut tools = BTreeMap::new();
        for definition in &config.tools {
            let name = definition.name.clone();
            let shell = config.shell_for(definition);
            let handler = ToolHandler::new(definition.clone(), shell)
                .await
                .map_err(|e| {
                    error!("failed to activate tool {name}: {e}");
                    ToolErr::InvalidTool(format!("{name}: {e}"))
                })?;
            tools.insert(name, Arc::new(handler));
        }
        info!("registered {} tool(s)", tools.len());
        Ok(Self { tools })
    }

    pub fn get(&self, name: &str) -> Result<Arc<ToolHandler>> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| ToolErr::UnknownTool(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tool_specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|handler| handler.spec()).collect()
    }
}
