pub mod arithmetic;
pub mod file_tools;
pub mod registry;
pub mod system_tools;
pub mod traits;

pub use registry::{ToolRegistry, ToolSchema};
pub use traits::{Tool, ToolError};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Registry with every built-in tool, file tools confined to `workspace_root`.
pub fn builtin_registry(
    workspace_root: impl AsRef<Path>,
    tool_timeout: Duration,
) -> Result<ToolRegistry, ToolError> {
    let guard = file_tools::WorkspaceGuard::new(workspace_root)?;

    let mut registry = ToolRegistry::with_timeout(tool_timeout);
    registry
        .register(Arc::new(system_tools::GetTimeTool::new()))?
        .register(Arc::new(system_tools::CalculateTool))?
        .register(Arc::new(file_tools::ReadFileTool::new(guard.clone())))?
        .register(Arc::new(file_tools::WriteFileTool::new(guard)))?;

    tracing::info!("Registered {} built-in tools", registry.len());
    Ok(registry)
}
