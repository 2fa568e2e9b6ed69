//! The injected agent program.

use std::path::Path;

/// Binding the agent calls to report messages to the host.
pub const BINDING_NAME: &str = "cdpAutoconsentSendMessage";

/// Name of the isolated world the agent runs in.
pub const WORLD_NAME: &str = "cmpcollector";

/// Bridges the agent's `autoconsentSendMessage` to the host binding.
const SEND_SHIM: &str = "
window.autoconsentSendMessage = (msg) => {
    window.cdpAutoconsentSendMessage(JSON.stringify(msg));
};
";

/// Agent source ready for injection into an isolated world.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentProgram {
    source: String,
}

impl AgentProgram {
    /// Wrap an agent bundle with the host send shim.
    pub fn new(bundle: &str) -> Self {
        Self {
            source: format!("{SEND_SHIM}{bundle}"),
        }
    }

    /// Read an agent bundle from disk.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        Ok(Self::new(&std::fs::read_to_string(path)?))
    }

    /// Full script evaluated in each isolated world.
    pub fn source(&self) -> &str {
        &self.source
    }
}
