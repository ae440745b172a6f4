//! Engine configuration

use serde::{Deserialize, Serialize};

use prism_policy::ExecutionNode;
use prism_stream::ChainConfig;

use crate::error::{GatewayError, Result};

/// Per-node configuration for the filter pipeline engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Which tier this process is.
    pub node: ExecutionNode,
    /// Streaming bounds for filter chains.
    pub chain: ChainConfig,
}

impl EngineConfig {
    pub fn edge() -> Self {
        Self {
            node: ExecutionNode::Edge,
            chain: ChainConfig::default(),
        }
    }

    pub fn storage() -> Self {
        Self {
            node: ExecutionNode::Storage,
            chain: ChainConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chain.read_timeout_ms == 0 {
            return Err(GatewayError::Config(
                "chain read timeout must be non-zero".to_string(),
            ));
        }
        if self.chain.chunk_size == 0 {
            return Err(GatewayError::Config(
                "chain chunk size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::edge()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(EngineConfig::edge().validate().is_ok());
        assert!(EngineConfig::storage().validate().is_ok());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut config = EngineConfig::edge();
        config.chain.read_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let mut config = EngineConfig::storage();
        config.chain.chunk_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn node_defaults() {
        assert_eq!(EngineConfig::edge().node, ExecutionNode::Edge);
        assert_eq!(EngineConfig::storage().node, ExecutionNode::Storage);
    }
}
