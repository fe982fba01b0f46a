use std::collections::HashMap;
use std::sync::Arc;

use crate::DiscoveryConfig;
use crate::MockRegistryClient;
use crate::RegistryClient;
use crate::RegistryClientFactory;
use crate::Result;

/// Hands out one pre-built mock client
pub(crate) struct MockRegistryFactory {
    client: Arc<MockRegistryClient>,
}

impl MockRegistryFactory {
    pub(crate) fn new(client: MockRegistryClient) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl RegistryClientFactory for MockRegistryFactory {
    fn create(
        &self,
        _config: &DiscoveryConfig,
    ) -> Result<Arc<dyn RegistryClient>> {
        Ok(self.client.clone())
    }
}

/// Mock of an agent that knows no services yet
pub(crate) fn empty_agent_mock() -> MockRegistryClient {
    let mut registry = MockRegistryClient::new();
    registry.expect_list_services().returning(|| Ok(HashMap::new()));
    registry
}
