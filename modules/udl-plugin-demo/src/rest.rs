use async_trait::async_trait;
use serde_json::{Map, Value};
use udl_actions::{CreateNodeInput, NodeActions};
use udl_common::UdlError;
use udl_core::index_key;
use udl_pipeline::{Plugin, UpdateStrategy};

/// Sources nodes by polling a REST endpoint that returns a JSON array of
/// objects (grounded on the teacher's `apify-client` reqwest+bearer-auth
/// pattern). Each object must carry `id_field`; everything else lands in
/// the node payload unchanged.
pub struct RestPlugin {
    name: String,
    node_type: String,
    endpoint: String,
    id_field: String,
    bearer_token: Option<String>,
    client: reqwest::Client,
}

impl RestPlugin {
    pub fn new(
        name: impl Into<String>,
        node_type: impl Into<String>,
        endpoint: impl Into<String>,
        id_field: impl Into<String>,
        bearer_token: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            node_type: node_type.into(),
            endpoint: endpoint.into(),
            id_field: id_field.into(),
            bearer_token,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Plugin for RestPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn update_strategy(&self) -> UpdateStrategy {
        UpdateStrategy::Refetch
    }

    fn indexes(&self) -> Vec<(String, String)> {
        vec![(self.node_type.clone(), self.id_field.clone())]
    }

    fn id_field(&self) -> Option<&str> {
        Some(&self.id_field)
    }

    async fn source_nodes(&self, actions: &NodeActions) -> Result<(), UdlError> {
        let mut request = self.client.get(&self.endpoint);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| UdlError::PluginSourceFailure(format!("rest poll failed: {e}")))?;

        if !response.status().is_success() {
            return Err(UdlError::PluginSourceFailure(format!(
                "rest poll returned {}",
                response.status()
            )));
        }

        let items: Vec<Map<String, Value>> = response
            .json()
            .await
            .map_err(|e| UdlError::PluginSourceFailure(format!("rest poll body invalid: {e}")))?;

        for item in items {
            let Some(external_id) = item.get(&self.id_field).and_then(index_key) else {
                tracing::warn!(plugin = %self.name, field = %self.id_field, "skipping item missing id field");
                continue;
            };
            let id = format!("{}:{external_id}", self.node_type);

            actions.create(CreateNodeInput {
                id,
                node_type: self.node_type.clone(),
                parent: None,
                payload: item,
            })?;
        }

        Ok(())
    }
}
