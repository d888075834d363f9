use std::sync::Arc;

use async_graphql::{Context, EmptyMutation, EmptySubscription, Json, Object, Schema};
use udl_core::{Node, NodeStore};
use udl_query::ReferenceResolver;

pub type ApiSchema = Schema<QueryRoot, EmptyMutation, EmptySubscription>;

/// Thin read-boundary wrapper (spec.md §1, §4 data flow: "GraphQL collaborator
/// queries Node Store by id/type/field"). This is deliberately not a schema
/// builder or resolver framework — just proof that the boundary is callable.
pub struct NodeGql(Node);

#[Object]
impl NodeGql {
    async fn id(&self) -> &str {
        self.0.id()
    }

    #[graphql(name = "type")]
    async fn node_type(&self) -> &str {
        self.0.node_type()
    }

    async fn owner(&self) -> &str {
        &self.0.internal.owner
    }

    async fn parent(&self) -> Option<&str> {
        self.0.parent.as_deref()
    }

    async fn children(&self) -> &[String] {
        &self.0.children
    }

    /// Payload with any registered reference markers walked and resolved
    /// (spec.md §4 data flow: "Reference Resolver walks reference markers").
    async fn payload(&self, ctx: &Context<'_>) -> Json<serde_json::Value> {
        let raw = serde_json::Value::Object(self.0.payload.clone());
        let resolver = ctx.data_unchecked::<Arc<ReferenceResolver>>();
        Json(resolver.resolve(&raw))
    }
}

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    async fn node(&self, ctx: &Context<'_>, id: String) -> Option<NodeGql> {
        ctx.data_unchecked::<Arc<NodeStore>>().get(&id).map(NodeGql)
    }

    async fn nodes_by_type(&self, ctx: &Context<'_>, node_type: String) -> Vec<NodeGql> {
        ctx.data_unchecked::<Arc<NodeStore>>()
            .get_by_type(&node_type)
            .into_iter()
            .map(NodeGql)
            .collect()
    }
}

pub fn build_schema(store: Arc<NodeStore>, reference_resolver: Arc<ReferenceResolver>) -> ApiSchema {
    Schema::build(QueryRoot, EmptyMutation, EmptySubscription)
        .data(store)
        .data(reference_resolver)
        .finish()
}
