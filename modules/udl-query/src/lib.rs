mod query_helper;
mod reference_resolver;

pub use query_helper::{execute_query, inject_typename, normalize_response, relink_entities, unwrap_root_field, QueryError, QueryResult};
pub use reference_resolver::{ReferenceResolver, ReferenceRule};
