//! Per-entity routing onto gateway requests.

use async_trait::async_trait;
use serde_json::Value;

use super::{GatewayError, GatewayMethod, GatewayRequest, RemoteGateway};
use crate::models::{EntityType, Operation, SyncItem};

/// Maps mutations and pulls of one entity kind onto backend requests.
#[async_trait]
pub trait EntityHandler: Send + Sync {
    fn entity_type(&self) -> EntityType;

    /// Build the request delivering `operation` for one entity.
    fn request(
        &self,
        operation: Operation,
        entity_id: &str,
        payload: &Value,
    ) -> Result<GatewayRequest, GatewayError>;

    /// Build the request listing remote entities changed since `since` (Unix ms).
    fn pull_request(&self, since: Option<i64>) -> GatewayRequest;

    /// Deliver one queued item.
    async fn apply(
        &self,
        gateway: &dyn RemoteGateway,
        item: &SyncItem,
    ) -> Result<Value, GatewayError> {
        let request = self.request(item.operation, &item.entity_id, &item.payload)?;
        match gateway.send(request).await {
            // Already gone remotely: the delete has the effect we wanted
            Err(error) if item.operation == Operation::Delete && error.status() == Some(404) => {
                Ok(Value::Null)
            }
            other => other,
        }
    }
}

/// Resolve the handler for an entity kind.
pub fn handler_for(entity_type: EntityType) -> &'static dyn EntityHandler {
    match entity_type {
        EntityType::Trail => &TrailHandler,
        EntityType::TrackPoint => &TrackPointHandler,
        EntityType::MediaFile => &MediaFileHandler,
        EntityType::UserProfile => &UserProfileHandler,
    }
}

fn member_path(collection: &str, entity_id: &str) -> String {
    format!("{collection}/{}", urlencoding::encode(entity_id))
}

fn changed_since_path(collection: &str, since: Option<i64>) -> String {
    since.map_or_else(
        || collection.to_string(),
        |since| format!("{collection}?updated_since={since}"),
    )
}

fn collection_request(
    collection: &str,
    operation: Operation,
    entity_id: &str,
    payload: &Value,
) -> GatewayRequest {
    match operation {
        Operation::Create => GatewayRequest::new(GatewayMethod::Post, collection, payload.clone()),
        Operation::Update => GatewayRequest::new(
            GatewayMethod::Put,
            member_path(collection, entity_id),
            payload.clone(),
        ),
        Operation::Delete => GatewayRequest::new(
            GatewayMethod::Delete,
            member_path(collection, entity_id),
            Value::Null,
        ),
    }
}

pub struct TrailHandler;

#[async_trait]
impl EntityHandler for TrailHandler {
    fn entity_type(&self) -> EntityType {
        EntityType::Trail
    }

    fn request(
        &self,
        operation: Operation,
        entity_id: &str,
        payload: &Value,
    ) -> Result<GatewayRequest, GatewayError> {
        Ok(collection_request("/trails", operation, entity_id, payload))
    }

    fn pull_request(&self, since: Option<i64>) -> GatewayRequest {
        GatewayRequest::new(
            GatewayMethod::Get,
            changed_since_path("/trails", since),
            Value::Null,
        )
    }
}

pub struct TrackPointHandler;

#[async_trait]
impl EntityHandler for TrackPointHandler {
    fn entity_type(&self) -> EntityType {
        EntityType::TrackPoint
    }

    fn request(
        &self,
        operation: Operation,
        entity_id: &str,
        payload: &Value,
    ) -> Result<GatewayRequest, GatewayError> {
        Ok(collection_request(
            "/track-points",
            operation,
            entity_id,
            payload,
        ))
    }

    fn pull_request(&self, since: Option<i64>) -> GatewayRequest {
        GatewayRequest::new(
            GatewayMethod::Get,
            changed_since_path("/track-points", since),
            Value::Null,
        )
    }
}

pub struct MediaFileHandler;

#[async_trait]
impl EntityHandler for MediaFileHandler {
    fn entity_type(&self) -> EntityType {
        EntityType::MediaFile
    }

    fn request(
        &self,
        operation: Operation,
        entity_id: &str,
        payload: &Value,
    ) -> Result<GatewayRequest, GatewayError> {
        if operation == Operation::Create {
            return Ok(GatewayRequest::new(
                GatewayMethod::Upload,
                "/media",
                payload.clone(),
            ));
        }
        Ok(collection_request("/media", operation, entity_id, payload))
    }

    fn pull_request(&self, since: Option<i64>) -> GatewayRequest {
        GatewayRequest::new(
            GatewayMethod::Get,
            changed_since_path("/media", since),
            Value::Null,
        )
    }
}

pub struct UserProfileHandler;

#[async_trait]
impl EntityHandler for UserProfileHandler {
    fn entity_type(&self) -> EntityType {
        EntityType::UserProfile
    }

    fn request(
        &self,
        operation: Operation,
        _entity_id: &str,
        payload: &Value,
    ) -> Result<GatewayRequest, GatewayError> {
        if operation != Operation::Update {
            return Err(GatewayError::Unsupported {
                entity_type: EntityType::UserProfile,
                operation,
            });
        }
        Ok(GatewayRequest::new(
            GatewayMethod::Put,
            "/user/profile",
            payload.clone(),
        ))
    }

    fn pull_request(&self, _since: Option<i64>) -> GatewayRequest {
        GatewayRequest::new(GatewayMethod::Get, "/user/profile", Value::Null)
    }
}

/// Normalise a pull response into a list of entity bodies.
///
/// Accepts a bare array, an envelope with `items`/`data`, or a single object.
pub fn pulled_entities(response: Value) -> Vec<Value> {
    match response {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            for key in ["items", "data"] {
                if let Some(Value::Array(items)) = map.remove(key) {
                    return items;
                }
            }
            vec![Value::Object(map)]
        }
        _ => Vec::new(),
    }
}

/// Extract an entity id from a pulled body (`id` as string or number).
pub fn entity_id_of(entity: &Value) -> Option<String> {
    match entity.get("id")? {
        Value::String(id) if !id.trim().is_empty() => Some(id.trim().to_string()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn handler_for_routes_to_matching_handler() {
        for entity_type in EntityType::ALL {
            assert_eq!(handler_for(entity_type).entity_type(), entity_type);
        }
    }

    #[test]
    fn routing_table_matches_backend_endpoints() {
        let body = json!({ "id": "t 1" });
        let cases = [
            (EntityType::Trail, Operation::Create, GatewayMethod::Post, "/trails"),
            (EntityType::Trail, Operation::Update, GatewayMethod::Put, "/trails/t%201"),
            (EntityType::Trail, Operation::Delete, GatewayMethod::Delete, "/trails/t%201"),
            (EntityType::TrackPoint, Operation::Create, GatewayMethod::Post, "/track-points"),
            (EntityType::TrackPoint, Operation::Update, GatewayMethod::Put, "/track-points/t%201"),
            (EntityType::MediaFile, Operation::Create, GatewayMethod::Upload, "/media"),
            (EntityType::MediaFile, Operation::Delete, GatewayMethod::Delete, "/media/t%201"),
            (EntityType::UserProfile, Operation::Update, GatewayMethod::Put, "/user/profile"),
        ];

        for (entity_type, operation, method, path) in cases {
            let request = handler_for(entity_type)
                .request(operation, "t 1", &body)
                .unwrap();
            assert_eq!(request.method, method, "{entity_type} {operation}");
            assert_eq!(request.path, path, "{entity_type} {operation}");
        }
    }

    #[test]
    fn delete_requests_carry_no_body() {
        let request = handler_for(EntityType::Trail)
            .request(Operation::Delete, "t1", &json!({ "name": "x" }))
            .unwrap();
        assert_eq!(request.body, Value::Null);
    }

    #[test]
    fn user_profile_rejects_create() {
        let error = handler_for(EntityType::UserProfile)
            .request(Operation::Create, "me", &json!({}))
            .unwrap_err();
        assert!(matches!(error, GatewayError::Unsupported { .. }));
    }

    #[test]
    fn pull_requests_include_since() {
        let request = handler_for(EntityType::Trail).pull_request(Some(42));
        assert_eq!(request.path, "/trails?updated_since=42");
        let request = handler_for(EntityType::MediaFile).pull_request(None);
        assert_eq!(request.path, "/media");
    }

    #[test]
    fn pulled_entities_accepts_envelopes() {
        assert_eq!(pulled_entities(json!([{ "id": 1 }])).len(), 1);
        assert_eq!(pulled_entities(json!({ "items": [{ "id": 1 }, { "id": 2 }] })).len(), 2);
        assert_eq!(pulled_entities(json!({ "id": "me" })).len(), 1);
        assert!(pulled_entities(Value::Null).is_empty());
    }

    #[test]
    fn entity_id_of_handles_numbers() {
        assert_eq!(entity_id_of(&json!({ "id": 7 })), Some("7".to_string()));
        assert_eq!(entity_id_of(&json!({ "id": " a " })), Some("a".to_string()));
        assert_eq!(entity_id_of(&json!({ "name": "x" })), None);
    }
}
