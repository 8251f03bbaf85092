//! Control-plane paths, endpoint classes and request bodies

use serde_json::{json, Map, Value};
use stagecraft_gateway::{ApiRequest, EndpointClass};
use stagecraft_types::{RemoteId, ResourceKind, ResourceSpec, RoleAssignment};

/// Collection segment for a kind under `/workspaces/{id}/`
pub fn collection(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Workspace => "workspaces",
        ResourceKind::Lakehouse => "lakehouses",
        ResourceKind::Warehouse => "warehouses",
        ResourceKind::Notebook => "notebooks",
        ResourceKind::Pipeline => "dataPipelines",
        ResourceKind::SemanticModel => "semanticModels",
        ResourceKind::Report => "reports",
        ResourceKind::Eventhouse => "eventhouses",
        ResourceKind::Environment => "environments",
        ResourceKind::RoleAssignment => "roleAssignments",
    }
}

/// Where a resource of `kind` is created. `parent` is the workspace's
/// remote id and is ignored for workspaces.
pub fn collection_path(kind: ResourceKind, parent: Option<&RemoteId>) -> String {
    match (kind, parent) {
        (ResourceKind::Workspace, _) | (_, None) => "/workspaces".to_string(),
        (kind, Some(ws)) => format!("/workspaces/{}/{}", ws, collection(kind)),
    }
}

pub fn resource_path(kind: ResourceKind, id: &RemoteId, parent: Option<&RemoteId>) -> String {
    format!("{}/{}", collection_path(kind, parent), id)
}

pub fn class(verb: &str, kind: ResourceKind) -> EndpointClass {
    EndpointClass::new(verb, kind.as_str())
}

/// Create body: display name, description, then free-form properties.
pub fn create_body(kind: ResourceKind, spec: &ResourceSpec) -> Value {
    let mut body = Map::new();
    for (k, v) in &spec.properties {
        body.insert(k.clone(), v.clone());
    }
    body.insert("displayName".into(), Value::String(spec.display_name.clone()));
    if let Some(description) = &spec.description {
        body.insert("description".into(), Value::String(description.clone()));
    }
    if kind == ResourceKind::Workspace {
        body.insert(
            "capacityTier".into(),
            Value::String(spec.capacity_tier.to_string()),
        );
    }
    Value::Object(body)
}

pub fn update_body(display_name: &str, description: Option<&str>) -> Value {
    json!({
        "displayName": display_name,
        "description": description,
    })
}

pub fn role_assignment_body(assignment: &RoleAssignment) -> Value {
    json!({
        "principal": {
            "id": assignment.principal.id,
            "type": assignment.principal.kind.as_api_str(),
        },
        "role": assignment.role.as_api_str(),
    })
}

pub fn create(kind: ResourceKind, spec: &ResourceSpec, parent: Option<&RemoteId>) -> ApiRequest {
    ApiRequest::post(
        collection_path(kind, parent),
        create_body(kind, spec),
        class("create", kind),
    )
}

pub fn get(kind: ResourceKind, id: &RemoteId, parent: Option<&RemoteId>) -> ApiRequest {
    ApiRequest::get(resource_path(kind, id, parent), class("get", kind))
}

pub fn update(
    kind: ResourceKind,
    id: &RemoteId,
    parent: Option<&RemoteId>,
    body: Value,
) -> ApiRequest {
    ApiRequest::patch(resource_path(kind, id, parent), body, class("update", kind))
}

pub fn delete(kind: ResourceKind, id: &RemoteId, parent: Option<&RemoteId>) -> ApiRequest {
    ApiRequest::delete(resource_path(kind, id, parent), class("delete", kind))
}

pub fn assign_role(workspace: &RemoteId, assignment: &RoleAssignment) -> ApiRequest {
    ApiRequest::post(
        collection_path(ResourceKind::RoleAssignment, Some(workspace)),
        role_assignment_body(assignment),
        class("assign", ResourceKind::RoleAssignment),
    )
}
