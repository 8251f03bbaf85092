//! Test transports.
//!
//! [`ScriptedTransport`] replays a fixed list of outcomes.
//! [`FakeControlPlane`] keeps an in-memory object tree keyed by path and
//! answers POST/GET/PATCH/DELETE against it, with fault injection per
//! endpoint class.

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::auth::Credential;
use crate::request::{ApiRequest, CallOutcome, EndpointClass, HttpMethod};
use crate::transport::Transport;

/// Replays queued outcomes in order.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<CallOutcome>>,
    fallback: Option<CallOutcome>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<CallOutcome>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answers every call with `outcome` once the queue is empty.
    pub fn repeating(outcome: CallOutcome) -> Self {
        Self {
            fallback: Some(outcome),
            ..Default::default()
        }
    }

    pub fn push(&self, outcome: CallOutcome) {
        self.script.lock().push_back(outcome);
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest, _credential: &Credential) -> CallOutcome {
        self.requests.lock().push(request.clone());
        if let Some(outcome) = self.script.lock().pop_front() {
            return outcome;
        }
        self.fallback
            .clone()
            .unwrap_or_else(|| CallOutcome::transient("script exhausted"))
    }
}

#[derive(Debug, Clone)]
struct Fault {
    endpoint_class: EndpointClass,
    outcome: CallOutcome,
    skip: usize,
    remaining: Option<usize>,
}

#[derive(Debug, Default)]
struct PlaneState {
    objects: BTreeMap<String, Value>,
    next_id: u64,
    faults: Vec<Fault>,
    requests: Vec<ApiRequest>,
}

/// In-memory stand-in for the control plane.
#[derive(Debug, Default)]
pub struct FakeControlPlane {
    state: Mutex<PlaneState>,
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next `times` calls of `endpoint_class` with `outcome`
    /// (forever when `None`).
    pub fn inject(
        &self,
        endpoint_class: impl Into<EndpointClass>,
        outcome: CallOutcome,
        times: Option<usize>,
    ) {
        self.inject_after(endpoint_class, 0, outcome, times);
    }

    /// Like [`inject`](Self::inject) but lets the first `skip` matching
    /// calls through untouched.
    pub fn inject_after(
        &self,
        endpoint_class: impl Into<EndpointClass>,
        skip: usize,
        outcome: CallOutcome,
        times: Option<usize>,
    ) {
        self.state.lock().faults.push(Fault {
            endpoint_class: endpoint_class.into(),
            outcome,
            skip,
            remaining: times,
        });
    }

    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.state.lock().requests.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    pub fn count(&self, method: HttpMethod) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.method == method)
            .count()
    }

    pub fn count_class(&self, endpoint_class: &str) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.endpoint_class.as_str() == endpoint_class)
            .count()
    }

    /// Paths of every live object.
    pub fn object_paths(&self) -> Vec<String> {
        self.state.lock().objects.keys().cloned().collect()
    }

    pub fn object_count(&self) -> usize {
        self.state.lock().objects.len()
    }

    /// Live object with the given remote id, if any.
    pub fn find(&self, id: &str) -> Option<Value> {
        self.state
            .lock()
            .objects
            .iter()
            .find(|(path, _)| path.rsplit('/').next() == Some(id))
            .map(|(_, v)| v.clone())
    }

    /// Remove an object behind the orchestrator's back (out-of-band deletion).
    pub fn delete_out_of_band(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        let path = state
            .objects
            .keys()
            .find(|path| path.rsplit('/').next() == Some(id))
            .cloned();
        match path {
            Some(path) => {
                let prefix = format!("{path}/");
                state
                    .objects
                    .retain(|p, _| p != &path && !p.starts_with(&prefix));
                true
            }
            None => false,
        }
    }

    fn take_fault(state: &mut PlaneState, class: &EndpointClass) -> Option<CallOutcome> {
        let fault = state
            .faults
            .iter_mut()
            .find(|f| &f.endpoint_class == class && f.remaining != Some(0))?;
        if fault.skip > 0 {
            fault.skip -= 1;
            return None;
        }
        if let Some(remaining) = fault.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(fault.outcome.clone())
    }

    fn handle(state: &mut PlaneState, request: &ApiRequest) -> CallOutcome {
        let path = request.path.trim_end_matches('/').to_string();
        match request.method {
            HttpMethod::Post => {
                let body = request.body.clone().unwrap_or_else(|| json!({}));
                let display_name = body.get("displayName").and_then(Value::as_str);
                if let Some(name) = display_name {
                    let prefix = format!("{path}/");
                    let taken = state.objects.iter().any(|(p, v)| {
                        p.starts_with(&prefix)
                            && !p[prefix.len()..].contains('/')
                            && v.get("displayName").and_then(Value::as_str) == Some(name)
                    });
                    if taken {
                        return CallOutcome::classify(
                            409,
                            json!({
                                "errorCode": "ItemDisplayNameAlreadyInUse",
                                "message": format!("{name} already exists"),
                            }),
                        );
                    }
                }
                state.next_id += 1;
                let id = format!("id-{:04}", state.next_id);
                let mut object = match body {
                    Value::Object(map) => map,
                    _ => serde_json::Map::new(),
                };
                object.insert("id".into(), Value::String(id.clone()));
                let object = Value::Object(object);
                state.objects.insert(format!("{path}/{id}"), object.clone());
                CallOutcome::classify(201, object)
            }
            HttpMethod::Get => match state.objects.get(&path) {
                Some(object) => CallOutcome::classify(200, object.clone()),
                None => not_found(&path),
            },
            HttpMethod::Patch => match state.objects.get_mut(&path) {
                Some(Value::Object(object)) => {
                    if let Some(Value::Object(patch)) = &request.body {
                        for (k, v) in patch {
                            object.insert(k.clone(), v.clone());
                        }
                    }
                    CallOutcome::classify(200, Value::Object(object.clone()))
                }
                _ => not_found(&path),
            },
            HttpMethod::Delete => {
                if state.objects.remove(&path).is_none() {
                    return not_found(&path);
                }
                let prefix = format!("{path}/");
                state.objects.retain(|p, _| !p.starts_with(&prefix));
                CallOutcome::classify(200, Value::Null)
            }
        }
    }
}

fn not_found(path: &str) -> CallOutcome {
    CallOutcome::classify(
        404,
        json!({"errorCode": "EntityNotFound", "message": format!("{path} not found")}),
    )
}

#[async_trait]
impl Transport for FakeControlPlane {
    async fn send(&self, request: &ApiRequest, _credential: &Credential) -> CallOutcome {
        let mut state = self.state.lock();
        state.requests.push(request.clone());
        if let Some(outcome) = Self::take_fault(&mut state, &request.endpoint_class) {
            return outcome;
        }
        Self::handle(&mut state, request)
    }
}
