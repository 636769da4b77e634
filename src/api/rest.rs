use crate::api::error::{ApiError, ApiResult};
use crate::api::types::*;
use crate::message::Message;
use crate::relay::{
    NodeStatus, OriginateRequest, Outcome, RelayError, RelayNode, RouteView, VERSION,
};
use axum::{
    body::Bytes,
    extract::{ConnectInfo, Path, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;

/// Header a peer may set to say where it accepts messages
pub const ORIGIN_HEADER: &str = "x-rfmail-origin";

pub struct RestApi {
    node: Arc<RelayNode>,
}

impl RestApi {
    pub fn new(node: Arc<RelayNode>) -> Self {
        Self { node }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(health_check).post(receive_message))
            .route("/health", get(health_check))
            .route("/api/v1/messages", post(receive_message))
            .route("/api/v1/send", post(send_message))
            .route("/api/v1/status", get(get_status))
            .route("/api/v1/routes", get(list_routes))
            .route("/api/v1/inbox", get(list_inbox))
            .route("/api/v1/outbox/:msgid", get(get_delivery))
            .with_state(self.node.clone())
    }
}

async fn health_check(State(node): State<Arc<RelayNode>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".to_string(),
        node: node.node_id().to_string(),
        version: VERSION.to_string(),
    })
}

async fn receive_message(
    State(node): State<Arc<RelayNode>>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<IntakeResponse>> {
    let message = Message::parse(&body, node.config().default_ttl).map_err(RelayError::from)?;
    let msgid = message.msgid().map(str::to_string);

    let peer = connect.map(|ConnectInfo(addr)| addr);
    let hint = sender_hint(&headers, peer, node.config().listen_addr.port());
    let outcome = node.accept(message, hint.as_deref())?;

    let response = match msgid {
        Some(msgid) => IntakeResponse::for_data(msgid, outcome),
        None => IntakeResponse::ack(),
    };
    Ok(Json(response))
}

/// Where a presence sender without an `address` can be reached
///
/// The origin header wins; otherwise the peer's IP with our own listen
/// port, since nodes in one network share a port by convention.
fn sender_hint(headers: &HeaderMap, peer: Option<SocketAddr>, port: u16) -> Option<String> {
    let declared = headers
        .get(ORIGIN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(origin) = declared {
        return Some(origin.to_string());
    }

    peer.map(|addr| format!("http://{}/", SocketAddr::new(addr.ip(), port)))
}

async fn send_message(
    State(node): State<Arc<RelayNode>>,
    body: Bytes,
) -> ApiResult<Json<SendResponse>> {
    let request: OriginateRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::InvalidRequest(format!("Bad send request: {e}")))?;

    let (msgid, outcome) = node.originate(request)?;
    let status = match outcome {
        Outcome::Forwarded => "queued",
        Outcome::Accepted => "saved",
        Outcome::Duplicate => "duplicate",
        Outcome::Expired => "expired",
    };

    Ok(Json(SendResponse {
        status: status.to_string(),
        msgid,
        outcome,
    }))
}

async fn get_status(State(node): State<Arc<RelayNode>>) -> Json<NodeStatus> {
    Json(node.status(Utc::now()))
}

async fn list_routes(State(node): State<Arc<RelayNode>>) -> Json<Vec<RouteView>> {
    let routes = node
        .routes()
        .snapshot()
        .into_iter()
        .map(|(node_id, entry)| RouteView { node_id, entry })
        .collect();
    Json(routes)
}

async fn list_inbox(State(node): State<Arc<RelayNode>>) -> Json<Vec<Value>> {
    let messages = node
        .local_messages()
        .iter()
        .map(|m| m.to_envelope())
        .collect();
    Json(messages)
}

async fn get_delivery(
    State(node): State<Arc<RelayNode>>,
    Path(msgid): Path<String>,
) -> ApiResult<Json<DeliveryResponse>> {
    let status = node
        .delivery_status(&msgid)
        .ok_or_else(|| ApiError::NotFound(format!("No delivery record for {msgid}")))?;
    let queued = node.outbox().get(&msgid);

    Ok(Json(DeliveryResponse::new(&msgid, status, queued)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::RelayNodeBuilder;
    use crate::store::{DeliveryState, RouteStatus};
    use crate::transport::ScriptedTransport;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::Service;

    fn create_test_api() -> (Arc<RelayNode>, RestApi) {
        let node = RelayNodeBuilder::new()
            .node_id("A")
            .default_peer("http://hub:8080/")
            .build(Arc::new(ScriptedTransport::new()))
            .unwrap();
        let node = Arc::new(node);
        (node.clone(), RestApi::new(node))
    }

    async fn call(app: &mut Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.call(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let (_node, api) = create_test_api();
        let mut app = api.router();

        let (status, body) = call(&mut app, get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "OK");
        assert_eq!(body["node"], "A");
    }

    #[tokio::test]
    async fn test_intake_outcomes() {
        let (node, api) = create_test_api();
        let mut app = api.router();

        let m1 = r#"{"msgid":"m1","dest":"B","ttl":2}"#;
        let (status, body) = call(&mut app, post("/", m1)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "saved");
        assert_eq!(body["msgid"], "m1");
        assert_eq!(body["forwarded"], true);

        let (_, body) = call(&mut app, post("/api/v1/messages", m1)).await;
        assert_eq!(body["status"], "duplicate");

        let (_, body) = call(&mut app, post("/", r#"{"msgid":"m2","dest":"B","ttl":0}"#)).await;
        assert_eq!(body["status"], "expired");

        assert_eq!(node.outbox().len(), 1);
        assert_eq!(node.inbox().len(), 2);
    }

    #[tokio::test]
    async fn test_inbox_lists_messages_for_this_node() {
        let (_node, api) = create_test_api();
        let mut app = api.router();

        call(&mut app, post("/", r#"{"msgid":"m1","dest":"A","ttl":1,"text":"hi"}"#)).await;
        call(&mut app, post("/", r#"{"msgid":"m2","dest":"B","ttl":1}"#)).await;

        let (status, body) = call(&mut app, get_req("/api/v1/inbox")).await;
        assert_eq!(status, StatusCode::OK);
        let messages = body.as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["msgid"], "m1");
        assert_eq!(messages[0]["text"], "hi");
        assert_eq!(messages[0]["ttl"], 1);
    }

    #[tokio::test]
    async fn test_malformed_intake_is_rejected() {
        let (node, api) = create_test_api();
        let mut app = api.router();

        for body in [r#"{"dest":"B"}"#, "not json", "[1]"] {
            let (status, reply) = call(&mut app, post("/", body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(reply["status"], "error");
            assert_eq!(reply["code"], "MALFORMED");
        }
        assert!(node.inbox().is_empty());
        assert!(node.seen().is_empty());
    }

    #[tokio::test]
    async fn test_presence_with_origin_header() {
        let (node, api) = create_test_api();
        let mut app = api.router();

        let mut request = post("/", r#"{"type":"HELLO","node":"C"}"#);
        request
            .headers_mut()
            .insert(ORIGIN_HEADER, "http://c:8080/".parse().unwrap());
        let (status, body) = call(&mut app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ack");
        assert_eq!(node.routes().get("C").unwrap().status, RouteStatus::Online);

        // No declared address and no way to infer one
        let (status, _) = call(&mut app, post("/", r#"{"type":"HELLO","node":"D"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_sender_hint() {
        let headers = HeaderMap::new();
        let peer: SocketAddr = "10.0.0.7:51234".parse().unwrap();
        assert_eq!(
            sender_hint(&headers, Some(peer), 8080).as_deref(),
            Some("http://10.0.0.7:8080/")
        );
        assert!(sender_hint(&headers, None, 8080).is_none());
    }

    #[tokio::test]
    async fn test_delivery_lookup() {
        let (_node, api) = create_test_api();
        let mut app = api.router();

        call(&mut app, post("/", r#"{"msgid":"m1","dest":"B","ttl":2}"#)).await;

        let (status, body) = call(&mut app, get_req("/api/v1/outbox/m1")).await;
        assert_eq!(status, StatusCode::OK);
        let delivery: DeliveryResponse = serde_json::from_value(body).unwrap();
        assert_eq!(delivery.state, DeliveryState::New);
        assert_eq!(delivery.next_at, Some(0));

        let (status, body) = call(&mut app, get_req("/api/v1/outbox/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn test_send_originates_message() {
        let (node, api) = create_test_api();
        let mut app = api.router();

        let (status, body) = call(
            &mut app,
            post("/api/v1/send", r#"{"dest":"B","payload":{"subject":"hi"}}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "queued");

        let msgid = body["msgid"].as_str().unwrap();
        let record = node.outbox().get(msgid).unwrap();
        assert_eq!(record.message.ttl, 5);
        assert_eq!(record.message.payload["subject"], "hi");

        let (status, _) = call(&mut app, post("/api/v1/send", "{bad")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_status_and_routes() {
        let (node, api) = create_test_api();
        let mut app = api.router();
        node.routes()
            .upsert("B", "http://b:8080/", Utc::now(), RouteStatus::Online)
            .unwrap();

        let (status, body) = call(&mut app, get_req("/api/v1/status")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["node_id"], "A");
        assert_eq!(body["routes"][0]["node_id"], "B");

        let (_, body) = call(&mut app, get_req("/api/v1/routes")).await;
        assert_eq!(body[0]["address"], "http://b:8080/");
        assert_eq!(body[0]["status"], "online");
    }
}
