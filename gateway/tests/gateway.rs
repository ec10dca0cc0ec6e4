use gateway::GatewayService;
use gateway::config::{
    Config, HttpMethod, Listener, Match, Route, RouteAction, SessionConfig, UpstreamsConfig,
};
use gateway::session::{SessionClaims, SessionCodec};
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use url::Url;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SECRET: &str = "integration-secret";
const COOKIE_NAME: &str = "retail.session-token";

fn authenticated(path: &str, method: HttpMethod) -> Route {
    Route {
        r#match: Match {
            path: path.to_string(),
            method: Some(method),
        },
        action: RouteAction::Authenticated,
    }
}

fn config(primary: Url, secondary: Url) -> Config {
    Config {
        listener: Listener {
            host: "127.0.0.1".to_string(),
            port: 3000,
        },
        admin_listener: Listener {
            host: "127.0.0.1".to_string(),
            port: 3001,
        },
        route_prefix: "/api/".to_string(),
        upstreams: UpstreamsConfig {
            primary,
            secondary,
            timeout_secs: Some(5),
        },
        session: SessionConfig {
            secret: SECRET.to_string(),
            cookie_name: COOKIE_NAME.to_string(),
        },
        routes: vec![
            authenticated("/api/orders/list", HttpMethod::Get),
            authenticated("/api/orders/create", HttpMethod::Post),
        ],
    }
}

/// Serves the gateway on an ephemeral port and returns its address.
async fn start_gateway(config: Config) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let service = GatewayService::new(&config).unwrap();

    tokio::spawn(async move {
        let _ = shared::http::serve(listener, service).await;
    });

    addr
}

fn session_cookie(id_token: Option<&str>) -> String {
    signed_cookie(SessionClaims {
        sub: Some("user-1".to_string()),
        id_token: id_token.map(String::from),
        access_token: Some("A1".to_string()),
        exp: None,
    })
}

fn signed_cookie(mut claims: SessionClaims) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs();
    claims.exp = Some(now + 3600);
    let value = SessionCodec::new(SECRET).encode(&claims).unwrap();
    format!("{COOKIE_NAME}={value}")
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

fn refused_url() -> Url {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    Url::parse(&format!("http://127.0.0.1:{port}")).unwrap()
}

fn url(server: &MockServer) -> Url {
    Url::parse(&server.uri()).unwrap()
}

#[tokio::test]
async fn test_orders_list_with_session() {
    let primary = MockServer::start().await;
    let secondary = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orders/list"))
        .and(header("authorization", "Bearer T1"))
        .and(header("x-user-sub", "user-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-amzn-requestid", "req-1")
                .set_body_raw(r#"[{"sku":"A","qty":1}]"#, "application/json"),
        )
        .expect(1)
        .mount(&primary)
        .await;
    Mock::given(path("/orders/list"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&secondary)
        .await;

    let addr = start_gateway(config(url(&primary), url(&secondary))).await;

    let response = client()
        .get(format!("http://{addr}/api/orders/list"))
        .header("cookie", session_cookie(Some("T1")))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "application/json");
    assert_eq!(response.headers()["x-amzn-requestid"], "req-1");
    assert_eq!(response.text().await.unwrap(), r#"[{"sku":"A","qty":1}]"#);
}

#[tokio::test]
async fn test_orders_list_without_session() {
    let primary = MockServer::start().await;
    let secondary = MockServer::start().await;
    for server in [&primary, &secondary] {
        Mock::given(path("/orders/list"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(server)
            .await;
    }

    let addr = start_gateway(config(url(&primary), url(&secondary))).await;

    let response = client()
        .get(format!("http://{addr}/api/orders/list"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
    assert_eq!(
        response.text().await.unwrap(),
        r#"{"message":"Unauthorized"}"#
    );
}

#[tokio::test]
async fn test_orders_create_fails_over_on_connection_error() {
    let secondary = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders/create"))
        .and(body_string(r#"{"sku":"A","qty":2}"#))
        .respond_with(ResponseTemplate::new(201).set_body_string(r#"{"orderId":"abc"}"#))
        .expect(1)
        .mount(&secondary)
        .await;

    let addr = start_gateway(config(refused_url(), url(&secondary))).await;

    let response = client()
        .post(format!("http://{addr}/api/orders/create"))
        .header("cookie", session_cookie(Some("T1")))
        .header("content-type", "application/json")
        .body(r#"{"sku":"A","qty":2}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 201);
    assert_eq!(response.text().await.unwrap(), r#"{"orderId":"abc"}"#);
}

#[tokio::test]
async fn test_anonymous_forward_strips_authorization() {
    let primary = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/inventory/items"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .expect(1)
        .mount(&primary)
        .await;
    let secondary = MockServer::start().await;

    let addr = start_gateway(config(url(&primary), url(&secondary))).await;

    let response = client()
        .get(format!("http://{addr}/api/inventory/items"))
        .header("authorization", "Bearer client-supplied")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let received = primary.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert!(received[0].headers.get("authorization").is_none());
    assert_eq!(
        received[0].headers.get("via").unwrap(),
        "1.1 cloudretail"
    );
}

#[tokio::test]
async fn test_access_token_used_without_id_token() {
    let primary = MockServer::start().await;
    Mock::given(path("/inventory"))
        .and(header("authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&primary)
        .await;
    let secondary = MockServer::start().await;

    let addr = start_gateway(config(url(&primary), url(&secondary))).await;

    let response = client()
        .get(format!("http://{addr}/api/inventory"))
        .header("cookie", session_cookie(None))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
}

#[tokio::test]
async fn test_server_error_fails_over_with_same_request() {
    let primary = MockServer::start().await;
    let secondary = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/inventory/A"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&primary)
        .await;
    Mock::given(method("PUT"))
        .and(path("/inventory/A"))
        .and(body_string(r#"{"qty":5}"#))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"sku":"A","qty":5}"#))
        .expect(1)
        .mount(&secondary)
        .await;

    let addr = start_gateway(config(url(&primary), url(&secondary))).await;

    let response = client()
        .put(format!("http://{addr}/api/inventory/A"))
        .body(r#"{"qty":5}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), r#"{"sku":"A","qty":5}"#);
}

#[tokio::test]
async fn test_client_error_not_failed_over() {
    let primary = MockServer::start().await;
    let secondary = MockServer::start().await;

    Mock::given(path("/inventory/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string(r#"{"message":"Not found"}"#))
        .expect(1)
        .mount(&primary)
        .await;
    Mock::given(path("/inventory/missing"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&secondary)
        .await;

    let addr = start_gateway(config(url(&primary), url(&secondary))).await;

    let response = client()
        .get(format!("http://{addr}/api/inventory/missing"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
    assert_eq!(
        response.text().await.unwrap(),
        r#"{"message":"Not found"}"#
    );
}

#[tokio::test]
async fn test_both_upstreams_unreachable() {
    let addr = start_gateway(config(refused_url(), refused_url())).await;

    let response = client()
        .delete(format!("http://{addr}/api/inventory/A"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 502);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Bad Gateway");
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .starts_with("Upstream request failed for secondary")
    );
}

#[tokio::test]
async fn test_orders_create_without_subject() {
    let primary = MockServer::start().await;
    let secondary = MockServer::start().await;
    for server in [&primary, &secondary] {
        Mock::given(path("/orders/create"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(server)
            .await;
    }

    let addr = start_gateway(config(url(&primary), url(&secondary))).await;

    let cookie = signed_cookie(SessionClaims {
        id_token: Some("T1".to_string()),
        ..Default::default()
    });
    let response = client()
        .post(format!("http://{addr}/api/orders/create"))
        .header("cookie", cookie)
        .body(r#"{"sku":"A","qty":2}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
    assert_eq!(
        response.text().await.unwrap(),
        r#"{"message":"Unauthorized"}"#
    );
}

#[tokio::test]
async fn test_get_body_not_forwarded() {
    let primary = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/inventory/A"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"sku":"A"}"#))
        .expect(1)
        .mount(&primary)
        .await;
    let secondary = MockServer::start().await;

    let addr = start_gateway(config(url(&primary), url(&secondary))).await;

    let response = client()
        .get(format!("http://{addr}/api/inventory/A"))
        .body("ignored body")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let received = primary.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert!(received[0].body.is_empty());
}

#[tokio::test]
async fn test_head_keeps_upstream_content_length() {
    let primary = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/inventory/A"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-length", "42"))
        .expect(1)
        .mount(&primary)
        .await;
    let secondary = MockServer::start().await;

    let addr = start_gateway(config(url(&primary), url(&secondary))).await;

    let response = client()
        .head(format!("http://{addr}/api/inventory/A"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-length"], "42");

    let received = primary.received_requests().await.unwrap();
    assert_eq!(received[0].method.as_str(), "HEAD");
    assert!(received[0].body.is_empty());
}

#[tokio::test]
async fn test_options_forwarded() {
    let primary = MockServer::start().await;
    Mock::given(method("OPTIONS"))
        .and(path("/inventory"))
        .respond_with(ResponseTemplate::new(204).insert_header("allow", "GET, POST, OPTIONS"))
        .expect(1)
        .mount(&primary)
        .await;
    let secondary = MockServer::start().await;

    let addr = start_gateway(config(url(&primary), url(&secondary))).await;

    let response = client()
        .request(reqwest::Method::OPTIONS, format!("http://{addr}/api/inventory"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 204);
    assert_eq!(response.headers()["allow"], "GET, POST, OPTIONS");
}

#[tokio::test]
async fn test_patch_body_forwarded() {
    let primary = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/inventory/A"))
        .and(body_string(r#"{"qty":3}"#))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"sku":"A","qty":3}"#))
        .expect(1)
        .mount(&primary)
        .await;
    let secondary = MockServer::start().await;

    let addr = start_gateway(config(url(&primary), url(&secondary))).await;

    let response = client()
        .patch(format!("http://{addr}/api/inventory/A"))
        .body(r#"{"qty":3}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), r#"{"sku":"A","qty":3}"#);
}
