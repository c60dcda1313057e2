//! End-to-end tests for the provisioning API.
//!
//! These tests start a real Axum server on a random port backed by the
//! scripted network and drive it with a WebSocket client and plain HTTP:
//! - Login channel auth and subprotocol negotiation
//! - QR and pairing-code flows through to the success frame
//! - Validation errors and client-initiated closure
//! - Ping, logout and health endpoints

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

use walink::identity::{IdentityStore, InMemoryIdentityStore, LocalIdentity, LoginId, LoginState};
use walink::network::mock::{MockNetwork, MockStats, Scripted};
use walink::pairing::LOGIN_OVERRIDDEN;
use walink::provisioning::{ProvisioningState, start_server};

const SECRET: &str = "test-secret-12345";
const ALICE: &str = "@alice:example.org";
const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    state: Arc<ProvisioningState>,
    store: Arc<InMemoryIdentityStore>,
    stats: Arc<MockStats>,
}

fn is_bind_permission_error<E: std::fmt::Display>(err: &E) -> bool {
    err.to_string().contains("Operation not permitted")
        || err.to_string().contains("Failed to bind")
}

async fn start_test_server(
    configure: impl FnOnce(MockNetwork) -> MockNetwork,
) -> Option<TestServer> {
    let store = Arc::new(InMemoryIdentityStore::new());
    let network = configure(MockNetwork::new(store.clone()));
    let stats = network.stats();
    let state = Arc::new(ProvisioningState::new(store.clone(), Arc::new(network)));

    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    match start_server(addr, state.clone(), SecretString::from(SECRET.to_string())).await {
        Ok(addr) => Some(TestServer {
            addr,
            state,
            store,
            stats,
        }),
        Err(e) if is_bind_permission_error(&e) => None,
        Err(e) => panic!("Failed to start test server: {e:?}"),
    }
}

fn login_request(
    addr: SocketAddr,
    query: &str,
    secret: Option<&str>,
) -> tokio_tungstenite::tungstenite::handshake::client::Request {
    let url = format!("ws://{}/v1/login?{}", addr, query);
    let mut request = url.into_client_request().unwrap();
    let protocols = match secret {
        Some(secret) => format!(
            "net.maunium.whatsapp.login, net.maunium.whatsapp.auth-{}",
            secret
        ),
        None => "net.maunium.whatsapp.login".to_string(),
    };
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", protocols.parse().unwrap());
    request
}

/// Connect to the login channel, authenticating via subprotocol.
async fn connect_login(addr: SocketAddr, query: &str) -> WsStream {
    let (stream, response) = tokio_tungstenite::connect_async(login_request(addr, query, Some(SECRET)))
        .await
        .expect("Failed to connect WebSocket");
    assert_eq!(
        response.headers().get("Sec-WebSocket-Protocol").unwrap(),
        "net.maunium.whatsapp.login"
    );
    stream
}

/// Read the next frame as JSON, with a timeout.
async fn recv_json(stream: &mut WsStream) -> Value {
    let msg = timeout(TIMEOUT, stream.next())
        .await
        .expect("Timed out waiting for WS message")
        .expect("Stream ended")
        .expect("WS error");
    match msg {
        Message::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("Expected Text frame, got {:?}", other),
    }
}

/// Assert the server closes the channel without sending anything else.
async fn expect_close(stream: &mut WsStream) {
    let msg = timeout(TIMEOUT, stream.next())
        .await
        .expect("Timed out waiting for close");
    match msg {
        Some(Ok(Message::Close(_))) | None => {}
        other => panic!("Expected close, got {:?}", other),
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    timeout(TIMEOUT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn http() -> reqwest::Client {
    reqwest::Client::new()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_qr_login_end_to_end() {
    let Some(server) = start_test_server(|n| {
        n.with_qr_script(vec![
            Scripted::Qr("2@first".into()),
            Scripted::Qr("2@second".into()),
            Scripted::Complete,
        ])
    })
    .await
    else {
        return;
    };
    let mut ws = connect_login(server.addr, "user_id=@alice:example.org&tz=Europe/Madrid").await;

    assert_eq!(recv_json(&mut ws).await, json!({"code": "2@first", "timeout": 60}));
    assert_eq!(recv_json(&mut ws).await, json!({"code": "2@second", "timeout": 20}));
    assert_eq!(
        recv_json(&mut ws).await,
        json!({
            "success": true,
            "jid": "12345550123:1@s.whatsapp.net",
            "platform": "android",
            "phone": "+12345550123",
        })
    );
    expect_close(&mut ws).await;

    assert_eq!(server.stats.timezones(), vec![Some("Europe/Madrid".to_string())]);
    eventually(|| server.state.registry.active_pairings() == 0).await;

    let response = http()
        .get(format!("http://{}/v1/ping?user_id={}", server.addr, ALICE))
        .bearer_auth(SECRET)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body,
        json!({
            "whatsapp": {
                "has_session": true,
                "management_room": "",
                "conn": {"is_connected": true, "is_logged_in": true},
                "jid": "12345550123:1@s.whatsapp.net",
                "phone": "+12345550123",
                "platform": "android",
            },
            "mxid": ALICE,
        })
    );
}

#[tokio::test]
async fn test_phone_login_end_to_end() {
    let Some(server) = start_test_server(|n| n).await else {
        return;
    };
    let mut ws = connect_login(
        server.addr,
        "user_id=@alice:example.org&phone_number=%2B1%20(234)%205550123",
    )
    .await;

    let code = recv_json(&mut ws).await;
    assert_eq!(code["timeout"], 180);
    assert!(code["pairing_code"].as_str().unwrap().contains('-'));

    let success = recv_json(&mut ws).await;
    assert_eq!(success["success"], true);
    assert_eq!(success["phone"], "+12345550123");
    expect_close(&mut ws).await;

    assert_eq!(server.stats.submitted().len(), 1);
}

#[tokio::test]
async fn test_invalid_phone_number_single_error_frame() {
    let Some(server) = start_test_server(|n| n).await else {
        return;
    };
    let mut ws = connect_login(server.addr, "user_id=@alice:example.org&phone_number=0234555").await;

    assert_eq!(
        recv_json(&mut ws).await,
        json!({
            "success": false,
            "error": "Please enter the phone number in international format",
            "errcode": "invalid phone number",
        })
    );
    expect_close(&mut ws).await;
    assert_eq!(server.stats.logins_created(), 0);
}

#[tokio::test]
async fn test_unexpected_step_reports_and_cancels() {
    let Some(server) = start_test_server(|n| {
        n.with_qr_script(vec![
            Scripted::Qr("2@first".into()),
            Scripted::Other("logged_out".into()),
        ])
    })
    .await
    else {
        return;
    };
    let mut ws = connect_login(server.addr, "user_id=@alice:example.org").await;

    assert_eq!(recv_json(&mut ws).await["timeout"], 60);
    assert_eq!(
        recv_json(&mut ws).await,
        json!({"errcode": "M_UNKNOWN", "error": "Unexpected step while waiting for login"})
    );
    expect_close(&mut ws).await;
    assert_eq!(server.stats.effective_cancels(), 1);
}

#[tokio::test]
async fn test_client_close_cancels_login() {
    let Some(server) = start_test_server(|n| {
        n.with_qr_script(vec![Scripted::Qr("2@first".into()), Scripted::Pending])
    })
    .await
    else {
        return;
    };
    let mut ws = connect_login(server.addr, "user_id=@alice:example.org").await;
    assert_eq!(recv_json(&mut ws).await["code"], "2@first");
    assert_eq!(server.state.registry.active_pairings(), 1);

    ws.close(None).await.unwrap();

    eventually(|| server.stats.effective_cancels() == 1).await;
    eventually(|| server.state.registry.active_pairings() == 0).await;
    assert!(
        server
            .store
            .list_logins(&LocalIdentity::new(ALICE))
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_login_requires_auth() {
    let Some(server) = start_test_server(|n| n).await else {
        return;
    };

    for secret in [None, Some("wrong-secret")] {
        let err = tokio_tungstenite::connect_async(login_request(
            server.addr,
            "user_id=@alice:example.org",
            secret,
        ))
        .await
        .expect_err("unauthenticated upgrade must fail");
        match err {
            tokio_tungstenite::tungstenite::Error::Http(response) => {
                assert_eq!(response.status(), 401)
            }
            other => panic!("Expected HTTP error, got {other:?}"),
        }
    }
    assert_eq!(server.stats.logins_created(), 0);
}

#[tokio::test]
async fn test_login_requires_user_id() {
    let Some(server) = start_test_server(|n| n).await else {
        return;
    };

    let err = tokio_tungstenite::connect_async(login_request(server.addr, "tz=UTC", Some(SECRET)))
        .await
        .expect_err("missing user_id must fail");
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 400)
        }
        other => panic!("Expected HTTP error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_ping_without_login() {
    let Some(server) = start_test_server(|n| n).await else {
        return;
    };

    let response = http()
        .get(format!("http://{}/v1/ping?user_id={}", server.addr, ALICE))
        .bearer_auth(SECRET)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body,
        json!({"success": false, "error": "You're not logged in", "errcode": "not logged in"})
    );
}

#[tokio::test]
async fn test_ping_missing_user_id() {
    let Some(server) = start_test_server(|n| n).await else {
        return;
    };

    let response = http()
        .get(format!("http://{}/v1/ping", server.addr))
        .bearer_auth(SECRET)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"error": "Missing user_id", "errcode": "missing user_id"}));
}

#[tokio::test]
async fn test_logout_keeps_records() {
    let Some(server) = start_test_server(|n| n).await else {
        return;
    };
    let mut ws = connect_login(server.addr, "user_id=@alice:example.org").await;
    recv_json(&mut ws).await;
    assert_eq!(recv_json(&mut ws).await["success"], true);
    expect_close(&mut ws).await;

    let response = http()
        .post(format!("http://{}/v1/logout?user_id={}", server.addr, ALICE))
        .bearer_auth(SECRET)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"success": true, "status": "Logged out successfully"}));

    let logins = server
        .store
        .list_logins(&LocalIdentity::new(ALICE))
        .await
        .unwrap();
    assert_eq!(logins.len(), 1);
    assert_eq!(logins[0].state, LoginState::Active);

    let body: Value = http()
        .get(format!("http://{}/v1/ping?user_id={}", server.addr, ALICE))
        .bearer_auth(SECRET)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["whatsapp"]["has_session"], false);
    assert_eq!(body["whatsapp"]["conn"]["is_connected"], false);
}

#[tokio::test]
async fn test_logout_without_login() {
    let Some(server) = start_test_server(|n| n).await else {
        return;
    };

    let response = http()
        .post(format!("http://{}/v1/logout?user_id={}", server.addr, ALICE))
        .bearer_auth(SECRET)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["errcode"], "not logged in");
}

#[tokio::test]
async fn test_relink_supersedes_previous_login() {
    let Some(server) = start_test_server(|n| n).await else {
        return;
    };

    let mut ws = connect_login(server.addr, "user_id=@alice:example.org").await;
    recv_json(&mut ws).await;
    assert_eq!(recv_json(&mut ws).await["success"], true);
    expect_close(&mut ws).await;

    let mut ws = connect_login(server.addr, "user_id=@alice:example.org&phone_number=19998887777").await;
    assert_eq!(recv_json(&mut ws).await["timeout"], 180);
    assert_eq!(recv_json(&mut ws).await["phone"], "+19998887777");
    expect_close(&mut ws).await;

    let identity = LocalIdentity::new(ALICE);
    let store = server.store.clone();
    timeout(TIMEOUT, async {
        loop {
            let logins = store.list_logins(&identity).await.unwrap();
            let old = logins
                .iter()
                .find(|l| l.id == LoginId::new("12345550123"))
                .unwrap();
            if old.state
                == (LoginState::LoggedOut {
                    reason: LOGIN_OVERRIDDEN.to_string(),
                })
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("old login was not superseded");

    let logins = store.list_logins(&identity).await.unwrap();
    let new = logins
        .iter()
        .find(|l| l.id == LoginId::new("19998887777"))
        .unwrap();
    assert!(new.is_active());
}

#[tokio::test]
async fn test_health_is_public() {
    let Some(server) = start_test_server(|n| n).await else {
        return;
    };

    let response = http()
        .get(format!("http://{}/v1/health", server.addr))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"status": "healthy", "active_pairings": 0}));
}

#[tokio::test]
async fn test_status_endpoints_require_auth() {
    let Some(server) = start_test_server(|n| n).await else {
        return;
    };

    let response = http()
        .get(format!("http://{}/v1/ping?user_id={}", server.addr, ALICE))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = http()
        .post(format!("http://{}/v1/logout?user_id={}", server.addr, ALICE))
        .bearer_auth("nope")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}
