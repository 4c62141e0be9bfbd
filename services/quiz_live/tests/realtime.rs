use futures::{SinkExt, StreamExt};
use quiz_live::{
    api::{build_router, AppState},
    auth,
    config::Config,
};
use std::net::{SocketAddr, TcpListener};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async, tungstenite::client::IntoClientRequest, tungstenite::Message as WsMessage,
    MaybeTlsStream, WebSocketStream,
};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server(jwt_secret: Option<&str>) -> (SocketAddr, JoinHandle<()>, AppState) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();
    let config = Config {
        bind: addr.to_string(),
        jwt_secret: jwt_secret.map(String::from),
        ..Default::default()
    };
    let state = AppState::new(config).unwrap();
    let app = build_router(state.clone());
    let server = tokio::spawn(async move {
        axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service())
            .await
            .unwrap();
    });
    (addr, server, state)
}

async fn next_json(ws: &mut Ws) -> serde_json::Value {
    loop {
        let msg = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for frame")
            .unwrap()
            .unwrap();
        if let WsMessage::Text(txt) = msg {
            return serde_json::from_str(&txt).unwrap();
        }
    }
}

async fn connections(client: &reqwest::Client, addr: SocketAddr) -> u64 {
    let v: serde_json::Value = client
        .get(format!("http://{}/api/stats", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    v["connections"].as_u64().unwrap()
}

#[tokio::test]
async fn global_and_quiz_subscribers() {
    let (addr, server, state) = spawn_server(None).await;
    let client = reqwest::Client::new();

    let (mut lobby, _) = connect_async(format!("ws://{}/ws/leaderboard", addr))
        .await
        .unwrap();
    let (mut quiz, _) = connect_async(format!("ws://{}/ws/quiz/quiz1", addr))
        .await
        .unwrap();

    // first frame is always the leaderboard snapshot
    assert_eq!(next_json(&mut lobby).await["type"], "LEADERBOARD_UPDATE");
    assert_eq!(next_json(&mut quiz).await["type"], "LEADERBOARD_UPDATE");
    assert_eq!(connections(&client, addr).await, 2);

    let resp = client
        .post(format!("http://{}/api/events", addr))
        .json(&serde_json::json!({"type": "NEW_QUIZ", "data": {"title": "Rust"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    for ws in [&mut lobby, &mut quiz] {
        let v = next_json(ws).await;
        assert_eq!(v["type"], "NEW_QUIZ");
        assert_eq!(v["data"]["title"], "Rust");
        assert!(v.get("quiz_id").is_none());
    }

    client
        .post(format!("http://{}/api/events", addr))
        .json(&serde_json::json!({"type": "QUESTION", "data": 1, "quiz_id": "quiz1"}))
        .send()
        .await
        .unwrap();
    let v = next_json(&mut quiz).await;
    assert_eq!(v["type"], "QUESTION");
    assert_eq!(v["quiz_id"], "quiz1");
    assert!(timeout(Duration::from_millis(300), lobby.next()).await.is_err());

    quiz.close(None).await.unwrap();
    let mut live = connections(&client, addr).await;
    for _ in 0..20 {
        if live == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        live = connections(&client, addr).await;
    }
    assert_eq!(live, 1);

    server.abort();
    state.hub.shutdown().await;
}

#[tokio::test]
async fn score_submission_updates_listeners() {
    let (addr, server, state) = spawn_server(None).await;
    let client = reqwest::Client::new();

    let (mut lobby, _) = connect_async(format!("ws://{}/ws/leaderboard", addr))
        .await
        .unwrap();
    let (mut quiz, _) = connect_async(format!("ws://{}/ws/leaderboard?quiz_id=quiz7", addr))
        .await
        .unwrap();
    next_json(&mut lobby).await;
    next_json(&mut quiz).await;

    let resp = client
        .post(format!("http://{}/api/scores", addr))
        .json(&serde_json::json!({"user_id": "u1", "name": "Ann", "quiz_id": "quiz7", "points": 3}))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let v: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(v["total"], 3);

    let v = next_json(&mut quiz).await;
    assert_eq!(v["type"], "SCORE_SUBMITTED");
    assert_eq!(v["data"]["total"], 3);
    let v = next_json(&mut quiz).await;
    assert_eq!(v["type"], "LEADERBOARD_UPDATE");
    assert_eq!(v["data"][0]["name"], "Ann");

    let v = next_json(&mut lobby).await;
    assert_eq!(v["type"], "LEADERBOARD_UPDATE");
    assert_eq!(v["data"][0]["score"], 3);

    server.abort();
    state.hub.shutdown().await;
}

#[tokio::test]
async fn websocket_requires_token_when_secret_set() {
    let (addr, server, state) = spawn_server(Some("k3y")).await;

    assert!(connect_async(format!("ws://{}/ws/leaderboard", addr))
        .await
        .is_err());

    let token = auth::issue_jwt(b"k3y", "u1", "", time::Duration::minutes(5)).unwrap();
    let (mut ws, _) = connect_async(format!("ws://{}/ws/leaderboard?token={}", addr, token))
        .await
        .unwrap();
    assert_eq!(next_json(&mut ws).await["type"], "LEADERBOARD_UPDATE");

    let mut req = format!("ws://{}/ws/quiz/q2", addr)
        .into_client_request()
        .unwrap();
    req.headers_mut()
        .append("Authorization", format!("Bearer {}", token).parse().unwrap());
    let (mut ws, _) = connect_async(req).await.unwrap();
    assert_eq!(next_json(&mut ws).await["type"], "LEADERBOARD_UPDATE");
    ws.send(WsMessage::Text("ping".into())).await.unwrap();

    server.abort();
    state.hub.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_client_sockets() {
    let (addr, server, state) = spawn_server(None).await;
    let (mut ws, _) = connect_async(format!("ws://{}/ws/leaderboard", addr))
        .await
        .unwrap();
    next_json(&mut ws).await;

    state.hub.shutdown().await;
    let end = timeout(Duration::from_secs(2), async {
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_close() {
                break;
            }
        }
    })
    .await;
    assert!(end.is_ok());
    assert_eq!(state.hub.live_count(), 0);
    server.abort();
}
