mod common;

use cgminer_dashboard::api::HttpBackend;
use cgminer_dashboard::channel::{ConnectionState, WebSocketTransport};
use cgminer_dashboard::mining::{CoinDescriptor, DispatchCommand, MiningConfiguration, MiningMode};
use cgminer_dashboard::{DashboardError, DashboardSession, DispatchError, SessionOptions};
use common::{wait_until, FakeBackend};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn start_session(fake: &FakeBackend) -> DashboardSession {
    let backend = HttpBackend::with_timeout(&fake.base_url(), Duration::from_millis(200)).unwrap();
    let options = SessionOptions {
        push_url: fake.push_url(),
        reconnect_delay: Duration::from_millis(200),
        poll_interval: Duration::from_millis(200),
        poll_timeout: Duration::from_millis(200),
    };
    DashboardSession::start(Arc::new(backend), Arc::new(WebSocketTransport::default()), options)
}

fn pool_config(username: &str, threads: u32) -> MiningConfiguration {
    MiningConfiguration {
        coin: Some(CoinDescriptor {
            name: "Bitcoin".to_string(),
            symbol: "BTC".to_string(),
            algorithm: "sha256d".to_string(),
            default_port: None,
        }),
        mode: MiningMode::Pool,
        threads,
        pool_username: username.to_string(),
        pool_password: "x".to_string(),
        ..Default::default()
    }
}

/// 推送领先时，落后的轮询结果不得覆盖
#[tokio::test]
async fn test_lagging_poll_does_not_regress_push() {
    let fake = FakeBackend::spawn().await;
    let session = start_session(&fake);
    let status = session.mining_status();

    fake.wait_for_subscribers(1).await;
    fake.push_status(true, 10);
    wait_until(WAIT, || status.latest().is_some_and(|s| s.sequence == 10)).await;

    // 轮询一直返回序号 1
    let polls = fake.state.status_polls.load(Ordering::SeqCst);
    wait_until(WAIT, || fake.state.status_polls.load(Ordering::SeqCst) >= polls + 3).await;

    let latest = status.latest().unwrap();
    assert_eq!(latest.sequence, 10);
    assert!(latest.is_mining);
    assert!(session.get_reconciler_stats().await.status_discarded >= 1);

    session.dispose();
}

/// 推送通道断开后按固定间隔重连
#[tokio::test]
async fn test_reconnect_after_server_close() {
    let fake = FakeBackend::spawn().await;
    let session = start_session(&fake);
    let status = session.mining_status();
    let connection = session.connection_state();

    fake.wait_for_subscribers(1).await;
    fake.push_status(true, 10);
    wait_until(WAIT, || status.latest().is_some_and(|s| s.sequence == 10)).await;

    fake.drop_push_connections();
    wait_until(WAIT, || fake.ws_connections() >= 2).await;
    fake.wait_for_subscribers(1).await;
    wait_until(WAIT, || *connection.borrow() == ConnectionState::Connected).await;

    // 重连后的首条推送同样按序号比较，更旧的值被丢弃
    fake.push_status(false, 9);
    tokio::time::sleep(Duration::from_millis(300)).await;
    let held = status.latest().unwrap();
    assert_eq!(held.sequence, 10);
    assert!(held.is_mining);

    fake.push_status(false, 11);
    wait_until(WAIT, || status.latest().is_some_and(|s| s.sequence == 11)).await;
    assert!(!status.latest().unwrap().is_mining);
    assert!(session.get_reconciler_stats().await.resets >= 2);

    session.dispose();
}

/// 本地校验失败不发请求；成功下发后状态仍以对账为准
#[tokio::test]
async fn test_dispatch_through_session() {
    let fake = FakeBackend::spawn().await;
    let session = start_session(&fake);
    let status = session.mining_status();

    let envelope = session.refresh_capabilities().await.unwrap();
    assert_eq!(envelope.max_safe_threads(), 32);

    let err = session
        .dispatch(DispatchCommand::Start, &pool_config("worker", 1000))
        .await
        .unwrap_err();
    match err {
        DashboardError::Dispatch(DispatchError::Invalid(violations)) => {
            assert_eq!(violations[0].field, "threads");
        }
        other => panic!("unexpected error: {}", other),
    }

    let err = session
        .dispatch(DispatchCommand::Start, &pool_config("", 4))
        .await
        .unwrap_err();
    assert!(matches!(err, DashboardError::Dispatch(DispatchError::Invalid(_))));
    assert!(fake.state.start_requests.lock().unwrap().is_empty());

    let outcome = session
        .dispatch(DispatchCommand::Start, &pool_config("worker", 4))
        .await
        .unwrap();
    assert_eq!(outcome.message, "Mining started");
    assert_eq!(session.accepted_configuration().latest().unwrap().threads, 4);

    // 后端在下一次快照中报告挖矿
    fake.state.poll_sequence.store(2, Ordering::SeqCst);
    wait_until(WAIT, || status.latest().is_some_and(|s| s.is_mining && s.sequence == 2)).await;

    let outcome = session
        .dispatch(DispatchCommand::Update, &pool_config("worker", 6))
        .await
        .unwrap();
    assert!(outcome.sent);
    assert_eq!(fake.state.start_requests.lock().unwrap().len(), 2);
    assert_eq!(session.accepted_configuration().latest().unwrap().threads, 6);

    session.dispose();
}

/// 后端内部错误的 detail 原样交给操作员，不接受配置
#[tokio::test]
async fn test_dispatch_surfaces_server_error_detail() {
    let fake = FakeBackend::spawn().await;
    let session = start_session(&fake);
    fake.state.failing.store(true, Ordering::SeqCst);

    let err = session
        .dispatch(DispatchCommand::Start, &pool_config("worker", 4))
        .await
        .unwrap_err();
    match err {
        DashboardError::Dispatch(e) => {
            assert_eq!(e.problems(), vec!["Failed to start mining: wallet node unreachable"]);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(session.accepted_configuration().latest().is_none());

    session.dispose();
}

/// 释放后不再轮询、不再连接
#[tokio::test]
async fn test_dispose_cancels_background_work() {
    let fake = FakeBackend::spawn().await;
    let session = start_session(&fake);
    let status = session.mining_status();

    fake.wait_for_subscribers(1).await;
    wait_until(WAIT, || status.latest().is_some()).await;

    session.dispose();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let polls = fake.state.status_polls.load(Ordering::SeqCst);
    let connections = fake.ws_connections();

    fake.push_status(true, 99);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(fake.state.status_polls.load(Ordering::SeqCst), polls);
    assert_eq!(fake.ws_connections(), connections);
    assert_ne!(status.latest().unwrap().sequence, 99);
    assert!(matches!(
        session.dispatch(DispatchCommand::Stop, &MiningConfiguration::default()).await,
        Err(DashboardError::Disposed)
    ));
}

/// 后端不可用时会话保持运行，恢复后自动接上
#[tokio::test]
async fn test_session_survives_missing_backend() {
    let fake = FakeBackend::spawn().await;
    let addr = fake.addr;
    drop(fake);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let backend = HttpBackend::with_timeout(&format!("http://{}", addr), Duration::from_millis(200)).unwrap();
    let options = SessionOptions {
        push_url: format!("ws://{}/ws", addr),
        reconnect_delay: Duration::from_millis(100),
        poll_interval: Duration::from_millis(100),
        poll_timeout: Duration::from_millis(100),
    };
    let session = DashboardSession::start(Arc::new(backend), Arc::new(WebSocketTransport::default()), options);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(session.mining_status().latest().is_none());
    assert_ne!(*session.connection_state().borrow(), ConnectionState::Connected);

    let stats = session.get_reconciler_stats().await;
    assert!(stats.poll_failures >= 1);
    assert!(stats.last_poll_error.is_some());

    session.dispose();
}
