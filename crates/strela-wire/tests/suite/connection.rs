use std::time::Duration;

use strela_wire::mock::{MockDebuggee, MockDebuggeeConfig};
use strela_wire::{
    AckKind, ClientConfig, Command, ConnectionState, DebuggeeClient, DebuggeeEvent,
    DebuggeeSession, Reply, WireError,
};
use tokio::time::timeout;

use super::{connect, listener, TIMEOUT};

#[tokio::test]
async fn debuggee_exit_fails_outstanding_requests() {
    let config = MockDebuggeeConfig {
        auto_reply: false,
        ..MockDebuggeeConfig::default()
    };
    let (client, mock) = connect(config).await;
    let mut events = client.subscribe_events();

    let first = client.issue(Command::Stack).await.unwrap().unwrap();
    let second = client.issue(Command::Pause).await.unwrap().unwrap();
    mock.close().await.unwrap();

    assert!(matches!(first.wait().await, Err(WireError::ConnectionClosed)));
    assert!(matches!(second.wait().await, Err(WireError::ConnectionClosed)));
    let event = timeout(TIMEOUT, events.recv()).await.unwrap().unwrap();
    assert_eq!(event, DebuggeeEvent::Terminated);
    assert!(client.shutdown_token().is_cancelled());
}

#[tokio::test]
async fn session_reports_closed_after_debuggee_exit() {
    let (listener, addr) = listener().await;
    let (stream, mock) = tokio::join!(listener.accept(Some(TIMEOUT)), MockDebuggee::connect(addr));
    let (stream, mock) = (stream.unwrap(), mock.unwrap());

    let client = DebuggeeClient::from_tcp(stream, ClientConfig::default());
    let token = client.shutdown_token();
    let mut session = DebuggeeSession::new();
    session.connect(client).await.unwrap();
    assert_eq!(session.state(), ConnectionState::Connected);

    mock.close().await.unwrap();
    timeout(TIMEOUT, token.cancelled()).await.unwrap();
    assert_eq!(session.state(), ConnectionState::Closed);

    // Disconnecting an already-dead session is a no-op.
    session.disconnect().await.unwrap();
    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn disconnect_reaches_the_debuggee_once() {
    let (listener, addr) = listener().await;
    let (stream, mock) = tokio::join!(listener.accept(Some(TIMEOUT)), MockDebuggee::connect(addr));
    let (stream, mock) = (stream.unwrap(), mock.unwrap());

    let mut session = DebuggeeSession::new();
    session
        .connect(DebuggeeClient::from_tcp(stream, ClientConfig::default()))
        .await
        .unwrap();

    session.disconnect().await.unwrap();
    session.disconnect().await.unwrap();
    timeout(TIMEOUT, mock.finished()).await.unwrap();

    assert_eq!(mock.commands().await, vec![Command::Disconnect]);
    assert_eq!(session.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn reply_timeout_leaves_later_requests_aligned() {
    let (listener, addr) = listener().await;
    let config = MockDebuggeeConfig {
        auto_reply: false,
        ..MockDebuggeeConfig::default()
    };
    let (stream, mock) = tokio::join!(
        listener.accept(Some(TIMEOUT)),
        MockDebuggee::connect_with_config(addr, config)
    );
    let client = DebuggeeClient::from_tcp(
        stream.unwrap(),
        ClientConfig {
            reply_timeout: Some(Duration::from_millis(50)),
            ..ClientConfig::default()
        },
    );
    let mock = mock.unwrap();

    assert!(matches!(client.stack().await, Err(WireError::Timeout)));

    let pause = client.issue(Command::Pause).await.unwrap().unwrap();
    // The stale ACK_STACK is consumed by the timed-out slot, not by PAUSE.
    mock.send_raw(b"ACK_STACK\n0\nACK_PAUSE\n").await.unwrap();
    pause.wait().await.unwrap();
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn unknown_tag_is_reported_and_the_stream_continues() {
    let config = MockDebuggeeConfig {
        auto_reply: false,
        ..MockDebuggeeConfig::default()
    };
    let (client, mock) = connect(config).await;
    let mut events = client.subscribe_events();

    let pending = client.issue(Command::Continue).await.unwrap().unwrap();
    mock.send_raw(b"BOGUS\nACK_CONTINUE\n").await.unwrap();

    let event = timeout(TIMEOUT, events.recv()).await.unwrap().unwrap();
    assert!(
        matches!(&event, DebuggeeEvent::ProtocolError(msg) if msg.contains("BOGUS")),
        "{event:?}"
    );
    pending.wait().await.unwrap();
}

#[tokio::test]
async fn reply_written_with_an_overlong_line_still_resolves() {
    let config = MockDebuggeeConfig {
        auto_reply: false,
        ..MockDebuggeeConfig::default()
    };
    let (client, mock) = connect(config).await;
    let mut events = client.subscribe_events();
    let pending = client.issue(Command::Pause).await.unwrap().unwrap();

    let mut bytes = b"ACK_PAUSE\n".to_vec();
    bytes.resize(bytes.len() + strela_wire::MAX_LINE_BYTES + 1, b'x');
    let result = tokio::select! {
        result = pending.wait() => result,
        _ = async {
            let _ = mock.send_raw(&bytes).await;
            std::future::pending::<()>().await
        } => unreachable!(),
    };
    assert_eq!(result.unwrap(), Reply::Ack(AckKind::Pause));

    let event = timeout(TIMEOUT, events.recv()).await.unwrap().unwrap();
    assert_eq!(event, DebuggeeEvent::Terminated);
    assert!(client.is_closed());
}

#[tokio::test]
async fn overlong_line_terminates_the_session() {
    let config = MockDebuggeeConfig {
        auto_reply: false,
        ..MockDebuggeeConfig::default()
    };
    let (client, mock) = connect(config).await;
    let pending = client.issue(Command::Stack).await.unwrap().unwrap();

    let junk = vec![b'x'; strela_wire::MAX_LINE_BYTES + 1];
    // The client stops reading once the limit is hit, so the write may never
    // finish; only the pending request's outcome matters.
    let result = tokio::select! {
        result = pending.wait() => result,
        _ = async {
            let _ = mock.send_raw(&junk).await;
            std::future::pending::<()>().await
        } => unreachable!(),
    };

    assert!(matches!(result, Err(WireError::ConnectionClosed)));
    assert!(client.is_closed());
}
