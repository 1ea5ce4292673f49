use strela_wire::mock::MockDebuggeeConfig;
use strela_wire::{AckKind, Command, DebuggeeEvent, Reply, StopReason, MAIN_THREAD_ID};
use tokio::time::timeout;

use super::{connect, TIMEOUT};

#[tokio::test]
async fn replies_written_byte_by_byte_decode_identically() {
    for chunk_size in [1, 2, 3, 7] {
        let config = MockDebuggeeConfig {
            chunk_size: Some(chunk_size),
            ..MockDebuggeeConfig::default()
        };
        let (client, _mock) = connect(config).await;

        let frames = client.stack().await.unwrap();
        assert_eq!(frames.len(), 2, "chunk size {chunk_size}");
        assert_eq!(frames[1].file, "lib.strela");
        assert_eq!(frames[1].line, 12);

        let vars = client.variables(1).await.unwrap();
        assert_eq!(vars[0].value, "42", "chunk size {chunk_size}");
    }
}

#[tokio::test]
async fn hit_between_replies_does_not_disturb_correlation() {
    let config = MockDebuggeeConfig {
        hit_after_step: true,
        chunk_size: Some(3),
        ..MockDebuggeeConfig::default()
    };
    let (client, _mock) = connect(config).await;
    let mut events = client.subscribe_events();

    client.step().await.unwrap();
    let frames = client.stack().await.unwrap();
    assert_eq!(frames.len(), 2);

    let event = timeout(TIMEOUT, events.recv()).await.unwrap().unwrap();
    assert_eq!(
        event,
        DebuggeeEvent::Stopped {
            reason: StopReason::Breakpoint,
            thread_id: MAIN_THREAD_ID,
        }
    );
}

#[tokio::test]
async fn split_multibyte_names_arrive_intact() {
    let config = MockDebuggeeConfig {
        auto_reply: false,
        ..MockDebuggeeConfig::default()
    };
    let (client, mock) = connect(config).await;
    let pending = client.issue(Command::Stack).await.unwrap().unwrap();

    let message = "ACK_STACK\n1\nf\u{e4}den.lang\n1\nma\u{ef}n\n".as_bytes();
    for byte in message {
        mock.send_raw(std::slice::from_ref(byte)).await.unwrap();
    }

    let Reply::Stack(frames) = pending.wait().await.unwrap() else {
        panic!("expected a stack reply");
    };
    assert_eq!(frames[0].file, "f\u{e4}den.lang");
    assert_eq!(frames[0].name, "ma\u{ef}n");
}

#[tokio::test]
async fn crlf_line_endings_are_accepted() {
    let config = MockDebuggeeConfig {
        auto_reply: false,
        ..MockDebuggeeConfig::default()
    };
    let (client, mock) = connect(config).await;
    let pending = client.issue(Command::Pause).await.unwrap().unwrap();

    mock.send_raw(b"ACK_PAUSE\r\n").await.unwrap();
    assert_eq!(pending.wait().await.unwrap(), Reply::Ack(AckKind::Pause));
}
