use std::time::Duration;

use color_eyre::Result;
use futures::future::join_all;
use itertools::Itertools;
use pretty_assertions::assert_eq;
use serial_bridge::mock::MockBehaviour;

mod common;
use common::*;

fn slow_pong() -> MockBehaviour {
    MockBehaviour::Reply {
        reply: b"PONG\n".to_vec(),
        delay: Duration::from_millis(10),
        byte_gap: Duration::from_millis(5),
    }
}

#[tokio::test]
async fn concurrent_clients_take_turns() -> Result<()> {
    let mock = mock("take-turns", slow_pong());
    let bridge = start(&mock, Duration::from_millis(50)).await?;

    let mut clients = vec![];
    for _ in 0..5 {
        clients.push(connect_lines(&bridge).await?);
    }

    let replies = join_all(clients.iter_mut().enumerate().map(|(i, client)| async move {
        client
            .request(format!("PING {i}\n"), Duration::from_secs(5))
            .await
    }))
    .await;

    for reply in replies {
        assert_eq!(reply?, b"PONG\n");
    }

    let exchanges = mock.exchanges();
    assert_eq!(exchanges.len(), 5);

    // No request reached the device while it was still answering another one.
    assert_eq!(mock.writes().len(), 5);
    assert_eq!(mock.interleaved_writes(), vec![]);

    // Every request made it to the device untouched.
    let requests = exchanges
        .iter()
        .map(|exchange| String::from_utf8_lossy(&exchange.request).to_string())
        .sorted()
        .collect::<Vec<_>>();
    assert_eq!(
        requests,
        (0..5).map(|i| format!("PING {i}\n")).collect::<Vec<_>>()
    );

    assert_eq!(bridge.arbiter().acquisitions(), 5);

    Ok(())
}

#[tokio::test]
async fn waiting_client_is_served_after_slow_one() -> Result<()> {
    let mock = mock(
        "slow-first",
        MockBehaviour::Reply {
            reply: b"DONE\n".to_vec(),
            delay: Duration::from_millis(300),
            byte_gap: Duration::ZERO,
        },
    );
    // Quiet periods up to the device's delay are still part of the reply.
    let bridge = start(&mock, Duration::from_millis(400)).await?;

    let mut first = connect_lines(&bridge).await?;
    let mut second = connect_lines(&bridge).await?;

    first.send("first\n").await?;
    settle().await;

    // The device is busy with the first request.
    assert!(!bridge.arbiter().is_free());

    second.send("second\n").await?;

    let first_reply = first.receive(Duration::from_secs(5)).await?;
    let second_reply = second.receive(Duration::from_secs(5)).await?;

    assert_eq!(first_reply, b"DONE\n");
    assert_eq!(second_reply, b"DONE\n");

    let exchanges = mock.exchanges();
    assert_eq!(exchanges[0].request, b"first\n");
    assert_eq!(exchanges[1].request, b"second\n");
    assert!(exchanges[1].received >= exchanges[0].finished);

    Ok(())
}

#[tokio::test]
async fn client_leaving_while_queued_does_not_block_others() -> Result<()> {
    let mock = mock(
        "leaving",
        MockBehaviour::Reply {
            reply: b"OK\n".to_vec(),
            delay: Duration::from_millis(200),
            byte_gap: Duration::ZERO,
        },
    );
    let bridge = start(&mock, Duration::from_millis(300)).await?;

    let mut first = connect_lines(&bridge).await?;
    first.send("one\n").await?;
    settle().await;

    // Queues up behind the first request, then goes away.
    let mut leaving = connect_lines(&bridge).await?;
    leaving.send("two\n").await?;
    leaving.close().await?;

    let mut last = connect_lines(&bridge).await?;
    last.send("three\n").await?;

    assert_eq!(first.receive(Duration::from_secs(5)).await?, b"OK\n");
    assert_eq!(last.receive(Duration::from_secs(5)).await?, b"OK\n");

    settle().await;
    assert!(bridge.arbiter().is_free());

    Ok(())
}
