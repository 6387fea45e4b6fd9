use std::time::Duration;

use color_eyre::Result;
use pretty_assertions::assert_eq;
use serial_bridge::mock::MockBehaviour;
use tokio::time::Instant;

mod common;
use common::*;

#[tokio::test]
async fn reply_ends_at_delimiter() -> Result<()> {
    let mock = mock("at-delimiter", MockBehaviour::reply(*b"OK\r\n"));

    // Long enough that waiting for quiet would be noticed.
    let bridge = start_delimited(&mock, Duration::from_secs(2), b"\r\n").await?;
    let mut client = connect_lines(&bridge).await?;

    let start = Instant::now();
    let reply = client.request("AT\r\n", Duration::from_secs(5)).await?;
    let elapsed = start.elapsed();

    assert_eq!(reply, b"OK\r\n");
    assert!(elapsed < Duration::from_secs(1), "{elapsed:?}");

    Ok(())
}

#[tokio::test]
async fn trickling_delimited_reply() -> Result<()> {
    let mock = mock(
        "delimited-trickle",
        MockBehaviour::Reply {
            reply: b"+CSQ: 21,99\r\n".to_vec(),
            delay: Duration::from_millis(10),
            byte_gap: Duration::from_millis(10),
        },
    );
    let bridge = start_delimited(&mock, BRIDGE_TIMEOUT, b"\r\n").await?;
    let mut client = connect_lines(&bridge).await?;

    let reply = client.request("AT+CSQ\r\n", Duration::from_secs(5)).await?;

    assert_eq!(reply, b"+CSQ: 21,99\r\n");

    Ok(())
}

#[tokio::test]
async fn incomplete_reply_is_dropped() -> Result<()> {
    let mock = mock("incomplete", MockBehaviour::reply(*b"OK"));
    let bridge = start_delimited(&mock, BRIDGE_TIMEOUT, b"\r\n").await?;
    let mut client = connect(&bridge).await?;

    let reply = client.request("AT\r\n", CLIENT_IDLE).await?;
    assert!(reply.is_empty());

    // The client is still connected, and the partial reply does not show up later.
    mock.set_behaviour(MockBehaviour::reply(*b"FINE\r\n"));
    let reply = client.request("AT\r\n", CLIENT_IDLE).await?;
    assert_eq!(reply, b"FINE\r\n");

    // The device was reopened to get rid of the partial reply.
    assert_eq!(mock.opens(), 2);

    Ok(())
}

#[tokio::test]
async fn multi_byte_delimiter() -> Result<()> {
    let mock = mock("multi-byte", MockBehaviour::reply(*b"<data>payload</data>"));
    let bridge = start_delimited(&mock, BRIDGE_TIMEOUT, b"</data>").await?;
    let mut client = connect(&bridge).await?;

    let reply = client.request("get", CLIENT_IDLE).await?;

    assert_eq!(reply, b"<data>payload</data>");

    Ok(())
}
