//! Contract tests for the GetTimestamp, ResetTimestamp and GetStatus RPCs.

mod common;

use meridian::client::ClientError;
use meridian::timestamp::Timestamp;
use tonic::Code;

fn rpc_code(err: ClientError) -> Code {
    match err {
        ClientError::Rpc(status) => status.code(),
        other => panic!("expected an rpc error, got {other}"),
    }
}

#[tokio::test]
async fn test_timestamps_strictly_increase() {
    let fixture = common::TestFixture::new();
    let server = common::TestServer::start(fixture.config("a")).await;
    let mut client = server.client().await;

    let mut previous = None;
    for _ in 0..100 {
        let block = client.get_timestamp("global", 1).await.expect("get_timestamp failed");
        assert_eq!(block.stream, "global");
        assert!(block.epoch > 0, "epoch should be set");
        if let Some(prev) = previous {
            assert!(block.first > prev, "{} should follow {}", block.first, prev);
        }
        previous = Some(block.first);
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_batch_reserves_block() {
    let fixture = common::TestFixture::new();
    let server = common::TestServer::start(fixture.config("a")).await;
    let mut client = server.client().await;

    let block = client.get_timestamp("", 10).await.unwrap();
    assert_eq!(block.count, 10);
    assert_eq!(block.iter().count(), 10);

    let next = client.get_timestamp("global", 1).await.unwrap();
    assert!(next.first > block.last());

    // Zero is served as a single timestamp.
    let single = client.get_timestamp("global", 0).await.unwrap();
    assert_eq!(single.count, 1);
    assert!(single.first > next.first);

    server.shutdown().await;
}

#[tokio::test]
async fn test_invalid_requests() {
    let fixture = common::TestFixture::new();
    let server = common::TestServer::start(fixture.config("a")).await;
    let mut client = server.client().await;

    let err = client.get_timestamp("global", 5000).await.unwrap_err();
    assert_eq!(rpc_code(err), Code::InvalidArgument);

    let err = client.get_timestamp("local/bad region", 1).await.unwrap_err();
    assert_eq!(rpc_code(err), Code::InvalidArgument);

    let err = client.get_timestamp("local/dc9", 1).await.unwrap_err();
    assert_eq!(rpc_code(err), Code::NotFound);

    server.shutdown().await;
}

#[tokio::test]
async fn test_local_streams_stay_below_later_global() {
    let fixture = common::TestFixture::new();
    let mut config = fixture.config("a");
    config.enable_local_tso = true;
    config.local_tso_regions = vec!["dc1".into(), "dc2".into()];
    let server = common::TestServer::start(config).await;
    let mut client = server.client().await;

    // Push dc2 well ahead of the global stream.
    let ahead = client.get_timestamp("local/dc2", 1).await.unwrap().first;
    let target = Timestamp::new(ahead.physical + 200, 0);
    client
        .reset_timestamp("local/dc2", target, false, false)
        .await
        .unwrap();
    let local = client.get_timestamp("local/dc2", 1).await.unwrap();
    let other = client.get_timestamp("local/dc1", 1).await.unwrap();

    let global = client.get_timestamp("global", 1).await.unwrap();
    assert!(global.first > local.first);
    assert!(global.first > other.first);

    let status = client.status().await.unwrap();
    let streams: Vec<_> = status.streams.iter().map(|s| s.stream.as_str()).collect();
    assert_eq!(streams, vec!["global", "local/dc1", "local/dc2"]);

    server.shutdown().await;
}

#[tokio::test]
async fn test_reset_timestamp() {
    let fixture = common::TestFixture::new();
    let server = common::TestServer::start(fixture.config("a")).await;
    let mut client = server.client().await;

    let now = client.get_timestamp("global", 1).await.unwrap().first;
    let target = Timestamp::new(now.physical + 60_000, 0);
    client.reset_timestamp("global", target, false, false).await.unwrap();
    assert!(client.get_timestamp("global", 1).await.unwrap().first >= target);

    let err = client
        .reset_timestamp("global", now, false, false)
        .await
        .unwrap_err();
    assert_eq!(rpc_code(err), Code::InvalidArgument);
    client.reset_timestamp("global", now, true, false).await.unwrap();

    // More than a day ahead of the wall clock needs the explicit override.
    let far = Timestamp::new(now.physical + 48 * 3600 * 1000, 0);
    let err = client.reset_timestamp("global", far, false, false).await.unwrap_err();
    assert_eq!(rpc_code(err), Code::InvalidArgument);

    // Even with the bound skipped, the target must stay composable.
    let huge = Timestamp::new(i64::MAX, 0);
    let err = client.reset_timestamp("global", huge, false, true).await.unwrap_err();
    assert_eq!(rpc_code(err), Code::InvalidArgument);
    assert!(client.get_timestamp("global", 1).await.unwrap().first > target);

    server.shutdown().await;
}

#[tokio::test]
async fn test_status_reports_leader() {
    let fixture = common::TestFixture::new();
    let server = common::TestServer::start(fixture.config("member-a")).await;
    let mut client = server.client().await;

    let ts = client.get_timestamp("global", 1).await.unwrap();
    let status = client.status().await.unwrap();
    assert_eq!(status.member_id, "member-a");
    assert!(status.is_leader);
    assert_eq!(status.epoch, ts.epoch);

    let global = &status.streams[0];
    assert!(global.ready);
    assert!(global.saved_physical > global.current.unwrap().physical);

    server.shutdown().await;
}
