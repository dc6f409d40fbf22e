use super::*;
use crate::mcp::events::status_channel;
use crate::utils::test_utils::{sampling_request_message, FakeConnector, FakeServer, MockProvider};
use tokio::sync::mpsc;

fn config_for(names: &[&str]) -> McpConfig {
    McpConfig {
        servers: names
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    ServerConfig::stdio(format!("{name}-server"), Vec::new()),
                )
            })
            .collect(),
    }
}

fn manager_for(servers: Vec<(&str, FakeServer)>) -> (McpManager, Arc<FakeConnector>) {
    let names: Vec<&str> = servers.iter().map(|(name, _)| *name).collect();
    let config = config_for(&names);
    let connector = Arc::new(FakeConnector::new(servers));
    (McpManager::with_connector(&config, connector.clone()), connector)
}

async fn wait_for_status(manager: &McpManager, name: &str, status: ServerStatus) -> StatusUpdate {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let update = manager.server_status(name).await;
            if update.status == status {
                return update;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("server never reached the expected status")
}

fn drain(rx: &mut mpsc::Receiver<StatusUpdate>) -> Vec<(String, ServerStatus)> {
    let mut updates = Vec::new();
    while let Ok(update) = rx.try_recv() {
        updates.push((update.name, update.status));
    }
    updates
}

#[tokio::test]
async fn enable_returns_while_starting_then_becomes_ready() {
    let (manager, _connector) = manager_for(vec![(
        "fs",
        FakeServer {
            connect_delay: Some(Duration::from_millis(50)),
            ..FakeServer::with_tools(&[("read_file", "Read a file")])
        },
    )]);
    let ctx = CancellationToken::new();

    manager.enable(&ctx, "fs").await.expect("enable");
    assert_eq!(manager.server_status("fs").await.status, ServerStatus::Starting);

    assert!(manager.wait_until_settled(Duration::from_secs(5)).await);
    assert_eq!(manager.server_status("fs").await.status, ServerStatus::Ready);
}

#[tokio::test]
async fn duplicate_enable_does_not_create_a_second_client() {
    let (manager, connector) = manager_for(vec![(
        "fs",
        FakeServer {
            connect_delay: Some(Duration::from_millis(50)),
            ..FakeServer::default()
        },
    )]);
    let (publisher, mut rx) = status_channel(16);
    let manager = manager.with_status_publisher(publisher);
    let ctx = CancellationToken::new();

    manager.enable(&ctx, "fs").await.expect("first enable");
    manager.enable(&ctx, "fs").await.expect("second enable");
    assert!(manager.wait_until_settled(Duration::from_secs(5)).await);
    manager.enable(&ctx, "fs").await.expect("enable while ready");

    assert_eq!(connector.connects(), 1);
    assert_eq!(
        drain(&mut rx),
        vec![
            ("fs".to_string(), ServerStatus::Starting),
            ("fs".to_string(), ServerStatus::Ready),
        ]
    );
}

#[tokio::test]
async fn enable_rejects_unknown_server() {
    let (manager, connector) = manager_for(vec![]);
    let err = manager
        .enable(&CancellationToken::new(), "ghost")
        .await
        .expect_err("unknown server");
    assert_eq!(err, McpError::UnknownServer("ghost".to_string()));
    assert_eq!(connector.connects(), 0);
}

#[tokio::test]
async fn disable_unknown_server_is_a_noop() {
    let (manager, _connector) = manager_for(vec![("fs", FakeServer::default())]);
    let (publisher, mut rx) = status_channel(4);
    let manager = manager.with_status_publisher(publisher);

    manager.disable("fs").await.expect("disable never-enabled");
    manager.disable("ghost").await.expect("disable unknown");
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn failed_connect_is_retained_as_failed() {
    let (manager, _connector) = manager_for(vec![
        (
            "broken",
            FakeServer {
                fail_connect: Some("spawn refused".to_string()),
                ..FakeServer::default()
            },
        ),
        ("fs", FakeServer::with_tools(&[("read_file", "Read")])),
    ]);
    let (publisher, mut rx) = status_channel(16);
    let manager = manager.with_status_publisher(publisher);
    let ctx = CancellationToken::new();

    manager.enable(&ctx, "broken").await.expect("enable broken");
    manager.enable(&ctx, "fs").await.expect("enable fs");
    assert!(manager.wait_until_settled(Duration::from_secs(5)).await);

    let broken = manager.server_status("broken").await;
    assert_eq!(broken.status, ServerStatus::Failed);
    assert!(broken
        .error
        .as_deref()
        .is_some_and(|error| error.contains("spawn refused")));
    assert_eq!(manager.server_status("fs").await.status, ServerStatus::Ready);

    let broken_updates: Vec<ServerStatus> = drain(&mut rx)
        .into_iter()
        .filter(|(name, _)| name == "broken")
        .map(|(_, status)| status)
        .collect();
    assert_eq!(
        broken_updates,
        vec![ServerStatus::Starting, ServerStatus::Failed]
    );
}

#[tokio::test]
async fn all_tools_only_lists_ready_servers() {
    let (manager, _connector) = manager_for(vec![
        ("fs", FakeServer::with_tools(&[("read_file", "Read a file")])),
        (
            "slow",
            FakeServer {
                connect_delay: Some(Duration::from_secs(30)),
                ..FakeServer::with_tools(&[("never", "Never listed")])
            },
        ),
        (
            "broken",
            FakeServer {
                fail_connect: Some("nope".to_string()),
                ..FakeServer::with_tools(&[("hidden", "Hidden")])
            },
        ),
    ]);
    let ctx = CancellationToken::new();
    for name in ["fs", "slow", "broken"] {
        manager.enable(&ctx, name).await.expect("enable");
    }
    wait_for_status(&manager, "fs", ServerStatus::Ready).await;
    wait_for_status(&manager, "broken", ServerStatus::Failed).await;

    let tools = manager.all_tools().await;
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "fs__read_file");
    assert_eq!(tools[0].description, "[fs] Read a file");

    ctx.cancel();
}

#[tokio::test]
async fn call_tool_routes_by_server_prefix() {
    let (manager, _connector) = manager_for(vec![
        ("fs", FakeServer::with_tools(&[("read_file", "Read")])),
        ("idle", FakeServer::default()),
    ]);
    let ctx = CancellationToken::new();
    manager.enable(&ctx, "fs").await.expect("enable");
    wait_for_status(&manager, "fs", ServerStatus::Ready).await;

    let output = manager
        .call_tool(&ctx, "fs__read_file", r#"{"path":"notes.txt"}"#)
        .await
        .expect("call");
    assert_eq!(output, r#"read_file {"path":"notes.txt"}"#);

    assert_eq!(
        manager.call_tool(&ctx, "read_file", "{}").await,
        Err(McpError::InvalidToolName("read_file".to_string()))
    );
    assert_eq!(
        manager.call_tool(&ctx, "fs__", "{}").await,
        Err(McpError::InvalidToolName("fs__".to_string()))
    );
    assert_eq!(
        manager.call_tool(&ctx, "idle__anything", "{}").await,
        Err(McpError::NotRunning("idle".to_string()))
    );
    assert_eq!(
        manager.call_tool(&ctx, "ghost__anything", "{}").await,
        Err(McpError::UnknownServer("ghost".to_string()))
    );
}

#[tokio::test]
async fn call_tool_splits_on_first_delimiter() {
    let (manager, _connector) = manager_for(vec![("fs", FakeServer::default())]);
    let ctx = CancellationToken::new();
    manager.enable(&ctx, "fs").await.expect("enable");
    wait_for_status(&manager, "fs", ServerStatus::Ready).await;

    let output = manager
        .call_tool(&ctx, "fs__nested__tool", "")
        .await
        .expect("call");
    assert_eq!(output, "nested__tool {}");
}

#[tokio::test]
async fn disable_tears_down_and_restart_builds_a_fresh_client() {
    let (manager, connector) = manager_for(vec![("fs", FakeServer::with_tools(&[("a", "A")]))]);
    let (publisher, mut rx) = status_channel(16);
    let manager = manager.with_status_publisher(publisher);
    let ctx = CancellationToken::new();

    manager.enable(&ctx, "fs").await.expect("enable");
    wait_for_status(&manager, "fs", ServerStatus::Ready).await;
    manager.restart(&ctx, "fs").await.expect("restart");
    wait_for_status(&manager, "fs", ServerStatus::Ready).await;

    let transports = connector.transports("fs").await;
    assert_eq!(transports.len(), 2);
    assert!(transports[0].is_closed());
    assert!(!transports[1].is_closed());

    let statuses: Vec<ServerStatus> = drain(&mut rx).into_iter().map(|(_, status)| status).collect();
    assert_eq!(
        statuses,
        vec![
            ServerStatus::Starting,
            ServerStatus::Ready,
            ServerStatus::Stopped,
            ServerStatus::Starting,
            ServerStatus::Ready,
        ]
    );

    manager.disable("fs").await.expect("disable");
    assert_eq!(manager.server_status("fs").await.status, ServerStatus::Stopped);
    assert!(manager.all_states().await.is_empty());
    assert!(connector.transport("fs").await.is_closed());
}

#[tokio::test]
async fn disable_during_start_aborts_the_connection() {
    let (manager, connector) = manager_for(vec![(
        "fs",
        FakeServer {
            connect_delay: Some(Duration::from_millis(200)),
            ..FakeServer::default()
        },
    )]);
    let (publisher, mut rx) = status_channel(16);
    let manager = manager.with_status_publisher(publisher);
    let ctx = CancellationToken::new();

    manager.enable(&ctx, "fs").await.expect("enable");
    tokio::time::sleep(Duration::from_millis(20)).await;
    manager.disable("fs").await.expect("disable");
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(connector.transports("fs").await.is_empty());
    assert_eq!(manager.server_status("fs").await.status, ServerStatus::Stopped);
    assert_eq!(
        drain(&mut rx),
        vec![
            ("fs".to_string(), ServerStatus::Starting),
            ("fs".to_string(), ServerStatus::Stopped),
        ]
    );
    assert!(!ctx.is_cancelled());
}

#[tokio::test]
async fn server_names_with_the_delimiter_are_rejected() {
    let mut config = McpConfig::default();
    config
        .servers
        .insert("my__fs".to_string(), ServerConfig::stdio("fs-server", Vec::new()));
    let connector = Arc::new(FakeConnector::new(vec![(
        "my__fs",
        FakeServer::with_tools(&[("read_file", "Read")]),
    )]));
    let manager = McpManager::with_connector(&config, connector.clone());

    let err = manager
        .enable(&CancellationToken::new(), "my__fs")
        .await
        .expect_err("delimiter in server name");
    assert!(matches!(err, McpError::InvalidConfig { ref server, .. } if server == "my__fs"));
    assert_eq!(connector.connects(), 0);
    assert!(manager.all_states().await.is_empty());
    assert!(manager.all_tools().await.is_empty());
}

#[tokio::test]
async fn enable_all_skips_disabled_servers() {
    let mut config = config_for(&["fs", "git"]);
    if let Some(git) = config.servers.get_mut("git") {
        git.disabled = true;
    }
    let connector = Arc::new(FakeConnector::new(vec![
        ("fs", FakeServer::default()),
        ("git", FakeServer::default()),
    ]));
    let manager = McpManager::with_connector(&config, connector.clone());
    let ctx = CancellationToken::new();

    manager.enable_all(&ctx).await;
    assert!(manager.wait_until_settled(Duration::from_secs(5)).await);

    let names: Vec<String> = manager
        .all_states()
        .await
        .into_iter()
        .map(|state| state.name)
        .collect();
    assert_eq!(names, vec!["fs"]);

    manager.enable(&ctx, "git").await.expect("explicit enable");
    wait_for_status(&manager, "git", ServerStatus::Ready).await;

    manager.stop_all().await;
    assert!(manager.all_states().await.is_empty());
}

#[tokio::test]
async fn ready_servers_are_recorded_in_the_tool_cache() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (manager, _connector) =
        manager_for(vec![("fs", FakeServer::with_tools(&[("read_file", "Read")]))]);
    let manager = manager.with_tool_cache(dir.path().join("mcp-tools-cache.json"));
    assert!(manager.cached_tools().await.is_empty());

    manager
        .enable(&CancellationToken::new(), "fs")
        .await
        .expect("enable");
    wait_for_status(&manager, "fs", ServerStatus::Ready).await;

    let cached = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let cached = manager.cached_tools().await;
            if !cached.is_empty() {
                return cached;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("tool cache should be written");
    assert_eq!(cached["fs"][0].name, "read_file");
}

#[tokio::test]
async fn sampling_handler_reaches_new_clients() {
    let (manager, connector) = manager_for(vec![("fs", FakeServer::default())]);
    let handler = SamplingHandler::new(Arc::new(MockProvider::with_texts(&["Sampled"])))
        .with_yolo(true);
    manager.set_sampling_handler(Some(Arc::new(handler))).await;
    assert!(manager.sampling_handler().await.is_some());

    manager
        .enable(&CancellationToken::new(), "fs")
        .await
        .expect("enable");
    wait_for_status(&manager, "fs", ServerStatus::Ready).await;

    connector
        .send_server_request("fs", sampling_request_message(7, "Summarise", 32))
        .await;
    let transport = connector.transport("fs").await;
    transport.wait_for_answers(1).await;

    let results = transport.sampling_results().await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["content"]["text"], "Sampled");
}
