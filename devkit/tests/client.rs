use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use sensu_agent::check::handler;
use sensu_agent::transport::{KEEPALIVES_EXCHANGE, RESULTS_EXCHANGE};
use sensu_agent::{AgentConfig, CheckDefinition, CheckResponse, Client, ClientState};
use sensu_devkit::{MessageBuilder, TestHarness};
use tokio::sync::{oneshot, watch};

const WAIT: Duration = Duration::from_secs(3);

struct Running {
    shutdown: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<Result<(), sensu_agent::TransportError>>,
    state: watch::Receiver<ClientState>,
}

fn run(client: Client) -> Running {
    let (shutdown, rx) = oneshot::channel::<()>();
    let state = client.state();
    let task = tokio::spawn(async move {
        client
            .start(async move {
                let _ = rx.await;
            })
            .await
    });
    Running { shutdown, task, state }
}

async fn wait_for_state(state: &mut watch::Receiver<ClientState>, expected: ClientState) {
    tokio::time::timeout(WAIT, state.wait_for(|current| *current == expected))
        .await
        .expect("state not reached in time")
        .unwrap();
}

impl Running {
    async fn shutdown(self) -> Result<(), sensu_agent::TransportError> {
        let _ = self.shutdown.send(());
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("client should stop")
            .unwrap()
    }
}

#[tokio::test]
async fn test_client_runs_processors() {
    let mut harness = TestHarness::new("test_client", ["linux"])
        .unwrap()
        .with_check(CheckDefinition {
            interval: 1,
            standalone: true,
            ..CheckDefinition::extension("local", "local_check")
        });
    harness.register("local_check", || handler::ok("local"));

    let client = harness.client();
    assert_eq!(client.build_processors().len(), 4);

    let mut running = run(client);
    wait_for_state(&mut running.state, ClientState::Running).await;

    harness
        .wait_for_messages(KEEPALIVES_EXCHANGE, 1, WAIT)
        .await
        .unwrap();
    harness.wait_for_subscription("linux", WAIT).await.unwrap();
    harness
        .wait_for_subscription("client:test_client", WAIT)
        .await
        .unwrap();

    harness.transport.simulate_incoming(
        "client:test_client",
        MessageBuilder::to_bytes(&MessageBuilder::command_request("direct", "printf direct")),
    );

    let messages = harness.wait_for_messages(RESULTS_EXCHANGE, 2, WAIT).await.unwrap();
    let mut outputs: Vec<String> = messages
        .iter()
        .map(|message| message.json::<CheckResponse>().unwrap().check.output)
        .collect();
    outputs.sort();
    outputs.dedup();
    assert_eq!(outputs, vec!["OK: local".to_string(), "direct".to_string()]);

    running.shutdown().await.unwrap();
    assert_eq!(harness.transport.close_calls(), 1);
    assert!(!sensu_agent::Transport::is_connected(&harness.transport));
}

#[tokio::test]
async fn test_client_retries_until_connected() {
    let harness = TestHarness::new("test_client", Vec::<String>::new())
        .unwrap()
        .with_reconnect_interval(Duration::from_millis(50));
    harness.transport.fail_next_connects(3);

    let mut running = run(harness.client());
    wait_for_state(&mut running.state, ClientState::Running).await;

    assert_eq!(harness.transport.connect_calls(), 4);
    harness
        .wait_for_messages(KEEPALIVES_EXCHANGE, 1, WAIT)
        .await
        .unwrap();

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_client_reconnects_after_connection_loss() {
    let harness = TestHarness::new("test_client", ["linux"])
        .unwrap()
        .with_reconnect_interval(Duration::from_millis(50));

    let mut running = run(harness.client());
    wait_for_state(&mut running.state, ClientState::Running).await;
    harness
        .wait_for_messages(KEEPALIVES_EXCHANGE, 1, WAIT)
        .await
        .unwrap();
    harness.wait_for_subscription("linux", WAIT).await.unwrap();

    harness.transport.simulate_disconnect();

    // a fresh keepalive processor announces again on the new connection
    harness
        .wait_for_messages(KEEPALIVES_EXCHANGE, 2, WAIT)
        .await
        .unwrap();
    wait_for_state(&mut running.state, ClientState::Running).await;
    assert_eq!(harness.transport.connect_calls(), 2);
    assert_eq!(harness.transport.close_calls(), 1);

    harness.wait_for_subscription("linux", WAIT).await.unwrap();
    harness.transport.simulate_incoming(
        "linux",
        MessageBuilder::to_bytes(&MessageBuilder::command_request("after", "printf after")),
    );
    let messages = harness.wait_for_messages(RESULTS_EXCHANGE, 1, WAIT).await.unwrap();
    assert_eq!(messages.len(), 1);

    running.shutdown().await.unwrap();
    assert_eq!(harness.transport.close_calls(), 2);
}

#[tokio::test]
async fn test_shutdown_while_unreachable() {
    let harness = TestHarness::new("test_client", Vec::<String>::new())
        .unwrap()
        .with_reconnect_interval(Duration::from_secs(60));
    harness.transport.fail_next_connects(usize::MAX);

    let mut running = run(harness.client());

    // Disconnected is also the initial state, so wait for the failed attempt first
    tokio::time::timeout(WAIT, async {
        while harness.transport.connect_calls() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("client never tried to connect");
    wait_for_state(&mut running.state, ClientState::Disconnected).await;
    assert!(!sensu_agent::Transport::is_connected(&harness.transport));

    let mut state = running.state.clone();
    running.shutdown().await.unwrap();

    assert_eq!(*state.borrow_and_update(), ClientState::Closing);
    assert_eq!(harness.transport.connect_calls(), 1);
    assert!(harness.transport.published().is_empty());
}

#[tokio::test]
async fn test_client_from_config_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
        [client]
        name = "test_client"
        subscriptions = ["email", "messenger"]

        [[checks]]
        name = "disk"
        command = "true"
        standalone = true
        "#
    )
    .unwrap();

    let settings = AgentConfig::from_file(file.path())
        .unwrap()
        .resolve_with(|_| None)
        .unwrap();
    let harness = TestHarness::new("unused", Vec::<String>::new()).unwrap();
    let client = Client::new(
        Arc::new(harness.transport.clone()),
        Arc::new(settings),
        Arc::new(harness.registry.clone()),
    );

    let mut labels: Vec<String> = client
        .build_processors()
        .iter()
        .map(|processor| processor.describe())
        .collect();
    labels.sort();

    assert_eq!(
        labels,
        vec![
            "keepalive",
            "standalone:disk",
            "subscriber:client:test_client",
            "subscriber:email",
            "subscriber:messenger",
        ]
    );
}
