//! Dispatcher driven end to end against an in-process JSON-RPC WebSocket server.

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::mpsc as std_mpsc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;

use deribit_cli::cancel::{CancelSignal, CancelToken};
use deribit_cli::command::parse;
use deribit_cli::config::ClientConfig;
use deribit_cli::{Console, DeribitApi, Dispatcher, Reply, StreamEvent, StreamExit};
use ws_endpoint::{ConnectionId, ConnectionStatus, Endpoint};

const WAIT: Duration = Duration::from_secs(5);
const PUSHES: usize = 3;

/// Answers every JSON-RPC request with `{"result": <method>}`. A subscribe is
/// confirmed and followed by `PUSHES` notifications. Requests for the `mute`
/// channel get no answer, and non-JSON text gets a non-JSON reply.
fn start_server() -> String {
    let (addr_tx, addr_rx) = std_mpsc::channel::<SocketAddr>();
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            addr_tx.send(listener.local_addr().unwrap()).unwrap();
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream));
            }
        });
    });
    let addr = addr_rx.recv_timeout(WAIT).unwrap();
    format!("ws://{addr}/ws/api/v2")
}

async fn serve(stream: TcpStream) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    while let Some(Ok(msg)) = ws.next().await {
        let Message::Text(text) = msg else { continue };
        let Ok(request) = serde_json::from_str::<Value>(text.as_str()) else {
            let _ = ws.send(Message::Text("not json either".into())).await;
            continue;
        };
        let method = request["method"].as_str().unwrap_or_default().to_string();
        if request["params"]["channels"] == json!(["mute"]) {
            continue;
        }
        let answer = json!({"jsonrpc": "2.0", "id": request["id"], "result": method});
        let _ = ws.send(Message::Text(answer.to_string().into())).await;

        if method == "public/subscribe" {
            for i in 0..PUSHES {
                let push = json!({
                    "jsonrpc": "2.0",
                    "method": "subscription",
                    "params": {"channel": "ticker.BTC-PERPETUAL.raw", "data": {"seq": i}},
                });
                let _ = ws.send(Message::Text(push.to_string().into())).await;
            }
        }
    }
}

/// Records events and cancels once `stop_after` have arrived
struct ScriptedConsole {
    token: CancelToken,
    stop_after: usize,
    events: Vec<StreamEvent>,
}

impl ScriptedConsole {
    fn new(stop_after: usize) -> Self {
        Self {
            token: CancelToken::new(),
            stop_after,
            events: Vec::new(),
        }
    }
}

impl Console for ScriptedConsole {
    fn stream_started(&mut self, _id: ConnectionId) -> Box<dyn CancelSignal> {
        Box::new(self.token.clone())
    }

    fn stream_event(&mut self, _id: ConnectionId, event: StreamEvent) {
        self.events.push(event);
        if self.events.len() >= self.stop_after {
            self.token.cancel();
        }
    }
}

fn dispatcher_with_timeout(url: &str, response_timeout: Duration) -> Dispatcher<DeribitApi> {
    let config = ClientConfig {
        poll_interval: Duration::from_millis(100),
        response_timeout: Some(response_timeout),
        testnet_url: url.to_string(),
        history_size: 100,
    };
    Dispatcher::new(Endpoint::new().unwrap(), DeribitApi::new(), config)
}

fn dispatcher(url: &str) -> Dispatcher<DeribitApi> {
    dispatcher_with_timeout(url, WAIT)
}

fn run(d: &mut Dispatcher<DeribitApi>, console: &mut ScriptedConsole, line: &str) -> Reply {
    d.execute(parse(line).unwrap(), console).unwrap()
}

fn connect_open(d: &mut Dispatcher<DeribitApi>, console: &mut ScriptedConsole) -> ConnectionId {
    let Reply::Connected { id, testnet, .. } = run(d, console, "Deribit connect") else {
        panic!("connect failed");
    };
    assert!(testnet);
    let record = d.endpoint().get_record(id).unwrap();
    let deadline = std::time::Instant::now() + WAIT;
    while record.status() == ConnectionStatus::Connecting {
        assert!(std::time::Instant::now() < deadline);
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(record.status(), ConnectionStatus::Open);
    id
}

#[test]
fn simple_request_returns_only_its_response() {
    let url = start_server();
    let mut d = dispatcher(&url);
    let mut console = ScriptedConsole::new(usize::MAX);
    let id = connect_open(&mut d, &mut console);

    let first = run(&mut d, &mut console, &format!("Deribit {id} time"));
    let Reply::Responses { messages, .. } = first else {
        panic!("unexpected reply {first:?}");
    };
    assert_eq!(messages.len(), 1);
    let answer: Value = serde_json::from_str(&messages[0]).unwrap();
    assert_eq!(answer["result"], "public/get_time");

    // The second request does not see the first answer again
    let second = run(&mut d, &mut console, &format!("Deribit {id} test"));
    let Reply::Responses { messages, .. } = second else {
        panic!("unexpected reply {second:?}");
    };
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("public/test"));

    let Reply::History { messages, .. } = run(&mut d, &mut console, &format!("show_messages {id}"))
    else {
        panic!("expected history");
    };
    assert_eq!(messages.len(), 2);
}

#[test]
fn raw_send_reports_unparseable_answers_verbatim() {
    let url = start_server();
    let mut d = dispatcher(&url);
    let mut console = ScriptedConsole::new(usize::MAX);
    let id = connect_open(&mut d, &mut console);

    let reply = run(&mut d, &mut console, &format!("send {id} hello there"));
    assert_eq!(
        reply,
        Reply::Responses {
            id,
            messages: vec!["not json either".to_string()]
        }
    );
}

#[test]
fn subscription_streams_until_cancelled() {
    let url = start_server();
    let mut d = dispatcher(&url);
    let mut console = ScriptedConsole::new(1 + PUSHES);
    let id = connect_open(&mut d, &mut console);

    let reply = run(
        &mut d,
        &mut console,
        &format!("Deribit {id} subscribe ticker.BTC-PERPETUAL.raw"),
    );
    assert_eq!(
        reply,
        Reply::StreamStopped {
            id,
            exit: StreamExit::Cancelled
        }
    );

    assert!(matches!(console.events[0], StreamEvent::Confirmation(_)));
    let seqs: Vec<u64> = console.events[1..]
        .iter()
        .map(|event| match event {
            StreamEvent::Data { channel, data } => {
                assert_eq!(channel.as_deref(), Some("ticker.BTC-PERPETUAL.raw"));
                data["seq"].as_u64().unwrap()
            }
            other => panic!("unexpected event {other:?}"),
        })
        .collect();
    assert_eq!(seqs, vec![0, 1, 2]);

    // The slot is free again once streaming ends
    let record = d.endpoint().get_record(id).unwrap();
    assert!(!record.is_in_flight());
}

#[test]
fn unanswered_request_times_out() {
    let url = start_server();
    let mut d = dispatcher_with_timeout(&url, Duration::from_millis(200));
    let mut console = ScriptedConsole::new(usize::MAX);
    let id = connect_open(&mut d, &mut console);

    let reply = run(&mut d, &mut console, &format!("Deribit {id} unsubscribe mute"));
    assert_eq!(reply, Reply::TimedOut { id });
}

#[test]
fn closed_connection_rejects_requests() {
    let url = start_server();
    let mut d = dispatcher(&url);
    let mut console = ScriptedConsole::new(usize::MAX);
    let id = connect_open(&mut d, &mut console);

    assert_eq!(
        run(&mut d, &mut console, &format!("close {id} 1000 done")),
        Reply::CloseRequested { id, code: 1000 }
    );
    let record = d.endpoint().get_record(id).unwrap();
    record.wait_for_message(Some(WAIT));
    assert!(record.status().is_terminal());

    let err = d
        .execute(parse(&format!("Deribit {id} time")).unwrap(), &mut console)
        .unwrap_err();
    assert_eq!(err.error_code(), "not_connected");

    let Reply::Summary(summary) = run(&mut d, &mut console, &format!("show {id}")) else {
        panic!("expected summary");
    };
    assert!(summary.contains("Close code: 1000"));
}
