use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use futures::StreamExt;
use patchpilot_ai::llm::mock_client::{MockLlmClient, MockStep};
use patchpilot_ai::{AgentEvent, Role, ToolCall};
use patchpilot_core::daemon::http::{HttpConfig, router::build_router};
use patchpilot_core::{
    AgentService, GatewayError, ServiceConfig, TaskStatus, TaskSubmission, UpdateEvent,
};
use serde_json::json;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;

fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.workers.count = 4;
    config.workers.max_concurrent = 4;
    config.workers.idle_sleep_ms = 1;
    config.agent.expiry_poll_ms = 10;
    config
}

async fn start_service(
    config: ServiceConfig,
    steps: Vec<MockStep>,
) -> (Arc<AgentService>, MockLlmClient) {
    let mock = MockLlmClient::from_steps("mock-model", steps);
    let service = Arc::new(AgentService::new(config, Arc::new(mock.clone())));
    service.start().await;
    (service, mock)
}

fn submission(code: &str, query: &str) -> TaskSubmission {
    TaskSubmission {
        owner_id: "alice".to_string(),
        message_history: Vec::new(),
        query: query.to_string(),
        code: code.to_string(),
    }
}

async fn wait_for(service: &AgentService, task_id: &str, status: TaskStatus) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if service.get_task(task_id).map(|t| t.status) == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "task {task_id} never reached {status}, last seen {:?}",
            service.get_task(task_id).map(|t| t.status)
        )
    });
}

/// Collect a task's events up to and including its terminal event.
async fn events_until_terminal(
    rx: &mut broadcast::Receiver<UpdateEvent>,
    task_id: &str,
) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let update = rx.recv().await.unwrap();
            if update.task_id != task_id {
                continue;
            }
            let terminal = update.event.is_terminal();
            events.push(update.event);
            if terminal {
                break;
            }
        }
    })
    .await
    .expect("task never reached a terminal event");
    events
}

fn kinds(events: &[AgentEvent]) -> Vec<&'static str> {
    events
        .iter()
        .map(|event| match event {
            AgentEvent::TurnCompleted { .. } => "turn_completed",
            AgentEvent::ToolInvoked { .. } => "tool_invoked",
            AgentEvent::ToolDeferred { .. } => "tool_deferred",
            AgentEvent::ToolResult { .. } => "tool_result",
            AgentEvent::TaskCompleted { .. } => "task_completed",
            AgentEvent::TaskCancelled => "task_cancelled",
            AgentEvent::TaskFailed { .. } => "task_failed",
        })
        .collect()
}

#[tokio::test]
async fn edit_then_final_answer() {
    let (service, mock) = start_service(
        test_config(),
        vec![
            MockStep::tool_call(
                "call-1",
                "edit_code",
                json!({"find": "return 1", "find_start_line": 2, "find_end_line": 2, "replace": "return 2"}),
            ),
            MockStep::text("The function now returns 2."),
        ],
    )
    .await;
    let mut rx = service.subscribe("alice");

    let task_id = service
        .submit(submission("def f():\n    return 1", "return 2 instead"))
        .unwrap();
    let events = events_until_terminal(&mut rx, &task_id).await;

    assert_eq!(
        kinds(&events),
        vec![
            "tool_invoked",
            "tool_result",
            "turn_completed",
            "turn_completed",
            "task_completed"
        ]
    );
    match &events[4] {
        AgentEvent::TaskCompleted { answer, code } => {
            assert_eq!(answer, "The function now returns 2.");
            assert_eq!(code, "def f():\n    return 2");
        }
        other => panic!("unexpected event {other:?}"),
    }

    wait_for(&service, &task_id, TaskStatus::Completed).await;
    let snapshot = service.get_task(&task_id).unwrap();
    assert_eq!(snapshot.turn, 2);
    assert_eq!(snapshot.answer.as_deref(), Some("The function now returns 2."));

    let requests = mock.requests().await;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].messages.len(), 2);
    assert_eq!(requests[0].messages[0].role, Role::System);
    assert!(
        requests[0].messages[1]
            .content
            .contains("[2]    return 1\n---\nQuery: return 2 instead")
    );

    assert!(service.shutdown(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn approved_execution_resumes_with_result() {
    let (service, mock) = start_service(
        test_config(),
        vec![
            MockStep::tool_call(
                "call-run",
                "request_code_execution",
                json!({"response_on_reject": "The user did not run the code."}),
            ),
            MockStep::text("It printed 1."),
        ],
    )
    .await;
    let mut rx = service.subscribe("alice");

    let task_id = service.submit(submission("print(1)", "run it")).unwrap();
    wait_for(&service, &task_id, TaskStatus::AwaitingApproval).await;

    service
        .complete_deferred("alice", &task_id, "call-run", "stdout: 1")
        .unwrap();
    assert!(matches!(
        service.complete_deferred("alice", &task_id, "call-run", "again"),
        Err(GatewayError::Deferred(_)) | Err(GatewayError::TaskFinished { .. })
    ));

    let events = events_until_terminal(&mut rx, &task_id).await;
    assert_eq!(
        kinds(&events),
        vec![
            "tool_invoked",
            "tool_deferred",
            "tool_result",
            "turn_completed",
            "turn_completed",
            "task_completed"
        ]
    );

    let requests = mock.requests().await;
    let last = requests.last().unwrap();
    let tool_results: Vec<_> = last
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(tool_results, vec!["stdout: 1"]);

    service.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn expired_execution_resumes_with_rejection() {
    let (service, mock) = start_service(
        test_config(),
        vec![
            MockStep::tool_call(
                "call-run",
                "request_code_execution",
                json!({"response_on_reject": "The user did not run the code."}),
            ),
            MockStep::text("I could not run the code."),
        ],
    )
    .await;

    let task_id = service.submit(submission("print(1)", "run it")).unwrap();
    wait_for(&service, &task_id, TaskStatus::AwaitingApproval).await;

    assert_eq!(service.expire_deferred(Utc::now() + TimeDelta::hours(1)), 1);
    wait_for(&service, &task_id, TaskStatus::Completed).await;

    let requests = mock.requests().await;
    let last = requests.last().unwrap();
    assert_eq!(
        last.messages.last().map(|m| m.content.as_str()),
        Some("The user did not run the code.")
    );

    assert!(matches!(
        service.complete_deferred("alice", &task_id, "call-run", "late"),
        Err(GatewayError::TaskFinished { .. })
    ));
    service.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn sweeper_expires_short_deadline() {
    let mut config = test_config();
    config.agent.deferred_timeout_secs = 0;
    let (service, _) = start_service(
        config,
        vec![
            MockStep::tool_call(
                "call-run",
                "request_code_execution",
                json!({"response_on_reject": "Timed out."}),
            ),
            MockStep::text("Done."),
        ],
    )
    .await;

    let task_id = service.submit(submission("print(1)", "run it")).unwrap();
    wait_for(&service, &task_id, TaskStatus::Completed).await;
    service.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn cancel_while_awaiting_approval() {
    let (service, mock) = start_service(
        test_config(),
        vec![MockStep::tool_call(
            "call-run",
            "request_code_execution",
            json!({"response_on_reject": "no"}),
        )],
    )
    .await;
    let mut rx = service.subscribe("alice");

    let task_id = service.submit(submission("print(1)", "run it")).unwrap();
    wait_for(&service, &task_id, TaskStatus::AwaitingApproval).await;

    service.cancel("alice", &task_id).unwrap();
    let events = events_until_terminal(&mut rx, &task_id).await;
    assert_eq!(events.last(), Some(&AgentEvent::TaskCancelled));
    wait_for(&service, &task_id, TaskStatus::Cancelled).await;

    assert!(matches!(
        service.complete_deferred("alice", &task_id, "call-run", "ok"),
        Err(GatewayError::TaskFinished { .. })
    ));
    assert!(matches!(
        service.cancel("alice", &task_id),
        Err(GatewayError::TaskFinished { .. })
    ));
    assert_eq!(mock.requests().await.len(), 1);
    service.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn transient_llm_errors_are_retried() {
    let (service, mock) = start_service(
        test_config(),
        vec![
            MockStep::error("rate limited"),
            MockStep::error("rate limited"),
            MockStep::text("Explained."),
        ],
    )
    .await;

    let task_id = service.submit(submission("x = 1", "explain")).unwrap();
    wait_for(&service, &task_id, TaskStatus::Completed).await;

    // Every attempt sent the same turn-0 sequence.
    let requests = mock.requests().await;
    assert_eq!(requests.len(), 3);
    assert!(requests.iter().all(|r| r.messages == requests[0].messages));
    assert_eq!(service.queue_stats().retried, 2);
    service.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn exhausted_retries_fail_the_task() {
    let mut config = test_config();
    config.workers.max_retries = 1;
    let (service, _) = start_service(
        config,
        vec![MockStep::error("down"), MockStep::error("still down")],
    )
    .await;
    let mut rx = service.subscribe("alice");

    let task_id = service.submit(submission("x = 1", "explain")).unwrap();
    let events = events_until_terminal(&mut rx, &task_id).await;
    assert_eq!(
        events,
        vec![AgentEvent::TaskFailed {
            error: "LLM error: still down".to_string()
        }]
    );

    let snapshot = service.get_task(&task_id).unwrap();
    assert_eq!(snapshot.status, TaskStatus::Failed);
    assert_eq!(snapshot.error.as_deref(), Some("LLM error: still down"));
    service.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn turn_limit_fails_the_task() {
    let mut config = test_config();
    config.agent.max_turns = 1;
    let (service, _) = start_service(
        config,
        vec![MockStep::tool_call(
            "call-1",
            "think",
            json!({"thoughts": "plan"}),
        )],
    )
    .await;

    let task_id = service.submit(submission("x = 1", "explain")).unwrap();
    wait_for(&service, &task_id, TaskStatus::Failed).await;
    let snapshot = service.get_task(&task_id).unwrap();
    assert_eq!(snapshot.turn, 1);
    assert_eq!(
        snapshot.error.as_deref(),
        Some("Task exceeded the limit of 1 turns")
    );
    service.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn batched_calls_run_in_order_around_deferral() {
    let (service, mock) = start_service(
        test_config(),
        vec![
            MockStep::ToolCalls(vec![
                ToolCall {
                    id: "call-edit".to_string(),
                    name: "edit_code".to_string(),
                    arguments: json!({"find": "1", "find_start_line": 1, "find_end_line": 1, "replace": "2"}),
                },
                ToolCall {
                    id: "call-run".to_string(),
                    name: "request_code_execution".to_string(),
                    arguments: json!({"response_on_reject": "no"}),
                },
                ToolCall {
                    id: "call-think".to_string(),
                    name: "think".to_string(),
                    arguments: json!({"thoughts": "after run"}),
                },
            ]),
            MockStep::text("Done."),
        ],
    )
    .await;

    let task_id = service.submit(submission("x = 1", "bump and run")).unwrap();
    wait_for(&service, &task_id, TaskStatus::AwaitingApproval).await;
    assert_eq!(service.get_task(&task_id).unwrap().code, "x = 2");

    service
        .complete_deferred("alice", &task_id, "call-run", "ran")
        .unwrap();
    wait_for(&service, &task_id, TaskStatus::Completed).await;

    let requests = mock.requests().await;
    let ids: Vec<_> = requests[1]
        .messages
        .iter()
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect();
    assert_eq!(ids, vec!["call-edit", "call-run", "call-think"]);
    service.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn websocket_streams_owner_updates() {
    let (service, _) = start_service(test_config(), vec![MockStep::text("Hi.")]).await;
    let app = build_router(service.clone(), &HttpConfig::default());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/alice"))
        .await
        .unwrap();

    // The handler subscribes before completing the upgrade.
    assert_eq!(service.subscriber_count("alice"), 1);

    let task_id = service.submit(submission("x = 1", "say hi")).unwrap();

    let mut types = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(frame) = socket.next().await {
            let Message::Text(text) = frame.unwrap() else {
                continue;
            };
            let update: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert_eq!(update["task_id"], task_id.as_str());
            assert_eq!(update["owner_id"], "alice");
            let kind = update["event"]["type"].as_str().unwrap().to_string();
            let done = kind == "task_completed";
            types.push(kind);
            if done {
                break;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(types, vec!["turn_completed", "task_completed"]);

    service.shutdown(Duration::from_secs(1)).await;
}
