use super::*;
use crate::config::Config;
use crate::plugins::{
    PluginError, PluginExtensions, PluginTiming, StateAction, StateActionInput, StatePlugin,
};
use crate::workflow::test_helpers::{definition, linear_definition, CannedTransport, RecordingSubscriber};
use crate::workflow::{
    notifications, ActionStatus, StateValue, WorkflowDefinition, WorkflowEvent, BUILT_IN_UPDATE_CONTEXT,
    HTTP_ERROR, RULE_EVALUATION_FAILURE, STATE_ACTION_STATUS,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn test_config() -> Config {
    Config {
        max_cascade_events: 20,
        ..Config::default()
    }
}

fn extensions(value: Value) -> PluginExtensions {
    serde_json::from_value(value).unwrap()
}

fn builder(definition: WorkflowDefinition, transport: Arc<CannedTransport>) -> WorkflowRunnerBuilder {
    WorkflowRunnerBuilder::new("wf-1", definition)
        .config(test_config())
        .transport(transport)
}

fn counting_action(counter: Arc<AtomicUsize>) -> Arc<dyn StateAction> {
    Arc::new(move |_input: StateActionInput| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
}

fn failing_action(error: PluginError) -> Arc<dyn StateAction> {
    Arc::new(move |_input: StateActionInput| {
        let error = error.clone();
        async move { Err(error) }
    })
}

#[tokio::test]
async fn test_linear_scenario() {
    let mut runner = builder(linear_definition(), Arc::new(CannedTransport::new()))
        .build()
        .unwrap();
    assert_eq!(runner.state(), &StateValue::from("open"));

    runner.send_event(WorkflowEvent::new("next")).await.unwrap();
    assert_eq!(runner.state(), &StateValue::from("pending"));

    runner.send_event(WorkflowEvent::new("next")).await.unwrap();
    assert_eq!(runner.state(), &StateValue::from("closed"));
    assert!(runner.get_snapshot().unwrap().done);

    let error = runner.send_event(WorkflowEvent::new("next")).await.unwrap_err();
    assert!(error.is_illegal_transition());
    assert_eq!(runner.state(), &StateValue::from("closed"));
}

#[tokio::test]
async fn test_illegal_event_leaves_runner_untouched() {
    let mut runner = builder(linear_definition(), Arc::new(CannedTransport::new()))
        .machine_context(json!({"entity": {"id": "e-1"}}))
        .build()
        .unwrap();

    let error = runner.send_event(WorkflowEvent::new("approve")).await.unwrap_err();
    assert!(error.is_illegal_transition());
    assert_eq!(runner.state(), &StateValue::from("open"));
    assert_eq!(runner.context(), &json!({"entity": {"id": "e-1"}}));
}

#[tokio::test]
async fn test_context_untouched_without_plugins() {
    let seed = json!({"entity": {"id": "e-1"}, "documents": [1, 2]});
    let mut runner = builder(linear_definition(), Arc::new(CannedTransport::new()))
        .machine_context(seed.clone())
        .build()
        .unwrap();

    runner.send_event(WorkflowEvent::new("next")).await.unwrap();
    assert_eq!(runner.context(), &seed);

    let replaced = json!({"entity": {"id": "e-2"}});
    runner
        .send_event(WorkflowEvent::with_payload(BUILT_IN_UPDATE_CONTEXT, json!({"context": replaced})))
        .await
        .unwrap();
    runner.send_event(WorkflowEvent::new("next")).await.unwrap();
    assert_eq!(runner.context(), &replaced);
}

#[tokio::test]
async fn test_persist_response_destination() {
    let transport = Arc::new(CannedTransport::new().respond("http://kyc.test/score", 200, json!({"score": 42})));
    let mut runner = builder(linear_definition(), transport.clone())
        .extensions(extensions(json!({
            "apiPlugins": [{
                "name": "score",
                "url": "http://kyc.test/score",
                "stateNames": ["pending"],
                "persistResponseDestination": "report.data"
            }]
        })))
        .build()
        .unwrap();

    runner.send_event(WorkflowEvent::new("next")).await.unwrap();

    assert_eq!(transport.calls_to("http://kyc.test/score"), 1);
    assert_eq!(runner.context()["report"]["data"]["score"], json!(42));
    assert_eq!(runner.context(), &json!({"report": {"data": {"score": 42}}}));
}

#[tokio::test]
async fn test_failing_plugin_does_not_stop_siblings() {
    let transport = Arc::new(
        CannedTransport::new()
            .respond("http://vendor.test/broken", 500, json!({"message": "boom"}))
            .respond("http://vendor.test/ok", 200, json!({"verified": true})),
    );
    let mut runner = builder(linear_definition(), transport.clone())
        .extensions(extensions(json!({
            "apiPlugins": [
                {"name": "broken", "url": "http://vendor.test/broken", "stateNames": ["pending"]},
                {"name": "ok", "url": "http://vendor.test/ok", "stateNames": ["pending"]}
            ]
        })))
        .build()
        .unwrap();

    runner.send_event(WorkflowEvent::new("next")).await.unwrap();

    let outputs = &runner.context()["pluginsOutput"];
    assert_eq!(outputs["broken"]["name"], json!("broken"));
    assert_eq!(outputs["broken"]["status"], json!(PLUGIN_STATUS_ERROR));
    assert!(outputs["broken"]["error"].as_str().unwrap().contains("500"));
    assert_eq!(outputs["ok"], json!({"verified": true}));
    assert_eq!(runner.state(), &StateValue::from("pending"));
}

#[tokio::test]
async fn test_callback_actions_advance_the_workflow() {
    let transport = Arc::new(CannedTransport::new().respond("http://vendor.test/check", 200, json!({"ok": true})));
    let mut runner = builder(linear_definition(), transport.clone())
        .extensions(extensions(json!({
            "apiPlugins": [{
                "name": "check",
                "url": "http://vendor.test/check",
                "stateNames": ["pending"],
                "successAction": "next",
                "errorAction": "next"
            }]
        })))
        .build()
        .unwrap();

    runner.send_event(WorkflowEvent::new("next")).await.unwrap();

    assert_eq!(runner.state(), &StateValue::from("closed"));
    assert_eq!(transport.calls_to("http://vendor.test/check"), 1);
    assert_eq!(runner.context()["pluginsOutput"]["check"], json!({"ok": true}));
}

#[tokio::test]
async fn test_callbacks_unwind_depth_first() {
    let definition = definition(json!({
        "initial": "idle",
        "states": {
            "idle": {"on": {"start": "a"}},
            "a": {"on": {"advance": "b"}},
            "b": {}
        }
    }));
    let transport = Arc::new(
        CannedTransport::new()
            .respond("http://t/first", 200, json!({}))
            .respond("http://t/second", 200, json!({}))
            .respond("http://t/third", 200, json!({})),
    );
    let mut runner = builder(definition, transport.clone())
        .extensions(extensions(json!({
            "apiPlugins": [
                {"name": "first", "url": "http://t/first", "stateNames": ["a"],
                 "successAction": "advance", "errorAction": "advance"},
                {"name": "second", "url": "http://t/second", "stateNames": ["a"]},
                {"name": "third", "url": "http://t/third", "stateNames": ["b"]}
            ]
        })))
        .build()
        .unwrap();

    runner.send_event(WorkflowEvent::new("start")).await.unwrap();

    let urls: Vec<String> = transport.requests().into_iter().map(|r| r.url).collect();
    assert_eq!(urls, vec!["http://t/first", "http://t/third", "http://t/second"]);
    assert_eq!(runner.state(), &StateValue::from("b"));
}

#[tokio::test]
async fn test_self_loop_invocations_match_reentries() {
    let definition = definition(json!({
        "initial": "idle",
        "states": {
            "idle": {"on": {"start": "polling"}},
            "polling": {"on": {"retry": "polling"}}
        }
    }));
    let transport = Arc::new(CannedTransport::new().respond("http://t/poll", 200, json!({"ready": false})));
    let config = Config {
        max_cascade_events: 5,
        ..Config::default()
    };
    let mut runner = WorkflowRunnerBuilder::new("wf-1", definition)
        .config(config)
        .transport(transport.clone())
        .extensions(extensions(json!({
            "apiPlugins": [{
                "name": "poll",
                "url": "http://t/poll",
                "stateNames": ["polling"],
                "successAction": "retry",
                "errorAction": "retry"
            }]
        })))
        .build()
        .unwrap();

    let error = runner.send_event(WorkflowEvent::new("start")).await.unwrap_err();

    assert!(matches!(error, RunnerError::CascadeLimitExceeded { limit: 5 }));
    // one entry from `start`, then one per processed `retry`
    assert_eq!(transport.calls_to("http://t/poll"), 6);
}

#[tokio::test]
async fn test_guard_failure_is_notified() {
    let definition = definition(json!({
        "initial": "review",
        "context": {"riskScore": 10},
        "states": {
            "review": {"on": {"check": {
                "target": "approved",
                "cond": {
                    "type": "json-logic",
                    "options": {"rule": {">": [{"var": "riskScore"}, 50]}, "assignOnFailure": true}
                }
            }}},
            "approved": {"type": "final"}
        }
    }));
    let recorder = RecordingSubscriber::new();
    let mut runner = builder(definition, Arc::new(CannedTransport::new()))
        .subscribe(notifications::EVALUATION_ERROR, recorder.clone())
        .build()
        .unwrap();

    runner.send_event(WorkflowEvent::new("check")).await.unwrap();

    assert_eq!(runner.state(), &StateValue::from("review"));
    assert_eq!(recorder.types(), vec![RULE_EVALUATION_FAILURE.to_string()]);
    let notification = &recorder.notifications()[0];
    assert_eq!(notification.state, Some(StateValue::from("review")));
    assert_eq!(notification.payload.as_ref().unwrap()["assignOnFailure"], json!(true));
}

#[tokio::test]
async fn test_state_update_notification() {
    let recorder = RecordingSubscriber::new();
    let mut runner = builder(linear_definition(), Arc::new(CannedTransport::new()))
        .build()
        .unwrap();
    runner.subscribe(notifications::STATE_UPDATE, recorder.clone());

    runner
        .send_event(WorkflowEvent::with_payload("next", json!({"by": "reviewer"})))
        .await
        .unwrap();
    runner
        .send_event(WorkflowEvent::with_payload(BUILT_IN_UPDATE_CONTEXT, json!({"context": {}})))
        .await
        .unwrap();

    let received = recorder.notifications();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].notification_type, "next");
    assert_eq!(received[0].state, Some(StateValue::from("pending")));
    assert_eq!(received[0].payload, Some(json!({"by": "reviewer"})));
    assert_eq!(received[0].context, Some(json!({})));
}

#[tokio::test]
async fn test_self_transition_sends_state_update() {
    let recorder = RecordingSubscriber::new();
    let chart = definition(json!({
        "initial": "polling",
        "states": {"polling": {"on": {"tick": "polling"}}}
    }));
    let mut runner = builder(chart, Arc::new(CannedTransport::new())).build().unwrap();
    runner.subscribe(notifications::STATE_UPDATE, recorder.clone());

    runner.send_event(WorkflowEvent::new("tick")).await.unwrap();

    let received = recorder.notifications();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].notification_type, "tick");
    assert_eq!(received[0].state, Some(StateValue::from("polling")));
}

#[tokio::test]
async fn test_built_in_events_skip_plugins() {
    let transport = Arc::new(CannedTransport::new().respond("http://t/hook", 200, json!({})));
    let mut runner = builder(linear_definition(), transport.clone())
        .state(StateValue::from("pending"))
        .extensions(extensions(json!({
            "apiPlugins": [{"name": "hook", "url": "http://t/hook", "stateNames": ["pending"]}]
        })))
        .build()
        .unwrap();

    runner
        .send_event(WorkflowEvent::with_payload(
            BUILT_IN_UPDATE_CONTEXT,
            json!({"context": {"note": "edited"}}),
        ))
        .await
        .unwrap();

    assert_eq!(transport.calls_to("http://t/hook"), 0);
    assert_eq!(runner.context(), &json!({"note": "edited"}));
}

#[tokio::test]
async fn test_blocking_post_plugin_status_envelope() {
    let recorder = RecordingSubscriber::new();
    let mut runner = builder(linear_definition(), Arc::new(CannedTransport::new()))
        .state_plugin(StatePlugin::new(
            "notify-crm",
            vec!["pending".into()],
            PluginTiming::Post,
            true,
            failing_action(PluginError::Http {
                status: 502,
                body: "bad gateway".into(),
            }),
        ))
        .subscribe(notifications::STATUS_UPDATE, recorder.clone())
        .build()
        .unwrap();

    runner.send_event(WorkflowEvent::new("next")).await.unwrap();

    assert_eq!(runner.state(), &StateValue::from("pending"));
    assert_eq!(
        recorder.types(),
        vec![
            STATE_ACTION_STATUS.to_string(),
            STATE_ACTION_STATUS.to_string(),
            HTTP_ERROR.to_string()
        ]
    );
    let received = recorder.notifications();
    assert_eq!(received[0].status(), Some(ActionStatus::Pending));
    assert_eq!(received[1].status(), Some(ActionStatus::Error));
    assert_eq!(received[1].payload.as_ref().unwrap()["action"], json!("notify-crm"));
    assert!(received[2].error.as_deref().unwrap().contains("502"));
}

#[tokio::test]
async fn test_blocking_pre_plugin_runs_on_every_event() {
    // Pre plugins of the current state run even when the event leaves the
    // state unchanged. Whether they should keep doing so is undecided; this
    // pins the current behavior.
    let definition = definition(json!({
        "initial": "review",
        "states": {
            "review": {"on": {"check": {
                "target": "approved",
                "cond": {"type": "jmespath", "options": {"rule": "approved"}}
            }}},
            "approved": {}
        }
    }));
    let counter = Arc::new(AtomicUsize::new(0));
    let recorder = RecordingSubscriber::new();
    let mut runner = builder(definition, Arc::new(CannedTransport::new()))
        .state_plugin(StatePlugin::new(
            "precheck",
            vec!["review".into()],
            PluginTiming::Pre,
            true,
            counting_action(counter.clone()),
        ))
        .subscribe(notifications::STATUS_UPDATE, recorder.clone())
        .build()
        .unwrap();

    runner.send_event(WorkflowEvent::new("check")).await.unwrap();
    runner.send_event(WorkflowEvent::new("check")).await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(runner.state(), &StateValue::from("review"));

    runner
        .send_event(WorkflowEvent::with_payload("check", json!({"approved": true})))
        .await
        .unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert_eq!(runner.state(), &StateValue::from("approved"));

    let statuses: Vec<_> = recorder.notifications().iter().filter_map(|n| n.status()).collect();
    assert_eq!(statuses.len(), 6);
    assert!(statuses.chunks(2).all(|pair| pair == [ActionStatus::Pending, ActionStatus::Success]));
}

#[tokio::test]
async fn test_non_blocking_plugins_become_chart_actions() {
    let entered = Arc::new(AtomicUsize::new(0));
    let exited = Arc::new(AtomicUsize::new(0));
    let recorder = RecordingSubscriber::new();
    let mut runner = builder(linear_definition(), Arc::new(CannedTransport::new()))
        .state_plugin(StatePlugin::new(
            "on-enter",
            vec!["pending".into()],
            PluginTiming::Pre,
            false,
            counting_action(entered.clone()),
        ))
        .state_plugin(StatePlugin::new(
            "on-exit",
            vec!["pending".into()],
            PluginTiming::Post,
            false,
            counting_action(exited.clone()),
        ))
        .subscribe(notifications::STATUS_UPDATE, recorder.clone())
        .build()
        .unwrap();

    let pending = &runner.definition().states["pending"];
    assert_eq!(pending.entry.iter().map(|a| a.name()).collect::<Vec<_>>(), vec!["on-enter"]);
    assert_eq!(pending.exit.iter().map(|a| a.name()).collect::<Vec<_>>(), vec!["on-exit"]);

    runner.send_event(WorkflowEvent::new("next")).await.unwrap();
    assert_eq!((entered.load(Ordering::SeqCst), exited.load(Ordering::SeqCst)), (1, 0));

    runner.send_event(WorkflowEvent::new("next")).await.unwrap();
    assert_eq!((entered.load(Ordering::SeqCst), exited.load(Ordering::SeqCst)), (1, 1));
    assert_eq!(recorder.notifications().len(), 4);
}

#[tokio::test]
async fn test_caller_actions_receive_runner_state() {
    let definition = definition(json!({
        "initial": "open",
        "states": {
            "open": {"on": {"submit": {"target": "submitted", "actions": "audit"}}},
            "submitted": {"entry": ["unknown-action"]}
        }
    }));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let audit: Arc<dyn StateAction> = Arc::new(move |input: StateActionInput| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().push(input);
            Ok(())
        }
    });
    let mut runner = builder(definition, Arc::new(CannedTransport::new()))
        .action("audit", audit)
        .machine_context(json!({"entity": {"id": "e-9"}}))
        .build()
        .unwrap();

    runner.send_event(WorkflowEvent::new("submit")).await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].workflow_id, "wf-1");
    assert_eq!(seen[0].event, WorkflowEvent::new("submit"));
    assert_eq!(seen[0].context, json!({"entity": {"id": "e-9"}}));
    assert_eq!(runner.state(), &StateValue::from("submitted"));
}

#[tokio::test]
async fn test_dispatch_event_plugin_notifies_and_calls_back() {
    let recorder = RecordingSubscriber::new();
    let mut runner = builder(linear_definition(), Arc::new(CannedTransport::new()))
        .machine_context(json!({"entity": {"id": "e-1"}}))
        .extensions(extensions(json!({
            "dispatchEventPlugins": [{
                "name": "announce",
                "eventName": "CASE_PENDING",
                "stateNames": ["pending"],
                "transformers": [{"transformer": "jmespath", "mapping": "{entityId: entity.id}"}],
                "successAction": "next"
            }]
        })))
        .subscribe("CASE_PENDING", recorder.clone())
        .build()
        .unwrap();

    runner.send_event(WorkflowEvent::new("next")).await.unwrap();

    let received = recorder.notifications();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].payload, Some(json!({"entityId": "e-1"})));
    assert_eq!(received[0].state, Some(StateValue::from("pending")));
    assert_eq!(runner.state(), &StateValue::from("closed"));
}

#[tokio::test]
async fn test_transformer_plugin_output() {
    let mut runner = builder(linear_definition(), Arc::new(CannedTransport::new()))
        .machine_context(json!({"entity": {"id": "e-1", "name": "Acme"}}))
        .runtime_config(json!({"tier": "gold"}))
        .extensions(extensions(json!({
            "commonPlugins": [
                {
                    "name": "shape",
                    "stateNames": ["pending"],
                    "transformers": [{"transformer": "jmespath", "mapping": "{name: entity.name, tier: workflowRuntimeConfig.tier}"}]
                },
                {
                    "name": "summary",
                    "stateNames": ["pending"],
                    "persistResponseDestination": "summary",
                    "transformers": [{"transformer": "jmespath", "mapping": "{id: workflowRuntimeId}"}]
                }
            ]
        })))
        .build()
        .unwrap();

    runner.send_event(WorkflowEvent::new("next")).await.unwrap();

    assert_eq!(
        runner.context()["pluginsOutput"]["shape"],
        json!({"name": "Acme", "tier": "gold"})
    );
    assert_eq!(runner.context()["summary"], json!({"id": "wf-1"}));
    assert!(runner.context().get("workflowRuntimeConfig").is_none());
}

#[tokio::test]
async fn test_invoke_plugin() {
    let transport = Arc::new(CannedTransport::new().respond("http://t/retry", 200, json!({"attempt": 2})));
    let mut runner = builder(linear_definition(), transport.clone())
        .extensions(extensions(json!({
            "apiPlugins": [{"name": "retry", "url": "http://t/retry", "stateNames": ["closed"]}]
        })))
        .build()
        .unwrap();

    runner.invoke_plugin("retry").await.unwrap();
    assert_eq!(transport.calls_to("http://t/retry"), 1);
    assert_eq!(runner.context()["pluginsOutput"]["retry"], json!({"attempt": 2}));
    assert_eq!(runner.state(), &StateValue::from("open"));

    let error = runner.invoke_plugin("missing").await.unwrap_err();
    assert!(matches!(error, RunnerError::PluginNotFound(name) if name == "missing"));
}

#[tokio::test]
async fn test_override_context() {
    let mut runner = builder(linear_definition(), Arc::new(CannedTransport::new()))
        .build()
        .unwrap();

    runner.override_context(json!({"fixed": true})).unwrap();
    assert_eq!(runner.context(), &json!({"fixed": true}));

    let error = runner.override_context(json!([1, 2])).unwrap_err();
    assert!(matches!(error, RunnerError::InvalidContext(kind) if kind == "array"));
    assert_eq!(runner.context(), &json!({"fixed": true}));
}

#[test]
fn test_build_resumes_state_and_context() {
    let mut definition = linear_definition();
    definition.context = Some(json!({"seed": true}));

    let runner = builder(definition.clone(), Arc::new(CannedTransport::new()))
        .state(StateValue::from("pending"))
        .machine_context(json!({"resumed": true}))
        .build()
        .unwrap();
    assert_eq!(runner.state(), &StateValue::from("pending"));
    assert_eq!(runner.context(), &json!({"resumed": true}));

    let runner = builder(definition.clone(), Arc::new(CannedTransport::new()))
        .machine_context(json!({}))
        .build()
        .unwrap();
    assert_eq!(runner.context(), &json!({"seed": true}));

    let error = builder(definition, Arc::new(CannedTransport::new()))
        .state(StateValue::from("archived"))
        .build()
        .unwrap_err();
    assert!(matches!(error, RunnerError::Interpreter(_)));
}

#[test]
fn test_build_rejects_state_plugin_on_unknown_state() {
    let error = builder(linear_definition(), Arc::new(CannedTransport::new()))
        .state_plugin(StatePlugin::new(
            "ghost",
            vec!["nowhere".into()],
            PluginTiming::Pre,
            true,
            counting_action(Arc::new(AtomicUsize::new(0))),
        ))
        .build()
        .unwrap_err();
    assert!(matches!(error, RunnerError::PluginConstruction(_)));
}

#[tokio::test]
async fn test_injected_logger_receives_runner_logs() {
    let dispatch = tracing::Dispatch::new(
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .finish(),
    );
    let mut runner = builder(linear_definition(), Arc::new(CannedTransport::new()))
        .logger(dispatch)
        .build()
        .unwrap();

    runner.send_event(WorkflowEvent::new("next")).await.unwrap();
    assert_eq!(runner.state(), &StateValue::from("pending"));
}
