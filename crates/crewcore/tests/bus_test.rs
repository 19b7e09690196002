use chrono::Utc;
use crewcore::{ExecutionEvent, NotificationBus, Topic};
use uuid::Uuid;

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

fn started_event(workflow_id: Uuid) -> ExecutionEvent {
    ExecutionEvent::WorkflowStarted {
        execution_id: Uuid::new_v4(),
        workflow_id,
        timestamp: Utc::now(),
    }
}

#[tokio::test]
async fn publish_without_subscribers_is_noop() {
    init_tracing();
    let bus = NotificationBus::new();
    let topic = Topic::Workflow(Uuid::new_v4());

    // Nothing to assert beyond "does not panic or error".
    bus.publish(topic, started_event(Uuid::new_v4()));
    assert_eq!(bus.subscriber_count(topic), 0);
}

#[tokio::test]
async fn events_are_delivered_in_publish_order() {
    init_tracing();
    let bus = NotificationBus::new();
    let workflow_id = Uuid::new_v4();
    let topic = Topic::Workflow(workflow_id);
    let mut sub = bus.subscribe(topic);

    let mut execution_ids = Vec::new();
    for _ in 0..5 {
        let event = started_event(workflow_id);
        if let ExecutionEvent::WorkflowStarted { execution_id, .. } = &event {
            execution_ids.push(*execution_id);
        }
        bus.publish(topic, event);
    }

    for expected in execution_ids {
        match sub.recv().await {
            Some(ExecutionEvent::WorkflowStarted { execution_id, .. }) => {
                assert_eq!(execution_id, expected);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}

#[tokio::test]
async fn topics_are_isolated() {
    init_tracing();
    let bus = NotificationBus::new();
    let workflow_a = Uuid::new_v4();
    let workflow_b = Uuid::new_v4();
    let mut sub_a = bus.subscribe(Topic::Workflow(workflow_a));
    let mut sub_b = bus.subscribe(Topic::Workflow(workflow_b));

    bus.publish(Topic::Workflow(workflow_a), started_event(workflow_a));

    assert!(sub_a.try_recv().is_some());
    assert!(sub_b.try_recv().is_none());
}

#[tokio::test]
async fn dropped_subscriber_does_not_affect_others() {
    init_tracing();
    let bus = NotificationBus::new();
    let workflow_id = Uuid::new_v4();
    let topic = Topic::Workflow(workflow_id);

    let dropped = bus.subscribe(topic);
    let mut kept = bus.subscribe(topic);
    assert_eq!(bus.subscriber_count(topic), 2);

    drop(dropped);
    bus.publish(topic, started_event(workflow_id));

    // The closed receiver was pruned during publish, the live one delivered.
    assert_eq!(bus.subscriber_count(topic), 1);
    assert!(kept.try_recv().is_some());
}

#[tokio::test]
async fn late_subscriber_sees_no_replay() {
    init_tracing();
    let bus = NotificationBus::new();
    let workflow_id = Uuid::new_v4();
    let topic = Topic::Workflow(workflow_id);

    bus.publish(topic, started_event(workflow_id));
    let mut late = bus.subscribe(topic);
    assert!(late.try_recv().is_none());

    bus.publish(topic, started_event(workflow_id));
    assert!(late.try_recv().is_some());
}

#[tokio::test]
async fn agent_and_workflow_topics_render_distinctly() {
    let id = Uuid::new_v4();
    assert_eq!(Topic::Workflow(id).to_string(), format!("workflow:{}", id));
    assert_eq!(Topic::Agent(id).to_string(), format!("agent:{}", id));
    assert_ne!(Topic::Workflow(id), Topic::Agent(id));
}
