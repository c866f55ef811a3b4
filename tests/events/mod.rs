use crate::common::{order_engine, ready_order, OrderInput, OrderState, RecordingListener};
use schematic_core::config::EngineConfig;
use schematic_core::events::{EventDispatcher, FnListener, ListenerError, MachineEvent};
use schematic_core::schematic::ConflictRetryPolicy;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

type OrderEvent = MachineEvent<OrderState, OrderInput>;

#[tokio::test]
async fn machine_lifecycle_is_published_in_commit_order() {
    let engine = order_engine(ConflictRetryPolicy::default(), EngineConfig::default()).await;
    let listener = RecordingListener::<OrderState, OrderInput>::new("audit");
    engine.events().add_listener(listener.clone());

    let machine = ready_order(&engine, "order-1").await;
    let submitted = machine.send(OrderInput::Submit).await.unwrap();
    engine.delete_machine("order-1").await.unwrap();
    engine.events().flush().await;

    let events = listener.events();
    let kinds: Vec<_> = events.iter().map(OrderEvent::event_type).collect();
    assert_eq!(kinds, vec!["machine_created", "transitioned", "transitioned", "machine_deleted"]);
    assert!(events.iter().all(|event| event.machine_id() == "order-1"));
    assert!(events.iter().all(|event| event.schematic_name() == "order"));
    assert!(events
        .windows(2)
        .all(|pair| pair[0].occurred_at() <= pair[1].occurred_at()));

    match &events[2] {
        MachineEvent::Transitioned {
            from_state,
            to_state,
            input,
            commit_tag,
            ..
        } => {
            assert_eq!(*from_state, OrderState::Draft);
            assert_eq!(*to_state, OrderState::Submitted);
            assert_eq!(*input, OrderInput::Submit);
            assert_eq!(*commit_tag, submitted.commit_tag);
        }
        other => panic!("expected a transition, got {other:?}"),
    }
}

#[tokio::test]
async fn rejected_sends_publish_nothing() {
    let engine = order_engine(ConflictRetryPolicy::default(), EngineConfig::default()).await;
    let machine = engine
        .create_machine("order", Some("bare".into()), HashMap::new())
        .await
        .unwrap();
    let listener = RecordingListener::<OrderState, OrderInput>::new("audit");
    engine.events().add_listener(listener.clone());

    assert!(machine.send(OrderInput::Approve).await.is_err());
    assert!(machine.send(OrderInput::Submit).await.is_err());
    engine.events().flush().await;

    assert!(listener.events().is_empty());
}

#[tokio::test]
async fn misbehaving_listeners_never_affect_sends() {
    let dispatcher = EventDispatcher::new(16, Duration::from_millis(20));
    let engine = order_engine(ConflictRetryPolicy::default(), EngineConfig::default())
        .await
        .with_event_dispatcher(dispatcher.clone());

    dispatcher.add_listener(Arc::new(FnListener::new("failing", |_event: OrderEvent| async {
        Err::<(), _>(ListenerError::failed("downstream unavailable"))
    })));
    dispatcher.add_listener(Arc::new(FnListener::new("stalled", |_event: OrderEvent| async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok::<(), ListenerError>(())
    })));
    let healthy = RecordingListener::<OrderState, OrderInput>::new("healthy");
    dispatcher.add_listener(healthy.clone());

    let machine = ready_order(&engine, "order-1").await;
    let status = machine.send(OrderInput::Submit).await.unwrap();
    assert_eq!(status.state, OrderState::Submitted);

    dispatcher.flush().await;
    assert_eq!(healthy.events().len(), 3);

    let stats = dispatcher.stats();
    assert_eq!(stats.listener_count, 3);
    assert_eq!(stats.dispatched, 3);
    let by_name = |name: &str| {
        stats
            .listeners
            .iter()
            .find(|listener| listener.name == name)
            .cloned()
            .expect("listener is registered")
    };
    assert_eq!(by_name("failing").failed, 3);
    assert_eq!(by_name("stalled").timed_out, 3);
    assert_eq!(by_name("healthy").delivered, 3);

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn events_serialize_with_their_type_tag() {
    let engine = order_engine(ConflictRetryPolicy::default(), EngineConfig::default()).await;
    let listener = RecordingListener::<OrderState, OrderInput>::new("wire");
    engine.events().add_listener(listener.clone());

    let machine = ready_order(&engine, "order-1").await;
    machine
        .send_with_payload(OrderInput::Submit, serde_json::json!({"channel": "web"}))
        .await
        .unwrap();
    engine.events().flush().await;

    let last = listener.events().pop().expect("transition was published");
    let json = serde_json::to_value(&last).unwrap();
    assert_eq!(json["event_type"], "transitioned");
    assert_eq!(json["to_state"], "Submitted");
    assert_eq!(json["payload"]["channel"], "web");

    let decoded: OrderEvent = serde_json::from_value(json).unwrap();
    assert_eq!(decoded, last);
}
