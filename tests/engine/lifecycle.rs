use crate::common::{order_engine, order_schematic, OrderInput, OrderState};
use schematic_core::config::EngineConfig;
use schematic_core::engine::MachineRequest;
use schematic_core::error::EngineError;
use schematic_core::schematic::{ConflictRetryPolicy, SchematicBuilder, StateDefinition};
use std::collections::HashMap;

#[tokio::test]
async fn machines_start_in_the_initial_state_with_their_metadata() {
    let engine = order_engine(ConflictRetryPolicy::default(), EngineConfig::default()).await;

    let metadata = HashMap::from([("customer".to_string(), "acme".to_string())]);
    let machine = engine
        .create_machine("order", Some("order-1".into()), metadata.clone())
        .await
        .unwrap();

    let status = machine.status().await.unwrap();
    assert_eq!(status.machine_id, "order-1");
    assert_eq!(status.schematic_name, "order");
    assert_eq!(status.state, OrderState::Draft);
    assert_eq!(status.metadata, metadata);
    assert!(status.state_bag.is_empty());
}

#[tokio::test]
async fn duplicate_machine_ids_are_refused() {
    let engine = order_engine(ConflictRetryPolicy::default(), EngineConfig::default()).await;
    engine
        .create_machine("order", Some("order-1".into()), HashMap::new())
        .await
        .unwrap();

    let second = engine
        .create_machine("order", Some("order-1".into()), HashMap::new())
        .await;
    assert!(matches!(
        second,
        Err(EngineError::MachineAlreadyExists { ref machine_id }) if machine_id == "order-1"
    ));
}

#[tokio::test]
async fn bulk_creation_is_all_or_nothing() {
    let engine = order_engine(ConflictRetryPolicy::default(), EngineConfig::default()).await;
    engine
        .create_machine("order", Some("taken".into()), HashMap::new())
        .await
        .unwrap();

    let refused = engine
        .bulk_create_machines(
            "order",
            vec![MachineRequest::new("fresh-1"), MachineRequest::new("taken")],
        )
        .await;
    assert!(matches!(refused, Err(EngineError::MachineAlreadyExists { .. })));
    assert!(matches!(
        engine.get_machine("fresh-1").await,
        Err(EngineError::MachineNotFound { .. })
    ));

    let created = engine
        .bulk_create_machines(
            "order",
            vec![
                MachineRequest::new("fresh-1").with_metadata("batch", "7"),
                MachineRequest::default(),
            ],
        )
        .await
        .unwrap();
    assert_eq!(created.len(), 2);
    assert_eq!(created[0].machine_id(), "fresh-1");
    assert_eq!(created[0].metadata().await.unwrap()["batch"], "7");
    assert!(!created[1].machine_id().is_empty());
}

#[tokio::test]
async fn deleted_machines_are_gone() {
    let engine = order_engine(ConflictRetryPolicy::default(), EngineConfig::default()).await;
    let machine = engine
        .create_machine("order", Some("order-1".into()), HashMap::new())
        .await
        .unwrap();

    engine.delete_machine("order-1").await.unwrap();

    assert!(matches!(
        machine.send(OrderInput::Submit).await,
        Err(EngineError::MachineNotFound { .. })
    ));
    assert!(matches!(
        engine.delete_machine("order-1").await,
        Err(EngineError::MachineNotFound { .. })
    ));
}

#[tokio::test]
async fn list_machines_returns_most_recently_updated_first() {
    let engine = order_engine(ConflictRetryPolicy::default(), EngineConfig::default()).await;
    for id in ["a", "b", "c"] {
        engine
            .create_machine("order", Some(id.into()), HashMap::new())
            .await
            .unwrap();
    }
    engine
        .get_machine("a")
        .await
        .unwrap()
        .send(OrderInput::Annotate)
        .await
        .unwrap();

    let listed = engine.list_machines("order", 2).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].machine_id, "a");
    assert!(engine.list_machines("unknown", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn storing_schematics_is_idempotent_per_name() {
    let engine = order_engine(ConflictRetryPolicy::default(), EngineConfig::default()).await;

    // Same definition again is accepted
    engine
        .store_schematic(order_schematic(ConflictRetryPolicy::default()))
        .await
        .unwrap();

    let different = engine
        .store_schematic(order_schematic(ConflictRetryPolicy::Never))
        .await;
    assert!(matches!(
        different,
        Err(EngineError::SchematicAlreadyExists { ref schematic_name }) if schematic_name == "order"
    ));
    assert_eq!(engine.list_schematics().await.unwrap(), vec!["order".to_string()]);
}

#[tokio::test]
async fn invalid_schematics_never_reach_the_store() {
    let engine = order_engine(ConflictRetryPolicy::default(), EngineConfig::default()).await;

    let mut dangling = SchematicBuilder::new("dangling", OrderState::Draft)
        .with_state(StateDefinition::new(OrderState::Draft))
        .build()
        .unwrap();
    dangling.states.insert(
        OrderState::Submitted,
        StateDefinition::new(OrderState::Submitted)
            .with_transition(OrderInput::Approve, OrderState::Approved),
    );

    assert!(matches!(
        engine.store_schematic(dangling).await,
        Err(EngineError::InvalidSchematic(_))
    ));
    assert!(matches!(
        engine.get_schematic("dangling").await,
        Err(EngineError::SchematicNotFound { .. })
    ));
}

#[tokio::test]
async fn unknown_schematics_cannot_spawn_machines() {
    let engine = order_engine(ConflictRetryPolicy::default(), EngineConfig::default()).await;
    assert!(matches!(
        engine.create_machine("missing", None, HashMap::new()).await,
        Err(EngineError::SchematicNotFound { ref schematic_name }) if schematic_name == "missing"
    ));
}
