use crate::common::{order_engine, ready_order, OrderInput, OrderState, ITEMS_KEY};
use parking_lot::Mutex;
use schematic_core::config::EngineConfig;
use schematic_core::connectors::{ConnectorContext, ConnectorRole, FnPrecondition, GuardError};
use schematic_core::engine::{SendOptions, StateEngine};
use schematic_core::error::EngineError;
use schematic_core::schematic::{
    ConflictRetryPolicy, PreconditionBinding, Schematic, SchematicBuilder, StateDefinition,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

type GateEngine = StateEngine<String, String>;
type GateContext = ConnectorContext<String, String>;

fn s(value: &str) -> String {
    value.to_string()
}

/// `idle --go--> running` carries its own `gate` precondition, overriding the
/// `deny` precondition `running` declares for every other way in
fn gate_schematic() -> Schematic<String, String> {
    SchematicBuilder::new("gate", s("idle"))
        .with_state(
            StateDefinition::new(s("idle"))
                .with_guarded_transition(s("go"), s("running"), PreconditionBinding::new("gate"))
                .with_transition(s("jump"), s("running"))
                .with_guarded_transition(
                    s("inspect"),
                    s("inspected"),
                    PreconditionBinding::new("broken"),
                )
                .with_guarded_transition(
                    s("lookup"),
                    s("inspected"),
                    PreconditionBinding::new("missing"),
                ),
        )
        .with_state(
            StateDefinition::new(s("running"))
                .with_precondition(PreconditionBinding::new("deny"))
                .with_transition(s("stop"), s("idle")),
        )
        .with_state(StateDefinition::new(s("inspected")))
        .build()
        .unwrap()
}

/// Engine over [`gate_schematic`]; the returned cell records every payload
/// the `gate` precondition sees
async fn gate_engine() -> (GateEngine, Arc<Mutex<Vec<Option<Value>>>>) {
    let engine = GateEngine::in_memory(EngineConfig::default());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let recorder = Arc::clone(&seen);
    engine.connectors().register_precondition(
        "gate",
        Arc::new(FnPrecondition::new("records payloads", move |ctx: GateContext| {
            let recorder = Arc::clone(&recorder);
            async move {
                recorder.lock().push(ctx.payload.clone());
                Ok::<bool, GuardError>(true)
            }
        })),
    );
    engine.connectors().register_precondition(
        "deny",
        Arc::new(FnPrecondition::new("always rejects", |_ctx: GateContext| async {
            Ok::<bool, GuardError>(false)
        })),
    );
    engine.connectors().register_precondition(
        "broken",
        Arc::new(FnPrecondition::new("cannot decide", |_ctx: GateContext| async {
            Err::<bool, _>(GuardError::EvaluationFailed {
                reason: "backend offline".to_string(),
            })
        })),
    );

    engine.store_schematic(gate_schematic()).await.unwrap();
    engine
        .create_machine("gate", Some(s("g-1")), HashMap::new())
        .await
        .unwrap();
    (engine, seen)
}

#[tokio::test]
async fn send_moves_the_machine_and_replaces_the_commit_tag() {
    let engine = order_engine(ConflictRetryPolicy::default(), EngineConfig::default()).await;
    let machine = ready_order(&engine, "order-1").await;
    let before = machine.status().await.unwrap();

    let after = machine.send(OrderInput::Submit).await.unwrap();

    assert_eq!(after.state, OrderState::Submitted);
    assert_ne!(after.commit_tag, before.commit_tag);
    assert!(after.updated_time >= before.updated_time);
    assert_eq!(machine.status().await.unwrap(), after);
}

#[tokio::test]
async fn unknown_inputs_leave_the_status_untouched() {
    let engine = order_engine(ConflictRetryPolicy::default(), EngineConfig::default()).await;
    let machine = ready_order(&engine, "order-1").await;
    let before = machine.status().await.unwrap();

    let result = machine.send(OrderInput::Approve).await;

    assert!(matches!(
        result,
        Err(EngineError::NoMatchingTransition { ref state, ref input, .. })
            if state == "Draft" && input == "Approve"
    ));
    assert_eq!(machine.status().await.unwrap(), before);
}

#[tokio::test]
async fn resending_evaluates_against_the_new_state() {
    let engine = order_engine(ConflictRetryPolicy::default(), EngineConfig::default()).await;
    let machine = ready_order(&engine, "order-1").await;

    machine.send(OrderInput::Submit).await.unwrap();
    let again = machine.send(OrderInput::Submit).await;

    assert!(matches!(
        again,
        Err(EngineError::NoMatchingTransition { ref state, .. }) if state == "Submitted"
    ));
}

#[tokio::test]
async fn substates_inherit_their_parents_transitions() {
    let engine = order_engine(ConflictRetryPolicy::default(), EngineConfig::default()).await;
    let machine = ready_order(&engine, "order-1").await;
    machine.send(OrderInput::Submit).await.unwrap();

    // Archive is declared only on Active
    let archived = machine.send(OrderInput::Archive).await.unwrap();
    assert_eq!(archived.state, OrderState::Archived);
}

#[tokio::test]
async fn a_substates_own_transition_wins_over_its_parents() {
    let schematic = SchematicBuilder::new("override", s("child"))
        .with_state(StateDefinition::new(s("base")).with_transition(s("reset"), s("base")))
        .with_state(
            StateDefinition::new(s("child"))
                .with_parent(s("base"))
                .with_transition(s("reset"), s("fresh")),
        )
        .with_state(StateDefinition::new(s("fresh")).with_parent(s("base")))
        .build()
        .unwrap();
    let engine = GateEngine::in_memory(EngineConfig::default());
    let machine = engine
        .create_machine_from_schematic(schematic, None, HashMap::new())
        .await
        .unwrap();

    assert_eq!(machine.send(s("reset")).await.unwrap().state, "fresh");
    // From `fresh` only the inherited edge applies
    assert_eq!(machine.send(s("reset")).await.unwrap().state, "base");
}

#[tokio::test]
async fn rejected_preconditions_leave_state_and_tag_unchanged() {
    let engine = order_engine(ConflictRetryPolicy::default(), EngineConfig::default()).await;
    let machine = engine
        .create_machine("order", Some(s("bare")), HashMap::new())
        .await
        .unwrap();
    let before = machine.status().await.unwrap();

    let result = machine.send(OrderInput::Submit).await;

    assert!(matches!(
        result,
        Err(EngineError::PreconditionNotSatisfied { ref connector_key, .. })
            if connector_key == "state-bag-equals"
    ));
    assert_eq!(machine.status().await.unwrap(), before);
}

#[tokio::test]
async fn state_bag_updates_commit_with_the_transition() {
    let engine = order_engine(ConflictRetryPolicy::default(), EngineConfig::default()).await;
    let machine = engine
        .create_machine("order", Some(s("order-1")), HashMap::new())
        .await
        .unwrap();

    let annotated = machine
        .send_with(
            OrderInput::Annotate,
            SendOptions::new()
                .with_state_bag_update(ITEMS_KEY, "present")
                .with_state_bag_update("note", "rush"),
        )
        .await
        .unwrap();
    assert_eq!(annotated.state, OrderState::Draft);
    assert_eq!(annotated.state_bag[ITEMS_KEY], "present");

    let submitted = machine
        .send_with(
            OrderInput::Submit,
            SendOptions::new().with_state_bag_update("note", "standard"),
        )
        .await
        .unwrap();
    assert_eq!(submitted.state, OrderState::Submitted);
    assert_eq!(submitted.state_bag[ITEMS_KEY], "present");
    assert_eq!(submitted.state_bag["note"], "standard");
}

#[tokio::test]
async fn transition_level_preconditions_replace_the_states_own() {
    let (engine, seen) = gate_engine().await;
    let machine = engine.get_machine("g-1").await.unwrap();

    assert!(matches!(
        machine.send(s("jump")).await,
        Err(EngineError::PreconditionNotSatisfied { ref connector_key, .. }) if connector_key == "deny"
    ));

    let status = machine.send(s("go")).await.unwrap();
    assert_eq!(status.state, "running");
    assert_eq!(seen.lock().len(), 1);
}

#[tokio::test]
async fn payloads_reach_the_precondition() {
    let (engine, seen) = gate_engine().await;
    let machine = engine.get_machine("g-1").await.unwrap();

    machine
        .send_with_payload(s("go"), json!({"requested_by": "ops"}))
        .await
        .unwrap();

    assert_eq!(*seen.lock(), vec![Some(json!({"requested_by": "ops"}))]);
}

#[tokio::test]
async fn precondition_errors_are_terminal() {
    let (engine, _) = gate_engine().await;
    let machine = engine.get_machine("g-1").await.unwrap();
    let before = machine.status().await.unwrap();

    let result = machine.send(s("inspect")).await;

    assert!(matches!(
        result,
        Err(EngineError::PreconditionError {
            ref connector_key,
            source: GuardError::EvaluationFailed { .. },
            ..
        })
            if connector_key == "broken"
    ));
    assert_eq!(machine.status().await.unwrap().commit_tag, before.commit_tag);
}

#[tokio::test]
async fn unregistered_and_ambiguous_connectors_are_reported() {
    let (engine, _) = gate_engine().await;
    let machine = engine.get_machine("g-1").await.unwrap();

    assert!(matches!(
        machine.send(s("lookup")).await,
        Err(EngineError::ConnectorNotFound { ref connector_key, role: ConnectorRole::Precondition })
            if connector_key == "missing"
    ));

    engine.connectors().register_precondition(
        "gate",
        Arc::new(FnPrecondition::new("second gate", |_ctx: GateContext| async {
            Ok::<bool, GuardError>(true)
        })),
    );
    assert!(matches!(
        machine.send(s("go")).await,
        Err(EngineError::AmbiguousConnector { registrations: 2, .. })
    ));
    assert_eq!(machine.current_state().await.unwrap(), "idle");
}

#[tokio::test]
async fn expected_commit_tags_fence_read_then_send() {
    let engine = order_engine(ConflictRetryPolicy::Unbounded, EngineConfig::default()).await;
    let machine = ready_order(&engine, "order-1").await;
    let read = machine.status().await.unwrap();

    let submitted = machine
        .send_with(
            OrderInput::Submit,
            SendOptions::new().expecting_commit_tag(read.commit_tag),
        )
        .await
        .unwrap();
    assert_eq!(submitted.state, OrderState::Submitted);

    // A second caller holding the same read loses, even under an unbounded policy
    let stale = machine
        .send_with(
            OrderInput::Archive,
            SendOptions::new().expecting_commit_tag(read.commit_tag),
        )
        .await;
    match stale {
        Err(EngineError::StateConflict {
            expected,
            actual,
            attempts,
            ..
        }) => {
            assert_eq!(expected, read.commit_tag);
            assert_eq!(actual, Some(submitted.commit_tag));
            assert_eq!(attempts, 1);
        }
        other => panic!("expected a state conflict, got {other:?}"),
    }
    assert_eq!(machine.current_state().await.unwrap(), OrderState::Submitted);
}

#[tokio::test]
async fn cancelled_machines_refuse_to_send() {
    let engine = order_engine(ConflictRetryPolicy::default(), EngineConfig::default()).await;
    let machine = ready_order(&engine, "order-1").await;

    let token = tokio_util::sync::CancellationToken::new();
    let bound = machine.with_cancellation(token.clone());
    token.cancel();

    assert!(matches!(
        bound.send(OrderInput::Submit).await,
        Err(EngineError::Cancelled { .. })
    ));
    assert_eq!(machine.current_state().await.unwrap(), OrderState::Draft);
}
