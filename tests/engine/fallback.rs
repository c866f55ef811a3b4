use crate::common::{
    order_engine, ready_order, OrderContext, OrderInput, OrderState, RecordingListener, NOTIFY,
};
use schematic_core::config::EngineConfig;
use schematic_core::connectors::{
    action_failed, Action, ActionError, ConnectorContext, ConnectorRole, FnAction,
    FnPrecondition, GuardError, ResolutionError,
};
use schematic_core::engine::StateEngine;
use schematic_core::error::EngineError;
use schematic_core::events::MachineEvent;
use schematic_core::schematic::{
    ActionBinding, ConflictRetryPolicy, PreconditionBinding, SchematicBuilder, StateDefinition,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

type DeployEngine = StateEngine<String, String>;
type DeployContext = ConnectorContext<String, String>;

fn s(value: &str) -> String {
    value.to_string()
}

/// `idle --start--> running` runs `boot` without a fallback;
/// `idle --loop--> looping` runs `explode`, which falls back into itself;
/// `idle --migrate--> migrating` runs `migrate`, whose `rollback` fallback is
/// guarded by the `rollback-allowed` precondition
async fn deploy_engine(config: EngineConfig) -> DeployEngine {
    let engine = DeployEngine::in_memory(config);
    let schematic = SchematicBuilder::new("deploy", s("idle"))
        .with_state(
            StateDefinition::new(s("idle"))
                .with_transition(s("start"), s("running"))
                .with_transition(s("loop"), s("looping"))
                .with_transition(s("migrate"), s("migrating")),
        )
        .with_state(
            StateDefinition::new(s("migrating"))
                .with_entry_action(ActionBinding::new("migrate").on_failure(s("rollback")))
                .with_guarded_transition(
                    s("rollback"),
                    s("rolled-back"),
                    PreconditionBinding::new("rollback-allowed"),
                ),
        )
        .with_state(StateDefinition::new(s("rolled-back")))
        .with_state(
            StateDefinition::new(s("running"))
                .with_entry_action(ActionBinding::new("boot").with_setting("image", "v2")),
        )
        .with_state(
            StateDefinition::new(s("looping"))
                .with_entry_action(ActionBinding::new("explode").on_failure(s("retry")))
                .with_transition(s("retry"), s("looping")),
        )
        .build()
        .unwrap();
    engine.store_schematic(schematic).await.unwrap();
    engine
        .create_machine("deploy", Some(s("d-1")), HashMap::new())
        .await
        .unwrap();
    engine
}

fn failing_notify() -> Arc<dyn Action<OrderState, OrderInput>> {
    Arc::new(FnAction::new("notify approvers", |_ctx: OrderContext| async {
        Err::<(), _>(ActionError::ExternalServiceError {
            service: "mail".to_string(),
            reason: "connection refused".to_string(),
        })
    }))
}

#[tokio::test]
async fn entry_actions_see_the_committed_status_and_their_settings() {
    let engine = deploy_engine(EngineConfig::default()).await;
    let booted = Arc::new(parking_lot::Mutex::new(None));

    let recorder = Arc::clone(&booted);
    engine.connectors().register_action(
        "boot",
        Arc::new(FnAction::new("boot", move |ctx: DeployContext| {
            let recorder = Arc::clone(&recorder);
            async move {
                *recorder.lock() = Some((
                    ctx.status.state.clone(),
                    ctx.status.commit_tag,
                    ctx.setting("image").map(str::to_string),
                ));
                Ok::<(), ActionError>(())
            }
        })),
    );

    let machine = engine.get_machine("d-1").await.unwrap();
    let status = machine.send(s("start")).await.unwrap();

    let (state, tag, image) = booted.lock().clone().expect("boot ran");
    assert_eq!(state, "running");
    assert_eq!(tag, status.commit_tag);
    assert_eq!(image.as_deref(), Some("v2"));
}

#[tokio::test]
async fn failing_action_without_fallback_keeps_the_commit() {
    let engine = deploy_engine(EngineConfig::default()).await;
    engine.connectors().register_action(
        "boot",
        Arc::new(FnAction::new("boot", |_ctx: DeployContext| async {
            Err::<(), _>(action_failed("image pull failed"))
        })),
    );
    let machine = engine.get_machine("d-1").await.unwrap();

    let error = machine.send(s("start")).await.unwrap_err();
    let current = machine.status().await.unwrap();

    assert!(error.is_post_commit());
    match error {
        EngineError::ActionFailed {
            connector_key,
            commit_tag,
            source,
            ..
        } => {
            assert_eq!(connector_key, "boot");
            assert_eq!(commit_tag, current.commit_tag);
            assert_eq!(source, action_failed("image pull failed"));
        }
        other => panic!("expected ActionFailed, got {other:?}"),
    }
    assert_eq!(current.state, "running");
}

#[tokio::test]
async fn unregistered_entry_action_is_reported_after_the_commit() {
    let engine = deploy_engine(EngineConfig::default()).await;
    let machine = engine.get_machine("d-1").await.unwrap();

    let error = machine.send(s("start")).await.unwrap_err();
    let current = machine.status().await.unwrap();

    assert!(error.is_post_commit());
    match error {
        EngineError::EntryActionUnresolved {
            commit_tag, source, ..
        } => {
            assert_eq!(commit_tag, current.commit_tag);
            assert_eq!(
                source,
                ResolutionError::NotFound {
                    connector_key: "boot".to_string(),
                    role: ConnectorRole::Action,
                }
            );
        }
        other => panic!("expected EntryActionUnresolved, got {other:?}"),
    }
    assert_eq!(current.state, "running");
}

#[tokio::test]
async fn rejected_fallback_is_reported_against_the_standing_commit() {
    let engine = deploy_engine(EngineConfig::default()).await;
    engine.connectors().register_action(
        "migrate",
        Arc::new(FnAction::new("migrate", |_ctx: DeployContext| async {
            Err::<(), _>(action_failed("schema lock held"))
        })),
    );
    engine.connectors().register_precondition(
        "rollback-allowed",
        Arc::new(FnPrecondition::new("rollback-allowed", |_ctx: DeployContext| async {
            Ok::<bool, GuardError>(false)
        })),
    );
    let machine = engine.get_machine("d-1").await.unwrap();

    let error = machine.send(s("migrate")).await.unwrap_err();
    let current = machine.status().await.unwrap();

    assert!(error.is_post_commit());
    assert!(!error.is_retryable());
    match error {
        EngineError::FallbackFailed {
            commit_tag,
            fallback_input,
            source,
            ..
        } => {
            assert_eq!(commit_tag, current.commit_tag);
            assert_eq!(fallback_input, "\"rollback\"");
            assert!(matches!(
                *source,
                EngineError::PreconditionNotSatisfied { ref connector_key, .. }
                    if connector_key == "rollback-allowed"
            ));
        }
        other => panic!("expected FallbackFailed, got {other:?}"),
    }
    assert_eq!(current.state, "migrating");
}

#[tokio::test]
async fn cancelled_entry_action_skips_its_fallback() {
    let engine = deploy_engine(EngineConfig::default()).await;
    engine.connectors().register_action(
        "migrate",
        Arc::new(FnAction::new("migrate", |_ctx: DeployContext| async {
            // Only the send's cancellation ends this action
            std::future::pending::<()>().await;
            Ok::<(), ActionError>(())
        })),
    );
    let token = CancellationToken::new();
    let machine = engine
        .get_machine("d-1")
        .await
        .unwrap()
        .with_cancellation(token.clone());

    let send = tokio::spawn(async move { machine.send(s("migrate")).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), send)
        .await
        .expect("send stops once cancelled")
        .unwrap();
    assert!(matches!(
        result,
        Err(EngineError::ActionFailed { source: ActionError::Cancelled, .. })
    ));
    let current = engine.get_machine("d-1").await.unwrap().current_state().await.unwrap();
    assert_eq!(current, "migrating");
}

#[tokio::test]
async fn failing_action_sends_its_fallback_input() {
    let engine = order_engine(ConflictRetryPolicy::default(), EngineConfig::default()).await;
    let listener = RecordingListener::<OrderState, OrderInput>::new("audit");
    engine.events().add_listener(listener.clone());

    // Hot swap the healthy notifier for one that fails
    engine.connectors().replace_action(NOTIFY, failing_notify());

    let machine = ready_order(&engine, "order-1").await;
    machine.send(OrderInput::Submit).await.unwrap();
    let status = machine.send(OrderInput::Approve).await.unwrap();

    assert_eq!(status.state, OrderState::Failed);

    engine.events().flush().await;
    let fallback = listener
        .events()
        .into_iter()
        .find_map(|event| match event {
            MachineEvent::Transitioned {
                to_state: OrderState::Failed,
                input,
                payload,
                ..
            } => Some((input, payload)),
            _ => None,
        })
        .expect("fallback transition was published");

    assert_eq!(fallback.0, OrderInput::Fail);
    let payload = fallback.1.expect("fallback carries a failure payload");
    assert_eq!(payload["connector_key"], NOTIFY);
    assert_eq!(payload["failed_state"], "Approved");
    assert_eq!(payload["failed_input"], "Approve");
    assert!(payload["error"].as_str().unwrap().contains("connection refused"));

    // Recover and approve again with the healthy notifier back in place
    engine.connectors().replace_action(
        NOTIFY,
        Arc::new(FnAction::new("notify approvers", |_ctx: OrderContext| async {
            Ok::<(), ActionError>(())
        })),
    );
    machine.send(OrderInput::Reopen).await.unwrap();
    machine.send(OrderInput::Submit).await.unwrap();
    assert_eq!(
        machine.send(OrderInput::Approve).await.unwrap().state,
        OrderState::Approved
    );
}

#[tokio::test]
async fn self_feeding_fallbacks_stop_at_the_depth_limit() {
    let config = EngineConfig {
        max_fallback_depth: 3,
        ..EngineConfig::default()
    };
    let engine = deploy_engine(config).await;
    let executions = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&executions);
    engine.connectors().register_action(
        "explode",
        Arc::new(FnAction::new("explode", move |_ctx: DeployContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(action_failed("boom")) }
        })),
    );
    let machine = engine.get_machine("d-1").await.unwrap();

    let result = machine.send(s("loop")).await;

    assert!(matches!(
        result,
        Err(EngineError::FallbackDepthExceeded { max_depth: 3, .. })
    ));
    assert_eq!(executions.load(Ordering::SeqCst), 4);
    assert_eq!(machine.current_state().await.unwrap(), "looping");
}
