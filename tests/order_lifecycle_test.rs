mod common;

use assert_matches::assert_matches;
use common::{TestApp, GST_REG};
use orderdesk::{
    entities::{OrderStatus, TransitionTrigger},
    errors::ServiceError,
    services::order_status::{PaymentOutcome, PaymentSignal},
};
use uuid::Uuid;

async fn place_order(app: &TestApp, session_key: &str) -> Uuid {
    app.state
        .services
        .cart
        .add_item(session_key, GST_REG, 1)
        .await
        .unwrap();
    app.state
        .services
        .checkout
        .checkout(app.checkout_input(session_key, "idem-lifecycle"))
        .await
        .unwrap()
        .into_order()
        .order
        .id
}

#[tokio::test]
async fn pending_to_processing_to_completed() {
    let app = TestApp::new().await;
    let order_id = place_order(&app, "sess-life").await;
    let lifecycle = &app.state.services.order_status;

    let order = lifecycle
        .transition(order_id, OrderStatus::Processing, TransitionTrigger::Admin, None)
        .await
        .unwrap();
    assert_eq!(order.order.status, OrderStatus::Processing);

    let order = lifecycle
        .transition(
            order_id,
            OrderStatus::Completed,
            TransitionTrigger::Admin,
            Some("filed with department".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(order.order.status, OrderStatus::Completed);
    assert_eq!(order.order.version, 3);

    let result = lifecycle
        .transition(order_id, OrderStatus::Processing, TransitionTrigger::Admin, None)
        .await;
    assert_matches!(
        result,
        Err(ServiceError::InvalidTransition { from, to, .. }) if from == "completed" && to == "processing"
    );
}

#[tokio::test]
async fn cancelled_is_terminal() {
    let app = TestApp::new().await;
    let order_id = place_order(&app, "sess-cancel").await;
    let lifecycle = &app.state.services.order_status;

    lifecycle
        .transition(order_id, OrderStatus::Cancelled, TransitionTrigger::Admin, None)
        .await
        .unwrap();

    for target in [
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
    ] {
        let result = lifecycle
            .transition(order_id, target, TransitionTrigger::Admin, None)
            .await;
        assert_matches!(result, Err(ServiceError::InvalidTransition { .. }));
    }
}

#[tokio::test]
async fn same_state_transition_is_rejected() {
    let app = TestApp::new().await;
    let order_id = place_order(&app, "sess-same").await;

    let result = app
        .state
        .services
        .order_status
        .transition(order_id, OrderStatus::Pending, TransitionTrigger::Admin, None)
        .await;
    assert_matches!(result, Err(ServiceError::InvalidTransition { .. }));
}

#[tokio::test]
async fn unknown_order_is_not_found() {
    let app = TestApp::new().await;
    let lifecycle = &app.state.services.order_status;

    assert_matches!(
        lifecycle
            .transition(Uuid::new_v4(), OrderStatus::Processing, TransitionTrigger::Admin, None)
            .await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        lifecycle.history(Uuid::new_v4()).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn payment_confirmation_moves_to_processing_and_records_reference() {
    let app = TestApp::new().await;
    let order_id = place_order(&app, "sess-paid").await;
    let lifecycle = &app.state.services.order_status;

    let order = lifecycle
        .apply_payment_signal(
            order_id,
            PaymentSignal {
                outcome: PaymentOutcome::Confirmed,
                reference: Some("pay_Nx81".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(order.order.status, OrderStatus::Processing);
    assert_eq!(order.order.payment_reference.as_deref(), Some("pay_Nx81"));

    // A late duplicate confirmation does not move the order again
    let duplicate = lifecycle
        .apply_payment_signal(
            order_id,
            PaymentSignal {
                outcome: PaymentOutcome::Confirmed,
                reference: Some("pay_Nx81".to_string()),
            },
        )
        .await;
    assert_matches!(duplicate, Err(ServiceError::InvalidTransition { .. }));

    // Payment signals cannot complete an order
    let failed = lifecycle
        .apply_payment_signal(
            order_id,
            PaymentSignal {
                outcome: PaymentOutcome::Failed,
                reference: None,
            },
        )
        .await;
    assert_matches!(failed, Err(ServiceError::InvalidTransition { trigger, .. }) if trigger == "payment_failed");
}

#[tokio::test]
async fn payment_failure_cancels_pending_order() {
    let app = TestApp::new().await;
    let order_id = place_order(&app, "sess-failed").await;

    let order = app
        .state
        .services
        .order_status
        .apply_payment_signal(
            order_id,
            PaymentSignal {
                outcome: PaymentOutcome::Failed,
                reference: Some("pay_declined".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(order.order.status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn history_lists_accepted_transitions_oldest_first() {
    let app = TestApp::new().await;
    let order_id = place_order(&app, "sess-audit").await;
    let lifecycle = &app.state.services.order_status;

    // Nothing logged at creation
    assert!(lifecycle.history(order_id).await.unwrap().is_empty());

    lifecycle
        .apply_payment_signal(
            order_id,
            PaymentSignal {
                outcome: PaymentOutcome::Confirmed,
                reference: Some("pay_1".to_string()),
            },
        )
        .await
        .unwrap();
    let _ = lifecycle
        .transition(order_id, OrderStatus::Pending, TransitionTrigger::Admin, None)
        .await;
    lifecycle
        .transition(
            order_id,
            OrderStatus::Completed,
            TransitionTrigger::Admin,
            Some("done".to_string()),
        )
        .await
        .unwrap();

    let history = lifecycle.history(order_id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].from_status, OrderStatus::Pending);
    assert_eq!(history[0].to_status, OrderStatus::Processing);
    assert_eq!(history[0].trigger, TransitionTrigger::PaymentConfirmed);
    assert_eq!(history[1].to_status, OrderStatus::Completed);
    assert_eq!(history[1].trigger, TransitionTrigger::Admin);
    assert_eq!(history[1].note.as_deref(), Some("done"));
}

#[tokio::test]
async fn racing_admins_cannot_both_succeed() {
    let app = TestApp::new().await;
    let order_id = place_order(&app, "sess-admins").await;
    let lifecycle = &app.state.services.order_status;

    let (a, b) = tokio::join!(
        lifecycle.transition(order_id, OrderStatus::Processing, TransitionTrigger::Admin, None),
        lifecycle.transition(order_id, OrderStatus::Cancelled, TransitionTrigger::Admin, None),
    );

    let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert!(successes >= 1);

    let history = lifecycle.history(order_id).await.unwrap();
    let order = app.state.services.orders.get_order(order_id).await.unwrap();
    // Every accepted change is logged exactly once and the final status is the last one logged
    assert_eq!(history.len(), successes);
    assert_eq!(history.last().unwrap().to_status, order.order.status);
    for result in [a, b] {
        if let Err(err) = result {
            assert_matches!(
                err,
                ServiceError::Conflict(_) | ServiceError::InvalidTransition { .. }
            );
        }
    }
}
