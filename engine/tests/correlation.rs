//! Transaction correlation flows driven through the engine surface:
//! live delivery ordering, parking, rehydration, and cancellation.

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use common::{TestScreen, harness};
use waypoint_engine::{
    CorrelationState, Destination, DestinationId, LifecycleState, NavigationError, ObtainOutcome,
    RouteParams,
};

const ROUTES: &str = r#"
[[routes]]
pattern = '^/picker$'
destination = "PickerView"
"#;

#[tokio::test]
async fn live_parent_receives_result_before_responder_close() {
    let h = harness();
    h.engine.load_routes_toml(ROUTES).unwrap();
    let child = TestScreen::ready("PickerView");
    h.loader.provide(Arc::clone(&child) as Arc<dyn Destination>);

    let parent = TestScreen::ready("ParentView");
    let sink = Arc::clone(&h.presenter);
    parent
        .result_handlers()
        .unwrap()
        .on::<String>(move |value| sink.push(format!("result:{value}")));

    let parent_dest: Arc<dyn Destination> = Arc::clone(&parent) as Arc<dyn Destination>;
    assert!(
        h.engine
            .navigate_for_result(&parent_dest, "/picker", RouteParams::new())
            .await
            .unwrap()
    );

    let child_dest: Arc<dyn Destination> = Arc::clone(&child) as Arc<dyn Destination>;
    assert!(
        h.engine
            .close_with_result(&child_dest, "picked".to_string())
            .await
            .unwrap()
    );

    // The handler ran synchronously, before the presenter was asked to
    // dismiss the responder.
    let log = h.presenter.log();
    let result_idx = log.iter().position(|e| e == "result:picked").unwrap();
    let close_idx = log
        .iter()
        .position(|e| e.starts_with("close:"))
        .unwrap();
    assert!(result_idx < close_idx);

    assert_eq!(parent_dest.correlation().requester_id(), None);
    assert_eq!(child_dest.correlation().responder_id(), None);
    assert_eq!(h.engine.ledger().open_count(), 0);
    assert_eq!(h.engine.ledger().parked_count(), 0);
}

#[tokio::test]
async fn parked_result_survives_parent_recreation() {
    let h = harness();
    h.engine.load_routes_toml(ROUTES).unwrap();
    let child = TestScreen::ready("PickerView");
    h.loader.provide(Arc::clone(&child) as Arc<dyn Destination>);

    let mut bundle: HashMap<String, String> = HashMap::new();
    {
        let parent = TestScreen::ready("ParentView");
        let parent_dest: Arc<dyn Destination> = Arc::clone(&parent) as Arc<dyn Destination>;
        assert!(
            h.engine
                .navigate_for_result(&parent_dest, "/picker", RouteParams::new())
                .await
                .unwrap()
        );
        h.engine.save_state(&parent_dest, &mut bundle);
    } // Parent torn down before the child answers.

    let child_dest: Arc<dyn Destination> = Arc::clone(&child) as Arc<dyn Destination>;
    assert!(
        h.engine
            .close_with_result(&child_dest, "late".to_string())
            .await
            .unwrap()
    );
    assert_eq!(h.engine.ledger().parked_count(), 1);

    // Recreate the parent, restore its stamps before it becomes
    // result-capable, then bring it up.
    let revived = TestScreen::uninitialized("ParentView");
    let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    revived
        .result_handlers()
        .unwrap()
        .on::<String>(move |value| sink.lock().unwrap().push(value));

    let revived_dest: Arc<dyn Destination> = Arc::clone(&revived) as Arc<dyn Destination>;
    h.engine.restore_state(&revived_dest, &bundle);
    revived.lifecycle().mark_initialized();
    revived.lifecycle().mark_attached();

    assert_eq!(
        h.engine.try_obtain_result(&revived_dest).unwrap(),
        ObtainOutcome::Delivered
    );
    assert_eq!(received.lock().unwrap().as_slice(), ["late".to_string()]);
    assert_eq!(revived_dest.correlation().requester_id(), None);

    // Exactly once: a second pickup finds nothing.
    assert_eq!(
        h.engine.try_obtain_result(&revived_dest).unwrap(),
        ObtainOutcome::Nothing
    );
    assert_eq!(h.engine.ledger().parked_count(), 0);
}

#[tokio::test]
async fn renavigation_picks_up_parked_result_automatically() {
    let h = harness();
    h.engine.load_routes_toml(ROUTES).unwrap();
    let child = TestScreen::ready("PickerView");
    h.loader.provide(Arc::clone(&child) as Arc<dyn Destination>);

    let mut bundle: HashMap<String, String> = HashMap::new();
    {
        let parent = TestScreen::ready("ParentView");
        let parent_dest: Arc<dyn Destination> = Arc::clone(&parent) as Arc<dyn Destination>;
        h.engine
            .navigate_for_result(&parent_dest, "/picker", RouteParams::new())
            .await
            .unwrap();
        h.engine.save_state(&parent_dest, &mut bundle);
    }

    let child_dest: Arc<dyn Destination> = Arc::clone(&child) as Arc<dyn Destination>;
    h.engine
        .close_with_result(&child_dest, "late".to_string())
        .await
        .unwrap();

    let revived = TestScreen::ready("ParentView");
    let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    revived
        .result_handlers()
        .unwrap()
        .on::<String>(move |value| sink.lock().unwrap().push(value));

    let revived_dest: Arc<dyn Destination> = Arc::clone(&revived) as Arc<dyn Destination>;
    h.engine.restore_state(&revived_dest, &bundle);

    // Presenting the recreated parent regains result-capability; the
    // parked entry is consumed as part of the navigation.
    assert!(
        h.engine
            .navigate_instance(revived_dest, RouteParams::new(), Default::default())
            .await
            .unwrap()
    );
    assert_eq!(received.lock().unwrap().as_slice(), ["late".to_string()]);
}

/// A responder addressed by its Rust type rather than a route string.
struct ColorPicker {
    correlation: CorrelationState,
    lifecycle: LifecycleState,
}

impl Destination for ColorPicker {
    fn destination_id(&self) -> DestinationId {
        DestinationId::for_type::<Self>()
    }

    fn correlation(&self) -> &CorrelationState {
        &self.correlation
    }

    fn lifecycle(&self) -> &LifecycleState {
        &self.lifecycle
    }
}

#[tokio::test]
async fn typed_destination_id_opens_a_transaction_without_a_route() {
    let h = harness();
    let child: Arc<dyn Destination> = Arc::new(ColorPicker {
        correlation: CorrelationState::new(),
        lifecycle: LifecycleState::ready(),
    });
    h.loader.provide(Arc::clone(&child));

    let parent = TestScreen::ready("ParentView");
    let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    parent
        .result_handlers()
        .unwrap()
        .on::<String>(move |value| sink.lock().unwrap().push(value));

    let parent_dest: Arc<dyn Destination> = Arc::clone(&parent) as Arc<dyn Destination>;
    assert!(
        h.engine
            .navigate_for_result_to(
                &parent_dest,
                DestinationId::for_type::<ColorPicker>(),
                RouteParams::new(),
            )
            .await
            .unwrap()
    );
    let token = child.correlation().responder_id().unwrap();
    assert_eq!(parent_dest.correlation().requester_id(), Some(token));

    assert!(
        h.engine
            .close_with_result(&child, "teal".to_string())
            .await
            .unwrap()
    );
    assert_eq!(received.lock().unwrap().as_slice(), ["teal".to_string()]);
}

#[tokio::test]
async fn cancelled_transaction_never_notifies_the_handler() {
    let h = harness();
    h.engine.load_routes_toml(ROUTES).unwrap();
    let child = TestScreen::ready("PickerView");
    h.loader.provide(Arc::clone(&child) as Arc<dyn Destination>);

    let parent = TestScreen::ready("ParentView");
    let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    parent
        .result_handlers()
        .unwrap()
        .on::<String>(move |value| sink.lock().unwrap().push(value));

    let parent_dest: Arc<dyn Destination> = Arc::clone(&parent) as Arc<dyn Destination>;
    h.engine
        .navigate_for_result(&parent_dest, "/picker", RouteParams::new())
        .await
        .unwrap();

    h.engine.cancel_transaction(&parent_dest);
    assert_eq!(parent_dest.correlation().requester_id(), None);

    // The responder answers anyway; the value is parked under a token no
    // holder carries any more — the accepted one-entry leak.
    let child_dest: Arc<dyn Destination> = Arc::clone(&child) as Arc<dyn Destination>;
    assert!(
        h.engine
            .close_with_result(&child_dest, "unwanted".to_string())
            .await
            .unwrap()
    );

    assert_eq!(
        h.engine.try_obtain_result(&parent_dest).unwrap(),
        ObtainOutcome::Nothing
    );
    assert!(received.lock().unwrap().is_empty());
    assert_eq!(h.engine.ledger().parked_count(), 1);
}

#[tokio::test]
async fn mistyped_result_is_a_hard_error_but_still_closes() {
    let h = harness();
    h.engine.load_routes_toml(ROUTES).unwrap();
    let child = TestScreen::ready("PickerView");
    h.loader.provide(Arc::clone(&child) as Arc<dyn Destination>);

    let parent = TestScreen::ready("ParentView");
    parent.result_handlers().unwrap().on::<String>(|_| {});

    let parent_dest: Arc<dyn Destination> = Arc::clone(&parent) as Arc<dyn Destination>;
    h.engine
        .navigate_for_result(&parent_dest, "/picker", RouteParams::new())
        .await
        .unwrap();

    let child_dest: Arc<dyn Destination> = Arc::clone(&child) as Arc<dyn Destination>;
    let err = h
        .engine
        .close_with_result(&child_dest, 404u32)
        .await
        .unwrap_err();
    assert!(matches!(err, NavigationError::TypeMismatch { .. }));

    // The responder was dismissed regardless of the delivery failure.
    assert_eq!(h.presenter.count("close:"), 1);
}

#[tokio::test]
async fn failed_show_unwinds_the_transaction_stamps() {
    let h = harness();
    h.engine.load_routes_toml(ROUTES).unwrap();
    let child = TestScreen::ready("PickerView");
    h.loader.provide(Arc::clone(&child) as Arc<dyn Destination>);

    let parent = TestScreen::ready("ParentView");
    let parent_dest: Arc<dyn Destination> = Arc::clone(&parent) as Arc<dyn Destination>;

    h.presenter.refuse_shows();
    assert!(
        !h.engine
            .navigate_for_result(&parent_dest, "/picker", RouteParams::new())
            .await
            .unwrap()
    );

    let child_dest: Arc<dyn Destination> = Arc::clone(&child) as Arc<dyn Destination>;
    assert_eq!(parent_dest.correlation().requester_id(), None);
    assert_eq!(child_dest.correlation().responder_id(), None);
    assert_eq!(h.engine.ledger().open_count(), 0);
    assert_eq!(h.engine.ledger().parked_count(), 0);
}
