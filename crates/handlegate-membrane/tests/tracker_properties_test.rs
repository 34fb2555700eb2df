//! Integration test: observable tracker contract.
//!
//! Run: cargo test -p handlegate-membrane --test tracker_properties_test

use std::sync::{Arc, Mutex};

use handlegate_membrane::{
    CloseOutcome, DebugConfig, DebugContext, HandleId, HandleRecord, HandleState,
    InvalidHandleUse, Operation, TrackerError, ValidationResult,
};

fn id(raw: u64) -> HandleId {
    HandleId::new(raw)
}

fn open_ids<T>(ctx: &DebugContext<T>, generation: u64) -> Vec<u64> {
    ctx.get_open_handles(generation)
        .iter()
        .map(|h| h.id().raw())
        .collect()
}

fn closed_ids<T>(ctx: &DebugContext<T>) -> Vec<u64> {
    ctx.get_closed_handles()
        .iter()
        .map(|h| h.id().raw())
        .collect()
}

fn capture(ctx: &mut DebugContext<String>) -> Arc<Mutex<Vec<InvalidHandleUse>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    ctx.set_on_invalid_handle_callback(move |r: &InvalidHandleUse| {
        sink.lock().unwrap().push(*r);
        Ok(())
    });
    seen
}

#[test]
fn new_generation_twice_from_base() {
    let mut ctx: DebugContext<()> = DebugContext::new();
    assert_eq!(ctx.current_generation(), 0);
    assert_eq!(ctx.new_generation(), 1);
    assert_eq!(ctx.new_generation(), 2);
}

#[test]
fn handles_stay_visible_from_their_generation_until_closed() {
    let mut ctx = DebugContext::new();
    ctx.register(id(1), "h1".to_string()).unwrap();
    let g1 = ctx.new_generation();
    ctx.register(id(2), "h2".to_string()).unwrap();

    assert_eq!(open_ids(&ctx, g1), vec![2]);
    assert_eq!(open_ids(&ctx, 0), vec![1, 2]);

    ctx.close(id(2)).unwrap();
    for generation in 0..=g1 + 1 {
        assert!(!open_ids(&ctx, generation).contains(&2));
    }
    assert_eq!(closed_ids(&ctx), vec![2]);
}

#[test]
fn open_handles_order_follows_creation_not_id() {
    let mut ctx = DebugContext::new();
    let raw_ids = [0xffff_u64, 3, 0x8000, 1, 77];
    for raw in raw_ids {
        ctx.register(id(raw), format!("{raw}")).unwrap();
    }
    assert_eq!(open_ids(&ctx, 0), raw_ids.to_vec());
    // Repeated queries are identical.
    assert_eq!(open_ids(&ctx, 0), open_ids(&ctx, 0));
}

#[test]
fn capacity_two_close_three() {
    let mut ctx = DebugContext::with_config(
        &DebugConfig::default().with_closed_handles_queue_max_size(2),
    );
    for raw in 1..=3 {
        ctx.register(id(raw), format!("h{raw}")).unwrap();
    }
    for raw in 1..=3 {
        ctx.close(id(raw)).unwrap();
    }
    assert_eq!(closed_ids(&ctx), vec![2, 3]);
    assert!(ctx.get_closed_handles().len() <= ctx.get_closed_handles_queue_max_size());
}

#[test]
fn lowering_capacity_evicts_exactly_the_difference() {
    let mut ctx = DebugContext::new();
    ctx.set_closed_handles_queue_max_size(6);
    for raw in 0..6 {
        ctx.register(id(raw), String::new()).unwrap();
        ctx.close(id(raw)).unwrap();
    }
    assert_eq!(ctx.get_closed_handles().len(), 6);

    let evicted = ctx.set_closed_handles_queue_max_size(4);
    let evicted_ids: Vec<u64> = evicted.iter().map(HandleRecord::id).map(HandleId::raw).collect();
    assert_eq!(evicted_ids, vec![0, 1]);
    assert!(evicted.iter().all(|r| r.state() == HandleState::Discarded));
    assert_eq!(closed_ids(&ctx), vec![2, 3, 4, 5]);
}

#[test]
fn use_after_close_reports_once_per_call() {
    let mut ctx = DebugContext::new();
    let seen = capture(&mut ctx);
    let record = ctx.register(id(10), "obj".to_string()).unwrap();
    ctx.close(id(10)).unwrap();

    for expected in 1..=3 {
        assert_eq!(
            ctx.validate(id(10)).unwrap(),
            ValidationResult::UseAfterClose
        );
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), expected);
        let last = seen.last().unwrap();
        assert_eq!(last.id, id(10));
        assert_eq!(last.classification, ValidationResult::UseAfterClose);
        assert_eq!(last.creation_generation, Some(record.creation_generation()));
        assert_eq!(last.sequence, Some(record.sequence()));
        assert_eq!(last.operation, Operation::Dereference);
    }
}

#[test]
fn never_registered_is_unknown_and_reported() {
    let mut ctx = DebugContext::new();
    let seen = capture(&mut ctx);
    assert_eq!(ctx.validate(id(1234)).unwrap(), ValidationResult::Unknown);
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[test]
fn valid_handles_are_never_reported() {
    let mut ctx = DebugContext::new();
    let seen = capture(&mut ctx);
    ctx.register(id(1), "a".to_string()).unwrap();
    for _ in 0..10 {
        assert_eq!(ctx.validate(id(1)).unwrap(), ValidationResult::Valid);
    }
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn round_trip_register_close_evict() {
    let mut ctx = DebugContext::new();
    ctx.set_closed_handles_queue_max_size(1);
    ctx.register(id(1), "first".to_string()).unwrap();
    ctx.close(id(1)).unwrap();
    assert_eq!(closed_ids(&ctx), vec![1]);
    assert_eq!(ctx.classify(id(1)), ValidationResult::UseAfterClose);

    ctx.register(id(2), "second".to_string()).unwrap();
    let outcome = ctx.close(id(2)).unwrap();
    assert_eq!(outcome.evicted()[0].id(), id(1));

    assert!(!open_ids(&ctx, 0).contains(&1));
    assert!(!closed_ids(&ctx).contains(&1));
    // Evicted ids are indistinguishable from never-registered ones.
    assert_eq!(ctx.classify(id(1)), ValidationResult::Unknown);
    assert_eq!(ctx.classify(id(999)), ValidationResult::Unknown);
}

#[test]
fn reused_id_after_eviction_is_valid_again() {
    let mut ctx = DebugContext::new();
    ctx.set_closed_handles_queue_max_size(0);
    let first = ctx.register(id(5), "old".to_string()).unwrap();
    ctx.close(id(5)).unwrap();
    let second = ctx.register(id(5), "new".to_string()).unwrap();

    assert!(second.sequence() > first.sequence());
    assert_eq!(ctx.validate(id(5)).unwrap(), ValidationResult::Valid);
    assert_eq!(ctx.referent(id(5)).map(String::as_str), Some("new"));
}

#[test]
fn callback_failure_reaches_the_caller() {
    let mut ctx: DebugContext<String> = DebugContext::new();
    ctx.set_on_invalid_handle_callback(|r: &InvalidHandleUse| {
        Err(format!("invalid handle {}", r.id).into())
    });

    let err = ctx.validate(id(3)).unwrap_err();
    assert!(matches!(
        err,
        TrackerError::Callback {
            classification: ValidationResult::Unknown,
            ..
        }
    ));

    ctx.clear_on_invalid_handle_callback();
    assert_eq!(ctx.validate(id(3)).unwrap(), ValidationResult::Unknown);
}

#[test]
fn callback_can_be_replaced_at_any_time() {
    let mut ctx = DebugContext::new();
    let first = capture(&mut ctx);
    ctx.validate(id(1)).unwrap();
    let second = capture(&mut ctx);
    ctx.validate(id(1)).unwrap();
    assert_eq!(first.lock().unwrap().len(), 1);
    assert_eq!(second.lock().unwrap().len(), 1);
}

#[test]
fn double_close_routes_through_detector() {
    let mut ctx = DebugContext::new();
    let seen = capture(&mut ctx);
    ctx.register(id(1), "x".to_string()).unwrap();
    assert!(ctx.close(id(1)).unwrap().is_closed());
    assert_eq!(
        ctx.close(id(1)).unwrap(),
        CloseOutcome::Rejected(ValidationResult::UseAfterClose)
    );
    assert_eq!(seen.lock().unwrap()[0].operation, Operation::Close);
}

#[test]
fn construction_is_not_allowed() {
    assert!(matches!(
        HandleRecord::try_construct(id(1)),
        Err(TrackerError::ConstructionNotAllowed)
    ));
}

#[test]
fn diagnostic_record_serializes_for_logs() {
    let mut ctx = DebugContext::new();
    ctx.register(id(2), "x".to_string()).unwrap();
    ctx.close(id(2)).unwrap();
    ctx.validate(id(2)).unwrap();
    let report = ctx.last_invalid_handle().copied().unwrap();
    let json = serde_json::to_value(report).unwrap();
    assert_eq!(json["id"], 2);
    assert_eq!(json["classification"], "use_after_close");
    assert_eq!(json["operation"], "dereference");
    assert_eq!(json["creation_generation"], 0);
}
