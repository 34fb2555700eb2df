#![no_main]
use libfuzzer_sys::fuzz_target;

use handlegate_membrane::{DebugContext, HandleId, ValidationResult};

// Each 3-byte chunk is one operation: [op, id, arg].
fuzz_target!(|data: &[u8]| {
    let mut ctx: DebugContext<u8> = DebugContext::new();
    ctx.set_closed_handles_queue_max_size(i64::from(data.first().copied().unwrap_or(4) % 16));

    for chunk in data.chunks_exact(3) {
        let id = HandleId::new(u64::from(chunk[1] % 64));
        match chunk[0] % 6 {
            0 | 1 => {
                let was_open = ctx.open_handle(id).is_some();
                assert_eq!(ctx.register(id, chunk[2]).is_err(), was_open);
            }
            2 => {
                let before = ctx.classify(id);
                let outcome = ctx.close(id).expect("no callback installed");
                assert_eq!(outcome.is_closed(), before == ValidationResult::Valid);
            }
            3 => {
                let before = ctx.classify(id);
                assert_eq!(ctx.validate(id).expect("no callback installed"), before);
            }
            4 => {
                let current = ctx.current_generation();
                assert_eq!(ctx.new_generation(), current + 1);
            }
            _ => {
                let size = i64::from(chunk[2] % 24) - 4;
                let before = ctx.closed_count();
                let evicted = ctx.set_closed_handles_queue_max_size(size);
                assert_eq!(evicted.len(), before.saturating_sub(size.max(0) as usize));
            }
        }

        assert!(ctx.closed_count() <= ctx.get_closed_handles_queue_max_size());
        let open = ctx.get_open_handles(0);
        assert!(open.windows(2).all(|w| w[0].sequence() < w[1].sequence()));
        assert!(open.iter().all(|h| !h.is_closed()));
        assert!(ctx.get_closed_handles().iter().all(|h| h.is_closed()));
    }

    let summary = ctx.teardown();
    assert_eq!(summary.release_failures, 0);
});
