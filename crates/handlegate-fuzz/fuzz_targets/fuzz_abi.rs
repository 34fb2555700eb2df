#![no_main]
use libfuzzer_sys::fuzz_target;

use handlegate_abi::DebugAbi;
use handlegate_membrane::{DebugConfig, ValidationResult};

// Opens, closes and dereferences through the handle table, checking that an
// id handed out by `open` is never one still held by the quarantine.
fuzz_target!(|data: &[u8]| {
    let capacity = usize::from(data.first().copied().unwrap_or(2) % 8);
    let abi: DebugAbi<u16> =
        DebugAbi::new(DebugConfig::default().with_closed_handles_queue_max_size(capacity));
    let mut live = Vec::new();
    let mut stale = Vec::new();

    for (i, byte) in data.iter().enumerate() {
        match byte % 4 {
            0 => {
                let closed = abi.get_closed_handles();
                let Ok(h) = abi.open(i as u16) else { return };
                assert!(closed.iter().all(|r| r.id() != h));
                live.push(h);
            }
            1 if !live.is_empty() => {
                let h = live.swap_remove(usize::from(*byte) % live.len());
                assert!(abi.close(h).expect("no callback installed").is_closed());
                stale.push(h);
            }
            2 if !live.is_empty() => {
                let h = live[usize::from(*byte) % live.len()];
                assert!(abi.with_referent(h, |v| *v).expect("no callback").is_some());
            }
            _ => {
                if let Some(&h) = stale.last()
                    && !live.contains(&h)
                {
                    assert_ne!(abi.validate(h).expect("no callback"), ValidationResult::Valid);
                }
            }
        }
    }
});
