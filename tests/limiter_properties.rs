use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use proptest::prelude::*;

use taskchain::exec::Limiter;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// At most `limit` units run at once, units are admitted in submission
    /// order, and every unit's own result comes back, failures included.
    #[test]
    fn bounded_fifo_and_settles_all(
        limit in 1usize..5,
        sleeps in prop::collection::vec(0u64..4, 1..16),
    ) {
        let rt = runtime();
        let limiter = Limiter::new(limit).unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let admitted = Arc::new(Mutex::new(Vec::new()));

        let units = sleeps.iter().enumerate().map(|(i, ms)| {
            let limiter = limiter.clone();
            let active = active.clone();
            let peak = peak.clone();
            let admitted = admitted.clone();
            let ms = *ms;
            async move {
                limiter
                    .run(async move {
                        admitted.lock().unwrap().push(i);
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        if i % 3 == 0 { Err(i) } else { Ok(i) }
                    })
                    .await
            }
        });
        let results = rt.block_on(join_all(units));

        prop_assert!(peak.load(Ordering::SeqCst) <= limit);
        prop_assert_eq!(limiter.active(), 0);
        prop_assert_eq!(limiter.waiting(), 0);

        let order = admitted.lock().unwrap().clone();
        let expected: Vec<usize> = (0..sleeps.len()).collect();
        prop_assert_eq!(order, expected);

        for (i, r) in results.into_iter().enumerate() {
            if i % 3 == 0 {
                prop_assert_eq!(r, Err(i));
            } else {
                prop_assert_eq!(r, Ok(i));
            }
        }
    }
}

#[test]
fn zero_limit_is_a_configuration_error() {
    let err = Limiter::new(0).unwrap_err();
    assert!(err.to_string().contains("concurrency limit"));
}
