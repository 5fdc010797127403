use metrics::counter;
use request_idempotency::observability::init_metrics;
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn test_concurrent_init_metrics_shares_one_recorder() {
    let callers = 8;
    let barrier = Arc::new(Barrier::new(callers));

    let handles: Vec<_> = (0..callers)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                init_metrics()
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("init thread panicked"))
        .collect();
    assert!(results.iter().all(Result::is_ok), "every caller should get the handle");

    counter!("metrics_init_test_total").increment(1);
    for handle in results.into_iter().flatten() {
        assert!(handle.render().contains("metrics_init_test_total 1"));
    }
    assert!(init_metrics().is_ok());
}
