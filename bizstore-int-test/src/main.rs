use bizstore::errors::BizResult;
use bizstore_int_test::test_util::{cleanup, create_test_context};
use std::thread;
use std::time::Instant;

fn main() -> BizResult<()> {
    colog::init();
    println!("Starting allocation stress test...");
    let ctx = create_test_context()?;
    let store = ctx.store();

    let threads = 16;
    let per_thread = 2_000;

    let start = Instant::now();
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let store = store.clone();
            thread::spawn(move || -> BizResult<u64> {
                let context = store.context();
                let mut last = 0;
                for _ in 0..per_thread {
                    last = store.next_id(&context, "stress")?;
                }
                Ok(last)
            })
        })
        .collect();

    let mut highest = 0;
    for handle in handles {
        let last = handle.join().expect("allocation thread panicked")?;
        highest = highest.max(last);
    }
    let elapsed = start.elapsed();
    println!(
        "Allocated {} ids in {:?} ({:.0} ids/s), highest {}",
        threads * per_thread,
        elapsed,
        (threads * per_thread) as f64 / elapsed.as_secs_f64(),
        highest
    );
    assert_eq!(highest, (threads * per_thread) as u64);

    cleanup(ctx)
}
