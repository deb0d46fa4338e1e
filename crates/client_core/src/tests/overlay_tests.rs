use super::*;

fn garage() -> DeviceId {
    DeviceId::new("garage")
}

#[test]
fn set_replaces_and_get_reads_the_value() {
    let overlay = OptimisticOverlay::new();
    overlay.set(&garage(), CommandId::generate(), true);
    overlay.set(&garage(), CommandId::generate(), false);
    assert_eq!(overlay.get(&garage()), Some(false));
    assert_eq!(overlay.get(&DeviceId::new("shed")), None);
}

#[test]
fn clearing_for_another_command_keeps_the_newer_value() {
    let overlay = OptimisticOverlay::new();
    let stale = CommandId::generate();
    let current = CommandId::generate();
    overlay.set(&garage(), current, true);

    assert_eq!(overlay.clear_for(&garage(), stale), None);
    assert_eq!(overlay.get(&garage()), Some(true));

    assert_eq!(overlay.clear_for(&garage(), current), Some(true));
    assert!(overlay.is_empty());
}

#[test]
fn clearing_from_many_threads_removes_exactly_once() {
    let overlay = OptimisticOverlay::new();
    let command_id = CommandId::generate();
    overlay.set(&garage(), command_id, false);

    let removed: usize = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| overlay.clear_for(&garage(), command_id).is_some()))
            .collect();
        workers
            .into_iter()
            .map(|worker| usize::from(worker.join().expect("worker")))
            .sum()
    });

    assert_eq!(removed, 1);
    assert_eq!(overlay.clear(&garage()), None);
}
