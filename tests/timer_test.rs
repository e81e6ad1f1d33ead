//! Integration tests for the timer service, driven on tokio's paused
//! clock so a multi-second schedule runs instantly.

use std::time::Duration;

use syncvisor::{worker, Bus, Event, EventKind, Payload, SystemServices, Timer, TimerService};

async fn expect_timer(client: &syncvisor::EventClient, id: u64) {
    let ev = client
        .pop_wait(Some(Duration::from_secs(30)))
        .await
        .expect("timer event expected");
    assert_eq!(ev.kind(), EventKind::Timer);
    match ev.payload() {
        Payload::Timer(fired) => assert_eq!(fired.timer_id, id),
        other => panic!("unexpected payload: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn interval_timer_fires_then_reloads() {
    let bus = Bus::new();
    let supervisor = bus.register();
    let services = SystemServices::new();

    let service = TimerService::new(&services, supervisor.id()).unwrap();
    let handle = worker::spawn(&bus, service);
    let registry = services.timer().unwrap();

    // value=2, interval=3, no target: fires at ~2s, then every 3s, to the
    // supervisor.
    let timer = Timer::new(7, 2, 3, None);
    registry.add(timer.clone());
    timer.start();

    let t0 = tokio::time::Instant::now();
    expect_timer(&supervisor, 7).await;
    let first = t0.elapsed();
    assert!(
        (Duration::from_secs(1)..=Duration::from_secs(3)).contains(&first),
        "first firing at {first:?}"
    );

    expect_timer(&supervisor, 7).await;
    let second = t0.elapsed();
    assert!(
        (Duration::from_secs(4)..=Duration::from_secs(6)).contains(&second),
        "second firing at {second:?}"
    );

    expect_timer(&supervisor, 7).await;
    let third = t0.elapsed();
    assert!(
        (Duration::from_secs(7)..=Duration::from_secs(9)).contains(&third),
        "third firing at {third:?}"
    );

    bus.broadcast(Event::quit()).unwrap();
    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn one_shot_timer_stops_after_firing() {
    let bus = Bus::new();
    let supervisor = bus.register();
    let services = SystemServices::new();

    let service = TimerService::new(&services, supervisor.id()).unwrap();
    let handle = worker::spawn(&bus, service);
    let registry = services.timer().unwrap();

    let timer = Timer::new(1, 1, 0, None);
    registry.add(timer.clone());
    timer.start();

    expect_timer(&supervisor, 1).await;
    assert!(!timer.is_running());

    // No further firings within a generous window.
    assert!(supervisor
        .pop_wait(Some(Duration::from_secs(5)))
        .await
        .is_none());

    bus.broadcast(Event::quit()).unwrap();
    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn timer_targets_a_specific_client() {
    let bus = Bus::new();
    let supervisor = bus.register();
    let plugin = bus.register();
    let services = SystemServices::new();

    let service = TimerService::new(&services, supervisor.id()).unwrap();
    let handle = worker::spawn(&bus, service);
    let registry = services.timer().unwrap();

    let timer = Timer::new(42, 1, 0, Some(plugin.id()));
    registry.add(timer.clone());
    timer.start();

    expect_timer(&plugin, 42).await;
    assert!(supervisor
        .pop_wait(Some(Duration::from_secs(3)))
        .await
        .is_none());

    bus.broadcast(Event::quit()).unwrap();
    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn removed_timer_stops_firing() {
    let bus = Bus::new();
    let supervisor = bus.register();
    let services = SystemServices::new();

    let service = TimerService::new(&services, supervisor.id()).unwrap();
    let handle = worker::spawn(&bus, service);
    let registry = services.timer().unwrap();

    let timer = Timer::new(5, 1, 1, None);
    registry.add(timer.clone());
    timer.start();

    expect_timer(&supervisor, 5).await;
    registry.remove(&timer);

    assert!(supervisor
        .pop_wait(Some(Duration::from_secs(5)))
        .await
        .is_none());

    bus.broadcast(Event::quit()).unwrap();
    handle.join().await;
}
