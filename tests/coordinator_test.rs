use evse_load_balancer::charger::{Charger, SimulatedCharger};
use evse_load_balancer::config::Config;
use evse_load_balancer::coordinator::{Coordinator, LoadBalancingState};
use evse_load_balancer::meter::SimulatedMeter;
use evse_load_balancer::phase::{Phase, PhaseValues};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep};

fn setup(min_delay_s: f64) -> (Coordinator, Arc<SimulatedMeter>, Arc<SimulatedCharger>) {
    let mut config = Config::default();
    config.fuse.fuse_size = 25.0;
    config.coordinator.min_charger_update_delay_s = min_delay_s;

    // 5 A over the fuse on L1, 5 A spare elsewhere
    let meter = Arc::new(SimulatedMeter::new(PhaseValues::from([
        (Phase::L1, 30.0),
        (Phase::L2, 20.0),
        (Phase::L3, 20.0),
    ])));
    let charger = Arc::new(SimulatedCharger::new("garage", 16, 16));
    charger.set_can_charge(true);

    let mut coordinator = Coordinator::new(config, meter.clone()).unwrap();
    coordinator.add_charger(charger.clone()).unwrap();
    (coordinator, meter, charger)
}

#[tokio::test]
async fn sustained_overcurrent_cuts_the_charger() {
    let (mut coordinator, _meter, charger) = setup(30.0);
    let mut events = coordinator.subscribe_events();
    assert_eq!(coordinator.state(), LoadBalancingState::MonitoringLoad);

    let first = coordinator.run_cycle(0.0).await.unwrap();
    assert_eq!(
        first.available,
        Some(PhaseValues::from([(Phase::L1, -5), (Phase::L2, 5), (Phase::L3, 5)]))
    );
    assert!(first.commands.is_empty());

    let outcome = coordinator.run_cycle(100.0).await.unwrap();
    assert!(outcome.adjusted);
    assert_eq!(
        outcome.commands["garage"],
        PhaseValues::from([(Phase::L1, 11), (Phase::L2, 16), (Phase::L3, 16)])
    );
    assert_eq!(
        charger.get_current_limit(),
        Some(PhaseValues::uniform(Phase::ALL, 11))
    );

    let event = events.try_recv().unwrap();
    let json: serde_json::Value = serde_json::from_str(&event).unwrap();
    assert_eq!(json["action"], "new_charger_limits");
    assert_eq!(json["charger_id"], "garage");
    assert_eq!(json["new_limits"]["l1"], 11);
}

#[tokio::test]
async fn writes_are_throttled() {
    let (mut coordinator, _meter, charger) = setup(60.0);

    coordinator.run_cycle(0.0).await.unwrap();
    coordinator.run_cycle(100.0).await.unwrap();
    assert_eq!(charger.write_count(), 1);

    // Still 5 A over: the next cut is due 30 s later but must wait for the throttle
    let held = coordinator.run_cycle(130.0).await.unwrap();
    assert!(held.adjusted);
    assert!(held.commands.is_empty());
    assert_eq!(
        coordinator.pending_commands()["garage"].min_value(),
        Some(6)
    );
    assert_eq!(charger.write_count(), 1);

    for t in 131..160 {
        coordinator.run_cycle(f64::from(t)).await.unwrap();
    }
    assert_eq!(charger.write_count(), 1);

    let released = coordinator.run_cycle(160.0).await.unwrap();
    assert_eq!(released.commands["garage"].min_value(), Some(6));
    assert_eq!(charger.write_count(), 2);
    assert!(coordinator.pending_commands().is_empty());
}

#[tokio::test]
async fn failed_write_is_retried() {
    let (mut coordinator, _meter, charger) = setup(30.0);
    charger.set_fail_writes(true);

    coordinator.run_cycle(0.0).await.unwrap();
    let outcome = coordinator.run_cycle(100.0).await.unwrap();
    assert!(!outcome.commands.is_empty());
    assert_eq!(charger.write_count(), 0);
    assert!(coordinator.pending_commands().contains_key("garage"));

    charger.set_fail_writes(false);
    let retry = coordinator.run_cycle(101.0).await.unwrap();
    assert_eq!(retry.commands["garage"].min_value(), Some(11));
    assert_eq!(charger.write_count(), 1);
}

#[tokio::test]
async fn unknown_meter_reading_skips_the_cycle() {
    let (mut coordinator, meter, charger) = setup(30.0);
    meter.clear_phase(Phase::L2);

    coordinator.run_cycle(0.0).await.unwrap();
    let outcome = coordinator.run_cycle(100.0).await.unwrap();
    assert!(outcome.available.is_none());
    assert!(outcome.signal.is_none());
    assert_eq!(charger.write_count(), 0);
}

#[tokio::test]
async fn unplugged_charger_is_not_balanced() {
    let (mut coordinator, _meter, charger) = setup(30.0);
    charger.set_can_charge(false);
    assert_eq!(coordinator.state(), LoadBalancingState::AwaitingCharger);

    coordinator.run_cycle(0.0).await.unwrap();
    let outcome = coordinator.run_cycle(100.0).await.unwrap();
    assert!(outcome.signal.is_none());
    assert_eq!(coordinator.balancer().adjustment_count(), 0);
}

#[tokio::test]
async fn removed_charger_drops_pending_commands() {
    let (mut coordinator, _meter, _charger) = setup(60.0);
    coordinator.run_cycle(0.0).await.unwrap();
    coordinator.run_cycle(100.0).await.unwrap();
    coordinator.run_cycle(130.0).await.unwrap();
    assert!(!coordinator.pending_commands().is_empty());

    assert!(coordinator.remove_charger("garage"));
    assert!(coordinator.pending_commands().is_empty());
    assert!(!coordinator.remove_charger("garage"));
}

#[tokio::test]
async fn run_loop_stops_on_shutdown() {
    let (mut coordinator, _meter, _charger) = setup(30.0);
    let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        sleep(Duration::from_millis(50)).await;
        let _ = shutdown_tx.send(());
    });

    coordinator.run(shutdown_rx).await.unwrap();
    assert!(coordinator.last_check().is_some());
}

fn quick_config(history_capacity: usize) -> Config {
    let mut config = Config::default();
    config.fuse.fuse_size = 25.0;
    config.balancer.hold_off_period_s = 10.0;
    config.balancer.history_capacity = history_capacity;
    config.coordinator.min_charger_update_delay_s = 0.0;
    config
}

fn amps(l1: f64, l2: f64, l3: f64) -> PhaseValues<f64> {
    PhaseValues::from([(Phase::L1, l1), (Phase::L2, l2), (Phase::L3, l3)])
}

fn limits(l1: i32, l2: i32, l3: i32) -> PhaseValues<i32> {
    PhaseValues::from([(Phase::L1, l1), (Phase::L2, l2), (Phase::L3, l3)])
}

#[tokio::test]
async fn spent_headroom_is_not_handed_out_twice() {
    let meter = Arc::new(SimulatedMeter::new(amps(30.0, 30.0, 20.0)));
    let charger = Arc::new(SimulatedCharger::new("drive", 16, 16).with_synced_phases(false));
    charger.set_can_charge(true);
    let mut coordinator = Coordinator::new(quick_config(900), meter.clone()).unwrap();
    coordinator.add_charger(charger.clone()).unwrap();

    coordinator.run_cycle(0.0).await.unwrap();
    coordinator.run_cycle(100.0).await.unwrap();
    assert_eq!(charger.get_current_limit(), Some(limits(11, 11, 16)));

    // L1 settles with 3 A spare while L2 stays 5 A over
    meter.set_currents(amps(22.0, 30.0, 20.0));
    for t in 101..=110 {
        coordinator.run_cycle(f64::from(t)).await.unwrap();
    }
    assert_eq!(charger.get_current_limit(), Some(limits(14, 11, 16)));

    // The raise pushed L1 just over the fuse; restores on L3 must not lift it again
    meter.set_current(Phase::L1, 26.0);
    for t in 111..130 {
        coordinator.run_cycle(f64::from(t)).await.unwrap();
        assert_eq!(
            charger.get_current_limit().and_then(|l| l.value(Phase::L1)),
            Some(14),
            "L1 raised at {t}"
        );
    }
    assert!(!coordinator.headroom_grants().contains(Phase::L1));

    let cut = coordinator.run_cycle(130.0).await.unwrap();
    assert_eq!(coordinator.balancer().adjusted_phases(), &[Phase::L2, Phase::L3]);
    assert_eq!(cut.commands["drive"], limits(14, 6, 16));
}

#[tokio::test]
async fn synced_charger_climbs_once_every_phase_is_released() {
    let meter = Arc::new(SimulatedMeter::new(amps(30.0, 20.0, 20.0)));
    let charger = Arc::new(SimulatedCharger::new("garage", 16, 16));
    charger.set_can_charge(true);
    let mut coordinator = Coordinator::new(quick_config(5), meter.clone()).unwrap();
    coordinator.add_charger(charger.clone()).unwrap();

    coordinator.run_cycle(0.0).await.unwrap();
    coordinator.run_cycle(100.0).await.unwrap();
    assert_eq!(charger.get_current_limit(), Some(PhaseValues::uniform(Phase::ALL, 11)));

    // L2 and L3 are released first; L1 keeps swinging
    for t in 101..=110 {
        let l1 = if t % 2 == 0 { 25.0 } else { 15.0 };
        meter.set_currents(amps(l1, 15.0, 15.0));
        coordinator.run_cycle(f64::from(t)).await.unwrap();
    }
    assert_eq!(coordinator.headroom_grants().value(Phase::L2), Some(10));
    assert_eq!(coordinator.headroom_grants().value(Phase::L3), Some(10));
    assert_eq!(charger.get_current_limit(), Some(PhaseValues::uniform(Phase::ALL, 11)));
    assert_eq!(charger.write_count(), 1);

    meter.set_current(Phase::L1, 22.0);
    for t in 111..=115 {
        coordinator.run_cycle(f64::from(t)).await.unwrap();
    }
    assert_eq!(charger.get_current_limit(), Some(PhaseValues::uniform(Phase::ALL, 14)));
    assert!(coordinator.headroom_grants().is_empty());
}

#[tokio::test]
async fn manual_override_replaces_held_command() {
    let (mut coordinator, meter, charger) = setup(60.0);

    coordinator.run_cycle(0.0).await.unwrap();
    coordinator.run_cycle(100.0).await.unwrap();
    coordinator.run_cycle(130.0).await.unwrap();
    assert!(coordinator.pending_commands().contains_key("garage"));

    // User turns the charger up in its app while the cut waits for the throttle
    charger.set_current_limits(PhaseValues::uniform(Phase::ALL, 20));
    meter.set_current(Phase::L1, 20.0);

    coordinator.run_cycle(131.0).await.unwrap();
    assert!(coordinator.pending_commands().is_empty());
    let state = coordinator.allocator().charger_state("garage").unwrap();
    assert!(state.manual_override_detected());
    assert_eq!(state.requested_current(), PhaseValues::uniform(Phase::ALL, 20));

    for t in 132..=160 {
        let outcome = coordinator.run_cycle(f64::from(t)).await.unwrap();
        assert!(outcome.commands.is_empty());
    }
    assert_eq!(charger.write_count(), 1);
    assert_eq!(charger.get_current_limit(), Some(PhaseValues::uniform(Phase::ALL, 20)));
}
