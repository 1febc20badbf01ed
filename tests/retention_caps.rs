use chrono::Utc;
use meshpanel::protocol::{InboundEvent, RouteDiscovery, Waypoint};
use meshpanel::registry::DeviceRegistry;
use meshpanel::retention::{CappedMap, RetentionConfig};
use meshpanel::types::DeviceId;

mod common;

#[test]
fn eleven_traceroute_targets_keep_the_newest_ten() {
    let mut reg = DeviceRegistry::new(RetentionConfig {
        max_traceroute_targets: 10,
        ..Default::default()
    });
    let a = DeviceId(1);
    reg.add_device(a);
    reg.set_hardware(a, common::hardware(777), Utc::now()).unwrap();

    for target in 1..=11u32 {
        reg.apply(
            a,
            InboundEvent::RouteDiscovered {
                from: target,
                route: RouteDiscovery {
                    route: vec![target],
                    ..Default::default()
                },
            },
            Utc::now(),
        )
        .unwrap();
    }

    let targets = reg.device(a).unwrap().traceroute_targets();
    assert_eq!(targets.len(), 10);
    assert!(!targets.contains(&1));
    assert!(targets.contains(&11));
}

#[test]
fn repeated_traceroutes_to_one_target_are_capped_per_target() {
    let mut reg = DeviceRegistry::new(RetentionConfig {
        max_traceroutes_per_target: 3,
        ..Default::default()
    });
    let a = DeviceId(2);
    reg.add_device(a);
    for hop in 0..5u32 {
        reg.device_mut(a).unwrap().add_traceroute(
            42,
            RouteDiscovery {
                route: vec![hop],
                ..Default::default()
            },
            Utc::now(),
        );
    }
    let device = reg.device(a).unwrap();
    let log = device.traceroutes_for(42).unwrap();
    let hops: Vec<u32> = log.iter().map(|e| e.route.route[0]).collect();
    assert_eq!(hops, vec![2, 3, 4]);
}

#[test]
fn capped_map_keeps_min_n_c_most_recent_keys() {
    for cap in 1..6usize {
        for n in 0..12u32 {
            let mut map = CappedMap::new(cap);
            for k in 0..n {
                map.insert(k, ());
            }
            assert_eq!(map.len(), (n as usize).min(cap));
            let expected: Vec<u32> = (n.saturating_sub(cap as u32)..n).collect();
            assert_eq!(map.keys().copied().collect::<Vec<_>>(), expected);
        }
    }
}

#[test]
fn re_adding_a_device_does_not_grow_or_refresh_it() {
    let mut reg = DeviceRegistry::new(RetentionConfig {
        max_devices: 2,
        ..Default::default()
    });
    reg.add_device(DeviceId(1));
    reg.add_device(DeviceId(2));
    reg.add_device(DeviceId(1));
    assert_eq!(reg.device_count(), 2);

    // 1 is still the oldest distinct key, so it goes first
    reg.add_device(DeviceId(3));
    assert_eq!(reg.device_ids(), vec![DeviceId(2), DeviceId(3)]);
}

#[test]
fn waypoint_cap_evicts_oldest_non_updated() {
    let mut reg = DeviceRegistry::new(RetentionConfig {
        max_waypoints: 3,
        ..Default::default()
    });
    let a = DeviceId(5);
    reg.add_device(a);
    let now = Utc::now();
    for id in [1, 2, 3, 1, 4] {
        reg.apply(
            a,
            InboundEvent::Waypoint {
                from: 9,
                channel: 0,
                waypoint: Waypoint {
                    id,
                    ..Default::default()
                },
                rx_time: now,
            },
            now,
        )
        .unwrap();
    }
    let ids: Vec<u32> = reg
        .device(a)
        .unwrap()
        .waypoints()
        .map(|w| w.waypoint.id)
        .collect();
    assert_eq!(ids, vec![3, 1, 4]);
}
