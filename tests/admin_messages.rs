use chrono::Utc;
use meshpanel::device::AdminSendOutcome;
use meshpanel::node_db::NodeRecord;
use meshpanel::protocol::admin::admin_message::PayloadVariant;
use meshpanel::protocol::{AdminMessage, InboundEvent, PortNum, Waypoint};
use meshpanel::registry::DeviceRegistry;
use meshpanel::types::{Destination, DeviceId};
use prost::Message;

mod common;
use common::{RecordingTransport, Sent};

fn connected(id: DeviceId) -> (DeviceRegistry, RecordingTransport) {
    let mut reg = DeviceRegistry::default();
    let transport = RecordingTransport::new();
    reg.add_device(id).attach_transport(Box::new(transport.clone()));
    reg.set_hardware(id, common::hardware(0x1000), Utc::now()).unwrap();
    (reg, transport)
}

fn decode_admin(sent: &Sent) -> (AdminMessage, Destination) {
    match sent {
        Sent::Packet {
            payload,
            port,
            destination,
        } => {
            assert_eq!(*port, PortNum::AdminApp);
            (AdminMessage::decode(payload.as_slice()).unwrap(), *destination)
        }
        other => panic!("expected admin packet, got {:?}", other),
    }
}

#[test]
fn favorite_and_ignore_send_matching_admin_messages() {
    let id = DeviceId(1);
    let (mut reg, transport) = connected(id);
    reg.node_db_mut(id).unwrap().add_node(NodeRecord::new(0x55));

    reg.update_favorite(id, 0x55, true).unwrap();
    reg.update_ignored(id, 0x55, true).unwrap();
    reg.update_favorite(id, 0x55, false).unwrap();

    let node = reg.get_node(id, 0x55).unwrap().unwrap();
    assert!(!node.is_favorite);
    assert!(node.is_ignored);

    let sent: Vec<_> = transport.sent().iter().map(decode_admin).collect();
    assert_eq!(sent.len(), 3);
    assert!(sent.iter().all(|(_, dest)| *dest == Destination::SelfNode));
    assert_eq!(
        sent[0].0.payload_variant,
        Some(PayloadVariant::SetFavoriteNode(0x55))
    );
    assert_eq!(
        sent[1].0.payload_variant,
        Some(PayloadVariant::SetIgnoredNode(0x55))
    );
    assert_eq!(
        sent[2].0.payload_variant,
        Some(PayloadVariant::RemoveFavoriteNode(0x55))
    );
}

#[test]
fn failed_send_does_not_roll_back_local_flag() {
    let id = DeviceId(2);
    let (mut reg, transport) = connected(id);
    reg.node_db_mut(id).unwrap().add_node(NodeRecord::new(7));
    transport.set_failing(true);

    reg.update_favorite(id, 7, true).unwrap();
    assert!(reg.get_node(id, 7).unwrap().unwrap().is_favorite);
    assert!(transport.sent().is_empty());
}

#[test]
fn forget_node_removes_locally_and_remotely() {
    let id = DeviceId(3);
    let (mut reg, transport) = connected(id);
    reg.node_db_mut(id).unwrap().add_node(NodeRecord::new(0x77));

    reg.forget_node(id, 0x77).unwrap();
    assert!(reg.get_node(id, 0x77).unwrap().is_none());
    let (msg, _) = decode_admin(&transport.sent()[0]);
    assert_eq!(msg.payload_variant, Some(PayloadVariant::RemoveByNodenum(0x77)));
}

#[test]
fn remote_admin_queues_until_authorized_then_flushes_in_order() {
    let id = DeviceId(4);
    let (mut reg, transport) = connected(id);
    let device = reg.device_mut(id).unwrap();
    device.set_remote_admin_target(Some(0xBEEF));
    device.set_session_passkey(vec![1, 2, 3]);

    for node in [1, 2] {
        assert_eq!(
            device.send_admin_message(AdminMessage::remove_node(node)).unwrap(),
            AdminSendOutcome::Queued
        );
    }
    assert!(transport.sent().is_empty());

    device.set_remote_admin_authorized(true);
    let sent: Vec<_> = transport.sent().iter().map(decode_admin).collect();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].0.payload_variant, Some(PayloadVariant::RemoveByNodenum(1)));
    assert_eq!(sent[1].0.payload_variant, Some(PayloadVariant::RemoveByNodenum(2)));
    assert!(sent
        .iter()
        .all(|(msg, dest)| *dest == Destination::Node(0xBEEF) && msg.session_passkey == [1, 2, 3]));

    device.set_remote_admin_target(None);
    assert_eq!(device.admin_destination(), Destination::SelfNode);
    assert_eq!(device.recently_connected_nodes(), &[0xBEEF]);
}

#[test]
fn waypoint_removal_broadcasts_only_on_request() {
    let id = DeviceId(5);
    let (mut reg, transport) = connected(id);
    let now = Utc::now();
    for wp in [10, 11] {
        reg.apply(
            id,
            InboundEvent::Waypoint {
                from: 3,
                channel: 1,
                waypoint: Waypoint {
                    id: wp,
                    name: format!("wp{}", wp),
                    ..Default::default()
                },
                rx_time: now,
            },
            now,
        )
        .unwrap();
    }

    let device = reg.device_mut(id).unwrap();
    device.remove_waypoint(10, false).unwrap();
    assert!(transport.sent().is_empty());

    device.remove_waypoint(11, true).unwrap();
    match &transport.sent()[..] {
        [Sent::Waypoint {
            waypoint,
            destination,
        }] => {
            assert_eq!(waypoint.id, 11);
            assert_eq!(*destination, Destination::Broadcast);
            assert!(waypoint.is_expired_at(now));
        }
        other => panic!("unexpected sends: {:?}", other),
    }
    assert_eq!(device.waypoints().count(), 0);
}
