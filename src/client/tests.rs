//! Session state machine tests

use std::io;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;

use super::*;
use crate::config::OutputConfig;
use crate::protocol::{ConnAck, ConnectReturnCode, Packet, PubAck, Publish, QoS};

fn config(qos: QoS) -> SessionConfig {
    SessionConfig {
        qos,
        ..SessionConfig::new("rtl_433-test")
    }
}

fn drain(session: &mut Session) -> Vec<Action> {
    std::iter::from_fn(|| session.poll_action()).collect()
}

/// A session that has completed the transport connect
fn connected(qos: QoS, now: Instant) -> Session {
    let mut session = Session::new(config(qos));
    session.start();
    session.handle(ConnectionEvent::TransportConnected, now);
    session.handle(
        ConnectionEvent::Packet(Packet::ConnAck(ConnAck::default())),
        now,
    );
    drain(&mut session);
    session
}

fn published(actions: &[Action]) -> Vec<&Publish> {
    actions
        .iter()
        .filter_map(|a| match a {
            Action::Send(Packet::Publish(p)) => Some(p),
            _ => None,
        })
        .collect()
}

fn refused() -> ConnectionEvent {
    ConnectionEvent::ConnectFailed {
        kind: io::ErrorKind::ConnectionRefused,
        reason: "connection refused".to_string(),
    }
}

// ============================================================================
// Connection lifecycle
// ============================================================================

#[test]
fn test_start_requests_connect() {
    let mut session = Session::new(config(QoS::AtMostOnce));
    assert_eq!(session.state(), ConnectionState::Disconnected);

    session.start();
    assert_eq!(session.state(), ConnectionState::Connecting);
    assert_eq!(drain(&mut session), vec![Action::Connect]);

    session.start();
    assert!(drain(&mut session).is_empty());
}

#[test]
fn test_transport_connected_sends_connect() {
    let mut session = Session::new(SessionConfig {
        username: Some("user".to_string()),
        password: Some("secret".to_string()),
        ..config(QoS::AtLeastOnce)
    });
    session.start();
    drain(&mut session);

    session.handle(ConnectionEvent::TransportConnected, Instant::now());
    assert_eq!(session.state(), ConnectionState::Connected);

    let actions = drain(&mut session);
    assert_eq!(actions.len(), 1);
    match &actions[0] {
        Action::Send(Packet::Connect(connect)) => {
            assert_eq!(connect.client_id, "rtl_433-test");
            assert!(connect.clean_session);
            assert_eq!(connect.keep_alive, KEEP_ALIVE_SECS);
            assert_eq!(connect.username.as_deref(), Some("user"));
            assert_eq!(connect.password.as_deref(), Some(&b"secret"[..]));
        }
        other => panic!("expected CONNECT, got {:?}", other),
    }
}

#[test]
fn test_rejected_connack_does_not_reconnect() {
    let now = Instant::now();
    let mut session = Session::new(config(QoS::AtMostOnce));
    session.start();
    session.handle(ConnectionEvent::TransportConnected, now);
    drain(&mut session);

    session.handle(
        ConnectionEvent::Packet(Packet::ConnAck(ConnAck {
            session_present: false,
            return_code: ConnectReturnCode::NotAuthorized,
        })),
        now,
    );
    assert_eq!(session.state(), ConnectionState::Connected);
    assert!(drain(&mut session).is_empty());
}

#[test]
fn test_connect_failure_retries_immediately() {
    let now = Instant::now();
    let mut session = Session::new(config(QoS::AtMostOnce));
    session.start();
    drain(&mut session);

    for _ in 0..3 {
        session.handle(refused(), now);
        assert_eq!(session.state(), ConnectionState::Connecting);
        assert_eq!(drain(&mut session), vec![Action::Connect]);
    }
}

#[test]
fn test_close_purges_queued_sends_and_reconnects() {
    let now = Instant::now();
    let mut session = connected(QoS::AtLeastOnce, now);

    session.publish("t/a", b"1", now);
    session.publish("t/b", b"2", now);
    session.handle(ConnectionEvent::Closed, now);

    assert_eq!(session.state(), ConnectionState::Connecting);
    assert_eq!(drain(&mut session), vec![Action::Connect]);
    assert_eq!(session.inflight().len(), 2);
}

#[test]
fn test_from_output_config() {
    let output = OutputConfig::parse("mqtt://broker,user=u,pass=p,retain,qos=1", "pi").unwrap();
    let config = SessionConfig::from_output(&output, "rtl_433-0000ffff");
    assert_eq!(config.client_id, "rtl_433-0000ffff");
    assert_eq!(config.username.as_deref(), Some("u"));
    assert_eq!(config.password.as_deref(), Some("p"));
    assert_eq!(config.qos, QoS::AtLeastOnce);
    assert!(config.retain);
    assert_eq!(config.keep_alive, KEEP_ALIVE_SECS);
}

// ============================================================================
// Publishing
// ============================================================================

#[test]
fn test_publish_qos0_not_tracked() {
    let now = Instant::now();
    let mut session = connected(QoS::AtMostOnce, now);

    session.publish("sensors/temp", b"21.5", now);
    assert!(session.inflight().is_empty());

    let actions = drain(&mut session);
    let publishes = published(&actions);
    assert_eq!(publishes.len(), 1);
    assert_eq!(&*publishes[0].topic, "sensors/temp");
    assert_eq!(&publishes[0].payload[..], b"21.5");
    assert_eq!(publishes[0].qos, QoS::AtMostOnce);
    assert_eq!(publishes[0].packet_id, None);
    assert!(!publishes[0].dup);
}

#[test]
fn test_publish_qos1_tracked_and_sent() {
    let now = Instant::now();
    let mut session = Session::new(SessionConfig {
        retain: true,
        ..config(QoS::AtLeastOnce)
    });
    session.start();
    session.handle(ConnectionEvent::TransportConnected, now);
    drain(&mut session);

    let id = session.publish("sensors/temp", b"21.5", now);
    assert_eq!(id, 1);
    assert!(session.inflight().contains(id));

    let actions = drain(&mut session);
    let publishes = published(&actions);
    assert_eq!(publishes.len(), 1);
    assert_eq!(publishes[0].packet_id, Some(1));
    assert!(publishes[0].retain);
}

#[test]
fn test_publish_while_disconnected_is_tracked_not_sent() {
    let now = Instant::now();
    let mut session = Session::new(config(QoS::AtLeastOnce));
    session.start();
    drain(&mut session);

    let id = session.publish("t", b"x", now);
    assert!(session.inflight().contains(id));
    assert!(drain(&mut session).is_empty());
}

#[test]
fn test_untracked_qos1_publish_is_not_sent() {
    let now = Instant::now();
    let tracker = InflightTracker::new().with_limit(1);
    let mut session = Session::with_tracker(config(QoS::AtLeastOnce), tracker);
    session.start();
    session.handle(ConnectionEvent::TransportConnected, now);
    drain(&mut session);

    let first = session.publish("t/a", b"1", now);
    let second = session.publish("t/b", b"2", now);
    assert!(session.inflight().contains(first));
    assert!(!session.inflight().contains(second));

    let actions = drain(&mut session);
    let publishes = published(&actions);
    assert_eq!(publishes.len(), 1);
    assert_eq!(publishes[0].packet_id, Some(first));
}

#[test]
fn test_full_tracker_does_not_limit_qos0() {
    let now = Instant::now();
    let tracker = InflightTracker::new().with_limit(0);
    let mut session = Session::with_tracker(config(QoS::AtMostOnce), tracker);
    session.start();
    session.handle(ConnectionEvent::TransportConnected, now);
    drain(&mut session);

    session.publish("t", b"1", now);
    assert_eq!(published(&drain(&mut session)).len(), 1);
}

#[test]
fn test_message_id_wraps_past_zero() {
    let now = Instant::now();
    let mut session = Session::new(config(QoS::AtMostOnce));
    for _ in 0..u16::MAX - 1 {
        session.publish("t", b"", now);
    }
    assert_eq!(session.publish("t", b"", now), u16::MAX);
    assert_eq!(session.publish("t", b"", now), 1);
    assert_eq!(session.publish("t", b"", now), 2);
}

// ============================================================================
// Acknowledgements
// ============================================================================

#[test]
fn test_puback_removes_entry() {
    let now = Instant::now();
    let mut session = connected(QoS::AtLeastOnce, now);
    let first = session.publish("t/a", b"1", now);
    let second = session.publish("t/b", b"2", now);

    session.handle(
        ConnectionEvent::Packet(Packet::PubAck(PubAck::new(first))),
        now,
    );
    assert!(!session.inflight().contains(first));
    assert!(session.inflight().contains(second));
}

#[test]
fn test_unknown_puback_leaves_tracker_unchanged() {
    let now = Instant::now();
    let mut session = connected(QoS::AtLeastOnce, now);
    let id = session.publish("t", b"1", now);

    session.handle(
        ConnectionEvent::Packet(Packet::PubAck(PubAck::new(id + 100))),
        now,
    );
    assert_eq!(session.inflight().len(), 1);
    assert!(session.inflight().contains(id));
}

// ============================================================================
// Retransmission
// ============================================================================

#[test]
fn test_tick_before_deadline_sends_nothing() {
    let now = Instant::now();
    let mut session = connected(QoS::AtLeastOnce, now);
    session.publish("t", b"1", now);
    drain(&mut session);

    session.handle(ConnectionEvent::Tick, now + Duration::from_millis(500));
    assert!(drain(&mut session).is_empty());
}

#[test]
fn test_tick_after_deadline_resends_with_dup() {
    let now = Instant::now();
    let mut session = connected(QoS::AtLeastOnce, now);
    let id = session.publish("t", b"1", now);
    drain(&mut session);

    session.handle(ConnectionEvent::Tick, now + ACK_WINDOW);
    let actions = drain(&mut session);
    let publishes = published(&actions);
    assert_eq!(publishes.len(), 1);
    assert!(publishes[0].dup);
    assert_eq!(publishes[0].packet_id, Some(id));
    assert_eq!(session.inflight().get(id).map(|m| m.retries), Some(1));
}

#[test]
fn test_tick_while_disconnected_is_noop() {
    let now = Instant::now();
    let mut session = Session::new(config(QoS::AtLeastOnce));
    session.start();
    drain(&mut session);
    let id = session.publish("t", b"1", now);

    session.handle(ConnectionEvent::Tick, now + ACK_WINDOW * 3);
    assert!(drain(&mut session).is_empty());
    assert_eq!(session.inflight().get(id).map(|m| m.retries), Some(0));
}

#[test]
fn test_reconnect_resends_each_entry_once() {
    let start = Instant::now();
    let mut session = connected(QoS::AtLeastOnce, start);
    let first = session.publish("t/a", b"1", start);
    let second = session.publish("t/b", b"2", start);
    drain(&mut session);

    session.handle(ConnectionEvent::Closed, start);
    assert_eq!(drain(&mut session), vec![Action::Connect]);
    session.handle(ConnectionEvent::TransportConnected, start);
    drain(&mut session);

    session.handle(ConnectionEvent::Tick, start + ACK_WINDOW + Duration::from_millis(1));
    let actions = drain(&mut session);
    let mut ids: Vec<u16> = published(&actions)
        .iter()
        .filter_map(|p| p.packet_id)
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![first, second]);

    for id in [first, second] {
        assert_eq!(session.inflight().get(id).map(|m| m.retries), Some(1));
    }
}

// ============================================================================
// Inbound traffic and keep alive
// ============================================================================

#[test]
fn test_inbound_qos1_publish_is_acknowledged() {
    let now = Instant::now();
    let mut session = connected(QoS::AtMostOnce, now);

    session.handle(
        ConnectionEvent::Packet(Packet::Publish(Publish {
            qos: QoS::AtLeastOnce,
            topic: "cmd/in".into(),
            packet_id: Some(42),
            payload: "hello".into(),
            ..Default::default()
        })),
        now,
    );
    assert_eq!(
        drain(&mut session),
        vec![Action::Send(Packet::PubAck(PubAck::new(42)))]
    );
}

#[test]
fn test_inbound_qos0_publish_only_logged() {
    let now = Instant::now();
    let mut session = connected(QoS::AtMostOnce, now);

    session.handle(
        ConnectionEvent::Packet(Packet::Publish(Publish {
            topic: "cmd/in".into(),
            payload: "hello".into(),
            ..Default::default()
        })),
        now,
    );
    assert!(drain(&mut session).is_empty());
}

#[test]
fn test_keep_alive_only_when_connected() {
    let now = Instant::now();
    let mut session = Session::new(config(QoS::AtMostOnce));
    session.start();
    drain(&mut session);

    session.handle(ConnectionEvent::KeepAlive, now);
    assert!(drain(&mut session).is_empty());

    session.handle(ConnectionEvent::TransportConnected, now);
    drain(&mut session);
    session.handle(ConnectionEvent::KeepAlive, now);
    assert_eq!(drain(&mut session), vec![Action::Send(Packet::PingReq)]);
}

// ============================================================================
// Shutdown
// ============================================================================

#[test]
fn test_shutdown_when_connected() {
    let now = Instant::now();
    let mut session = connected(QoS::AtLeastOnce, now);
    session.publish("t", b"1", now);
    drain(&mut session);

    session.shutdown();
    assert_eq!(session.state(), ConnectionState::ShuttingDown);
    assert!(session.inflight().is_empty());
    assert_eq!(
        drain(&mut session),
        vec![Action::Send(Packet::Disconnect), Action::Close]
    );
}

#[test]
fn test_shutdown_ignores_later_events() {
    let now = Instant::now();
    let mut session = Session::new(config(QoS::AtLeastOnce));
    session.start();
    drain(&mut session);

    session.shutdown();
    assert_eq!(drain(&mut session), vec![Action::Close]);

    session.handle(ConnectionEvent::Closed, now);
    session.handle(refused(), now);
    session.handle(ConnectionEvent::TransportConnected, now);
    assert_eq!(session.state(), ConnectionState::ShuttingDown);
    assert!(drain(&mut session).is_empty());
}
