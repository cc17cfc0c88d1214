//! Authenticated probe exchange over real localhost sockets.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;

use ddarp_core::NodeKind;
use ddarp_services::{NodeMetrics, OwlStore, PeerRegistry, TopologyStore};
use ddarpd::probe::{build_gossip, build_probe, Receiver, RxOutcome};

fn receiver_for(local_id: &str) -> Receiver {
    Receiver {
        local_id: local_id.to_string(),
        registry: Arc::new(PeerRegistry::new()),
        owl: Arc::new(OwlStore::new()),
        topology: Arc::new(TopologyStore::new(local_id, NodeKind::Regular, Instant::now())),
        metrics: Arc::new(NodeMetrics::new().unwrap()),
    }
}

async fn recv_one(socket: &UdpSocket, buf: &mut [u8]) -> usize {
    let (len, _) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(buf))
        .await
        .expect("datagram did not arrive")
        .expect("recv failed");
    len
}

#[tokio::test]
async fn probes_over_udp_build_an_edge() {
    let a_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let b_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let b_addr = b_socket.local_addr().unwrap();

    let rx_b = receiver_for("b");
    rx_b.registry.add_peer(
        "a",
        a_socket.local_addr().unwrap(),
        b"shared".to_vec(),
        NodeKind::Regular,
        Instant::now(),
    );

    let epoch = Instant::now();
    let mut buf = vec![0u8; 9000];
    for seq in 0..3u32 {
        let datagram = build_probe("a", "b", seq, epoch, b"shared").unwrap();
        a_socket.send_to(&datagram, b_addr).await.unwrap();

        let len = recv_one(&b_socket, &mut buf).await;
        assert_eq!(
            rx_b.handle_datagram(&buf[..len]),
            RxOutcome::Probe("a".to_string())
        );
    }

    // three authenticated probes make an (a → b) edge
    assert_eq!(rx_b.owl.window_len("a", "b"), 3);
    let snapshot = rx_b.topology.snapshot(Instant::now());
    let edge = snapshot.edge("a", "b").unwrap();
    assert_eq!(edge.loss_ratio, 0.0);
    // loopback latency measured from real wall clocks stays tiny
    assert!(edge.latency_ms.abs() < 1000.0);
}

#[tokio::test]
async fn tampered_probe_is_rejected_on_the_wire() {
    let a_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let b_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let b_addr = b_socket.local_addr().unwrap();

    let rx_b = receiver_for("b");
    rx_b.registry.add_peer(
        "a",
        a_socket.local_addr().unwrap(),
        b"shared".to_vec(),
        NodeKind::Regular,
        Instant::now(),
    );

    let mut datagram = build_probe("a", "b", 0, Instant::now(), b"shared").unwrap();
    let last = datagram.len() - 1;
    datagram[last] ^= 0xff;
    a_socket.send_to(&datagram, b_addr).await.unwrap();

    let mut buf = vec![0u8; 9000];
    let len = recv_one(&b_socket, &mut buf).await;
    assert_eq!(rx_b.handle_datagram(&buf[..len]), RxOutcome::AuthFailed);
    assert_eq!(rx_b.owl.window_len("a", "b"), 0);
}

#[tokio::test]
async fn gossip_round_trip_completes_the_mesh_view() {
    // b has measured (a → b); it gossips that edge to c
    let b_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let c_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let c_addr = c_socket.local_addr().unwrap();

    let rx_b = receiver_for("b");
    rx_b.registry.add_peer(
        "a",
        "127.0.0.1:1".parse().unwrap(),
        b"ab".to_vec(),
        NodeKind::Regular,
        Instant::now(),
    );
    let epoch = Instant::now();
    for seq in 0..3u32 {
        let datagram = build_probe("a", "b", seq, epoch, b"ab").unwrap();
        assert_eq!(
            rx_b.handle_datagram(&datagram),
            RxOutcome::Probe("a".to_string())
        );
    }

    let rx_c = receiver_for("c");
    rx_c.registry.add_peer(
        "b",
        b_socket.local_addr().unwrap(),
        b"bc".to_vec(),
        NodeKind::Regular,
        Instant::now(),
    );

    let packet = build_gossip("b", &rx_b.owl, Instant::now())
        .unwrap()
        .expect("b has an edge to share");
    let datagram = ddarp_core::auth::seal(&packet, b"bc");
    b_socket.send_to(&datagram, c_addr).await.unwrap();

    let mut buf = vec![0u8; 9000];
    let len = recv_one(&c_socket, &mut buf).await;
    assert_eq!(
        rx_c.handle_datagram(&buf[..len]),
        RxOutcome::Gossip("b".to_string())
    );

    // c now knows about an edge it never measured
    let snapshot = rx_c.topology.snapshot(Instant::now());
    assert!(snapshot.edge("a", "b").is_some());
}
