use std::collections::BTreeMap;
use std::io;
use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

use coco_config::QueuePolicy;
use coco_protocol::{Packet, TypesDb, Value, encode};
use coco_server::accounting::Accounting;
use coco_server::queue::queue;
use coco_server::services::filter::{Blacklist, FilterService, Verdict};
use coco_server::services::listener::Listener;
use coco_server::services::router::Router;
use coco_server::tier::Tiers;
use coco_server::upstream::UdpDialer;
use coco_telemetry::{Registry, Subsystem};
use similar_asserts::assert_eq;

const HOSTS: [&str; 10] = [
    "web-01", "web-02", "web-03", "db-01", "db-02", "cache-01", "cache-02", "lb-01", "mq-01",
    "internal",
];

struct Backends {
    sockets: BTreeMap<String, UdpSocket>,
}

impl Backends {
    fn bind(count: usize) -> Self {
        let sockets = (0..count)
            .map(|_| {
                let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
                socket
                    .set_read_timeout(Some(Duration::from_secs(5)))
                    .unwrap();
                (socket.local_addr().unwrap().to_string(), socket)
            })
            .collect();

        Self { sockets }
    }

    fn addrs(&self) -> Vec<String> {
        self.sockets.keys().cloned().collect()
    }

    fn recv(&self, addr: &str) -> Vec<u8> {
        let mut buf = [0; 1452];
        let len = self.sockets[addr].recv(&mut buf).unwrap();
        buf[..len].to_vec()
    }

    fn assert_drained(&self) {
        for (addr, socket) in &self.sockets {
            socket.set_nonblocking(true).unwrap();
            let mut buf = [0; 1452];
            let error = socket.recv(&mut buf).unwrap_err();
            assert_eq!(error.kind(), io::ErrorKind::WouldBlock, "stray datagram at {addr}");
        }
    }
}

fn packet(host: &str, i: usize) -> Packet {
    Packet {
        host: host.to_owned(),
        time: Some(1_700_000_000 + i as u64),
        interval: Some(10),
        plugin: "cpu".to_owned(),
        plugin_instance: (i % 4).to_string(),
        type_name: "cpu".to_owned(),
        type_instance: format!("sample-{i}"),
        values: vec![Value::Derive(i as i64)],
        ..Packet::default()
    }
}

#[test]
fn test_filter_and_route() {
    let registry = Arc::new(Registry::new());
    let backends = Backends::bind(3);
    let addrs = backends.addrs();
    let tier1 = addrs[..2].to_vec();
    let tier2 = addrs[2..].to_vec();
    let config = [("tier1", tier1.as_slice()), ("tier2", tier2.as_slice())];

    let tiers = Arc::new(Tiers::build(config, &UdpDialer::default(), &registry).unwrap());
    let accounting = Accounting::new(&tiers);
    let filter = FilterService::new(
        Blacklist::new(Some("^internal/")).unwrap(),
        accounting.filtered().clone(),
        Arc::clone(&registry),
    );
    let mut router = Router::new(Arc::clone(&tiers), Arc::clone(&registry));

    let mut accepted = BTreeMap::<&str, usize>::new();

    for i in 0..1000 {
        let host = HOSTS[i % HOSTS.len()];
        let packet = packet(host, i);

        if filter.handle(&packet) == Verdict::Reject {
            assert_eq!(host, "internal");
            continue;
        }
        *accepted.entry(host).or_default() += 1;

        assert_eq!(router.route(&packet).unwrap(), 2);

        let expected = encode(&packet).unwrap();
        for tier in tiers.iter() {
            let target = tier.lookup(host).unwrap();
            assert_eq!(backends.recv(target.addr()), expected.to_vec());
        }
    }

    backends.assert_drained();

    assert_eq!(accepted.len(), 9);
    for tier in tiers.iter() {
        for (host, count) in &accepted {
            let seen: usize = tier.targets().map(|t| t.bucket().host_size(host)).sum();
            assert_eq!(seen, *count, "host {host} in {}", tier.name());
        }
    }

    assert_eq!(accounting.filtered().host_size("internal"), 100);

    let snapshot = registry.snapshot();
    assert_eq!(snapshot.value(Subsystem::Filter, "accepted"), Some(900));
    assert_eq!(snapshot.value(Subsystem::Filter, "rejected"), Some(100));
    assert_eq!(snapshot.value(Subsystem::Send, "total"), Some(1800));
    assert_eq!(snapshot.value(Subsystem::Send, &addrs[2]), Some(900));
    assert_eq!(snapshot.value(Subsystem::HashHosts, &addrs[2]), Some(9));
    assert_eq!(snapshot.value(Subsystem::HashMetrics, &addrs[2]), Some(900));
}

#[test]
fn test_pipeline_threads() {
    let registry = Arc::new(Registry::new());
    let backends = Backends::bind(1);
    let addrs = backends.addrs();

    let tiers = Tiers::build([("tier1", addrs.as_slice())], &UdpDialer::default(), &registry);
    let tiers = Arc::new(tiers.unwrap());
    let accounting = Accounting::new(&tiers);

    let types: TypesDb = "cpu value:DERIVE:0:U".parse().unwrap();
    let listener = Listener::bind(
        "127.0.0.1:0".parse().unwrap(),
        Arc::new(types),
        Arc::clone(&registry),
        1452,
    )
    .unwrap();
    let listen_addr = listener.local_addr().unwrap();

    let (raw_tx, raw_rx) = queue("raw", 64, QueuePolicy::Block, &registry);
    let (filtered_tx, filtered_rx) = queue("filtered", 64, QueuePolicy::Block, &registry);

    let filter = FilterService::new(
        Blacklist::new(Some("^internal/")).unwrap(),
        accounting.filtered().clone(),
        Arc::clone(&registry),
    );
    let router = Router::new(Arc::clone(&tiers), Arc::clone(&registry));

    std::thread::spawn(move || listener.run(raw_tx));
    std::thread::spawn(move || filter.run(raw_rx, filtered_tx));
    std::thread::spawn(move || router.run(filtered_rx));

    let agent = UdpSocket::bind("127.0.0.1:0").unwrap();
    for (i, host) in ["web-01", "internal", "web-02"].into_iter().enumerate() {
        agent.send_to(&encode(&packet(host, i)).unwrap(), listen_addr).unwrap();
    }

    assert_eq!(backends.recv(&addrs[0]), encode(&packet("web-01", 0)).unwrap().to_vec());
    assert_eq!(backends.recv(&addrs[0]), encode(&packet("web-02", 2)).unwrap().to_vec());

    assert_eq!(registry.get(Subsystem::Listen, "decoded"), Some(3));
    assert_eq!(registry.get(Subsystem::Filter, "rejected"), Some(1));
}
