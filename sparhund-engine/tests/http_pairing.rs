mod common;

use std::sync::Arc;

use common::{config, of_type, tcp, ACK, FIN, SYN, SYN_ACK};
use sparhund_engine::{AuditRecord, Engine, MemorySink, MemorySource};

#[tokio::test]
async fn pipelined_requests_pair_oldest_first_through_engine() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(MemorySink::new());
    let engine = Arc::new(
        Engine::builder(config(dir.path()))
            .sink(sink.clone())
            .build()
            .unwrap(),
    );

    let packets = vec![
        tcp(true, SYN, b"", 0),
        tcp(false, SYN_ACK, b"", 0),
        tcp(true, ACK, b"GET /one HTTP/1.1\r\nHost: shop.lan\r\n\r\n", 1),
        tcp(true, ACK, b"GET /two HTTP/1.1\r\nHost: shop.lan\r\n\r\nGET /three HTTP/1.1\r\nHost: shop.lan\r\n\r\n", 1),
        tcp(false, ACK, b"HTTP/1.1 200 OK\r\nServer: tiny\r\nContent-Length: 3\r\n\r\none", 2),
        tcp(false, ACK, b"HTTP/1.1 404 Not Found\r\nServer: tiny\r\nContent-Length: 0\r\n\r\n", 2),
        tcp(true, FIN, b"", 3),
        tcp(false, FIN, b"", 3),
    ];
    let report = engine
        .run(Box::new(MemorySource::new(packets)))
        .await
        .unwrap();

    let records = sink.records();
    let http: Vec<_> = of_type(&records, "HTTP")
        .into_iter()
        .map(|r| match r {
            AuditRecord::Http(h) => h,
            _ => unreachable!(),
        })
        .collect();
    let pairs: Vec<_> = http.iter().map(|h| (h.url.as_str(), h.status_code)).collect();
    assert_eq!(pairs, vec![("/one", 200), ("/two", 404)]);
    assert_eq!(http[0].host, "shop.lan");
    assert_eq!(http[0].src_ip, "10.0.0.5");
    assert_eq!(http[0].dst_port, 80);
    assert_eq!(http[0].res_content_length, 3);

    let decoder = report.decoders.iter().find(|d| d.name == "http").unwrap();
    assert!(decoder.counters.contains(&("matched", 2)));
    assert!(decoder.counters.contains(&("unanswered requests", 1)));

    let services = of_type(&records, "Service");
    match services.as_slice() {
        [AuditRecord::Service(s)] => {
            assert_eq!(s.ip, "10.0.0.1");
            assert_eq!(s.port, 80);
            assert_eq!(s.protocol, "TCP");
        }
        other => panic!("expected one service record, got {:?}", other),
    }
    assert_eq!(report.assembler.connections, 1);
    assert_eq!(report.assembler.closed, 1);
    assert!(dir
        .path()
        .join("tcp/http/10.0.0.5-41000--10.0.0.1-80.bin")
        .exists());
}
