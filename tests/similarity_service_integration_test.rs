// Integration tests for the end-to-end request scenarios: vector/event
// round trips, cache invalidation, eviction under memory pressure, snapshot
// corruption detection, and connection backpressure.

#[cfg(test)]
mod similarity_service_integration_tests {
    use std::io::{BufRead, BufReader};
    use std::net::TcpStream;
    use std::sync::Arc;
    use std::time::Duration;

    use nvecd::config::Config;
    use nvecd::engine::Engine;
    use nvecd::net::connection::ConnectionContext;
    use nvecd::protocol::Dispatcher;
    use nvecd::Server;

    fn unique_snapshot_dir(label: &str) -> String {
        std::env::temp_dir()
            .join(format!("nvecd-e2e-{label}-{:?}", std::thread::current().id()))
            .to_string_lossy()
            .to_string()
    }

    fn dispatcher_with(mut cfg: Config, label: &str) -> (Arc<Engine>, Dispatcher, ConnectionContext) {
        cfg.snapshot.dir = unique_snapshot_dir(label);
        let engine = Arc::new(Engine::new(cfg).unwrap());
        let dispatcher = Dispatcher::new(engine.clone());
        (engine, dispatcher, ConnectionContext::new("e2e".to_string()))
    }

    fn field<'a>(haystack: &'a str, key: &str) -> &'a str {
        let start = haystack.find(key).unwrap_or_else(|| panic!("missing {key} in {haystack}")) + key.len();
        let rest = &haystack[start..];
        rest.split_whitespace().next().unwrap_or(rest)
    }

    #[test]
    fn test_vector_round_trip_ranks_nearest_neighbor_first() {
        let (_engine, d, mut ctx) = dispatcher_with(Config::default(), "vec-roundtrip");

        assert_eq!(d.dispatch("VECSET query 1 0 0", &mut ctx), "OK");
        assert_eq!(d.dispatch("VECSET near 0.9 0.1 0", &mut ctx), "OK");
        assert_eq!(d.dispatch("VECSET far 0 1 0", &mut ctx), "OK");

        let resp = d.dispatch("SIM query 2 using=vectors", &mut ctx);
        assert!(resp.starts_with("OK RESULTS 2"), "unexpected response: {resp}");

        let lines: Vec<&str> = resp.lines().collect();
        assert!(lines[1].starts_with("near"), "expected `near` ranked first, got: {resp}");
        assert!(lines[2].starts_with("far"), "expected `far` ranked second, got: {resp}");
    }

    #[test]
    fn test_duplicate_events_within_window_are_deduped() {
        let mut cfg = Config::default();
        cfg.events.dedup_window_sec = 60;
        let (engine, d, mut ctx) = dispatcher_with(cfg, "event-dedup");

        assert_eq!(d.dispatch("EVENT user1 item1 5", &mut ctx), "OK");
        assert_eq!(d.dispatch("EVENT user1 item1 5", &mut ctx), "OK");
        assert_eq!(d.dispatch("EVENT user1 item2 5", &mut ctx), "OK");

        let stats = engine.event_store.statistics();
        assert_eq!(stats.stored_events, 2, "duplicate should not have been stored again");
        assert_eq!(stats.total_events, 3, "every attempt should still be counted");
    }

    #[test]
    fn test_vector_mutation_invalidates_cached_similarity_result() {
        let mut cfg = Config::default();
        cfg.cache.min_query_cost_ms = 0.0;
        let (_engine, d, mut ctx) = dispatcher_with(cfg, "cache-invalidation");

        d.dispatch("VECSET a 1 0 0", &mut ctx);
        d.dispatch("VECSET b 0 1 0", &mut ctx);
        d.dispatch("SIM a 5 using=vectors", &mut ctx);

        let before = d.dispatch("CACHE STATS", &mut ctx);
        assert!(before.contains("entries: 1"), "expected one cached entry, got: {before}");

        d.dispatch("VECSET a 0.5 0.5 0", &mut ctx);

        // The background invalidation worker batches on a short timer; poll
        // a few cycles rather than asserting on its exact delay.
        let mut after = d.dispatch("CACHE STATS", &mut ctx);
        for _ in 0..10 {
            if after.contains("entries: 0") {
                break;
            }
            std::thread::sleep(Duration::from_millis(60));
            after = d.dispatch("CACHE STATS", &mut ctx);
        }
        assert!(after.contains("entries: 0"), "expected invalidated entry to be erased, got: {after}");
    }

    #[test]
    fn test_cache_evicts_under_a_tight_memory_budget() {
        let mut cfg = Config::default();
        cfg.cache.max_memory_bytes = 2048;
        cfg.cache.min_query_cost_ms = 0.0;
        let (_engine, d, mut ctx) = dispatcher_with(cfg, "cache-eviction");

        for i in 0..50 {
            let id = format!("v{i}");
            d.dispatch(&format!("VECSET {id} {} {} {}", i as f32, (i * 2) as f32, 0.0), &mut ctx);
        }
        for i in 0..50 {
            let id = format!("v{i}");
            d.dispatch(&format!("SIM {id} 5 using=vectors"), &mut ctx);
        }

        let stats = d.dispatch("CACHE STATS", &mut ctx);
        assert!(stats.starts_with("OK\r\ntotal_queries:"), "unexpected response: {stats}");
        let evictions = field(&stats, "evictions: ").parse::<u64>().unwrap();
        assert!(evictions > 0, "expected at least one eviction under a tight budget, got: {stats}");
    }

    #[test]
    fn test_dump_verify_detects_corruption() {
        let (_engine, d, mut ctx) = dispatcher_with(Config::default(), "snapshot-corruption");

        d.dispatch("VECSET a 1 2 3", &mut ctx);
        d.dispatch("EVENT u1 a 10", &mut ctx);
        let saved = d.dispatch("DUMP SAVE corrupt.dmp", &mut ctx);
        assert!(saved.starts_with("OK DUMP_SAVED"), "unexpected save response: {saved}");

        let path = saved.trim_start_matches("OK DUMP_SAVED ").to_string();
        let mut bytes = std::fs::read(&path).unwrap();
        let flip_at = bytes.len() - 1;
        bytes[flip_at] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let verified = d.dispatch("DUMP VERIFY corrupt.dmp", &mut ctx);
        assert!(verified.starts_with("ERROR"), "expected corruption to be rejected, got: {verified}");
    }

    #[test]
    fn test_acceptor_refuses_connections_past_max_connections() {
        let mut cfg = Config::default();
        cfg.api.tcp.port = 0;
        cfg.perf.max_connections = 1;
        cfg.perf.thread_pool_size = 1;
        cfg.snapshot.dir = unique_snapshot_dir("backpressure");

        let server = Arc::new(Server::new(cfg).unwrap());
        let addr = server.local_addr().unwrap();

        let run_server = server.clone();
        let handle = std::thread::spawn(move || {
            run_server.run().unwrap();
        });

        // Give the accept loop a moment to come up.
        std::thread::sleep(Duration::from_millis(100));

        let first = TcpStream::connect(addr).expect("first connection should be admitted");

        // The acceptor enforces max_connections before a second peer is
        // handed off to the pool; give it a moment to observe and refuse.
        std::thread::sleep(Duration::from_millis(150));
        let mut second = TcpStream::connect(addr).expect("TCP connect itself still succeeds (backlog)");
        second.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
        let mut reader = BufReader::new(second.try_clone().unwrap());
        let mut line = String::new();
        let read_result = reader.read_line(&mut line);
        // Refused connections are shut down immediately by the acceptor: the
        // peer sees EOF (Ok(0)) rather than ever getting a protocol response.
        match read_result {
            Ok(0) => {}
            Ok(_) => panic!("expected the over-limit connection to be closed, got data: {line:?}"),
            Err(e) => panic!("unexpected read error on refused connection: {e}"),
        }

        drop(first);
        server.request_shutdown();
        handle.join().unwrap();
    }
}
