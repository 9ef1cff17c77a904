//! Full pipeline: an executor-backed cache provider stages candle blocks
//! which stream through the node graph's trading operators.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use phasor::executor::{ExecutorService, RunResult};
use phasor::graph::NodeGraphSchema;
use phasor::store::{CacheProvider, SequentialCacheStore};

/// Provider that "fetches" missing blocks asynchronously through the
/// executor, the way a network-backed data source would.
struct FetchingProvider {
    fetched: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    executor: Arc<ExecutorService>,
}

impl CacheProvider for FetchingProvider {
    fn persist(&self, path: &str, bytes: &[u8]) -> bool {
        self.fetched
            .lock()
            .map(|mut fetched| {
                fetched.insert(path.to_string(), bytes.to_vec());
                true
            })
            .unwrap_or(false)
    }

    fn provide(&self, path: &str) -> Option<Vec<u8>> {
        if let Some(bytes) = self.fetched.lock().ok().and_then(|f| f.get(path).cloned()) {
            return Some(bytes);
        }
        // Miss: schedule a fetch and report "not yet".
        let fetched = Arc::clone(&self.fetched);
        let path = path.to_string();
        let name = format!("fetch {path}");
        self.executor.queue_fn(name, move |state| {
            if state.is_shutting_down() {
                return RunResult::Cancelled;
            }
            // Eight candles of synthetic history: unixtime, open, close,
            // high, low, volume, quantity, buy volume, buy quantity.
            let mut candles: Vec<f32> = Vec::new();
            for i in 0..8 {
                let base = 100.0 + i as f32;
                let unixtime = 900.0 * (i + 1) as f32;
                candles.extend([
                    unixtime,
                    base,
                    base + 1.0,
                    base + 2.0,
                    base - 1.0,
                    10.0,
                    4.0,
                    7.0,
                    3.0,
                ]);
            }
            let bytes = match bincode::serialize(&candles) {
                Ok(bytes) => bytes,
                Err(_) => return RunResult::Failure,
            };
            match fetched.lock() {
                Ok(mut fetched) => {
                    fetched.insert(path.clone(), bytes);
                    RunResult::Success
                }
                Err(_) => RunResult::Failure,
            }
        });
        None
    }
}

#[test]
fn test_candles_flow_from_executor_through_cache_into_graph() {
    let executor = ExecutorService::new("fetcher", 2, 100);
    executor.start_jobs();
    let executor = Arc::new(executor);
    let provider: Arc<dyn CacheProvider> = Arc::new(FetchingProvider {
        fetched: Arc::new(Mutex::new(HashMap::new())),
        executor: Arc::clone(&executor),
    });
    let store: SequentialCacheStore<Vec<f32>> = SequentialCacheStore::new(provider);

    // First access schedules the fetch and comes back empty.
    let block = store.get("BTCUSD", 0, 100, false);
    assert!(!block.has_data());

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !block.provide() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(block.has_data(), "fetch never landed");
    let candles = block.get().clone();
    assert_eq!(candles.len(), 8 * 9);

    // Stream the fetched candles through the graph's candle reader into an
    // OBV indicator.
    let mut schema = NodeGraphSchema::with_all_node_types("Pipeline", "");
    let data_in = schema.new_node(200, -1);
    let obv = schema.new_node(260, -1);
    let trade = schema.new_node(202, -1);
    schema.set_input_array(data_in, 0, &candles).unwrap();
    schema.set_input_text(data_in, 1, "BTC").unwrap();
    schema.set_input_link(obv, 0, data_in, 5).unwrap(); // close
    schema.set_input_link(obv, 1, data_in, 8).unwrap(); // volume
    schema.set_input_link(trade, 0, obv, 0).unwrap();

    schema.process_subgraph(8, 8);

    let closes = schema.node(data_in).unwrap().output(5).unwrap().written().to_vec();
    assert_eq!(closes.len(), 8);
    assert!((closes[0] - 101.0).abs() < 1e-4);
    // Continuous timestamps and derived sell volume survive the trip.
    let times = schema.node(data_in).unwrap().output(3).unwrap().written().to_vec();
    assert!(times.iter().all(|t| *t > 0.0), "gap detector misfired: {times:?}");
    let sell = schema.node(data_in).unwrap().output(11).unwrap().written().to_vec();
    assert!(sell.iter().all(|v| (*v - 3.0).abs() < 1e-4));
    // Rising closes on constant volume: OBV climbs by 10 per candle.
    let signal = schema.node(trade).unwrap().output(0).unwrap().written().to_vec();
    assert_eq!(signal.len(), 8);
    assert!((signal[7] - 80.0).abs() < 1e-3, "got {}", signal[7]);
}
