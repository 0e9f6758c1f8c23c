//! End-to-end pairing benchmark for Tandem.
//!
//! Connects clients to a running server, has each one join, and measures the
//! time from `join` to `matched` over real WebSocket connections.
//!
//! Usage: `e2e_pairing [clients] [rounds] [url]`

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Barrier, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message};

const DEFAULT_URL: &str = "ws://127.0.0.1:3001/ws";
const MATCH_TIMEOUT: Duration = Duration::from_secs(10);

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(64);
    let rounds: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(5);
    let url = args.get(3).cloned().unwrap_or_else(|| DEFAULT_URL.to_string());

    // Pairing needs an even number of clients.
    let num_clients = num_clients.max(2) & !1;

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║         Tandem End-to-End Pairing Benchmark                  ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Make sure the server is running: cargo run --release        ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("📊 {} clients, {} rounds against {}", num_clients, rounds, url);
    println!();

    let latencies = Arc::new(Mutex::new(Vec::with_capacity(num_clients * rounds)));
    let start = Instant::now();

    for round in 0..rounds {
        let barrier = Arc::new(Barrier::new(num_clients));
        let mut handles = Vec::with_capacity(num_clients);

        for client_id in 0..num_clients {
            let barrier = Arc::clone(&barrier);
            let latencies = Arc::clone(&latencies);
            let url = url.clone();

            handles.push(tokio::spawn(async move {
                match run_client(&url, client_id, barrier).await {
                    Ok(latency) => latencies.lock().await.push(latency),
                    Err(e) => eprintln!("Client {} error: {}", client_id, e),
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
        println!("✓ Round {} complete", round + 1);
    }

    let elapsed = start.elapsed();
    let mut latencies = latencies.lock().await.clone();
    latencies.sort();

    if latencies.is_empty() {
        println!("No client was matched.");
        return;
    }

    let percentile = |p: f64| {
        let index = ((latencies.len() - 1) as f64 * p).round() as usize;
        latencies[index].as_secs_f64() * 1000.0
    };
    let pairs = latencies.len() / 2;

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                         RESULTS                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!(
        "║  Matched clients:      {:>10}                           ║",
        latencies.len()
    );
    println!(
        "║  Duration:             {:>10.2}s                          ║",
        elapsed.as_secs_f64()
    );
    println!(
        "║  Pairs/s:              {:>10.0}                           ║",
        pairs as f64 / elapsed.as_secs_f64()
    );
    println!(
        "║  Join→matched p50:     {:>10.2}ms                         ║",
        percentile(0.50)
    );
    println!(
        "║  Join→matched p99:     {:>10.2}ms                         ║",
        percentile(0.99)
    );
    println!("╚══════════════════════════════════════════════════════════════╝");
}

async fn run_client(url: &str, client_id: usize, barrier: Arc<Barrier>) -> Result<Duration, BoxError> {
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    // Wait for the connected greeting
    expect_event(&mut receiver, "connected").await?;

    // Start every client of the round together
    barrier.wait().await;

    let join = json!({
        "event": "join",
        "data": { "name": format!("bench-{}", client_id), "age": 30, "gender": "other" }
    });
    let start = Instant::now();
    sender.send(Message::Text(join.to_string())).await?;

    tokio::time::timeout(MATCH_TIMEOUT, expect_event(&mut receiver, "matched")).await??;
    let latency = start.elapsed();

    sender.send(Message::Close(None)).await?;
    Ok(latency)
}

async fn expect_event<S>(receiver: &mut S, name: &str) -> Result<Value, BoxError>
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(message) = receiver.next().await {
        if let Message::Text(text) = message? {
            let event: Value = serde_json::from_str(&text)?;
            if event["event"] == name {
                return Ok(event);
            }
        }
    }
    Err(format!("connection closed before {}", name).into())
}
