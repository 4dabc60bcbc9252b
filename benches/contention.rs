use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use ulid::Ulid;

use apptd::booking::{BookingError, Scheduler};
use apptd::engine::Engine;
use apptd::model::AppointmentRequest;
use apptd::schedule::SchedulePolicy;
use apptd::store::AppointmentStore;

const SLOTS_PER_DAY: i64 = 20;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

/// The n-th bookable slot from 2026-04-01, 09:00 EDT onwards. Stays inside
/// daylight time for the slot counts used here.
fn slot(n: usize) -> DateTime<Utc> {
    let n = n as i64;
    Utc.with_ymd_and_hms(2026, 4, 1, 13, 0, 0).unwrap()
        + ChronoDuration::days(n / SLOTS_PER_DAY)
        + ChronoDuration::minutes(30 * (n % SLOTS_PER_DAY))
}

fn request(location: &str, at: DateTime<Utc>) -> AppointmentRequest {
    AppointmentRequest {
        full_name: Some("Bench Customer".into()),
        location: Some(location.into()),
        appointment_time: Some(at.to_rfc3339()),
        car: Some("Subaru Outback".into()),
        services: Some(vec!["Oil Change".into()]),
    }
}

fn scheduler() -> (Arc<Scheduler>, Arc<Engine>) {
    let dir = std::env::temp_dir().join(format!("apptd_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).expect("create bench dir");
    let engine = Arc::new(Engine::new(dir.join("appointments.wal")).expect("open engine"));
    let scheduler = Arc::new(Scheduler::new(engine.clone(), SchedulePolicy::default()));
    (scheduler, engine)
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

async fn phase1_sequential() {
    let (s, _engine) = scheduler();
    let n = 500;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for i in 0..n {
        let t = Instant::now();
        s.book(&request("Loc-A", slot(i)), now()).await.expect("sequential booking");
        latencies.push(t.elapsed());
    }
    let elapsed = start.elapsed();
    println!(
        "  {n} bookings in {:.2}s ({:.0} ops/s)",
        elapsed.as_secs_f64(),
        n as f64 / elapsed.as_secs_f64()
    );
    print_latency("book", &mut latencies);
}

async fn phase2_concurrent_distinct() {
    let (s, engine) = scheduler();
    let locations = 10;
    let per_location = 200;

    let start = Instant::now();
    let mut handles = Vec::new();
    for l in 0..locations {
        let s = s.clone();
        handles.push(tokio::spawn(async move {
            let location = format!("Loc-{l}");
            let mut latencies = Vec::with_capacity(per_location);
            for i in 0..per_location {
                let t = Instant::now();
                s.book(&request(&location, slot(i)), now()).await.expect("distinct booking");
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }
    let mut all = Vec::new();
    for h in handles {
        all.extend(h.await.expect("task panicked"));
    }
    let elapsed = start.elapsed();
    let total = locations * per_location;
    println!(
        "  {total} bookings over {locations} locations in {:.2}s ({:.0} ops/s), wal appends={}",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64(),
        engine.wal_appends_since_compact().await
    );
    print_latency("book", &mut all);
}

async fn phase3_contended_slot() {
    let (s, _engine) = scheduler();
    let rounds = 50;
    let contenders = 32;
    let winners = Arc::new(AtomicUsize::new(0));
    let conflicts = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    for round in 0..rounds {
        let mut handles = Vec::new();
        for _ in 0..contenders {
            let s = s.clone();
            let winners = winners.clone();
            let conflicts = conflicts.clone();
            handles.push(tokio::spawn(async move {
                match s.book(&request("Loc-A", slot(round)), now()).await {
                    Ok(_) => winners.fetch_add(1, Ordering::Relaxed),
                    Err(BookingError::Conflict { .. }) => conflicts.fetch_add(1, Ordering::Relaxed),
                    Err(e) => panic!("unexpected booking error: {e}"),
                };
            }));
        }
        for h in handles {
            h.await.expect("task panicked");
        }
    }
    let elapsed = start.elapsed();
    let won = winners.load(Ordering::Relaxed);
    println!(
        "  {rounds} slots x {contenders} contenders in {:.2}s: {won} booked, {} conflicts",
        elapsed.as_secs_f64(),
        conflicts.load(Ordering::Relaxed)
    );
    assert_eq!(won, rounds, "each slot must be booked exactly once");
}

async fn phase4_read_under_load() {
    let (s, engine) = scheduler();
    let stop = Arc::new(AtomicBool::new(false));

    let mut writers = Vec::new();
    for w in 0..4 {
        let s = s.clone();
        let stop = stop.clone();
        writers.push(tokio::spawn(async move {
            let location = format!("Writer-{w}");
            let mut i = 0;
            while !stop.load(Ordering::Relaxed) && i < 2000 {
                let _ = s.book(&request(&location, slot(i)), now()).await;
                i += 1;
            }
        }));
    }

    let mut readers = Vec::new();
    for r in 0..4 {
        let s = s.clone();
        readers.push(tokio::spawn(async move {
            let location = format!("Writer-{r}");
            let mut latencies = Vec::with_capacity(500);
            for i in 0..500 {
                let t = Instant::now();
                s.has_conflict(&location, slot(i)).await.expect("conflict lookup");
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in readers {
        all.extend(h.await.expect("task panicked"));
    }
    stop.store(true, Ordering::Relaxed);
    for h in writers {
        let _ = h.await;
    }
    println!("  {} appointments written", engine.appointment_count());
    print_latency("conflict lookup", &mut all);
}

async fn phase5_compaction() {
    let (s, engine) = scheduler();
    for i in 0..1000 {
        s.book(&request("Loc-A", slot(i)), now()).await.expect("booking");
    }
    let t = Instant::now();
    engine.compact_wal().await.expect("compaction");
    println!("  compacted 1000 appointments in {:.2}ms", t.elapsed().as_secs_f64() * 1000.0);
}

#[tokio::main]
async fn main() {
    println!("=== apptd contention benchmark ===\n");

    println!("[phase 1] sequential booking throughput");
    phase1_sequential().await;

    println!("\n[phase 2] concurrent bookings, distinct slots");
    phase2_concurrent_distinct().await;

    println!("\n[phase 3] many clients racing for one slot");
    phase3_contended_slot().await;

    println!("\n[phase 4] conflict lookups under write load");
    phase4_read_under_load().await;

    println!("\n[phase 5] WAL compaction");
    phase5_compaction().await;

    println!("\n=== benchmark complete ===");
}
