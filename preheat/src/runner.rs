//! # Warmup Runner
//!
//! Drives a [`ProtocolClient`] with a fixed pool of workers until a deadline.
//!
//! Each worker walks the descriptor list round-robin, starting at its own offset so that
//! workers spread over different requests. Descriptors are parsed again on every send, which
//! resolves their placeholders to fresh values. Workers keep their own [`Stats`], merged once
//! they all finished.
use preheat_core::{InvalidDescriptor, Protocol, Response, client::ProtocolClient};
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct Settings {
    /// Number of workers.
    pub concurrency: usize,
    pub max_duration: Duration,
    /// Pause of a worker between two sends.
    pub delay: Duration,
}

/// Aggregated outcome of the calls sent to one target.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub sent: u64,
    pub failed: u64,
    pub total_duration: Duration,
}

impl Stats {
    fn record(&mut self, response: &Response) {
        self.sent += 1;
        self.total_duration += response.duration;
        if !response.is_success() {
            self.failed += 1;
        }
    }

    fn merge(&mut self, other: Stats) {
        self.sent += other.sent;
        self.failed += other.failed;
        self.total_duration += other.total_duration;
    }

    pub fn mean_duration(&self) -> Duration {
        match u32::try_from(self.sent) {
            Ok(0) => Duration::ZERO,
            Ok(sent) => self.total_duration / sent,
            Err(_) => self.total_duration.div_f64(self.sent as f64),
        }
    }
}

/// Runs the warmup against `client`, then closes it.
///
/// `parse` turns a descriptor into a call; it runs before every send.
pub async fn warmup<C, F>(
    client: C,
    descriptors: Vec<String>,
    parse: F,
    settings: Settings,
) -> Stats
where
    C: ProtocolClient + 'static,
    F: Fn(&str) -> Result<C::Call, InvalidDescriptor> + Send + Sync + 'static,
{
    let protocol = client.protocol();
    let client = Arc::new(client);
    let descriptors: Arc<[String]> = descriptors.into();
    let parse = Arc::new(parse);
    let deadline = Instant::now() + settings.max_duration;

    tracing::info!(
        %protocol,
        workers = settings.concurrency,
        requests = descriptors.len(),
        "Starting warmup"
    );

    let workers: Vec<_> = (0..settings.concurrency)
        .map(|offset| {
            let client = Arc::clone(&client);
            let descriptors = Arc::clone(&descriptors);
            let parse = Arc::clone(&parse);
            tokio::spawn(async move {
                run_worker(&*client, &descriptors, &*parse, offset, deadline, settings.delay).await
            })
        })
        .collect();

    let mut stats = Stats::default();
    for worker in workers {
        match worker.await {
            Ok(worker_stats) => stats.merge(worker_stats),
            Err(err) => tracing::error!(%protocol, error = %err, "Warmup worker crashed"),
        }
    }

    log_summary(protocol, &stats);

    match Arc::into_inner(client) {
        Some(mut client) => {
            client.close();
        }
        None => tracing::warn!(%protocol, "Client still in use, not closing it"),
    }

    stats
}

async fn run_worker<C, F>(
    client: &C,
    descriptors: &[String],
    parse: &F,
    offset: usize,
    deadline: Instant,
    delay: Duration,
) -> Stats
where
    C: ProtocolClient,
    F: Fn(&str) -> Result<C::Call, InvalidDescriptor>,
{
    let mut stats = Stats::default();
    if descriptors.is_empty() {
        return stats;
    }

    let mut next = offset;
    while Instant::now() < deadline {
        let descriptor = &descriptors[next % descriptors.len()];
        next += 1;

        match parse(descriptor) {
            Ok(call) => {
                let response = client.send_request(call).await;
                stats.record(&response);
            }
            Err(err) => tracing::warn!(error = %err, "Skipping request"),
        }

        tokio::time::sleep_until(deadline.min(Instant::now() + delay)).await;
    }

    stats
}

fn log_summary(protocol: Protocol, stats: &Stats) {
    tracing::info!(
        %protocol,
        sent = stats.sent,
        failed = stats.failed,
        mean_duration_ms = stats.mean_duration().as_secs_f64() * 1000.0,
        "Warmup finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Records every call; calls named `fail` fail.
    #[derive(Default)]
    struct RecordingClient {
        calls: Mutex<Vec<String>>,
        closed: Arc<AtomicBool>,
    }

    impl ProtocolClient for RecordingClient {
        type Call = String;

        fn protocol(&self) -> Protocol {
            Protocol::Http
        }

        async fn send_request(&self, call: String) -> Response {
            let failed = call == "fail";
            self.calls.lock().unwrap().push(call);

            if failed {
                Response::not_sent(preheat_core::CallError::Closed, Protocol::Http)
            } else {
                Response::success(Duration::from_millis(4), Protocol::Http)
            }
        }

        fn close(&mut self) -> bool {
            self.closed.store(true, Ordering::SeqCst);
            true
        }
    }

    fn settings(concurrency: usize, max_duration: Duration, delay: Duration) -> Settings {
        Settings {
            concurrency,
            max_duration,
            delay,
        }
    }

    fn descriptors(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn workers_go_round_robin_from_their_own_offset() {
        let client = RecordingClient::default();
        let closed = client.closed.clone();
        let calls = Arc::new(Mutex::new(HashMap::<String, usize>::new()));
        let seen = calls.clone();

        let stats = warmup(
            client,
            descriptors(&["a", "b", "c"]),
            move |d: &str| {
                *seen.lock().unwrap().entry(d.to_string()).or_default() += 1;
                Ok(d.to_string())
            },
            settings(2, Duration::from_secs(1), Duration::from_millis(100)),
        )
        .await;

        // Sends at 0ms, 100ms, ..., 900ms for each of the two workers.
        assert_eq!(stats.sent, 20);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.mean_duration(), Duration::from_millis(4));

        let calls = calls.lock().unwrap();
        assert_eq!(calls["a"], 7);
        assert_eq!(calls["b"], 7);
        assert_eq!(calls["c"], 6);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_counted() {
        let stats = warmup(
            RecordingClient::default(),
            descriptors(&["ok", "fail"]),
            |d: &str| Ok(d.to_string()),
            settings(1, Duration::from_millis(400), Duration::from_millis(100)),
        )
        .await;

        assert_eq!(stats.sent, 4);
        assert_eq!(stats.failed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn descriptors_are_parsed_before_every_send() {
        let parses = Arc::new(AtomicUsize::new(0));
        let counter = parses.clone();

        let stats = warmup(
            RecordingClient::default(),
            descriptors(&["GET:/"]),
            move |d: &str| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(d.to_string())
            },
            settings(3, Duration::from_millis(250), Duration::from_millis(50)),
        )
        .await;

        assert_eq!(stats.sent, 15);
        assert_eq!(parses.load(Ordering::SeqCst), 15);
    }

    #[tokio::test(start_paused = true)]
    async fn unparsable_descriptors_are_skipped() {
        let stats = warmup(
            RecordingClient::default(),
            descriptors(&["good", "bad"]),
            |d: &str| {
                if d == "bad" {
                    Err(InvalidDescriptor::MissingPath(d.to_string()))
                } else {
                    Ok(d.to_string())
                }
            },
            settings(1, Duration::from_millis(400), Duration::from_millis(100)),
        )
        .await;

        assert_eq!(stats.sent, 2);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_to_send() {
        let client = RecordingClient::default();
        let closed = client.closed.clone();

        let stats = warmup(
            client,
            Vec::new(),
            |d: &str| Ok(d.to_string()),
            settings(2, Duration::from_secs(1), Duration::ZERO),
        )
        .await;

        assert_eq!(stats, Stats::default());
        assert_eq!(stats.mean_duration(), Duration::ZERO);
        assert!(closed.load(Ordering::SeqCst));
    }
}
