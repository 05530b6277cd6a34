//! Background TCP reachability checks.
//!
//! Probes run on a small tokio runtime and never touch the registry; the
//! picker drains their results on its own thread before drawing.

use std::io;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ProbeStatus {
    #[default]
    Unknown,
    Probing,
    Up(Duration),
    Down(String),
}

impl ProbeStatus {
    pub fn label(&self) -> String {
        match self {
            ProbeStatus::Unknown => String::new(),
            ProbeStatus::Probing => "…".to_string(),
            ProbeStatus::Up(rtt) => format!("up {}ms", rtt.as_millis()),
            ProbeStatus::Down(_) => "down".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub alias: String,
    pub status: ProbeStatus,
}

pub struct Prober {
    runtime: Runtime,
    timeout: Duration,
    tx: UnboundedSender<ProbeResult>,
    rx: UnboundedReceiver<ProbeResult>,
}

impl Prober {
    pub fn new(timeout: Duration) -> io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("lazyssh-probe")
            .enable_all()
            .build()?;
        let (tx, rx) = unbounded_channel();
        Ok(Self {
            runtime,
            timeout,
            tx,
            rx,
        })
    }

    /// Starts a connect attempt to `host:port`; the result arrives via
    /// [`Prober::drain`].
    pub fn probe(&self, alias: &str, host: &str, port: u16) {
        let tx = self.tx.clone();
        let alias = alias.to_string();
        let host = host.to_string();
        let timeout = self.timeout;
        self.runtime.spawn(async move {
            let status = check(&host, port, timeout).await;
            debug!(%alias, %host, port, ?status, "probe finished");
            // The receiver is gone once the picker has exited.
            let _ = tx.send(ProbeResult { alias, status });
        });
    }

    /// Results that have arrived since the last call.
    pub fn drain(&mut self) -> Vec<ProbeResult> {
        let mut results = Vec::new();
        while let Ok(result) = self.rx.try_recv() {
            results.push(result);
        }
        results
    }
}

async fn check(host: &str, port: u16, timeout: Duration) -> ProbeStatus {
    let started = Instant::now();
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => ProbeStatus::Up(started.elapsed()),
        Ok(Err(err)) => ProbeStatus::Down(err.to_string()),
        Err(_) => ProbeStatus::Down(format!("no answer within {}s", timeout.as_secs())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn wait_for(prober: &mut Prober) -> ProbeResult {
        for _ in 0..100 {
            if let Some(result) = prober.drain().pop() {
                return result;
            }
            thread::sleep(Duration::from_millis(50));
        }
        panic!("probe never reported");
    }

    #[test]
    fn open_port_is_up() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut prober = Prober::new(Duration::from_secs(3)).unwrap();
        prober.probe("local", "127.0.0.1", port);
        let result = wait_for(&mut prober);
        assert_eq!(result.alias, "local");
        assert!(matches!(result.status, ProbeStatus::Up(_)));
    }

    #[test]
    fn closed_port_is_down() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let mut prober = Prober::new(Duration::from_secs(3)).unwrap();
        prober.probe("gone", "127.0.0.1", port);
        assert!(matches!(wait_for(&mut prober).status, ProbeStatus::Down(_)));
    }

    #[test]
    fn labels() {
        assert_eq!(ProbeStatus::Up(Duration::from_millis(12)).label(), "up 12ms");
        assert_eq!(ProbeStatus::Down("refused".into()).label(), "down");
        assert_eq!(ProbeStatus::Unknown.label(), "");
    }
}
