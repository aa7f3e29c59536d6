//! NATS test infrastructure: a JetStream-enabled container per test.

use async_nats::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::nats::Nats;

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// A unique name for streams and subjects, so tests sharing a broker never
/// collide.
pub fn unique(prefix: &str) -> String {
    format!(
        "{}-{}-{}",
        prefix,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// A NATS container with JetStream enabled.
///
/// The container stops when the struct drops.
///
/// # Example
///
/// ```no_run
/// use test_utils::TestNats;
///
/// # async fn example() {
/// let nats = TestNats::start().await;
/// let jetstream = nats.jetstream();
/// // create streams, publish, consume...
/// # }
/// ```
pub struct TestNats {
    #[allow(dead_code)]
    container: ContainerAsync<Nats>,
    client: Client,
    url: String,
}

impl TestNats {
    /// Start a container and connect a client to it.
    pub async fn start() -> Self {
        let image = Nats::default().with_tag("latest").with_cmd(["-js"]);

        let container = image.start().await.expect("failed to start NATS container");
        let port = container
            .get_host_port_ipv4(4222)
            .await
            .expect("failed to resolve NATS port");
        let url = format!("nats://127.0.0.1:{}", port);

        let client = async_nats::connect(&url)
            .await
            .expect("failed to connect to NATS");

        tracing::info!(url = %url, "Test NATS ready");

        Self {
            container,
            client,
            url,
        }
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn jetstream(&self) -> async_nats::jetstream::Context {
        async_nats::jetstream::new(self.client.clone())
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}
