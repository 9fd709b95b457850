//! Conduit loopback demo
//!
//! Runs one proxy runtime whose transport delivers every message back to
//! the same process. A local radio provider answers the proxy's calls, and
//! the loopback stands in for the remote publication subsystem: it accepts
//! subscription requests and publishes the current station.
//!
//! # Usage
//!
//! ```bash
//! conduit-loopback --publications 5 --interval-ms 200
//! RUST_LOG=conduit_proxy=debug conduit-loopback
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use conduit_core::messages::{
    Message, MessageType, Request, SubscriptionPublication, SubscriptionReply, SubscriptionRequest,
};
use conduit_core::{ClockSource, DiscoveryEntry, MessagingQos, SubscriptionQos, Version};
use conduit_proxy::{
    AttributeSubscriptionParams, Dispatcher, Provider, ProviderAttribute, ProviderError,
    ProxyRuntime, RuntimeConfig, SendSettings, SubscriptionListener, Transport, TransportError,
    UnsubscribeParams,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const PROVIDER_ID: &str = "radio-provider";
const PROXY_ID: &str = "radio-proxy";

/// Conduit loopback demo - a proxy runtime calling its own provider
#[derive(Parser, Debug)]
#[command(name = "conduit-loopback")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Slack added to the wire expiry of originated messages (ms)
    #[arg(long, env = "CONDUIT_TTL_UPLIFT_MS", default_value = "0")]
    ttl_uplift_ms: u64,

    /// Ttl of each request (ms)
    #[arg(long, env = "CONDUIT_REQUEST_TTL_MS", default_value = "5000")]
    request_ttl_ms: u64,

    /// Publications emitted for the attribute subscription
    #[arg(long, default_value = "3")]
    publications: usize,

    /// Delay between publications (ms)
    #[arg(long, default_value = "100")]
    interval_ms: u64,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Hands every transmitted message to the pump.
struct LoopbackTransport {
    outbound: mpsc::UnboundedSender<Message>,
}

impl Transport for LoopbackTransport {
    fn transmit(&self, message: Message) -> Result<(), TransportError> {
        self.outbound
            .send(message)
            .map_err(|_| TransportError::Closed)
    }
}

/// Plays the remote publication subsystem for subscription requests.
struct Publisher {
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn ClockSource>,
    station: Arc<Mutex<Value>>,
    publications: usize,
    interval: Duration,
}

impl Publisher {
    fn accept(&self, message: &Message) -> anyhow::Result<()> {
        let request: SubscriptionRequest = message.payload()?;
        self.dispatcher
            .send_subscription_reply(message, &SubscriptionReply::accepted(&request.subscription_id))?;

        let dispatcher = Arc::clone(&self.dispatcher);
        let clock = Arc::clone(&self.clock);
        let station = Arc::clone(&self.station);
        let (publications, interval) = (self.publications, self.interval);
        let (from, to) = (message.to.clone(), message.from.clone());
        tokio::spawn(async move {
            for _ in 0..publications {
                tokio::time::sleep(interval).await;
                let publication =
                    SubscriptionPublication::new(&request.subscription_id, vec![station.lock().clone()]);
                let expiry_date_ms = clock.now().saturating_add(request.qos.publication_ttl_ms);
                if let Err(error) = dispatcher.send_publication(&from, &to, expiry_date_ms, &publication) {
                    warn!(error = %error, "publication failed");
                    return;
                }
            }
        });
        Ok(())
    }
}

/// Routes looped-back messages until the channel closes.
async fn pump(
    runtime: Arc<ProxyRuntime>,
    publisher: Publisher,
    mut inbound: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = inbound.recv().await {
        match message.message_type {
            MessageType::SubscriptionRequest => {
                if let Err(error) = publisher.accept(&message) {
                    warn!(error = %error, "could not accept subscription");
                }
            }
            MessageType::SubscriptionStop => {
                info!(from = %message.from, "subscription stopped by proxy");
            }
            _ => {
                let result = match message.encode() {
                    Ok(bytes) => runtime.receive(&bytes).await,
                    Err(error) => Err(error.into()),
                };
                if let Err(error) = result {
                    warn!(message_type = ?message.message_type, error = %error, "delivery failed");
                }
            }
        }
    }
}

fn radio_provider(station: &Arc<Mutex<Value>>) -> Provider {
    let read = Arc::clone(station);
    let write = Arc::clone(station);
    Provider::new("vehicle/Radio", Version::new(1, 0))
        .with_attribute(
            ProviderAttribute::read_write(
                "currentStation",
                "String",
                move || {
                    let value = read.lock().clone();
                    async move { Ok::<_, ProviderError>(value) }
                },
                move |value: Value| {
                    *write.lock() = value;
                    async { Ok::<_, ProviderError>(()) }
                },
            )
            .notifiable(),
        )
        .with_operation("shuffleStations", |_params: Vec<Value>, _types: Vec<String>| async {
            Ok::<_, ProviderError>(vec![json!(["Oe3", "FM4", "Oe1"])])
        })
}

fn request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

async fn demo(runtime: &ProxyRuntime, args: &Args) -> anyhow::Result<()> {
    let provider = DiscoveryEntry::new("io.conduit.demo", "vehicle/Radio", PROVIDER_ID, Version::new(1, 0)).local();
    let settings = SendSettings::new(
        PROXY_ID,
        provider.clone(),
        MessagingQos::with_ttl(args.request_ttl_ms),
    );
    let requests = runtime.request_reply_manager();

    let station = requests
        .send_request(
            &settings,
            Request::new("getCurrentStation", vec![], vec![], request_id()),
            vec!["String".to_string()],
        )
        .await?;
    info!(station = ?station, "initial station");

    requests
        .send_request(
            &settings,
            Request::new("setCurrentStation", vec![json!("Oe1")], vec!["String".to_string()], request_id()),
            vec![],
        )
        .await?;
    let stations = requests
        .send_request(
            &settings,
            Request::new("shuffleStations", vec![], vec![], request_id()),
            vec!["String[]".to_string()],
        )
        .await?;
    info!(stations = ?stations, "shuffled stations");

    let (values_tx, mut values_rx) = mpsc::unbounded_channel();
    let listener = SubscriptionListener::new()
        .on_receive(move |value| {
            let _ = values_tx.send(value);
        })
        .on_error(|error| warn!(error = %error, "subscription error"))
        .on_subscribed(|subscription_id| info!(subscription_id = %subscription_id, "subscribed"));
    let qos = SubscriptionQos::valid_for(runtime.clock().now(), 60_000);
    let subscription_id = runtime
        .subscription_manager()
        .register_subscription(
            AttributeSubscriptionParams::new(PROXY_ID, provider, "currentStation", "String", qos)
                .with_listener(listener),
        )
        .await?;

    let wait = Duration::from_millis(args.interval_ms.saturating_mul(10).max(1_000));
    for n in 1..=args.publications {
        let value = tokio::time::timeout(wait, values_rx.recv())
            .await
            .context("publication did not arrive in time")?
            .context("listener was dropped")?;
        info!(n, value = %value, "publication received");
    }

    runtime
        .subscription_manager()
        .unregister_subscription(UnsubscribeParams::new(&subscription_id))?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let (outbound, inbound) = mpsc::unbounded_channel();
    let runtime = Arc::new(
        ProxyRuntime::builder(Arc::new(LoopbackTransport { outbound }))
            .config(RuntimeConfig {
                ttl_uplift_ms: args.ttl_uplift_ms,
                ..RuntimeConfig::default()
            })
            .build(),
    );

    let station = Arc::new(Mutex::new(json!("FM4")));
    runtime.register_provider(PROVIDER_ID, radio_provider(&station))?;

    let publisher = Publisher {
        dispatcher: runtime.dispatcher(),
        clock: runtime.clock(),
        station,
        publications: args.publications,
        interval: Duration::from_millis(args.interval_ms),
    };
    let pump = tokio::spawn(pump(Arc::clone(&runtime), publisher, inbound));

    info!(provider = PROVIDER_ID, proxy = PROXY_ID, "loopback demo starting");
    tokio::select! {
        result = demo(&runtime, &args) => result?,
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }

    runtime.shutdown();
    pump.abort();
    info!("loopback demo finished");
    Ok(())
}
