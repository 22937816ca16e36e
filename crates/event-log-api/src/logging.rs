//! Structured logging bootstrap, the AMBIENT STACK notes: JSON-formatted
//! tracing output gated by `RUST_LOG`, one-time `init()` call from
//! `main`. No per-request correlation-ID layer — this spec's HTTP
//! surface has nothing to correlate across.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

pub fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let formatting_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_span_events(FmtSpan::CLOSE)
        .json();

    let subscriber = Registry::default().with(env_filter).with(formatting_layer);

    tracing::subscriber::set_global_default(subscriber).expect("failed to install global tracing subscriber");
}
