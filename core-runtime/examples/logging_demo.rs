//! Logging system demonstration
//!
//! Shows the output formats and URL redaction used by the cache core.
//!
//! Run with:
//! ```bash
//! # Pretty format (default in debug)
//! cargo run -p core-runtime --example logging_demo
//!
//! # JSON format
//! cargo run -p core-runtime --example logging_demo -- json
//!
//! # Compact format with a custom filter
//! cargo run -p core-runtime --example logging_demo -- compact "core_runtime=trace"
//! ```

use core_runtime::events::{CoreEvent, EventBus, FetchEvent, LifecycleEvent};
use core_runtime::logging::{display_url, init_logging, LogFormat, LogLevel, LoggingConfig};
use std::env;
use tracing::{debug, info, info_span, instrument, warn};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    let format = match args.get(1).map(String::as_str) {
        Some("json") => LogFormat::Json,
        Some("compact") => LogFormat::Compact,
        Some("pretty") => LogFormat::Pretty,
        _ => LogFormat::default(),
    };

    let mut config = LoggingConfig::default()
        .with_format(format)
        .with_level(LogLevel::Trace)
        .with_url_redaction(true)
        .with_spans(true);

    if let Some(filter) = args.get(2) {
        config = config.with_filter(filter.clone());
    }

    init_logging(config).expect("Failed to initialize logging");

    info!(format = ?format, "Logging initialized");

    demo_install();
    demo_fetch("https://cdn.example.com/covers/album.png?sig=abc&exp=1700000000").await;

    info!("Demo complete");
}

fn demo_install() {
    let span = info_span!("install", generation = "nossa-musica-cache-v1");
    let _enter = span.enter();

    let bus = EventBus::new(16);
    let mut events = bus.subscribe();

    let _ = bus.emit(CoreEvent::Lifecycle(LifecycleEvent::Installed {
        generation: "nossa-musica-cache-v1".to_string(),
        shell_cached: 6,
        shell_failed: vec!["https://cdn.tailwindcss.com/".to_string()],
    }));

    if let Ok(event) = events.try_recv() {
        warn!(severity = ?event.severity(), "{}", event.description());
    }
}

#[instrument(skip_all, fields(url = %display_url(url)))]
async fn demo_fetch(url: &str) {
    debug!("Cache miss, going to network");

    let event = CoreEvent::Fetch(FetchEvent::NetworkFilled {
        url: display_url(url),
        status: 200,
    });
    info!(severity = ?event.severity(), "{}", event.description());
}
