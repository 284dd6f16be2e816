//! Starglass INDI monitor
//!
//! Connects to an INDI server, mirrors the watched devices and logs every
//! client event.
//!
//! # Usage
//!
//! ```bash
//! # Everything the server has
//! starglass-monitor --host observatory.local
//!
//! # One device, one property of another, no image data
//! starglass-monitor --watch "CCD Simulator" --watch "Telescope Simulator:EQUATORIAL_EOD_COORD" --blob never
//!
//! # JSON lines for a minute
//! starglass-monitor --json --duration 60
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{json, Value};
use starglass_indi::{BlobHandling, ClientConfig, IndiClient, IndiEvent, INDI_DEFAULT_PORT};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "starglass-monitor")]
#[command(about = "Watch an INDI server and log its traffic")]
#[command(version)]
struct Cli {
    /// INDI server host
    #[arg(long, env = "INDI_HOST", default_value = "localhost")]
    host: String,

    /// INDI server port
    #[arg(short, long, env = "INDI_PORT", default_value_t = INDI_DEFAULT_PORT)]
    port: u16,

    /// Device or device:property to watch (repeatable, default: everything)
    #[arg(short, long = "watch", value_name = "DEVICE[:PROPERTY]")]
    watch: Vec<String>,

    /// BLOB policy for every device: never, also or only
    #[arg(long, value_parser = parse_blob_mode)]
    blob: Option<BlobHandling>,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<u64>,

    /// Print events as JSON lines on stdout
    #[arg(long)]
    json: bool,

    /// Log filter when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Reconnect with backoff when the server goes away
    #[arg(long)]
    reconnect: bool,
}

fn parse_blob_mode(s: &str) -> Result<BlobHandling, String> {
    BlobHandling::parse(s).ok_or_else(|| format!("expected never, also or only, got '{}'", s))
}

/// Split `DEVICE[:PROPERTY]`
fn parse_watch(entry: &str) -> (&str, Option<&str>) {
    match entry.split_once(':') {
        Some((device, property)) if !property.is_empty() => (device, Some(property)),
        Some((device, _)) => (device, None),
        None => (entry, None),
    }
}

fn event_json(event: &IndiEvent) -> Value {
    match event {
        IndiEvent::DeviceDefined(device) => json!({"event": "device_defined", "device": device}),
        IndiEvent::DeviceRemoved(device) => json!({"event": "device_removed", "device": device}),
        IndiEvent::PropertyDefined { device, property, kind } => json!({
            "event": "property_defined",
            "device": device,
            "property": property,
            "kind": kind.to_string(),
        }),
        IndiEvent::PropertyUpdated { device, property, state } => json!({
            "event": "property_updated",
            "device": device,
            "property": property,
            "state": state.as_str(),
        }),
        IndiEvent::PropertyDeleted { device, property } => json!({
            "event": "property_deleted",
            "device": device,
            "property": property,
        }),
        // Payload left out, it can be megabytes
        IndiEvent::BlobReceived { device, property, element, format, size, .. } => json!({
            "event": "blob_received",
            "device": device,
            "property": property,
            "element": element,
            "format": format,
            "size": size,
        }),
        IndiEvent::Message { device, message } => json!({
            "event": "message",
            "device": device,
            "message": message,
        }),
        IndiEvent::PingReply(uid) => json!({"event": "ping_reply", "uid": uid}),
        IndiEvent::ServerConnected => json!({"event": "server_connected"}),
        IndiEvent::ServerDisconnected(code) => json!({"event": "server_disconnected", "exit_code": code}),
        IndiEvent::Error(error) => json!({"event": "error", "error": error}),
    }
}

fn report(event: &IndiEvent, as_json: bool) {
    if as_json {
        println!("{}", event_json(event));
        return;
    }
    match event {
        IndiEvent::DeviceDefined(device) => tracing::info!("Device '{}' defined", device),
        IndiEvent::DeviceRemoved(device) => tracing::info!("Device '{}' removed", device),
        IndiEvent::PropertyDefined { device, property, kind } => {
            tracing::info!("{}.{} defined ({})", device, property, kind)
        }
        IndiEvent::PropertyUpdated { device, property, state } => {
            tracing::info!("{}.{} -> {}", device, property, state)
        }
        IndiEvent::PropertyDeleted { device, property } => {
            tracing::info!("{}.{} deleted", device, property)
        }
        IndiEvent::BlobReceived { device, property, element, format, size, .. } => {
            tracing::info!("{}.{}.{}: {} bytes ({})", device, property, element, size, format)
        }
        IndiEvent::Message { device: Some(device), message } => {
            tracing::info!("[{}] {}", device, message)
        }
        IndiEvent::Message { device: None, message } => tracing::info!("{}", message),
        IndiEvent::PingReply(uid) => tracing::debug!("Ping reply {}", uid),
        IndiEvent::ServerConnected => tracing::info!("Server connected"),
        IndiEvent::ServerDisconnected(code) => tracing::warn!("Server disconnected ({})", code),
        IndiEvent::Error(error) => tracing::warn!("{}", error),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut client = IndiClient::with_config(ClientConfig {
        host: cli.host.clone(),
        port: cli.port,
        ..ClientConfig::default()
    });

    for entry in &cli.watch {
        match parse_watch(entry) {
            (device, Some(property)) => client.watch_property(device, property).await?,
            (device, None) => client.watch_device(device).await?,
        }
    }
    if let Some(mode) = cli.blob {
        for entry in &cli.watch {
            client.set_blob_mode(parse_watch(entry).0, None, mode).await?;
        }
    }

    let mut events = client.subscribe();
    client
        .connect()
        .await
        .with_context(|| format!("connecting to INDI server {}:{}", cli.host, cli.port))?;

    let deadline = async {
        match cli.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    let mut keepalive = tokio::time::interval(client.timeout_config().keepalive_interval());

    loop {
        tokio::select! {
            _ = &mut deadline => {
                tracing::info!("Monitoring period elapsed");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            _ = keepalive.tick() => {
                if let Err(e) = client.check_keepalive().await {
                    tracing::warn!("Keepalive failed: {}", e);
                }
            }
            event = events.recv() => match event {
                Ok(event) => {
                    report(&event, cli.json);
                    match event {
                        // Without a watch list the policy is applied as devices appear
                        IndiEvent::DeviceDefined(device) if cli.watch.is_empty() => {
                            if let Some(mode) = cli.blob {
                                client.set_blob_mode(&device, None, mode).await?;
                            }
                        }
                        IndiEvent::ServerDisconnected(-1) => {
                            if !cli.reconnect {
                                break;
                            }
                            client.reconnect_with_backoff().await?;
                        }
                        _ => {}
                    }
                }
                Err(RecvError::Lagged(missed)) => tracing::warn!("Missed {} events", missed),
                Err(RecvError::Closed) => break,
            }
        }
    }

    client.disconnect().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use starglass_indi::PropertyState;

    #[test]
    fn test_parse_watch() {
        assert_eq!(parse_watch("CCD Simulator"), ("CCD Simulator", None));
        assert_eq!(parse_watch("CCD Simulator:CCD1"), ("CCD Simulator", Some("CCD1")));
        assert_eq!(parse_watch("Mount:"), ("Mount", None));
    }

    #[test]
    fn test_parse_blob_mode() {
        assert_eq!(parse_blob_mode("never"), Ok(BlobHandling::Never));
        assert!(parse_blob_mode("always").is_err());
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["starglass-monitor", "--watch", "CCD", "--blob", "only"]);
        assert_eq!(cli.port, 7624);
        assert_eq!(cli.watch, vec!["CCD".to_string()]);
        assert_eq!(cli.blob, Some(BlobHandling::Only));
        assert!(!cli.json);
    }

    #[test]
    fn test_event_json_leaves_out_blob_data() {
        let value = event_json(&IndiEvent::BlobReceived {
            device: "CCD".to_string(),
            property: "CCD1".to_string(),
            element: "CCD1".to_string(),
            format: ".fits".to_string(),
            size: 3,
            data: vec![1, 2, 3],
        });
        assert_eq!(value["size"], 3);
        assert!(value.get("data").is_none());

        let update = event_json(&IndiEvent::PropertyUpdated {
            device: "Mount".to_string(),
            property: "TARGET".to_string(),
            state: PropertyState::Busy,
        });
        assert_eq!(update["state"], "Busy");
    }
}
