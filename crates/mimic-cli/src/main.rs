//! Mimic CLI.
//!
//! Loads a `.mimic` snapshot, starts the service registry, and streams
//! request/listening/error events as JSON lines. With `--request`, sends a
//! single client action through the registry instead and exits.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use tracing::warn;

use mimic_core::{
    ClientAction, ConfigStore, ExportFile, RegistryEvent, RequestSink, ResponseStore,
    ServiceKind, ServiceRegistry,
};
use mimic_graphql::GraphqlProvider;
use mimic_rest::RestProvider;
use mimic_thrift::{ThriftJson, ThriftProvider};

#[derive(Parser, Debug)]
#[command(name = "mimic", version, about = "Multi-protocol service virtualization engine")]
struct Args {
    /// Enable all services on startup
    #[arg(short, long)]
    all: bool,

    /// Send a one-shot client request from a JSON file and exit
    #[arg(short, long, value_name = "FILE")]
    request: Option<PathBuf>,

    /// Exported .mimic snapshot to serve
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    if let Err(err) = run(args).await {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut export = ExportFile::load(&args.config)
        .with_context(|| format!("couldn't load {}", args.config.display()))?;
    if export.version_mismatch() {
        warn!(
            "using file from Mimic version \"{}\" in \"{}\"",
            export.mimic_version,
            mimic_core::version()
        );
    }

    let one_shot = args.request.is_some();
    for service in export.services.values_mut() {
        if args.all {
            service.enabled = true;
        }
        // One-shot mode builds clients without binding any ports.
        if one_shot {
            service.enabled = false;
        }
    }

    let thrift_defs: HashMap<String, ThriftJson> = export
        .thrift
        .iter()
        .map(|(id, graph)| {
            serde_json::from_value(graph.clone())
                .map(|def| (id.clone(), def))
                .with_context(|| format!("malformed thrift graph for service {id}"))
        })
        .collect::<anyhow::Result<_>>()?;

    let config = ConfigStore::new(ConfigStore::default_root());
    let sink = RequestSink::new();
    let store = Arc::new(ResponseStore::new(export.responses.clone(), config.clone()));
    let rest = Arc::new(RestProvider::new(Arc::clone(&store), sink.clone()));
    let graphql = Arc::new(GraphqlProvider::new(
        export.graphql.clone(),
        Arc::clone(&store),
        sink.clone(),
        config.clone(),
    ));
    let thrift = Arc::new(ThriftProvider::new(
        thrift_defs,
        Arc::clone(&store),
        sink.clone(),
        config.clone(),
    ));

    let aliases: HashMap<String, String> = export
        .services
        .iter()
        .map(|(id, service)| (id.clone(), service.alias.clone()))
        .collect();
    let registry = ServiceRegistry::new(export.services.clone(), config, &sink);
    report_events(&registry, aliases);

    registry.register(ServiceKind::Graphql, graphql).await;
    registry.register(ServiceKind::Thrift, thrift).await;
    registry.register(ServiceKind::Rest, rest).await;

    if let Some(request_file) = args.request {
        return send_request(&registry, &request_file).await;
    }

    tokio::signal::ctrl_c().await.ok();
    Ok(())
}

/// Print registry events as JSON lines, enriched with the service alias.
fn report_events(registry: &ServiceRegistry, aliases: HashMap<String, String>) {
    let mut events = registry.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(RegistryEvent::Request(record)) => {
                    let mut line = serde_json::to_value(&record).unwrap_or_default();
                    if let Some(alias) = aliases.get(&record.service_id) {
                        line["service"] = json!(alias);
                    }
                    println!("{line}");
                }
                Ok(RegistryEvent::Listening { id }) => {
                    let alias = aliases.get(&id).cloned().unwrap_or(id);
                    println!("{}", json!({ "service": alias, "status": "listening" }));
                }
                Ok(RegistryEvent::ListenerError { id, message }) => {
                    let alias = aliases.get(&id).cloned().unwrap_or(id);
                    eprintln!("{}", json!({ "service": alias, "error": message }));
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// One-shot client mode: dispatch the action, print `{success, error}`, and
/// exit non-zero on transport failure.
async fn send_request(registry: &ServiceRegistry, request_file: &PathBuf) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(request_file)
        .with_context(|| format!("couldn't read {}", request_file.display()))?;
    let action: ClientAction =
        serde_json::from_str(&text).context("malformed client request file")?;
    match registry.request(action).await {
        Ok(action) => {
            let response = action.response.unwrap_or_default();
            println!(
                "{}",
                json!({ "success": response.success, "error": response.error })
            );
            Ok(())
        }
        Err(err) => {
            println!("{}", json!({ "success": null, "error": err.to_string() }));
            std::process::exit(1);
        }
    }
}
