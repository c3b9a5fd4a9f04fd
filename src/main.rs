use std::{path::Path, sync::Arc, time::Duration};

use bytes::Bytes;
use clap::{Parser, Subcommand};
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use futures_util::future::join_all;
use http::{Response, StatusCode};
use lodestar::{
    adapters::{HttpClientAdapter, HttpDiscoveryLookupClient, MetricsBalancerStats},
    config::{ClientConfig, ClientConfigValidator, loader::load_config},
    core::{
        BalancingHttpClient, HttpServiceBalancer, HttpServiceBalancerFactory, Request,
        ResponseHandler, StaticHttpServiceBalancerFactory,
    },
    metrics,
    ports::{BalancerStats, DiscoveryLookupClient, HttpClientError},
    tracing_setup,
};
use url::Url;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Commands,

    /// Emit logs as JSON instead of console lines
    #[clap(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "lodestar.toml")]
        config: String,
    },
    /// Fetch the current instances of a service from discovery once
    Lookup {
        #[clap(short, long, default_value = "lodestar.toml")]
        config: String,
        /// Service type to look up
        #[clap(long)]
        service: String,
        /// Pool to look in; defaults to the configured pool
        #[clap(long)]
        pool: Option<String>,
    },
    /// Send balanced GET requests to a service and report per-target stats
    Request {
        #[clap(short, long, default_value = "lodestar.toml")]
        config: String,
        /// Service type to call
        #[clap(long)]
        service: String,
        /// Number of concurrent requests to send
        #[clap(long, default_value_t = 1)]
        count: usize,
        /// Path relative to the instance base URI, e.g. `v1/status`
        path: String,
    },
    /// Keep a service's balancer updated and log candidate changes until Ctrl-C
    Watch {
        #[clap(short, long, default_value = "lodestar.toml")]
        config: String,
        /// Service type to watch
        #[clap(long)]
        service: String,
    },
}

/// Returns status and body of any response, so the CLI can show failures too
struct StatusAndBodyHandler;

impl ResponseHandler for StatusAndBodyHandler {
    type Output = (StatusCode, String);
    type Error = HttpClientError;

    fn handle(&self, _request: &Request, response: Response<Bytes>) -> Result<(StatusCode, String), HttpClientError> {
        let status = response.status();
        Ok((status, String::from_utf8_lossy(response.body()).into_owned()))
    }

    fn handle_exception(&self, _request: &Request, error: HttpClientError) -> HttpClientError {
        error
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    if args.json_logs {
        tracing_setup::init_tracing()?;
    } else {
        tracing_setup::init_console_tracing()?;
    }
    metrics::init_metrics()?;

    match args.command {
        Commands::Validate { config } => validate_config_command(&config).await,
        Commands::Lookup {
            config,
            service,
            pool,
        } => lookup_command(&config, &service, pool).await,
        Commands::Request {
            config,
            service,
            count,
            path,
        } => request_command(&config, &service, count, path).await,
        Commands::Watch { config, service } => watch_command(&config, &service).await,
    }
}

async fn load_validated_config(config_path: &str) -> Result<ClientConfig> {
    let config = load_config(config_path).await?;
    ClientConfigValidator::validate(&config)
        .wrap_err_with(|| format!("Invalid configuration in {config_path}"))?;
    Ok(config)
}

fn discovery_client(config: &ClientConfig) -> Result<Arc<HttpDiscoveryLookupClient>> {
    let discovery = config
        .discovery
        .as_ref()
        .ok_or_else(|| eyre!("No [discovery] section configured"))?;
    let base_uri = Url::parse(&discovery.uri)
        .wrap_err_with(|| format!("Invalid discovery URI {}", discovery.uri))?;
    let client = HttpDiscoveryLookupClient::new(
        base_uri,
        discovery.environment.clone(),
        discovery.request_timeout,
    )?;
    Ok(Arc::new(client))
}

/// Build a balancer for `service`, static or discovered. The returned factory
/// owns the updater and must be kept alive while the balancer is in use.
async fn build_balancer(
    config: &ClientConfig,
    service: &str,
    stats: Arc<dyn BalancerStats>,
) -> Result<(Arc<HttpServiceBalancer>, Option<HttpServiceBalancerFactory>)> {
    let service_config = config.services.get(service).cloned().unwrap_or_default();

    if let Some(uris) = &service_config.uris {
        let uris = uris
            .iter()
            .map(|uri| Url::parse(uri).wrap_err_with(|| format!("Invalid static URI {uri}")))
            .collect::<Result<Vec<_>>>()?;
        let factory = StaticHttpServiceBalancerFactory::new()
            .with_stats_factory(Arc::new(move |_: &str| Arc::clone(&stats)));
        return Ok((factory.create_http_service_balancer(service, uris), None));
    }

    let discovery = config
        .discovery
        .as_ref()
        .ok_or_else(|| eyre!("Service {service} needs a [discovery] section"))?;
    let factory = HttpServiceBalancerFactory::from_config(discovery_client(config)?, discovery);
    let balancer = factory
        .create_http_service_balancer_with_stats(service, &service_config, stats)
        .await;
    Ok((balancer, Some(factory)))
}

async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    match ClientConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            match &config.discovery {
                Some(discovery) => println!(
                    "   • Discovery: {} (environment {}, pool {})",
                    discovery.uri, discovery.environment, discovery.pool
                ),
                None => println!("   • Discovery: not configured"),
            }
            println!("   • Max retries: {}", config.http_client.max_retries);
            for (service_type, service) in &config.services {
                match &service.uris {
                    Some(uris) => println!("   • {service_type}: {} static URIs", uris.len()),
                    None => println!(
                        "   • {service_type}: discovered in pool {}",
                        config.pool_for(service_type)
                    ),
                }
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

async fn lookup_command(config_path: &str, service: &str, pool: Option<String>) -> Result<()> {
    let config = load_validated_config(config_path).await?;
    let client = discovery_client(&config)?;
    let pool = pool.unwrap_or_else(|| config.pool_for(service));

    let descriptors = client
        .get_services(service, &pool)
        .await
        .wrap_err_with(|| format!("Lookup of {service} in pool {pool} failed"))?;

    println!(
        "{} instance(s) of {service} in pool {pool} (version {}, max age {})",
        descriptors.descriptors().len(),
        descriptors.version().unwrap_or("-"),
        descriptors
            .max_age()
            .map(|age| humantime::format_duration(age).to_string())
            .unwrap_or_else(|| "-".to_string()),
    );
    for descriptor in descriptors.descriptors() {
        println!("  {descriptor}");
    }
    Ok(())
}

async fn request_command(config_path: &str, service: &str, count: usize, path: String) -> Result<()> {
    let config = load_validated_config(config_path).await?;
    let stats = Arc::new(MetricsBalancerStats::new(service));
    let (balancer, factory) = build_balancer(&config, service, stats.clone()).await?;

    let transport = Arc::new(HttpClientAdapter::new(config.http_client.request_timeout)?);
    let client = BalancingHttpClient::new(balancer, transport, &config.http_client);

    let results = join_all(
        (0..count.max(1)).map(|_| client.execute(Request::get(path.clone()), StatusAndBodyHandler)),
    )
    .await;

    for result in results {
        match result {
            Ok((status, body)) => println!("{status}: {body}"),
            Err(e) => eprintln!("❌ {e}"),
        }
    }

    println!();
    println!("📊 Per-target stats for {service}:");
    for (target, target_stats) in stats.snapshot() {
        println!(
            "   • {target}: {} ok, {} failed, {:?} total",
            target_stats.successes, target_stats.failures, target_stats.total_time
        );
        for (category, failures) in &target_stats.failure_categories {
            println!("       {category}: {failures}");
        }
    }

    if let Some(factory) = factory {
        factory.stop();
    }
    Ok(())
}

async fn watch_command(config_path: &str, service: &str) -> Result<()> {
    let config = load_validated_config(config_path).await?;
    let stats = Arc::new(MetricsBalancerStats::new(service));
    let (balancer, factory) = build_balancer(&config, service, stats).await?;

    let mut shown = balancer.candidates();
    tracing::info!(balancer = %balancer.description(), candidates = shown.len(), "Watching");
    for (uri, weight) in shown.iter() {
        println!("  {uri} (weight {weight})");
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.wrap_err("Failed to listen for Ctrl-C")?;
                break;
            }
            _ = ticker.tick() => {
                let current = balancer.candidates();
                if !Arc::ptr_eq(&current, &shown) {
                    println!("{} candidate(s):", current.len());
                    for (uri, weight) in current.iter() {
                        println!("  {uri} (weight {weight})");
                    }
                    shown = current;
                }
            }
        }
    }

    if let Some(factory) = factory {
        factory.stop();
    }
    Ok(())
}
