use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use clap::{crate_authors, crate_description, crate_name, crate_version, Arg, ArgAction, Command};
use gateway::registry::Registry;
use gateway::router::{self, CorsConfig};
use is_terminal::IsTerminal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

fn main() {
    use std::process;

    let cmd = Command::new(crate_name!())
        .version(crate_version!())
        .author(crate_authors!())
        .about(crate_description!())
        .args([
            Arg::new("port")
                .long("port")
                .env("GATEWAY_PORT")
                .help("TCP port the GraphQL router binds")
                .default_value("8080"),
            Arg::new("introspection_address")
                .long("introspection-bind-address")
                .env("GATEWAY_INTROSPECTION_ADDRESS")
                .help("address to bind for the HTTP healthz/metrics server")
                .default_value("[::]:8089"),
            Arg::new("definitions_path")
                .long("openapi-definitions-path")
                .env("GATEWAY_OPENAPI_DEFINITIONS_PATH")
                .help("directory of schema descriptor files to watch")
                .required(true),
            Arg::new("local_development")
                .long("local-development")
                .env("GATEWAY_LOCAL_DEVELOPMENT")
                .help("skip auth enforcement; all requests use the admin transport")
                .action(ArgAction::SetTrue),
            Arg::new("enable_kcp")
                .long("enable-kcp")
                .env("GATEWAY_ENABLE_KCP")
                .help("accept the kcp virtual-workspace path extension")
                .action(ArgAction::SetTrue),
            Arg::new("username_claim")
                .long("username-claim")
                .env("GATEWAY_USERNAME_CLAIM")
                .help("JWT claim read for impersonation")
                .default_value("preferred_username"),
            Arg::new("should_impersonate")
                .long("should-impersonate")
                .env("GATEWAY_SHOULD_IMPERSONATE")
                .help("impersonate the caller using the username claim instead of forwarding their token directly")
                .action(ArgAction::SetTrue),
            Arg::new("introspection_authentication")
                .long("introspection-authentication")
                .env("GATEWAY_INTROSPECTION_AUTHENTICATION")
                .help("require a validated token for introspection queries")
                .action(ArgAction::SetTrue),
            Arg::new("cors_enabled")
                .long("cors")
                .env("GATEWAY_CORS_ENABLED")
                .help("enable CORS handling")
                .action(ArgAction::SetTrue),
            Arg::new("cors_allowed_origins")
                .long("cors-allowed-origins")
                .env("GATEWAY_CORS_ALLOWED_ORIGINS")
                .help("comma-separated list of allowed CORS origins, or `*`")
                .value_delimiter(',')
                .default_value("*"),
            Arg::new("cors_allowed_headers")
                .long("cors-allowed-headers")
                .env("GATEWAY_CORS_ALLOWED_HEADERS")
                .help("comma-separated list of allowed CORS headers")
                .value_delimiter(',')
                .default_value("authorization,content-type"),
        ]);

    if let Err(e) = Args::try_from(&cmd.get_matches())
        .map_err(|e| gateway::Error::Config(e.to_string()))
        .and_then(startup)
    {
        eprintln!("{e}");
        process::exit(1);
    }
}

struct Args {
    port: u16,
    introspection_address: SocketAddr,
    definitions_path: PathBuf,
    local_development: bool,
    enable_kcp: bool,
    introspection_authentication: bool,
    cors: CorsConfig,
    connect_opts: kube_connect::Options,
}

impl TryFrom<&clap::ArgMatches> for Args {
    type Error = std::num::ParseIntError;

    fn try_from(m: &clap::ArgMatches) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            port: m.get_one::<String>("port").unwrap().parse()?,
            introspection_address: m
                .get_one::<String>("introspection_address")
                .unwrap()
                .parse()
                .unwrap_or_else(|_| "[::]:8089".parse().unwrap()),
            definitions_path: m.get_one::<String>("definitions_path").unwrap().into(),
            local_development: m.get_flag("local_development"),
            enable_kcp: m.get_flag("enable_kcp"),
            introspection_authentication: m.get_flag("introspection_authentication"),
            cors: CorsConfig {
                enabled: m.get_flag("cors_enabled"),
                allowed_origins: m.get_many::<String>("cors_allowed_origins").unwrap().cloned().collect(),
                allowed_headers: m.get_many::<String>("cors_allowed_headers").unwrap().cloned().collect(),
            },
            connect_opts: kube_connect::Options {
                local_development: m.get_flag("local_development"),
                should_impersonate: m.get_flag("should_impersonate"),
                username_claim: m.get_one::<String>("username_claim").unwrap().clone(),
            },
        })
    }
}

fn startup(args: Args) -> gateway::Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tokio::{runtime, signal};
    use tracing_subscriber::{filter::EnvFilter, prelude::*};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let collector = tracing_subscriber::Registry::default()
        .with(env_filter)
        .with(std::io::stdout().is_terminal().then(tracing_subscriber::fmt::layer))
        .with((!std::io::stdout().is_terminal()).then(|| tracing_subscriber::fmt::layer().json()));
    tracing::subscriber::set_global_default(collector).expect("setting global tracing subscriber");

    let prom = PrometheusBuilder::new().with_http_listener(args.introspection_address);

    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    let token = CancellationToken::new();

    rt.handle().spawn(async move {
        if let Err(e) = prom.install() {
            error!(error = %e, "error setting up prometheus endpoint");
        }
    });

    let health_shutdown = token.clone();
    rt.handle().spawn(async move {
        let app = router::health();
        match tokio::net::TcpListener::bind(args.introspection_address).await {
            Ok(listener) => {
                if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(health_shutdown.cancelled_owned()).await {
                    error!(error = %e, "healthz server exited with an error");
                }
            }
            Err(e) => error!(error = %e, "could not bind healthz server"),
        }
    });

    let signal_token = token.clone();
    rt.handle().spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "error reading SIGTERM");
        }
        signal_token.cancel();
    });

    rt.block_on(run(args, token))
}

async fn run(args: Args, shutdown: CancellationToken) -> gateway::Result<()> {
    let registry = Arc::new(Registry::new());

    let watch_shutdown = shutdown.clone();
    let watch_registry = registry.clone();
    let watch_path = args.definitions_path.clone();
    let watch_opts = args.connect_opts.clone();
    let watcher = tokio::spawn(async move { gateway::watcher::watch(watch_path, &watch_registry, &watch_opts, watch_shutdown).await });

    let config = router::Config {
        local_development: args.local_development,
        enable_kcp: args.enable_kcp,
        introspection_authentication: args.introspection_authentication,
        cors: args.cors,
    };
    let app = router::build(registry, config);
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "gateway router listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    match watcher.await {
        Ok(res) => res?,
        Err(e) => error!(error = %e, "file watcher task panicked"),
    }
    Ok(())
}
