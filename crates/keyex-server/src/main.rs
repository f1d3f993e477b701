use clap::Parser as _;
use keyex_server::{
    KeyExServer,
    cli::{CheckArguments, Cli, Command, ConfigArguments, RunArguments},
    config::{self, Config, ServerConfig},
};
use keyex_telemetry::Tracing;
use snafu::{ResultExt, Snafu};

const APP_NAME: &str = "bud-key-ex";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to initialize tracing"))]
    InitTracing {
        source: keyex_telemetry::tracing::Error,
    },

    #[snafu(display("failed to load configuration"))]
    LoadConfig { source: config::Error },

    #[snafu(display("failed to build async runtime"))]
    BuildRuntime { source: std::io::Error },

    #[snafu(display("failed to run server"))]
    RunServer { source: keyex_server::ServerError },
}

#[snafu::report]
fn main() -> Result<(), Error> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run(RunArguments { config, telemetry }) => {
            let _tracing_guard = Tracing::pre_configured(APP_NAME, telemetry)
                .init()
                .context(InitTracingSnafu)?;

            let ServerConfig {
                options,
                dispatcher,
                workers,
            } = load_config(&config)?;

            tracing::debug!(workers, "build async runtime");
            tokio::runtime::Builder::new_multi_thread()
                .worker_threads(workers)
                .enable_all()
                .build()
                .context(BuildRuntimeSnafu)?
                .block_on(KeyExServer::new(dispatcher, options).run())
                .context(RunServerSnafu)
        }
        Command::Check(CheckArguments { config }) => {
            let ServerConfig { options, dispatcher, .. } = load_config(&config)?;
            let keys = dispatcher.keys();

            println!(
                "{path}: OK, {default} default key(s), {hosts} virtual host(s), listening on {addr}",
                path = config.path.display(),
                default = keys.default_keys().len(),
                hosts = keys.virtual_hosts().count(),
                addr = options.socket_addr,
            );
            Ok(())
        }
    }
}

fn load_config(arguments: &ConfigArguments) -> Result<ServerConfig, Error> {
    Config::from_file(&arguments.path)
        .and_then(Config::load)
        .context(LoadConfigSnafu)
}
