use anyhow::{Context, Result};
use clap::Parser;
use rdt_cli::terminal::{self, Terminal};
use rdt_cli::{CliConfig, PayloadSource, ReliableServer};
use rdt_core::{FileSink, NetContext};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "GBN / SR reliable transfer over UDP", long_about = None)]
struct Args {
    /// TOML file with listen address, payload, log file and engine settings.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. 127.0.0.1:8888. Asked for when missing.
    #[arg(short, long)]
    listen: Option<String>,

    /// File served to -testgbn / -testsr requests.
    #[arg(long)]
    payload: Option<PathBuf>,

    /// Protocol event log.
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[arg(long)]
    tick_ms: Option<u64>,

    #[arg(long)]
    reply_timeout_ms: Option<u64>,
}

impl Args {
    fn into_config(self) -> Result<CliConfig> {
        let mut config = match &self.config {
            Some(path) => CliConfig::load(path)?,
            None => CliConfig::default(),
        };
        if let Some(listen) = self.listen {
            config.listen = Some(listen);
        }
        if let Some(payload) = self.payload {
            config.payload = payload;
        }
        if let Some(log_file) = self.log_file {
            config.log_file = log_file;
        }
        if let Some(tick_ms) = self.tick_ms {
            config.engine.tick_ms = tick_ms;
        }
        if let Some(ms) = self.reply_timeout_ms {
            config.reply_timeout_ms = ms;
        }
        config.engine.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let config = args.into_config()?;
    let sink = FileSink::append(&config.log_file)
        .with_context(|| format!("Failed to open log file {}", config.log_file.display()))?;
    let ctx = NetContext::with_sink(sink);

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    writeln!(stdout, "Reliable transfer terminal (GBN / SR over UDP)")?;

    let listen = match &config.listen {
        Some(listen) => listen.clone(),
        None => terminal::prompt_listen_addr(stdin.lock(), &mut stdout)?,
    };

    let mut server = ReliableServer::bind(
        ctx,
        listen.as_str(),
        PayloadSource::File(config.payload.clone()),
        config.engine.clone(),
    )
    .with_context(|| format!("Failed to start server on {listen}"))?;
    server.start();

    let local = server.local_addr()?;
    info!("rdt-cli ready on {local}, protocol log in {}", config.log_file.display());
    writeln!(stdout, "Listening on {local}. Commands:")?;
    writeln!(stdout, "  -settarget <host> <port>")?;
    writeln!(stdout, "  -testgbn [dataLoss] [ackLoss] | -testsr [dataLoss] [ackLoss]")?;
    writeln!(stdout, "  -time (UTC) | -quit | -exit | any other text is echoed")?;

    let mut terminal = Terminal::new(
        &server,
        local.ip().to_string(),
        local.port(),
        config.reply_timeout(),
    );
    terminal.run(stdin.lock(), &mut stdout)?;
    drop(terminal);

    server.close();
    info!("rdt-cli exiting");
    Ok(())
}
