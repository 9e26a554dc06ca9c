//! livecast-server: stream-layout scanner and client session server.
//!
//! `serve` runs the session server that keeps connected viewing clients
//! informed about channel list, recording and timer changes. `scan` runs the
//! PAT/PMT scanner over a recorded transport stream and stores the stream
//! layout of one service.

use std::fs::File;
use std::io::Read;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use tokio::sync::watch;

mod database;
mod directory;
mod host;
mod layout;
mod live;
mod logging;
mod server;
mod ts_analyzer;

use database::SqliteLayoutStore;
use directory::{ChannelDirectory, ServiceDirectory, ServiceHandle};
use host::{HostContext, InactivityTracker, StateCounter};
use layout::{LayoutStore, MemoryLayoutStore};
use live::LiveStreamer;
use server::{Server, ServerConfig};
use ts_analyzer::{SectionFilter, ServiceScanner};

const DEFAULT_PORT: u16 = 34891;
const DEFAULT_CONFIG_DIR: &str = "config";
const DEFAULT_DATABASE: &str = "livecast.db";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_RETENTION_DAYS: u64 = 7;
const DEFAULT_CONFIG_FILE: &str = "livecast.toml";

/// livecast-server - stream-layout scanner and client session server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'f', long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory where log files are stored
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Number of days to keep log files
    #[arg(long, global = true)]
    log_retention_days: Option<u64>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the client session server (default)
    Serve {
        /// Address to listen on
        #[arg(short, long)]
        listen: Option<SocketAddr>,

        /// Directory holding the access list
        #[arg(long)]
        config_dir: Option<PathBuf>,
    },

    /// Scan a recorded transport stream for the stream layout of a service
    Scan {
        /// Transport stream file
        input: PathBuf,

        /// Service ID (PAT program number)
        #[arg(short, long)]
        sid: u16,

        /// Transport stream ID, if the service is not in the channel list
        #[arg(long)]
        tsid: Option<u16>,

        /// Original network ID
        #[arg(long, default_value = "1")]
        nid: u16,

        /// Signal source code
        #[arg(long, default_value = "1")]
        source: u32,

        /// Path to the layout database
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// Do not read or write the layout database
        #[arg(long)]
        dry_run: bool,
    },
}

/// Configuration file format.
#[derive(Debug, serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    database: DatabaseSection,
    #[serde(default)]
    logging: LoggingSection,
    #[serde(default)]
    channels: Vec<ServiceHandle>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct ServerSection {
    listen: Option<String>,
    port: Option<u16>,
    config_dir: Option<String>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct LoggingSection {
    log_dir: Option<String>,
    retention_days: Option<u64>,
    level: Option<String>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct DatabaseSection {
    path: Option<String>,
}

impl ServerSection {
    /// Listen address from `listen`, else `0.0.0.0:<port>`.
    fn listen_addr(&self) -> Result<SocketAddr, Box<dyn std::error::Error>> {
        match &self.listen {
            Some(listen) => Ok(listen.parse()?),
            None => Ok(SocketAddr::from((
                Ipv4Addr::UNSPECIFIED,
                self.port.unwrap_or(DEFAULT_PORT),
            ))),
        }
    }
}

fn load_config(path: &Path) -> Result<ConfigFile, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: ConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Explicit path > auto-detect > defaults
    let config_path = args.config.clone().or_else(|| {
        let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
        default_path.exists().then_some(default_path)
    });
    let file_config = match &config_path {
        Some(path) => match load_config(path) {
            Ok(c) => {
                eprintln!("Loaded config from: {}", path.display());
                c
            }
            Err(e) => {
                eprintln!("Failed to load config file {}: {}", path.display(), e);
                return Err(e);
            }
        },
        None => ConfigFile::default(),
    };

    let log_dir = args.log_dir.clone().unwrap_or_else(|| {
        PathBuf::from(file_config.logging.log_dir.as_deref().unwrap_or(DEFAULT_LOG_DIR))
    });
    let log_retention_days = args
        .log_retention_days
        .or(file_config.logging.retention_days)
        .unwrap_or(DEFAULT_LOG_RETENTION_DAYS);
    logging::init_logging(
        &log_dir,
        log_retention_days,
        args.verbose,
        file_config.logging.level.as_deref(),
    )?;

    match args.command {
        None => serve(file_config, None, None).await,
        Some(Command::Serve { listen, config_dir }) => serve(file_config, listen, config_dir).await,
        Some(Command::Scan {
            input,
            sid,
            tsid,
            nid,
            source,
            database,
            dry_run,
        }) => {
            let options = ScanOptions {
                input,
                sid,
                tsid,
                nid,
                source,
                database,
                dry_run,
            };
            scan(file_config, options)
        }
    }
}

async fn serve(
    file_config: ConfigFile,
    listen: Option<SocketAddr>,
    config_dir: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let listen_addr = match listen {
        Some(addr) => addr,
        None => file_config.server.listen_addr()?,
    };
    let config_dir = config_dir.unwrap_or_else(|| {
        PathBuf::from(
            file_config
                .server
                .config_dir
                .as_deref()
                .unwrap_or(DEFAULT_CONFIG_DIR),
        )
    });

    let directory = Arc::new(ChannelDirectory::new(file_config.channels));
    let host = HostContext {
        directory: directory.clone(),
        recordings: Arc::new(StateCounter::new()),
        timers: Arc::new(StateCounter::new()),
        hooks: Arc::new(InactivityTracker::new()),
    };

    info!("livecast-server starting...");
    info!("  Listen address: {}", listen_addr);
    info!("  Config directory: {}", config_dir.display());
    info!("  Channels: {}", directory.len());

    let config = ServerConfig {
        listen_addr,
        config_dir,
    };
    let (stop_tx, stop_rx) = watch::channel(false);
    let server_task = match Server::bind(config, host) {
        Ok(server) => Some(tokio::spawn(server.run(stop_rx))),
        Err(e) => {
            error!("Session server disabled: {}", e);
            None
        }
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    let _ = stop_tx.send(true);
    if let Some(task) = server_task {
        if let Err(e) = task.await {
            error!("Server task failed: {}", e);
        }
    }

    Ok(())
}

struct ScanOptions {
    input: PathBuf,
    sid: u16,
    tsid: Option<u16>,
    nid: u16,
    source: u32,
    database: Option<PathBuf>,
    dry_run: bool,
}

/// Read size for the scan; a whole number of TS packets.
const SCAN_CHUNK_SIZE: usize = ts_analyzer::TS_PACKET_SIZE * 512;

fn scan(file_config: ConfigFile, options: ScanOptions) -> Result<(), Box<dyn std::error::Error>> {
    let directory = Arc::new(ChannelDirectory::new(file_config.channels));
    let service = match (directory.find_by_service_id(options.sid), options.tsid) {
        (Some(service), None) => service,
        (_, Some(tsid)) => {
            let service = ServiceHandle {
                source: options.source,
                network_id: options.nid,
                transport_id: tsid,
                service_id: options.sid,
                name: format!("service {}", options.sid),
            };
            directory.upsert(service.clone());
            service
        }
        (None, None) => {
            return Err(format!(
                "service {} is not in the channel list, pass --tsid",
                options.sid
            )
            .into())
        }
    };

    let store: Arc<dyn LayoutStore> = if options.dry_run {
        Arc::new(MemoryLayoutStore::new())
    } else {
        let path = options
            .database
            .or(file_config.database.path.map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE));
        info!("Opening database: {:?}", path);
        Arc::new(SqliteLayoutStore::open(&path)?)
    };

    let streamer = Arc::new(LiveStreamer::new(service.name.clone()));
    let mut scanner = ServiceScanner::new(
        service,
        directory.clone() as Arc<dyn ServiceDirectory>,
        store,
        streamer.clone(),
    );
    let mut filter = SectionFilter::new();

    info!(
        "Scanning {} for \"{}\" ({})",
        options.input.display(),
        scanner.service().name,
        scanner.service().channel_id()
    );

    let mut file = File::open(&options.input)?;
    let mut chunk = vec![0u8; SCAN_CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = read_full(&mut file, &mut chunk)?;
        if n == 0 {
            break;
        }
        total += n as u64;
        filter.feed(&chunk[..n], &mut scanner);
        for packet in chunk[..n].chunks_exact(ts_analyzer::TS_PACKET_SIZE) {
            if packet[0] == ts_analyzer::SYNC_BYTE {
                streamer.route(u16::from_be_bytes([packet[1], packet[2]]) & 0x1FFF);
            }
        }
        if n < chunk.len() {
            break;
        }
    }

    info!(
        "Read {} bytes, {} sections, PMT PID {:?}, {} stream changes",
        total,
        filter.sections_delivered(),
        scanner.pmt_pid(),
        streamer.reconfiguration_count()
    );
    if !streamer.take_reconfiguration_request() {
        warn!("Stream layout unchanged or service not found");
    }

    println!("{}", serde_json::to_string_pretty(scanner.layout())?);
    for demuxer in streamer.demuxers() {
        println!(
            "PID {:5}  {:<10} {:<8} {} packets",
            demuxer.stream.pid,
            demuxer.stream.kind.name(),
            demuxer.stream.language.to_string(),
            demuxer.packets
        );
    }

    Ok(())
}

/// Fill `buf` as far as the reader allows; returns the byte count.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_sections() {
        let config: ConfigFile = toml::from_str(
            r#"
            [server]
            port = 40000
            config_dir = "/etc/livecast"

            [logging]
            level = "warn"

            [[channels]]
            source = 1
            network_id = 1
            transport_id = 1101
            service_id = 28736
            name = "Das Erste HD"

            [[channels]]
            source = 1
            network_id = 1
            transport_id = 1101
            service_id = 28737
            "#,
        )
        .unwrap();

        assert_eq!(
            config.server.listen_addr().unwrap(),
            "0.0.0.0:40000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(config.server.config_dir.as_deref(), Some("/etc/livecast"));
        assert_eq!(config.logging.level.as_deref(), Some("warn"));
        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.channels[0].channel_id(), "1-1-1101-28736");
        assert_eq!(config.channels[1].name, "");
    }

    #[test]
    fn test_default_listen_addr() {
        let config = ConfigFile::default();
        assert_eq!(
            config.server.listen_addr().unwrap(),
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT))
        );

        let explicit = ServerSection {
            listen: Some("127.0.0.1:5000".to_string()),
            ..Default::default()
        };
        assert_eq!(explicit.listen_addr().unwrap().port(), 5000);
    }

    #[test]
    fn test_read_full_short_input() {
        let data = vec![0x47u8; 300];
        let mut reader = &data[..];
        let mut buf = [0u8; 188];
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 188);
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 112);
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_cli_defaults_to_serve() {
        let args = Args::try_parse_from(["livecast-server"]).unwrap();
        assert!(args.command.is_none());

        let args = Args::try_parse_from(["livecast-server", "scan", "cap.ts", "--sid", "101", "--dry-run"])
            .unwrap();
        match args.command {
            Some(Command::Scan { sid, dry_run, .. }) => {
                assert_eq!(sid, 101);
                assert!(dry_run);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
