use chrono::Local;
use clap::Parser;
use log::LevelFilter;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use kospel_snapshot::kospel::{HttpTransport, BASE_URL};
use kospel_snapshot::{Credentials, Device, SessionCache, Snapshot};

/// Read the current registers of a Kospel controller and append them to a
/// log file when they changed. Meant to be run periodically from cron.
#[derive(Parser)]
#[command(name = "kospel-snapshot")]
#[command(version = kospel_snapshot::VERSION)]
struct Cli {
    #[arg(short, long)]
    username: String,

    #[arg(short, long)]
    password: String,

    /// Log file to append readings to. Without it the reading is only printed.
    #[arg(short, long)]
    outfile: Option<PathBuf>,

    /// Repeat for more output: -v info, -vv debug
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Where the session id is kept between runs (default: <tmp>/.sessid)
    #[arg(long)]
    session_file: Option<PathBuf>,

    #[arg(long, default_value = BASE_URL)]
    base_url: String,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "30", value_parser = clap::value_parser!(u64).range(1..))]
    timeout: u64,

    #[arg(long, default_value = "mi01_00001403")]
    device_serial: String,

    #[arg(long, default_value = "101")]
    module_id: u32,

    #[arg(long, default_value = "19")]
    device_type: u32,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .target(env_logger::Target::Stdout)
        .filter_level(level)
        .filter_module("reqwest", LevelFilter::Error)
        .filter_module("hyper", LevelFilter::Error)
        .filter_module("hyper_util", LevelFilter::Error)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {}: {}",
                Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
                record.level(),
                record.args()
            )
        })
        .init();
}

fn entry(cli: Cli) -> Result<(), ()> {
    let cache = cli.session_file.map(SessionCache::new).unwrap_or_default();
    let token = cache.load();
    let transport = HttpTransport::new(&cli.base_url, Duration::from_secs(cli.timeout), token.as_deref())
        .map_err(|err| {
            eprintln!("ERROR: could not set up HTTP client: {err}");
        })?;

    let device = Device {
        serial: cli.device_serial,
        module_id: cli.module_id,
        device_type: cli.device_type,
    };
    let credentials = Credentials::new(cli.username, cli.password);
    let mut snapshot = Snapshot::new(transport, credentials, device, cache, cli.outfile);

    snapshot.run().map(drop).map_err(|err| {
        eprintln!("ERROR: snapshot failed: {err}");
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match entry(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(()) => ExitCode::FAILURE,
    }
}
