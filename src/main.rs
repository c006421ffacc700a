use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::Result;
use tracing::{debug, info, warn};

use wpamon::auth;
use wpamon::event::{EventHandler, MonitorEvent};
use wpamon::sessions::{backend_channel, SessionEvent, SessionRegistry, SupplicantConfig};
use wpamon::supplicant::{LinkEvent, SupplicantLink};

/// wpamon — wpa_supplicant session monitor and connector
#[derive(Parser, Debug)]
#[command(name = "wpamon", version, about, long_about = None)]
struct Cli {
    /// Wireless interfaces to attach (e.g. wlan0)
    interfaces: Vec<String>,

    /// Wired (802.1X) interfaces to attach
    #[arg(long = "wired", value_name = "IFACE")]
    wired: Vec<String>,

    /// Also attach to interfaces the supplicant announces
    #[arg(long, default_value_t = false)]
    watch: bool,

    /// Scan every ready interface each N seconds (0 disables)
    #[arg(long, value_name = "SECS", default_value_t = 0)]
    scan_interval: u64,

    /// Print events as JSON lines
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Connect the (single) attached interface to this SSID
    #[arg(long, value_name = "SSID")]
    connect: Option<String>,

    /// WPA passphrase for --connect; open network if omitted
    #[arg(long, value_name = "PASS", requires = "connect")]
    psk: Option<String>,

    /// Lock --connect to one BSSID
    #[arg(long, value_name = "MAC", requires = "connect")]
    bssid: Option<String>,

    /// The SSID is hidden; probe for it actively
    #[arg(long, default_value_t = false, requires = "connect")]
    hidden: bool,

    /// Log file path (logs go to stderr if not specified)
    #[arg(short, long)]
    log: Option<String>,

    /// Log level filter (e.g. debug, wpamon=trace)
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    color_eyre::install().ok();
    let _log_guard = init_logging(&cli.log, &cli.log_level);

    info!("wpamon starting");

    if cli.interfaces.is_empty() && cli.wired.is_empty() && !cli.watch {
        eprintln!("No interfaces given. Name interfaces to attach, or pass --watch.");
        std::process::exit(2);
    }

    // --connect targets exactly one named interface.
    let connect_interface: Option<String> = if cli.connect.is_some() {
        match (cli.interfaces.as_slice(), cli.wired.as_slice()) {
            ([only], []) => Some(only.clone()),
            ([], [only]) => Some(only.clone()),
            _ => {
                eprintln!("--connect needs exactly one named interface.");
                std::process::exit(2);
            }
        }
    } else {
        None
    };
    let connect_config = cli.connect.as_ref().map(|ssid| {
        let mut config = match &cli.psk {
            Some(psk) => SupplicantConfig::wpa_psk(ssid, psk),
            None => SupplicantConfig::open(ssid),
        };
        config.bssid = cli.bssid.clone();
        config.scan_ssid = cli.hidden;
        config
    });
    if let Some(config) = &connect_config {
        if let Err(e) = config.validate() {
            eprintln!("Invalid connection settings: {e}");
            std::process::exit(2);
        }
    }

    // Connect to the system bus
    let connection = match zbus::Connection::system().await {
        Ok(connection) => connection,
        Err(e) => {
            eprintln!("Failed to connect to the system D-Bus: {e}");
            eprintln!("Is dbus running? wpamon needs the system bus to reach wpa_supplicant.");
            std::process::exit(1);
        }
    };

    let access = auth::check_access(&connection).await;
    info!("Supplicant access: {}", access.label());
    if connect_config.is_some() && !access.can_configure() {
        warn!("--connect may be rejected ({})", access.label());
    }

    let (backend, requests) = backend_channel();
    let (link, link_rx) = SupplicantLink::with_connection(connection, requests);
    let link_task = tokio::spawn(link.run());

    let mut registry = SessionRegistry::new(backend);
    for interface in &cli.interfaces {
        attach(&mut registry, interface, true, cli.json);
    }
    for interface in &cli.wired {
        attach(&mut registry, interface, false, cli.json);
    }

    let scan_interval = (cli.scan_interval > 0).then(|| Duration::from_secs(cli.scan_interval));
    let mut events = EventHandler::new(link_rx, scan_interval);

    // ── Main event loop ───────────────────────────────────────────────
    loop {
        let Some(event) = events.next().await else { break };
        match event {
            MonitorEvent::Link(LinkEvent::Interface { interface, event }) => {
                registry.handle_backend_event(&interface, event);
                maybe_apply_connect(&mut registry, &connect_config, connect_interface.as_deref());
            }
            MonitorEvent::Link(LinkEvent::InterfaceDiscovered { interface }) => {
                // Interfaces the supplicant announces on its own are taken
                // to be wireless; wired ones only attach via --wired.
                if cli.watch && registry.session(&interface).is_none() {
                    info!("{interface}: announced by supplicant, attaching");
                    attach(&mut registry, &interface, true, cli.json);
                }
            }
            MonitorEvent::Link(LinkEvent::SupplicantVanished) => {
                registry.handle_backend_gone();
            }
            MonitorEvent::Link(LinkEvent::SupplicantReturned) => {
                for interface in &cli.interfaces {
                    if registry.session(interface).is_none() {
                        attach(&mut registry, interface, true, cli.json);
                    }
                }
                for interface in &cli.wired {
                    if registry.session(interface).is_none() {
                        attach(&mut registry, interface, false, cli.json);
                    }
                }
            }
            MonitorEvent::ScanTick => {
                for interface in registry.interfaces() {
                    let Some(session) = registry.session(&interface) else {
                        continue;
                    };
                    if !session.is_ready() {
                        continue;
                    }
                    if let Err(e) = session.request_scan() {
                        debug!("{interface}: scan skipped: {e}");
                    }
                }
            }
            MonitorEvent::Shutdown => {
                info!("shutting down");
                break;
            }
        }
    }

    events.stop();
    registry.shutdown();
    // Dropping the registry closes the request channel, which stops the link
    // once it has drained the teardown requests.
    drop(registry);
    match link_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("supplicant link ended with error: {e}"),
        Err(e) => warn!("supplicant link task failed: {e}"),
    }

    info!("wpamon exiting");
    Ok(())
}

/// Register an interface and hook up the event printer.
fn attach(registry: &mut SessionRegistry, interface: &str, is_wireless: bool, json: bool) {
    match registry.create_session(interface, is_wireless) {
        Ok(session) => {
            let name = interface.to_owned();
            session.subscribe_fn(move |event: &SessionEvent| print_event(&name, event, json));
        }
        Err(e) => warn!("{interface}: attach failed: {e}"),
    }
}

/// Push the --connect settings once the target session is ready and has no
/// configuration yet. Safe to call after every event; also covers the
/// re-apply after a supplicant restart.
fn maybe_apply_connect(
    registry: &mut SessionRegistry,
    config: &Option<SupplicantConfig>,
    interface: Option<&str>,
) {
    let (Some(config), Some(interface)) = (config, interface) else {
        return;
    };
    let Some(session) = registry.session_mut(interface) else {
        return;
    };
    if !session.is_ready() || session.active_config().is_some() {
        return;
    }
    info!("{interface}: pushing connection settings for {:?}", config.ssid);
    if let Err(e) = session.apply_configuration(config.clone()) {
        warn!("{interface}: connect failed: {e}");
    }
}

// ── Event output ──────────────────────────────────────────────────────

#[derive(serde::Serialize)]
struct EventRecord<'a> {
    timestamp: chrono::DateTime<chrono::Utc>,
    interface: &'a str,
    #[serde(flatten)]
    event: &'a SessionEvent,
}

fn print_event(interface: &str, event: &SessionEvent, json: bool) {
    if json {
        let record = EventRecord {
            timestamp: chrono::Utc::now(),
            interface,
            event,
        };
        match serde_json::to_string(&record) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("event serialization failed: {e}"),
        }
    } else {
        println!(
            "{} {interface} {}",
            chrono::Utc::now().format("%H:%M:%S%.3f"),
            describe(event)
        );
    }
}

fn describe(event: &SessionEvent) -> String {
    match event {
        SessionEvent::InterfaceState {
            new_state,
            old_state,
        } => format!("interface {old_state} -> {new_state}"),
        SessionEvent::ConnectionState {
            new_state,
            old_state,
        } => format!("connection {old_state} -> {new_state}"),
        SessionEvent::ScanDone { success } => format!("scan done (success: {success})"),
        SessionEvent::BssFound(bss) => format!(
            "bss {} {:?} {} dBm {} MHz",
            bss.bssid, bss.ssid, bss.signal_dbm, bss.frequency
        ),
        SessionEvent::Error(fault) => format!("error {fault}"),
        SessionEvent::Removed => "session removed".into(),
    }
}

/// Initialize tracing. Events go to stdout, logs to stderr or the file
/// given with --log.
fn init_logging(
    log_path: &Option<String>,
    level: &str,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if let Some(path) = log_path {
        let file = match std::fs::File::create(path) {
            Ok(file) => file,
            Err(e) => {
                eprintln!("Failed to create log file {path}: {e}");
                std::process::exit(1);
            }
        };
        let (writer, guard) = tracing_appender::non_blocking(file);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        None
    }
}
