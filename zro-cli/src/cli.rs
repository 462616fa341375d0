//! Application definition.

use std::env;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Error, Result};
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use serde_json::Value;

use zro_core::DeviceEntry;
use zro_net::{Config, Context, DeviceManager, DeviceProxy, Ping, Router};

use crate::shell;
use crate::util::{format_duration, format_value, parse_value};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

/// Registry used when neither `--registry` nor the environment name one.
pub const DEFAULT_REGISTRY: &str = "devices.json";
pub const REGISTRY_ENV: &str = "ZRO_REGISTRY";

pub fn app<'a, 'b>() -> App<'a, 'b> {
    App::new("zro")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .setting(AppSettings::VersionlessSubcommands)
        .version(VERSION)
        .author(AUTHORS)
        .about("Run a message router and talk to zro devices from the command line.")
        .arg(Arg::with_name("verbosity")
            .long("verbosity")
            .short("v")
            .takes_value(true)
            .default_value("info")
            .value_name("verb")
            .global(true)
            .help("Set the verbosity of the log output"))
        .arg(Arg::with_name("config")
            .long("config")
            .short("c")
            .takes_value(true)
            .value_name("path")
            .global(true)
            .help("Path to a TOML configuration file"))
        .arg(Arg::with_name("registry")
            .long("registry")
            .short("r")
            .takes_value(true)
            .value_name("path")
            .global(true)
            .help("Path to the JSON device registry (defaults to $ZRO_REGISTRY, \
                then ./devices.json)"))
        .arg(Arg::with_name("timeout")
            .long("timeout")
            .short("t")
            .takes_value(true)
            .value_name("ms")
            .global(true)
            .help("Request timeout in milliseconds"))

        // router subcommand
        .subcommand(SubCommand::with_name("router")
            .display_order(10)
            .about("Run a message router until interrupted")
            .arg(Arg::with_name("ip")
                .long("ip")
                .takes_value(true)
                .value_name("ip")
                .help("Interface to bind on (default: all)"))
            .arg(Arg::with_name("port")
                .long("port")
                .short("p")
                .takes_value(true)
                .value_name("port")
                .help("Port to bind on (default: derived from the user name)")))

        // devices subcommand
        .subcommand(SubCommand::with_name("devices")
            .display_order(20)
            .setting(AppSettings::SubcommandRequiredElseHelp)
            .about("List and edit the device registry")
            .subcommand(SubCommand::with_name("list")
                .about("List registered devices")
                .arg(Arg::with_name("ip")
                    .long("ip")
                    .takes_value(true)
                    .value_name("filter")
                    .help("Only devices whose ip contains this"))
                .arg(Arg::with_name("name")
                    .long("name")
                    .takes_value(true)
                    .value_name("filter")
                    .help("Only devices whose name contains this")))
            .subcommand(SubCommand::with_name("add")
                .about("Register a device")
                .arg(Arg::with_name("name").required(true).value_name("name"))
                .arg(Arg::with_name("ip").required(true).value_name("ip"))
                .arg(Arg::with_name("rep-port").required(true).value_name("rep-port"))
                .arg(Arg::with_name("pub-port")
                    .long("pub-port")
                    .takes_value(true)
                    .value_name("port"))
                .arg(Arg::with_name("push-port")
                    .long("push-port")
                    .takes_value(true)
                    .value_name("port"))
                .arg(Arg::with_name("pull-port")
                    .long("pull-port")
                    .takes_value(true)
                    .value_name("port")))
            .subcommand(SubCommand::with_name("remove")
                .about("Remove a device from the registry")
                .arg(Arg::with_name("name").required(true).value_name("name"))))

        // ping subcommand
        .subcommand(SubCommand::with_name("ping")
            .display_order(30)
            .about("Measure round trip times to devices")
            .arg(Arg::with_name("name")
                .value_name("name")
                .required_unless("all")
                .help("Name of the device"))
            .arg(Arg::with_name("all")
                .long("all")
                .short("a")
                .help("Ping every registered device"))
            .arg(Arg::with_name("attempts")
                .long("attempts")
                .short("n")
                .takes_value(true)
                .default_value("3")
                .value_name("count")))

        .subcommand(SubCommand::with_name("info")
            .display_order(31)
            .about("Show platform information and uptime of a device")
            .arg(Arg::with_name("name").required(true).value_name("name")))
        .subcommand(SubCommand::with_name("commands")
            .display_order(32)
            .about("List the methods and attributes of a device")
            .arg(Arg::with_name("name").required(true).value_name("name")))
        .subcommand(SubCommand::with_name("get")
            .display_order(40)
            .about("Read an attribute")
            .arg(Arg::with_name("name").required(true).value_name("name"))
            .arg(Arg::with_name("attribute").required(true).value_name("attribute")))
        .subcommand(SubCommand::with_name("set")
            .display_order(41)
            .about("Write an attribute")
            .arg(Arg::with_name("name").required(true).value_name("name"))
            .arg(Arg::with_name("attribute").required(true).value_name("attribute"))
            .arg(Arg::with_name("value")
                .required(true)
                .value_name("json")
                .help("New value, as JSON (bare words are taken as strings)")))
        .subcommand(SubCommand::with_name("call")
            .display_order(42)
            .about("Call a method")
            .arg(Arg::with_name("name").required(true).value_name("name"))
            .arg(Arg::with_name("method").required(true).value_name("method"))
            .arg(Arg::with_name("args")
                .multiple(true)
                .value_name("json")
                .help("Positional arguments, as JSON")))

        // shell subcommand
        .subcommand(SubCommand::with_name("shell")
            .display_order(50)
            .about("Start an interactive session with a device")
            .arg(Arg::with_name("name").required(true).value_name("name")))
}

pub fn app_matches() -> ArgMatches<'static> {
    app().get_matches()
}

/// Runs based on specified subcommand.
pub fn start(matches: ArgMatches) -> Result<()> {
    match matches.subcommand() {
        ("router", Some(m)) => start_router(m),
        ("devices", Some(m)) => start_devices(m),
        ("ping", Some(m)) => start_ping(m),
        ("info", Some(m)) => start_info(m),
        ("commands", Some(m)) => start_commands(m),
        ("get", Some(m)) => start_get(m),
        ("set", Some(m)) => start_set(m),
        ("call", Some(m)) => start_call(m),
        ("shell", Some(m)) => start_shell(m),
        _ => Ok(()),
    }
}

fn start_router(matches: &ArgMatches) -> Result<()> {
    setup_log_verbosity(matches);
    let mut config = load_config(matches)?.router;
    if let Some(ip) = matches.value_of("ip") {
        config.ip = ip.to_string();
    }
    if let Some(port) = matches.value_of("port") {
        config.port = Some(port.parse()?);
    }

    let ctx = Context::new();
    let mut router = Router::new(&ctx, config)?;
    println!("Router listening on port {}", router.port());

    // run a loop allowing graceful shutdown
    let shutdown = router.shutdown_handle();
    ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::SeqCst);
    })?;
    router.run_forever()?;
    println!("Router stopped.");
    Ok(())
}

fn start_devices(matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        ("list", Some(m)) => {
            setup_log_verbosity(m);
            let manager = manager(m)?;
            let devices = manager.get_devices(
                m.value_of("ip").unwrap_or(""),
                m.value_of("name").unwrap_or(""),
            );
            if devices.is_empty() {
                println!("No devices registered.");
            }
            for device in devices {
                let ports: Vec<String> = device
                    .ports()
                    .into_iter()
                    .map(|(role, port)| format!("{}={}", role, port))
                    .collect();
                println!("{:20} {:16} {}", device.name.bold(), device.ip, ports.join(" "));
            }
            Ok(())
        }
        ("add", Some(m)) => {
            setup_log_verbosity(m);
            let mut manager = manager(m)?;
            let mut entry = DeviceEntry::new(
                required(m, "name")?,
                required(m, "ip")?,
                required(m, "rep-port")?.parse()?,
            );
            if let Some(port) = m.value_of("pub-port") {
                entry = entry.with_pub_port(port.parse()?);
            }
            if let Some(port) = m.value_of("push-port") {
                entry = entry.with_push_port(port.parse()?);
            }
            if let Some(port) = m.value_of("pull-port") {
                entry = entry.with_pull_port(port.parse()?);
            }
            let name = entry.name.clone();
            manager.add_device(entry)?;
            println!("Added {}.", name);
            Ok(())
        }
        ("remove", Some(m)) => {
            setup_log_verbosity(m);
            let mut manager = manager(m)?;
            let entry = manager.remove_device(required(m, "name")?)?;
            println!("Removed {}.", entry.name);
            Ok(())
        }
        _ => Err(Error::msg("failed to get devices subcommand")),
    }
}

fn start_ping(matches: &ArgMatches) -> Result<()> {
    setup_log_verbosity(matches);
    let manager = manager(matches)?;
    let timeout = timeout(matches)?;
    let attempts: u32 = required(matches, "attempts")?.parse()?;

    let pings = match matches.value_of("name") {
        Some(name) if !matches.is_present("all") => {
            let entry = manager.get_device_info(name)?;
            let mut pings = std::collections::BTreeMap::new();
            pings.insert(entry.name.clone(), manager.ping_device(name, timeout, attempts)?);
            pings
        }
        _ => manager.ping_all_devices(timeout, attempts)?,
    };
    for (name, ping) in pings {
        let status = match ping {
            Ping::Latency(_) => ping.to_string().green(),
            Ping::Unreachable => ping.to_string().red(),
        };
        println!("{:20} {}", name, status);
    }
    Ok(())
}

fn start_info(matches: &ArgMatches) -> Result<()> {
    setup_log_verbosity(matches);
    let mut proxy = proxy(matches)?;
    let info = proxy.platform_info()?;
    let uptime = proxy.uptime()?;
    println!("address     {}", proxy.address());
    println!("uptime      {}", format_duration(uptime));
    println!("started     {}", info.start_time);
    println!("pid         {}", info.pid);
    println!("os          {} ({}, {})", info.os, info.os_family, info.arch);
    println!("zro         {} ({})", info.zro, info.build);
    println!("zmq         {}", info.zmq);
    Ok(())
}

fn start_commands(matches: &ArgMatches) -> Result<()> {
    setup_log_verbosity(matches);
    let mut proxy = proxy(matches)?;
    println!("{}", "methods:".bold());
    for name in proxy.command_list()? {
        println!("  {}", name);
    }
    println!("{}", "attributes:".bold());
    for name in proxy.attribute_list()? {
        println!("  {}", name);
    }
    Ok(())
}

fn start_get(matches: &ArgMatches) -> Result<()> {
    setup_log_verbosity(matches);
    let mut proxy = proxy(matches)?;
    let value = proxy.get_value(required(matches, "attribute")?)?;
    println!("{}", format_value(&value));
    Ok(())
}

fn start_set(matches: &ArgMatches) -> Result<()> {
    setup_log_verbosity(matches);
    let mut proxy = proxy(matches)?;
    let value = parse_value(required(matches, "value")?);
    proxy.set(required(matches, "attribute")?, value)?;
    Ok(())
}

fn start_call(matches: &ArgMatches) -> Result<()> {
    setup_log_verbosity(matches);
    let mut proxy = proxy(matches)?;
    let args: Vec<Value> = matches
        .values_of("args")
        .map(|values| values.map(parse_value).collect())
        .unwrap_or_default();
    let result = proxy.call(required(matches, "method")?, args)?;
    if !result.is_null() {
        println!("{}", format_value(&result));
    }
    Ok(())
}

fn start_shell(matches: &ArgMatches) -> Result<()> {
    setup_log_verbosity(matches);
    let name = required(matches, "name")?;
    let proxy = proxy(matches)?;
    shell::start(proxy, name)
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str> {
    matches
        .value_of(name)
        .ok_or_else(|| Error::msg(format!("missing argument: {}", name)))
}

fn load_config(matches: &ArgMatches) -> Result<Config> {
    match matches.value_of("config") {
        Some(path) => {
            debug!("loading config from {}", path);
            Ok(Config::from_toml_file(path)?)
        }
        None => Ok(Config::default()),
    }
}

fn registry_path(matches: &ArgMatches) -> PathBuf {
    match matches.value_of("registry") {
        Some(path) => PathBuf::from(path),
        None => env::var(REGISTRY_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_REGISTRY)),
    }
}

fn timeout(matches: &ArgMatches) -> Result<Duration> {
    match matches.value_of("timeout") {
        Some(ms) => Ok(Duration::from_millis(ms.parse()?)),
        None => Ok(load_config(matches)?.proxy.timeout()),
    }
}

fn manager(matches: &ArgMatches) -> Result<DeviceManager> {
    let path = registry_path(matches);
    debug!("using registry at {:?}", path);
    Ok(DeviceManager::load(&Context::new(), path)?)
}

/// Proxy for the device named by the `name` argument.
fn proxy(matches: &ArgMatches) -> Result<DeviceProxy> {
    let manager = manager(matches)?;
    let mut proxy = manager.get_proxy(required(matches, "name")?, timeout(matches)?)?;
    proxy.set_encoding(load_config(matches)?.proxy.encoding);
    Ok(proxy)
}

fn setup_log_verbosity(matches: &ArgMatches) {
    use simplelog::{LevelFilter, TermLogger};
    let level_filter = match matches.value_of("verbosity") {
        Some(s) => match s {
            "0" | "none" => LevelFilter::Off,
            "1" | "err" | "error" | "min" => LevelFilter::Error,
            "2" | "warn" | "warning" | "default" => LevelFilter::Warn,
            "3" | "info" => LevelFilter::Info,
            "4" | "debug" => LevelFilter::Debug,
            "5" | "trace" | "max" | "all" => LevelFilter::Trace,
            _ => LevelFilter::Warn,
        },
        _ => LevelFilter::Warn,
    };
    let mut config_builder = simplelog::ConfigBuilder::new();
    let logger_conf = config_builder
        .set_time_level(LevelFilter::Error)
        .set_target_level(LevelFilter::Debug)
        .set_location_level(LevelFilter::Trace)
        .set_time_format_str("%H:%M:%S%.6f")
        .build();
    let _ = TermLogger::init(level_filter, logger_conf, simplelog::TerminalMode::Mixed);
}
