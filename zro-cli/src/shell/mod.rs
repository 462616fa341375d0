//! Interactive session with a single device.
//!
//! Each line is one request through a `DeviceProxy`. Failed requests are
//! printed and the session carries on, a timed out proxy rebuilds its
//! socket on its own.

mod compl;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use colored::*;
use linefeed::{Interface, ReadResult, Signal};
use serde_json::Value;

use zro_net::{DeviceProxy, Encoding};

use self::compl::MainCompleter;
use crate::util::{format_duration, format_value, parse_value, split_first_word};

/// Entry point for the interactive shell.
pub fn start(mut proxy: DeviceProxy, name: &str) -> Result<()> {
    let interface = Interface::new("zro")?;

    let mut members = proxy.command_list()?;
    members.extend(proxy.attribute_list()?);
    members.sort();
    interface.set_completer(Arc::new(MainCompleter {
        members: members.clone(),
    }));
    interface.set_prompt(&format!("{}> ", name))?;
    interface.set_report_signal(Signal::Interrupt, true);
    interface.set_report_signal(Signal::Quit, true);

    println!("\nConnected to {} at {}.", name.bold(), proxy.address());
    println!("See possible commands with \"help\". Exit using \"quit\" or ctrl-d.");

    loop {
        let line = match interface.read_line()? {
            ReadResult::Input(line) => line,
            // ctrl-c clears the line, ctrl-d and quit signals end the session
            ReadResult::Signal(Signal::Interrupt) => continue,
            ReadResult::Signal(_) | ReadResult::Eof => break,
        };
        if !line.trim().is_empty() {
            interface.add_history_unique(line.clone());
        }

        let (cmd, args) = split_first_word(&line);
        match cmd {
            "" => (),
            "quit" | "exit" => break,
            "help" => {
                println!("available commands:");
                println!();
                for &(cmd, help) in APP_COMMANDS {
                    println!("  {:20} - {}", cmd, help);
                }
                println!();
            }
            "history" => {
                let w = interface.lock_writer_erase()?;
                for (i, entry) in w.history().enumerate() {
                    println!("{}: {}", i, entry);
                }
            }
            "get" => report(proxy.get_value(args).map(|v| println!("{}", format_value(&v)))),
            "set" => {
                let (attr, value) = split_first_word(args);
                if value.is_empty() {
                    println!("usage: set <attribute> <value>");
                    continue;
                }
                report(proxy.set(attr, parse_value(value)));
            }
            "call" => {
                let (method, rest) = split_first_word(args);
                let call_args: Vec<Value> = rest.split_whitespace().map(parse_value).collect();
                report(proxy.call(method, call_args).map(|v| {
                    if !v.is_null() {
                        println!("{}", format_value(&v))
                    }
                }));
            }
            "callable" => report(proxy.is_callable(args).map(|c| println!("{}", c))),
            "ls" => {
                let attributes = match proxy.attribute_list() {
                    Ok(a) => a,
                    Err(e) => {
                        print_error(e);
                        continue;
                    }
                };
                for attr in attributes.iter().filter(|a| a.contains(args)) {
                    match proxy.get_value(attr) {
                        Ok(v) => println!("{:20} {}", attr, format_value(&v)),
                        Err(e) => println!("{:20} {}", attr, e.to_string().red()),
                    }
                }
            }
            "commands" => report(proxy.command_list().map(|list| {
                for name in list {
                    println!("{}", name);
                }
            })),
            "info" => report(proxy.platform_info().map(|info| {
                println!("pid {}, {} on {} ({})", info.pid, info.zro, info.os, info.arch);
                println!("started {}", info.start_time);
            })),
            "uptime" => report(proxy.uptime().map(|d| println!("{}", format_duration(d)))),
            "ping" => report(
                proxy
                    .ping()
                    .map(|d| println!("{:.3} ms", d.as_secs_f64() * 1000.0)),
            ),
            "timeout" => {
                if args.is_empty() {
                    println!("{} ms", proxy.timeout().as_millis());
                    continue;
                }
                match args.parse::<u64>() {
                    Ok(ms) => report(proxy.set_timeout(Duration::from_millis(ms))),
                    Err(e) => println!("{}", e),
                }
            }
            "encoding" => {
                if args.is_empty() {
                    println!("{}", proxy.encoding());
                    continue;
                }
                match args.parse::<Encoding>() {
                    Ok(encoding) => proxy.set_encoding(encoding),
                    Err(e) => print_error(e),
                }
            }
            // a bare member name reads it
            _ if members.iter().any(|m| m == cmd) && args.is_empty() => {
                report(proxy.get(cmd).map(|attr| match attr.into_value() {
                    Some(v) => println!("{}", format_value(&v)),
                    None => println!("<method {}>", cmd),
                }))
            }
            _ => {
                let mut candidates: Vec<&str> = APP_COMMANDS.iter().map(|&(c, _)| c).collect();
                candidates.extend(members.iter().map(|m| m.as_str()));
                match zro_core::util::suggestion(cmd, &candidates) {
                    Some(hint) => println!("couldn't recognize input: {:?}, {}", line, hint),
                    None => println!("couldn't recognize input: {:?}", line),
                }
            }
        }
    }
    Ok(())
}

fn report(result: zro_net::Result<()>) {
    if let Err(e) = result {
        print_error(e);
    }
}

fn print_error(e: zro_net::Error) {
    println!("{}{}", "error: ".red(), e);
}

pub static APP_COMMANDS: &[(&str, &str)] = &[
    ("get", "Read an attribute (`get exposure`)"),
    ("set", "Write an attribute, value as JSON (`set gain 4`)"),
    ("call", "Call a method, arguments as JSON (`call acquire 3`)"),
    ("callable", "Check whether a member is a method"),
    ("ls", "List attributes with their values, optionally filtered"),
    ("commands", "List methods"),
    ("info", "Show platform information of the device"),
    ("uptime", "Show how long the device has been running"),
    ("ping", "Measure round trip time"),
    ("timeout", "Show or set the request timeout in milliseconds"),
    ("encoding", "Show or set the encoding (msgpack or json)"),
    ("history", "Print input history"),
    ("help", "Show available commands"),
    ("quit", "Quit"),
];
