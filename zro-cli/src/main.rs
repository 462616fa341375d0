//! Command line program for running a router and working with `zro`
//! devices.

#[macro_use]
extern crate log;

extern crate anyhow;
extern crate clap;
extern crate colored;
extern crate linefeed;

pub mod cli;
pub mod shell;
mod util;

use colored::*;
use zro_core::{ErrorCode, RemoteError};

fn main() {
    if let Err(e) = cli::start(cli::app_matches()) {
        eprintln!("{}", report(&e));
        std::process::exit(exit_code(&e));
    }
}

/// Error reported by a device somewhere down the chain.
fn remote_error(e: &anyhow::Error) -> Option<&RemoteError> {
    e.chain().find_map(|cause| {
        if let Some(e) = cause.downcast_ref::<zro_net::Error>() {
            return e.remote();
        }
        if let Some(zro_core::Error::Remote(e)) = cause.downcast_ref::<zro_core::Error>() {
            return Some(e);
        }
        cause.downcast_ref::<RemoteError>()
    })
}

fn error_code(e: &anyhow::Error) -> Option<ErrorCode> {
    if let Some(remote) = remote_error(e) {
        return Some(remote.code);
    }
    e.chain().find_map(|cause| {
        if let Some(e) = cause.downcast_ref::<zro_net::Error>() {
            return Some(e.code());
        }
        cause.downcast_ref::<zro_core::Error>().map(|e| e.code())
    })
}

/// Renders a failure for the terminal. Errors raised by a device show
/// their code, the member they were aimed at and the device's message on
/// separate lines.
fn report(e: &anyhow::Error) -> String {
    let mut out = format!("{}{}", "error: ".red(), e);
    match remote_error(e) {
        Some(remote) => {
            let code = format!("{} ({})", remote.code, remote.code as u8);
            out.push_str(&format!("\n  code:    {}", code.yellow()));
            out.push_str(&format!("\n  target:  {}", remote.target));
            if let Some(message) = &remote.message {
                out.push_str(&format!("\n  message: {}", message));
            }
        }
        None => {
            if let Some(code) = error_code(e).filter(|c| *c != ErrorCode::Unhandled) {
                out.push_str(&format!("\n  code:    {}", code.to_string().yellow()));
            }
            for cause in e.chain().skip(1) {
                out.push_str(&format!("\n  caused by: {}", cause));
            }
        }
    }
    out
}

/// Process exit status, the wire number of the error code when there is
/// one.
fn exit_code(e: &anyhow::Error) -> i32 {
    match error_code(e) {
        Some(code) => code as i32,
        None => 1,
    }
}
