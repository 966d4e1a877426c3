// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Thrift Shadow CLI
//!
//! A command-line interface for inspecting Thrift messages the way shadow
//! responses are classified.

use std::process::ExitCode;

use thrift_shadow::{inspect_message, MessageSummary, MessageType, ProtocolType, TransportType};

const HELP: &str = r#"
Thrift Shadow CLI

USAGE:
    thrift-shadow [OPTIONS] <COMMAND>

COMMANDS:
    decode      Decode one hex-encoded message and classify it

OPTIONS:
    -t, --transport <NAME>   Transport of the message: framed (default), unframed
    -p, --protocol <NAME>    Protocol of the message: binary (default)
    -h, --help               Print help information
    -V, --version            Print version information

EXAMPLES:
    # Classify a framed binary reply
    thrift-shadow decode 0000001c800100020000000470696e67000000070b00000000000004706f6e6700
"#;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("{}", HELP);
        return ExitCode::FAILURE;
    }

    match args[1].as_str() {
        "-h" | "--help" | "help" => {
            println!("{}", HELP);
            ExitCode::SUCCESS
        }
        "-V" | "--version" | "version" => {
            println!("thrift-shadow {}", thrift_shadow::VERSION);
            ExitCode::SUCCESS
        }
        "decode" => run_decode(&args[2..]),
        cmd => {
            eprintln!("Unknown command: {}", cmd);
            eprintln!("{}", HELP);
            ExitCode::FAILURE
        }
    }
}

fn parse_option(args: &[String], short: &str, long: &str) -> Option<String> {
    for i in 0..args.len() {
        if (args[i] == short || args[i] == long) && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

fn parse_hex(input: &str) -> Result<Vec<u8>, String> {
    let digits: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    let digits = digits.strip_prefix("0x").unwrap_or(&digits);

    if digits.len() % 2 != 0 {
        return Err("odd number of hex digits".to_string());
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| format!("invalid hex byte '{}'", &digits[i..i + 2]))
        })
        .collect()
}

fn verdict(summary: &MessageSummary) -> &'static str {
    match (summary.metadata.message_type, summary.success) {
        (MessageType::Reply, Some(true)) => "success",
        (MessageType::Reply, _) => "error",
        (MessageType::Exception, _) => "exception",
        (MessageType::Call, _) | (MessageType::Oneway, _) => "request",
    }
}

fn run_decode(args: &[String]) -> ExitCode {
    let transport = match parse_option(args, "-t", "--transport")
        .map(|name| name.parse::<TransportType>())
        .transpose()
    {
        Ok(transport) => transport.unwrap_or(TransportType::Framed),
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let protocol = match parse_option(args, "-p", "--protocol")
        .map(|name| name.parse::<ProtocolType>())
        .transpose()
    {
        Ok(protocol) => protocol.unwrap_or(ProtocolType::Binary),
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // The message is the last argument that is neither a flag nor a flag value
    let mut hex_arg = None;
    let mut skip = false;
    for arg in args {
        if skip {
            skip = false;
        } else if arg.starts_with('-') {
            skip = true;
        } else {
            hex_arg = Some(arg);
        }
    }

    let data = match hex_arg.map(|hex| parse_hex(hex)) {
        Some(Ok(data)) => data,
        Some(Err(e)) => {
            eprintln!("Failed to parse message: {}", e);
            return ExitCode::FAILURE;
        }
        None => {
            eprintln!("Error: hex-encoded message required");
            return ExitCode::FAILURE;
        }
    };

    match inspect_message(&data, transport, protocol) {
        Ok(Some(summary)) => {
            println!(
                "{} {} seq={} ({})",
                summary.metadata.message_type,
                summary.metadata.method_name,
                summary.metadata.sequence_id,
                verdict(&summary)
            );
            ExitCode::SUCCESS
        }
        Ok(None) => {
            eprintln!("INCOMPLETE: {} bytes do not hold a whole message", data.len());
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("INVALID: {}", e);
            ExitCode::FAILURE
        }
    }
}
