//! `busmonitor`: print the group telegrams seen through a KNXnet/IP gateway.

use std::io::IsTerminal;
use std::process::ExitCode;

use clap::Parser;

use knx_listener::protocol::KNXNETIP_DEFAULT_PORT;
use knx_listener::{
    validate_ipv4, validate_port, BusEvent, BusListener, ErrorCode, Ipv4Addr, ListenerOptions,
    Query, TunnelTimings,
};

#[derive(Debug, Parser)]
#[command(
    name = "busmonitor",
    version,
    about = "Listen to a KNX bus through a KNXnet/IP gateway",
    after_help = "Example: busmonitor -s 10.10.10.2"
)]
struct Cli {
    /// Remote ip address
    #[arg(short, long, env = "KNX_GATEWAY_IP", value_parser = parse_server)]
    server: Ipv4Addr,

    /// Remote port number
    #[arg(short, long, env = "KNX_GATEWAY_PORT", default_value_t = KNXNETIP_DEFAULT_PORT, value_parser = validate_port)]
    port: u16,

    /// Seconds to retry, 0 - fail on first attempt
    #[arg(short, long, default_value_t = 0)]
    timeout: u32,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    log_level: String,
}

impl Cli {
    fn retry_delay_ms(&self) -> u32 {
        self.timeout.saturating_mul(1000)
    }
}

fn parse_server(s: &str) -> Result<Ipv4Addr, String> {
    if !validate_ipv4(s) {
        return Err(format!("Invalid ip address {s}"));
    }
    s.parse().map_err(|_| format!("Invalid ip address {s}"))
}

/// `[ OK ]` / `[ FAIL ]` tags on stderr.
#[derive(Debug, Clone, Copy)]
struct Painter {
    color: bool,
}

impl Painter {
    const GREEN: &'static str = "\x1b[32m";
    const RED: &'static str = "\x1b[31m";
    const RESET: &'static str = "\x1b[0m";

    fn detect() -> Self {
        let no_color = std::env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty());
        Self {
            color: !no_color && std::io::stderr().is_terminal(),
        }
    }

    fn tag(self, color: &str, label: &str) -> String {
        if self.color {
            format!("{color}[ {label} ]{}", Self::RESET)
        } else {
            format!("[ {label} ]")
        }
    }

    fn ok_line(self, query: &Query) -> String {
        format!("{} {query}", self.tag(Self::GREEN, "OK"))
    }

    fn fail_line(self, code: ErrorCode) -> String {
        format!("{} Error ocurred while connecting {code}", self.tag(Self::RED, "FAIL"))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level)).init();

    println!("Listening {}:{}", cli.server, cli.port);

    let painter = Painter::detect();
    let listener = BusListener::new();
    let mut events = listener.subscribe();
    let options = ListenerOptions::new(cli.retry_delay_ms())
        .timings(TunnelTimings::from_env())
        .on_failure(move |e| eprintln!("{}", painter.fail_line(e.code())));

    tokio::select! {
        result = listener.bind(cli.server, cli.port, options) => {
            if let Err(e) = result {
                log::error!("Could not listen on {}:{}: {}", cli.server, cli.port, e);
                listener.disconnect().await;
                return ExitCode::FAILURE;
            }
        }
        _ = tokio::signal::ctrl_c() => {
            listener.disconnect().await;
            return ExitCode::SUCCESS;
        }
    }

    let monitor = async {
        while let Some(event) = events.recv().await {
            match event {
                BusEvent::Query(query) => eprintln!("{}", painter.ok_line(&query)),
                BusEvent::Closed => break,
                other => log::debug!("{other:?}"),
            }
        }
    };

    tokio::select! {
        () = monitor => {}
        _ = tokio::signal::ctrl_c() => log::info!("Interrupted"),
    }
    listener.disconnect().await;
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let cli = Cli::try_parse_from(["busmonitor", "-s", "10.10.10.2"]).unwrap();
        assert_eq!(cli.server, Ipv4Addr::new(10, 10, 10, 2));
        assert_eq!(cli.port, 3671);
        assert_eq!(cli.retry_delay_ms(), 0);
        assert_eq!(cli.log_level, "warn");
    }

    #[test]
    fn test_parse_timeout_seconds() {
        let cli = Cli::try_parse_from(["busmonitor", "-s", "10.10.10.2", "-p", "3700", "-t", "5"]).unwrap();
        assert_eq!(cli.port, 3700);
        assert_eq!(cli.retry_delay_ms(), 5000);

        let cli = Cli::try_parse_from(["busmonitor", "-s", "10.10.10.2", "-t", "4294967"]).unwrap();
        assert_eq!(cli.retry_delay_ms(), 4_294_967_000);
        let cli = Cli::try_parse_from(["busmonitor", "-s", "10.10.10.2", "-t", "4294968"]).unwrap();
        assert_eq!(cli.retry_delay_ms(), u32::MAX);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Cli::try_parse_from(["busmonitor", "-s", "10.10.10"]).is_err());
        assert!(Cli::try_parse_from(["busmonitor", "-s", "10.10.10.256"]).is_err());
        assert!(Cli::try_parse_from(["busmonitor", "-s", "10.10.10.2", "-p", "65536"]).is_err());
    }

    #[test]
    fn test_output_lines() {
        let plain = Painter { color: false };
        let query = Query {
            action: knx_listener::Action::Write,
            dest: 0x0A03,
            data: heapless::Vec::from_slice(&[0x0C, 0xFF]).unwrap(),
        };
        assert_eq!(plain.ok_line(&query), "[ OK ] write data 0c:ff to 1/2/3");
        assert_eq!(
            plain.fail_line(ErrorCode::ConnectRejected(0x24)),
            "[ FAIL ] Error ocurred while connecting CONNECT_REJECTED(0x24)"
        );

        let colored = Painter { color: true };
        assert_eq!(colored.ok_line(&query), "\x1b[32m[ OK ]\x1b[0m write data 0c:ff to 1/2/3");
    }
}
