use clap::{Args, Parser, Subcommand};

/// CSI Sentinel - streaming fall and stillness detection
#[derive(Parser)]
#[command(name = "csi-sentinel")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the ingestion server (default)
    Serve,

    /// Stream synthetic CSI packets to a running server
    Simulate(SimulateArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Base URL of the ingestion server
    #[arg(long, env = "SENTINEL_URL", default_value = "http://localhost:8000")]
    pub url: String,

    /// Packets per second
    #[arg(long, default_value_t = 100.0)]
    pub rate_hz: f64,

    /// Features per packet; must match the server's FEATURE_DIM
    #[arg(long, default_value_t = 1026)]
    pub subcarriers: usize,

    /// Stop after this many packets
    #[arg(long)]
    pub packets: Option<u64>,

    /// Also print messages from the monitor WebSocket
    #[arg(long)]
    pub monitor: bool,

    /// Seed for reproducible scenarios
    #[arg(long)]
    pub seed: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_none() {
        let cli = Cli::parse_from(["csi-sentinel"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_simulate_args() {
        let cli = Cli::parse_from([
            "csi-sentinel",
            "simulate",
            "--rate-hz",
            "3",
            "--subcarriers",
            "30",
            "--packets",
            "10",
            "--monitor",
        ]);
        match cli.command {
            Some(Commands::Simulate(args)) => {
                assert_eq!(args.rate_hz, 3.0);
                assert_eq!(args.subcarriers, 30);
                assert_eq!(args.packets, Some(10));
                assert!(args.monitor);
            }
            _ => panic!("expected simulate command"),
        }
    }
}
