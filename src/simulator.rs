//! Synthetic CSI producer and console monitor.
//!
//! Drives a room through empty, walking, fall and lying-down phases and
//! posts one magnitude vector per tick to `/ingest`, exactly like a sensor.

use anyhow::{bail, Context, Result};
use futures_util::StreamExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::f64::consts::PI;
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::cli::SimulateArgs;

const BASE_SIGNAL: f64 = 40.0;
const FLOOR_ATTENUATION: f64 = -10.0;
const FALL_SPIKES: [f64; 3] = [20.0, -20.0, 25.0];
/// Scenario steps spent in the fall phase before lying down
const FALL_STEPS: u32 = 2;
/// Rate at which the scenario itself advances
const SCENARIO_STEPS_PER_SECOND: f64 = 3.0;

/// Room activity being simulated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    Empty,
    Walking,
    Fall,
    LyingDown,
}

pub struct CsiSimulator {
    subcarriers: usize,
    scenario: Scenario,
    fall_steps: u32,
    packets_per_step: u64,
    emitted: u64,
    rng: StdRng,
    started: Instant,
}

impl CsiSimulator {
    pub fn new(subcarriers: usize, rate_hz: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            subcarriers,
            scenario: Scenario::Empty,
            fall_steps: 0,
            packets_per_step: (rate_hz / SCENARIO_STEPS_PER_SECOND).round().max(1.0) as u64,
            emitted: 0,
            rng,
            started: Instant::now(),
        }
    }

    pub fn scenario(&self) -> Scenario {
        self.scenario
    }

    pub(crate) fn set_scenario(&mut self, scenario: Scenario) {
        self.scenario = scenario;
        self.fall_steps = 0;
    }

    /// Next packet of non-negative magnitudes
    pub fn next_packet(&mut self) -> Vec<f32> {
        let step_boundary = self.emitted % self.packets_per_step == 0;
        self.emitted += 1;

        if step_boundary && self.scenario == Scenario::Fall {
            self.fall_steps += 1;
            if self.fall_steps > FALL_STEPS {
                self.set_scenario(Scenario::LyingDown);
            }
        }

        let packet = self.generate();

        if step_boundary {
            self.advance();
        }
        packet
    }

    fn generate(&mut self) -> Vec<f32> {
        let n = self.subcarriers;
        let t = self.started.elapsed().as_secs_f64();

        (0..n)
            .map(|i| {
                let value = match self.scenario {
                    Scenario::Empty => BASE_SIGNAL + self.gaussian(0.5),
                    Scenario::Walking => {
                        let phase = if n > 1 {
                            3.0 * PI * i as f64 / (n - 1) as f64
                        } else {
                            0.0
                        };
                        BASE_SIGNAL + (phase + t * 5.0).sin() * 5.0 + self.gaussian(3.0)
                    }
                    Scenario::Fall => {
                        let spike = FALL_SPIKES[self.rng.gen_range(0..FALL_SPIKES.len())];
                        BASE_SIGNAL + spike + self.gaussian(8.0)
                    }
                    Scenario::LyingDown => BASE_SIGNAL + FLOOR_ATTENUATION + self.gaussian(0.8),
                };
                value.abs() as f32
            })
            .collect()
    }

    fn advance(&mut self) {
        let dice: u32 = self.rng.gen_range(0..=100);
        let next = match self.scenario {
            Scenario::Empty if dice > 95 => Some(Scenario::Walking),
            Scenario::Walking if dice > 96 => Some(Scenario::Fall),
            Scenario::LyingDown if dice > 90 => Some(Scenario::Walking),
            _ => None,
        };
        if let Some(next) = next {
            info!("Scenario {:?} -> {:?}", self.scenario, next);
            self.set_scenario(next);
        }
    }

    /// Box-Muller normal sample
    fn gaussian(&mut self, sigma: f64) -> f64 {
        let u1: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = self.rng.gen();
        sigma * (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }
}

/// Convert the server base URL into the monitor WebSocket URL
pub fn monitor_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!("{}/ws/monitor", ws_base)
}

/// Print every monitor message until the socket closes
pub async fn run_monitor(ws_url: String) -> Result<()> {
    let (mut stream, _) = tokio_tungstenite::connect_async(ws_url.as_str())
        .await
        .with_context(|| format!("failed to connect to {}", ws_url))?;
    info!("Connected to monitor at {}", ws_url);

    while let Some(message) = stream.next().await {
        let message = message.context("monitor stream error")?;
        if message.is_close() {
            break;
        }
        let Ok(text) = message.to_text() else { continue };
        let Ok(data) = serde_json::from_str::<Value>(text) else { continue };
        println!(
            "[{}] Prediction: {} | Confidence: {:.2} | Mag: {:.4} | Emergency: {}{}",
            data["timestamp"].as_str().unwrap_or("-"),
            data["prediction"].as_str().unwrap_or("-"),
            data["confidence"].as_f64().unwrap_or(0.0),
            data["magnitude"].as_f64().unwrap_or(0.0),
            data["is_emergency"].as_bool().unwrap_or(false),
            data["blob_id"]
                .as_str()
                .map(|id| format!(" | Blob: {}", id))
                .unwrap_or_default(),
        );
    }
    Ok(())
}

/// Post simulated packets at the configured rate
pub async fn run_producer(args: &SimulateArgs) -> Result<()> {
    if !(args.rate_hz > 0.0) {
        bail!("rate must be positive, got {}", args.rate_hz);
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;
    let url = format!("{}/ingest", args.url.trim_end_matches('/'));
    let mut simulator = CsiSimulator::new(args.subcarriers, args.rate_hz, args.seed);
    let mut ticker = interval(Duration::from_secs_f64(1.0 / args.rate_hz));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        "Starting CSI simulation: {} Hz, {} subcarriers -> {}",
        args.rate_hz, args.subcarriers, url
    );

    let mut sent = 0u64;
    while args.packets.map_or(true, |limit| sent < limit) {
        ticker.tick().await;
        let packet = simulator.next_packet();

        match client.post(&url).json(&json!({ "csi": packet })).send().await {
            Ok(response) if !response.status().is_success() => {
                let status = response.status();
                warn!(
                    "Ingest error {}: {}",
                    status,
                    response.text().await.unwrap_or_default()
                );
            }
            Ok(_) => {}
            Err(e) => warn!("Request error: {}", e),
        }
        sent += 1;
    }

    info!("Simulation finished after {} packets", sent);
    Ok(())
}

/// Run the producer, plus the monitor when requested
pub async fn run(args: SimulateArgs) -> Result<()> {
    if args.monitor {
        let ws_url = monitor_url(&args.url);
        tokio::spawn(async move {
            if let Err(e) = run_monitor(ws_url).await {
                warn!("Monitor stopped: {:#}", e);
            }
        });
        // Let the monitor attach before packets flow
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    run_producer(&args).await
}
