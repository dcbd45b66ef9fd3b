//! Loopback demo
//!
//! Wires a sender and a receiver together over an in-memory transport,
//! pushes a few audio packets through, and reports what came out.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


mod demo;

use anyhow::Result;
use mediaflow_config::EndpointConfig;
use mediaflow_logging::{init_with_format, LogFormat};
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = EndpointConfig::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    // Initialize logging
    init_with_format(
        "rtp-endpoints-loopback",
        config.log_level(),
        LogFormat::from_name(&config.log_format),
    );

    info!(
        ssrc = config.demo_ssrc,
        packets = config.demo_packet_count,
        receive_mtu = config.receive_mtu,
        "Starting loopback demo"
    );

    let demo = demo::LoopbackDemo::new(config);
    tokio::select! {
        report = demo.run() => {
            let report = report?;
            info!(
                sent = report.packets_sent,
                received = report.packets_received,
                rtcp = report.rtcp_packets,
                "Loopback demo finished"
            );
        }
        _ = signal::ctrl_c() => {
            warn!("Shutdown signal received, abandoning demo");
        }
    }

    Ok(())
}
