// Copyright 2025 Corpusgate Contributors
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

use anyhow::Result;
use clap::Parser;
use corpusgate_server::config::GatewayConfig;
use corpusgate_server::run_server;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "corpusgate")]
#[command(about = "Protocol gateway exposing tenant-scoped document search to AI agents")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listening port (overrides config file and environment).
    #[arg(short, long)]
    port: Option<u16>,

    /// Externally reachable base URL (overrides config file and environment).
    #[arg(long)]
    public_base_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "corpusgate=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = GatewayConfig::load(args.config)?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(base_url) = args.public_base_url {
        config.server.public_base_url = base_url;
    }

    run_server(config).await
}
