/********************************************************************************
 * Copyright (c) 2026 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

use clap::Parser;
use pushgate::config::PushgateConfig;
use pushgate::{
    Coder, ConnectorEvent, HandshakeSupervisor, InboundMessage, LocalSessionRegistry, MessageType,
    NoSupervisor, PushDistributor, RouteDictionary, SchemaRegistry, SendOptions,
    StaticRouteDiscovery, Supervisor, UdpConnector,
};
use serde_json::{json, Value};
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const BIND_ROUTE: &str = "onBind";

#[derive(Debug, Parser)]
#[command(name = "configurable-pushgate")]
#[command(about = "UDP push frontend driven by a JSON5 configuration file")]
struct Args {
    /// Path to the JSON5 configuration file
    #[arg(short, long, default_value = "config/pushgate.json5")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match PushgateConfig::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            error!("unable to load configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("pushgate stopped with error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: PushgateConfig) -> Result<(), Box<dyn Error>> {
    // Handlers register their routes with the embedding application; none here.
    let discovery = StaticRouteDiscovery::new(Vec::new());
    let dictionary = Arc::new(RouteDictionary::from_discovery(
        &discovery,
        config.dictionary.user_dictionary.as_deref(),
    )?);
    let schemas = Arc::new(SchemaRegistry::load(&config.schema));
    let coder = Coder::new(dictionary, schemas.clone());

    let supervisor: Arc<dyn Supervisor> = if config.connector.handshake {
        Arc::new(HandshakeSupervisor::new(
            coder.clone(),
            config.connector.heartbeat_interval_secs,
        ))
    } else {
        Arc::new(NoSupervisor)
    };
    let (connector, mut events) = UdpConnector::new(config.connector.clone(), coder, supervisor);
    let connector = Arc::new(connector);
    let sessions = Arc::new(LocalSessionRegistry::new());
    let distributor = PushDistributor::new(
        sessions.clone(),
        connector.clone(),
        config.push.ledger_capacity,
    );

    let local_addr = connector.start().await?;
    info!("pushgate listening on {local_addr}, press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
            event = events.recv() => match event {
                Some(ConnectorEvent::Connected { id, peer }) => {
                    sessions.create(id);
                    info!("client {id} connected from {peer}");
                }
                Some(ConnectorEvent::Disconnected { id, peer }) => {
                    sessions.remove(id);
                    info!("client {id} at {peer} disconnected");
                }
                Some(ConnectorEvent::Inbound { id, message }) => {
                    on_inbound(&connector, &sessions, &distributor, id, message).await;
                }
                None => break,
            }
        }
    }

    connector.stop().await;
    schemas.stop();
    Ok(())
}

/// A body carrying a `uid` binds the sender's session; requests are acknowledged.
async fn on_inbound(
    connector: &UdpConnector,
    sessions: &LocalSessionRegistry,
    distributor: &PushDistributor,
    id: u64,
    message: InboundMessage,
) {
    debug!("client {id} sent {:?} on {}", message.kind, message.route);

    if let Some(uid) = message.body.get("uid").and_then(Value::as_str) {
        if sessions.bind(id, uid) {
            info!("client {id} bound to uid {uid}");
            let pushed = distributor
                .push_message(
                    BIND_ROUTE,
                    json!({ "uid": uid }),
                    &[uid.to_string()],
                    SendOptions::default(),
                )
                .await;
            if let Err(err) = pushed {
                warn!("bind notification for {uid} failed: {err}");
            }
        }
    }

    if message.kind == MessageType::Request {
        let options = SendOptions {
            request_id: message.id,
        };
        let ack = json!({ "code": 200 });
        let target = [id];
        if let Err(err) = connector
            .send(None, &message.route, &ack, Some(&target[..]), options)
            .await
        {
            warn!("unable to answer request {} from client {id}: {err}", message.id);
        }
    }
}
