//! A minimal central system.
//!
//! Accepts every charge point, answers its requests with canned
//! responses, and optionally sends one command to each charge point as it
//! connects.
//!
//! Environment:
//! - `BIND_ADDR` (default `0.0.0.0:9220`)
//! - `SEND_COMMAND`: an action name such as `GetConfiguration` or `Reset`
//! - `SEND_PAYLOAD`: JSON payload for `SEND_COMMAND` (default `{}`)

use std::sync::atomic::{AtomicI32, Ordering};

use ocppj::prelude::*;
use serde_json::Value;
use tokio::sync::mpsc;

static NEXT_TRANSACTION_ID: AtomicI32 = AtomicI32::new(1);

// ---------------------------------------------------------------------------
// Request handling
// ---------------------------------------------------------------------------

async fn answer(
    request: Inbound<ChargePointRequest>,
    meta: RequestMetadata,
) -> Result<ChargePointResponse, BoxError> {
    let request = match request {
        Inbound::Valid(request) => request,
        Inbound::Invalid { action, .. } => {
            return Err(format!("invalid {action} from {}", meta.identity).into());
        }
    };
    tracing::info!(identity = %meta.identity, action = request.action(), "request");

    let accepted = || IdTagInfo::with_status(AuthorizationStatus::Accepted);
    let response: ChargePointResponse = match request {
        ChargePointRequest::Authorize(_) => AuthorizeResponse {
            id_tag_info: accepted(),
        }
        .into(),
        ChargePointRequest::BootNotification(_) => BootNotificationResponse {
            status: RegistrationStatus::Accepted,
            current_time: chrono::Utc::now(),
            interval: 300,
        }
        .into(),
        ChargePointRequest::DataTransfer(_) => DataTransferResponse {
            status: DataTransferStatus::UnknownVendorId,
            data: None,
        }
        .into(),
        ChargePointRequest::DiagnosticsStatusNotification(_) => {
            DiagnosticsStatusNotificationResponse {}.into()
        }
        ChargePointRequest::FirmwareStatusNotification(_) => {
            FirmwareStatusNotificationResponse {}.into()
        }
        ChargePointRequest::Heartbeat(_) => HeartbeatResponse {
            current_time: chrono::Utc::now(),
        }
        .into(),
        ChargePointRequest::MeterValues(_) => MeterValuesResponse {}.into(),
        ChargePointRequest::StartTransaction(_) => StartTransactionResponse {
            id_tag_info: accepted(),
            transaction_id: NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed),
        }
        .into(),
        ChargePointRequest::StatusNotification(_) => StatusNotificationResponse {}.into(),
        ChargePointRequest::StopTransaction(_) => StopTransactionResponse {
            id_tag_info: Some(accepted()),
        }
        .into(),
    };
    Ok(response)
}

/// The request named by `SEND_COMMAND`, if any.
fn command_from_env() -> Result<Option<CentralSystemRequest>, BoxError> {
    let Ok(action) = std::env::var("SEND_COMMAND") else {
        return Ok(None);
    };
    let payload: Value = match std::env::var("SEND_PAYLOAD") {
        Ok(raw) => serde_json::from_str(&raw)?,
        Err(_) => Value::Object(Default::default()),
    };
    Ok(Some(validate_request(&action, &payload)?))
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    ocppj::logging::init();

    let bind = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:9220".to_string());
    let command = command_from_env()?;

    let server = CentralSystem::start(CentralSystemConfig::default().bind(&bind), answer).await?;
    tracing::info!(addr = %server.local_addr(), "listening for charge points");

    let (tx, mut connected) = mpsc::unbounded_channel::<String>();
    server
        .add_connection_listener(move |identity, status| {
            tracing::info!(identity, %status, "connection status changed");
            if status == ConnectionStatus::Connected {
                let _ = tx.send(identity.to_owned());
            }
        })
        .await;

    loop {
        tokio::select! {
            Some(identity) = connected.recv() => {
                let Some(request) = command.clone() else { continue };
                match server.send_request(&identity, request).await {
                    Ok(response) => tracing::info!(%identity, ?response, "command answered"),
                    Err(error) => tracing::warn!(%identity, %error, "command failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    server.close().await;
    Ok(())
}
