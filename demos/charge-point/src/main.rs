//! A minimal charge point.
//!
//! Boots, reports its connector available, then sends heartbeats at the
//! interval the central system asks for. Answers a handful of
//! central-system commands.
//!
//! Environment:
//! - `STATION_ID` (default `CP1`)
//! - `CENTRAL_SYSTEM_URL` (default `ws://127.0.0.1:9220/ocpp`)

use std::time::Duration;

use ocppj::prelude::*;

// ---------------------------------------------------------------------------
// Request handling
// ---------------------------------------------------------------------------

async fn answer(
    request: Inbound<CentralSystemRequest>,
    meta: RequestMetadata,
) -> Result<CentralSystemResponse, BoxError> {
    let Some(request) = request.valid() else {
        return Err("invalid request".into());
    };
    tracing::info!(identity = %meta.identity, action = request.action(), "command");

    let response: CentralSystemResponse = match request {
        CentralSystemRequest::GetConfiguration(_) => GetConfigurationResponse {
            configuration_key: Some(vec![KeyValue {
                key: CiString50::new("HeartbeatInterval")?,
                readonly: false,
                value: Some(CiString500::new("300")?),
            }]),
            unknown_key: None,
        }
        .into(),
        CentralSystemRequest::ClearCache(_) => ClearCacheResponse {
            status: AcceptanceStatus::Accepted,
        }
        .into(),
        CentralSystemRequest::Reset(_) => ResetResponse {
            status: AcceptanceStatus::Accepted,
        }
        .into(),
        CentralSystemRequest::ChangeAvailability(_) => ChangeAvailabilityResponse {
            status: AvailabilityStatus::Accepted,
        }
        .into(),
        CentralSystemRequest::RemoteStartTransaction(_) => RemoteStartTransactionResponse {
            status: AcceptanceStatus::Rejected,
        }
        .into(),
        CentralSystemRequest::TriggerMessage(_) => TriggerMessageResponse {
            status: TriggerMessageStatus::NotImplemented,
        }
        .into(),
        other => return Err(format!("{} not supported", other.action()).into()),
    };
    Ok(response)
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    ocppj::logging::init();

    let identity = std::env::var("STATION_ID").unwrap_or_else(|_| "CP1".to_string());
    let url = std::env::var("CENTRAL_SYSTEM_URL")
        .unwrap_or_else(|_| "ws://127.0.0.1:9220/ocpp".to_string());

    let cp = ChargePoint::connect(&url, &identity, answer, ChargePointConfig::default()).await?;

    let boot = BootNotificationRequest {
        charge_point_vendor: "ocppj".parse()?,
        charge_point_model: "demo".parse()?,
        charge_point_serial_number: None,
        charge_box_serial_number: None,
        firmware_version: None,
        iccid: None,
        imsi: None,
        meter_type: None,
        meter_serial_number: None,
    };
    let interval = match cp.send_request(boot.into()).await? {
        ChargePointResponse::BootNotification(response) => {
            tracing::info!(status = ?response.status, interval = response.interval, "booted");
            Duration::from_secs(u64::try_from(response.interval).unwrap_or(0).max(10))
        }
        other => return Err(format!("unexpected {} response to boot", other.action()).into()),
    };

    cp.send_request(
        StatusNotificationRequest {
            connector_id: 1,
            error_code: ChargePointErrorCode::NoError,
            info: None,
            status: ChargePointStatus::Available,
            timestamp: Some(chrono::Utc::now()),
            vendor_id: None,
            vendor_error_code: None,
        }
        .into(),
    )
    .await?;

    let mut heartbeat = tokio::time::interval(interval);
    heartbeat.tick().await;
    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                match cp.send_request(HeartbeatRequest {}.into()).await {
                    Ok(response) => tracing::debug!(?response, "heartbeat"),
                    Err(RequestError::ConnectionClosed) => break,
                    Err(error) => tracing::warn!(%error, "heartbeat failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
        if !cp.is_connected() {
            break;
        }
    }

    cp.close().await;
    Ok(())
}
