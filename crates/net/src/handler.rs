//! Request handlers
//!
//! Each request is answered from the token service and its knowledge base.
//! Authenticated requests rotate the caller's token; the replacement rides
//! back on the response.

use sensorlog_core::{Error as CoreError, ReadingPoint, Session, TokenService};
use tracing::{debug, error, warn};

use crate::protocol::{Request, Response, SensorSeries, Status};

/// Answer one request
pub(crate) async fn handle(request: Request, tokens: &TokenService) -> Response {
    match request {
        Request::Auth { user, password } => auth(tokens, &user, &password).await,
        Request::Upload {
            token,
            sensor,
            value,
            timestamp,
            points,
        } => {
            // Validate the body before spending the token
            let points = if points.is_empty() {
                match (timestamp, value) {
                    (Some(timestamp), Some(value)) => vec![ReadingPoint { timestamp, value }],
                    _ => {
                        return Response::failed(
                            Status::BadRequest,
                            "Upload needs points or a timestamp and value",
                        )
                    }
                }
            } else {
                points
            };
            upload(tokens, &token, &sensor, &points).await
        }
        Request::Query {
            token,
            sensor,
            start,
            end,
        } => {
            let start = start.unwrap_or(0.0);
            let end = end.unwrap_or(f64::MAX);
            query(tokens, &token, sensor, start, end).await
        }
    }
}

/// Map a core failure onto a client-facing response
fn failure(e: CoreError) -> Response {
    match e {
        CoreError::AuthInvalid => {
            debug!("Rejected token");
            Response::failed(Status::Forbidden, "Invalid or expired token")
        }
        CoreError::Authentication(reason) => {
            debug!(%reason, "Rejected credentials");
            Response::failed(Status::Forbidden, reason)
        }
        CoreError::NotFound(what) => {
            Response::failed(Status::NotFound, format!("{} not found", what))
        }
        other => {
            error!(error = %other, "Request failed");
            Response::failed(Status::Internal, "Internal error")
        }
    }
}

async fn authenticate(tokens: &TokenService, token: &str) -> Result<Session, Response> {
    tokens.validate(token).await.map_err(failure)
}

async fn auth(tokens: &TokenService, user: &str, password: &str) -> Response {
    if password.is_empty() {
        warn!(user, "Missing password");
        return Response::failed(Status::BadRequest, "Missing password");
    }

    match tokens.login(user, password).await {
        Ok(token) => Response::Auth {
            success: true,
            token,
        },
        Err(e) => failure(e),
    }
}

async fn upload(
    tokens: &TokenService,
    token: &str,
    sensor: &str,
    points: &[ReadingPoint],
) -> Response {
    let session = match authenticate(tokens, token).await {
        Ok(session) => session,
        Err(response) => return response,
    };

    let kb = tokens.knowledge_base();
    let mut success = true;
    for point in points {
        success &= kb
            .add_reading(&session.username, sensor, point.timestamp, point.value)
            .await;
    }

    if !success {
        warn!(user = %session.username, sensor, "Some readings were not stored");
    }
    Response::Upload {
        success,
        token: session.token,
    }
}

async fn query(
    tokens: &TokenService,
    token: &str,
    sensor: Option<String>,
    start: f64,
    end: f64,
) -> Response {
    let session = match authenticate(tokens, token).await {
        Ok(session) => session,
        Err(response) => return response,
    };

    let kb = tokens.knowledge_base();
    let names: Vec<String> = match sensor {
        Some(name) => vec![name],
        None => kb
            .get_sensors(&session.username, start, end)
            .await
            .into_iter()
            .collect(),
    };

    let mut sensors = Vec::with_capacity(names.len());
    for name in names {
        let values = kb.get_readings(&session.username, &name, start, end).await;
        sensors.push(SensorSeries { name, values });
    }

    Response::Query {
        success: true,
        token: session.token,
        sensors,
    }
}
