// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The HTTP control plane.
//!
//! Every starter serves a small JSON API used by its peers and by
//! operators:
//!
//! | Path | Method | Purpose |
//! |------|--------|---------|
//! | `/hello` | GET, POST | join the cluster / fetch the registry |
//! | `/goodbye` | POST | leave the cluster for good |
//! | `/process` | GET | list locally supervised engine processes |
//! | `/logs/{role}` | GET | stream the role's engine log |
//! | `/version` | GET | starter version and build |
//! | `/shutdown` | POST | stop this starter (optionally with goodbye) |
//!
//! Handlers hold the service mutex for their whole body; concurrent
//! hellos are linearized there, which is what makes port-offset
//! assignment race-free. Every error is a JSON `{"error": ...}` body.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode, header};
use serde::Serialize;
use stardb_starter_protocol::{
    ErrorResponse, GoodbyeRequest, HelloRequest, ProcessListResponse, ServerProcess, ServerRole,
    VersionResponse,
};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bootstrap::{BootstrapClient, starter_url};
use crate::engine::{ENGINE_LOG_FILE, work_dir};
use crate::error::Result;
use crate::service::Service;

/// Binds the control plane and serves it until the token is cancelled.
pub async fn serve(service: Arc<Service>, token: CancellationToken) -> Result<()> {
    let (listen_port, host_port) = {
        let state = service.state.lock().await;
        service.http_ports_locked(&state)
    };
    let addr = SocketAddr::from(([0, 0, 0, 0], listen_port));

    let svc = service.clone();
    let make_svc = make_service_fn(move |conn: &AddrStream| {
        let service = svc.clone();
        let remote = conn.remote_addr();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let service = service.clone();
                async move { Ok::<_, Infallible>(route(service, remote, req).await) }
            }))
        }
    });

    let server = match Server::try_bind(&addr) {
        Ok(builder) => builder.serve(make_svc),
        Err(e) => {
            error!(addr = %addr, error = %e, "Failed to bind control plane");
            token.cancel();
            return Err(e.into());
        }
    };

    info!(addr = %addr, announced_port = host_port, "Control plane listening");

    let shutdown_token = token.clone();
    server
        .with_graceful_shutdown(async move { shutdown_token.cancelled().await })
        .await?;
    info!("Control plane stopped");
    Ok(())
}

/// Dispatches one request.
async fn route(service: Arc<Service>, remote: SocketAddr, req: Request<Body>) -> Response<Body> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match (method.as_str(), path.as_str()) {
        ("GET", "/hello") | ("POST", "/hello") => hello(service, remote, req).await,
        ("POST", "/goodbye") => goodbye(service, req).await,
        (_, "/goodbye") => error_response(StatusCode::METHOD_NOT_ALLOWED, "POST required"),
        ("GET", "/process") => process_list(service).await,
        ("GET", "/logs/agent") => logs(service, ServerRole::Agent).await,
        ("GET", "/logs/coordinator") => logs(service, ServerRole::Coordinator).await,
        ("GET", "/logs/dbserver") => logs(service, ServerRole::DbServer).await,
        ("GET", "/version") => version(service),
        ("POST", "/shutdown") => shutdown(service, req).await,
        (_, "/shutdown") => error_response(StatusCode::METHOD_NOT_ALLOWED, "POST required"),
        _ => error_response(StatusCode::NOT_FOUND, "No such endpoint"),
    }
}

/// `/hello`: join the cluster or fetch the registry; see the bootstrap
/// protocol description in the crate docs.
async fn hello(service: Arc<Service>, remote: SocketAddr, req: Request<Body>) -> Response<Body> {
    let method = req.method().clone();
    let host_header = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = match hyper::body::to_bytes(req.into_body()).await {
        Ok(body) => body,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("Cannot read request body: {e}"),
            );
        }
    };

    let mut state = service.state.lock().await;
    debug!(remote = %remote, method = %method, "Received hello");

    // Followers redirect to the leader they know about.
    if !service.is_leader() {
        return match state.registry.leader() {
            Some(leader) => {
                let location = format!("{}/hello", starter_url(leader));
                redirect_response(&location)
            }
            None => error_response(StatusCode::BAD_REQUEST, "No leader known."),
        };
    }

    // First contact teaches the leader its own address.
    if state.registry.is_empty() {
        let own_address = if !service.cfg.own_address.is_empty() {
            service.cfg.own_address.clone()
        } else {
            host_header.as_deref().map(find_host).unwrap_or_default()
        };
        if own_address.is_empty() {
            return error_response(StatusCode::BAD_REQUEST, "Cannot deduce own address.");
        }
        service.install_self_locked(&mut state, &own_address);
    }

    if method == Method::POST {
        let hello_req: HelloRequest = match serde_json::from_slice(&body) {
            Ok(r) => r,
            Err(e) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    &format!("Cannot parse request body: {e}"),
                );
            }
        };

        if hello_req.slave_id.is_empty() {
            return error_response(StatusCode::BAD_REQUEST, "SlaveID must be set.");
        }

        let slave_addr = if hello_req.slave_address.is_empty() {
            find_host(&remote.to_string())
        } else {
            hello_req.slave_address.clone()
        };

        if !service.cfg.allow_same_data_dir
            && state
                .registry
                .same_data_dir_conflict(&slave_addr, &hello_req.data_dir, &hello_req.slave_id)
                .is_some()
        {
            return error_response(StatusCode::BAD_REQUEST, "Cannot use same directory as peer.");
        }

        if state.registry.peer_by_id(&hello_req.slave_id).is_some() {
            // A returning peer: refresh its coordinates, keep its offset.
            state.registry.update_peer(
                &hello_req.slave_id,
                &slave_addr,
                hello_req.slave_port,
                &hello_req.data_dir,
            );
            service.save_setup_locked(&state);
        } else {
            let has_agent = state.registry.len() < state.registry.agency_size();
            match state.registry.add_peer(
                &hello_req.slave_id,
                &slave_addr,
                hello_req.slave_port,
                &hello_req.data_dir,
                has_agent,
            ) {
                Ok(peer) => {
                    info!(
                        id = %peer.id,
                        address = %peer.address,
                        port_offset = peer.port_offset,
                        "Added new peer"
                    );
                }
                Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
            }
            service.save_setup_locked(&state);
            if state.registry.is_full() {
                service.trigger_running();
            }
        }
    }

    json_response(StatusCode::OK, &state.registry.snapshot())
}

/// `/goodbye`: removes a peer from the registry and persists the setup.
async fn goodbye(service: Arc<Service>, req: Request<Body>) -> Response<Body> {
    let body = match hyper::body::to_bytes(req.into_body()).await {
        Ok(body) => body,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("Cannot read request body: {e}"),
            );
        }
    };
    let goodbye_req: GoodbyeRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("Cannot parse request body: {e}"),
            );
        }
    };
    if goodbye_req.slave_id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "SlaveID must be set.");
    }

    let mut state = service.state.lock().await;
    info!(id = %goodbye_req.slave_id, "Removing peer");
    if !state.registry.remove_peer_by_id(&goodbye_req.slave_id) {
        return error_response(StatusCode::NOT_FOUND, "Unknown ID");
    }
    service.save_setup_locked(&state);

    text_response(StatusCode::OK, "BYE")
}

/// `/process`: the locally supervised engine processes.
async fn process_list(service: Arc<Service>) -> Response<Body> {
    let state = service.state.lock().await;
    let mut resp = ProcessListResponse::default();
    let mut expected = 2;

    if let Some(me) = state.registry.peer_by_id(&service.id) {
        if me.has_agent {
            expected += 1;
        }
        let table = service.processes.lock().unwrap();
        for role in ServerRole::all() {
            if let Some(info) = table.get(&role) {
                resp.servers.push(ServerProcess {
                    kind: role.as_str().to_string(),
                    ip: me.address.clone(),
                    port: service.cfg.master_port + me.port_offset + role.port_offset(),
                    pid: info.pid,
                    container_id: info.container_id.clone(),
                });
            }
        }
    }
    resp.servers_started = resp.servers.len() == expected;

    json_response(StatusCode::OK, &resp)
}

/// `/logs/{role}`: streams the role's engine log. An absent log file is
/// an empty 200; asking an agent-less peer for agent logs is a 404.
async fn logs(service: Arc<Service>, role: ServerRole) -> Response<Body> {
    let log_path = {
        let state = service.state.lock().await;

        let Some(me) = state.registry.peer_by_id(&service.id) else {
            // Not part of a cluster yet; there is nothing to log.
            return error_response(StatusCode::PRECONDITION_FAILED, "Peer not yet registered");
        };
        if role == ServerRole::Agent && !me.has_agent {
            return error_response(StatusCode::NOT_FOUND, "This peer runs no agent");
        }

        let port = service.cfg.master_port + me.port_offset + role.port_offset();
        work_dir(&service.cfg.data_dir, role, port).join(ENGINE_LOG_FILE)
    };

    debug!(path = %log_path.display(), "Fetching logs");
    match tokio::fs::File::open(&log_path).await {
        Ok(file) => {
            let stream = ReaderStream::new(file);
            let mut resp = Response::new(Body::wrap_stream(stream));
            resp.headers_mut().insert(
                header::CONTENT_TYPE,
                header::HeaderValue::from_static("text/plain"),
            );
            resp
        }
        // The engine may simply not have written anything yet.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            text_response(StatusCode::OK, "")
        }
        Err(e) => {
            error!(path = %log_path.display(), error = %e, "Failed to open log file");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

/// `/version`: version and build of this starter.
fn version(service: Arc<Service>) -> Response<Body> {
    json_response(
        StatusCode::OK,
        &VersionResponse {
            version: service.version.clone(),
            build: service.build.clone(),
        },
    )
}

/// `/shutdown`: stops this starter; `mode=goodbye` first deregisters it
/// with the leader.
async fn shutdown(service: Arc<Service>, req: Request<Body>) -> Response<Body> {
    let goodbye_mode = req
        .uri()
        .query()
        .map(|q| q.split('&').any(|kv| kv == "mode=goodbye"))
        .unwrap_or(false);

    if goodbye_mode {
        let leader = {
            let state = service.state.lock().await;
            state.registry.leader().cloned()
        };
        let Some(leader) = leader else {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "No leader known.");
        };
        let result = match BootstrapClient::new() {
            Ok(client) => client.send_goodbye(&leader, &service.id).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to send goodbye to the leader");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
        }
    }

    info!("Shutdown requested via control plane");
    service.token.cancel();
    text_response(StatusCode::OK, "OK")
}

/// Host part of a `host:port` string; understands bracketed IPv6.
pub(crate) fn find_host(host_port: &str) -> String {
    if let Some(rest) = host_port.strip_prefix('[') {
        return rest.split(']').next().unwrap_or_default().to_string();
    }
    match host_port.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => {
            host.to_string()
        }
        _ => host_port.to_string(),
    }
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(body) => respond(status, "application/json", Body::from(body)),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response<Body> {
    let body = serde_json::to_vec(&ErrorResponse::new(message)).unwrap_or_default();
    respond(status, "application/json", Body::from(body))
}

fn text_response(status: StatusCode, message: &str) -> Response<Body> {
    respond(status, "text/plain", Body::from(message.to_string()))
}

fn redirect_response(location: &str) -> Response<Body> {
    Response::builder()
        .status(StatusCode::TEMPORARY_REDIRECT)
        .header(header::LOCATION, location)
        .body(Body::empty())
        .unwrap_or_else(|_| {
            let mut resp = Response::new(Body::empty());
            *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            resp
        })
}

fn respond(status: StatusCode, content_type: &'static str, body: Body) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .body(body)
        .unwrap_or_else(|_| {
            let mut resp = Response::new(Body::empty());
            *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            resp
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_host_strips_the_port() {
        assert_eq!(find_host("10.0.0.1:8080"), "10.0.0.1");
        assert_eq!(find_host("example.com:4000"), "example.com");
    }

    #[test]
    fn find_host_keeps_portless_hosts() {
        assert_eq!(find_host("example.com"), "example.com");
        assert_eq!(find_host("10.0.0.1"), "10.0.0.1");
    }

    #[test]
    fn find_host_understands_ipv6() {
        assert_eq!(find_host("[::1]:4000"), "::1");
        assert_eq!(find_host("::1"), "::1");
        assert_eq!(find_host("2001:db8::1"), "2001:db8::1");
    }
}
