//! Quill - Print administration gateway
//!
//! Sits between unprivileged clients and the local CUPS-compatible print
//! service: validates everything a client sends, talks to the service with
//! the gateway's privileges, and hands files back and forth under the
//! caller's own identity.

mod config;
mod ipc;
mod ipp;
mod jobs;
mod printer;
mod rename;
mod server;
mod session;
mod transfer;
mod transport;
mod validate;

use crate::config::QuillConfig;
use crate::ipc::{DaemonStatus, IpcHandler, IpcRequest, IpcResponse, IpcServer, Peer};
use crate::session::Session;
use crate::transport::HttpChannel;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::info;

/// Quill - Print administration gateway
#[derive(Parser, Debug)]
#[command(name = "quilld", version, about)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "/etc/quill/quill.toml")]
    config: PathBuf,

    /// Socket path (overrides the configuration file)
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Debug mode
    #[arg(short, long)]
    debug: bool,
}

/// Daemon state
struct QuillState {
    config: QuillConfig,
    /// One connection, one operation at a time. Requests that impersonate
    /// the caller must never interleave with anyone else's service talk.
    session: Mutex<Session<HttpChannel>>,
}

/// Wrap an operation outcome: the caller-visible status string rides along
/// either way.
fn done(ok: bool, session: &Session<HttpChannel>) -> IpcResponse {
    if ok {
        IpcResponse::Success {
            data: serde_json::json!({ "status": session.last_status_string() }),
        }
    } else {
        IpcResponse::Error {
            message: session.last_status_string(),
        }
    }
}

fn found<T: serde::Serialize>(value: Option<T>, session: &Session<HttpChannel>) -> IpcResponse {
    match value {
        Some(value) => IpcResponse::Success {
            data: serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
        },
        None => IpcResponse::Error {
            message: session.last_status_string(),
        },
    }
}

/// Resolve a uid to a user name for requests that compare job ownership.
fn user_name_for(uid: u32) -> Option<String> {
    nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(uid))
        .ok()
        .flatten()
        .map(|u| u.name)
}

impl IpcHandler for QuillState {
    async fn handle(&self, request: IpcRequest, peer: Peer) -> IpcResponse {
        let mut s = self.session.lock().await;

        match request {
            IpcRequest::PrinterAdd {
                name,
                uri,
                ppd,
                info,
                location,
            } => {
                let ok = s
                    .printer_add(&name, &uri, &ppd, info.as_deref(), location.as_deref())
                    .await;
                done(ok, &s)
            }

            IpcRequest::PrinterAddWithPpdFile {
                name,
                uri,
                ppd_filename,
                info,
                location,
            } => {
                let ok = s
                    .printer_add_with_ppd_file(
                        &name,
                        &uri,
                        &ppd_filename,
                        info.as_deref(),
                        location.as_deref(),
                    )
                    .await;
                done(ok, &s)
            }

            IpcRequest::PrinterSetDefault { name } => {
                let ok = s.printer_set_default(&name).await;
                done(ok, &s)
            }

            IpcRequest::PrinterSetEnabled { name, enabled } => {
                let ok = s.printer_set_enabled(&name, enabled).await;
                done(ok, &s)
            }

            IpcRequest::PrinterSetUri { name, uri } => {
                let ok = s.printer_set_uri(&name, &uri).await;
                done(ok, &s)
            }

            IpcRequest::PrinterSetAcceptJobs {
                name,
                accept,
                reason,
            } => {
                let ok = s
                    .printer_set_accept_jobs(&name, accept, reason.as_deref())
                    .await;
                done(ok, &s)
            }

            IpcRequest::PrinterDelete { name } => {
                let ok = s.printer_delete(&name).await;
                done(ok, &s)
            }

            IpcRequest::QueueRename { old_name, new_name } => {
                let ok = s.queue_rename(&old_name, &new_name).await;
                done(ok, &s)
            }

            IpcRequest::ClassAddPrinter { class, printer } => {
                let ok = s.class_add_printer(&class, &printer).await;
                done(ok, &s)
            }

            IpcRequest::ClassDeletePrinter { class, printer } => {
                let ok = s.class_delete_printer(&class, &printer).await;
                done(ok, &s)
            }

            IpcRequest::ClassDelete { name } => {
                let ok = s.class_delete(&name).await;
                done(ok, &s)
            }

            IpcRequest::QueueSetInfo { name, info } => {
                let ok = s.queue_set_info(&name, &info).await;
                done(ok, &s)
            }

            IpcRequest::QueueSetLocation { name, location } => {
                let ok = s.queue_set_location(&name, &location).await;
                done(ok, &s)
            }

            IpcRequest::QueueSetShared { name, shared } => {
                let ok = s.queue_set_shared(&name, shared).await;
                done(ok, &s)
            }

            IpcRequest::QueueSetJobSheets { name, start, end } => {
                let ok = s.queue_set_job_sheets(&name, &start, &end).await;
                done(ok, &s)
            }

            IpcRequest::QueueSetErrorPolicy { name, policy } => {
                let ok = s.queue_set_error_policy(&name, &policy).await;
                done(ok, &s)
            }

            IpcRequest::QueueSetOpPolicy { name, policy } => {
                let ok = s.queue_set_op_policy(&name, &policy).await;
                done(ok, &s)
            }

            IpcRequest::QueueSetUsersAllowed { name, users } => {
                let ok = s.queue_set_users_allowed(&name, &users).await;
                done(ok, &s)
            }

            IpcRequest::QueueSetUsersDenied { name, users } => {
                let ok = s.queue_set_users_denied(&name, &users).await;
                done(ok, &s)
            }

            IpcRequest::QueueSetOptionDefault {
                name,
                option,
                values,
            } => {
                let ok = s.queue_set_option_default(&name, &option, &values).await;
                done(ok, &s)
            }

            IpcRequest::QueueSetOption {
                name,
                option,
                values,
            } => {
                let ok = s.queue_set_option(&name, &option, &values).await;
                done(ok, &s)
            }

            IpcRequest::ListDestinations => {
                let destinations = s.list_destinations().await;
                found(destinations, &s)
            }

            IpcRequest::GetDefault => {
                let name = s.default_destination().await;
                found(name, &s)
            }

            IpcRequest::IsClass { name } => {
                let is_class = s.is_class(&name).await;
                IpcResponse::Success {
                    data: serde_json::json!({ "is_class": is_class }),
                }
            }

            IpcRequest::PrinterIsLocal { name } => {
                let local = s.is_printer_local(&name).await;
                IpcResponse::Success {
                    data: serde_json::json!({ "local": local }),
                }
            }

            IpcRequest::JobCancel {
                job_id,
                purge,
                user,
            } => {
                let ok = s.job_cancel(job_id, purge, user.as_deref()).await;
                done(ok, &s)
            }

            IpcRequest::JobRestart { job_id, user } => {
                let ok = s.job_restart(job_id, user.as_deref()).await;
                done(ok, &s)
            }

            IpcRequest::JobSetHoldUntil {
                job_id,
                hold_until,
                user,
            } => {
                let ok = s
                    .job_set_hold_until(job_id, &hold_until, user.as_deref())
                    .await;
                done(ok, &s)
            }

            IpcRequest::JobGetOwnership { job_id } => match user_name_for(peer.uid) {
                Some(user) => {
                    let ownership = s.job_get_ownership(job_id, &user).await;
                    IpcResponse::Success {
                        data: serde_json::json!({ "ownership": ownership }),
                    }
                }
                None => IpcResponse::Error {
                    message: format!("unknown uid {}", peer.uid),
                },
            },

            IpcRequest::GetJobs { printer } => {
                let jobs = s.get_jobs(&printer).await;
                found(jobs, &s)
            }

            IpcRequest::FileGet { resource, filename } => {
                let ok = s.file_get(&resource, &filename, peer.uid).await;
                done(ok, &s)
            }

            IpcRequest::FilePut { resource, filename } => {
                let ok = s.file_put(&resource, &filename, peer.uid).await;
                done(ok, &s)
            }

            IpcRequest::ServerGetSettings => {
                let settings = s.server_get_settings().await;
                found(settings, &s)
            }

            IpcRequest::ServerSetSettings { settings } => {
                let ok = s.server_set_settings(&settings).await;
                done(ok, &s)
            }

            IpcRequest::DevicesGet {
                timeout,
                limit,
                include_schemes,
                exclude_schemes,
            } => {
                let devices = s
                    .devices_get(timeout, limit, &include_schemes, &exclude_schemes)
                    .await;
                found(devices, &s)
            }

            IpcRequest::GetLastStatus => IpcResponse::Success {
                data: serde_json::json!({ "status": s.last_status_string() }),
            },

            IpcRequest::GetStatus => IpcResponse::Success {
                data: serde_json::to_value(DaemonStatus {
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    service_host: self.config.cups.host.clone(),
                    service_port: self.config.cups.port,
                    last_status: s.last_status_string(),
                })
                .unwrap_or(serde_json::Value::Null),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = QuillConfig::load(&args.config)?;

    let log_level = if args.debug {
        "debug"
    } else {
        &config.daemon.log_level
    };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    info!("Quill v{} starting", env!("CARGO_PKG_VERSION"));

    let channel = HttpChannel::connect(&config.cups.host, config.cups.port)
        .await
        .with_context(|| {
            format!(
                "cannot reach print service at {}:{}",
                config.cups.host, config.cups.port
            )
        })?;
    let session = Session::new(channel, config.cups.user.clone());

    let socket_path = args
        .socket
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|| config.daemon.socket_path.clone());

    let state = QuillState {
        config,
        session: Mutex::new(session),
    };

    let server = IpcServer::new(socket_path, state);

    info!("Quill ready");
    server.run().await
}
