//! IPC interface for Quill
//!
//! JSON lines over a Unix socket. The caller's uid comes from the socket
//! peer credentials, never from the request body, so a client cannot ask
//! for file transfers under someone else's identity.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// IPC request types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpcRequest {
    /// Create or modify a printer from a PPD in the service database
    PrinterAdd {
        name: String,
        uri: String,
        ppd: String,
        info: Option<String>,
        location: Option<String>,
    },

    /// Create or modify a printer from a local PPD file
    PrinterAddWithPpdFile {
        name: String,
        uri: String,
        ppd_filename: String,
        info: Option<String>,
        location: Option<String>,
    },

    /// Make a printer the default destination
    PrinterSetDefault { name: String },

    /// Start or stop a printer
    PrinterSetEnabled { name: String, enabled: bool },

    /// Change the device a printer prints to
    PrinterSetUri { name: String, uri: String },

    /// Let a printer accept jobs, or reject them with an optional reason
    PrinterSetAcceptJobs {
        name: String,
        accept: bool,
        reason: Option<String>,
    },

    /// Delete a printer
    PrinterDelete { name: String },

    /// Rename a printer or class, moving jobs and memberships along
    QueueRename { old_name: String, new_name: String },

    /// Add a printer to a class, creating the class if needed
    ClassAddPrinter { class: String, printer: String },

    /// Remove a printer from a class; removing the last member removes
    /// the class
    ClassDeletePrinter { class: String, printer: String },

    /// Delete a class
    ClassDelete { name: String },

    /// Set the human-readable description
    QueueSetInfo { name: String, info: String },

    /// Set the physical location
    QueueSetLocation { name: String, location: String },

    /// Publish or unpublish the queue on the network
    QueueSetShared { name: String, shared: bool },

    /// Set the default banner pages (start, end)
    QueueSetJobSheets {
        name: String,
        start: String,
        end: String,
    },

    /// Set the error policy
    QueueSetErrorPolicy { name: String, policy: String },

    /// Set the operation policy
    QueueSetOpPolicy { name: String, policy: String },

    /// Restrict the queue to these users (empty list allows everyone)
    QueueSetUsersAllowed { name: String, users: Vec<String> },

    /// Deny the queue to these users (empty list denies no one)
    QueueSetUsersDenied { name: String, users: Vec<String> },

    /// Set (or with no values delete) an option default
    QueueSetOptionDefault {
        name: String,
        option: String,
        values: Vec<String>,
    },

    /// Set an option on the queue, rewriting the PPD default as well
    QueueSetOption {
        name: String,
        option: String,
        values: Vec<String>,
    },

    /// List printers and classes
    ListDestinations,

    /// Name of the default destination
    GetDefault,

    /// Whether a queue name is a class
    IsClass { name: String },

    /// Whether a printer's device is locally attached
    PrinterIsLocal { name: String },

    /// Cancel a job; purge also removes the spool files
    JobCancel {
        job_id: i32,
        purge: bool,
        user: Option<String>,
    },

    /// Restart a job
    JobRestart { job_id: i32, user: Option<String> },

    /// Hold or release a job
    JobSetHoldUntil {
        job_id: i32,
        hold_until: String,
        user: Option<String>,
    },

    /// Who owns a job, relative to the calling user
    JobGetOwnership { job_id: i32 },

    /// Jobs still queued on a printer
    GetJobs { printer: String },

    /// Download a service resource into a file owned by the caller
    FileGet { resource: String, filename: String },

    /// Upload a file owned by the caller to a service resource
    FilePut { resource: String, filename: String },

    /// Top-level directives of the service configuration
    ServerGetSettings,

    /// Merge directives into the service configuration
    ServerSetSettings { settings: BTreeMap<String, String> },

    /// Ask the service backends which devices they see
    DevicesGet {
        timeout: Option<i32>,
        limit: Option<i32>,
        include_schemes: Vec<String>,
        exclude_schemes: Vec<String>,
    },

    /// Status string of the last operation
    GetLastStatus,

    /// Gateway status
    GetStatus,
}

/// IPC response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum IpcResponse {
    Success { data: serde_json::Value },
    Error { message: String },
}

/// Gateway status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub version: String,
    pub service_host: String,
    pub service_port: u16,
    pub last_status: String,
}

/// Credentials of the connected client
#[derive(Debug, Clone, Copy)]
pub struct Peer {
    pub uid: u32,
}

/// IPC handler trait
pub trait IpcHandler: Send + Sync {
    fn handle(
        &self,
        request: IpcRequest,
        peer: Peer,
    ) -> impl Future<Output = IpcResponse> + Send;
}

/// IPC server
pub struct IpcServer<H: IpcHandler> {
    socket_path: String,
    handler: Arc<H>,
}

impl<H: IpcHandler + 'static> IpcServer<H> {
    pub fn new(socket_path: impl Into<String>, handler: H) -> Self {
        Self {
            socket_path: socket_path.into(),
            handler: Arc::new(handler),
        }
    }

    pub async fn run(&self) -> Result<()> {
        let _ = std::fs::remove_file(&self.socket_path);

        if let Some(parent) = std::path::Path::new(&self.socket_path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        tracing::info!("Quill IPC listening on {}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let handler = Arc::clone(&self.handler);
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, handler).await {
                            tracing::error!("Client error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                }
            }
        }
    }
}

async fn handle_client<H: IpcHandler>(stream: UnixStream, handler: Arc<H>) -> Result<()> {
    // The kernel-reported uid of the connecting process is the identity
    // used for everything the request does on the caller's behalf.
    let cred = stream.peer_cred()?;
    let peer = Peer { uid: cred.uid() };

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<IpcRequest>(&line) {
            Ok(request) => handler.handle(request, peer).await,
            Err(e) => IpcResponse::Error {
                message: format!("Invalid request: {}", e),
            },
        };

        let response_json = serde_json::to_string(&response)?;
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        line.clear();
    }

    Ok(())
}

/// IPC client
pub struct IpcClient {
    socket_path: String,
}

impl IpcClient {
    pub fn new(socket_path: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub async fn send(&self, request: IpcRequest) -> Result<IpcResponse> {
        let mut stream = UnixStream::connect(&self.socket_path).await?;

        let request_json = serde_json::to_string(&request)?;
        stream.write_all(request_json.as_bytes()).await?;
        stream.write_all(b"\n").await?;
        stream.flush().await?;

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await?;

        Ok(serde_json::from_str(&line)?)
    }

    /// Send a request and unwrap the success payload
    pub async fn call(&self, request: IpcRequest) -> Result<serde_json::Value> {
        match self.send(request).await? {
            IpcResponse::Success { data } => Ok(data),
            IpcResponse::Error { message } => Err(anyhow::anyhow!(message)),
        }
    }

    pub async fn get_status(&self) -> Result<DaemonStatus> {
        match self.send(IpcRequest::GetStatus).await? {
            IpcResponse::Success { data } => Ok(serde_json::from_value(data)?),
            IpcResponse::Error { message } => Err(anyhow::anyhow!(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let request = IpcRequest::PrinterSetEnabled {
            name: "office".into(),
            enabled: true,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(
            json,
            r#"{"type":"PrinterSetEnabled","name":"office","enabled":true}"#
        );

        let back: IpcRequest = serde_json::from_str(&json).unwrap();
        match back {
            IpcRequest::PrinterSetEnabled { name, enabled } => {
                assert_eq!(name, "office");
                assert!(enabled);
            }
            other => panic!("decoded wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_response_wire_format() {
        let ok = IpcResponse::Success {
            data: serde_json::json!({"default": "office"}),
        };
        assert_eq!(
            serde_json::to_string(&ok).unwrap(),
            r#"{"status":"Success","data":{"default":"office"}}"#
        );

        let err: IpcResponse =
            serde_json::from_str(r#"{"status":"Error","message":"no such printer"}"#).unwrap();
        match err {
            IpcResponse::Error { message } => assert_eq!(message, "no such printer"),
            other => panic!("decoded wrong variant: {other:?}"),
        }
    }
}
