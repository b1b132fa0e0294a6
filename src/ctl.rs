//! quillctl - Quill control utility

mod ipc;

use crate::ipc::{IpcClient, IpcRequest, IpcResponse};
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;

/// Quill control utility
#[derive(Parser)]
#[command(name = "quillctl", version, about = "Control the Quill print gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Socket path
    #[arg(long, default_value = "/run/quill/quill.sock")]
    socket: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Printer administration
    Printer {
        #[command(subcommand)]
        command: PrinterCommands,
    },

    /// Class administration
    Class {
        #[command(subcommand)]
        command: ClassCommands,
    },

    /// Queue settings (printers and classes)
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },

    /// Job control
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },

    /// List printers and classes
    List,

    /// Show the default destination
    Default,

    /// Discover devices the service backends can see
    Devices {
        /// Seconds to wait for slow backends
        #[arg(short, long)]
        timeout: Option<i32>,

        /// Maximum number of devices
        #[arg(short, long)]
        limit: Option<i32>,

        /// Only run backends with these schemes
        #[arg(long = "include")]
        include_schemes: Vec<String>,

        /// Skip backends with these schemes
        #[arg(long = "exclude")]
        exclude_schemes: Vec<String>,
    },

    /// Server configuration directives
    Server {
        #[command(subcommand)]
        command: ServerCommands,
    },

    /// File transfers to and from the service
    File {
        #[command(subcommand)]
        command: FileCommands,
    },

    /// Show gateway status
    Status,
}

#[derive(Subcommand)]
enum PrinterCommands {
    /// Create or modify a printer
    Add {
        /// Printer name
        name: String,
        /// Device URI (e.g. usb://... or ipp://host/printers/x)
        uri: String,
        /// PPD name in the service database, or a local file with --file
        #[arg(long, default_value = "")]
        ppd: String,
        /// Treat the PPD argument as a local file path
        #[arg(long)]
        file: bool,
        /// Description
        #[arg(short, long)]
        info: Option<String>,
        /// Location
        #[arg(short, long)]
        location: Option<String>,
    },

    /// Delete a printer
    Delete {
        /// Printer name
        name: String,
    },

    /// Make a printer the default destination
    Default {
        /// Printer name
        name: String,
    },

    /// Start a printer
    Enable {
        /// Printer name
        name: String,
    },

    /// Stop a printer
    Disable {
        /// Printer name
        name: String,
    },

    /// Change the device a printer prints to
    Uri {
        /// Printer name
        name: String,
        /// New device URI
        uri: String,
    },

    /// Let a printer accept jobs again
    Accept {
        /// Printer name
        name: String,
    },

    /// Make a printer reject new jobs
    Reject {
        /// Printer name
        name: String,
        /// Reason shown to users
        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Rename a printer or class
    Rename {
        /// Current name
        old_name: String,
        /// New name
        new_name: String,
    },

    /// Whether a printer's device is locally attached
    IsLocal {
        /// Printer name
        name: String,
    },
}

#[derive(Subcommand)]
enum ClassCommands {
    /// Add a printer to a class (creates the class if needed)
    Add {
        /// Class name
        class: String,
        /// Printer name
        printer: String,
    },

    /// Remove a printer from a class
    Remove {
        /// Class name
        class: String,
        /// Printer name
        printer: String,
    },

    /// Delete a class
    Delete {
        /// Class name
        name: String,
    },
}

#[derive(Subcommand)]
enum QueueCommands {
    /// Set the description
    Info {
        /// Queue name
        name: String,
        /// Description text
        info: String,
    },

    /// Set the location
    Location {
        /// Queue name
        name: String,
        /// Location text
        location: String,
    },

    /// Publish or unpublish on the network
    Shared {
        /// Queue name
        name: String,
        /// true or false
        shared: bool,
    },

    /// Set the default banner pages
    JobSheets {
        /// Queue name
        name: String,
        /// Banner before the job (e.g. none, standard)
        start: String,
        /// Banner after the job
        end: String,
    },

    /// Set the error policy
    ErrorPolicy {
        /// Queue name
        name: String,
        /// Policy name (e.g. stop-printer, retry-job)
        policy: String,
    },

    /// Set the operation policy
    OpPolicy {
        /// Queue name
        name: String,
        /// Policy name
        policy: String,
    },

    /// Restrict the queue to these users (no users allows everyone)
    AllowUsers {
        /// Queue name
        name: String,
        /// User names
        users: Vec<String>,
    },

    /// Deny the queue to these users (no users denies no one)
    DenyUsers {
        /// Queue name
        name: String,
        /// User names
        users: Vec<String>,
    },

    /// Set an option default (no values deletes it)
    OptionDefault {
        /// Queue name
        name: String,
        /// Option name
        option: String,
        /// Values
        values: Vec<String>,
    },

    /// Set an option, updating the PPD default as well
    Option {
        /// Queue name
        name: String,
        /// Option name
        option: String,
        /// Values
        values: Vec<String>,
    },
}

#[derive(Subcommand)]
enum JobCommands {
    /// List jobs still queued on a printer
    List {
        /// Printer name
        printer: String,
    },

    /// Cancel a job
    Cancel {
        /// Job id
        job_id: i32,
        /// Also remove the spool files
        #[arg(long)]
        purge: bool,
        /// Act as this user
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Restart a job from the beginning
    Restart {
        /// Job id
        job_id: i32,
        /// Act as this user
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Hold a job until released
    Hold {
        /// Job id
        job_id: i32,
        /// Act as this user
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Release a held job
    Release {
        /// Job id
        job_id: i32,
        /// Act as this user
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Show whether you own a job
    Owner {
        /// Job id
        job_id: i32,
    },
}

#[derive(Subcommand)]
enum ServerCommands {
    /// Show the top-level configuration directives
    Get,

    /// Set directives (KEY=VALUE pairs)
    Set {
        /// Directives as KEY=VALUE
        settings: Vec<String>,
    },
}

#[derive(Subcommand)]
enum FileCommands {
    /// Download a service resource into a local file
    Get {
        /// Resource path (e.g. /printers/office.ppd)
        resource: String,
        /// Local file (must exist and be writable by you)
        filename: String,
    },

    /// Upload a local file to a service resource
    Put {
        /// Resource path (e.g. /admin/conf/cupsd.conf)
        resource: String,
        /// Local file
        filename: String,
    },
}

/// Run one request and print the outcome of a yes/no operation.
async fn run(client: &IpcClient, request: IpcRequest, success: &str) -> Result<()> {
    match client.send(request).await? {
        IpcResponse::Success { .. } => println!("{success}"),
        IpcResponse::Error { message } => eprintln!("Error: {message}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = IpcClient::new(&cli.socket);

    match cli.command {
        Commands::Printer { command } => match command {
            PrinterCommands::Add {
                name,
                uri,
                ppd,
                file,
                info,
                location,
            } => {
                let request = if file {
                    IpcRequest::PrinterAddWithPpdFile {
                        name: name.clone(),
                        uri,
                        ppd_filename: ppd,
                        info,
                        location,
                    }
                } else {
                    IpcRequest::PrinterAdd {
                        name: name.clone(),
                        uri,
                        ppd,
                        info,
                        location,
                    }
                };
                run(&client, request, &format!("Printer {name} configured")).await?;
            }

            PrinterCommands::Delete { name } => {
                run(
                    &client,
                    IpcRequest::PrinterDelete { name: name.clone() },
                    &format!("Printer {name} deleted"),
                )
                .await?;
            }

            PrinterCommands::Default { name } => {
                run(
                    &client,
                    IpcRequest::PrinterSetDefault { name: name.clone() },
                    &format!("{name} is now the default destination"),
                )
                .await?;
            }

            PrinterCommands::Enable { name } => {
                run(
                    &client,
                    IpcRequest::PrinterSetEnabled {
                        name: name.clone(),
                        enabled: true,
                    },
                    &format!("Printer {name} started"),
                )
                .await?;
            }

            PrinterCommands::Disable { name } => {
                run(
                    &client,
                    IpcRequest::PrinterSetEnabled {
                        name: name.clone(),
                        enabled: false,
                    },
                    &format!("Printer {name} stopped"),
                )
                .await?;
            }

            PrinterCommands::Uri { name, uri } => {
                run(
                    &client,
                    IpcRequest::PrinterSetUri {
                        name: name.clone(),
                        uri: uri.clone(),
                    },
                    &format!("Printer {name} now prints to {uri}"),
                )
                .await?;
            }

            PrinterCommands::Accept { name } => {
                run(
                    &client,
                    IpcRequest::PrinterSetAcceptJobs {
                        name: name.clone(),
                        accept: true,
                        reason: None,
                    },
                    &format!("Printer {name} is accepting jobs"),
                )
                .await?;
            }

            PrinterCommands::Reject { name, reason } => {
                run(
                    &client,
                    IpcRequest::PrinterSetAcceptJobs {
                        name: name.clone(),
                        accept: false,
                        reason,
                    },
                    &format!("Printer {name} is rejecting jobs"),
                )
                .await?;
            }

            PrinterCommands::Rename { old_name, new_name } => {
                run(
                    &client,
                    IpcRequest::QueueRename {
                        old_name: old_name.clone(),
                        new_name: new_name.clone(),
                    },
                    &format!("Renamed {old_name} to {new_name}"),
                )
                .await?;
            }

            PrinterCommands::IsLocal { name } => {
                let data = client.call(IpcRequest::PrinterIsLocal { name }).await?;
                let local = data["local"].as_bool().unwrap_or(false);
                println!("{}", if local { "local" } else { "remote" });
            }
        },

        Commands::Class { command } => match command {
            ClassCommands::Add { class, printer } => {
                run(
                    &client,
                    IpcRequest::ClassAddPrinter {
                        class: class.clone(),
                        printer: printer.clone(),
                    },
                    &format!("Printer {printer} added to class {class}"),
                )
                .await?;
            }

            ClassCommands::Remove { class, printer } => {
                run(
                    &client,
                    IpcRequest::ClassDeletePrinter {
                        class: class.clone(),
                        printer: printer.clone(),
                    },
                    &format!("Printer {printer} removed from class {class}"),
                )
                .await?;
            }

            ClassCommands::Delete { name } => {
                run(
                    &client,
                    IpcRequest::ClassDelete { name: name.clone() },
                    &format!("Class {name} deleted"),
                )
                .await?;
            }
        },

        Commands::Queue { command } => match command {
            QueueCommands::Info { name, info } => {
                run(
                    &client,
                    IpcRequest::QueueSetInfo {
                        name: name.clone(),
                        info,
                    },
                    &format!("Description of {name} updated"),
                )
                .await?;
            }

            QueueCommands::Location { name, location } => {
                run(
                    &client,
                    IpcRequest::QueueSetLocation {
                        name: name.clone(),
                        location,
                    },
                    &format!("Location of {name} updated"),
                )
                .await?;
            }

            QueueCommands::Shared { name, shared } => {
                run(
                    &client,
                    IpcRequest::QueueSetShared {
                        name: name.clone(),
                        shared,
                    },
                    &format!(
                        "{name} is {}",
                        if shared { "shared" } else { "no longer shared" }
                    ),
                )
                .await?;
            }

            QueueCommands::JobSheets { name, start, end } => {
                run(
                    &client,
                    IpcRequest::QueueSetJobSheets {
                        name: name.clone(),
                        start,
                        end,
                    },
                    &format!("Banner pages of {name} updated"),
                )
                .await?;
            }

            QueueCommands::ErrorPolicy { name, policy } => {
                run(
                    &client,
                    IpcRequest::QueueSetErrorPolicy {
                        name: name.clone(),
                        policy,
                    },
                    &format!("Error policy of {name} updated"),
                )
                .await?;
            }

            QueueCommands::OpPolicy { name, policy } => {
                run(
                    &client,
                    IpcRequest::QueueSetOpPolicy {
                        name: name.clone(),
                        policy,
                    },
                    &format!("Operation policy of {name} updated"),
                )
                .await?;
            }

            QueueCommands::AllowUsers { name, users } => {
                run(
                    &client,
                    IpcRequest::QueueSetUsersAllowed {
                        name: name.clone(),
                        users,
                    },
                    &format!("Allowed users of {name} updated"),
                )
                .await?;
            }

            QueueCommands::DenyUsers { name, users } => {
                run(
                    &client,
                    IpcRequest::QueueSetUsersDenied {
                        name: name.clone(),
                        users,
                    },
                    &format!("Denied users of {name} updated"),
                )
                .await?;
            }

            QueueCommands::OptionDefault {
                name,
                option,
                values,
            } => {
                run(
                    &client,
                    IpcRequest::QueueSetOptionDefault {
                        name: name.clone(),
                        option: option.clone(),
                        values,
                    },
                    &format!("Default for {option} on {name} updated"),
                )
                .await?;
            }

            QueueCommands::Option {
                name,
                option,
                values,
            } => {
                run(
                    &client,
                    IpcRequest::QueueSetOption {
                        name: name.clone(),
                        option: option.clone(),
                        values,
                    },
                    &format!("Option {option} on {name} updated"),
                )
                .await?;
            }
        },

        Commands::Job { command } => match command {
            JobCommands::List { printer } => {
                let data = client.call(IpcRequest::GetJobs { printer }).await?;
                let jobs = data.as_array().cloned().unwrap_or_default();
                if jobs.is_empty() {
                    println!("No jobs");
                } else {
                    for job in jobs {
                        let id = job["id"].as_i64().unwrap_or(0);
                        let state = job["state"].as_str().unwrap_or("Unknown");
                        println!("{id}: {state}");
                    }
                }
            }

            JobCommands::Cancel {
                job_id,
                purge,
                user,
            } => {
                run(
                    &client,
                    IpcRequest::JobCancel {
                        job_id,
                        purge,
                        user,
                    },
                    &format!("Job {job_id} cancelled"),
                )
                .await?;
            }

            JobCommands::Restart { job_id, user } => {
                run(
                    &client,
                    IpcRequest::JobRestart { job_id, user },
                    &format!("Job {job_id} restarted"),
                )
                .await?;
            }

            JobCommands::Hold { job_id, user } => {
                run(
                    &client,
                    IpcRequest::JobSetHoldUntil {
                        job_id,
                        hold_until: "indefinite".to_string(),
                        user,
                    },
                    &format!("Job {job_id} held"),
                )
                .await?;
            }

            JobCommands::Release { job_id, user } => {
                run(
                    &client,
                    IpcRequest::JobSetHoldUntil {
                        job_id,
                        hold_until: "no-hold".to_string(),
                        user,
                    },
                    &format!("Job {job_id} released"),
                )
                .await?;
            }

            JobCommands::Owner { job_id } => {
                let data = client.call(IpcRequest::JobGetOwnership { job_id }).await?;
                println!("{}", data["ownership"].as_str().unwrap_or("Invalid"));
            }
        },

        Commands::List => {
            let data = client.call(IpcRequest::ListDestinations).await?;
            let destinations = data.as_array().cloned().unwrap_or_default();

            println!("Destinations");
            println!("============");

            if destinations.is_empty() {
                println!("No printers or classes configured");
            } else {
                for dest in destinations {
                    let name = dest["name"].as_str().unwrap_or("?");
                    let kind = if dest["is_class"].as_bool().unwrap_or(false) {
                        "class"
                    } else {
                        "printer"
                    };
                    let mut flags = Vec::new();
                    if dest["paused"].as_bool().unwrap_or(false) {
                        flags.push("paused");
                    }
                    if !dest["accepting"].as_bool().unwrap_or(true) {
                        flags.push("rejecting");
                    }
                    if dest["shared"].as_bool().unwrap_or(false) {
                        flags.push("shared");
                    }
                    let flags = if flags.is_empty() {
                        String::new()
                    } else {
                        format!(" [{}]", flags.join(", "))
                    };
                    println!("{name} ({kind}){flags}");

                    if let Some(uri) = dest["device_uri"].as_str() {
                        println!("  Device: {uri}");
                    }
                    if let Some(info) = dest["info"].as_str() {
                        println!("  Info:   {info}");
                    }
                    if let Some(location) = dest["location"].as_str() {
                        println!("  Where:  {location}");
                    }
                }
            }
        }

        Commands::Default => {
            let data = client.call(IpcRequest::GetDefault).await?;
            match data.as_str() {
                Some(name) => println!("{name}"),
                None => println!("No default destination"),
            }
        }

        Commands::Devices {
            timeout,
            limit,
            include_schemes,
            exclude_schemes,
        } => {
            let data = client
                .call(IpcRequest::DevicesGet {
                    timeout,
                    limit,
                    include_schemes,
                    exclude_schemes,
                })
                .await?;
            let devices = data.as_array().cloned().unwrap_or_default();

            if devices.is_empty() {
                println!("No devices found");
            } else {
                for device in devices {
                    let uri = device["uri"].as_str().unwrap_or("?");
                    println!("{uri}");
                    if let Some(model) = device["make_and_model"].as_str() {
                        println!("  Model: {model}");
                    }
                    if let Some(info) = device["info"].as_str() {
                        println!("  Info:  {info}");
                    }
                    if let Some(class) = device["class"].as_str() {
                        println!("  Class: {class}");
                    }
                }
            }
        }

        Commands::Server { command } => match command {
            ServerCommands::Get => {
                let data = client.call(IpcRequest::ServerGetSettings).await?;
                let settings: BTreeMap<String, String> = serde_json::from_value(data)?;
                for (key, value) in settings {
                    println!("{key} {value}");
                }
            }

            ServerCommands::Set { settings } => {
                let mut parsed = BTreeMap::new();
                for entry in &settings {
                    match entry.split_once('=') {
                        Some((key, value)) => {
                            parsed.insert(key.to_string(), value.to_string());
                        }
                        None => {
                            eprintln!("Invalid directive {entry:?}, expected KEY=VALUE");
                            return Ok(());
                        }
                    }
                }
                run(
                    &client,
                    IpcRequest::ServerSetSettings { settings: parsed },
                    "Server settings updated",
                )
                .await?;
            }
        },

        Commands::File { command } => match command {
            FileCommands::Get { resource, filename } => {
                run(
                    &client,
                    IpcRequest::FileGet {
                        resource: resource.clone(),
                        filename: filename.clone(),
                    },
                    &format!("Saved {resource} to {filename}"),
                )
                .await?;
            }

            FileCommands::Put { resource, filename } => {
                run(
                    &client,
                    IpcRequest::FilePut {
                        resource: resource.clone(),
                        filename: filename.clone(),
                    },
                    &format!("Uploaded {filename} to {resource}"),
                )
                .await?;
            }
        },

        Commands::Status => {
            let status = client.get_status().await?;

            println!("Quill Gateway Status");
            println!("====================");
            println!("Version:     {}", status.version);
            println!(
                "Service:     {}:{}",
                status.service_host, status.service_port
            );
            println!("Last status: {}", status.last_status);
        }
    }

    Ok(())
}
