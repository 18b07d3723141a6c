use clap::{Args, Parser, Subcommand};
use std::collections::HashMap;
use tabled::Tabled;
use tabled::builder::Builder;
use topo_api::Device;

mod client;

use client::Client;

#[derive(Parser)]
#[command(name = "topo")]
#[command(about = "CLI for the topo device inventory", long_about = None)]
struct Cli {
    /// REST server address
    #[arg(short, long, env = "TOPO_SERVER", default_value = "http://localhost:5150")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List devices, or show one device
    Get {
        /// Device ID
        id: Option<String>,

        /// Include credentials and attributes
        #[arg(short, long)]
        verbose: bool,

        /// Omit the header row
        #[arg(long)]
        no_headers: bool,
    },

    /// Add a new device
    Add {
        /// Device ID
        id: String,

        #[command(flatten)]
        device: DeviceArgs,
    },

    /// Update fields of an existing device
    Update {
        /// Device ID
        id: String,

        #[command(flatten)]
        device: DeviceArgs,
    },

    /// Remove a device
    Remove {
        /// Device ID
        id: String,

        /// Only remove if the device is still at this revision
        #[arg(long)]
        revision: Option<u64>,
    },

    /// Stream device changes until interrupted
    Watch {
        /// Only show events for this device
        id: Option<String>,

        /// Include credentials
        #[arg(short, long)]
        verbose: bool,

        /// Omit the header row
        #[arg(long)]
        no_headers: bool,
    },
}

#[derive(Args)]
struct DeviceArgs {
    /// Device type
    #[arg(short = 't', long = "type")]
    device_type: Option<String>,

    /// Device role
    #[arg(short, long)]
    role: Option<String>,

    /// Target name (defaults to the device ID)
    #[arg(short = 'g', long)]
    target: Option<String>,

    /// Device address (host:port)
    #[arg(short, long)]
    address: Option<String>,

    /// Login user
    #[arg(short, long)]
    user: Option<String>,

    /// Login password
    #[arg(short, long)]
    password: Option<String>,

    /// Device software version
    #[arg(short, long)]
    version: Option<String>,

    /// TLS key file
    #[arg(long)]
    key: Option<String>,

    /// TLS certificate file
    #[arg(long)]
    cert: Option<String>,

    /// CA certificate file
    #[arg(long)]
    ca_cert: Option<String>,

    /// Connect over plaintext
    #[arg(long)]
    plain: bool,

    /// Skip TLS certificate verification
    #[arg(long)]
    insecure: bool,

    /// Connection timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Extra attributes (key=value, can be repeated); replaces all existing ones
    #[arg(long = "attributes", value_parser = parse_attribute)]
    attributes: Vec<(String, String)>,
}

const DEFAULT_TIMEOUT_SECS: u64 = 5;

fn parse_attribute(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or("Expected format: key=value".to_string())?;
    if key.is_empty() {
        return Err("Attribute key must not be empty".to_string());
    }
    Ok((key.to_string(), value.to_string()))
}

impl DeviceArgs {
    /// Build a new device. Type and version are mandatory here.
    fn into_new_device(self, id: &str) -> Result<Device, String> {
        let Some(device_type) = self.device_type.clone() else {
            return Err("--type is required".to_string());
        };
        let Some(version) = self.version.clone() else {
            return Err("--version is required".to_string());
        };

        let mut device = Device::new(id);
        device.device_type = device_type;
        device.version = version;
        device.target = id.to_string();
        device.timeout_ms = Some(DEFAULT_TIMEOUT_SECS * 1000);
        self.apply(&mut device);
        Ok(device)
    }

    /// Overwrite only the fields given on the command line.
    fn apply(self, device: &mut Device) {
        if let Some(device_type) = self.device_type {
            device.device_type = device_type;
        }
        if let Some(role) = self.role {
            device.role = role;
        }
        if let Some(target) = self.target {
            device.target = target;
        }
        if let Some(address) = self.address {
            device.address = address;
        }
        if let Some(user) = self.user {
            device.credentials.user = user;
        }
        if let Some(password) = self.password {
            device.credentials.password = password;
        }
        if let Some(version) = self.version {
            device.version = version;
        }
        if let Some(key) = self.key {
            device.tls.key = key;
        }
        if let Some(cert) = self.cert {
            device.tls.cert = cert;
        }
        if let Some(ca_cert) = self.ca_cert {
            device.tls.ca_cert = ca_cert;
        }
        if self.plain {
            device.tls.plain = true;
        }
        if self.insecure {
            device.tls.insecure = true;
        }
        if let Some(timeout) = self.timeout {
            device.timeout_ms = Some(timeout * 1000);
        }
        if !self.attributes.is_empty() {
            device.attributes = self.attributes.into_iter().collect();
        }
    }
}

// =============================================================================
// Output
// =============================================================================

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "ADDRESS")]
    address: String,
    #[tabled(rename = "VERSION")]
    version: String,
    #[tabled(rename = "STATE")]
    state: String,
}

#[derive(Tabled)]
struct VerboseDeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "ADDRESS")]
    address: String,
    #[tabled(rename = "VERSION")]
    version: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "USER")]
    user: String,
    #[tabled(rename = "PASSWORD")]
    password: String,
    #[tabled(rename = "ATTRIBUTES")]
    attributes: String,
}

#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "EVENT")]
    event: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "ADDRESS")]
    address: String,
    #[tabled(rename = "VERSION")]
    version: String,
}

#[derive(Tabled)]
struct VerboseEventRow {
    #[tabled(rename = "EVENT")]
    event: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "ADDRESS")]
    address: String,
    #[tabled(rename = "VERSION")]
    version: String,
    #[tabled(rename = "USER")]
    user: String,
    #[tabled(rename = "PASSWORD")]
    password: String,
}

impl From<&Device> for DeviceRow {
    fn from(device: &Device) -> Self {
        Self {
            id: device.id.to_string(),
            address: device.address.clone(),
            version: device.version.clone(),
            state: device.state_summary(),
        }
    }
}

impl From<&Device> for VerboseDeviceRow {
    fn from(device: &Device) -> Self {
        Self {
            id: device.id.to_string(),
            address: device.address.clone(),
            version: device.version.clone(),
            state: device.state_summary(),
            user: device.credentials.user.clone(),
            password: device.credentials.password.clone(),
            attributes: format_attributes(&device.attributes),
        }
    }
}

fn format_attributes(attributes: &HashMap<String, String>) -> String {
    let mut pairs: Vec<_> = attributes
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    pairs.sort();
    pairs.join("\n")
}

/// Render rows as a table, optionally without the header row.
fn render<T: Tabled>(rows: &[T], headers: bool) -> String {
    let mut builder = Builder::default();
    if headers {
        builder.push_record(T::headers().into_iter().map(|h| h.into_owned()));
    }
    for row in rows {
        builder.push_record(row.fields().into_iter().map(|f| f.into_owned()));
    }
    builder.build().to_string()
}

fn print_device(device: &Device, verbose: bool) {
    println!("ID:       {}", device.id);
    println!("Type:     {}", device.device_type);
    println!("Role:     {}", or_dash(&device.role));
    println!("Target:   {}", or_dash(&device.target));
    println!("Address:  {}", device.address);
    println!("Version:  {}", device.version);
    println!("Revision: {}", device.revision);
    if let Some(timeout) = device.timeout_ms {
        println!("Timeout:  {}ms", timeout);
    }
    if device.tls.plain {
        println!("TLS:      plaintext");
    } else if device.tls.insecure {
        println!("TLS:      insecure");
    }
    if !device.protocols.is_empty() {
        println!("State:");
        for line in device.state_summary().lines() {
            println!("  {}", line);
        }
    }
    if verbose {
        println!("User:     {}", or_dash(&device.credentials.user));
        println!("Password: {}", or_dash(&device.credentials.password));
        if !device.attributes.is_empty() {
            println!("Attributes:");
            for line in format_attributes(&device.attributes).lines() {
                println!("  {}", line);
            }
        }
    }
}

fn or_dash(s: &str) -> &str {
    if s.is_empty() { "-" } else { s }
}

async fn watch(
    client: &Client,
    id: Option<String>,
    verbose: bool,
    no_headers: bool,
) -> client::Result<()> {
    let mut reader = client.events(true).await?;
    let mut headers = !no_headers;

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = reader.next_event() => event?,
        };
        let Some(event) = event else {
            eprintln!("Event stream closed by server");
            break;
        };
        if id.as_deref().is_some_and(|id| id != event.device.id.as_str()) {
            continue;
        }

        let device = &event.device;
        let table = if verbose {
            render(
                &[VerboseEventRow {
                    event: event.event_type.to_string(),
                    id: device.id.to_string(),
                    address: device.address.clone(),
                    version: device.version.clone(),
                    user: device.credentials.user.clone(),
                    password: device.credentials.password.clone(),
                }],
                headers,
            )
        } else {
            render(
                &[EventRow {
                    event: event.event_type.to_string(),
                    id: device.id.to_string(),
                    address: device.address.clone(),
                    version: device.version.clone(),
                }],
                headers,
            )
        };
        println!("{}", table);
        headers = false;
    }
    Ok(())
}

async fn run(cli: Cli) -> client::Result<()> {
    let client = Client::new(&cli.server);

    match cli.command {
        Commands::Get {
            id: Some(id),
            verbose,
            ..
        } => {
            let device = client.get_device(&id).await?;
            print_device(&device, verbose);
        }

        Commands::Get {
            id: None,
            verbose,
            no_headers,
        } => {
            let devices = client.list_devices().await?;
            if devices.is_empty() {
                println!("No devices found");
            } else if verbose {
                let rows: Vec<VerboseDeviceRow> = devices.iter().map(Into::into).collect();
                println!("{}", render(&rows, !no_headers));
            } else {
                let rows: Vec<DeviceRow> = devices.iter().map(Into::into).collect();
                println!("{}", render(&rows, !no_headers));
            }
        }

        Commands::Add { id, device } => {
            let device = device.into_new_device(&id)?;
            let added = client.add_device(&device).await?;
            println!("Added device {} (revision {})", added.id, added.revision);
        }

        Commands::Update { id, device: args } => {
            let mut device = client.get_device(&id).await?;
            args.apply(&mut device);
            let updated = client.update_device(&device).await?;
            println!(
                "Updated device {} (revision {})",
                updated.id, updated.revision
            );
        }

        Commands::Remove { id, revision } => {
            let removed = client.remove_device(&id, revision).await?;
            println!("Removed device {}", removed.id);
        }

        Commands::Watch {
            id,
            verbose,
            no_headers,
        } => watch(&client, id, verbose, no_headers).await?,
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
