use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;

#[zbus::proxy(
    interface = "org.vigil.Access1",
    default_service = "org.vigil.Access1",
    default_path = "/org/vigil/Access1"
)]
trait Access {
    async fn detect(&self, image: &[u8], location: &str, device_id: &str) -> zbus::Result<String>;
    async fn list_unresolved(&self) -> zbus::Result<String>;
    async fn enroll(
        &self,
        source_kind: &str,
        source_id: &str,
        identity_id: &str,
        name: &str,
        email: &str,
        department: &str,
    ) -> zbus::Result<String>;
    async fn list_identities(&self) -> zbus::Result<String>;
    async fn access_logs(&self, limit: u32, identity_id: &str) -> zbus::Result<String>;
    async fn notifications(&self) -> zbus::Result<String>;
    async fn mark_notification_read(&self, id: &str) -> zbus::Result<bool>;
    async fn set_identity_active(&self, id: &str, active: bool) -> zbus::Result<bool>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "vigil", about = "Vigil access-control CLI")]
struct Cli {
    /// Talk to the daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an image file through recognition
    Detect {
        /// Image file (raw bytes or a data: URL)
        image: PathBuf,
        #[arg(short, long, default_value = "Main Entrance")]
        location: String,
        #[arg(short, long, default_value = "Terminal-001")]
        device: String,
    },
    /// List unrecognized faces awaiting review
    Unresolved,
    /// Enroll an unresolved face as a known identity
    #[command(group(ArgGroup::new("source").required(true).args(["observation", "cluster"])))]
    #[command(group(ArgGroup::new("target").required(true).args(["identity", "name"])))]
    Enroll {
        /// Observation ID to enroll
        #[arg(long)]
        observation: Option<String>,
        /// Cluster ID to enroll (uses its representative face)
        #[arg(long)]
        cluster: Option<String>,
        /// Existing identity to bind the face to
        #[arg(long)]
        identity: Option<String>,
        /// Name for a new identity
        #[arg(long)]
        name: Option<String>,
        #[arg(long, requires = "name")]
        email: Option<String>,
        #[arg(long, requires = "name")]
        department: Option<String>,
    },
    /// List enrolled identities
    Identities,
    /// Show recent access events
    Logs {
        #[arg(short, long, default_value_t = 50)]
        limit: u32,
        /// Only events for this identity
        #[arg(long)]
        identity: Option<String>,
    },
    /// Show in-app notifications
    Notifications,
    /// Mark a notification as read
    MarkRead { id: String },
    /// Activate or deactivate an identity
    SetActive {
        id: String,
        #[arg(action = clap::ArgAction::Set)]
        active: bool,
    },
    /// Show daemon status
    Status,
}

/// `VIGIL_SESSION_BUS` set to anything but "0" selects the session bus.
fn session_bus_from_env(value: Option<&str>) -> bool {
    value.is_some_and(|v| v != "0")
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw).context("daemon returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let session = cli.session || session_bus_from_env(std::env::var("VIGIL_SESSION_BUS").ok().as_deref());
    let conn = if session {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("connect to D-Bus")?;
    let proxy = AccessProxy::new(&conn)
        .await
        .context("vigild is not reachable")?;

    match cli.command {
        Commands::Detect {
            image,
            location,
            device,
        } => {
            let bytes = tokio::fs::read(&image)
                .await
                .with_context(|| format!("read {}", image.display()))?;
            tracing::debug!(path = %image.display(), bytes = bytes.len(), "sending image");
            print_json(&proxy.detect(&bytes, &location, &device).await?)?;
        }
        Commands::Unresolved => print_json(&proxy.list_unresolved().await?)?,
        Commands::Enroll {
            observation,
            cluster,
            identity,
            name,
            email,
            department,
        } => {
            let (kind, id) = match (observation, cluster) {
                (Some(id), _) => ("observation", id),
                (None, Some(id)) => ("cluster", id),
                (None, None) => bail!("--observation or --cluster is required"),
            };
            let identity = proxy
                .enroll(
                    kind,
                    &id,
                    identity.as_deref().unwrap_or_default(),
                    name.as_deref().unwrap_or_default(),
                    email.as_deref().unwrap_or_default(),
                    department.as_deref().unwrap_or_default(),
                )
                .await?;
            print_json(&identity)?;
        }
        Commands::Identities => print_json(&proxy.list_identities().await?)?,
        Commands::Logs { limit, identity } => {
            print_json(&proxy.access_logs(limit, identity.as_deref().unwrap_or_default()).await?)?
        }
        Commands::Notifications => print_json(&proxy.notifications().await?)?,
        Commands::MarkRead { id } => {
            if proxy.mark_notification_read(&id).await? {
                println!("Marked {id} as read");
            } else {
                println!("No notification {id}");
            }
        }
        Commands::SetActive { id, active } => {
            if proxy.set_identity_active(&id, active).await? {
                println!("{id}: {}", if active { "active" } else { "inactive" });
            } else {
                bail!("no identity {id}");
            }
        }
        Commands::Status => print_json(&proxy.status().await?)?,
    }

    Ok(())
}
