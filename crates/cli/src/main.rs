use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{WrapErr as _, eyre};

use mdmsim_core::{KeychainItem, Profile};
use mdmsim_crypto::{build_csr, generate_key};
use mdmsim_device::Device;
use mdmsim_storage::{DeviceStore as _, KeychainStore as _, ProfileStore as _, SqliteStorage};

#[derive(Parser)]
#[command(name = "mdmsim")]
#[command(about = "Device-side Apple MDM enrollment simulator", long_about = None)]
struct Cli {
    /// SQLite database holding simulated device state
    #[arg(long, default_value = "mdmsim.db")]
    db: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a simulated device
    CreateDevice {
        /// Device UDID; generated when omitted
        #[arg(long)]
        udid: Option<String>,

        /// Device serial number; generated when omitted
        #[arg(long)]
        serial: Option<String>,

        /// Device computer name
        #[arg(long, default_value = "mdmsim device")]
        name: String,
    },

    /// List simulated devices
    ListDevices,

    /// List profiles installed on a device
    ListProfiles {
        #[arg(long)]
        udid: String,
    },

    /// List a device's keychain items
    ListKeychain {
        #[arg(long)]
        udid: String,
    },

    /// Build a CSR from a profile's first SCEP payload and write it as
    /// PEM
    Csr {
        #[arg(long)]
        udid: String,

        /// Profile plist file
        #[arg(long)]
        file: PathBuf,

        /// Output path
        #[arg(long, default_value = "csr.pem")]
        out: PathBuf,
    },
}

fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let store = SqliteStorage::new(&cli.db)
        .wrap_err_with(|| format!("opening database {}", cli.db))?;
    store.run_migrations()?;

    match cli.command {
        Commands::CreateDevice { udid, serial, name } => {
            let udid = udid.unwrap_or_else(|| uuid::Uuid::new_v4().to_string().to_uppercase());
            let serial = serial.unwrap_or_else(random_serial);

            let device = Device::create(store, udid, serial, name)?;
            println!(
                "created device {} (serial {})",
                device.udid(),
                device.record().serial
            );
        }

        Commands::ListDevices => {
            for udid in store.list_device_udids()? {
                let record = store.load_device(&udid)?;
                let enrollment = record
                    .mdm_profile_identifier
                    .as_deref()
                    .unwrap_or("unenrolled");
                println!("{udid}  {}  {enrollment}", record.serial);
            }
        }

        Commands::ListProfiles { udid } => {
            for profile_id in store.list_profile_ids(&udid)? {
                println!("{profile_id}");
            }
        }

        Commands::ListKeychain { udid } => {
            for item in store.list_items(&udid)? {
                match item {
                    KeychainItem::Key { uuid, key_der } => {
                        println!("{uuid}  key  ({} bytes)", key_der.len());
                    }
                    KeychainItem::Certificate { uuid, cert_der } => {
                        println!("{uuid}  certificate  ({} bytes)", cert_der.len());
                    }
                    KeychainItem::Identity {
                        uuid,
                        key_uuid,
                        certificate_uuid,
                    } => {
                        println!("{uuid}  identity  key={key_uuid} certificate={certificate_uuid}");
                    }
                }
            }
        }

        Commands::Csr { udid, file, out } => {
            let device = store.load_device(&udid)?;

            let raw = std::fs::read(&file)
                .wrap_err_with(|| format!("reading profile {}", file.display()))?;
            let profile = Profile::parse(&raw)?;
            let payload = profile
                .scep_payloads()
                .into_iter()
                .next()
                .ok_or_else(|| eyre!("profile has no SCEP payload"))?;

            let key = generate_key(payload)?;
            let csr = build_csr(payload, &device, &key)?;

            let pem = pem::encode(&pem::Pem::new("CERTIFICATE REQUEST", csr));
            std::fs::write(&out, pem)
                .wrap_err_with(|| format!("writing {}", out.display()))?;
            println!("wrote {}", out.display());
        }
    }

    Ok(())
}

fn random_serial() -> String {
    use rand::Rng as _;

    const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    (0..12)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}
