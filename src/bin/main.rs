//! esign-agent CLI
//!
//! Lists signature cards, signs XML and PDF documents, sets up the signer's
//! trust chain, validates signed PDFs and manages the configuration file.

use clap::{Parser, Subcommand, ValueEnum};
use esign_agent::{
    AgentConfiguration, ConfigManager, ExportFormat, PdfSignOptions, SignatureRequest,
    SigningOrchestrator, TokenPin,
};
use miette::{Context, IntoDiagnostic, Result};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "esign-agent")]
#[command(about = "Electronic signatures with PKCS#11 smart cards (XAdES-BES, PAdES)")]
#[command(long_about = "
esign-agent - local signing agent for qualified signature cards

EXAMPLES:
    # List inserted cards
    esign-agent devices

    # Sign a prescription XML with the card in slot 0
    esign-agent sign-xml recete.xml --slot 0

    # Sign a PDF with a timestamp on page 1
    esign-agent sign-pdf contract.pdf --slot 0 --page 1 --timestamp

    # Check which signatures of a PDF verify
    esign-agent validate-pdf contract-20260101120000000.pdf

ENVIRONMENT VARIABLES:
    ESIGN_PIN             Card PIN (asked for by signing commands)
    ESIGN_PKCS11_MODULE   PKCS#11 module overriding the configuration
    RUST_LOG              Logging level (debug, info, warn, error)
")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List tokens with their signing certificate
    Devices {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show the signer subject of one slot
    Subject {
        #[arg(short, long, default_value = "0")]
        slot: usize,
    },

    /// Sign an XML document as XAdES-BES
    SignXml {
        input: PathBuf,
        #[arg(short, long, default_value = "0")]
        slot: usize,
        /// Token PIN (not needed with --raw)
        #[arg(long, env = "ESIGN_PIN", hide_env_values = true, required_unless_present = "raw")]
        pin: Option<String>,
        /// Store the payload base64 encoded instead of signing
        #[arg(long)]
        raw: bool,
        /// Discard any cached session and log in again
        #[arg(long)]
        force_fresh_login: bool,
        /// Output directory (defaults to the configured one)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Sign a PDF document as PAdES
    SignPdf {
        input: PathBuf,
        #[arg(short, long, default_value = "0")]
        slot: usize,
        #[arg(long, env = "ESIGN_PIN", hide_env_values = true)]
        pin: String,
        /// Page for the signature widget (defaults to the last page)
        #[arg(long)]
        page: Option<i64>,
        #[arg(long)]
        x: Option<f32>,
        #[arg(long)]
        y: Option<f32>,
        #[arg(long)]
        width: Option<f32>,
        #[arg(long)]
        height: Option<f32>,
        #[arg(long)]
        field_name: Option<String>,
        #[arg(long)]
        signer_name: Option<String>,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        location: Option<String>,
        /// Request a signature timestamp (PAdES-T/LT)
        #[arg(long)]
        timestamp: bool,
        /// Timestamp authority overriding the configured one
        #[arg(long)]
        tsa_url: Option<String>,
        /// Skip trust chain installation after signing
        #[arg(long)]
        no_trust_setup: bool,
        #[arg(long)]
        force_fresh_login: bool,
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Discover and install the signer's trust chain
    TrustSetup {
        #[arg(short, long, default_value = "0")]
        slot: usize,
        /// Only report what is present, change nothing
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        json: bool,
    },

    /// Check the signatures of a PDF
    ValidatePdf {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Create default configuration file
    Init,

    /// Set a configuration value
    Set {
        /// Dotted key, e.g. pdf.timestamp_url
        key: String,
        value: String,
    },

    /// Export configuration
    Export {
        #[arg(short, long, value_enum, default_value = "toml")]
        format: ExportFormatArg,
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import configuration
    Import {
        file: PathBuf,
        #[arg(short, long, value_enum, default_value = "toml")]
        format: ExportFormatArg,
    },
}

#[derive(ValueEnum, Clone)]
enum ExportFormatArg {
    Toml,
    Json,
    Yaml,
}

impl From<ExportFormatArg> for ExportFormat {
    fn from(arg: ExportFormatArg) -> Self {
        match arg {
            ExportFormatArg::Toml => ExportFormat::Toml,
            ExportFormatArg::Json => ExportFormat::Json,
            ExportFormatArg::Yaml => ExportFormat::Yaml,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new().into_diagnostic()?,
    };

    match cli.command {
        Commands::Config(config_cmd) => handle_config_command(&manager, config_cmd),
        command => {
            let config = manager
                .load_or_create_default()
                .into_diagnostic()
                .wrap_err("failed to load configuration")?;
            run(command, config).await
        }
    }
}

async fn run(command: Commands, config: AgentConfiguration) -> Result<()> {
    match command {
        Commands::Devices { json } => handle_devices(config, json).await,
        Commands::Subject { slot } => {
            let orchestrator = connect(config)?;
            let subject = orchestrator.get_subject(slot).await.into_diagnostic()?;
            println!("{subject}");
            Ok(())
        }
        Commands::SignXml {
            input,
            slot,
            pin,
            raw,
            force_fresh_login,
            output_dir,
        } => {
            let document = std::fs::read(&input)
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to read {}", input.display()))?;
            let mut orchestrator = connect(config)?;
            if let Some(dir) = output_dir {
                orchestrator = orchestrator.with_output_directory(dir);
            }
            if raw {
                let outcome = orchestrator.store_raw_xml(&document).into_diagnostic()?;
                println!("Raw payload written: {}", outcome.artifact.output_path.display());
                return Ok(());
            }
            let pin = TokenPin::new(pin.unwrap_or_default()).into_diagnostic()?;
            let request =
                SignatureRequest::new(document, pin, slot).with_force_fresh_login(force_fresh_login);
            let outcome = orchestrator.sign_xml(&request, false).await.into_diagnostic()?;
            println!(
                "Signed by {}: {}",
                outcome.artifact.signer_name,
                outcome.artifact.output_path.display()
            );
            Ok(())
        }
        Commands::SignPdf {
            input,
            slot,
            pin,
            page,
            x,
            y,
            width,
            height,
            field_name,
            signer_name,
            reason,
            location,
            timestamp,
            tsa_url,
            no_trust_setup,
            force_fresh_login,
            output_dir,
        } => {
            let document = std::fs::read(&input)
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to read {}", input.display()))?;
            let options = PdfSignOptions {
                page_number: page,
                x,
                y,
                width,
                height,
                signature_field_name: field_name,
                signer_display_name: signer_name,
                reason,
                location,
                file_name: input.file_name().map(|n| n.to_string_lossy().into_owned()),
                enable_timestamp: timestamp.then_some(true),
                tsa_url,
                auto_setup_trust_chain: no_trust_setup.then_some(false),
                ..PdfSignOptions::default()
            };
            let pin = TokenPin::new(&pin).into_diagnostic()?;
            let request =
                SignatureRequest::new(document, pin, slot).with_force_fresh_login(force_fresh_login);
            let mut orchestrator = connect(config)?;
            if let Some(dir) = output_dir {
                orchestrator = orchestrator.with_output_directory(dir);
            }
            let artifact = orchestrator
                .sign_pdf(&request, &options)
                .await
                .into_diagnostic()?;
            println!(
                "Signed by {} ({}, timestamp: {}): {}",
                artifact.signer_name,
                artifact.profile.map(|p| p.to_string()).unwrap_or_default(),
                if artifact.timestamp_applied { "yes" } else { "no" },
                artifact.output_path.display()
            );
            Ok(())
        }
        Commands::TrustSetup { slot, dry_run, json } => {
            let orchestrator = connect(config)?;
            let report = orchestrator.trust_setup(slot, !dry_run).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
            } else {
                println!("{}", report.message);
                for warning in &report.warnings {
                    println!("  warning: {warning}");
                }
            }
            if report.success {
                Ok(())
            } else {
                Err(miette::miette!("trust setup failed: {}", report.message))
            }
        }
        Commands::ValidatePdf { file, json } => {
            let pdf = std::fs::read(&file)
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to read {}", file.display()))?;
            let orchestrator = connect(config)?;
            let report = orchestrator.validate_pdf(&pdf);
            if json {
                println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
            } else {
                println!("{}", report.message);
                for check in &report.signatures {
                    println!(
                        "  {}: {} | integrity {} | whole document {} | chain {}",
                        check.field_name,
                        check.signer_subject,
                        check.integrity_valid,
                        check.covers_whole_document,
                        check.chain_status
                    );
                }
            }
            Ok(())
        }
        Commands::Config(_) => Ok(()),
    }
}

fn connect(config: AgentConfiguration) -> Result<SigningOrchestrator> {
    SigningOrchestrator::from_config(config)
        .into_diagnostic()
        .wrap_err("failed to initialise the PKCS#11 token driver")
}

async fn handle_devices(config: AgentConfiguration, json: bool) -> Result<()> {
    let orchestrator = connect(config)?;
    let devices = orchestrator.list_devices().await.into_diagnostic()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&devices).into_diagnostic()?);
        return Ok(());
    }
    if devices.is_empty() {
        println!("No signature card found.");
    }
    for device in devices {
        println!("[{}] {}", device.slot_id, device.label);
        if let Some(id) = device.national_id.as_deref() {
            println!("     national id: {}", esign_agent::domain::national_id::mask_national_id(id));
        }
    }
    Ok(())
}

fn handle_config_command(manager: &ConfigManager, config_cmd: ConfigCommands) -> Result<()> {
    match config_cmd {
        ConfigCommands::Show => match manager.load() {
            Ok(config) => {
                println!("Current configuration:");
                println!(
                    "  PKCS#11 module: {}",
                    config
                        .effective_pkcs11_module()
                        .map_or_else(|| "(auto-detect)".to_string(), |p| p.display().to_string())
                );
                println!("  Output directory: {}", config.output_directory.display());
                println!("  Session retries: {}", config.retry.max_session_retries);
                println!("  Timestamp enabled: {}", config.pdf.enable_timestamp);
                println!(
                    "  Timestamp server: {}",
                    config.pdf.timestamp_url.as_deref().unwrap_or("(none)")
                );
                println!("  Server address: {}", config.server.bind_address);
                println!("  Configuration file: {}", manager.config_path().display());
            }
            Err(_) => {
                println!("No configuration file found. Use 'config init' to create one.");
            }
        },

        ConfigCommands::Init => {
            manager.load_or_create_default().into_diagnostic()?;
            println!("Configuration initialized: {}", manager.config_path().display());
        }

        ConfigCommands::Set { key, value } => {
            manager.update_value(&key, &value).into_diagnostic()?;
            println!("Configuration updated: {key} = {value}");
        }

        ConfigCommands::Export { format, output } => {
            let content = manager.export_config(format.into()).into_diagnostic()?;
            if let Some(output_path) = output {
                std::fs::write(&output_path, content).into_diagnostic()?;
                println!("Configuration exported to: {}", output_path.display());
            } else {
                println!("{content}");
            }
        }

        ConfigCommands::Import { file, format } => {
            let content = std::fs::read_to_string(&file).into_diagnostic()?;
            manager
                .import_config(&content, format.into())
                .into_diagnostic()?;
            println!("Configuration imported from: {}", file.display());
        }
    }
    Ok(())
}
