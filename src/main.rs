mod bluetooth;
mod config;
mod device;
mod error;
mod pairing;
mod protocol;
mod tui;

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use bluer::Address;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use bluetooth::connection::RfcommConnection;
use bluetooth::gatt::{self, Attribute};
use bluetooth::scanner::{self, BluetoothDevice};
use config::{AppConfig, RoleSetting};
use device::status::{self, BluezProbe};
use device::Speaker;
use pairing::console::ConsoleOperator;
use pairing::{PairingError, PairingOutcome, StatusProbe, StereoPairing};
use protocol::commands::{Operation, EQ_INTIMATE, EQ_OFF, EQ_OUT_LOUD, EQ_VOCALS};
use protocol::frame::hex;
use protocol::registry::{eq_preset_name, DoubleUpMode, Role, VolumeStep};
use protocol::{CommandRegistry, LwacpFrame};

#[derive(Parser)]
#[command(
    name = "boomctl",
    about = "Controller for UE Mini Boom speakers",
    after_help = "Examples:\n  boomctl list\n  boomctl status\n  boomctl stereo-setup --role left\n  boomctl raw \"64 01\"\n  boomctl raw --frame \"03 01 64 01\""
)]
struct Cli {
    /// Bluetooth address of the speaker (defaults to config, then the only paired speaker)
    #[arg(long, global = true)]
    mac: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List paired UE speakers
    List,
    /// Show connection, battery and EQ state
    Status,
    /// Read battery level
    Battery,
    /// Guided stereo pairing of two speakers
    StereoSetup {
        /// Channel for the connected speaker (prompted if omitted)
        #[arg(long, value_enum)]
        role: Option<RoleSetting>,
    },
    /// Set the speaker name (truncated to 32 bytes)
    Name { name: String },
    /// Send an unvalidated command: command id then parameters, in hex ("64 01").
    /// The speaker's reaction to unknown payloads is undefined.
    Raw {
        /// Input is a complete frame ("03 01 64 01") and must decode as one
        #[arg(long)]
        frame: bool,
        hex: String,
    },
    /// Decode a captured LWACP frame
    Decode { hex: String },
    /// Set the EQ preset
    Eq {
        #[arg(value_enum)]
        preset: EqArg,
    },
    /// Step the volume up or down
    Volume {
        #[arg(value_enum)]
        step: StepArg,
    },
    /// Set the Double Up mode
    Mode {
        #[arg(value_enum)]
        mode: ModeArg,
    },
    /// Set this speaker's stereo channel
    Role {
        #[arg(value_enum)]
        role: RoleSetting,
    },
    /// Double Up auto-reconnect
    Lock {
        #[arg(value_enum)]
        state: Switch,
    },
    /// Alert sounds
    Alerts {
        #[arg(value_enum)]
        state: Switch,
    },
    /// BLE radio
    Ble {
        #[arg(value_enum)]
        state: Switch,
    },
    /// Speaker announces its battery level audibly
    AnnounceBattery,
    /// Play the power-on sound
    PowerOnSound,
    /// Read or write a BLE characteristic
    Gatt {
        #[command(subcommand)]
        action: GattAction,
    },
    /// Interactive command menu
    Interactive,
    /// Remember the resolved speaker in the config file
    SaveConfig,
}

#[derive(Subcommand)]
enum GattAction {
    Read {
        #[arg(value_enum)]
        attribute: Attribute,
    },
    Write {
        #[arg(value_enum)]
        attribute: Attribute,
        hex: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum EqArg {
    Off,
    OutLoud,
    Intimate,
    Vocals,
}

#[derive(Clone, Copy, ValueEnum)]
enum StepArg {
    Up,
    Down,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Double,
    Stereo,
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

impl Switch {
    fn enabled(self) -> bool {
        matches!(self, Switch::On)
    }
}

fn log_file_path() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join("boomctl.log")
}

fn init_logging(cli: &Cli) -> Result<()> {
    let level = if cli.verbose { "boomctl=debug" } else { "boomctl=info" };
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(level.parse().unwrap())
        .add_directive("bluer=warn".parse().unwrap());

    // TUI mode writes to a log file to avoid corrupting the terminal
    if matches!(cli.command, Command::Interactive) {
        let log_file = std::fs::File::create(log_file_path())?;
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(log_file)
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let config = AppConfig::load();
    run(cli, config).await
}

async fn run(cli: Cli, mut config: AppConfig) -> Result<()> {
    match &cli.command {
        Command::List => return list_speakers().await,
        Command::Decode { hex: input } => return decode_frame(input),
        _ => {}
    }

    let (address, name) = resolve_address(cli.mac.as_deref(), &config).await?;
    info!("Using speaker {}", address);
    let registry = CommandRegistry::default();

    match cli.command {
        Command::List | Command::Decode { .. } => Ok(()),
        Command::Status => print_status(address, &config).await,
        Command::Battery => match status::read_battery(address).await? {
            Some(level) => {
                println!("Battery: {}%", level);
                Ok(())
            }
            None => bail!("Could not read battery. Is the speaker connected?"),
        },
        Command::StereoSetup { role } => {
            let preset = role.or(config.pairing.default_role).map(Role::from);
            stereo_setup(address, &config, preset).await
        }
        Command::Name { name } => send_one(address, &config, registry.set_name(&name)?).await,
        Command::Raw { frame, hex: input } => {
            let frame = raw_frame(&registry, &hex::parse(&input)?, frame)?;
            if registry.table().by_id(frame.command_id()).is_none() {
                warn!("Command 0x{:02X} is not in the command table", frame.command_id());
            }
            send_one(address, &config, frame).await
        }
        Command::Eq { preset } => {
            let value = match preset {
                EqArg::Off => EQ_OFF,
                EqArg::OutLoud => EQ_OUT_LOUD,
                EqArg::Intimate => EQ_INTIMATE,
                EqArg::Vocals => EQ_VOCALS,
            };
            send_one(address, &config, registry.eq_preset(value)?).await
        }
        Command::Volume { step } => {
            let step = match step {
                StepArg::Up => VolumeStep::Up,
                StepArg::Down => VolumeStep::Down,
            };
            send_one(address, &config, registry.volume(step)?).await
        }
        Command::Mode { mode } => {
            let mode = match mode {
                ModeArg::Double => DoubleUpMode::Double,
                ModeArg::Stereo => DoubleUpMode::Stereo,
            };
            send_one(address, &config, registry.double_up_mode(mode)?).await
        }
        Command::Role { role } => {
            send_one(address, &config, registry.double_up_role(role.into())?).await
        }
        Command::Lock { state } => {
            send_one(address, &config, registry.double_up_lock(Some(state.enabled()))?).await
        }
        Command::Alerts { state } => {
            send_one(address, &config, registry.sonification(state.enabled())?).await
        }
        Command::Ble { state } => {
            send_one(address, &config, registry.ble_state(state.enabled())?).await
        }
        Command::AnnounceBattery => send_one(address, &config, registry.battery_announce()?).await,
        Command::PowerOnSound => send_one(address, &config, registry.power_on_sound()?).await,
        Command::Gatt { action } => match action {
            GattAction::Read { attribute } => {
                let value = gatt::read_attribute(address, attribute).await?;
                println!("{:?}: {}", attribute, gatt::format_value(attribute, &value));
                Ok(())
            }
            GattAction::Write { attribute, hex: input } => {
                gatt::write_attribute(address, attribute, &hex::parse(&input)?).await?;
                println!("{:?} written.", attribute);
                Ok(())
            }
        },
        Command::Interactive => interactive(address, &config).await,
        Command::SaveConfig => {
            config.device_address = Some(address.to_string());
            config.device_name = name.or(config.device_name.take());
            config.save()
        }
    }
}

/// Resolve the speaker once: `--mac`, then config, then the only paired speaker.
async fn resolve_address(
    mac: Option<&str>,
    config: &AppConfig,
) -> Result<(Address, Option<String>)> {
    if let Some(resolved) = configured_address(mac, config)? {
        return Ok(resolved);
    }

    let devices = scanner::list_paired_devices(true).await?;
    let one = pick_speaker(&devices)?;
    println!("Auto-detected: {} ({})", one.name, one.address);
    Ok((one.address, Some(one.name.clone())))
}

/// Address given on the command line or stored in the config, in that order.
fn configured_address(
    mac: Option<&str>,
    config: &AppConfig,
) -> Result<Option<(Address, Option<String>)>> {
    if let Some(mac) = mac {
        return Ok(Some((parse_address(mac)?, None)));
    }
    match &config.device_address {
        Some(addr) => Ok(Some((parse_address(addr)?, config.device_name.clone()))),
        None => Ok(None),
    }
}

/// The only recognised paired speaker. Zero or several is an error.
fn pick_speaker(devices: &[BluetoothDevice]) -> Result<&BluetoothDevice> {
    match devices {
        [one] => Ok(one),
        [] => bail!("No paired UE speakers found. Pair your speaker first: bluetoothctl pair <MAC>"),
        many => {
            let list: Vec<String> = many
                .iter()
                .map(|d| format!("  {}  {}", d.address, d.name))
                .collect();
            bail!(
                "Multiple UE speakers found ({}). Specify --mac:\n{}",
                many.len(),
                list.join("\n")
            )
        }
    }
}

/// Frame for the raw surface. Without `whole_frame` the bytes are always
/// command id then params, even when they happen to look like a frame.
fn raw_frame(registry: &CommandRegistry, bytes: &[u8], whole_frame: bool) -> Result<LwacpFrame> {
    if whole_frame {
        return Ok(LwacpFrame::decode(bytes)?);
    }
    let Some((&command_id, params)) = bytes.split_first() else {
        bail!("raw command needs at least a command id");
    };
    Ok(registry.raw(command_id, params)?)
}

fn parse_address(text: &str) -> Result<Address> {
    text.parse::<Address>()
        .map_err(|_| anyhow!("invalid Bluetooth address '{}'", text))
}

async fn connect(address: Address, config: &AppConfig) -> Result<Speaker<RfcommConnection>> {
    bluetooth::open_speaker(address, config.link_settings())
        .await
        .context("Is the speaker paired and connected?")
}

async fn send_one(address: Address, config: &AppConfig, frame: LwacpFrame) -> Result<()> {
    let mut speaker = connect(address, config).await?;
    speaker.send(&frame).await?;
    println!("Sent: {}", hex::spaced(&frame.to_bytes()));
    Ok(())
}

async fn list_speakers() -> Result<()> {
    let devices = scanner::list_paired_devices(true).await?;
    if devices.is_empty() {
        println!("No paired UE speakers found.");
        println!("Pair your speaker first: bluetoothctl pair <MAC>");
        return Ok(());
    }
    println!("Found {} paired UE speaker(s):", devices.len());
    for dev in devices {
        let state = if dev.connected { "connected" } else { "" };
        println!("  {}  {}  {}", dev.address, dev.name, state);
    }
    Ok(())
}

fn decode_frame(input: &str) -> Result<()> {
    let frame = LwacpFrame::decode(&hex::parse(input)?)?;
    let name = CommandRegistry::default()
        .table()
        .by_id(frame.command_id())
        .map(|d| d.name)
        .unwrap_or("unknown");
    println!("Length:   {}", frame.total_length());
    println!("Command:  0x{:02X} ({})", frame.command_id(), name);
    println!("Params:   {}", hex::spaced(frame.params()));
    Ok(())
}

async fn print_status(address: Address, config: &AppConfig) -> Result<()> {
    let status = status::read_status(address).await?;
    let yes_no = |b: bool| if b { "yes" } else { "no" };

    println!(
        "=== {} ({}) ===",
        status.name.as_deref().unwrap_or("unknown"),
        address
    );
    if let Some(alias) = &status.alias {
        println!("  Alias:      {}", alias);
    }
    println!("  Paired:     {}", yes_no(status.paired));
    println!("  Connected:  {}", yes_no(status.connected));
    if let Some(level) = status.battery {
        println!("  Battery:    {}%", level);
    }
    if let Some(modalias) = &status.modalias {
        println!("  Modalias:   {}", modalias);
    }

    if !status.connected {
        println!("  (connect the speaker to read more parameters)");
        return Ok(());
    }

    let mut speaker = connect(address, config).await?;
    match speaker.query(Operation::EqPreset).await? {
        Some(value) => println!(
            "  EQ Preset:  {}",
            eq_preset_name(value)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Unknown ({})", value))
        ),
        None => println!("  EQ Preset:  (no answer)"),
    }
    Ok(())
}

async fn stereo_setup(address: Address, config: &AppConfig, preset: Option<Role>) -> Result<()> {
    let mut speaker = connect(address, config).await?;

    let (abort_tx, abort_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = abort_tx.send(true);
        }
    });

    let mut operator = ConsoleOperator::spawn(preset);
    let probe = BluezProbe::new(address);
    let mut workflow = StereoPairing::new(config.pairing_policy(), abort_rx);

    let result = workflow
        .run_with_retries(&mut speaker, &mut operator, Some(&probe as &dyn StatusProbe))
        .await;
    debug!(
        "Stereo setup finished in {:?} after {} timed-out attempt(s)",
        workflow.last_state(),
        workflow.attempts()
    );
    println!();
    match result {
        Ok(PairingOutcome::Completed { role }) => {
            println!(
                "Stereo setup complete! Connected speaker is {}, second speaker is {}.",
                role,
                role.complement()
            );
            Ok(())
        }
        Ok(PairingOutcome::TimedOut { attempts }) => {
            println!(
                "Pairing timed out after {} attempt(s). Run stereo-setup again to retry.",
                attempts
            );
            Ok(())
        }
        Ok(PairingOutcome::Cancelled { discovery_sent }) => {
            println!("Setup cancelled.");
            if discovery_sent {
                println!("WARNING: Speaker may still be in discovery mode. Power-cycle to reset.");
            }
            Ok(())
        }
        Err(e @ PairingError::PartialCompletion { .. }) => {
            println!("Stereo mode is set, but the role was not assigned.");
            println!("Retry only the role: boomctl role left|right");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn interactive(address: Address, config: &AppConfig) -> Result<()> {
    let mut speaker = connect(address, config).await?;
    let registry = *speaker.registry();
    let title = format!("UE Mini Boom Controller | {}", address);

    let (req_tx, req_rx) = mpsc::channel(8);
    let (rep_tx, rep_rx) = mpsc::channel(8);
    let menu = tokio::task::spawn_blocking(move || tui::run(title, registry, req_tx, rep_rx));

    // Ends when the menu drops its request sender
    tui::serve(&mut speaker, req_rx, rep_tx).await;
    menu.await.context("menu thread panicked")?
}
