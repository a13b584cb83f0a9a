use clap::{Parser, Subcommand};
use skygate_core::config::Config;
use skygate_core::registry::{PassengerRegistry, RegistrationFields};
use skygate_core::watch::WatchEvent;
use skygate_core::{Identification, Recognizer};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "skygate")]
#[command(about = "Passenger face recognition for security checkpoints", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new passenger
    Register {
        /// Passenger display name
        name: String,
        /// Departure location
        #[arg(long)]
        from: String,
        /// Destination
        #[arg(long)]
        to: String,
        /// Contact information
        #[arg(long)]
        contact: String,
        /// Email address
        #[arg(long)]
        email: String,
        /// Path to the passenger's face image
        #[arg(long)]
        image: PathBuf,
    },
    /// Capture one frame and identify the passenger in it
    Identify,
    /// Run continuous recognition until Ctrl-C
    Watch,
    /// List registered passengers
    List,
    /// Remove a registered passenger
    Remove {
        /// Passenger display name
        name: String,
    },
    /// Capture a snapshot from the camera
    Snapshot {
        /// Output file path
        output: String,
    },
    /// Show configuration
    Config {
        /// Validate configuration
        #[arg(long)]
        validate: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    match cli.command {
        Commands::Register {
            name,
            from,
            to,
            contact,
            email,
            image,
        } => cmd_register(name, from, to, contact, email, image),
        Commands::Identify => cmd_identify(),
        Commands::Watch => cmd_watch(),
        Commands::List => cmd_list(),
        Commands::Remove { name } => cmd_remove(name),
        Commands::Snapshot { output } => cmd_snapshot(output),
        Commands::Config { validate } => cmd_config(validate),
    }
}

fn registry_from(config: &Config) -> PassengerRegistry {
    PassengerRegistry::new(&config.registry.data_file, &config.gallery.passenger_dir)
}

fn cmd_register(
    name: String,
    from: String,
    to: String,
    contact: String,
    email: String,
    image: PathBuf,
) -> anyhow::Result<()> {
    let config = Config::load()?;
    let registry = registry_from(&config);

    let record = registry.register(
        &name,
        RegistrationFields {
            origin: &from,
            destination: &to,
            contact: &contact,
            email: &email,
        },
        &image,
    )?;

    println!("Passenger {} registered successfully!", name);
    println!(
        "Image saved as {}",
        config.gallery.passenger_dir.join(&record.image).display()
    );

    Ok(())
}

fn cmd_identify() -> anyhow::Result<()> {
    let config = Config::load()?;
    let registry = registry_from(&config);
    let mut recognizer = Recognizer::new(config)?;

    println!("Look at the camera...");

    match recognizer.identify()? {
        Identification::Match(matched) => {
            println!(
                "Face identified: {} (similarity {:.3})",
                matched.identity, matched.similarity
            );
            print_passenger_details(&registry, &matched.identity);
        }
        Identification::NoMatch => {
            println!("Face detected, but no match found.");
        }
        Identification::NoFace => {
            println!("No face detected in the captured frame.");
        }
    }

    Ok(())
}

fn cmd_watch() -> anyhow::Result<()> {
    let config = Config::load()?;
    let registry = registry_from(&config);
    let mut recognizer = Recognizer::new(config)?;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        stop_handler.store(true, Ordering::SeqCst);
    })?;

    println!("Starting live face recognition (Ctrl-C to stop)...");

    skygate_core::watch::run(&mut recognizer, &registry, &stop, |event| match event {
        WatchEvent::PassengerIdentified {
            name,
            similarity,
            record,
        } => {
            println!("Passenger identified: {} (similarity {:.3})", name, similarity);
            match record {
                Some(record) => {
                    println!("  Traveling from: {}", record.origin);
                    println!("  Traveling to:   {}", record.destination);
                    println!("  Contact:        {}", record.contact);
                    println!("  Email:          {}", record.email);
                }
                None => println!("  No additional information available for this passenger."),
            }
        }
        WatchEvent::PassengerLost => println!("Passenger not recognized."),
        WatchEvent::WatchlistHit { name, similarity } => {
            println!(
                "WATCHLIST HIT: {} (similarity {:.3})",
                name, similarity
            );
        }
        WatchEvent::WatchlistCleared => println!("No watchlist matches."),
    })?;

    println!("Recognition stopped.");

    Ok(())
}

fn cmd_list() -> anyhow::Result<()> {
    let config = Config::load()?;
    let registry = registry_from(&config);

    let passengers = registry.load()?;
    if passengers.is_empty() {
        println!("No passengers registered.");
        return Ok(());
    }

    println!("{:<25} {:<15} {:<15} {}", "Name", "From", "To", "Email");
    println!("{}", "-".repeat(70));
    for (name, record) in passengers {
        println!(
            "{:<25} {:<15} {:<15} {}",
            name, record.origin, record.destination, record.email
        );
    }

    Ok(())
}

fn cmd_remove(name: String) -> anyhow::Result<()> {
    let config = Config::load()?;
    let registry = registry_from(&config);

    registry.remove(&name)?;
    println!("Passenger {} removed.", name);

    Ok(())
}

fn cmd_snapshot(output: String) -> anyhow::Result<()> {
    let config = Config::load()?;
    let mut camera = skygate_core::capture::Camera::new(&config.camera)?;

    let frame = camera.capture_frame()?;
    frame.save(&output)?;

    println!("Snapshot saved: {}", output);
    println!("Resolution: {}x{}", frame.width(), frame.height());

    Ok(())
}

fn cmd_config(validate: bool) -> anyhow::Result<()> {
    let config = Config::load()?;

    if validate {
        config.validate()?;
        println!("Configuration is valid");
        return Ok(());
    }

    println!("[camera]");
    println!("  device = {:?}", config.camera.device);
    println!(
        "  resolution = {}x{}",
        config.camera.width, config.camera.height
    );
    println!();

    println!("[detection]");
    println!("  model = {:?}", config.detection.model_path);
    println!(
        "  confidence_threshold = {}",
        config.detection.confidence_threshold
    );
    println!();

    println!("[embedding]");
    println!("  model = {:?}", config.embedding.model_path);
    println!();

    println!("[matching]");
    println!("  threshold = {}", config.matching.threshold);
    println!();

    println!("[gallery]");
    println!("  passenger_dir = {:?}", config.gallery.passenger_dir);
    println!("  watchlist_dir = {:?}", config.gallery.watchlist_dir);
    println!();

    println!("[registry]");
    println!("  data_file = {:?}", config.registry.data_file);
    println!();

    println!("[watch]");
    println!("  frame_delay_ms = {}", config.watch.frame_delay_ms);
    println!();

    println!("[debug]");
    println!("  save_snapshots = {}", config.debug.save_snapshots);
    println!("  output_dir = {:?}", config.debug.output_dir);

    Ok(())
}

fn print_passenger_details(registry: &PassengerRegistry, name: &str) {
    match registry.get(name) {
        Ok(Some(record)) => {
            println!("  Traveling from: {}", record.origin);
            println!("  Traveling to:   {}", record.destination);
            println!("  Contact:        {}", record.contact);
            println!("  Email:          {}", record.email);
        }
        Ok(None) => {
            println!("  No additional information available for this passenger.");
        }
        Err(e) => {
            log::warn!("Failed to read passenger registry: {}", e);
        }
    }
}
