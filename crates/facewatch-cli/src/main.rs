use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facewatch_core::{CascadeDetector, FaceDetector};
use facewatch_engine::{annotate_frame, Config, Enroller, LabelRenderer, ModelManager};
use facewatch_hw::Camera;
use facewatch_store::{Person, PersonStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "facewatch", version, about = "facewatch face enrollment and recognition CLI")]
struct Cli {
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a person from a photo containing exactly one face
    Enroll {
        /// Display name for the person
        #[arg(short, long)]
        name: String,
        /// Photo to enroll from
        image: PathBuf,
    },
    /// List enrolled people, newest first
    List,
    /// Show one enrolled person
    Show {
        id: i64,
    },
    /// Remove a person and their stored photo
    Remove {
        id: i64,
    },
    /// Retrain the recognizer from every stored photo
    Retrain,
    /// Detect and identify every face in a still image
    Classify {
        image: PathBuf,
        /// Write the annotated image here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run camera diagnostics
    Test {
        /// V4L2 device (overrides FACEWATCH_CAMERA_DEVICE)
        #[arg(short, long)]
        device: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Enroll { name, image } => {
            let enroller = Enroller::new(models(&config)?, &config.photo_dir);
            let outcome = enroller.enroll(&name, &image);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!("{}", outcome.message);
            }
            if !outcome.success {
                std::process::exit(1);
            }
        }
        Commands::List => {
            let people = open_store(&config)?.all_people()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&people)?);
            } else if people.is_empty() {
                println!("No people enrolled");
            } else {
                println!("{:<6} {:<24} {:<20} PHOTO", "ID", "NAME", "ADDED");
                for p in &people {
                    print_row(p);
                }
            }
        }
        Commands::Show { id } => {
            let Some(person) = open_store(&config)?.person(id)? else {
                bail!("no person with id {id}");
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&person)?);
            } else {
                println!("id:      {}", person.id);
                println!("name:    {}", person.name);
                println!("added:   {}", person.created_at);
                println!(
                    "photo:   {}{}",
                    person.photo_path.display(),
                    if person.photo_path.exists() { "" } else { " (missing)" }
                );
            }
        }
        Commands::Remove { id } => {
            let enroller = Enroller::new(models(&config)?, &config.photo_dir);
            if enroller.remove(id)? {
                println!("Removed person {id}");
            } else {
                bail!("no person with id {id}");
            }
        }
        Commands::Retrain => {
            let summary = models(&config)?.rebuild()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "Trained on {} photo(s), skipped {}",
                    summary.trained, summary.skipped
                );
            }
        }
        Commands::Classify { image, output } => classify(&config, &image, output.as_deref(), cli.json)?,
        Commands::Test { device } => {
            let device = device.unwrap_or_else(|| config.camera_device.clone());
            camera_test(&config, &device)?;
        }
    }

    Ok(())
}

fn open_store(config: &Config) -> Result<PersonStore> {
    PersonStore::open(&config.db_path)
        .with_context(|| format!("failed to open database {}", config.db_path.display()))
}

fn models(config: &Config) -> Result<Arc<ModelManager>> {
    let detector: Arc<dyn FaceDetector> = Arc::new(
        CascadeDetector::load(&config.cascade_path)
            .with_context(|| format!("failed to load cascade {}", config.cascade_path.display()))?,
    );
    Ok(Arc::new(ModelManager::new(
        Arc::new(open_store(config)?),
        detector,
        config.enroll_params(),
        config.match_threshold,
    )))
}

fn print_row(p: &Person) {
    println!(
        "{:<6} {:<24} {:<20} {}",
        p.id,
        p.name,
        p.created_at.format("%Y-%m-%d %H:%M:%S"),
        p.photo_path.display()
    );
}

fn classify(config: &Config, path: &Path, output: Option<&Path>, json: bool) -> Result<()> {
    let mut img = image::ImageReader::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?
        .with_guessed_format()?
        .decode()
        .with_context(|| format!("failed to decode {}", path.display()))?
        .to_rgb8();

    let models = models(config)?;
    models.rebuild().context("failed to load people")?;
    let renderer = LabelRenderer::from_config(config.font_path.as_deref());

    let results = annotate_frame(
        &mut img,
        &models,
        &renderer,
        &config.live_params(),
        &config.unknown_label,
    );

    if json {
        let faces: Vec<_> = results
            .iter()
            .map(|(face, c)| {
                serde_json::json!({
                    "x": face.x, "y": face.y, "width": face.width, "height": face.height,
                    "identity": c.identity, "confidence": c.confidence,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&faces)?);
    } else if results.is_empty() {
        println!("No faces found");
    } else {
        for (face, c) in &results {
            println!(
                "{:>4},{:<4} {:>4}x{:<4} {} ({:.1})",
                face.x,
                face.y,
                face.width,
                face.height,
                c.label(&config.unknown_label),
                c.confidence
            );
        }
    }

    if let Some(out) = output {
        img.save(out)
            .with_context(|| format!("failed to write {}", out.display()))?;
        println!("Annotated image written to {}", out.display());
    }
    Ok(())
}

fn camera_test(config: &Config, device: &str) -> Result<()> {
    println!("Video capture devices:");
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("  (none found)");
    }
    for d in &devices {
        println!("  {}  {} [{}] {}", d.path, d.name, d.driver, d.bus);
    }

    println!("\nOpening {device}...");
    let policy = config.camera_retry();
    let mut camera = policy
        .acquire(
            |_| Camera::open(device, config.frame_width, config.frame_height, config.fps),
            |camera: &mut Camera| camera.read_frame().map(|_| ()),
            || true,
        )
        .with_context(|| format!("camera {device} unavailable"))?;

    println!(
        "  {}x{} {:?} ({})",
        camera.width,
        camera.height,
        camera.pixel_format(),
        camera.fourcc
    );

    let frame = camera.read_frame().context("failed to read a frame")?;
    let gray = frame.to_gray();
    let mean = gray.pixels().map(|p| p.0[0] as f64).sum::<f64>() / gray.len().max(1) as f64;
    println!(
        "  frame #{}: {}x{}, mean brightness {:.1}",
        frame.sequence,
        frame.width(),
        frame.height(),
        mean
    );

    if mean < 5.0 {
        println!("  warning: frame is almost black; check the lens cover or lighting");
    }
    println!("Camera OK");
    Ok(())
}
