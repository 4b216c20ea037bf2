use anyhow::{Context, Result};
use attendface_core::image_io::load_image_file;
use attendface_core::normalizer::equalize_histogram;
use attendface_core::protocol::{AttendanceTable, IdentifyFaceResponse, MarkResponse, RegisterFaceResponse};
use attendface_core::{AttendanceBook, FaceDetector, FaceLocator, FacePipeline, GalleryStore, PipelineOptions, StudentId};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "attendface", about = "attendface classroom face attendance CLI")]
struct Cli {
    #[command(flatten)]
    storage: Storage,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Storage {
    /// Root of the per-class gallery directories
    #[arg(long, global = true, default_value = "./face_dataset")]
    dataset_dir: PathBuf,
    /// Directory holding one attendance CSV per class
    #[arg(long, global = true, default_value = "./attendance_data")]
    attendance_dir: PathBuf,
    /// SeetaFace frontal cascade model file
    #[arg(long, global = true, default_value = "./models/seeta_fd_frontal_v1.0.bin")]
    model_path: PathBuf,
    /// Neighbors consulted per identification vote
    #[arg(long, global = true, default_value_t = attendface_core::knn::DEFAULT_NEIGHBORS)]
    neighbors: usize,
    /// Skip histogram equalization of the probe before detection
    #[arg(long, global = true)]
    no_equalize_probe: bool,
}

impl Storage {
    fn pipeline(&self) -> Result<FacePipeline<FaceDetector>> {
        let detector = FaceDetector::load(&self.model_path)?;
        let store = GalleryStore::open(&self.dataset_dir)
            .with_context(|| format!("opening dataset dir {}", self.dataset_dir.display()))?;
        let options = PipelineOptions {
            neighbors: self.neighbors,
            equalize_probe: !self.no_equalize_probe,
        };
        Ok(FacePipeline::new(detector, store, options))
    }

    fn attendance(&self) -> Result<AttendanceBook> {
        AttendanceBook::open(&self.attendance_dir)
            .with_context(|| format!("opening attendance dir {}", self.attendance_dir.display()))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a student from one or more image files
    Enroll {
        #[arg(short, long)]
        class: String,
        #[arg(short, long)]
        enrollment: String,
        #[arg(short, long)]
        name: String,
        /// Image files; the first face of each is used
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Identify the first face of an image within a class
    Identify {
        #[arg(short, long)]
        class: String,
        image: PathBuf,
    },
    /// Check a student in for today
    Checkin {
        #[arg(short, long)]
        class: String,
        #[arg(short, long)]
        enrollment: String,
        #[arg(short, long)]
        name: String,
    },
    /// Check a student out for today
    Checkout {
        #[arg(short, long)]
        class: String,
        #[arg(short, long)]
        enrollment: String,
    },
    /// Print a class attendance ledger
    Attendance {
        #[arg(short, long)]
        class: String,
    },
    /// List students enrolled in a class
    Students {
        #[arg(short, long)]
        class: String,
    },
    /// Print the face boxes found in an image (diagnostics)
    Detect {
        image: PathBuf,
        /// Equalize the image before detection, as enrollment does
        #[arg(long)]
        equalize: bool,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let storage = &cli.storage;

    match cli.command {
        Commands::Enroll {
            class,
            enrollment,
            name,
            images,
        } => {
            let images = images
                .iter()
                .map(|p| load_image_file(p).with_context(|| format!("reading {}", p.display())))
                .collect::<Result<Vec<_>>>()?;
            let student = StudentId::new(enrollment, name);
            let result = storage.pipeline()?.enroll(&class, &student, &images);
            print_json(&RegisterFaceResponse::from(result))?;
        }
        Commands::Identify { class, image } => {
            let image = load_image_file(&image).with_context(|| format!("reading {}", image.display()))?;
            let result = storage.pipeline()?.identify(&class, &image);
            print_json(&IdentifyFaceResponse::from(result))?;
        }
        Commands::Checkin {
            class,
            enrollment,
            name,
        } => {
            let mark = storage.attendance()?.checkin(&class, &enrollment, &name)?;
            print_json(&MarkResponse::from(mark))?;
        }
        Commands::Checkout { class, enrollment } => {
            let mark = storage.attendance()?.checkout(&class, &enrollment)?;
            print_json(&MarkResponse::from(mark))?;
        }
        Commands::Attendance { class } => {
            let records = storage.attendance()?.records(&class)?;
            print_json(&AttendanceTable::from(records))?;
        }
        Commands::Students { class } => {
            let store = GalleryStore::open(&storage.dataset_dir)?;
            print_json(&store.list_students(&class)?)?;
        }
        Commands::Detect { image, equalize } => {
            let img = load_image_file(&image).with_context(|| format!("reading {}", image.display()))?;
            let mut gray = img.to_luma8();
            if equalize {
                equalize_histogram(&mut gray);
            }
            let mut detector = FaceDetector::load(&storage.model_path)?;
            let faces = detector.locate(&gray);
            print_json(&serde_json::json!({
                "image": image.display().to_string(),
                "width": gray.width(),
                "height": gray.height(),
                "faces": faces,
            }))?;
        }
    }

    Ok(())
}
