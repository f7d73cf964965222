use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod setup;

#[zbus::proxy(
    interface = "org.blinkproof.Liveness1",
    default_service = "org.blinkproof.Liveness1",
    default_path = "/org/blinkproof/Liveness1"
)]
trait Liveness {
    fn submit_frame(&self, session: &str, body: &str) -> zbus::Result<(u16, String)>;
    fn upload_document(&self, filename: &str, contents: &[u8]) -> zbus::Result<(u16, String)>;
    fn end_session(&self, session: &str) -> zbus::Result<bool>;
    fn list_captures(&self, session: &str) -> zbus::Result<String>;
    fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "blinkproof", version, about = "Blink-based liveness detection")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session_bus: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit image files as consecutive webcam frames
    Submit {
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Session id; frames of one session share a liveness window
        #[arg(long, default_value = "cli")]
        session: String,
    },
    /// Upload an identity document and extract its face
    Upload { file: PathBuf },
    /// Discard a session's liveness window
    EndSession {
        #[arg(default_value = "cli")]
        session: String,
    },
    /// List the frames captured for a session
    Captures {
        #[arg(default_value = "cli")]
        session: String,
    },
    /// Show daemon status
    Status,
    /// Download the face detector and landmark models
    Setup {
        /// Where to fetch the SCRFD detector ONNX model from
        #[arg(long)]
        detector_url: String,
        /// Expected SHA-256 of the detector
        #[arg(long)]
        detector_sha256: Option<String>,
        /// Where to fetch the landmark ONNX model from
        #[arg(long)]
        landmarks_url: String,
        /// Expected SHA-256 of the landmark model
        #[arg(long)]
        landmarks_sha256: Option<String>,
        /// Target directory (defaults to the daemon's model directory)
        #[arg(long)]
        model_dir: Option<PathBuf>,
    },
    /// Verify a model on disk (the landmark model unless --detector)
    CheckModel {
        /// Check the face detector instead
        #[arg(long)]
        detector: bool,
        /// Model file (defaults to BLINKPROOF_MODEL_PATH or
        /// BLINKPROOF_DETECTOR_PATH, then the model directory)
        #[arg(long)]
        path: Option<PathBuf>,
        /// Expected SHA-256 (defaults to BLINKPROOF_MODEL_SHA256 or
        /// BLINKPROOF_DETECTOR_SHA256)
        #[arg(long)]
        sha256: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let session_bus = cli.session_bus || std::env::var("BLINKPROOF_SESSION_BUS").is_ok();

    match cli.command {
        Command::Submit { images, session } => {
            let proxy = connect(session_bus).await?;
            let mut failed = 0;
            for image in &images {
                let body = frame_body(image)?;
                let (status, text) = proxy.submit_frame(&session, &body).await?;
                if report(status, &text).is_err() {
                    failed += 1;
                }
            }
            if failed > 0 {
                bail!("{failed} of {} frames were rejected", images.len());
            }
            Ok(())
        }
        Command::Upload { file } => {
            let contents = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let proxy = connect(session_bus).await?;
            let (status, text) = proxy.upload_document(&name, &contents).await?;
            report(status, &text)
        }
        Command::EndSession { session } => {
            let proxy = connect(session_bus).await?;
            if proxy.end_session(&session).await? {
                println!("session '{session}' ended");
            } else {
                println!("no active session '{session}'");
            }
            Ok(())
        }
        Command::Captures { session } => {
            let proxy = connect(session_bus).await?;
            let json = proxy.list_captures(&session).await?;
            let records: Vec<serde_json::Value> = serde_json::from_str(&json)?;
            if records.is_empty() {
                println!("no captures for session '{session}'");
            }
            for record in records {
                println!(
                    "{}  {}  {}",
                    record["created_at"].as_str().unwrap_or("?"),
                    record["filename"].as_str().unwrap_or("?"),
                    record["path"].as_str().unwrap_or("?"),
                );
            }
            Ok(())
        }
        Command::Status => {
            let proxy = connect(session_bus).await?;
            let json = proxy.status().await?;
            let value: serde_json::Value = serde_json::from_str(&json)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Command::Setup {
            detector_url,
            detector_sha256,
            landmarks_url,
            landmarks_sha256,
            model_dir,
        } => setup::run(
            &[
                setup::ModelSource {
                    file: blinkproof_core::DETECTOR_MODEL_FILE,
                    url: detector_url,
                    sha256: detector_sha256,
                },
                setup::ModelSource {
                    file: blinkproof_core::LANDMARK_MODEL_FILE,
                    url: landmarks_url,
                    sha256: landmarks_sha256,
                },
            ],
            model_dir,
        ),
        Command::CheckModel {
            detector,
            path,
            sha256,
        } => check_model(detector, path, sha256),
    }
}

async fn connect(session_bus: bool) -> Result<LivenessProxy<'static>> {
    tracing::debug!(session_bus, "connecting to blinkproofd");
    let conn = if session_bus {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("failed to connect to D-Bus")?;
    LivenessProxy::new(&conn)
        .await
        .context("blinkproofd is not reachable")
}

fn report(status: u16, text: &str) -> Result<()> {
    if status == 200 {
        println!("{text}");
        Ok(())
    } else {
        eprintln!("[{status}] {text}");
        bail!("daemon answered {status}")
    }
}

fn check_model(detector: bool, path: Option<PathBuf>, sha256: Option<String>) -> Result<()> {
    let (path_var, sha_var, file) = if detector {
        (
            "BLINKPROOF_DETECTOR_PATH",
            "BLINKPROOF_DETECTOR_SHA256",
            blinkproof_core::DETECTOR_MODEL_FILE,
        )
    } else {
        (
            "BLINKPROOF_MODEL_PATH",
            "BLINKPROOF_MODEL_SHA256",
            blinkproof_core::LANDMARK_MODEL_FILE,
        )
    };
    let path = path
        .or_else(|| std::env::var(path_var).ok().map(PathBuf::from))
        .unwrap_or_else(|| blinkproof_core::default_model_dir().join(file));
    let sha256 = sha256.or_else(|| std::env::var(sha_var).ok());
    let check = blinkproof_models::verify_model(&path, sha256.as_deref())?;
    println!("model:  {}", check.path.display());
    println!("sha256: {}", check.sha256);
    println!("pinned: {}", if check.pinned { "yes" } else { "no" });
    Ok(())
}

/// JSON body for `SubmitFrame`: the file as a base64 data URL.
fn frame_body(image: &Path) -> Result<String> {
    let bytes =
        std::fs::read(image).with_context(|| format!("failed to read {}", image.display()))?;
    let data_url = format!("data:{};base64,{}", mime_for(image), STANDARD.encode(bytes));
    Ok(serde_json::json!({ "image_data": data_url }).to_string())
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_for() {
        assert_eq!(mime_for(Path::new("a.PNG")), "image/png");
        assert_eq!(mime_for(Path::new("frame.jpeg")), "image/jpeg");
        assert_eq!(mime_for(Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn test_frame_body_is_data_url() {
        let path = std::env::temp_dir().join(format!("blinkproof-cli-{}.png", std::process::id()));
        std::fs::write(&path, b"hi").unwrap();
        let body: serde_json::Value = serde_json::from_str(&frame_body(&path).unwrap()).unwrap();
        assert_eq!(body["image_data"], "data:image/png;base64,aGk=");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_cli_parses_submit() {
        let cli = Cli::try_parse_from([
            "blinkproof",
            "submit",
            "a.png",
            "b.png",
            "--session",
            "kiosk-1",
        ])
        .unwrap();
        match cli.command {
            Command::Submit { images, session } => {
                assert_eq!(images, vec![PathBuf::from("a.png"), PathBuf::from("b.png")]);
                assert_eq!(session, "kiosk-1");
            }
            _ => panic!("expected submit"),
        }
        assert!(Cli::try_parse_from(["blinkproof", "submit"]).is_err());
    }

    #[test]
    fn test_cli_session_defaults() {
        let cli = Cli::try_parse_from(["blinkproof", "captures"]).unwrap();
        assert!(matches!(cli.command, Command::Captures { session } if session == "cli"));
    }

    #[test]
    fn test_cli_setup_takes_both_models() {
        let cli = Cli::try_parse_from([
            "blinkproof",
            "setup",
            "--detector-url",
            "https://models.invalid/det.onnx",
            "--landmarks-url",
            "https://models.invalid/marks.onnx",
            "--landmarks-sha256",
            "ab12",
        ])
        .unwrap();
        match cli.command {
            Command::Setup {
                detector_url,
                detector_sha256,
                landmarks_url,
                landmarks_sha256,
                ..
            } => {
                assert_eq!(detector_url, "https://models.invalid/det.onnx");
                assert!(detector_sha256.is_none());
                assert_eq!(landmarks_url, "https://models.invalid/marks.onnx");
                assert_eq!(landmarks_sha256.as_deref(), Some("ab12"));
            }
            _ => panic!("expected setup"),
        }
        assert!(Cli::try_parse_from([
            "blinkproof",
            "setup",
            "--landmarks-url",
            "https://models.invalid/marks.onnx",
        ])
        .is_err());
    }
}
