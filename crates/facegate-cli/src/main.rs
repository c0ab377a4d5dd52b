use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "facegate", about = "Facegate biometric pipeline CLI")]
struct Cli {
    /// Target user (defaults to $USER).
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Talk to the daemon on the session bus (development mode).
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new template
    Enroll {
        /// Label for this template (e.g., "normal", "glasses")
        #[arg(short, long, default_value = "default")]
        label: String,
    },
    /// Verify your face against enrolled templates
    Verify,
    /// List enrolled templates
    List,
    /// Remove an enrolled template
    Remove {
        /// Template ID to remove
        id: String,
    },
    /// Cancel the pipeline run in flight
    Cancel,
    /// Show daemon status
    Status,
    /// Run local pipeline diagnostics on synthetic scenes (no daemon)
    Test,
}

// `#[zbus::proxy]` generates the async `PipelineProxy`.
#[zbus::proxy(
    interface = "org.facegate.Pipeline1",
    default_service = "org.facegate.Pipeline1",
    default_path = "/org/facegate/Pipeline1"
)]
trait Pipeline {
    async fn enroll(&self, user: &str, label: &str) -> zbus::Result<String>;
    async fn verify(&self, user: &str) -> zbus::Result<bool>;
    async fn cancel(&self) -> zbus::Result<()>;
    async fn status(&self) -> zbus::Result<String>;
    async fn list_templates(&self, user: &str) -> zbus::Result<String>;
    async fn remove_template(&self, user: &str, template_id: &str) -> zbus::Result<bool>;
}

async fn connect(session: bool) -> Result<zbus::Connection> {
    let conn = if session {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    };
    conn.context("connecting to the bus — is facegated running?")
}

fn target_user(arg: &Option<String>) -> Result<String> {
    if let Some(user) = arg {
        return Ok(user.clone());
    }
    std::env::var("USER").context("cannot determine user; pass --user")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::Test = cli.command {
        return run_diagnostics();
    }

    let conn = connect(cli.session).await?;
    let proxy = PipelineProxy::new(&conn).await?;

    match cli.command {
        Commands::Enroll { label } => {
            let user = target_user(&cli.user)?;
            println!("Enrolling template for {user} (label: {label})...");
            println!("Look at the camera and hold still.");
            let id = proxy.enroll(&user, &label).await?;
            println!("Enrolled: {id}");
        }
        Commands::Verify => {
            let user = target_user(&cli.user)?;
            println!("Verifying {user}...");
            if proxy.verify(&user).await? {
                println!("Match.");
            } else {
                println!("No match.");
                std::process::exit(1);
            }
        }
        Commands::List => {
            let user = target_user(&cli.user)?;
            let json = proxy.list_templates(&user).await?;
            let infos: serde_json::Value = serde_json::from_str(&json)?;
            match infos.as_array() {
                Some(arr) if !arr.is_empty() => {
                    for info in arr {
                        println!(
                            "{}  {}  dim={}  quality={:.2}  {}",
                            info["id"].as_str().unwrap_or("?"),
                            info["label"].as_str().unwrap_or("?"),
                            info["dimension"],
                            info["avg_quality"].as_f64().unwrap_or(0.0),
                            info["created_at"].as_str().unwrap_or("?"),
                        );
                    }
                }
                _ => println!("No templates enrolled."),
            }
        }
        Commands::Remove { id } => {
            let user = target_user(&cli.user)?;
            if proxy.remove_template(&user, &id).await? {
                println!("Removed {id}");
            } else {
                println!("No such template: {id}");
                std::process::exit(1);
            }
        }
        Commands::Cancel => {
            proxy.cancel().await?;
            println!("Cancel requested.");
        }
        Commands::Status => {
            println!("{}", proxy.status().await?);
        }
        Commands::Test => unreachable!("handled above"),
    }

    Ok(())
}

/// Run the analysis stages directly against the synthetic scenes and print
/// a verdict per scene. Useful for checking a build without a daemon,
/// camera, or bus.
fn run_diagnostics() -> Result<()> {
    use facegate_capture::{SyntheticScene, SyntheticSource};
    use facegate_core::{
        AntiSpoofingAnalyzer, EmbeddingExtractor, ExtractorConfig, FaceDetector, LivenessDetector,
    };

    let detector = FaceDetector::new();
    let liveness = LivenessDetector::default();
    let antispoof = AntiSpoofingAnalyzer::default();
    let mut extractor = EmbeddingExtractor::new(ExtractorConfig::Standard);
    extractor.init();

    for (name, scene, expect_pass) in [
        ("live face", SyntheticScene::LiveFace, true),
        ("static photo", SyntheticScene::StaticPhoto, false),
        ("empty scene", SyntheticScene::Empty, false),
    ] {
        let frames = SyntheticSource::render_sequence(scene, 10);
        let refs: Vec<_> = frames.iter().collect();

        let last = frames.last().context("no frames")?;
        let detection = detector.detect(last);
        let live = liveness.analyze(&refs);
        let spoof = antispoof.analyze(&refs);
        let extracted = detection
            .region
            .as_ref()
            .map(|r| extractor.extract(last, Some(r)).is_ok())
            .unwrap_or(false);

        let passed = detection.detected && live.is_live && spoof.passed && extracted;
        println!(
            "{name:14} detect={} quality={:.2} live={} ({:.2}) spoof_checks={}/4 extract={} => {}",
            detection.detected,
            detection.quality,
            live.is_live,
            live.confidence,
            spoof.checks.passed_count(),
            extracted,
            if passed { "PASS" } else { "reject" },
        );

        if passed != expect_pass {
            anyhow::bail!("scene '{name}' did not behave as expected");
        }
    }

    println!("All diagnostics behaved as expected.");
    Ok(())
}
