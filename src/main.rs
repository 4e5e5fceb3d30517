//! Bucle Scanner - interactive engine driver
//!
//! Line-oriented front for the scan engine: each command maps to one
//! transition request. The real presentation layer lives elsewhere; this
//! binary exists to run the engine end to end against a camera, a model
//! and a backend.

use bucle_scanner::backend::BackendApi;
use bucle_scanner::classifier::Classifier;
use bucle_scanner::scan_machine::ConfirmResult;
use bucle_scanner::{AppConfig, AppState};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bucle_scanner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Bucle Scanner v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::default();
    tracing::info!(
        backend_url = %config.backend_url,
        model_url = %config.model_url,
        camera_input = %config.camera_input,
        threshold = config.confidence_threshold,
        "Configuration loaded"
    );

    let state = AppState::build(config).await?;

    if let Some(session) = state.gate.current_session().await {
        tracing::info!(email = %session.email, "Session restored from previous run");
    }

    // Model loading may race the first shutter; until it succeeds the
    // analyzing phase simply yields no detection.
    if let Err(e) = state.classifier.initialize().await {
        tracing::warn!(error = %e, "Model not loaded yet, will retry on `init`");
    }

    // Mirror phase changes onto the log.
    let mut events = state.machine.subscribe();
    tokio::spawn(async move {
        while let Ok(change) = events.recv().await {
            tracing::info!(from = ?change.from, to = ?change.to, cycle = change.cycle, "Phase");
        }
    });

    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            [] => {}
            ["activate"] => match state.machine.activate().await {
                Ok(phase) => println!("phase: {:?}", phase),
                Err(e) => println!("camera error: {}", e),
            },
            ["shutter"] => match state.machine.shutter().await {
                Ok(phase) => {
                    println!("phase: {:?}", phase);
                    match state.machine.current_detection().await {
                        Some(d) => println!("detected {} ({:.2})", d.label, d.confidence),
                        None => println!("no detection, retake or confirm is disabled"),
                    }
                }
                Err(e) => println!("shutter error: {}", e),
            },
            ["retake"] => {
                println!("phase: {:?}", state.machine.retake().await);
            }
            ["confirm"] => match state.machine.confirm().await {
                ConfirmResult::Submitted(receipt) => println!(
                    "submitted: record {} ({}) -> {}",
                    receipt.record_id,
                    receipt.assigned_sku,
                    receipt.review_state.as_str()
                ),
                ConfirmResult::AwaitingAuth => {
                    println!("not signed in: `login <email> <password>` or `cancel-auth`")
                }
                ConfirmResult::Failed(e) => println!("submission failed, still reviewing: {}", e),
                ConfirmResult::Ignored => println!("nothing to confirm"),
            },
            ["login", email, password] => match state.gate.login(email, password).await {
                Ok(session) => {
                    println!("signed in as {}", session.email);
                    report_auth_result(&state).await;
                }
                Err(e) => println!("login failed: {}", e),
            },
            ["signup", username, email, password] => {
                match state.gate.register(username, email, password).await {
                    Ok(session) => {
                        println!("account created, signed in as {}", session.email);
                        report_auth_result(&state).await;
                    }
                    Err(e) => println!("signup failed: {}", e),
                }
            }
            ["cancel-auth"] => {
                println!("phase: {:?}", state.machine.auth_cancelled().await);
            }
            ["logout"] => match state.gate.logout().await {
                Ok(()) => println!("signed out"),
                Err(e) => println!("logout failed: {}", e),
            },
            ["init"] => match state.classifier.initialize().await {
                Ok(()) => println!("model loaded"),
                Err(e) => println!("model load failed: {}", e),
            },
            ["status"] => {
                println!("phase: {:?}", state.machine.phase().await);
                match state.gate.current_session().await {
                    Some(s) => println!("session: {} (expires {})", s.email, s.expires_at),
                    None => println!("session: none"),
                }
            }
            ["records"] => match state.backend.list_records().await {
                Ok(records) => {
                    for r in records {
                        let label = r.product.map(|p| p.name).unwrap_or_default();
                        println!(
                            "{}  {}  {:.2}  {}",
                            r.id,
                            label,
                            r.confidence,
                            r.review_state.as_str()
                        );
                    }
                }
                Err(e) => println!("listing failed: {}", e),
            },
            ["quit"] | ["exit"] => break,
            _ => print_help(),
        }
    }

    state.machine.reset().await;
    tracing::info!("Bucle Scanner stopped");
    Ok(())
}

/// After a login/signup, resolve any parked submission
async fn report_auth_result(state: &AppState) {
    if !state.gate.has_pending().await {
        return;
    }
    match state.machine.auth_succeeded().await {
        ConfirmResult::Submitted(receipt) => println!(
            "parked scan submitted: record {} -> {}",
            receipt.record_id,
            receipt.review_state.as_str()
        ),
        ConfirmResult::Failed(e) => println!("parked scan failed, still reviewing: {}", e),
        _ => {}
    }
}

fn print_help() {
    println!("commands:");
    println!("  activate                      turn the camera on");
    println!("  shutter                       freeze and classify the current frame");
    println!("  retake                        back to live preview");
    println!("  confirm                       submit the reviewed detection");
    println!("  login <email> <password>      sign in");
    println!("  signup <user> <email> <pw>    create an account and sign in");
    println!("  cancel-auth                   dismiss the sign-in prompt");
    println!("  logout                        sign out");
    println!("  init                          retry model loading");
    println!("  status / records / quit");
}
