//! # Basis CLI Application
//!
//! Line-oriented demo of the derivation engine on a small piping design
//! space: shared geometry and operating parameters feed a stress
//! calculation, an isometric drawing, a nozzle load check, and a
//! coversheet, and a change to the pipe diameter propagates through all
//! of them in one pass.

use std::io::{self, BufRead, Write};

use basis_core::change::ChangeRequest;
use basis_core::derivation::derivation_fn;
use basis_core::derivation::registry::{ArtifactKind, ArtifactSpec};
use basis_core::engine::Engine;
use basis_core::errors::EngineResult;
use basis_core::gateway::EventPayload;
use basis_core::space::Discipline;
use basis_core::value::ParamValue;

fn prompt_f64(prompt: &str, default: f64) -> f64 {
    print!("{}", prompt);
    if io::stdout().flush().is_err() {
        return default;
    }

    let mut input = String::new();
    if io::stdin().lock().read_line(&mut input).is_err() {
        return default;
    }

    input.trim().parse().unwrap_or(default)
}

/// Assemble the demo design space: four shared parameters and four
/// derived documents across three disciplines.
async fn build_demo_space() -> EngineResult<Engine> {
    let engine = Engine::new("J. Smith", "25-1042", "Unit 2 Aux Feedwater");

    for (id, value) in [
        ("pipeDiameter", 10.75),
        ("wallThickness", 0.365),
        ("designPressure", 1200.0),
        ("flowRate", 300.0),
    ] {
        engine
            .register_parameter(id, ParamValue::Number(value), "j.smith", Discipline::Systems)
            .await?;
    }

    engine
        .register_artifact(
            ArtifactSpec::new(
                "stressCalc",
                ArtifactKind::Calculation,
                derivation_fn(|inputs| async move {
                    // Hoop stress, Barlow: s = P*D / (2*t)
                    let p = inputs.number("designPressure")?;
                    let d = inputs.number("pipeDiameter")?;
                    let t = inputs.number("wallThickness")?;
                    Ok(ParamValue::record([
                        ("hoop_psi", ParamValue::Number(p * d / (2.0 * t))),
                        ("allowable_psi", ParamValue::Number(15_000.0)),
                    ]))
                }),
            )
            .with_title("Pipe Stress Summary")
            .for_discipline(Discipline::PipingStress)
            .reads_parameter("pipeDiameter")
            .reads_parameter("wallThickness")
            .reads_parameter("designPressure"),
        )
        .await?;

    engine
        .register_artifact(
            ArtifactSpec::new(
                "nozzleLoadCheck",
                ArtifactKind::Report,
                derivation_fn(|inputs| async move {
                    let q = inputs.number("flowRate")?;
                    let d = inputs.number("pipeDiameter")?;
                    let area = std::f64::consts::PI * (d / 2.0) * (d / 2.0);
                    Ok(ParamValue::record([
                        ("velocity_fps", ParamValue::Number(q / area)),
                        ("limit_fps", ParamValue::Number(10.0)),
                    ]))
                }),
            )
            .with_title("Nozzle Load Check")
            .for_discipline(Discipline::ThermalHydraulic)
            .reads_parameter("flowRate")
            .reads_parameter("pipeDiameter"),
        )
        .await?;

    engine
        .register_artifact(
            ArtifactSpec::new(
                "isoDrawing",
                ArtifactKind::Drawing,
                derivation_fn(|inputs| async move {
                    let hoop = inputs.artifact("stressCalc")?.field("hoop_psi")?.as_number()?;
                    let d = inputs.number("pipeDiameter")?;
                    Ok(ParamValue::Text(format!(
                        "ISOMETRIC 2-FW-1042: OD {d:.3} in, max hoop {hoop:.0} psi"
                    )))
                }),
            )
            .with_title("Piping Isometric")
            .for_discipline(Discipline::Drafting)
            .reads_artifact("stressCalc")
            .reads_parameter("pipeDiameter"),
        )
        .await?;

    engine
        .register_artifact(
            ArtifactSpec::new(
                "coverSheet",
                ArtifactKind::Template,
                derivation_fn(|inputs| async move {
                    let hoop = inputs.artifact("stressCalc")?.field("hoop_psi")?.as_number()?;
                    let velocity = inputs
                        .artifact("nozzleLoadCheck")?
                        .field("velocity_fps")?
                        .as_number()?;
                    Ok(ParamValue::Text(format!(
                        "DESIGN ANALYSIS COVERSHEET\nLine: 2-FW-1042\nMax hoop stress: {hoop:.0} psi\nFlow velocity: {velocity:.2} ft/s"
                    )))
                }),
            )
            .with_title("Analysis Coversheet")
            .for_discipline(Discipline::PipingStress)
            .reads_artifact("stressCalc")
            .reads_artifact("nozzleLoadCheck"),
        )
        .await?;

    engine.refresh().await?;
    Ok(engine)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("basis_core=warn")),
        )
        .init();

    println!("Basis CLI - Design Data Distribution Demo");
    println!("=========================================");
    println!();

    let engine = match build_demo_space().await {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error building demo space: {}", e);
            return;
        }
    };

    let mut subscription = engine.subscribe("cli-demo", &[]);

    let (current, revision) = match engine.read_parameter(&"pipeDiameter".into()) {
        Ok(read) => read,
        Err(e) => {
            eprintln!("Error: {}", e);
            return;
        }
    };
    let current = current.as_number().unwrap_or(10.75);
    println!("pipeDiameter is {:.3} in at {}", current, revision);
    let new_diameter = prompt_f64(
        &format!("Enter new pipe diameter (in) [{:.3}]: ", current),
        current,
    );

    println!();
    println!("Submitting change request...");
    println!();

    let request = ChangeRequest::new("cli-user", Discipline::PipingStress).with_write(
        "pipeDiameter",
        revision,
        ParamValue::Number(new_diameter),
    );

    match engine.submit_change(request).await {
        Ok(outcome) => {
            println!("═══════════════════════════════════════");
            println!("  PASS {} RESULTS", outcome.pass.pass_id);
            println!("═══════════════════════════════════════");
            println!();
            println!("New revisions:");
            for (id, revision) in &outcome.new_revisions {
                println!("  {:<16} {}", id.to_string(), revision);
            }
            println!();
            println!("Recomputed ({}):", outcome.pass.recomputed.len());
            for id in &outcome.pass.recomputed {
                match engine.get_latest(id) {
                    Ok(state) => println!(
                        "  [{}] {:<16} {} ({})",
                        state.kind.code(),
                        id.to_string(),
                        state.revision,
                        state.status.label()
                    ),
                    Err(e) => eprintln!("  {}: {}", id, e),
                }
            }

            println!();
            println!("Subscriber events:");
            while let Ok(event) = subscription.receiver.try_recv() {
                match event.payload {
                    EventPayload::ArtifactUpdated {
                        artifact_id,
                        revision,
                        ..
                    } => println!("  #{} updated {} -> {}", event.sequence, artifact_id, revision),
                    EventPayload::ArtifactFailed {
                        artifact_id,
                        reason,
                        ..
                    } => println!("  #{} failed {} ({})", event.sequence, artifact_id, reason),
                    EventPayload::Resync => println!("  #{} resync required", event.sequence),
                }
            }

            if let Ok(drawing) = engine.get_latest(&"isoDrawing".into()) {
                println!();
                println!("═══════════════════════════════════════");
                if let Some(ParamValue::Text(text)) = &drawing.value {
                    println!("{}", text);
                }
                println!("═══════════════════════════════════════");

                println!();
                println!("JSON Output (for downstream tooling):");
                if let Ok(json) = serde_json::to_string_pretty(&drawing) {
                    println!("{}", json);
                }
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            if let Ok(json) = serde_json::to_string_pretty(&e) {
                eprintln!();
                eprintln!("Error JSON:");
                eprintln!("{}", json);
            }
        }
    }
}
