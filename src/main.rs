//! Classify images from the command line. Each argument is handled like a
//! photo the user picked, in order; only the last selection's result stays on
//! screen.

use anyhow::{Context, Result};
use imgclass::config::SETTINGS_FILE;
use imgclass::input::B64Image;
use imgclass::{util, ClassificationPipeline, Image, Session, Settings, View};
use std::io::Read;
use std::{env, process};
use tracing::info;

const USAGE: &str = "usage: ./imgclass [--json] <model file> <image>... (an image of - reads base 64 from stdin)";

fn get_args() -> (bool, String, Vec<String>) {
    let mut args: Vec<String> = env::args().skip(1).collect();
    let json = match args.first().map(String::as_str) {
        Some("--json") => {
            args.remove(0);
            true
        }
        _ => false,
    };
    if args.len() < 2 {
        println!("{USAGE}");
        process::exit(1);
    }

    let model = args.remove(0);
    (json, model, args)
}

fn read_image(arg: &str) -> Result<Image> {
    if arg == "-" {
        let mut image = String::new();
        std::io::stdin()
            .read_to_string(&mut image)
            .context("reading base 64 image from stdin")?;
        return Ok(B64Image {
            image,
            height: None,
            width: None,
        }
        .into());
    }
    Image::from_path(arg).with_context(|| format!("reading {arg}"))
}

fn to_json(view: &View) -> serde_json::Value {
    match view {
        View::Done {
            selection,
            outcome: Ok(classification),
        } => serde_json::json!({
            "selection": selection,
            "predictions": classification.predictions(),
        }),
        View::Done {
            selection,
            outcome: Err(e),
        } => serde_json::json!({
            "selection": selection,
            "kind": e.kind(),
            "error": e.to_string(),
        }),
        _ => serde_json::json!({ "selection": view.selection() }),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let (json, model, images) = get_args();

    let mut settings = Settings::load(SETTINGS_FILE)?;
    settings.model_path = model;
    util::init_tracing(&settings.log_level);
    info!("using model {} (cpu only: {})", settings.model_path, settings.cpu_only);

    let pipeline = ClassificationPipeline::from_settings(&settings);
    let session = Session::with_callback(pipeline, |selection, outcome| match outcome {
        Ok(classification) => println!("[{selection}] {classification}"),
        Err(e) => println!("[{selection}] {e}"),
    });

    let mut last = None;
    for arg in &images {
        last = Some(session.select(read_image(arg)?));
    }
    if let Some(ticket) = last {
        ticket.handle.await?;
    }

    let view = session.view();
    match json {
        true => println!("{}", serde_json::to_string_pretty(&to_json(&view))?),
        false => println!("{view}"),
    }
    Ok(())
}
