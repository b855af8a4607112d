use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

mod api;
mod generator;
mod state;

use generator::EventGenerator;
use state::AppState;

/// In-memory stand-in for the monitoring backend.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, default_value_t = 8000)]
    port: u16,

    /// Milliseconds between generated events per running camera
    #[arg(long, default_value_t = 1000)]
    event_interval_ms: u64,

    /// Share of generated events that are anomalies
    #[arg(long, default_value_t = 0.2)]
    anomaly_rate: f64,

    /// Share of stream messages sent as broken JSON
    #[arg(long, default_value_t = 0.0)]
    malformed_rate: f64,
}

#[actix_web::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let state = Arc::new(AppState::new());

    let generator = EventGenerator::new(args.anomaly_rate, args.malformed_rate);
    actix_web::rt::spawn(generator.run(
        state.clone(),
        Duration::from_millis(args.event_interval_ms.max(10)),
    ));

    let app_state = web::Data::new(state);
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allowed_methods(vec!["GET", "POST", "DELETE"])
            .allowed_headers(vec!["Content-Type", "Accept", "Cache-Control"])
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .configure(api::configure)
    })
    .bind((args.host.clone(), args.port))?
    .run();

    tracing::info!("Monitoring simulator listening on {}:{}", args.host, args.port);

    server.await?;

    Ok(())
}
