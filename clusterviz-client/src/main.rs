/**
 * CLUSTERVIZ - Point d'entrée du client tableau de bord
 *
 * RÔLE : Charge la config, s'abonne au serveur de simulation, démarre le
 * polling et affiche les panneaux (ranking + résumé) à chaque tick.
 * Ctrl-C : désabonnement propre avant de quitter.
 */

use anyhow::Context;
use clusterviz_client::config::load_config;
use clusterviz_client::console::console_registry;
use clusterviz_client::panels::Panels;
use clusterviz_client::{HttpTransport, SessionManager};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env optionnel
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config().await;
    info!("[clusterviz] server {}", config.server.base_url);

    let transport = HttpTransport::new(&config.server.base_url, config.request_timeout())
        .context("building HTTP client")?;
    let manager = SessionManager::new(transport, config.session_settings());
    let session = manager
        .subscribe(console_registry(true))
        .await
        .context("subscribing to the simulation server")?;

    if let Some(simulator) = config.server.simulator.as_deref() {
        match session.change_data_source(simulator).await {
            Ok(outcome) => info!("[clusterviz] data source '{}': {:?}", simulator, outcome),
            Err(e) => warn!("[clusterviz] cannot switch to '{}': {}", simulator, e),
        }
    }
    if let Some(key) = config.dashboard.color_data_set {
        session.set_color_data_set(key).await?;
    }
    if let Some(key) = config.dashboard.size_data_set {
        session.set_size_data_set(key).await?;
    }

    let mut panels = session.panels();
    let mut status = session.status();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("[clusterviz] interrupted");
                break;
            }
            changed = panels.changed() => {
                if changed.is_err() {
                    break;
                }
                print_panels(&panels.borrow_and_update());
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                if !current.poll_active {
                    error!("[clusterviz] polling stopped ({})", session.diagnostics().poll_status);
                }
            }
        }
    }

    session.unsubscribe().await;
    Ok(())
}

fn print_panels(panels: &Panels) {
    let fmt = |v: Option<f64>| v.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".into());
    println!("-- {}", panels.summary.headline());
    for (rank, entry) in panels.rankings.iter().enumerate() {
        println!(
            "   {:>2}. {:<16} {:<10} {}",
            rank + 1,
            entry.name,
            entry.rack.as_deref().unwrap_or("-"),
            fmt(entry.value)
        );
    }
    if let Some(latest) = panels.feed.first() {
        println!("   latest: {} {}", latest.severity, latest.display_text());
    }
}
