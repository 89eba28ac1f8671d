use log::{info, warn};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use actix_web::{App, HttpServer, web};

use wshub::backend::{Hardware, PinBackend, SensorBus, SysfsSensorBus, SystemClock};
use wshub::callback::TcpConnector;
use wshub::status::interface_mac;
use wshub::{AppConfig, AppState, Hub, restore, scheduler};

#[cfg(feature = "hardware-gpio")]
use wshub::LibgpiodBackend;
#[cfg(not(feature = "hardware-gpio"))]
use wshub::MockPinBackend;

#[actix_web::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("WSHUB_CONFIG").ok())
        .unwrap_or_else(|| "config.json".to_string());
    let config = AppConfig::load_from_file(&config_path).map_err(io::Error::other)?;

    let pins: Arc<dyn PinBackend> = {
        #[cfg(feature = "hardware-gpio")]
        {
            Arc::new(LibgpiodBackend::new(&config.gpios, &config.analog).map_err(io::Error::other)?)
        }
        #[cfg(not(feature = "hardware-gpio"))]
        {
            Arc::new(MockPinBackend::default())
        }
    };
    let sensors: Arc<dyn SensorBus> = Arc::new(SysfsSensorBus::new(&config.sensors));
    let hw = Hardware {
        pins,
        sensors,
        clock: Arc::new(SystemClock::default()),
    };

    let mut hub = Hub::new(hw, Box::new(TcpConnector::default()), config.runtime.clone());
    let mac = config
        .interface
        .as_deref()
        .map(interface_mac)
        .unwrap_or_default();
    let ip = config
        .http
        .host
        .as_deref()
        .and_then(|host| host.rsplit_once(':'))
        .map(|(addr, _)| addr.to_string())
        .unwrap_or_default();
    hub.set_network(mac, ip);

    if let Some(backup_path) = &config.restore_from {
        match fs::read_to_string(backup_path) {
            Ok(text) => {
                if let Err(e) = restore(&mut hub, &text) {
                    warn!("Restoring {backup_path} failed: {e}");
                }
            }
            Err(e) => warn!("Cannot read backup {backup_path}: {e}"),
        }
    }

    let app_state = AppState::new(hub);
    let stop = Arc::new(AtomicBool::new(false));
    let poller = scheduler::spawn(
        app_state.hub.clone(),
        Duration::from_millis(config.runtime.tick_ms),
        stop.clone(),
    )?;

    let http_cfg = config.http.clone();
    let server = HttpServer::new(move || {
        let scope_path = http_cfg.path.clone();
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .service(app_state.api_scope(&scope_path))
    })
    .client_request_timeout(Duration::from_secs(config.http.timeout));

    let bind_addrs: String;
    let http_cfg = config.http.clone();
    let server = match (&http_cfg.unix_socket, &http_cfg.host) {
        (Some(socket_path), Some(host)) => {
            if Path::new(socket_path).exists() {
                fs::remove_file(socket_path)?;
            }
            bind_addrs = format!("{} and {}", socket_path, host);

            server.bind_uds(socket_path)?.bind_auto_h2c(host)?
        }
        (Some(socket_path), None) => {
            if Path::new(socket_path).exists() {
                fs::remove_file(socket_path)?;
            }
            bind_addrs = socket_path.clone();

            server.bind_uds(socket_path)?
        }
        (None, Some(host)) => {
            bind_addrs = host.clone();

            server.bind_auto_h2c(host)?
        }
        (None, None) => {
            return Err(io::Error::other(
                "Config error: either 'unix_socket' or 'host' must be specified",
            ));
        }
    };

    info!("Starting server on {}...", bind_addrs);

    let result = server.run().await;

    stop.store(true, Ordering::Relaxed);
    if poller.join().is_err() {
        warn!("Poll thread panicked");
    }
    result
}
