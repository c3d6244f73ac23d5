use std::time::Instant;

use log::*;
use tokio::sync::oneshot;
use tokio::task::LocalSet;
use virtual_time::{ambient, ClockConfig};

const DEMO_DELAY_MS: u64 = 100_000;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::init();
    let config = match ClockConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            warn!("Falling back to default clock config: {e}");
            ClockConfig::default()
        }
    };

    LocalSet::new()
        .run_until(async move {
            let _installed = ambient::install_with_config(&config);
            let start_real = Instant::now();
            let start_virtual = ambient::now();

            let (done, finished) = oneshot::channel();
            ambient::set_timeout(
                move || {
                    let _ = done.send(ambient::now());
                },
                DEMO_DELAY_MS,
            )
            .expect("demo delay fits in virtual time");

            match finished.await {
                Ok(end_virtual) => info!(
                    "Real duration: {}ms; Virtual duration: {}ms",
                    start_real.elapsed().as_millis(),
                    end_virtual - start_virtual
                ),
                Err(_) => error!("Timer was dropped before firing"),
            }
        })
        .await;
}
