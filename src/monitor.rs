//! Wall-clock worker: every 100 ms it chases the south connection status,
//! gates the listener on the operating mode and sweeps command timeouts.

use crate::{config::ServerMode, server::ServerContext};
use std::sync::Arc;
use tokio::{task::JoinHandle, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const TICK_INTERVAL: Duration = Duration::from_millis(100);

pub(crate) struct MonitoringLoop {
    ctx: Arc<ServerContext>,
    cancel: CancellationToken,
}

impl MonitoringLoop {
    pub fn spawn(ctx: Arc<ServerContext>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(Self { ctx, cancel }.run())
    }

    async fn run(self) {
        info!("monitoring task started");
        let mut south_status_requested = false;
        let mut server_running = false;
        let mut init_socket_notified = false;
        let mut tick = tokio::time::interval(TICK_INTERVAL);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tick.tick() => {}
            }

            // retried every tick until the south side answers once
            if !south_status_requested {
                south_status_requested = self.ctx.request_south_connection_status().await;
            }

            match self.ctx.config.protocol.mode {
                ServerMode::ConnectAlways => {
                    if !server_running {
                        match self.ctx.link.start() {
                            Ok(()) => {
                                info!("server started, mode connect_always");
                                server_running = true;
                            }
                            Err(e) => error!(error = %e, "failed to start listener"),
                        }
                    }
                }
                ServerMode::ConnectIfSouthConnxStarted => {
                    if !server_running {
                        if self.ctx.south.any_started() {
                            match self.ctx.link.start() {
                                Ok(()) => {
                                    info!("server started, mode connect_if_south_connx_started");
                                    server_running = true;
                                }
                                Err(e) => error!(error = %e, "failed to start listener"),
                            }
                        }
                    } else {
                        if self.ctx.link.is_running() && !init_socket_notified {
                            // socket open and running, notify the south side
                            self.ctx.notify_init_socket_finished().await;
                            init_socket_notified = true;
                        }

                        if !self.ctx.south.any_started() {
                            info!("server stopped, mode connect_if_south_connx_started");
                            self.ctx.link.stop();
                            server_running = false;
                            init_socket_notified = false;
                        }
                    }
                }
            }

            self.ctx
                .tracker
                .sweep_expired(self.ctx.clock.now_ms())
                .await;
        }

        if server_running {
            self.ctx.link.stop();
        }
        warn!("monitoring task stopped");
    }
}
