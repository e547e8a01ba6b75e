//! Actor implementation for the session engine.

use tokio::sync::{mpsc, watch};

use super::commands::{PeerEvent, SessionCommand};
use super::core::SessionCore;

/// Runs the main actor message processing loop.
///
/// Binds the listener, then processes commands and connection events one at a
/// time until the shutdown signal flips, the signal sender is dropped, or every
/// handle is gone. Teardown runs before the task returns, so awaiting the task
/// means the session is fully stopped.
pub(crate) async fn run_actor_loop(
    mut core: SessionCore,
    mut receiver: mpsc::Receiver<SessionCommand>,
    mut events: mpsc::UnboundedReceiver<PeerEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!("Session actor started");
    core.start_listener().await;

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            command = receiver.recv() => match command {
                Some(command) => handle_command(&mut core, command).await,
                None => break,
            },
            Some(event) = events.recv() => core.handle_event(event),
            true = core.reap_peer_task(), if core.has_peer_tasks() => {}
        }
    }

    core.shutdown().await;
    tracing::debug!("Session actor stopped");
}

/// Handles a single command for the session.
async fn handle_command(core: &mut SessionCore, command: SessionCommand) {
    match command {
        SessionCommand::AddTorrent { params, responder } => {
            let result = core.add_torrent(params).await;
            let _ = responder.send(result);
        }

        SessionCommand::ConnectPeer {
            info_hash,
            address,
            responder,
        } => {
            let result = core.connect_peer(info_hash, address);
            let _ = responder.send(result);
        }

        SessionCommand::Resume {
            info_hash,
            responder,
        } => {
            let result = core.set_active(info_hash, true);
            let _ = responder.send(result);
        }

        SessionCommand::Pause {
            info_hash,
            responder,
        } => {
            let result = core.set_active(info_hash, false);
            let _ = responder.send(result);
        }

        SessionCommand::ListenAddress { responder } => {
            let _ = responder.send(core.listen_address());
        }
    }
}
