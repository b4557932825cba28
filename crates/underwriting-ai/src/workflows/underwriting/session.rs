use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::domain::{Application, ApplicationId, RunId};
use super::emitter::{AttachOutcome, ClientId, Delivery, Listener};
use super::events::ProgressEvent;
use super::service::UnderwritingService;

/// Commands a persistent client may send, tagged by `action`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Start a new run and stream it to this client.
    Process { data: Application },
    /// Follow an existing run.
    Watch { run_id: RunId },
    Ping,
}

/// Messages pushed to a persistent client, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    RunStarted {
        run_id: RunId,
        application_id: ApplicationId,
    },
    Watching {
        run_id: RunId,
    },
    Progress(ProgressEvent),
    Lagged {
        dropped: u64,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
    },
}

/// One connected client: its persistent listener plus command handling.
///
/// Transport-agnostic; the socket handler feeds it text frames and forwards
/// whatever it yields.
pub struct ClientSession {
    client_id: ClientId,
    service: Arc<UnderwritingService>,
    listener: Listener,
}

impl ClientSession {
    pub fn open(service: Arc<UnderwritingService>, client_id: ClientId) -> Self {
        let listener = service.orchestrator().emitter().connect_client(client_id.clone());
        info!(client_id = %client_id, "client connected");
        Self {
            client_id,
            service,
            listener,
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Handles one inbound text frame. Malformed or unknown commands produce an
    /// error message; the session stays open.
    pub fn handle_text(&self, raw: &str) -> ServerMessage {
        match serde_json::from_str::<ClientCommand>(raw) {
            Ok(command) => self.handle(command),
            Err(err) => {
                debug!(client_id = %self.client_id, error = %err, "unparseable client command");
                ServerMessage::Error {
                    message: format!("unrecognised command: {err}"),
                }
            }
        }
    }

    pub fn handle(&self, command: ClientCommand) -> ServerMessage {
        let orchestrator = self.service.orchestrator();
        let emitter = orchestrator.emitter();
        match command {
            ClientCommand::Process { data } => {
                let application_id = data.application_id.clone();
                let prepared = match orchestrator.prepare(data) {
                    Ok(prepared) => prepared,
                    Err(err) => {
                        return ServerMessage::Error {
                            message: err.to_string(),
                        }
                    }
                };
                let run_id = prepared.run_id().clone();
                emitter.attach_client(&run_id, &self.client_id);
                // The run keeps going if this client disconnects.
                drop(orchestrator.launch(prepared));
                info!(client_id = %self.client_id, %run_id, %application_id, "client started run");
                ServerMessage::RunStarted {
                    run_id,
                    application_id,
                }
            }
            ClientCommand::Watch { run_id } => match emitter.attach_client(&run_id, &self.client_id) {
                AttachOutcome::Live | AttachOutcome::Replayed => ServerMessage::Watching { run_id },
                AttachOutcome::UnknownRun => ServerMessage::Error {
                    message: format!("unknown run {run_id}"),
                },
            },
            ClientCommand::Ping => ServerMessage::Pong {
                timestamp: Utc::now(),
            },
        }
    }

    /// Next message from the client's queue; `None` once the session is closed.
    pub async fn next_message(&mut self) -> Option<ServerMessage> {
        self.listener.recv().await.map(|delivery| match delivery {
            Delivery::Event(event) => ServerMessage::Progress(event),
            Delivery::Lagged { dropped } => ServerMessage::Lagged { dropped },
        })
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.service
            .orchestrator()
            .emitter()
            .disconnect_client(&self.client_id, self.listener.id());
        info!(client_id = %self.client_id, "client disconnected");
    }
}
