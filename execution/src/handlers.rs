//! Per-kind processing of decoded inbound messages.

use std::sync::Arc;

use core_types::ConnectionId;
use ipc::{
    ExecutionRequest, ExecutionResponse, Message, Ping, Pong, ResourceRequest, ResourceResponse,
};

use crate::coordinator::ExecutionCoordinator;
use crate::ExecutionError;

/// Handles one kind of inbound message
pub(crate) trait MessageProcessor<M>: Send + Sync {
    fn process(
        &self,
        coordinator: &Arc<ExecutionCoordinator>,
        connection: &ConnectionId,
        message: M,
    ) -> Result<(), ExecutionError>;
}

pub(crate) struct ExecutionRequestProcessor;
pub(crate) struct ExecutionResponseProcessor;
pub(crate) struct ResourceRequestProcessor;
pub(crate) struct ResourceResponseProcessor;
pub(crate) struct PingProcessor;
pub(crate) struct PongProcessor;

/// Routes a decoded message to the processor for its kind
pub(crate) fn dispatch(
    coordinator: &Arc<ExecutionCoordinator>,
    connection: &ConnectionId,
    message: Message,
) -> Result<(), ExecutionError> {
    match message {
        Message::ExecutionRequest(m) => ExecutionRequestProcessor.process(coordinator, connection, m),
        Message::ExecutionResponse(m) => {
            ExecutionResponseProcessor.process(coordinator, connection, m)
        }
        Message::ResourceRequest(m) => ResourceRequestProcessor.process(coordinator, connection, m),
        Message::ResourceResponse(m) => {
            ResourceResponseProcessor.process(coordinator, connection, m)
        }
        Message::Ping(m) => PingProcessor.process(coordinator, connection, m),
        Message::Pong(m) => PongProcessor.process(coordinator, connection, m),
    }
}

impl MessageProcessor<ExecutionRequest> for ExecutionRequestProcessor {
    fn process(
        &self,
        coordinator: &Arc<ExecutionCoordinator>,
        connection: &ConnectionId,
        message: ExecutionRequest,
    ) -> Result<(), ExecutionError> {
        let session = coordinator.session(message.request_identifier.session_id);
        session.receive_execution_request(connection, message);
        Ok(())
    }
}

impl MessageProcessor<ExecutionResponse> for ExecutionResponseProcessor {
    fn process(
        &self,
        coordinator: &Arc<ExecutionCoordinator>,
        _connection: &ConnectionId,
        message: ExecutionResponse,
    ) -> Result<(), ExecutionError> {
        let session = coordinator.session(message.request_identifier.session_id);
        session.receive_execution_response(message);
        Ok(())
    }
}

impl MessageProcessor<ResourceRequest> for ResourceRequestProcessor {
    fn process(
        &self,
        coordinator: &Arc<ExecutionCoordinator>,
        connection: &ConnectionId,
        message: ResourceRequest,
    ) -> Result<(), ExecutionError> {
        let session = coordinator.session(message.request_identifier.session_id);
        let response = session.resolver().answer(&message);
        tracing::debug!(
            "answering {} with {} of {} resources",
            message.request_identifier,
            response.resources.len(),
            message.resource_names.len()
        );
        coordinator.send(connection, &response)
    }
}

impl MessageProcessor<ResourceResponse> for ResourceResponseProcessor {
    fn process(
        &self,
        coordinator: &Arc<ExecutionCoordinator>,
        _connection: &ConnectionId,
        message: ResourceResponse,
    ) -> Result<(), ExecutionError> {
        let session = coordinator.session(message.request_identifier.session_id);
        session.resolver().receive_response(message);
        Ok(())
    }
}

impl MessageProcessor<Ping> for PingProcessor {
    fn process(
        &self,
        coordinator: &Arc<ExecutionCoordinator>,
        connection: &ConnectionId,
        message: Ping,
    ) -> Result<(), ExecutionError> {
        tracing::info!("ping from {connection}: {}", message.message);
        coordinator.send(connection, &message.reply())
    }
}

impl MessageProcessor<Pong> for PongProcessor {
    fn process(
        &self,
        coordinator: &Arc<ExecutionCoordinator>,
        connection: &ConnectionId,
        message: Pong,
    ) -> Result<(), ExecutionError> {
        tracing::info!("pong from {connection}: {}", message.message);
        coordinator.complete_ping(message);
        Ok(())
    }
}
