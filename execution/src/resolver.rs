//! On-demand fetching of named resources from the peer that sent a task.

use std::sync::{Arc, Weak};
use std::time::Duration;

use core_types::{ConnectionId, RequestIdentifier, SessionId};
use dashmap::DashMap;
use ipc::{ResourceData, ResourceRequest, ResourceResponse};

use crate::coordinator::ExecutionCoordinator;
use crate::error::{ExecutionError, ResourceError};
use crate::pending::PendingResponses;

/// Per-session resource lookup
///
/// Resolution tries the local resource source, then this session's cache
/// of resources fetched earlier, and only then the peer on the current
/// connection. Fetched resources are cached for the life of the session.
pub struct ResourceResolver {
    session_id: SessionId,
    coordinator: Weak<ExecutionCoordinator>,
    cache: DashMap<String, Vec<u8>>,
    pending: PendingResponses<RequestIdentifier, ResourceResponse>,
    timeout: Duration,
}

impl ResourceResolver {
    pub(crate) fn new(
        session_id: SessionId,
        coordinator: Weak<ExecutionCoordinator>,
        timeout: Duration,
    ) -> Self {
        Self {
            session_id,
            coordinator,
            cache: DashMap::new(),
            pending: PendingResponses::new(),
            timeout,
        }
    }

    /// Finds `name` locally or, given a connection, on the peer behind it
    pub fn resolve(
        &self,
        name: &str,
        connection: Option<&ConnectionId>,
    ) -> Result<Vec<u8>, ResourceError> {
        let coordinator = self.coordinator().map_err(|source| ResourceError::Request {
            name: name.to_string(),
            source,
        })?;
        if let Some(data) = self.lookup_local(&coordinator, name)? {
            return Ok(data);
        }
        match connection {
            Some(connection) => self.fetch_remote(&coordinator, name, connection),
            None => Err(ResourceError::NotFound(name.to_string())),
        }
    }

    /// Returns a previously fetched resource
    pub fn cached(&self, name: &str) -> Option<Vec<u8>> {
        self.cache.get(name).map(|entry| entry.value().clone())
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Builds the reply to a peer's resource request from local knowledge only
    pub(crate) fn answer(&self, request: &ResourceRequest) -> ResourceResponse {
        let mut resources = Vec::new();
        if let Ok(coordinator) = self.coordinator() {
            for name in &request.resource_names {
                match self.lookup_local(&coordinator, name) {
                    Ok(Some(data)) => resources.push(ResourceData::new(name.clone(), data)),
                    Ok(None) => tracing::debug!("resource {name} not available for peer"),
                    Err(err) => tracing::warn!("resource {name} could not be read: {err}"),
                }
            }
        }
        ResourceResponse {
            resources,
            request_identifier: request.request_identifier.clone(),
        }
    }

    pub(crate) fn receive_response(&self, response: ResourceResponse) {
        let request = response.request_identifier.clone();
        if !self.pending.complete(&request, response) {
            tracing::debug!("discarding resource response for {request}: nothing pending");
        }
    }

    fn coordinator(&self) -> Result<Arc<ExecutionCoordinator>, ExecutionError> {
        self.coordinator
            .upgrade()
            .ok_or(ExecutionError::CoordinatorShutDown)
    }

    fn lookup_local(
        &self,
        coordinator: &ExecutionCoordinator,
        name: &str,
    ) -> Result<Option<Vec<u8>>, ResourceError> {
        let loaded = coordinator
            .resources()
            .load(name)
            .map_err(|source| ResourceError::Source {
                name: name.to_string(),
                source,
            })?;
        Ok(loaded.or_else(|| self.cached(name)))
    }

    fn fetch_remote(
        &self,
        coordinator: &ExecutionCoordinator,
        name: &str,
        connection: &ConnectionId,
    ) -> Result<Vec<u8>, ResourceError> {
        let request_error = |source: ExecutionError| ResourceError::Request {
            name: name.to_string(),
            source,
        };

        let request_identifier = RequestIdentifier::new(self.session_id)
            .with_label(format!("Request for resources: [{name}]"));
        let pending = self
            .pending
            .register(request_identifier.clone())
            .map_err(request_error)?;
        let request = ResourceRequest {
            resource_names: vec![name.to_string()],
            request_identifier,
        };
        coordinator.send(connection, &request).map_err(request_error)?;

        let response = pending.wait(self.timeout).ok_or_else(|| ResourceError::Timeout {
            name: name.to_string(),
            timeout: self.timeout,
        })?;

        let mut found = None;
        for resource in response.resources {
            if resource.name == name {
                self.cache.insert(resource.name, resource.data.clone());
                found = Some(resource.data);
            }
        }
        found.ok_or_else(|| ResourceError::NotFound(name.to_string()))
    }
}
