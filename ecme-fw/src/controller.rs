// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The controller-session seam.
//!
//! Framing, authentication and retries of the management protocol live
//! behind [`ControllerSession`]; this crate only ever sees typed requests and
//! responses.

use crate::error::CommunicationError;
use crate::error::SessionError;
use async_trait::async_trait;
use ecme_messages::ControllerRequest;
use ecme_messages::ControllerResponse;
use slog::trace;
use slog::Logger;
use std::net::IpAddr;
use std::sync::Arc;

#[async_trait]
pub trait ControllerSession: Send + Sync + 'static {
    /// Address of the management controller this session talks to.
    fn address(&self) -> IpAddr;

    /// Send one request and wait for its response.
    async fn call(
        &self,
        request: ControllerRequest,
    ) -> Result<ControllerResponse, SessionError>;
}

#[async_trait]
impl<T: ControllerSession> ControllerSession for Arc<T> {
    fn address(&self) -> IpAddr {
        (**self).address()
    }

    async fn call(
        &self,
        request: ControllerRequest,
    ) -> Result<ControllerResponse, SessionError> {
        (**self).call(request).await
    }
}

/// A controller session plus the context we attach to its failures.
pub(crate) struct Controller {
    session: Box<dyn ControllerSession>,
    log: Logger,
}

impl Controller {
    pub(crate) fn new(
        session: Box<dyn ControllerSession>,
        log: Logger,
    ) -> Self {
        Self { session, log }
    }

    pub(crate) fn address(&self) -> IpAddr {
        self.session.address()
    }

    pub(crate) async fn rpc(
        &self,
        request: ControllerRequest,
    ) -> Result<ControllerResponse, CommunicationError> {
        let operation: &'static str = (&request).into();
        trace!(
            self.log, "sending controller request";
            "operation" => operation,
        );
        self.session.call(request).await.map_err(|err| {
            CommunicationError::Protocol {
                operation,
                node: self.session.address(),
                err,
            }
        })
    }
}
