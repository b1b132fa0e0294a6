//! Session with the print service
//!
//! Owns the persistent channel plus the status pair every operation reports
//! through: the last service status code, and an optional internal status
//! string that takes precedence over it. Exactly one of the two is
//! authoritative at any time; starting a new request clears the internal
//! status so stale errors never leak into an unrelated failure.

use crate::ipp::{IppRequest, IppResponse, Op, StatusCode, Value};
use crate::transport::{http_status_text, Channel};
use crate::validate::{validate, Role, ValidationError};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// How often and how long we retry when the service restarts under us.
/// 30 x 100 ms covers a service restart without making callers wait long.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 30;
pub const RECONNECT_DELAY: Duration = Duration::from_millis(100);

/// HTTP resource a request is posted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Root,
    Admin,
    Jobs,
}

impl Resource {
    pub fn path(self) -> &'static str {
        match self {
            Resource::Root => "/",
            Resource::Admin => "/admin/",
            Resource::Jobs => "/jobs/",
        }
    }
}

/// Which flavour of a queue a request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Printer,
    Class,
}

/// Live session with the print service
pub struct Session<C: Channel> {
    channel: C,
    user: String,
    last_status: StatusCode,
    internal_status: Option<String>,
}

impl<C: Channel> Session<C> {
    /// Wrap an established channel. `user` is the identity attached to
    /// requests when the caller does not supply one.
    pub fn new(channel: C, user: impl Into<String>) -> Self {
        Self {
            channel,
            user: user.into(),
            last_status: StatusCode::OK,
            internal_status: None,
        }
    }

    /// Identity used when the adapter does not name the caller
    pub fn default_user(&self) -> &str {
        &self.user
    }

    #[cfg(test)]
    pub(crate) fn channel_for_tests(&self) -> &C {
        &self.channel
    }

    pub fn last_status(&self) -> StatusCode {
        self.last_status
    }

    /// Caller-visible status: the internal string when set, otherwise the
    /// rendering of the last service status. Reading it does not change it.
    pub fn last_status_string(&self) -> String {
        match &self.internal_status {
            Some(status) => status.clone(),
            None => self.last_status.to_string(),
        }
    }

    pub fn set_internal_status(&mut self, status: Option<String>) {
        self.internal_status = status;
    }

    /// Record an HTTP status from a file transfer: 2xx clears the internal
    /// status, anything else becomes the caller-visible error.
    pub fn set_status_from_http(&mut self, status: u16) {
        if (200..300).contains(&status) {
            self.internal_status = None;
        } else {
            self.internal_status = Some(http_status_text(status));
        }
    }

    /// Record a validation failure as the caller-visible status.
    /// Returns false so call sites can `return session.reject(err)`.
    pub fn reject(&mut self, err: ValidationError) -> bool {
        self.internal_status = Some(err.to_string());
        false
    }

    /// Validate a caller string; a rejection becomes the caller-visible
    /// status and must keep the value off the wire.
    pub fn check(&mut self, role: Role, value: Option<&str>) -> bool {
        match validate(role, value) {
            Ok(()) => true,
            Err(e) => self.reject(e),
        }
    }

    /// Bounded reconnection after the service restarted under us.
    /// Blocks the worker; this is an expected operational condition,
    /// not an error to escalate on the first attempt.
    pub async fn reconnect(&mut self) -> bool {
        for attempt in 1..=MAX_RECONNECT_ATTEMPTS {
            match self.channel.reconnect().await {
                Ok(()) => {
                    if attempt > 1 {
                        debug!("reconnected to print service after {attempt} attempts");
                    }
                    return true;
                }
                Err(e) => {
                    debug!("reconnect attempt {attempt} failed: {e}");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }

        warn!(
            "could not reconnect to print service after {} attempts",
            MAX_RECONNECT_ATTEMPTS
        );
        false
    }

    fn classify(&mut self, result: std::io::Result<IppResponse>) -> Option<IppResponse> {
        // The service reply is authoritative from here on.
        self.internal_status = None;

        match result {
            Ok(reply) if reply.status.is_ok() => {
                self.last_status = StatusCode::OK;
                Some(reply)
            }
            Ok(reply) => {
                self.last_status = reply.status;
                None
            }
            Err(e) => {
                self.last_status = StatusCode::SERVICE_UNAVAILABLE;
                self.internal_status = Some(e.to_string());
                None
            }
        }
    }

    /// Send a request and classify the reply, discarding its content.
    pub async fn send(&mut self, request: &IppRequest, resource: Resource) -> bool {
        self.post(request, None, resource).await
    }

    /// Send a request with an optional file body appended.
    pub async fn post(
        &mut self,
        request: &IppRequest,
        file: Option<&Path>,
        resource: Resource,
    ) -> bool {
        let result = self.channel.roundtrip(resource.path(), request, file).await;
        self.classify(result).is_some()
    }

    /// Send a query and hand back the decoded reply on success.
    pub async fn query(
        &mut self,
        request: &IppRequest,
        resource: Resource,
    ) -> Option<IppResponse> {
        let result = self.channel.roundtrip(resource.path(), request, None).await;
        self.classify(result)
    }

    /// GET a resource body; transport errors become the internal status.
    pub async fn fetch(&mut self, resource: &str) -> Option<(u16, Vec<u8>)> {
        match self.channel.fetch(resource).await {
            Ok(result) => Some(result),
            Err(e) => {
                self.internal_status = Some(e.to_string());
                None
            }
        }
    }

    /// PUT a resource body; transport errors become the internal status.
    pub async fn store(&mut self, resource: &str, body: &[u8]) -> Option<u16> {
        match self.channel.store(resource, body).await {
            Ok(status) => Some(status),
            Err(e) => {
                self.internal_status = Some(e.to_string());
                None
            }
        }
    }

    /// Build the skeleton shared by every queue-targeted request: operation
    /// code, target URI, requesting user.
    pub fn queue_request(&self, op: Op, kind: QueueKind, name: &str) -> IppRequest {
        let mut request = IppRequest::new(op);
        match kind {
            QueueKind::Printer => request.target_printer(name),
            QueueKind::Class => request.target_class(name),
        };
        request.requesting_user(&self.user);
        request
    }

    /// Simple request: operation plus target, nothing else
    pub async fn send_queue_op(
        &mut self,
        op: Op,
        kind: QueueKind,
        name: &str,
        resource: Resource,
    ) -> bool {
        let request = self.queue_request(op, kind, name);
        self.send(&request, resource).await
    }

    /// Modify a queue whose kind is unknown: try the printer-shaped request
    /// first and, if the service answers "not possible on this object",
    /// retry the identical attributes as a class modification. The retry
    /// happens at most once; a second failure is surfaced as-is.
    pub async fn modify_queue<F>(&mut self, name: &str, build: F) -> bool
    where
        F: Fn(&mut IppRequest) + Send,
    {
        let mut request = self.queue_request(Op::CupsAddModifyPrinter, QueueKind::Printer, name);
        build(&mut request);

        if self.send(&request, Resource::Admin).await {
            return true;
        }

        if self.last_status != StatusCode::NOT_POSSIBLE {
            return false;
        }

        // it failed, maybe it was a class?
        let mut request = self.queue_request(Op::CupsAddModifyClass, QueueKind::Class, name);
        build(&mut request);

        self.send(&request, Resource::Admin).await
    }

    /// Job-targeted request; the explicit user wins over the default.
    pub async fn send_job_op(
        &mut self,
        op: Op,
        job_id: i32,
        user: Option<&str>,
        extra: impl FnOnce(&mut IppRequest),
    ) -> bool {
        let mut request = IppRequest::new(op);
        request.target_job(job_id);
        request.requesting_user(user.unwrap_or(&self.user));
        extra(&mut request);
        self.send(&request, Resource::Jobs).await
    }

    /// Set one job attribute via Set-Job-Attributes
    pub async fn send_job_attribute(
        &mut self,
        job_id: i32,
        name: &str,
        value: &str,
        user: Option<&str>,
    ) -> bool {
        let attr = Value::Keyword(value.to_string());
        let name = name.to_string();
        self.send_job_op(Op::SetJobAttributes, job_id, user, move |request| {
            request.add(crate::ipp::GroupTag::Job, &name, attr);
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipp::GroupTag;
    use crate::transport::testing::{reply, ScriptedChannel};

    fn session(channel: ScriptedChannel) -> Session<ScriptedChannel> {
        Session::new(channel, "root")
    }

    #[tokio::test]
    async fn test_success_clears_internal_status() {
        let mut channel = ScriptedChannel::default();
        channel.push_reply(Ok(reply(StatusCode::OK)));
        let mut session = session(channel);
        session.set_internal_status(Some("stale error".into()));

        let request = IppRequest::new(Op::CupsGetDefault);
        assert!(session.send(&request, Resource::Root).await);
        assert_eq!(session.last_status_string(), "successful-ok");
    }

    #[tokio::test]
    async fn test_service_rejection_is_authoritative() {
        let mut channel = ScriptedChannel::default();
        channel.push_reply(Ok(reply(StatusCode::NOT_FOUND)));
        let mut session = session(channel);

        let request = IppRequest::new(Op::CupsDeletePrinter);
        assert!(!session.send(&request, Resource::Admin).await);
        assert_eq!(session.last_status_string(), "client-error-not-found");

        // Idempotent accessor: reading twice yields the same value.
        assert_eq!(session.last_status_string(), "client-error-not-found");
    }

    #[tokio::test]
    async fn test_transport_failure_sets_internal_status() {
        let mut channel = ScriptedChannel::default();
        channel.push_reply(Err(std::io::Error::other("connection reset")));
        let mut session = session(channel);

        let request = IppRequest::new(Op::CupsGetPrinters);
        assert!(!session.send(&request, Resource::Root).await);
        assert_eq!(session.last_status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(session.last_status_string(), "connection reset");
    }

    #[tokio::test]
    async fn test_class_fallback_retries_once() {
        let mut channel = ScriptedChannel::default();
        channel.push_reply(Ok(reply(StatusCode::NOT_POSSIBLE)));
        channel.push_reply(Ok(reply(StatusCode::OK)));
        let mut session = session(channel);

        let ok = session
            .modify_queue("Office", |request| {
                request.add(
                    GroupTag::Operation,
                    "printer-is-shared",
                    Value::Boolean(true),
                );
            })
            .await;
        assert!(ok);

        let sent = session.channel.sent.clone();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1.op, Op::CupsAddModifyPrinter);
        assert_eq!(sent[1].1.op, Op::CupsAddModifyClass);

        // identical attribute set either way; only the target uri differs
        let attributes = |request: &IppRequest| {
            let decoded = IppResponse::decode(&request.encode()).unwrap();
            decoded
                .group(GroupTag::Operation)
                .unwrap()
                .attributes
                .iter()
                .filter(|a| a.name != "printer-uri")
                .cloned()
                .collect::<Vec<_>>()
        };
        assert_eq!(attributes(&sent[0].1), attributes(&sent[1].1));
        assert_eq!(
            IppResponse::decode(&sent[0].1.encode())
                .unwrap()
                .string(GroupTag::Operation, "printer-uri"),
            Some("ipp://localhost/printers/Office")
        );
        assert_eq!(
            IppResponse::decode(&sent[1].1.encode())
                .unwrap()
                .string(GroupTag::Operation, "printer-uri"),
            Some("ipp://localhost/classes/Office")
        );
    }

    #[tokio::test]
    async fn test_class_fallback_does_not_loop() {
        let mut channel = ScriptedChannel::default();
        channel.push_reply(Ok(reply(StatusCode::NOT_POSSIBLE)));
        channel.push_reply(Ok(reply(StatusCode::NOT_POSSIBLE)));
        let mut session = session(channel);

        let ok = session.modify_queue("Office", |_| {}).await;
        assert!(!ok);
        assert_eq!(session.channel.sent.len(), 2);
        assert_eq!(session.last_status(), StatusCode::NOT_POSSIBLE);
    }

    #[tokio::test]
    async fn test_no_fallback_for_other_failures() {
        let mut channel = ScriptedChannel::default();
        channel.push_reply(Ok(reply(StatusCode::FORBIDDEN)));
        let mut session = session(channel);

        assert!(!session.modify_queue("Office", |_| {}).await);
        assert_eq!(session.channel.sent.len(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_is_bounded() {
        let mut channel = ScriptedChannel::default();
        channel.fail_reconnects = usize::MAX;
        let mut session = session(channel);

        tokio::time::pause();
        assert!(!session.reconnect().await);
        assert_eq!(
            session.channel.reconnect_attempts,
            MAX_RECONNECT_ATTEMPTS as usize
        );
    }

    #[tokio::test]
    async fn test_reconnect_stops_on_success() {
        let mut channel = ScriptedChannel::default();
        channel.fail_reconnects = 3;
        let mut session = session(channel);

        tokio::time::pause();
        assert!(session.reconnect().await);
        assert_eq!(session.channel.reconnect_attempts, 4);
    }
}
