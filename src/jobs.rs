//! Job operations
//!
//! Cancel, restart, hold and move jobs, plus the ownership lookup that lets
//! the gateway apply a softer policy when a caller touches their own job.

use crate::ipp::{GroupTag, IppRequest, Op, Value};
use crate::session::{QueueKind, Resource, Session};
use crate::transport::Channel;
use crate::validate::{validate_job_id, Role};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Job state enum values from the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum JobState {
    Pending = 3,
    Held = 4,
    Processing = 5,
    Stopped = 6,
    Canceled = 7,
    Aborted = 8,
    Completed = 9,
}

impl JobState {
    pub fn from_i32(value: i32) -> Option<JobState> {
        match value {
            3 => Some(JobState::Pending),
            4 => Some(JobState::Held),
            5 => Some(JobState::Processing),
            6 => Some(JobState::Stopped),
            7 => Some(JobState::Canceled),
            8 => Some(JobState::Aborted),
            9 => Some(JobState::Completed),
            _ => None,
        }
    }

    /// Whether the job is still queued or running
    pub fn is_active(self) -> bool {
        !matches!(
            self,
            JobState::Canceled | JobState::Aborted | JobState::Completed
        )
    }
}

/// One job as reported by a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: i32,
    pub state: Option<JobState>,
}

/// How a job relates to a named user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOwnership {
    OwnedByUser,
    NotOwnedByUser,
    /// The job does not exist or its attributes could not be read
    Invalid,
}

impl<C: Channel> Session<C> {
    /// Jobs still queued or printing on a printer. `None` when the listing
    /// itself failed; a printer without jobs yields an empty list.
    pub async fn get_jobs(&mut self, printer_name: &str) -> Option<Vec<JobRecord>> {
        if !self.check(Role::PrinterName, Some(printer_name)) {
            return None;
        }

        let mut request = self.queue_request(Op::GetJobs, QueueKind::Printer, printer_name);
        request.add(
            GroupTag::Operation,
            "which-jobs",
            Value::Keyword("not-completed".into()),
        );
        request.requested_attributes(&["job-id", "job-state"]);

        let reply = self.query(&request, Resource::Root).await?;

        let jobs = reply
            .groups_of(GroupTag::Job)
            .filter_map(|group| {
                let id = group.integer("job-id")?;
                Some(JobRecord {
                    id,
                    state: group.integer("job-state").and_then(JobState::from_i32),
                })
            })
            .collect();

        Some(jobs)
    }

    /// Who owns a job, compared to `user`. The service reports the
    /// originating user name with the job attributes; a job that cannot be
    /// queried is invalid rather than foreign.
    pub async fn job_get_ownership(&mut self, job_id: i32, user: &str) -> JobOwnership {
        if let Err(e) = validate_job_id(job_id) {
            self.reject(e);
            return JobOwnership::Invalid;
        }
        if !self.check(Role::User, Some(user)) {
            return JobOwnership::Invalid;
        }

        let mut request = IppRequest::new(Op::GetJobAttributes);
        request.target_job(job_id);
        request.requesting_user(self.default_user());
        request.requested_attributes(&["job-originating-user-name"]);

        let reply = match self.query(&request, Resource::Root).await {
            Some(reply) => reply,
            None => return JobOwnership::Invalid,
        };

        match reply.string(GroupTag::Job, "job-originating-user-name") {
            Some(owner) if owner == user => JobOwnership::OwnedByUser,
            Some(_) => JobOwnership::NotOwnedByUser,
            None => JobOwnership::Invalid,
        }
    }

    /// Cancel a job; `purge` also removes the job files from the spool.
    pub async fn job_cancel(&mut self, job_id: i32, purge: bool, user: Option<&str>) -> bool {
        if let Err(e) = validate_job_id(job_id) {
            return self.reject(e);
        }
        if user.is_some() && !self.check(Role::User, user) {
            return false;
        }

        info!("cancelling job {job_id} (purge: {purge})");
        self.send_job_op(Op::CancelJob, job_id, user, |request| {
            request.add(GroupTag::Operation, "purge-job", Value::Boolean(purge));
        })
        .await
    }

    /// Restart a completed or stopped job from the beginning.
    pub async fn job_restart(&mut self, job_id: i32, user: Option<&str>) -> bool {
        if let Err(e) = validate_job_id(job_id) {
            return self.reject(e);
        }
        self.send_job_op(Op::RestartJob, job_id, user, |_| {}).await
    }

    /// Set the job-hold-until attribute: "no-hold" releases a job,
    /// "indefinite" holds it until released.
    pub async fn job_set_hold_until(
        &mut self,
        job_id: i32,
        hold_until: &str,
        user: Option<&str>,
    ) -> bool {
        if let Err(e) = validate_job_id(job_id) {
            return self.reject(e);
        }
        if !self.check(Role::JobHoldUntil, Some(hold_until)) {
            return false;
        }
        self.send_job_attribute(job_id, "job-hold-until", hold_until, user)
            .await
    }

    /// Move a job to another printer.
    pub async fn job_move(&mut self, job_id: i32, printer_name: &str) -> bool {
        if let Err(e) = validate_job_id(job_id) {
            return self.reject(e);
        }
        if !self.check(Role::PrinterName, Some(printer_name)) {
            return false;
        }

        let mut request = IppRequest::new(Op::CupsMoveJob);
        request.target_job(job_id);
        request.requesting_user(self.default_user());
        request.job_printer(printer_name);

        self.send(&request, Resource::Jobs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipp::{job_uri, Attribute, Group, IppResponse, StatusCode};
    use crate::transport::testing::{reply, reply_with, ScriptedChannel};

    fn job_group(attrs: Vec<Attribute>) -> Group {
        Group {
            tag: GroupTag::Job,
            attributes: attrs,
        }
    }

    fn attr(name: &str, value: Value) -> Attribute {
        Attribute {
            name: name.into(),
            values: vec![value],
        }
    }

    #[tokio::test]
    async fn test_get_jobs_parses_listing() {
        let groups = vec![
            job_group(vec![
                attr("job-id", Value::Integer(11)),
                attr("job-state", Value::Enum(3)),
            ]),
            job_group(vec![
                attr("job-id", Value::Integer(12)),
                attr("job-state", Value::Enum(5)),
            ]),
        ];
        let mut channel = ScriptedChannel::default();
        channel.push_reply(Ok(reply_with(StatusCode::OK, groups)));
        let mut session = Session::new(channel, "root");

        let jobs = session.get_jobs("office").await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, 11);
        assert_eq!(jobs[0].state, Some(JobState::Pending));
        assert_eq!(jobs[1].state, Some(JobState::Processing));

        let request = &session.channel_for_tests().sent[0].1;
        let decoded = IppResponse::decode(&request.encode()).unwrap();
        assert_eq!(
            decoded.string(GroupTag::Operation, "which-jobs"),
            Some("not-completed")
        );
    }

    #[tokio::test]
    async fn test_ownership_matches_originating_user() {
        let groups = vec![job_group(vec![attr(
            "job-originating-user-name",
            Value::Name("alice".into()),
        )])];
        let mut channel = ScriptedChannel::default();
        channel.push_reply(Ok(reply_with(StatusCode::OK, groups)));
        let mut session = Session::new(channel, "root");

        assert_eq!(
            session.job_get_ownership(7, "alice").await,
            JobOwnership::OwnedByUser
        );
    }

    #[tokio::test]
    async fn test_ownership_foreign_and_missing_jobs() {
        let owned_by_bob = vec![job_group(vec![attr(
            "job-originating-user-name",
            Value::Name("bob".into()),
        )])];
        let mut channel = ScriptedChannel::default();
        channel.push_reply(Ok(reply_with(StatusCode::OK, owned_by_bob)));
        channel.push_reply(Ok(reply(StatusCode::NOT_FOUND)));
        let mut session = Session::new(channel, "root");

        assert_eq!(
            session.job_get_ownership(7, "alice").await,
            JobOwnership::NotOwnedByUser
        );
        assert_eq!(
            session.job_get_ownership(9999, "alice").await,
            JobOwnership::Invalid
        );
    }

    #[tokio::test]
    async fn test_bad_job_id_rejected_without_io() {
        let mut session = Session::new(ScriptedChannel::default(), "root");
        assert!(!session.job_cancel(0, false, None).await);
        assert!(!session.job_restart(-3, None).await);
        assert_eq!(session.channel_for_tests().sent.len(), 0);
        assert_eq!(
            session.last_status_string(),
            "\"-3\" is not a valid job id."
        );
    }

    #[tokio::test]
    async fn test_cancel_carries_purge_flag_and_user() {
        let mut channel = ScriptedChannel::default();
        channel.push_reply(Ok(reply(StatusCode::OK)));
        let mut session = Session::new(channel, "root");

        assert!(session.job_cancel(42, true, Some("alice")).await);

        let (resource, request) = &session.channel_for_tests().sent[0];
        assert_eq!(resource, "/jobs/");
        let decoded = IppResponse::decode(&request.encode()).unwrap();
        let op_group = decoded.group(GroupTag::Operation).unwrap();
        assert_eq!(op_group.string("job-uri"), Some(job_uri(42).as_str()));
        assert_eq!(op_group.string("requesting-user-name"), Some("alice"));
        assert_eq!(op_group.boolean("purge-job"), Some(true));
    }

    #[tokio::test]
    async fn test_hold_until_goes_through_set_job_attributes() {
        let mut channel = ScriptedChannel::default();
        channel.push_reply(Ok(reply(StatusCode::OK)));
        let mut session = Session::new(channel, "root");

        assert!(session.job_set_hold_until(5, "indefinite", None).await);

        let request = &session.channel_for_tests().sent[0].1;
        assert_eq!(request.op, Op::SetJobAttributes);
        let decoded = IppResponse::decode(&request.encode()).unwrap();
        assert_eq!(
            decoded.string(GroupTag::Job, "job-hold-until"),
            Some("indefinite")
        );
    }

    #[tokio::test]
    async fn test_move_targets_destination_printer() {
        let mut channel = ScriptedChannel::default();
        channel.push_reply(Ok(reply(StatusCode::OK)));
        let mut session = Session::new(channel, "root");

        assert!(session.job_move(13, "upstairs").await);

        let request = &session.channel_for_tests().sent[0].1;
        assert_eq!(request.op, Op::CupsMoveJob);
        let decoded = IppResponse::decode(&request.encode()).unwrap();
        assert_eq!(
            decoded.string(GroupTag::Operation, "job-printer-uri"),
            Some("ipp://localhost/printers/upstairs")
        );
    }

    #[test]
    fn test_job_state_activity() {
        assert!(JobState::Pending.is_active());
        assert!(JobState::Held.is_active());
        assert!(!JobState::Completed.is_active());
        assert!(JobState::from_i32(2).is_none());
    }
}
